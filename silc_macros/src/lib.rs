extern crate proc_macro;

use proc_macro::TokenStream;

mod define_entry_refs;

/// Define a set of opaque, sequentially allocated handle types for entries held
/// in an arena, plus an enum over all of them and a generator.
///
/// ```ignore
/// entry_refs!(EntryRef (EntryRefGenerator) {
///     Client;
///     Channel;
/// });
/// ```
///
/// generates `ClientRef`, `ChannelRef`, `enum EntryRef { Client(ClientRef), Channel(ChannelRef) }`
/// and `EntryRefGenerator` with `next_client()` / `next_channel()`.
#[proc_macro]
pub fn entry_refs(input: TokenStream) -> TokenStream {
    define_entry_refs::entry_refs(input)
}
