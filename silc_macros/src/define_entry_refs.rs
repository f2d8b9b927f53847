use super::*;

use convert_case::{Case, Casing};
use proc_macro2::Span;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{parse_macro_input, token, Ident, Result, Token};

struct EntryRefDefn {
    typename: Ident,
    _semi: Token![;],
}

impl Parse for EntryRefDefn {
    fn parse(input: ParseStream) -> Result<Self> {
        Ok(Self {
            typename: input.parse()?,
            _semi: input.parse()?,
        })
    }
}

struct EntryRefList {
    enum_name: Ident,
    generator_name: Ident,
    _brace: token::Brace,
    items: Vec<EntryRefDefn>,
}

impl Parse for EntryRefList {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut items = Vec::new();
        let enum_name = input.parse()?;

        let content;
        let _paren: token::Paren = syn::parenthesized!(content in input);
        let generator_name = content.parse()?;

        let content2;
        let _brace = syn::braced!(content2 in input);

        while !content2.is_empty() {
            items.push(content2.parse::<EntryRefDefn>()?);
        }

        Ok(Self {
            enum_name,
            generator_name,
            _brace,
            items,
        })
    }
}

pub fn entry_refs(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as EntryRefList);

    let mut output = proc_macro2::TokenStream::new();
    let enum_name = input.enum_name;
    let generator_name = input.generator_name;

    let mut enum_variants = Vec::new();
    let mut counter_fields = Vec::new();
    let mut counter_inits = Vec::new();
    let mut next_fns = Vec::new();

    for item in input.items {
        let typename = item.typename;
        let ref_typename = Ident::new(&format!("{}Ref", typename), Span::call_site());
        let snake = typename.to_string().to_case(Case::Snake);
        let counter = Ident::new(&snake, Span::call_site());
        let next_fn = Ident::new(&format!("next_{}", snake), Span::call_site());
        let display_prefix = snake.clone();

        enum_variants.push(quote!(
            #typename(#ref_typename)
        ));

        counter_fields.push(quote!(
            #counter: std::sync::atomic::AtomicU64
        ));
        counter_inits.push(quote!(
            #counter: 1.into()
        ));
        next_fns.push(quote!(
            pub fn #next_fn(&self) -> #ref_typename {
                #ref_typename(self.#counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
            }
        ));

        output.extend(quote!(
            #[derive(PartialEq,Eq,PartialOrd,Ord,Hash,Debug,Clone,Copy,serde::Serialize,serde::Deserialize)]
            pub struct #ref_typename(u64);

            impl #ref_typename
            {
                pub const fn new(serial: u64) -> Self { Self(serial) }

                pub fn serial(&self) -> u64 { self.0 }
            }

            impl std::fmt::Display for #ref_typename
            {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}#{}", #display_prefix, self.0)
                }
            }

            impl From<#ref_typename> for #enum_name
            {
                fn from(r: #ref_typename) -> Self {
                    Self::#typename(r)
                }
            }

            impl std::convert::TryFrom<#enum_name> for #ref_typename
            {
                type Error = WrongRefTypeError;

                fn try_from(r: #enum_name) -> Result<Self, WrongRefTypeError> {
                    match r {
                        #enum_name::#typename(x) => Ok(x),
                        #[allow(unreachable_patterns)]
                        _ => Err(WrongRefTypeError)
                    }
                }
            }
        ));
    }

    output.extend(quote!(
        #[derive(PartialEq,Eq,Hash,Debug,Clone,Copy,serde::Serialize,serde::Deserialize)]
        pub enum #enum_name {
            #( #enum_variants ),*
        }

        #[derive(Debug)]
        pub struct #generator_name {
            #( #counter_fields ),*
        }

        impl #generator_name {
            pub fn new() -> Self {
                Self {
                    #( #counter_inits ),*
                }
            }

            #( #next_fns )*
        }

        impl Default for #generator_name {
            fn default() -> Self { Self::new() }
        }
    ));

    output.into()
}
