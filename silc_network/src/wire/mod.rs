//! Packet headers and the payload formats the protocol core reads and writes

mod reader;
pub use reader::{utf8, Reader, WriteExt};

mod packet;
pub use packet::*;

mod payload;
pub use payload::*;

mod lists;
pub use lists::*;
