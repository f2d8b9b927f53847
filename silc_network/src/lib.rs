//! Protocol core of a SILC server: the ID list, ID allocation, and the
//! processors for notify, ID distribution and resume packets.

pub mod prelude;

pub mod id;
pub mod modes;
pub mod errors;

pub mod wire;
pub mod idlist;
pub mod idgen;
pub mod crypto;
pub mod stats;
pub mod pattern;
pub mod config;
pub mod pending;
pub mod routing;

pub mod server;

pub mod utils;
