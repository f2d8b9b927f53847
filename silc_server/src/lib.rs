//! Hosting for the SILC protocol core: configuration files, logging, and the
//! async node loop behind the `silcd` binary.

pub mod config;
pub mod tracing_config;
pub mod node;
pub mod run;

pub use node::{Node, NodeEvent, NodeChannels, Outbound};
