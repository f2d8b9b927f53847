//! Collects commonly-used names for convenient import

pub use crate::{
    id::*,
    modes::*,
    errors::*,
    wire::{
        Packet,
        PacketType,
        NotifyType,
        StatusCode,
    },
    idlist::{
        EntityStore,
        ListKind,
        HasConnectionData,
    },
    config::ServerConfig,
    routing::Transport,
    server::Server,
    stats::Statistics,
    utils::OrLog,
};
