//! Defines errors returned by the other modules

use crate::id::*;
use crate::wire::NotifyType;
use thiserror::Error;

/// Types of error that can occur while looking up ID list entries
#[derive(Error, Debug, PartialEq)]
pub enum LookupError {
    #[error("No such client {0}")]
    NoSuchClient(ClientRef),
    #[error("No such client id {0:?}")]
    NoSuchClientId(ClientId),
    #[error("No such server {0}")]
    NoSuchServer(ServerRef),
    #[error("No such server id {0:?}")]
    NoSuchServerId(ServerId),
    #[error("No such channel {0}")]
    NoSuchChannel(ChannelRef),
    #[error("No such channel id {0:?}")]
    NoSuchChannelId(ChannelId),
    #[error("No such membership {0}")]
    NoSuchMembership(MembershipRef),
    #[error("No such connection {0}")]
    NoSuchConnection(ConnectionId),
}

/// Convenience definition of a Result type used to look up ID list entries.
pub type LookupResult<T> = std::result::Result<T, LookupError>;

/// Failures when inserting into the ID list
#[derive(Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("Id {0} is already cached")]
    DuplicateId(EntityId),
    #[error(transparent)]
    Lookup(#[from] LookupError),
}

/// Payload decoding failures
#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Payload truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("Unknown id type {0}")]
    BadIdType(u16),
    #[error("Bad length {1} for {0} id")]
    BadIdLength(IdType, usize),
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("{what} too long ({len} > {max})")]
    TooLong {
        what: &'static str,
        len: usize,
        max: usize,
    },
    #[error("Unknown notify type {0}")]
    UnknownNotify(u16),
    #[error("Unknown packet type {0}")]
    UnknownPacket(u8),
    #[error("Missing argument {1} in {0} notify")]
    MissingArgument(NotifyType, u8),
    #[error("Unexpected id type {0}")]
    UnexpectedIdType(IdType),
    #[error("Invalid {0}")]
    Invalid(&'static str),
}

/// ID allocation failures
#[derive(Error, Debug, PartialEq)]
pub enum IdError {
    #[error("No free id left for this nickname or router")]
    CollisionExhausted,
}

/// Why a packet handler abandoned a packet. None of these cross the packet
/// dispatch boundary; they are logged there.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] ParseError),
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("Unknown destination {0}")]
    UnknownDestination(EntityId),
    #[error("Could not store entry: {0}")]
    ResourceExhaustion(#[from] StoreError),
    #[error("Id allocation failed: {0}")]
    CollisionExhausted(#[from] IdError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
}

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Errors loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Format error: {0}")]
    FormatError(String),
    #[error("Invalid address {0}")]
    BadAddress(String),
}

impl From<json5::Error> for ConfigError {
    fn from(e: json5::Error) -> Self {
        Self::FormatError(e.to_string())
    }
}
