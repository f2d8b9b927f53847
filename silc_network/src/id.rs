//! Defines the network identifier types and the internal entry handles

use crate::errors::ParseError;
use serde::{Deserialize, Serialize};
use silc_macros::entry_refs;
use std::convert::TryFrom;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// Number of nickname hash bytes carried in a [`ClientId`]
pub const CLIENTID_HASH_LEN: usize = 8;

#[derive(Debug, Error)]
#[error("Mismatched entry reference type")]
pub struct WrongRefTypeError;

// Stable handles into the entry arenas. These never change for the lifetime of
// an entry, unlike the network IDs below which can be replaced (NICK_CHANGE,
// CHANNEL_CHANGE).
entry_refs!(EntryRef (EntryRefGenerator) {
    Server;
    Client;
    Channel;
    Membership;
});

/// A transport connection, as numbered by the transport layer
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// The type tag carried in ID payloads and packet headers
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize, strum::Display)]
#[repr(u16)]
pub enum IdType {
    Server = 1,
    Client = 2,
    Channel = 3,
}

impl TryFrom<u16> for IdType {
    type Error = ParseError;

    fn try_from(value: u16) -> Result<Self, ParseError> {
        match value {
            1 => Ok(Self::Server),
            2 => Ok(Self::Client),
            3 => Ok(Self::Channel),
            _ => Err(ParseError::BadIdType(value)),
        }
    }
}

/// The address part every network ID starts with
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct IdIp {
    data: [u8; 16],
    len: u8,
}

impl IdIp {
    pub fn from_addr(addr: IpAddr) -> Self {
        let mut data = [0u8; 16];
        match addr {
            IpAddr::V4(v4) => {
                data[..4].copy_from_slice(&v4.octets());
                Self { data, len: 4 }
            }
            IpAddr::V6(v6) => {
                data.copy_from_slice(&v6.octets());
                Self { data, len: 16 }
            }
        }
    }

    fn from_slice(bytes: &[u8]) -> Self {
        let mut data = [0u8; 16];
        data[..bytes.len()].copy_from_slice(bytes);
        Self {
            data,
            len: bytes.len() as u8,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn is_ipv4(&self) -> bool {
        self.len == 4
    }

    /// Whether this ID was derived from the given address
    pub fn matches(&self, addr: &IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => self.len == 4 && self.data[..4] == v4.octets(),
            IpAddr::V6(v6) => self.len == 16 && self.data == v6.octets(),
        }
    }
}

impl fmt::Debug for IdIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ipv4() {
            let b = self.as_bytes();
            write!(f, "{}.{}.{}.{}", b[0], b[1], b[2], b[3])
        } else {
            write!(f, "{}", hex::encode(self.as_bytes()))
        }
    }
}

fn ip_len_for(total: usize, fixed: usize) -> Option<usize> {
    match total.checked_sub(fixed) {
        Some(4) => Some(4),
        Some(16) => Some(16),
        _ => None,
    }
}

/// Identifies a server or router
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServerId {
    pub ip: IdIp,
    pub port: u16,
    pub rnd: u16,
}

/// Identifies a client. The hash is derived from the casefolded nickname, so two
/// servers only produce the same ID for the same nickname on the same address.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClientId {
    pub ip: IdIp,
    pub rnd: u8,
    pub hash: [u8; CLIENTID_HASH_LEN],
}

/// Identifies a channel. Channel IDs are allocated by routers from their own
/// address space.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelId {
    pub ip: IdIp,
    pub port: u16,
    pub rnd: u16,
}

impl ServerId {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.ip.as_bytes().to_vec();
        out.extend_from_slice(&self.port.to_be_bytes());
        out.extend_from_slice(&self.rnd.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        let ip_len = ip_len_for(bytes.len(), 4)
            .ok_or(ParseError::BadIdLength(IdType::Server, bytes.len()))?;
        Ok(Self {
            ip: IdIp::from_slice(&bytes[..ip_len]),
            port: u16::from_be_bytes([bytes[ip_len], bytes[ip_len + 1]]),
            rnd: u16::from_be_bytes([bytes[ip_len + 2], bytes[ip_len + 3]]),
        })
    }
}

impl ClientId {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.ip.as_bytes().to_vec();
        out.push(self.rnd);
        out.extend_from_slice(&self.hash);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        let ip_len = ip_len_for(bytes.len(), 1 + CLIENTID_HASH_LEN)
            .ok_or(ParseError::BadIdLength(IdType::Client, bytes.len()))?;
        let mut hash = [0u8; CLIENTID_HASH_LEN];
        hash.copy_from_slice(&bytes[ip_len + 1..]);
        Ok(Self {
            ip: IdIp::from_slice(&bytes[..ip_len]),
            rnd: bytes[ip_len],
            hash,
        })
    }

    /// Whether this ID was allocated from the given server's address space
    pub fn is_based_on(&self, server: &ServerId) -> bool {
        self.ip == server.ip
    }
}

impl ChannelId {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.ip.as_bytes().to_vec();
        out.extend_from_slice(&self.port.to_be_bytes());
        out.extend_from_slice(&self.rnd.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        let ip_len = ip_len_for(bytes.len(), 4)
            .ok_or(ParseError::BadIdLength(IdType::Channel, bytes.len()))?;
        Ok(Self {
            ip: IdIp::from_slice(&bytes[..ip_len]),
            port: u16::from_be_bytes([bytes[ip_len], bytes[ip_len + 1]]),
            rnd: u16::from_be_bytes([bytes[ip_len + 2], bytes[ip_len + 3]]),
        })
    }
}

/// Any network ID, as carried in packet headers and ID payloads
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum EntityId {
    Server(ServerId),
    Client(ClientId),
    Channel(ChannelId),
}

impl EntityId {
    pub fn id_type(&self) -> IdType {
        match self {
            Self::Server(_) => IdType::Server,
            Self::Client(_) => IdType::Client,
            Self::Channel(_) => IdType::Channel,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Server(id) => id.encode(),
            Self::Client(id) => id.encode(),
            Self::Channel(id) => id.encode(),
        }
    }

    pub fn decode(id_type: IdType, bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(match id_type {
            IdType::Server => Self::Server(ServerId::decode(bytes)?),
            IdType::Client => Self::Client(ClientId::decode(bytes)?),
            IdType::Channel => Self::Channel(ChannelId::decode(bytes)?),
        })
    }

    pub fn as_client(&self) -> Option<&ClientId> {
        match self {
            Self::Client(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_server(&self) -> Option<&ServerId> {
        match self {
            Self::Server(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<&ChannelId> {
        match self {
            Self::Channel(id) => Some(id),
            _ => None,
        }
    }
}

impl From<ServerId> for EntityId {
    fn from(id: ServerId) -> Self {
        Self::Server(id)
    }
}

impl From<ClientId> for EntityId {
    fn from(id: ClientId) -> Self {
        Self::Client(id)
    }
}

impl From<ChannelId> for EntityId {
    fn from(id: ChannelId) -> Self {
        Self::Channel(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id_type(), hex::encode(self.encode()))
    }
}
