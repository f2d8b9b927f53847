use crate::errors::ParseError;
use crate::id::EntityId;
use crate::modes::PacketFlags;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Packet types handled by the protocol core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum PacketType {
    Disconnect = 1,
    Success = 2,
    Failure = 3,
    Notify = 5,
    Error = 6,
    ChannelMessage = 7,
    ChannelKey = 8,
    PrivateMessage = 9,
    PrivateMessageKey = 10,
    Command = 11,
    CommandReply = 12,
    ConnectionAuthRequest = 17,
    ConnectionAuth = 18,
    NewId = 19,
    NewClient = 20,
    NewServer = 21,
    NewChannel = 22,
    KeyAgreement = 26,
    Ftp = 28,
    ResumeClient = 29,
}

impl TryFrom<u8> for PacketType {
    type Error = ParseError;

    fn try_from(v: u8) -> Result<Self, ParseError> {
        use PacketType::*;
        Ok(match v {
            1 => Disconnect,
            2 => Success,
            3 => Failure,
            5 => Notify,
            6 => Error,
            7 => ChannelMessage,
            8 => ChannelKey,
            9 => PrivateMessage,
            10 => PrivateMessageKey,
            11 => Command,
            12 => CommandReply,
            17 => ConnectionAuthRequest,
            18 => ConnectionAuth,
            19 => NewId,
            20 => NewClient,
            21 => NewServer,
            22 => NewChannel,
            26 => KeyAgreement,
            28 => Ftp,
            29 => ResumeClient,
            _ => return Err(ParseError::UnknownPacket(v)),
        })
    }
}

/// Notify types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u16)]
pub enum NotifyType {
    None = 0,
    Invite = 1,
    Join = 2,
    Leave = 3,
    Signoff = 4,
    TopicSet = 5,
    NickChange = 6,
    CmodeChange = 7,
    CumodeChange = 8,
    Motd = 9,
    ChannelChange = 10,
    ServerSignoff = 11,
    Kicked = 12,
    Killed = 13,
    UmodeChange = 14,
    Ban = 15,
    Error = 16,
    Watch = 17,
}

impl TryFrom<u16> for NotifyType {
    type Error = ParseError;

    fn try_from(v: u16) -> Result<Self, ParseError> {
        use NotifyType::*;
        Ok(match v {
            0 => None,
            1 => Invite,
            2 => Join,
            3 => Leave,
            4 => Signoff,
            5 => TopicSet,
            6 => NickChange,
            7 => CmodeChange,
            8 => CumodeChange,
            9 => Motd,
            10 => ChannelChange,
            11 => ServerSignoff,
            12 => Kicked,
            13 => Killed,
            14 => UmodeChange,
            15 => Ban,
            16 => Error,
            17 => Watch,
            _ => return Err(ParseError::UnknownNotify(v)),
        })
    }
}

/// Status codes used in ERROR notifies, disconnects and command replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0,
    NoSuchNick = 10,
    NoSuchChannel = 11,
    NoSuchServer = 12,
    IncompleteInformation = 13,
    NoClientId = 17,
    BadClientId = 20,
    BadChannelId = 21,
    NoSuchClientId = 22,
    NoSuchChannelId = 23,
    NotOnChannel = 25,
    PermDenied = 31,
    NoChannelPriv = 39,
    NoChannelFoPriv = 40,
    NoRouterPriv = 42,
    BadNickname = 43,
    AuthFailed = 45,
    NoSuchServerId = 47,
    ResourceLimit = 48,
    NotAuthenticated = 50,
    BadServerId = 51,
    Timedout = 54,
    OperationAllowed = 56,
    BadUsername = 57,
}

impl StatusCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        use StatusCode::*;
        Some(match v {
            0 => Ok,
            10 => NoSuchNick,
            11 => NoSuchChannel,
            12 => NoSuchServer,
            13 => IncompleteInformation,
            17 => NoClientId,
            20 => BadClientId,
            21 => BadChannelId,
            22 => NoSuchClientId,
            23 => NoSuchChannelId,
            25 => NotOnChannel,
            31 => PermDenied,
            39 => NoChannelPriv,
            40 => NoChannelFoPriv,
            42 => NoRouterPriv,
            43 => BadNickname,
            45 => AuthFailed,
            47 => NoSuchServerId,
            48 => ResourceLimit,
            50 => NotAuthenticated,
            51 => BadServerId,
            54 => Timedout,
            56 => OperationAllowed,
            57 => BadUsername,
            _ => return None,
        })
    }
}

/// Commands the core issues or correlates replies for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Command {
    None = 0,
    Whois = 1,
    Identify = 3,
    Users = 25,
    Getkey = 26,
}

impl Command {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::None,
            1 => Self::Whois,
            3 => Self::Identify,
            25 => Self::Users,
            26 => Self::Getkey,
            _ => return None,
        })
    }
}

/// Connection authentication methods, as answered to CONNECTION_AUTH_REQUEST
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u16)]
pub enum AuthMethod {
    None = 0,
    Passphrase = 1,
    PublicKey = 2,
}

/// A parsed packet as delivered by the transport layer, or queued for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub packet_type: PacketType,
    pub flags: PacketFlags,
    pub src_id: Option<EntityId>,
    pub dst_id: Option<EntityId>,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(packet_type: PacketType, payload: Vec<u8>) -> Self {
        Self {
            packet_type,
            flags: PacketFlags::empty(),
            src_id: None,
            dst_id: None,
            payload,
        }
    }

    pub fn with_src(mut self, src: impl Into<EntityId>) -> Self {
        self.src_id = Some(src.into());
        self
    }

    pub fn with_dst(mut self, dst: impl Into<EntityId>) -> Self {
        self.dst_id = Some(dst.into());
        self
    }

    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags.contains(PacketFlags::BROADCAST)
    }

    pub fn is_list(&self) -> bool {
        self.flags.contains(PacketFlags::LIST)
    }

    /// A copy of this packet with a different payload, keeping the header
    pub fn with_payload(&self, payload: Vec<u8>) -> Self {
        Self {
            payload,
            ..self.clone()
        }
    }
}
