//! Flag sets carried by entries and packets

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Status of an ID list entry's connection data
    #[derive(Serialize,Deserialize,Default)]
    pub struct EntryStatus : u32
    {
        const REGISTERED = 0x01;
        const RESOLVED   = 0x02;
        const RESOLVING  = 0x04;
        const DISABLED   = 0x08;
        const RESUMED    = 0x10;
        const LOCAL      = 0x20;
        const RESUME_RES = 0x40;
        const NOATTR     = 0x80;
    }
}

bitflags! {
    /// Channel modes
    #[derive(Serialize,Deserialize,Default)]
    pub struct ChannelMode : u32
    {
        const PRIVATE       = 0x0001;
        const SECRET        = 0x0002;
        const PRIVKEY       = 0x0004;
        const INVITE        = 0x0008;
        const TOPIC         = 0x0010;
        const ULIMIT        = 0x0020;
        const PASSPHRASE    = 0x0040;
        const CIPHER        = 0x0080;
        const HMAC          = 0x0100;
        const FOUNDER_AUTH  = 0x0200;
        const SILENCE_USERS = 0x0400;
        const SILENCE_OPERS = 0x0800;
        const CHANNEL_AUTH  = 0x1000;
    }
}

impl ChannelMode {
    /// Modes that only the channel founder may change
    pub fn founder_only() -> Self {
        Self::PRIVKEY
            | Self::PASSPHRASE
            | Self::CIPHER
            | Self::FOUNDER_AUTH
            | Self::SILENCE_USERS
            | Self::SILENCE_OPERS
            | Self::CHANNEL_AUTH
    }
}

bitflags! {
    /// Per-member channel user modes
    #[derive(Serialize,Deserialize,Default)]
    pub struct ChannelUserMode : u32
    {
        const CHANFO                = 0x0001;
        const CHANOP                = 0x0002;
        const BLOCK_MESSAGES        = 0x0004;
        const BLOCK_MESSAGES_USERS  = 0x0008;
        const BLOCK_MESSAGES_ROBOTS = 0x0010;
        const QUIET                 = 0x0020;
    }
}

impl ChannelUserMode {
    pub fn is_privileged(&self) -> bool {
        self.intersects(Self::CHANOP | Self::CHANFO)
    }
}

bitflags! {
    /// User modes
    #[derive(Serialize,Deserialize,Default)]
    pub struct UserMode : u32
    {
        const SERVER_OPERATOR = 0x0001;
        const ROUTER_OPERATOR = 0x0002;
        const GONE            = 0x0004;
        const INDISPOSED      = 0x0008;
        const BUSY            = 0x0010;
        const PAGE            = 0x0020;
        const HYPER           = 0x0040;
        const ROBOT           = 0x0080;
        const ANONYMOUS       = 0x0100;
        const BLOCK_PRIVMSG   = 0x0200;
        const DETACHED        = 0x0400;
        const REJECT_WATCHING = 0x0800;
        const BLOCK_INVITE    = 0x1000;
    }
}

bitflags! {
    /// Packet header flags
    #[derive(Serialize,Deserialize,Default)]
    pub struct PacketFlags : u8
    {
        const PRIVMSG_KEY = 0x01;
        const LIST        = 0x02;
        const BROADCAST   = 0x04;
        const COMPRESSED  = 0x08;
    }
}
