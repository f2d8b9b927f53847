use crate::id::*;
use crate::modes::*;
use crate::wire::{ListEntry, PublicKey};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::collections::{BTreeMap, HashMap};

/// What sits on the other end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    Unknown,
    Client,
    Server,
    Router,
}

/// Role of a server in the routing tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    Server,
    Router,
    BackupRouter,
}

/// Re-key parameters negotiated for a connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RekeyMaterial {
    pub send_key: Vec<u8>,
    pub pfs: bool,
    pub timeout: u32,
}

/// The header every server and client entry carries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionData {
    pub conn_type: ConnectionType,
    pub connection: Option<ConnectionId>,
    pub rekey: Option<RekeyMaterial>,
    pub hash: Option<String>,
    pub public_key: Option<PublicKey>,
    pub fingerprint: Option<[u8; 20]>,
    pub status: EntryStatus,
    pub created: i64,
    pub last_receive: i64,
    pub last_sent: i64,
}

impl ConnectionData {
    pub fn new(conn_type: ConnectionType, created: i64) -> Self {
        Self {
            conn_type,
            connection: None,
            rekey: None,
            hash: None,
            public_key: None,
            fingerprint: None,
            status: EntryStatus::empty(),
            created,
            last_receive: created,
            last_sent: created,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.status.contains(EntryStatus::REGISTERED)
    }

    pub fn is_local(&self) -> bool {
        self.status.contains(EntryStatus::LOCAL)
    }

    /// Nothing is sent to a disabled connection
    pub fn is_disabled(&self) -> bool {
        self.status.contains(EntryStatus::DISABLED)
    }
}

/// Shared accessors for anything carrying [`ConnectionData`]
pub trait HasConnectionData {
    fn data(&self) -> &ConnectionData;
    fn data_mut(&mut self) -> &mut ConnectionData;

    fn is_registered(&self) -> bool {
        self.data().is_registered()
    }

    fn is_local(&self) -> bool {
        self.data().is_local()
    }

    fn is_disabled(&self) -> bool {
        self.data().is_disabled()
    }

    fn connection(&self) -> Option<ConnectionId> {
        self.data().connection
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    pub data: ConnectionData,
    pub name: Option<String>,
    pub server_type: ServerType,
    pub id: Option<ServerId>,
    /// The server this one was learned through. Servers connected directly
    /// to us have none; our own entry points at our primary router.
    pub router: Option<ServerRef>,
    /// Set while the backup protocol is resuming this server
    pub backup: bool,
}

impl ServerEntry {
    pub fn new(
        name: Option<String>,
        server_type: ServerType,
        id: Option<ServerId>,
        router: Option<ServerRef>,
        created: i64,
    ) -> Self {
        let conn_type = match server_type {
            ServerType::Server => ConnectionType::Server,
            _ => ConnectionType::Router,
        };
        Self {
            data: ConnectionData::new(conn_type, created),
            name,
            server_type,
            id,
            router,
            backup: false,
        }
    }
}

impl HasConnectionData for ServerEntry {
    fn data(&self) -> &ConnectionData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ConnectionData {
        &mut self.data
    }
}

/// Where a client entry is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientLifecycle {
    Active,
    /// Disconnected but kept for a later resume
    Detached { expires: Option<i64> },
    /// Signed off or killed; the ID stays referenceable until `expires`
    Zombie { expires: i64 },
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEntry {
    pub data: ConnectionData,
    /// Display form. The casefolded form lives in the cache index only.
    pub nickname: Option<String>,
    pub username: Option<String>,
    pub userinfo: Option<String>,
    pub id: Option<ClientId>,
    pub mode: UserMode,
    #[serde_as(as = "Vec<(_, _)>")]
    pub channels: HashMap<ChannelRef, MembershipRef>,
    pub router: Option<ServerRef>,
    pub resuming_client: Option<ConnectionId>,
    pub local_detached: bool,
    pub lifecycle: ClientLifecycle,
}

impl ClientEntry {
    pub fn new(
        nickname: Option<String>,
        username: Option<String>,
        userinfo: Option<String>,
        id: Option<ClientId>,
        router: Option<ServerRef>,
        created: i64,
    ) -> Self {
        Self {
            data: ConnectionData::new(ConnectionType::Client, created),
            nickname,
            username,
            userinfo,
            id,
            mode: UserMode::empty(),
            channels: HashMap::new(),
            router,
            resuming_client: None,
            local_detached: false,
            lifecycle: ClientLifecycle::Active,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.mode.contains(UserMode::DETACHED)
    }

    pub fn is_zombie(&self) -> bool {
        matches!(self.lifecycle, ClientLifecycle::Zombie { .. })
    }

    /// Set the user mode, keeping the lifecycle in step with the DETACHED bit
    pub fn set_mode(&mut self, mode: UserMode) {
        let was_detached = self.is_detached();
        self.mode = mode;
        match (was_detached, self.is_detached()) {
            (false, true) => self.lifecycle = ClientLifecycle::Detached { expires: None },
            (true, false) if !self.is_zombie() => self.lifecycle = ClientLifecycle::Active,
            _ => (),
        }
    }

    /// Turn a signed-off client into a zombie that expires at `expires`
    pub fn make_zombie(&mut self, now: i64, expires: i64) {
        self.data.status.remove(EntryStatus::REGISTERED);
        self.data.connection = None;
        self.data.created = now;
        self.mode = UserMode::empty();
        self.router = None;
        self.lifecycle = ClientLifecycle::Zombie { expires };
    }
}

impl HasConnectionData for ClientEntry {
    fn data(&self) -> &ConnectionData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ConnectionData {
        &mut self.data
    }
}

/// Symmetric channel key material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelKey {
    pub cipher: String,
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    pub mode: ChannelMode,
    pub id: ChannelId,
    pub topic: Option<String>,
    pub cipher: Option<String>,
    pub hmac_name: Option<String>,
    pub passphrase: Option<String>,
    pub founder_key: Option<PublicKey>,
    /// Authorized public keys, keyed by fingerprint
    pub channel_pubkeys: BTreeMap<String, PublicKey>,
    pub invite_list: Vec<ListEntry>,
    pub ban_list: Vec<ListEntry>,
    #[serde_as(as = "Vec<(_, _)>")]
    pub user_list: HashMap<ClientRef, MembershipRef>,
    pub router: Option<ServerRef>,
    pub key: Option<ChannelKey>,
    pub user_limit: u32,
    pub global_users: bool,
    pub disabled: bool,
    pub users_resolved: bool,
    pub user_count: u32,
    pub created: i64,
}

impl ChannelEntry {
    pub fn new(name: String, id: ChannelId, router: Option<ServerRef>, created: i64) -> Self {
        Self {
            name,
            mode: ChannelMode::empty(),
            id,
            topic: None,
            cipher: None,
            hmac_name: None,
            passphrase: None,
            founder_key: None,
            channel_pubkeys: BTreeMap::new(),
            invite_list: Vec::new(),
            ban_list: Vec::new(),
            user_list: HashMap::new(),
            router,
            key: None,
            user_limit: 0,
            global_users: false,
            disabled: false,
            users_resolved: false,
            user_count: 0,
            created,
        }
    }
}

/// The membership edge between a client and a channel. Both the channel's
/// `user_list` and the client's `channels` hold the same handle to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelClientEntry {
    pub client: ClientRef,
    pub channel: ChannelRef,
    pub mode: ChannelUserMode,
}
