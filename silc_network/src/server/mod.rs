//! The protocol core: one server's view of the network, and the processors
//! that apply received packets to it.
//!
//! A [`Server`] owns the [`EntityStore`] and is driven entirely from outside:
//! the transport reports connections and delivers parsed packets through
//! [`Server::process_packet`], and a timer calls [`Server::tick`]. Everything
//! the core wants sent is handed to the [`Transport`] it was built with.

use crate::config::ServerConfig;
use crate::crypto::{DefaultKeyService, KeyService, NicknameHasher, Sha1NicknameHasher};
use crate::errors::*;
use crate::id::*;
use crate::idgen;
use crate::idlist::*;
use crate::modes::*;
use crate::pending::PendingCommands;
use crate::routing::Transport;
use crate::stats::{Scope, StatChange, Statistics};
use crate::utils::{self, OrLog};
use crate::wire::*;

use rand::{rngs::StdRng, SeedableRng};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

mod send;
mod channel_util;
mod teardown;
mod notify;
mod id_propagation;
mod resume;
mod packets;

#[cfg(test)]
mod tests;

/// Longest signoff message relayed in a SIGNOFF notify
const MAX_SIGNOFF_MSG_LEN: usize = 128;
/// Longest comment relayed in a KILLED notify
const MAX_KILL_COMMENT_LEN: usize = 127;

/// A transport connection as the core sees it
#[derive(Debug, Clone)]
pub struct Connection
{
    pub id: ConnectionId,
    pub conn_type: ConnectionType,
    pub remote_ip: IpAddr,
    pub hostname: Option<String>,
    /// The key the peer authenticated with during key exchange
    pub public_key: Option<PublicKey>,
    /// The entry this connection belongs to
    pub entry: Option<EntryRef>,
}

/// A protocol flow suspended until a command reply arrives
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Continuation
{
    /// Re-run a client's RESUME_CLIENT once the detached entry is resolved
    ResumeClient { conn: ConnectionId, packet: Packet },
}

pub struct Server
{
    config: ServerConfig,
    store: EntityStore,
    /// Our own entry in the local list
    me: ServerRef,
    id: ServerId,
    server_type: ServerType,
    /// Primary route. None when standalone.
    router: Option<ServerRef>,
    /// A backup router currently standing in for the primary
    backup_primary: bool,
    connections: HashMap<ConnectionId, Connection>,
    pending: PendingCommands<Continuation>,
    cmd_ident: u16,
    stats: Statistics,
    rng: StdRng,
    hasher: Box<dyn NicknameHasher + Send + Sync>,
    keys: Box<dyn KeyService + Send + Sync>,
    transport: Arc<dyn Transport + Send + Sync>,
}

impl Server
{
    /// Create a server with our own entry registered in the local list
    pub fn new(config: ServerConfig, transport: Arc<dyn Transport + Send + Sync>) -> Result<Self, StoreError>
    {
        let id = idgen::create_server_id(config.ip, config.port);
        let mut store = EntityStore::new();

        let mut entry = ServerEntry::new(Some(config.name.clone()), config.server_type, Some(id), None, utils::now());
        entry.data.status.insert(EntryStatus::REGISTERED);
        let me = store.add_server(ListKind::Local, entry)?;

        tracing::info!("Server {} starting as {:?}", config.name, config.server_type);

        Ok(Self {
            server_type: config.server_type,
            config,
            store,
            me,
            id,
            router: None,
            backup_primary: false,
            connections: HashMap::new(),
            pending: PendingCommands::new(),
            cmd_ident: 0,
            stats: Statistics::default(),
            rng: StdRng::from_entropy(),
            hasher: Box::new(Sha1NicknameHasher),
            keys: Box::new(DefaultKeyService),
            transport,
        })
    }

    pub fn with_key_service(mut self, keys: Box<dyn KeyService + Send + Sync>) -> Self
    {
        self.keys = keys;
        self
    }

    pub fn with_nickname_hasher(mut self, hasher: Box<dyn NicknameHasher + Send + Sync>) -> Self
    {
        self.hasher = hasher;
        self
    }

    /// Make ID allocation reproducible
    pub fn with_rng_seed(mut self, seed: u64) -> Self
    {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    // Accessors

    pub fn config(&self) -> &ServerConfig
    {
        &self.config
    }

    pub fn store(&self) -> &EntityStore
    {
        &self.store
    }

    pub fn stats(&self) -> &Statistics
    {
        &self.stats
    }

    pub fn id(&self) -> ServerId
    {
        self.id
    }

    pub fn me(&self) -> ServerRef
    {
        self.me
    }

    pub fn server_type(&self) -> ServerType
    {
        self.server_type
    }

    pub fn primary_router(&self) -> Option<ServerRef>
    {
        self.router
    }

    pub fn is_standalone(&self) -> bool
    {
        self.router.is_none()
    }

    /// Whether this backup router is standing in for the cell's primary
    pub fn is_backup_primary(&self) -> bool
    {
        self.backup_primary
    }

    /// Start serving the cell in place of its primary router. Servers that
    /// registered with us while we idled are enabled. Returns false unless
    /// we are an idle backup router.
    pub fn start_backup_primary(&mut self) -> bool
    {
        if !self.is_backup() || self.backup_primary
        {
            return false;
        }
        tracing::info!("Standing in as the primary router of our cell");
        self.backup_primary = true;
        self.set_cell_servers_disabled(false);
        true
    }

    /// The primary router is back; go idle again and stop serving the
    /// servers of the cell
    pub fn stop_backup_primary(&mut self) -> bool
    {
        if !self.backup_primary
        {
            return false;
        }
        tracing::info!("Primary router is back, returning to backup duty");
        self.backup_primary = false;
        self.set_cell_servers_disabled(true);
        true
    }

    fn set_cell_servers_disabled(&mut self, disabled: bool)
    {
        let servers: Vec<ServerRef> = self
            .connections
            .values()
            .filter(|c| c.conn_type == ConnectionType::Server)
            .filter_map(|c| match c.entry {
                Some(EntryRef::Server(r)) => Some(r),
                _ => None,
            })
            .collect();
        for server in servers
        {
            if let Ok(entry) = self.store.server_mut(server)
            {
                entry.data.status.set(EntryStatus::DISABLED, disabled);
            }
        }
    }

    pub fn connection(&self, conn: ConnectionId) -> Option<&Connection>
    {
        self.connections.get(&conn)
    }

    pub fn pending_commands(&self) -> usize
    {
        self.pending.len()
    }

    fn is_router(&self) -> bool
    {
        self.server_type == ServerType::Router
    }

    fn is_server(&self) -> bool
    {
        self.server_type == ServerType::Server
    }

    fn is_backup(&self) -> bool
    {
        self.server_type == ServerType::BackupRouter
    }

    fn conn_type(&self, conn: ConnectionId) -> ConnectionType
    {
        self.connections.get(&conn).map_or(ConnectionType::Unknown, |c| c.conn_type)
    }

    /// The server entry bound to a connection
    fn conn_server(&self, conn: ConnectionId) -> Option<ServerRef>
    {
        match self.connections.get(&conn)?.entry? {
            EntryRef::Server(r) => Some(r),
            _ => None,
        }
    }

    /// The client entry bound to a connection
    fn conn_client(&self, conn: ConnectionId) -> Option<ClientRef>
    {
        match self.connections.get(&conn)?.entry? {
            EntryRef::Client(r) => Some(r),
            _ => None,
        }
    }

    /// Apply a change to the statistics counters
    pub(crate) fn stat(&mut self, change: StatChange)
    {
        self.stats.apply(change);
    }

    fn next_cmd_ident(&mut self) -> u16
    {
        self.cmd_ident = self.cmd_ident.wrapping_add(1);
        self.cmd_ident
    }

    /// Scope of a client entry for the statistics counters. A detached client
    /// of ours is still local; its DETACHED mode keeps it out of `my_clients`.
    fn client_scope(&self, client: ClientRef) -> Scope
    {
        let local = self.store.client(client).map_or(false, |c| c.is_local());
        let cell = self.is_router() && self.store.list_of(client) == Some(ListKind::Local);
        Scope::new(local, cell)
    }

    fn channel_scope(&self, channel: ChannelRef) -> Scope
    {
        let in_local = self.store.list_of(channel) == Some(ListKind::Local);
        Scope::new(in_local, self.is_router() && in_local)
    }

    // Connection registry

    /// Register a connection that has completed key exchange. Clients and
    /// servers get an unregistered entry in the local list until their
    /// NEW_CLIENT or NEW_SERVER arrives.
    pub fn new_connection(
        &mut self,
        conn: ConnectionId,
        conn_type: ConnectionType,
        remote_ip: IpAddr,
        hostname: Option<String>,
        public_key: Option<PublicKey>,
    ) -> Result<(), StoreError>
    {
        let now = utils::now();
        let entry = match conn_type
        {
            ConnectionType::Client =>
            {
                let mut client = ClientEntry::new(None, None, None, None, None, now);
                client.data.connection = Some(conn);
                client.data.public_key = public_key.clone();
                client.data.status.insert(EntryStatus::LOCAL);
                let r = self.store.add_client(ListKind::Local, client)?;
                self.stat(StatChange::ClientAdded(Scope::new(true, self.is_router())));
                Some(EntryRef::Client(r))
            }
            ConnectionType::Server | ConnectionType::Router =>
            {
                let server_type = if conn_type == ConnectionType::Router { ServerType::Router } else { ServerType::Server };
                let mut server = ServerEntry::new(hostname.clone(), server_type, None, None, now);
                server.data.connection = Some(conn);
                server.data.public_key = public_key.clone();
                server.data.status.insert(EntryStatus::LOCAL);
                Some(EntryRef::Server(self.store.add_server(ListKind::Local, server)?))
            }
            ConnectionType::Unknown => None,
        };

        tracing::debug!("New {:?} connection {} from {}", conn_type, conn, remote_ip);
        self.connections.insert(conn, Connection {
            id: conn,
            conn_type,
            remote_ip,
            hostname,
            public_key,
            entry,
        });
        Ok(())
    }

    /// Bind an outbound connection to a router we connected to. Unless it is
    /// a backup router, it becomes our primary route. Our own NEW_SERVER is
    /// sent to it.
    pub fn connect_to_router(
        &mut self,
        conn: ConnectionId,
        remote_ip: IpAddr,
        router_id: ServerId,
        name: &str,
        router_type: ServerType,
    ) -> Result<ServerRef, StoreError>
    {
        let mut entry = ServerEntry::new(Some(name.to_string()), router_type, Some(router_id), None, utils::now());
        entry.data.connection = Some(conn);
        entry.data.status.insert(EntryStatus::REGISTERED | EntryStatus::LOCAL);
        let router = self.store.add_server(ListKind::Local, entry)?;
        self.stat(StatChange::ServerAdded { router: true, scope: Scope::new(true, false) });

        self.connections.insert(conn, Connection {
            id: conn,
            conn_type: ConnectionType::Router,
            remote_ip,
            hostname: Some(name.to_string()),
            public_key: None,
            entry: Some(EntryRef::Server(router)),
        });

        if router_type != ServerType::BackupRouter && self.router.is_none()
        {
            tracing::info!("Connected to primary router {}", name);
            self.router = Some(router);
            if let Ok(me) = self.store.server_mut(self.me)
            {
                me.router = Some(router);
            }
        }

        let payload = NewServerPayload { id: self.id, name: self.config.name.clone() };
        self.send_packet(conn, Packet::new(PacketType::NewServer, payload.encode()).with_src(self.id));
        Ok(router)
    }

    /// The transport lost a connection. Whatever was bound to it signs off,
    /// except a detached client which stays around for a later resume.
    #[tracing::instrument(skip(self))]
    pub fn close_connection(&mut self, conn: ConnectionId)
    {
        let connection = match self.connections.remove(&conn)
        {
            Some(c) => c,
            None => return,
        };

        match connection.entry
        {
            Some(EntryRef::Client(client)) => self.client_disconnected(client, None),
            Some(EntryRef::Server(server)) => self.server_disconnected(server),
            _ => (),
        }
    }

    /// Drop a connection from our side, telling the peer why
    pub(super) fn disconnect(&mut self, conn: ConnectionId, status: StatusCode, message: Option<&str>)
    {
        tracing::debug!("Disconnecting {} ({})", conn, status);
        self.close_connection(conn);
        self.transport.close(conn, status, message);
    }

    /// Detach a locally connected client: keep its entry and memberships for
    /// a later RESUME_CLIENT and drop the connection.
    pub fn detach_client(&mut self, conn: ConnectionId) -> HandlerResult
    {
        let client = self.conn_client(conn).ok_or(LookupError::NoSuchConnection(conn))?;
        let (old, id) = {
            let entry = self.store.client(client)?;
            (entry.mode, entry.id)
        };
        let new = old | UserMode::DETACHED;

        self.stat(StatChange::UserModeChanged { local: true, old, new });
        self.store.client_mut(client)?.set_mode(new);

        if let Some(id) = id
        {
            let notify = NotifyPayload::new(NotifyType::UmodeChange).id_arg(id).u32_arg(new.bits());
            self.send_notify_to_primary(notify);
        }

        self.disconnect(conn, StatusCode::Ok, Some("Detached"));
        Ok(())
    }

    fn client_disconnected(&mut self, client: ClientRef, message: Option<&str>)
    {
        let (registered, detached) = match self.store.client(client)
        {
            Ok(c) => (c.is_registered(), c.is_detached()),
            Err(_) => return,
        };

        if !registered
        {
            let scope = self.client_scope(client);
            if let Some(list) = self.store.list_of(client)
            {
                if let Some(entry) = self.store.del_client(list, client)
                {
                    self.stat(StatChange::ClientRemoved(scope, entry.mode));
                }
            }
            return;
        }

        if detached
        {
            let expires = if self.config.detach_timeout > 0 { Some(utils::now() + self.config.detach_timeout) } else { None };
            if let Ok(entry) = self.store.client_mut(client)
            {
                tracing::debug!("Client {:?} detached", entry.nickname);
                entry.data.connection = None;
                entry.local_detached = true;
                entry.resuming_client = None;
                entry.lifecycle = ClientLifecycle::Detached { expires };
            }
            return;
        }

        self.free_client_data(client, true, message);
    }

    /// Sign off a local client whose connection is going away. With
    /// `notify` our router hears about it through a SIGNOFF.
    fn free_client_data(&mut self, client: ClientRef, notify: bool, message: Option<&str>)
    {
        let (id, mode) = match self.store.client(client)
        {
            Ok(c) => (c.id, c.mode),
            Err(_) => return,
        };

        self.remove_from_channels(client, true, message, true, false);

        if let (true, Some(id)) = (notify, id)
        {
            let notify = NotifyPayload::new(NotifyType::Signoff).id_arg(id).opt_arg(message.map(|m| m.as_bytes().to_vec()));
            self.send_notify_to_primary(notify);
        }

        let scope = self.client_scope(client);
        self.stat(StatChange::ClientRemoved(scope, mode));

        let now = utils::now();
        let expiry = self.config.zombie_expiry;
        if let Ok(entry) = self.store.client_mut(client)
        {
            entry.data.public_key = None;
            entry.make_zombie(now, now + expiry);
        }
    }

    fn server_disconnected(&mut self, server: ServerRef)
    {
        let (registered, id, server_type) = match self.store.server(server)
        {
            Ok(s) => (s.is_registered(), s.id, s.server_type),
            Err(_) => return,
        };

        if registered
        {
            tracing::info!("Server {:?} disconnected", id);
            self.remove_servers_by_server(server, true);
            let owner = self.store.server(server).ok().and_then(|s| s.router);
            self.remove_clients_by_server(owner, server, true);

            if self.router == Some(server)
            {
                tracing::warn!("Lost connection to primary router, now standalone");
                self.router = None;
                if let Ok(me) = self.store.server_mut(self.me)
                {
                    me.router = None;
                }
            }
            else if let Some(id) = id
            {
                let notify = NotifyPayload::new(NotifyType::ServerSignoff).id_arg(id);
                self.send_notify_to_primary(notify);
            }

            let router = server_type != ServerType::Server;
            self.stat(StatChange::ServerRemoved { router, scope: Scope::new(true, self.is_router() && !router) });
        }

        if let Some(list) = self.store.list_of(server)
        {
            self.store.del_server(list, server);
        }
    }

    // Timers

    /// Run the periodic work: fail suspended flows whose reply never came,
    /// then drop expired zombie and detached clients.
    pub fn tick(&mut self, now: i64)
    {
        for (command, ident, continuation) in self.pending.expire(now)
        {
            tracing::debug!("Reply to {:?} ({}) timed out", command, ident);
            self.run_continuation(continuation, None);
        }
        self.purge_expired(now);
    }

    /// Delete zombie clients whose retention passed and detached clients
    /// whose detach timeout passed. Returns how many entries went away.
    pub fn purge_expired(&mut self, now: i64) -> usize
    {
        let expired: Vec<(ClientRef, bool)> = self
            .store
            .clients()
            .filter_map(|(r, c)| match c.lifecycle {
                ClientLifecycle::Zombie { expires } if expires <= now => Some((r, false)),
                ClientLifecycle::Detached { expires: Some(expires) } if expires <= now && c.local_detached => Some((r, true)),
                _ => None,
            })
            .collect();

        for (client, detached) in &expired
        {
            if *detached
            {
                tracing::debug!("Detached client {} expired", client);
                self.free_client_data(*client, true, Some("Detach timeout"));
            }
            if let Some(list) = self.store.list_of(*client)
            {
                self.store.del_client(list, *client);
            }
        }
        expired.len()
    }

    // Dispatch

    /// Process one packet received on `conn`. Handler failures are logged
    /// here and go no further.
    #[tracing::instrument(skip(self, packet), fields(packet_type = %packet.packet_type))]
    pub fn process_packet(&mut self, conn: ConnectionId, packet: Packet)
    {
        tracing::trace!("Received {:?} from {}", packet.packet_type, conn);
        self.stat(StatChange::PacketReceived);

        let now = utils::now();
        match self.connections.get(&conn).and_then(|c| c.entry)
        {
            Some(EntryRef::Client(r)) => if let Ok(c) = self.store.client_mut(r) { c.data.last_receive = now },
            Some(EntryRef::Server(r)) => if let Ok(s) = self.store.server_mut(r) { s.data.last_receive = now },
            _ => (),
        }

        let result = match packet.packet_type
        {
            PacketType::Notify if packet.is_list() => self.process_notify_list(conn, &packet),
            PacketType::Notify => self.process_notify(conn, &packet),
            PacketType::PrivateMessage => self.process_private_message(conn, &packet),
            PacketType::PrivateMessageKey
            | PacketType::KeyAgreement
            | PacketType::Ftp => self.relay_client_to_client(conn, &packet),
            PacketType::CommandReply => self.process_command_reply(conn, &packet),
            PacketType::ChannelMessage => self.process_channel_message(conn, &packet),
            PacketType::ChannelKey => self.process_channel_key(conn, &packet),
            PacketType::NewClient => self.process_new_client(conn, &packet),
            PacketType::NewServer => self.process_new_server(conn, &packet),
            PacketType::NewId if packet.is_list() => self.process_new_id_list(conn, &packet),
            PacketType::NewId => self.process_new_id(conn, &packet, true),
            PacketType::NewChannel if packet.is_list() => self.process_new_channel_list(conn, &packet),
            PacketType::NewChannel => self.process_new_channel(conn, &packet, true),
            PacketType::ConnectionAuthRequest => self.process_connection_auth_request(conn, &packet),
            PacketType::ResumeClient => self.process_resume_client(conn, &packet),
            other =>
            {
                tracing::debug!("No handler for {} packet", other);
                Ok(())
            }
        };

        match result
        {
            Ok(()) => (),
            Err(HandlerError::ProtocolViolation(msg)) => tracing::warn!("Protocol violation from {}: {}", conn, msg),
            Err(HandlerError::Lookup(e)) => tracing::error!("Inconsistent state handling packet from {}: {}", conn, e),
            Err(e) => tracing::debug!("Dropped packet from {}: {}", conn, e),
        }
    }

    /// Deliver a command reply (or its absence) to a suspended flow
    fn run_continuation(&mut self, continuation: Continuation, reply: Option<&CommandPayload>)
    {
        match continuation
        {
            Continuation::ResumeClient { conn, packet } =>
            {
                if let Err(e) = self.resume_resolved(conn, &packet, reply)
                {
                    tracing::debug!("Resume on {} abandoned: {}", conn, e);
                }
            }
        }
    }
}
