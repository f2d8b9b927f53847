//! The ID list: entry arenas plus the local and global indexes over them

mod cache;
pub use cache::*;

mod entry;
pub use entry::*;

use crate::errors::*;
use crate::id::*;
use crate::modes::ChannelUserMode;
use std::collections::HashMap;

/// Which of the two ID lists an entry is indexed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Entries we own, or that are in our cell
    Local,
    /// The rest of the known network
    Global,
}

impl ListKind {
    pub fn other(self) -> Self {
        match self {
            Self::Local => Self::Global,
            Self::Global => Self::Local,
        }
    }
}

/// Canonical form of a nickname, server or channel name in the name index
pub fn casefold(name: &str) -> String {
    name.to_lowercase()
}

/// One ID list: three independent caches
#[derive(Debug, Default)]
pub struct IdList {
    servers: IdCache<ServerId, ServerRef>,
    clients: IdCache<ClientId, ClientRef>,
    channels: IdCache<ChannelId, ChannelRef>,
}

impl IdList {
    pub fn servers(&self) -> &IdCache<ServerId, ServerRef> {
        &self.servers
    }

    pub fn clients(&self) -> &IdCache<ClientId, ClientRef> {
        &self.clients
    }

    pub fn channels(&self) -> &IdCache<ChannelId, ChannelRef> {
        &self.channels
    }
}

/// The keys an entry is currently cached under, whatever its kind
#[derive(Debug, Clone, PartialEq)]
pub struct CachedKeys {
    pub id: Option<EntityId>,
    pub name: Option<String>,
}

/// Owns every server, client, channel and membership entry. An entry lives
/// in exactly one arena slot for its whole life; the two ID lists only index
/// it, so moving between them never touches the entry itself.
#[derive(Debug, Default)]
pub struct EntityStore {
    refs: EntryRefGenerator,
    servers: HashMap<ServerRef, ServerEntry>,
    clients: HashMap<ClientRef, ClientEntry>,
    channels: HashMap<ChannelRef, ChannelEntry>,
    memberships: HashMap<MembershipRef, ChannelClientEntry>,
    local: IdList,
    global: IdList,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self, kind: ListKind) -> &IdList {
        match kind {
            ListKind::Local => &self.local,
            ListKind::Global => &self.global,
        }
    }

    fn list_mut(&mut self, kind: ListKind) -> &mut IdList {
        match kind {
            ListKind::Local => &mut self.local,
            ListKind::Global => &mut self.global,
        }
    }

    // Entry accessors

    pub fn server(&self, r: ServerRef) -> LookupResult<&ServerEntry> {
        self.servers.get(&r).ok_or(LookupError::NoSuchServer(r))
    }

    pub fn server_mut(&mut self, r: ServerRef) -> LookupResult<&mut ServerEntry> {
        self.servers.get_mut(&r).ok_or(LookupError::NoSuchServer(r))
    }

    pub fn client(&self, r: ClientRef) -> LookupResult<&ClientEntry> {
        self.clients.get(&r).ok_or(LookupError::NoSuchClient(r))
    }

    pub fn client_mut(&mut self, r: ClientRef) -> LookupResult<&mut ClientEntry> {
        self.clients.get_mut(&r).ok_or(LookupError::NoSuchClient(r))
    }

    pub fn channel(&self, r: ChannelRef) -> LookupResult<&ChannelEntry> {
        self.channels.get(&r).ok_or(LookupError::NoSuchChannel(r))
    }

    pub fn channel_mut(&mut self, r: ChannelRef) -> LookupResult<&mut ChannelEntry> {
        self.channels.get_mut(&r).ok_or(LookupError::NoSuchChannel(r))
    }

    pub fn membership(&self, r: MembershipRef) -> LookupResult<&ChannelClientEntry> {
        self.memberships
            .get(&r)
            .ok_or(LookupError::NoSuchMembership(r))
    }

    pub fn membership_mut(&mut self, r: MembershipRef) -> LookupResult<&mut ChannelClientEntry> {
        self.memberships
            .get_mut(&r)
            .ok_or(LookupError::NoSuchMembership(r))
    }

    pub fn servers(&self) -> impl Iterator<Item = (ServerRef, &ServerEntry)> {
        self.servers.iter().map(|(r, e)| (*r, e))
    }

    pub fn clients(&self) -> impl Iterator<Item = (ClientRef, &ClientEntry)> {
        self.clients.iter().map(|(r, e)| (*r, e))
    }

    pub fn channels(&self) -> impl Iterator<Item = (ChannelRef, &ChannelEntry)> {
        self.channels.iter().map(|(r, e)| (*r, e))
    }

    // Servers

    pub fn add_server(&mut self, list: ListKind, entry: ServerEntry) -> Result<ServerRef, StoreError> {
        if let Some(id) = entry.id {
            if self.find_server_by_id(list.other(), &id).is_some() {
                return Err(StoreError::DuplicateId(id.into()));
            }
        }
        let r = self.refs.next_server();
        let name = entry.name.as_deref().map(casefold);
        if !self.list_mut(list).servers.add(name, entry.id, r) {
            return Err(StoreError::DuplicateId(
                entry.id.map(EntityId::from).ok_or(LookupError::NoSuchServer(r))?,
            ));
        }
        self.servers.insert(r, entry);
        Ok(r)
    }

    pub fn find_server_by_id(&self, list: ListKind, id: &ServerId) -> Option<ServerRef> {
        self.list(list).servers.find_by_id(id)
    }

    pub fn find_server_by_name(&self, list: ListKind, name: &str) -> Option<ServerRef> {
        self.list(list)
            .servers
            .find_by_name(&casefold(name))
            .first()
            .copied()
    }

    pub fn del_server(&mut self, list: ListKind, r: ServerRef) -> Option<ServerEntry> {
        self.list_mut(list).servers.del_by_context(r)?;
        self.servers.remove(&r)
    }

    pub fn move_server(&mut self, from: ListKind, to: ListKind, r: ServerRef) -> bool {
        if from == to {
            return self.list(from).servers.contains(r);
        }
        let keys = match self.list(from).servers.find_by_context(r) {
            Some(keys) => keys.clone(),
            None => return false,
        };
        if !self.list_mut(to).servers.add(keys.name.clone(), keys.id, r) {
            return false;
        }
        self.list_mut(from).servers.del_by_context(r);
        true
    }

    /// Give a registering server its ID and name
    pub fn update_server(&mut self, list: ListKind, r: ServerRef, new_id: ServerId, name: String) -> bool {
        if self.find_server_by_id(list.other(), &new_id).is_some() {
            return false;
        }
        if !self
            .list_mut(list)
            .servers
            .update_by_context(r, Some(new_id), Some(casefold(&name)))
        {
            return false;
        }
        match self.servers.get_mut(&r) {
            Some(server) => {
                server.id = Some(new_id);
                server.name = Some(name);
                true
            }
            None => false,
        }
    }

    // Clients

    pub fn add_client(&mut self, list: ListKind, entry: ClientEntry) -> Result<ClientRef, StoreError> {
        if let Some(id) = entry.id {
            if self.find_client_by_id(list.other(), &id).is_some() {
                return Err(StoreError::DuplicateId(id.into()));
            }
        }
        let r = self.refs.next_client();
        let name = entry.nickname.as_deref().map(casefold);
        if !self.list_mut(list).clients.add(name, entry.id, r) {
            return Err(StoreError::DuplicateId(
                entry.id.map(EntityId::from).ok_or(LookupError::NoSuchClient(r))?,
            ));
        }
        self.clients.insert(r, entry);
        Ok(r)
    }

    pub fn find_client_by_id(&self, list: ListKind, id: &ClientId) -> Option<ClientRef> {
        self.list(list).clients.find_by_id(id)
    }

    pub fn find_clients_by_nickname(&self, list: ListKind, nickname: &str) -> Vec<ClientRef> {
        self.list(list)
            .clients
            .find_by_name(&casefold(nickname))
            .to_vec()
    }

    /// Remove a client and every membership edge it holds
    pub fn del_client(&mut self, list: ListKind, r: ClientRef) -> Option<ClientEntry> {
        self.list_mut(list).clients.del_by_context(r)?;
        let memberships: Vec<MembershipRef> = self
            .clients
            .get(&r)
            .map(|c| c.channels.values().copied().collect())
            .unwrap_or_default();
        for m in memberships {
            self.remove_membership(m);
        }
        self.clients.remove(&r)
    }

    pub fn move_client(&mut self, from: ListKind, to: ListKind, r: ClientRef) -> bool {
        if from == to {
            return self.list(from).clients.contains(r);
        }
        let keys = match self.list(from).clients.find_by_context(r) {
            Some(keys) => keys.clone(),
            None => return false,
        };
        if !self.list_mut(to).clients.add(keys.name.clone(), keys.id, r) {
            return false;
        }
        self.list_mut(from).clients.del_by_context(r);
        true
    }

    /// Re-key a client under a new ID and, optionally, a new nickname
    pub fn update_client(
        &mut self,
        list: ListKind,
        r: ClientRef,
        new_id: ClientId,
        new_nickname: Option<String>,
    ) -> bool {
        if self.find_client_by_id(list.other(), &new_id).is_some() {
            return false;
        }
        let old_nickname = match self.clients.get(&r) {
            Some(client) => client.nickname.clone(),
            None => return false,
        };
        let nickname = new_nickname.or(old_nickname);
        let name = nickname.as_deref().map(casefold);
        if !self
            .list_mut(list)
            .clients
            .update_by_context(r, Some(new_id), name)
        {
            return false;
        }
        if let Some(client) = self.clients.get_mut(&r) {
            client.id = Some(new_id);
            client.nickname = nickname;
        }
        true
    }

    // Channels

    pub fn add_channel(&mut self, list: ListKind, entry: ChannelEntry) -> Result<ChannelRef, StoreError> {
        if self.find_channel_by_id(list.other(), &entry.id).is_some() {
            return Err(StoreError::DuplicateId(entry.id.into()));
        }
        let r = self.refs.next_channel();
        let name = casefold(&entry.name);
        if !self.list_mut(list).channels.add(Some(name), Some(entry.id), r) {
            return Err(StoreError::DuplicateId(entry.id.into()));
        }
        self.channels.insert(r, entry);
        Ok(r)
    }

    pub fn find_channel_by_id(&self, list: ListKind, id: &ChannelId) -> Option<ChannelRef> {
        self.list(list).channels.find_by_id(id)
    }

    pub fn find_channel_by_name(&self, list: ListKind, name: &str) -> Option<ChannelRef> {
        self.list(list)
            .channels
            .find_by_name(&casefold(name))
            .first()
            .copied()
    }

    /// Remove a channel and every membership edge on it
    pub fn del_channel(&mut self, list: ListKind, r: ChannelRef) -> Option<ChannelEntry> {
        self.list_mut(list).channels.del_by_context(r)?;
        let memberships: Vec<MembershipRef> = self
            .channels
            .get(&r)
            .map(|c| c.user_list.values().copied().collect())
            .unwrap_or_default();
        for m in memberships {
            self.remove_membership(m);
        }
        self.channels.remove(&r)
    }

    pub fn move_channel(&mut self, from: ListKind, to: ListKind, r: ChannelRef) -> bool {
        if from == to {
            return self.list(from).channels.contains(r);
        }
        let keys = match self.list(from).channels.find_by_context(r) {
            Some(keys) => keys.clone(),
            None => return false,
        };
        if !self.list_mut(to).channels.add(keys.name.clone(), keys.id, r) {
            return false;
        }
        self.list_mut(from).channels.del_by_context(r);
        true
    }

    pub fn update_channel(&mut self, list: ListKind, r: ChannelRef, new_id: ChannelId) -> bool {
        if self.find_channel_by_id(list.other(), &new_id).is_some() {
            return false;
        }
        let name = match self.channels.get(&r) {
            Some(channel) => casefold(&channel.name),
            None => return false,
        };
        if !self
            .list_mut(list)
            .channels
            .update_by_context(r, Some(new_id), Some(name))
        {
            return false;
        }
        if let Some(channel) = self.channels.get_mut(&r) {
            channel.id = new_id;
        }
        true
    }

    // Context lookups

    /// Which list, if any, indexes this entry
    pub fn list_of(&self, r: impl Into<EntryRef>) -> Option<ListKind> {
        let r = r.into();
        [ListKind::Local, ListKind::Global]
            .iter()
            .copied()
            .find(|kind| self.find_by_context(*kind, r).is_some())
    }

    pub fn find_by_context(&self, list: ListKind, r: impl Into<EntryRef>) -> Option<CachedKeys> {
        let list = self.list(list);
        match r.into() {
            EntryRef::Server(r) => list.servers.find_by_context(r).map(|k| CachedKeys {
                id: k.id.map(EntityId::from),
                name: k.name.clone(),
            }),
            EntryRef::Client(r) => list.clients.find_by_context(r).map(|k| CachedKeys {
                id: k.id.map(EntityId::from),
                name: k.name.clone(),
            }),
            EntryRef::Channel(r) => list.channels.find_by_context(r).map(|k| CachedKeys {
                id: k.id.map(EntityId::from),
                name: k.name.clone(),
            }),
            EntryRef::Membership(_) => None,
        }
    }

    /// Delete whatever entry `r` names from `list`, running its destructor
    pub fn del_by_context(&mut self, list: ListKind, r: impl Into<EntryRef>) -> bool {
        match r.into() {
            EntryRef::Server(r) => self.del_server(list, r).is_some(),
            EntryRef::Client(r) => self.del_client(list, r).is_some(),
            EntryRef::Channel(r) => self.del_channel(list, r).is_some(),
            EntryRef::Membership(r) => self.remove_membership(r).is_some(),
        }
    }

    // Memberships

    /// Create the edge and insert it into both views
    pub fn add_membership(
        &mut self,
        client: ClientRef,
        channel: ChannelRef,
        mode: ChannelUserMode,
    ) -> LookupResult<MembershipRef> {
        if !self.clients.contains_key(&client) {
            return Err(LookupError::NoSuchClient(client));
        }
        if !self.channels.contains_key(&channel) {
            return Err(LookupError::NoSuchChannel(channel));
        }
        if let Some(existing) = self.find_membership(client, channel) {
            return Ok(existing);
        }

        let r = self.refs.next_membership();
        self.memberships.insert(
            r,
            ChannelClientEntry {
                client,
                channel,
                mode,
            },
        );
        self.client_mut(client)?.channels.insert(channel, r);
        self.channel_mut(channel)?.user_list.insert(client, r);
        Ok(r)
    }

    /// Free the edge, detaching it from both views
    pub fn remove_membership(&mut self, r: MembershipRef) -> Option<ChannelClientEntry> {
        let edge = self.memberships.remove(&r)?;
        if let Some(client) = self.clients.get_mut(&edge.client) {
            client.channels.remove(&edge.channel);
        }
        if let Some(channel) = self.channels.get_mut(&edge.channel) {
            channel.user_list.remove(&edge.client);
        }
        Some(edge)
    }

    pub fn find_membership(&self, client: ClientRef, channel: ChannelRef) -> Option<MembershipRef> {
        self.clients.get(&client)?.channels.get(&channel).copied()
    }

    pub fn client_channels(&self, client: ClientRef) -> Vec<ChannelRef> {
        self.clients
            .get(&client)
            .map(|c| c.channels.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn channel_members(&self, channel: ChannelRef) -> Vec<(ClientRef, MembershipRef)> {
        self.channels
            .get(&channel)
            .map(|c| c.user_list.iter().map(|(c, m)| (*c, *m)).collect())
            .unwrap_or_default()
    }

    /// Check the structural invariants: every entry is indexed in exactly one
    /// list, no ID is cached in both lists, and both views of every membership
    /// edge agree.
    pub fn verify_invariants(&self) -> Result<(), String> {
        for r in self.servers.keys() {
            self.exactly_one_list(EntryRef::Server(*r))?;
        }
        for r in self.clients.keys() {
            self.exactly_one_list(EntryRef::Client(*r))?;
        }
        for r in self.channels.keys() {
            self.exactly_one_list(EntryRef::Channel(*r))?;
        }
        for (r, edge) in &self.memberships {
            let from_client = self
                .clients
                .get(&edge.client)
                .and_then(|c| c.channels.get(&edge.channel));
            let from_channel = self
                .channels
                .get(&edge.channel)
                .and_then(|c| c.user_list.get(&edge.client));
            if from_client != Some(r) || from_channel != Some(r) {
                return Err(format!("membership {} is not reachable from both sides", r));
            }
        }
        for (cr, client) in &self.clients {
            for (ch, m) in &client.channels {
                match self.memberships.get(m) {
                    Some(edge) if edge.client == *cr && edge.channel == *ch => (),
                    _ => return Err(format!("{} holds dangling membership {}", cr, m)),
                }
            }
        }
        for (chr, channel) in &self.channels {
            for (cr, m) in &channel.user_list {
                match self.memberships.get(m) {
                    Some(edge) if edge.client == *cr && edge.channel == *chr => (),
                    _ => return Err(format!("{} holds dangling membership {}", chr, m)),
                }
            }
        }
        Ok(())
    }

    fn exactly_one_list(&self, r: EntryRef) -> Result<(), String> {
        let local = self.find_by_context(ListKind::Local, r).is_some();
        let global = self.find_by_context(ListKind::Global, r).is_some();
        if local == global {
            return Err(format!("{:?} indexed in local={} global={}", r, local, global));
        }
        Ok(())
    }
}
