use super::*;
use crate::stats::StatChange;
use std::collections::HashSet;

/// Longest chain of router links followed when resolving a route
const MAX_ROUTE_HOPS: usize = 32;

impl Server
{
    /// Hand a packet to the transport
    pub(super) fn send_packet(&mut self, conn: ConnectionId, packet: Packet)
    {
        let now = utils::now();
        match self.connections.get(&conn).and_then(|c| c.entry)
        {
            Some(EntryRef::Client(r)) => if let Ok(c) = self.store.client_mut(r) { c.data.last_sent = now },
            Some(EntryRef::Server(r)) => match self.store.server_mut(r)
            {
                Ok(s) if s.is_disabled() =>
                {
                    tracing::trace!("Connection {} is disabled, not sending {:?}", conn, packet.packet_type);
                    return;
                }
                Ok(s) => s.data.last_sent = now,
                Err(_) => (),
            },
            _ => (),
        }

        tracing::trace!("Sending {:?} to {}", packet.packet_type, conn);
        self.stat(StatChange::PacketSent);
        self.transport.send(conn, packet);
    }

    /// The connection of our primary router
    pub(super) fn primary_connection(&self) -> Option<ConnectionId>
    {
        self.router.and_then(|r| self.store.server(r).ok()).and_then(|s| s.connection())
    }

    /// Follow router links from `server` until one we hold a connection to
    pub(super) fn server_route(&self, server: ServerRef) -> Option<ConnectionId>
    {
        let mut current = server;
        for _ in 0..MAX_ROUTE_HOPS
        {
            if current == self.me
            {
                return None;
            }
            let entry = self.store.server(current).ok()?;
            if let Some(conn) = entry.connection()
            {
                return Some(conn);
            }
            current = entry.router?;
        }
        tracing::error!("Router chain from {} does not terminate", server);
        None
    }

    /// A local client routes to its own connection, a remote one towards
    /// its owning server. Detached clients have no route.
    pub(super) fn client_route(&self, client: ClientRef) -> Option<ConnectionId>
    {
        let entry = self.store.client(client).ok()?;
        if entry.is_detached()
        {
            return None;
        }
        if let Some(conn) = entry.connection()
        {
            return Some(conn);
        }
        self.server_route(entry.router?)
    }

    /// Find the connection to send towards `dst`. Unknown destinations go to
    /// the primary router, unless they are in our own cell.
    pub fn route(&self, dst: &EntityId) -> Option<ConnectionId>
    {
        match dst
        {
            EntityId::Client(id) =>
            {
                if let Some(client) = self.find_client(id)
                {
                    return self.client_route(client);
                }
                if id.is_based_on(&self.id)
                {
                    return None;
                }
            }
            EntityId::Server(id) =>
            {
                if let Some(server) = self.find_server(id)
                {
                    return self.server_route(server);
                }
            }
            EntityId::Channel(id) =>
            {
                if let Some(channel) = self.find_channel(id)
                {
                    let router = self.store.channel(channel).ok()?.router;
                    return match router {
                        Some(router) => self.server_route(router),
                        None => self.primary_connection(),
                    };
                }
            }
        }
        self.primary_connection()
    }

    // Lookups across both lists

    pub(super) fn find_client(&self, id: &ClientId) -> Option<ClientRef>
    {
        self.store
            .find_client_by_id(ListKind::Global, id)
            .or_else(|| self.store.find_client_by_id(ListKind::Local, id))
    }

    pub(super) fn find_server(&self, id: &ServerId) -> Option<ServerRef>
    {
        self.store
            .find_server_by_id(ListKind::Global, id)
            .or_else(|| self.store.find_server_by_id(ListKind::Local, id))
    }

    pub(super) fn find_channel(&self, id: &ChannelId) -> Option<ChannelRef>
    {
        self.store
            .find_channel_by_id(ListKind::Local, id)
            .or_else(|| self.store.find_channel_by_id(ListKind::Global, id))
    }

    /// A registered client, local list first
    pub(super) fn find_registered_client(&self, id: &ClientId) -> Option<ClientRef>
    {
        self.store
            .find_client_by_id(ListKind::Local, id)
            .or_else(|| self.store.find_client_by_id(ListKind::Global, id))
            .filter(|r| self.store.client(*r).map_or(false, |c| c.is_registered()))
    }

    /// Delete a signed-off entry still holding `id` so a fresh announcement
    /// of that client can be recorded
    pub(super) fn drop_zombie(&mut self, id: &ClientId)
    {
        let zombie = match self.find_client(id).filter(|r| self.store.client(*r).map_or(false, |c| c.is_zombie()))
        {
            Some(r) => r,
            None => return,
        };
        if let Some(list) = self.store.list_of(zombie)
        {
            tracing::debug!("Replacing signed-off client {}", EntityId::from(*id));
            self.store.del_client(list, zombie);
        }
    }

    // Sending

    /// Send to the primary router, flagged as broadcast when we are a router
    pub(super) fn send_to_primary(&mut self, mut packet: Packet)
    {
        if let Some(conn) = self.primary_connection()
        {
            if self.is_router()
            {
                packet.flags.insert(PacketFlags::BROADCAST);
            }
            self.send_packet(conn, packet);
        }
    }

    /// Mirror a packet to every backup router connected to us
    pub(super) fn backup_send(&mut self, exclude: Option<ConnectionId>, packet: Packet)
    {
        if !self.is_router()
        {
            return;
        }
        let primary = self.primary_connection();
        let targets: Vec<ConnectionId> = self
            .store
            .servers()
            .filter(|(_, s)| s.server_type == ServerType::BackupRouter && s.is_local())
            .filter_map(|(_, s)| s.connection())
            .filter(|c| Some(*c) != exclude && Some(*c) != primary)
            .collect();

        for conn in targets
        {
            self.send_packet(conn, packet.clone());
        }
    }

    /// Send to a channel, at most one copy per route. `route` also sends to
    /// remote cells; `send_to_clients` includes our locally connected members.
    pub(super) fn send_to_channel(
        &mut self,
        sender: Option<ConnectionId>,
        channel: ChannelRef,
        packet: Packet,
        route: bool,
        send_to_clients: bool,
    )
    {
        let global_users = match self.store.channel(channel)
        {
            Ok(c) => c.global_users,
            Err(_) => return,
        };

        if route && !self.is_router() && global_users
        {
            if let Some(conn) = self.primary_connection()
            {
                if Some(conn) != sender
                {
                    self.send_packet(conn, packet.clone());
                }
            }
        }

        let mut targets = Vec::new();
        let mut routed = HashSet::new();
        let mut sent_to_router = false;

        for (client, _) in self.store.channel_members(channel)
        {
            let entry = match self.store.client(client)
            {
                Ok(e) => e,
                Err(_) => continue,
            };

            if let Some(owner) = entry.router
            {
                if !self.is_router()
                {
                    continue;
                }
                if !routed.insert(owner)
                {
                    continue;
                }
                let conn = match self.server_route(owner)
                {
                    Some(conn) if Some(conn) != sender => conn,
                    _ => continue,
                };
                if self.conn_type(conn) == ConnectionType::Router
                {
                    // Without `route` the packet stays inside our cell
                    if !route || sent_to_router
                    {
                        continue;
                    }
                    sent_to_router = true;
                }
                if !targets.contains(&conn)
                {
                    targets.push(conn);
                }
                continue;
            }

            if !send_to_clients
            {
                continue;
            }
            match entry.connection()
            {
                Some(conn) if Some(conn) != sender => targets.push(conn),
                _ => (),
            }
        }

        for conn in targets
        {
            self.send_packet(conn, packet.clone());
        }
    }

    // Notifies

    pub(super) fn notify_packet(&self, notify: &NotifyPayload) -> Packet
    {
        Packet::new(PacketType::Notify, notify.encode()).with_src(self.id)
    }

    /// Send a notify on one connection
    pub(super) fn send_notify(&mut self, conn: ConnectionId, broadcast: bool, notify: NotifyPayload)
    {
        let mut packet = self.notify_packet(&notify);
        if broadcast
        {
            packet.flags.insert(PacketFlags::BROADCAST);
        }
        self.send_packet(conn, packet);
    }

    /// Send a notify on one connection, addressed to `dst`
    pub(super) fn send_notify_dest(&mut self, conn: ConnectionId, broadcast: bool, dst: EntityId, notify: NotifyPayload)
    {
        let mut packet = self.notify_packet(&notify);
        packet.dst_id = Some(dst);
        if broadcast
        {
            packet.flags.insert(PacketFlags::BROADCAST);
        }
        self.send_packet(conn, packet);
    }

    pub(super) fn send_notify_to_primary(&mut self, notify: NotifyPayload)
    {
        let packet = self.notify_packet(&notify);
        self.send_to_primary(packet);
    }

    /// Send a notify to a channel's members
    pub(super) fn send_notify_to_channel(
        &mut self,
        sender: Option<ConnectionId>,
        channel: ChannelRef,
        route: bool,
        send_to_clients: bool,
        notify: NotifyPayload,
    )
    {
        let id = match self.store.channel(channel)
        {
            Ok(c) => c.id,
            Err(_) => return,
        };
        let packet = self.notify_packet(&notify).with_dst(id);
        self.send_to_channel(sender, channel, packet, route, send_to_clients);
    }

    /// Send a notify once to every client sharing a channel with `client`,
    /// and once per route towards remote members when we are a router
    pub(super) fn send_notify_on_channels(&mut self, sender: Option<ClientRef>, client: ClientRef, notify: NotifyPayload)
    {
        let payload = notify.encode();
        let mut sent_clients = HashSet::new();
        let mut routed = HashSet::new();
        let mut targets: Vec<(ConnectionId, EntityId)> = Vec::new();

        for channel in self.store.client_channels(client)
        {
            for (member, _) in self.store.channel_members(channel)
            {
                if Some(member) == sender || sent_clients.contains(&member)
                {
                    continue;
                }
                let entry = match self.store.client(member)
                {
                    Ok(e) => e,
                    Err(_) => continue,
                };

                if let Some(owner) = entry.router
                {
                    if self.is_router() && routed.insert(owner)
                    {
                        let owner_id = self.store.server(owner).ok().and_then(|s| s.id);
                        if let (Some(conn), Some(owner_id)) = (self.server_route(owner), owner_id)
                        {
                            targets.push((conn, owner_id.into()));
                        }
                    }
                    continue;
                }

                if let (Some(conn), Some(id)) = (entry.connection(), entry.id)
                {
                    targets.push((conn, id.into()));
                    sent_clients.insert(member);
                }
            }
        }

        for (conn, dst) in targets
        {
            let packet = Packet::new(PacketType::Notify, payload.clone()).with_src(self.id).with_dst(dst);
            self.send_packet(conn, packet);
        }
    }

    /// Tell the primary router and the channel about a CMODE_CHANGE we are
    /// forcing, carrying our view of the channel
    pub(super) fn cmode_notify(
        &self,
        channel: &ChannelEntry,
        mode: ChannelMode,
        founder_key: Option<&PublicKey>,
        pubkeys: Option<Vec<u8>>,
    ) -> NotifyPayload
    {
        NotifyPayload::new(NotifyType::CmodeChange)
            .id_arg(self.id)
            .u32_arg(mode.bits())
            .opt_arg(channel.cipher.as_ref().map(|c| c.as_bytes().to_vec()))
            .opt_arg(channel.hmac_name.as_ref().map(|h| h.as_bytes().to_vec()))
            .opt_arg(channel.passphrase.as_ref().map(|p| p.as_bytes().to_vec()))
            .opt_arg(founder_key.map(PublicKey::encode))
            .opt_arg(pubkeys)
            .opt_arg(if mode.contains(ChannelMode::ULIMIT) { Some(channel.user_limit.to_be_bytes().to_vec()) } else { None })
    }

    /// Send a NEW_ID for `id` on one connection
    pub(super) fn send_new_id(&mut self, conn: ConnectionId, broadcast: bool, id: EntityId)
    {
        let mut packet = Packet::new(PacketType::NewId, IdPayload::encode(&id)).with_src(self.id);
        if broadcast
        {
            packet.flags.insert(PacketFlags::BROADCAST);
        }
        self.send_packet(conn, packet);
    }

    /// Announce a channel with a NEW_CHANNEL on one connection
    pub(super) fn send_new_channel(&mut self, conn: ConnectionId, broadcast: bool, channel: ChannelRef) -> HandlerResult
    {
        let payload = {
            let entry = self.store.channel(channel)?;
            ChannelPayload { name: entry.name.clone(), id: entry.id, mode: entry.mode.bits() }
        };
        let mut packet = Packet::new(PacketType::NewChannel, payload.encode()).with_src(self.id);
        if broadcast
        {
            packet.flags.insert(PacketFlags::BROADCAST);
        }
        self.send_packet(conn, packet);
        Ok(())
    }

    // Commands

    /// Send a command towards `conn` and return the ident its reply will carry
    pub(super) fn send_command(&mut self, conn: ConnectionId, command: Command, args: Vec<(u8, Vec<u8>)>) -> u16
    {
        let ident = self.next_cmd_ident();
        let mut payload = CommandPayload::new(command, ident);
        for (arg_type, data) in args
        {
            payload.args.push(arg_type, data);
        }
        tracing::debug!("Sending {:?} command ({}) to {}", command, ident, conn);
        self.send_packet(conn, Packet::new(PacketType::Command, payload.encode()).with_src(self.id));
        ident
    }

    /// Ask our router about a client we don't know, or know too little
    /// about. Returns the ident to wait on, if a query went out.
    pub(super) fn query_client(&mut self, id: &ClientId) -> Option<u16>
    {
        if self.is_router() || self.is_standalone()
        {
            return None;
        }
        let conn = self.primary_connection()?;
        Some(self.send_command(conn, Command::Whois, vec![(4, IdPayload::encode(&EntityId::Client(*id)))]))
    }

    // Channel keys

    /// Generate fresh key material for a channel
    pub(super) fn create_channel_key(&mut self, channel: ChannelRef) -> HandlerResult
    {
        let default_cipher = self.config.channel_cipher.clone();
        let entry = self.store.channel_mut(channel)?;
        let cipher = entry.cipher.clone().unwrap_or(default_cipher);
        let key = self.keys.generate_channel_key(&cipher);
        entry.cipher = Some(cipher);
        entry.key = Some(key);
        tracing::debug!("New key for channel {}", entry.name);
        Ok(())
    }

    pub(super) fn channel_key_packet(&self, channel: ChannelRef) -> Option<Packet>
    {
        let entry = self.store.channel(channel).ok()?;
        let key = entry.key.as_ref()?;
        let payload = ChannelKeyPayload {
            id: entry.id,
            cipher: key.cipher.clone(),
            key: key.key.clone(),
        };
        Some(Packet::new(PacketType::ChannelKey, payload.encode()).with_src(self.id).with_dst(entry.id))
    }

    /// Distribute a channel's current key to its members
    pub(super) fn send_channel_key(&mut self, sender: Option<ConnectionId>, channel: ChannelRef, route: bool)
    {
        if let Some(packet) = self.channel_key_packet(channel)
        {
            self.send_to_channel(sender, channel, packet, route, true);
        }
    }

    /// Whether the channel key should also go towards our router
    pub(super) fn key_route(&self) -> bool
    {
        !self.is_router() && !self.is_standalone()
    }

    // Announcements

    /// Re-announce a channel's state to `conn`: its members as JOIN notifies,
    /// its mode, its members' modes and its topic.
    pub(super) fn announce_channel(&mut self, conn: ConnectionId, channel: ChannelRef) -> HandlerResult
    {
        let (id, mode, topic) = {
            let entry = self.store.channel(channel)?;
            (entry.id, entry.mode, entry.topic.clone())
        };

        let mut joins = Vec::new();
        let mut cumodes = Vec::new();
        for (client, membership) in self.store.channel_members(channel)
        {
            let client_id = match self.store.client(client)?.id
            {
                Some(id) => id,
                None => continue,
            };
            let member_mode = self.store.membership(membership)?.mode;
            joins.extend(NotifyPayload::new(NotifyType::Join).id_arg(client_id).id_arg(id).encode());
            cumodes.extend(
                NotifyPayload::new(NotifyType::CumodeChange)
                    .id_arg(self.id)
                    .u32_arg(member_mode.bits())
                    .id_arg(client_id)
                    .encode(),
            );
        }

        let list = PacketFlags::LIST;
        if !joins.is_empty()
        {
            self.send_packet(conn, Packet::new(PacketType::Notify, joins).with_src(self.id).with_flags(list));
        }

        let pubkeys = self.channel_pk_announcement(channel);
        let modes = {
            let entry = self.store.channel(channel)?;
            self.cmode_notify(entry, mode, entry.founder_key.as_ref(), pubkeys).encode()
        };
        self.send_packet(conn, Packet::new(PacketType::Notify, modes).with_src(self.id).with_dst(id).with_flags(list));

        if !cumodes.is_empty()
        {
            self.send_packet(conn, Packet::new(PacketType::Notify, cumodes).with_src(self.id).with_dst(id).with_flags(list));
        }

        if let Some(topic) = topic
        {
            let notify = NotifyPayload::new(NotifyType::TopicSet).id_arg(self.id).arg(topic.into_bytes());
            let broadcast = self.is_router();
            self.send_notify_dest(conn, broadcast, id.into(), notify);
        }
        Ok(())
    }
}
