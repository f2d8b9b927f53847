//! NEW_ID and NEW_CHANNEL: merging identities other servers announce

use super::*;

impl Server
{
    /// Whether a NEW_ID or NEW_CHANNEL on this connection is ours to process
    fn accepts_announcement(&self, conn: ConnectionId, packet: &Packet) -> bool
    {
        if self.conn_type(conn) == ConnectionType::Client || !matches!(packet.src_id, Some(EntityId::Server(_)))
        {
            tracing::debug!("{} from {} not from a server, dropped", packet.packet_type, conn);
            return false;
        }
        // Leaf servers hold no global state
        if self.is_server()
        {
            return false;
        }
        true
    }

    /// Something one of our cell's servers announced goes on to our router
    /// and backups, once
    pub(super) fn broadcast_from_cell(&mut self, conn: ConnectionId, packet: &Packet)
    {
        if !self.is_router() || self.conn_type(conn) != ConnectionType::Server || packet.is_broadcast()
        {
            return;
        }
        tracing::debug!("Broadcasting received {}", packet.packet_type);
        let out = Packet::new(packet.packet_type, packet.payload.clone())
            .with_src(self.id)
            .with_flags(packet.flags | PacketFlags::BROADCAST);
        self.backup_send(Some(conn), out.clone());
        self.send_to_primary(out);
    }

    pub(super) fn process_new_id(&mut self, conn: ConnectionId, packet: &Packet, broadcast: bool) -> HandlerResult
    {
        if !self.accepts_announcement(conn, packet)
        {
            return Ok(());
        }
        if self.new_id_record(conn, packet, &packet.payload)? && broadcast
        {
            self.broadcast_from_cell(conn, packet);
        }
        Ok(())
    }

    pub(super) fn process_new_id_list(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        if !self.accepts_announcement(conn, packet)
        {
            return Ok(());
        }

        // The whole list goes upstream in one piece
        self.broadcast_from_cell(conn, packet);

        for record in split_id_list(&packet.payload)
        {
            if let Err(e) = self.new_id_record(conn, packet, record)
            {
                tracing::debug!("NEW_ID list record dropped: {}", e);
            }
        }
        Ok(())
    }

    /// Merge one announced ID. Returns whether anything new was learned.
    fn new_id_record(&mut self, conn: ConnectionId, packet: &Packet, raw: &[u8]) -> Result<bool, HandlerError>
    {
        let id = IdPayload::decode(raw)?;
        let conn_type = self.conn_type(conn);
        let sender = self.conn_server(conn);
        let sender_type = sender.and_then(|s| self.store.server(s).ok()).map(|s| s.server_type);

        if let (EntityId::Server(_), ConnectionType::Server, Some(ServerType::Server)) = (id, conn_type, sender_type)
        {
            tracing::debug!("Server announced another server behind it, dropped");
            return Ok(false);
        }

        // Where the new entry belongs and who owns it
        let (list, router, query_conn) = if conn_type == ConnectionType::Server
        {
            if sender_type == Some(ServerType::BackupRouter) && matches!(id, EntityId::Server(_)) && !self.is_backup()
            {
                (ListKind::Global, sender, self.primary_connection())
            }
            else
            {
                (ListKind::Local, sender, Some(conn))
            }
        }
        else
        {
            let src = match packet.src_id
            {
                Some(EntityId::Server(src)) => self.find_server(&src),
                _ => None,
            };
            (ListKind::Global, src, Some(conn))
        };

        let router = match router
        {
            Some(r) => r,
            None =>
            {
                tracing::debug!("No owner for announced id {}, dropped", id);
                return Ok(false);
            }
        };
        let cell = self.is_router() && conn_type == ConnectionType::Server;

        match id
        {
            EntityId::Client(client_id) =>
            {
                if self.find_registered_client(&client_id).is_some()
                {
                    tracing::trace!("Client {} already known", id);
                    return Ok(false);
                }
                self.drop_zombie(&client_id);

                let mut entry = ClientEntry::new(None, None, None, Some(client_id), Some(router), utils::now());
                entry.data.status.insert(EntryStatus::REGISTERED);
                if let Err(e) = self.store.add_client(list, entry)
                {
                    tracing::warn!("Could not add announced client {}: {}", id, e);
                    let notify = NotifyPayload::new(NotifyType::Signoff).id_arg(client_id);
                    self.send_notify(conn, false, notify);
                    return Ok(false);
                }
                tracing::debug!("New client {} from {}", id, conn);
                self.stat(StatChange::ClientAdded(Scope::new(false, cell)));

                // Fetch the key now so later resolution does not have to wait
                if let (true, Some(query_conn)) = (self.is_router(), query_conn)
                {
                    self.send_command(query_conn, Command::Getkey, vec![(1, raw.to_vec())]);
                }
            }
            EntityId::Server(server_id) =>
            {
                if server_id == self.id
                {
                    return Ok(false);
                }
                if sender.and_then(|s| self.store.server(s).ok()).and_then(|s| s.id) == Some(server_id)
                {
                    return Ok(false);
                }
                if self.find_server(&server_id).is_some()
                {
                    tracing::trace!("Server {} already known", id);
                    return Ok(false);
                }

                let mut entry = ServerEntry::new(None, ServerType::Server, Some(server_id), Some(router), utils::now());
                entry.data.status.insert(EntryStatus::REGISTERED);
                self.store.add_server(list, entry)?;
                tracing::debug!("New server {} from {}", id, conn);
                self.stat(StatChange::ServerAdded { router: false, scope: Scope::new(false, cell) });
            }
            EntityId::Channel(_) =>
            {
                return Err(ParseError::UnexpectedIdType(IdType::Channel).into());
            }
        }
        Ok(true)
    }

    pub(super) fn process_new_channel(&mut self, conn: ConnectionId, packet: &Packet, broadcast: bool) -> HandlerResult
    {
        if !self.accepts_announcement(conn, packet)
        {
            return Ok(());
        }
        if self.new_channel_record(conn, &packet.payload)? && broadcast
        {
            self.broadcast_from_cell(conn, packet);
        }
        Ok(())
    }

    pub(super) fn process_new_channel_list(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        if !self.accepts_announcement(conn, packet)
        {
            return Ok(());
        }

        self.broadcast_from_cell(conn, packet);

        for record in split_channel_list(&packet.payload)
        {
            if let Err(e) = self.new_channel_record(conn, record)
            {
                tracing::debug!("NEW_CHANNEL list record dropped: {}", e);
            }
        }
        Ok(())
    }

    /// Merge one announced channel. Returns whether the announcement stands
    /// and may be passed on; an ID we corrected does not.
    fn new_channel_record(&mut self, conn: ConnectionId, raw: &[u8]) -> Result<bool, HandlerError>
    {
        let payload = ChannelPayload::decode(raw)?;
        let mode = ChannelMode::from_bits_truncate(payload.mode);

        if self.conn_type(conn) == ConnectionType::Router
        {
            self.channel_from_router(conn, payload, mode)?;
            return Ok(true);
        }

        // From one of our own servers, so we are authoritative for it
        match self.store.find_channel_by_name(ListKind::Local, &payload.name)
        {
            None => self.new_cell_channel(conn, payload, mode),
            Some(channel) => self.existing_cell_channel(conn, channel, payload, mode),
        }
    }

    /// Another router's channel: cache it, disabled until someone joins
    fn channel_from_router(&mut self, conn: ConnectionId, payload: ChannelPayload, mode: ChannelMode) -> HandlerResult
    {
        let known = self
            .store
            .find_channel_by_name(ListKind::Local, &payload.name)
            .or_else(|| self.store.find_channel_by_name(ListKind::Global, &payload.name));
        if known.is_some()
        {
            return Ok(());
        }

        let router = self.conn_server(conn);
        let mut entry = ChannelEntry::new(payload.name, payload.id, router, utils::now());
        entry.mode = mode;
        entry.disabled = true;
        entry.users_resolved = self.is_router();
        tracing::debug!("New channel {} from router {}", entry.name, EntityId::from(payload.id));
        self.store.add_channel(ListKind::Global, entry)?;
        self.stat(StatChange::ChannelAdded(Scope::remote()));
        Ok(())
    }

    fn new_cell_channel(&mut self, conn: ConnectionId, payload: ChannelPayload, mode: ChannelMode) -> Result<bool, HandlerError>
    {
        let sender_type = self.conn_server(conn).and_then(|s| self.store.server(s).ok()).map(|s| s.server_type);

        // Channel IDs in our cell come from our address space
        if sender_type != Some(ServerType::BackupRouter) && payload.id.ip != self.id.ip
        {
            let new_id = idgen::create_channel_id(&self.store, &self.id, &mut self.rng)?;
            tracing::debug!(
                "Channel {} announced with foreign id {}, forcing {}",
                payload.name,
                EntityId::from(payload.id),
                EntityId::from(new_id)
            );
            let notify = NotifyPayload::new(NotifyType::ChannelChange).id_arg(payload.id).id_arg(new_id);
            self.send_notify(conn, false, notify);
            return Ok(false);
        }

        let mut entry = ChannelEntry::new(payload.name, payload.id, None, utils::now());
        entry.mode = mode;
        entry.disabled = true;
        let channel = self.store.add_channel(ListKind::Local, entry)?;
        self.stat(StatChange::ChannelAdded(self.channel_scope(channel)));
        self.create_channel_key(channel)?;
        tracing::debug!("New channel {} from server {}", EntityId::from(payload.id), conn);

        if let Some(key) = self.channel_key_packet(channel)
        {
            self.send_packet(conn, key);
        }
        Ok(true)
    }

    fn existing_cell_channel(
        &mut self,
        conn: ConnectionId,
        channel: ChannelRef,
        payload: ChannelPayload,
        mode: ChannelMode,
    ) -> Result<bool, HandlerError>
    {
        let (our_id, our_mode, has_members) = {
            let entry = self.store.channel(channel)?;
            (entry.id, entry.mode, !entry.user_list.is_empty())
        };

        if payload.id != our_id
        {
            tracing::debug!(
                "Channel {} announced as {}, we have {}",
                payload.name,
                EntityId::from(payload.id),
                EntityId::from(our_id)
            );
            let notify = NotifyPayload::new(NotifyType::ChannelChange).id_arg(payload.id).id_arg(our_id);
            self.send_notify(conn, false, notify);
            self.send_new_channel(conn, false, channel)?;
            self.announce_channel(conn, channel)?;
            return Ok(false);
        }

        if mode != our_mode
        {
            let pubkeys = self.channel_pk_announcement(channel);
            self.send_cmode(conn, channel, our_mode, true, pubkeys)?;
        }

        if !our_mode.contains(ChannelMode::PRIVKEY)
        {
            if has_members
            {
                self.create_channel_key(channel)?;
                self.send_channel_key(Some(conn), channel, false);
            }
            if let Some(key) = self.channel_key_packet(channel)
            {
                self.send_packet(conn, key);
            }
        }

        // Our members "join" on the announcing server
        self.announce_channel(conn, channel)?;
        Ok(true)
    }
}
