//! RESUME_CLIENT: a client reattaching to its detached session, and servers
//! telling each other that it happened.
//!
//! The client side may need to learn about the detached entry first. It then
//! suspends on a WHOIS or GETKEY and is re-run from [`Server::resume_resolved`]
//! once the reply arrives. Anything may have changed by then, so every check
//! runs again from the top.

use super::*;
use crate::crypto::MIN_RESUME_AUTH_LEN;

const RESUME_FAILED: &str = "Resuming not possible";

impl Server
{
    pub(super) fn process_resume_client(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        match self.conn_type(conn)
        {
            ConnectionType::Client => self.resume_from_client(conn, packet),
            ConnectionType::Server | ConnectionType::Router => self.resume_from_server(conn, packet),
            ConnectionType::Unknown => Ok(()),
        }
    }

    /// Re-run a suspended resume with the reply it waited for. No reply, or
    /// a failed one, ends the attempt.
    pub(super) fn resume_resolved(&mut self, conn: ConnectionId, packet: &Packet, reply: Option<&CommandPayload>) -> HandlerResult
    {
        if self.conn_client(conn).is_none()
        {
            tracing::debug!("Resuming connection {} went away", conn);
            return Ok(());
        }

        let reply = match reply
        {
            Some(r) if r.status() == Some(StatusCode::Ok) => r,
            _ =>
            {
                self.reject_resume(conn, StatusCode::IncompleteInformation, "tried to resume unknown client");
                return Ok(());
            }
        };

        let client_id = ResumeClientPayload::decode(&packet.payload)?.id;
        let detached = self
            .store
            .find_client_by_id(ListKind::Local, &client_id)
            .or_else(|| self.store.find_client_by_id(ListKind::Global, &client_id));

        match reply.command
        {
            Command::Whois =>
            {
                let detached = match detached.filter(|c| self.store.client(*c).map_or(false, |c| c.is_detached()))
                {
                    Some(c) => c,
                    None =>
                    {
                        self.reject_resume(conn, StatusCode::IncompleteInformation, "tried to resume un-detached client");
                        return Ok(());
                    }
                };
                self.store.client_mut(detached)?.data.status.insert(EntryStatus::RESUME_RES);
            }
            Command::Getkey =>
            {
                let has_key = detached
                    .and_then(|c| self.store.client(c).ok())
                    .map_or(false, |c| c.data.public_key.is_some());
                if !has_key
                {
                    self.reject_resume(conn, StatusCode::IncompleteInformation, "detached client's public key not found");
                    return Ok(());
                }
            }
            _ => (),
        }

        self.resume_from_client(conn, packet)
    }

    fn resume_from_client(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        let payload = match ResumeClientPayload::decode(&packet.payload)
        {
            Ok(p) if p.auth.len() >= MIN_RESUME_AUTH_LEN => p,
            _ =>
            {
                self.reject_resume(conn, StatusCode::IncompleteInformation, "sent incomplete resume information");
                return Ok(());
            }
        };
        let transient = match self.conn_client(conn)
        {
            Some(c) => c,
            None => return Ok(()),
        };
        let client_id = payload.id;

        let detached = match self.find_client(&client_id)
        {
            Some(c) => c,
            None =>
            {
                match self.query_client(&client_id)
                {
                    Some(ident) => self.suspend_resume(conn, packet, Command::Whois, ident),
                    None => self.reject_resume(conn, StatusCode::IncompleteInformation, "tried to resume unknown client"),
                }
                return Ok(());
            }
        };

        let (status, resuming, mode, has_channels, owner, nickname, stored_key) = {
            let entry = self.store.client(detached)?;
            (
                entry.data.status,
                entry.resuming_client,
                entry.mode,
                !entry.channels.is_empty(),
                entry.router,
                entry.nickname.clone(),
                entry.data.public_key.clone(),
            )
        };

        if status.contains(EntryStatus::RESUMED)
        {
            self.reject_resume(conn, StatusCode::IncompleteInformation, "tried to attach more than once");
            return Ok(());
        }

        // One resumer at a time, unless the other one has gone away
        match resuming
        {
            Some(other) if other != conn && self.connections.contains_key(&other) =>
            {
                self.reject_resume(conn, StatusCode::IncompleteInformation, "tried to attach more than once");
                return Ok(());
            }
            _ => self.store.client_mut(detached)?.resuming_client = Some(conn),
        }

        let resolve = !status.contains(EntryStatus::RESUME_RES)
            && (!mode.contains(UserMode::DETACHED) || (!has_channels && owner.is_some()) || nickname.is_none());
        if resolve && self.is_server()
        {
            match self.query_client(&client_id)
            {
                Some(ident) => self.suspend_resume(conn, packet, Command::Whois, ident),
                None => self.reject_resume(conn, StatusCode::IncompleteInformation, "tried to resume un-detached client"),
            }
            return Ok(());
        }

        let stored_key = match stored_key
        {
            Some(key) => key,
            None =>
            {
                self.resolve_resume_key(conn, packet, detached, client_id);
                return Ok(());
            }
        };

        let conn_key = self
            .connections
            .get(&conn)
            .and_then(|c| c.public_key.clone())
            .or_else(|| self.store.client(transient).ok().and_then(|c| c.data.public_key.clone()));
        if conn_key.as_ref() != Some(&stored_key)
        {
            self.reject_resume(conn, StatusCode::IncompleteInformation, "resuming attempted with wrong public key");
            return Ok(());
        }

        if !self.keys.verify_resume(&stored_key, &client_id, &payload.auth)
        {
            self.reject_resume(conn, StatusCode::IncompleteInformation, "resume authentication failed");
            return Ok(());
        }

        let nickname = match nickname.filter(|n| utils::is_valid_identifier(n))
        {
            Some(n) => n,
            None =>
            {
                self.reject_resume(conn, StatusCode::BadNickname, "malformed nickname, cannot resume");
                return Ok(());
            }
        };

        // A session resumed here takes an ID from our address space
        let new_id = if client_id.is_based_on(&self.id)
        {
            client_id
        }
        else
        {
            match idgen::create_client_id(&self.store, &self.id, &mut self.rng, self.hasher.as_ref(), &nickname)
            {
                Ok(id) => id,
                Err(e) =>
                {
                    tracing::debug!("No new id for resumed client: {}", e);
                    self.reject_resume(conn, StatusCode::BadNickname, "could not get a new id");
                    return Ok(());
                }
            }
        };

        self.complete_resume(conn, transient, detached, client_id, new_id, nickname)
    }

    /// The detached entry has no public key yet; ask whoever owns it
    fn resolve_resume_key(&mut self, conn: ConnectionId, packet: &Packet, detached: ClientRef, client_id: ClientId)
    {
        if self.is_server() && self.is_standalone()
        {
            self.reject_resume(conn, StatusCode::IncompleteInformation, "detached client's public key not present");
            return;
        }

        let route = self
            .store
            .client(detached)
            .ok()
            .and_then(|c| c.router)
            .and_then(|r| self.server_route(r))
            .or_else(|| self.primary_connection());
        match route
        {
            Some(route) =>
            {
                tracing::debug!("Resolving public key of {}", EntityId::from(client_id));
                let ident = self.send_command(route, Command::Getkey, vec![(1, IdPayload::encode(&client_id.into()))]);
                self.suspend_resume(conn, packet, Command::Getkey, ident);
            }
            None => self.reject_resume(conn, StatusCode::IncompleteInformation, "detached client's public key not present"),
        }
    }

    /// Move the resuming connection into the detached entry and tell the
    /// network the client is back
    fn complete_resume(
        &mut self,
        conn: ConnectionId,
        transient: ClientRef,
        detached: ClientRef,
        old_id: ClientId,
        new_id: ClientId,
        nickname: String,
    ) -> HandlerResult
    {
        tracing::info!("Resuming client {} on {}", EntityId::from(old_id), conn);

        // Both entries stop being counted as they were, and the resumed one is
        // counted again as ours once it has settled
        let old_mode = self.store.client(detached)?.mode;
        let detached_scope = self.client_scope(detached);
        let transient_scope = self.client_scope(transient);
        let transient_mode = self.store.client(transient)?.mode;
        self.stat(StatChange::ClientRemoved(transient_scope, transient_mode));
        self.stat(StatChange::ClientRemoved(detached_scope, old_mode));

        let transient_entry = match self.store.list_of(transient).and_then(|list| self.store.del_client(list, transient))
        {
            Some(entry) => entry,
            None => return Err(LookupError::NoSuchClient(transient).into()),
        };
        if let Some(connection) = self.connections.get_mut(&conn)
        {
            connection.entry = Some(EntryRef::Client(detached));
        }

        let new_mode = old_mode - UserMode::DETACHED;
        let old_owner = {
            let entry = self.store.client_mut(detached)?;
            let data = transient_entry.data;
            entry.data.connection = Some(conn);
            entry.data.public_key = data.public_key;
            entry.data.fingerprint = data.fingerprint;
            entry.data.rekey = data.rekey;
            entry.data.hash = data.hash;
            entry.data.status.insert(EntryStatus::REGISTERED | EntryStatus::RESUMED | EntryStatus::LOCAL);
            entry.data.status.remove(EntryStatus::RESUME_RES);
            entry.set_mode(new_mode);
            entry.resuming_client = None;
            entry.local_detached = false;
            entry.router.take()
        };

        // Upstream hears the old ID, which is the one it knows
        let resume = Packet::new(PacketType::ResumeClient, ResumeClientPayload { id: old_id, auth: Vec::new() }.encode())
            .with_src(self.id);
        let owner_conn = old_owner.and_then(|o| self.store.server(o).ok()).and_then(|s| s.connection());
        self.send_to_primary(resume.clone());
        self.backup_send(owner_conn, resume.clone());

        let owner_is_server = old_owner
            .and_then(|o| self.store.server(o).ok())
            .map_or(false, |s| s.server_type != ServerType::Router);
        if let (true, true, Some(owner_conn)) = (self.is_router(), owner_is_server, owner_conn)
        {
            self.send_packet(owner_conn, resume);
        }

        let nick_change = new_id != old_id;
        if nick_change
        {
            let notify = NotifyPayload::new(NotifyType::NickChange).id_arg(old_id).id_arg(new_id).arg(nickname.clone().into_bytes());
            self.send_notify_to_primary(notify);
        }

        if self.is_server() && !self.is_standalone()
        {
            self.resolve_channel_users(detached);
        }

        self.send_new_id(conn, false, new_id.into());

        if nick_change
        {
            let notify = NotifyPayload::new(NotifyType::NickChange).id_arg(old_id).id_arg(new_id).arg(nickname.into_bytes());
            self.send_notify_on_channels(None, detached, notify);

            if let Some(list) = self.store.list_of(detached)
            {
                self.store.update_client(list, detached, new_id, None);
            }
        }

        if self.store.list_of(detached) == Some(ListKind::Global)
        {
            self.store.move_client(ListKind::Global, ListKind::Local, detached);
        }

        let scope = self.client_scope(detached);
        self.stat(StatChange::ClientAdded(scope));
        self.stat(StatChange::UserModeChanged { local: scope.local, old: UserMode::empty(), new: new_mode });

        self.send_resumed_channel_keys(conn, detached);
        Ok(())
    }

    /// Ask the router for the member lists of channels we only know in part
    fn resolve_channel_users(&mut self, client: ClientRef)
    {
        let primary = match self.primary_connection()
        {
            Some(p) => p,
            None => return,
        };
        let unresolved: Vec<String> = self
            .store
            .client_channels(client)
            .into_iter()
            .filter_map(|c| self.store.channel(c).ok())
            .filter(|c| c.disabled || !c.users_resolved)
            .map(|c| c.name.clone())
            .collect();

        for name in unresolved
        {
            tracing::debug!("Resolving users of {}", name);
            self.send_command(primary, Command::Users, vec![(2, name.into_bytes())]);
        }
    }

    /// The resumed client gets the key of every channel it is on. Channels
    /// that had no key get one, and so do their other members.
    fn send_resumed_channel_keys(&mut self, conn: ConnectionId, client: ClientRef)
    {
        for channel in self.store.client_channels(client)
        {
            let (privkey, has_key) = match self.store.channel(channel)
            {
                Ok(c) => (c.mode.contains(ChannelMode::PRIVKEY), c.key.is_some()),
                Err(_) => continue,
            };
            if privkey
            {
                continue;
            }

            let created = !has_key;
            if created && self.create_channel_key(channel).is_err()
            {
                continue;
            }

            let packet = match self.channel_key_packet(channel)
            {
                Some(p) => p,
                None => continue,
            };
            self.send_packet(conn, packet.clone());

            if created
            {
                let route = !self.is_router() && !self.is_standalone();
                self.send_channel_key(None, channel, route);
                self.backup_send(None, packet);
            }
        }
    }

    /// A server or router tells us a client resumed somewhere else
    fn resume_from_server(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        let client_id = ResumeClientPayload::decode(&packet.payload)?.id;
        let client = match self
            .store
            .find_client_by_id(ListKind::Local, &client_id)
            .or_else(|| self.store.find_client_by_id(ListKind::Global, &client_id))
        {
            Some(c) => c,
            None =>
            {
                tracing::debug!("Resuming client {} is unknown", EntityId::from(client_id));
                return Ok(());
            }
        };

        let (status, mode, nickname, owner) = {
            let entry = self.store.client(client)?;
            (entry.data.status, entry.mode, entry.nickname.clone(), entry.router)
        };

        // Resumed and not detached again: someone is resuming the same
        // session in two places
        if status.contains(EntryStatus::RESUMED) && !mode.contains(UserMode::DETACHED)
        {
            tracing::warn!("Client {} resumed more than once, killing it", EntityId::from(client_id));
            self.kill_client(client, None, self.id.into());
            return Ok(());
        }
        if !mode.contains(UserMode::DETACHED)
        {
            tracing::debug!("Client {} is not detached", EntityId::from(client_id));
            return Ok(());
        }
        if nickname.map_or(false, |n| !utils::is_valid_identifier(&n))
        {
            return Ok(());
        }

        tracing::debug!("Client {} resumed elsewhere", EntityId::from(client_id));
        let conn_type = self.conn_type(conn);
        self.broadcast_from_cell(conn, packet);

        // The server the client was detached on learns it from us directly,
        // unless it is a router and already had the broadcast
        if self.is_router() && conn_type == ConnectionType::Server
        {
            let owner_conn = owner
                .and_then(|o| self.store.server(o).ok())
                .filter(|s| s.is_local() && s.server_type != ServerType::Router)
                .and_then(|s| s.connection());
            if let Some(owner_conn) = owner_conn
            {
                self.send_packet(owner_conn, Packet::new(PacketType::ResumeClient, packet.payload.clone()).with_src(self.id));
            }
        }

        let old_scope = self.client_scope(client);
        self.stat(StatChange::ClientRemoved(old_scope, mode));

        let new_mode = mode - UserMode::DETACHED;
        {
            let entry = self.store.client_mut(client)?;
            entry.data.public_key = None;
            entry.data.fingerprint = None;
            entry.data.connection = None;
            entry.data.status.insert(EntryStatus::RESUMED);
            entry.data.status.remove(EntryStatus::LOCAL);
            entry.set_mode(new_mode);
            entry.local_detached = false;
        }

        if let Some(new_owner) = self.resume_owner(conn_type, packet)
        {
            let (owner, local) = new_owner;
            let to_local = local && self.is_router();
            match (self.store.list_of(client), to_local)
            {
                (Some(ListKind::Global), true) => { self.store.move_client(ListKind::Global, ListKind::Local, client); }
                (Some(ListKind::Local), false) => { self.store.move_client(ListKind::Local, ListKind::Global, client); }
                _ => (),
            }
            self.store.client_mut(client)?.router = Some(owner);

            if !self.is_router()
            {
                for channel in self.store.client_channels(client)
                {
                    let global = self.channel_has_global(channel);
                    if let Ok(c) = self.store.channel_mut(channel)
                    {
                        c.global_users = global;
                    }
                }
            }
        }

        let scope = self.client_scope(client);
        self.stat(StatChange::ClientAdded(scope));
        self.stat(StatChange::UserModeChanged { local: scope.local, old: UserMode::empty(), new: new_mode });
        Ok(())
    }

    /// The server a resumed client now belongs to, and whether it is in our
    /// cell
    fn resume_owner(&self, conn_type: ConnectionType, packet: &Packet) -> Option<(ServerRef, bool)>
    {
        let server_id = match packet.src_id
        {
            Some(EntityId::Server(id)) => id,
            _ => return None,
        };
        let (owner, local) = match self.store.find_server_by_id(ListKind::Global, &server_id)
        {
            Some(s) => (s, false),
            None => (self.store.find_server_by_id(ListKind::Local, &server_id)?, true),
        };
        let owner_is_router = self.store.server(owner).ok()?.server_type == ServerType::Router;
        let local = local && !(self.is_router() && conn_type == ConnectionType::Router && owner_is_router);
        Some((owner, local))
    }

    fn suspend_resume(&mut self, conn: ConnectionId, packet: &Packet, command: Command, ident: u16)
    {
        tracing::debug!("Resume on {} waits for {:?} ({})", conn, command, ident);
        let deadline = utils::now() + self.config.pending_timeout;
        let continuation = Continuation::ResumeClient { conn, packet: packet.clone() };
        self.pending.register(command, ident, continuation, Some(deadline));
    }

    /// Refuse a resume and drop the connection that asked for it
    fn reject_resume(&mut self, conn: ConnectionId, status: StatusCode, reason: &str)
    {
        let remote = self.connections.get(&conn).map(|c| c.remote_ip);
        tracing::error!("Client on {} ({:?}) {}, closing connection", conn, remote, reason);

        let guarded: Vec<ClientRef> = self
            .store
            .clients()
            .filter(|(_, c)| c.resuming_client == Some(conn))
            .map(|(r, _)| r)
            .collect();
        for client in guarded
        {
            if let Ok(c) = self.store.client_mut(client)
            {
                c.resuming_client = None;
            }
        }

        let message = if status == StatusCode::BadNickname { "Malformed nickname, cannot resume" } else { RESUME_FAILED };
        self.disconnect(conn, status, Some(message));
    }
}
