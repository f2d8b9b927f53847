//! Removing clients from channels, and clients and servers from the network

use super::*;
use std::collections::HashSet;

impl Server
{
    pub(super) fn channel_has_global(&self, channel: ChannelRef) -> bool
    {
        self.store
            .channel_members(channel)
            .iter()
            .any(|(c, _)| self.store.client(*c).map_or(false, |c| c.router.is_some()))
    }

    pub(super) fn channel_has_local(&self, channel: ChannelRef) -> bool
    {
        self.store
            .channel_members(channel)
            .iter()
            .any(|(c, _)| self.store.client(*c).map_or(false, |c| c.router.is_none()))
    }

    pub(super) fn chanclient_scope(&self, client: ClientRef) -> Scope
    {
        let local = self.store.client(client).map_or(false, |c| c.is_local());
        Scope::new(local, self.is_router())
    }

    /// Delete a channel that lost its last interesting member. A channel
    /// with founder authentication is kept, disabled and emptied, so the
    /// founder can reclaim it. Returns true if the entry is gone.
    pub(super) fn channel_delete(&mut self, channel: ChannelRef) -> bool
    {
        let founder_auth = match self.store.channel(channel)
        {
            Ok(c) => c.mode.contains(ChannelMode::FOUNDER_AUTH),
            Err(_) => return true,
        };

        for (client, membership) in self.store.channel_members(channel)
        {
            let scope = self.chanclient_scope(client);
            self.store.remove_membership(membership);
            self.stat(StatChange::ChannelClientRemoved(scope));
        }

        if founder_auth
        {
            if let Ok(entry) = self.store.channel_mut(channel)
            {
                tracing::debug!("Keeping founder channel {} disabled", entry.name);
                entry.disabled = true;
                entry.user_count = 0;
            }
            return false;
        }

        let scope = self.channel_scope(channel);
        if let Some(list) = self.store.list_of(channel)
        {
            if let Some(entry) = self.store.del_channel(list, channel)
            {
                tracing::debug!("Deleted channel {}", entry.name);
                self.stat(StatChange::ChannelRemoved(scope));
            }
        }
        true
    }

    /// Take the membership edge out and fix up the channel's counters.
    /// Returns false if the client wasn't on the channel.
    fn unlink_member(&mut self, client: ClientRef, channel: ChannelRef) -> bool
    {
        let membership = match self.store.find_membership(client, channel)
        {
            Some(m) => m,
            None => return false,
        };
        let scope = self.chanclient_scope(client);
        let remote = self.store.client(client).map_or(false, |c| c.router.is_some());

        self.store.remove_membership(membership);
        self.stat(StatChange::ChannelClientRemoved(scope));

        let clear_global = self.is_server()
            && remote
            && self.store.channel(channel).map_or(false, |c| c.global_users)
            && !self.channel_has_global(channel);

        if let Ok(entry) = self.store.channel_mut(channel)
        {
            entry.user_count = entry.user_count.saturating_sub(1);
            if clear_global
            {
                entry.global_users = false;
            }
        }
        true
    }

    /// Remove a client from every channel it is on. `notify` tells the
    /// channels with a SIGNOFF; `keygen` rekeys what remains; `killed` also
    /// drops the client from invite lists.
    pub(super) fn remove_from_channels(
        &mut self,
        client: ClientRef,
        notify: bool,
        message: Option<&str>,
        keygen: bool,
        killed: bool,
    )
    {
        let (id, conn) = match self.store.client(client)
        {
            Ok(c) => (c.id, c.connection()),
            Err(_) => return,
        };

        let signoff = || {
            let mut notify = NotifyPayload::new(NotifyType::Signoff);
            if let Some(id) = id
            {
                notify = notify.id_arg(id);
            }
            notify.opt_arg(message.map(|m| m.as_bytes().to_vec()))
        };

        for channel in self.store.client_channels(client)
        {
            let members = self.store.channel(channel).map_or(0, |c| c.user_list.len());
            if !self.is_server() && members < 2
            {
                self.channel_delete(channel);
                continue;
            }

            self.unlink_member(client, channel);

            if self.is_server() && !self.channel_has_local(channel)
            {
                let global_users = self.store.channel(channel).map_or(false, |c| c.global_users);
                if notify && global_users
                {
                    self.send_notify_to_channel(None, channel, false, true, signoff());
                }
                self.channel_delete(channel);
                continue;
            }

            if notify
            {
                self.send_notify_to_channel(None, channel, false, true, signoff());
            }

            if killed
            {
                if let (Some(id), Ok(entry)) = (id, self.store.channel_mut(channel))
                {
                    entry.invite_list.retain(|e| *e != ListEntry::Client(id));
                }
            }

            let privkey = self.store.channel(channel).map_or(true, |c| c.mode.contains(ChannelMode::PRIVKEY));
            if keygen && !privkey
            {
                self.create_channel_key(channel).or_log("rekeying channel after removal");
                let route = self.key_route();
                self.send_channel_key(conn, channel, route);
            }
        }
    }

    /// Remove a client from one channel, telling the channel with a LEAVE
    /// notify if `notify` is set. Returns false if the channel went away.
    pub(super) fn remove_from_one_channel(
        &mut self,
        sender: Option<ConnectionId>,
        channel: ChannelRef,
        client: ClientRef,
        notify: bool,
    ) -> bool
    {
        let id = match self.store.client(client)
        {
            Ok(c) => c.id,
            Err(_) => return true,
        };
        let leave = || {
            let notify = NotifyPayload::new(NotifyType::Leave);
            match id {
                Some(id) => notify.id_arg(id),
                None => notify,
            }
        };

        let members = self.store.channel(channel).map_or(0, |c| c.user_list.len());
        if !self.is_server() && members < 2
        {
            self.channel_delete(channel);
            return false;
        }

        if !self.unlink_member(client, channel)
        {
            return true;
        }

        if self.is_server() && !self.channel_has_local(channel)
        {
            let global_users = self.store.channel(channel).map_or(false, |c| c.global_users);
            if notify && global_users
            {
                self.send_notify_to_channel(sender, channel, false, true, leave());
            }
            return !self.channel_delete(channel);
        }

        if notify
        {
            self.send_notify_to_channel(sender, channel, false, true, leave());
        }
        true
    }

    /// Remove the clients a departed server owned. `router` is the server
    /// `entry` was learned through; clients announced by it under `entry`'s
    /// address also go. With `server_signoff` the entries are deleted and
    /// the departure is announced; otherwise they become zombies.
    pub(super) fn remove_clients_by_server(&mut self, router: Option<ServerRef>, entry: ServerRef, server_signoff: bool)
    {
        let (registered, entry_id) = match self.store.server(entry)
        {
            Ok(s) => (s.is_registered(), s.id),
            Err(_) => return,
        };
        if !registered
        {
            return;
        }
        let owner = router.unwrap_or(entry);

        let victims: Vec<ClientRef> = self
            .store
            .clients()
            .filter(|(_, c)| c.is_registered())
            .filter(|(_, c)| {
                c.router == Some(entry)
                    || (c.router == Some(owner)
                        && matches!((c.id, entry_id), (Some(id), Some(sid)) if id.is_based_on(&sid)))
            })
            .map(|(r, _)| r)
            .collect();

        tracing::debug!("Removing {} clients of server {:?}", victims.len(), entry_id);

        let mut signoff_ids = Vec::new();
        let mut notified: HashSet<ClientRef> = HashSet::new();
        let mut rekey: HashSet<ChannelRef> = HashSet::new();
        let now = utils::now();

        for client in &victims
        {
            let client = *client;
            let (id, mode) = match self.store.client(client)
            {
                Ok(c) => (c.id, c.mode),
                Err(_) => continue,
            };
            if let Some(id) = id
            {
                signoff_ids.push(id);
            }

            let scope = self.client_scope(client);
            self.stat(StatChange::ClientRemoved(scope, mode));

            notified.remove(&client);
            self.remove_clients_channels(client, &victims, &mut notified, &mut rekey);

            if server_signoff
            {
                if let Some(list) = self.store.list_of(client)
                {
                    self.store.del_client(list, client);
                }
            }
            else if let Ok(c) = self.store.client_mut(client)
            {
                c.data.public_key = None;
                c.make_zombie(now, now + self.config.zombie_expiry);
            }
        }

        if server_signoff
        {
            if let Some(entry_id) = entry_id
            {
                if self.router != Some(entry)
                {
                    let notify = NotifyPayload::new(NotifyType::ServerSignoff).id_arg(entry_id);
                    self.send_notify_to_primary(notify);
                }

                let mut notify = NotifyPayload::new(NotifyType::ServerSignoff).id_arg(entry_id);
                for id in &signoff_ids
                {
                    notify = notify.id_arg(*id);
                }

                let targets: Vec<ConnectionId> = notified
                    .iter()
                    .filter_map(|c| self.store.client(*c).ok())
                    .filter_map(|c| c.connection())
                    .collect();
                for conn in targets
                {
                    self.send_notify(conn, false, notify.clone());
                }
                let packet = self.notify_packet(&notify);
                self.backup_send(None, packet);
            }
        }

        for channel in rekey
        {
            if self.store.channel(channel).is_err()
            {
                continue;
            }
            self.create_channel_key(channel).or_log("rekeying channel after server signoff");
            let privkey = self.store.channel(channel).map_or(true, |c| c.mode.contains(ChannelMode::PRIVKEY));
            if !privkey
            {
                let route = self.key_route();
                self.send_channel_key(None, channel, route);
            }
        }
    }

    /// Unlink a departing server's client from its channels, collecting
    /// the local members to notify and the channels needing a new key
    fn remove_clients_channels(
        &mut self,
        client: ClientRef,
        departing: &[ClientRef],
        notified: &mut HashSet<ClientRef>,
        rekey: &mut HashSet<ChannelRef>,
    )
    {
        for channel in self.store.client_channels(client)
        {
            let members = self.store.channel(channel).map_or(0, |c| c.user_list.len());
            if !self.is_server() && members < 2
            {
                rekey.remove(&channel);
                self.channel_delete(channel);
                continue;
            }

            self.unlink_member(client, channel);

            if self.is_server() && !self.channel_has_local(channel)
            {
                rekey.remove(&channel);
                self.channel_delete(channel);
                continue;
            }

            for (member, _) in self.store.channel_members(channel)
            {
                let local = self.store.client(member).map_or(false, |c| c.router.is_none() && c.connection().is_some());
                if local && !departing.contains(&member)
                {
                    notified.insert(member);
                }
            }
            rekey.insert(channel);
        }
    }

    /// Remove every server that was reached through `from`, directly or
    /// further down, and optionally the clients they owned
    pub(super) fn remove_servers_by_server(&mut self, from: ServerRef, remove_clients: bool)
    {
        let mut removed: Vec<ServerRef> = Vec::new();
        loop
        {
            let next: Vec<ServerRef> = self
                .store
                .servers()
                .filter(|(r, s)| {
                    *r != self.me
                        && *r != from
                        && !s.is_local()
                        && !removed.contains(r)
                        && s.router.map_or(false, |owner| owner == from || removed.contains(&owner))
                })
                .map(|(r, _)| r)
                .collect();
            if next.is_empty()
            {
                break;
            }
            removed.extend(next);
        }

        for server in removed
        {
            if remove_clients
            {
                self.remove_clients_by_server(Some(from), server, true);
            }
            let router = self.store.server(server).map_or(false, |s| s.server_type != ServerType::Server);
            let cell = self.is_router() && self.store.list_of(server) == Some(ListKind::Local);
            if let Some(list) = self.store.list_of(server)
            {
                if let Some(entry) = self.store.del_server(list, server)
                {
                    tracing::debug!("Removed server {:?} behind {}", entry.name, from);
                    self.stat(StatChange::ServerRemoved { router, scope: Scope::new(false, cell) });
                }
            }
        }
    }

    /// Kill a client network-wide: tell its channels, our router and the
    /// client itself, then remove it
    pub(super) fn kill_client(&mut self, client: ClientRef, comment: Option<&str>, killer: EntityId)
    {
        let (id, conn, owner, mode) = match self.store.client(client)
        {
            Ok(c) => (c.id, c.connection(), c.router, c.mode),
            Err(_) => return,
        };
        let id = match id
        {
            Some(id) => id,
            None => return,
        };
        tracing::info!("Killing client {}", EntityId::from(id));

        let killed = NotifyPayload::new(NotifyType::Killed)
            .id_arg(id)
            .opt_arg(comment.map(|c| c.as_bytes().to_vec()))
            .id_arg(killer);

        self.send_notify_on_channels(None, client, killed.clone());

        if let Some(primary) = self.primary_connection()
        {
            let broadcast = self.is_router();
            self.send_notify_dest(primary, broadcast, id.into(), killed.clone());
        }

        match (conn, owner.and_then(|o| self.server_route(o)))
        {
            (Some(conn), _) => self.send_notify_dest(conn, false, id.into(), killed),
            (None, Some(route)) if Some(route) != self.primary_connection() =>
            {
                self.send_notify_dest(route, false, id.into(), killed)
            }
            _ => (),
        }

        self.remove_from_channels(client, false, None, true, true);

        let scope = self.client_scope(client);
        self.stat(StatChange::ClientRemoved(scope, mode));

        if let Some(conn) = conn
        {
            self.connections.remove(&conn);
            self.transport.close(conn, StatusCode::Ok, comment.or(Some("Killed")));
            let now = utils::now();
            let expiry = self.config.zombie_expiry;
            if let Ok(c) = self.store.client_mut(client)
            {
                c.data.public_key = None;
                c.make_zombie(now, now + expiry);
            }
        }
        else if let Some(list) = self.store.list_of(client)
        {
            self.store.del_client(list, client);
        }
    }
}
