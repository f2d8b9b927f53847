//! Packet types handled outside the notify and ID distribution paths:
//! message relaying, command replies, channel keys and registration.

use super::*;
use std::convert::TryInto;

/// Longest username or nickname taken from NEW_CLIENT
const MAX_CLIENT_NAME_LEN: usize = 128;
/// Longest server name taken from NEW_SERVER
const MAX_SERVER_NAME_LEN: usize = 256;

/// Both ends of a packet exchanged between two clients
fn client_endpoints(packet: &Packet) -> Option<(ClientId, ClientId)>
{
    match (packet.src_id, packet.dst_id)
    {
        (Some(EntityId::Client(src)), Some(EntityId::Client(dst))) => Some((src, dst)),
        _ => None,
    }
}

fn is_valid_server_name(name: &str) -> bool
{
    !name.is_empty() && name.len() <= MAX_SERVER_NAME_LEN && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

impl Server
{
    // Messages

    pub(super) fn process_private_message(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        let (src, dst) = match client_endpoints(packet)
        {
            Some(ends) => ends,
            None =>
            {
                tracing::debug!("Private message not between clients, dropped");
                return Ok(());
            }
        };

        let target = self.find_client(&dst);
        let route = match self.route(&EntityId::Client(dst))
        {
            Some(route) => route,
            None =>
            {
                // A detached client cannot be reached, but it still exists
                if target.and_then(|c| self.store.client(c).ok()).map_or(false, |c| c.is_detached())
                {
                    tracing::debug!("Private message to detached client, dropped");
                    return Ok(());
                }
                tracing::debug!("No route to {}", EntityId::from(dst));
                let notify = NotifyPayload::new(NotifyType::Error)
                    .arg(vec![StatusCode::NoSuchClientId as u8])
                    .id_arg(dst);
                self.send_notify_dest(conn, false, src.into(), notify);
                return Ok(());
            }
        };

        let blocked = target
            .and_then(|c| self.store.client(c).ok())
            .map_or(false, |c| c.mode.contains(UserMode::BLOCK_PRIVMSG));
        if blocked && !packet.flags.contains(PacketFlags::PRIVMSG_KEY)
        {
            tracing::debug!("{} blocks private messages", EntityId::from(dst));
            return Ok(());
        }

        self.send_packet(route, packet.clone());
        Ok(())
    }

    /// Private message keys, key agreement and file transfer: routed as they
    /// are, or dropped
    pub(super) fn relay_client_to_client(&mut self, _conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        let (_, dst) = match client_endpoints(packet)
        {
            Some(ends) => ends,
            None => return Ok(()),
        };
        match self.route(&EntityId::Client(dst))
        {
            Some(route) => self.send_packet(route, packet.clone()),
            None => tracing::debug!("No route for {} to {}", packet.packet_type, EntityId::from(dst)),
        }
        Ok(())
    }

    pub(super) fn process_channel_message(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        let channel_id = match packet.dst_id
        {
            Some(EntityId::Channel(id)) => id,
            _ => return Err(ParseError::Invalid("channel message destination").into()),
        };

        let channel = match self.find_channel(&channel_id)
        {
            Some(c) => c,
            None =>
            {
                tracing::debug!("Message to unknown channel {}", EntityId::from(channel_id));
                let notify = NotifyPayload::new(NotifyType::Error)
                    .arg(vec![StatusCode::NoSuchChannelId as u8])
                    .id_arg(channel_id);
                match packet.src_id
                {
                    Some(src @ EntityId::Client(_)) => self.send_notify_dest(conn, false, src, notify),
                    _ => self.send_notify(conn, false, notify),
                }
                return Ok(());
            }
        };

        // Servers may speak on any channel; clients only where they are members
        if let Some(EntityId::Client(sender_id)) = packet.src_id
        {
            let local = self.store.find_client_by_id(ListKind::Local, &sender_id);
            let sender = match local.or_else(|| self.store.find_client_by_id(ListKind::Global, &sender_id))
            {
                Some(s) => s,
                None => return Ok(()),
            };
            let membership = match self.store.find_membership(sender, channel)
            {
                Some(m) => m,
                None =>
                {
                    tracing::debug!("{} is not on the channel", EntityId::from(sender_id));
                    return Ok(());
                }
            };

            let member_mode = self.store.membership(membership)?.mode;
            let channel_mode = self.store.channel(channel)?.mode;
            let op = member_mode.contains(ChannelUserMode::CHANOP);
            let founder = member_mode.contains(ChannelUserMode::CHANFO);

            if member_mode.contains(ChannelUserMode::QUIET)
                || (channel_mode.contains(ChannelMode::SILENCE_USERS) && !op && !founder)
                || (channel_mode.contains(ChannelMode::SILENCE_OPERS) && op && !founder)
            {
                tracing::trace!("{} is silenced on the channel", EntityId::from(sender_id));
                return Ok(());
            }

            // Our own client's message coming back at us from another router
            if self.is_router() && self.conn_type(conn) == ConnectionType::Router && local.is_some()
            {
                tracing::debug!("Router rerouted a local client's channel message, dropped");
                return Ok(());
            }
        }

        self.send_to_channel(Some(conn), channel, packet.clone(), true, true);
        Ok(())
    }

    pub(super) fn process_channel_key(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        let conn_type = self.conn_type(conn);
        if conn_type == ConnectionType::Client || !matches!(packet.src_id, Some(EntityId::Server(_)))
        {
            tracing::debug!("Channel key not from a server, dropped");
            return Ok(());
        }
        if self.is_router() && conn_type == ConnectionType::Router
        {
            return Ok(());
        }

        let payload = ChannelKeyPayload::decode(&packet.payload)?;
        let channel = match self.find_channel(&payload.id)
        {
            Some(c) => c,
            None =>
            {
                tracing::debug!("Key for unknown channel {}", EntityId::from(payload.id));
                return Ok(());
            }
        };
        {
            let entry = self.store.channel_mut(channel)?;
            let iv = entry.key.take().map(|k| k.iv).unwrap_or_default();
            entry.cipher = Some(payload.cipher.clone());
            entry.key = Some(ChannelKey { cipher: payload.cipher, key: payload.key, iv });
            tracing::debug!("Saved new key for channel {}", entry.name);
        }

        self.send_channel_key(Some(conn), channel, false);
        if !self.is_backup()
        {
            if let Some(key) = self.channel_key_packet(channel)
            {
                self.backup_send(Some(conn), key);
            }
        }
        Ok(())
    }

    // Command replies

    /// A reply to a command we or one of our clients sent. Replies to us
    /// feed the cache and wake whatever was waiting on them.
    pub(super) fn process_command_reply(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        let relay_to = match packet.dst_id
        {
            Some(EntityId::Client(id)) =>
            {
                let client = match self.store.find_client_by_id(ListKind::Local, &id)
                {
                    Some(c) => c,
                    None =>
                    {
                        tracing::debug!("Command reply for unknown client {}, dropped", EntityId::from(id));
                        return Ok(());
                    }
                };
                self.store.client(client)?.connection()
            }
            Some(EntityId::Server(id)) if id == self.id => None,
            _ =>
            {
                tracing::debug!("Command reply not for us, dropped");
                return Ok(());
            }
        };

        let reply = CommandPayload::decode(&packet.payload)?;
        tracing::debug!("{} reply ({}) from {}", reply.command, reply.ident, conn);

        if self.conn_type(conn) != ConnectionType::Client && reply.status() == Some(StatusCode::Ok)
        {
            let cached = match reply.command
            {
                Command::Whois => self.cache_whois_reply(conn, &reply),
                Command::Getkey => self.cache_getkey_reply(&reply),
                _ => Ok(()),
            };
            cached.or_log(format!("caching {} reply", reply.command));
        }

        for continuation in self.pending.take(reply.command, reply.ident)
        {
            self.run_continuation(continuation, Some(&reply));
        }

        if let Some(client_conn) = relay_to
        {
            self.send_packet(client_conn, packet.clone());
        }
        Ok(())
    }

    fn cache_whois_reply(&mut self, conn: ConnectionId, reply: &CommandPayload) -> HandlerResult
    {
        let missing = ParseError::Invalid("WHOIS reply");
        let id = match IdPayload::decode(reply.args.get(2).ok_or(missing)?)?
        {
            EntityId::Client(id) => id,
            other => return Err(ParseError::UnexpectedIdType(other.id_type()).into()),
        };
        let text = |arg: u8, what: &'static str| -> Result<String, ParseError> {
            let data = reply.args.get(arg).ok_or(ParseError::Invalid(what))?;
            utf8(data, what)
        };
        let nickname = text(3, "nickname")?;
        let username = text(4, "username")?;
        let realname = text(5, "real name")?;
        let mode = reply
            .args
            .get(7)
            .filter(|m| m.len() == 4)
            .map(|m| UserMode::from_bits_truncate(u32::from_be_bytes([m[0], m[1], m[2], m[3]])))
            .unwrap_or_else(UserMode::empty);
        let fingerprint: Option<[u8; 20]> = reply.args.get(9).and_then(|f| f.try_into().ok());

        // Replies carry nick@server for remote clients
        let nickname = nickname.split('@').next().unwrap_or_default().to_string();
        if !utils::is_valid_identifier(&nickname)
        {
            tracing::debug!("WHOIS reply with malformed nickname {:?}", nickname);
            return Ok(());
        }

        let client = match self.find_client(&id)
        {
            Some(c) => c,
            None =>
            {
                // Routers already know every client there is
                if !self.is_server()
                {
                    return Ok(());
                }
                let router = self.conn_server(conn);
                let mut entry = ClientEntry::new(Some(nickname), Some(username), Some(realname), Some(id), router, utils::now());
                entry.data.status.insert(EntryStatus::REGISTERED | EntryStatus::RESOLVED);
                entry.data.fingerprint = fingerprint;
                entry.set_mode(mode);
                self.store.add_client(ListKind::Global, entry)?;
                tracing::debug!("Cached {} from WHOIS", EntityId::from(id));

                self.stat(StatChange::ClientAdded(Scope::remote()));
                self.stat(StatChange::UserModeChanged { local: false, old: UserMode::empty(), new: mode });
                return Ok(());
            }
        };

        let list = self.store.list_of(client).ok_or(LookupError::NoSuchClient(client))?;
        self.store.update_client(list, client, id, Some(nickname));

        let (old, local) = {
            let entry = self.store.client(client)?;
            (entry.mode, entry.is_local())
        };
        self.stat(StatChange::UserModeChanged { local, old, new: mode });

        let entry = self.store.client_mut(client)?;
        entry.username = Some(username);
        entry.userinfo = Some(realname);
        entry.set_mode(mode);
        if fingerprint.is_some()
        {
            entry.data.fingerprint = fingerprint;
        }
        entry.data.status.insert(EntryStatus::RESOLVED);
        entry.data.status.remove(EntryStatus::RESOLVING);
        Ok(())
    }

    fn cache_getkey_reply(&mut self, reply: &CommandPayload) -> HandlerResult
    {
        let id = IdPayload::decode(reply.args.get(2).ok_or(ParseError::Invalid("GETKEY reply"))?)?;
        let key = match reply.args.get(3)
        {
            Some(data) => PublicKey::decode(data)?,
            None => return Ok(()),
        };
        let fingerprint = self.keys.fingerprint(&key);

        match id
        {
            EntityId::Client(id) =>
            {
                let entry = match self.find_client(&id)
                {
                    Some(client) => self.store.client_mut(client)?,
                    None => return Ok(()),
                };
                if entry.data.public_key.is_none()
                {
                    tracing::debug!("Cached public key of {}", EntityId::from(id));
                    entry.data.public_key = Some(key);
                    entry.data.fingerprint = Some(fingerprint);
                }
            }
            EntityId::Server(id) =>
            {
                let entry = match self.find_server(&id)
                {
                    Some(server) => self.store.server_mut(server)?,
                    None => return Ok(()),
                };
                entry.data.public_key = Some(key);
                entry.data.fingerprint = Some(fingerprint);
            }
            EntityId::Channel(_) => return Err(ParseError::UnexpectedIdType(IdType::Channel).into()),
        }
        Ok(())
    }

    // Registration

    pub(super) fn process_new_client(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        if self.conn_type(conn) != ConnectionType::Client
        {
            return Ok(());
        }
        let client = self.conn_client(conn).ok_or(LookupError::NoSuchConnection(conn))?;
        if self.store.client(client)?.is_registered()
        {
            tracing::debug!("Client on {} is already registered", conn);
            return Ok(());
        }

        let payload = match NewClientPayload::decode(&packet.payload)
        {
            Ok(p) if !p.username.is_empty() => p,
            _ =>
            {
                self.disconnect(conn, StatusCode::IncompleteInformation, Some("Incomplete client information"));
                return Ok(());
            }
        };

        let mut username = utils::truncate(payload.username, MAX_CLIENT_NAME_LEN);
        let nickname = match payload.nickname
        {
            Some(nick) => utils::truncate(nick, MAX_CLIENT_NAME_LEN),
            None => username.split('@').next().unwrap_or_default().to_string(),
        };
        if !utils::is_valid_identifier(&nickname)
        {
            self.disconnect(conn, StatusCode::IncompleteInformation, Some("Malformed nickname"));
            return Ok(());
        }

        let (hostname, remote_ip) = match self.connections.get(&conn)
        {
            Some(c) => (c.hostname.clone(), c.remote_ip),
            None => return Ok(()),
        };
        match username.split_once('@')
        {
            // A client may name its host, but only the one it connects from
            Some((_, host)) =>
            {
                if hostname.as_deref().map_or(false, |h| h != host)
                {
                    self.disconnect(conn, StatusCode::IncompleteInformation, Some("Incomplete client information"));
                    return Ok(());
                }
            }
            None =>
            {
                let host = hostname.unwrap_or_else(|| remote_ip.to_string());
                username = format!("{}@{}", username, host);
            }
        }

        let id = match idgen::create_client_id(&self.store, &self.id, &mut self.rng, self.hasher.as_ref(), &nickname)
        {
            Ok(id) => id,
            Err(e) =>
            {
                tracing::info!("No client id for {:?}: {}", nickname, e);
                self.disconnect(conn, StatusCode::BadNickname, Some("Bad nickname"));
                return Ok(());
            }
        };

        if !self.store.update_client(ListKind::Local, client, id, Some(nickname))
        {
            self.disconnect(conn, StatusCode::ResourceLimit, None);
            return Ok(());
        }
        {
            let entry = self.store.client_mut(client)?;
            entry.userinfo = Some(if payload.realname.is_empty() { username.clone() } else { payload.realname });
            entry.username = Some(username);
            entry.data.status.insert(EntryStatus::REGISTERED);
            tracing::info!("Client {:?} registered as {}", entry.nickname, EntityId::from(id));
        }

        let new_id = Packet::new(PacketType::NewId, IdPayload::encode(&id.into())).with_src(self.id);
        self.send_to_primary(new_id.clone());
        self.backup_send(None, new_id);

        self.send_new_id(conn, false, id.into());
        Ok(())
    }

    pub(super) fn process_new_server(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        let conn_type = self.conn_type(conn);
        if !matches!(conn_type, ConnectionType::Server | ConnectionType::Router)
        {
            return Ok(());
        }
        let server = match self.conn_server(conn)
        {
            Some(s) => s,
            None =>
            {
                self.disconnect(conn, StatusCode::NotAuthenticated, None);
                return Ok(());
            }
        };
        if self.store.server(server)?.is_registered()
        {
            self.disconnect(conn, StatusCode::OperationAllowed, Some("Too many registrations"));
            return Ok(());
        }

        let payload = match NewServerPayload::decode(&packet.payload)
        {
            Ok(p) => p,
            Err(_) =>
            {
                self.disconnect(conn, StatusCode::IncompleteInformation, None);
                return Ok(());
            }
        };
        let name = utils::truncate(payload.name, MAX_SERVER_NAME_LEN);
        let id = payload.id;

        let remote_ip = self.connections.get(&conn).map(|c| c.remote_ip);
        if !remote_ip.map_or(false, |ip| idgen::is_valid_server_id(&id, &ip))
        {
            tracing::warn!("Server {} sent an id not derived from {:?}", name, remote_ip);
            self.disconnect(conn, StatusCode::BadServerId, None);
            return Ok(());
        }

        if let Some(existing) = self.find_server(&id).filter(|s| *s != server)
        {
            if self.store.server(existing)?.is_local()
            {
                self.disconnect(conn, StatusCode::OperationAllowed, Some("Too many registrations"));
                return Ok(());
            }
            self.replace_stale_server(existing, server)?;
        }

        if !is_valid_server_name(&name)
        {
            self.disconnect(conn, StatusCode::OperationAllowed, Some("Malformed server name"));
            return Ok(());
        }

        let list = self.store.list_of(server).ok_or(LookupError::NoSuchServer(server))?;
        if !self.store.update_server(list, server, id, name)
        {
            self.disconnect(conn, StatusCode::OperationAllowed, Some("Too many registrations"));
            return Ok(());
        }

        let server_type = {
            let entry = self.store.server_mut(server)?;
            entry.data.status.insert(EntryStatus::REGISTERED);
            // A backup only serves its cell once it stands in for the primary
            if self.server_type == ServerType::BackupRouter && conn_type == ConnectionType::Server && !self.backup_primary
            {
                entry.data.status.insert(EntryStatus::DISABLED);
            }
            tracing::info!("Server {:?} registered as {}", entry.name, EntityId::from(id));
            entry.server_type
        };
        self.stat(StatChange::ServerAdded {
            router: server_type != ServerType::Server,
            scope: Scope::new(true, self.is_router() && conn_type == ConnectionType::Server),
        });

        if self.is_router() && conn_type == ConnectionType::Router && self.router.is_none()
        {
            tracing::info!("Router on {} becomes our primary route", conn);
            self.router = Some(server);
            if let Ok(me) = self.store.server_mut(self.me)
            {
                me.router = Some(server);
            }
        }

        if self.is_router()
        {
            if let Some(primary) = self.primary_connection().filter(|p| *p != conn)
            {
                self.send_new_id(primary, true, id.into());
            }
            let new_id = Packet::new(PacketType::NewId, IdPayload::encode(&id.into())).with_src(self.id);
            self.backup_send(Some(conn), new_id);
        }
        Ok(())
    }

    /// A server registering under an ID we hold a remote entry for takes
    /// over everything that entry owned
    fn replace_stale_server(&mut self, stale: ServerRef, server: ServerRef) -> HandlerResult
    {
        let clients: Vec<ClientRef> = self.store.clients().filter(|(_, c)| c.router == Some(stale)).map(|(r, _)| r).collect();
        let servers: Vec<ServerRef> = self.store.servers().filter(|(_, s)| s.router == Some(stale)).map(|(r, _)| r).collect();
        let channels: Vec<ChannelRef> = self.store.channels().filter(|(_, c)| c.router == Some(stale)).map(|(r, _)| r).collect();

        for client in clients
        {
            self.store.client_mut(client)?.router = Some(server);
        }
        for s in servers
        {
            self.store.server_mut(s)?.router = Some(server);
        }
        for channel in channels
        {
            self.store.channel_mut(channel)?.router = Some(server);
        }

        let (server_type, cell) = {
            let entry = self.store.server(stale)?;
            (entry.server_type, self.is_router() && self.store.list_of(stale) == Some(ListKind::Local))
        };
        if let Some(list) = self.store.list_of(stale)
        {
            tracing::debug!("Replacing stale entry {}", stale);
            self.store.del_server(list, stale);
            self.stat(StatChange::ServerRemoved { router: server_type != ServerType::Server, scope: Scope::new(false, cell) });
        }
        Ok(())
    }

    // Connection authentication

    /// A client asking which authentication its connection will need
    pub(super) fn process_connection_auth_request(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        if matches!(packet.src_id, Some(id) if id.id_type() != IdType::Client)
        {
            return Ok(());
        }
        let request = ConnectionAuthPayload::decode(&packet.payload)?;
        if request.conn_type != 1
        {
            tracing::debug!("Connection auth request for type {}, dropped", request.conn_type);
            return Ok(());
        }

        let method = match self.connections.get(&conn)
        {
            Some(c) => self.config.client_auth_method(c.hostname.as_deref(), &c.remote_ip).unwrap_or(AuthMethod::None),
            None => return Ok(()),
        };
        tracing::debug!("Client on {} authenticates with {:?}", conn, method);

        let reply = ConnectionAuthPayload { conn_type: request.conn_type, method: method as u16 };
        self.send_packet(conn, Packet::new(PacketType::ConnectionAuthRequest, reply.encode()));
        Ok(())
    }
}
