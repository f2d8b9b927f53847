use super::*;
use crate::server::channel_util::{check_cmode_rights, inviteban_process};

impl Server
{
    /// Look up a notify's channel, global list first
    fn notify_channel_by_id(&self, id: &ChannelId) -> Option<ChannelRef>
    {
        let found = self
            .store
            .find_channel_by_id(ListKind::Global, id)
            .or_else(|| self.store.find_channel_by_id(ListKind::Local, id));
        if found.is_none()
        {
            tracing::debug!("Notify for unknown channel {}", EntityId::from(*id));
        }
        found
    }

    pub(super) fn notify_join(&mut self, n: &Notify) -> HandlerResult
    {
        let channel_id = n.payload.channel_id(2)?;
        let channel = match self.notify_channel_by_id(&channel_id)
        {
            Some(c) => c,
            None => return Ok(()),
        };

        let client_id = n.payload.client_id(1)?;
        let client = match self.find_registered_client(&client_id)
        {
            Some(c) => c,
            None =>
            {
                if !self.is_server()
                {
                    tracing::debug!("JOIN for unknown client {}, dropped", EntityId::from(client_id));
                    return Ok(());
                }
                self.drop_zombie(&client_id);
                let mut entry = ClientEntry::new(None, None, None, Some(client_id), self.conn_server(n.conn), utils::now());
                entry.data.status.insert(EntryStatus::REGISTERED);
                let r = self.store.add_client(ListKind::Global, entry)?;
                let scope = self.client_scope(r);
                self.stat(StatChange::ClientAdded(scope));
                r
            }
        };

        if self.store.find_membership(client, channel).is_some()
        {
            tracing::debug!("Client already on channel");
            return Ok(());
        }

        // Relayed before the membership exists so the joiner isn't sent its own join
        self.relay_notify_to_channel(n, Some(n.conn), channel, true);

        let founder_eligible = !self.is_router() || n.conn_type == ConnectionType::Router;
        let (founder_auth, empty) = {
            let entry = self.store.channel(channel)?;
            (entry.mode.contains(ChannelMode::FOUNDER_AUTH), entry.user_list.is_empty())
        };
        let mode = if founder_eligible && !founder_auth && empty
        {
            tracing::debug!("Client {} is founder", EntityId::from(client_id));
            ChannelUserMode::CHANOP | ChannelUserMode::CHANFO
        }
        else
        {
            ChannelUserMode::empty()
        };

        self.store.add_membership(client, channel, mode)?;
        let global = !self.is_router() && n.conn_type == ConnectionType::Router;
        let entry = self.store.channel_mut(channel)?;
        tracing::debug!("Joining client to channel {}", entry.name);
        if global
        {
            entry.global_users = true;
        }
        entry.user_count += 1;
        entry.disabled = false;

        let scope = self.chanclient_scope(client);
        self.stat(StatChange::ChannelClientAdded(scope));
        Ok(())
    }

    pub(super) fn notify_leave(&mut self, n: &Notify) -> HandlerResult
    {
        let channel = match self.notify_channel_by_id(&n.dst_channel()?)
        {
            Some(c) => c,
            None => return Ok(()),
        };
        let client = match self.notify_client(n, 1)?
        {
            Some(c) => c,
            None => return Ok(()),
        };
        if self.store.find_membership(client, channel).is_none()
        {
            return Ok(());
        }

        self.relay_notify_to_channel(n, Some(n.conn), channel, true);
        self.remove_from_one_channel(Some(n.conn), channel, client, false);
        Ok(())
    }

    pub(super) fn notify_topic_set(&mut self, n: &Notify) -> HandlerResult
    {
        let client = match n.payload.entity_id(1)?
        {
            EntityId::Client(id) => match self.find_registered_client(&id)
            {
                Some(c) => Some(c),
                None => return Ok(()),
            },
            _ => None,
        };
        let topic = n.payload.string(2)?.ok_or(ParseError::MissingArgument(NotifyType::TopicSet, 2))?;

        let channel = match self.notify_channel_by_id(&n.dst_channel()?)
        {
            Some(c) => c,
            None => return Ok(()),
        };

        let (current, restricted) = {
            let entry = self.store.channel(channel)?;
            (entry.topic.clone(), entry.mode.contains(ChannelMode::TOPIC))
        };
        if current.as_deref() == Some(topic.as_str())
        {
            tracing::debug!("Topic is already set and same");
            return Ok(());
        }

        if let Some(client) = client
        {
            let membership = match self.store.find_membership(client, channel)
            {
                Some(m) => m,
                None => return Ok(()),
            };
            if restricted && !self.store.membership(membership)?.mode.is_privileged()
            {
                tracing::debug!("Topic change is not allowed");
                return Ok(());
            }
        }

        self.store.channel_mut(channel)?.topic = Some(topic);
        self.relay_notify_to_channel(n, None, channel, true);
        Ok(())
    }

    pub(super) fn notify_cmode_change(&mut self, n: &Notify) -> HandlerResult
    {
        let client = match n.payload.entity_id(1)?
        {
            EntityId::Client(id) => match self.find_registered_client(&id)
            {
                Some(c) => Some(c),
                None => return Ok(()),
            },
            _ => None,
        };

        let channel = match self.notify_channel_by_id(&n.dst_channel()?)
        {
            Some(c) => c,
            None => return Ok(()),
        };

        let requested = n.payload.u32(2)?.ok_or(ParseError::MissingArgument(NotifyType::CmodeChange, 2))?;
        let mut mode = ChannelMode::from_bits_truncate(requested);
        let from_primary = Some(n.conn) == self.primary_connection();

        let (current, has_founder_key) = {
            let entry = self.store.channel(channel)?;
            (entry.mode, entry.founder_key.is_some())
        };

        if current == mode
        {
            tracing::debug!("Mode is changed already");
            return self.cmode_unchanged(n, channel, mode, from_primary, has_founder_key);
        }

        if let Some(client) = client
        {
            let membership = match self.store.find_membership(client, channel)
            {
                Some(m) => m,
                None => return Ok(()),
            };
            let member_mode = self.store.membership(membership)?.mode;
            if !check_cmode_rights(current, mode, member_mode)
            {
                tracing::debug!("CMODE change is not allowed");
                return self.send_cmode(n.conn, channel, current, true, None);
            }
        }
        else if self.is_router() && !from_primary
        {
            if current.contains(ChannelMode::FOUNDER_AUTH) && !mode.contains(ChannelMode::FOUNDER_AUTH)
            {
                tracing::debug!("Server may not remove founder mode");
                return self.send_cmode(n.conn, channel, current, true, None);
            }

            if mode.contains(ChannelMode::FOUNDER_AUTH)
            {
                let sender = self.conn_server(n.conn);
                let foreign_founder = self.store.channel_members(channel).iter().any(|(member, membership)| {
                    let founder = self.store.membership(*membership).map_or(false, |m| m.mode.contains(ChannelUserMode::CHANFO));
                    let owner = self.store.client(*member).ok().and_then(|c| c.router);
                    founder && owner != sender
                });
                if foreign_founder
                {
                    tracing::debug!("Founder already on channel from another server");
                    return self.send_cmode(n.conn, channel, current, true, None);
                }
            }
        }

        if current.contains(ChannelMode::PRIVKEY) && !mode.contains(ChannelMode::PRIVKEY)
        {
            self.create_channel_key(channel)?;
            let route = self.key_route();
            self.send_channel_key(None, channel, route);
        }

        let hmac = n.payload.string(4)?;
        let passphrase = n.payload.string(5)?;
        {
            let entry = self.store.channel_mut(channel)?;
            if let Some(hmac) = hmac
            {
                entry.hmac_name = Some(hmac);
            }
            if let Some(passphrase) = passphrase
            {
                entry.passphrase = Some(passphrase);
            }
        }

        if let (Some(data), true) = (n.payload.get(6), mode.contains(ChannelMode::FOUNDER_AUTH))
        {
            tracing::debug!("Founder public key received");
            let founder_key = PublicKey::decode(data).ok();
            let rejected = founder_key.is_none();
            self.store.channel_mut(channel)?.founder_key = founder_key;
            if rejected
            {
                mode.remove(ChannelMode::FOUNDER_AUTH);
                self.send_cmode(n.conn, channel, mode, false, None)?;
            }
        }

        if mode.contains(ChannelMode::FOUNDER_AUTH) && self.is_router() && self.store.channel(channel)?.founder_key.is_none()
        {
            tracing::debug!("Founder mode without a founder key");
            mode.remove(ChannelMode::FOUNDER_AUTH);
            self.send_cmode(n.conn, channel, mode, false, None)?;
        }

        if let (Some(list), true) = (n.payload.get(7), mode.contains(ChannelMode::CHANNEL_AUTH))
        {
            if self.set_channel_pk_list(n.conn, channel, list) == StatusCode::OperationAllowed
            {
                let ours = self.channel_pk_announcement(channel);
                self.send_cmode(n.conn, channel, mode, false, ours)?;
            }
        }

        if let (Ok(Some(limit)), true) = (n.payload.u32(8), mode.contains(ChannelMode::ULIMIT))
        {
            self.store.channel_mut(channel)?.user_limit = limit;
        }

        self.relay_notify_to_channel(n, None, channel, true);

        let entry = self.store.channel_mut(channel)?;
        entry.mode = mode;
        if !mode.contains(ChannelMode::FOUNDER_AUTH)
        {
            entry.founder_key = None;
        }
        if !mode.contains(ChannelMode::CHANNEL_AUTH)
        {
            entry.channel_pubkeys.clear();
        }
        Ok(())
    }

    /// A CMODE_CHANGE carrying the mode we already have. Only the founder
    /// key and the public key list may still need syncing.
    fn cmode_unchanged(&mut self, n: &Notify, channel: ChannelRef, mode: ChannelMode, from_primary: bool, has_founder_key: bool) -> HandlerResult
    {
        if !self.is_server() && !from_primary && mode.contains(ChannelMode::FOUNDER_AUTH) && has_founder_key
        {
            tracing::debug!("Sending founder public key to server");
            self.send_cmode(n.conn, channel, mode, true, None)?;
        }

        if !self.is_router() && from_primary && mode.contains(ChannelMode::FOUNDER_AUTH)
        {
            let data = match n.payload.get(6)
            {
                Some(data) => data,
                None => return Ok(()),
            };
            tracing::debug!("Founder public key received from router");
            self.store.channel_mut(channel)?.founder_key = PublicKey::decode(data).ok();
        }

        if self.is_server() && from_primary && mode.contains(ChannelMode::CHANNEL_AUTH)
        {
            let list = match n.payload.get(7)
            {
                Some(list) => list,
                None => return Ok(()),
            };
            tracing::debug!("Channel public key list received from router");
            self.set_channel_pk_list(n.conn, channel, list);

            if let Some(pubkeys) = self.channel_pk_announcement(channel)
            {
                let notify = {
                    let entry = self.store.channel(channel)?;
                    self.cmode_notify(entry, entry.mode, None, Some(pubkeys))
                };
                self.send_notify_to_channel(None, channel, false, true, notify);
            }
        }
        Ok(())
    }

    pub(super) fn notify_cumode_change(&mut self, n: &Notify) -> HandlerResult
    {
        let client = match n.payload.entity_id(1)?
        {
            EntityId::Client(id) => match self.find_registered_client(&id)
            {
                Some(c) => Some(c),
                None => return Ok(()),
            },
            _ => None,
        };

        let channel = match self.notify_channel_by_id(&n.dst_channel()?)
        {
            Some(c) => c,
            None => return Ok(()),
        };

        let requested = n.payload.u32(2)?.ok_or(ParseError::MissingArgument(NotifyType::CumodeChange, 2))?;
        let mut mode = ChannelUserMode::from_bits_truncate(requested);

        let target = match self.notify_client(n, 3)?
        {
            Some(c) => c,
            None => return Ok(()),
        };

        if let Some(client) = client
        {
            let membership = match self.store.find_membership(client, channel)
            {
                Some(m) => m,
                None => return Ok(()),
            };
            if client != target && self.is_router()
            {
                if !self.store.membership(membership)?.mode.is_privileged()
                {
                    tracing::debug!("CUMODE change is not allowed");
                    return Ok(());
                }
                let target_membership = match self.store.find_membership(target, channel)
                {
                    Some(m) => m,
                    None => return Ok(()),
                };
                if self.store.membership(target_membership)?.mode.contains(ChannelUserMode::CHANFO)
                {
                    tracing::debug!("Founder's mode cannot be changed");
                    return Ok(());
                }
            }
        }

        let membership = match self.store.find_membership(target, channel)
        {
            Some(m) => m,
            None => return Ok(()),
        };
        let current = self.store.membership(membership)?.mode;

        if self.is_server() && current == mode
        {
            tracing::debug!("Mode is changed already");
            return Ok(());
        }

        let from_primary = Some(n.conn) == self.primary_connection();
        if mode.contains(ChannelUserMode::CHANFO) && !current.contains(ChannelUserMode::CHANFO) && self.is_router() && !from_primary
        {
            let (founder_auth, founder_key) = {
                let entry = self.store.channel(channel)?;
                (entry.mode.contains(ChannelMode::FOUNDER_AUTH), entry.founder_key.clone())
            };

            let has_founder = self
                .store
                .channel_members(channel)
                .iter()
                .any(|(_, m)| self.store.membership(*m).map_or(false, |m| m.mode.contains(ChannelUserMode::CHANFO)));

            // The founder key is taken on trust from the relaying server; no
            // signature travels with it.
            let key_mismatch = founder_key.map_or(false, |ours| {
                n.payload.get(4).and_then(|data| PublicKey::decode(data).ok()).as_ref() != Some(&ours)
            });

            if (client.is_some() && !founder_auth) || has_founder || key_mismatch
            {
                tracing::debug!("Founder rights refused");
                mode.remove(ChannelUserMode::CHANFO);
                self.store.membership_mut(membership)?.mode = mode;
                return self.force_cumode_change(Some(n.conn), channel, membership, mode);
            }
        }

        if !self.is_server() && current == mode
        {
            tracing::debug!("Mode is changed already");
            return Ok(());
        }

        self.store.membership_mut(membership)?.mode = mode;
        self.relay_notify_to_channel(n, Some(n.conn), channel, true);
        Ok(())
    }

    pub(super) fn notify_invite(&mut self, n: &Notify) -> HandlerResult
    {
        if n.dst_is_client()
        {
            return Ok(());
        }
        let channel = match self.notify_channel_by_id(&n.payload.channel_id(1)?)
        {
            Some(c) => c,
            None => return Ok(()),
        };
        self.update_inviteban(n, channel, 4, 5, |c| &mut c.invite_list)
    }

    pub(super) fn notify_ban(&mut self, n: &Notify) -> HandlerResult
    {
        let channel = match self.notify_channel_by_id(&n.payload.channel_id(1)?)
        {
            Some(c) => c,
            None => return Ok(()),
        };
        self.update_inviteban(n, channel, 2, 3, |c| &mut c.ban_list)
    }

    /// Apply the action and list carried in arguments `action_arg` and
    /// `list_arg` to one of a channel's lists. Routers pass the notify on to
    /// their servers on the channel, never to clients.
    fn update_inviteban(
        &mut self,
        n: &Notify,
        channel: ChannelRef,
        action_arg: u8,
        list_arg: u8,
        list: impl FnOnce(&mut ChannelEntry) -> &mut Vec<ListEntry>,
    ) -> HandlerResult
    {
        let action = match n.payload.get(action_arg)
        {
            Some([action]) => *action,
            _ => return Ok(()),
        };
        let data = match n.payload.get(list_arg)
        {
            Some(data) if data.len() >= 2 => data,
            _ => return Ok(()),
        };
        let entries = decode_entry_list_lenient(data)?;

        inviteban_process(list(self.store.channel_mut(channel)?), action, entries);

        if self.is_router()
        {
            self.relay_notify_to_channel(n, Some(n.conn), channel, false);
        }
        Ok(())
    }

    pub(super) fn notify_kicked(&mut self, n: &Notify) -> HandlerResult
    {
        let channel = match self.notify_channel_by_id(&n.dst_channel()?)
        {
            Some(c) => c,
            None => return Ok(()),
        };

        let client_id = n.payload.client_id(1)?;
        let client = match self.find_registered_client(&client_id)
        {
            Some(c) => c,
            None => return Ok(()),
        };
        let membership = match self.store.find_membership(client, channel)
        {
            Some(m) => m,
            None => return Ok(()),
        };
        if self.store.membership(membership)?.mode.contains(ChannelUserMode::CHANFO)
        {
            tracing::debug!("Founder cannot be kicked");
            return Ok(());
        }

        let kicker = match self.notify_client(n, 3)?
        {
            Some(c) => c,
            None => return Ok(()),
        };
        let kicker_membership = match self.store.find_membership(kicker, channel)
        {
            Some(m) => m,
            None => return Ok(()),
        };
        if !self.store.membership(kicker_membership)?.mode.is_privileged()
        {
            tracing::debug!("Kicking is not allowed");
            return Ok(());
        }

        self.relay_notify_to_channel(n, Some(n.conn), channel, true);

        {
            let entry = self.store.channel_mut(channel)?;
            if !entry.invite_list.is_empty()
            {
                inviteban_process(&mut entry.invite_list, 1, vec![ListEntry::Client(client_id)]);
            }
        }

        self.remove_from_one_channel(Some(n.conn), channel, client, false);
        Ok(())
    }

    pub(super) fn notify_channel_change(&mut self, n: &Notify) -> HandlerResult
    {
        if n.conn_type != ConnectionType::Router
        {
            return Ok(());
        }

        let old_id = n.payload.channel_id(1)?;
        let channel = match self.find_channel(&old_id)
        {
            Some(c) => c,
            None =>
            {
                tracing::debug!("Notify for unknown channel {}", EntityId::from(old_id));
                return Ok(());
            }
        };

        self.relay_notify_to_channel(n, Some(n.conn), channel, true);

        let new_id = n.payload.channel_id(2)?;
        tracing::debug!("Channel id {} changes to {}", EntityId::from(old_id), EntityId::from(new_id));

        let list = match self.store.list_of(channel)
        {
            Some(list) => list,
            None => return Ok(()),
        };
        if !self.store.update_channel(list, channel, new_id)
        {
            return Ok(());
        }

        // Re-announce under the new ID
        self.send_new_channel(n.conn, false, channel)?;
        self.announce_channel(n.conn, channel)?;

        if !self.store.channel(channel)?.mode.contains(ChannelMode::PRIVKEY)
        {
            self.create_channel_key(channel)?;
            self.send_channel_key(Some(n.conn), channel, false);
        }
        Ok(())
    }
}
