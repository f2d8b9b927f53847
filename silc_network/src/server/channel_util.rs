//! Channel rule checks shared by the notify processors

use super::*;
use crate::pattern::Pattern;

/// Whether a member holding `member_mode` may change a channel's mode from
/// `current` to `requested`. Operators may not touch founder-only modes,
/// and never the private key mode.
pub(super) fn check_cmode_rights(current: ChannelMode, requested: ChannelMode, member_mode: ChannelUserMode) -> bool
{
    let is_op = member_mode.contains(ChannelUserMode::CHANOP);
    let is_fo = member_mode.contains(ChannelUserMode::CHANFO);

    if !is_op && !is_fo
    {
        return false;
    }
    if is_fo
    {
        return true;
    }

    if requested.contains(ChannelMode::PRIVKEY) || current.contains(ChannelMode::PRIVKEY)
    {
        return false;
    }
    let changed = current ^ requested;
    !changed.intersects(ChannelMode::founder_only())
}

/// Apply an invite or ban list change. Action 0 (add) and 3 (announce) add
/// entries not already covered; 1 deletes the first match of each entry.
pub(super) fn inviteban_process(list: &mut Vec<ListEntry>, action: u8, entries: Vec<ListEntry>)
{
    match action
    {
        0x00 | 0x03 =>
        {
            for entry in entries
            {
                let present = match &entry
                {
                    ListEntry::Pattern(p) if p.is_empty() => true,
                    ListEntry::Pattern(p) => list.iter().any(|e| matches!(e, ListEntry::Pattern(existing) if Pattern::new(existing.as_str()).matches(p))),
                    other => list.contains(other),
                };
                if !present
                {
                    list.push(entry);
                }
            }
        }
        0x01 =>
        {
            for entry in entries
            {
                let position = match &entry
                {
                    ListEntry::Pattern(p) => list.iter().position(|e| matches!(e, ListEntry::Pattern(existing) if Pattern::new(existing.as_str()).matches(p))),
                    other => list.iter().position(|e| e == other),
                };
                if let Some(i) = position
                {
                    list.remove(i);
                }
            }
        }
        other => tracing::debug!("Unknown invite/ban action {}", other),
    }
}

impl Server
{
    /// Replace or amend a channel's authorized public key list. A router
    /// refuses an announced list from anyone but its primary route when it
    /// already has one, answering [`StatusCode::OperationAllowed`] so the
    /// caller can enforce its own list.
    pub(super) fn set_channel_pk_list(&mut self, sender: ConnectionId, channel: ChannelRef, pklist: &[u8]) -> StatusCode
    {
        let keys = match decode_pubkey_list(pklist)
        {
            Ok(keys) => keys,
            Err(_) => return StatusCode::IncompleteInformation,
        };
        let announce = matches!(keys.first(), Some((PubkeyListAction::Announce, _)));
        let has_list = self.store.channel(channel).map_or(false, |c| !c.channel_pubkeys.is_empty());

        if announce && has_list && self.is_router() && Some(sender) != self.primary_connection()
        {
            tracing::debug!("Channel public key list already set, enforcing ours");
            return StatusCode::OperationAllowed;
        }

        if announce && has_list && !self.is_router()
        {
            tracing::debug!("Router enforces its channel public key list");
            let mode = match self.store.channel_mut(channel)
            {
                Ok(entry) =>
                {
                    entry.channel_pubkeys.clear();
                    entry.mode - ChannelMode::CHANNEL_AUTH
                }
                Err(_) => return StatusCode::NoSuchChannel,
            };
            if let Ok(entry) = self.store.channel(channel)
            {
                let notify = self.cmode_notify(entry, mode, None, None);
                self.send_notify_to_channel(None, channel, false, true, notify);
            }
        }

        for (action, key) in keys
        {
            let fingerprint = hex::encode(self.keys.fingerprint(&key));
            let entry = match self.store.channel_mut(channel)
            {
                Ok(entry) => entry,
                Err(_) => return StatusCode::NoSuchChannel,
            };
            match action
            {
                PubkeyListAction::Add | PubkeyListAction::Announce =>
                {
                    entry.channel_pubkeys.entry(fingerprint).or_insert(key);
                }
                PubkeyListAction::Remove =>
                {
                    entry.channel_pubkeys.remove(&fingerprint);
                }
            }
        }
        StatusCode::Ok
    }

    /// Our channel public key list as an announcement
    pub(super) fn channel_pk_announcement(&self, channel: ChannelRef) -> Option<Vec<u8>>
    {
        let entry = self.store.channel(channel).ok()?;
        if entry.channel_pubkeys.is_empty()
        {
            return None;
        }
        Some(encode_pubkey_list(PubkeyListAction::Announce, entry.channel_pubkeys.values()))
    }

    /// Send `conn` the channel mode we hold, overriding what it announced.
    /// The founder key goes along when `with_founder_key` is set.
    pub(super) fn send_cmode(
        &mut self,
        conn: ConnectionId,
        channel: ChannelRef,
        mode: ChannelMode,
        with_founder_key: bool,
        pubkeys: Option<Vec<u8>>,
    ) -> HandlerResult
    {
        let (notify, id) = {
            let entry = self.store.channel(channel)?;
            let founder_key = if with_founder_key { entry.founder_key.as_ref() } else { None };
            (self.cmode_notify(entry, mode, founder_key, pubkeys), entry.id)
        };
        tracing::debug!("Enforcing mode {:?} on {}", mode, conn);
        self.send_notify_dest(conn, false, id.into(), notify);
        Ok(())
    }

    /// Push a member mode back out: to `sender` if given, and to the channel
    /// everywhere else
    pub(super) fn force_cumode_change(
        &mut self,
        sender: Option<ConnectionId>,
        channel: ChannelRef,
        membership: MembershipRef,
        mode: ChannelUserMode,
    ) -> HandlerResult
    {
        let client = self.store.membership(membership)?.client;
        let client_id = match self.store.client(client)?.id
        {
            Some(id) => id,
            None => return Ok(()),
        };
        let channel_id = self.store.channel(channel)?.id;

        let notify = NotifyPayload::new(NotifyType::CumodeChange)
            .id_arg(self.id)
            .u32_arg(mode.bits())
            .id_arg(client_id);

        if let Some(conn) = sender
        {
            self.send_notify_dest(conn, false, channel_id.into(), notify.clone());
        }
        self.send_notify_to_channel(sender, channel, false, true, notify);
        Ok(())
    }
}
