use super::*;

/// The first `max` bytes of a free-form notify argument, as text
fn truncated(data: Option<&[u8]>, max: usize) -> Option<String>
{
    data.map(|d| String::from_utf8_lossy(&d[..d.len().min(max)]).into_owned())
}

impl Server
{
    pub(super) fn notify_signoff(&mut self, n: &Notify) -> HandlerResult
    {
        let client = match self.notify_client(n, 1)?
        {
            Some(c) => c,
            None => return Ok(()),
        };
        let message = truncated(n.payload.get(2), MAX_SIGNOFF_MSG_LEN);

        let (mode, conn) = {
            let entry = self.store.client(client)?;
            (entry.mode, if entry.is_local() { entry.connection() } else { None })
        };
        let scope = self.client_scope(client);
        self.stat(StatChange::ClientRemoved(scope, mode));

        self.store.client_mut(client)?.data.public_key = None;
        self.remove_from_channels(client, true, message.as_deref(), false, false);

        // Our router refused one of our own clients
        if let Some(conn) = conn
        {
            tracing::info!("SIGNOFF from router for local client, disconnecting");
            self.connections.remove(&conn);
            self.transport.close(conn, StatusCode::ResourceLimit, Some("Router prevented registration"));
        }

        let now = utils::now();
        let expiry = self.config.zombie_expiry;
        self.store.client_mut(client)?.make_zombie(now, now + expiry);
        Ok(())
    }

    pub(super) fn notify_nick_change(&mut self, n: &Notify) -> HandlerResult
    {
        let old_id = n.payload.client_id(1)?;
        let new_id = n.payload.client_id(2)?;
        let nickname = n.payload.string(3)?;

        let client = match self.find_client(&old_id)
        {
            Some(c) => c,
            None => return Ok(()),
        };
        let list = match self.store.list_of(client)
        {
            Some(list) => list,
            None => return Ok(()),
        };
        if !self.store.update_client(list, client, new_id, nickname.clone())
        {
            tracing::debug!("Could not replace client id {}", EntityId::from(old_id));
            return Ok(());
        }
        tracing::debug!("Client id {} is now {}", EntityId::from(old_id), EntityId::from(new_id));

        let notify = NotifyPayload::new(NotifyType::NickChange)
            .id_arg(old_id)
            .id_arg(new_id)
            .opt_arg(nickname.map(String::into_bytes));
        self.send_notify_on_channels(Some(client), client, notify);
        Ok(())
    }

    pub(super) fn notify_killed(&mut self, n: &Notify) -> HandlerResult
    {
        let client_id = n.payload.client_id(1)?;
        let client = match self.find_registered_client(&client_id)
        {
            Some(c) => c,
            None => return Ok(()),
        };

        // One of ours: dropping the connection does the rest
        if let (true, Some(conn)) = (n.dst_is_client(), self.store.client(client)?.connection())
        {
            tracing::info!("Local client {} killed", EntityId::from(client_id));
            let comment = truncated(n.payload.get(2), MAX_KILL_COMMENT_LEN);
            self.connections.remove(&conn);
            self.free_client_data(client, false, None);
            self.transport.close(conn, StatusCode::Ok, comment.as_deref().or(Some("Killed")));
            return Ok(());
        }

        let comment = truncated(n.payload.get(2), MAX_KILL_COMMENT_LEN);
        let killer = n.payload.entity_id(3)?;
        if let EntityId::Client(killer_id) = killer
        {
            let killer = match self.find_registered_client(&killer_id)
            {
                Some(c) => c,
                None => return Ok(()),
            };
            if !self.is_server() && !self.store.client(killer)?.mode.contains(UserMode::ROUTER_OPERATOR)
            {
                tracing::debug!("Killing is not allowed");
                return Ok(());
            }
        }

        let notify = NotifyPayload::new(NotifyType::Killed)
            .id_arg(client_id)
            .opt_arg(comment.map(String::into_bytes))
            .id_arg(killer);
        self.send_notify_on_channels(Some(client), client, notify);

        self.remove_from_channels(client, false, None, false, true);

        let mode = self.store.client(client)?.mode;
        let scope = self.client_scope(client);
        self.stat(StatChange::ClientRemoved(scope, mode));

        let now = utils::now();
        let expiry = self.config.zombie_expiry;
        let entry = self.store.client_mut(client)?;
        entry.data.public_key = None;
        entry.make_zombie(now, now + expiry);
        Ok(())
    }

    pub(super) fn notify_umode_change(&mut self, n: &Notify) -> HandlerResult
    {
        let client = match self.notify_client(n, 1)?
        {
            Some(c) => c,
            None => return Ok(()),
        };
        let requested = n.payload.u32(2)?.ok_or(ParseError::MissingArgument(NotifyType::UmodeChange, 2))?;
        let mode = UserMode::from_bits_truncate(requested);

        let (old, local) = {
            let entry = self.store.client(client)?;
            (entry.mode, entry.is_local())
        };
        self.stat(StatChange::UserModeChanged { local, old, new: mode });

        let entry = self.store.client_mut(client)?;
        if mode.contains(UserMode::DETACHED)
        {
            entry.data.status.remove(EntryStatus::RESUMED);
        }
        entry.set_mode(mode);
        Ok(())
    }
}
