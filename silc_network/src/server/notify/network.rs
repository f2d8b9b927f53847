use super::*;

impl Server
{
    pub(super) fn notify_server_signoff(&mut self, n: &Notify) -> HandlerResult
    {
        // A backup not standing in for the primary only takes these from routers
        if n.conn_type == ConnectionType::Server && self.is_backup() && !self.backup_primary
        {
            return Ok(());
        }

        let server_id = n.payload.server_id(1)?;
        if server_id == self.id
        {
            tracing::debug!("Ignoring SERVER_SIGNOFF for our own id");
            return Ok(());
        }

        let server = match self.find_server(&server_id)
        {
            Some(s) => s,
            None =>
            {
                if !self.is_router()
                {
                    self.remove_listed_clients(n);
                }
                return Ok(());
            }
        };

        let (local, conn, owner, server_type) = {
            let entry = self.store.server(server)?;
            (entry.is_local(), entry.connection(), entry.router, entry.server_type)
        };

        if local
        {
            if let (true, Some(conn)) = (self.is_backup(), conn)
            {
                tracing::info!("Closing connection to {} after SERVER_SIGNOFF", EntityId::from(server_id));
                self.disconnect(conn, StatusCode::Ok, None);
            }
            return Ok(());
        }

        tracing::info!("Server {} signed off", EntityId::from(server_id));
        self.remove_servers_by_server(server, true);
        self.remove_clients_by_server(owner, server, true);

        let cell = self.is_router() && self.store.list_of(server) == Some(ListKind::Local);
        if let Some(list) = self.store.list_of(server)
        {
            self.store.del_server(list, server);
            let router = server_type != ServerType::Server;
            self.stat(StatChange::ServerRemoved { router, scope: Scope::new(false, cell) });
        }
        Ok(())
    }

    /// A SERVER_SIGNOFF for a server we never knew may still list the
    /// clients that went with it
    fn remove_listed_clients(&mut self, n: &Notify)
    {
        let arg_types: Vec<u8> = n.payload.args.iter().map(|a| a.arg_type).filter(|t| *t > 1).collect();
        for arg in arg_types
        {
            let client = match n.payload.client_id(arg).ok().and_then(|id| self.find_registered_client(&id))
            {
                Some(c) => c,
                None => continue,
            };
            let mode = self.store.client(client).map_or(UserMode::empty(), |c| c.mode);
            let scope = self.client_scope(client);
            self.stat(StatChange::ClientRemoved(scope, mode));

            self.remove_from_channels(client, true, None, false, false);
            if let Some(list) = self.store.list_of(client)
            {
                self.store.del_client(list, client);
            }
        }
    }

    pub(super) fn notify_error(&mut self, n: &Notify) -> HandlerResult
    {
        let status = match n.payload.get(1).and_then(|s| s.first()).and_then(|s| StatusCode::from_u8(*s))
        {
            Some(status) => status,
            None => return Ok(()),
        };
        tracing::debug!("ERROR notify ({})", status);

        if status != StatusCode::NoSuchClientId || n.conn_type != ConnectionType::Router
        {
            return Ok(());
        }

        let id = n.payload.client_id(2)?;
        let client = match self.store.find_client_by_id(ListKind::Global, &id)
        {
            Some(c) => c,
            None => return Ok(()),
        };
        tracing::debug!("Router says {} does not exist, deleting it", EntityId::from(id));

        self.remove_from_channels(client, true, None, true, false);

        let (registered, mode) = {
            let entry = self.store.client(client)?;
            (entry.is_registered(), entry.mode)
        };
        if registered
        {
            let scope = self.client_scope(client);
            self.stat(StatChange::ClientRemoved(scope, mode));
        }
        self.store.del_client(ListKind::Global, client);
        Ok(())
    }
}
