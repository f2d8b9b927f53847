//! Server statistics, mutated only through [`Statistics::apply`]

use crate::modes::UserMode;
use serde::{Deserialize, Serialize};

/// Which scopes an entity counts towards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scope
{
    /// Directly connected to us, or created by us
    pub local: bool,
    /// Inside our cell; only meaningful on routers
    pub cell: bool,
}

impl Scope
{
    pub fn new(local: bool, cell: bool) -> Self
    {
        Self { local, cell }
    }

    pub fn remote() -> Self
    {
        Self::default()
    }
}

/// A state transition that affects the counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatChange
{
    ClientAdded(Scope),
    /// `mode` is the client's mode at the time of removal, so operator and
    /// away counts can be unwound
    ClientRemoved(Scope, UserMode),
    ServerAdded { router: bool, scope: Scope },
    ServerRemoved { router: bool, scope: Scope },
    ChannelAdded(Scope),
    ChannelRemoved(Scope),
    ChannelClientAdded(Scope),
    ChannelClientRemoved(Scope),
    UserModeChanged { local: bool, old: UserMode, new: UserMode },
    PacketReceived,
    PacketSent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics
{
    pub my_clients: u32,
    pub my_servers: u32,
    pub my_routers: u32,
    pub my_channels: u32,
    pub my_chanclients: u32,
    pub my_aways: u32,
    pub my_detached: u32,
    pub my_server_ops: u32,
    pub my_router_ops: u32,

    pub cell_clients: u32,
    pub cell_servers: u32,
    pub cell_channels: u32,
    pub cell_chanclients: u32,

    pub clients: u32,
    pub servers: u32,
    pub routers: u32,
    pub channels: u32,
    pub chanclients: u32,
    pub aways: u32,
    pub detached: u32,
    pub server_ops: u32,
    pub router_ops: u32,

    pub packets_received: u64,
    pub packets_sent: u64,
}

fn inc(counter: &mut u32, cond: bool)
{
    if cond
    {
        *counter += 1;
    }
}

fn dec(counter: &mut u32, cond: bool)
{
    if cond
    {
        *counter = counter.saturating_sub(1);
    }
}

impl Statistics
{
    /// Apply one change. `my_clients` only counts our clients that are not
    /// detached; detaching moves a client from it to `my_detached`.
    pub fn apply(&mut self, change: StatChange)
    {
        match change
        {
            StatChange::ClientAdded(scope) =>
            {
                inc(&mut self.clients, true);
                inc(&mut self.cell_clients, scope.cell);
                inc(&mut self.my_clients, scope.local);
            }
            StatChange::ClientRemoved(scope, mode) =>
            {
                dec(&mut self.clients, true);
                dec(&mut self.cell_clients, scope.cell);
                dec(&mut self.my_clients, scope.local && !mode.contains(UserMode::DETACHED));
                self.unwind_mode(scope.local, mode);
            }
            StatChange::ServerAdded { router, scope } =>
            {
                inc(&mut self.servers, true);
                inc(&mut self.routers, router);
                inc(&mut self.cell_servers, scope.cell);
                inc(&mut self.my_servers, scope.local && !router);
                inc(&mut self.my_routers, scope.local && router);
            }
            StatChange::ServerRemoved { router, scope } =>
            {
                dec(&mut self.servers, true);
                dec(&mut self.routers, router);
                dec(&mut self.cell_servers, scope.cell);
                dec(&mut self.my_servers, scope.local && !router);
                dec(&mut self.my_routers, scope.local && router);
            }
            StatChange::ChannelAdded(scope) =>
            {
                inc(&mut self.channels, true);
                inc(&mut self.cell_channels, scope.cell);
                inc(&mut self.my_channels, scope.local);
            }
            StatChange::ChannelRemoved(scope) =>
            {
                dec(&mut self.channels, true);
                dec(&mut self.cell_channels, scope.cell);
                dec(&mut self.my_channels, scope.local);
            }
            StatChange::ChannelClientAdded(scope) =>
            {
                inc(&mut self.chanclients, true);
                inc(&mut self.cell_chanclients, scope.cell);
                inc(&mut self.my_chanclients, scope.local);
            }
            StatChange::ChannelClientRemoved(scope) =>
            {
                dec(&mut self.chanclients, true);
                dec(&mut self.cell_chanclients, scope.cell);
                dec(&mut self.my_chanclients, scope.local);
            }
            StatChange::UserModeChanged { local, old, new } =>
            {
                let was_detached = old.contains(UserMode::DETACHED);
                let is_detached = new.contains(UserMode::DETACHED);
                dec(&mut self.my_clients, local && !was_detached && is_detached);
                inc(&mut self.my_clients, local && was_detached && !is_detached);
                self.unwind_mode(local, old);
                self.count_mode(local, new);
            }
            StatChange::PacketReceived => self.packets_received += 1,
            StatChange::PacketSent => self.packets_sent += 1,
        }
    }

    fn count_mode(&mut self, local: bool, mode: UserMode)
    {
        let gone = mode.contains(UserMode::GONE);
        let detached = mode.contains(UserMode::DETACHED);
        let sops = mode.contains(UserMode::SERVER_OPERATOR);
        let rops = mode.contains(UserMode::ROUTER_OPERATOR);

        inc(&mut self.aways, gone);
        inc(&mut self.detached, detached);
        inc(&mut self.server_ops, sops);
        inc(&mut self.router_ops, rops);
        inc(&mut self.my_aways, local && gone);
        inc(&mut self.my_detached, local && detached);
        inc(&mut self.my_server_ops, local && sops);
        inc(&mut self.my_router_ops, local && rops);
    }

    fn unwind_mode(&mut self, local: bool, mode: UserMode)
    {
        let gone = mode.contains(UserMode::GONE);
        let detached = mode.contains(UserMode::DETACHED);
        let sops = mode.contains(UserMode::SERVER_OPERATOR);
        let rops = mode.contains(UserMode::ROUTER_OPERATOR);

        dec(&mut self.aways, gone);
        dec(&mut self.detached, detached);
        dec(&mut self.server_ops, sops);
        dec(&mut self.router_ops, rops);
        dec(&mut self.my_aways, local && gone);
        dec(&mut self.my_detached, local && detached);
        dec(&mut self.my_server_ops, local && sops);
        dec(&mut self.my_router_ops, local && rops);
    }
}
