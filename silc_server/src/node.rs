//! The async loop that drives a protocol core.
//!
//! The core itself is synchronous: a [`Node`] owns the [`Server`] and feeds it
//! whatever the transport layer reports through [`NodeEvent`]s, runs its
//! timers, and hands everything the core wants sent back out as [`Outbound`]
//! messages.

use silc_network::prelude::*;
use silc_network::idlist::{ConnectionType, ServerType};
use silc_network::wire::PublicKey;
use silc_network::utils;

use tokio::{
    sync::{
        broadcast,
        mpsc::{
            unbounded_channel,
            UnboundedReceiver,
            UnboundedSender,
        },
    },
    time,
};

use std::{
    net::IpAddr,
    sync::Arc,
    time::Duration,
};

/// What the transport layer tells the node
#[derive(Debug)]
pub enum NodeEvent
{
    /// A peer finished key exchange on `conn`
    Connected
    {
        conn: ConnectionId,
        conn_type: ConnectionType,
        remote_ip: IpAddr,
        hostname: Option<String>,
        public_key: Option<PublicKey>,
    },
    /// We completed an outbound link to a router
    RouterLinked
    {
        conn: ConnectionId,
        remote_ip: IpAddr,
        router_id: ServerId,
        name: String,
        router_type: ServerType,
    },
    Packet(ConnectionId, Packet),
    Disconnected(ConnectionId),
}

/// What the node asks of the transport layer
#[derive(Debug,Clone,PartialEq)]
pub enum Outbound
{
    Send(ConnectionId, Packet),
    Close(ConnectionId, StatusCode, Option<String>),
}

/// A [`Transport`] that queues everything on a channel for the transport
/// layer's writer tasks to pick up
#[derive(Debug,Clone)]
pub struct ChannelTransport
{
    sender: UnboundedSender<Outbound>,
}

impl ChannelTransport
{
    pub fn new(sender: UnboundedSender<Outbound>) -> Self
    {
        Self { sender }
    }
}

impl Transport for ChannelTransport
{
    fn send(&self, conn: ConnectionId, packet: Packet)
    {
        self.sender.send(Outbound::Send(conn, packet)).or_log("Outbound queue closed");
    }

    fn close(&self, conn: ConnectionId, status: StatusCode, message: Option<&str>)
    {
        self.sender
            .send(Outbound::Close(conn, status, message.map(str::to_owned)))
            .or_log("Outbound queue closed");
    }
}

/// The transport layer's ends of a node's channels
pub struct NodeChannels
{
    pub events: UnboundedSender<NodeEvent>,
    pub outbound: UnboundedReceiver<Outbound>,
}

pub struct Node
{
    server: Server,
    events: UnboundedReceiver<NodeEvent>,
    tick_interval: Duration,
}

impl Node
{
    pub fn new(config: ServerConfig, tick_interval: Duration) -> Result<(Self, NodeChannels), StoreError>
    {
        let (event_send, event_recv) = unbounded_channel();
        let (outbound_send, outbound_recv) = unbounded_channel();

        let server = Server::new(config, Arc::new(ChannelTransport::new(outbound_send)))?;

        let node = Self {
            server,
            events: event_recv,
            tick_interval,
        };
        let channels = NodeChannels {
            events: event_send,
            outbound: outbound_recv,
        };
        Ok((node, channels))
    }

    pub fn server(&self) -> &Server
    {
        &self.server
    }

    fn handle_event(&mut self, event: NodeEvent)
    {
        match event
        {
            NodeEvent::Connected { conn, conn_type, remote_ip, hostname, public_key } =>
            {
                self.server
                    .new_connection(conn, conn_type, remote_ip, hostname, public_key)
                    .or_log(format!("registering connection {}", conn));
            }
            NodeEvent::RouterLinked { conn, remote_ip, router_id, name, router_type } =>
            {
                self.server
                    .connect_to_router(conn, remote_ip, router_id, &name, router_type)
                    .or_log(format!("linking router {}", name));
            }
            NodeEvent::Packet(conn, packet) =>
            {
                self.server.process_packet(conn, packet);
            }
            NodeEvent::Disconnected(conn) =>
            {
                self.server.close_connection(conn);
            }
        }
    }

    /// Run until `shutdown` fires or every event sender is gone. Events
    /// already queued when the shutdown arrives are still processed. Returns
    /// the server so its final state can be inspected or saved.
    #[tracing::instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Server
    {
        let mut timer = time::interval(self.tick_interval);

        loop
        {
            tracing::trace!("node run loop");

            tokio::select! {
                event = self.events.recv() =>
                {
                    match event
                    {
                        Some(event) => self.handle_event(event),
                        None =>
                        {
                            tracing::info!("All event senders gone; stopping");
                            break;
                        }
                    }
                },
                _ = timer.tick() =>
                {
                    self.server.tick(utils::now());
                },
                _ = shutdown.recv() =>
                {
                    tracing::info!("Shutting down");
                    while let Ok(event) = self.events.try_recv()
                    {
                        self.handle_event(event);
                    }
                    break;
                }
            }
        }

        self.server
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use pretty_assertions::assert_eq;
    use silc_network::idgen;
    use silc_network::wire::NewServerPayload;
    use std::net::Ipv4Addr;

    fn router_addr() -> IpAddr
    {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
    }

    fn drain(outbound: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound>
    {
        let mut out = Vec::new();
        while let Ok(item) = outbound.try_recv()
        {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn router_link_announces_us()
    {
        let (node, mut channels) = Node::new(ServerConfig::default(), Duration::from_secs(60)).unwrap();
        let me = node.server().id();
        let (shutdown_send, shutdown_recv) = broadcast::channel(1);
        let task = tokio::spawn(node.run(shutdown_recv));

        let router_id = idgen::create_server_id(router_addr(), 706);
        channels.events.send(NodeEvent::RouterLinked {
            conn: ConnectionId(1),
            remote_ip: router_addr(),
            router_id,
            name: "router.test".to_string(),
            router_type: ServerType::Router,
        }).unwrap();
        shutdown_send.send(()).unwrap();

        let server = task.await.unwrap();
        assert!(server.primary_router().is_some());
        assert!(!server.is_standalone());

        let hello = NewServerPayload { id: me, name: ServerConfig::default().name };
        assert_eq!(
            drain(&mut channels.outbound),
            vec![Outbound::Send(ConnectionId(1), Packet::new(PacketType::NewServer, hello.encode()).with_src(me))]
        );
    }

    #[tokio::test]
    async fn closing_an_unknown_connection_is_harmless()
    {
        let (node, mut channels) = Node::new(ServerConfig::default(), Duration::from_secs(60)).unwrap();
        let (_shutdown_send, shutdown_recv) = broadcast::channel(1);
        let task = tokio::spawn(node.run(shutdown_recv));

        channels.events.send(NodeEvent::Disconnected(ConnectionId(7))).unwrap();
        // Dropping the last sender ends the loop
        drop(channels.events);

        let server = task.await.unwrap();
        assert_eq!(server.store().clients().count(), 0);
        assert_eq!(drain(&mut channels.outbound), vec![]);
    }
}
