use silc_network::idgen;
use silc_network::idlist::{ConnectionType, ServerType};
use silc_network::prelude::*;
use silc_network::routing::RecordingTransport;
use silc_network::wire::*;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

pub const ROUTER_CONN: ConnectionId = ConnectionId(1);

pub fn addr(subnet: u8, host: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, subnet, host))
}

pub fn router_id() -> ServerId {
    idgen::create_server_id(addr(0, 100), 706)
}

pub fn server_id(subnet: u8) -> ServerId {
    idgen::create_server_id(addr(subnet, 1), 706)
}

pub fn client_id(subnet: u8, rnd: u8) -> ClientId {
    ClientId {
        ip: IdIp::from_addr(addr(subnet, 1)),
        rnd,
        hash: [rnd; CLIENTID_HASH_LEN],
    }
}

pub fn public_key(tag: u8) -> PublicKey {
    PublicKey {
        pk_type: 1,
        data: vec![tag; 32],
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A server wired to a recording transport, linked to a primary router on
/// [`ROUTER_CONN`]
pub struct Node {
    pub server: Server,
    pub transport: RecordingTransport,
}

impl Node {
    pub fn new(server_type: ServerType) -> Self {
        init_tracing();
        let config = ServerConfig::new("me.test", addr(0, 1), server_type);
        let transport = RecordingTransport::new();
        let mut server = Server::new(config, Arc::new(transport.clone())).unwrap().with_rng_seed(1);
        server
            .connect_to_router(ROUTER_CONN, addr(0, 100), router_id(), "router.test", ServerType::Router)
            .unwrap();
        transport.drain();
        Self { server, transport }
    }

    pub fn receive(&mut self, conn: ConnectionId, packet: Packet) {
        self.server.process_packet(conn, packet);
    }

    /// Register a client on `conn` and return its ID
    pub fn connect_client(&mut self, conn: ConnectionId, nickname: &str, key: Option<PublicKey>) -> ClientId {
        self.server
            .new_connection(conn, ConnectionType::Client, addr(9, 9), Some("host.test".to_string()), key)
            .unwrap();
        let payload = NewClientPayload {
            username: nickname.to_string(),
            realname: String::new(),
            nickname: Some(nickname.to_string()),
        };
        self.receive(conn, Packet::new(PacketType::NewClient, payload.encode()));

        let sent = self.transport.sent_to(conn);
        let new_id = sent.iter().find(|p| p.packet_type == PacketType::NewId).unwrap();
        self.transport.drain();
        match IdPayload::decode(&new_id.payload).unwrap() {
            EntityId::Client(id) => id,
            other => panic!("client got {} as its id", other),
        }
    }

    pub fn new_id(&mut self, conn: ConnectionId, src: ServerId, id: impl Into<EntityId>) {
        let packet = Packet::new(PacketType::NewId, IdPayload::encode(&id.into())).with_src(src);
        self.receive(conn, packet);
    }

    pub fn notify(&mut self, conn: ConnectionId, src: ServerId, dst: impl Into<EntityId>, notify: NotifyPayload) {
        let packet = Packet::new(PacketType::Notify, notify.encode()).with_src(src).with_dst(dst);
        self.receive(conn, packet);
    }

    pub fn assert_consistent(&self) {
        if let Err(e) = self.server.store().verify_invariants() {
            panic!("store is inconsistent: {}", e);
        }
    }
}
