mod utils;

use pretty_assertions::assert_eq;
use silc_network::crypto::DefaultKeyService;
use silc_network::idlist::{ConnectionType, ServerType};
use silc_network::prelude::*;
use silc_network::wire::*;
use utils::*;

#[test]
fn join_for_unknown_channel_changes_nothing() {
    let mut node = Node::new(ServerType::Server);
    let channel = ChannelId {
        ip: IdIp::from_addr(addr(0, 100)),
        port: 706,
        rnd: 42,
    };

    let join = NotifyPayload::new(NotifyType::Join).id_arg(client_id(5, 1)).id_arg(channel);
    node.notify(ROUTER_CONN, router_id(), channel, join);

    assert_eq!(node.server.store().clients().count(), 0);
    assert_eq!(node.server.store().channels().count(), 0);
    assert_eq!(node.transport.events(), vec![]);
    node.assert_consistent();
}

#[test]
fn server_signoff_removes_everything_behind_the_server() {
    let mut node = Node::new(ServerType::Router);

    // S sits behind our router, and T behind S
    node.new_id(ROUTER_CONN, router_id(), server_id(5));
    for rnd in 1..=3 {
        node.new_id(ROUTER_CONN, server_id(5), client_id(5, rnd));
    }
    node.new_id(ROUTER_CONN, server_id(5), server_id(6));
    for rnd in 1..=2 {
        node.new_id(ROUTER_CONN, server_id(6), client_id(6, rnd));
    }

    assert_eq!(node.server.store().servers().count(), 4);
    assert_eq!(node.server.store().clients().count(), 5);
    assert_eq!(node.server.stats().servers, 3);
    assert_eq!(node.server.stats().clients, 5);
    node.assert_consistent();

    let signoff = NotifyPayload::new(NotifyType::ServerSignoff).id_arg(server_id(5));
    let me = node.server.id();
    node.notify(ROUTER_CONN, router_id(), me, signoff);

    assert_eq!(node.server.store().servers().count(), 2);
    assert_eq!(node.server.store().clients().count(), 0);
    assert_eq!(node.server.stats().servers, 1);
    assert_eq!(node.server.stats().clients, 0);
    node.assert_consistent();
}

#[test]
fn repeated_new_id_is_idempotent() {
    let mut node = Node::new(ServerType::Router);
    let leaf_conn = ConnectionId(20);
    let leaf = server_id(2);
    node.server
        .new_connection(leaf_conn, ConnectionType::Server, addr(2, 1), None, None)
        .unwrap();
    let hello = NewServerPayload {
        id: leaf,
        name: "leaf.test".to_string(),
    };
    node.receive(leaf_conn, Packet::new(PacketType::NewServer, hello.encode()).with_src(leaf));
    node.transport.drain();

    let client = client_id(2, 7);
    node.new_id(leaf_conn, leaf, client);

    let upstream = Packet::new(PacketType::NewId, IdPayload::encode(&client.into()))
        .with_src(node.server.id())
        .with_flags(PacketFlags::BROADCAST);
    assert_eq!(node.transport.sent_to(ROUTER_CONN), vec![upstream]);
    let queries = node.transport.sent_to(leaf_conn);
    assert_eq!(queries.len(), 1);
    assert_eq!(CommandPayload::decode(&queries[0].payload).unwrap().command, Command::Getkey);
    node.transport.drain();

    node.new_id(leaf_conn, leaf, client);
    assert_eq!(node.transport.events(), vec![]);
    assert_eq!(node.server.store().clients().count(), 1);
    assert_eq!(node.server.stats().clients, 1);
    node.assert_consistent();
}

#[test]
fn detached_client_resumes_on_a_new_connection() {
    let mut node = Node::new(ServerType::Server);
    let key = public_key(3);
    let alice = node.connect_client(ConnectionId(10), "alice", None);
    node.server.detach_client(ConnectionId(10)).unwrap();
    node.transport.drain();

    let resume = |node: &mut Node, conn: ConnectionId| {
        node.server
            .new_connection(conn, ConnectionType::Client, addr(9, 9), None, Some(key.clone()))
            .unwrap();
        let payload = ResumeClientPayload {
            id: alice,
            auth: DefaultKeyService::resume_auth_data(&key, &alice),
        };
        node.receive(conn, Packet::new(PacketType::ResumeClient, payload.encode()).with_src(alice));
    };

    // We never saw alice's key, so the router is asked for it first
    resume(&mut node, ConnectionId(11));
    let query = node.transport.sent_to(ROUTER_CONN);
    assert_eq!(query.len(), 1);
    let query = CommandPayload::decode(&query[0].payload).unwrap();
    assert_eq!(query.command, Command::Getkey);
    assert_eq!(node.server.pending_commands(), 1);

    resume(&mut node, ConnectionId(12));
    assert_eq!(
        node.transport.closed(),
        vec![(ConnectionId(12), StatusCode::IncompleteInformation)]
    );
    assert!(node.server.connection(ConnectionId(11)).is_some());
    node.transport.drain();

    let mut reply = CommandPayload::new(Command::Getkey, query.ident);
    reply.args.push(1, vec![0, StatusCode::Ok as u8]);
    reply.args.push(2, IdPayload::encode(&alice.into()));
    reply.args.push(3, key.encode());
    let me = node.server.id();
    node.receive(
        ROUTER_CONN,
        Packet::new(PacketType::CommandReply, reply.encode()).with_src(router_id()).with_dst(me),
    );

    let alice_ref = node.server.store().find_client_by_id(ListKind::Local, &alice).unwrap();
    assert_eq!(
        node.server.connection(ConnectionId(11)).and_then(|c| c.entry),
        Some(EntryRef::Client(alice_ref))
    );
    let entry = node.server.store().client(alice_ref).unwrap();
    assert_eq!(entry.connection(), Some(ConnectionId(11)));
    assert!(!entry.mode.contains(UserMode::DETACHED));

    let resumed = node.transport.sent_to(ROUTER_CONN);
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].packet_type, PacketType::ResumeClient);
    assert_eq!(node.server.pending_commands(), 0);
    assert_eq!(node.server.store().clients().count(), 1);
    node.assert_consistent();
}

#[test]
fn signed_off_client_lingers_until_purged() {
    let mut node = Node::new(ServerType::Server);
    let alice = node.connect_client(ConnectionId(10), "alice", None);

    node.server.close_connection(ConnectionId(10));

    let told = node.transport.sent_to(ROUTER_CONN);
    assert_eq!(told.len(), 1);
    let signoff = NotifyPayload::decode(&told[0].payload).unwrap();
    assert_eq!(signoff.notify_type, NotifyType::Signoff);
    assert_eq!(signoff.client_id(1).unwrap(), alice);

    // The ID stays referenceable for a while
    assert_eq!(node.server.store().clients().count(), 1);
    assert_eq!(node.server.stats().my_clients, 0);
    assert_eq!(node.server.purge_expired(0), 0);

    assert_eq!(node.server.purge_expired(i64::MAX), 1);
    assert_eq!(node.server.store().clients().count(), 0);
    node.assert_consistent();
}
