use super::fixtures::*;
use crate::server::*;
use pretty_assertions::assert_eq;

fn new_id(src: ServerId, id: impl Into<EntityId>) -> Packet
{
    Packet::new(PacketType::NewId, IdPayload::encode(&id.into())).with_src(src)
}

fn new_channel(src: ServerId, name: &str, id: ChannelId) -> Packet
{
    let payload = ChannelPayload { name: name.to_string(), id, mode: 0 };
    Packet::new(PacketType::NewChannel, payload.encode()).with_src(src)
}

#[test]
fn client_from_cell_is_recorded_and_broadcast()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let (leaf, leaf_id) = ts.connect_server(20, 2);
    let client = remote_client_id(2, 5);

    ts.receive(ConnectionId(20), new_id(leaf_id, client));

    let r = ts.server.store.find_client_by_id(ListKind::Local, &client).unwrap();
    assert_eq!(ts.server.store.client(r).unwrap().router, Some(leaf));
    assert_eq!(ts.server.stats().clients, 1);
    assert_eq!(ts.server.stats().cell_clients, 1);
    assert_eq!(ts.server.stats().my_clients, 0);

    let mut getkey = CommandPayload::new(Command::Getkey, 1);
    getkey.args.push(1, IdPayload::encode(&client.into()));
    assert_eq!(
        ts.transport.sent_to(ConnectionId(20)),
        vec![Packet::new(PacketType::Command, getkey.encode()).with_src(ts.server.id)]
    );

    let broadcast = Packet::new(PacketType::NewId, IdPayload::encode(&client.into()))
        .with_src(ts.server.id)
        .with_flags(PacketFlags::BROADCAST);
    assert_eq!(ts.transport.sent_to(ROUTER_CONN), vec![broadcast]);
}

#[test]
fn repeated_announcement_changes_nothing()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let (_, leaf_id) = ts.connect_server(20, 2);
    let client = remote_client_id(2, 5);

    ts.receive(ConnectionId(20), new_id(leaf_id, client));
    ts.transport.drain();
    ts.receive(ConnectionId(20), new_id(leaf_id, client));

    assert_eq!(ts.transport.events(), vec![]);
    assert_eq!(ts.server.store.clients().count(), 1);
    assert_eq!(ts.server.stats().clients, 1);
}

#[test]
fn announcement_replaces_a_signed_off_entry()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let (_, leaf_id) = ts.connect_server(20, 2);
    let client = remote_client_id(2, 5);

    ts.receive(ConnectionId(20), new_id(leaf_id, client));
    let old = ts.server.store.find_client_by_id(ListKind::Local, &client).unwrap();
    ts.server.store.client_mut(old).unwrap().make_zombie(0, 300);
    ts.transport.drain();

    ts.receive(ConnectionId(20), new_id(leaf_id, client));

    let r = ts.server.store.find_client_by_id(ListKind::Local, &client).unwrap();
    assert_ne!(r, old);
    assert!(ts.server.store.client(r).unwrap().is_registered());
    assert_eq!(ts.server.store.clients().count(), 1);
}

#[test]
fn server_from_router_goes_to_global_list()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let far = idgen::create_server_id(addr(5, 1), 706);

    ts.receive(ROUTER_CONN, new_id(router_id(), far));

    let r = ts.server.store.find_server_by_id(ListKind::Global, &far).unwrap();
    assert_eq!(ts.server.store.server(r).unwrap().router, Some(ts.router_ref()));
    assert_eq!(ts.server.stats().servers, 2);
    // Routers don't pass on what came from the network
    assert_eq!(ts.transport.events(), vec![]);
}

#[test]
fn leaf_server_ignores_announcements()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();

    ts.receive(ROUTER_CONN, new_id(router_id(), remote_client_id(5, 1)));
    ts.receive(ROUTER_CONN, new_channel(router_id(), "#far", channel_id(addr(0, 100), 2)));

    assert_eq!(ts.server.store.clients().count(), 0);
    assert_eq!(ts.server.store.channels().count(), 0);
}

#[test]
fn announcement_from_client_is_dropped()
{
    let mut ts = TestServer::new(ServerType::Router);
    let (_, alice) = ts.connect_client(10, "alice", None);

    let packet = Packet::new(PacketType::NewId, IdPayload::encode(&remote_client_id(5, 1).into())).with_src(alice);
    ts.receive(ConnectionId(10), packet);

    assert_eq!(ts.server.store.clients().count(), 1);
}

#[test]
fn id_list_is_merged_and_passed_on_whole()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let (_, leaf_id) = ts.connect_server(20, 2);

    let mut payload = IdPayload::encode(&remote_client_id(2, 1).into());
    payload.extend(IdPayload::encode(&remote_client_id(2, 2).into()));
    let list = Packet::new(PacketType::NewId, payload.clone()).with_src(leaf_id).with_flags(PacketFlags::LIST);
    ts.receive(ConnectionId(20), list);

    assert_eq!(ts.server.store.clients().count(), 2);
    let upstream = ts.transport.sent_to(ROUTER_CONN);
    assert_eq!(upstream.len(), 1);
    assert_eq!(upstream[0].payload, payload);
    assert!(upstream[0].is_list());
    assert!(upstream[0].is_broadcast());
}

#[test]
fn foreign_channel_id_from_cell_is_corrected()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let (_, leaf_id) = ts.connect_server(20, 2);
    let foreign = channel_id(addr(2, 1), 3);

    ts.receive(ConnectionId(20), new_channel(leaf_id, "#rust", foreign));

    assert_eq!(ts.server.store.channels().count(), 0);
    assert_eq!(ts.transport.sent_to(ROUTER_CONN), vec![]);

    let sent = ts.transport.sent_to(ConnectionId(20));
    assert_eq!(sent.len(), 1);
    let notify = NotifyPayload::decode(&sent[0].payload).unwrap();
    assert_eq!(notify.notify_type, NotifyType::ChannelChange);
    assert_eq!(notify.channel_id(1).unwrap(), foreign);
    assert_eq!(notify.channel_id(2).unwrap().ip, ts.server.id.ip);
}

#[test]
fn cell_channel_gets_a_key_and_goes_upstream()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let (_, leaf_id) = ts.connect_server(20, 2);
    let id = channel_id(my_addr(), 3);

    ts.receive(ConnectionId(20), new_channel(leaf_id, "#rust", id));

    let channel = ts.server.store.find_channel_by_id(ListKind::Local, &id).unwrap();
    let entry = ts.server.store.channel(channel).unwrap();
    assert!(entry.disabled);
    let key = entry.key.clone().unwrap();
    assert_eq!(entry.cipher.as_deref(), Some(key.cipher.as_str()));

    let key_payload = ChannelKeyPayload { id, cipher: key.cipher, key: key.key };
    assert_eq!(
        ts.transport.sent_to(ConnectionId(20)),
        vec![Packet::new(PacketType::ChannelKey, key_payload.encode()).with_src(ts.server.id).with_dst(id)]
    );

    let announced = ChannelPayload { name: "#rust".to_string(), id, mode: 0 };
    assert_eq!(
        ts.transport.sent_to(ROUTER_CONN),
        vec![Packet::new(PacketType::NewChannel, announced.encode())
            .with_src(ts.server.id)
            .with_flags(PacketFlags::BROADCAST)]
    );
    assert_eq!(ts.server.stats().cell_channels, 1);
}

#[test]
fn channel_from_router_is_cached_disabled()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let id = channel_id(addr(0, 100), 2);

    ts.receive(ROUTER_CONN, new_channel(router_id(), "#far", id));

    let channel = ts.server.store.find_channel_by_id(ListKind::Global, &id).unwrap();
    let entry = ts.server.store.channel(channel).unwrap();
    assert_eq!(entry.name, "#far");
    assert_eq!(entry.router, Some(ts.router_ref()));
    assert!(entry.disabled);
    assert!(entry.key.is_none());
    assert_eq!(ts.transport.events(), vec![]);
}
