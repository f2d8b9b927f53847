use super::fixtures::*;
use crate::server::*;
use pretty_assertions::assert_eq;

fn reply(command: Command, ident: u16, args: Vec<(u8, Vec<u8>)>) -> CommandPayload
{
    let mut reply = CommandPayload::new(command, ident);
    reply.args.push(1, vec![0, StatusCode::Ok as u8]);
    for (arg_type, data) in args
    {
        reply.args.push(arg_type, data);
    }
    reply
}

fn reply_packet(ts: &TestServer, payload: &CommandPayload) -> Packet
{
    Packet::new(PacketType::CommandReply, payload.encode()).with_src(router_id()).with_dst(ts.server.id)
}

#[test]
fn getkey_reply_caches_public_key()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let router = ts.router_ref();
    let carol = remote_client_id(5, 3);
    let carol_ref = ts.remote_client(ListKind::Global, router, carol, "carol");

    let key = public_key(4);
    let payload = reply(Command::Getkey, 9, vec![(2, IdPayload::encode(&carol.into())), (3, key.encode())]);
    let packet = reply_packet(&ts, &payload);
    ts.receive(ROUTER_CONN, packet);

    let entry = ts.server.store.client(carol_ref).unwrap();
    assert_eq!(entry.data.public_key, Some(key.clone()));
    assert_eq!(entry.data.fingerprint, Some(DefaultKeyService.fingerprint(&key)));
    assert_eq!(ts.transport.events(), vec![]);
}

#[test]
fn getkey_reply_keeps_a_known_client_key()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let router = ts.router_ref();
    let carol = remote_client_id(5, 3);
    let carol_ref = ts.remote_client(ListKind::Global, router, carol, "carol");
    ts.server.store.client_mut(carol_ref).unwrap().data.public_key = Some(public_key(1));

    let payload = reply(Command::Getkey, 9, vec![(2, IdPayload::encode(&carol.into())), (3, public_key(2).encode())]);
    let packet = reply_packet(&ts, &payload);
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.client(carol_ref).unwrap().data.public_key, Some(public_key(1)));
}

fn whois_reply(id: ClientId, nickname: &str, mode: UserMode) -> CommandPayload
{
    reply(
        Command::Whois,
        3,
        vec![
            (2, IdPayload::encode(&id.into())),
            (3, nickname.as_bytes().to_vec()),
            (4, b"dave@far.test".to_vec()),
            (5, b"Dave".to_vec()),
            (7, mode.bits().to_be_bytes().to_vec()),
        ],
    )
}

#[test]
fn whois_reply_teaches_server_about_client()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let dave = remote_client_id(5, 8);

    let payload = whois_reply(dave, "dave@s5.test", UserMode::GONE);
    let packet = reply_packet(&ts, &payload);
    ts.receive(ROUTER_CONN, packet);

    let client = ts.server.store.find_client_by_id(ListKind::Global, &dave).unwrap();
    let entry = ts.server.store.client(client).unwrap();
    assert_eq!(entry.nickname.as_deref(), Some("dave"));
    assert_eq!(entry.username.as_deref(), Some("dave@far.test"));
    assert_eq!(entry.userinfo.as_deref(), Some("Dave"));
    assert_eq!(entry.mode, UserMode::GONE);
    assert_eq!(entry.router, Some(ts.router_ref()));
    assert!(entry.data.status.contains(EntryStatus::RESOLVED));
    assert_eq!(ts.server.stats().clients, 1);
    assert_eq!(ts.server.stats().aways, 1);
}

#[test]
fn whois_reply_updates_known_client()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let router = ts.router_ref();
    let dave = remote_client_id(5, 8);
    let dave_ref = ts.remote_client(ListKind::Global, router, dave, "old");
    ts.server.store.client_mut(dave_ref).unwrap().data.status.insert(EntryStatus::RESOLVING);

    let payload = whois_reply(dave, "dave", UserMode::empty());
    let packet = reply_packet(&ts, &payload);
    ts.receive(ROUTER_CONN, packet);

    let entry = ts.server.store.client(dave_ref).unwrap();
    assert_eq!(entry.nickname.as_deref(), Some("dave"));
    assert!(entry.data.status.contains(EntryStatus::RESOLVED));
    assert!(!entry.data.status.contains(EntryStatus::RESOLVING));
    assert_eq!(ts.server.store.find_clients_by_nickname(ListKind::Global, "dave"), vec![dave_ref]);
}

#[test]
fn routers_do_not_learn_clients_from_whois()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let dave = remote_client_id(5, 8);

    let payload = whois_reply(dave, "dave", UserMode::empty());
    let packet = reply_packet(&ts, &payload);
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.clients().count(), 0);
}

#[test]
fn reply_for_local_client_is_relayed()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (_, alice) = ts.connect_client(10, "alice", None);

    let payload = reply(Command::Users, 1, vec![]);
    let packet = Packet::new(PacketType::CommandReply, payload.encode()).with_src(router_id()).with_dst(alice);
    ts.receive(ROUTER_CONN, packet.clone());

    assert_eq!(ts.transport.sent_to(ConnectionId(10)), vec![packet]);
}

#[test]
fn reply_for_someone_else_is_dropped()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let stranger = remote_client_id(5, 1);

    let payload = reply(Command::Users, 1, vec![]);
    let packet = Packet::new(PacketType::CommandReply, payload.encode()).with_src(router_id()).with_dst(stranger);
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.transport.events(), vec![]);
}
