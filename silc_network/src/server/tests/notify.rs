use super::fixtures::*;
use crate::server::*;
use pretty_assertions::assert_eq;

/// A channel owned by our router, as a leaf server would cache it
fn far_channel(ts: &mut TestServer) -> (ChannelRef, ChannelId)
{
    let id = channel_id(addr(0, 100), 2);
    let router = ts.router_ref();
    (ts.channel(ListKind::Global, "#far", id, Some(router)), id)
}

fn relayed(ts: &TestServer, notify: &NotifyPayload, dst: impl Into<EntityId>) -> Packet
{
    Packet::new(PacketType::Notify, notify.encode()).with_src(ts.server.id).with_dst(dst)
}

fn notify_types(packets: &[Packet]) -> Vec<NotifyType>
{
    packets
        .iter()
        .filter(|p| p.packet_type == PacketType::Notify && !p.is_list())
        .filter_map(|p| NotifyPayload::decode(&p.payload).ok())
        .map(|n| n.notify_type)
        .collect()
}

#[test]
fn join_from_router_creates_unknown_client()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (channel, id) = far_channel(&mut ts);
    let carol = remote_client_id(5, 3);

    let join = NotifyPayload::new(NotifyType::Join).id_arg(carol).id_arg(id);
    let packet = ts.notify_from(router_id(), id, join);
    ts.receive(ROUTER_CONN, packet);

    let client = ts.server.store.find_client_by_id(ListKind::Global, &carol).unwrap();
    let entry = ts.server.store.client(client).unwrap();
    assert!(entry.is_registered());
    assert_eq!(entry.router, Some(ts.router_ref()));

    let membership = ts.server.store.find_membership(client, channel).unwrap();
    assert_eq!(
        ts.server.store.membership(membership).unwrap().mode,
        ChannelUserMode::CHANOP | ChannelUserMode::CHANFO
    );

    let channel = ts.server.store.channel(channel).unwrap();
    assert!(channel.global_users);
    assert!(!channel.disabled);
    assert_eq!(channel.user_count, 1);
    assert_eq!(ts.transport.events(), vec![]);
}

#[test]
fn router_drops_join_for_unknown_client()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let (channel, id) = far_channel(&mut ts);

    let join = NotifyPayload::new(NotifyType::Join).id_arg(remote_client_id(5, 3)).id_arg(id);
    let packet = ts.notify_from(router_id(), id, join);
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.clients().count(), 0);
    assert!(ts.server.store.channel_members(channel).is_empty());
}

#[test]
fn join_replaces_a_signed_off_entry()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (channel, id) = far_channel(&mut ts);
    let router = ts.router_ref();
    let carol = remote_client_id(5, 3);
    let old = ts.remote_client(ListKind::Global, router, carol, "carol");
    ts.server.store.client_mut(old).unwrap().make_zombie(0, 300);

    let join = NotifyPayload::new(NotifyType::Join).id_arg(carol).id_arg(id);
    let packet = ts.notify_from(router_id(), id, join);
    ts.receive(ROUTER_CONN, packet);

    let client = ts.server.store.find_client_by_id(ListKind::Global, &carol).unwrap();
    assert_ne!(client, old);
    assert!(ts.server.store.client(client).unwrap().is_registered());
    assert!(ts.server.store.find_membership(client, channel).is_some());
    assert_eq!(ts.server.store.clients().count(), 1);
}

#[test]
fn join_is_relayed_to_local_members()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (alice_ref, _) = ts.connect_client(10, "alice", None);
    let (channel, id) = far_channel(&mut ts);
    ts.join(alice_ref, channel, ChannelUserMode::CHANOP);
    let router = ts.router_ref();
    let carol = remote_client_id(5, 3);
    let carol_ref = ts.remote_client(ListKind::Global, router, carol, "carol");

    let join = NotifyPayload::new(NotifyType::Join).id_arg(carol).id_arg(id);
    let packet = ts.notify_from(router_id(), id, join.clone());
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.transport.sent_to(ConnectionId(10)), vec![relayed(&ts, &join, id)]);
    let membership = ts.server.store.find_membership(carol_ref, channel).unwrap();
    assert_eq!(ts.server.store.membership(membership).unwrap().mode, ChannelUserMode::empty());
    assert_eq!(ts.server.store.channel(channel).unwrap().user_count, 2);
}

#[test]
fn notify_list_records_are_applied_one_by_one()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (channel, id) = far_channel(&mut ts);

    let mut payload = NotifyPayload::new(NotifyType::Join).id_arg(remote_client_id(5, 1)).id_arg(id).encode();
    payload.extend(NotifyPayload::new(NotifyType::Join).id_arg(remote_client_id(5, 2)).id_arg(id).encode());
    let packet = Packet::new(PacketType::Notify, payload).with_src(router_id()).with_flags(PacketFlags::LIST);
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.channel_members(channel).len(), 2);
}

#[test]
fn notify_from_client_is_ignored()
{
    let mut ts = TestServer::new(ServerType::Server);
    let (_, alice) = ts.connect_client(10, "alice", None);

    let signoff = NotifyPayload::new(NotifyType::Signoff).id_arg(alice);
    let packet = Packet::new(PacketType::Notify, signoff.encode()).with_src(alice);
    ts.receive(ConnectionId(10), packet);

    let client = ts.server.conn_client(ConnectionId(10)).unwrap();
    assert!(!ts.server.store.client(client).unwrap().is_zombie());
}

#[test]
fn founder_key_from_router_is_kept_when_mode_is_unchanged()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (channel, id) = far_channel(&mut ts);
    ts.server.store.channel_mut(channel).unwrap().mode = ChannelMode::FOUNDER_AUTH;

    let founder = public_key(6);
    let cmode = NotifyPayload::new(NotifyType::CmodeChange)
        .id_arg(router_id())
        .u32_arg(ChannelMode::FOUNDER_AUTH.bits())
        .opt_arg(None::<Vec<u8>>)
        .opt_arg(None::<Vec<u8>>)
        .opt_arg(None::<Vec<u8>>)
        .arg(founder.encode());
    let packet = ts.notify_from(router_id(), id, cmode);
    ts.receive(ROUTER_CONN, packet);

    let entry = ts.server.store.channel(channel).unwrap();
    assert_eq!(entry.founder_key, Some(founder));
    assert_eq!(entry.mode, ChannelMode::FOUNDER_AUTH);
    assert_eq!(ts.transport.events(), vec![]);
}

#[test]
fn cmode_change_from_router_is_applied_and_relayed()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (alice_ref, _) = ts.connect_client(10, "alice", None);
    let (channel, id) = far_channel(&mut ts);
    ts.join(alice_ref, channel, ChannelUserMode::empty());

    let cmode = NotifyPayload::new(NotifyType::CmodeChange).id_arg(router_id()).u32_arg(ChannelMode::TOPIC.bits());
    let packet = ts.notify_from(router_id(), id, cmode.clone());
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.channel(channel).unwrap().mode, ChannelMode::TOPIC);
    assert_eq!(ts.transport.sent_to(ConnectionId(10)), vec![relayed(&ts, &cmode, id)]);
}

/// A router with server s2 on connection 20, carol behind it, and a channel
/// of our cell she is on
fn cell_setup(ts: &mut TestServer) -> (ChannelRef, ChannelId, ServerId, MembershipRef, ClientId)
{
    let (leaf, leaf_id) = ts.connect_server(20, 2);
    let carol = remote_client_id(2, 5);
    let carol_ref = ts.remote_client(ListKind::Local, leaf, carol, "carol");
    let id = channel_id(my_addr(), 3);
    let channel = ts.channel(ListKind::Local, "#cell", id, None);
    let membership = ts.join(carol_ref, channel, ChannelUserMode::empty());
    (channel, id, leaf_id, membership, carol)
}

#[test]
fn cmode_change_without_rights_is_answered_with_our_mode()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (channel, id, _, _, dave, _) = kick_setup(&mut ts, ChannelUserMode::empty());

    let cmode = NotifyPayload::new(NotifyType::CmodeChange).id_arg(dave).u32_arg(ChannelMode::TOPIC.bits());
    let packet = ts.notify_from(router_id(), id, cmode);
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.channel(channel).unwrap().mode, ChannelMode::empty());
    let ours = NotifyPayload::new(NotifyType::CmodeChange).id_arg(ts.server.id).u32_arg(0);
    assert_eq!(ts.transport.sent_to(ROUTER_CONN), vec![relayed(&ts, &ours, id)]);
    assert_eq!(ts.transport.sent_to(ConnectionId(10)), vec![]);
}

#[test]
fn server_may_not_remove_founder_mode()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let (channel, id, leaf_id, _, _) = cell_setup(&mut ts);
    {
        let entry = ts.server.store.channel_mut(channel).unwrap();
        entry.mode = ChannelMode::FOUNDER_AUTH;
        entry.founder_key = Some(public_key(6));
    }

    let cmode = NotifyPayload::new(NotifyType::CmodeChange).id_arg(leaf_id).u32_arg(0);
    let packet = ts.notify_from(leaf_id, id, cmode);
    ts.receive(ConnectionId(20), packet);

    let entry = ts.server.store.channel(channel).unwrap();
    assert_eq!(entry.mode, ChannelMode::FOUNDER_AUTH);
    assert_eq!(entry.founder_key, Some(public_key(6)));

    // The correction carries the founder key
    let ours = NotifyPayload::new(NotifyType::CmodeChange)
        .id_arg(ts.server.id)
        .u32_arg(ChannelMode::FOUNDER_AUTH.bits())
        .opt_arg(None::<Vec<u8>>)
        .opt_arg(None::<Vec<u8>>)
        .opt_arg(None::<Vec<u8>>)
        .arg(public_key(6).encode());
    assert_eq!(ts.transport.sent_to(ConnectionId(20)), vec![relayed(&ts, &ours, id)]);
}

#[test]
fn dropping_private_key_mode_rekeys_the_channel()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (alice_ref, _) = ts.connect_client(10, "alice", None);
    let (channel, id) = far_channel(&mut ts);
    ts.join(alice_ref, channel, ChannelUserMode::empty());
    ts.server.store.channel_mut(channel).unwrap().mode = ChannelMode::PRIVKEY;

    let cmode = NotifyPayload::new(NotifyType::CmodeChange).id_arg(router_id()).u32_arg(0);
    let packet = ts.notify_from(router_id(), id, cmode.clone());
    ts.receive(ROUTER_CONN, packet);

    let entry = ts.server.store.channel(channel).unwrap();
    assert_eq!(entry.mode, ChannelMode::empty());
    assert!(entry.key.is_some());

    let key = ts.server.channel_key_packet(channel).unwrap();
    assert_eq!(ts.transport.sent_to(ConnectionId(10)), vec![key, relayed(&ts, &cmode, id)]);
}

#[test]
fn founder_claim_with_wrong_key_is_downgraded()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let (channel, id, leaf_id, membership, carol) = cell_setup(&mut ts);
    {
        let entry = ts.server.store.channel_mut(channel).unwrap();
        entry.mode = ChannelMode::FOUNDER_AUTH;
        entry.founder_key = Some(public_key(6));
    }

    let cumode = NotifyPayload::new(NotifyType::CumodeChange)
        .id_arg(leaf_id)
        .u32_arg((ChannelUserMode::CHANFO | ChannelUserMode::CHANOP).bits())
        .id_arg(carol)
        .arg(public_key(7).encode());
    let packet = ts.notify_from(leaf_id, id, cumode);
    ts.receive(ConnectionId(20), packet);

    assert_eq!(ts.server.store.membership(membership).unwrap().mode, ChannelUserMode::CHANOP);
    let forced = NotifyPayload::new(NotifyType::CumodeChange)
        .id_arg(ts.server.id)
        .u32_arg(ChannelUserMode::CHANOP.bits())
        .id_arg(carol);
    assert_eq!(ts.transport.sent_to(ConnectionId(20)), vec![relayed(&ts, &forced, id)]);
}

#[test]
fn founder_claim_with_our_key_is_accepted()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let (channel, id, leaf_id, membership, carol) = cell_setup(&mut ts);
    {
        let entry = ts.server.store.channel_mut(channel).unwrap();
        entry.mode = ChannelMode::FOUNDER_AUTH;
        entry.founder_key = Some(public_key(6));
    }

    let cumode = NotifyPayload::new(NotifyType::CumodeChange)
        .id_arg(leaf_id)
        .u32_arg((ChannelUserMode::CHANFO | ChannelUserMode::CHANOP).bits())
        .id_arg(carol)
        .arg(public_key(6).encode());
    let packet = ts.notify_from(leaf_id, id, cumode);
    ts.receive(ConnectionId(20), packet);

    assert_eq!(
        ts.server.store.membership(membership).unwrap().mode,
        ChannelUserMode::CHANFO | ChannelUserMode::CHANOP
    );
    assert_eq!(ts.transport.sent_to(ConnectionId(20)), vec![]);
}

#[test]
fn cumode_change_from_router_is_applied_and_relayed()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (channel, id, alice_ref, _, dave, dave_ref) = kick_setup(&mut ts, ChannelUserMode::empty());

    let cumode = NotifyPayload::new(NotifyType::CumodeChange)
        .id_arg(remote_client_id(5, 3))
        .u32_arg(ChannelUserMode::CHANOP.bits())
        .id_arg(dave);
    let packet = ts.notify_from(router_id(), id, cumode.clone());
    ts.receive(ROUTER_CONN, packet);

    let membership = ts.server.store.find_membership(dave_ref, channel).unwrap();
    assert_eq!(ts.server.store.membership(membership).unwrap().mode, ChannelUserMode::CHANOP);
    assert_eq!(ts.transport.sent_to(ConnectionId(10)), vec![relayed(&ts, &cumode, id)]);
    let alice = ts.server.store.find_membership(alice_ref, channel).unwrap();
    assert_eq!(ts.server.store.membership(alice).unwrap().mode, ChannelUserMode::empty());
}

#[test]
fn invite_list_follows_router_updates()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (channel, id) = far_channel(&mut ts);
    let entries = vec![ListEntry::Pattern("*@example.org".to_string())];

    let add = NotifyPayload::new(NotifyType::Invite)
        .id_arg(id)
        .opt_arg(None::<Vec<u8>>)
        .opt_arg(None::<Vec<u8>>)
        .arg(vec![0])
        .arg(encode_entry_list(&entries));
    let packet = ts.notify_from(router_id(), id, add);
    ts.receive(ROUTER_CONN, packet);
    assert_eq!(ts.server.store.channel(channel).unwrap().invite_list, entries);

    let del = NotifyPayload::new(NotifyType::Invite)
        .id_arg(id)
        .opt_arg(None::<Vec<u8>>)
        .opt_arg(None::<Vec<u8>>)
        .arg(vec![1])
        .arg(encode_entry_list(&entries));
    let packet = ts.notify_from(router_id(), id, del);
    ts.receive(ROUTER_CONN, packet);
    assert_eq!(ts.server.store.channel(channel).unwrap().invite_list, vec![]);

    // Leaf servers keep these to themselves
    assert_eq!(ts.transport.events(), vec![]);
}

#[test]
fn router_passes_ban_list_to_servers_only()
{
    let mut ts = TestServer::new(ServerType::Router).with_router();
    let (channel, id, _, _, _) = cell_setup(&mut ts);
    let (alice_ref, _) = ts.connect_client(10, "alice", None);
    ts.join(alice_ref, channel, ChannelUserMode::empty());
    let carol = ListEntry::Client(remote_client_id(2, 5));

    let ban = NotifyPayload::new(NotifyType::Ban)
        .id_arg(id)
        .arg(vec![0])
        .arg(encode_entry_list(std::iter::once(&carol)));
    let packet = ts.notify_from(router_id(), id, ban.clone());
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.channel(channel).unwrap().ban_list, vec![carol]);
    assert_eq!(ts.transport.sent_to(ConnectionId(20)), vec![relayed(&ts, &ban, id)]);
    assert_eq!(ts.transport.sent_to(ConnectionId(10)), vec![]);
}

#[test]
fn topic_from_router_is_stored()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (alice_ref, _) = ts.connect_client(10, "alice", None);
    let (channel, id) = far_channel(&mut ts);
    ts.join(alice_ref, channel, ChannelUserMode::empty());

    let topic = NotifyPayload::new(NotifyType::TopicSet).id_arg(router_id()).arg(b"Rust talk".to_vec());
    let packet = ts.notify_from(router_id(), id, topic.clone());
    ts.receive(ROUTER_CONN, packet.clone());

    assert_eq!(ts.server.store.channel(channel).unwrap().topic.as_deref(), Some("Rust talk"));
    assert_eq!(ts.transport.sent_to(ConnectionId(10)), vec![relayed(&ts, &topic, id)]);

    // The same topic again is not news
    ts.transport.drain();
    ts.receive(ROUTER_CONN, packet);
    assert_eq!(ts.transport.events(), vec![]);
}

/// alice is local, carol and dave are remote; carol is an operator
fn kick_setup(ts: &mut TestServer, alice_mode: ChannelUserMode) -> (ChannelRef, ChannelId, ClientRef, ClientId, ClientId, ClientRef)
{
    let (alice_ref, alice) = ts.connect_client(10, "alice", None);
    let (channel, id) = far_channel(ts);
    let router = ts.router_ref();
    let carol_ref = ts.remote_client(ListKind::Global, router, remote_client_id(5, 3), "carol");
    let dave = remote_client_id(5, 4);
    let dave_ref = ts.remote_client(ListKind::Global, router, dave, "dave");
    ts.join(alice_ref, channel, alice_mode);
    ts.join(carol_ref, channel, ChannelUserMode::CHANOP);
    ts.join(dave_ref, channel, ChannelUserMode::empty());
    ts.server.store.channel_mut(channel).unwrap().global_users = true;
    (channel, id, alice_ref, alice, dave, dave_ref)
}

#[test]
fn founder_cannot_be_kicked()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (channel, id, alice_ref, alice, _, _) = kick_setup(&mut ts, ChannelUserMode::CHANFO);

    let kick = NotifyPayload::new(NotifyType::Kicked)
        .id_arg(alice)
        .arg(b"bye".to_vec())
        .id_arg(remote_client_id(5, 3));
    let packet = ts.notify_from(router_id(), id, kick);
    ts.receive(ROUTER_CONN, packet);

    assert!(ts.server.store.find_membership(alice_ref, channel).is_some());
    assert_eq!(ts.transport.events(), vec![]);
}

#[test]
fn operator_can_kick_a_member()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (channel, id, _, _, dave, dave_ref) = kick_setup(&mut ts, ChannelUserMode::empty());

    let kick = NotifyPayload::new(NotifyType::Kicked)
        .id_arg(dave)
        .arg(b"bye".to_vec())
        .id_arg(remote_client_id(5, 3));
    let packet = ts.notify_from(router_id(), id, kick.clone());
    ts.receive(ROUTER_CONN, packet);

    assert!(ts.server.store.find_membership(dave_ref, channel).is_none());
    assert_eq!(ts.server.store.channel(channel).unwrap().user_count, 2);
    assert_eq!(ts.transport.sent_to(ConnectionId(10)), vec![relayed(&ts, &kick, id)]);
}

#[test]
fn kick_by_plain_member_is_refused()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (channel, id, alice_ref, _, dave, _) = kick_setup(&mut ts, ChannelUserMode::empty());

    let kick = NotifyPayload::new(NotifyType::Kicked).id_arg(remote_client_id(5, 3)).opt_arg(None::<Vec<u8>>).id_arg(dave);
    let packet = ts.notify_from(router_id(), id, kick);
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.channel_members(channel).len(), 3);
    assert!(ts.server.store.find_membership(alice_ref, channel).is_some());
    assert_eq!(ts.transport.events(), vec![]);
}

#[test]
fn leave_removes_the_member_and_is_relayed()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (channel, id, _, _, dave, dave_ref) = kick_setup(&mut ts, ChannelUserMode::empty());

    let leave = NotifyPayload::new(NotifyType::Leave).id_arg(dave);
    let packet = ts.notify_from(router_id(), id, leave.clone());
    ts.receive(ROUTER_CONN, packet);

    assert!(ts.server.store.find_membership(dave_ref, channel).is_none());
    assert!(ts.server.store.client(dave_ref).unwrap().is_registered());
    assert_eq!(ts.server.store.channel(channel).unwrap().user_count, 2);
    assert_eq!(ts.transport.sent_to(ConnectionId(10)), vec![relayed(&ts, &leave, id)]);
}

#[test]
fn leave_from_a_non_member_is_ignored()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (channel, id, _, _, _, _) = kick_setup(&mut ts, ChannelUserMode::empty());
    let router = ts.router_ref();
    let erin = remote_client_id(5, 6);
    ts.remote_client(ListKind::Global, router, erin, "erin");

    let leave = NotifyPayload::new(NotifyType::Leave).id_arg(erin);
    let packet = ts.notify_from(router_id(), id, leave);
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.channel_members(channel).len(), 3);
    assert_eq!(ts.transport.events(), vec![]);
}

#[test]
fn signoff_tells_the_channels_and_leaves_a_zombie()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (channel, id, _, _, dave, dave_ref) = kick_setup(&mut ts, ChannelUserMode::empty());

    let signoff = NotifyPayload::new(NotifyType::Signoff).id_arg(dave).arg(b"gone fishing".to_vec());
    let packet = ts.notify_from(router_id(), id, signoff.clone());
    ts.receive(ROUTER_CONN, packet);

    let entry = ts.server.store.client(dave_ref).unwrap();
    assert!(entry.is_zombie());
    assert!(entry.channels.is_empty());
    assert!(ts.server.store.find_membership(dave_ref, channel).is_none());
    assert_eq!(ts.transport.sent_to(ConnectionId(10)), vec![relayed(&ts, &signoff, id)]);
}

#[test]
fn nick_change_renames_and_tells_channel_members()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (_, _, _, alice, dave, dave_ref) = kick_setup(&mut ts, ChannelUserMode::empty());
    let new_id = remote_client_id(5, 9);

    let change = NotifyPayload::new(NotifyType::NickChange).id_arg(dave).id_arg(new_id).arg(b"david".to_vec());
    let packet = ts.notify_from(router_id(), dave, change.clone());
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.find_client_by_id(ListKind::Global, &new_id), Some(dave_ref));
    assert_eq!(ts.server.store.find_client_by_id(ListKind::Global, &dave), None);
    assert_eq!(ts.server.store.client(dave_ref).unwrap().nickname.as_deref(), Some("david"));
    assert_eq!(ts.transport.sent_to(ConnectionId(10)), vec![relayed(&ts, &change, alice)]);
}

#[test]
fn umode_change_is_counted()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let router = ts.router_ref();
    let carol = remote_client_id(5, 3);
    let carol_ref = ts.remote_client(ListKind::Global, router, carol, "carol");

    let umode = NotifyPayload::new(NotifyType::UmodeChange).id_arg(carol).u32_arg(UserMode::GONE.bits());
    let packet = ts.notify_from(router_id(), carol, umode);
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.client(carol_ref).unwrap().mode, UserMode::GONE);
    assert_eq!(ts.server.stats().aways, 1);
    assert_eq!(ts.server.stats().my_aways, 0);
}

#[test]
fn killed_local_client_is_disconnected()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (alice_ref, alice) = ts.connect_client(10, "alice", None);

    let kill = NotifyPayload::new(NotifyType::Killed).id_arg(alice).arg(b"spam".to_vec()).id_arg(router_id());
    let packet = ts.notify_from(router_id(), alice, kill);
    ts.receive(ROUTER_CONN, packet.clone());

    // The client sees why it is going before the connection closes
    assert_eq!(ts.transport.sent_to(ConnectionId(10)), vec![packet]);
    assert_eq!(ts.transport.closed(), vec![(ConnectionId(10), StatusCode::Ok)]);
    assert!(ts.server.connection(ConnectionId(10)).is_none());
    assert!(ts.server.store.client(alice_ref).unwrap().is_zombie());
    assert_eq!(ts.server.stats().my_clients, 0);
}

#[test]
fn server_signoff_removes_its_clients()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (alice_ref, _) = ts.connect_client(10, "alice", None);
    let (channel, _) = far_channel(&mut ts);
    let router = ts.router_ref();

    let far_id = idgen::create_server_id(addr(5, 1), 706);
    let mut far = ServerEntry::new(Some("far.test".to_string()), ServerType::Server, Some(far_id), Some(router), 0);
    far.data.status.insert(EntryStatus::REGISTERED);
    let far_ref = ts.server.store.add_server(ListKind::Global, far).unwrap();

    let carol = remote_client_id(5, 3);
    let carol_ref = ts.remote_client(ListKind::Global, far_ref, carol, "carol");
    ts.join(alice_ref, channel, ChannelUserMode::empty());
    ts.join(carol_ref, channel, ChannelUserMode::empty());

    let signoff = NotifyPayload::new(NotifyType::ServerSignoff).id_arg(far_id);
    let packet = ts.notify_from(router_id(), ts.server.id, signoff);
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.find_server_by_id(ListKind::Global, &far_id), None);
    assert_eq!(ts.server.store.find_client_by_id(ListKind::Global, &carol), None);
    assert_eq!(ts.server.store.channel_members(channel).len(), 1);
    assert!(notify_types(&ts.transport.sent_to(ConnectionId(10))).contains(&NotifyType::ServerSignoff));
}

#[test]
fn signoff_of_unknown_server_still_removes_listed_clients()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let router = ts.router_ref();
    let carol = remote_client_id(5, 3);
    ts.remote_client(ListKind::Global, router, carol, "carol");

    let unknown = idgen::create_server_id(addr(5, 1), 706);
    let signoff = NotifyPayload::new(NotifyType::ServerSignoff).id_arg(unknown).id_arg(carol);
    let packet = ts.notify_from(router_id(), ts.server.id, signoff);
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.clients().count(), 0);
}

/// A backup router with server s2 on connection 20 and a server behind it
fn backup_cell(ts: &mut TestServer) -> (ServerRef, ServerId, ServerId)
{
    let (s2_ref, s2) = ts.connect_server(20, 2);
    let far_id = idgen::create_server_id(addr(2, 5), 706);
    let mut far = ServerEntry::new(Some("far.test".to_string()), ServerType::Server, Some(far_id), Some(s2_ref), 0);
    far.data.status.insert(EntryStatus::REGISTERED);
    ts.server.store.add_server(ListKind::Global, far).unwrap();
    (s2_ref, s2, far_id)
}

#[test]
fn idle_backup_ignores_server_signoff_from_a_server()
{
    let mut ts = TestServer::new(ServerType::BackupRouter);
    let (s2_ref, s2, far_id) = backup_cell(&mut ts);
    assert!(ts.server.store.server(s2_ref).unwrap().is_disabled());

    let signoff = NotifyPayload::new(NotifyType::ServerSignoff).id_arg(far_id);
    let packet = ts.notify_from(s2, ts.server.id, signoff);
    ts.receive(ConnectionId(20), packet);

    assert!(ts.server.store.find_server_by_id(ListKind::Global, &far_id).is_some());
}

#[test]
fn standing_in_backup_takes_server_signoff_from_a_server()
{
    let mut ts = TestServer::new(ServerType::BackupRouter);
    let (s2_ref, s2, far_id) = backup_cell(&mut ts);
    assert!(ts.server.start_backup_primary());
    assert!(ts.server.is_backup_primary());
    assert!(!ts.server.store.server(s2_ref).unwrap().is_disabled());

    let signoff = NotifyPayload::new(NotifyType::ServerSignoff).id_arg(far_id);
    let packet = ts.notify_from(s2, ts.server.id, signoff);
    ts.receive(ConnectionId(20), packet);

    assert_eq!(ts.server.store.find_server_by_id(ListKind::Global, &far_id), None);
}

#[test]
fn going_idle_disables_the_cell_again()
{
    let mut ts = TestServer::new(ServerType::BackupRouter);
    assert!(ts.server.start_backup_primary());
    let (s2_ref, _) = ts.connect_server(20, 2);
    assert!(!ts.server.store.server(s2_ref).unwrap().is_disabled());

    assert!(ts.server.stop_backup_primary());
    assert!(!ts.server.stop_backup_primary());
    assert!(ts.server.store.server(s2_ref).unwrap().is_disabled());

    ts.server.send_packet(ConnectionId(20), Packet::new(PacketType::Notify, Vec::new()));
    assert_eq!(ts.transport.events(), vec![]);
}

#[test]
fn only_a_backup_router_stands_in()
{
    let mut ts = TestServer::new(ServerType::Router);
    assert!(!ts.server.start_backup_primary());
    assert!(!ts.server.is_backup_primary());
}

#[test]
fn error_from_router_deletes_unknown_client()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let router = ts.router_ref();
    let carol = remote_client_id(5, 3);
    ts.remote_client(ListKind::Global, router, carol, "carol");

    let error = NotifyPayload::new(NotifyType::Error).arg(vec![StatusCode::NoSuchClientId as u8]).id_arg(carol);
    let packet = ts.notify_from(router_id(), ts.server.id, error);
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.find_client_by_id(ListKind::Global, &carol), None);
}

#[test]
fn channel_change_from_router_moves_the_channel()
{
    let mut ts = TestServer::new(ServerType::Server).with_router();
    let (alice_ref, _) = ts.connect_client(10, "alice", None);
    let (channel, old_id) = far_channel(&mut ts);
    ts.join(alice_ref, channel, ChannelUserMode::empty());
    let new_id = channel_id(addr(0, 100), 77);

    let change = NotifyPayload::new(NotifyType::ChannelChange).id_arg(old_id).id_arg(new_id);
    let packet = ts.notify_from(router_id(), old_id, change);
    ts.receive(ROUTER_CONN, packet);

    assert_eq!(ts.server.store.find_channel_by_id(ListKind::Global, &new_id), Some(channel));
    assert_eq!(ts.server.store.find_channel_by_id(ListKind::Global, &old_id), None);

    let announced = ChannelPayload { name: "#far".to_string(), id: new_id, mode: 0 };
    let upstream = ts.transport.sent_to(ROUTER_CONN);
    assert_eq!(upstream[0], Packet::new(PacketType::NewChannel, announced.encode()).with_src(ts.server.id));

    // Members get the new key
    assert!(ts
        .transport
        .sent_to(ConnectionId(10))
        .iter()
        .any(|p| p.packet_type == PacketType::ChannelKey && p.dst_id == Some(new_id.into())));
}
