//! Server, client and channel ID allocation

use crate::crypto::NicknameHasher;
use crate::errors::IdError;
use crate::id::*;
use crate::idlist::{casefold, EntityStore, ListKind};
use rand::Rng;
use std::net::IpAddr;

/// Marker carried in the random field of a server's own ID
const SERVER_ID_RND: u16 = 0xff;

pub fn create_server_id(ip: IpAddr, port: u16) -> ServerId {
    let id = ServerId {
        ip: IdIp::from_addr(ip),
        port,
        rnd: SERVER_ID_RND,
    };
    tracing::debug!("New server id {}", EntityId::from(id));
    id
}

/// Probe upward from a random start. On the first collision the sweep restarts
/// at zero; wrapping back to zero after that means every value is taken.
fn probe<T>(start: T, mut taken: impl FnMut(T) -> bool, step: impl Fn(T) -> T, zero: T) -> Option<T>
where
    T: Copy + PartialEq,
{
    let mut value = start;
    let mut finding = false;
    loop {
        if !taken(value) {
            return Some(value);
        }
        value = step(value);
        if finding && value == zero {
            return None;
        }
        if !finding {
            value = zero;
            finding = true;
        }
    }
}

/// Allocate a client ID for `nickname` under `server_id`. The ID is not added
/// to the store; callers add it once they commit the registration.
pub fn create_client_id(
    store: &EntityStore,
    server_id: &ServerId,
    rng: &mut impl Rng,
    hasher: &dyn NicknameHasher,
    nickname: &str,
) -> Result<ClientId, IdError> {
    let hash = hasher.hash(casefold(nickname).as_bytes());
    let make = |rnd: u8| ClientId {
        ip: server_id.ip,
        rnd,
        hash,
    };

    let rnd = probe(
        rng.gen::<u8>(),
        |rnd| {
            let id = make(rnd);
            store.find_client_by_id(ListKind::Local, &id).is_some()
                || store.find_client_by_id(ListKind::Global, &id).is_some()
        },
        |rnd| rnd.wrapping_add(1),
        0,
    )
    .ok_or(IdError::CollisionExhausted)?;

    let id = make(rnd);
    tracing::debug!("New client id {} for {}", EntityId::from(id), nickname);
    Ok(id)
}

/// Allocate a channel ID from a router's address space. Only our own cell's
/// channels can collide with it, so only the local list is checked.
pub fn create_channel_id(
    store: &EntityStore,
    router_id: &ServerId,
    rng: &mut impl Rng,
) -> Result<ChannelId, IdError> {
    let make = |rnd: u16| ChannelId {
        ip: router_id.ip,
        port: router_id.port,
        rnd,
    };

    let rnd = probe(
        rng.gen::<u16>(),
        |rnd| store.find_channel_by_id(ListKind::Local, &make(rnd)).is_some(),
        |rnd| rnd.wrapping_add(1),
        0,
    )
    .ok_or(IdError::CollisionExhausted)?;

    let id = make(rnd);
    tracing::debug!("New channel id {}", EntityId::from(id));
    Ok(id)
}

/// A server ID is only valid if it was derived from the address the server
/// connected from
pub fn is_valid_server_id(id: &ServerId, remote: &IpAddr) -> bool {
    id.ip.matches(remote)
}
