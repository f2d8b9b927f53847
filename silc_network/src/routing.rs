//! The boundary between the protocol core and the transport layer

use crate::id::ConnectionId;
use crate::wire::{Packet, StatusCode};
use parking_lot::Mutex;
use std::sync::Arc;

/// Delivers packets built by the core. Implementations queue the work; they
/// never call back into the core.
pub trait Transport
{
    /// Queue `packet` for delivery on `conn`
    fn send(&self, conn: ConnectionId, packet: Packet);

    /// Disconnect `conn`, sending a DISCONNECT with `status` and an optional
    /// message first
    fn close(&self, conn: ConnectionId, status: StatusCode, message: Option<&str>);
}

/// Something the core asked the transport to do
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent
{
    Sent(ConnectionId, Packet),
    Closed(ConnectionId, StatusCode, Option<String>),
}

/// A [`Transport`] that keeps everything it is asked to do. Clones share the
/// same record, so a caller can keep one while the server owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport
{
    events: Arc<Mutex<Vec<TransportEvent>>>,
}

impl RecordingTransport
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Remove and return everything recorded so far
    pub fn drain(&self) -> Vec<TransportEvent>
    {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn events(&self) -> Vec<TransportEvent>
    {
        self.events.lock().clone()
    }

    /// Packets sent on `conn`, in order
    pub fn sent_to(&self, conn: ConnectionId) -> Vec<Packet>
    {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Sent(c, p) if *c == conn => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent(&self) -> Vec<(ConnectionId, Packet)>
    {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Sent(c, p) => Some((*c, p.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> Vec<(ConnectionId, StatusCode)>
    {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Closed(c, s, _) => Some((*c, *s)),
                _ => None,
            })
            .collect()
    }
}

impl Transport for RecordingTransport
{
    fn send(&self, conn: ConnectionId, packet: Packet)
    {
        self.events.lock().push(TransportEvent::Sent(conn, packet));
    }

    fn close(&self, conn: ConnectionId, status: StatusCode, message: Option<&str>)
    {
        self.events
            .lock()
            .push(TransportEvent::Closed(conn, status, message.map(str::to_owned)));
    }
}
