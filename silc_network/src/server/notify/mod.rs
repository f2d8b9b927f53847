//! NOTIFY processing. Every notify arrives from a server or router; the
//! header checks and re-broadcast happen here, the per-type state changes in
//! the submodules.

use super::*;

mod channel;
mod client;
mod network;

/// One notify record being processed, with the packet that carried it
pub(super) struct Notify<'a>
{
    pub conn: ConnectionId,
    pub conn_type: ConnectionType,
    pub packet: &'a Packet,
    /// The encoded record, relayed unchanged
    pub raw: &'a [u8],
    pub payload: NotifyPayload,
}

impl Notify<'_>
{
    /// The channel a notify is addressed to
    fn dst_channel(&self) -> Result<ChannelId, ParseError>
    {
        match self.packet.dst_id
        {
            Some(EntityId::Channel(id)) => Ok(id),
            Some(other) => Err(ParseError::UnexpectedIdType(other.id_type())),
            None => Err(ParseError::Invalid("notify destination")),
        }
    }

    fn dst_is_client(&self) -> bool
    {
        matches!(self.packet.dst_id, Some(EntityId::Client(_)))
    }
}

impl Server
{
    pub(super) fn process_notify(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        self.process_notify_record(conn, packet, &packet.payload)
    }

    /// A NOTIFY packet with the LIST flag: each record is processed as if it
    /// had arrived alone, and a bad record does not stop the rest
    pub(super) fn process_notify_list(&mut self, conn: ConnectionId, packet: &Packet) -> HandlerResult
    {
        if self.conn_type(conn) == ConnectionType::Client || !matches!(packet.src_id, Some(EntityId::Server(_)))
        {
            tracing::debug!("Notify list from {} not from a server, dropped", conn);
            return Ok(());
        }

        for record in split_notify_list(&packet.payload)
        {
            if let Err(e) = self.process_notify_record(conn, packet, record)
            {
                tracing::debug!("Notify list record dropped: {}", e);
            }
        }
        Ok(())
    }

    fn process_notify_record(&mut self, conn: ConnectionId, packet: &Packet, raw: &[u8]) -> HandlerResult
    {
        let conn_type = self.conn_type(conn);
        if conn_type == ConnectionType::Client
        {
            tracing::debug!("Notify received from client, dropped");
            return Ok(());
        }
        if !matches!(packet.src_id, Some(EntityId::Server(_)))
        {
            return Err(ParseError::Invalid("notify source").into());
        }
        // Notifies for one of our clients are passed on before we look at them
        if let Some(dst @ EntityId::Client(_)) = packet.dst_id
        {
            if let Some(route) = self.route(&dst).filter(|r| *r != conn)
            {
                self.send_packet(route, packet.with_payload(raw.to_vec()));
            }
        }

        let payload = NotifyPayload::decode(raw)?;

        if self.is_router() && conn_type == ConnectionType::Server && !packet.is_broadcast()
        {
            tracing::debug!("Broadcasting received {} notify", payload.notify_type);
            let mut out = Packet::new(PacketType::Notify, raw.to_vec()).with_src(self.id).with_flags(packet.flags);
            if let Some(EntityId::Channel(id)) = packet.dst_id
            {
                out = out.with_dst(id);
            }
            self.backup_send(Some(conn), out.clone());
            self.send_to_primary(out);
        }

        if payload.args.is_empty()
        {
            tracing::debug!("{} notify without arguments, dropped", payload.notify_type);
            return Ok(());
        }

        let notify = Notify { conn, conn_type, packet, raw, payload };
        tracing::trace!("{} notify from {}", notify.payload.notify_type, conn);

        match notify.payload.notify_type
        {
            NotifyType::Join => self.notify_join(&notify),
            NotifyType::Leave => self.notify_leave(&notify),
            NotifyType::Signoff => self.notify_signoff(&notify),
            NotifyType::TopicSet => self.notify_topic_set(&notify),
            NotifyType::NickChange => self.notify_nick_change(&notify),
            NotifyType::CmodeChange => self.notify_cmode_change(&notify),
            NotifyType::CumodeChange => self.notify_cumode_change(&notify),
            NotifyType::Invite => self.notify_invite(&notify),
            NotifyType::ChannelChange => self.notify_channel_change(&notify),
            NotifyType::ServerSignoff => self.notify_server_signoff(&notify),
            NotifyType::Kicked => self.notify_kicked(&notify),
            NotifyType::Killed => self.notify_killed(&notify),
            NotifyType::UmodeChange => self.notify_umode_change(&notify),
            NotifyType::Ban => self.notify_ban(&notify),
            NotifyType::Error => self.notify_error(&notify),
            NotifyType::None | NotifyType::Motd | NotifyType::Watch => Ok(()),
        }
    }

    /// Pass a notify on to a channel as we received it
    fn relay_notify_to_channel(&mut self, notify: &Notify, sender: Option<ConnectionId>, channel: ChannelRef, send_to_clients: bool)
    {
        let id = match self.store.channel(channel)
        {
            Ok(c) => c.id,
            Err(_) => return,
        };
        let packet = Packet::new(PacketType::Notify, notify.raw.to_vec()).with_src(self.id).with_dst(id);
        self.send_to_channel(sender, channel, packet, false, send_to_clients);
    }

    /// The registered client an argument names, if we know it
    fn notify_client(&self, notify: &Notify, arg: u8) -> Result<Option<ClientRef>, ParseError>
    {
        let id = notify.payload.client_id(arg)?;
        Ok(self.find_registered_client(&id))
    }
}
