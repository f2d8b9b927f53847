//! Framing of the list packet variants. Each splitter yields whole records and
//! stops at the first record that does not fit, leaving the remainder unread.

/// Largest ID record a NEW_ID list may carry
pub const MAX_ID_RECORD_LEN: usize = 256;
/// Largest record a NEW_CHANNEL list may carry
pub const MAX_CHANNEL_RECORD_LEN: usize = 512;

fn be16(buf: &[u8], at: usize) -> Option<usize> {
    Some(u16::from_be_bytes([*buf.get(at)?, *buf.get(at + 1)?]) as usize)
}

/// Notify list: each record carries its own total length at offset 2
pub fn split_notify_list(mut buf: &[u8]) -> Vec<&[u8]> {
    let mut records = Vec::new();
    while !buf.is_empty() {
        let len = match be16(buf, 2) {
            Some(len) if len >= 4 && len <= buf.len() => len,
            _ => break,
        };
        records.push(&buf[..len]);
        buf = &buf[len..];
    }
    records
}

/// NEW_ID list: `[u16 id_type][u16 id_len][id]` records
pub fn split_id_list(mut buf: &[u8]) -> Vec<&[u8]> {
    let mut records = Vec::new();
    while !buf.is_empty() {
        let id_len = match be16(buf, 2) {
            Some(len) if len <= MAX_ID_RECORD_LEN => len,
            _ => break,
        };
        let total = 4 + id_len;
        if total > buf.len() {
            break;
        }
        records.push(&buf[..total]);
        buf = &buf[total..];
    }
    records
}

/// NEW_CHANNEL list: `[u16 name_len][name][u16 id_len][id][u32 mode]` records
pub fn split_channel_list(mut buf: &[u8]) -> Vec<&[u8]> {
    let mut records = Vec::new();
    while !buf.is_empty() {
        let name_len = match be16(buf, 0) {
            Some(len) if len <= buf.len() => len,
            _ => break,
        };
        let id_len = match be16(buf, 2 + name_len) {
            Some(len) if len <= buf.len() => len,
            _ => break,
        };
        let total = 8 + name_len + id_len;
        if total > buf.len() || total > MAX_CHANNEL_RECORD_LEN {
            break;
        }
        records.push(&buf[..total]);
        buf = &buf[total..];
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{NotifyPayload, NotifyType};
    use pretty_assertions::assert_eq;

    #[test]
    fn notify_list_splits_on_embedded_length() {
        let one = NotifyPayload::new(NotifyType::Motd).arg(b"hello".to_vec()).encode();
        let two = NotifyPayload::new(NotifyType::None).encode();
        let mut list = one.clone();
        list.extend_from_slice(&two);

        assert_eq!(split_notify_list(&list), vec![&one[..], &two[..]]);
    }

    #[test]
    fn id_list_stops_at_partial_record() {
        let list = [0, 2, 0, 3, 1, 2, 3, 0, 2, 0, 9, 1];
        assert_eq!(split_id_list(&list), vec![&list[..7]]);
    }

    #[test]
    fn zero_length_notify_record_terminates() {
        let list = [0, 0, 0, 0, 0, 0];
        assert!(split_notify_list(&list).is_empty());
    }
}
