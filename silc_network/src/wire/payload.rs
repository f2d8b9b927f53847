use super::reader::{utf8, Reader, WriteExt};
use super::NotifyType;
use crate::errors::ParseError;
use crate::id::*;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Longest channel name accepted in a channel payload
pub const MAX_CHANNEL_NAME_LEN: usize = 256;

/// One positional argument. Types are 1-based positions in the sender's
/// argument list; absent optional arguments leave a gap.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub arg_type: u8,
    pub data: Vec<u8>,
}

/// A `[u16 len][u8 type][data]` sequence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentPayload {
    args: Vec<Argument>,
}

impl ArgumentPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(reader: &mut Reader, argc: usize) -> Result<Self, ParseError> {
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            let len = reader.u16()? as usize;
            let arg_type = reader.u8()?;
            let data = reader.take(len)?.to_vec();
            args.push(Argument { arg_type, data });
        }
        Ok(Self { args })
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        for arg in &self.args {
            out.put_u16(arg.data.len() as u16);
            out.put_u8(arg.arg_type);
            out.extend_from_slice(&arg.data);
        }
    }

    pub fn push(&mut self, arg_type: u8, data: impl Into<Vec<u8>>) {
        self.args.push(Argument {
            arg_type,
            data: data.into(),
        });
    }

    pub fn get(&self, arg_type: u8) -> Option<&[u8]> {
        self.args
            .iter()
            .find(|a| a.arg_type == arg_type)
            .map(|a| a.data.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Argument> {
        self.args.iter()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// A single notify: `[u16 type][u16 len][u8 argc][arguments]`. The length
/// covers the whole record, which is what lets notify lists be sliced.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyPayload {
    pub notify_type: NotifyType,
    pub args: ArgumentPayload,
    next_arg: u8,
}

impl NotifyPayload {
    pub fn new(notify_type: NotifyType) -> Self {
        Self {
            notify_type,
            args: ArgumentPayload::new(),
            next_arg: 1,
        }
    }

    /// Append the next positional argument
    pub fn arg(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.args.push(self.next_arg, data);
        self.next_arg += 1;
        self
    }

    /// Append the next positional argument if present, keeping the numbering
    pub fn opt_arg(mut self, data: Option<impl Into<Vec<u8>>>) -> Self {
        if let Some(data) = data {
            self.args.push(self.next_arg, data);
        }
        self.next_arg += 1;
        self
    }

    pub fn id_arg(self, id: impl Into<EntityId>) -> Self {
        self.arg(IdPayload::encode(&id.into()))
    }

    pub fn u32_arg(self, v: u32) -> Self {
        self.arg(v.to_be_bytes().to_vec())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        let mut reader = Reader::new(buf);
        let notify_type = NotifyType::try_from(reader.u16()?)?;
        let len = reader.u16()? as usize;
        let argc = reader.u8()? as usize;
        if len < 5 || len > buf.len() {
            return Err(ParseError::Truncated {
                needed: len,
                available: buf.len(),
            });
        }
        let mut args_reader = Reader::new(&buf[5..len]);
        let args = ArgumentPayload::decode(&mut args_reader, argc)?;
        let next_arg = args.iter().map(|a| a.arg_type).max().unwrap_or(0) + 1;
        Ok(Self {
            notify_type,
            args,
            next_arg,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        self.args.encode_into(&mut body);
        let mut out = Vec::with_capacity(body.len() + 5);
        out.put_u16(self.notify_type as u16);
        out.put_u16((body.len() + 5) as u16);
        out.put_u8(self.args.len() as u8);
        out.extend_from_slice(&body);
        out
    }

    pub fn get(&self, arg_type: u8) -> Option<&[u8]> {
        self.args.get(arg_type)
    }

    pub fn require(&self, arg_type: u8) -> Result<&[u8], ParseError> {
        self.get(arg_type)
            .ok_or(ParseError::MissingArgument(self.notify_type, arg_type))
    }

    pub fn entity_id(&self, arg_type: u8) -> Result<EntityId, ParseError> {
        IdPayload::decode(self.require(arg_type)?)
    }

    pub fn client_id(&self, arg_type: u8) -> Result<ClientId, ParseError> {
        match self.entity_id(arg_type)? {
            EntityId::Client(id) => Ok(id),
            other => Err(ParseError::UnexpectedIdType(other.id_type())),
        }
    }

    pub fn channel_id(&self, arg_type: u8) -> Result<ChannelId, ParseError> {
        match self.entity_id(arg_type)? {
            EntityId::Channel(id) => Ok(id),
            other => Err(ParseError::UnexpectedIdType(other.id_type())),
        }
    }

    pub fn server_id(&self, arg_type: u8) -> Result<ServerId, ParseError> {
        match self.entity_id(arg_type)? {
            EntityId::Server(id) => Ok(id),
            other => Err(ParseError::UnexpectedIdType(other.id_type())),
        }
    }

    pub fn u32(&self, arg_type: u8) -> Result<Option<u32>, ParseError> {
        match self.get(arg_type) {
            None => Ok(None),
            Some(data) if data.len() == 4 => {
                Ok(Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]])))
            }
            Some(_) => Err(ParseError::Invalid("32-bit argument")),
        }
    }

    pub fn string(&self, arg_type: u8) -> Result<Option<String>, ParseError> {
        self.get(arg_type)
            .map(|data| utf8(data, "notify argument"))
            .transpose()
    }
}

/// `[u16 id_type][u16 id_len][id]`
pub struct IdPayload;

impl IdPayload {
    pub fn encode(id: &EntityId) -> Vec<u8> {
        let bytes = id.encode();
        let mut out = Vec::with_capacity(bytes.len() + 4);
        out.put_u16(id.id_type() as u16);
        out.put_u16_prefixed(&bytes);
        out
    }

    pub fn read(reader: &mut Reader) -> Result<EntityId, ParseError> {
        let id_type = IdType::try_from(reader.u16()?)?;
        let data = reader.u16_prefixed()?;
        EntityId::decode(id_type, data)
    }

    pub fn decode(buf: &[u8]) -> Result<EntityId, ParseError> {
        Self::read(&mut Reader::new(buf))
    }
}

/// An opaque public key as carried in payloads: `[u16 pk_type][u16 len][data]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    pub pk_type: u16,
    pub data: Vec<u8>,
}

impl PublicKey {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 4);
        out.put_u16(self.pk_type);
        out.put_u16_prefixed(&self.data);
        out
    }

    pub fn read(reader: &mut Reader) -> Result<Self, ParseError> {
        let pk_type = reader.u16()?;
        let data = reader.u16_prefixed()?.to_vec();
        if data.is_empty() {
            return Err(ParseError::Invalid("public key"));
        }
        Ok(Self { pk_type, data })
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        Self::read(&mut Reader::new(buf))
    }
}

/// `[u16 name_len][name][u16 id_len][id][u32 mode]`
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPayload {
    pub name: String,
    pub id: ChannelId,
    pub mode: u32,
}

impl ChannelPayload {
    pub fn read(reader: &mut Reader) -> Result<Self, ParseError> {
        let name = reader.u16_prefixed()?;
        if name.len() > MAX_CHANNEL_NAME_LEN {
            return Err(ParseError::TooLong {
                what: "channel name",
                len: name.len(),
                max: MAX_CHANNEL_NAME_LEN,
            });
        }
        let name = utf8(name, "channel name")?;
        let id = ChannelId::decode(reader.u16_prefixed()?)?;
        let mode = reader.u32()?;
        Ok(Self { name, id, mode })
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        Self::read(&mut Reader::new(buf))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u16_prefixed(self.name.as_bytes());
        out.put_u16_prefixed(&self.id.encode());
        out.put_u32(self.mode);
        out
    }
}

/// `[u16 id_len][id][u16 cipher_len][cipher][u16 key_len][key]`
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelKeyPayload {
    pub id: ChannelId,
    pub cipher: String,
    pub key: Vec<u8>,
}

impl ChannelKeyPayload {
    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        let mut reader = Reader::new(buf);
        let id = ChannelId::decode(reader.u16_prefixed()?)?;
        let cipher = utf8(reader.u16_prefixed()?, "cipher name")?;
        let key = reader.u16_prefixed()?.to_vec();
        Ok(Self { id, cipher, key })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u16_prefixed(&self.id.encode());
        out.put_u16_prefixed(self.cipher.as_bytes());
        out.put_u16_prefixed(&self.key);
        out
    }
}

/// `[u16 len][u8 command][u8 argc][u16 ident][arguments]`
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPayload {
    pub command: super::Command,
    pub ident: u16,
    pub args: ArgumentPayload,
}

impl CommandPayload {
    pub fn new(command: super::Command, ident: u16) -> Self {
        Self {
            command,
            ident,
            args: ArgumentPayload::new(),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        let mut reader = Reader::new(buf);
        let _len = reader.u16()?;
        let command =
            super::Command::from_u8(reader.u8()?).ok_or(ParseError::Invalid("command"))?;
        let argc = reader.u8()? as usize;
        let ident = reader.u16()?;
        let args = ArgumentPayload::decode(&mut reader, argc)?;
        Ok(Self {
            command,
            ident,
            args,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        self.args.encode_into(&mut body);
        let mut out = Vec::with_capacity(body.len() + 6);
        out.put_u16((body.len() + 6) as u16);
        out.put_u8(self.command as u8);
        out.put_u8(self.args.len() as u8);
        out.put_u16(self.ident);
        out.extend_from_slice(&body);
        out
    }

    /// The status carried in argument 1 of a command reply
    pub fn status(&self) -> Option<super::StatusCode> {
        self.args
            .get(1)
            .and_then(|s| s.get(1).or_else(|| s.first()))
            .and_then(|b| super::StatusCode::from_u8(*b))
    }
}

/// An entry of a channel invite or ban list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListEntry {
    Pattern(String),
    PublicKey(PublicKey),
    Client(ClientId),
}

impl ListEntry {
    fn arg_type(&self) -> u8 {
        match self {
            Self::Pattern(_) => 1,
            Self::PublicKey(_) => 2,
            Self::Client(_) => 3,
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            Self::Pattern(p) => p.as_bytes().to_vec(),
            Self::PublicKey(pk) => pk.encode(),
            Self::Client(id) => IdPayload::encode(&EntityId::Client(*id)),
        }
    }

    fn decode(arg: &Argument) -> Result<Self, ParseError> {
        match arg.arg_type {
            1 => {
                let pattern = utf8(&arg.data, "list pattern")?;
                if pattern.contains(',') {
                    return Err(ParseError::Invalid("list pattern"));
                }
                Ok(Self::Pattern(pattern))
            }
            2 => Ok(Self::PublicKey(PublicKey::decode(&arg.data)?)),
            3 => match IdPayload::decode(&arg.data)? {
                EntityId::Client(id) => Ok(Self::Client(id)),
                other => Err(ParseError::UnexpectedIdType(other.id_type())),
            },
            _ => Err(ParseError::Invalid("list entry type")),
        }
    }
}

fn decode_argument_list(buf: &[u8]) -> Result<ArgumentPayload, ParseError> {
    let mut reader = Reader::new(buf);
    let argc = reader.u16()? as usize;
    ArgumentPayload::decode(&mut reader, argc)
}

fn encode_argument_list(args: &ArgumentPayload) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_u16(args.len() as u16);
    args.encode_into(&mut out);
    out
}

/// Decode an invite/ban list: `[u16 argc][arguments]`
pub fn decode_entry_list(buf: &[u8]) -> Result<Vec<ListEntry>, ParseError> {
    decode_argument_list(buf)?
        .iter()
        .map(ListEntry::decode)
        .collect()
}

pub fn encode_entry_list<'a>(entries: impl IntoIterator<Item = &'a ListEntry>) -> Vec<u8> {
    let mut args = ArgumentPayload::new();
    for entry in entries {
        args.push(entry.arg_type(), entry.encode());
    }
    encode_argument_list(&args)
}

/// What a channel public key list record asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubkeyListAction {
    Add,
    Remove,
    /// A router announcing its complete list
    Announce,
}

/// Decode a channel public key list: `[u16 argc][arguments]`, argument type
/// 0 adds, 1 removes, 3 announces.
pub fn decode_pubkey_list(buf: &[u8]) -> Result<Vec<(PubkeyListAction, PublicKey)>, ParseError> {
    decode_argument_list(buf)?
        .iter()
        .map(|arg| {
            let action = match arg.arg_type {
                0 => PubkeyListAction::Add,
                1 => PubkeyListAction::Remove,
                3 => PubkeyListAction::Announce,
                _ => return Err(ParseError::Invalid("public key list action")),
            };
            Ok((action, PublicKey::decode(&arg.data)?))
        })
        .collect()
}

pub fn encode_pubkey_list<'a>(
    action: PubkeyListAction,
    keys: impl IntoIterator<Item = &'a PublicKey>,
) -> Vec<u8> {
    let arg_type = match action {
        PubkeyListAction::Add => 0,
        PubkeyListAction::Remove => 1,
        PubkeyListAction::Announce => 3,
    };
    let mut args = ArgumentPayload::new();
    for key in keys {
        args.push(arg_type, key.encode());
    }
    encode_argument_list(&args)
}

/// Entries of an invite/ban list that decode cleanly. Malformed entries and
/// patterns containing a comma are skipped rather than failing the list.
pub fn decode_entry_list_lenient(buf: &[u8]) -> Result<Vec<ListEntry>, ParseError> {
    Ok(decode_argument_list(buf)?
        .iter()
        .filter_map(|arg| ListEntry::decode(arg).ok())
        .collect())
}

/// `[u16 len][username][u16 len][realname]`, optionally followed by
/// `[u16 len][nickname]`
#[derive(Debug, Clone, PartialEq)]
pub struct NewClientPayload {
    pub username: String,
    pub realname: String,
    pub nickname: Option<String>,
}

impl NewClientPayload {
    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        let mut reader = Reader::new(buf);
        let username = utf8(reader.u16_prefixed()?, "username")?;
        let realname = utf8(reader.u16_prefixed()?, "real name")?;
        let nickname = if reader.is_empty() {
            None
        } else {
            Some(utf8(reader.u16_prefixed()?, "nickname")?)
        };
        Ok(Self {
            username,
            realname,
            nickname,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u16_prefixed(self.username.as_bytes());
        out.put_u16_prefixed(self.realname.as_bytes());
        if let Some(nick) = &self.nickname {
            out.put_u16_prefixed(nick.as_bytes());
        }
        out
    }
}

/// `[u16 id_len][server id][u16 name_len][name]`
#[derive(Debug, Clone, PartialEq)]
pub struct NewServerPayload {
    pub id: ServerId,
    pub name: String,
}

impl NewServerPayload {
    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        let mut reader = Reader::new(buf);
        let id = ServerId::decode(reader.u16_prefixed()?)?;
        let name = utf8(reader.u16_prefixed()?, "server name")?;
        Ok(Self { id, name })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u16_prefixed(&self.id.encode());
        out.put_u16_prefixed(self.name.as_bytes());
        out
    }
}

/// `[u16 id_len][client id][authentication data]`. Between servers the
/// authentication data is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeClientPayload {
    pub id: ClientId,
    pub auth: Vec<u8>,
}

impl ResumeClientPayload {
    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        let mut reader = Reader::new(buf);
        let id = ClientId::decode(reader.u16_prefixed()?)?;
        let auth = reader.rest().to_vec();
        Ok(Self { id, auth })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u16_prefixed(&self.id.encode());
        out.extend_from_slice(&self.auth);
        out
    }
}

/// `[u16 conn_type][u16 auth_method]`. A request carries a reserved zero in
/// place of the method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionAuthPayload {
    pub conn_type: u16,
    pub method: u16,
}

impl ConnectionAuthPayload {
    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        let mut reader = Reader::new(buf);
        Ok(Self {
            conn_type: reader.u16()?,
            method: reader.u16()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4);
        out.put_u16(self.conn_type);
        out.put_u16(self.method);
        out
    }
}
