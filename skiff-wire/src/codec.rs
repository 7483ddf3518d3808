//! Frame codec: length-prefixed CBOR framing, wire version 2.
//!
//! Frame layout:
//!
//! ```text
//! byte 0      version (must be 2)
//! byte 1      flags (bit 0: payload is a CBOR array of messages)
//! bytes 2..6  payload length, u32 big-endian
//! bytes 6..   CBOR payload
//! ```
//!
//! Every message is a CBOR map with one- or two-character text keys and
//! a numeric discriminator under `t`. Version vectors travel as raw
//! bytes; the codec never interprets them.

use crate::error::DecodeError;
use crate::message::{
    DeleteStatus, EphemeralEntry, EphemeralMessage, Message, Transmission, TYPE_BATCH,
    TYPE_DELETE_REQUEST, TYPE_DELETE_RESPONSE, TYPE_DIRECTORY_REQUEST, TYPE_DIRECTORY_RESPONSE,
    TYPE_EPHEMERAL, TYPE_ESTABLISH_REQUEST, TYPE_ESTABLISH_RESPONSE, TYPE_NEW_DOC,
    TYPE_SYNC_REQUEST, TYPE_SYNC_RESPONSE, TYPE_UPDATE,
};
use ciborium::value::Value;
use skiff_crdt::VersionVector;
use skiff_types::{DocId, PeerId, PeerInfo};

/// Current (and only supported) wire version.
pub const WIRE_VERSION: u8 = 2;

/// Frame flag: payload is a CBOR array of messages.
pub const FLAG_BATCH: u8 = 0b0000_0001;

/// Fixed frame header size.
pub const FRAME_HEADER_LEN: usize = 6;

const TX_UP_TO_DATE: u8 = 0;
const TX_SNAPSHOT: u8 = 1;
const TX_UPDATE: u8 = 2;
const TX_UNAVAILABLE: u8 = 3;

// ── Encoding ─────────────────────────────────────────────────────

/// Encodes one message into a complete frame.
#[must_use]
pub fn encode_frame(message: &Message) -> Vec<u8> {
    frame(0, encode_payload(&to_wire_value(message)))
}

/// Encodes several messages into one batch-flagged frame.
///
/// Inner batches are expanded first; the wire never carries a batch
/// inside a batch.
#[must_use]
pub fn encode_batch_frame(messages: &[Message]) -> Vec<u8> {
    let flat = Message::flatten(messages.to_vec());
    let values: Vec<Value> = flat.iter().map(to_wire_value).collect();
    frame(FLAG_BATCH, encode_payload(&Value::Array(values)))
}

fn frame(flags: u8, payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.push(WIRE_VERSION);
    out.push(flags);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    out
}

fn encode_payload(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    // Serializing a Value tree into a Vec cannot fail.
    let _ = ciborium::into_writer(value, &mut buf);
    buf
}

/// Lowers a message to its CBOR map representation.
#[must_use]
pub fn to_wire_value(message: &Message) -> Value {
    let mut entries: Vec<(Value, Value)> = vec![(
        Value::Text("t".into()),
        Value::Integer(message.type_code().into()),
    )];

    match message {
        Message::EstablishRequest { identity } | Message::EstablishResponse { identity } => {
            entries.push((Value::Text("id".into()), identity_value(identity)));
        }
        Message::SyncRequest {
            doc_id,
            requester_version,
            bidirectional,
            ephemeral,
        } => {
            entries.push((Value::Text("d".into()), Value::Text(doc_id.to_string())));
            entries.push((
                Value::Text("v".into()),
                Value::Bytes(requester_version.as_bytes().to_vec()),
            ));
            entries.push((Value::Text("bi".into()), Value::Bool(*bidirectional)));
            if !ephemeral.is_empty() {
                entries.push((Value::Text("e".into()), stores_value(ephemeral)));
            }
        }
        Message::SyncResponse {
            doc_id,
            transmission,
            ephemeral,
        } => {
            entries.push((Value::Text("d".into()), Value::Text(doc_id.to_string())));
            entries.push((Value::Text("tx".into()), transmission_value(transmission)));
            if !ephemeral.is_empty() {
                entries.push((Value::Text("e".into()), stores_value(ephemeral)));
            }
        }
        Message::Update {
            doc_id,
            transmission,
        } => {
            entries.push((Value::Text("d".into()), Value::Text(doc_id.to_string())));
            entries.push((Value::Text("tx".into()), transmission_value(transmission)));
        }
        Message::DirectoryRequest { doc_ids } => {
            if let Some(ids) = doc_ids {
                entries.push((Value::Text("ds".into()), doc_ids_value(ids)));
            }
        }
        Message::DirectoryResponse { doc_ids } | Message::NewDoc { doc_ids } => {
            entries.push((Value::Text("ds".into()), doc_ids_value(doc_ids)));
        }
        Message::DeleteRequest { doc_id } => {
            entries.push((Value::Text("d".into()), Value::Text(doc_id.to_string())));
        }
        Message::DeleteResponse { doc_id, status } => {
            entries.push((Value::Text("d".into()), Value::Text(doc_id.to_string())));
            let status = match status {
                DeleteStatus::Deleted => "deleted",
                DeleteStatus::Ignored => "ignored",
            };
            entries.push((Value::Text("s".into()), Value::Text(status.into())));
        }
        Message::Ephemeral(eph) => {
            entries.push((Value::Text("d".into()), Value::Text(eph.doc_id.to_string())));
            entries.push((
                Value::Text("h".into()),
                Value::Integer(eph.hops_remaining.into()),
            ));
            entries.push((Value::Text("st".into()), stores_value(&eph.stores)));
        }
        Message::Batch { messages } => {
            let flat = Message::flatten(messages.clone());
            let values: Vec<Value> = flat.iter().map(to_wire_value).collect();
            entries.push((Value::Text("m".into()), Value::Array(values)));
        }
    }

    Value::Map(entries)
}

fn identity_value(info: &PeerInfo) -> Value {
    Value::Map(vec![
        (Value::Text("p".into()), Value::Text(info.peer_id.to_string())),
        (Value::Text("n".into()), Value::Text(info.name.clone())),
        (Value::Text("ty".into()), Value::Text(info.role.clone())),
    ])
}

fn transmission_value(tx: &Transmission) -> Value {
    let mut entries = Vec::with_capacity(3);
    match tx {
        Transmission::UpToDate { version } => {
            entries.push((Value::Text("k".into()), Value::Integer(TX_UP_TO_DATE.into())));
            entries.push((Value::Text("v".into()), Value::Bytes(version.as_bytes().to_vec())));
        }
        Transmission::Snapshot { data, version } => {
            entries.push((Value::Text("k".into()), Value::Integer(TX_SNAPSHOT.into())));
            entries.push((Value::Text("da".into()), Value::Bytes(data.clone())));
            entries.push((Value::Text("v".into()), Value::Bytes(version.as_bytes().to_vec())));
        }
        Transmission::Update { data, version } => {
            entries.push((Value::Text("k".into()), Value::Integer(TX_UPDATE.into())));
            entries.push((Value::Text("da".into()), Value::Bytes(data.clone())));
            entries.push((Value::Text("v".into()), Value::Bytes(version.as_bytes().to_vec())));
        }
        Transmission::Unavailable => {
            entries.push((Value::Text("k".into()), Value::Integer(TX_UNAVAILABLE.into())));
        }
    }
    Value::Map(entries)
}

fn stores_value(stores: &[EphemeralEntry]) -> Value {
    let values = stores
        .iter()
        .map(|entry| {
            Value::Map(vec![
                (Value::Text("p".into()), Value::Text(entry.peer_id.to_string())),
                (Value::Text("ns".into()), Value::Text(entry.namespace.clone())),
                (Value::Text("da".into()), Value::Bytes(entry.data.clone())),
            ])
        })
        .collect();
    Value::Array(values)
}

fn doc_ids_value(ids: &[DocId]) -> Value {
    Value::Array(ids.iter().map(|d| Value::Text(d.to_string())).collect())
}

// ── Decoding ─────────────────────────────────────────────────────

/// Decodes a complete frame into the messages it carries.
///
/// A plain frame yields a singleton list; a batch-flagged frame yields
/// one entry per element of the payload array.
pub fn decode_frame(bytes: &[u8]) -> Result<Vec<Message>, DecodeError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(DecodeError::TruncatedFrame);
    }
    let version = bytes[0];
    if version != WIRE_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let flags = bytes[1];
    let declared =
        u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
    let body = &bytes[FRAME_HEADER_LEN..];
    if declared > body.len() {
        return Err(DecodeError::TruncatedFrame);
    }
    let payload = &body[..declared];

    let value: Value = ciborium::from_reader(payload)
        .map_err(|e| DecodeError::InvalidCbor(e.to_string()))?;

    if flags & FLAG_BATCH != 0 {
        let Value::Array(items) = value else {
            return Err(DecodeError::InvalidType("batch payload"));
        };
        items.into_iter().map(from_wire_value).collect()
    } else {
        Ok(vec![from_wire_value(value)?])
    }
}

/// Raises a CBOR map back into a message.
pub fn from_wire_value(value: Value) -> Result<Message, DecodeError> {
    let map = WireMap::new(value)?;
    let ty = u8::try_from(map.u64("t")?).map_err(|_| DecodeError::InvalidType("t"))?;

    match ty {
        TYPE_ESTABLISH_REQUEST => Ok(Message::EstablishRequest {
            identity: parse_identity(map.required("id")?)?,
        }),
        TYPE_ESTABLISH_RESPONSE => Ok(Message::EstablishResponse {
            identity: parse_identity(map.required("id")?)?,
        }),
        TYPE_SYNC_REQUEST => Ok(Message::SyncRequest {
            doc_id: DocId::new(map.text("d")?),
            requester_version: VersionVector::from_bytes(map.bytes("v")?),
            bidirectional: map.bool("bi")?,
            ephemeral: match map.optional("e") {
                Some(v) => parse_stores(v)?,
                None => Vec::new(),
            },
        }),
        TYPE_SYNC_RESPONSE => Ok(Message::SyncResponse {
            doc_id: DocId::new(map.text("d")?),
            transmission: parse_transmission(map.required("tx")?)?,
            ephemeral: match map.optional("e") {
                Some(v) => parse_stores(v)?,
                None => Vec::new(),
            },
        }),
        TYPE_UPDATE => Ok(Message::Update {
            doc_id: DocId::new(map.text("d")?),
            transmission: parse_transmission(map.required("tx")?)?,
        }),
        TYPE_DIRECTORY_REQUEST => Ok(Message::DirectoryRequest {
            doc_ids: match map.optional("ds") {
                Some(v) => Some(parse_doc_ids(v)?),
                None => None,
            },
        }),
        TYPE_DIRECTORY_RESPONSE => Ok(Message::DirectoryResponse {
            doc_ids: parse_doc_ids(map.required("ds")?)?,
        }),
        TYPE_NEW_DOC => Ok(Message::NewDoc {
            doc_ids: parse_doc_ids(map.required("ds")?)?,
        }),
        TYPE_DELETE_REQUEST => Ok(Message::DeleteRequest {
            doc_id: DocId::new(map.text("d")?),
        }),
        TYPE_DELETE_RESPONSE => {
            let status = match map.text("s")?.as_str() {
                "deleted" => DeleteStatus::Deleted,
                "ignored" => DeleteStatus::Ignored,
                _ => return Err(DecodeError::InvalidType("s")),
            };
            Ok(Message::DeleteResponse {
                doc_id: DocId::new(map.text("d")?),
                status,
            })
        }
        TYPE_EPHEMERAL => Ok(Message::Ephemeral(EphemeralMessage {
            doc_id: DocId::new(map.text("d")?),
            hops_remaining: map.u64("h")? as u32,
            stores: parse_stores(map.required("st")?)?,
        })),
        TYPE_BATCH => {
            let Value::Array(items) = map.required("m")? else {
                return Err(DecodeError::InvalidType("m"));
            };
            let messages = items
                .into_iter()
                .map(from_wire_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Message::Batch { messages })
        }
        _ => Err(DecodeError::InvalidType("t")),
    }
}

fn parse_identity(value: Value) -> Result<PeerInfo, DecodeError> {
    let map = WireMap::new(value)?;
    Ok(PeerInfo {
        peer_id: PeerId::new(map.text("p")?),
        name: map.text("n")?,
        role: map.text("ty")?,
    })
}

fn parse_transmission(value: Value) -> Result<Transmission, DecodeError> {
    let map = WireMap::new(value)?;
    match map.u64("k")? as u8 {
        TX_UP_TO_DATE => Ok(Transmission::UpToDate {
            version: VersionVector::from_bytes(map.bytes("v")?),
        }),
        TX_SNAPSHOT => Ok(Transmission::Snapshot {
            data: map.bytes("da")?,
            version: VersionVector::from_bytes(map.bytes("v")?),
        }),
        TX_UPDATE => Ok(Transmission::Update {
            data: map.bytes("da")?,
            version: VersionVector::from_bytes(map.bytes("v")?),
        }),
        TX_UNAVAILABLE => Ok(Transmission::Unavailable),
        _ => Err(DecodeError::InvalidType("k")),
    }
}

fn parse_stores(value: Value) -> Result<Vec<EphemeralEntry>, DecodeError> {
    let Value::Array(items) = value else {
        return Err(DecodeError::InvalidType("stores"));
    };
    items
        .into_iter()
        .map(|item| {
            let map = WireMap::new(item)?;
            Ok(EphemeralEntry {
                peer_id: PeerId::new(map.text("p")?),
                namespace: map.text("ns")?,
                data: map.bytes("da")?,
            })
        })
        .collect()
}

fn parse_doc_ids(value: Value) -> Result<Vec<DocId>, DecodeError> {
    let Value::Array(items) = value else {
        return Err(DecodeError::InvalidType("ds"));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Text(s) => Ok(DocId::new(s)),
            _ => Err(DecodeError::InvalidType("ds")),
        })
        .collect()
}

/// Field accessor over a decoded CBOR map.
struct WireMap {
    entries: Vec<(Value, Value)>,
}

impl WireMap {
    fn new(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Map(entries) => Ok(Self { entries }),
            _ => Err(DecodeError::InvalidType("message")),
        }
    }

    fn optional(&self, key: &str) -> Option<Value> {
        self.entries.iter().find_map(|(k, v)| match k {
            Value::Text(s) if s == key => Some(v.clone()),
            _ => None,
        })
    }

    fn required(&self, key: &'static str) -> Result<Value, DecodeError> {
        self.optional(key).ok_or(DecodeError::MissingField(key))
    }

    fn u64(&self, key: &'static str) -> Result<u64, DecodeError> {
        match self.required(key)? {
            Value::Integer(i) => {
                u64::try_from(i128::from(i)).map_err(|_| DecodeError::InvalidType(key))
            }
            _ => Err(DecodeError::InvalidType(key)),
        }
    }

    fn text(&self, key: &'static str) -> Result<String, DecodeError> {
        match self.required(key)? {
            Value::Text(s) => Ok(s),
            _ => Err(DecodeError::InvalidType(key)),
        }
    }

    fn bytes(&self, key: &'static str) -> Result<Vec<u8>, DecodeError> {
        match self.required(key)? {
            Value::Bytes(b) => Ok(b),
            _ => Err(DecodeError::InvalidType(key)),
        }
    }

    fn bool(&self, key: &'static str) -> Result<bool, DecodeError> {
        match self.required(key)? {
            Value::Bool(b) => Ok(b),
            _ => Err(DecodeError::InvalidType(key)),
        }
    }
}
