//! Network and member documents.
//!
//! The store only understands the fields it needs to key and version a
//! document: `id`, `nwid` (members only), and `revision`. Everything else,
//! including the `objtype` discriminator, travels in `payload` untouched.

use crate::error::{StoreError, StoreResult};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// `objtype` of network documents.
pub const OBJTYPE_NETWORK: &str = "network";
/// `objtype` of member documents.
pub const OBJTYPE_MEMBER: &str = "member";

const OBJTYPE_FIELD: &str = "objtype";

/// Parses a hex id as written in documents.
///
/// Accepts an optional `0x` prefix and either case. Returns `None` for empty
/// strings, non-hex characters, or values wider than 64 bits.
pub fn parse_hex_id(s: &str) -> Option<u64> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() || digits.len() > 16 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Formats a network id as 16 lowercase hex digits.
pub fn format_network_id(nwid: u64) -> String {
    format!("{nwid:016x}")
}

/// Formats a member (node) id as 10 lowercase hex digits.
pub fn format_member_id(id: u64) -> String {
    format!("{id:010x}")
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => {
            parse_hex_id(&s).ok_or_else(|| D::Error::custom(format!("invalid hex id {s:?}")))
        }
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("id out of range: {n}"))),
        other => Err(D::Error::custom(format!("expected hex id, got {other}"))),
    }
}

mod network_id {
    use super::*;

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_network_id(*id))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        deserialize_id(deserializer)
    }
}

mod member_id {
    use super::*;

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_member_id(*id))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        deserialize_id(deserializer)
    }
}

/// A network configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Network id. The top 40 bits are the owning controller's address.
    #[serde(with = "network_id")]
    pub id: u64,
    /// Revision counter, starting at 1 on creation.
    #[serde(default)]
    pub revision: u64,
    /// All remaining document fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl NetworkRecord {
    /// Creates an empty network document with revision 0.
    pub fn new(id: u64) -> Self {
        let mut payload = Map::new();
        payload.insert(OBJTYPE_FIELD.into(), Value::from(OBJTYPE_NETWORK));
        Self {
            id,
            revision: 0,
            payload,
        }
    }

    /// Sets a payload field, returning the updated record.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Returns true if both documents match apart from their revision.
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id && self.payload == other.payload
    }

    /// Returns the `objtype` field, if the document carries one.
    pub fn objtype(&self) -> Option<&str> {
        self.payload.get(OBJTYPE_FIELD).and_then(Value::as_str)
    }

    /// Parses a serialized document.
    pub fn from_json_str(s: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Serializes the document.
    pub fn to_json_string(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A network member document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Member (node) id, 40 bits.
    #[serde(with = "member_id")]
    pub id: u64,
    /// Id of the network this member belongs to.
    #[serde(with = "network_id")]
    pub nwid: u64,
    /// Revision counter, starting at 1 on creation.
    #[serde(default)]
    pub revision: u64,
    /// All remaining document fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl MemberRecord {
    /// Creates an empty member document with revision 0.
    pub fn new(nwid: u64, id: u64) -> Self {
        let mut payload = Map::new();
        payload.insert(OBJTYPE_FIELD.into(), Value::from(OBJTYPE_MEMBER));
        Self {
            id,
            nwid,
            revision: 0,
            payload,
        }
    }

    /// Sets a payload field, returning the updated record.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Returns true if both documents match apart from their revision.
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id && self.nwid == other.nwid && self.payload == other.payload
    }

    /// Returns the `objtype` field, if the document carries one.
    pub fn objtype(&self) -> Option<&str> {
        self.payload.get(OBJTYPE_FIELD).and_then(Value::as_str)
    }

    /// Parses a serialized document.
    pub fn from_json_str(s: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Serializes the document.
    pub fn to_json_string(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A document of either kind, as handed to the controller database on save.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    /// A network document.
    Network(NetworkRecord),
    /// A member document.
    Member(MemberRecord),
}

impl Record {
    /// Builds a record from a JSON document, dispatching on `objtype`.
    pub fn from_json(value: Value) -> StoreResult<Self> {
        let objtype = value
            .get(OBJTYPE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match objtype.as_str() {
            OBJTYPE_NETWORK => Ok(Record::Network(serde_json::from_value(value)?)),
            OBJTYPE_MEMBER => Ok(Record::Member(serde_json::from_value(value)?)),
            _ => Err(StoreError::UnknownObjectType(objtype)),
        }
    }

    /// Returns the `objtype` discriminator.
    pub fn objtype(&self) -> &'static str {
        match self {
            Record::Network(_) => OBJTYPE_NETWORK,
            Record::Member(_) => OBJTYPE_MEMBER,
        }
    }

    /// Returns the document revision.
    pub fn revision(&self) -> u64 {
        match self {
            Record::Network(n) => n.revision,
            Record::Member(m) => m.revision,
        }
    }

    /// Overwrites the document revision.
    pub fn set_revision(&mut self, revision: u64) {
        match self {
            Record::Network(n) => n.revision = revision,
            Record::Member(m) => m.revision = revision,
        }
    }

    /// Returns true if both records are the same kind and match apart from revision.
    pub fn same_content(&self, other: &Record) -> bool {
        match (self, other) {
            (Record::Network(a), Record::Network(b)) => a.same_content(b),
            (Record::Member(a), Record::Member(b)) => a.same_content(b),
            _ => false,
        }
    }
}

impl From<NetworkRecord> for Record {
    fn from(record: NetworkRecord) -> Self {
        Record::Network(record)
    }
}

impl From<MemberRecord> for Record {
    fn from(record: MemberRecord) -> Self {
        Record::Member(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn parse_hex_id_variants() {
        assert_eq!(parse_hex_id("0011223344aabbcc"), Some(0x0011_2233_44aa_bbcc));
        assert_eq!(parse_hex_id("0x0011223344AABBCC"), Some(0x0011_2233_44aa_bbcc));
        assert_eq!(parse_hex_id("ff"), Some(0xff));
        assert_eq!(parse_hex_id(""), None);
        assert_eq!(parse_hex_id("0x"), None);
        assert_eq!(parse_hex_id("+ff"), None);
        assert_eq!(parse_hex_id("xyz"), None);
        assert_eq!(parse_hex_id("11223344556677889"), None);
    }

    #[test]
    fn network_ids_are_zero_padded() {
        let record = NetworkRecord::new(0x0000_0000_01aa_0001);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "0000000001aa0001");
        assert_eq!(value["objtype"], "network");
        assert_eq!(value["revision"], 0);
    }

    #[test]
    fn member_document_keeps_unknown_fields() {
        let doc = json!({
            "objtype": "member",
            "id": "abcdef0123",
            "nwid": "0x0011223344aabbcc",
            "revision": 7,
            "authorized": true,
            "ipAssignments": ["10.0.0.2"],
        });
        let member: MemberRecord = serde_json::from_value(doc).unwrap();
        assert_eq!(member.id, 0xab_cdef_0123);
        assert_eq!(member.nwid, 0x0011_2233_44aa_bbcc);
        assert_eq!(member.revision, 7);
        assert_eq!(member.payload["authorized"], json!(true));

        let back = serde_json::to_value(&member).unwrap();
        assert_eq!(back["nwid"], "0011223344aabbcc");
        assert_eq!(back["ipAssignments"], json!(["10.0.0.2"]));
    }

    #[test]
    fn missing_revision_defaults_to_zero() {
        let network = NetworkRecord::from_json_str(r#"{"id":"0011223344aabbcc"}"#).unwrap();
        assert_eq!(network.revision, 0);
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let network = NetworkRecord::from_json_str(r#"{"id":255,"revision":1}"#).unwrap();
        assert_eq!(network.id, 255);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(NetworkRecord::from_json_str(r#"{"id":"not-hex"}"#).is_err());
        assert!(NetworkRecord::from_json_str(r#"{"revision":3}"#).is_err());
        assert!(MemberRecord::from_json_str(r#"{"id":"01","nwid":true}"#).is_err());
    }

    #[test]
    fn same_content_ignores_revision() {
        let a = NetworkRecord::new(1).with_field("name", "lab");
        let mut b = a.clone();
        b.revision = 9;
        assert!(a.same_content(&b));
        assert_ne!(a, b);

        let c = a.clone().with_field("name", "prod");
        assert!(!a.same_content(&c));
    }

    #[test]
    fn record_dispatches_on_objtype() {
        let network = Record::from_json(json!({"objtype": "network", "id": "01"})).unwrap();
        assert_eq!(network.objtype(), OBJTYPE_NETWORK);

        let member =
            Record::from_json(json!({"objtype": "member", "id": "02", "nwid": "01"})).unwrap();
        assert!(matches!(member, Record::Member(ref m) if m.id == 2 && m.nwid == 1));

        let err = Record::from_json(json!({"objtype": "route", "id": "01"})).unwrap_err();
        assert!(matches!(err, StoreError::UnknownObjectType(t) if t == "route"));
    }

    #[test]
    fn objtype_accessor_reads_payload() {
        assert_eq!(NetworkRecord::new(1).objtype(), Some(OBJTYPE_NETWORK));
        assert_eq!(MemberRecord::new(1, 2).objtype(), Some(OBJTYPE_MEMBER));
        let bare = NetworkRecord::from_json_str(r#"{"id":"01"}"#).unwrap();
        assert_eq!(bare.objtype(), None);
    }

    #[test]
    fn network_and_member_never_share_content() {
        let n: Record = NetworkRecord::new(1).into();
        let m: Record = MemberRecord::new(1, 1).into();
        assert!(!n.same_content(&m));
    }

    proptest! {
        #[test]
        fn formatted_ids_parse_back(id in any::<u64>()) {
            prop_assert_eq!(parse_hex_id(&format_network_id(id)), Some(id));
            let member = id & 0xff_ffff_ffff;
            prop_assert_eq!(parse_hex_id(&format_member_id(member)), Some(member));
        }
    }
}
