//! Remote record store wire format.
//!
//! The remote store knows nothing about networks or members. Every record is
//! tagged with an ordered list of selectors (name + ordinal) and queried back
//! by selector name, ordinal range and time range. This module maps the
//! controller's documents onto that model.

use crate::identity::ControllerIdentity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;

/// Selector namespace shared by all controller records.
pub const SELECTOR_NAMESPACE: &str = "com.zerotier.controller.lfdb";
/// Create/update endpoint.
pub const MAKE_RECORD_PATH: &str = "/makerecord";
/// Query endpoint.
pub const QUERY_PATH: &str = "/query";
/// Ordinal or time range covering everything.
pub const FULL_RANGE: [u64; 2] = [0, u64::MAX];

/// A (name, ordinal) tag on a remote record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Selector {
    /// Selector name.
    pub name: String,
    /// Ordinal within the name.
    pub ordinal: u64,
}

impl Selector {
    /// Creates a selector.
    pub fn new(name: impl Into<String>, ordinal: u64) -> Self {
        Self {
            name: name.into(),
            ordinal,
        }
    }
}

/// Value stored in a remote record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordValue {
    /// A serialized JSON document.
    Document(String),
    /// Raw bytes, encoded as a JSON array of numbers.
    Octets(Vec<u8>),
}

impl RecordValue {
    /// Returns the document text, if this is a document.
    pub fn as_document(&self) -> Option<&str> {
        match self {
            RecordValue::Document(doc) => Some(doc),
            RecordValue::Octets(_) => None,
        }
    }
}

/// Body of `POST /makerecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MakeRecordRequest {
    /// Selectors, most significant first.
    pub selectors: Vec<Selector>,
    /// Record value.
    pub value: RecordValue,
    /// Owner private key.
    pub owner_private: String,
    /// Masking key hiding the value from the remote store.
    pub masking_key: String,
    /// Re-pulse the record even if its value did not change.
    pub pulse_if_unchanged: bool,
    /// Explicit record timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// One selector range of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SelectorRange {
    /// Selector name.
    pub name: String,
    /// Inclusive ordinal range.
    pub range: [u64; 2],
}

impl SelectorRange {
    /// Creates a range matching every ordinal of `name`.
    pub fn all(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            range: FULL_RANGE,
        }
    }
}

/// Body of `POST /query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryRequest {
    /// Selector ranges, matched positionally against record selectors.
    pub ranges: Vec<SelectorRange>,
    /// Inclusive record timestamp range, in seconds.
    pub time_range: [u64; 2],
    /// Masking key used when the records were written.
    pub masking_key: String,
    /// Accepted record owners.
    pub owners: Vec<String>,
}

/// Selector names for one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selectors {
    network: String,
    member: String,
    prefix: String,
}

impl Selectors {
    /// Builds the selector names for a controller address (10 hex digits).
    pub fn new(controller_address_hex: &str) -> Self {
        let prefix = format!("{SELECTOR_NAMESPACE}:{controller_address_hex}");
        Self {
            network: format!("{prefix}/network"),
            member: format!("{prefix}/member"),
            prefix,
        }
    }

    /// Name of the network selector.
    pub fn network_name(&self) -> &str {
        &self.network
    }

    /// Name of the member selector.
    pub fn member_name(&self) -> &str {
        &self.member
    }

    /// Name of the online-pulse selector for one network.
    pub fn online_name(&self, nwid: u64) -> String {
        format!("{}/network/{nwid:016x}/online", self.prefix)
    }

    /// Selectors for a network record.
    pub fn network(&self, nwid: u64) -> Vec<Selector> {
        vec![Selector::new(self.network.clone(), nwid)]
    }

    /// Selectors for a member record.
    pub fn member(&self, nwid: u64, member_id: u64) -> Vec<Selector> {
        vec![
            Selector::new(self.network.clone(), nwid),
            Selector::new(self.member.clone(), member_id),
        ]
    }

    /// Selectors for an online pulse: one record per (network, member, address).
    pub fn online(&self, nwid: u64, member_id: u64, address: IpAddr) -> Vec<Selector> {
        vec![
            Selector::new(self.online_name(nwid), member_id),
            Selector::new(address.to_string(), 0),
        ]
    }
}

/// Builds every request the engine sends, with keys and selectors filled in.
#[derive(Debug, Clone)]
pub struct RequestFactory {
    selectors: Selectors,
    owner_private: String,
    owner_public: String,
    masking_key: String,
}

impl RequestFactory {
    /// Creates a factory for a controller and its remote owner keys.
    pub fn new(
        identity: &ControllerIdentity,
        owner_private: impl Into<String>,
        owner_public: impl Into<String>,
    ) -> Self {
        Self {
            selectors: Selectors::new(&identity.address_hex()),
            owner_private: owner_private.into(),
            owner_public: owner_public.into(),
            masking_key: identity.masking_key(),
        }
    }

    /// Returns the selector names in use.
    pub fn selectors(&self) -> &Selectors {
        &self.selectors
    }

    /// Returns the masking key sent with every request.
    pub fn masking_key(&self) -> &str {
        &self.masking_key
    }

    fn make_record(
        &self,
        selectors: Vec<Selector>,
        value: RecordValue,
        timestamp: Option<u64>,
    ) -> MakeRecordRequest {
        MakeRecordRequest {
            selectors,
            value,
            owner_private: self.owner_private.clone(),
            masking_key: self.masking_key.clone(),
            pulse_if_unchanged: true,
            timestamp,
        }
    }

    /// Create/update request for a network document.
    pub fn network_record(&self, nwid: u64, document: String) -> MakeRecordRequest {
        self.make_record(
            self.selectors.network(nwid),
            RecordValue::Document(document),
            None,
        )
    }

    /// Create/update request for a member document.
    pub fn member_record(&self, nwid: u64, member_id: u64, document: String) -> MakeRecordRequest {
        self.make_record(
            self.selectors.member(nwid, member_id),
            RecordValue::Document(document),
            None,
        )
    }

    /// Online pulse for a member seen at `address` at `timestamp`.
    pub fn online_record(
        &self,
        nwid: u64,
        member_id: u64,
        address: IpAddr,
        timestamp: u64,
    ) -> MakeRecordRequest {
        self.make_record(
            self.selectors.online(nwid, member_id, address),
            online_value(address),
            Some(timestamp),
        )
    }

    fn query(&self, ranges: Vec<SelectorRange>, since: u64) -> QueryRequest {
        QueryRequest {
            ranges,
            time_range: [since, u64::MAX],
            masking_key: self.masking_key.clone(),
            owners: vec![self.owner_public.clone()],
        }
    }

    /// Query for all network records written at or after `since`.
    pub fn network_query(&self, since: u64) -> QueryRequest {
        self.query(vec![SelectorRange::all(self.selectors.network_name())], since)
    }

    /// Query for all member records written at or after `since`.
    pub fn member_query(&self, since: u64) -> QueryRequest {
        self.query(
            vec![
                SelectorRange::all(self.selectors.network_name()),
                SelectorRange::all(self.selectors.member_name()),
            ],
            since,
        )
    }
}

/// Encodes an address as its raw octets (4 for IPv4, 16 for IPv6).
pub fn online_value(address: IpAddr) -> RecordValue {
    match address {
        IpAddr::V4(v4) => RecordValue::Octets(v4.octets().to_vec()),
        IpAddr::V6(v6) => RecordValue::Octets(v6.octets().to_vec()),
    }
}

/// Extracts record values from a query response.
///
/// The response is a list of result sets; the first entry of each set is an
/// object holding a `Record` object and the record's `Value` string. Sets of
/// any other shape contribute nothing.
pub fn record_values(results: &Value) -> Vec<String> {
    let Some(sets) = results.as_array() else {
        return Vec::new();
    };
    sets.iter()
        .filter_map(|set| {
            let entry = set.as_array()?.first()?.as_object()?;
            entry.get("Record")?.as_object()?;
            entry.get("Value")?.as_str().map(str::to_owned)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn factory() -> RequestFactory {
        let identity = ControllerIdentity::new(0x00_1122_3344, b"key".to_vec());
        RequestFactory::new(&identity, "owner-priv", "owner-pub")
    }

    #[test]
    fn selector_names() {
        let selectors = Selectors::new("0011223344");
        assert_eq!(
            selectors.network_name(),
            "com.zerotier.controller.lfdb:0011223344/network"
        );
        assert_eq!(
            selectors.member_name(),
            "com.zerotier.controller.lfdb:0011223344/member"
        );
        assert_eq!(
            selectors.online_name(0x0011_2233_4400_0001),
            "com.zerotier.controller.lfdb:0011223344/network/0011223344000001/online"
        );
    }

    #[test]
    fn network_record_body() {
        let request = factory().network_record(7, r#"{"id":"0000000000000007"}"#.into());
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({
                "Selectors": [{
                    "Name": "com.zerotier.controller.lfdb:0011223344/network",
                    "Ordinal": 7,
                }],
                "Value": "{\"id\":\"0000000000000007\"}",
                "OwnerPrivate": "owner-priv",
                "MaskingKey": factory().masking_key(),
                "PulseIfUnchanged": true,
            })
        );
    }

    #[test]
    fn member_record_carries_both_selectors() {
        let request = factory().member_record(7, 9, "{}".into());
        assert_eq!(request.selectors.len(), 2);
        assert_eq!(request.selectors[0].ordinal, 7);
        assert_eq!(request.selectors[1].ordinal, 9);
        assert!(request.selectors[1].name.ends_with("/member"));
        assert!(request.timestamp.is_none());
    }

    #[test]
    fn online_record_encodes_address_octets() {
        let v4 = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));
        let request = factory().online_record(7, 9, v4, 1_700_000_000_000);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["Value"], json!([10, 1, 2, 3]));
        assert_eq!(body["Timestamp"], json!(1_700_000_000_000u64));
        assert_eq!(body["Selectors"][1], json!({"Name": "10.1.2.3", "Ordinal": 0}));

        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        match online_value(v6) {
            RecordValue::Octets(octets) => assert_eq!(octets.len(), 16),
            RecordValue::Document(_) => panic!("expected octets"),
        }
    }

    #[test]
    fn query_bodies() {
        let factory = factory();
        let body = serde_json::to_value(factory.member_query(42)).unwrap();
        assert_eq!(body["Ranges"].as_array().unwrap().len(), 2);
        assert_eq!(body["Ranges"][0]["Range"], json!([0u64, u64::MAX]));
        assert_eq!(body["TimeRange"], json!([42u64, u64::MAX]));
        assert_eq!(body["Owners"], json!(["owner-pub"]));

        let networks = factory.network_query(0);
        assert_eq!(networks.ranges.len(), 1);
        assert_eq!(networks.time_range, [0, u64::MAX]);
    }

    #[test]
    fn record_values_extracts_first_entry_of_each_set() {
        let results = json!([
            [{"Record": {"Id": "a"}, "Value": "{\"id\":\"1\"}"}, {"Record": {}, "Value": "ignored"}],
            [{"Record": {"Id": "b"}, "Value": "{\"id\":\"2\"}"}],
        ]);
        assert_eq!(record_values(&results), vec!["{\"id\":\"1\"}", "{\"id\":\"2\"}"]);
    }

    #[test]
    fn record_values_tolerates_malformed_shapes() {
        assert!(record_values(&json!(null)).is_empty());
        assert!(record_values(&json!({"Record": {}})).is_empty());
        assert!(record_values(&json!([])).is_empty());

        let results = json!([
            [],
            "not a set",
            ["not an object"],
            [{"Value": "no record"}],
            [{"Record": "not an object", "Value": "x"}],
            [{"Record": {}, "Value": 12}],
            [{"Record": {}, "Value": "kept"}],
        ]);
        assert_eq!(record_values(&results), vec!["kept"]);
    }

    #[test]
    fn record_value_round_trips_untagged() {
        let doc: RecordValue = serde_json::from_value(json!("text")).unwrap();
        assert_eq!(doc.as_document(), Some("text"));
        let octets: RecordValue = serde_json::from_value(json!([1, 2])).unwrap();
        assert_eq!(octets, RecordValue::Octets(vec![1, 2]));
        assert_eq!(octets.as_document(), None);
    }
}
