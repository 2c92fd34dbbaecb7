//! Wire types exchanged over the listener relation.
//!
//! Everything here is JSON on the bus. Field names follow the established
//! wire format (`is_public`, `SASL`, `cert_present`, ...), so serde renames
//! are used wherever that format disagrees with Rust naming.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Security protocol of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityProtocol {
    #[serde(rename = "PLAINTEXT")]
    Plaintext,
    #[serde(rename = "SSL")]
    Ssl,
    /// SASL without TLS. Kafka calls this `SASL_PLAINTEXT`.
    #[serde(rename = "SASL", alias = "SASL_PLAINTEXT")]
    Sasl,
    #[serde(rename = "SASL_SSL")]
    SaslSsl,
}

impl SecurityProtocol {
    /// Protocol implied by the presence of a certificate and a SASL block.
    pub fn derive(cert_present: bool, sasl_present: bool) -> Self {
        match (cert_present, sasl_present) {
            (false, false) => SecurityProtocol::Plaintext,
            (true, false) => SecurityProtocol::Ssl,
            (false, true) => SecurityProtocol::Sasl,
            (true, true) => SecurityProtocol::SaslSsl,
        }
    }

    pub fn uses_sasl(self) -> bool {
        matches!(self, SecurityProtocol::Sasl | SecurityProtocol::SaslSsl)
    }

    pub fn uses_tls(self) -> bool {
        matches!(self, SecurityProtocol::Ssl | SecurityProtocol::SaslSsl)
    }

    /// Value used on the relation.
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "PLAINTEXT",
            SecurityProtocol::Ssl => "SSL",
            SecurityProtocol::Sasl => "SASL",
            SecurityProtocol::SaslSsl => "SASL_SSL",
        }
    }

    /// Value understood by Kafka's `security.protocol` settings.
    pub fn kafka_name(self) -> &'static str {
        match self {
            SecurityProtocol::Sasl => "SASL_PLAINTEXT",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for SecurityProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAINTEXT" => Ok(SecurityProtocol::Plaintext),
            "SSL" => Ok(SecurityProtocol::Ssl),
            "SASL" | "SASL_PLAINTEXT" => Ok(SecurityProtocol::Sasl),
            "SASL_SSL" => Ok(SecurityProtocol::SaslSsl),
            _ => Err(Error::Config(format!("unknown security protocol '{}'", s))),
        }
    }
}

/// Confluent callback handler classes for OAUTHBEARER.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfluentCallbacks {
    #[serde(rename = "login.callback")]
    pub login_callback: String,
    #[serde(rename = "server.callback")]
    pub server_callback: String,
}

/// A SASL mechanism and its parameters, tagged by `protocol`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol")]
pub enum SaslMechanism {
    #[serde(rename = "GSSAPI")]
    Gssapi {
        #[serde(rename = "kerberos-principal")]
        principal: String,
        /// Kerberos service name (`kafka`, `HTTP`, ...).
        #[serde(rename = "kerberos-protocol")]
        service_name: String,
    },
    #[serde(rename = "OAUTHBEARER")]
    OAuthBearer {
        #[serde(rename = "publicKeyPath")]
        public_key_path: String,
        #[serde(rename = "publicKey", default, skip_serializing_if = "String::is_empty")]
        public_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confluent: Option<ConfluentCallbacks>,
    },
}

impl SaslMechanism {
    /// Mechanism name as used in `sasl.enabled.mechanisms`.
    pub fn name(&self) -> &'static str {
        match self {
            SaslMechanism::Gssapi { .. } => "GSSAPI",
            SaslMechanism::OAuthBearer { .. } => "OAUTHBEARER",
        }
    }
}

/// (De)serializes `Option<SaslMechanism>` with `{}` standing for `None`.
pub(crate) mod sasl_block {
    use serde::de::Error as _;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::SaslMechanism;

    pub fn serialize<S: Serializer>(
        value: &Option<SaslMechanism>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(mechanism) => mechanism.serialize(serializer),
            None => serializer.serialize_map(Some(0))?.end(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<SaslMechanism>, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::Object(ref map) if map.is_empty() => Ok(None),
            other => serde_json::from_value(other).map(Some).map_err(D::Error::custom),
        }
    }
}

/// A requirer's description of the listener it wants.
///
/// Every field is optional; `{}` means "no request yet".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plaintext_pwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secprot: Option<SecurityProtocol>,
    #[serde(
        rename = "SASL",
        default,
        skip_serializing_if = "Option::is_none",
        with = "sasl_block"
    )]
    pub sasl: Option<SaslMechanism>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
}

impl ListenerRequest {
    pub fn is_empty(&self) -> bool {
        self.is_public.is_none()
            && self.plaintext_pwd.is_none()
            && self.secprot.is_none()
            && self.sasl.is_none()
            && self.cert.is_none()
    }

    pub fn cert_present(&self) -> bool {
        self.cert.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// The explicit protocol, or the one implied by cert and SASL presence.
    pub fn effective_secprot(&self) -> SecurityProtocol {
        self.secprot
            .unwrap_or_else(|| SecurityProtocol::derive(self.cert_present(), self.sasl.is_some()))
    }

    /// Copy of this request with `secprot` filled in, ready to publish.
    pub fn to_published(&self) -> Self {
        let mut published = self.clone();
        if !published.is_empty() {
            published.secprot = Some(self.effective_secprot());
        }
        published
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::malformed(crate::constants::REQUEST_KEY, e))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|e| Error::malformed(crate::constants::REQUEST_KEY, e))
    }
}

/// One allocated listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerDescriptor {
    /// `NAME://host:port` the broker binds.
    pub endpoint: String,
    /// `NAME://host:port` the broker advertises.
    pub advertise: String,
    /// `host:port` clients bootstrap from.
    #[serde(default)]
    pub bootstrap_server: String,
    pub port: u16,
    #[serde(default)]
    pub is_public: bool,
    pub secprot: SecurityProtocol,
    #[serde(rename = "SASL", default, with = "sasl_block")]
    pub sasl: Option<SaslMechanism>,
    #[serde(default)]
    pub plaintext_pwd: String,
    pub cert_present: bool,
    pub sasl_present: bool,
    #[serde(default)]
    pub ts_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_pwd: Option<String>,
    #[serde(default)]
    pub ks_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ks_pwd: Option<String>,
    #[serde(default)]
    pub clientauth: bool,
}

/// Listener name -> descriptor, in allocation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerAllocation(IndexMap<String, ListenerDescriptor>);

impl ListenerAllocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, descriptor: ListenerDescriptor) {
        self.0.insert(name.into(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&ListenerDescriptor> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ListenerDescriptor)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every assigned port, in allocation order.
    pub fn ports(&self) -> Vec<u16> {
        self.0.values().map(|d| d.port).collect()
    }

    /// Copy with truststore and keystore passwords removed.
    pub fn without_secrets(&self) -> Self {
        let mut stripped = self.clone();
        for descriptor in stripped.0.values_mut() {
            descriptor.ts_pwd = None;
            descriptor.ks_pwd = None;
        }
        stripped
    }

    /// Distinct SASL mechanism names used by any listener.
    pub fn sasl_mechanisms(&self) -> BTreeSet<&'static str> {
        self.0
            .values()
            .filter_map(|d| d.sasl.as_ref().map(SaslMechanism::name))
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::malformed(crate::constants::LISTENER_TEMPLATE_KEY, e))
    }

    /// Parse an allocation stored under `key`.
    pub fn from_json(key: &str, raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::malformed(key, e))
    }
}

/// Path and password of one store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreRef {
    pub path: String,
    pub password: String,
}

impl StoreRef {
    pub fn new(path: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            password: password.into(),
        }
    }

    pub fn is_set(&self) -> bool {
        !self.path.is_empty()
    }
}

/// Truststore and keystore handed to allocation and option generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreRefs {
    pub truststore: StoreRef,
    pub keystore: StoreRef,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_protocol_derive() {
        assert_eq!(SecurityProtocol::derive(false, false), SecurityProtocol::Plaintext);
        assert_eq!(SecurityProtocol::derive(true, false), SecurityProtocol::Ssl);
        assert_eq!(SecurityProtocol::derive(false, true), SecurityProtocol::Sasl);
        assert_eq!(SecurityProtocol::derive(true, true), SecurityProtocol::SaslSsl);
    }

    #[test]
    fn test_security_protocol_names() {
        assert_eq!(SecurityProtocol::Sasl.as_str(), "SASL");
        assert_eq!(SecurityProtocol::Sasl.kafka_name(), "SASL_PLAINTEXT");
        assert_eq!(SecurityProtocol::SaslSsl.kafka_name(), "SASL_SSL");
        assert_eq!("sasl_plaintext".parse::<SecurityProtocol>().unwrap(), SecurityProtocol::Sasl);
        assert!("TLS".parse::<SecurityProtocol>().is_err());
    }

    #[test]
    fn test_security_protocol_alias_deserializes() {
        let p: SecurityProtocol = serde_json::from_str("\"SASL_PLAINTEXT\"").unwrap();
        assert_eq!(p, SecurityProtocol::Sasl);
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"SASL\"");
    }

    #[test]
    fn test_request_parses_wire_example() {
        let raw = r#"{"is_public": true, "secprot": "SASL_SSL",
            "SASL": {"protocol": "GSSAPI", "kerberos-principal": "principal",
                     "kerberos-protocol": "http"}, "cert": ""}"#;
        let req = ListenerRequest::from_json(raw).unwrap();
        assert_eq!(req.is_public, Some(true));
        assert_eq!(req.secprot, Some(SecurityProtocol::SaslSsl));
        assert_eq!(
            req.sasl,
            Some(SaslMechanism::Gssapi {
                principal: "principal".to_string(),
                service_name: "http".to_string(),
            })
        );
        assert!(!req.cert_present());
    }

    #[test]
    fn test_empty_sasl_block_is_none() {
        let raw = r#"{"is_public": false, "secprot": "PLAINTEXT", "SASL": {}, "cert": ""}"#;
        let req = ListenerRequest::from_json(raw).unwrap();
        assert_eq!(req.sasl, None);
        assert!(!req.is_empty());
    }

    #[test]
    fn test_empty_request() {
        assert!(ListenerRequest::from_json("{}").unwrap().is_empty());
        assert!(ListenerRequest::from_json("").unwrap().is_empty());
        assert_eq!(ListenerRequest::default().to_json().unwrap(), "{}");
    }

    #[test]
    fn test_malformed_request() {
        let err = ListenerRequest::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));

        let err = ListenerRequest::from_json(r#"{"SASL": {"protocol": "NTLM"}}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
    }

    #[test]
    fn test_published_request_derives_secprot() {
        let req = ListenerRequest {
            cert: Some("-----BEGIN CERTIFICATE-----".to_string()),
            ..Default::default()
        };
        assert_eq!(req.to_published().secprot, Some(SecurityProtocol::Ssl));

        let explicit = ListenerRequest {
            secprot: Some(SecurityProtocol::Plaintext),
            cert: Some("x".to_string()),
            ..Default::default()
        };
        assert_eq!(explicit.to_published().secprot, Some(SecurityProtocol::Plaintext));
        assert!(ListenerRequest::default().to_published().is_empty());
    }

    #[test]
    fn test_oauthbearer_roundtrip_keeps_confluent_block() {
        let raw = r#"{"protocol": "OAUTHBEARER", "publicKeyPath": "/etc/kafka/pub.pem",
            "confluent": {"login.callback": "a.Login", "server.callback": "a.Server"}}"#;
        let mech: SaslMechanism = serde_json::from_str(raw).unwrap();
        let json = serde_json::to_value(&mech).unwrap();
        assert_eq!(json["protocol"], "OAUTHBEARER");
        assert_eq!(json["confluent"]["login.callback"], "a.Login");
        assert!(json.get("publicKey").is_none());
    }

    fn descriptor(port: u16, sasl: Option<SaslMechanism>) -> ListenerDescriptor {
        ListenerDescriptor {
            endpoint: format!("x://*BINDING*:{}", port),
            advertise: format!("x://*BINDING*:{}", port),
            bootstrap_server: format!("*BINDING*:{}", port),
            port,
            is_public: false,
            secprot: SecurityProtocol::Plaintext,
            sasl_present: sasl.is_some(),
            sasl,
            plaintext_pwd: String::new(),
            cert_present: false,
            ts_path: "/ts".to_string(),
            ts_pwd: Some("tspwd".to_string()),
            ks_path: "/ks".to_string(),
            ks_pwd: Some("kspwd".to_string()),
            clientauth: false,
        }
    }

    #[test]
    fn test_descriptor_serializes_empty_sasl_block() {
        let json = serde_json::to_value(descriptor(9092, None)).unwrap();
        assert_eq!(json["SASL"], serde_json::json!({}));
        assert_eq!(json["port"], 9092);
    }

    #[test]
    fn test_without_secrets() {
        let mut alloc = ListenerAllocation::new();
        alloc.insert("a", descriptor(9092, None));
        let json = alloc.without_secrets().to_json().unwrap();
        assert!(!json.contains("tspwd"));
        assert!(!json.contains("kspwd"));
        assert!(json.contains("/ts"));
    }

    #[test]
    fn test_sasl_mechanisms_distinct() {
        let gssapi = SaslMechanism::Gssapi {
            principal: "p".to_string(),
            service_name: "kafka".to_string(),
        };
        let mut alloc = ListenerAllocation::new();
        alloc.insert("a", descriptor(9092, Some(gssapi.clone())));
        alloc.insert("b", descriptor(9093, Some(gssapi)));
        alloc.insert("c", descriptor(9094, None));
        let mechs: Vec<_> = alloc.sasl_mechanisms().into_iter().collect();
        assert_eq!(mechs, vec!["GSSAPI"]);
    }

    #[test]
    fn test_allocation_preserves_order() {
        let mut alloc = ListenerAllocation::new();
        alloc.insert("zeta", descriptor(9093, None));
        alloc.insert("alpha", descriptor(9092, None));
        let parsed = ListenerAllocation::from_json("k", &alloc.to_json().unwrap()).unwrap();
        let names: Vec<_> = parsed.names().cloned().collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(parsed.ports(), vec![9093, 9092]);
    }
}
