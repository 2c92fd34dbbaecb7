//! Negotiation configuration.
//!
//! [`NegotiationConfig`] collects the operator-facing knobs the relation
//! components need: listener port range, default listeners, TLS client
//! authentication, store locations and ownership, and the SASL selection.
//! It is loaded with [`NegotiationConfig::from_env`] and checked with
//! [`NegotiationConfig::validate`], which reports every problem at once.

use std::fmt;
use std::str::FromStr;

use crate::constants::{DEFAULT_BASE_PORT, DEFAULT_LISTENER_COUNT, DEFAULT_ZOOKEEPER_PORT};
use crate::error::{Error, Result};
use crate::relation::listener::types::SaslMechanism;
use crate::relation::zookeeper::ZookeeperRole;
use crate::vault::StoreOwner;

/// Values accepted for `sasl-protocol`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslProtocol {
    OAuthBearer,
    Ldap,
    Scram,
    Plain,
    DelegateToken,
    Kerberos,
    Digest,
}

impl SaslProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            SaslProtocol::OAuthBearer => "oauthbearer",
            SaslProtocol::Ldap => "ldap",
            SaslProtocol::Scram => "scram",
            SaslProtocol::Plain => "plain",
            SaslProtocol::DelegateToken => "delegate-token",
            SaslProtocol::Kerberos => "kerberos",
            SaslProtocol::Digest => "digest",
        }
    }
}

impl fmt::Display for SaslProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaslProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "oauthbearer" => Ok(SaslProtocol::OAuthBearer),
            "ldap" => Ok(SaslProtocol::Ldap),
            "scram" => Ok(SaslProtocol::Scram),
            "plain" => Ok(SaslProtocol::Plain),
            "delegate-token" => Ok(SaslProtocol::DelegateToken),
            "kerberos" => Ok(SaslProtocol::Kerberos),
            "digest" => Ok(SaslProtocol::Digest),
            _ => Err(Error::UnsupportedSaslProtocol(s.to_string())),
        }
    }
}

/// Kerberos options. Either all or none of them must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KerberosSettings {
    pub protocol: String,
    pub realm: String,
    pub domain: String,
    pub kdc_hostname: String,
    pub admin_hostname: String,
}

impl KerberosSettings {
    fn options(&self) -> [(&'static str, &str); 5] {
        [
            ("kerberos-protocol", &self.protocol),
            ("kerberos-realm", &self.realm),
            ("kerberos-domain", &self.domain),
            ("kerberos-kdc-hostname", &self.kdc_hostname),
            ("kerberos-admin-hostname", &self.admin_hostname),
        ]
    }

    /// `Ok(false)` when no option is set, `Ok(true)` when all are, and
    /// [`Error::MissingConfig`] naming the first unset option otherwise.
    pub fn enabled(&self) -> Result<bool> {
        let options = self.options();
        let missing: Vec<&str> = options
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| *name)
            .collect();
        match missing.first() {
            None => Ok(true),
            Some(_) if missing.len() == options.len() => Ok(false),
            Some(first) => Err(Error::MissingConfig(first.to_string())),
        }
    }

    /// `PROTOCOL/<hostname>.<domain>@REALM`
    pub fn principal(&self, hostname: &str) -> String {
        format!(
            "{}/{}.{}@{}",
            self.protocol.to_uppercase(),
            hostname,
            self.domain,
            self.realm.to_uppercase()
        )
    }
}

/// The operator's SASL choice and the options it depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaslSelection {
    pub protocol: Option<SaslProtocol>,
    pub kerberos: KerberosSettings,
    /// Public key used to validate OAUTHBEARER tokens.
    pub oauth_public_key_path: String,
}

impl SaslSelection {
    /// Whether the selected protocol is fully configured.
    ///
    /// Protocols this library cannot negotiate are reported as disabled.
    pub fn enabled(&self) -> Result<bool> {
        match self.protocol {
            None => Ok(false),
            Some(SaslProtocol::Kerberos) => self.kerberos.enabled(),
            Some(SaslProtocol::OAuthBearer) => Ok(!self.oauth_public_key_path.is_empty()),
            Some(_) => Ok(false),
        }
    }

    /// Mechanism block to publish for a listener on `hostname`.
    pub fn mechanism(&self, hostname: &str) -> Result<Option<SaslMechanism>> {
        if !self.enabled()? {
            return Ok(None);
        }
        match self.protocol {
            Some(SaslProtocol::Kerberos) => Ok(Some(SaslMechanism::Gssapi {
                principal: self.kerberos.principal(hostname),
                service_name: self.kerberos.protocol.clone(),
            })),
            Some(SaslProtocol::OAuthBearer) => Ok(Some(SaslMechanism::OAuthBearer {
                public_key_path: self.oauth_public_key_path.clone(),
                public_key: String::new(),
                confluent: None,
            })),
            _ => Ok(None),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.enabled().map(|_| ()).map_err(|e| e.to_string())
    }
}

/// Configuration shared by the relation components of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationConfig {
    /// First port handed out by the listener allocation.
    pub base_port: u16,
    /// Reserve the internal, external and broker listeners.
    pub default_listeners: bool,
    /// Overrides the hostname advertised to peers.
    pub hostname: Option<String>,
    /// Require mutual TLS from listener clients.
    pub tls_client_auth: bool,
    pub keystore_path: String,
    pub truststore_path: String,
    pub store_owner: StoreOwner,
    pub zookeeper_port: u16,
    pub sasl: SaslSelection,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            default_listeners: true,
            hostname: None,
            tls_client_auth: false,
            keystore_path: String::new(),
            truststore_path: String::new(),
            store_owner: StoreOwner::default(),
            zookeeper_port: DEFAULT_ZOOKEEPER_PORT,
            sasl: SaslSelection::default(),
        }
    }
}

fn env_or_empty(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.to_lowercase();
            v == "true" || v == "1" || v == "yes"
        })
        .unwrap_or(default)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

impl NegotiationConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LISTENER_BASE_PORT`: first allocated port (default: 9092)
    /// - `LISTENER_DEFAULTS`: reserve the default listeners (default: true)
    /// - `LISTENER_HOSTNAME`: advertised hostname override
    /// - `TLS_CLIENT_AUTH`: require mutual TLS (default: false)
    /// - `KEYSTORE_PATH`, `TRUSTSTORE_PATH`: store locations
    /// - `STORE_USER`, `STORE_GROUP`: store ownership
    /// - `STORE_MODE`: octal file mode (default: 640)
    /// - `ZOOKEEPER_PORT`: Zookeeper client port (default: 2182)
    /// - `SASL_PROTOCOL`: one of oauthbearer, ldap, scram, plain,
    ///   delegate-token, kerberos, digest
    /// - `OAUTH_PUBLIC_KEY_PATH`: OAUTHBEARER token validation key
    /// - `KERBEROS_PROTOCOL`, `KERBEROS_REALM`, `KERBEROS_DOMAIN`,
    ///   `KERBEROS_KDC_HOSTNAME`, `KERBEROS_ADMIN_HOSTNAME`
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let base_port: u16 = std::env::var("LISTENER_BASE_PORT")
            .unwrap_or_else(|_| defaults.base_port.to_string())
            .parse()
            .map_err(|e| Error::Config(format!("Invalid LISTENER_BASE_PORT: {}", e)))?;

        let zookeeper_port: u16 = std::env::var("ZOOKEEPER_PORT")
            .unwrap_or_else(|_| defaults.zookeeper_port.to_string())
            .parse()
            .map_err(|e| Error::Config(format!("Invalid ZOOKEEPER_PORT: {}", e)))?;

        let mode = match std::env::var("STORE_MODE") {
            Ok(raw) => u32::from_str_radix(raw.trim_start_matches("0o"), 8)
                .map_err(|e| Error::Config(format!("Invalid STORE_MODE: {}", e)))?,
            Err(_) => defaults.store_owner.mode,
        };

        let protocol = match std::env::var("SASL_PROTOCOL") {
            Ok(raw) if !raw.trim().is_empty() => Some(raw.parse::<SaslProtocol>()?),
            _ => None,
        };

        Ok(Self {
            base_port,
            default_listeners: env_flag("LISTENER_DEFAULTS", defaults.default_listeners),
            hostname: non_empty(env_or_empty("LISTENER_HOSTNAME")),
            tls_client_auth: env_flag("TLS_CLIENT_AUTH", defaults.tls_client_auth),
            keystore_path: env_or_empty("KEYSTORE_PATH"),
            truststore_path: env_or_empty("TRUSTSTORE_PATH"),
            store_owner: StoreOwner {
                user: non_empty(env_or_empty("STORE_USER")),
                group: non_empty(env_or_empty("STORE_GROUP")),
                mode,
            },
            zookeeper_port,
            sasl: SaslSelection {
                protocol,
                kerberos: KerberosSettings {
                    protocol: env_or_empty("KERBEROS_PROTOCOL"),
                    realm: env_or_empty("KERBEROS_REALM"),
                    domain: env_or_empty("KERBEROS_DOMAIN"),
                    kdc_hostname: env_or_empty("KERBEROS_KDC_HOSTNAME"),
                    admin_hostname: env_or_empty("KERBEROS_ADMIN_HOSTNAME"),
                },
                oauth_public_key_path: env_or_empty("OAUTH_PUBLIC_KEY_PATH"),
            },
        })
    }

    /// Check the configuration, collecting every problem found.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.base_port == 0 {
            errors.push("base_port must be between 1 and 65535".to_string());
        }

        let reserved = if self.default_listeners {
            DEFAULT_LISTENER_COUNT
        } else {
            0
        };
        if self.base_port.checked_add(reserved).is_none() {
            errors.push(format!(
                "base_port ({}) leaves no room for the default listeners",
                self.base_port
            ));
        }

        if self.zookeeper_port == 0 {
            errors.push("zookeeper_port must be between 1 and 65535".to_string());
        }

        if self.store_owner.mode > 0o777 {
            errors.push(format!(
                "store mode ({:o}) must be a permission mode",
                self.store_owner.mode
            ));
        }

        if self.tls_client_auth && self.keystore_path.is_empty() {
            errors.push("tls_client_auth requires keystore_path".to_string());
        }

        if let Some(hostname) = &self.hostname {
            if hostname.contains(char::is_whitespace) {
                errors.push(format!("hostname '{}' contains whitespace", hostname));
            }
        }

        if let Err(e) = self.sasl.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Role for a Zookeeper unit publishing its endpoint.
    pub fn zookeeper_provider(&self) -> ZookeeperRole {
        ZookeeperRole::Provider {
            hostname: self.hostname.clone(),
            port: self.zookeeper_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kerberos() -> KerberosSettings {
        KerberosSettings {
            protocol: "kafka".to_string(),
            realm: "example.com".to_string(),
            domain: "example.com".to_string(),
            kdc_hostname: "kdc.example.com".to_string(),
            admin_hostname: "admin.example.com".to_string(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = NegotiationConfig::default();
        assert_eq!(config.base_port, 9092);
        assert!(config.default_listeners);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sasl_protocol_parse() {
        assert_eq!("Kerberos".parse::<SaslProtocol>().unwrap(), SaslProtocol::Kerberos);
        assert_eq!(
            "delegate-token".parse::<SaslProtocol>().unwrap(),
            SaslProtocol::DelegateToken
        );
        assert_eq!(
            "ntlm".parse::<SaslProtocol>().unwrap_err(),
            Error::UnsupportedSaslProtocol("ntlm".to_string())
        );
    }

    #[test]
    fn test_kerberos_all_or_nothing() {
        assert!(!KerberosSettings::default().enabled().unwrap());
        assert!(kerberos().enabled().unwrap());

        let partial = KerberosSettings {
            domain: String::new(),
            kdc_hostname: String::new(),
            ..kerberos()
        };
        assert_eq!(
            partial.enabled().unwrap_err(),
            Error::MissingConfig("kerberos-domain".to_string())
        );
    }

    #[test]
    fn test_kerberos_principal() {
        assert_eq!(
            kerberos().principal("broker-0"),
            "KAFKA/broker-0.example.com@EXAMPLE.COM"
        );
    }

    #[test]
    fn test_selection_mechanism() {
        let selection = SaslSelection {
            protocol: Some(SaslProtocol::Kerberos),
            kerberos: kerberos(),
            ..Default::default()
        };
        match selection.mechanism("broker-0").unwrap() {
            Some(SaslMechanism::Gssapi {
                principal,
                service_name,
            }) => {
                assert_eq!(principal, "KAFKA/broker-0.example.com@EXAMPLE.COM");
                assert_eq!(service_name, "kafka");
            }
            other => panic!("unexpected mechanism {:?}", other),
        }

        let unconfigured = SaslSelection {
            protocol: Some(SaslProtocol::OAuthBearer),
            ..Default::default()
        };
        assert_eq!(unconfigured.mechanism("broker-0").unwrap(), None);

        let scram = SaslSelection {
            protocol: Some(SaslProtocol::Scram),
            ..Default::default()
        };
        assert!(!scram.enabled().unwrap());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let config = NegotiationConfig {
            base_port: 65534,
            zookeeper_port: 0,
            tls_client_auth: true,
            sasl: SaslSelection {
                protocol: Some(SaslProtocol::Kerberos),
                kerberos: KerberosSettings {
                    realm: "EXAMPLE.COM".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("kerberos-protocol")));
    }

    #[test]
    fn test_zookeeper_provider_role() {
        let config = NegotiationConfig {
            hostname: Some("zk-0.lan".to_string()),
            zookeeper_port: 2181,
            ..Default::default()
        };
        assert_eq!(
            config.zookeeper_provider(),
            ZookeeperRole::Provider {
                hostname: Some("zk-0.lan".to_string()),
                port: 2181,
            }
        );
    }
}
