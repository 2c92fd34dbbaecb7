//! Centralized protocol and configuration constants.
//!
//! This module consolidates the relation data keys, placeholder tokens and
//! defaults shared by every negotiation component. Having them in one place
//! keeps both sides of a relation (provider and requirer) in agreement about
//! the wire format.
//!
//! # Categories
//!
//! - **Relation Keys**: field names published into relation data
//! - **Placeholders**: tokens resolved per unit in listener templates
//! - **Listener Defaults**: ports and names of the provider's own listeners
//! - **Credential Defaults**: password lengths, store permissions
//! - **SASL Constants**: JAAS login modules and keytab locations
//! - **MDS Defaults**: metadata service endpoint and authentication

// =============================================================================
// Relation Keys
// =============================================================================

/// Unit-scoped key holding a requirer's JSON-encoded listener request.
pub const REQUEST_KEY: &str = "request";

/// Unit-scoped key holding a provider unit's resolved listener map.
pub const BOOTSTRAP_DATA_KEY: &str = "bootstrap-data";

/// App-scoped key holding the leader's placeholder listener template.
pub const LISTENER_TEMPLATE_KEY: &str = "listener-template";

/// Unit-scoped key holding the unit's own PEM certificate chain.
pub const TLS_CERT_KEY: &str = "tls_cert";

/// Key a provider may publish to require mutual TLS from clients.
pub const CLIENT_AUTH_KEY: &str = "clientauth";

/// Unit-scoped key holding a Zookeeper unit's `host:port` endpoint.
pub const ENDPOINT_KEY: &str = "endpoint";

/// Key holding a service URL: app-scoped for REST proxy, KSQL and Schema
/// Registry, unit-scoped for MDS units.
pub const URL_KEY: &str = "url";

/// App-scoped key holding the MDS leader's credentials, keyed by unit name.
pub const MDS_CREDENTIALS_KEY: &str = "mds-credentials";

// =============================================================================
// Placeholders
// =============================================================================

/// Replaced by the resolving unit's binding (private) address.
pub const BINDING_PLACEHOLDER: &str = "*BINDING*";

/// Replaced by the resolving unit's advertise (ingress) address.
pub const ADVERTISE_PLACEHOLDER: &str = "*ADVERTISE*";

// =============================================================================
// Listener Defaults
// =============================================================================

/// First port handed out by the allocator.
///
/// With default listeners enabled, `internal`, `external` and `broker` take
/// this port and the two following it.
pub const DEFAULT_BASE_PORT: u16 = 9092;

/// Number of ports reserved for the provider's default listeners.
pub const DEFAULT_LISTENER_COUNT: u16 = 3;

/// Name of the private, broker-facing default listener.
pub const INTERNAL_LISTENER: &str = "internal";

/// Name of the public default listener.
pub const EXTERNAL_LISTENER: &str = "external";

/// Name of the inter-broker default listener.
pub const BROKER_LISTENER: &str = "broker";

/// Default client port published by Zookeeper units.
pub const DEFAULT_ZOOKEEPER_PORT: u16 = 2182;

// =============================================================================
// Credential Defaults
// =============================================================================

/// Default length of generated passwords.
pub const PASSWORD_LEN: usize = 48;

/// Length of the locally cached default-listener passwords.
pub const LISTENER_PASSWORD_LEN: usize = 12;

/// File mode applied to keystores and truststores.
pub const STORE_FILE_MODE: u32 = 0o640;

/// Alias used for every certificate imported into a truststore.
pub const TRUSTSTORE_ALIAS_PREFIX: &str = "relationCA";

/// PEM marker opening a certificate block.
pub const PEM_CERT_BEGIN: &str = "-----BEGIN CERTIFICATE-----";

/// PEM marker closing a certificate block.
pub const PEM_CERT_END: &str = "-----END CERTIFICATE-----";

// =============================================================================
// SASL Constants
// =============================================================================

/// Keytab used by the broker's GSSAPI listeners.
pub const BROKER_KEYTAB_PATH: &str = "/etc/security/keytabs/kafka_broker.keytab";

/// JAAS login module for Kerberos.
pub const KRB5_LOGIN_MODULE: &str = "com.sun.security.auth.module.Krb5LoginModule";

/// JAAS login module for OAUTHBEARER.
pub const OAUTHBEARER_LOGIN_MODULE: &str =
    "org.apache.kafka.common.security.oauthbearer.OAuthBearerLoginModule";

/// Prefix for per-listener broker properties.
pub const LISTENER_PROPERTY_PREFIX: &str = "listener.name.";

// =============================================================================
// MDS Defaults
// =============================================================================

/// Port of the metadata service REST endpoint.
pub const DEFAULT_MDS_PORT: u16 = 8090;

pub const DEFAULT_MDS_PROTOCOL: &str = "https";

/// Length of the passwords issued to MDS clients.
pub const MDS_PASSWORD_LEN: usize = 12;

/// `confluent.metadata.http.auth.credentials.provider` unless issued otherwise.
pub const DEFAULT_MDS_CRED_PROVIDER: &str = "BASIC";

/// `confluent.schema.registry.auth.mechanism` unless issued otherwise.
pub const DEFAULT_MDS_AUTH_MECHANISM: &str = "JETTY_AUTH";

pub const DEFAULT_MDS_AUTHORIZER: &str =
    "io.confluent.kafka.schemaregistry.security.authorizer.rbac.RbacAuthorizer";
