//! Client properties derived from the provider's entry for this application.

use super::broker_opts::{Properties, gssapi_jaas_config};
use super::types::{ListenerDescriptor, SaslMechanism, StoreRef};
use crate::constants::OAUTHBEARER_LOGIN_MODULE;

/// Local material a client needs besides the negotiated entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSecurity {
    pub truststore: StoreRef,
    /// Only used when the broker requires mutual TLS.
    pub keystore: StoreRef,
    /// Keytab holding the client principal, for GSSAPI.
    pub keytab: Option<String>,
}

/// Kafka client properties for connecting through `entry`.
pub fn client_properties(
    bootstrap_servers: &str,
    entry: &ListenerDescriptor,
    security: &ClientSecurity,
) -> Properties {
    let mut props = Properties::new();
    props.insert("bootstrap.servers".to_string(), bootstrap_servers.to_string());
    props.insert(
        "security.protocol".to_string(),
        entry.secprot.kafka_name().to_string(),
    );

    if entry.sasl_present {
        match &entry.sasl {
            Some(SaslMechanism::Gssapi {
                principal,
                service_name,
            }) => {
                props.insert("sasl.mechanism".to_string(), "GSSAPI".to_string());
                props.insert(
                    "sasl.kerberos.service.name".to_string(),
                    service_name.clone(),
                );
                if let Some(keytab) = &security.keytab {
                    props.insert(
                        "sasl.jaas.config".to_string(),
                        gssapi_jaas_config(keytab, principal),
                    );
                }
            }
            Some(SaslMechanism::OAuthBearer { confluent, .. }) => {
                props.insert("sasl.mechanism".to_string(), "OAUTHBEARER".to_string());
                props.insert(
                    "sasl.jaas.config".to_string(),
                    format!("{} required;", OAUTHBEARER_LOGIN_MODULE),
                );
                if let Some(callbacks) = confluent {
                    props.insert(
                        "sasl.login.callback.handler.class".to_string(),
                        callbacks.login_callback.clone(),
                    );
                }
            }
            None => {}
        }
    }

    if entry.secprot.uses_tls() {
        if security.truststore.is_set() {
            props.insert(
                "ssl.truststore.location".to_string(),
                security.truststore.path.clone(),
            );
            props.insert(
                "ssl.truststore.password".to_string(),
                security.truststore.password.clone(),
            );
        }
        if entry.clientauth && security.keystore.is_set() {
            props.insert(
                "ssl.keystore.location".to_string(),
                security.keystore.path.clone(),
            );
            props.insert(
                "ssl.keystore.password".to_string(),
                security.keystore.password.clone(),
            );
            props.insert(
                "ssl.key.password".to_string(),
                security.keystore.password.clone(),
            );
        }
    }
    props
}
