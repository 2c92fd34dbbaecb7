//! Broker properties derived from a resolved allocation.

use indexmap::IndexMap;

use super::types::{ListenerAllocation, SaslMechanism, StoreRefs};
use crate::constants::{
    BROKER_KEYTAB_PATH, KRB5_LOGIN_MODULE, LISTENER_PROPERTY_PREFIX, OAUTHBEARER_LOGIN_MODULE,
};
use crate::error::{Error, Result};

/// Kafka properties, in insertion order.
pub type Properties = IndexMap<String, String>;

/// JAAS entry for a broker GSSAPI listener.
pub fn gssapi_jaas_config(keytab: &str, principal: &str) -> String {
    format!(
        "{} required useKeyTab=true storeKey=true keyTab=\"{}\" principal=\"{}\";",
        KRB5_LOGIN_MODULE, keytab, principal
    )
}

/// JAAS entry for a broker OAUTHBEARER listener.
pub fn oauthbearer_jaas_config(public_key_path: &str) -> String {
    format!(
        "{} required publicKeyPath=\"{}\";",
        OAUTHBEARER_LOGIN_MODULE, public_key_path
    )
}

/// Flatten a resolved allocation into broker properties.
///
/// Produces `listeners`, `advertised.listeners`,
/// `listener.security.protocol.map` and the per-listener
/// `listener.name.<name>.*` SASL and SSL settings. Store passwords come from
/// `stores`, never from the allocation, since published allocations have them
/// stripped.
pub fn generate_opts(
    resolved: &ListenerAllocation,
    stores: &StoreRefs,
    clientauth: bool,
) -> Result<Properties> {
    if resolved.is_empty() {
        return Err(Error::EmptyTemplate);
    }

    let mut opts = Properties::new();
    opts.insert(
        "listeners".to_string(),
        join(resolved.iter().map(|(_, l)| l.endpoint.as_str())),
    );
    opts.insert(
        "advertised.listeners".to_string(),
        join(resolved.iter().map(|(_, l)| l.advertise.as_str())),
    );
    opts.insert(
        "listener.security.protocol.map".to_string(),
        resolved
            .iter()
            .map(|(name, l)| format!("{}:{}", name.to_uppercase(), l.secprot.kafka_name()))
            .collect::<Vec<_>>()
            .join(","),
    );

    for (name, listener) in resolved.iter() {
        let prefix = format!("{}{}", LISTENER_PROPERTY_PREFIX, name);
        if listener.sasl_present {
            if let Some(mechanism) = &listener.sasl {
                sasl_opts(&mut opts, &prefix, mechanism);
            }
        }
        if listener.cert_present {
            opts.insert(
                format!("{}.ssl.client.auth", prefix),
                if clientauth { "required" } else { "none" }.to_string(),
            );
            opts.insert(
                format!("{}.ssl.key.password", prefix),
                stores.keystore.password.clone(),
            );
            opts.insert(
                format!("{}.ssl.keystore.location", prefix),
                stores.keystore.path.clone(),
            );
            opts.insert(
                format!("{}.ssl.keystore.password", prefix),
                stores.keystore.password.clone(),
            );
            if stores.truststore.is_set() {
                opts.insert(
                    format!("{}.ssl.truststore.location", prefix),
                    stores.truststore.path.clone(),
                );
                opts.insert(
                    format!("{}.ssl.truststore.password", prefix),
                    stores.truststore.password.clone(),
                );
            }
        }
    }
    Ok(opts)
}

fn sasl_opts(opts: &mut Properties, prefix: &str, mechanism: &SaslMechanism) {
    opts.insert(
        format!("{}.sasl.enabled.mechanisms", prefix),
        mechanism.name().to_string(),
    );
    match mechanism {
        SaslMechanism::Gssapi {
            principal,
            service_name,
        } => {
            opts.insert(
                format!("{}.gssapi.sasl.jaas.config", prefix),
                gssapi_jaas_config(BROKER_KEYTAB_PATH, principal),
            );
            opts.insert(
                format!("{}.sasl.kerberos.service.name", prefix),
                service_name.clone(),
            );
        }
        SaslMechanism::OAuthBearer {
            public_key_path,
            confluent,
            ..
        } => {
            opts.insert(
                format!("{}.sasl.jaas.config", prefix),
                oauthbearer_jaas_config(public_key_path),
            );
            if let Some(callbacks) = confluent {
                opts.insert(
                    format!("{}.oauthbearer.sasl.login.callback.handler.class", prefix),
                    callbacks.login_callback.clone(),
                );
                opts.insert(
                    format!("{}.oauthbearer.sasl.server.callback.handler.class", prefix),
                    callbacks.server_callback.clone(),
                );
            }
        }
    }
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::listener::types::{
        ConfluentCallbacks, ListenerDescriptor, SecurityProtocol, StoreRef,
    };

    fn listener(name: &str, port: u16, secprot: SecurityProtocol) -> ListenerDescriptor {
        let endpoint = format!("{}://broker-0.local:{}", name, port);
        ListenerDescriptor {
            endpoint: endpoint.clone(),
            advertise: endpoint,
            bootstrap_server: format!("broker-0.local:{}", port),
            port,
            is_public: false,
            secprot,
            sasl: None,
            plaintext_pwd: String::new(),
            cert_present: secprot.uses_tls(),
            sasl_present: secprot.uses_sasl(),
            ts_path: String::new(),
            ts_pwd: None,
            ks_path: String::new(),
            ks_pwd: None,
            clientauth: false,
        }
    }

    fn stores() -> StoreRefs {
        StoreRefs {
            truststore: StoreRef::new("/var/ssl/ts.p12", "tspwd"),
            keystore: StoreRef::new("/var/ssl/ks.p12", "kspwd"),
        }
    }

    #[test]
    fn test_empty_allocation_rejected() {
        let err = generate_opts(&ListenerAllocation::new(), &stores(), false).unwrap_err();
        assert_eq!(err, Error::EmptyTemplate);
    }

    #[test]
    fn test_listener_lists() {
        let mut alloc = ListenerAllocation::new();
        alloc.insert("connect", listener("connect", 9092, SecurityProtocol::Plaintext));
        alloc.insert("ksql", listener("ksql", 9093, SecurityProtocol::Sasl));
        let opts = generate_opts(&alloc, &stores(), false).unwrap();

        assert_eq!(
            opts["listeners"],
            "connect://broker-0.local:9092,ksql://broker-0.local:9093"
        );
        assert_eq!(
            opts["listener.security.protocol.map"],
            "CONNECT:PLAINTEXT,KSQL:SASL_PLAINTEXT"
        );
        assert!(!opts.contains_key("listener.name.connect.ssl.keystore.location"));
    }

    #[test]
    fn test_gssapi_listener() {
        let mut d = listener("connect", 9092, SecurityProtocol::SaslSsl);
        d.sasl = Some(SaslMechanism::Gssapi {
            principal: "kafka/broker-0@EXAMPLE.COM".to_string(),
            service_name: "kafka".to_string(),
        });
        let mut alloc = ListenerAllocation::new();
        alloc.insert("connect", d);
        let opts = generate_opts(&alloc, &stores(), true).unwrap();

        assert_eq!(opts["listener.name.connect.sasl.enabled.mechanisms"], "GSSAPI");
        assert_eq!(
            opts["listener.name.connect.gssapi.sasl.jaas.config"],
            "com.sun.security.auth.module.Krb5LoginModule required useKeyTab=true \
             storeKey=true keyTab=\"/etc/security/keytabs/kafka_broker.keytab\" \
             principal=\"kafka/broker-0@EXAMPLE.COM\";"
        );
        assert_eq!(opts["listener.name.connect.sasl.kerberos.service.name"], "kafka");
        assert_eq!(opts["listener.name.connect.ssl.client.auth"], "required");
        assert_eq!(opts["listener.name.connect.ssl.keystore.password"], "kspwd");
        assert_eq!(
            opts["listener.name.connect.ssl.truststore.location"],
            "/var/ssl/ts.p12"
        );
    }

    #[test]
    fn test_oauthbearer_listener_with_confluent_callbacks() {
        let mut d = listener("rest", 9094, SecurityProtocol::Sasl);
        d.sasl = Some(SaslMechanism::OAuthBearer {
            public_key_path: "/etc/kafka/pub.pem".to_string(),
            public_key: String::new(),
            confluent: Some(ConfluentCallbacks {
                login_callback: "io.confluent.Login".to_string(),
                server_callback: "io.confluent.Server".to_string(),
            }),
        });
        let mut alloc = ListenerAllocation::new();
        alloc.insert("rest", d);
        let opts = generate_opts(&alloc, &stores(), false).unwrap();

        assert_eq!(
            opts["listener.name.rest.sasl.jaas.config"],
            "org.apache.kafka.common.security.oauthbearer.OAuthBearerLoginModule required \
             publicKeyPath=\"/etc/kafka/pub.pem\";"
        );
        assert_eq!(
            opts["listener.name.rest.oauthbearer.sasl.login.callback.handler.class"],
            "io.confluent.Login"
        );
        assert_eq!(
            opts["listener.name.rest.oauthbearer.sasl.server.callback.handler.class"],
            "io.confluent.Server"
        );
    }

    #[test]
    fn test_truststore_omitted_when_unset() {
        let mut alloc = ListenerAllocation::new();
        alloc.insert("internal", listener("INTERNAL", 9092, SecurityProtocol::Ssl));
        let stores = StoreRefs {
            keystore: StoreRef::new("/ks", "pwd"),
            ..Default::default()
        };
        let opts = generate_opts(&alloc, &stores, false).unwrap();
        assert_eq!(opts["listener.name.internal.ssl.client.auth"], "none");
        assert!(!opts.contains_key("listener.name.internal.ssl.truststore.location"));
    }
}
