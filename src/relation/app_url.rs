//! Application URL exchange.
//!
//! HTTP-facing services (REST proxy, schema registry, ksqlDB, control
//! center) publish their URL as app-scoped `url`. Only the leader writes it.

use std::sync::Arc;

use super::base::RelationBase;
use super::listener::broker_opts::Properties;
use super::listener::types::StoreRefs;
use super::truststore::{TrustOutcome, TrustState, TrustStoreAggregator};
use crate::bus::SharedBus;
use crate::constants::URL_KEY;
use crate::error::{Error, Result};
use crate::vault::{CredentialVault, StoreOwner};

pub struct AppUrlRelation {
    base: RelationBase,
    trust: TrustStoreAggregator,
}

impl AppUrlRelation {
    pub fn new(
        bus: Arc<dyn SharedBus>,
        vault: Arc<dyn CredentialVault>,
        relation_name: &str,
        owner: StoreOwner,
        trust_state: TrustState,
    ) -> Self {
        let base = RelationBase::new(bus, relation_name);
        let trust = TrustStoreAggregator::new(base.clone(), vault, owner, trust_state);
        Self { base, trust }
    }

    pub fn trust(&self) -> &TrustStoreAggregator {
        &self.trust
    }

    /// Publish `url` on every instance. Returns whether anything was written;
    /// non-leaders always get `false`.
    pub async fn publish_url(&self, url: &str) -> Result<bool> {
        let mut written = false;
        for relation in self.base.relations().await? {
            written |= self.base.send_app(&relation, URL_KEY, url).await?;
        }
        Ok(written)
    }

    /// First non-empty URL published by a remote application.
    pub async fn url(&self) -> Result<String> {
        let own_app = self.base.local_unit().app().to_string();
        for relation in self.base.require_relations().await? {
            let mut seen: Vec<String> = Vec::new();
            for peer in self.base.participants(&relation).await? {
                let app = peer.unit.app().to_string();
                if app == own_app || seen.contains(&app) {
                    continue;
                }
                if let Some(url) = self.base.read_app(&relation, &app, URL_KEY).await? {
                    if !url.is_empty() {
                        return Ok(url);
                    }
                }
                seen.push(app);
            }
        }
        Err(Error::not_ready(format!(
            "no url published on relation {}",
            self.base.name()
        )))
    }

    /// Client properties for the remote service, keys prefixed by `prefix`.
    ///
    /// The keystore entries are only emitted together with a truststore.
    pub async fn generate_configs(
        &self,
        prefix: &str,
        stores: &StoreRefs,
        enable_keystore: bool,
    ) -> Result<Properties> {
        let mut props = Properties::new();
        props.insert(format!("{}advertised.url", prefix), self.url().await?);
        if stores.truststore.is_set() {
            props.insert(
                format!("{}ssl.truststore.location", prefix),
                stores.truststore.path.clone(),
            );
            props.insert(
                format!("{}ssl.truststore.password", prefix),
                stores.truststore.password.clone(),
            );
            if enable_keystore {
                props.insert(
                    format!("{}ssl.key.password", prefix),
                    stores.keystore.password.clone(),
                );
                props.insert(
                    format!("{}ssl.keystore.password", prefix),
                    stores.keystore.password.clone(),
                );
                props.insert(
                    format!("{}ssl.keystore.location", prefix),
                    stores.keystore.path.clone(),
                );
            }
        }
        Ok(props)
    }

    pub async fn on_relation_changed(&mut self) -> Result<TrustOutcome> {
        self.trust.on_certificate_observed().await
    }

    pub async fn set_tls_auth(
        &mut self,
        cert_chain: &str,
        ts_path: &str,
        ts_pwd: &str,
    ) -> Result<TrustOutcome> {
        self.trust.set_tls_auth(cert_chain, ts_path, ts_pwd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, RelationId, UnitId};
    use crate::relation::listener::types::StoreRef;
    use crate::vault::RecordingVault;

    struct Fixture {
        bus: MemoryBus,
        registry: Vec<UnitId>,
        client: UnitId,
        rel: RelationId,
    }

    async fn fixture() -> Fixture {
        let bus = MemoryBus::new();
        let registry = vec![
            UnitId::new("schema-registry", 0),
            UnitId::new("schema-registry", 1),
        ];
        let client = UnitId::new("connect", 0);
        for (i, unit) in registry.iter().chain([&client]).enumerate() {
            let addr = format!("10.0.0.{}", i + 1);
            bus.add_unit(unit, &addr, &addr).await;
        }
        let members = vec![registry[0].clone(), registry[1].clone(), client.clone()];
        let rel = bus.relate("schemaregistry", &members).await;
        Fixture {
            bus,
            registry,
            client,
            rel,
        }
    }

    fn relation(bus: &MemoryBus, unit: &UnitId) -> AppUrlRelation {
        AppUrlRelation::new(
            Arc::new(bus.unit(unit)),
            Arc::new(RecordingVault::new()),
            "schemaregistry",
            StoreOwner::default(),
            TrustState::default(),
        )
    }

    #[tokio::test]
    async fn test_only_leader_publishes_url() {
        let f = fixture().await;
        let url = "https://registry.example.com:8081";

        assert!(!relation(&f.bus, &f.registry[1]).publish_url(url).await.unwrap());
        assert!(relation(&f.bus, &f.registry[0]).publish_url(url).await.unwrap());
        assert!(!relation(&f.bus, &f.registry[0]).publish_url(url).await.unwrap());
        assert_eq!(f.bus.writes_by("schema-registry", URL_KEY).await, 1);
    }

    #[tokio::test]
    async fn test_client_reads_remote_url() {
        let f = fixture().await;
        let client = relation(&f.bus, &f.client);
        assert!(client.url().await.unwrap_err().is_retryable());

        relation(&f.bus, &f.registry[0])
            .publish_url("https://registry:8081")
            .await
            .unwrap();
        assert_eq!(client.url().await.unwrap(), "https://registry:8081");

        // The client's own url is never returned.
        let seen_by_registry = relation(&f.bus, &f.registry[1]);
        assert!(seen_by_registry.url().await.is_err());
        assert!(f.bus.unit_data(&f.rel, &f.client).await.is_empty());
    }

    #[tokio::test]
    async fn test_generate_configs() {
        let f = fixture().await;
        relation(&f.bus, &f.registry[0])
            .publish_url("https://registry:8081")
            .await
            .unwrap();
        let client = relation(&f.bus, &f.client);
        let stores = StoreRefs {
            truststore: StoreRef::new("/var/ssl/ts.jks", "tspwd"),
            keystore: StoreRef::new("/var/ssl/ks.jks", "kspwd"),
        };

        let plain = client
            .generate_configs("schema.registry.", &StoreRefs::default(), true)
            .await
            .unwrap();
        assert_eq!(plain.len(), 1);
        assert_eq!(plain["schema.registry.advertised.url"], "https://registry:8081");

        let tls = client.generate_configs("", &stores, false).await.unwrap();
        assert_eq!(tls["ssl.truststore.location"], "/var/ssl/ts.jks");
        assert!(!tls.contains_key("ssl.keystore.location"));

        let mtls = client.generate_configs("", &stores, true).await.unwrap();
        assert_eq!(mtls["ssl.keystore.location"], "/var/ssl/ks.jks");
        assert_eq!(mtls["ssl.key.password"], "kspwd");
        assert_eq!(mtls.len(), 6);
    }
}
