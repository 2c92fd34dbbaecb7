//! Zookeeper endpoint exchange.
//!
//! Zookeeper units publish `endpoint = "<hostname>:<port>"`. Every unit on the
//! relation (Zookeeper peers and brokers alike) assembles the connection
//! string from the endpoints it can see: its own first, then the others in
//! relation iteration order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::base::RelationBase;
use super::resolver::HostnameResolver;
use super::truststore::{TrustOutcome, TrustState, TrustStoreAggregator};
use crate::bus::SharedBus;
use crate::constants::ENDPOINT_KEY;
use crate::error::Result;
use crate::vault::{CredentialVault, StoreOwner};

/// Persisted Zookeeper relation state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZookeeperState {
    /// Comma separated `host:port` list.
    #[serde(default)]
    pub zk_list: String,
}

/// Which side of the relation this unit is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZookeeperRole {
    /// A Zookeeper unit; publishes its endpoint.
    Provider {
        /// Overrides the hostname resolved from the ingress address.
        hostname: Option<String>,
        port: u16,
    },
    /// A client (broker); only reads endpoints.
    Requirer,
}

pub struct ZookeeperRelation {
    base: RelationBase,
    role: ZookeeperRole,
    state: ZookeeperState,
    trust: TrustStoreAggregator,
}

impl ZookeeperRelation {
    pub fn new(
        bus: Arc<dyn SharedBus>,
        vault: Arc<dyn CredentialVault>,
        relation_name: &str,
        role: ZookeeperRole,
        owner: StoreOwner,
        state: ZookeeperState,
        trust_state: TrustState,
    ) -> Self {
        let base = RelationBase::new(bus, relation_name);
        let trust = TrustStoreAggregator::new(base.clone(), vault, owner, trust_state);
        Self {
            base,
            role,
            state,
            trust,
        }
    }

    pub fn state(&self) -> &ZookeeperState {
        &self.state
    }

    pub fn trust(&self) -> &TrustStoreAggregator {
        &self.trust
    }

    /// Connection string computed by the last change event.
    pub fn connection_string(&self) -> &str {
        &self.state.zk_list
    }

    /// Publish this unit's endpoint. Requirers publish nothing.
    pub async fn publish_endpoint(&self, hostnames: &dyn HostnameResolver) -> Result<usize> {
        let ZookeeperRole::Provider { hostname, port } = &self.role else {
            return Ok(0);
        };
        let host = match hostname {
            Some(h) => h.clone(),
            None => hostnames.hostname(&self.base.binding().await?.ingress_address)?,
        };
        let endpoint = format!("{}:{}", host, port);
        self.base.send_all(ENDPOINT_KEY, &endpoint).await
    }

    pub async fn on_relation_joined(&self, hostnames: &dyn HostnameResolver) -> Result<usize> {
        self.publish_endpoint(hostnames).await
    }

    /// Republish the endpoint, rebuild the connection string and refresh the
    /// trust store.
    pub async fn on_relation_changed(
        &mut self,
        hostnames: &dyn HostnameResolver,
    ) -> Result<TrustOutcome> {
        self.publish_endpoint(hostnames).await?;

        let mut own: Vec<String> = Vec::new();
        let mut peers: Vec<String> = Vec::new();
        for relation in self.base.relations().await? {
            if let Some(endpoint) = self.base.read_own(&relation, ENDPOINT_KEY).await? {
                own.push(endpoint);
            }
            for peer in self.base.participants(&relation).await? {
                if let Some(endpoint) = self.base.read(&relation, &peer.unit, ENDPOINT_KEY).await? {
                    peers.push(endpoint);
                }
            }
        }
        let mut endpoints: Vec<String> = Vec::new();
        for endpoint in own.into_iter().chain(peers) {
            if !endpoint.is_empty() && !endpoints.contains(&endpoint) {
                endpoints.push(endpoint);
            }
        }
        let zk_list = endpoints.join(",");
        if zk_list != self.state.zk_list {
            info!(relation = self.base.name(), zk_list = %zk_list, "Zookeeper connection string changed");
            self.state.zk_list = zk_list;
        }

        self.trust.on_certificate_observed().await
    }

    /// Whether clients must authenticate towards Zookeeper.
    pub async fn client_auth_enabled(&self) -> Result<bool> {
        self.trust.is_tls_enabled().await
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
    use crate::constants::DEFAULT_ZOOKEEPER_PORT;
    use crate::relation::resolver::StaticHostnames;
    use crate::vault::RecordingVault;

    fn relation(bus: &MemoryBus, unit: &UnitId, role: ZookeeperRole) -> ZookeeperRelation {
        ZookeeperRelation::new(
            Arc::new(bus.unit(unit)),
            Arc::new(RecordingVault::new()),
            "zookeeper",
            role,
            StoreOwner::default(),
            ZookeeperState::default(),
            TrustState::default(),
        )
    }

    fn provider_role() -> ZookeeperRole {
        ZookeeperRole::Provider {
            hostname: None,
            port: DEFAULT_ZOOKEEPER_PORT,
        }
    }

    async fn two_zookeepers() -> (MemoryBus, UnitId, UnitId, RelationId) {
        let bus = MemoryBus::new();
        let zk0 = UnitId::new("zookeeper", 0);
        let zk1 = UnitId::new("zookeeper", 1);
        bus.add_unit(&zk0, "10.0.0.1", "1.1.1.1").await;
        bus.add_unit(&zk1, "10.0.0.2", "2.2.2.2").await;
        let rel = bus.relate("zookeeper", &[zk0.clone(), zk1.clone()]).await;
        (bus, zk0, zk1, rel)
    }

    #[tokio::test]
    async fn test_connection_string_self_first() {
        let (bus, zk0, zk1, _rel) = two_zookeepers().await;
        let hostnames = StaticHostnames::new();

        relation(&bus, &zk0, provider_role())
            .on_relation_joined(&hostnames)
            .await
            .unwrap();
        let mut local = relation(&bus, &zk1, provider_role());
        local.on_relation_changed(&hostnames).await.unwrap();

        assert_eq!(local.connection_string(), "2.2.2.2:2182,1.1.1.1:2182");
        assert_eq!(local.state().zk_list, "2.2.2.2:2182,1.1.1.1:2182");
    }

    #[tokio::test]
    async fn test_hostname_override_and_idempotent_publish() {
        let (bus, zk0, _zk1, rel) = two_zookeepers().await;
        let zk = relation(
            &bus,
            &zk0,
            ZookeeperRole::Provider {
                hostname: Some("zk-0.example.com".to_string()),
                port: 2181,
            },
        );
        let hostnames = StaticHostnames::new();
        assert_eq!(zk.publish_endpoint(&hostnames).await.unwrap(), 1);
        assert_eq!(zk.publish_endpoint(&hostnames).await.unwrap(), 0);
        let data = bus.unit_data(&rel, &zk0).await;
        assert_eq!(data[ENDPOINT_KEY], "zk-0.example.com:2181");
    }

    #[tokio::test]
    async fn test_requirer_lists_peers_only() {
        let (bus, zk0, zk1, rel) = two_zookeepers().await;
        let broker = UnitId::new("kafka", 0);
        bus.add_unit(&broker, "10.0.0.9", "9.9.9.9").await;
        bus.join(&rel, &broker).await.unwrap();
        let hostnames = StaticHostnames::new();
        for unit in [&zk0, &zk1] {
            relation(&bus, unit, provider_role())
                .publish_endpoint(&hostnames)
                .await
                .unwrap();
        }
        // An empty endpoint is skipped.
        let zk2 = UnitId::new("zookeeper", 2);
        bus.add_unit(&zk2, "10.0.0.3", "3.3.3.3").await;
        bus.join(&rel, &zk2).await.unwrap();
        bus.seed(&rel, &zk2, ENDPOINT_KEY, "").await;

        let mut kafka = relation(&bus, &broker, ZookeeperRole::Requirer);
        kafka.on_relation_changed(&hostnames).await.unwrap();
        assert_eq!(kafka.connection_string(), "1.1.1.1:2182,2.2.2.2:2182");
        assert_eq!(bus.writes_by(broker.as_str(), ENDPOINT_KEY).await, 0);
        assert!(!kafka.client_auth_enabled().await.unwrap());
    }
}
