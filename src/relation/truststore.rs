//! Certificate exchange and trust store aggregation.
//!
//! Every unit publishes its own certificate chain under `tls_cert` on every
//! instance of a relation. The aggregator collects the chains of all
//! participants (itself included), splits and deduplicates them, and rebuilds
//! the local trust store from scratch through the [`CredentialVault`]. The set
//! is re-derived on every run, so rotated or removed certificates drop out.
//!
//! TLS must be symmetric: a peer publishing a certificate while this unit has
//! none is a configuration error, reported without writing any store.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::base::RelationBase;
use crate::constants::TLS_CERT_KEY;
use crate::error::{Error, Result};
use crate::vault::{CredentialVault, StoreOwner, unique_certificates};

/// Persisted trust state of one relation component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustState {
    #[serde(default)]
    pub ts_path: String,
    #[serde(default)]
    pub ts_pwd: String,
    /// Certificates the store was last built from.
    #[serde(default)]
    pub trusted_certs: Vec<String>,
}

/// Result of an aggregation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustOutcome {
    /// Nobody published a certificate; TLS is off for this relation.
    Disabled,
    /// The store was rebuilt with this many certificates.
    Rebuilt(usize),
}

/// Certificates observed across a relation, deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedCertificates {
    pub certs: Vec<String>,
}

/// Publishes the local certificate and maintains the trust store.
pub struct TrustStoreAggregator {
    base: RelationBase,
    vault: Arc<dyn CredentialVault>,
    owner: StoreOwner,
    state: TrustState,
}

impl TrustStoreAggregator {
    pub fn new(
        base: RelationBase,
        vault: Arc<dyn CredentialVault>,
        owner: StoreOwner,
        state: TrustState,
    ) -> Self {
        Self {
            base,
            vault,
            owner,
            state,
        }
    }

    pub fn state(&self) -> &TrustState {
        &self.state
    }

    pub fn vault(&self) -> &Arc<dyn CredentialVault> {
        &self.vault
    }

    /// Read every participant's certificate.
    ///
    /// Fails with [`Error::TlsNotLocallyConfigured`] when a peer published a
    /// certificate on a relation instance where this unit has not.
    pub async fn observe(&self) -> Result<TrustedCertificates> {
        let mut chains = Vec::new();
        for relation in self.base.relations().await? {
            let own = non_empty(self.base.read_own(&relation, TLS_CERT_KEY).await?);
            let mut peer_chains = Vec::new();
            for peer in self.base.participants(&relation).await? {
                if let Some(chain) = non_empty(self.base.read(&relation, &peer.unit, TLS_CERT_KEY).await?)
                {
                    peer_chains.push(chain);
                }
            }
            match own {
                Some(chain) => chains.push(chain),
                None if !peer_chains.is_empty() => {
                    warn!(relation = %relation, "Peers publish certificates but this unit does not");
                    return Err(Error::TlsNotLocallyConfigured {
                        relation: relation.to_string(),
                    });
                }
                None => {}
            }
            chains.extend(peer_chains);
        }
        let certs = unique_certificates(chains.iter().map(String::as_str))?;
        Ok(TrustedCertificates { certs })
    }

    /// Rescan the relation and rebuild the trust store.
    pub async fn on_certificate_observed(&mut self) -> Result<TrustOutcome> {
        let observed = self.observe().await?;
        if observed.certs.is_empty() {
            debug!(relation = self.base.name(), "No certificates published, TLS disabled");
            return Ok(TrustOutcome::Disabled);
        }
        if self.state.ts_path.is_empty() {
            return Err(Error::MissingConfig(format!(
                "truststore path for relation {}",
                self.base.name()
            )));
        }

        let path = Path::new(&self.state.ts_path);
        self.vault
            .create_truststore(path, &self.state.ts_pwd, &observed.certs, true)
            .await?;
        self.vault.set_file_permissions(path, &self.owner).await?;

        let count = observed.certs.len();
        if self.state.trusted_certs != observed.certs {
            info!(
                relation = self.base.name(),
                certificates = count,
                "Trusted certificate set changed"
            );
        }
        self.state.trusted_certs = observed.certs;
        Ok(TrustOutcome::Rebuilt(count))
    }

    /// Publish the local certificate chain and rebuild the trust store.
    pub async fn set_tls_auth(
        &mut self,
        cert_chain: &str,
        ts_path: &str,
        ts_pwd: &str,
    ) -> Result<TrustOutcome> {
        let relations = self.base.require_relations().await?;
        for relation in &relations {
            self.base.send(relation, TLS_CERT_KEY, cert_chain).await?;
        }
        self.state.ts_path = ts_path.to_string();
        self.state.ts_pwd = ts_pwd.to_string();
        self.on_certificate_observed().await
    }

    /// Whether any participant, this unit included, published a certificate.
    pub async fn is_tls_enabled(&self) -> Result<bool> {
        Ok(!self.observe().await?.certs.is_empty())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, RelationId, SharedBus, UnitId};
    use crate::vault::RecordingVault;
    use crate::vault::pem::tests::pem;

    struct Fixture {
        bus: MemoryBus,
        vault: RecordingVault,
        local: UnitId,
        peer: UnitId,
        rel: RelationId,
    }

    async fn fixture() -> Fixture {
        let bus = MemoryBus::new();
        let local = UnitId::new("kafka", 0);
        let peer = UnitId::new("zookeeper", 0);
        bus.add_unit(&local, "10.0.0.1", "1.1.1.1").await;
        bus.add_unit(&peer, "10.0.0.2", "2.2.2.2").await;
        let rel = bus.relate("zookeeper", &[local.clone(), peer.clone()]).await;
        Fixture {
            bus,
            vault: RecordingVault::new(),
            local,
            peer,
            rel,
        }
    }

    fn aggregator(f: &Fixture) -> TrustStoreAggregator {
        let base = RelationBase::new(Arc::new(f.bus.unit(&f.local)), "zookeeper");
        TrustStoreAggregator::new(
            base,
            Arc::new(f.vault.clone()),
            StoreOwner::default(),
            TrustState::default(),
        )
    }

    #[tokio::test]
    async fn test_no_certificates_is_noop() {
        let f = fixture().await;
        let mut agg = aggregator(&f);
        assert_eq!(agg.on_certificate_observed().await.unwrap(), TrustOutcome::Disabled);
        assert!(f.vault.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_peer_only_certificate_is_conflict() {
        let f = fixture().await;
        f.bus
            .unit(&f.peer)
            .write(&f.rel, TLS_CERT_KEY, &pem("AAECAwQF"))
            .await
            .unwrap();

        let mut agg = aggregator(&f);
        let err = agg.on_certificate_observed().await.unwrap_err();
        assert!(matches!(err, Error::TlsNotLocallyConfigured { .. }));
        assert_eq!(f.vault.truststore_builds().await, 0);
    }

    #[tokio::test]
    async fn test_set_tls_auth_publishes_and_builds() {
        let f = fixture().await;
        f.bus
            .unit(&f.peer)
            .write(&f.rel, TLS_CERT_KEY, &pem("BgcICQoL"))
            .await
            .unwrap();

        let mut agg = aggregator(&f);
        let outcome = agg
            .set_tls_auth(&pem("AAECAwQF"), "/var/ssl/ts.p12", "tspwd")
            .await
            .unwrap();
        assert_eq!(outcome, TrustOutcome::Rebuilt(2));

        let certs = f.vault.last_truststore().await.unwrap();
        assert_eq!(certs, vec![pem("AAECAwQF"), pem("BgcICQoL")]);
        assert_eq!(agg.state().trusted_certs, certs);

        // Republishing the same chain does not write again.
        let before = f.bus.write_count().await;
        agg.set_tls_auth(&pem("AAECAwQF"), "/var/ssl/ts.p12", "tspwd")
            .await
            .unwrap();
        assert_eq!(f.bus.write_count().await, before);
    }

    #[tokio::test]
    async fn test_duplicate_certificates_counted_once() {
        let f = fixture().await;
        let shared = pem("AAECAwQF");
        f.bus
            .unit(&f.peer)
            .write(&f.rel, TLS_CERT_KEY, &shared)
            .await
            .unwrap();

        let mut agg = aggregator(&f);
        let outcome = agg.set_tls_auth(&shared, "/ts", "pwd").await.unwrap();
        assert_eq!(outcome, TrustOutcome::Rebuilt(1));
    }

    #[tokio::test]
    async fn test_removed_certificate_drops_out() {
        let f = fixture().await;
        f.bus
            .unit(&f.peer)
            .write(&f.rel, TLS_CERT_KEY, &pem("BgcICQoL"))
            .await
            .unwrap();
        let mut agg = aggregator(&f);
        agg.set_tls_auth(&pem("AAECAwQF"), "/ts", "pwd").await.unwrap();

        f.bus.depart(&f.rel, &f.peer).await.unwrap();
        assert_eq!(agg.on_certificate_observed().await.unwrap(), TrustOutcome::Rebuilt(1));
        assert_eq!(f.vault.last_truststore().await.unwrap(), vec![pem("AAECAwQF")]);
    }

    #[tokio::test]
    async fn test_set_tls_auth_without_relation_not_ready() {
        let bus = MemoryBus::new();
        let unit = UnitId::new("kafka", 0);
        bus.add_unit(&unit, "10.0.0.1", "1.1.1.1").await;
        let mut agg = TrustStoreAggregator::new(
            RelationBase::new(Arc::new(bus.unit(&unit)), "zookeeper"),
            Arc::new(RecordingVault::new()),
            StoreOwner::default(),
            TrustState::default(),
        );
        let err = agg.set_tls_auth(&pem("AAECAwQF"), "/ts", "pwd").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_vault_failure_propagates() {
        let f = fixture().await;
        f.vault
            .fail_with(Error::Tool {
                tool: "keytool".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "boom".to_string(),
            })
            .await;
        let mut agg = aggregator(&f);
        let err = agg.set_tls_auth(&pem("AAECAwQF"), "/ts", "pwd").await.unwrap_err();
        assert!(matches!(err, Error::Tool { .. }));
    }
}
