//! Requirer side of the listener relation.
//!
//! A client application describes the listener it needs through the setters
//! on [`ListenerRequirer`]. Each setter is a no-op when the value is already
//! stored, otherwise the whole request is republished under `request` on
//! every instance of the relation. The provider answers with per-unit
//! `bootstrap-data`, from which [`ListenerRequirer::bootstrap_servers`] and
//! [`ListenerRequirer::client_properties`] are derived.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::allocation::listener_name;
use super::broker_opts::Properties;
use super::client::{ClientSecurity, client_properties};
use super::types::{ListenerAllocation, ListenerDescriptor, ListenerRequest, SaslMechanism, SecurityProtocol};
use crate::bus::SharedBus;
use crate::constants::{BOOTSTRAP_DATA_KEY, CLIENT_AUTH_KEY, REQUEST_KEY};
use crate::error::{Error, Result};
use crate::relation::base::RelationBase;
use crate::relation::truststore::{TrustOutcome, TrustState, TrustStoreAggregator};
use crate::vault::{CredentialVault, StoreOwner};

/// Persisted requirer state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirerState {
    #[serde(default)]
    pub request: ListenerRequest,
}

/// Client side of the listener negotiation.
pub struct ListenerRequirer {
    base: RelationBase,
    state: RequirerState,
    trust: TrustStoreAggregator,
}

impl ListenerRequirer {
    pub fn new(
        bus: Arc<dyn SharedBus>,
        vault: Arc<dyn CredentialVault>,
        relation_name: &str,
        owner: StoreOwner,
        state: RequirerState,
        trust_state: TrustState,
    ) -> Self {
        let base = RelationBase::new(bus, relation_name);
        let trust = TrustStoreAggregator::new(base.clone(), vault, owner, trust_state);
        Self { base, state, trust }
    }

    pub fn state(&self) -> &RequirerState {
        &self.state
    }

    pub fn trust(&self) -> &TrustStoreAggregator {
        &self.trust
    }

    pub fn request(&self) -> &ListenerRequest {
        &self.state.request
    }

    /// Name of the listener the provider allocates for this application.
    pub fn listener_name(&self) -> String {
        listener_name(self.base.local_unit().app())
    }

    pub async fn set_plaintext_password(&mut self, pwd: &str) -> Result<bool> {
        if self.state.request.plaintext_pwd.as_deref() == Some(pwd) {
            debug!("plaintext_pwd unchanged");
            return Ok(false);
        }
        self.state.request.plaintext_pwd = Some(pwd.to_string());
        self.publish().await?;
        Ok(true)
    }

    pub async fn set_sasl(&mut self, sasl: Option<SaslMechanism>) -> Result<bool> {
        if self.state.request.sasl == sasl {
            debug!("SASL unchanged");
            return Ok(false);
        }
        self.state.request.sasl = sasl;
        self.publish().await?;
        Ok(true)
    }

    pub async fn set_is_public(&mut self, is_public: bool) -> Result<bool> {
        if self.state.request.is_public == Some(is_public) {
            debug!("is_public unchanged");
            return Ok(false);
        }
        self.state.request.is_public = Some(is_public);
        self.publish().await?;
        Ok(true)
    }

    pub async fn set_security_protocol(&mut self, secprot: SecurityProtocol) -> Result<bool> {
        if self.state.request.secprot == Some(secprot) {
            debug!("secprot unchanged");
            return Ok(false);
        }
        self.state.request.secprot = Some(secprot);
        self.publish().await?;
        Ok(true)
    }

    pub async fn set_tls_cert(&mut self, cert_chain: &str) -> Result<bool> {
        if self.state.request.cert.as_deref() == Some(cert_chain) {
            debug!("cert unchanged");
            return Ok(false);
        }
        self.state.request.cert = Some(cert_chain.to_string());
        self.publish().await?;
        Ok(true)
    }

    /// Publish the current request on every relation instance where it
    /// differs from what is stored. Returns the number of writes.
    ///
    /// Providers only read the request of the application leader, so other
    /// units keep it locally and write nothing.
    pub async fn publish(&self) -> Result<usize> {
        let published = self.state.request.to_published();
        if published.is_empty() {
            return Ok(0);
        }
        if !self.base.is_leader().await? {
            debug!(relation = self.base.name(), "Not the leader, request kept locally");
            return Ok(0);
        }
        self.base.send_all(REQUEST_KEY, &published.to_json()?).await
    }

    /// Comma separated bootstrap servers of every provider unit.
    pub async fn bootstrap_servers(&self) -> Result<String> {
        let entries = self.entries().await?;
        Ok(entries
            .iter()
            .map(|e| e.bootstrap_server.as_str())
            .collect::<Vec<_>>()
            .join(","))
    }

    /// This application's entry in the first provider unit's bootstrap data.
    pub async fn entry(&self) -> Result<ListenerDescriptor> {
        self.entries()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_ready(BOOTSTRAP_DATA_KEY))
    }

    async fn entries(&self) -> Result<Vec<ListenerDescriptor>> {
        let name = self.listener_name();
        let mut entries = Vec::new();
        for relation in self.base.require_relations().await? {
            for peer in self.base.participants(&relation).await? {
                let Some(raw) = self.base.read(&relation, &peer.unit, BOOTSTRAP_DATA_KEY).await?
                else {
                    continue;
                };
                let data = ListenerAllocation::from_json(BOOTSTRAP_DATA_KEY, &raw)?;
                let entry = data.get(&name).cloned().ok_or_else(|| {
                    Error::not_ready(format!("listener {} not in bootstrap data of {}", name, peer.unit))
                })?;
                entries.push(entry);
            }
        }
        if entries.is_empty() {
            return Err(Error::not_ready(format!(
                "no bootstrap data on relation {}",
                self.base.name()
            )));
        }
        Ok(entries)
    }

    /// Whether a provider asks clients for mutual TLS.
    pub async fn is_tls_client_auth_required(&self) -> Result<bool> {
        for relation in self.base.relations().await? {
            for peer in self.base.participants(&relation).await? {
                if let Some(flag) = self.base.read(&relation, &peer.unit, CLIENT_AUTH_KEY).await? {
                    return Ok(flag.eq_ignore_ascii_case("true"));
                }
            }
        }
        Ok(false)
    }

    /// Kafka client properties for this application's listener.
    pub async fn client_properties(&self, security: &ClientSecurity) -> Result<Properties> {
        let servers = self.bootstrap_servers().await?;
        let entry = self.entry().await?;
        Ok(client_properties(&servers, &entry, security))
    }

    /// Publish the certificate in the request and as `tls_cert`, then rebuild
    /// the trust store.
    pub async fn set_tls_auth(
        &mut self,
        cert_chain: &str,
        ts_path: &str,
        ts_pwd: &str,
    ) -> Result<TrustOutcome> {
        self.set_tls_cert(cert_chain).await?;
        self.trust.set_tls_auth(cert_chain, ts_path, ts_pwd).await
    }

    pub async fn on_relation_joined(&mut self) -> Result<TrustOutcome> {
        self.publish().await?;
        self.trust.on_certificate_observed().await
    }

    pub async fn on_relation_changed(&mut self) -> Result<TrustOutcome> {
        self.on_relation_joined().await
    }
}
