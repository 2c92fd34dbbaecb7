//! Provider (broker) side of the listener relation.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::allocation::{AllocationParams, PeerRequest, ProviderState, allocate};
use super::broker_opts::{Properties, generate_opts};
use super::types::{ListenerAllocation, ListenerRequest, StoreRefs};
use crate::bus::SharedBus;
use crate::config::NegotiationConfig;
use crate::constants::{
    BROKER_LISTENER, CLIENT_AUTH_KEY, DEFAULT_BASE_PORT, EXTERNAL_LISTENER, INTERNAL_LISTENER,
    LISTENER_PASSWORD_LEN, LISTENER_TEMPLATE_KEY, REQUEST_KEY,
};
use crate::error::{Error, Result};
use crate::relation::base::RelationBase;
use crate::relation::resolver::{self, HostnameResolver, local_addresses};
use crate::relation::truststore::{TrustOutcome, TrustState, TrustStoreAggregator};
use crate::vault::{CredentialVault, StoreOwner};

const DEFAULT_LISTENER_NAMES: [&str; 3] = [INTERNAL_LISTENER, EXTERNAL_LISTENER, BROKER_LISTENER];

/// Provider knobs that do not come from the relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub base_port: u16,
    pub default_listeners: bool,
    /// Require mutual TLS from clients.
    pub clientauth: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            default_listeners: true,
            clientauth: false,
        }
    }
}

impl From<&NegotiationConfig> for ProviderSettings {
    fn from(config: &NegotiationConfig) -> Self {
        Self {
            base_port: config.base_port,
            default_listeners: config.default_listeners,
            clientauth: config.tls_client_auth,
        }
    }
}

/// Result of an allocation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    /// This unit does not lead its application; nothing was written.
    NotLeader,
    Allocated {
        /// Allocation including store passwords, for local use.
        allocation: ListenerAllocation,
        /// Published placeholder template, passwords stripped.
        template: String,
    },
}

/// Broker side of the listener negotiation.
pub struct ListenerProvider {
    base: RelationBase,
    settings: ProviderSettings,
    state: ProviderState,
    trust: TrustStoreAggregator,
}

impl ListenerProvider {
    /// Missing default-listener passwords are generated through `vault` and
    /// kept in the state from then on.
    pub fn new(
        bus: Arc<dyn SharedBus>,
        vault: Arc<dyn CredentialVault>,
        relation_name: &str,
        settings: ProviderSettings,
        owner: StoreOwner,
        mut state: ProviderState,
        trust_state: TrustState,
    ) -> Self {
        for pwd in [
            &mut state.passwords.internal,
            &mut state.passwords.external,
            &mut state.passwords.broker,
        ] {
            if pwd.is_empty() {
                *pwd = vault.gen_random_password(LISTENER_PASSWORD_LEN);
            }
        }
        let base = RelationBase::new(bus, relation_name);
        let trust = TrustStoreAggregator::new(base.clone(), vault, owner, trust_state);
        Self {
            base,
            settings,
            state,
            trust,
        }
    }

    pub fn state(&self) -> &ProviderState {
        &self.state
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn trust(&self) -> &TrustStoreAggregator {
        &self.trust
    }

    /// Non-empty requests of every remote application leader, in relation then
    /// unit order. Requests of non-leader units are ignored, and so are
    /// requests that do not parse.
    pub async fn collect_requests(&self) -> Result<Vec<PeerRequest>> {
        let mut requests = Vec::new();
        for relation in self.base.relations().await? {
            for peer in self.base.participants(&relation).await? {
                if !peer.is_leader {
                    continue;
                }
                let Some(raw) = self.base.read(&relation, &peer.unit, REQUEST_KEY).await? else {
                    continue;
                };
                let request = match ListenerRequest::from_json(&raw) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(
                            relation = %relation,
                            unit = %peer.unit,
                            error = %e,
                            "Ignoring unreadable listener request"
                        );
                        continue;
                    }
                };
                if request.is_empty() {
                    continue;
                }
                requests.push(PeerRequest::new(peer.unit.app(), request));
            }
        }
        Ok(requests)
    }

    /// Allocate listeners and publish the placeholder template.
    ///
    /// Only the leader allocates. Any other unit gets
    /// [`AllocationOutcome::NotLeader`] and performs no write.
    pub async fn allocate(&mut self, stores: &StoreRefs) -> Result<AllocationOutcome> {
        if !self.base.is_leader().await? {
            debug!(relation = self.base.name(), "Not the leader, skipping allocation");
            return Ok(AllocationOutcome::NotLeader);
        }

        self.adopt_published_ports().await?;
        let requests = self.collect_requests().await?;
        let params = AllocationParams {
            base_port: self.settings.base_port,
            default_listeners: self.settings.default_listeners,
            stores,
            clientauth: self.settings.clientauth,
        };
        let (allocation, next_state) = allocate(&params, &requests, &self.state)?;
        if next_state.ports != self.state.ports {
            info!(
                relation = self.base.name(),
                listeners = allocation.len(),
                requesters = next_state.ports.len(),
                "Listener allocation changed"
            );
        }
        self.state = next_state;

        let template = allocation.without_secrets().to_json()?;
        for relation in self.base.relations().await? {
            self.base
                .send_app(&relation, LISTENER_TEMPLATE_KEY, &template)
                .await?;
        }
        Ok(AllocationOutcome::Allocated {
            allocation,
            template,
        })
    }

    /// Merge the ports of the last published template into the local state.
    ///
    /// The template is written by whichever unit led before, so it wins over
    /// what this unit remembers from its own earlier term.
    async fn adopt_published_ports(&mut self) -> Result<()> {
        let raw = match self.template().await {
            Ok(raw) => raw,
            // Nothing published yet: first allocation.
            Err(Error::NotReady(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let published = ListenerAllocation::from_json(LISTENER_TEMPLATE_KEY, &raw)?;
        for (name, descriptor) in published.iter() {
            if DEFAULT_LISTENER_NAMES.contains(&name.as_str()) {
                continue;
            }
            self.state.ports.insert(name.clone(), descriptor.port);
        }
        Ok(())
    }

    /// The template published by this application's leader.
    pub async fn template(&self) -> Result<String> {
        for relation in self.base.relations().await? {
            if let Some(template) = self
                .base
                .read_own_app(&relation, LISTENER_TEMPLATE_KEY)
                .await?
                .filter(|t| !t.is_empty())
            {
                return Ok(template);
            }
        }
        Err(Error::not_ready(LISTENER_TEMPLATE_KEY))
    }

    /// Resolve `template` for this unit and publish it as `bootstrap-data`,
    /// along with the client-auth flag.
    pub async fn publish_bootstrap_data(
        &self,
        template: &str,
        hostnames: &dyn HostnameResolver,
    ) -> Result<ListenerAllocation> {
        let addresses = local_addresses(&self.base, hostnames).await?;
        let resolved = resolver::publish_bootstrap_data(&self.base, template, &addresses).await?;
        let flag = if self.settings.clientauth { "true" } else { "false" };
        self.base.send_all(CLIENT_AUTH_KEY, flag).await?;
        Ok(resolved)
    }

    /// Broker properties for this unit.
    pub async fn broker_opts(
        &self,
        template: &str,
        hostnames: &dyn HostnameResolver,
        stores: &StoreRefs,
    ) -> Result<Properties> {
        let addresses = local_addresses(&self.base, hostnames).await?;
        let resolved = resolver::resolve(template, &addresses)?;
        generate_opts(&resolved, stores, self.settings.clientauth)
    }

    /// Full reaction to a relation change: allocate (leader), resolve and
    /// publish this unit's bootstrap data, then refresh the trust store.
    pub async fn on_relation_changed(
        &mut self,
        stores: &StoreRefs,
        hostnames: &dyn HostnameResolver,
    ) -> Result<(ListenerAllocation, TrustOutcome)> {
        let template = match self.allocate(stores).await? {
            AllocationOutcome::Allocated { template, .. } => template,
            AllocationOutcome::NotLeader => self.template().await?,
        };
        let resolved = self.publish_bootstrap_data(&template, hostnames).await?;
        let trust = self.trust.on_certificate_observed().await?;
        Ok((resolved, trust))
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
