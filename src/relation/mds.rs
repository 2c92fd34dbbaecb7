//! Metadata service (MDS) relation.
//!
//! MDS units publish their REST endpoint as unit-scoped `url`. On top of
//! that, the MDS leader can issue basic-auth credentials to every unit of the
//! related applications. Credentials live in one app-scoped JSON map under
//! `mds-credentials`, keyed by unit name:
//!
//! ```json
//! {"connect/0": {"user": "connect_0", "password": "...",
//!                "auth_mechanism": "JETTY_AUTH", "cred_provider": "BASIC"}}
//! ```
//!
//! Withdrawing credentials publishes an empty map.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::base::RelationBase;
use super::listener::broker_opts::Properties;
use super::resolver::HostnameResolver;
use crate::bus::{RelationId, SharedBus, UnitId};
use crate::constants::{
    DEFAULT_MDS_AUTH_MECHANISM, DEFAULT_MDS_AUTHORIZER, DEFAULT_MDS_CRED_PROVIDER,
    DEFAULT_MDS_PORT, DEFAULT_MDS_PROTOCOL, MDS_CREDENTIALS_KEY, MDS_PASSWORD_LEN, URL_KEY,
};
use crate::error::{Error, Result};
use crate::vault::CredentialVault;

/// Credentials issued to one requirer unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdsCredentials {
    pub user: String,
    pub password: String,
    pub auth_mechanism: String,
    pub cred_provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer: Option<String>,
}

/// Unit name -> credentials.
pub type CredentialMap = IndexMap<String, MdsCredentials>;

fn parse_credentials(raw: &str) -> Result<CredentialMap> {
    if raw.trim().is_empty() {
        return Ok(CredentialMap::new());
    }
    serde_json::from_str(raw).map_err(|e| Error::MalformedPayload {
        key: MDS_CREDENTIALS_KEY.to_string(),
        reason: e.to_string(),
    })
}

/// MDS user name for a unit: `connect/0` becomes `connect_0`.
pub fn mds_user(unit: &UnitId) -> String {
    unit.as_str().replace('/', "_")
}

/// Where the local MDS listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdsEndpoint {
    /// Overrides the hostname resolved from the binding address.
    pub hostname: Option<String>,
    pub port: u16,
    pub protocol: String,
}

impl Default for MdsEndpoint {
    fn default() -> Self {
        Self {
            hostname: None,
            port: DEFAULT_MDS_PORT,
            protocol: DEFAULT_MDS_PROTOCOL.to_string(),
        }
    }
}

/// Broker (MDS) side.
pub struct MdsProvider {
    base: RelationBase,
    vault: Arc<dyn CredentialVault>,
    endpoint: MdsEndpoint,
}

impl MdsProvider {
    pub fn new(
        bus: Arc<dyn SharedBus>,
        vault: Arc<dyn CredentialVault>,
        relation_name: &str,
        endpoint: MdsEndpoint,
    ) -> Self {
        Self {
            base: RelationBase::new(bus, relation_name),
            vault,
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &MdsEndpoint {
        &self.endpoint
    }

    /// `protocol://host:port` of the local unit.
    pub async fn url(&self, hostnames: &dyn HostnameResolver) -> Result<String> {
        let host = match &self.endpoint.hostname {
            Some(h) => h.clone(),
            None => hostnames.hostname(&self.base.binding().await?.bind_address)?,
        };
        Ok(format!("{}://{}:{}", self.endpoint.protocol, host, self.endpoint.port))
    }

    pub async fn on_relation_changed(&self, hostnames: &dyn HostnameResolver) -> Result<usize> {
        let url = self.url(hostnames).await?;
        self.base.send_all(URL_KEY, &url).await
    }

    /// Issue credentials to every remote unit.
    ///
    /// Units that already hold credentials keep their password; units that
    /// left lose theirs. Only the leader writes. Returns the number of
    /// relation instances written to.
    pub async fn set_auth(&self, cred_provider: &str, auth_mechanism: &str) -> Result<usize> {
        if !self.base.is_leader().await? {
            debug!(relation = self.base.name(), "Not the leader, not issuing MDS credentials");
            return Ok(0);
        }
        let own_app = self.base.local_unit().app().to_string();
        let mut writes = 0;
        for relation in self.base.relations().await? {
            let current = self.issued(&relation).await?;
            let mut next = CredentialMap::new();
            for peer in self.base.participants(&relation).await? {
                if peer.unit.app() == own_app {
                    continue;
                }
                let password = match current.get(peer.unit.as_str()) {
                    Some(existing) => existing.password.clone(),
                    None => self.vault.gen_random_password(MDS_PASSWORD_LEN),
                };
                next.insert(
                    peer.unit.to_string(),
                    MdsCredentials {
                        user: mds_user(&peer.unit),
                        password,
                        auth_mechanism: auth_mechanism.to_string(),
                        cred_provider: cred_provider.to_string(),
                        authorizer: None,
                    },
                );
            }
            let raw = serde_json::to_string(&next)?;
            if self.base.send_app(&relation, MDS_CREDENTIALS_KEY, &raw).await? {
                info!(relation = %relation, units = next.len(), "Issued MDS credentials");
                writes += 1;
            }
        }
        Ok(writes)
    }

    /// [`set_auth`](Self::set_auth) with `BASIC` and `JETTY_AUTH`.
    pub async fn set_default_auth(&self) -> Result<usize> {
        self.set_auth(DEFAULT_MDS_CRED_PROVIDER, DEFAULT_MDS_AUTH_MECHANISM)
            .await
    }

    /// Withdraw every issued credential. Leader only.
    pub async fn unset_auth(&self) -> Result<usize> {
        if !self.base.is_leader().await? {
            return Ok(0);
        }
        let mut writes = 0;
        for relation in self.base.relations().await? {
            if self.issued(&relation).await?.is_empty() {
                continue;
            }
            if self.base.send_app(&relation, MDS_CREDENTIALS_KEY, "{}").await? {
                info!(relation = %relation, "Withdrew MDS credentials");
                writes += 1;
            }
        }
        Ok(writes)
    }

    /// Credentials currently published on `relation`.
    pub async fn issued(&self, relation: &RelationId) -> Result<CredentialMap> {
        match self.base.read_own_app(relation, MDS_CREDENTIALS_KEY).await? {
            Some(raw) => parse_credentials(&raw),
            None => Ok(CredentialMap::new()),
        }
    }
}

/// Client side: schema registry, connect, REST proxy and friends.
pub struct MdsRequirer {
    base: RelationBase,
}

impl MdsRequirer {
    pub fn new(bus: Arc<dyn SharedBus>, relation_name: &str) -> Self {
        Self {
            base: RelationBase::new(bus, relation_name),
        }
    }

    /// Credentials issued to the local unit, if any.
    pub async fn credentials(&self) -> Result<Option<MdsCredentials>> {
        let me = self.base.local_unit().as_str().to_string();
        for relation in self.base.require_relations().await? {
            let mut seen: Vec<String> = Vec::new();
            for peer in self.base.participants(&relation).await? {
                let app = peer.unit.app().to_string();
                if seen.contains(&app) {
                    continue;
                }
                if let Some(raw) = self.base.read_app(&relation, &app, MDS_CREDENTIALS_KEY).await? {
                    if let Some(creds) = parse_credentials(&raw)?.shift_remove(&me) {
                        return Ok(Some(creds));
                    }
                }
                seen.push(app);
            }
        }
        Ok(None)
    }

    pub async fn is_auth_set(&self) -> Result<bool> {
        Ok(self.credentials().await?.is_some())
    }

    pub async fn mds_user(&self) -> Result<Option<String>> {
        Ok(self.credentials().await?.map(|c| c.user))
    }

    pub async fn mds_password(&self) -> Result<Option<String>> {
        Ok(self.credentials().await?.map(|c| c.password))
    }

    pub async fn auth_mechanism(&self) -> Result<String> {
        Ok(self
            .credentials()
            .await?
            .map(|c| c.auth_mechanism)
            .unwrap_or_else(|| DEFAULT_MDS_AUTH_MECHANISM.to_string()))
    }

    pub async fn cred_provider(&self) -> Result<String> {
        Ok(self
            .credentials()
            .await?
            .map(|c| c.cred_provider)
            .unwrap_or_else(|| DEFAULT_MDS_CRED_PROVIDER.to_string()))
    }

    pub async fn authorizer(&self) -> Result<String> {
        Ok(self
            .credentials()
            .await?
            .and_then(|c| c.authorizer)
            .unwrap_or_else(|| DEFAULT_MDS_AUTHORIZER.to_string()))
    }

    /// Comma separated URLs of every MDS unit.
    pub async fn server_list(&self) -> Result<String> {
        let mut urls: Vec<String> = Vec::new();
        for relation in self.base.require_relations().await? {
            for peer in self.base.participants(&relation).await? {
                if let Some(url) = self.base.read(&relation, &peer.unit, URL_KEY).await? {
                    if !url.is_empty() && !urls.contains(&url) {
                        urls.push(url);
                    }
                }
            }
        }
        Ok(urls.join(","))
    }

    /// `confluent.metadata.*` and `confluent.schema.registry.*` properties.
    pub async fn options(&self) -> Result<Properties> {
        let creds = self.credentials().await?;
        let mut props = Properties::new();
        props.insert(
            "confluent.metadata.bootstrap.server.urls".to_string(),
            self.server_list().await?,
        );
        if let Some(c) = &creds {
            props.insert(
                "confluent.metadata.basic.auth.user.info".to_string(),
                format!("{}:{}", c.user, c.password),
            );
        }
        let (provider, mechanism, authorizer) = match creds {
            Some(c) => (
                c.cred_provider,
                c.auth_mechanism,
                c.authorizer.unwrap_or_else(|| DEFAULT_MDS_AUTHORIZER.to_string()),
            ),
            None => (
                DEFAULT_MDS_CRED_PROVIDER.to_string(),
                DEFAULT_MDS_AUTH_MECHANISM.to_string(),
                DEFAULT_MDS_AUTHORIZER.to_string(),
            ),
        };
        props.insert(
            "confluent.metadata.http.auth.credentials.provider".to_string(),
            provider,
        );
        props.insert(
            "confluent.schema.registry.auth.mechanism".to_string(),
            mechanism,
        );
        props.insert(
            "confluent.schema.registry.authorizer.class".to_string(),
            authorizer,
        );
        Ok(props)
    }
}
