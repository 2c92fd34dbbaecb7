//! Listener allocation.
//!
//! [`allocate`] is a pure function from the visible requests and the
//! provider's persisted [`ProviderState`] to a placeholder
//! [`ListenerAllocation`] and the next state. The leader runs it on every
//! change; followers never do.
//!
//! # Port Assignment
//!
//! ```text
//!  base        base+1      base+2      base+3 ...
//! +-----------+-----------+-----------+-----------------------+
//! | internal  | external  | broker    | requesters            |
//! +-----------+-----------+-----------+-----------------------+
//!  (only when default listeners are enabled; otherwise
//!   requesters start at base)
//! ```
//!
//! A requester keeps the port recorded for its listener name in
//! [`ProviderState`] as long as that port is still free. Requesters seen for
//! the first time take the lowest free port, in relation then unit iteration
//! order. Requesters that disappeared release their port, so adding or
//! removing one application never renumbers the others.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::types::{
    ListenerAllocation, ListenerDescriptor, ListenerRequest, SecurityProtocol, StoreRefs,
};
use crate::constants::{
    ADVERTISE_PLACEHOLDER, BINDING_PLACEHOLDER, BROKER_LISTENER, DEFAULT_LISTENER_COUNT,
    EXTERNAL_LISTENER, INTERNAL_LISTENER,
};
use crate::error::{Error, Result};

/// A non-empty request read from a remote application's leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRequest {
    pub app: String,
    pub request: ListenerRequest,
}

impl PeerRequest {
    pub fn new(app: impl Into<String>, request: ListenerRequest) -> Self {
        Self {
            app: app.into(),
            request,
        }
    }

    /// Listener name derived from the application name.
    pub fn listener_name(&self) -> String {
        listener_name(&self.app)
    }
}

/// Listener name for an application: `-` becomes `_`.
pub fn listener_name(app: &str) -> String {
    app.replace('-', "_")
}

/// Locally cached passwords of the default listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultPasswords {
    pub internal: String,
    pub external: String,
    pub broker: String,
}

/// Persisted provider state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderState {
    /// Listener name -> port assigned by the last allocation.
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
    #[serde(default)]
    pub passwords: DefaultPasswords,
}

/// Inputs that do not come from the relation.
#[derive(Debug, Clone)]
pub struct AllocationParams<'a> {
    pub base_port: u16,
    pub default_listeners: bool,
    pub stores: &'a StoreRefs,
    pub clientauth: bool,
}

/// Compute the placeholder allocation.
///
/// Requests must already be filtered to non-empty requests of remote leaders
/// and be in relation then unit iteration order. Later requests for a
/// listener name already taken are ignored.
pub fn allocate(
    params: &AllocationParams<'_>,
    requests: &[PeerRequest],
    state: &ProviderState,
) -> Result<(ListenerAllocation, ProviderState)> {
    let mut allocation = ListenerAllocation::new();
    let mut next_state = ProviderState {
        ports: BTreeMap::new(),
        passwords: state.passwords.clone(),
    };
    let mut taken = BTreeSet::new();

    let first_requester_port = if params.default_listeners {
        for (offset, (name, prefix, addr, is_public, pwd)) in [
            (INTERNAL_LISTENER, "INTERNAL", BINDING_PLACEHOLDER, false, &state.passwords.internal),
            (EXTERNAL_LISTENER, "EXTERNAL", ADVERTISE_PLACEHOLDER, true, &state.passwords.external),
            (BROKER_LISTENER, "BROKER", BINDING_PLACEHOLDER, false, &state.passwords.broker),
        ]
        .into_iter()
        .enumerate()
        {
            let port = offset_port(params.base_port, offset as u16)?;
            taken.insert(port);
            allocation.insert(
                name,
                default_descriptor(params, prefix, addr, port, is_public, pwd),
            );
        }
        offset_port(params.base_port, DEFAULT_LISTENER_COUNT)?
    } else {
        params.base_port
    };

    let mut requesters: Vec<(String, &ListenerRequest)> = Vec::new();
    for peer in requests {
        if peer.request.is_empty() {
            continue;
        }
        let name = peer.listener_name();
        if allocation.contains(&name) || requesters.iter().any(|(n, _)| *n == name) {
            warn!(listener = %name, app = %peer.app, "Listener name already allocated, ignoring request");
            continue;
        }
        requesters.push((name, &peer.request));
    }

    // Previously assigned ports first, so newcomers cannot steal them.
    let mut ports: Vec<Option<u16>> = requesters
        .iter()
        .map(|(name, _)| {
            state
                .ports
                .get(name)
                .copied()
                .filter(|p| *p >= first_requester_port && taken.insert(*p))
        })
        .collect();

    let mut candidate = first_requester_port;
    for port in ports.iter_mut().filter(|p| p.is_none()) {
        while taken.contains(&candidate) {
            candidate = candidate
                .checked_add(1)
                .ok_or_else(|| Error::Config("listener port range exhausted".to_string()))?;
        }
        taken.insert(candidate);
        *port = Some(candidate);
    }

    for ((name, request), port) in requesters.into_iter().zip(ports) {
        let port = port.ok_or_else(|| Error::Config("listener port range exhausted".to_string()))?;
        next_state.ports.insert(name.clone(), port);
        let descriptor = requester_descriptor(params, &name, request, port);
        allocation.insert(name, descriptor);
    }

    Ok((allocation, next_state))
}

fn offset_port(base: u16, offset: u16) -> Result<u16> {
    base.checked_add(offset)
        .ok_or_else(|| Error::Config(format!("base port {} leaves no room for listeners", base)))
}

fn default_descriptor(
    params: &AllocationParams<'_>,
    prefix: &str,
    addr: &str,
    port: u16,
    is_public: bool,
    plaintext_pwd: &str,
) -> ListenerDescriptor {
    let listener = format!("{}://{}:{}", prefix, addr, port);
    ListenerDescriptor {
        endpoint: listener.clone(),
        advertise: listener,
        bootstrap_server: format!("{}:{}", addr, port),
        port,
        is_public,
        secprot: if params.stores.keystore.is_set() {
            SecurityProtocol::Ssl
        } else {
            SecurityProtocol::Plaintext
        },
        sasl: None,
        plaintext_pwd: plaintext_pwd.to_string(),
        cert_present: params.stores.keystore.is_set(),
        sasl_present: false,
        ts_path: params.stores.truststore.path.clone(),
        ts_pwd: Some(params.stores.truststore.password.clone()),
        ks_path: params.stores.keystore.path.clone(),
        ks_pwd: Some(params.stores.keystore.password.clone()),
        clientauth: params.clientauth,
    }
}

fn requester_descriptor(
    params: &AllocationParams<'_>,
    name: &str,
    request: &ListenerRequest,
    port: u16,
) -> ListenerDescriptor {
    let is_public = request.is_public.unwrap_or(false);
    let addr = if is_public {
        ADVERTISE_PLACEHOLDER
    } else {
        BINDING_PLACEHOLDER
    };
    let listener = format!("{}://{}:{}", name, addr, port);
    let secprot = request.effective_secprot();
    ListenerDescriptor {
        endpoint: listener.clone(),
        advertise: listener,
        bootstrap_server: format!("{}:{}", addr, port),
        port,
        is_public,
        secprot,
        sasl: request.sasl.clone(),
        plaintext_pwd: request.plaintext_pwd.clone().unwrap_or_default(),
        cert_present: request.cert_present(),
        sasl_present: secprot.uses_sasl(),
        ts_path: params.stores.truststore.path.clone(),
        ts_pwd: Some(params.stores.truststore.password.clone()),
        ks_path: params.stores.keystore.path.clone(),
        ks_pwd: Some(params.stores.keystore.password.clone()),
        clientauth: params.clientauth,
    }
}
