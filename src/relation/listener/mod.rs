//! Listener negotiation between a broker application and its clients.
//!
//! # Protocol
//!
//! ```text
//! requirer leader          provider leader             every provider unit
//! ---------------          ---------------             -------------------
//! request ----------->     collect requests
//!                          allocate()
//!                          listener-template (app) --> resolve placeholders
//!                                                      bootstrap-data (unit)
//! bootstrap_servers() <-------------------------------------------+
//! ```
//!
//! Requirers ([`ListenerRequirer`]) publish a [`ListenerRequest`]. The
//! provider leader ([`ListenerProvider`]) turns every visible request into a
//! [`ListenerAllocation`] with `*BINDING*`/`*ADVERTISE*` placeholders. Each
//! provider unit resolves the placeholders with its own hostnames and
//! publishes the result. All writes are idempotent, so replays and
//! out-of-order notifications converge to the same published state.

pub mod allocation;
pub mod broker_opts;
pub mod client;
pub mod provider;
pub mod request;
pub mod types;

pub use allocation::{
    AllocationParams, DefaultPasswords, PeerRequest, ProviderState, allocate, listener_name,
};
pub use broker_opts::{Properties, generate_opts};
pub use client::{ClientSecurity, client_properties};
pub use provider::{AllocationOutcome, ListenerProvider, ProviderSettings};
pub use request::{ListenerRequirer, RequirerState};
pub use types::{
    ConfluentCallbacks, ListenerAllocation, ListenerDescriptor, ListenerRequest, SaslMechanism,
    SecurityProtocol, StoreRef, StoreRefs,
};
