//! # kafka-relations
//! Listener, certificate and credential negotiation between the units of a
//! Kafka platform deployment.
//!
//! Brokers, Zookeeper, Connect, Schema Registry, REST proxy and friends run as
//! independent units. They agree on listeners, ports, security protocols, SASL
//! mechanisms and trusted certificates by exchanging small values through a
//! shared relation data bus, where every participant owns a private namespace
//! that the others can read.
//!
//! ## Components
//! - [`relation::listener::ListenerRequirer`]: a client application publishes
//!   the listener it needs and reads back its bootstrap servers.
//! - [`relation::listener::ListenerProvider`]: the broker leader allocates one
//!   listener per requesting application, and every broker unit resolves the
//!   allocation against its own hostnames.
//! - [`relation::TrustStoreAggregator`]: every unit publishes its certificate
//!   and rebuilds its trust store from what its peers publish.
//! - [`relation::ZookeeperRelation`] and [`relation::AppUrlRelation`]:
//!   Zookeeper endpoints and service URLs.
//! - [`relation::MdsProvider`] and [`relation::MdsRequirer`]: metadata
//!   service endpoints and the basic-auth credentials its leader issues.
//!
//! The bus is abstracted by [`bus::SharedBus`]; certificate tooling by
//! [`vault::CredentialVault`]. Both have in-memory test doubles behind the
//! `test-utilities` feature.
//!
//! ## Event handling
//! Every component recomputes its output from the full visible state and only
//! writes values that changed. Errors carry a [`error::Disposition`] telling
//! the caller whether to defer the event, block with a status message, or fail.

#![forbid(unsafe_code)]

pub mod bus;
pub mod config;
pub mod constants;
pub mod error;
pub mod relation;
pub mod telemetry;
pub mod vault;

pub use error::{Disposition, Error, ErrorClass, Result};

pub mod prelude {
    //! Commonly used types.
    pub use crate::bus::{RelationId, SharedBus, UnitId};
    pub use crate::config::NegotiationConfig;
    pub use crate::error::{Disposition, Error, Result};
    pub use crate::relation::listener::{
        ListenerAllocation, ListenerDescriptor, ListenerProvider, ListenerRequest,
        ListenerRequirer, SaslMechanism, SecurityProtocol, StoreRef, StoreRefs,
    };
    pub use crate::relation::{
        AppUrlRelation, HostnameResolver, MdsProvider, MdsRequirer, TrustOutcome,
        ZookeeperRelation, ZookeeperRole,
    };
    pub use crate::vault::{CredentialVault, KeytoolVault, StoreOwner};
}
