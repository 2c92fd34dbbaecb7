//! Relation components.
//!
//! Each component owns a [`RelationBase`](base::RelationBase) for one relation
//! name and keeps its persisted state in a plain serde struct that the
//! runtime adapter stores between events.

pub mod app_url;
pub mod base;
pub mod listener;
pub mod mds;
pub mod resolver;
pub mod truststore;
pub mod zookeeper;

pub use app_url::AppUrlRelation;
pub use base::RelationBase;
pub use mds::{MdsCredentials, MdsEndpoint, MdsProvider, MdsRequirer};
pub use resolver::{Addresses, HostnameResolver, StaticHostnames, SystemHostnames};
pub use truststore::{TrustOutcome, TrustState, TrustStoreAggregator, TrustedCertificates};
pub use zookeeper::{ZookeeperRelation, ZookeeperRole, ZookeeperState};
