//! Shared relation data bus.
//!
//! The orchestration runtime gives every participant of a relation a private
//! key-value namespace that only it may write and every other participant may
//! read. This module abstracts that primitive behind [`SharedBus`] so the
//! negotiation components can run against the real runtime adapter, or the
//! in-memory [`MemoryBus`] in tests.
//!
//! # Delivery Semantics
//!
//! - Writes are visible to other participants eventually, not immediately
//! - Every write produces a "changed" notification for the other participants
//! - Notifications are at-least-once and unordered
//! - There are no transactions across namespaces
//!
//! Components therefore recompute their output from the full visible state on
//! every event and only write when the value actually changes (see
//! [`crate::relation::base::RelationBase`]).

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[cfg(any(test, feature = "test-utilities"))]
pub mod memory;

#[cfg(any(test, feature = "test-utilities"))]
pub use memory::{BusEvent, MemoryBus, UnitBus, WriteRecord};

/// Identity of a deployed unit, `"<application>/<number>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(app: &str, number: u32) -> Self {
        Self(format!("{}/{}", app, number))
    }

    /// Parse a unit name such as `kafka-broker/0`.
    pub fn parse(name: &str) -> Result<Self> {
        match name.rsplit_once('/') {
            Some((app, n)) if !app.is_empty() && n.parse::<u32>().is_ok() => {
                Ok(Self(name.to_string()))
            }
            _ => Err(Error::Config(format!("invalid unit name '{}'", name))),
        }
    }

    /// Name of the application this unit belongs to.
    pub fn app(&self) -> &str {
        self.0.rsplit_once('/').map(|(app, _)| app).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One instance of a named relation.
///
/// A charm may hold several instances of the same relation name, one per
/// related application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationId {
    pub name: String,
    pub id: u32,
}

impl RelationId {
    pub fn new(name: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.id)
    }
}

/// A participant seen from the local unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUnit {
    pub unit: UnitId,
    /// Whether this unit currently leads its application.
    pub is_leader: bool,
}

/// Addresses of the local unit on the network space bound to a relation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkBinding {
    /// Address services listen on (private).
    pub bind_address: String,
    /// Address clients reach the unit on (public / ingress).
    pub ingress_address: String,
}

/// Relation data primitive provided by the orchestration runtime.
///
/// All writes go to the local unit's own namespace (or, for the leader, its
/// application's namespace). Implementations must not deduplicate writes;
/// that is the job of the callers.
#[async_trait]
pub trait SharedBus: Send + Sync {
    /// The unit this handle acts as.
    fn local_unit(&self) -> &UnitId;

    /// Whether the local unit is the leader of its application.
    async fn is_leader(&self) -> Result<bool>;

    /// Every live instance of `name` the local unit participates in, in the
    /// runtime's iteration order.
    async fn relations(&self, name: &str) -> Result<Vec<RelationId>>;

    /// Participants of `relation` other than the local unit, in the runtime's
    /// iteration order.
    async fn participants(&self, relation: &RelationId) -> Result<Vec<RemoteUnit>>;

    /// Read a key from a unit's namespace.
    async fn read(&self, relation: &RelationId, unit: &UnitId, key: &str)
    -> Result<Option<String>>;

    /// Read a key from an application's namespace.
    async fn read_app(&self, relation: &RelationId, app: &str, key: &str)
    -> Result<Option<String>>;

    /// Write a key into the local unit's namespace.
    async fn write(&self, relation: &RelationId, key: &str, value: &str) -> Result<()>;

    /// Write a key into the local application's namespace. Leader only.
    async fn write_app(&self, relation: &RelationId, key: &str, value: &str) -> Result<()>;

    /// Network addresses of the local unit for the space bound to `relation_name`.
    async fn binding(&self, relation_name: &str) -> Result<NetworkBinding>;
}
