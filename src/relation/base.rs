//! Shared plumbing for every relation component.
//!
//! [`RelationBase`] wraps a [`SharedBus`] handle and a relation name. All
//! writes go through [`RelationBase::send`] or [`RelationBase::send_app`],
//! which compare against the value already stored and skip identical writes.
//! Every write on the bus wakes up all other participants, so writing an
//! unchanged value would start a republish loop between the two sides.

use std::sync::Arc;

use tracing::{debug, info};

use crate::bus::{NetworkBinding, RelationId, RemoteUnit, SharedBus, UnitId};
use crate::error::{Error, Result};

/// A named relation seen from the local unit.
#[derive(Clone)]
pub struct RelationBase {
    bus: Arc<dyn SharedBus>,
    name: String,
}

impl std::fmt::Debug for RelationBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationBase")
            .field("name", &self.name)
            .field("unit", self.bus.local_unit())
            .finish()
    }
}

impl RelationBase {
    pub fn new(bus: Arc<dyn SharedBus>, name: impl Into<String>) -> Self {
        Self {
            bus,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<dyn SharedBus> {
        &self.bus
    }

    pub fn local_unit(&self) -> &UnitId {
        self.bus.local_unit()
    }

    pub async fn is_leader(&self) -> Result<bool> {
        self.bus.is_leader().await
    }

    /// Every live instance of this relation. May be empty.
    pub async fn relations(&self) -> Result<Vec<RelationId>> {
        self.bus.relations(&self.name).await
    }

    /// Every live instance of this relation, or [`Error::NotReady`] if the
    /// relation has not been established yet.
    pub async fn require_relations(&self) -> Result<Vec<RelationId>> {
        let relations = self.relations().await?;
        if relations.is_empty() {
            return Err(Error::not_ready(format!(
                "relation {} has no connections yet",
                self.name
            )));
        }
        Ok(relations)
    }

    pub async fn participants(&self, relation: &RelationId) -> Result<Vec<RemoteUnit>> {
        self.bus.participants(relation).await
    }

    /// Network addresses of the local unit on this relation's space.
    pub async fn binding(&self) -> Result<NetworkBinding> {
        self.bus.binding(&self.name).await
    }

    /// Read a key from the local unit's own namespace.
    pub async fn read_own(&self, relation: &RelationId, key: &str) -> Result<Option<String>> {
        self.bus.read(relation, self.bus.local_unit(), key).await
    }

    pub async fn read(
        &self,
        relation: &RelationId,
        unit: &UnitId,
        key: &str,
    ) -> Result<Option<String>> {
        self.bus.read(relation, unit, key).await
    }

    /// Write `value` under `key` unless it is already stored.
    ///
    /// Returns whether a write happened.
    pub async fn send(&self, relation: &RelationId, key: &str, value: &str) -> Result<bool> {
        if self.read_own(relation, key).await?.as_deref() == Some(value) {
            debug!(relation = %relation, key, "Value unchanged, skipping write");
            return Ok(false);
        }
        self.bus.write(relation, key, value).await?;
        info!(relation = %relation, key, "Published relation data");
        Ok(true)
    }

    /// [`send`](Self::send) on every instance of this relation.
    ///
    /// Returns the number of writes performed.
    pub async fn send_all(&self, key: &str, value: &str) -> Result<usize> {
        let mut writes = 0;
        for relation in self.relations().await? {
            if self.send(&relation, key, value).await? {
                writes += 1;
            }
        }
        Ok(writes)
    }

    /// Write an app-scoped value unless it is already stored.
    ///
    /// Non-leaders skip the write and get `Ok(false)`.
    pub async fn send_app(&self, relation: &RelationId, key: &str, value: &str) -> Result<bool> {
        if !self.is_leader().await? {
            debug!(relation = %relation, key, "Not the leader, skipping app write");
            return Ok(false);
        }
        let app = self.local_unit().app().to_string();
        if self.bus.read_app(relation, &app, key).await?.as_deref() == Some(value) {
            debug!(relation = %relation, key, "App value unchanged, skipping write");
            return Ok(false);
        }
        self.bus.write_app(relation, key, value).await?;
        info!(relation = %relation, key, app = %app, "Published application data");
        Ok(true)
    }

    /// Read an app-scoped value published by the local application.
    pub async fn read_own_app(&self, relation: &RelationId, key: &str) -> Result<Option<String>> {
        let app = self.local_unit().app().to_string();
        self.bus.read_app(relation, &app, key).await
    }

    /// Read an app-scoped value published by a remote application.
    pub async fn read_app(
        &self,
        relation: &RelationId,
        app: &str,
        key: &str,
    ) -> Result<Option<String>> {
        self.bus.read_app(relation, app, key).await
    }
}
