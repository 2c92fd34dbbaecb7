//! In-memory relation data bus for testing.
//!
//! [`MemoryBus`] models a whole deployment: units, application leaders,
//! relation instances and every participant's namespace. Each unit talks to it
//! through a [`UnitBus`] handle implementing [`SharedBus`].
//!
//! Every write is recorded (even when the value did not change, so tests can
//! assert that callers deduplicate) and queues a [`BusEvent`] for each other
//! participant of the relation.
//!
//! # Usage
//!
//! This module is available when the `test-utilities` feature is enabled,
//! or during unit tests:
//!
//! ```toml
//! [dev-dependencies]
//! kafka-relations = { path = ".", features = ["test-utilities"] }
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{NetworkBinding, RelationId, RemoteUnit, SharedBus, UnitId};
use crate::error::{Error, Result};

/// A namespace: key -> value.
pub type Databag = BTreeMap<String, String>;

/// A change notification delivered to one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEvent {
    pub relation: RelationId,
    /// Unit the notification is delivered to.
    pub target: UnitId,
    /// Writer of the change (unit or application name).
    pub source: String,
}

/// One recorded write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub relation: RelationId,
    /// Unit name for unit writes, application name for app writes.
    pub writer: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug)]
struct RelationRecord {
    id: RelationId,
    members: Vec<UnitId>,
    unit_data: HashMap<UnitId, Databag>,
    app_data: HashMap<String, Databag>,
}

#[derive(Debug, Default)]
struct BusState {
    bindings: HashMap<UnitId, NetworkBinding>,
    leaders: HashMap<String, UnitId>,
    relations: Vec<RelationRecord>,
    next_relation_id: u32,
    writes: Vec<WriteRecord>,
    events: VecDeque<BusEvent>,
}

impl BusState {
    fn relation(&self, id: &RelationId) -> Result<&RelationRecord> {
        self.relations
            .iter()
            .find(|r| &r.id == id)
            .ok_or_else(|| Error::not_ready(format!("relation {} does not exist", id)))
    }

    fn relation_mut(&mut self, id: &RelationId) -> Result<&mut RelationRecord> {
        self.relations
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| Error::not_ready(format!("relation {} does not exist", id)))
    }

    fn notify(&mut self, relation: &RelationId, source: &str, skip: &UnitId) {
        let targets: Vec<UnitId> = match self.relation(relation) {
            Ok(r) => r.members.iter().filter(|m| *m != skip).cloned().collect(),
            Err(_) => return,
        };
        for target in targets {
            self.events.push_back(BusEvent {
                relation: relation.clone(),
                target,
                source: source.to_string(),
            });
        }
    }
}

/// In-memory deployment shared by every [`UnitBus`] handle.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    state: Arc<RwLock<BusState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit with its network addresses.
    ///
    /// The first unit registered for an application becomes its leader.
    pub async fn add_unit(&self, unit: &UnitId, bind_address: &str, ingress_address: &str) {
        let mut state = self.state.write().await;
        state.bindings.insert(
            unit.clone(),
            NetworkBinding {
                bind_address: bind_address.to_string(),
                ingress_address: ingress_address.to_string(),
            },
        );
        state
            .leaders
            .entry(unit.app().to_string())
            .or_insert_with(|| unit.clone());
    }

    /// Move leadership of the unit's application to `unit`.
    pub async fn set_leader(&self, unit: &UnitId) {
        let mut state = self.state.write().await;
        state.leaders.insert(unit.app().to_string(), unit.clone());
    }

    /// Create a relation instance joining `members` (in iteration order).
    pub async fn relate(&self, name: &str, members: &[UnitId]) -> RelationId {
        let mut state = self.state.write().await;
        let id = RelationId::new(name, state.next_relation_id);
        state.next_relation_id += 1;
        state.relations.push(RelationRecord {
            id: id.clone(),
            members: members.to_vec(),
            unit_data: HashMap::new(),
            app_data: HashMap::new(),
        });
        id
    }

    /// Add a unit to an existing relation instance.
    pub async fn join(&self, relation: &RelationId, unit: &UnitId) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state.relation_mut(relation)?;
        if !record.members.contains(unit) {
            record.members.push(unit.clone());
        }
        state.notify(relation, unit.as_str(), unit);
        Ok(())
    }

    /// Remove a unit (and its data) from a relation instance.
    pub async fn depart(&self, relation: &RelationId, unit: &UnitId) -> Result<()> {
        let mut state = self.state.write().await;
        let record = state.relation_mut(relation)?;
        record.members.retain(|m| m != unit);
        record.unit_data.remove(unit);
        state.notify(relation, unit.as_str(), unit);
        Ok(())
    }

    /// Tear down a relation instance entirely.
    pub async fn break_relation(&self, relation: &RelationId) {
        let mut state = self.state.write().await;
        state.relations.retain(|r| &r.id != relation);
    }

    /// Handle acting as `unit`.
    pub fn unit(&self, unit: &UnitId) -> UnitBus {
        UnitBus {
            bus: self.clone(),
            unit: unit.clone(),
        }
    }

    /// Number of writes recorded so far.
    pub async fn write_count(&self) -> usize {
        self.state.read().await.writes.len()
    }

    /// Every write recorded so far.
    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.state.read().await.writes.clone()
    }

    /// Writes performed by `writer` (unit or application name) for `key`.
    pub async fn writes_by(&self, writer: &str, key: &str) -> usize {
        self.state
            .read()
            .await
            .writes
            .iter()
            .filter(|w| w.writer == writer && w.key == key)
            .count()
    }

    /// Drain all queued change notifications.
    pub async fn take_events(&self) -> Vec<BusEvent> {
        self.state.write().await.events.drain(..).collect()
    }

    /// Snapshot of a unit's namespace in a relation.
    pub async fn unit_data(&self, relation: &RelationId, unit: &UnitId) -> Databag {
        let state = self.state.read().await;
        state
            .relation(relation)
            .ok()
            .and_then(|r| r.unit_data.get(unit).cloned())
            .unwrap_or_default()
    }

    /// Write into any unit's namespace without going through a handle.
    ///
    /// Used to seed data published by units not modelled in a test.
    pub async fn seed(&self, relation: &RelationId, unit: &UnitId, key: &str, value: &str) {
        let mut state = self.state.write().await;
        if let Ok(record) = state.relation_mut(relation) {
            record
                .unit_data
                .entry(unit.clone())
                .or_default()
                .insert(key.to_string(), value.to_string());
        }
    }
}

/// A unit's view of a [`MemoryBus`].
#[derive(Debug, Clone)]
pub struct UnitBus {
    bus: MemoryBus,
    unit: UnitId,
}

#[async_trait]
impl SharedBus for UnitBus {
    fn local_unit(&self) -> &UnitId {
        &self.unit
    }

    async fn is_leader(&self) -> Result<bool> {
        let state = self.bus.state.read().await;
        Ok(state.leaders.get(self.unit.app()) == Some(&self.unit))
    }

    async fn relations(&self, name: &str) -> Result<Vec<RelationId>> {
        let state = self.bus.state.read().await;
        Ok(state
            .relations
            .iter()
            .filter(|r| r.id.name == name && r.members.contains(&self.unit))
            .map(|r| r.id.clone())
            .collect())
    }

    async fn participants(&self, relation: &RelationId) -> Result<Vec<RemoteUnit>> {
        let state = self.bus.state.read().await;
        let record = state.relation(relation)?;
        Ok(record
            .members
            .iter()
            .filter(|m| **m != self.unit)
            .map(|m| RemoteUnit {
                unit: m.clone(),
                is_leader: state.leaders.get(m.app()) == Some(m),
            })
            .collect())
    }

    async fn read(
        &self,
        relation: &RelationId,
        unit: &UnitId,
        key: &str,
    ) -> Result<Option<String>> {
        let state = self.bus.state.read().await;
        let record = state.relation(relation)?;
        Ok(record.unit_data.get(unit).and_then(|d| d.get(key).cloned()))
    }

    async fn read_app(
        &self,
        relation: &RelationId,
        app: &str,
        key: &str,
    ) -> Result<Option<String>> {
        let state = self.bus.state.read().await;
        let record = state.relation(relation)?;
        Ok(record.app_data.get(app).and_then(|d| d.get(key).cloned()))
    }

    async fn write(&self, relation: &RelationId, key: &str, value: &str) -> Result<()> {
        let mut state = self.bus.state.write().await;
        state
            .relation_mut(relation)?
            .unit_data
            .entry(self.unit.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
        state.writes.push(WriteRecord {
            relation: relation.clone(),
            writer: self.unit.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        state.notify(relation, self.unit.as_str(), &self.unit);
        Ok(())
    }

    async fn write_app(&self, relation: &RelationId, key: &str, value: &str) -> Result<()> {
        let mut state = self.bus.state.write().await;
        if state.leaders.get(self.unit.app()) != Some(&self.unit) {
            return Err(Error::NotLeader(self.unit.to_string()));
        }
        let app = self.unit.app().to_string();
        state
            .relation_mut(relation)?
            .app_data
            .entry(app.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
        state.writes.push(WriteRecord {
            relation: relation.clone(),
            writer: app.clone(),
            key: key.to_string(),
            value: value.to_string(),
        });
        state.notify(relation, &app, &self.unit);
        Ok(())
    }

    async fn binding(&self, relation_name: &str) -> Result<NetworkBinding> {
        let state = self.bus.state.read().await;
        state.bindings.get(&self.unit).cloned().ok_or_else(|| {
            Error::not_ready(format!(
                "no network binding for {} on {}",
                self.unit, relation_name
            ))
        })
    }
}
