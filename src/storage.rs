//! In-process repositories for containers and sessions.
//!
//! The traits are the seam: anything satisfying them can back the pool and
//! session manager. The default implementations are concurrent maps; all
//! operations are upserts by primary key and safe under concurrent access.

use dashmap::DashMap;
use std::sync::Arc;

use crate::models::{
    ContainerRecord, ContainerStatus, SessionRecord, SessionStatus, StatusCounts,
};

pub trait ContainerStore: Send + Sync {
    fn save(&self, record: ContainerRecord);
    fn get(&self, container_id: &str) -> Option<ContainerRecord>;
    fn get_all(&self) -> Vec<ContainerRecord>;
    fn delete(&self, container_id: &str);
    /// Any idle container, no ordering guarantee.
    fn first_idle(&self) -> Option<ContainerRecord>;
    fn count_by_status(&self) -> StatusCounts;
    fn count(&self) -> usize;
    fn clear(&self);
}

pub trait SessionStore: Send + Sync {
    fn save(&self, record: SessionRecord);
    fn get(&self, session_id: &str) -> Option<SessionRecord>;
    /// Non-destroyed sessions, newest last.
    fn get_all(&self) -> Vec<SessionRecord>;
    fn get_all_active(&self) -> Vec<SessionRecord>;
    fn delete(&self, session_id: &str);
    fn get_by_container_id(&self, container_id: &str) -> Option<SessionRecord>;
    /// Queued sessions ordered by queue position.
    fn get_queued(&self) -> Vec<SessionRecord>;
    fn clear(&self);
}

#[derive(Default)]
pub struct InMemoryContainerStore {
    records: DashMap<String, ContainerRecord>,
}

impl InMemoryContainerStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ContainerStore for InMemoryContainerStore {
    fn save(&self, record: ContainerRecord) {
        self.records.insert(record.container_id.clone(), record);
    }

    fn get(&self, container_id: &str) -> Option<ContainerRecord> {
        self.records.get(container_id).map(|r| r.clone())
    }

    fn get_all(&self) -> Vec<ContainerRecord> {
        let mut all: Vec<ContainerRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    fn delete(&self, container_id: &str) {
        self.records.remove(container_id);
    }

    fn first_idle(&self) -> Option<ContainerRecord> {
        self.records
            .iter()
            .find(|r| r.value().status == ContainerStatus::Idle)
            .map(|r| r.value().clone())
    }

    fn count_by_status(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in self.records.iter() {
            match record.value().status {
                ContainerStatus::Idle => counts.idle += 1,
                ContainerStatus::Busy => counts.busy += 1,
                ContainerStatus::Warming => counts.warming += 1,
                ContainerStatus::Destroying => counts.destroying += 1,
            }
        }
        counts
    }

    fn count(&self) -> usize {
        self.records.len()
    }

    fn clear(&self) {
        self.records.clear();
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    records: DashMap<String, SessionRecord>,
}

impl InMemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl SessionStore for InMemorySessionStore {
    fn save(&self, record: SessionRecord) {
        self.records.insert(record.session_id.clone(), record);
    }

    fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.records.get(session_id).map(|r| r.clone())
    }

    fn get_all(&self) -> Vec<SessionRecord> {
        let mut all: Vec<SessionRecord> = self
            .records
            .iter()
            .filter(|r| r.value().status != SessionStatus::Destroyed)
            .map(|r| r.value().clone())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    fn get_all_active(&self) -> Vec<SessionRecord> {
        self.records
            .iter()
            .filter(|r| r.value().status == SessionStatus::Active)
            .map(|r| r.value().clone())
            .collect()
    }

    fn delete(&self, session_id: &str) {
        self.records.remove(session_id);
    }

    fn get_by_container_id(&self, container_id: &str) -> Option<SessionRecord> {
        self.records
            .iter()
            .find(|r| r.value().container_id.as_deref() == Some(container_id))
            .map(|r| r.value().clone())
    }

    fn get_queued(&self) -> Vec<SessionRecord> {
        let mut queued: Vec<SessionRecord> = self
            .records
            .iter()
            .filter(|r| r.value().status == SessionStatus::Queued)
            .map(|r| r.value().clone())
            .collect();
        queued.sort_by_key(|s| s.queue_position);
        queued
    }

    fn clear(&self) {
        self.records.clear();
    }
}
