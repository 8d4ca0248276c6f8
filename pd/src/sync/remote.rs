//! Remote calendar collaborator
//!
//! The engine only ever talks to this trait; concrete transport (a real
//! calendar API) lives outside the core. All four operations are idempotent
//! keyed by remote id or content equality, which is what makes retry and
//! rollback safe. Items with `movable: false` map to immovable blocks and
//! are never update/delete targets.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// A timed item in the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub label: String,
    /// `false` marks an anchor this core must never modify
    pub movable: bool,
}

impl RemoteItem {
    /// Whether the schedulable fields match (id ignored)
    pub fn content_eq(&self, other: &RemoteItem) -> bool {
        self.date == other.date && self.start == other.start && self.end == other.end && self.label == other.label
    }
}

/// Abstract calendar operations consumed by the sync engine
#[async_trait]
pub trait CalendarRemote: Send + Sync {
    /// All items on the given date
    async fn list(&self, date: NaiveDate) -> Result<Vec<RemoteItem>, RemoteError>;

    /// Create an item; returns its remote id. Creating an item whose
    /// content already exists returns the existing id instead of
    /// duplicating it.
    async fn create(&self, item: RemoteItem) -> Result<String, RemoteError>;

    /// Replace an item's content, keyed by remote id
    async fn update(&self, remote_id: &str, item: RemoteItem) -> Result<(), RemoteError>;

    /// Delete by remote id; deleting an absent id is a no-op
    async fn delete(&self, remote_id: &str) -> Result<(), RemoteError>;
}

/// Counts of remote calls, for asserting no-op syncs in tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub list: u32,
    pub create: u32,
    pub update: u32,
    pub delete: u32,
}

impl OpCounts {
    /// Mutating calls only
    pub fn mutations(&self) -> u32 {
        self.create + self.update + self.delete
    }
}

struct Inner {
    items: BTreeMap<String, RemoteItem>,
    next_id: u64,
    counts: OpCounts,
    /// 1-based index of the mutating call that should fail with a timeout
    fail_at_mutation: Option<u32>,
    mutations_seen: u32,
}

impl Inner {
    fn check_fail(&mut self, context: &str) -> Result<(), RemoteError> {
        self.mutations_seen += 1;
        if self.fail_at_mutation == Some(self.mutations_seen) {
            return Err(RemoteError::Timeout(context.to_string()));
        }
        Ok(())
    }
}

/// In-memory calendar for dev and test, including fault injection
pub struct InMemoryCalendar {
    inner: Mutex<Inner>,
}

impl Default for InMemoryCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: BTreeMap::new(),
                next_id: 1,
                counts: OpCounts::default(),
                fail_at_mutation: None,
                mutations_seen: 0,
            }),
        }
    }

    /// Preload items, bypassing counters
    pub fn seed(&self, items: Vec<RemoteItem>) {
        let mut inner = self.inner.lock().expect("calendar lock");
        for item in items {
            inner.items.insert(item.id.clone(), item);
        }
    }

    /// Every stored item, sorted by id
    pub fn snapshot(&self) -> Vec<RemoteItem> {
        let inner = self.inner.lock().expect("calendar lock");
        inner.items.values().cloned().collect()
    }

    pub fn op_counts(&self) -> OpCounts {
        self.inner.lock().expect("calendar lock").counts
    }

    pub fn reset_counts(&self) {
        let mut inner = self.inner.lock().expect("calendar lock");
        inner.counts = OpCounts::default();
        inner.mutations_seen = 0;
        inner.fail_at_mutation = None;
    }

    /// Arrange for the n-th mutating call (1-based) to time out
    pub fn fail_at_mutation(&self, n: u32) {
        let mut inner = self.inner.lock().expect("calendar lock");
        inner.fail_at_mutation = Some(n);
        inner.mutations_seen = 0;
    }
}

#[async_trait]
impl CalendarRemote for InMemoryCalendar {
    async fn list(&self, date: NaiveDate) -> Result<Vec<RemoteItem>, RemoteError> {
        let mut inner = self.inner.lock().expect("calendar lock");
        inner.counts.list += 1;
        let mut items: Vec<RemoteItem> = inner.items.values().filter(|i| i.date == date).cloned().collect();
        items.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn create(&self, item: RemoteItem) -> Result<String, RemoteError> {
        let mut inner = self.inner.lock().expect("calendar lock");
        inner.counts.create += 1;
        inner.check_fail(&item.label)?;

        // Re-create with a known id (undo path) is an idempotent put
        if !item.id.is_empty() {
            let id = item.id.clone();
            inner.items.insert(id.clone(), item);
            return Ok(id);
        }

        // Content-idempotent: an identical item already stored wins
        if let Some(existing) = inner.items.values().find(|i| i.content_eq(&item)) {
            return Ok(existing.id.clone());
        }

        let id = format!("evt-{}", inner.next_id);
        inner.next_id += 1;
        let mut stored = item;
        stored.id = id.clone();
        inner.items.insert(id.clone(), stored);
        Ok(id)
    }

    async fn update(&self, remote_id: &str, item: RemoteItem) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().expect("calendar lock");
        inner.counts.update += 1;
        inner.check_fail(remote_id)?;

        if !inner.items.contains_key(remote_id) {
            return Err(RemoteError::NotFound(remote_id.to_string()));
        }
        let mut stored = item;
        stored.id = remote_id.to_string();
        inner.items.insert(remote_id.to_string(), stored);
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().expect("calendar lock");
        inner.counts.delete += 1;
        inner.check_fail(remote_id)?;
        inner.items.remove(remote_id);
        Ok(())
    }
}
