//! Core Store implementation
//!
//! One JSONL log per collection under the store root. Every mutation appends
//! an envelope line; `open` replays each log with last-write-wins semantics
//! so the newest `put` (or `del`) for an id wins. Secondary indexes are
//! rebuilt per record type after open and maintained incrementally by every
//! mutation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{Filter, FilterOp, IndexValue, Record};

/// Log line operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum EnvelopeOp {
    Put,
    Del,
}

/// One persisted log line
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    op: EnvelopeOp,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// id -> raw record JSON, ordered for deterministic iteration
type Collection = BTreeMap<String, Value>;

/// field -> value -> matching ids
type FieldIndex = HashMap<String, HashMap<IndexValue, BTreeSet<String>>>;

/// The persistent record store
pub struct Store {
    root: PathBuf,
    /// Held for the lifetime of the store; released on drop
    _lock: File,
    collections: HashMap<String, Collection>,
    indexes: HashMap<String, FieldIndex>,
}

impl Store {
    /// Open or create a store at the given path.
    ///
    /// Takes an exclusive advisory lock on the store directory; a second
    /// process opening the same path fails fast instead of corrupting logs.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root).context("Failed to create store directory")?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(root.join(".lock"))
            .context("Failed to open store lock file")?;
        lock.try_lock_exclusive()
            .context("Store is locked by another process")?;

        let mut store = Self {
            root,
            _lock: lock,
            collections: HashMap::new(),
            indexes: HashMap::new(),
        };
        store.replay_all()?;

        debug!(root = %store.root.display(), collections = store.collections.len(), "Opened store");
        Ok(store)
    }

    /// Replay every collection log into memory
    fn replay_all(&mut self) -> Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "jsonl").unwrap_or(false) {
                let name = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                let collection = self.replay_file(&path)?;
                info!(collection = %name, records = collection.len(), "Replayed collection log");
                self.collections.insert(name, collection);
            }
        }
        Ok(())
    }

    fn replay_file(&self, path: &Path) -> Result<Collection> {
        let file = File::open(path).context(format!("Failed to open {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut collection = Collection::new();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let envelope: Envelope = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(e) => {
                    // A torn trailing write is recoverable; skip and keep replaying
                    warn!(path = %path.display(), lineno, error = %e, "Skipping unreadable log line");
                    continue;
                }
            };
            match envelope.op {
                EnvelopeOp::Put => {
                    if let Some(data) = envelope.data {
                        collection.insert(envelope.id, data);
                    }
                }
                EnvelopeOp::Del => {
                    collection.remove(&envelope.id);
                }
            }
        }

        Ok(collection)
    }

    fn append(&self, collection: &str, envelope: &Envelope) -> Result<()> {
        let path = self.root.join(format!("{}.jsonl", collection));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(format!("Failed to open {}", path.display()))?;
        let line = serde_json::to_string(envelope)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Create a new record; fails if the id already exists
    pub fn create<R: Record>(&mut self, record: &R) -> Result<()> {
        let collection = R::collection_name();
        if self
            .collections
            .get(collection)
            .map(|c| c.contains_key(record.id()))
            .unwrap_or(false)
        {
            return Err(eyre::eyre!(
                "Record already exists in {}: {}",
                collection,
                record.id()
            ));
        }
        self.put(record)
    }

    /// Update an existing record; fails if the id is unknown
    pub fn update<R: Record>(&mut self, record: &R) -> Result<()> {
        let collection = R::collection_name();
        if !self
            .collections
            .get(collection)
            .map(|c| c.contains_key(record.id()))
            .unwrap_or(false)
        {
            return Err(eyre::eyre!("Record not found in {}: {}", collection, record.id()));
        }
        self.put(record)
    }

    /// Create or replace a record
    pub fn upsert<R: Record>(&mut self, record: &R) -> Result<()> {
        self.put(record)
    }

    fn put<R: Record>(&mut self, record: &R) -> Result<()> {
        let collection = R::collection_name();
        let data = serde_json::to_value(record)?;

        self.append(
            collection,
            &Envelope {
                op: EnvelopeOp::Put,
                id: record.id().to_string(),
                data: Some(data.clone()),
            },
        )?;

        // De-index the previous version before replacing it
        if let Some(old) = self
            .collections
            .get(collection)
            .and_then(|c| c.get(record.id()))
            .cloned()
            && let Ok(old_record) = serde_json::from_value::<R>(old)
        {
            self.index_remove(collection, old_record.id(), &old_record.indexed_fields());
        }

        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(record.id().to_string(), data);
        self.index_insert(collection, record.id(), &record.indexed_fields());

        Ok(())
    }

    /// Get a record by id
    pub fn get<R: Record>(&self, id: &str) -> Result<Option<R>> {
        let collection = R::collection_name();
        match self.collections.get(collection).and_then(|c| c.get(id)) {
            Some(value) => {
                let record = serde_json::from_value(value.clone())
                    .context(format!("Failed to deserialize {} record {}", collection, id))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Delete a record by id; returns whether it existed
    pub fn delete<R: Record>(&mut self, id: &str) -> Result<bool> {
        let collection = R::collection_name();
        let Some(old) = self.collections.get(collection).and_then(|c| c.get(id)).cloned() else {
            return Ok(false);
        };

        self.append(
            collection,
            &Envelope {
                op: EnvelopeOp::Del,
                id: id.to_string(),
                data: None,
            },
        )?;

        if let Ok(old_record) = serde_json::from_value::<R>(old) {
            self.index_remove(collection, old_record.id(), &old_record.indexed_fields());
        }
        if let Some(c) = self.collections.get_mut(collection) {
            c.remove(id);
        }
        Ok(true)
    }

    /// List records matching all given filters, ordered by id.
    ///
    /// Uses the secondary index for the first applicable equality filter;
    /// the remaining filters are verified against each candidate record.
    pub fn list<R: Record>(&self, filters: &[Filter]) -> Result<Vec<R>> {
        let collection = R::collection_name();
        let Some(records) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let candidates: Option<BTreeSet<String>> = filters
            .iter()
            .find(|f| f.op == FilterOp::Eq)
            .and_then(|f| {
                self.indexes
                    .get(collection)
                    .and_then(|idx| idx.get(&f.field))
                    .map(|by_value| by_value.get(&f.value).cloned().unwrap_or_default())
            });

        let mut results = Vec::new();
        match candidates {
            Some(ids) => {
                for id in ids {
                    if let Some(value) = records.get(&id) {
                        let record: R = serde_json::from_value(value.clone())
                            .context(format!("Failed to deserialize {} record {}", collection, id))?;
                        if filters.iter().all(|f| f.matches(&record.indexed_fields())) {
                            results.push(record);
                        }
                    }
                }
            }
            None => {
                for (id, value) in records {
                    let record: R = serde_json::from_value(value.clone())
                        .context(format!("Failed to deserialize {} record {}", collection, id))?;
                    if filters.iter().all(|f| f.matches(&record.indexed_fields())) {
                        results.push(record);
                    }
                }
            }
        }

        Ok(results)
    }

    /// Rebuild the secondary index for a record type after open.
    ///
    /// Returns the number of indexed records.
    pub fn rebuild_indexes<R: Record>(&mut self) -> Result<usize> {
        let collection = R::collection_name();
        self.indexes.remove(collection);

        let Some(records) = self.collections.get(collection).cloned() else {
            return Ok(0);
        };

        let mut count = 0;
        for (id, value) in &records {
            let record: R = serde_json::from_value(value.clone())
                .context(format!("Failed to deserialize {} record {}", collection, id))?;
            self.index_insert(collection, record.id(), &record.indexed_fields());
            count += 1;
        }

        debug!(collection, count, "Rebuilt indexes");
        Ok(count)
    }

    fn index_insert(&mut self, collection: &str, id: &str, fields: &HashMap<String, IndexValue>) {
        let index = self.indexes.entry(collection.to_string()).or_default();
        for (field, value) in fields {
            index
                .entry(field.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(id.to_string());
        }
    }

    fn index_remove(&mut self, collection: &str, id: &str, fields: &HashMap<String, IndexValue>) {
        if let Some(index) = self.indexes.get_mut(collection) {
            for (field, value) in fields {
                if let Some(by_value) = index.get_mut(field)
                    && let Some(ids) = by_value.get_mut(value)
                {
                    ids.remove(id);
                }
            }
        }
    }
}
