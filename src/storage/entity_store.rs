// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable per-entity key/value storage with a single alarm slot per entity.
//!
//! ## Table Layout
//!
//! - `entity_data`: composite key (`entity_id \x1f key`) → JSON bytes
//! - `entity_alarms`: entity_id → due timestamp (ms since epoch)
//!
//! Every entity operation goes through an [`Entity`] handle which holds the
//! entity's async mutex for its whole lifetime, so all reads and writes on
//! one entity are serialized. Handles for different entities never contend.
//!
//! Handles must not be nested for the same entity id; the second
//! [`EntityStore::entity`] call would wait forever.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

// =============================================================================
// Table Definitions
// =============================================================================

const ENTITY_DATA: TableDefinition<&str, &[u8]> = TableDefinition::new("entity_data");

const ENTITY_ALARMS: TableDefinition<&str, i64> = TableDefinition::new("entity_alarms");

const KEY_SEP: char = '\x1f';
/// First character after [`KEY_SEP`]; exclusive upper bound for prefix scans.
const KEY_SEP_END: char = '\x20';

/// Lock map size above which idle entries are pruned.
const LOCK_PRUNE_THRESHOLD: usize = 1024;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EntityStoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type EntityResult<T> = Result<T, EntityStoreError>;

fn data_key(entity_id: &str, key: &str) -> String {
    format!("{entity_id}{KEY_SEP}{key}")
}

fn prefix_bounds(entity_id: &str, key_prefix: &str) -> (String, String) {
    let start = format!("{entity_id}{KEY_SEP}{key_prefix}");
    let end = if key_prefix.is_empty() {
        format!("{entity_id}{KEY_SEP_END}")
    } else {
        // Smallest string greater than every key starting with `start`.
        format!("{start}{}", char::MAX)
    };
    (start, end)
}

// =============================================================================
// EntityStore
// =============================================================================

pub struct EntityStore {
    db: Database,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl EntityStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> EntityResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTITY_DATA)?;
            let _ = write_txn.open_table(ENTITY_ALARMS)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Acquire the single-writer handle for `entity_id`.
    pub async fn entity(&self, entity_id: &str) -> Entity<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if locks.len() > LOCK_PRUNE_THRESHOLD {
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            locks
                .entry(entity_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        Entity {
            store: self,
            id: entity_id.to_string(),
            _guard: guard,
        }
    }

    /// Entities whose alarm is due at or before `now_ms`, earliest first.
    pub fn due_alarms(&self, now_ms: i64) -> EntityResult<Vec<(String, i64)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTITY_ALARMS)?;
        let mut due = Vec::new();
        for entry in table.iter()? {
            let (id, at) = entry?;
            if at.value() <= now_ms {
                due.push((id.value().to_string(), at.value()));
            }
        }
        due.sort_by_key(|(_, at)| *at);
        Ok(due)
    }
}

// =============================================================================
// Entity handle
// =============================================================================

/// Exclusive access to one entity's keys and alarm.
pub struct Entity<'a> {
    store: &'a EntityStore,
    id: String,
    _guard: OwnedMutexGuard<()>,
}

impl Entity<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> EntityResult<Option<T>> {
        let read_txn = self.store.db.begin_read()?;
        let table = read_txn.open_table(ENTITY_DATA)?;
        match table.get(data_key(&self.id, key).as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> EntityResult<()> {
        let json = serde_json::to_vec(value)?;
        let write_txn = self.store.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTITY_DATA)?;
            table.insert(data_key(&self.id, key).as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Remove one key. Returns whether it existed.
    pub fn delete(&self, key: &str) -> EntityResult<bool> {
        let write_txn = self.store.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(ENTITY_DATA)?;
            let removed = table.remove(data_key(&self.id, key).as_str())?;
            removed.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }

    /// All values whose key starts with `key_prefix`, keyed by the full
    /// entity-local key.
    pub fn list<T: DeserializeOwned>(&self, key_prefix: &str) -> EntityResult<Vec<(String, T)>> {
        let (start, end) = prefix_bounds(&self.id, key_prefix);
        let strip = self.id.len() + KEY_SEP.len_utf8();

        let read_txn = self.store.db.begin_read()?;
        let table = read_txn.open_table(ENTITY_DATA)?;
        let mut out = Vec::new();
        for entry in table.range::<&str>(start.as_str()..end.as_str())? {
            let (key, value) = entry?;
            let local = key.value()[strip..].to_string();
            out.push((local, serde_json::from_slice(value.value())?));
        }
        Ok(out)
    }

    /// Whether the entity has any stored key.
    pub fn exists(&self) -> EntityResult<bool> {
        let (start, end) = prefix_bounds(&self.id, "");
        let read_txn = self.store.db.begin_read()?;
        let table = read_txn.open_table(ENTITY_DATA)?;
        let mut range = table.range::<&str>(start.as_str()..end.as_str())?;
        Ok(range.next().is_some())
    }

    /// Purge every key and the alarm in one transaction.
    pub fn delete_all(&self) -> EntityResult<()> {
        let (start, end) = prefix_bounds(&self.id, "");
        let write_txn = self.store.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTITY_DATA)?;
            let mut keys = Vec::new();
            for entry in table.range::<&str>(start.as_str()..end.as_str())? {
                let (key, _) = entry?;
                keys.push(key.value().to_string());
            }
            for key in &keys {
                table.remove(key.as_str())?;
            }

            let mut alarms = write_txn.open_table(ENTITY_ALARMS)?;
            alarms.remove(self.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Schedule (or move) the entity's single alarm.
    pub fn set_alarm(&self, at_ms: i64) -> EntityResult<()> {
        let write_txn = self.store.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTITY_ALARMS)?;
            table.insert(self.id.as_str(), at_ms)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn alarm(&self) -> EntityResult<Option<i64>> {
        let read_txn = self.store.db.begin_read()?;
        let table = read_txn.open_table(ENTITY_ALARMS)?;
        Ok(table.get(self.id.as_str())?.map(|v| v.value()))
    }

    pub fn delete_alarm(&self) -> EntityResult<()> {
        let write_txn = self.store.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTITY_ALARMS)?;
            table.remove(self.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
