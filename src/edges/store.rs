// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded edge graph backed by redb.
//!
//! ## Table Layout
//!
//! - `edges`: composite key (`src \x1f tag \x1f dst`) → serialized EdgeRecord
//! - `edges_by_dst`: composite key (`dst \x1f tag \x1f src`) → ()
//! - `nodes`: base URN → serialized NodeRecord (r/q components)
//!
//! Endpoints are always stored by base URN; components live on the node
//! record and are merged on every write that mentions the node.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Edge, EdgeError, EdgeQuery, EdgeResult, EdgeService, Node};
use crate::clock::SharedClock;
use crate::urn::Urn;

// =============================================================================
// Table Definitions
// =============================================================================

const EDGES: TableDefinition<&str, &[u8]> = TableDefinition::new("edges");

const EDGES_BY_DST: TableDefinition<&str, ()> = TableDefinition::new("edges_by_dst");

const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

const SEP: char = '\x1f';

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EdgeStoreError {
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

    #[error("corrupt edge record: {0}")]
    Corrupt(String),
}

type StoreResult<T> = Result<T, EdgeStoreError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EdgeRecord {
    src: String,
    tag: String,
    dst: String,
    created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NodeRecord {
    #[serde(default)]
    rc: BTreeMap<String, String>,
    #[serde(default)]
    qc: BTreeMap<String, String>,
}

fn edge_key(a: &str, tag: &str, b: &str) -> String {
    format!("{a}{SEP}{tag}{SEP}{b}")
}

/// Range bounds covering every key that starts with `prefix`.
fn prefix_range(prefix: &str) -> (String, String) {
    (prefix.to_string(), format!("{prefix}{}", char::MAX))
}

// =============================================================================
// EdgeStore
// =============================================================================

pub struct EdgeStore {
    db: Database,
    clock: SharedClock,
}

impl EdgeStore {
    /// Open (or create) the graph database at the given path.
    pub fn open(path: &Path, clock: SharedClock) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(EDGES)?;
            let _ = write_txn.open_table(EDGES_BY_DST)?;
            let _ = write_txn.open_table(NODES)?;
        }
        write_txn.commit()?;

        Ok(Self { db, clock })
    }

    fn upsert_node(txn: &WriteTransaction, urn: &Urn) -> StoreResult<()> {
        let mut nodes = txn.open_table(NODES)?;
        let key = urn.base().to_string();
        let mut record: NodeRecord = match nodes.get(key.as_str())? {
            Some(v) => serde_json::from_slice(v.value())?,
            None => NodeRecord::default(),
        };
        record.rc.extend(urn.rc().iter().map(|(k, v)| (k.clone(), v.clone())));
        record.qc.extend(urn.qc().iter().map(|(k, v)| (k.clone(), v.clone())));
        let json = serde_json::to_vec(&record)?;
        nodes.insert(key.as_str(), json.as_slice())?;
        Ok(())
    }

    fn create_edge(&self, src: &Urn, tag: &str, dst: &Urn) -> StoreResult<EdgeRecord> {
        let src_id = src.base().to_string();
        let dst_id = dst.base().to_string();
        let key = edge_key(&src_id, tag, &dst_id);

        let write_txn = self.db.begin_write()?;
        let record = {
            Self::upsert_node(&write_txn, src)?;
            Self::upsert_node(&write_txn, dst)?;

            let mut edges = write_txn.open_table(EDGES)?;
            let existing: Option<EdgeRecord> = match edges.get(key.as_str())? {
                Some(v) => Some(serde_json::from_slice(v.value())?),
                None => None,
            };
            match existing {
                Some(record) => record,
                None => {
                    let record = EdgeRecord {
                        src: src_id.clone(),
                        tag: tag.to_string(),
                        dst: dst_id.clone(),
                        created_at: self.clock.now_ms(),
                    };
                    let json = serde_json::to_vec(&record)?;
                    edges.insert(key.as_str(), json.as_slice())?;

                    let mut by_dst = write_txn.open_table(EDGES_BY_DST)?;
                    by_dst.insert(edge_key(&dst_id, tag, &src_id).as_str(), ())?;
                    record
                }
            }
        };
        write_txn.commit()?;
        Ok(record)
    }

    fn load_node(&self, id: &str) -> StoreResult<Node> {
        let read_txn = self.db.begin_read()?;
        let nodes = read_txn.open_table(NODES)?;
        let record: NodeRecord = match nodes.get(id)? {
            Some(v) => serde_json::from_slice(v.value())?,
            None => NodeRecord::default(),
        };
        let urn = Urn::parse(id).map_err(|e| EdgeStoreError::Corrupt(format!("{id}: {e}")))?;
        Ok(Node {
            id: urn,
            rc: record.rc,
            qc: record.qc,
        })
    }

    fn hydrate(&self, record: EdgeRecord) -> StoreResult<Edge> {
        Ok(Edge {
            src: self.load_node(&record.src)?,
            tag: record.tag,
            dst: self.load_node(&record.dst)?,
            created_at: record.created_at,
        })
    }

    fn scan_by_src(&self, src_id: &str, tag: Option<&str>) -> StoreResult<Vec<EdgeRecord>> {
        let prefix = match tag {
            Some(tag) => format!("{src_id}{SEP}{tag}{SEP}"),
            None => format!("{src_id}{SEP}"),
        };
        let (start, end) = prefix_range(&prefix);

        let read_txn = self.db.begin_read()?;
        let edges = read_txn.open_table(EDGES)?;
        let mut out = Vec::new();
        for entry in edges.range::<&str>(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            out.push(serde_json::from_slice(value.value())?);
        }
        Ok(out)
    }

    fn scan_by_dst(&self, dst_id: &str, tag: Option<&str>) -> StoreResult<Vec<EdgeRecord>> {
        let prefix = match tag {
            Some(tag) => format!("{dst_id}{SEP}{tag}{SEP}"),
            None => format!("{dst_id}{SEP}"),
        };
        let (start, end) = prefix_range(&prefix);

        let read_txn = self.db.begin_read()?;
        let by_dst = read_txn.open_table(EDGES_BY_DST)?;
        let edges = read_txn.open_table(EDGES)?;
        let mut out = Vec::new();
        for entry in by_dst.range::<&str>(start.as_str()..end.as_str())? {
            let (key, _) = entry?;
            let mut parts = key.value().splitn(3, SEP);
            let (Some(dst), Some(tag), Some(src)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(EdgeStoreError::Corrupt(key.value().to_string()));
            };
            if let Some(value) = edges.get(edge_key(src, tag, dst).as_str())? {
                out.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(out)
    }

    fn query(&self, query: &EdgeQuery) -> EdgeResult<Vec<Edge>> {
        let src_id = query.src.as_ref().and_then(|f| f.id.as_ref());
        let dst_id = query.dst.as_ref().and_then(|f| f.id.as_ref());
        let tag = query.tag.as_deref();

        let records = match (src_id, dst_id) {
            (Some(src), _) => self.scan_by_src(&src.base().to_string(), tag)?,
            (None, Some(dst)) => self.scan_by_dst(&dst.base().to_string(), tag)?,
            (None, None) => {
                return Err(EdgeError::InvalidQuery(
                    "query must name a source or destination id".to_string(),
                ))
            }
        };

        let mut edges = Vec::with_capacity(records.len());
        for record in records {
            let edge = self.hydrate(record)?;
            if query.matches(&edge) {
                edges.push(edge);
            }
        }
        edges.sort_by_key(|e| e.created_at);
        Ok(edges)
    }

    fn remove(&self, src: &Urn, tag: &str, dst: &Urn) -> StoreResult<bool> {
        let src_id = src.base().to_string();
        let dst_id = dst.base().to_string();

        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut edges = write_txn.open_table(EDGES)?;
            let removed = edges.remove(edge_key(&src_id, tag, &dst_id).as_str())?.is_some();
            let mut by_dst = write_txn.open_table(EDGES_BY_DST)?;
            by_dst.remove(edge_key(&dst_id, tag, &src_id).as_str())?;
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn purge_node(&self, id: &Urn) -> StoreResult<usize> {
        let node_id = id.base().to_string();
        let outgoing = self.scan_by_src(&node_id, None)?;
        let incoming = self.scan_by_dst(&node_id, None)?;

        let write_txn = self.db.begin_write()?;
        let mut count = 0;
        {
            let mut edges = write_txn.open_table(EDGES)?;
            let mut by_dst = write_txn.open_table(EDGES_BY_DST)?;
            for record in outgoing.iter().chain(incoming.iter()) {
                if edges
                    .remove(edge_key(&record.src, &record.tag, &record.dst).as_str())?
                    .is_some()
                {
                    count += 1;
                }
                by_dst.remove(edge_key(&record.dst, &record.tag, &record.src).as_str())?;
            }
            let mut nodes = write_txn.open_table(NODES)?;
            nodes.remove(node_id.as_str())?;
        }
        write_txn.commit()?;
        Ok(count)
    }
}

#[async_trait]
impl EdgeService for EdgeStore {
    async fn make_edge(&self, src: &Urn, tag: &str, dst: &Urn) -> EdgeResult<Edge> {
        let record = self.create_edge(src, tag, dst)?;
        debug!(src = %record.src, tag = %record.tag, dst = %record.dst, "Edge recorded");
        Ok(self.hydrate(record)?)
    }

    async fn get_edges(&self, query: &EdgeQuery) -> EdgeResult<Vec<Edge>> {
        self.query(query)
    }

    async fn remove_edge(&self, src: &Urn, tag: &str, dst: &Urn) -> EdgeResult<bool> {
        let removed = self.remove(src, tag, dst)?;
        if removed {
            debug!(src = %src.base(), tag = %tag, dst = %dst.base(), "Edge removed");
        }
        Ok(removed)
    }

    async fn update_node(&self, urn: &Urn) -> EdgeResult<()> {
        let write_txn = self.db.begin_write().map_err(EdgeStoreError::from)?;
        Self::upsert_node(&write_txn, urn)?;
        write_txn.commit().map_err(EdgeStoreError::from)?;
        Ok(())
    }

    async fn delete_node(&self, id: &Urn) -> EdgeResult<usize> {
        let removed = self.purge_node(id)?;
        debug!(node = %id.base(), removed_edges = removed, "Node deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::clock::ManualClock;
    use crate::edges::{NodeFilter, EDGE_MEMBER_OF_GROUP, EDGE_OWNS_ADDRESS};
    use crate::models::AddressType;
    use crate::urn::{UrnKind, QC_ALIAS};

    fn graph() -> (tempfile::TempDir, ManualClock, EdgeStore) {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(1_000);
        let store = EdgeStore::open(&dir.path().join("edges.redb"), Arc::new(clock.clone())).unwrap();
        (dir, clock, store)
    }

    #[tokio::test]
    async fn make_edge_is_idempotent() {
        let (_dir, clock, g) = graph();
        let acct = Urn::random(UrnKind::Account);
        let addr = Urn::address(AddressType::Eth, "0xabc");

        let first = g.make_edge(&acct, EDGE_OWNS_ADDRESS, &addr).await.unwrap();
        clock.advance(Duration::from_secs(5));
        let second = g.make_edge(&acct, EDGE_OWNS_ADDRESS, &addr).await.unwrap();
        assert_eq!(first.created_at, second.created_at);

        let edges = g.get_edges(&EdgeQuery::outgoing(&acct, EDGE_OWNS_ADDRESS)).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert!(edges[0].dst.id.same_entity(&addr));
        assert_eq!(edges[0].dst.rc.get("addr_type").map(String::as_str), Some("eth"));
    }

    #[tokio::test]
    async fn incoming_and_outgoing_queries() {
        let (_dir, clock, g) = graph();
        let a1 = Urn::random(UrnKind::Account);
        let a2 = Urn::random(UrnKind::Account);
        let group = Urn::random(UrnKind::IdentityGroup);

        g.make_edge(&a1, EDGE_MEMBER_OF_GROUP, &group).await.unwrap();
        clock.advance(Duration::from_millis(10));
        g.make_edge(&a2, EDGE_MEMBER_OF_GROUP, &group).await.unwrap();

        let members = g.get_edges(&EdgeQuery::incoming(&group, EDGE_MEMBER_OF_GROUP)).await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members[0].src.id.same_entity(&a1));
        assert!(members[1].src.id.same_entity(&a2));

        let groups = g.get_edges(&EdgeQuery::outgoing(&a2, EDGE_MEMBER_OF_GROUP)).await.unwrap();
        assert_eq!(groups.len(), 1);

        let none = g.get_edges(&EdgeQuery::outgoing(&a2, EDGE_OWNS_ADDRESS)).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn query_without_endpoint_is_rejected() {
        let (_dir, _clock, g) = graph();
        let err = g.get_edges(&EdgeQuery::default()).await.unwrap_err();
        assert!(matches!(err, EdgeError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn component_filters_and_node_updates() {
        let (_dir, _clock, g) = graph();
        let acct = Urn::random(UrnKind::Account);
        let eth = Urn::address(AddressType::Eth, "0x1");
        let mail = Urn::address(AddressType::Email, "a@b.c");
        g.make_edge(&acct, EDGE_OWNS_ADDRESS, &eth).await.unwrap();
        g.make_edge(&acct, EDGE_OWNS_ADDRESS, &mail).await.unwrap();

        let mut dst = NodeFilter::default();
        dst.rc.insert("node_type".into(), "email".into());
        let query = EdgeQuery {
            src: Some(NodeFilter::id(&acct)),
            tag: Some(EDGE_OWNS_ADDRESS.into()),
            dst: Some(dst),
        };
        let edges = g.get_edges(&query).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert!(edges[0].dst.id.same_entity(&mail));

        g.update_node(&eth.clone().with_q(QC_ALIAS, "vault")).await.unwrap();
        let edges = g
            .get_edges(&EdgeQuery::between(&acct, EDGE_OWNS_ADDRESS, &eth))
            .await
            .unwrap();
        assert_eq!(edges[0].dst.qc.get(QC_ALIAS).map(String::as_str), Some("vault"));
        // Routing components survive a q-only update.
        assert_eq!(edges[0].dst.rc.get("addr_type").map(String::as_str), Some("eth"));
    }

    #[tokio::test]
    async fn remove_edge_reports_presence() {
        let (_dir, _clock, g) = graph();
        let acct = Urn::random(UrnKind::Account);
        let addr = Urn::address(AddressType::Eth, "0x2");
        g.make_edge(&acct, EDGE_OWNS_ADDRESS, &addr).await.unwrap();

        assert!(g.remove_edge(&acct, EDGE_OWNS_ADDRESS, &addr).await.unwrap());
        assert!(!g.remove_edge(&acct, EDGE_OWNS_ADDRESS, &addr).await.unwrap());
        assert!(g
            .get_edges(&EdgeQuery::incoming(&addr, EDGE_OWNS_ADDRESS))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn delete_node_removes_incident_edges() {
        let (_dir, _clock, g) = graph();
        let acct = Urn::random(UrnKind::Account);
        let other = Urn::random(UrnKind::Account);
        let addr = Urn::address(AddressType::Eth, "0x3");
        let group = Urn::random(UrnKind::IdentityGroup);
        g.make_edge(&acct, EDGE_OWNS_ADDRESS, &addr).await.unwrap();
        g.make_edge(&acct, EDGE_MEMBER_OF_GROUP, &group).await.unwrap();
        g.make_edge(&other, EDGE_MEMBER_OF_GROUP, &group).await.unwrap();

        assert_eq!(g.delete_node(&group).await.unwrap(), 2);
        assert!(g
            .get_edges(&EdgeQuery::outgoing(&acct, EDGE_MEMBER_OF_GROUP))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            g.get_edges(&EdgeQuery::outgoing(&acct, EDGE_OWNS_ADDRESS))
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
