// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Edge Graph Service
//!
//! Typed, directed edges `(src, tag, dst)` between entity URNs. The graph is
//! the only authority for "who owns / belongs to whom"; entities keep at most
//! a direct owner back-reference.
//!
//! Two implementations of [`EdgeService`] exist:
//!
//! - [`store::EdgeStore`]: embedded redb graph, used when this instance
//!   serves the graph itself.
//! - [`client::HttpEdgeClient`]: talks to the `/v1/edges` routes of another
//!   instance.
//!
//! `make_edge` is idempotent: re-creating an existing triple keeps the
//! original edge and its creation timestamp.

pub mod client;
pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::urn::Urn;

pub use client::HttpEdgeClient;
pub use store::{EdgeStore, EdgeStoreError};

/// Account → Address ownership.
pub const EDGE_OWNS_ADDRESS: &str = "owns/address";
/// Account → Identity group membership.
pub const EDGE_MEMBER_OF_GROUP: &str = "member_of_group";

// =============================================================================
// Graph types
// =============================================================================

/// An edge endpoint: the base URN plus the components last recorded for it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct Node {
    #[schema(value_type = String)]
    pub id: Urn,
    #[serde(default)]
    pub rc: BTreeMap<String, String>,
    #[serde(default)]
    pub qc: BTreeMap<String, String>,
}

impl Node {
    /// The node URN with its recorded components re-attached.
    pub fn urn(&self) -> Urn {
        let mut urn = self.id.base();
        for (k, v) in &self.rc {
            urn = urn.with_r(k, v);
        }
        for (k, v) in &self.qc {
            urn = urn.with_q(k, v);
        }
        urn
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub src: Node,
    pub tag: String,
    pub dst: Node,
    pub created_at: i64,
}

/// Matches a node by id and/or component values. Every given component
/// must be present with an equal value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NodeFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub id: Option<Urn>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rc: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub qc: BTreeMap<String, String>,
}

impl NodeFilter {
    pub fn id(urn: &Urn) -> Self {
        Self {
            id: Some(urn.base()),
            ..Default::default()
        }
    }

    pub fn matches(&self, node: &Node) -> bool {
        if let Some(id) = &self.id {
            if !id.same_entity(&node.id) {
                return false;
            }
        }
        self.rc.iter().all(|(k, v)| node.rc.get(k) == Some(v))
            && self.qc.iter().all(|(k, v)| node.qc.get(k) == Some(v))
    }
}

/// Edge lookup. At least one endpoint id must be given.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct EdgeQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<NodeFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<NodeFilter>,
}

impl EdgeQuery {
    /// Edges leaving `src` with `tag`.
    pub fn outgoing(src: &Urn, tag: &str) -> Self {
        Self {
            src: Some(NodeFilter::id(src)),
            tag: Some(tag.to_string()),
            dst: None,
        }
    }

    /// Edges arriving at `dst` with `tag`.
    pub fn incoming(dst: &Urn, tag: &str) -> Self {
        Self {
            src: None,
            tag: Some(tag.to_string()),
            dst: Some(NodeFilter::id(dst)),
        }
    }

    pub fn between(src: &Urn, tag: &str, dst: &Urn) -> Self {
        Self {
            src: Some(NodeFilter::id(src)),
            tag: Some(tag.to_string()),
            dst: Some(NodeFilter::id(dst)),
        }
    }

    pub fn matches(&self, edge: &Edge) -> bool {
        self.tag.as_ref().is_none_or(|t| *t == edge.tag)
            && self.src.as_ref().is_none_or(|f| f.matches(&edge.src))
            && self.dst.as_ref().is_none_or(|f| f.matches(&edge.dst))
    }
}

// =============================================================================
// Wire types (shared by the HTTP routes and the remote client)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EdgeTriple {
    #[schema(value_type = String)]
    pub src: Urn,
    pub tag: String,
    #[schema(value_type = String)]
    pub dst: Urn,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RemoveEdgeResponse {
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeRequest {
    #[schema(value_type = String)]
    pub urn: Urn,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNodeResponse {
    pub removed_edges: usize,
}

// =============================================================================
// Service trait
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    #[error("edge storage error: {0}")]
    Store(#[from] EdgeStoreError),

    #[error("edge service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("edge service returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("invalid edge query: {0}")]
    InvalidQuery(String),
}

pub type EdgeResult<T> = Result<T, EdgeError>;

#[async_trait]
pub trait EdgeService: Send + Sync {
    /// Create `(src, tag, dst)` unless it already exists. Components on
    /// either URN are merged into the stored node records.
    async fn make_edge(&self, src: &Urn, tag: &str, dst: &Urn) -> EdgeResult<Edge>;

    /// Edges matching `query`, oldest first.
    async fn get_edges(&self, query: &EdgeQuery) -> EdgeResult<Vec<Edge>>;

    /// Returns whether an edge was removed.
    async fn remove_edge(&self, src: &Urn, tag: &str, dst: &Urn) -> EdgeResult<bool>;

    /// Merge the URN's components into its node record.
    async fn update_node(&self, urn: &Urn) -> EdgeResult<()>;

    /// Remove the node and every edge touching it. Returns the number of
    /// edges removed.
    async fn delete_node(&self, id: &Urn) -> EdgeResult<usize>;
}

pub type SharedEdges = Arc<dyn EdgeService>;
