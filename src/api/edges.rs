// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Edge graph endpoints for sibling instances.
//!
//! Guarded by the shared service token; `HttpEdgeClient` is the only
//! intended caller, so response bodies follow what it decodes.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{
    auth::ServiceAuth,
    edges::{DeleteNodeResponse, Edge, EdgeQuery, EdgeTriple, NodeRequest, RemoveEdgeResponse},
    error::ApiError,
    state::AppState,
};

/// Create an edge (idempotent).
#[utoipa::path(
    post,
    path = "/v1/edges",
    tag = "Edges",
    security(("service_token" = [])),
    request_body = EdgeTriple,
    responses(
        (status = 200, description = "The stored edge", body = Edge),
        (status = 403, description = "Service token rejected")
    )
)]
pub async fn make_edge(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Json(triple): Json<EdgeTriple>,
) -> Result<Json<Edge>, ApiError> {
    let edge = state
        .edges
        .make_edge(&triple.src, &triple.tag, &triple.dst)
        .await?;
    Ok(Json(edge))
}

#[utoipa::path(
    post,
    path = "/v1/edges/query",
    tag = "Edges",
    security(("service_token" = [])),
    request_body = EdgeQuery,
    responses(
        (status = 200, description = "Matching edges, oldest first", body = Vec<Edge>),
        (status = 400, description = "Query names no endpoint id"),
        (status = 403, description = "Service token rejected")
    )
)]
pub async fn get_edges(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Json(query): Json<EdgeQuery>,
) -> Result<Json<Vec<Edge>>, ApiError> {
    Ok(Json(state.edges.get_edges(&query).await?))
}

#[utoipa::path(
    post,
    path = "/v1/edges/remove",
    tag = "Edges",
    security(("service_token" = [])),
    request_body = EdgeTriple,
    responses(
        (status = 200, description = "Whether an edge was removed", body = RemoveEdgeResponse),
        (status = 403, description = "Service token rejected")
    )
)]
pub async fn remove_edge(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Json(triple): Json<EdgeTriple>,
) -> Result<Json<RemoveEdgeResponse>, ApiError> {
    let removed = state
        .edges
        .remove_edge(&triple.src, &triple.tag, &triple.dst)
        .await?;
    Ok(Json(RemoveEdgeResponse { removed }))
}

/// Merge URN components into a node record.
#[utoipa::path(
    post,
    path = "/v1/edges/nodes",
    tag = "Edges",
    security(("service_token" = [])),
    request_body = NodeRequest,
    responses(
        (status = 200, description = "Node updated"),
        (status = 403, description = "Service token rejected")
    )
)]
pub async fn update_node(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Json(request): Json<NodeRequest>,
) -> Result<Json<Value>, ApiError> {
    state.edges.update_node(&request.urn).await?;
    Ok(Json(json!({ "updated": true })))
}

/// Remove a node and every edge touching it.
#[utoipa::path(
    post,
    path = "/v1/edges/nodes/delete",
    tag = "Edges",
    security(("service_token" = [])),
    request_body = NodeRequest,
    responses(
        (status = 200, description = "Node deleted", body = DeleteNodeResponse),
        (status = 403, description = "Service token rejected")
    )
)]
pub async fn delete_node(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Json(request): Json<NodeRequest>,
) -> Result<Json<DeleteNodeResponse>, ApiError> {
    let removed_edges = state.edges.delete_node(&request.urn).await?;
    Ok(Json(DeleteNodeResponse { removed_edges }))
}
