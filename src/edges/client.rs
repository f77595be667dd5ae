// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote [`EdgeService`] over the `/v1/edges` routes of another instance.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{
    DeleteNodeResponse, Edge, EdgeError, EdgeQuery, EdgeResult, EdgeService, EdgeTriple,
    NodeRequest, RemoveEdgeResponse,
};
use crate::urn::Urn;

#[derive(Debug, Clone)]
pub struct HttpEdgeClient {
    base_url: String,
    service_token: Option<String>,
    http: Client,
}

impl HttpEdgeClient {
    pub fn new(base_url: impl Into<String>, service_token: Option<String>, http: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_token,
            http,
        }
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> EdgeResult<T> {
        let mut request = self.http.post(format!("{}{}", self.base_url, path)).json(body);
        if let Some(token) = &self.service_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> EdgeResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            return Err(EdgeError::Remote {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl EdgeService for HttpEdgeClient {
    async fn make_edge(&self, src: &Urn, tag: &str, dst: &Urn) -> EdgeResult<Edge> {
        let body = EdgeTriple {
            src: src.clone(),
            tag: tag.to_string(),
            dst: dst.clone(),
        };
        self.post("/v1/edges", &body).await
    }

    async fn get_edges(&self, query: &EdgeQuery) -> EdgeResult<Vec<Edge>> {
        self.post("/v1/edges/query", query).await
    }

    async fn remove_edge(&self, src: &Urn, tag: &str, dst: &Urn) -> EdgeResult<bool> {
        let body = EdgeTriple {
            src: src.clone(),
            tag: tag.to_string(),
            dst: dst.clone(),
        };
        let response: RemoveEdgeResponse = self.post("/v1/edges/remove", &body).await?;
        Ok(response.removed)
    }

    async fn update_node(&self, urn: &Urn) -> EdgeResult<()> {
        let _: Value = self
            .post("/v1/edges/nodes", &NodeRequest { urn: urn.clone() })
            .await?;
        Ok(())
    }

    async fn delete_node(&self, id: &Urn) -> EdgeResult<usize> {
        let response: DeleteNodeResponse = self
            .post("/v1/edges/nodes/delete", &NodeRequest { urn: id.clone() })
            .await?;
        Ok(response.removed_edges)
    }
}
