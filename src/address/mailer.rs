// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Delivery of email one-time codes.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum MailerError {
    #[error("email delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait CodeMailer: Send + Sync {
    async fn send_code(&self, to: &str, code: &str, state: &str) -> Result<(), MailerError>;
}

pub type SharedMailer = Arc<dyn CodeMailer>;

#[derive(Serialize)]
struct SendCodeRequest<'a> {
    to: &'a str,
    code: &'a str,
    state: &'a str,
}

/// Posts `{to, code, state}` to an email delivery service.
pub struct HttpCodeMailer {
    url: String,
    http: Client,
}

impl HttpCodeMailer {
    pub fn new(url: impl Into<String>, http: Client) -> Self {
        Self {
            url: url.into(),
            http,
        }
    }
}

#[async_trait]
impl CodeMailer for HttpCodeMailer {
    async fn send_code(&self, to: &str, code: &str, state: &str) -> Result<(), MailerError> {
        let response = self
            .http
            .post(&self.url)
            .json(&SendCodeRequest { to, code, state })
            .send()
            .await
            .map_err(|e| MailerError::Delivery(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(MailerError::Delivery(format!(
                "delivery service returned {}",
                response.status()
            )));
        }
        info!("Email code handed to delivery service");
        Ok(())
    }
}

/// Used when no delivery service is configured.
pub struct DisabledMailer;

#[async_trait]
impl CodeMailer for DisabledMailer {
    async fn send_code(&self, _to: &str, _code: &str, _state: &str) -> Result<(), MailerError> {
        warn!("EMAIL_SERVICE_URL not set; email code was not delivered");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::{http::StatusCode, routing::post, Json, Router};

    /// Captures codes instead of sending them.
    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        pub sent: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingMailer {
        pub(crate) fn last_code(&self) -> Option<String> {
            self.sent.lock().unwrap().last().map(|(_, code, _)| code.clone())
        }
    }

    #[async_trait]
    impl CodeMailer for RecordingMailer {
        async fn send_code(&self, to: &str, code: &str, state: &str) -> Result<(), MailerError> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), code.to_string(), state.to_string()));
            Ok(())
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn http_mailer_posts_payload() {
        let received = Arc::new(Mutex::new(None::<serde_json::Value>));
        let sink = received.clone();
        let router = Router::new().route(
            "/send",
            post(move |Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    *sink.lock().unwrap() = Some(body);
                    StatusCode::ACCEPTED
                }
            }),
        );
        let base = serve(router).await;

        let mailer = HttpCodeMailer::new(format!("{base}/send"), Client::new());
        mailer.send_code("a@b.c", "ABC123", "s1").await.unwrap();

        let body = received.lock().unwrap().clone().unwrap();
        assert_eq!(body["to"], "a@b.c");
        assert_eq!(body["code"], "ABC123");
        assert_eq!(body["state"], "s1");
    }

    #[tokio::test]
    async fn http_mailer_reports_failure_status() {
        let router = Router::new().route("/send", post(|| async { StatusCode::BAD_GATEWAY }));
        let base = serve(router).await;
        let mailer = HttpCodeMailer::new(format!("{base}/send"), Client::new());
        assert!(mailer.send_code("a@b.c", "X", "s").await.is_err());
    }
}
