// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # OAuth Token Manager
//!
//! OAuth-typed address entities keep the provider tokens under `data`.
//! Access tokens are refreshed lazily: a read finds the stored token stale
//! (`timestamp + expires_in * 1000 <= now`) and exchanges the refresh token
//! at the provider's token endpoint before answering.
//!
//! Every upstream failure (network error, non-2xx, unexpected body) is
//! logged and downgraded to `None`; callers render a disconnected profile
//! instead of failing. The caller holds the entity handle across the
//! upstream calls, so concurrent refreshes of one address are serialized.

pub mod providers;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::{AddressNode, KEY_OAUTH_DATA};
use crate::auth::{AuthError, JwksManager};
use crate::clock::SharedClock;
use crate::error::IdentityError;
use crate::models::AddressType;
use crate::storage::{Entity, EntityStoreError};

pub use providers::{OAuthProviders, ProviderConfig, ProviderKind, APPLE_ISSUER, APPLE_JWKS_URL};

/// Longest access-token lifetime accepted from a client (one year).
pub const MAX_EXPIRES_IN_SECS: i64 = 365 * 24 * 60 * 60;

/// Expiry instant in milliseconds; `None` when it does not fit, which
/// callers treat as already expired.
fn expires_at(timestamp: i64, expires_in: i64) -> Option<i64> {
    expires_in.checked_mul(1000)?.checked_add(timestamp)
}

/// Token-endpoint metadata kept next to the tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExtraParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Stored OAuth state of one provider account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OAuthData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Milliseconds; when the current access token was obtained.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub extra_params: ExtraParams,
    /// Raw provider user-info document.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub profile: Value,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("{0} is not an OAuth address type")]
    NotOAuth(AddressType),

    #[error("provider credentials are incomplete: {0}")]
    MissingCredential(&'static str),

    #[error("provider account id could not be determined")]
    MissingSubject,

    #[error("provider account does not match the submitted profile")]
    SubjectMismatch,

    #[error("provider rejected the credential: {0}")]
    Upstream(String),

    #[error("identity token rejected: {0}")]
    IdToken(#[from] AuthError),
}

impl From<OAuthError> for IdentityError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::NotOAuth(_) | OAuthError::MissingCredential(_) => {
                IdentityError::BadRequest(err.to_string())
            }
            _ => IdentityError::Unauthorized("OAuth credential could not be verified".into()),
        }
    }
}

/// Result of checking freshly submitted tokens against the provider.
#[derive(Debug, Clone)]
pub struct VerifiedAccount {
    pub subject: String,
    pub profile: Value,
}

pub struct TokenManager {
    apple_jwks: JwksManager,
    http: Client,
    clock: SharedClock,
}

impl TokenManager {
    pub fn new(apple_jwks: JwksManager, http: Client, clock: SharedClock) -> Self {
        Self {
            apple_jwks,
            http,
            clock,
        }
    }

    pub fn data(&self, entity: &Entity<'_>) -> Result<Option<OAuthData>, EntityStoreError> {
        entity.get(KEY_OAUTH_DATA)
    }

    /// Store tokens received from a completed OAuth flow. The timestamp is
    /// stamped here so expiry is measured from the server's clock.
    pub fn store(&self, node: &AddressNode<'_>, mut data: OAuthData) -> Result<OAuthData, EntityStoreError> {
        data.timestamp = self.clock.now_ms();
        node.entity().put(KEY_OAUTH_DATA, &data)?;
        info!(address_urn = %node.urn(), "OAuth data stored");
        Ok(data)
    }

    /// Cached access token, or a refreshed one when stale.
    pub async fn get_access_token(
        &self,
        entity: &Entity<'_>,
        provider: &ProviderConfig,
    ) -> Option<String> {
        let data = self.load(entity)?;
        match (&data.access_token, data.extra_params.expires_in) {
            (Some(token), None) => return Some(token.clone()),
            (Some(token), Some(expires_in))
                if expires_at(data.timestamp, expires_in)
                    .is_some_and(|at| self.clock.now_ms() < at) =>
            {
                return Some(token.clone())
            }
            _ => {}
        }
        self.refresh_token(entity, provider).await
    }

    /// Exchange the stored refresh token. `None` means re-authentication
    /// is required.
    pub async fn refresh_token(
        &self,
        entity: &Entity<'_>,
        provider: &ProviderConfig,
    ) -> Option<String> {
        let mut data = self.load(entity)?;
        let Some(refresh_token) = data.refresh_token.clone() else {
            debug!(entity = %entity.id(), "No refresh token stored");
            return None;
        };
        let (Some(client_id), Some(client_secret)) = (&provider.client_id, &provider.client_secret)
        else {
            warn!(provider = ?provider.kind, "OAuth client credentials not configured; cannot refresh");
            return None;
        };

        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];
        params.extend(provider.kind.extra_refresh_params().iter().copied());

        let response = match self
            .http
            .post(&provider.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(provider = ?provider.kind, error = %e, "Token refresh request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(provider = ?provider.kind, status = %response.status(), "Token refresh rejected");
            return None;
        }
        let tokens: TokenResponse = match response.json().await {
            Ok(t) => t,
            Err(e) => {
                warn!(provider = ?provider.kind, error = %e, "Token refresh returned unexpected body");
                return None;
            }
        };

        data.access_token = Some(tokens.access_token.clone());
        if tokens.refresh_token.is_some() {
            data.refresh_token = tokens.refresh_token;
        }
        data.timestamp = self.clock.now_ms();
        data.extra_params.expires_in = tokens.expires_in.or(data.extra_params.expires_in);
        data.extra_params.token_type = tokens.token_type.or(data.extra_params.token_type);
        data.extra_params.scope = tokens.scope.or(data.extra_params.scope);
        data.extra_params.id_token = tokens.id_token.or(data.extra_params.id_token);

        if let Err(e) = entity.put(KEY_OAUTH_DATA, &data) {
            warn!(entity = %entity.id(), error = %e, "Failed to persist refreshed tokens");
        } else {
            info!(entity = %entity.id(), provider = ?provider.kind, "Access token refreshed");
        }
        Some(tokens.access_token)
    }

    /// Current user-info document. Apple has no user-info endpoint, so its
    /// stored profile is returned.
    pub async fn fetch_profile<T: DeserializeOwned>(
        &self,
        entity: &Entity<'_>,
        provider: &ProviderConfig,
    ) -> Option<T> {
        let Some(url) = provider.userinfo_url.as_deref() else {
            let data = self.load(entity)?;
            return serde_json::from_value(data.profile).ok();
        };
        let token = self.get_access_token(entity, provider).await?;
        match self.userinfo(provider, url, &token).await {
            Ok(raw) => serde_json::from_value(raw)
                .map_err(|e| warn!(provider = ?provider.kind, error = %e, "Profile shape mismatch"))
                .ok(),
            Err(e) => {
                warn!(entity = %entity.id(), error = %e, "Profile fetch failed");
                None
            }
        }
    }

    /// Check submitted tokens with the provider and return the account id
    /// they belong to. A profile submitted alongside must name the same id.
    pub async fn verify(
        &self,
        provider: &ProviderConfig,
        data: &OAuthData,
    ) -> Result<VerifiedAccount, OAuthError> {
        let claimed = provider.kind.subject(&data.profile);

        let verified = match provider.userinfo_url.as_deref() {
            None => {
                let id_token = data
                    .extra_params
                    .id_token
                    .as_deref()
                    .ok_or(OAuthError::MissingCredential("id_token"))?;
                let subject = self.verify_id_token(provider, id_token).await?;
                VerifiedAccount {
                    subject,
                    profile: data.profile.clone(),
                }
            }
            Some(url) => {
                let token = data
                    .access_token
                    .as_deref()
                    .ok_or(OAuthError::MissingCredential("accessToken"))?;
                let profile = self.userinfo(provider, url, token).await?;
                let subject = provider
                    .kind
                    .subject(&profile)
                    .ok_or(OAuthError::MissingSubject)?;
                VerifiedAccount { subject, profile }
            }
        };

        if claimed.is_some_and(|c| c != verified.subject) {
            return Err(OAuthError::SubjectMismatch);
        }
        Ok(verified)
    }

    fn load(&self, entity: &Entity<'_>) -> Option<OAuthData> {
        match self.data(entity) {
            Ok(data) => data,
            Err(e) => {
                warn!(entity = %entity.id(), error = %e, "Failed to read OAuth data");
                None
            }
        }
    }

    async fn userinfo(
        &self,
        provider: &ProviderConfig,
        url: &str,
        access_token: &str,
    ) -> Result<Value, OAuthError> {
        let mut request = self.http.get(url).bearer_auth(access_token);
        for (name, value) in provider.kind.headers() {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| OAuthError::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OAuthError::Upstream(format!(
                "user-info returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| OAuthError::Upstream(e.to_string()))
    }

    async fn verify_id_token(
        &self,
        provider: &ProviderConfig,
        id_token: &str,
    ) -> Result<String, OAuthError> {
        use jsonwebtoken::{decode, decode_header, Validation};

        let client_id = provider
            .client_id
            .as_deref()
            .ok_or(OAuthError::MissingCredential("client_id"))?;
        let header = decode_header(id_token).map_err(|e| AuthError::from_jwt(&e))?;
        let (key, algorithm) = self.apple_jwks.key_for(&header).await?;

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[APPLE_ISSUER]);
        validation.set_audience(&[client_id]);

        let claims = decode::<IdTokenClaims>(id_token, &key, &validation)
            .map_err(|e| AuthError::from_jwt(&e))?
            .claims;
        Ok(claims.sub)
    }
}
