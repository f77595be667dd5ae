// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for bearer credentials and the edge-service token.
//!
//! ```rust,ignore
//! async fn handler(Auth(caller): Auth) -> impl IntoResponse {
//!     // caller.account is the account URN from the credential's `sub`
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, decode_header, Validation};
use subtle::ConstantTimeEq;

use super::claims::{AuthenticatedAccount, BearerClaims};
use super::error::AuthError;
use crate::state::{AppState, AuthConfig};

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Requires a valid bearer credential.
///
/// ## Authentication Modes
///
/// - **Production** (`JWKS_URL` set): signature, expiry, issuer and
///   audience are verified against the key set.
/// - **Development** (no `JWKS_URL`, `dev` feature or tests only): the
///   token is decoded without signature verification.
pub struct Auth(pub AuthenticatedAccount);

/// Bearer credential if one was sent; a malformed one is still rejected.
pub struct OptionalAuth(pub Option<AuthenticatedAccount>);

/// Guards the edge routes: `Authorization: Bearer <EDGES_SERVICE_TOKEN>`.
pub struct ServiceAuth;

fn bearer_token(parts: &Parts) -> Result<Option<&str>, AuthError> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = header.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
    value
        .strip_prefix("Bearer ")
        .map(Some)
        .ok_or(AuthError::InvalidAuthHeader)
}

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?.ok_or(AuthError::MissingAuthHeader)?;
        Ok(Auth(verify_jwt(token, &state.auth_config).await?))
    }
}

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match bearer_token(parts)? {
            Some(token) => Ok(OptionalAuth(Some(
                verify_jwt(token, &state.auth_config).await?,
            ))),
            None => Ok(OptionalAuth(None)),
        }
    }
}

impl FromRequestParts<AppState> for ServiceAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.edges_service_token.as_deref() else {
            return Err(AuthError::ServiceTokenRejected);
        };
        let presented = bearer_token(parts)?.ok_or(AuthError::ServiceTokenRejected)?;
        if !bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
            return Err(AuthError::ServiceTokenRejected);
        }
        Ok(ServiceAuth)
    }
}

async fn verify_jwt(token: &str, auth_config: &AuthConfig) -> Result<AuthenticatedAccount, AuthError> {
    match &auth_config.jwks {
        Some(jwks) => verify_jwt_production(token, jwks, auth_config).await,
        None => verify_jwt_development(token),
    }
}

async fn verify_jwt_production(
    token: &str,
    jwks: &super::JwksManager,
    auth_config: &AuthConfig,
) -> Result<AuthenticatedAccount, AuthError> {
    let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;
    let (decoding_key, algorithm) = jwks.key_for(&header).await?;

    let mut validation = Validation::new(algorithm);
    validation.leeway = CLOCK_SKEW_LEEWAY;
    if let Some(issuer) = &auth_config.issuer {
        validation.set_issuer(&[issuer]);
    }
    match &auth_config.audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }

    let claims = decode::<BearerClaims>(token, &decoding_key, &validation)
        .map_err(|e| AuthError::from_jwt(&e))?
        .claims;
    AuthenticatedAccount::try_from(claims)
}

/// Development decode (no signature check).
#[cfg(any(test, feature = "dev"))]
fn verify_jwt_development(token: &str) -> Result<AuthenticatedAccount, AuthError> {
    let token_data = jsonwebtoken::dangerous::insecure_decode::<BearerClaims>(token)
        .map_err(|_| AuthError::MalformedToken)?;
    let claims = token_data.claims;

    if claims.exp > 0 {
        let now = chrono::Utc::now().timestamp();
        if claims.exp + (CLOCK_SKEW_LEEWAY as i64) < now {
            return Err(AuthError::TokenExpired);
        }
    }
    AuthenticatedAccount::try_from(claims)
}

/// Without the `dev` feature an unconfigured JWKS rejects every credential.
#[cfg(not(any(test, feature = "dev")))]
fn verify_jwt_development(_token: &str) -> Result<AuthenticatedAccount, AuthError> {
    Err(AuthError::InternalError(
        "JWKS_URL is not configured".to_string(),
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    /// Unsigned token accepted by the development decoder.
    pub(crate) fn dev_token(sub: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let exp = chrono::Utc::now().timestamp() + 3600;
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::json!({"sub": sub, "exp": exp, "iss": "dev"})
                .to_string()
                .as_bytes(),
        );
        format!("{header}.{payload}.c2ln")
    }

    #[test]
    fn development_decode_reads_account_subject() {
        let user = verify_jwt_development(&dev_token("urn:rollupid:account/abc")).unwrap();
        assert_eq!(user.account.entity_id(), "account/abc");
    }

    #[test]
    fn development_decode_rejects_expired_and_garbage() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"urn:rollupid:account/a","exp":1000}"#);
        let expired = format!("{header}.{payload}.c2ln");
        assert!(matches!(
            verify_jwt_development(&expired),
            Err(AuthError::TokenExpired)
        ));
        assert!(verify_jwt_development("garbage").is_err());
    }
}
