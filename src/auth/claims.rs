// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer credential claims and the authenticated account.

use serde::Deserialize;

use super::error::AuthError;
use crate::urn::{Urn, UrnKind};

/// Claims read from a bearer credential. `sub` is an account URN.
#[derive(Debug, Clone, Deserialize)]
pub struct BearerClaims {
    pub sub: String,
    #[serde(default)]
    pub exp: i64,
    #[serde(default)]
    pub iss: String,
    /// Session ID
    #[serde(default)]
    pub sid: Option<String>,
    /// Validated by jsonwebtoken, not read directly
    #[serde(default)]
    #[allow(dead_code)]
    pub aud: Option<serde_json::Value>,
}

/// The caller behind a verified bearer credential.
#[derive(Debug, Clone)]
pub struct AuthenticatedAccount {
    pub account: Urn,
    pub session_id: Option<String>,
    pub issuer: String,
    pub expires_at: i64,
}

impl TryFrom<BearerClaims> for AuthenticatedAccount {
    type Error = AuthError;

    fn try_from(claims: BearerClaims) -> Result<Self, Self::Error> {
        let account = Urn::parse(&claims.sub).map_err(|_| AuthError::MalformedToken)?;
        if account.kind() != UrnKind::Account {
            return Err(AuthError::MalformedToken);
        }
        Ok(Self {
            account: account.base(),
            session_id: claims.sid,
            issuer: claims.iss,
            expires_at: claims.exp,
        })
    }
}
