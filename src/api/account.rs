// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account API endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use super::parse_urn;
use crate::{
    account::{parse_account, AccountProfile, Profile},
    auth::{Auth, OptionalAuth},
    error::ApiError,
    state::AppState,
    urn::{Urn, UrnKind},
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolveIdentityRequest {
    /// Proof token from a successful address verification.
    pub proof_token: String,
    /// Mint a new account even when a bearer credential is present.
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResolveIdentityResponse {
    #[serde(rename = "accountURN")]
    #[schema(value_type = String)]
    pub account_urn: Urn,
    /// `false` when this call linked the address to an account.
    pub existing: bool,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct AccountQuery {
    #[serde(rename = "accountURN")]
    pub account_urn: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AddressRequest {
    #[serde(rename = "addressURN")]
    pub address_urn: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GroupSummary {
    #[serde(rename = "groupURN")]
    #[schema(value_type = String)]
    pub group_urn: Urn,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GroupListResponse {
    pub groups: Vec<GroupSummary>,
}

/// Resolve the account owning a proven address, creating one on first use.
///
/// An unowned address is linked to the bearer credential's account when one
/// is presented (unless `force` is set), otherwise to a new account.
#[utoipa::path(
    post,
    path = "/v1/account/resolve",
    tag = "Account",
    security((), ("bearer_auth" = [])),
    request_body = ResolveIdentityRequest,
    responses(
        (status = 200, description = "Account resolved", body = ResolveIdentityResponse),
        (status = 401, description = "Proof token invalid or expired"),
        (status = 404, description = "Address not found")
    )
)]
pub async fn resolve_identity(
    OptionalAuth(caller): OptionalAuth,
    State(state): State<AppState>,
    Json(request): Json<ResolveIdentityRequest>,
) -> Result<Json<ResolveIdentityResponse>, ApiError> {
    let address = state.proofs.verify(&request.proof_token)?;
    let resolution = state
        .resolver
        .resolve_or_create(
            &address,
            caller.as_ref().map(|c| &c.account),
            request.force,
        )
        .await?;

    info!(
        address_urn = %address,
        account_urn = %resolution.account,
        existing = resolution.existing,
        client_id = request.client_id.as_deref().unwrap_or("-"),
        "Identity resolved"
    );
    Ok(Json(ResolveIdentityResponse {
        account_urn: resolution.account,
        existing: resolution.existing,
    }))
}

/// Account profile with its linked addresses.
#[utoipa::path(
    get,
    path = "/v1/account/profile",
    tag = "Account",
    params(AccountQuery),
    responses(
        (status = 200, description = "Account profile", body = AccountProfile),
        (status = 400, description = "Invalid account URN")
    )
)]
pub async fn get_profile(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<AccountProfile>, ApiError> {
    let account = parse_account(&query.account_urn)?;
    Ok(Json(state.accounts.get_profile(&account).await?))
}

/// Update the caller's profile. Omitted fields are kept.
#[utoipa::path(
    put,
    path = "/v1/account/profile",
    tag = "Account",
    security(("bearer_auth" = [])),
    request_body = Profile,
    responses(
        (status = 200, description = "Stored profile", body = Profile),
        (status = 400, description = "Primary address not linked"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn set_profile(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Json(profile): Json<Profile>,
) -> Result<Json<Profile>, ApiError> {
    Ok(Json(
        state.accounts.set_profile(&caller.account, profile).await?,
    ))
}

#[utoipa::path(
    put,
    path = "/v1/account/primary-address",
    tag = "Account",
    security(("bearer_auth" = [])),
    request_body = AddressRequest,
    responses(
        (status = 204, description = "Primary address set"),
        (status = 400, description = "Address not linked to the caller")
    )
)]
pub async fn set_primary_address(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Json(request): Json<AddressRequest>,
) -> Result<StatusCode, ApiError> {
    let address = parse_urn(&request.address_urn, UrnKind::Address, "addressURN")?;
    state
        .accounts
        .set_primary_address(&caller.account, &address)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Detach an address from the caller's account.
#[utoipa::path(
    post,
    path = "/v1/account/unlink",
    tag = "Account",
    security(("bearer_auth" = [])),
    request_body = AddressRequest,
    responses(
        (status = 204, description = "Address unlinked"),
        (status = 400, description = "Address not linked to the caller"),
        (status = 409, description = "Primary or last address")
    )
)]
pub async fn unlink_address(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Json(request): Json<AddressRequest>,
) -> Result<StatusCode, ApiError> {
    let address = parse_urn(&request.address_urn, UrnKind::Address, "addressURN")?;
    state
        .accounts
        .unlink_address(&caller.account, &address, state.resolver.outbox())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/account/groups",
    tag = "Account",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Groups the caller belongs to", body = GroupListResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_groups(
    Auth(caller): Auth,
    State(state): State<AppState>,
) -> Result<Json<GroupListResponse>, ApiError> {
    let mut groups = Vec::new();
    for group in state.accounts.list_groups(&caller.account).await? {
        let name = state.groups.name(&group).await?;
        groups.push(GroupSummary {
            group_urn: group.base(),
            name,
        });
    }
    Ok(Json(GroupListResponse { groups }))
}

/// Delete the caller's account, its addresses and its memberships.
#[utoipa::path(
    delete,
    path = "/v1/account",
    tag = "Account",
    security(("bearer_auth" = [])),
    responses(
        (status = 204, description = "Account deleted"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn delete_account(
    Auth(caller): Auth,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state
        .accounts
        .delete(&caller.account, &state.groups, state.resolver.outbox())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::Method;
    use serde_json::{json, Value};

    use crate::address::crypto::tests::{personal_sign, wallet};
    use crate::api::tests::TestApp;
    use crate::auth::extractor::tests::dev_token;
    use crate::models::AddressType;

    /// Prove a fresh wallet over HTTP; returns `(address urn, proof token)`.
    async fn prove_wallet(app: &TestApp) -> (Urn, String) {
        let (key, address) = wallet();
        let (_, issued) = app
            .call(
                Method::POST,
                "/v1/address/nonce",
                None,
                Some(json!({
                    "address": address,
                    "template": "Sign in: {{nonce}}",
                    "redirectUri": "https://app.example.com/cb",
                    "state": "s"
                })),
            )
            .await;
        let nonce = issued["nonce"].as_str().unwrap().to_string();
        let signature = personal_sign(&key, &format!("Sign in: {nonce}"));
        let (status, verified) = app
            .call(
                Method::POST,
                "/v1/address/nonce/verify",
                None,
                Some(json!({"address": address, "nonce": nonce, "signature": signature})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{verified}");
        (
            Urn::address(AddressType::Eth, &address),
            verified["proofToken"].as_str().unwrap().to_string(),
        )
    }

    async fn resolve(app: &TestApp, proof: &str, bearer: Option<&str>) -> (StatusCode, Value) {
        app.call(
            Method::POST,
            "/v1/account/resolve",
            bearer,
            Some(json!({"proofToken": proof})),
        )
        .await
    }

    #[tokio::test]
    async fn sign_in_then_resolve_twice() {
        let app = TestApp::new();
        let (_, proof) = prove_wallet(&app).await;

        let (status, first) = resolve(&app, &proof, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["existing"], false);

        let (_, second) = resolve(&app, &proof, None).await;
        assert_eq!(second["existing"], true);
        assert_eq!(first["accountURN"], second["accountURN"]);
    }

    #[tokio::test]
    async fn bearer_account_adopts_new_address() {
        let app = TestApp::new();
        let account = Urn::random(UrnKind::Account);
        let token = dev_token(&account.to_string());

        let (_, proof) = prove_wallet(&app).await;
        let (_, body) = resolve(&app, &proof, Some(&token)).await;
        assert_eq!(body["accountURN"], account.to_string());

        // force mints a separate account
        let (_, other) = prove_wallet(&app).await;
        let (_, body) = app
            .call(
                Method::POST,
                "/v1/account/resolve",
                Some(&token),
                Some(json!({"proofToken": other, "force": true})),
            )
            .await;
        assert_ne!(body["accountURN"], account.to_string());
        assert_eq!(body["existing"], false);
    }

    #[tokio::test]
    async fn forged_proof_is_unauthorized() {
        let app = TestApp::new();
        let (status, _) = resolve(&app, "not-a-token", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn profile_defaults_primary_and_guards_unlink() {
        let app = TestApp::new();
        let account = Urn::random(UrnKind::Account);
        let token = dev_token(&account.to_string());

        let (first, proof) = prove_wallet(&app).await;
        resolve(&app, &proof, Some(&token)).await;

        let uri = format!(
            "/v1/account/profile?accountURN={}",
            crate::api::address::tests::urlencode(&account.to_string())
        );
        let (status, profile) = app.call(Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["addresses"].as_array().unwrap().len(), 1);
        assert!(profile["primaryAddressURN"].is_string());

        let unlink = json!({"addressURN": first.to_string()});
        let (status, _) = app
            .call(Method::POST, "/v1/account/unlink", Some(&token), Some(unlink.clone()))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (second, proof) = prove_wallet(&app).await;
        resolve(&app, &proof, Some(&token)).await;
        let (status, _) = app
            .call(
                Method::PUT,
                "/v1/account/primary-address",
                Some(&token),
                Some(json!({"addressURN": second.to_string()})),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .call(Method::POST, "/v1/account/unlink", Some(&token), Some(unlink))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, profile) = app.call(Method::GET, &uri, None, None).await;
        assert_eq!(profile["addresses"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_profile_merges_fields() {
        let app = TestApp::new();
        let account = Urn::random(UrnKind::Account);
        let token = dev_token(&account.to_string());

        let (status, body) = app
            .call(
                Method::PUT,
                "/v1/account/profile",
                Some(&token),
                Some(json!({"displayName": "Ada"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["displayName"], "Ada");

        let (_, body) = app
            .call(
                Method::PUT,
                "/v1/account/profile",
                Some(&token),
                Some(json!({"pfp": {"image": "https://img.example/a.png"}})),
            )
            .await;
        assert_eq!(body["displayName"], "Ada");
        assert_eq!(body["pfp"]["isToken"], false);

        let (status, _) = app
            .call(Method::PUT, "/v1/account/profile", None, Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn deleted_account_loses_its_addresses() {
        let app = TestApp::new();
        let account = Urn::random(UrnKind::Account);
        let token = dev_token(&account.to_string());
        let (_, proof) = prove_wallet(&app).await;
        resolve(&app, &proof, Some(&token)).await;

        let (status, _) = app
            .call(Method::DELETE, "/v1/account", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // The address entity is gone, so its proof resolves nothing.
        let (status, _) = resolve(&app, &proof, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
