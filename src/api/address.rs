// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Address API endpoints.
//!
//! Ownership proofs (signed nonce, email code, OAuth tokens, contract
//! wallet creation) answer with a short-lived proof token that
//! `POST /v1/account/resolve` accepts. Reads and writes of address state
//! that belong to an account require the owner's bearer credential.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use super::parse_urn;
use crate::{
    address::{
        contract,
        crypto::{Challenge, IssueNonce},
        oauth::{OAuthData, MAX_EXPIRES_IN_SECS},
        profile::address_profile,
        AddressNode,
    },
    auth::{Auth, AuthenticatedAccount},
    error::{ApiError, IdentityError},
    models::{classify, AddressProfile, AddressType, Classified, NodeType},
    state::AppState,
    urn::{normalize_address, Urn, UrnKind, QC_ALIAS},
};

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueNonceRequest {
    /// 0x-prefixed wallet address.
    pub address: String,
    /// Message to sign; must contain `{{nonce}}`.
    pub template: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: Vec<String>,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NonceResponse {
    pub nonce: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VerifyNonceRequest {
    pub address: String,
    pub nonce: String,
    /// 65-byte `personal_sign` signature, hex encoded.
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyNonceResponse {
    pub challenge: Challenge,
    #[serde(rename = "addressURN")]
    #[schema(value_type = String)]
    pub address_urn: Urn,
    pub proof_token: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GenerateOtpRequest {
    pub email: String,
    /// Client-chosen value the code is bound to.
    pub state: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GenerateOtpResponse {
    pub state: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub code: String,
    pub state: String,
}

/// `verified: false` covers every failure (wrong code, wrong state,
/// expired, nothing outstanding).
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpResponse {
    pub verified: bool,
    #[serde(rename = "addressURN", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub address_urn: Option<Urn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaskedEmailRequest {
    #[serde(rename = "addressURN")]
    pub address_urn: String,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaskedEmailResponse {
    pub masked_email: String,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct AddressQuery {
    #[serde(rename = "addressURN")]
    pub address_urn: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetOAuthDataRequest {
    /// Wire name of the provider address type (`"google"`, `"github"`, ...).
    pub address_type: String,
    pub data: OAuthData,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SetNicknameRequest {
    #[serde(rename = "addressURN")]
    pub address_urn: String,
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NicknameResponse {
    pub nickname: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ContractWalletRequest {
    #[serde(default)]
    pub nickname: Option<String>,
}

/// A proven address and the token that lets it be resolved.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProofResponse {
    #[serde(rename = "addressURN")]
    #[schema(value_type = String)]
    pub address_urn: Urn,
    pub proof_token: String,
}

fn require_owner(node: &AddressNode<'_>, caller: &AuthenticatedAccount) -> Result<(), ApiError> {
    match node.owner()? {
        Some(owner) if owner.same_entity(&caller.account) => Ok(()),
        _ => Err(ApiError::forbidden("address is not linked to this account")),
    }
}

// =============================================================================
// Crypto addresses
// =============================================================================

/// Issue a signing challenge for a wallet address.
#[utoipa::path(
    post,
    path = "/v1/address/nonce",
    tag = "Address",
    request_body = IssueNonceRequest,
    responses(
        (status = 200, description = "Nonce issued", body = NonceResponse),
        (status = 400, description = "Malformed address, template or redirect URI")
    )
)]
pub async fn issue_nonce(
    State(state): State<AppState>,
    Json(request): Json<IssueNonceRequest>,
) -> Result<Json<NonceResponse>, ApiError> {
    let urn = Urn::address(AddressType::Eth, &request.address);
    let node = AddressNode::open(&state.entities, &urn).await;
    let nonce = state.challenges.issue_nonce(
        &node,
        IssueNonce {
            address: &request.address,
            template: &request.template,
            redirect_uri: &request.redirect_uri,
            scope: &request.scope,
            state: &request.state,
        },
    )?;
    Ok(Json(NonceResponse { nonce }))
}

/// Consume a challenge with the wallet's signature over its message.
#[utoipa::path(
    post,
    path = "/v1/address/nonce/verify",
    tag = "Address",
    request_body = VerifyNonceRequest,
    responses(
        (status = 200, description = "Signature verified", body = VerifyNonceResponse),
        (status = 404, description = "Nonce unknown, expired or not signed by the address")
    )
)]
pub async fn verify_nonce(
    State(state): State<AppState>,
    Json(request): Json<VerifyNonceRequest>,
) -> Result<Json<VerifyNonceResponse>, ApiError> {
    let urn = Urn::address(AddressType::Eth, &request.address);
    let challenge = {
        let node = AddressNode::open(&state.entities, &urn).await;
        state
            .challenges
            .verify_nonce(&node, &request.nonce, &request.signature)
            .map_err(IdentityError::from)?
    };

    let proof_token = state.proofs.issue(&urn)?;
    Ok(Json(VerifyNonceResponse {
        challenge,
        address_urn: urn,
        proof_token,
    }))
}

// =============================================================================
// Email addresses
// =============================================================================

/// Generate a one-time code and hand it to the delivery service.
#[utoipa::path(
    post,
    path = "/v1/address/email/otp",
    tag = "Address",
    request_body = GenerateOtpRequest,
    responses(
        (status = 200, description = "Code sent", body = GenerateOtpResponse),
        (status = 400, description = "Malformed email address"),
        (status = 429, description = "Too many codes; see Retry-After"),
        (status = 502, description = "Delivery service failed")
    )
)]
pub async fn generate_email_otp(
    State(state): State<AppState>,
    Json(request): Json<GenerateOtpRequest>,
) -> Result<Json<GenerateOtpResponse>, ApiError> {
    let email = normalize_address(AddressType::Email, &request.email);
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(ApiError::bad_request("invalid email address"));
    }
    if request.state.is_empty() {
        return Err(ApiError::bad_request("state is required"));
    }

    let urn = Urn::address(AddressType::Email, &email);
    let code = {
        let node = AddressNode::open(&state.entities, &urn).await;
        state
            .otp
            .generate_code(&node, &email, &request.state, None)
            .map_err(IdentityError::from)?
    };

    if let Err(e) = state.mailer.send_code(&email, &code, &request.state).await {
        warn!(address_urn = %urn, error = %e, "Email code delivery failed");
        return Err(ApiError::new(StatusCode::BAD_GATEWAY, "email delivery failed"));
    }

    Ok(Json(GenerateOtpResponse {
        state: request.state,
    }))
}

/// Check a one-time code.
#[utoipa::path(
    post,
    path = "/v1/address/email/otp/verify",
    tag = "Address",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Verification result", body = VerifyOtpResponse)
    )
)]
pub async fn verify_email_otp(
    State(state): State<AppState>,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<Json<VerifyOtpResponse>, ApiError> {
    let email = normalize_address(AddressType::Email, &request.email);
    let urn = Urn::address(AddressType::Email, &email);
    let verified = {
        let node = AddressNode::open(&state.entities, &urn).await;
        state.otp.verify_code(&node, &request.code, &request.state)?
    };

    if !verified {
        return Ok(Json(VerifyOtpResponse {
            verified: false,
            address_urn: None,
            proof_token: None,
        }));
    }

    let proof_token = state.proofs.issue(&urn)?;
    Ok(Json(VerifyOtpResponse {
        verified: true,
        address_urn: Some(urn),
        proof_token: Some(proof_token),
    }))
}

/// Stable per-client alias for an owned email address.
#[utoipa::path(
    post,
    path = "/v1/address/email/mask",
    tag = "Address",
    security(("bearer_auth" = [])),
    request_body = MaskedEmailRequest,
    responses(
        (status = 200, description = "Masked address", body = MaskedEmailResponse),
        (status = 400, description = "Not an email address or invalid clientId"),
        (status = 403, description = "Address not owned by the caller")
    )
)]
pub async fn masked_email(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Json(request): Json<MaskedEmailRequest>,
) -> Result<Json<MaskedEmailResponse>, ApiError> {
    let urn = parse_urn(&request.address_urn, UrnKind::Address, "addressURN")?;
    let node = AddressNode::open(&state.entities, &urn).await;
    require_owner(&node, &caller)?;
    if node.address_type()? != Some(AddressType::Email) {
        return Err(ApiError::bad_request("address is not an email address"));
    }

    let masked_email = state
        .otp
        .masked_email(&node, &request.client_id, &state.mask_domain)?;
    Ok(Json(MaskedEmailResponse { masked_email }))
}

// =============================================================================
// OAuth addresses
// =============================================================================

/// Stored OAuth tokens of an owned address.
#[utoipa::path(
    get,
    path = "/v1/address/oauth",
    tag = "Address",
    security(("bearer_auth" = [])),
    params(AddressQuery),
    responses(
        (status = 200, description = "Stored OAuth data", body = OAuthData),
        (status = 403, description = "Address not owned by the caller"),
        (status = 404, description = "No OAuth data stored")
    )
)]
pub async fn get_oauth_data(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<OAuthData>, ApiError> {
    let urn = parse_urn(&query.address_urn, UrnKind::Address, "addressURN")?;
    let node = AddressNode::open(&state.entities, &urn).await;
    require_owner(&node, &caller)?;

    state
        .tokens
        .data(node.entity())?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no OAuth data for this address"))
}

/// Store provider tokens after checking them with the provider.
///
/// The address is keyed by the provider's account id, so the tokens prove
/// ownership of that address.
#[utoipa::path(
    put,
    path = "/v1/address/oauth",
    tag = "Address",
    request_body = SetOAuthDataRequest,
    responses(
        (status = 200, description = "Tokens stored", body = ProofResponse),
        (status = 400, description = "Not an OAuth address type or missing credential"),
        (status = 401, description = "Provider rejected the credential")
    )
)]
pub async fn set_oauth_data(
    State(state): State<AppState>,
    Json(request): Json<SetOAuthDataRequest>,
) -> Result<Json<ProofResponse>, ApiError> {
    let address_type = match classify(&request.address_type) {
        Classified::Known {
            address_type,
            node_type: NodeType::OAuth,
        } => address_type,
        Classified::Known { address_type, .. } => {
            return Err(ApiError::bad_request(format!(
                "{address_type} is not an OAuth address type"
            )))
        }
        Classified::Unknown => return Err(ApiError::bad_request("unsupported address type")),
    };
    if let Some(expires_in) = request.data.extra_params.expires_in {
        if !(0..=MAX_EXPIRES_IN_SECS).contains(&expires_in) {
            return Err(ApiError::bad_request("expiresIn is out of range"));
        }
    }
    let provider = state.oauth.for_address_type(address_type).ok_or_else(|| {
        ApiError::bad_request(format!("{address_type} provider is not configured"))
    })?;
    let verified = state
        .tokens
        .verify(provider, &request.data)
        .await
        .map_err(IdentityError::from)?;

    let urn = Urn::address(address_type, &verified.subject);
    {
        let node = AddressNode::open(&state.entities, &urn).await;
        node.ensure_identity(&verified.subject, address_type)?;
        let mut data = request.data;
        data.profile = verified.profile;
        state.tokens.store(&node, data)?;
    }
    state.profiles.invalidate(&urn.entity_id());

    let proof_token = state.proofs.issue(&urn)?;
    Ok(Json(ProofResponse {
        address_urn: urn,
        proof_token,
    }))
}

// =============================================================================
// Display state
// =============================================================================

/// Display profile of an address.
#[utoipa::path(
    get,
    path = "/v1/address/profile",
    tag = "Address",
    params(AddressQuery),
    responses(
        (status = 200, description = "Address profile", body = AddressProfile),
        (status = 404, description = "Unknown address")
    )
)]
pub async fn get_profile(
    State(state): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<AddressProfile>, ApiError> {
    let urn = parse_urn(&query.address_urn, UrnKind::Address, "addressURN")?;
    let node = AddressNode::open(&state.entities, &urn).await;
    if node.address()?.is_none() {
        return Err(ApiError::not_found("address not found"));
    }

    let profile = address_profile(&node, &state.tokens, &state.oauth, &state.profiles).await?;
    Ok(Json(profile))
}

/// Rename an owned address; the graph node's alias follows.
#[utoipa::path(
    put,
    path = "/v1/address/nickname",
    tag = "Address",
    security(("bearer_auth" = [])),
    request_body = SetNicknameRequest,
    responses(
        (status = 200, description = "Nickname stored", body = NicknameResponse),
        (status = 400, description = "Nickname empty or too long"),
        (status = 403, description = "Address not owned by the caller")
    )
)]
pub async fn set_nickname(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Json(request): Json<SetNicknameRequest>,
) -> Result<Json<NicknameResponse>, ApiError> {
    let urn = parse_urn(&request.address_urn, UrnKind::Address, "addressURN")?;
    let (nickname, node_urn) = {
        let node = AddressNode::open(&state.entities, &urn).await;
        require_owner(&node, &caller)?;
        let nickname = node.set_nickname(&request.nickname)?;
        let (raw, address_type) = node.require_identity()?;
        (nickname, Urn::address(address_type, &raw))
    };

    let aliased = node_urn.with_q(QC_ALIAS, nickname.as_str());
    if let Err(e) = state.edges.update_node(&aliased).await {
        warn!(address_urn = %urn, error = %e, "Failed to update graph alias");
    }

    Ok(Json(NicknameResponse { nickname }))
}

/// Create a smart-contract wallet address with a fresh session key.
#[utoipa::path(
    post,
    path = "/v1/address/contract-wallet",
    tag = "Address",
    request_body = ContractWalletRequest,
    responses(
        (status = 201, description = "Contract wallet created", body = ProofResponse),
        (status = 400, description = "Invalid nickname")
    )
)]
pub async fn init_contract_wallet(
    State(state): State<AppState>,
    Json(request): Json<ContractWalletRequest>,
) -> Result<(StatusCode, Json<ProofResponse>), ApiError> {
    let urn = contract::init_contract_wallet(&state.entities, request.nickname.as_deref()).await?;
    let proof_token = state.proofs.issue(&urn)?;
    info!(address_urn = %urn, "Contract wallet address created");
    Ok((
        StatusCode::CREATED,
        Json(ProofResponse {
            address_urn: urn,
            proof_token,
        }),
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::Method;
    use serde_json::json;

    use crate::address::crypto::tests::{personal_sign, wallet};
    use crate::address::mailer::tests::RecordingMailer;
    use crate::api::tests::TestApp;
    use crate::auth::extractor::tests::dev_token;

    async fn issue(app: &TestApp, address: &str) -> String {
        let (status, body) = app
            .call(
                Method::POST,
                "/v1/address/nonce",
                None,
                Some(json!({
                    "address": address,
                    "template": "Sign in: {{nonce}}",
                    "redirectUri": "https://app.example.com/cb",
                    "scope": ["profile"],
                    "state": "st-1"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["nonce"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn nonce_round_trip_returns_challenge_and_proof() {
        let app = TestApp::new();
        let (key, address) = wallet();
        let nonce = issue(&app, &address).await;

        let signature = personal_sign(&key, &format!("Sign in: {nonce}"));
        let request = json!({"address": address, "nonce": nonce, "signature": signature});
        let (status, body) = app
            .call(Method::POST, "/v1/address/nonce/verify", None, Some(request.clone()))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["challenge"]["state"], "st-1");
        assert_eq!(body["challenge"]["scope"], json!(["profile"]));
        let proven = app.state.proofs.verify(body["proofToken"].as_str().unwrap()).unwrap();
        assert!(proven.same_entity(&Urn::address(AddressType::Eth, &address)));

        // Single use.
        let (status, _) = app
            .call(Method::POST, "/v1/address/nonce/verify", None, Some(request))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn template_without_placeholder_is_rejected() {
        let app = TestApp::new();
        let (_, address) = wallet();
        let (status, _) = app
            .call(
                Method::POST,
                "/v1/address/nonce",
                None,
                Some(json!({
                    "address": address,
                    "template": "Sign in please",
                    "redirectUri": "https://app.example.com/cb",
                    "state": "s"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn foreign_signature_looks_like_unknown_nonce() {
        let app = TestApp::new();
        let (_, address) = wallet();
        let (other_key, _) = wallet();
        let nonce = issue(&app, &address).await;

        let signature = personal_sign(&other_key, &format!("Sign in: {nonce}"));
        let (status, body) = app
            .call(
                Method::POST,
                "/v1/address/nonce/verify",
                None,
                Some(json!({"address": address, "nonce": nonce, "signature": signature})),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "nonce not found");
    }

    #[tokio::test]
    async fn email_code_is_delivered_and_verified_once() {
        let mut app = TestApp::new();
        let mailer = Arc::new(RecordingMailer::default());
        app.state.mailer = mailer.clone();

        let (status, body) = app
            .call(
                Method::POST,
                "/v1/address/email/otp",
                None,
                Some(json!({"email": "  Alice@Example.com ", "state": "s1"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "s1");
        let code = mailer.last_code().unwrap();

        let request = json!({"email": "alice@example.com", "code": code, "state": "s1"});
        let (status, body) = app
            .call(Method::POST, "/v1/address/email/otp/verify", None, Some(request.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verified"], true);
        assert!(body["proofToken"].is_string());

        let (_, body) = app
            .call(Method::POST, "/v1/address/email/otp/verify", None, Some(request))
            .await;
        assert_eq!(body["verified"], false);
        assert!(body.get("proofToken").is_none());
    }

    #[tokio::test]
    async fn second_code_within_delay_is_rate_limited() {
        let mut app = TestApp::new();
        app.state.mailer = Arc::new(RecordingMailer::default());
        let body = json!({"email": "bob@example.com", "state": "s1"});

        let (status, _) = app
            .call(Method::POST, "/v1/address/email/otp", None, Some(body.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);

        app.clock.advance(Duration::from_secs(5));
        let (status, err) = app
            .call(Method::POST, "/v1/address/email/otp", None, Some(body))
            .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(err["retry_after_ms"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn malformed_email_is_rejected() {
        let app = TestApp::new();
        let (status, _) = app
            .call(
                Method::POST,
                "/v1/address/email/otp",
                None,
                Some(json!({"email": "not-an-email", "state": "s"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn profile_of_unknown_address_is_not_found() {
        let app = TestApp::new();
        let urn = Urn::address(AddressType::Eth, "0x00000000000000000000000000000000000000ff");
        let uri = format!("/v1/address/profile?addressURN={}", urlencode(&urn.to_string()));
        let (status, _) = app.call(Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn contract_wallet_profile_and_nickname() {
        let app = TestApp::new();
        let (status, body) = app
            .call(
                Method::POST,
                "/v1/address/contract-wallet",
                None,
                Some(json!({"nickname": "Vault"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let urn: Urn = body["addressURN"].as_str().unwrap().parse().unwrap();

        let uri = format!("/v1/address/profile?addressURN={}", urlencode(&urn.to_string()));
        let (status, profile) = app.call(Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["title"], "Vault");
        assert!(profile["icon"].as_str().unwrap().starts_with("data:image/svg+xml"));

        // Renaming needs the owning account.
        let account = Urn::random(UrnKind::Account);
        let token = dev_token(&account.to_string());
        let rename = json!({"addressURN": urn.to_string(), "nickname": "Savings"});
        let (status, _) = app
            .call(Method::PUT, "/v1/address/nickname", Some(&token), Some(rename.clone()))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        app.state
            .resolver
            .resolve_or_create(&urn, Some(&account), false)
            .await
            .unwrap();
        let (status, body) = app
            .call(Method::PUT, "/v1/address/nickname", Some(&token), Some(rename))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nickname"], "Savings");
    }

    #[tokio::test]
    async fn oauth_data_with_unreachable_provider_is_unauthorized() {
        let app = TestApp::new();
        let (status, _) = app
            .call(
                Method::PUT,
                "/v1/address/oauth",
                None,
                Some(json!({
                    "addressType": "github",
                    "data": {"accessToken": "gho_x", "timestamp": 0, "profile": {}}
                })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .call(
                Method::PUT,
                "/v1/address/oauth",
                None,
                Some(json!({"addressType": "eth", "data": {"timestamp": 0}})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .call(
                Method::PUT,
                "/v1/address/oauth",
                None,
                Some(json!({"addressType": "myspace", "data": {"timestamp": 0}})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unsupported address type");
    }

    #[tokio::test]
    async fn oauth_data_with_out_of_range_lifetime_is_rejected() {
        let app = TestApp::new();
        for expires_in in [-1, i64::MAX / 10] {
            let (status, body) = app
                .call(
                    Method::PUT,
                    "/v1/address/oauth",
                    None,
                    Some(json!({
                        "addressType": "google",
                        "data": {
                            "accessToken": "ya29.x",
                            "timestamp": 0,
                            "extraParams": {"expires_in": expires_in},
                            "profile": {}
                        }
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "expiresIn is out of range");
        }
    }

    #[tokio::test]
    async fn masked_email_requires_owner() {
        let mut app = TestApp::new();
        let mailer = Arc::new(RecordingMailer::default());
        app.state.mailer = mailer.clone();
        app.call(
            Method::POST,
            "/v1/address/email/otp",
            None,
            Some(json!({"email": "carol@example.com", "state": "s"})),
        )
        .await;
        let code = mailer.last_code().unwrap();
        let (_, verified) = app
            .call(
                Method::POST,
                "/v1/address/email/otp/verify",
                None,
                Some(json!({"email": "carol@example.com", "code": code, "state": "s"})),
            )
            .await;
        let urn: Urn = verified["addressURN"].as_str().unwrap().parse().unwrap();

        let account = Urn::random(UrnKind::Account);
        app.state
            .resolver
            .resolve_or_create(&urn, Some(&account), false)
            .await
            .unwrap();

        let request = json!({"addressURN": urn.to_string(), "clientId": "app-1"});
        let (status, _) = app
            .call(
                Method::POST,
                "/v1/address/email/mask",
                Some(&dev_token(&Urn::random(UrnKind::Account).to_string())),
                Some(request.clone()),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let token = dev_token(&account.to_string());
        let (status, first) = app
            .call(Method::POST, "/v1/address/email/mask", Some(&token), Some(request.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (_, second) = app
            .call(Method::POST, "/v1/address/email/mask", Some(&token), Some(request))
            .await;
        assert_eq!(first["maskedEmail"], second["maskedEmail"]);
        assert!(first["maskedEmail"]
            .as_str()
            .unwrap()
            .ends_with(&format!("@{}", app.state.mask_domain)));
    }

    #[tokio::test]
    async fn oauth_data_read_requires_bearer() {
        let app = TestApp::new();
        let urn = Urn::address(AddressType::GitHub, "12345");
        let uri = format!("/v1/address/oauth?addressURN={}", urlencode(&urn.to_string()));
        let (status, body) = app.call(Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());
    }

    pub(crate) fn urlencode(raw: &str) -> String {
        url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
    }
}
