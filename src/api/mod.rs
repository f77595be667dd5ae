// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    account::{AccountProfile, Pfp, Profile},
    address::crypto::Challenge,
    address::oauth::{ExtraParams, OAuthData},
    edges::{DeleteNodeResponse, Edge, EdgeQuery, EdgeTriple, Node, NodeFilter, NodeRequest, RemoveEdgeResponse},
    error::ApiError,
    group::{Invitation, Member},
    models::{AddressProfile, AddressType},
    state::AppState,
    urn::{Urn, UrnKind},
};

pub mod account;
pub mod address;
pub mod edges;
pub mod groups;
pub mod health;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        // Address proofs
        .route("/address/nonce", post(address::issue_nonce))
        .route("/address/nonce/verify", post(address::verify_nonce))
        .route("/address/email/otp", post(address::generate_email_otp))
        .route("/address/email/otp/verify", post(address::verify_email_otp))
        .route("/address/email/mask", post(address::masked_email))
        .route(
            "/address/oauth",
            get(address::get_oauth_data).put(address::set_oauth_data),
        )
        .route("/address/profile", get(address::get_profile))
        .route("/address/nickname", put(address::set_nickname))
        .route("/address/contract-wallet", post(address::init_contract_wallet))
        // Accounts
        .route("/account", delete(account::delete_account))
        .route("/account/resolve", post(account::resolve_identity))
        .route(
            "/account/profile",
            get(account::get_profile).put(account::set_profile),
        )
        .route("/account/primary-address", put(account::set_primary_address))
        .route("/account/unlink", post(account::unlink_address))
        .route("/account/groups", get(account::list_groups))
        // Edge graph (service token)
        .route("/edges", post(edges::make_edge))
        .route("/edges/query", post(edges::get_edges))
        .route("/edges/remove", post(edges::remove_edge))
        .route("/edges/nodes", post(edges::update_node))
        .route("/edges/nodes/delete", post(edges::delete_node))
        // Identity groups
        .route("/groups", post(groups::create_group))
        .route("/groups/{group}", delete(groups::delete_group))
        .route(
            "/groups/{group}/invitations",
            get(groups::list_invitations).post(groups::invite_member),
        )
        .route(
            "/groups/{group}/invitations/accept",
            post(groups::accept_invitation),
        )
        .route("/groups/{group}/members", get(groups::list_members))
        .route("/groups/{group}/members/me", delete(groups::delete_membership))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

/// Parse a caller-supplied URN and check its kind.
pub(crate) fn parse_urn(raw: &str, kind: UrnKind, field: &str) -> Result<Urn, ApiError> {
    let urn: Urn = raw
        .parse()
        .map_err(|e| ApiError::bad_request(format!("invalid {field}: {e}")))?;
    if urn.kind() != kind {
        return Err(ApiError::bad_request(format!(
            "{field} must be an {} URN",
            kind.as_str()
        )));
    }
    Ok(urn)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        address::issue_nonce,
        address::verify_nonce,
        address::generate_email_otp,
        address::verify_email_otp,
        address::masked_email,
        address::get_oauth_data,
        address::set_oauth_data,
        address::get_profile,
        address::set_nickname,
        address::init_contract_wallet,
        account::resolve_identity,
        account::get_profile,
        account::set_profile,
        account::set_primary_address,
        account::unlink_address,
        account::list_groups,
        account::delete_account,
        edges::make_edge,
        edges::get_edges,
        edges::remove_edge,
        edges::update_node,
        edges::delete_node,
        groups::create_group,
        groups::invite_member,
        groups::list_invitations,
        groups::accept_invitation,
        groups::list_members,
        groups::delete_membership,
        groups::delete_group
    ),
    components(
        schemas(
            AddressType,
            AddressProfile,
            Challenge,
            OAuthData,
            ExtraParams,
            Profile,
            Pfp,
            AccountProfile,
            Edge,
            Node,
            NodeFilter,
            EdgeQuery,
            EdgeTriple,
            NodeRequest,
            RemoveEdgeResponse,
            DeleteNodeResponse,
            Invitation,
            Member,
            address::IssueNonceRequest,
            address::NonceResponse,
            address::VerifyNonceRequest,
            address::VerifyNonceResponse,
            address::GenerateOtpRequest,
            address::GenerateOtpResponse,
            address::VerifyOtpRequest,
            address::VerifyOtpResponse,
            address::MaskedEmailRequest,
            address::MaskedEmailResponse,
            address::SetOAuthDataRequest,
            address::SetNicknameRequest,
            address::NicknameResponse,
            address::ContractWalletRequest,
            address::ProofResponse,
            account::ResolveIdentityRequest,
            account::ResolveIdentityResponse,
            account::AddressRequest,
            account::GroupSummary,
            account::GroupListResponse,
            groups::CreateGroupRequest,
            groups::CreateGroupResponse,
            groups::InviteMemberRequest,
            groups::AcceptInvitationRequest,
            groups::MemberListResponse,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Address", description = "Address ownership proofs and address state"),
        (name = "Account", description = "Account resolution and profiles"),
        (name = "Edges", description = "Edge graph service"),
        (name = "Groups", description = "Identity groups and invitations")
    )
)]
pub struct ApiDoc;
