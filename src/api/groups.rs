// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity group API endpoints.
//!
//! Every route requires a bearer credential. The `{group}` path segment
//! accepts either a full group URN or its bare id.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::Auth,
    error::ApiError,
    group::{parse_group, Invitation, Member},
    models::AddressType,
    state::AppState,
    urn::Urn,
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateGroupRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateGroupResponse {
    #[serde(rename = "groupURN")]
    #[schema(value_type = String)]
    pub group_urn: Urn,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InviteMemberRequest {
    /// Raw address the invitation is for (wallet address, email, ...).
    pub identifier: String,
    pub address_type: AddressType,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInvitationRequest {
    pub invite_code: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MemberListResponse {
    pub members: Vec<Member>,
}

#[utoipa::path(
    post,
    path = "/v1/groups",
    tag = "Groups",
    security(("bearer_auth" = [])),
    request_body = CreateGroupRequest,
    responses(
        (status = 201, description = "Group created", body = CreateGroupResponse),
        (status = 400, description = "Invalid name")
    )
)]
pub async fn create_group(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Json(request): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<CreateGroupResponse>), ApiError> {
    let group_urn = state.groups.create(&caller.account, &request.name).await?;
    Ok((StatusCode::CREATED, Json(CreateGroupResponse { group_urn })))
}

/// Invite an address to the group. Only members may invite.
#[utoipa::path(
    post,
    path = "/v1/groups/{group}/invitations",
    tag = "Groups",
    security(("bearer_auth" = [])),
    params(("group" = String, Path, description = "Group URN or id")),
    request_body = InviteMemberRequest,
    responses(
        (status = 201, description = "Invitation created", body = Invitation),
        (status = 403, description = "Caller is not a member")
    )
)]
pub async fn invite_member(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(group): Path<String>,
    Json(request): Json<InviteMemberRequest>,
) -> Result<(StatusCode, Json<Invitation>), ApiError> {
    let group = parse_group(&group)?;
    let invitation = state
        .groups
        .invite_member(
            &caller.account,
            &group,
            &request.identifier,
            request.address_type,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(invitation)))
}

/// Outstanding (unexpired) invitations.
#[utoipa::path(
    get,
    path = "/v1/groups/{group}/invitations",
    tag = "Groups",
    security(("bearer_auth" = [])),
    params(("group" = String, Path, description = "Group URN or id")),
    responses(
        (status = 200, description = "Invitations", body = Vec<Invitation>),
        (status = 403, description = "Caller is not a member")
    )
)]
pub async fn list_invitations(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> Result<Json<Vec<Invitation>>, ApiError> {
    let group = parse_group(&group)?;
    Ok(Json(
        state.groups.list_invitations(&caller.account, &group).await?,
    ))
}

/// Join the group with an invitation addressed to one of the caller's
/// linked addresses.
#[utoipa::path(
    post,
    path = "/v1/groups/{group}/invitations/accept",
    tag = "Groups",
    security(("bearer_auth" = [])),
    params(("group" = String, Path, description = "Group URN or id")),
    request_body = AcceptInvitationRequest,
    responses(
        (status = 204, description = "Joined"),
        (status = 403, description = "Invitation is for another address"),
        (status = 404, description = "Unknown or expired invitation")
    )
)]
pub async fn accept_invitation(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(group): Path<String>,
    Json(request): Json<AcceptInvitationRequest>,
) -> Result<StatusCode, ApiError> {
    let group = parse_group(&group)?;
    state
        .groups
        .accept_invitation(&caller.account, &group, &request.invite_code)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/groups/{group}/members",
    tag = "Groups",
    security(("bearer_auth" = [])),
    params(("group" = String, Path, description = "Group URN or id")),
    responses(
        (status = 200, description = "Members", body = MemberListResponse),
        (status = 403, description = "Caller is not a member")
    )
)]
pub async fn list_members(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> Result<Json<MemberListResponse>, ApiError> {
    let group = parse_group(&group)?;
    let members = state.groups.list_members(&caller.account, &group).await?;
    Ok(Json(MemberListResponse { members }))
}

/// Leave the group. The last member must delete the group instead.
#[utoipa::path(
    delete,
    path = "/v1/groups/{group}/members/me",
    tag = "Groups",
    security(("bearer_auth" = [])),
    params(("group" = String, Path, description = "Group URN or id")),
    responses(
        (status = 204, description = "Left the group"),
        (status = 403, description = "Caller is not a member"),
        (status = 409, description = "Caller is the last member")
    )
)]
pub async fn delete_membership(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> Result<StatusCode, ApiError> {
    let group = parse_group(&group)?;
    state
        .groups
        .delete_membership(&caller.account, &group)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/v1/groups/{group}",
    tag = "Groups",
    security(("bearer_auth" = [])),
    params(("group" = String, Path, description = "Group URN or id")),
    responses(
        (status = 204, description = "Group deleted"),
        (status = 403, description = "Caller is not a member")
    )
)]
pub async fn delete_group(
    Auth(caller): Auth,
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> Result<StatusCode, ApiError> {
    let group = parse_group(&group)?;
    state.groups.delete_group(&caller.account, &group).await?;
    Ok(StatusCode::NO_CONTENT)
}
