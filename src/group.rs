// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Identity Groups
//!
//! Multi-account collectives with invitation-based membership. Membership
//! is the `member_of_group` edge from account to group; the group entity
//! stores only its `name` and the pending `invitations`.
//!
//! A group always keeps at least one member. Leaving as the last member is
//! refused; the group has to be deleted as a whole instead.
//!
//! Invitations expire after 24 hours. Each invite schedules the group's
//! alarm 5 minutes past that point and [`Groups::sweep_invitations`] drops
//! whatever has gone stale.

use std::sync::Arc;

use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::address::AddressNode;
use crate::clock::SharedClock;
use crate::edges::{EdgeQuery, SharedEdges, EDGE_MEMBER_OF_GROUP, EDGE_OWNS_ADDRESS};
use crate::error::{IdentityError, IdentityResult};
use crate::models::AddressType;
use crate::storage::{Entity, EntityResult, EntityStore};
use crate::urn::{Urn, UrnKind};

const KEY_NAME: &str = "name";
const KEY_INVITATIONS: &str = "invitations";

/// q-component carrying the group name on its URN.
pub const QC_NAME: &str = "name";

pub const INVITATION_TTL_MS: i64 = 86_400_000;
/// Alarm offset after an invitation is created.
pub const INVITATION_SWEEP_DELAY_MS: i64 = INVITATION_TTL_MS + 300_000;

const INVITE_CODE_BYTES: usize = 12;
const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub identifier: String,
    pub address_type: AddressType,
    pub invite_code: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(rename = "accountURN")]
    #[schema(value_type = String)]
    pub account_urn: Urn,
    pub joined_at: i64,
}

/// Group URN from a path segment: a full URN or the bare id.
pub fn parse_group(raw: &str) -> IdentityResult<Urn> {
    let urn = if raw.starts_with("urn:") {
        raw.parse::<Urn>()
            .map_err(|_| IdentityError::bad_request("invalid group URN"))?
    } else {
        Urn::new(UrnKind::IdentityGroup, raw)
    };
    if urn.kind() != UrnKind::IdentityGroup || urn.id().contains('/') {
        return Err(IdentityError::bad_request("invalid group URN"));
    }
    Ok(urn.base())
}

pub struct Groups {
    entities: Arc<EntityStore>,
    edges: SharedEdges,
    clock: SharedClock,
    rng: SystemRandom,
}

impl Groups {
    pub fn new(entities: Arc<EntityStore>, edges: SharedEdges, clock: SharedClock) -> Self {
        Self {
            entities,
            edges,
            clock,
            rng: SystemRandom::new(),
        }
    }

    async fn members_of(&self, group: &Urn) -> IdentityResult<Vec<Member>> {
        let edges = self
            .edges
            .get_edges(&EdgeQuery::incoming(group, EDGE_MEMBER_OF_GROUP))
            .await?;
        Ok(edges
            .into_iter()
            .map(|e| Member {
                account_urn: e.src.id.base(),
                joined_at: e.created_at,
            })
            .collect())
    }

    async fn is_member(&self, account: &Urn, group: &Urn) -> IdentityResult<bool> {
        let edges = self
            .edges
            .get_edges(&EdgeQuery::between(account, EDGE_MEMBER_OF_GROUP, group))
            .await?;
        Ok(!edges.is_empty())
    }

    async fn require_member(&self, account: &Urn, group: &Urn) -> IdentityResult<()> {
        if self.is_member(account, group).await? {
            Ok(())
        } else {
            Err(IdentityError::forbidden("not a member of this group"))
        }
    }

    /// Mint a group with `creator` as its first member.
    pub async fn create(&self, creator: &Urn, name: &str) -> IdentityResult<Urn> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(IdentityError::bad_request(format!(
                "group name must be 1-{MAX_NAME_LEN} characters"
            )));
        }

        let group = Urn::random(UrnKind::IdentityGroup).with_q(QC_NAME, name);
        let entity = self.entities.entity(&group.entity_id()).await;
        entity.put(KEY_NAME, name)?;
        self.edges
            .make_edge(creator, EDGE_MEMBER_OF_GROUP, &group)
            .await?;

        info!(group_urn = %group, account_urn = %creator, "Identity group created");
        Ok(group)
    }

    pub async fn name(&self, group: &Urn) -> IdentityResult<Option<String>> {
        let entity = self.entities.entity(&group.entity_id()).await;
        Ok(entity.get(KEY_NAME)?)
    }

    /// Record an invitation. Re-inviting the same identifier adds another
    /// invitation with its own code.
    pub async fn invite_member(
        &self,
        caller: &Urn,
        group: &Urn,
        identifier: &str,
        address_type: AddressType,
    ) -> IdentityResult<Invitation> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(IdentityError::bad_request("identifier is required"));
        }
        self.require_member(caller, group).await?;

        let mut bytes = [0u8; INVITE_CODE_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| IdentityError::internal("system randomness unavailable"))?;
        let now = self.clock.now_ms();
        let invitation = Invitation {
            identifier: identifier.to_string(),
            address_type,
            invite_code: alloy::hex::encode(bytes),
            created_at: now,
        };

        let entity = self.entities.entity(&group.entity_id()).await;
        let mut invitations = load(&entity)?;
        invitations.push(invitation.clone());
        entity.put(KEY_INVITATIONS, &invitations)?;

        let due = now + INVITATION_SWEEP_DELAY_MS;
        match entity.alarm()? {
            Some(existing) if existing <= due => {}
            _ => entity.set_alarm(due)?,
        }

        info!(group_urn = %group, address_type = %address_type, "Invitation created");
        Ok(invitation)
    }

    pub async fn list_invitations(&self, caller: &Urn, group: &Urn) -> IdentityResult<Vec<Invitation>> {
        self.require_member(caller, group).await?;
        let entity = self.entities.entity(&group.entity_id()).await;
        let now = self.clock.now_ms();
        Ok(load(&entity)?
            .into_iter()
            .filter(|i| i.created_at + INVITATION_TTL_MS > now)
            .collect())
    }

    /// Join `group` with an invitation addressed to one of the caller's
    /// linked addresses.
    pub async fn accept_invitation(&self, caller: &Urn, group: &Urn, code: &str) -> IdentityResult<()> {
        let identities = self.linked_identities(caller).await?;

        let entity = self.entities.entity(&group.entity_id()).await;
        let mut invitations = load(&entity)?;
        let now = self.clock.now_ms();
        let index = invitations
            .iter()
            .position(|i| i.invite_code == code && i.created_at + INVITATION_TTL_MS > now)
            .ok_or_else(|| IdentityError::not_found("invitation not found"))?;

        let invitation = &invitations[index];
        let wanted = invitation.identifier.to_lowercase();
        let matched = identities
            .iter()
            .any(|(address, t)| *t == invitation.address_type && address.to_lowercase() == wanted);
        if !matched {
            debug!(group_urn = %group, account_urn = %caller, "No linked address matches invitation");
            return Err(IdentityError::forbidden(
                "invitation is addressed to a different identity",
            ));
        }

        // Edge first: a failure here leaves the invitation usable.
        let group_urn = match self.name_of(&entity)? {
            Some(name) => group.base().with_q(QC_NAME, name),
            None => group.base(),
        };
        self.edges
            .make_edge(caller, EDGE_MEMBER_OF_GROUP, &group_urn)
            .await?;
        invitations.remove(index);
        entity.put(KEY_INVITATIONS, &invitations)?;

        info!(group_urn = %group, account_urn = %caller, "Invitation accepted");
        Ok(())
    }

    fn name_of(&self, entity: &Entity<'_>) -> EntityResult<Option<String>> {
        entity.get(KEY_NAME)
    }

    async fn linked_identities(&self, account: &Urn) -> IdentityResult<Vec<(String, AddressType)>> {
        let edges = self
            .edges
            .get_edges(&EdgeQuery::outgoing(account, EDGE_OWNS_ADDRESS))
            .await?;
        let mut identities = Vec::with_capacity(edges.len());
        for edge in edges {
            let node = AddressNode::open(&self.entities, &edge.dst.urn()).await;
            if let (Some(address), Some(address_type)) = (node.address()?, node.address_type()?) {
                identities.push((address, address_type));
            }
        }
        Ok(identities)
    }

    pub async fn list_members(&self, caller: &Urn, group: &Urn) -> IdentityResult<Vec<Member>> {
        self.require_member(caller, group).await?;
        self.members_of(group).await
    }

    /// Leave `group`. The last member cannot leave.
    pub async fn delete_membership(&self, caller: &Urn, group: &Urn) -> IdentityResult<()> {
        let _entity = self.entities.entity(&group.entity_id()).await;
        let members = self.members_of(group).await?;
        if !members.iter().any(|m| m.account_urn.same_entity(caller)) {
            return Err(IdentityError::forbidden("not a member of this group"));
        }
        if members.len() <= 1 {
            return Err(IdentityError::conflict(
                "the last member cannot leave; delete the group instead",
            ));
        }

        self.edges
            .remove_edge(caller, EDGE_MEMBER_OF_GROUP, group)
            .await?;
        info!(group_urn = %group, account_urn = %caller, "Membership removed");
        Ok(())
    }

    /// Delete the group with every membership edge and its storage.
    pub async fn delete_group(&self, caller: &Urn, group: &Urn) -> IdentityResult<()> {
        let entity = self.entities.entity(&group.entity_id()).await;
        self.require_member(caller, group).await?;

        let removed = self.edges.delete_node(group).await?;
        entity.delete_all()?;
        info!(group_urn = %group, removed_edges = removed, "Identity group deleted");
        Ok(())
    }

    /// Drop `account` from `group`, deleting the group if it was the last
    /// member.
    pub async fn remove_member_or_group(&self, account: &Urn, group: &Urn) -> IdentityResult<()> {
        let entity = self.entities.entity(&group.entity_id()).await;
        let members = self.members_of(group).await?;
        let others = members
            .iter()
            .filter(|m| !m.account_urn.same_entity(account))
            .count();

        if others == 0 {
            self.edges.delete_node(group).await?;
            entity.delete_all()?;
            info!(group_urn = %group, "Identity group deleted with its last member");
        } else {
            self.edges
                .remove_edge(account, EDGE_MEMBER_OF_GROUP, group)
                .await?;
        }
        Ok(())
    }

    /// Alarm handler: purge expired invitations and re-arm for the next one.
    pub fn sweep_invitations(&self, entity: &Entity<'_>) -> EntityResult<usize> {
        let now = self.clock.now_ms();
        let mut invitations = load(entity)?;
        let before = invitations.len();
        invitations.retain(|i| i.created_at + INVITATION_TTL_MS > now);
        let removed = before - invitations.len();

        match invitations.iter().map(|i| i.created_at).min() {
            Some(oldest) => {
                entity.put(KEY_INVITATIONS, &invitations)?;
                entity.set_alarm(oldest + INVITATION_SWEEP_DELAY_MS)?;
            }
            None => {
                entity.delete(KEY_INVITATIONS)?;
                entity.delete_alarm()?;
            }
        }
        if removed > 0 {
            debug!(entity_id = %entity.id(), removed, "Expired invitations purged");
        }
        Ok(removed)
    }
}

fn load(entity: &Entity<'_>) -> EntityResult<Vec<Invitation>> {
    Ok(entity.get(KEY_INVITATIONS)?.unwrap_or_default())
}
