// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Account Entities
//!
//! An account aggregates the addresses it has proven. The account entity
//! itself only stores the `profile` struct; the address list always comes
//! from the graph (`src = account, tag = owns/address`).
//!
//! Entity locks are taken account first, then address, then group.

pub mod resolve;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::address::AddressNode;
use crate::edges::{EdgeQuery, SharedEdges, EDGE_MEMBER_OF_GROUP, EDGE_OWNS_ADDRESS};
use crate::error::{IdentityError, IdentityResult};
use crate::group::Groups;
use crate::storage::EntityStore;
use crate::urn::{Urn, UrnKind};

pub use resolve::{Outbox, PendingLink, Resolution, Resolver};

const KEY_PROFILE: &str = "profile";

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pfp {
    pub image: String,
    /// Whether the image is an NFT the account holds.
    #[serde(default)]
    pub is_token: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfp: Option<Pfp>,
    #[serde(
        default,
        rename = "primaryAddressURN",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>)]
    pub primary_address_urn: Option<Urn>,
}

/// Stored profile plus the linked addresses, oldest link first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct AccountProfile {
    #[serde(flatten)]
    pub profile: Profile,
    #[schema(value_type = Vec<String>)]
    pub addresses: Vec<Urn>,
}

// =============================================================================
// Service
// =============================================================================

pub struct Accounts {
    entities: Arc<EntityStore>,
    edges: SharedEdges,
}

impl Accounts {
    pub fn new(entities: Arc<EntityStore>, edges: SharedEdges) -> Self {
        Self { entities, edges }
    }

    /// Addresses owned by `account`, oldest link first.
    pub async fn linked_addresses(&self, account: &Urn) -> IdentityResult<Vec<Urn>> {
        let edges = self
            .edges
            .get_edges(&EdgeQuery::outgoing(account, EDGE_OWNS_ADDRESS))
            .await?;
        Ok(edges.into_iter().map(|e| e.dst.urn()).collect())
    }

    fn require_linked(linked: &[Urn], address: &Urn) -> IdentityResult<()> {
        if linked.iter().any(|a| a.same_entity(address)) {
            Ok(())
        } else {
            Err(IdentityError::bad_request("address is not linked to this account"))
        }
    }

    /// Profile read-model. An unset primary address defaults to the most
    /// recently linked one and is written back.
    pub async fn get_profile(&self, account: &Urn) -> IdentityResult<AccountProfile> {
        let entity = self.entities.entity(&account.entity_id()).await;
        let mut profile: Profile = entity.get(KEY_PROFILE)?.unwrap_or_default();
        let addresses = self.linked_addresses(account).await?;

        if profile.primary_address_urn.is_none() {
            if let Some(latest) = addresses.last() {
                profile.primary_address_urn = Some(latest.clone());
                entity.put(KEY_PROFILE, &profile)?;
                debug!(account_urn = %account, address_urn = %latest, "Primary address defaulted");
            }
        }

        Ok(AccountProfile { profile, addresses })
    }

    /// Merge `update` into the stored profile; absent fields are kept.
    pub async fn set_profile(&self, account: &Urn, update: Profile) -> IdentityResult<Profile> {
        let entity = self.entities.entity(&account.entity_id()).await;
        if let Some(primary) = &update.primary_address_urn {
            Self::require_linked(&self.linked_addresses(account).await?, primary)?;
        }

        let mut profile: Profile = entity.get(KEY_PROFILE)?.unwrap_or_default();
        if update.display_name.is_some() {
            profile.display_name = update.display_name;
        }
        if update.pfp.is_some() {
            profile.pfp = update.pfp;
        }
        if update.primary_address_urn.is_some() {
            profile.primary_address_urn = update.primary_address_urn;
        }
        entity.put(KEY_PROFILE, &profile)?;

        info!(account_urn = %account, "Profile updated");
        Ok(profile)
    }

    pub async fn set_primary_address(&self, account: &Urn, address: &Urn) -> IdentityResult<()> {
        let entity = self.entities.entity(&account.entity_id()).await;
        let linked = self.linked_addresses(account).await?;
        Self::require_linked(&linked, address)?;

        // Store the linked form so routing components are kept.
        let primary = linked
            .into_iter()
            .find(|a| a.same_entity(address))
            .unwrap_or_else(|| address.clone());
        let mut profile: Profile = entity.get(KEY_PROFILE)?.unwrap_or_default();
        profile.primary_address_urn = Some(primary);
        entity.put(KEY_PROFILE, &profile)?;

        info!(account_urn = %account, address_urn = %address, "Primary address set");
        Ok(())
    }

    /// Detach an address. The primary address and the last address cannot
    /// be unlinked.
    pub async fn unlink_address(
        &self,
        account: &Urn,
        address: &Urn,
        outbox: &Outbox,
    ) -> IdentityResult<()> {
        let entity = self.entities.entity(&account.entity_id()).await;
        let linked = self.linked_addresses(account).await?;
        Self::require_linked(&linked, address)?;

        if linked.len() == 1 {
            return Err(IdentityError::conflict("cannot unlink the last address"));
        }
        let profile: Profile = entity.get(KEY_PROFILE)?.unwrap_or_default();
        if profile
            .primary_address_urn
            .as_ref()
            .is_some_and(|p| p.same_entity(address))
        {
            return Err(IdentityError::conflict("cannot unlink the primary address"));
        }

        let target = linked
            .iter()
            .find(|a| a.same_entity(address))
            .cloned()
            .unwrap_or_else(|| address.clone());
        self.edges
            .remove_edge(account, EDGE_OWNS_ADDRESS, &target)
            .await?;

        let node = AddressNode::open(&self.entities, &target).await;
        if node.owner()?.is_some_and(|o| o.same_entity(account)) {
            node.clear_owner()?;
        }
        outbox.clear(&target).await?;

        info!(account_urn = %account, address_urn = %target, "Address unlinked");
        Ok(())
    }

    /// Groups the account is a member of.
    pub async fn list_groups(&self, account: &Urn) -> IdentityResult<Vec<Urn>> {
        let edges = self
            .edges
            .get_edges(&EdgeQuery::outgoing(account, EDGE_MEMBER_OF_GROUP))
            .await?;
        Ok(edges.into_iter().map(|e| e.dst.urn()).collect())
    }

    /// Remove the account with everything it owns. Groups it leaves empty
    /// are deleted as a whole.
    pub async fn delete(&self, account: &Urn, groups: &Groups, outbox: &Outbox) -> IdentityResult<()> {
        let entity = self.entities.entity(&account.entity_id()).await;

        let addresses = self.linked_addresses(account).await?;
        for address in &addresses {
            self.edges
                .remove_edge(account, EDGE_OWNS_ADDRESS, address)
                .await?;
            {
                let node = AddressNode::open(&self.entities, address).await;
                node.purge()?;
                outbox.clear(address).await?;
            }
            if let Err(e) = self.edges.delete_node(address).await {
                warn!(address_urn = %address, error = %e, "Failed to delete address node");
            }
        }

        for group in self.list_groups(account).await? {
            groups.remove_member_or_group(account, &group).await?;
        }

        self.edges.delete_node(account).await?;
        entity.delete_all()?;

        info!(
            account_urn = %account,
            addresses = addresses.len(),
            "Account deleted"
        );
        Ok(())
    }
}

/// Account URN from a caller-supplied string.
pub fn parse_account(raw: &str) -> IdentityResult<Urn> {
    let urn: Urn = raw
        .parse()
        .map_err(|_| IdentityError::bad_request("invalid account URN"))?;
    if urn.kind() != UrnKind::Account {
        return Err(IdentityError::bad_request("URN is not an account"));
    }
    Ok(urn.base())
}
