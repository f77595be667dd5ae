// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Account Resolution
//!
//! Maps a proven address to its owning account, minting one when needed.
//!
//! Claiming an address takes two independent writes: the owner reference on
//! the address entity, then the `owns/address` edge in the graph. There is
//! no transaction spanning them. Before the edge write a pending link is
//! recorded in the outbox entity (`system/outbox`, keys `link/<address id>`)
//! and removed once the edge exists. Links left behind by a failed edge
//! write are retried by [`Resolver::reconcile_pending`] and by the next
//! resolution of the same address. The owner write is never rolled back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::address::AddressNode;
use crate::clock::SharedClock;
use crate::edges::{SharedEdges, EDGE_OWNS_ADDRESS};
use crate::error::{IdentityError, IdentityResult};
use crate::storage::{EntityResult, EntityStore};
use crate::urn::{Urn, UrnKind};

pub const OUTBOX_ENTITY: &str = "system/outbox";
const LINK_PREFIX: &str = "link/";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingLink {
    pub account: Urn,
    pub address: Urn,
    pub recorded_at: i64,
}

/// Pending ownership edges.
pub struct Outbox {
    entities: Arc<EntityStore>,
}

impl Outbox {
    pub fn new(entities: Arc<EntityStore>) -> Self {
        Self { entities }
    }

    fn key(address: &Urn) -> String {
        format!("{LINK_PREFIX}{}", address.id())
    }

    pub async fn record(&self, link: &PendingLink) -> EntityResult<()> {
        let outbox = self.entities.entity(OUTBOX_ENTITY).await;
        outbox.put(&Self::key(&link.address), link)
    }

    pub async fn get(&self, address: &Urn) -> EntityResult<Option<PendingLink>> {
        let outbox = self.entities.entity(OUTBOX_ENTITY).await;
        outbox.get(&Self::key(address))
    }

    pub async fn clear(&self, address: &Urn) -> EntityResult<bool> {
        let outbox = self.entities.entity(OUTBOX_ENTITY).await;
        outbox.delete(&Self::key(address))
    }

    pub async fn pending(&self) -> EntityResult<Vec<PendingLink>> {
        let outbox = self.entities.entity(OUTBOX_ENTITY).await;
        Ok(outbox
            .list::<PendingLink>(LINK_PREFIX)?
            .into_iter()
            .map(|(_, link)| link)
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub account: Urn,
    pub existing: bool,
}

pub struct Resolver {
    entities: Arc<EntityStore>,
    edges: SharedEdges,
    outbox: Outbox,
    clock: SharedClock,
}

impl Resolver {
    pub fn new(entities: Arc<EntityStore>, edges: SharedEdges, clock: SharedClock) -> Self {
        Self {
            outbox: Outbox::new(entities.clone()),
            entities,
            edges,
            clock,
        }
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Owning account of a proven address.
    ///
    /// An unowned address adopts `bearer_subject` as its account unless
    /// `force_create` is set or no subject was given, in which case a fresh
    /// account URN is minted.
    pub async fn resolve_or_create(
        &self,
        address: &Urn,
        bearer_subject: Option<&Urn>,
        force_create: bool,
    ) -> IdentityResult<Resolution> {
        let node = AddressNode::open(&self.entities, address).await;
        let (raw, address_type) = match node.require_identity() {
            Ok(identity) => identity,
            Err(_) => return Err(IdentityError::not_found("address not found")),
        };
        let address = Urn::address(address_type, &raw);

        if let Some(owner) = node.owner()? {
            if let Some(link) = self.outbox.get(&address).await? {
                if link.account.same_entity(&owner) {
                    self.flush(&link).await;
                }
            }
            debug!(address_urn = %address, account_urn = %owner, "Address already owned");
            return Ok(Resolution {
                account: owner,
                existing: true,
            });
        }

        let account = match bearer_subject {
            Some(subject) if !force_create && subject.kind() == UrnKind::Account => subject.base(),
            _ => Urn::random(UrnKind::Account),
        };
        node.set_owner(&account)?;

        let link = PendingLink {
            account: account.clone(),
            address: address.clone(),
            recorded_at: self.clock.now_ms(),
        };
        self.outbox.record(&link).await?;
        self.flush(&link).await;

        info!(address_urn = %address, account_urn = %account, "Account resolved for new address");
        Ok(Resolution {
            account,
            existing: false,
        })
    }

    /// Write the edge for a pending link; the link stays queued on failure.
    async fn flush(&self, link: &PendingLink) -> bool {
        match self
            .edges
            .make_edge(&link.account, EDGE_OWNS_ADDRESS, &link.address)
            .await
        {
            Ok(_) => {
                if let Err(e) = self.outbox.clear(&link.address).await {
                    warn!(address_urn = %link.address, error = %e, "Failed to clear pending link");
                }
                true
            }
            Err(e) => {
                warn!(
                    address_urn = %link.address,
                    account_urn = %link.account,
                    error = %e,
                    "Ownership edge write failed; link left pending"
                );
                false
            }
        }
    }

    /// Retry every pending link whose address is still owned by the same
    /// account. Links that no longer match are dropped. Returns the number
    /// of edges written.
    pub async fn reconcile_pending(&self) -> IdentityResult<usize> {
        let mut linked = 0;
        for link in self.outbox.pending().await? {
            let node = AddressNode::open(&self.entities, &link.address).await;
            let still_owned = node
                .owner()?
                .is_some_and(|owner| owner.same_entity(&link.account));
            if !still_owned {
                debug!(address_urn = %link.address, "Dropping stale pending link");
                self.outbox.clear(&link.address).await?;
                continue;
            }
            if self.flush(&link).await {
                linked += 1;
            }
        }
        if linked > 0 {
            info!(count = linked, "Pending ownership edges reconciled");
        }
        Ok(linked)
    }
}
