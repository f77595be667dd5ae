// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Address Entities
//!
//! One entity per externally verifiable identifier. The entity stores the
//! raw address, its type, the owning account (set once) and display state,
//! plus the private state of whichever verifier is attached:
//!
//! | Node type | Verifier | Keys |
//! |-----------|----------|------|
//! | crypto | [`crypto::ChallengeAuthenticator`] | `challenges` |
//! | email | [`email::OtpVerifier`] | `otp`, `masked-address/*` |
//! | oauth | [`oauth::TokenManager`] | `data` |
//! | contract | [`contract`] session key | `private-key` |
//!
//! Owner reassignment requires an explicit [`AddressNode::clear_owner`]
//! first; [`AddressNode::set_owner`] refuses to overwrite a different owner.

pub mod contract;
pub mod crypto;
pub mod email;
pub mod mailer;
pub mod oauth;
pub mod profile;

use base64ct::{Base64, Encoding};
use sha2::{Digest, Sha256};

use crate::error::{IdentityError, IdentityResult};
use crate::models::{AddressType, NodeType};
use crate::storage::{Entity, EntityStore};
use crate::urn::Urn;

pub const KEY_ADDRESS: &str = "address";
pub const KEY_TYPE: &str = "type";
pub const KEY_NODE_TYPE: &str = "nodeType";
pub const KEY_ACCOUNT: &str = "account";
pub const KEY_NICKNAME: &str = "nickname";
pub const KEY_GRADIENT: &str = "gradient";
pub const KEY_OAUTH_DATA: &str = "data";
pub const KEY_OTP: &str = "otp";
pub const KEY_CHALLENGES: &str = "challenges";
pub const KEY_PRIVATE_KEY: &str = "private-key";
pub const KEY_MASKED_PREFIX: &str = "masked-address/";

const MAX_NICKNAME_LEN: usize = 64;

/// Exclusive handle on one address entity.
pub struct AddressNode<'a> {
    urn: Urn,
    entity: Entity<'a>,
}

impl<'a> AddressNode<'a> {
    pub async fn open(store: &'a EntityStore, urn: &Urn) -> AddressNode<'a> {
        let entity = store.entity(&urn.entity_id()).await;
        AddressNode {
            urn: urn.clone(),
            entity,
        }
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn entity(&self) -> &Entity<'a> {
        &self.entity
    }

    /// Record the natural key and type on first contact.
    pub fn ensure_identity(&self, address: &str, address_type: AddressType) -> IdentityResult<()> {
        if self.entity.get::<String>(KEY_ADDRESS)?.is_none() {
            self.entity.put(KEY_ADDRESS, address)?;
            self.entity.put(KEY_TYPE, &address_type)?;
            self.entity.put(KEY_NODE_TYPE, &address_type.node_type())?;
        }
        Ok(())
    }

    pub fn address(&self) -> IdentityResult<Option<String>> {
        Ok(self.entity.get(KEY_ADDRESS)?)
    }

    pub fn address_type(&self) -> IdentityResult<Option<AddressType>> {
        Ok(self.entity.get(KEY_TYPE)?)
    }

    pub fn node_type(&self) -> IdentityResult<Option<NodeType>> {
        Ok(self.entity.get(KEY_NODE_TYPE)?)
    }

    /// Raw address and type; an entity without them was never initialised.
    pub fn require_identity(&self) -> IdentityResult<(String, AddressType)> {
        match (self.address()?, self.address_type()?) {
            (Some(address), Some(address_type)) => Ok((address, address_type)),
            _ => Err(IdentityError::internal(format!(
                "address entity {} has no stored address",
                self.urn.entity_id()
            ))),
        }
    }

    pub fn owner(&self) -> IdentityResult<Option<Urn>> {
        Ok(self.entity.get(KEY_ACCOUNT)?)
    }

    /// Claim the address for `account`. Idempotent for the same account.
    pub fn set_owner(&self, account: &Urn) -> IdentityResult<()> {
        match self.owner()? {
            Some(existing) if existing.same_entity(account) => Ok(()),
            Some(_) => Err(IdentityError::conflict("address is linked to another account")),
            None => {
                self.entity.put(KEY_ACCOUNT, &account.base())?;
                Ok(())
            }
        }
    }

    pub fn clear_owner(&self) -> IdentityResult<()> {
        self.entity.delete(KEY_ACCOUNT)?;
        Ok(())
    }

    pub fn nickname(&self) -> IdentityResult<Option<String>> {
        Ok(self.entity.get(KEY_NICKNAME)?)
    }

    pub fn set_nickname(&self, nickname: &str) -> IdentityResult<String> {
        let nickname = nickname.trim();
        if nickname.is_empty() || nickname.chars().count() > MAX_NICKNAME_LEN {
            return Err(IdentityError::bad_request(format!(
                "nickname must be 1-{MAX_NICKNAME_LEN} characters"
            )));
        }
        self.entity.put(KEY_NICKNAME, nickname)?;
        Ok(nickname.to_string())
    }

    /// Placeholder avatar; generated on first read and kept.
    pub fn gradient(&self) -> IdentityResult<String> {
        if let Some(existing) = self.entity.get::<String>(KEY_GRADIENT)? {
            return Ok(existing);
        }
        let (address, _) = self.require_identity()?;
        let image = gradient_data_uri(&address);
        self.entity.put(KEY_GRADIENT, &image)?;
        Ok(image)
    }

    /// Remove every key and the alarm.
    pub fn purge(&self) -> IdentityResult<()> {
        self.entity.delete_all()?;
        Ok(())
    }
}

/// Deterministic two-stop gradient SVG as a `data:` URI.
pub fn gradient_data_uri(address: &str) -> String {
    let digest = Sha256::digest(address.trim().to_lowercase().as_bytes());
    let hue_a = u16::from_be_bytes([digest[0], digest[1]]) % 360;
    let hue_b = (hue_a + 40 + u16::from(digest[2]) % 160) % 360;
    let angle = u16::from(digest[3]) % 360;
    let svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"256\" height=\"256\" viewBox=\"0 0 256 256\">\
<defs><linearGradient id=\"g\" gradientTransform=\"rotate({angle} .5 .5)\">\
<stop offset=\"0%\" stop-color=\"hsl({hue_a},80%,60%)\"/>\
<stop offset=\"100%\" stop-color=\"hsl({hue_b},80%,45%)\"/>\
</linearGradient></defs><rect width=\"256\" height=\"256\" fill=\"url(#g)\"/></svg>"
    );
    format!("data:image/svg+xml;base64,{}", Base64::encode_string(svg.as_bytes()))
}
