// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Smart-contract wallet session keys.
//!
//! A session key is a secp256k1 key pair generated here and kept only in
//! the contract-wallet entity it names (PKCS#8 PEM under `private-key`).
//! The derived Ethereum address is the entity's natural key.

use alloy::signers::local::PrivateKeySigner;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::rand_core::OsRng;
use k256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use tracing::info;

use super::crypto::address_of;
use super::{AddressNode, KEY_PRIVATE_KEY};
use crate::error::{IdentityError, IdentityResult};
use crate::models::AddressType;
use crate::storage::EntityStore;
use crate::urn::Urn;

#[derive(Debug, thiserror::Error)]
pub enum SessionKeyError {
    #[error("failed to encode private key: {0}")]
    Encode(String),

    #[error("stored private key is unreadable: {0}")]
    Decode(String),
}

impl From<SessionKeyError> for IdentityError {
    fn from(err: SessionKeyError) -> Self {
        IdentityError::internal(err.to_string())
    }
}

/// New key pair as `(pkcs8 pem, 0x address)`.
fn generate_session_key() -> Result<(String, String), SessionKeyError> {
    let signing_key = SigningKey::random(&mut OsRng);
    let pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| SessionKeyError::Encode(e.to_string()))?;
    let address = address_of(signing_key.verifying_key());
    Ok((pem.to_string(), address))
}

/// Signer for a stored PEM key.
pub fn signer_from_pem(pem_text: &str) -> Result<PrivateKeySigner, SessionKeyError> {
    let parsed = pem::parse(pem_text).map_err(|e| SessionKeyError::Decode(e.to_string()))?;
    let key = SigningKey::from_pkcs8_der(parsed.contents())
        .map_err(|e| SessionKeyError::Decode(e.to_string()))?;
    Ok(PrivateKeySigner::from_signing_key(key))
}

/// Signer for the session key held by a contract-wallet entity.
pub fn session_signer(node: &AddressNode<'_>) -> IdentityResult<PrivateKeySigner> {
    let pem_text: String = node
        .entity()
        .get(KEY_PRIVATE_KEY)?
        .ok_or_else(|| IdentityError::not_found("no session key for this address"))?;
    Ok(signer_from_pem(&pem_text)?)
}

/// Create a contract-wallet address with a fresh session key.
pub async fn init_contract_wallet(
    store: &EntityStore,
    nickname: Option<&str>,
) -> IdentityResult<Urn> {
    let (pem_text, address) = generate_session_key()?;
    let urn = Urn::address(AddressType::ContractWallet, &address);

    let node = AddressNode::open(store, &urn).await;
    node.ensure_identity(&address, AddressType::ContractWallet)?;
    node.entity().put(KEY_PRIVATE_KEY, &pem_text)?;
    if let Some(nickname) = nickname {
        node.set_nickname(nickname)?;
    }

    let signer = session_signer(&node)?;
    if alloy::hex::encode(signer.address().as_slice()) != address.trim_start_matches("0x") {
        return Err(IdentityError::internal("session key does not match derived address"));
    }

    info!(address_urn = %urn, "Contract wallet session key created");
    Ok(urn)
}
