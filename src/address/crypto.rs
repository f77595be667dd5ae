// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signed-nonce challenges for crypto addresses (EIP-191 personal messages).
//!
//! A challenge is issued for a wallet address with a message template
//! containing `{{nonce}}`. The wallet signs the rendered message and the
//! signer address is recovered from the signature. Challenges are single-use
//! and expire after the configured TTL; the entity alarm sweeps stale ones.

use std::collections::BTreeMap;
use std::time::Duration;

use alloy::primitives::keccak256;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;

use super::{AddressNode, KEY_CHALLENGES};
use crate::clock::SharedClock;
use crate::error::{IdentityError, IdentityResult};
use crate::models::AddressType;
use crate::storage::{Entity, EntityStoreError};

pub const NONCE_PLACEHOLDER: &str = "{{nonce}}";
const NONCE_BYTES: usize = 24;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub address: String,
    pub template: String,
    pub redirect_uri: String,
    pub scope: Vec<String>,
    pub state: String,
    pub created_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error("nonce not found")]
    NotFound,

    #[error("signature is malformed")]
    MalformedSignature,

    #[error("recovered address does not match the challenge")]
    AddressMismatch,

    #[error(transparent)]
    Store(#[from] EntityStoreError),
}

impl From<ChallengeError> for IdentityError {
    fn from(err: ChallengeError) -> Self {
        match err {
            // Every verification failure looks like an unknown nonce.
            ChallengeError::NotFound
            | ChallengeError::MalformedSignature
            | ChallengeError::AddressMismatch => IdentityError::not_found("nonce not found"),
            ChallengeError::Store(e) => IdentityError::Store(e),
        }
    }
}

pub struct IssueNonce<'r> {
    pub address: &'r str,
    pub template: &'r str,
    pub redirect_uri: &'r str,
    pub scope: &'r [String],
    pub state: &'r str,
}

pub struct ChallengeAuthenticator {
    ttl: Duration,
    clock: SharedClock,
    rng: SystemRandom,
}

impl ChallengeAuthenticator {
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            ttl,
            clock,
            rng: SystemRandom::new(),
        }
    }

    fn ttl_ms(&self) -> i64 {
        self.ttl.as_millis() as i64
    }

    pub fn issue_nonce(&self, node: &AddressNode<'_>, req: IssueNonce<'_>) -> IdentityResult<String> {
        if !req.template.contains(NONCE_PLACEHOLDER) {
            return Err(IdentityError::bad_request(format!(
                "template must contain {NONCE_PLACEHOLDER}"
            )));
        }
        parse_wallet_address(req.address)?;
        url::Url::parse(req.redirect_uri)
            .map_err(|e| IdentityError::bad_request(format!("invalid redirectUri: {e}")))?;

        node.ensure_identity(req.address, AddressType::Eth)?;

        let mut bytes = [0u8; NONCE_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| IdentityError::internal("system randomness unavailable"))?;
        let nonce = alloy::hex::encode(bytes);

        let now = self.clock.now_ms();
        let entity = node.entity();
        let mut challenges = load(entity)?;
        challenges.insert(
            nonce.clone(),
            Challenge {
                address: req.address.to_string(),
                template: req.template.to_string(),
                redirect_uri: req.redirect_uri.to_string(),
                scope: req.scope.to_vec(),
                state: req.state.to_string(),
                created_at: now,
            },
        );
        entity.put(KEY_CHALLENGES, &challenges)?;

        let due = now + self.ttl_ms();
        match entity.alarm()? {
            Some(existing) if existing <= due => {}
            _ => entity.set_alarm(due)?,
        }

        info!(address_urn = %node.urn(), "Nonce issued");
        Ok(nonce)
    }

    /// Consume the challenge if `signature` was produced by its address.
    ///
    /// A mismatched signature leaves the challenge in place so the holder of
    /// the right key can still complete it before it expires.
    pub fn verify_nonce(
        &self,
        node: &AddressNode<'_>,
        nonce: &str,
        signature: &str,
    ) -> Result<Challenge, ChallengeError> {
        let entity = node.entity();
        let mut challenges = load(entity)?;
        let challenge = challenges.get(nonce).cloned().ok_or(ChallengeError::NotFound)?;
        if challenge.created_at + self.ttl_ms() <= self.clock.now_ms() {
            return Err(ChallengeError::NotFound);
        }

        let message = challenge.template.replace(NONCE_PLACEHOLDER, nonce);
        let recovered = recover_personal_signer(&message, signature)?;
        let expected = challenge.address.trim().to_lowercase();
        if recovered != expected {
            debug!(address_urn = %node.urn(), "Nonce signature from a different key");
            return Err(ChallengeError::AddressMismatch);
        }

        challenges.remove(nonce);
        if challenges.is_empty() {
            entity.delete(KEY_CHALLENGES)?;
        } else {
            entity.put(KEY_CHALLENGES, &challenges)?;
        }
        info!(address_urn = %node.urn(), "Nonce verified");
        Ok(challenge)
    }

    /// Alarm handler: drop expired challenges, re-arm for the next expiry.
    pub fn sweep(&self, entity: &Entity<'_>) -> Result<usize, EntityStoreError> {
        let now = self.clock.now_ms();
        let ttl = self.ttl_ms();
        let mut challenges = load(entity)?;
        let before = challenges.len();
        challenges.retain(|_, c| c.created_at + ttl > now);
        let removed = before - challenges.len();

        match challenges.values().map(|c| c.created_at + ttl).min() {
            Some(next) => {
                entity.put(KEY_CHALLENGES, &challenges)?;
                entity.set_alarm(next)?;
            }
            None => {
                entity.delete(KEY_CHALLENGES)?;
                entity.delete_alarm()?;
            }
        }
        Ok(removed)
    }
}

fn load(entity: &Entity<'_>) -> Result<BTreeMap<String, Challenge>, EntityStoreError> {
    Ok(entity.get(KEY_CHALLENGES)?.unwrap_or_default())
}

fn parse_wallet_address(address: &str) -> IdentityResult<()> {
    let hex = address
        .strip_prefix("0x")
        .ok_or_else(|| IdentityError::bad_request("address must be 0x-prefixed"))?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IdentityError::bad_request("address must be 20 hex-encoded bytes"));
    }
    Ok(())
}

/// EIP-191 prefixed message: `"\x19Ethereum Signed Message:\n" + len + message`.
pub fn eip191_message(message: &str) -> String {
    format!("\x19Ethereum Signed Message:\n{}{}", message.len(), message)
}

/// Lowercase `0x` address of the public key.
pub fn address_of(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", alloy::hex::encode(&hash[12..]))
}

/// Recover the signer of a personal message from a 65-byte `r || s || v`
/// hex signature.
pub fn recover_personal_signer(message: &str, signature: &str) -> Result<String, ChallengeError> {
    let raw = alloy::hex::decode(signature.trim().trim_start_matches("0x"))
        .map_err(|_| ChallengeError::MalformedSignature)?;
    if raw.len() != 65 {
        return Err(ChallengeError::MalformedSignature);
    }

    let v = raw[64];
    let recovery_id = RecoveryId::try_from(if v >= 27 { v - 27 } else { v })
        .map_err(|_| ChallengeError::MalformedSignature)?;
    let sig = Signature::try_from(&raw[..64]).map_err(|_| ChallengeError::MalformedSignature)?;

    let hash = keccak256(eip191_message(message).as_bytes());
    let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &sig, recovery_id)
        .map_err(|_| ChallengeError::AddressMismatch)?;
    Ok(address_of(&key))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use k256::ecdsa::SigningKey;
    use k256::elliptic_curve::rand_core::OsRng;

    use crate::clock::ManualClock;
    use crate::storage::EntityStore;
    use crate::urn::Urn;

    /// Sign `message` the way a wallet's `personal_sign` does.
    pub(crate) fn personal_sign(key: &SigningKey, message: &str) -> String {
        let hash = keccak256(eip191_message(message).as_bytes());
        let (sig, recid) = key.sign_prehash_recoverable(hash.as_slice()).unwrap();
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte() + 27);
        format!("0x{}", alloy::hex::encode(bytes))
    }

    pub(crate) fn wallet() -> (SigningKey, String) {
        let key = SigningKey::random(&mut OsRng);
        let address = address_of(key.verifying_key());
        (key, address)
    }

    fn fixture() -> (tempfile::TempDir, ManualClock, EntityStore, ChallengeAuthenticator) {
        let dir = tempfile::tempdir().unwrap();
        let store = EntityStore::open(&dir.path().join("entities.redb")).unwrap();
        let clock = ManualClock::new(1_000_000);
        let auth = ChallengeAuthenticator::new(Duration::from_secs(60), Arc::new(clock.clone()));
        (dir, clock, store, auth)
    }

    fn request<'r>(address: &'r str, template: &'r str, scope: &'r [String]) -> IssueNonce<'r> {
        IssueNonce {
            address,
            template,
            redirect_uri: "https://app.example/callback",
            scope,
            state: "st-1",
        }
    }

    #[test]
    fn eip191_message_format() {
        assert_eq!(
            eip191_message("Hello, Ethereum!"),
            "\x19Ethereum Signed Message:\n16Hello, Ethereum!"
        );
    }

    #[tokio::test]
    async fn issue_then_verify_is_single_use() {
        let (_dir, _clock, store, auth) = fixture();
        let (key, address) = wallet();
        let urn = Urn::address(AddressType::Eth, &address);
        let node = AddressNode::open(&store, &urn).await;
        let scope = vec!["admin".to_string()];

        let nonce = auth
            .issue_nonce(&node, request(&address, "Sign in: {{nonce}}", &scope))
            .unwrap();
        assert_eq!(nonce.len(), NONCE_BYTES * 2);
        assert_eq!(node.entity().alarm().unwrap(), Some(1_060_000));

        let signature = personal_sign(&key, &format!("Sign in: {nonce}"));
        let challenge = auth.verify_nonce(&node, &nonce, &signature).unwrap();
        assert_eq!(challenge.address, address);
        assert_eq!(challenge.scope, scope);
        assert_eq!(challenge.state, "st-1");

        let again = auth.verify_nonce(&node, &nonce, &signature).unwrap_err();
        assert!(matches!(again, ChallengeError::NotFound));
    }

    #[tokio::test]
    async fn template_without_placeholder_is_rejected() {
        let (_dir, _clock, store, auth) = fixture();
        let (_, address) = wallet();
        let node = AddressNode::open(&store, &Urn::address(AddressType::Eth, &address)).await;
        let err = auth
            .issue_nonce(&node, request(&address, "Sign in please", &[]))
            .unwrap_err();
        assert!(matches!(err, IdentityError::BadRequest(_)));
    }

    #[tokio::test]
    async fn wrong_key_and_flipped_bit_fail_without_consuming() {
        let (_dir, _clock, store, auth) = fixture();
        let (key, address) = wallet();
        let (other_key, _) = wallet();
        let node = AddressNode::open(&store, &Urn::address(AddressType::Eth, &address)).await;

        let nonce = auth
            .issue_nonce(&node, request(&address, "{{nonce}}", &[]))
            .unwrap();

        let forged = personal_sign(&other_key, &nonce);
        assert!(matches!(
            auth.verify_nonce(&node, &nonce, &forged),
            Err(ChallengeError::AddressMismatch)
        ));

        let good = personal_sign(&key, &nonce);
        let mut raw = alloy::hex::decode(good.trim_start_matches("0x")).unwrap();
        raw[10] ^= 0x01;
        let flipped = format!("0x{}", alloy::hex::encode(&raw));
        assert!(auth.verify_nonce(&node, &nonce, &flipped).is_err());

        assert!(auth.verify_nonce(&node, &nonce, "0x1234").is_err());

        // Still redeemable with the right key.
        auth.verify_nonce(&node, &nonce, &good).unwrap();
    }

    #[tokio::test]
    async fn expired_nonce_is_not_found_and_swept() {
        let (_dir, clock, store, auth) = fixture();
        let (key, address) = wallet();
        let node = AddressNode::open(&store, &Urn::address(AddressType::Eth, &address)).await;

        let old = auth.issue_nonce(&node, request(&address, "{{nonce}}", &[])).unwrap();
        clock.advance(Duration::from_secs(30));
        let fresh = auth.issue_nonce(&node, request(&address, "{{nonce}}", &[])).unwrap();
        // Earliest expiry keeps the alarm.
        assert_eq!(node.entity().alarm().unwrap(), Some(1_060_000));

        clock.advance(Duration::from_secs(30));
        let sig = personal_sign(&key, &old);
        assert!(matches!(
            auth.verify_nonce(&node, &old, &sig),
            Err(ChallengeError::NotFound)
        ));

        assert_eq!(auth.sweep(node.entity()).unwrap(), 1);
        assert_eq!(node.entity().alarm().unwrap(), Some(1_090_000));

        clock.advance(Duration::from_secs(30));
        assert_eq!(auth.sweep(node.entity()).unwrap(), 1);
        assert!(node
            .entity()
            .get::<BTreeMap<String, Challenge>>(KEY_CHALLENGES)
            .unwrap()
            .is_none());
        let sig = personal_sign(&key, &fresh);
        assert!(auth.verify_nonce(&node, &fresh, &sig).is_err());
    }

    #[test]
    fn verification_errors_collapse_to_not_found() {
        for err in [
            ChallengeError::NotFound,
            ChallengeError::MalformedSignature,
            ChallengeError::AddressMismatch,
        ] {
            let mapped = IdentityError::from(err);
            assert!(matches!(mapped, IdentityError::NotFound(ref m) if m == "nonce not found"));
        }
    }
}
