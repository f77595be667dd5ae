// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Short-lived address proof tokens.
//!
//! Every successful ownership proof (signed nonce, email code, OAuth
//! callback, contract wallet creation) is answered with an HS256 token whose
//! `sub` is the proven address URN. Account resolution only accepts an
//! address presented with such a token.

use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use super::error::AuthError;
use crate::clock::SharedClock;
use crate::urn::{Urn, UrnKind};

pub const PROOF_TTL: Duration = Duration::from_secs(300);
const PROOF_TYPE: &str = "address-proof";

#[derive(Debug, Serialize, Deserialize)]
struct ProofClaims {
    sub: String,
    iat: i64,
    exp: i64,
    typ: String,
}

pub struct ProofSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    clock: SharedClock,
}

impl ProofSigner {
    pub fn new(secret: &[u8], clock: SharedClock) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: PROOF_TTL,
            clock,
        }
    }

    /// Signer with a process-local random secret; tokens die with the process.
    pub fn ephemeral(clock: SharedClock) -> Result<Self, AuthError> {
        let mut secret = [0u8; 32];
        SystemRandom::new()
            .fill(&mut secret)
            .map_err(|_| AuthError::InternalError("secret generation failed".into()))?;
        Ok(Self::new(&secret, clock))
    }

    pub fn issue(&self, address: &Urn) -> Result<String, AuthError> {
        let now_s = self.clock.now_ms() / 1000;
        let claims = ProofClaims {
            sub: address.routed().to_string(),
            iat: now_s,
            exp: now_s + self.ttl.as_secs() as i64,
            typ: PROOF_TYPE.to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::InternalError(format!("proof signing failed: {e}")))
    }

    /// Address URN carried by a valid, unexpired proof.
    pub fn verify(&self, token: &str) -> Result<Urn, AuthError> {
        // Expiry is checked against the injected clock below.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;

        let claims = decode::<ProofClaims>(token, &self.decoding, &validation)
            .map_err(|_| AuthError::InvalidProof)?
            .claims;

        if claims.typ != PROOF_TYPE || claims.exp * 1000 <= self.clock.now_ms() {
            return Err(AuthError::InvalidProof);
        }
        let urn = Urn::parse(&claims.sub).map_err(|_| AuthError::InvalidProof)?;
        if urn.kind() != UrnKind::Address {
            return Err(AuthError::InvalidProof);
        }
        Ok(urn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::clock::ManualClock;
    use crate::models::AddressType;

    fn signer(secret: &[u8]) -> (ManualClock, ProofSigner) {
        let clock = ManualClock::new(1_700_000_000_000);
        let signer = ProofSigner::new(secret, Arc::new(clock.clone()));
        (clock, signer)
    }

    #[test]
    fn proof_carries_routed_urn() {
        let (_clock, signer) = signer(b"secret");
        let urn = Urn::address(AddressType::Email, "a@b.c").with_q("alias", "Me");
        let token = signer.issue(&urn).unwrap();
        let proven = signer.verify(&token).unwrap();
        assert!(proven.same_entity(&urn));
        assert!(proven.qc().is_empty());
        assert_eq!(proven.address_type(), Some(AddressType::Email));
    }

    #[test]
    fn expired_proof_is_rejected() {
        let (clock, signer) = signer(b"secret");
        let token = signer
            .issue(&Urn::address(AddressType::Eth, "0x01"))
            .unwrap();
        clock.advance(PROOF_TTL);
        assert!(matches!(signer.verify(&token), Err(AuthError::InvalidProof)));
    }

    #[test]
    fn foreign_secret_and_non_address_subjects_fail() {
        let (_c1, ours) = signer(b"ours");
        let (_c2, theirs) = signer(b"theirs");
        let token = theirs
            .issue(&Urn::address(AddressType::Eth, "0x01"))
            .unwrap();
        assert!(ours.verify(&token).is_err());

        let account = ours.issue(&Urn::random(UrnKind::Account)).unwrap();
        assert!(matches!(ours.verify(&account), Err(AuthError::InvalidProof)));
    }
}
