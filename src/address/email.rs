// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One-time codes for email addresses.
//!
//! ## Rate limits on generation
//!
//! Checked in order against the outstanding payload:
//!
//! 1. `attempts` already at `max_attempts` and the cool-down since the last
//!    code has not elapsed → [`OtpError::CoolingDown`].
//! 2. The last code's regeneration delay has not elapsed → [`OtpError::TooSoon`].
//! 3. Otherwise a new code replaces the old one. Reaching `max_attempts`
//!    inside the attempt window arms the alarm for the cool-down; every
//!    other generation arms it for the code TTL.
//!
//! The attempt counter restarts once the window since the first attempt has
//! passed. Verification never mutates the counter.

use std::time::Duration;

use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use super::{AddressNode, KEY_MASKED_PREFIX, KEY_OTP};
use crate::clock::SharedClock;
use crate::error::{IdentityError, IdentityResult};
use crate::models::AddressType;
use crate::storage::{Entity, EntityStoreError};

pub const CODE_LENGTH: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MASK_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

const MASK_WORDS: &[&str] = &[
    "amber", "arch", "birch", "blue", "brisk", "cedar", "cinder", "clever", "cobalt", "coral",
    "crisp", "dawn", "delta", "dune", "ember", "fern", "flint", "frost", "gentle", "glade",
    "golden", "granite", "harbor", "hazel", "indigo", "iron", "jade", "juniper", "keen", "lark",
    "lively", "lunar", "maple", "meadow", "misty", "noble", "north", "oak", "ocean", "olive",
    "pebble", "pine", "quiet", "rapid", "raven", "ridge", "river", "sage", "silver", "solar",
    "spruce", "stone", "swift", "tidal", "umber", "velvet", "willow", "winter", "zephyr", "zinc",
];

#[derive(Debug, Clone, Copy)]
pub struct OtpSettings {
    pub code_ttl: Duration,
    pub max_attempts: u32,
    pub max_attempts_window: Duration,
    pub cooldown: Duration,
    pub regeneration_delay: Duration,
}

impl Default for OtpSettings {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_millis(300_000),
            max_attempts: 5,
            max_attempts_window: Duration::from_millis(300_000),
            cooldown: Duration::from_millis(600_000),
            regeneration_delay: Duration::from_millis(30_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct OtpPayload {
    state: String,
    code: String,
    created_at: i64,
    delay_ms: i64,
    attempts: u32,
    first_attempt_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("too many codes requested; try again later")]
    CoolingDown { remaining: Duration },

    #[error("a code was requested too recently")]
    TooSoon { retry_after: Duration },

    #[error(transparent)]
    Store(#[from] EntityStoreError),

    #[error("system randomness unavailable")]
    Randomness,
}

impl From<OtpError> for IdentityError {
    fn from(err: OtpError) -> Self {
        let message = err.to_string();
        match err {
            OtpError::CoolingDown { remaining } => IdentityError::RateLimited {
                message,
                retry_after: Some(remaining),
            },
            OtpError::TooSoon { retry_after } => IdentityError::RateLimited {
                message,
                retry_after: Some(retry_after),
            },
            OtpError::Store(e) => IdentityError::Store(e),
            OtpError::Randomness => IdentityError::internal(message),
        }
    }
}

/// What the alarm did to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpAlarmOutcome {
    /// Owned address: only the code was dropped.
    CodeCleared,
    /// Unclaimed address: the whole entity was deleted.
    EntityDeleted,
}

pub struct OtpVerifier {
    settings: OtpSettings,
    clock: SharedClock,
    rng: SystemRandom,
}

fn ms(d: Duration) -> i64 {
    d.as_millis() as i64
}

impl OtpVerifier {
    pub fn new(settings: OtpSettings, clock: SharedClock) -> Self {
        Self {
            settings,
            clock,
            rng: SystemRandom::new(),
        }
    }

    pub fn settings(&self) -> &OtpSettings {
        &self.settings
    }

    /// Issue a fresh code for `state`, replacing any outstanding one.
    pub fn generate_code(
        &self,
        node: &AddressNode<'_>,
        email: &str,
        state: &str,
        delay_override: Option<Duration>,
    ) -> Result<String, OtpError> {
        let entity = node.entity();
        let now = self.clock.now_ms();
        let delay_ms = ms(delay_override.unwrap_or(self.settings.regeneration_delay));
        let code = random_string(&self.rng, CODE_ALPHABET, CODE_LENGTH)?;

        if entity.get::<String>(super::KEY_ADDRESS)?.is_none() {
            entity.put(super::KEY_ADDRESS, email)?;
            entity.put(super::KEY_TYPE, &AddressType::Email)?;
            entity.put(super::KEY_NODE_TYPE, &AddressType::Email.node_type())?;
        }

        let previous: Option<OtpPayload> = entity.get(KEY_OTP)?;
        let (attempts, first_attempt_at) = match previous {
            Some(prev) => {
                let cooldown_ends = prev.created_at + ms(self.settings.cooldown);
                if prev.attempts + 1 > self.settings.max_attempts && cooldown_ends > now {
                    return Err(OtpError::CoolingDown {
                        remaining: Duration::from_millis((cooldown_ends - now) as u64),
                    });
                }
                let delay_ends = prev.created_at + prev.delay_ms;
                if delay_ends > now {
                    return Err(OtpError::TooSoon {
                        retry_after: Duration::from_millis((delay_ends - now) as u64),
                    });
                }

                let in_window = prev.first_attempt_at + ms(self.settings.max_attempts_window) > now;
                if prev.attempts + 1 == self.settings.max_attempts && in_window {
                    entity.set_alarm(now + ms(self.settings.cooldown))?;
                } else {
                    entity.set_alarm(now + ms(self.settings.code_ttl))?;
                }

                if in_window {
                    (prev.attempts + 1, prev.first_attempt_at)
                } else {
                    (1, now)
                }
            }
            None => {
                entity.set_alarm(now + ms(self.settings.code_ttl))?;
                (1, now)
            }
        };

        entity.put(
            KEY_OTP,
            &OtpPayload {
                state: state.to_string(),
                code: code.clone(),
                created_at: now,
                delay_ms,
                attempts,
                first_attempt_at,
            },
        )?;
        info!(address_urn = %node.urn(), attempts, "Email code generated");
        Ok(code)
    }

    /// `true` only for an exact, timely match, which consumes the code.
    pub fn verify_code(
        &self,
        node: &AddressNode<'_>,
        code: &str,
        state: &str,
    ) -> Result<bool, EntityStoreError> {
        let entity = node.entity();
        let Some(payload) = entity.get::<OtpPayload>(KEY_OTP)? else {
            debug!(address_urn = %node.urn(), "No outstanding email code");
            return Ok(false);
        };

        let state_ok: bool = payload.state.as_bytes().ct_eq(state.as_bytes()).into();
        let code_ok: bool = payload.code.as_bytes().ct_eq(code.as_bytes()).into();
        let fresh = payload.created_at + ms(self.settings.code_ttl) > self.clock.now_ms();

        if !(state_ok && code_ok && fresh) {
            debug!(address_urn = %node.urn(), "Email code rejected");
            return Ok(false);
        }

        entity.delete(KEY_OTP)?;
        info!(address_urn = %node.urn(), "Email code verified");
        Ok(true)
    }

    /// Alarm handler. Unclaimed addresses leave nothing behind.
    pub fn on_alarm(&self, entity: &Entity<'_>) -> Result<OtpAlarmOutcome, EntityStoreError> {
        if entity.get::<serde_json::Value>(super::KEY_ACCOUNT)?.is_some() {
            entity.delete(KEY_OTP)?;
            Ok(OtpAlarmOutcome::CodeCleared)
        } else {
            entity.delete_all()?;
            Ok(OtpAlarmOutcome::EntityDeleted)
        }
    }

    /// Stable per-client alias for the email address.
    pub fn masked_email(
        &self,
        node: &AddressNode<'_>,
        client_id: &str,
        domain: &str,
    ) -> IdentityResult<String> {
        let client_id = client_id.trim();
        if client_id.is_empty() || client_id.contains('/') {
            return Err(IdentityError::bad_request("invalid clientId"));
        }
        let key = format!("{KEY_MASKED_PREFIX}{client_id}");
        let entity = node.entity();
        if let Some(existing) = entity.get::<String>(&key)? {
            return Ok(existing);
        }

        let mut words = Vec::with_capacity(3);
        for _ in 0..3 {
            let mut b = [0u8; 1];
            self.rng.fill(&mut b).map_err(|_| OtpError::Randomness)?;
            words.push(MASK_WORDS[usize::from(b[0]) % MASK_WORDS.len()]);
        }
        let bits = random_string(&self.rng, MASK_ALPHABET, 6)?;
        let masked = format!("{}-{bits}@{domain}", words.join("-"));

        entity.put(&key, &masked)?;
        info!(address_urn = %node.urn(), client_id = %client_id, "Masked email created");
        Ok(masked)
    }
}

/// Uniform random string over `alphabet` by rejection sampling.
fn random_string(rng: &SystemRandom, alphabet: &[u8], len: usize) -> Result<String, OtpError> {
    let limit = 256 - (256 % alphabet.len());
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 32];
    while out.len() < len {
        rng.fill(&mut buf).map_err(|_| OtpError::Randomness)?;
        for &b in buf.iter() {
            if (b as usize) < limit && out.len() < len {
                out.push(alphabet[b as usize % alphabet.len()] as char);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::clock::{Clock, ManualClock};
    use crate::storage::EntityStore;
    use crate::urn::{Urn, UrnKind};

    const EMAIL: &str = "alice@example.com";

    fn fixture() -> (tempfile::TempDir, ManualClock, EntityStore, OtpVerifier) {
        let dir = tempfile::tempdir().unwrap();
        let store = EntityStore::open(&dir.path().join("entities.redb")).unwrap();
        let clock = ManualClock::new(10_000_000);
        let otp = OtpVerifier::new(OtpSettings::default(), Arc::new(clock.clone()));
        (dir, clock, store, otp)
    }

    fn urn() -> Urn {
        Urn::address(AddressType::Email, EMAIL)
    }

    #[tokio::test]
    async fn code_shape_and_single_use() {
        let (_dir, _clock, store, otp) = fixture();
        let node = AddressNode::open(&store, &urn()).await;

        let code = otp.generate_code(&node, EMAIL, "s1", None).unwrap();
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

        assert!(otp.verify_code(&node, &code, "s1").unwrap());
        assert!(!otp.verify_code(&node, &code, "s1").unwrap());
    }

    #[tokio::test]
    async fn wrong_state_or_code_does_not_consume() {
        let (_dir, _clock, store, otp) = fixture();
        let node = AddressNode::open(&store, &urn()).await;
        let code = otp.generate_code(&node, EMAIL, "s1", None).unwrap();

        assert!(!otp.verify_code(&node, &code, "s2").unwrap());
        assert!(!otp.verify_code(&node, "ZZZZZZZ", "s1").unwrap());
        assert!(otp.verify_code(&node, &code, "s1").unwrap());
    }

    #[tokio::test]
    async fn code_match_is_exact() {
        let (_dir, _clock, store, otp) = fixture();
        let node = AddressNode::open(&store, &urn()).await;
        let code = loop {
            // Needs a letter so the lower-cased form differs.
            let code = otp.generate_code(&node, EMAIL, "s1", Some(Duration::ZERO)).unwrap();
            if code.chars().any(|c| c.is_ascii_alphabetic()) {
                break code;
            }
        };

        assert!(!otp.verify_code(&node, &code.to_lowercase(), "s1").unwrap());
        assert!(!otp.verify_code(&node, &format!(" {code} "), "s1").unwrap());
        assert!(otp.verify_code(&node, &code, "s1").unwrap());
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let (_dir, clock, store, otp) = fixture();
        let node = AddressNode::open(&store, &urn()).await;
        let code = otp.generate_code(&node, EMAIL, "s1", None).unwrap();

        clock.advance(Duration::from_millis(300_000));
        assert!(!otp.verify_code(&node, &code, "s1").unwrap());
    }

    #[tokio::test]
    async fn regeneration_delay_is_enforced() {
        let (_dir, clock, store, otp) = fixture();
        let node = AddressNode::open(&store, &urn()).await;
        otp.generate_code(&node, EMAIL, "s1", None).unwrap();

        clock.advance(Duration::from_secs(10));
        match otp.generate_code(&node, EMAIL, "s1", None) {
            Err(OtpError::TooSoon { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(20))
            }
            other => panic!("expected TooSoon, got {other:?}"),
        }

        clock.advance(Duration::from_secs(20));
        otp.generate_code(&node, EMAIL, "s1", None).unwrap();
    }

    #[tokio::test]
    async fn new_code_invalidates_old_one() {
        let (_dir, clock, store, otp) = fixture();
        let node = AddressNode::open(&store, &urn()).await;
        let first = otp.generate_code(&node, EMAIL, "s1", None).unwrap();
        clock.advance(Duration::from_secs(30));
        let second = otp.generate_code(&node, EMAIL, "s1", None).unwrap();

        if first != second {
            assert!(!otp.verify_code(&node, &first, "s1").unwrap());
        }
        assert!(otp.verify_code(&node, &second, "s1").unwrap());
    }

    #[tokio::test]
    async fn max_attempts_trigger_cooldown() {
        let (_dir, clock, store, otp) = fixture();
        let node = AddressNode::open(&store, &urn()).await;
        let start = clock.now_ms();

        for i in 0..5 {
            otp.generate_code(&node, EMAIL, "s1", None).unwrap();
            if i < 4 {
                assert_eq!(node.entity().alarm().unwrap(), Some(clock.now_ms() + 300_000));
            }
            clock.advance(Duration::from_secs(30));
        }
        // Fifth code inside the window arms the cool-down alarm.
        assert_eq!(node.entity().alarm().unwrap(), Some(start + 120_000 + 600_000));

        match otp.generate_code(&node, EMAIL, "s1", None) {
            Err(OtpError::CoolingDown { remaining }) => {
                assert_eq!(remaining, Duration::from_millis(600_000 - 30_000));
            }
            other => panic!("expected CoolingDown, got {other:?}"),
        }

        // Once the cool-down has passed generation works again and the
        // window restarts.
        clock.set(start + 120_000 + 600_000);
        otp.generate_code(&node, EMAIL, "s1", None).unwrap();
        let payload: OtpPayload = node.entity().get(KEY_OTP).unwrap().unwrap();
        assert_eq!(payload.attempts, 1);
        assert_eq!(payload.first_attempt_at, clock.now_ms());
    }

    #[tokio::test]
    async fn rate_limits_map_to_retry_after() {
        let err = IdentityError::from(OtpError::CoolingDown {
            remaining: Duration::from_secs(5),
        });
        match err {
            IdentityError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(5)))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn alarm_deletes_unclaimed_entity() {
        let (_dir, _clock, store, otp) = fixture();
        let node = AddressNode::open(&store, &urn()).await;
        otp.generate_code(&node, EMAIL, "s1", None).unwrap();

        assert_eq!(otp.on_alarm(node.entity()).unwrap(), OtpAlarmOutcome::EntityDeleted);
        assert!(!node.entity().exists().unwrap());
        assert_eq!(node.entity().alarm().unwrap(), None);
    }

    #[tokio::test]
    async fn alarm_keeps_owned_entity() {
        let (_dir, _clock, store, otp) = fixture();
        let node = AddressNode::open(&store, &urn()).await;
        otp.generate_code(&node, EMAIL, "s1", None).unwrap();
        node.set_owner(&Urn::random(UrnKind::Account)).unwrap();

        assert_eq!(otp.on_alarm(node.entity()).unwrap(), OtpAlarmOutcome::CodeCleared);
        assert!(node.entity().get::<OtpPayload>(KEY_OTP).unwrap().is_none());
        assert!(node.owner().unwrap().is_some());
        assert_eq!(node.address().unwrap().as_deref(), Some(EMAIL));
    }

    #[tokio::test]
    async fn masked_email_is_stable_per_client() {
        let (_dir, _clock, store, otp) = fixture();
        let node = AddressNode::open(&store, &urn()).await;

        let a = otp.masked_email(&node, "client-a", "mask.example").unwrap();
        assert!(a.ends_with("@mask.example"));
        assert_eq!(a.split('@').next().unwrap().split('-').count(), 4);
        assert_eq!(otp.masked_email(&node, "client-a", "mask.example").unwrap(), a);

        let b = otp.masked_email(&node, "client-b", "mask.example").unwrap();
        assert_ne!(a, b);
        assert!(otp.masked_email(&node, "", "mask.example").is_err());
    }
}
