// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Alarm Sweeper
//!
//! Background task that fires due entity alarms and retries pending
//! ownership edges.
//!
//! ## Strategy
//!
//! Every `poll_interval` (default 1 s) the sweeper:
//! 1. Lists entities whose alarm is due.
//! 2. Locks each entity, re-reads the alarm (a foreground request may have
//!    moved or cleared it), clears it and dispatches by entity kind:
//!    - crypto addresses: expired nonce challenges are dropped
//!    - email addresses: the OTP is dropped (unclaimed entities are deleted)
//!    - identity groups: expired invitations are dropped
//!
//!    Handlers re-arm the alarm themselves when state remains.
//! 3. Retries the outbox of pending `owns/address` edges.
//!
//! Firing late or twice is harmless; every handler re-checks state first.
//!
//! ## Shutdown
//!
//! Stops on a `tokio_util::sync::CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::account::Resolver;
use crate::address::crypto::ChallengeAuthenticator;
use crate::address::email::{OtpAlarmOutcome, OtpVerifier};
use crate::address::KEY_NODE_TYPE;
use crate::clock::SharedClock;
use crate::group::Groups;
use crate::models::NodeType;
use crate::storage::{Entity, EntityResult, EntityStore};
use crate::urn::UrnKind;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub alarms_fired: usize,
    pub links_reconciled: usize,
}

pub struct AlarmSweeper {
    entities: Arc<EntityStore>,
    clock: SharedClock,
    challenges: Arc<ChallengeAuthenticator>,
    otp: Arc<OtpVerifier>,
    groups: Arc<Groups>,
    resolver: Arc<Resolver>,
    poll_interval: Duration,
}

impl AlarmSweeper {
    pub fn new(
        entities: Arc<EntityStore>,
        clock: SharedClock,
        challenges: Arc<ChallengeAuthenticator>,
        otp: Arc<OtpVerifier>,
        groups: Arc<Groups>,
        resolver: Arc<Resolver>,
    ) -> Self {
        Self {
            entities,
            clock,
            challenges,
            otp,
            groups,
            resolver,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            "Alarm sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Alarm sweeper shutting down");
                return;
            }

            self.sweep_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Alarm sweeper shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over due alarms and pending links.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let due = match self.entities.due_alarms(self.clock.now_ms()) {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Failed to list due alarms");
                Vec::new()
            }
        };
        for (entity_id, _) in due {
            match self.fire(&entity_id).await {
                Ok(true) => report.alarms_fired += 1,
                Ok(false) => {}
                Err(e) => warn!(entity_id = %entity_id, error = %e, "Alarm handler failed"),
            }
        }

        match self.resolver.reconcile_pending().await {
            Ok(n) => report.links_reconciled = n,
            Err(e) => warn!(error = %e, "Pending link reconciliation failed"),
        }
        report
    }

    async fn fire(&self, entity_id: &str) -> EntityResult<bool> {
        let entity = self.entities.entity(entity_id).await;
        let due_at = match entity.alarm()? {
            Some(at) if at <= self.clock.now_ms() => at,
            _ => return Ok(false),
        };
        entity.delete_alarm()?;
        if let Err(e) = self.dispatch(&entity) {
            // Restore the alarm so the next pass retries the handler.
            if let Err(rearm) = entity.set_alarm(due_at) {
                warn!(entity_id = %entity_id, error = %rearm, "Failed to re-arm alarm");
            }
            return Err(e);
        }
        Ok(true)
    }

    fn dispatch(&self, entity: &Entity<'_>) -> EntityResult<()> {
        let kind = entity.id().split('/').next().unwrap_or_default();

        if kind == UrnKind::IdentityGroup.as_str() {
            self.groups.sweep_invitations(entity)?;
            return Ok(());
        }
        if kind != UrnKind::Address.as_str() {
            debug!(entity_id = %entity.id(), "Alarm on entity without handler");
            return Ok(());
        }

        match entity.get::<NodeType>(KEY_NODE_TYPE)? {
            Some(NodeType::Crypto) => {
                let removed = self.challenges.sweep(entity)?;
                debug!(entity_id = %entity.id(), removed, "Challenges swept");
            }
            Some(NodeType::Email) => match self.otp.on_alarm(entity)? {
                OtpAlarmOutcome::CodeCleared => {
                    debug!(entity_id = %entity.id(), "Expired OTP cleared");
                }
                OtpAlarmOutcome::EntityDeleted => {
                    info!(entity_id = %entity.id(), "Unclaimed email address deleted");
                }
            },
            other => {
                debug!(entity_id = %entity.id(), node_type = ?other, "Alarm on address without handler");
            }
        }
        Ok(())
    }
}
