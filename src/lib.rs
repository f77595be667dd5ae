// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity Graph Server - address ownership proofs and account resolution
//!
//! External identifiers (wallets, email addresses, OAuth accounts, contract
//! wallets) are proven here, resolved into platform accounts and recorded
//! in an ownership graph.
//!
//! ## Modules
//!
//! - `address` - Address entities and their verifiers (nonce, OTP, OAuth)
//! - `account` - Account profiles and address-to-account resolution
//! - `group` - Identity groups and invitations
//! - `edges` - Edge graph service (embedded redb store or remote client)
//! - `storage` - Per-entity key/value store with alarms (redb)
//! - `sweeper` - Background alarm dispatch and pending-link retry
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Bearer credentials, proof tokens, edge service token

pub mod account;
pub mod address;
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod edges;
pub mod error;
pub mod group;
pub mod models;
pub mod state;
pub mod storage;
pub mod sweeper;
pub mod urn;
