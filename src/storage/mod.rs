// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent state lives in embedded redb databases under the data root.
//!
//! ## Storage Layout
//!
//! ```text
//! $DATA_DIR/
//!   entities.redb   # per-entity key/value data + alarms
//!   edges.redb      # embedded edge graph (when no remote EDGES_URL)
//! ```
//!
//! ## Entity keys
//!
//! | Entity | Keys |
//! |--------|------|
//! | address | `address`, `type`, `nodeType`, `account`, `nickname`, `gradient`, `data`, `otp`, `challenges`, `private-key`, `masked-address/<client>` |
//! | account | `profile` |
//! | identity-group | `name`, `invitations` |
//! | system/outbox | `link/<address id>` |

pub mod entity_store;
pub mod paths;
pub mod profile_cache;

pub use entity_store::{Entity, EntityResult, EntityStore, EntityStoreError};
pub use paths::StoragePaths;
pub use profile_cache::ProfileCache;
