// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Three credentials are in play:
//!
//! 1. **Bearer credential** (`Authorization: Bearer <JWT>`): issued by the
//!    platform's session service and verified against `JWKS_URL`. Its `sub`
//!    is an account URN. Required for profile writes, unlinking, deletion
//!    and group operations.
//! 2. **Address proof** ([`ProofSigner`]): a 5 minute HS256 token returned
//!    by every successful ownership proof. Account resolution requires one.
//! 3. **Edge service token**: a shared secret guarding `/v1/edges`, so only
//!    sibling instances can write the graph.
//!
//! Clock skew tolerance for bearer credentials is 60 seconds.

pub mod claims;
pub mod error;
pub mod extractor;
pub mod jwks;
pub mod proof;

pub use claims::AuthenticatedAccount;
pub use error::AuthError;
pub use extractor::{Auth, OptionalAuth, ServiceAuth};
pub use jwks::JwksManager;
pub use proof::ProofSigner;
