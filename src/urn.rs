// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Entity Identifiers
//!
//! Every entity is named by a URN of the form
//!
//! ```text
//! urn:rollupid:<kind>/<id>?+<routing components>?=<query components>
//! ```
//!
//! - `<kind>` is one of `address`, `account`, `identity-group`, `system`.
//! - `<id>` is the opaque reference. Addresses use a SHA-256 hashed
//!   reference of their natural key; accounts and groups use random ids.
//! - Routing components (`?+`) carry the entity subtype, e.g.
//!   `addr_type=google&node_type=oauth`.
//! - Query components (`?=`) are non-authoritative annotations such as
//!   `alias=alice`.
//!
//! Two URNs denote the same entity iff their kind and id match; components
//! never take part in identity.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use url::form_urlencoded;
use uuid::Uuid;

use crate::models::{classify, AddressType, Classified, NodeType};

pub const NAMESPACE: &str = "rollupid";
const PREFIX: &str = "urn:rollupid:";

/// Routing component carrying the concrete address type.
pub const RC_ADDR_TYPE: &str = "addr_type";
/// Routing component carrying the coarse node category.
pub const RC_NODE_TYPE: &str = "node_type";
/// Query component with a human-readable display alias.
pub const QC_ALIAS: &str = "alias";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrnError {
    #[error("URN must start with `urn:rollupid:`")]
    BadPrefix,

    #[error("unknown entity kind: {0}")]
    UnknownKind(String),

    #[error("URN is missing an entity id")]
    MissingId,

    #[error("malformed URN component: {0}")]
    BadComponent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UrnKind {
    Address,
    Account,
    IdentityGroup,
    System,
}

impl UrnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrnKind::Address => "address",
            UrnKind::Account => "account",
            UrnKind::IdentityGroup => "identity-group",
            UrnKind::System => "system",
        }
    }

    fn parse(raw: &str) -> Result<Self, UrnError> {
        match raw {
            "address" => Ok(UrnKind::Address),
            "account" => Ok(UrnKind::Account),
            "identity-group" => Ok(UrnKind::IdentityGroup),
            "system" => Ok(UrnKind::System),
            other => Err(UrnError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Urn {
    kind: UrnKind,
    id: String,
    r: BTreeMap<String, String>,
    q: BTreeMap<String, String>,
}

impl Urn {
    pub fn new(kind: UrnKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            r: BTreeMap::new(),
            q: BTreeMap::new(),
        }
    }

    /// Fresh random identifier, used for accounts and groups.
    pub fn random(kind: UrnKind) -> Self {
        Self::new(kind, Uuid::new_v4().simple().to_string())
    }

    /// Address URN derived from the natural key, with subtype routing
    /// components attached.
    pub fn address(address_type: AddressType, address: &str) -> Self {
        Self::new(UrnKind::Address, hashed_ref(address_type, address))
            .with_r(RC_ADDR_TYPE, address_type.as_str())
            .with_r(RC_NODE_TYPE, address_type.node_type().as_str())
    }

    pub fn with_r(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.r.insert(key.into(), value.into());
        self
    }

    pub fn with_q(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.q.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> UrnKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rc(&self) -> &BTreeMap<String, String> {
        &self.r
    }

    pub fn qc(&self) -> &BTreeMap<String, String> {
        &self.q
    }

    /// `<kind>/<id>`; the storage identity of the entity.
    pub fn entity_id(&self) -> String {
        format!("{}/{}", self.kind.as_str(), self.id)
    }

    /// The URN with every component stripped.
    pub fn base(&self) -> Urn {
        Urn::new(self.kind, self.id.clone())
    }

    /// The URN with routing components kept and query components dropped.
    pub fn routed(&self) -> Urn {
        Urn {
            q: BTreeMap::new(),
            ..self.clone()
        }
    }

    pub fn same_entity(&self, other: &Urn) -> bool {
        self.kind == other.kind && self.id == other.id
    }

    pub fn address_type(&self) -> Option<AddressType> {
        match classify(self.r.get(RC_ADDR_TYPE)?) {
            Classified::Known { address_type, .. } => Some(address_type),
            Classified::Unknown => None,
        }
    }

    pub fn node_type(&self) -> Option<NodeType> {
        match classify(self.r.get(RC_ADDR_TYPE)?) {
            Classified::Known { node_type, .. } => Some(node_type),
            Classified::Unknown => None,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, UrnError> {
        let rest = raw.strip_prefix(PREFIX).ok_or(UrnError::BadPrefix)?;
        let (nss, components) = match rest.find('?') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        let (kind, id) = nss.split_once('/').ok_or(UrnError::MissingId)?;
        let kind = UrnKind::parse(kind)?;
        if id.is_empty() {
            return Err(UrnError::MissingId);
        }

        let mut urn = Urn::new(kind, id);
        for part in components.split('?').filter(|p| !p.is_empty()) {
            let (target, body) = match part.as_bytes()[0] {
                b'+' => (&mut urn.r, &part[1..]),
                b'=' => (&mut urn.q, &part[1..]),
                _ => return Err(UrnError::BadComponent(part.to_string())),
            };
            for (k, v) in form_urlencoded::parse(body.as_bytes()) {
                target.insert(k.into_owned(), v.into_owned());
            }
        }
        Ok(urn)
    }
}

fn encode_components(map: &BTreeMap<String, String>) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(map.iter())
        .finish()
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}/{}", self.kind.as_str(), self.id)?;
        if !self.r.is_empty() {
            write!(f, "?+{}", encode_components(&self.r))?;
        }
        if !self.q.is_empty() {
            write!(f, "?={}", encode_components(&self.q))?;
        }
        Ok(())
    }
}

impl FromStr for Urn {
    type Err = UrnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Urn::parse(s)
    }
}

impl Serialize for Urn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Urn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Urn::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Canonical form of a natural key before hashing.
///
/// Email addresses are NFKC-normalized, trimmed and lowercased. Hex wallet
/// addresses are lowercased so checksummed and plain spellings collide.
pub fn normalize_address(address_type: AddressType, address: &str) -> String {
    match address_type {
        AddressType::Email | AddressType::EmailMask => {
            address.nfkc().collect::<String>().trim().to_lowercase()
        }
        AddressType::Eth | AddressType::ContractWallet => address.trim().to_lowercase(),
        _ => address.trim().to_string(),
    }
}

/// Deterministic hashed reference for an address natural key.
pub fn hashed_ref(address_type: AddressType, address: &str) -> String {
    let normalized = normalize_address(address_type, address);
    let digest = Sha256::digest(format!("{}/{}", address_type.as_str(), normalized).as_bytes());
    alloy::hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_urn_round_trips_with_components() {
        let urn = Urn::address(AddressType::Google, "1234567890").with_q(QC_ALIAS, "alice smith");
        let text = urn.to_string();
        assert!(text.starts_with("urn:rollupid:address/"));
        assert!(text.contains("?+addr_type=google&node_type=oauth"));
        assert!(text.ends_with("?=alias=alice+smith"));

        let parsed: Urn = text.parse().unwrap();
        assert_eq!(parsed, urn);
        assert_eq!(parsed.address_type(), Some(AddressType::Google));
        assert_eq!(parsed.node_type(), Some(NodeType::OAuth));
        assert_eq!(parsed.qc().get(QC_ALIAS).map(String::as_str), Some("alice smith"));
    }

    #[test]
    fn unclassified_address_type_has_no_node_type() {
        let urn = Urn::new(UrnKind::Address, "h1").with_r(RC_ADDR_TYPE, "myspace");
        assert_eq!(urn.address_type(), None);
        assert_eq!(urn.node_type(), None);

        let contract = Urn::new(UrnKind::Address, "h2").with_r(RC_ADDR_TYPE, "smart_contract_wallet");
        assert_eq!(contract.node_type(), Some(NodeType::Contract));
    }

    #[test]
    fn components_do_not_affect_identity() {
        let a = Urn::address(AddressType::Eth, "0xAbC0000000000000000000000000000000000001");
        let b = Urn::parse(&a.base().to_string()).unwrap().with_q("hidden", "true");
        assert!(a.same_entity(&b));
        assert_eq!(a.entity_id(), b.entity_id());
    }

    #[test]
    fn hashed_ref_is_normalized_and_stable() {
        let lower = hashed_ref(AddressType::Eth, "0xabc0000000000000000000000000000000000001");
        let mixed = hashed_ref(AddressType::Eth, "0xAbC0000000000000000000000000000000000001");
        assert_eq!(lower, mixed);
        assert_eq!(lower.len(), 64);

        assert_eq!(
            hashed_ref(AddressType::Email, " Alice@Example.COM "),
            hashed_ref(AddressType::Email, "alice@example.com")
        );
        // The type is part of the natural key.
        assert_ne!(
            hashed_ref(AddressType::Email, "alice@example.com"),
            hashed_ref(AddressType::EmailMask, "alice@example.com")
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(Urn::parse("urn:other:address/x"), Err(UrnError::BadPrefix));
        assert_eq!(
            Urn::parse("urn:rollupid:planet/x"),
            Err(UrnError::UnknownKind("planet".to_string()))
        );
        assert_eq!(Urn::parse("urn:rollupid:account/"), Err(UrnError::MissingId));
        assert_eq!(Urn::parse("urn:rollupid:account"), Err(UrnError::MissingId));
        assert!(matches!(
            Urn::parse("urn:rollupid:account/abc?x=1"),
            Err(UrnError::BadComponent(_))
        ));
    }

    #[test]
    fn random_urns_differ() {
        let a = Urn::random(UrnKind::Account);
        let b = Urn::random(UrnKind::Account);
        assert_ne!(a, b);
        assert_eq!(a.kind(), UrnKind::Account);
    }

    #[test]
    fn serde_uses_string_form() {
        let urn = Urn::new(UrnKind::IdentityGroup, "g1");
        let json = serde_json::to_string(&urn).unwrap();
        assert_eq!(json, "\"urn:rollupid:identity-group/g1\"");
        let back: Urn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, urn);
    }
}
