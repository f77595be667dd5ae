// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Shared Data Models
//!
//! Types shared by the entities, the edge graph and the HTTP API. All types
//! derive `Serialize`, `Deserialize` and `ToSchema` so they can be persisted
//! as entity values and documented in the OpenAPI schema.
//!
//! ## Address Classification
//!
//! Every [`AddressType`] belongs to exactly one coarse [`NodeType`]. Raw type
//! strings coming off the wire go through [`classify`], which returns
//! [`Classified::Unknown`] rather than failing so callers decide how to
//! reject unsupported types.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// =============================================================================
// Address Types
// =============================================================================

/// Concrete kind of an externally verifiable identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
pub enum AddressType {
    #[serde(rename = "eth")]
    Eth,
    #[serde(rename = "smart_contract_wallet")]
    ContractWallet,
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "email-mask")]
    EmailMask,
    #[serde(rename = "apple")]
    Apple,
    #[serde(rename = "discord")]
    Discord,
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "microsoft")]
    Microsoft,
    #[serde(rename = "twitter")]
    Twitter,
    #[serde(rename = "webauthn")]
    WebAuthn,
}

impl AddressType {
    pub const ALL: [AddressType; 11] = [
        AddressType::Eth,
        AddressType::ContractWallet,
        AddressType::Email,
        AddressType::EmailMask,
        AddressType::Apple,
        AddressType::Discord,
        AddressType::GitHub,
        AddressType::Google,
        AddressType::Microsoft,
        AddressType::Twitter,
        AddressType::WebAuthn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::Eth => "eth",
            AddressType::ContractWallet => "smart_contract_wallet",
            AddressType::Email => "email",
            AddressType::EmailMask => "email-mask",
            AddressType::Apple => "apple",
            AddressType::Discord => "discord",
            AddressType::GitHub => "github",
            AddressType::Google => "google",
            AddressType::Microsoft => "microsoft",
            AddressType::Twitter => "twitter",
            AddressType::WebAuthn => "webauthn",
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            AddressType::Eth => NodeType::Crypto,
            AddressType::ContractWallet => NodeType::Contract,
            AddressType::Email | AddressType::EmailMask => NodeType::Email,
            AddressType::Apple
            | AddressType::Discord
            | AddressType::GitHub
            | AddressType::Google
            | AddressType::Microsoft
            | AddressType::Twitter => NodeType::OAuth,
            AddressType::WebAuthn => NodeType::WebAuthn,
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse category of an address; selects which verifier is attached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Crypto,
    Contract,
    #[serde(rename = "oauth")]
    OAuth,
    Email,
    #[serde(rename = "webauthn")]
    WebAuthn,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Crypto => "crypto",
            NodeType::Contract => "contract",
            NodeType::OAuth => "oauth",
            NodeType::Email => "email",
            NodeType::WebAuthn => "webauthn",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a raw address type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classified {
    Known {
        address_type: AddressType,
        node_type: NodeType,
    },
    Unknown,
}

/// Map a wire-format address type (`"eth"`, `"google"`, ...) to its
/// concrete type and node category.
pub fn classify(raw: &str) -> Classified {
    let needle = raw.trim();
    AddressType::ALL
        .iter()
        .find(|t| t.as_str().eq_ignore_ascii_case(needle))
        .map(|t| Classified::Known {
            address_type: *t,
            node_type: t.node_type(),
        })
        .unwrap_or(Classified::Unknown)
}

// =============================================================================
// Address Profile
// =============================================================================

/// Display view of a single address.
///
/// `disconnected` is set when an OAuth provider could not be reached and the
/// profile was rebuilt from stored state only.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct AddressProfile {
    pub address: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(rename = "type")]
    pub address_type: AddressType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disconnected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_known_types() {
        assert_eq!(
            classify("eth"),
            Classified::Known {
                address_type: AddressType::Eth,
                node_type: NodeType::Crypto
            }
        );
        assert_eq!(
            classify("GitHub"),
            Classified::Known {
                address_type: AddressType::GitHub,
                node_type: NodeType::OAuth
            }
        );
        assert_eq!(
            classify("email-mask"),
            Classified::Known {
                address_type: AddressType::EmailMask,
                node_type: NodeType::Email
            }
        );
        assert_eq!(
            classify("smart_contract_wallet"),
            Classified::Known {
                address_type: AddressType::ContractWallet,
                node_type: NodeType::Contract
            }
        );
    }

    #[test]
    fn classify_unknown_type() {
        assert_eq!(classify("myspace"), Classified::Unknown);
        assert_eq!(classify(""), Classified::Unknown);
    }

    #[test]
    fn serde_names_match_wire_names() {
        for t in AddressType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert_eq!(serde_json::to_string(&NodeType::OAuth).unwrap(), "\"oauth\"");
        assert_eq!(serde_json::to_string(&NodeType::WebAuthn).unwrap(), "\"webauthn\"");
    }

    #[test]
    fn profile_omits_false_disconnected() {
        let profile = AddressProfile {
            address: "0xabc".to_string(),
            title: "0xabc".to_string(),
            icon: None,
            address_type: AddressType::Eth,
            disconnected: false,
        };
        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("disconnected").is_none());
        assert_eq!(json["type"], "eth");
    }
}
