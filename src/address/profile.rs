// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Display profile of one address.

use serde_json::Value;
use tracing::debug;

use super::oauth::{OAuthProviders, TokenManager};
use super::AddressNode;
use crate::error::{IdentityError, IdentityResult};
use crate::models::{AddressProfile, NodeType};
use crate::storage::ProfileCache;

/// Build the profile view. OAuth addresses read the provider's user-info
/// document (through the cache); when that fails the view is rebuilt from
/// the stored profile and flagged `disconnected`.
pub async fn address_profile(
    node: &AddressNode<'_>,
    tokens: &TokenManager,
    providers: &OAuthProviders,
    cache: &ProfileCache,
) -> IdentityResult<AddressProfile> {
    let (address, address_type) = node.require_identity()?;
    let nickname = node.nickname()?;

    if address_type.node_type() != NodeType::OAuth {
        return Ok(AddressProfile {
            title: nickname.unwrap_or_else(|| address.clone()),
            icon: Some(node.gradient()?),
            address,
            address_type,
            disconnected: false,
        });
    }

    let provider = providers.for_address_type(address_type).ok_or_else(|| {
        IdentityError::internal(format!("no provider registered for {address_type}"))
    })?;
    let cache_key = node.urn().entity_id();

    let fetched = match cache.get(&cache_key) {
        Some(raw) => Some(raw),
        None => {
            let raw: Option<Value> = tokens.fetch_profile(node.entity(), provider).await;
            if let Some(raw) = &raw {
                cache.put(&cache_key, raw.clone());
            }
            raw
        }
    };

    let (raw, disconnected) = match fetched {
        Some(raw) => (raw, false),
        None => {
            debug!(address_urn = %node.urn(), "Provider unreachable; using stored profile");
            let stored = tokens
                .data(node.entity())?
                .map(|d| d.profile)
                .unwrap_or(Value::Null);
            (stored, true)
        }
    };

    let mapped = provider.kind.map_profile(&raw);
    let icon = match mapped.icon {
        Some(icon) => icon,
        None => node.gradient()?,
    };
    Ok(AddressProfile {
        title: nickname.or(mapped.title).unwrap_or_else(|| address.clone()),
        icon: Some(icon),
        address,
        address_type,
        disconnected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use reqwest::Client;
    use serde_json::json;

    use crate::address::oauth::{OAuthData, ProviderConfig, ProviderKind};
    use crate::auth::JwksManager;
    use crate::clock::ManualClock;
    use crate::models::AddressType;
    use crate::storage::EntityStore;
    use crate::urn::Urn;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: EntityStore,
        tokens: TokenManager,
        providers: OAuthProviders,
        cache: ProfileCache,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = EntityStore::open(&dir.path().join("entities.redb")).unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let http = Client::new();
        let tokens = TokenManager::new(
            JwksManager::new("http://127.0.0.1:9/jwks", http.clone()),
            http,
            clock.clone(),
        );
        // Port 9 (discard) is closed, so every upstream call fails fast.
        let providers = OAuthProviders::from_configs([ProviderConfig {
            kind: ProviderKind::GitHub,
            client_id: Some("c".into()),
            client_secret: Some("s".into()),
            token_url: "http://127.0.0.1:9/token".into(),
            userinfo_url: Some("http://127.0.0.1:9/user".into()),
        }]);
        let cache = ProfileCache::new(16, Duration::from_secs(300), clock);
        Fixture {
            _dir: dir,
            store,
            tokens,
            providers,
            cache,
        }
    }

    #[tokio::test]
    async fn crypto_profile_prefers_nickname() {
        let f = fixture();
        let urn = Urn::address(AddressType::Eth, "0xabc");
        let node = AddressNode::open(&f.store, &urn).await;
        node.ensure_identity("0xabc", AddressType::Eth).unwrap();

        let profile = address_profile(&node, &f.tokens, &f.providers, &f.cache)
            .await
            .unwrap();
        assert_eq!(profile.title, "0xabc");
        assert!(profile.icon.unwrap().starts_with("data:image/svg+xml"));

        node.set_nickname("Vault").unwrap();
        let profile = address_profile(&node, &f.tokens, &f.providers, &f.cache)
            .await
            .unwrap();
        assert_eq!(profile.title, "Vault");
        assert!(!profile.disconnected);
    }

    #[tokio::test]
    async fn unreachable_provider_yields_disconnected_profile() {
        let f = fixture();
        let urn = Urn::address(AddressType::GitHub, "583231");
        let node = AddressNode::open(&f.store, &urn).await;
        node.ensure_identity("583231", AddressType::GitHub).unwrap();
        f.tokens
            .store(
                &node,
                OAuthData {
                    access_token: Some("t".into()),
                    profile: json!({"id": 583231, "login": "octocat"}),
                    ..Default::default()
                },
            )
            .unwrap();

        let profile = address_profile(&node, &f.tokens, &f.providers, &f.cache)
            .await
            .unwrap();
        assert!(profile.disconnected);
        assert_eq!(profile.title, "octocat");
        assert_eq!(profile.address_type, AddressType::GitHub);
    }

    #[tokio::test]
    async fn cached_upstream_profile_is_used() {
        let f = fixture();
        let urn = Urn::address(AddressType::GitHub, "583231");
        let node = AddressNode::open(&f.store, &urn).await;
        node.ensure_identity("583231", AddressType::GitHub).unwrap();
        f.cache.put(
            &urn.entity_id(),
            json!({"id": 583231, "login": "monalisa", "avatar_url": "https://img/m"}),
        );

        let profile = address_profile(&node, &f.tokens, &f.providers, &f.cache)
            .await
            .unwrap();
        assert!(!profile.disconnected);
        assert_eq!(profile.title, "monalisa");
        assert_eq!(profile.icon.as_deref(), Some("https://img/m"));
    }
}
