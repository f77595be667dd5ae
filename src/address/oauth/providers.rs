// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-provider OAuth capabilities.
//!
//! Each provider contributes its endpoints, request headers, refresh
//! parameters and the mapping from its user-info document to a subject id
//! and display fields. Endpoints and client credentials come from the
//! environment:
//!
//! | Variable | Purpose |
//! |----------|---------|
//! | `<P>_OAUTH_CLIENT_ID` | Client id used for refresh (and Apple `aud`) |
//! | `<P>_OAUTH_CLIENT_SECRET` | Client secret used for refresh |
//! | `<P>_OAUTH_TOKEN_URL` | Token endpoint override |
//! | `<P>_OAUTH_USERINFO_URL` | User-info endpoint override |
//!
//! with `<P>` one of `APPLE`, `DISCORD`, `GITHUB`, `GOOGLE`, `MICROSOFT`,
//! `TWITTER`.

use std::collections::HashMap;
use std::env;

use serde_json::Value;

use crate::models::AddressType;

pub const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";
pub const APPLE_ISSUER: &str = "https://appleid.apple.com";

const GITHUB_USER_AGENT: &str = "identity-graph-server";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Apple,
    Discord,
    GitHub,
    Google,
    Microsoft,
    Twitter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::Apple,
        ProviderKind::Discord,
        ProviderKind::GitHub,
        ProviderKind::Google,
        ProviderKind::Microsoft,
        ProviderKind::Twitter,
    ];

    pub fn from_address_type(address_type: AddressType) -> Option<Self> {
        match address_type {
            AddressType::Apple => Some(ProviderKind::Apple),
            AddressType::Discord => Some(ProviderKind::Discord),
            AddressType::GitHub => Some(ProviderKind::GitHub),
            AddressType::Google => Some(ProviderKind::Google),
            AddressType::Microsoft => Some(ProviderKind::Microsoft),
            AddressType::Twitter => Some(ProviderKind::Twitter),
            _ => None,
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            ProviderKind::Apple => "APPLE",
            ProviderKind::Discord => "DISCORD",
            ProviderKind::GitHub => "GITHUB",
            ProviderKind::Google => "GOOGLE",
            ProviderKind::Microsoft => "MICROSOFT",
            ProviderKind::Twitter => "TWITTER",
        }
    }

    pub fn default_token_url(&self) -> &'static str {
        match self {
            ProviderKind::Apple => "https://appleid.apple.com/auth/token",
            ProviderKind::Discord => "https://discord.com/api/oauth2/token",
            ProviderKind::GitHub => "https://github.com/login/oauth/access_token",
            ProviderKind::Google => "https://oauth2.googleapis.com/token",
            ProviderKind::Microsoft => {
                "https://login.microsoftonline.com/common/oauth2/v2.0/token"
            }
            ProviderKind::Twitter => "https://api.twitter.com/2/oauth2/token",
        }
    }

    /// Apple has no user-info endpoint; its profile arrives with the tokens.
    pub fn default_userinfo_url(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Apple => None,
            ProviderKind::Discord => Some("https://discord.com/api/users/@me"),
            ProviderKind::GitHub => Some("https://api.github.com/user"),
            ProviderKind::Google => Some("https://openidconnect.googleapis.com/v1/userinfo"),
            ProviderKind::Microsoft => Some("https://graph.microsoft.com/oidc/userinfo"),
            ProviderKind::Twitter => {
                Some("https://api.twitter.com/2/users/me?user.fields=profile_image_url")
            }
        }
    }

    /// Headers sent alongside the bearer token on user-info calls.
    pub fn headers(&self) -> Vec<(&'static str, &'static str)> {
        match self {
            ProviderKind::GitHub => vec![
                ("User-Agent", GITHUB_USER_AGENT),
                ("Accept", "application/vnd.github+json"),
            ],
            _ => vec![("Accept", "application/json")],
        }
    }

    /// Provider-specific additions to the refresh-token form.
    pub fn extra_refresh_params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            ProviderKind::Microsoft => &[("tenant", "common")],
            _ => &[],
        }
    }

    /// Stable provider account id from a user-info document.
    pub fn subject(&self, raw: &Value) -> Option<String> {
        let value = match self {
            ProviderKind::Apple | ProviderKind::Google | ProviderKind::Microsoft => raw.get("sub"),
            ProviderKind::Discord | ProviderKind::GitHub => raw.get("id"),
            ProviderKind::Twitter => raw.pointer("/data/id"),
        }?;
        match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Display title and avatar URL from a user-info document.
    pub fn map_profile(&self, raw: &Value) -> MappedProfile {
        let s = |ptr: &str| raw.pointer(ptr).and_then(Value::as_str).map(str::to_string);
        match self {
            ProviderKind::Apple => MappedProfile {
                title: s("/name").or_else(|| s("/email")),
                icon: None,
            },
            ProviderKind::Discord => {
                let icon = match (s("/id"), s("/avatar")) {
                    (Some(id), Some(avatar)) => {
                        Some(format!("https://cdn.discordapp.com/avatars/{id}/{avatar}.png"))
                    }
                    _ => None,
                };
                MappedProfile {
                    title: s("/global_name").or_else(|| s("/username")),
                    icon,
                }
            }
            ProviderKind::GitHub => MappedProfile {
                title: s("/login").or_else(|| s("/name")),
                icon: s("/avatar_url"),
            },
            ProviderKind::Google => MappedProfile {
                title: s("/name").or_else(|| s("/email")),
                icon: s("/picture"),
            },
            ProviderKind::Microsoft => MappedProfile {
                title: s("/name").or_else(|| s("/email")),
                icon: None,
            },
            ProviderKind::Twitter => MappedProfile {
                title: s("/data/name").or_else(|| s("/data/username")),
                icon: s("/data/profile_image_url"),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedProfile {
    pub title: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_url: String,
    pub userinfo_url: Option<String>,
}

impl ProviderConfig {
    pub fn defaults(kind: ProviderKind) -> Self {
        Self {
            kind,
            client_id: None,
            client_secret: None,
            token_url: kind.default_token_url().to_string(),
            userinfo_url: kind.default_userinfo_url().map(str::to_string),
        }
    }

    fn from_env(kind: ProviderKind) -> Self {
        let var = |suffix: &str| {
            env::var(format!("{}_OAUTH_{suffix}", kind.env_prefix()))
                .ok()
                .filter(|v| !v.trim().is_empty())
        };
        let mut config = Self::defaults(kind);
        config.client_id = var("CLIENT_ID");
        config.client_secret = var("CLIENT_SECRET");
        if let Some(url) = var("TOKEN_URL") {
            config.token_url = url;
        }
        if let Some(url) = var("USERINFO_URL") {
            config.userinfo_url = Some(url);
        }
        config
    }
}

#[derive(Debug, Clone)]
pub struct OAuthProviders {
    providers: HashMap<ProviderKind, ProviderConfig>,
}

impl OAuthProviders {
    pub fn from_env() -> Self {
        Self {
            providers: ProviderKind::ALL
                .into_iter()
                .map(|k| (k, ProviderConfig::from_env(k)))
                .collect(),
        }
    }

    pub fn from_configs(configs: impl IntoIterator<Item = ProviderConfig>) -> Self {
        let mut providers: HashMap<_, _> = ProviderKind::ALL
            .into_iter()
            .map(|k| (k, ProviderConfig::defaults(k)))
            .collect();
        for config in configs {
            providers.insert(config.kind, config);
        }
        Self { providers }
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        self.providers.get(&kind)
    }

    pub fn for_address_type(&self, address_type: AddressType) -> Option<&ProviderConfig> {
        ProviderKind::from_address_type(address_type).and_then(|k| self.get(k))
    }
}
