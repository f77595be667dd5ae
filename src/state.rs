// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};

use crate::account::{Accounts, Resolver};
use crate::address::crypto::ChallengeAuthenticator;
use crate::address::email::OtpVerifier;
use crate::address::mailer::{DisabledMailer, HttpCodeMailer, SharedMailer};
use crate::address::oauth::providers::APPLE_JWKS_URL;
use crate::address::oauth::{OAuthProviders, TokenManager};
use crate::auth::{AuthError, JwksManager, ProofSigner};
use crate::clock::SharedClock;
use crate::config::{AppConfig, HTTP_TIMEOUT};
use crate::edges::{EdgeStore, EdgeStoreError, HttpEdgeClient, SharedEdges};
use crate::group::Groups;
use crate::storage::{EntityStore, EntityStoreError, ProfileCache, StoragePaths};
use crate::sweeper::AlarmSweeper;

const PROFILE_CACHE_CAPACITY: usize = 10_000;
const PROFILE_CACHE_TTL: Duration = Duration::from_secs(300);

/// Bearer credential verification settings.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// `None` selects the development decoder.
    pub jwks: Option<JwksManager>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("entity store: {0}")]
    Entities(#[from] EntityStoreError),

    #[error("edge store: {0}")]
    Edges(#[from] EdgeStoreError),

    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("proof signer: {0}")]
    Proofs(#[from] AuthError),
}

#[derive(Clone)]
pub struct AppState {
    pub entities: Arc<EntityStore>,
    pub edges: SharedEdges,
    pub clock: SharedClock,
    pub http: Client,

    pub auth_config: Arc<AuthConfig>,
    pub proofs: Arc<ProofSigner>,
    pub edges_service_token: Option<String>,

    pub challenges: Arc<ChallengeAuthenticator>,
    pub otp: Arc<OtpVerifier>,
    pub mailer: SharedMailer,
    pub oauth: Arc<OAuthProviders>,
    pub tokens: Arc<TokenManager>,
    pub profiles: Arc<ProfileCache>,

    pub resolver: Arc<Resolver>,
    pub accounts: Arc<Accounts>,
    pub groups: Arc<Groups>,

    pub mask_domain: String,
}

impl AppState {
    /// Open storage and wire every service from `config`.
    pub fn from_config(
        config: &AppConfig,
        oauth: OAuthProviders,
        clock: SharedClock,
    ) -> Result<Self, StateError> {
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let paths = StoragePaths::new(&config.data_dir);
        let entities = Arc::new(EntityStore::open(&paths.entities_db())?);

        let edges: SharedEdges = match &config.edges_url {
            Some(url) => {
                info!(edges_url = %url, "Using remote edge service");
                Arc::new(HttpEdgeClient::new(
                    url.clone(),
                    config.edges_service_token.clone(),
                    http.clone(),
                ))
            }
            None => Arc::new(EdgeStore::open(&paths.edges_db(), clock.clone())?),
        };

        let auth_config = AuthConfig {
            jwks: config
                .jwks_url
                .as_ref()
                .map(|url| JwksManager::new(url.clone(), http.clone())),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
        };
        if auth_config.jwks.is_none() {
            warn!("JWKS_URL not set; bearer credentials use the development decoder");
        }

        let proofs = match &config.proof_token_secret {
            Some(secret) => ProofSigner::new(secret.as_bytes(), clock.clone()),
            None => {
                warn!("PROOF_TOKEN_SECRET not set; proof tokens are valid for this process only");
                ProofSigner::ephemeral(clock.clone())?
            }
        };

        let mailer: SharedMailer = match &config.email_service_url {
            Some(url) => Arc::new(HttpCodeMailer::new(url.clone(), http.clone())),
            None => Arc::new(DisabledMailer),
        };

        let tokens = TokenManager::new(
            JwksManager::new(APPLE_JWKS_URL, http.clone()),
            http.clone(),
            clock.clone(),
        );

        Ok(Self {
            challenges: Arc::new(ChallengeAuthenticator::new(config.nonce_ttl, clock.clone())),
            otp: Arc::new(OtpVerifier::new(config.otp, clock.clone())),
            mailer,
            oauth: Arc::new(oauth),
            tokens: Arc::new(tokens),
            profiles: Arc::new(ProfileCache::new(
                PROFILE_CACHE_CAPACITY,
                PROFILE_CACHE_TTL,
                clock.clone(),
            )),
            resolver: Arc::new(Resolver::new(entities.clone(), edges.clone(), clock.clone())),
            accounts: Arc::new(Accounts::new(entities.clone(), edges.clone())),
            groups: Arc::new(Groups::new(entities.clone(), edges.clone(), clock.clone())),
            auth_config: Arc::new(auth_config),
            proofs: Arc::new(proofs),
            edges_service_token: config.edges_service_token.clone(),
            mask_domain: config.email_mask_domain.clone(),
            entities,
            edges,
            clock,
            http,
        })
    }

    /// Background sweeper over this state's stores.
    pub fn sweeper(&self, poll_interval: Duration) -> AlarmSweeper {
        AlarmSweeper::new(
            self.entities.clone(),
            self.clock.clone(),
            self.challenges.clone(),
            self.otp.clone(),
            self.groups.clone(),
            self.resolver.clone(),
        )
        .with_poll_interval(poll_interval)
    }
}
