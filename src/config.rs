// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults and the typed [`AppConfig`] loaded
//! from them at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding `entities.redb` and `edges.redb` | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM certificate chain and key; both set enables HTTPS | unset |
//! | `EDGES_URL` | Remote edge graph service | unset (embedded store) |
//! | `EDGES_SERVICE_TOKEN` | Bearer token for `/v1/edges` and the remote client | unset (routes refuse) |
//! | `JWKS_URL` | JWKS endpoint for bearer credentials | Required for production |
//! | `JWT_ISSUER` | Expected `iss` claim | Optional |
//! | `JWT_AUDIENCE` | Expected `aud` claim | Optional |
//! | `PROOF_TOKEN_SECRET` | HMAC secret for address proof tokens | random per process |
//! | `NONCE_TTL_MS` | Nonce challenge lifetime | `60000` |
//! | `OTP_CODE_TTL_MS` | Email code lifetime | `300000` |
//! | `OTP_MAX_ATTEMPTS` | Codes allowed per window | `5` |
//! | `OTP_MAX_ATTEMPTS_WINDOW_MS` | Attempt counting window | `300000` |
//! | `OTP_COOLDOWN_MS` | Lockout after too many codes | `600000` |
//! | `OTP_REGENERATION_DELAY_MS` | Minimum gap between two codes | `30000` |
//! | `ALARM_POLL_INTERVAL_MS` | Alarm sweeper period | `1000` |
//! | `EMAIL_SERVICE_URL` | OTP delivery endpoint | unset (delivery disabled) |
//! | `EMAIL_MASK_DOMAIN` | Domain of masked email aliases | `mask.rollup.id` |
//! | `<PROVIDER>_OAUTH_CLIENT_ID` etc. | OAuth client credentials, see [`crate::address::oauth::providers`] | unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::address::email::OtpSettings;
use crate::storage::paths::DATA_ROOT;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const EDGES_URL_ENV: &str = "EDGES_URL";
pub const EDGES_SERVICE_TOKEN_ENV: &str = "EDGES_SERVICE_TOKEN";

/// JWKS endpoint for bearer verification.
///
/// When unset the server runs in development mode: with the `dev` feature
/// tokens are decoded without signature checks, without it every bearer
/// credential is rejected.
pub const JWKS_URL_ENV: &str = "JWKS_URL";
pub const JWT_ISSUER_ENV: &str = "JWT_ISSUER";
pub const JWT_AUDIENCE_ENV: &str = "JWT_AUDIENCE";
pub const PROOF_TOKEN_SECRET_ENV: &str = "PROOF_TOKEN_SECRET";

pub const NONCE_TTL_MS_ENV: &str = "NONCE_TTL_MS";
pub const OTP_CODE_TTL_MS_ENV: &str = "OTP_CODE_TTL_MS";
pub const OTP_MAX_ATTEMPTS_ENV: &str = "OTP_MAX_ATTEMPTS";
pub const OTP_MAX_ATTEMPTS_WINDOW_MS_ENV: &str = "OTP_MAX_ATTEMPTS_WINDOW_MS";
pub const OTP_COOLDOWN_MS_ENV: &str = "OTP_COOLDOWN_MS";
pub const OTP_REGENERATION_DELAY_MS_ENV: &str = "OTP_REGENERATION_DELAY_MS";
pub const ALARM_POLL_INTERVAL_MS_ENV: &str = "ALARM_POLL_INTERVAL_MS";

pub const EMAIL_SERVICE_URL_ENV: &str = "EMAIL_SERVICE_URL";
pub const EMAIL_MASK_DOMAIN_ENV: &str = "EMAIL_MASK_DOMAIN";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_NONCE_TTL: Duration = Duration::from_millis(60_000);
pub const DEFAULT_ALARM_POLL_INTERVAL: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MASK_DOMAIN: &str = "mask.rollup.id";

/// Timeout applied to every outbound HTTP call.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("{0} and {1} must be set together")]
    Incomplete(&'static str, &'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsPaths>,
    pub edges_url: Option<String>,
    pub edges_service_token: Option<String>,
    pub jwks_url: Option<String>,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub proof_token_secret: Option<String>,
    pub nonce_ttl: Duration,
    pub otp: OtpSettings,
    pub alarm_poll_interval: Duration,
    pub email_service_url: Option<String>,
    pub email_mask_domain: String,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DATA_ROOT),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: None,
            edges_url: None,
            edges_service_token: None,
            jwks_url: None,
            jwt_issuer: None,
            jwt_audience: None,
            proof_token_secret: None,
            nonce_ttl: DEFAULT_NONCE_TTL,
            otp: OtpSettings::default(),
            alarm_poll_interval: DEFAULT_ALARM_POLL_INTERVAL,
            email_service_url: None,
            email_mask_domain: DEFAULT_MASK_DOMAIN.to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::Incomplete(TLS_CERT_PATH_ENV, TLS_KEY_PATH_ENV)),
        };

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            None => LogFormat::default(),
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            Some(v) => {
                return Err(ConfigError::Invalid {
                    var: LOG_FORMAT_ENV,
                    value: v.to_string(),
                })
            }
        };

        let millis = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parse(var, get(var))?.map(Duration::from_millis).unwrap_or(default))
        };

        let otp = OtpSettings {
            code_ttl: millis(OTP_CODE_TTL_MS_ENV, defaults.otp.code_ttl)?,
            max_attempts: parse(OTP_MAX_ATTEMPTS_ENV, get(OTP_MAX_ATTEMPTS_ENV))?
                .unwrap_or(defaults.otp.max_attempts),
            max_attempts_window: millis(
                OTP_MAX_ATTEMPTS_WINDOW_MS_ENV,
                defaults.otp.max_attempts_window,
            )?,
            cooldown: millis(OTP_COOLDOWN_MS_ENV, defaults.otp.cooldown)?,
            regeneration_delay: millis(
                OTP_REGENERATION_DELAY_MS_ENV,
                defaults.otp.regeneration_delay,
            )?,
        };

        Ok(Self {
            data_dir: get(DATA_DIR_ENV).map(PathBuf::from).unwrap_or(defaults.data_dir),
            host: get(HOST_ENV).unwrap_or(defaults.host),
            port: parse(PORT_ENV, get(PORT_ENV))?.unwrap_or(defaults.port),
            tls,
            edges_url: get(EDGES_URL_ENV),
            edges_service_token: get(EDGES_SERVICE_TOKEN_ENV),
            jwks_url: get(JWKS_URL_ENV),
            jwt_issuer: get(JWT_ISSUER_ENV),
            jwt_audience: get(JWT_AUDIENCE_ENV),
            proof_token_secret: get(PROOF_TOKEN_SECRET_ENV),
            nonce_ttl: millis(NONCE_TTL_MS_ENV, defaults.nonce_ttl)?,
            otp,
            alarm_poll_interval: millis(ALARM_POLL_INTERVAL_MS_ENV, defaults.alarm_poll_interval)?,
            email_service_url: get(EMAIL_SERVICE_URL_ENV),
            email_mask_domain: get(EMAIL_MASK_DOMAIN_ENV).unwrap_or(defaults.email_mask_domain),
            log_format,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    raw.map(|v| {
        v.trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: v.clone() })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = from(&[]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.nonce_ttl, Duration::from_secs(60));
        assert_eq!(config.otp.max_attempts, 5);
        assert_eq!(config.otp.regeneration_delay, Duration::from_secs(30));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.tls.is_none());
        assert!(config.jwks_url.is_none());
    }

    #[test]
    fn values_are_read() {
        let config = from(&[
            ("DATA_DIR", "/tmp/ids"),
            ("PORT", "9000"),
            ("OTP_MAX_ATTEMPTS", "3"),
            ("NONCE_TTL_MS", "1500"),
            ("LOG_FORMAT", "JSON"),
            ("JWKS_URL", "https://auth.example.com/jwks"),
            ("JWT_ISSUER", ""),
        ])
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/ids"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.otp.max_attempts, 3);
        assert_eq!(config.nonce_ttl, Duration::from_millis(1500));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.jwks_url.as_deref(), Some("https://auth.example.com/jwks"));
        assert!(config.jwt_issuer.is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            from(&[("PORT", "eighty")]),
            Err(ConfigError::Invalid { var: "PORT", .. })
        ));
        assert!(matches!(
            from(&[("LOG_FORMAT", "xml")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            from(&[("TLS_CERT_PATH", "/c.pem")]),
            Err(ConfigError::Incomplete(..))
        ));
    }
}
