// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment exactly once at startup into an
//! immutable [`AppConfig`], which is then shared by `Arc` with every component
//! that needs it.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `WALLET_UI_URL` | Wallet UI origin (dashboard redirect, CORS) | Required |
//! | `OIDC_PROVIDER_URL` | OpenID provider issuer URL | Required |
//! | `OIDC_CLIENT_ID` | OAuth2 client id | Required |
//! | `OIDC_CLIENT_SECRET` | OAuth2 client secret | Required |
//! | `OIDC_CALLBACK_URL` | Redirect URI registered with the provider | Required |
//! | `OIDC_SCOPES` | Space separated scopes | `openid profile email` |
//! | `COOKIE_AUTH_KEY_PATH` | File with the 32-byte cookie MAC key | Required |
//! | `COOKIE_ENC_KEY_PATH` | File with the 32-byte cookie encryption key | Required |
//! | `COOKIE_MAX_AGE` | Session cookie lifetime in seconds | `900` |
//! | `COOKIE_SECURE` | Mark the session cookie `Secure` | `true` |
//! | `AUTHZ_KMS_URL` | Authorization KMS base URL | Required |
//! | `OPS_KMS_URL` | Operational KMS base URL | Required |
//! | `KEY_EDV_URL` | EDV server holding operational keys | Required |
//! | `USER_EDV_URL` | EDV server holding wallet content | Required |
//! | `HUB_AUTH_URL` | Authorization server base URL | Required |
//! | `DATABASE_TYPE` | `redb` or `mem` | `redb` |
//! | `DATA_DIR` | Directory of the redb file | `/data` |
//! | `TLS_CERT_FILE` / `TLS_KEY_FILE` | PEM files; HTTPS when both are set | Unset |
//! | `DEPENDENCY_MAX_RETRIES` | Provider discovery attempts at startup | `120` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::time::Duration;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const WALLET_UI_URL_ENV: &str = "WALLET_UI_URL";
pub const OIDC_PROVIDER_URL_ENV: &str = "OIDC_PROVIDER_URL";
pub const OIDC_CLIENT_ID_ENV: &str = "OIDC_CLIENT_ID";
pub const OIDC_CLIENT_SECRET_ENV: &str = "OIDC_CLIENT_SECRET";
pub const OIDC_CALLBACK_URL_ENV: &str = "OIDC_CALLBACK_URL";
pub const OIDC_SCOPES_ENV: &str = "OIDC_SCOPES";
pub const COOKIE_AUTH_KEY_PATH_ENV: &str = "COOKIE_AUTH_KEY_PATH";
pub const COOKIE_ENC_KEY_PATH_ENV: &str = "COOKIE_ENC_KEY_PATH";
pub const COOKIE_MAX_AGE_ENV: &str = "COOKIE_MAX_AGE";
pub const COOKIE_SECURE_ENV: &str = "COOKIE_SECURE";
pub const AUTHZ_KMS_URL_ENV: &str = "AUTHZ_KMS_URL";
pub const OPS_KMS_URL_ENV: &str = "OPS_KMS_URL";
pub const KEY_EDV_URL_ENV: &str = "KEY_EDV_URL";
pub const USER_EDV_URL_ENV: &str = "USER_EDV_URL";
pub const HUB_AUTH_URL_ENV: &str = "HUB_AUTH_URL";
pub const DATABASE_TYPE_ENV: &str = "DATABASE_TYPE";

/// Environment variable name for the data directory path.
///
/// The redb database file `wallet.redb` is created inside this directory.
///
/// # Default
/// `/data`
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const TLS_CERT_FILE_ENV: &str = "TLS_CERT_FILE";
pub const TLS_KEY_FILE_ENV: &str = "TLS_KEY_FILE";
pub const DEPENDENCY_MAX_RETRIES_ENV: &str = "DEPENDENCY_MAX_RETRIES";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = "/data";
const DEFAULT_SCOPES: &str = "openid profile email";
const DEFAULT_COOKIE_MAX_AGE_SECS: u64 = 900;
const DEFAULT_DEPENDENCY_MAX_RETRIES: u32 = 120;

/// Path appended to the UI URL to form the post-login landing page.
const DASHBOARD_PATH: &str = "/loginhandle";

/// Length of the cookie keys in bytes.
pub const COOKIE_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("failed to read key file {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: need key of {expected} bits but got {actual}")]
    KeyLength {
        path: String,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Redb,
    Mem,
}

#[derive(Debug, Clone)]
pub struct OidcSettings {
    pub provider_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
    pub scopes: Vec<String>,
}

#[derive(Clone)]
pub struct CookieSettings {
    pub auth_key: [u8; COOKIE_KEY_LEN],
    pub enc_key: [u8; COOKIE_KEY_LEN],
    pub max_age: Duration,
    pub secure: bool,
}

impl std::fmt::Debug for CookieSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSettings")
            .field("auth_key", &"<redacted>")
            .field("enc_key", &"<redacted>")
            .field("max_age", &self.max_age)
            .field("secure", &self.secure)
            .finish()
    }
}

/// Base URLs of the services touched while provisioning a new user.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub authz_kms_url: String,
    pub ops_kms_url: String,
    pub key_edv_url: String,
    pub user_edv_url: String,
    pub hub_auth_url: String,
}

#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Process-wide configuration. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub ui_url: String,
    pub oidc: OidcSettings,
    pub cookie: CookieSettings,
    pub backends: BackendSettings,
    pub database: DatabaseType,
    pub data_dir: PathBuf,
    pub tls: Option<TlsSettings>,
    pub dependency_max_retries: u32,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let port = match env.optional(PORT_ENV) {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                name: PORT_ENV,
                reason: format!("{e}"),
            })?,
            None => DEFAULT_PORT,
        };

        let max_age_secs = match env.optional(COOKIE_MAX_AGE_ENV) {
            Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                name: COOKIE_MAX_AGE_ENV,
                reason: format!("failed to parse session cookie max age [{raw}]: {e}"),
            })?,
            None => DEFAULT_COOKIE_MAX_AGE_SECS,
        };

        let secure = match env.optional(COOKIE_SECURE_ENV) {
            Some(raw) => parse_bool(COOKIE_SECURE_ENV, &raw)?,
            None => true,
        };

        let dependency_max_retries = match env.optional(DEPENDENCY_MAX_RETRIES_ENV) {
            Some(raw) => {
                let retries = raw.parse::<u32>().map_err(|e| ConfigError::Invalid {
                    name: DEPENDENCY_MAX_RETRIES_ENV,
                    reason: format!("failed to parse '{raw}': {e}"),
                })?;
                if retries > 0 {
                    retries
                } else {
                    DEFAULT_DEPENDENCY_MAX_RETRIES
                }
            }
            None => DEFAULT_DEPENDENCY_MAX_RETRIES,
        };

        let database = match env.optional(DATABASE_TYPE_ENV).as_deref() {
            None | Some("redb") => DatabaseType::Redb,
            Some("mem") => DatabaseType::Mem,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: DATABASE_TYPE_ENV,
                    reason: format!("unsupported database type '{other}'"),
                })
            }
        };

        let log_format = match env.optional(LOG_FORMAT_ENV).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let tls = match (env.optional(TLS_CERT_FILE_ENV), env.optional(TLS_KEY_FILE_ENV)) {
            (Some(cert), Some(key)) => Some(TlsSettings {
                cert_file: PathBuf::from(cert),
                key_file: PathBuf::from(key),
            }),
            _ => None,
        };

        let scopes = env
            .optional(OIDC_SCOPES_ENV)
            .unwrap_or_else(|| DEFAULT_SCOPES.to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Ok(Self {
            host: env
                .optional(HOST_ENV)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            ui_url: env.required(WALLET_UI_URL_ENV)?,
            oidc: OidcSettings {
                provider_url: env.required(OIDC_PROVIDER_URL_ENV)?,
                client_id: env.required(OIDC_CLIENT_ID_ENV)?,
                client_secret: env.required(OIDC_CLIENT_SECRET_ENV)?,
                callback_url: env.required(OIDC_CALLBACK_URL_ENV)?,
                scopes,
            },
            cookie: CookieSettings {
                auth_key: read_key_file(&env.required(COOKIE_AUTH_KEY_PATH_ENV)?)?,
                enc_key: read_key_file(&env.required(COOKIE_ENC_KEY_PATH_ENV)?)?,
                max_age: Duration::from_secs(max_age_secs),
                secure,
            },
            backends: BackendSettings {
                authz_kms_url: env.required(AUTHZ_KMS_URL_ENV)?,
                ops_kms_url: env.required(OPS_KMS_URL_ENV)?,
                key_edv_url: env.required(KEY_EDV_URL_ENV)?,
                user_edv_url: env.required(USER_EDV_URL_ENV)?,
                hub_auth_url: env.required(HUB_AUTH_URL_ENV)?,
            },
            database,
            data_dir: PathBuf::from(
                env.optional(DATA_DIR_ENV)
                    .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            ),
            tls,
            dependency_max_retries,
            log_format,
        })
    }

    /// Landing page the browser is sent to after a successful login.
    pub fn dashboard_url(&self) -> String {
        format!("{}{DASHBOARD_PATH}", self.ui_url.trim_end_matches('/'))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            reason: format!("expected a boolean, got '{raw}'"),
        }),
    }
}

/// Read a raw 32-byte key from disk.
pub fn read_key_file(path: &str) -> Result<[u8; COOKIE_KEY_LEN], ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::KeyFile {
        path: path.to_string(),
        source,
    })?;

    bytes.as_slice().try_into().map_err(|_| ConfigError::KeyLength {
        path: path.to_string(),
        expected: COOKIE_KEY_LEN * 8,
        actual: bytes.len() * 8,
    })
}
