//! Key-based authorization with a per-key audit trail.
//!
//! Each endpoint declares the [`AuthLevel`] it sits at. The server is
//! configured with one overall level; endpoints whose level is strictly
//! higher than it are open, the rest need a valid key. `None` disables
//! authorization entirely.

use crate::config::ConfigError;
use base64::{engine::general_purpose, Engine as _};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum AuthLevel {
    None = 0,
    HighPriority = 1,
    #[default]
    Runtime = 2,
    PostSubmit = 252,
    PollById = 253,
    All = 254,
}

impl AuthLevel {
    pub fn value(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("unsupported authorization scheme")]
    UnsupportedScheme,

    #[error("credential is not valid base64: {0}")]
    MalformedEncoding(String),

    #[error("credential is not of the form identity:key")]
    MalformedCredential,

    #[error("unknown key")]
    UnknownKey,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRequest {
    pub remote_addr: String,
    pub path: String,
}

/// Usage counters attached to one key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeyAuditLog {
    pub count: u64,
    pub last: LastRequest,
}

/// Authorization face injected into the HTTP layer.
pub trait Authorizer: Send + Sync {
    fn level(&self) -> AuthLevel;

    /// Checks `authorization` (the raw header value) for an endpoint at
    /// `required`. On success with a key, the key's audit log is updated.
    fn authorize(
        &self,
        authorization: Option<&str>,
        required: AuthLevel,
        remote_addr: &str,
        path: &str,
    ) -> Result<(), AuthError>;

    /// Per-key audit entries with masked keys, or `None` when disabled.
    fn audit(&self) -> Option<BTreeMap<String, KeyAuditLog>>;

    fn requires_key(&self, required: AuthLevel) -> bool {
        let level = self.level();
        level != AuthLevel::None && required <= level
    }
}

/// The fixed set of keys provisioned at startup.
pub struct KeyRing {
    level: AuthLevel,
    keys: Mutex<HashMap<String, KeyAuditLog>>,
}

impl KeyRing {
    pub fn new(
        level: AuthLevel,
        keys: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let keys: HashMap<String, KeyAuditLog> = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| (k, KeyAuditLog::default()))
            .collect();
        if level != AuthLevel::None && keys.is_empty() {
            return Err(ConfigError::NoKeys(level));
        }
        Ok(Self {
            level,
            keys: Mutex::new(keys),
        })
    }

    /// Authorization switched off.
    pub fn disabled() -> Self {
        Self {
            level: AuthLevel::None,
            keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.lock().len()
    }
}

impl Authorizer for KeyRing {
    fn level(&self) -> AuthLevel {
        self.level
    }

    fn authorize(
        &self,
        authorization: Option<&str>,
        required: AuthLevel,
        remote_addr: &str,
        path: &str,
    ) -> Result<(), AuthError> {
        if !self.requires_key(required) {
            return Ok(());
        }
        let key = parse_basic_key(authorization.ok_or(AuthError::MissingHeader)?)?;
        let mut keys = self.keys.lock();
        let log = keys.get_mut(&key).ok_or(AuthError::UnknownKey)?;
        log.count += 1;
        log.last = LastRequest {
            remote_addr: remote_addr.to_string(),
            path: path.to_string(),
        };
        Ok(())
    }

    fn audit(&self) -> Option<BTreeMap<String, KeyAuditLog>> {
        if self.level == AuthLevel::None {
            return None;
        }
        let keys = self.keys.lock();
        Some(
            keys.iter()
                .map(|(key, log)| (mask_key(key), log.clone()))
                .collect(),
        )
    }
}

/// Extracts the key from `Basic base64(identity:key)`. The identity is not
/// checked.
pub fn parse_basic_key(header: &str) -> Result<String, AuthError> {
    let (scheme, encoded) = header
        .trim()
        .split_once(' ')
        .ok_or(AuthError::UnsupportedScheme)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthError::UnsupportedScheme);
    }
    let decoded = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| AuthError::MalformedEncoding(e.to_string()))?;
    let decoded =
        String::from_utf8(decoded).map_err(|e| AuthError::MalformedEncoding(e.to_string()))?;
    let (_identity, key) = decoded
        .split_once(':')
        .ok_or(AuthError::MalformedCredential)?;
    Ok(key.to_string())
}

fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    format!("{prefix}…")
}
