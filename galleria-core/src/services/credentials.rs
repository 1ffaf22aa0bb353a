//! Analysis credential storage and resolution
//!
//! **Priority:** key-value store → ENV → TOML
//!
//! The stored key is authoritative; the environment variable and TOML entry
//! are fallbacks for headless use.

use galleria_common::config::TomlConfig;
use galleria_common::kv::{KeyValueStore, KvError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key under which the Gemini API key is stored
pub const CREDENTIAL_KEY: &str = "gemini_api_key";

/// Environment variable consulted when no key is stored
pub const CREDENTIAL_ENV: &str = "GALLERIA_GEMINI_API_KEY";

/// Where a resolved credential came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Store,
    Environment,
    Toml,
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CredentialSource::Store => "settings store",
            CredentialSource::Environment => "environment",
            CredentialSource::Toml => "TOML",
        };
        f.write_str(name)
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Mask a key for display, keeping the first and last four characters
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(8);
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 8), tail)
}

/// Persistent credential store
#[derive(Clone)]
pub struct CredentialStore {
    kv: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Stored key, if any
    pub async fn get(&self) -> Result<Option<String>, KvError> {
        let key = self.kv.get(CREDENTIAL_KEY).await?;
        Ok(key.filter(|k| is_valid_key(k)))
    }

    /// Store a key (trimmed)
    pub async fn set(&self, key: &str) -> Result<(), KvError> {
        let key = key.trim();
        if !is_valid_key(key) {
            return Err(KvError::Backend("API key must not be empty".to_string()));
        }

        debug!(key_len = key.len(), "Storing Gemini API key");
        self.kv.set(CREDENTIAL_KEY, key).await?;
        info!("Gemini API key saved");
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), KvError> {
        self.kv.remove(CREDENTIAL_KEY).await?;
        info!("Gemini API key removed");
        Ok(())
    }

    /// Resolve the credential from store, environment, then TOML
    ///
    /// A store read failure is logged and treated as "no stored key".
    pub async fn resolve(&self, toml_config: &TomlConfig) -> Option<(String, CredentialSource)> {
        let stored = match self.get().await {
            Ok(key) => key,
            Err(e) => {
                warn!("Failed to read stored API key: {}", e);
                None
            }
        };
        let env_key = std::env::var(CREDENTIAL_ENV).ok().filter(|k| is_valid_key(k));
        let toml_key = toml_config
            .gemini_api_key
            .clone()
            .filter(|k| is_valid_key(k));

        let candidates = [
            (stored, CredentialSource::Store),
            (env_key, CredentialSource::Environment),
            (toml_key, CredentialSource::Toml),
        ];

        let present: Vec<String> = candidates
            .iter()
            .filter(|(key, _)| key.is_some())
            .map(|(_, source)| source.to_string())
            .collect();
        if present.len() > 1 {
            warn!(
                "Gemini API key found in multiple sources: {}. Using {} (highest priority).",
                present.join(", "),
                present[0]
            );
        }

        let resolved = candidates
            .into_iter()
            .find_map(|(key, source)| key.map(|k| (k.trim().to_string(), source)));

        match &resolved {
            Some((_, source)) => debug!("Gemini API key loaded from {}", source),
            None => debug!("No Gemini API key configured"),
        }
        resolved
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}
