use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::crypto::DEFAULT_KEY_SLOT;
use crate::error::ConfigError;
use crate::paths;
use crate::persistence::{DEFAULT_SESSION_KEY, SESSION_TTL_MS};
use crate::secure_store::{DEFAULT_NAMESPACE, DEFAULT_QUOTA_BYTES};
use crate::session::Locale;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepSettings {
    pub namespace: String,
    pub session_key: String,
    pub key_slot: String,
    pub session_ttl_ms: i64,
    pub default_locale: Locale,
    pub quota_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for KeepSettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.into(),
            session_key: DEFAULT_SESSION_KEY.into(),
            key_slot: DEFAULT_KEY_SLOT.into(),
            session_ttl_ms: SESSION_TTL_MS,
            default_locale: Locale::default(),
            quota_bytes: DEFAULT_QUOTA_BYTES,
            data_dir: None,
        }
    }
}

impl KeepSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::Invalid("namespace must not be empty".into()));
        }
        if !self.session_key.starts_with(&self.namespace) {
            return Err(ConfigError::Invalid(format!(
                "session_key {:?} is outside namespace {:?}",
                self.session_key, self.namespace
            )));
        }
        if self.key_slot.is_empty() {
            return Err(ConfigError::Invalid("key_slot must not be empty".into()));
        }
        if self.session_ttl_ms <= 0 {
            return Err(ConfigError::Invalid("session_ttl_ms must be positive".into()));
        }
        if self.quota_bytes == 0 {
            return Err(ConfigError::Invalid("quota_bytes must be positive".into()));
        }
        Ok(())
    }

    /// Explicit `data_dir`, else the platform data directory.
    pub fn resolve_data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::data_dir(),
        }
    }
}

/// Load settings from `path`, or from the default location when `None`.
/// A missing default file yields defaults; a missing explicit file is an
/// error.
pub fn load_settings(path: Option<&Path>) -> Result<KeepSettings, ConfigError> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (paths::settings_path()?, false),
    };
    let settings: KeepSettings = match fs::read(&path) {
        Ok(bytes) => serde_json::from_slice(&bytes)?,
        Err(err) if err.kind() == ErrorKind::NotFound && !required => KeepSettings::default(),
        Err(err) => return Err(err.into()),
    };
    settings.validate()?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &KeepSettings) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(settings)?;
    fs::write(path, data)?;
    Ok(())
}
