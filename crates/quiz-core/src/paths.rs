use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "quizkeep";
pub const APP_NAME: &str = "quiz-keep";
pub const DATA_DIR_ENV: &str = "QUIZ_KEEP_DATA_DIR";

pub fn data_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or(ConfigError::NoDataDir)?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Durable entries live one directory below the data root.
pub fn store_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("store")
}

pub fn settings_path() -> Result<PathBuf, ConfigError> {
    Ok(data_dir()?.join("settings.json"))
}
