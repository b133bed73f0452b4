//! Client-side persistence.
//! Manages I/O for config.json (target repo, branch, app list path) and the
//! credential file, both under the user config directory. Uses serde for
//! JSON serialization. The credential can also come from the environment,
//! which wins over the stored file; the core never inspects or mutates it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::registry::DEFAULT_BRANCH;
use crate::store::FileLocation;

pub const TOKEN_ENV: &str = "CONFSYNC_TOKEN";
const APP_DIR: &str = "confsync";
const SETTINGS_FILE: &str = "config.json";
const TOKEN_FILE: &str = "token";

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_apps_path() -> String {
    "configs/apps.json".to_string()
}

/// Where the app registry lives. Written by `confsync init`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_apps_path")]
    pub apps_path: String,
}

impl Settings {
    pub fn list_location(&self) -> FileLocation {
        FileLocation::new(&self.repo, &self.apps_path, &self.branch)
    }

    pub fn load() -> Result<Option<Settings>> {
        let path = settings_path()?;
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings = serde_json::from_str(&text)
            .with_context(|| format!("Malformed settings file {}", path.display()))?;
        Ok(Some(settings))
    }

    pub fn store(&self) -> Result<()> {
        let path = settings_path()?;
        ensure_parent(&path)?;
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .context("No user config directory available on this platform")
}

fn settings_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(SETTINGS_FILE))
}

fn token_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(TOKEN_FILE))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Reads the credential: environment first, then the stored file.
pub fn load_token() -> Option<String> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.is_empty() {
            return Some(token);
        }
    }
    let path = token_path().ok()?;
    let text = fs::read_to_string(path).ok()?;
    let token = text.trim().to_string();
    (!token.is_empty()).then_some(token)
}

pub fn store_token(token: &str) -> Result<()> {
    let path = token_path()?;
    ensure_parent(&path)?;
    fs::write(&path, token).with_context(|| format!("Failed to write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions on {}", path.display()))?;
    }
    Ok(())
}

pub fn clear_token() -> Result<()> {
    let path = token_path()?;
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"repo":"o/r"}"#).unwrap();
        assert_eq!(settings.branch, "main");
        assert_eq!(settings.apps_path, "configs/apps.json");
    }

    #[test]
    fn test_list_location() {
        let settings = Settings {
            repo: "o/r".to_string(),
            branch: "dev".to_string(),
            apps_path: "apps.json".to_string(),
        };
        let loc = settings.list_location();
        assert_eq!(loc.repo, "o/r");
        assert_eq!(loc.branch, "dev");
        assert_eq!(loc.path, "apps.json");
    }
}
