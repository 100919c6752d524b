//! Mooring configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.mooring/
//!   config.yaml   (mode 0600: holds the R2 secret)
//! ```
//!
//! Every field is optional in the file. Environment variables override the
//! file (see [`ENV_OVERRIDES`]).
//!
//! # API pattern
//!
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::R2Credentials;

pub const ENV_ACCESS_KEY_ID: &str = "R2_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "R2_SECRET_ACCESS_KEY";
pub const ENV_ACCOUNT_ID: &str = "CF_ACCOUNT_ID";
pub const ENV_BUCKET: &str = "R2_BUCKET_NAME";
pub const ENV_MOUNT_PATH: &str = "MOORING_MOUNT_PATH";
pub const ENV_VERBOSE: &str = "MOORING_VERBOSE";

/// Environment variables consulted by [`Config::with_env_overrides`].
pub const ENV_OVERRIDES: &[&str] = &[
    ENV_ACCESS_KEY_ID,
    ENV_SECRET_ACCESS_KEY,
    ENV_ACCOUNT_ID,
    ENV_BUCKET,
    ENV_MOUNT_PATH,
    ENV_VERBOSE,
];

/// Effective configuration for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// R2 bucket backing the mount.
    pub bucket: String,
    /// Cloudflare account id; the R2 endpoint is derived from it.
    pub account_id: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Where the bucket is mounted.
    pub mount_path: PathBuf,
    /// Local configuration directory, mirrored to `<mount>/openclaw/`.
    pub config_dir: PathBuf,
    /// File that must exist in `config_dir` before anything is replicated.
    pub critical_file: String,
    /// Local workspace, mirrored to `<mount>/workspace/` (minus `skills/`).
    pub workspace_dir: PathBuf,
    /// Daemon scheduling period.
    pub sync_interval_secs: u64,
    /// Flush the bundled run log after every sync.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket: "moltbot-data".to_string(),
            account_id: None,
            access_key_id: None,
            secret_access_key: None,
            mount_path: PathBuf::from("/data/moltbot"),
            config_dir: PathBuf::from("/root/.openclaw"),
            critical_file: "openclaw.json".to_string(),
            workspace_dir: PathBuf::from("/root/clawd"),
            sync_interval_secs: 300,
            verbose: false,
        }
    }
}

impl Config {
    /// The explicit key pair, present only when the whole storage config is.
    ///
    /// Account id and bucket are required alongside the keys: without them
    /// there is no endpoint to mount.
    pub fn credentials(&self) -> Option<R2Credentials> {
        let access_key_id = non_empty(self.access_key_id.as_deref())?;
        let secret_access_key = non_empty(self.secret_access_key.as_deref())?;
        non_empty(self.account_id.as_deref())?;
        non_empty(Some(self.bucket.as_str()))?;
        Some(R2Credentials {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.credentials().is_some()
    }

    /// `https://<account_id>.r2.cloudflarestorage.com`
    pub fn endpoint(&self) -> Option<String> {
        non_empty(self.account_id.as_deref())
            .map(|account| format!("https://{account}.r2.cloudflarestorage.com"))
    }

    /// `<workspace_dir>/skills`: replicated as its own stage.
    pub fn skills_dir(&self) -> PathBuf {
        self.workspace_dir.join("skills")
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    ///
    /// Empty values are ignored so an exported-but-blank variable does not
    /// erase a value from the file.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_ACCESS_KEY_ID) {
            self.access_key_id = Some(v);
        }
        if let Some(v) = get(ENV_SECRET_ACCESS_KEY) {
            self.secret_access_key = Some(v);
        }
        if let Some(v) = get(ENV_ACCOUNT_ID) {
            self.account_id = Some(v);
        }
        if let Some(v) = get(ENV_BUCKET) {
            self.bucket = v;
        }
        if let Some(v) = get(ENV_MOUNT_PATH) {
            self.mount_path = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_VERBOSE) {
            self.verbose = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        self
    }

    /// Copy with secrets replaced, for display.
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        masked.secret_access_key = masked.secret_access_key.as_deref().map(mask);
        masked.access_key_id = masked.access_key_id.as_deref().map(mask);
        masked
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.mooring/`
pub fn mooring_root(home: &Path) -> PathBuf {
    home.join(".mooring")
}

/// `<home>/.mooring/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    mooring_root(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load `<home>/.mooring/config.yaml` without environment overrides.
///
/// A missing file yields [`Config::default`]; a malformed one yields
/// `ConfigError::Parse` with path and line context.
pub fn load_file_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// Load the effective config: file at `home`, then process environment.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    Ok(load_file_at(home)?.with_env_overrides(|key| std::env::var(key).ok()))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `config` to `<home>/.mooring/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<PathBuf, ConfigError> {
    let root = mooring_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root)?;
        set_dir_permissions(&root)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(config: &Config) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    if value.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
