//! `devsync.yaml` loading, validation and scaffolding.
//!
//! # Lookup order
//!
//! ```text
//! --config <path>                         (explicit, must exist)
//! <workdir>/devsync.yaml
//! <config_dir>/devsync/config.yaml        (dirs::config_dir())
//! ```
//!
//! # File shape
//!
//! ```yaml
//! email: dev@example.com
//! interval: 30
//! match_once: false
//! skip_if_mode: any
//! step_timeout_secs: 300
//! rules:
//!   deploy/*:
//!     - ./deploy.sh
//!   frontend/**/*.spec.js:
//!     - skipIf: { testFor: [npm ci], commands: [npm install] }
//!     - npm test
//! ```
//!
//! Rule entries are parsed one by one. A malformed entry is kept in the table
//! as a never-matching rule so the rest of the configuration stays usable.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::{io_err, ConfigError};
use crate::pattern::Pattern;
use crate::types::{
    CommandSpec, Config, Rule, RuleTable, SkipIfMode, DEFAULT_INTERVAL_SECS,
    DEFAULT_STEP_TIMEOUT_SECS,
};

pub const CONFIG_FILE_NAME: &str = "devsync.yaml";

// ---------------------------------------------------------------------------
// 1. Paths
// ---------------------------------------------------------------------------

/// `<workdir>/devsync.yaml`. Pure, no I/O.
pub fn config_path_at(workdir: &Path) -> PathBuf {
    workdir.join(CONFIG_FILE_NAME)
}

/// `<config_dir>/devsync/config.yaml`, if the platform has a config dir.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("devsync").join("config.yaml"))
}

/// Pick the config file for `workdir`.
///
/// An explicit path wins and must exist. Otherwise the working-copy file is
/// preferred over the per-user fallback.
pub fn locate(workdir: &Path, explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        return Ok(path.to_path_buf());
    }

    let local = config_path_at(workdir);
    if local.exists() {
        return Ok(local);
    }
    if let Some(global) = global_config_path().filter(|p| p.exists()) {
        return Ok(global);
    }
    Err(ConfigError::NotFound { path: local })
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(alias = "author")]
    email: String,
    #[serde(default = "default_interval")]
    interval: u64,
    #[serde(default)]
    match_once: bool,
    #[serde(default)]
    skip_if_mode: SkipIfMode,
    #[serde(default = "default_step_timeout")]
    step_timeout_secs: u64,
    #[serde(default, alias = "logic")]
    rules: Mapping,
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_step_timeout() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

/// Load and validate the config at `path`.
///
/// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse` (with path
/// and line context) if the document is not valid YAML of the right shape.
pub fn load_at(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    parse(&contents, path)
}

/// Parse a config document. `origin` is only used for error messages.
pub fn parse(contents: &str, origin: &Path) -> Result<Config, ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
        path: origin.to_path_buf(),
        source: e,
    })?;

    if raw.email.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field: "email",
            reason: "must name the authorized commit author".to_string(),
        });
    }
    if raw.interval < 1 {
        return Err(ConfigError::Invalid {
            field: "interval",
            reason: "must be at least 1 second".to_string(),
        });
    }
    if raw.step_timeout_secs < 1 {
        return Err(ConfigError::Invalid {
            field: "step_timeout_secs",
            reason: "must be at least 1 second".to_string(),
        });
    }

    Ok(Config {
        email: raw.email.trim().to_string(),
        interval_secs: raw.interval,
        match_once: raw.match_once,
        skip_if_mode: raw.skip_if_mode,
        step_timeout_secs: raw.step_timeout_secs,
        rules: parse_rules(raw.rules),
    })
}

fn parse_rules(mapping: Mapping) -> RuleTable {
    mapping
        .into_iter()
        .map(|(key, value)| parse_rule(key, value))
        .collect()
}

fn parse_rule(key: Value, value: Value) -> Rule {
    let key = match key {
        Value::String(key) => key,
        other => {
            let shown = serde_yaml::to_string(&other).unwrap_or_default();
            return Rule {
                pattern: Pattern::invalid(shown.trim(), "rule key must be a string"),
                commands: Vec::new(),
            };
        }
    };

    match parse_commands(&key, value) {
        Ok(commands) => Rule {
            pattern: Pattern::parse(&key),
            commands,
        },
        Err(err) => Rule {
            pattern: Pattern::invalid(&key, err.to_string()),
            commands: Vec::new(),
        },
    }
}

fn parse_commands(key: &str, value: Value) -> Result<Vec<CommandSpec>, ConfigError> {
    // A single bare command is accepted as a one-element list.
    let value = match value {
        Value::String(_) | Value::Mapping(_) => Value::Sequence(vec![value]),
        other => other,
    };
    serde_yaml::from_value(value).map_err(|e| ConfigError::Rule {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// 3. Provider
// ---------------------------------------------------------------------------

/// Source of configuration, consulted once per cycle so edits apply on the
/// next tick.
pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<Config, ConfigError>;
}

/// Re-reads a YAML file on every call.
#[derive(Debug, Clone)]
pub struct FileConfig {
    path: PathBuf,
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for FileConfig {
    fn load(&self) -> Result<Config, ConfigError> {
        load_at(&self.path)
    }
}

/// A fixed, in-memory configuration.
impl ConfigProvider for Config {
    fn load(&self) -> Result<Config, ConfigError> {
        Ok(self.clone())
    }
}

// ---------------------------------------------------------------------------
// 4. Init (atomic)
// ---------------------------------------------------------------------------

/// Write a starter `devsync.yaml` into `workdir`.
///
/// Write flow: render → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
/// Refuses to overwrite an existing file unless `force` is set.
pub fn init_at(
    workdir: &Path,
    email: &str,
    interval: u64,
    force: bool,
) -> Result<PathBuf, ConfigError> {
    if email.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field: "email",
            reason: "must name the authorized commit author".to_string(),
        });
    }
    if interval < 1 {
        return Err(ConfigError::Invalid {
            field: "interval",
            reason: "must be at least 1 second".to_string(),
        });
    }

    let path = config_path_at(workdir);
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists { path });
    }

    let email = serde_yaml::to_string(email.trim())?;
    let contents = format!(
        "# generated by devsync init on {created}\n\
         email: {email}\
         interval: {interval}\n\
         match_once: false\n\
         skip_if_mode: any\n\
         step_timeout_secs: {timeout}\n\
         rules: {{}}\n\
         #   deploy/*:\n\
         #     - ./deploy.sh\n\
         #   frontend/**/*.spec.js:\n\
         #     - skipIf: {{ testFor: [npm ci], commands: [npm install] }}\n\
         #     - npm test\n",
        created = Utc::now().to_rfc3339(),
        timeout = DEFAULT_STEP_TIMEOUT_SECS,
    );

    let tmp = path.with_file_name(format!("{CONFIG_FILE_NAME}.tmp"));
    std::fs::write(&tmp, contents).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
