//! Session configuration: file + environment loading and validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{GraftError, GraftResult};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "grafter.toml";

/// Environment variable prefix (`GRAFTER_STOP_ON_ERROR`, `GRAFTER_MERGE__REWRITE_IMPORTS`).
pub const ENV_PREFIX: &str = "GRAFTER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeStrategy {
    pub preserve_existing: bool,
    pub add_new_non_conflicting: bool,
    pub rewrite_imports: bool,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        Self {
            preserve_existing: true,
            add_new_non_conflicting: true,
            rewrite_imports: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub tolerate_baseline_errors: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            command: ["npx", "tsc", "--noEmit", "--pretty", "false"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout_secs: 600,
            tolerate_baseline_errors: true,
        }
    }
}

/// Category directories, relative to the target root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetLayout {
    pub hooks: PathBuf,
    pub services: PathBuf,
    pub utilities: PathBuf,
    pub types: PathBuf,
    pub components: PathBuf,
    pub layout: PathBuf,
    pub features: PathBuf,
    pub holding: PathBuf,
}

impl Default for TargetLayout {
    fn default() -> Self {
        Self {
            hooks: PathBuf::from("hooks"),
            services: PathBuf::from("services"),
            utilities: PathBuf::from("utils"),
            types: PathBuf::from("types"),
            components: PathBuf::from("components"),
            layout: PathBuf::from("components/layout"),
            features: PathBuf::from("features"),
            holding: PathBuf::from("_unsorted"),
        }
    }
}

/// Bounded retry for transient file-system failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source_dir: PathBuf,
    pub target_root: PathBuf,
    pub merge: MergeStrategy,
    pub verify_after_each: bool,
    pub delete_after_success: bool,
    pub create_backups: bool,
    pub stop_on_error: bool,
    pub verify: VerifyConfig,
    pub layout: TargetLayout,
    /// Import alias prefix (e.g. `@/`) mapped to a directory under the target root.
    pub aliases: BTreeMap<String, PathBuf>,
    /// Ledger and backup directory; relative paths are taken from the target root.
    pub state_dir: PathBuf,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        let mut aliases = BTreeMap::new();
        aliases.insert("@/".to_string(), PathBuf::from("."));
        Self {
            source_dir: PathBuf::new(),
            target_root: PathBuf::new(),
            merge: MergeStrategy::default(),
            verify_after_each: true,
            delete_after_success: true,
            create_backups: true,
            stop_on_error: false,
            verify: VerifyConfig::default(),
            layout: TargetLayout::default(),
            aliases,
            state_dir: PathBuf::from(".grafter"),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Minimal configuration for the given directories with every default applied.
    pub fn new(source_dir: impl Into<PathBuf>, target_root: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            target_root: target_root.into(),
            ..Self::default()
        }
    }

    /// Load from an optional TOML file and `GRAFTER_*` environment variables.
    ///
    /// An explicitly named file must exist; the default `grafter.toml` is optional.
    pub fn load(config_file: Option<&Path>) -> GraftResult<Self> {
        let file_source = match config_file {
            Some(path) => config::File::from(path.to_path_buf()).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize::<Config>()?)
    }

    pub fn validate(&self) -> GraftResult<()> {
        if self.source_dir.as_os_str().is_empty() {
            return Err(GraftError::Config("source_dir is not set".to_string()));
        }
        if self.target_root.as_os_str().is_empty() {
            return Err(GraftError::Config("target_root is not set".to_string()));
        }
        if self.source_dir == self.target_root {
            return Err(GraftError::Config(
                "source_dir and target_root must differ".to_string(),
            ));
        }
        if !self.merge.preserve_existing {
            return Err(GraftError::Config(
                "merge.preserve_existing cannot be disabled: existing exports are never discarded"
                    .to_string(),
            ));
        }
        if self.verify_after_each && self.verify.command.is_empty() {
            return Err(GraftError::Config(
                "verify.command is empty but verify_after_each is set".to_string(),
            ));
        }
        if self.retry.attempts == 0 {
            return Err(GraftError::Config("retry.attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn state_dir(&self) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            self.target_root.join(&self.state_dir)
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir().join("state.json")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.state_dir().join("backups")
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.state_dir().join("journal")
    }

    /// Alias prefixes resolved to absolute directories, longest prefix first.
    pub fn alias_dirs(&self) -> Vec<(String, PathBuf)> {
        let mut aliases: Vec<(String, PathBuf)> = self
            .aliases
            .iter()
            .map(|(prefix, dir)| (prefix.clone(), self.target_root.join(dir)))
            .collect();
        aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        aliases
    }
}
