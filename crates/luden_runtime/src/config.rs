//! Runtime configuration
//!
//! # Configuration Sources (in priority order)
//!
//! 1. Command line: `luden path/to/game.toml`
//! 2. Environment variable: `LUDEN_CONFIG=path/to/game.toml`
//! 3. `luden.toml` in the working directory
//! 4. Built-in defaults (no modules, default application)
//!
//! `LUDEN_FRAME_LIMIT` and `LUDEN_HEADLESS` override the file afterwards.
//!
//! # Example Config File
//!
//! ```toml
//! [application]
//! name = "Paddle"
//! window_width = 800
//! window_height = 600
//!
//! [runtime]
//! frame_limit = 600
//! fixed_delta = 0.016
//! hot_reload = true
//!
//! [manifest.loader]
//! search_paths = ["target/debug"]
//!
//! [[manifest.module]]
//! name = "paddle_game"
//! library = "paddle_game"
//! hot_reload = true
//!
//! [[entity]]
//! name = "paddle"
//! script = "PaddleController"
//!
//! [[entity.component]]
//! type = "CTransform"
//! properties = { pos = { x = 400.0, y = 560.0 } }
//! ```

use luden_core::Value;
use luden_native::{ApplicationSpec, ManifestError, ModuleManifest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "LUDEN_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "luden.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Frame loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Stop after this many frames
    pub frame_limit: Option<u64>,
    /// Use a constant delta time instead of the measured one
    pub fixed_delta: Option<f32>,
    /// Upper bound for a measured delta time, in seconds
    pub max_delta: f32,
    /// Watch hot-reloadable modules
    pub hot_reload: bool,
    /// Module manifest file, replaces the inline `[manifest]`
    pub manifest: Option<PathBuf>,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            frame_limit: None,
            fixed_delta: None,
            max_delta: 0.25,
            hot_reload: true,
            manifest: None,
        }
    }
}

/// A reflected component on an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Registered type name
    #[serde(rename = "type")]
    pub type_name: String,
    /// Constructor arguments
    #[serde(default)]
    pub args: Vec<Value>,
    /// Properties set after construction
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

/// An entity declared in the config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    #[serde(default, rename = "component")]
    pub components: Vec<ComponentConfig>,
    /// Script behavior to attach
    #[serde(default)]
    pub script: Option<String>,
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub application: ApplicationSpec,
    pub runtime: RuntimeSection,
    pub manifest: ModuleManifest,
    #[serde(rename = "entity")]
    pub entities: Vec<EntityConfig>,
    /// File the config was read from
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Where the config comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine(PathBuf),
    Environment(PathBuf),
    WorkingDirectory(PathBuf),
    Defaults,
}

impl ConfigSource {
    /// Pick the source by priority
    pub fn resolve(cli: Option<PathBuf>, env: Option<PathBuf>, working_directory: &Path) -> Self {
        if let Some(path) = cli {
            return Self::CommandLine(path);
        }
        if let Some(path) = env.filter(|p| !p.as_os_str().is_empty()) {
            return Self::Environment(path);
        }
        let local = working_directory.join(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            return Self::WorkingDirectory(local);
        }
        Self::Defaults
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::CommandLine(path) | Self::Environment(path) | Self::WorkingDirectory(path) => {
                Some(path)
            }
            Self::Defaults => None,
        }
    }
}

impl RuntimeConfig {
    /// Load from the command line argument, the environment or the
    /// working directory
    pub fn load(cli: Option<PathBuf>) -> Result<Self, ConfigError> {
        let env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let source = ConfigSource::resolve(cli, env, &cwd);
        let mut config = match source.path() {
            Some(path) => {
                let config = Self::load_from_file(path)?;
                log::info!("Loaded runtime config from {}", path.display());
                config
            }
            None => {
                log::info!("No runtime config found, using defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&source).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        match config.runtime.manifest.clone() {
            Some(manifest) => config.manifest = ModuleManifest::load(base.join(manifest))?,
            None => config.manifest.rebase(base),
        }
        if config.application.working_directory.as_os_str().is_empty() {
            config.application.working_directory = base.to_path_buf();
        }
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse without touching the filesystem
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(source).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.manifest.validate()?;
        Ok(config)
    }

    /// Apply `LUDEN_*` overrides
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(limit) = var("LUDEN_FRAME_LIMIT") {
            match limit.parse() {
                Ok(limit) => {
                    self.runtime.frame_limit = Some(limit);
                    log::info!("Frame limit from env: {}", limit);
                }
                Err(_) => log::warn!("Ignoring invalid LUDEN_FRAME_LIMIT '{}'", limit),
            }
        }
        if let Some(headless) = var("LUDEN_HEADLESS") {
            self.application.headless = headless == "1" || headless == "true";
        }
    }

    pub fn print_summary(&self) {
        log::info!("Runtime Configuration:");
        log::info!(
            "  Application: {} ({}x{}{})",
            self.application.name,
            self.application.window_width,
            self.application.window_height,
            if self.application.headless { ", headless" } else { "" }
        );
        log::info!("  Modules: {}", self.manifest.modules.len());
        log::info!("  Entities: {}", self.entities.len());
        if let Some(limit) = self.runtime.frame_limit {
            log::info!("  Frame limit: {}", limit);
        }
        if let Some(path) = &self.config_path {
            log::info!("  Config: {}", path.display());
        }
    }
}
