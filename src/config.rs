use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cli::CompilerKind;

pub const CONFIG_FILE: &str = "bundt.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Options shared by every compilation
    #[serde(default)]
    pub build: BuildOptions,

    /// Which compiler backend to run
    #[serde(default)]
    pub compiler: CompilerConfig,

    /// Size report settings
    #[serde(default)]
    pub report: ReportConfig,

    /// Per export/condition customization
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<OverrideRule>,
}

/// Global build options. `minify` and `sourcemap` left unset are derived
/// from each condition chain (`production` / `development`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOptions {
    #[serde(default = "default_target")]
    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minify: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sourcemap: Option<bool>,

    #[serde(default = "default_true")]
    pub tree_shaking: bool,

    #[serde(default = "default_charset")]
    pub charset: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Modules to leave external in addition to builtins and dependencies
    #[serde(default)]
    pub external: Vec<String>,

    /// Extra compiler options; part of every configuration's identity
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    #[serde(default)]
    pub kind: CompilerKind,

    /// Path to the esbuild binary
    #[serde(default = "default_esbuild")]
    pub esbuild: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_true")]
    pub gzip: bool,

    #[serde(default = "default_true")]
    pub colors: bool,
}

/// One `[[overrides]]` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideRule {
    /// Exact export path (`.`, `./foo`) or bin name
    pub export: Option<String>,

    /// Full condition chain, or one segment of it
    pub condition: Option<String>,

    #[serde(default)]
    pub skip: bool,

    /// Compile this source instead (relative to the package)
    pub file: Option<PathBuf>,

    /// Copy type declarations here instead (relative to the package)
    pub types: Option<Vec<PathBuf>>,

    pub target: Option<String>,
    pub minify: Option<bool>,
    pub sourcemap: Option<bool>,

    #[serde(default)]
    pub external: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            target: default_target(),
            minify: None,
            sourcemap: None,
            tree_shaking: true,
            charset: default_charset(),
            log_level: default_log_level(),
            external: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            kind: CompilerKind::default(),
            esbuild: default_esbuild(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            gzip: true,
            colors: true,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or discover it from `start_dir`
    pub fn load(path: Option<&Path>, start_dir: &Path) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::find_config_file(start_dir),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

            Ok(config)
        } else if path.is_some() {
            anyhow::bail!("Config file not found: {}", config_path.display())
        } else {
            Ok(Config::default())
        }
    }

    /// Initialize configuration file
    pub fn init(output_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;

        let config_path = output_dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(&Config::default())
            .context("Failed to serialize default configuration")?;

        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(config_path)
    }

    /// `start_dir` and its parents, then the user config directory
    fn find_config_file(start_dir: &Path) -> PathBuf {
        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            let config_path = current.join(CONFIG_FILE);
            if config_path.exists() {
                return config_path;
            }
            dir = current.parent();
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("bundt").join("config.toml");
            if config_path.exists() {
                return config_path;
            }
        }

        // may not exist
        start_dir.join(CONFIG_FILE)
    }
}

fn default_target() -> String {
    "es2019".to_string()
}

fn default_charset() -> String {
    "utf8".to_string()
}

fn default_log_level() -> String {
    "warning".to_string()
}

fn default_esbuild() -> PathBuf {
    PathBuf::from("esbuild")
}

fn default_true() -> bool {
    true
}
