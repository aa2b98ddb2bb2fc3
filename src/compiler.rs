//! The external compile capability and the configuration handed to it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cli::CompilerKind;
use crate::config::CompilerConfig;
use crate::errors::{BundtError, Result};
use crate::fingerprint::fingerprint;

/// One compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub name: String,
    pub text: String,
}

/// Everything a single compilation depends on.
///
/// Serialized (camelCase) for fingerprinting; `outfile` is excluded from the
/// identity because it does not change the compiled bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    pub target: String,
    pub minify: bool,
    pub sourcemap: bool,
    pub tree_shaking: bool,
    pub charset: String,
    pub log_level: String,
    pub external: Vec<String>,
    pub entry_points: Vec<PathBuf>,
    pub format: String,
    pub bundle: bool,
    pub write: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outfile: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            target: "es2019".to_string(),
            minify: false,
            sourcemap: false,
            tree_shaking: true,
            charset: "utf8".to_string(),
            log_level: "warning".to_string(),
            external: Vec::new(),
            entry_points: Vec::new(),
            format: "esm".to_string(),
            bundle: true,
            write: false,
            outfile: None,
            extra: BTreeMap::new(),
        }
    }
}

impl BuildConfig {
    pub fn entry(&self) -> Option<&Path> {
        self.entry_points.first().map(PathBuf::as_path)
    }

    /// Identity of this configuration, ignoring `outfile`.
    pub fn fingerprint(&self) -> Result<String> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| BundtError::internal(format!("unserializable build config: {e}")))?;
        if let Value::Object(map) = &mut value {
            map.remove("outfile");
        }
        Ok(fingerprint(&value))
    }
}

/// Compile one entry point into one or more chunks.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, config: &BuildConfig) -> Result<Vec<Chunk>>;
}

pub fn from_config(config: &CompilerConfig) -> Arc<dyn Compiler> {
    match config.kind {
        CompilerKind::Esbuild => Arc::new(EsbuildCompiler::new(config.esbuild.clone())),
        CompilerKind::Passthrough => Arc::new(PassthroughCompiler),
    }
}

/// Runs the `esbuild` binary, capturing the bundle from stdout.
pub struct EsbuildCompiler {
    binary: PathBuf,
}

impl EsbuildCompiler {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn args(config: &BuildConfig) -> Vec<String> {
        let mut args: Vec<String> = config
            .entry_points
            .iter()
            .map(|p| p.display().to_string())
            .collect();

        if config.bundle {
            args.push("--bundle".to_string());
        }
        args.push(format!("--format={}", config.format));
        args.push(format!("--target={}", config.target));
        args.push(format!("--charset={}", config.charset));
        args.push(format!("--log-level={}", config.log_level));
        args.push(format!("--tree-shaking={}", config.tree_shaking));
        if config.minify {
            args.push("--minify".to_string());
        }
        // stdout output cannot carry a linked map
        if config.sourcemap {
            args.push("--sourcemap=inline".to_string());
        }
        for module in &config.external {
            args.push(format!("--external:{module}"));
        }
        for (key, value) in &config.extra {
            args.extend(extra_flags(&kebab_case(key), value));
        }

        args
    }
}

#[async_trait]
impl Compiler for EsbuildCompiler {
    async fn compile(&self, config: &BuildConfig) -> Result<Vec<Chunk>> {
        let entry = config
            .entry()
            .ok_or_else(|| BundtError::internal("build config has no entry point"))?;

        let args = Self::args(config);
        debug!("{} {}", self.binary.display(), args.join(" "));

        let output = tokio::process::Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BundtError::Compile {
                entry: entry.to_path_buf(),
                message: format!("failed to run {}", self.binary.display()),
                source: Some(Box::new(e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BundtError::compile_error(entry, stderr.trim()));
        }

        let text = String::from_utf8(output.stdout).map_err(|e| BundtError::Compile {
            entry: entry.to_path_buf(),
            message: "esbuild produced non UTF-8 output".to_string(),
            source: Some(Box::new(e)),
        })?;

        Ok(vec![Chunk {
            name: chunk_name(entry),
            text,
        }])
    }
}

/// Emits the entry source as-is (minified on request); for sources that are
/// already plain ES modules.
pub struct PassthroughCompiler;

#[async_trait]
impl Compiler for PassthroughCompiler {
    async fn compile(&self, config: &BuildConfig) -> Result<Vec<Chunk>> {
        let entry = config
            .entry()
            .ok_or_else(|| BundtError::internal("build config has no entry point"))?;

        let code = tokio::fs::read_to_string(entry).await.map_err(|e| BundtError::Compile {
            entry: entry.to_path_buf(),
            message: "failed to read entry".to_string(),
            source: Some(Box::new(e)),
        })?;

        let text = if config.minify {
            minifier::js::minify(&code).to_string()
        } else {
            code
        };

        Ok(vec![Chunk {
            name: chunk_name(entry),
            text,
        }])
    }
}

fn chunk_name(entry: &Path) -> String {
    let stem = entry.file_stem().and_then(|s| s.to_str()).unwrap_or("index");
    format!("{stem}.js")
}

fn kebab_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn extra_flags(flag: &str, value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Bool(true) => vec![format!("--{flag}")],
        Value::Bool(false) => vec![format!("--{flag}=false")],
        Value::String(s) => vec![format!("--{flag}={s}")],
        Value::Number(n) => vec![format!("--{flag}={n}")],
        Value::Array(items) => {
            let joined: Vec<String> = items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            vec![format!("--{flag}={}", joined.join(","))]
        }
        // `define: { DEBUG: "false" }` → `--define:DEBUG=false`
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("--{flag}:{k}={s}"),
                other => format!("--{flag}:{k}={other}"),
            })
            .collect(),
    }
}
