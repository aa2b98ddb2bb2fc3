use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{BundtError, Result};
use crate::exports::{self, NormalizedExports};

/// Node's `builtinModules`; always left external.
pub const BUILTIN_MODULES: &[&str] = &[
    "assert", "assert/strict", "async_hooks", "buffer", "child_process", "cluster",
    "console", "constants", "crypto", "dgram", "diagnostics_channel", "dns",
    "dns/promises", "domain", "events", "fs", "fs/promises", "http", "http2", "https",
    "inspector", "module", "net", "os", "path", "path/posix", "path/win32",
    "perf_hooks", "process", "punycode", "querystring", "readline", "readline/promises",
    "repl", "stream", "stream/consumers", "stream/promises", "stream/web",
    "string_decoder", "sys", "timers", "timers/promises", "tls", "trace_events", "tty",
    "url", "util", "util/types", "v8", "vm", "wasi", "worker_threads", "zlib",
];

/// `package.json` as written by the package author.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPackage {
    name: Option<String>,
    exports: Option<Value>,
    bin: Option<Value>,
    files: Option<Vec<String>>,
    #[serde(rename = "type")]
    kind: Option<String>,
    dependencies: Option<Map<String, Value>>,
    peer_dependencies: Option<Map<String, Value>>,
    dev_dependencies: Option<Map<String, Value>>,
}

/// Normalized view of `package.json`.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    /// `"type": "module"`
    pub module: bool,
    /// Package name plus every declared dependency.
    pub external: Vec<String>,
    pub exports: NormalizedExports,
    /// Publish allowlist, verbatim.
    pub files: Vec<String>,
    /// Executable name → declared output file.
    pub bin: BTreeMap<String, String>,
}

impl Package {
    /// Read and normalize `<pkgdir>/package.json`.
    pub async fn load(pkgdir: &Path) -> Result<Self> {
        let path = pkgdir.join("package.json");
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(BundtError::MissingManifest {
                dir: pkgdir.to_path_buf(),
            });
        }

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| BundtError::file_system_error("Failed to read package.json", &path, e))?;

        Self::parse(&text, &path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let raw: RawPackage = serde_json::from_str(text).map_err(|source| {
            BundtError::ManifestParse {
                path: PathBuf::from(path),
                source,
            }
        })?;

        let exports = raw
            .exports
            .ok_or(BundtError::MissingField { field: "exports" })?;
        let name = raw.name.ok_or(BundtError::MissingField { field: "name" })?;

        let mut external = vec![name.clone()];
        for deps in [&raw.peer_dependencies, &raw.dev_dependencies, &raw.dependencies]
            .into_iter()
            .flatten()
        {
            external.extend(deps.keys().cloned());
        }

        let bin = match raw.bin {
            Some(Value::String(file)) => {
                let command = name.rsplit('/').next().unwrap_or(&name).to_string();
                BTreeMap::from([(command, file)])
            }
            Some(Value::Object(map)) => map
                .into_iter()
                .filter_map(|(command, file)| match file {
                    Value::String(file) => Some((command, file)),
                    _ => None,
                })
                .collect(),
            _ => BTreeMap::new(),
        };

        let exports = exports::entries(&exports);
        debug!("{} declares {} export path(s)", name, exports.len());

        Ok(Self {
            module: raw.kind.as_deref() == Some("module"),
            files: raw.files.unwrap_or_default(),
            name,
            external,
            exports,
            bin,
        })
    }

    /// Builtins (bare and `node:`-prefixed), the package itself, its
    /// dependencies and any `extra` modules.
    pub fn externals(&self, extra: &[String]) -> Vec<String> {
        let mut out: Vec<String> = BUILTIN_MODULES
            .iter()
            .flat_map(|m| [m.to_string(), format!("node:{m}")])
            .collect();
        out.extend(self.external.iter().cloned());
        out.extend(extra.iter().cloned());
        out
    }
}

/// Whether `file` is emitted as an ES module (`.mjs`, or `.js` in a
/// `"type": "module"` package).
pub fn is_module(file: &str, is_esm: bool) -> bool {
    match Path::new(file).extension().and_then(|e| e.to_str()) {
        Some("mjs") => true,
        Some("js") => is_esm,
        _ => false,
    }
}
