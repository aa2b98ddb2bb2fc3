//! Matches export paths and executables to source files on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::errors::{BundtError, Result};
use crate::exports::ConditionTable;
use crate::manifest::{self, Package};

/// One buildable entry: an export path or a `bin` command.
#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    /// Source file; `None` only for a `bin` without sources.
    pub file: Option<PathBuf>,
    /// Sibling `.d.ts` of `file`, when present.
    pub types: Option<PathBuf>,
    pub output: ConditionTable,
    /// Export path (`.`, `./foo`) or command name.
    pub entry: String,
}

/// `./foo` → `foo`, `.` → `index`
pub fn basename(entry: &str) -> String {
    let name = entry.strip_prefix("./").unwrap_or(entry);
    if name == "." || name.is_empty() {
        "index".to_string()
    } else {
        name.to_string()
    }
}

/// Resolve every export path (sorted) followed by every `bin` command.
pub async fn inputs(pkgdir: &Path, pkg: &Package) -> Result<Vec<Input>> {
    let mut inputs = Vec::new();
    if pkg.exports.is_empty() && pkg.bin.is_empty() {
        return Ok(inputs);
    }

    let src = pkgdir.join("src");
    let src = if tokio::fs::metadata(&src).await.is_ok_and(|m| m.is_dir()) {
        src
    } else {
        pkgdir.to_path_buf()
    };

    let mut finder = SourceFinder::new(src);

    // NormalizedExports is ordered, so this walk is already sorted
    for (entry, conditions) in &pkg.exports {
        let name = basename(entry);
        let Some(file) = finder.find(&name).await? else {
            return Err(BundtError::MissingEntry {
                basename: name,
                export: entry.clone(),
            });
        };

        let types = sibling_types(&file).await;
        debug!("{} -> {}", entry, file.display());
        inputs.push(Input {
            file: Some(file),
            types,
            output: conditions.clone(),
            entry: entry.clone(),
        });
    }

    for (command, outfile) in &pkg.bin {
        let condition = if manifest::is_module(outfile, pkg.module) {
            "import"
        } else {
            "require"
        };
        let output = ConditionTable::from([(condition.to_string(), outfile.clone())]);

        let (file, types) = match finder.find(&basename(command)).await? {
            Some(file) => {
                let types = sibling_types(&file).await;
                (Some(file), types)
            }
            None => {
                warn!("No source found for \"{}\" executable; skipping", command);
                (None, None)
            }
        };

        inputs.push(Input {
            file,
            types,
            output,
            entry: command.clone(),
        });
    }

    Ok(inputs)
}

async fn sibling_types(file: &Path) -> Option<PathBuf> {
    let extension = file.extension()?.to_str()?;
    if !is_source_extension(extension) {
        return None;
    }

    let stem = file.file_stem()?.to_str()?;
    let types = file.with_file_name(format!("{stem}.d.ts"));
    tokio::fs::try_exists(&types)
        .await
        .unwrap_or(false)
        .then_some(types)
}

fn is_source_extension(extension: &str) -> bool {
    matches!(
        extension,
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "mjsx" | "mts" | "mtsx" | "cjs" | "cjsx" | "cts" | "ctsx"
    )
}

/// First-match lookup over sorted directory listings, cached per directory.
struct SourceFinder {
    root: PathBuf,
    listings: HashMap<PathBuf, Vec<String>>,
}

impl SourceFinder {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            listings: HashMap::new(),
        }
    }

    async fn find(&mut self, basename: &str) -> Result<Option<PathBuf>> {
        let (dir, name) = match basename.rsplit_once('/') {
            Some((parent, name)) => (self.root.join(parent), name),
            None => (self.root.clone(), basename),
        };

        let pattern = format!(r"^{}(\.[mc]?[tj]sx?)?$", regex::escape(name));
        let rgx = Regex::new(&pattern)
            .map_err(|e| BundtError::internal(format!("invalid entry pattern {pattern}: {e}")))?;

        let listing = self.listing(&dir).await?;
        Ok(listing
            .iter()
            .find(|file| rgx.is_match(file))
            .map(|file| dir.join(file)))
    }

    async fn listing(&mut self, dir: &Path) -> Result<&Vec<String>> {
        if !self.listings.contains_key(dir) {
            let files = list_files(dir).await?;
            self.listings.insert(dir.to_path_buf(), files);
        }
        Ok(&self.listings[dir])
    }
}

async fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => {
            return Err(BundtError::file_system_error("Failed to list sources", dir, e));
        }
    };

    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| BundtError::file_system_error("Failed to list sources", dir, e))?
    {
        let is_file = tokio::fs::metadata(entry.path())
            .await
            .is_ok_and(|m| m.is_file());
        if is_file {
            if let Some(name) = entry.file_name().to_str() {
                files.push(name.to_string());
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn package(dir: &Path, manifest: &str) -> Package {
        Package::parse(manifest, &dir.join("package.json")).unwrap()
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("."), "index");
        assert_eq!(basename("./foo"), "foo");
        assert_eq!(basename("./utils/bar"), "utils/bar");
    }

    #[tokio::test]
    async fn test_inputs_prefers_src_and_finds_types() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/index.ts"), "export const a = 1;").unwrap();
        fs::write(dir.path().join("src/index.d.ts"), "export const a: number;").unwrap();
        fs::write(dir.path().join("src/foo.js"), "export const b = 2;").unwrap();
        fs::write(dir.path().join("index.js"), "ignored").unwrap();

        let pkg = package(
            dir.path(),
            r#"{ "name": "x", "exports": { "./foo": "./foo.mjs", ".": "./index.mjs" } }"#,
        );
        let inputs = inputs(dir.path(), &pkg).await.unwrap();

        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].entry, ".");
        assert_eq!(inputs[0].file, Some(dir.path().join("src/index.ts")));
        assert_eq!(inputs[0].types, Some(dir.path().join("src/index.d.ts")));
        assert_eq!(inputs[1].entry, "./foo");
        assert_eq!(inputs[1].file, Some(dir.path().join("src/foo.js")));
        assert_eq!(inputs[1].types, None);
    }

    #[tokio::test]
    async fn test_inputs_falls_back_to_package_root() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.mjs"), "export default 1;").unwrap();

        let pkg = package(dir.path(), r#"{ "name": "x", "exports": "./dist/index.js" }"#);
        let inputs = inputs(dir.path(), &pkg).await.unwrap();
        assert_eq!(inputs[0].file, Some(dir.path().join("index.mjs")));
    }

    #[tokio::test]
    async fn test_missing_export_source_is_fatal() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/indexer.js"), "").unwrap();

        let pkg = package(dir.path(), r#"{ "name": "x", "exports": "./dist/index.js" }"#);
        let err = inputs(dir.path(), &pkg).await.unwrap_err();

        match err {
            BundtError::MissingEntry { basename, export } => {
                assert_eq!(basename, "index");
                assert_eq!(export, ".");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_bin_source_is_tolerated() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/index.js"), "").unwrap();

        let pkg = package(
            dir.path(),
            r#"{ "name": "x", "type": "module", "exports": "./index.js", "bin": { "cli": "./bin.js" } }"#,
        );
        let inputs = inputs(dir.path(), &pkg).await.unwrap();

        assert_eq!(inputs.len(), 2);
        let bin = &inputs[1];
        assert_eq!(bin.entry, "cli");
        assert_eq!(bin.file, None);
        assert_eq!(bin.types, None);
        assert_eq!(bin.output.get("import").map(String::as_str), Some("./bin.js"));
    }

    #[tokio::test]
    async fn test_bin_flavor_follows_extension() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/index.js"), "").unwrap();
        fs::write(dir.path().join("src/cli.ts"), "").unwrap();

        let pkg = package(
            dir.path(),
            r#"{ "name": "x", "exports": "./index.js", "bin": { "cli": "./bin/cli.js" } }"#,
        );
        let inputs = inputs(dir.path(), &pkg).await.unwrap();

        assert_eq!(inputs[1].file, Some(dir.path().join("src/cli.ts")));
        assert_eq!(inputs[1].output.get("require").map(String::as_str), Some("./bin/cli.js"));
    }
}
