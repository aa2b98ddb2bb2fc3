//! Writes compiled chunks and declaration copies to disk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::compiler::Chunk;
use crate::errors::{BundtError, Result};

/// One output file and the chunks destined for it.
#[derive(Debug, Clone)]
pub struct WriteJob {
    pub outfile: PathBuf,
    pub chunks: Vec<Chunk>,
}

impl WriteJob {
    /// The first chunk is the outfile itself; the rest (source maps, split
    /// chunks) land next to it under their own names.
    pub fn destinations(&self) -> Vec<(PathBuf, &Chunk)> {
        let dir = self.outfile.parent().unwrap_or_else(|| Path::new("."));
        self.chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let path = if i == 0 {
                    self.outfile.clone()
                } else {
                    dir.join(&chunk.name)
                };
                (path, chunk)
            })
            .collect()
    }
}

/// Empty every output directory before writing.
///
/// A directory is removed only when it sits strictly inside `pkgdir` and
/// holds none of the `sources`; otherwise it is just created.
pub async fn prepare_dirs(
    pkgdir: &Path,
    outdirs: &BTreeSet<PathBuf>,
    sources: &[PathBuf],
) -> Result<()> {
    let mut purged: Vec<&Path> = Vec::new();

    for dir in outdirs {
        if purged.iter().any(|p| dir.starts_with(p)) {
            // parent already wiped
        } else if is_purgeable(pkgdir, dir, sources) {
            debug!("purging {}", dir.display());
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(BundtError::file_system_error(
                        format!("Failed to remove {}", dir.display()),
                        dir,
                        e,
                    ));
                }
            }
            purged.push(dir);
        } else if dir != pkgdir {
            warn!(
                "not purging {}: it contains source files or lies outside the package",
                dir.display()
            );
        }

        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            BundtError::file_system_error(format!("Failed to create {}", dir.display()), dir, e)
        })?;
    }

    Ok(())
}

fn is_purgeable(pkgdir: &Path, dir: &Path, sources: &[PathBuf]) -> bool {
    dir != pkgdir && dir.starts_with(pkgdir) && !sources.iter().any(|s| s.starts_with(dir))
}

/// Write every job concurrently. Returns the paths written, sorted.
pub async fn write_all(jobs: Vec<WriteJob>) -> Result<Vec<PathBuf>> {
    let mut set = JoinSet::new();

    for job in jobs {
        for (path, chunk) in job.destinations() {
            let text = chunk.text.clone();
            set.spawn(async move {
                write_file(&path, text.as_bytes()).await?;
                Ok::<_, BundtError>(path)
            });
        }
    }

    collect(set).await
}

/// Copy declaration files, `(from, to)`, concurrently.
pub async fn copy_all(copies: Vec<(PathBuf, PathBuf)>) -> Result<Vec<PathBuf>> {
    let mut set = JoinSet::new();

    for (from, to) in copies {
        set.spawn(async move {
            if let Some(parent) = to.parent() {
                create_dir(parent).await?;
            }
            tokio::fs::copy(&from, &to).await.map_err(|e| {
                BundtError::file_system_error(
                    format!("Failed to copy {} to {}", from.display(), to.display()),
                    &to,
                    e,
                )
            })?;
            debug!("copied {} -> {}", from.display(), to.display());
            Ok::<_, BundtError>(to)
        });
    }

    collect(set).await
}

async fn collect(mut set: JoinSet<Result<PathBuf>>) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    while let Some(joined) = set.join_next().await {
        let path = joined.map_err(|e| BundtError::internal(format!("write task failed: {e}")))??;
        written.push(path);
    }
    written.sort();
    Ok(written)
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent).await?;
    }
    tokio::fs::write(path, bytes).await.map_err(|e| {
        BundtError::file_system_error(format!("Failed to write {}", path.display()), path, e)
    })?;
    debug!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

async fn create_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        BundtError::file_system_error(format!("Failed to create {}", dir.display()), dir, e)
    })
}
