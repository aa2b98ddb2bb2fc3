//! bundt - build every entry of a package.json "exports" map
//!
//! Each export path (and each `bin` command) is matched to a source file,
//! every output condition is given a build configuration, and each unique
//! configuration is compiled exactly once. ES module output is converted to
//! CommonJS for `require` conditions and the results are written where the
//! manifest says they go.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use bundt::{BuildOptions, Bundler, PassthroughCompiler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bundler = Bundler::new(Arc::new(PassthroughCompiler), BuildOptions::default());
//!     let outcome = bundler.build(Path::new("packages/utils")).await?;
//!
//!     for (source, outputs) in &outcome.outputs {
//!         println!("{} -> {} file(s)", source.display(), outputs.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod bundler;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod converter;
pub mod errors;
pub mod exports;
pub mod files;
pub mod fingerprint;
pub mod hook;
pub mod manifest;
pub mod output;
pub mod report;
pub mod resolver;

// Re-export main types for convenience
pub use bundler::{BuildOutcome, Bundler};
pub use compiler::{BuildConfig, Chunk, Compiler, EsbuildCompiler, PassthroughCompiler};
pub use config::{BuildOptions, Config};
pub use errors::{BundtError, Result};
pub use hook::{ConfigOverrides, Customize, HookAction, HookInput};
pub use report::{report, ReportOptions};

/// Current version of bundt
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build `pkgdir` with the esbuild binary found on `PATH`.
pub async fn build(
    pkgdir: impl AsRef<std::path::Path>,
    options: BuildOptions,
) -> Result<BuildOutcome> {
    let compiler = std::sync::Arc::new(EsbuildCompiler::new("esbuild"));
    Bundler::new(compiler, options).build(pkgdir.as_ref()).await
}
