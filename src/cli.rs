use std::path::PathBuf;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use serde::{Deserialize, Serialize};

/// Build every entry declared by a package.json "exports" map
#[derive(Parser)]
#[command(
    name = "bundt",
    version,
    about = "Build every entry declared by a package.json \"exports\" map",
    long_about = "bundt reads the \"exports\" (and \"bin\") fields of a package.json, compiles each unique build configuration exactly once and writes every declared output, converting ES modules to CommonJS where a \"require\" condition asks for it.",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, default_value = "pretty")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub build: BuildArgs,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the package (default command)
    Build(BuildArgs),

    /// Write a default bundt.toml
    Init {
        /// Output directory for configuration
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Package directory
    #[arg(value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// The root working directory
    #[arg(short = 'C', long, default_value = ".")]
    pub cwd: PathBuf,

    /// The target environment
    #[arg(short, long)]
    pub target: Option<String>,

    /// Minify output code
    #[arg(short, long)]
    pub minify: bool,

    /// Generate inline sourcemaps
    #[arg(short = 'x', long)]
    pub sourcemap: bool,

    /// Additional external modules (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub external: Vec<String>,

    /// Compiler backend
    #[arg(long)]
    pub compiler: Option<CompilerKind>,

    /// Disable colored report output
    #[arg(long = "no-color", alias = "no-colors")]
    pub no_color: bool,

    /// Skip gzip sizes in the report
    #[arg(long)]
    pub no_gzip: bool,
}

#[derive(Clone, Copy, ValueEnum, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerKind {
    /// Bundle with the esbuild binary
    #[default]
    #[value(name = "esbuild")]
    Esbuild,

    /// Emit sources unchanged (minified on request)
    #[value(name = "passthrough")]
    Passthrough,
}

#[derive(Clone, Copy, ValueEnum, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    #[value(name = "pretty")]
    Pretty,
    #[value(name = "json")]
    Json,
}

pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
}
