use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bundt::cli::{self, BuildArgs, Cli, Commands, LogFormat};
use bundt::config::Config;
use bundt::hook::ConfigOverrides;
use bundt::report::{report, ReportOptions};
use bundt::{compiler, Bundler};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_format)?;
    debug!("bundt v{}", bundt::VERSION);

    match cli.command {
        None => run_build(cli.build, cli.config.as_deref()).await,
        Some(Commands::Build(args)) => run_build(args, cli.config.as_deref()).await,

        Some(Commands::Init { output_dir }) => {
            let path = Config::init(&output_dir)?;
            info!("Initialized bundt configuration in {}", output_dir.display());
            println!("Created {}", path.display());
            Ok(())
        }

        Some(Commands::Completions { shell }) => {
            cli::generate_completions(shell);
            Ok(())
        }
    }
}

async fn run_build(args: BuildArgs, config_path: Option<&Path>) -> Result<()> {
    let cwd = std::path::absolute(&args.cwd)
        .with_context(|| format!("Invalid working directory: {}", args.cwd.display()))?;
    let pkgdir = match &args.dir {
        Some(dir) => cwd.join(dir),
        None => cwd,
    };

    let mut config = Config::load(config_path, &pkgdir)?;
    apply_args(&mut config, &args);
    debug!("build options: {:?}", config.build);

    let mut bundler = Bundler::new(compiler::from_config(&config.compiler), config.build.clone());
    if !config.overrides.is_empty() {
        let overrides = ConfigOverrides::new(config.overrides.clone(), &pkgdir);
        bundler = bundler.with_hook(Arc::new(overrides));
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Building {}", pkgdir.display()));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let start = Instant::now();
    let result = bundler.build(&pkgdir).await;
    let delta = start.elapsed();
    spinner.finish_and_clear();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            debug!(category = ?e.category(), "build failed");
            fail(&e.to_string())
        }
    };

    let options = ReportOptions {
        cwd: pkgdir,
        gzip: config.report.gzip,
        colors: config.report.colors,
        delta: Some(delta),
    };
    println!("{}", report(&outcome.outputs, &options).await);

    if outcome.is_degraded() {
        let messages: Vec<String> = outcome.failures.iter().map(ToString::to_string).collect();
        fail(&messages.join("\n"));
    }

    Ok(())
}

/// Command-line flags win over `bundt.toml`.
fn apply_args(config: &mut Config, args: &BuildArgs) {
    if let Some(target) = &args.target {
        config.build.target = target.clone();
    }
    if args.minify {
        config.build.minify = Some(true);
    }
    if args.sourcemap {
        config.build.sourcemap = Some(true);
    }
    config.build.external.extend(args.external.iter().cloned());
    if let Some(kind) = args.compiler {
        config.compiler.kind = kind;
    }
    if args.no_color {
        config.report.colors = false;
    }
    if args.no_gzip {
        config.report.gzip = false;
    }
}

fn fail(message: &str) -> ! {
    let message = message.replace('\n', "\n      ");
    eprintln!("{} {}", "[bundt]".bold().red(), message);
    std::process::exit(1);
}

fn init_tracing(verbose: bool, format: LogFormat) -> Result<()> {
    let default = if verbose { "bundt=debug" } else { "bundt=warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
    }

    Ok(())
}
