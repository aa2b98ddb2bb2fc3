//! Turns a package's inputs into compilations, then into files on disk.
//!
//! A build runs in four phases:
//!
//! 1. walk every (input, condition) pair, derive its configuration and
//!    fingerprint, and start one compilation per unique fingerprint;
//! 2. wait for all compilations, converting a fingerprint's chunks to
//!    CommonJS once if any `require` condition needs them;
//! 3. empty the output directories;
//! 4. write every output and copy type declarations.
//!
//! A fatal error in phase 1 means nothing is written.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use path_clean::PathClean;
use regex::Regex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::compiler::{BuildConfig, Chunk, Compiler};
use crate::config::BuildOptions;
use crate::converter;
use crate::errors::{BundtError, Result};
use crate::files::FilesFilter;
use crate::hook::{Customize, HookAction, HookInput};
use crate::manifest::Package;
use crate::output::{self, WriteJob};
use crate::resolver::{self, Input};

static IS_TYPES: LazyLock<Regex> = LazyLock::new(|| segment("types"));
static IS_DEV: LazyLock<Regex> = LazyLock::new(|| segment("development"));
static IS_PROD: LazyLock<Regex> = LazyLock::new(|| segment("production"));
static IS_IMPORT: LazyLock<Regex> = LazyLock::new(|| segment("import"));
static IS_IMPORT_OR_DEFAULT: LazyLock<Regex> = LazyLock::new(|| segment("import|default"));
static IS_REQUIRE: LazyLock<Regex> = LazyLock::new(|| segment("require"));
static IS_REQUIRE_OR_DEFAULT: LazyLock<Regex> = LazyLock::new(|| segment("require|default"));

fn segment(names: &str) -> Regex {
    Regex::new(&format!(r"(^|\.)({names})(\.|$)")).expect("valid condition regex")
}

/// Module format a condition asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavor {
    Import,
    Require,
}

impl Flavor {
    /// `default` follows the package's own module system.
    pub fn of(condition: &str, module: bool) -> Option<Self> {
        let (import, require) = if module {
            (&*IS_IMPORT_OR_DEFAULT, &*IS_REQUIRE)
        } else {
            (&*IS_IMPORT, &*IS_REQUIRE_OR_DEFAULT)
        };
        if import.is_match(condition) {
            Some(Self::Import)
        } else if require.is_match(condition) {
            Some(Self::Require)
        } else {
            None
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Import => f.write_str("import"),
            Self::Require => f.write_str("require"),
        }
    }
}

pub fn is_types(condition: &str) -> bool {
    IS_TYPES.is_match(condition)
}

/// What a finished build produced.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    /// Source file → every file written for it, sorted.
    pub outputs: BTreeMap<PathBuf, Vec<PathBuf>>,
    /// Compilations that failed; their outputs were not written.
    pub failures: Vec<BundtError>,
}

impl BuildOutcome {
    /// Some outputs are missing because a compilation failed.
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Where a single (input, condition) pair ends up.
#[derive(Debug)]
enum Target {
    Compiled { hash: String, flavor: Flavor },
    Types,
}

#[derive(Debug)]
struct Pair {
    input: usize,
    source: PathBuf,
    outfile: PathBuf,
    target: Target,
}

/// Per-build bookkeeping. Nothing here outlives a single [`Bundler::build`].
#[derive(Default)]
struct Plan {
    pairs: Vec<Pair>,
    /// outfile → the configuration key (`hash|flavor`) claiming it
    claimed: HashMap<PathBuf, String>,
    outdirs: BTreeSet<PathBuf>,
    /// per input, declaration destinations chosen by the hook
    types_output: HashMap<usize, Vec<PathBuf>>,
    started: HashSet<String>,
    sources: Vec<PathBuf>,
}

impl Plan {
    fn claim(&mut self, outfile: &Path, key: &str, relative: &str) -> Result<()> {
        match self.claimed.get(outfile) {
            Some(existing) if existing != key => Err(BundtError::ConfigConflict {
                output: relative.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.claimed.insert(outfile.to_path_buf(), key.to_string());
                Ok(())
            }
        }
    }
}

type CompileTasks = JoinSet<(String, PathBuf, Result<Vec<Chunk>>)>;

/// Builds every entry of a package.
pub struct Bundler {
    compiler: Arc<dyn Compiler>,
    hook: Option<Arc<dyn Customize>>,
    options: BuildOptions,
}

impl Bundler {
    pub fn new(compiler: Arc<dyn Compiler>, options: BuildOptions) -> Self {
        Self {
            compiler,
            hook: None,
            options,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn Customize>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Load `pkgdir/package.json` and build it.
    pub async fn build(&self, pkgdir: &Path) -> Result<BuildOutcome> {
        let pkg = Package::load(pkgdir).await?;
        self.build_package(pkgdir, &pkg).await
    }

    pub async fn build_package(&self, pkgdir: &Path, pkg: &Package) -> Result<BuildOutcome> {
        let pkgdir = pkgdir.to_path_buf().clean();
        let inputs = resolver::inputs(&pkgdir, pkg).await?;
        info!("building {} with {} input(s)", pkg.name, inputs.len());

        let mut tasks: CompileTasks = JoinSet::new();
        let plan = self.plan(&pkgdir, pkg, &inputs, &mut tasks)?;
        debug!(
            "{} pair(s), {} unique configuration(s)",
            plan.pairs.len(),
            plan.started.len()
        );

        let mut outcome = BuildOutcome::default();
        let compiled = collect_compiles(tasks, &mut outcome.failures).await?;
        let cache = convert_chunks(&plan, compiled).await?;

        output::prepare_dirs(&pkgdir, &plan.outdirs, &plan.sources).await?;

        let jobs = write_jobs(&plan, &cache)?;
        let mut outputs: BTreeMap<PathBuf, BTreeSet<PathBuf>> = BTreeMap::new();
        let mut dirs_by_input: HashMap<usize, BTreeSet<PathBuf>> = HashMap::new();
        for (pair, job) in &jobs {
            let written = outputs.entry(pair.source.clone()).or_default();
            for (path, _) in job.destinations() {
                written.insert(path);
            }
            if let Some(dir) = job.outfile.parent() {
                dirs_by_input.entry(pair.input).or_default().insert(dir.to_path_buf());
            }
        }
        output::write_all(jobs.into_iter().map(|(_, job)| job).collect()).await?;

        let copies = type_copies(&plan, &inputs, &dirs_by_input);
        for (input, _, to) in &copies {
            if let Some(source) = inputs[*input].file.clone() {
                outputs.entry(source).or_default().insert(to.clone());
            }
        }
        output::copy_all(copies.into_iter().map(|(_, from, to)| (from, to)).collect()).await?;

        outcome.outputs = outputs
            .into_iter()
            .map(|(source, files)| (source, files.into_iter().collect()))
            .collect();

        check_files_allowlist(&pkgdir, pkg, &outcome.outputs);

        if outcome.is_degraded() {
            warn!(
                "{} compilation(s) failed; their outputs were skipped",
                outcome.failures.len()
            );
        }
        Ok(outcome)
    }

    /// Phase 1. Errors here abort the build before anything touches disk;
    /// dropping `tasks` cancels compilations already started.
    fn plan(
        &self,
        pkgdir: &Path,
        pkg: &Package,
        inputs: &[Input],
        tasks: &mut CompileTasks,
    ) -> Result<Plan> {
        let mut plan = Plan::default();
        let external = pkg.externals(&self.options.external);

        for (index, input) in inputs.iter().enumerate() {
            let Some(file) = &input.file else {
                debug!("skipping \"{}\": no source file", input.entry);
                continue;
            };
            plan.sources.push(file.clone());

            for (condition, relative) in &input.output {
                let outfile = pkgdir.join(relative).clean();

                if is_types(condition) {
                    plan.claim(&outfile, "types", relative)?;
                    if let Some(dir) = outfile.parent() {
                        plan.outdirs.insert(dir.to_path_buf());
                    }
                    plan.pairs.push(Pair {
                        input: index,
                        source: file.clone(),
                        outfile,
                        target: Target::Types,
                    });
                    continue;
                }

                let draft = self.draft(condition, &external);
                let mut hook_input = HookInput {
                    file: Some(file.clone()),
                    export: input.entry.clone(),
                    condition: condition.clone(),
                    types_output: None,
                };

                let mut config = match self.customize(&mut hook_input, &draft)? {
                    HookAction::Skip => {
                        debug!("hook skipped \"{}\" ({condition})", input.entry);
                        continue;
                    }
                    HookAction::Replace(config) => config,
                    HookAction::Continue => draft,
                };

                if let Some(types) = hook_input.types_output.take() {
                    plan.types_output.insert(index, types);
                }
                let source = hook_input.file.unwrap_or_else(|| file.clone());
                if source != *file {
                    plan.sources.push(source.clone());
                }

                config.entry_points = vec![source.clone()];
                config.format = "esm".to_string();
                config.bundle = true;
                config.write = false;
                config.outfile = None;

                let flavor =
                    Flavor::of(condition, pkg.module).ok_or_else(|| BundtError::UnknownCondition {
                        condition: condition.clone(),
                        export: input.entry.clone(),
                    })?;
                let hash = config.fingerprint()?;
                plan.claim(&outfile, &format!("{hash}|{flavor}"), relative)?;

                if plan.started.insert(hash.clone()) {
                    debug!("compiling {} ({})", source.display(), &hash[..12]);
                    let compiler = Arc::clone(&self.compiler);
                    let key = hash.clone();
                    let entry = source.clone();
                    tasks.spawn(async move {
                        let result = compiler.compile(&config).await;
                        (key, entry, result)
                    });
                }

                if let Some(dir) = outfile.parent() {
                    plan.outdirs.insert(dir.to_path_buf());
                }
                plan.pairs.push(Pair {
                    input: index,
                    source,
                    outfile,
                    target: Target::Compiled { hash, flavor },
                });
            }
        }

        Ok(plan)
    }

    fn draft(&self, condition: &str, external: &[String]) -> BuildConfig {
        BuildConfig {
            target: self.options.target.clone(),
            minify: self.options.minify.unwrap_or_else(|| IS_PROD.is_match(condition)),
            sourcemap: self.options.sourcemap.unwrap_or_else(|| IS_DEV.is_match(condition)),
            tree_shaking: self.options.tree_shaking,
            charset: self.options.charset.clone(),
            log_level: self.options.log_level.clone(),
            external: external.to_vec(),
            extra: self.options.extra.clone(),
            ..BuildConfig::default()
        }
    }

    fn customize(&self, input: &mut HookInput, draft: &BuildConfig) -> Result<HookAction> {
        let Some(hook) = &self.hook else {
            return Ok(HookAction::Continue);
        };
        hook.customize(input, draft).map_err(|e| match e {
            BundtError::Hook { .. } => e,
            other => BundtError::Hook {
                export: input.export.clone(),
                condition: input.condition.clone(),
                message: other.to_string(),
            },
        })
    }
}

/// Phase 2 barrier. Failed or empty compilations are recorded and left out.
async fn collect_compiles(
    mut tasks: CompileTasks,
    failures: &mut Vec<BundtError>,
) -> Result<HashMap<String, Vec<Chunk>>> {
    let mut compiled = HashMap::new();

    while let Some(joined) = tasks.join_next().await {
        let (hash, entry, result) =
            joined.map_err(|e| BundtError::internal(format!("compile task failed: {e}")))?;
        match result {
            Ok(chunks) if !chunks.is_empty() => {
                compiled.insert(hash, chunks);
            }
            Ok(_) => {
                warn!("{} produced no output", entry.display());
                failures.push(BundtError::compile_error(entry, "compiler produced no output"));
            }
            Err(e) if !e.is_fatal() => {
                warn!("{e}");
                failures.push(e);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(compiled)
}

/// Chunks keyed by `hash|flavor`. Each fingerprint is converted at most once.
async fn convert_chunks(
    plan: &Plan,
    compiled: HashMap<String, Vec<Chunk>>,
) -> Result<HashMap<String, Vec<Chunk>>> {
    let needs_cjs: BTreeSet<&str> = plan
        .pairs
        .iter()
        .filter_map(|pair| match &pair.target {
            Target::Compiled {
                hash,
                flavor: Flavor::Require,
            } if compiled.contains_key(hash) => Some(hash.as_str()),
            _ => None,
        })
        .collect();

    let mut set = JoinSet::new();
    for hash in needs_cjs {
        let chunks = compiled[hash].clone();
        let hash = hash.to_string();
        set.spawn_blocking(move || {
            let converted: Vec<Chunk> = chunks
                .into_iter()
                .map(|chunk| {
                    if chunk.name.ends_with(".map") {
                        chunk
                    } else {
                        Chunk {
                            text: converter::convert(&chunk.text),
                            name: chunk.name,
                        }
                    }
                })
                .collect();
            (hash, converted)
        });
    }

    let mut cache = HashMap::new();
    while let Some(joined) = set.join_next().await {
        let (hash, chunks) =
            joined.map_err(|e| BundtError::internal(format!("conversion task failed: {e}")))?;
        cache.insert(format!("{hash}|{}", Flavor::Require), chunks);
    }
    for (hash, chunks) in compiled {
        cache.insert(format!("{hash}|{}", Flavor::Import), chunks);
    }

    Ok(cache)
}

/// Phase 4 write list, one job per outfile.
fn write_jobs<'a>(
    plan: &'a Plan,
    cache: &HashMap<String, Vec<Chunk>>,
) -> Result<Vec<(&'a Pair, WriteJob)>> {
    let mut jobs = Vec::new();
    let mut seen = HashSet::new();

    for pair in &plan.pairs {
        let Target::Compiled { hash, flavor } = &pair.target else {
            continue;
        };
        if !seen.insert(pair.outfile.clone()) {
            continue;
        }

        let key = format!("{hash}|{flavor}");
        match cache.get(&key) {
            Some(chunks) if !chunks.is_empty() => jobs.push((
                pair,
                WriteJob {
                    outfile: pair.outfile.clone(),
                    chunks: chunks.clone(),
                },
            )),
            // compile failed and was reported already
            None if !cache.contains_key(&format!("{hash}|{}", Flavor::Import)) => {}
            _ => {
                return Err(BundtError::internal(format!(
                    "no compiled output for {}",
                    pair.outfile.display()
                )));
            }
        }
    }

    Ok(jobs)
}

/// `(input, from, to)` for every declaration copy.
///
/// `types` conditions name their destination; inputs without one get a copy
/// in every directory they were written to. The hook's choice replaces both.
fn type_copies(
    plan: &Plan,
    inputs: &[Input],
    dirs_by_input: &HashMap<usize, BTreeSet<PathBuf>>,
) -> Vec<(usize, PathBuf, PathBuf)> {
    let mut copies = Vec::new();
    let mut seen = HashSet::new();

    for (index, input) in inputs.iter().enumerate() {
        let Some(types) = &input.types else {
            if plan.pairs.iter().any(|p| p.input == index && matches!(p.target, Target::Types)) {
                warn!("\"{}\" declares types but has no declaration file", input.entry);
            }
            continue;
        };

        let destinations: Vec<PathBuf> = if let Some(custom) = plan.types_output.get(&index) {
            custom.clone()
        } else {
            let declared: Vec<PathBuf> = plan
                .pairs
                .iter()
                .filter(|p| p.input == index && matches!(p.target, Target::Types))
                .map(|p| p.outfile.clone())
                .collect();
            if declared.is_empty() {
                let name = types.file_name().map(PathBuf::from).unwrap_or_default();
                dirs_by_input
                    .get(&index)
                    .map(|dirs| dirs.iter().map(|d| d.join(&name)).collect())
                    .unwrap_or_default()
            } else {
                declared
            }
        };

        for to in destinations {
            if seen.insert(to.clone()) {
                copies.push((index, types.clone(), to));
            }
        }
    }

    copies
}

fn check_files_allowlist(pkgdir: &Path, pkg: &Package, outputs: &BTreeMap<PathBuf, Vec<PathBuf>>) {
    let filter = FilesFilter::new(&pkg.files);
    if filter.is_empty() {
        return;
    }

    for file in outputs.values().flatten() {
        let Ok(relative) = file.strip_prefix(pkgdir) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");
        if !filter.includes(&relative) {
            warn!("\"{relative}\" is not covered by the \"files\" field and will not be published");
        }
    }
}
