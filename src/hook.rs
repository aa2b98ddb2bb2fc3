//! Per-entry customization of build configurations.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::compiler::BuildConfig;
use crate::config::OverrideRule;
use crate::errors::Result;

/// What the hook sees for one (entry, condition) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct HookInput {
    /// Source to compile; may be redirected by the hook.
    pub file: Option<PathBuf>,
    pub export: String,
    pub condition: String,
    /// Replaces the default `.d.ts` copy destinations for this entry.
    pub types_output: Option<Vec<PathBuf>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HookAction {
    /// Do not build this pair at all.
    Skip,
    /// Build with this configuration instead of the draft.
    Replace(BuildConfig),
    /// Build with the draft as-is.
    Continue,
}

pub trait Customize: Send + Sync {
    fn customize(&self, input: &mut HookInput, draft: &BuildConfig) -> Result<HookAction>;
}

impl<F> Customize for F
where
    F: Fn(&mut HookInput, &BuildConfig) -> Result<HookAction> + Send + Sync,
{
    fn customize(&self, input: &mut HookInput, draft: &BuildConfig) -> Result<HookAction> {
        self(input, draft)
    }
}

/// `[[overrides]]` rules from `bundt.toml`; the first matching rule applies.
pub struct ConfigOverrides {
    rules: Vec<OverrideRule>,
    pkgdir: PathBuf,
}

impl ConfigOverrides {
    pub fn new(rules: Vec<OverrideRule>, pkgdir: &Path) -> Self {
        Self {
            rules,
            pkgdir: pkgdir.to_path_buf(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn matching(&self, export: &str, condition: &str) -> Option<&OverrideRule> {
        self.rules.iter().find(|rule| {
            let export_ok = rule.export.as_deref().is_none_or(|e| e == export);
            let condition_ok = rule
                .condition
                .as_deref()
                .is_none_or(|c| c == condition || condition.split('.').any(|seg| seg == c));
            export_ok && condition_ok
        })
    }
}

impl Customize for ConfigOverrides {
    fn customize(&self, input: &mut HookInput, draft: &BuildConfig) -> Result<HookAction> {
        let Some(rule) = self.matching(&input.export, &input.condition) else {
            return Ok(HookAction::Continue);
        };
        debug!("override applies to \"{}\" ({})", input.export, input.condition);

        if rule.skip {
            return Ok(HookAction::Skip);
        }
        if let Some(file) = &rule.file {
            input.file = Some(self.pkgdir.join(file));
        }
        if let Some(types) = &rule.types {
            input.types_output = Some(types.iter().map(|t| self.pkgdir.join(t)).collect());
        }

        let touches_options = rule.target.is_some()
            || rule.minify.is_some()
            || rule.sourcemap.is_some()
            || !rule.external.is_empty();
        if !touches_options {
            return Ok(HookAction::Continue);
        }

        let mut config = draft.clone();
        if let Some(target) = &rule.target {
            config.target = target.clone();
        }
        if let Some(minify) = rule.minify {
            config.minify = minify;
        }
        if let Some(sourcemap) = rule.sourcemap {
            config.sourcemap = sourcemap;
        }
        config.external.extend(rule.external.iter().cloned());

        Ok(HookAction::Replace(config))
    }
}
