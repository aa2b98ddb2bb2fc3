//! The package.json `"files"` allowlist.

use glob::{MatchOptions, Pattern};
use tracing::debug;

/// Always published regardless of `"files"`.
static ALWAYS_INCLUDED: &[&str] = &["package.json", "README*", "LICENSE*", "LICENCE*"];

/// `*` and `?` stop at `/`; `**` crosses directories.
const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

struct Rule {
    pattern: Pattern,
    negated: bool,
}

/// Compiled `"files"` patterns. Later patterns win; `!` negates.
pub struct FilesFilter {
    rules: Vec<Rule>,
    always: Vec<Pattern>,
}

impl FilesFilter {
    pub fn new(patterns: &[String]) -> Self {
        let rules = patterns
            .iter()
            .filter_map(|raw| {
                let (negated, glob) = match raw.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, raw.as_str()),
                };
                let pattern = compile(glob)?;
                Some(Rule { pattern, negated })
            })
            .collect();

        let always = ALWAYS_INCLUDED.iter().filter_map(|g| compile(g)).collect();

        Self { rules, always }
    }

    /// An empty allowlist publishes everything.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// `relative` uses `/` separators and is relative to the package root.
    pub fn includes(&self, relative: &str) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        let relative = relative.trim_start_matches("./");
        if self.always.iter().any(|p| p.matches_with(relative, MATCH)) {
            return true;
        }

        let mut included = false;
        for rule in &self.rules {
            if covers(&rule.pattern, relative) {
                included = !rule.negated;
            }
        }
        included
    }
}

/// A pattern also matches everything below it, so `dist` covers
/// `dist/index.js`.
fn covers(pattern: &Pattern, relative: &str) -> bool {
    relative
        .match_indices('/')
        .map(|(i, _)| &relative[..i])
        .chain(std::iter::once(relative))
        .any(|prefix| pattern.matches_with(prefix, MATCH))
}

fn compile(glob: &str) -> Option<Pattern> {
    let glob = glob.trim().trim_start_matches("./").trim_end_matches('/');
    if glob.is_empty() {
        return None;
    }

    match Pattern::new(glob) {
        Ok(pattern) => Some(pattern),
        Err(e) => {
            debug!("ignoring \"files\" pattern {glob:?}: {e}");
            None
        }
    }
}
