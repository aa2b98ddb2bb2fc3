//! ESM → CommonJS rewriting of compiled chunks.
//!
//! This is a statement-level pattern rewrite, not a parser. It understands
//! the export forms a bundler emits at the top level of a chunk
//! (`export default`, `export const|let|var|function|class <name>` and
//! `export { a, b as c }`) plus static `import` statements. Anything else
//! (namespace re-exports, `export * from`, exports inside nested scopes)
//! is left untouched.

use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(^|;[ \t]*|\r?\n+)export(?:[ \t]*\{([^}]*)\}[ \t]*;?|([ \t]+default)|[ \t]+(const|let|var|class|(?:async[ \t]+)?function\*?)[ \t]+([A-Za-z$_][\w$]*))",
    )
    .expect("valid regex")
});

static IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)(^|;[ \t]*)import[ \t]*(?:([\w$*{}\s,]+?)[ \t]*from[ \t]*)?(['"])([^'"\r\n]+)['"][ \t]*;?"#,
    )
    .expect("valid regex")
});

/// Rewrite an ES module chunk into its CommonJS equivalent.
pub fn convert(esm: &str) -> String {
    let code = rewrite_imports(esm);
    rewrite_exports(&code)
}

/// `import x from 'y'` → `const x = require('y');` and friends.
pub fn rewrite_imports(code: &str) -> String {
    rewrite_outside_strings(code, &IMPORT, |caps| {
        let lead = &caps[1];
        let quote = &caps[3];
        let source = format!("require({quote}{}{quote})", &caps[4]);

        let Some(bindings) = caps.get(2).map(|m| m.as_str().trim()) else {
            return Some(format!("{lead}{source};"));
        };

        let (default, named, namespace) = split_bindings(bindings)?;
        let mut statements = Vec::new();
        let target = match (&default, &namespace) {
            (Some(name), _) | (None, Some(name)) => {
                statements.push(format!("const {name} = {source};"));
                name.clone()
            }
            (None, None) => source.clone(),
        };

        if let (Some(_), Some(namespace)) = (&default, &namespace) {
            statements.push(format!("const {namespace} = {target};"));
        }
        if let Some(named) = named {
            let members: Vec<String> = named
                .iter()
                .map(|(local, alias)| match alias {
                    Some(alias) => format!("{local}: {alias}"),
                    None => local.clone(),
                })
                .collect();
            statements.push(format!("const {{ {} }} = {target};", members.join(", ")));
        }
        if statements.is_empty() {
            statements.push(format!("{source};"));
        }

        Some(format!("{lead}{}", statements.join(" ")))
    })
}

/// Replace ESM export statements with `module.exports` / `exports.*`.
pub fn rewrite_exports(code: &str) -> String {
    let mut footer: Vec<String> = Vec::new();

    let mut out = rewrite_outside_strings(code, &EXPORT, |caps| {
        let ws = &caps[1];

        if caps.get(3).is_some() {
            return Some(format!("{ws}module.exports ="));
        }

        if let (Some(kind), Some(name)) = (caps.get(4), caps.get(5)) {
            footer.push(format!("exports.{0} = {0};", name.as_str()));
            return Some(format!("{ws}{} {}", kind.as_str(), name.as_str()));
        }

        let members = caps.get(2)?.as_str();
        let end = caps.get(0)?.end();
        if is_reexport(&code[end..]) {
            return None;
        }

        for member in members.split(',').map(str::trim).filter(|m| !m.is_empty()) {
            let (local, exported) = match member.split_once(" as ") {
                Some((local, exported)) => (local.trim(), exported.trim()),
                None => (member, member),
            };
            if exported == "default" {
                footer.push(format!("module.exports = {local};"));
            } else {
                footer.push(format!("exports.{exported} = {local};"));
            }
        }

        Some(ws.to_string())
    });

    if !footer.is_empty() {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&footer.join("\n"));
        out.push('\n');
    }

    out
}

type Bindings = (Option<String>, Option<Vec<(String, Option<String>)>>, Option<String>);

fn split_bindings(bindings: &str) -> Option<Bindings> {
    let mut default = None;
    let mut named = None;
    let mut namespace = None;

    let mut rest = bindings.trim();
    while !rest.is_empty() {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        if let Some(inner) = rest.strip_prefix('{') {
            let close = inner.find('}')?;
            let members = inner[..close]
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(|m| match m.split_once(" as ") {
                    Some((local, alias)) => (local.trim().to_string(), Some(alias.trim().to_string())),
                    None => (m.to_string(), None),
                })
                .collect();
            named = Some(members);
            rest = &inner[close + 1..];
        } else if let Some(ns) = rest.strip_prefix('*') {
            let ns = ns.trim_start().strip_prefix("as")?.trim_start();
            let end = ns.find(|c: char| c == ',' || c.is_whitespace()).unwrap_or(ns.len());
            namespace = Some(ns[..end].to_string());
            rest = &ns[end..];
        } else if !rest.is_empty() {
            let end = rest.find(|c: char| c == ',' || c.is_whitespace()).unwrap_or(rest.len());
            default = Some(rest[..end].to_string());
            rest = &rest[end..];
        }
    }

    Some((default, named, namespace))
}

/// `export { a } from "./b"` is a re-export; leave it alone.
fn is_reexport(after: &str) -> bool {
    after.trim_start().starts_with("from")
}

/// Apply `replace` to every match of `pattern` that is not inside a string
/// literal or comment. Returning `None` keeps the match verbatim.
fn rewrite_outside_strings<F>(code: &str, pattern: &Regex, mut replace: F) -> String
where
    F: FnMut(&Captures<'_>) -> Option<String>,
{
    let literals = literal_spans(code);
    let mut out = String::with_capacity(code.len());
    let mut last = 0;

    for caps in pattern.captures_iter(code) {
        let Some(whole) = caps.get(0) else { continue };
        if within(&literals, whole.start() + caps[1].len()) {
            continue;
        }
        if let Some(replacement) = replace(&caps) {
            out.push_str(&code[last..whole.start()]);
            out.push_str(&replacement);
            last = whole.end();
        }
    }

    out.push_str(&code[last..]);
    out
}

/// Byte ranges of string literals, template literals and comments, in
/// source order. Regex literals are not recognized.
fn literal_spans(code: &str) -> Vec<Range<usize>> {
    let bytes = code.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        match bytes[i] {
            quote @ (b'"' | b'\'' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    match bytes[i] {
                        b'\\' => i += 1,
                        // unterminated ' or " string
                        b'\n' if quote != b'`' => break,
                        _ => {}
                    }
                    i += 1;
                }
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = code[i..].find('\n').map_or(bytes.len(), |n| i + n);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = code[i + 2..].find("*/").map_or(bytes.len(), |n| i + 2 + n + 2);
            }
            _ => {
                i += 1;
                continue;
            }
        }
        spans.push(start..i.min(bytes.len()));
    }

    spans
}

fn within(spans: &[Range<usize>], offset: usize) -> bool {
    let index = spans.partition_point(|span| span.end <= offset);
    spans.get(index).is_some_and(|span| span.contains(&offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_function() {
        let output = convert("export function foo() {}");
        assert!(output.contains("function foo() {}"));
        assert!(!output.contains("export function"));
        assert!(output.trim_end().ends_with("exports.foo = foo;"));
    }

    #[test]
    fn test_export_default() {
        let output = convert("const a = 1;\nexport default a;\n");
        assert_eq!(output, "const a = 1;\nmodule.exports = a;\n");
    }

    #[test]
    fn test_export_declarations() {
        let input = "export const a = 1;\nexport let b = 2;\nexport class C {}\nexport async function d() {}\n";
        let output = convert(input);
        assert_eq!(
            output,
            "const a = 1;\nlet b = 2;\nclass C {}\nasync function d() {}\nexports.a = a;\nexports.b = b;\nexports.C = C;\nexports.d = d;\n"
        );
    }

    #[test]
    fn test_export_list_with_renames() {
        let input = "var a = 1, b = 2;\nexport { a, b as c };\n";
        let output = convert(input);
        assert_eq!(output, "var a = 1, b = 2;\n\nexports.a = a;\nexports.c = b;\n");
    }

    #[test]
    fn test_export_list_default_alias() {
        let output = convert("function x() {}\nexport { x as default };\n");
        assert!(output.contains("module.exports = x;"));
    }

    #[test]
    fn test_reexports_pass_through() {
        let input = "export { a } from \"./a\";\nexport * from \"./b\";\n";
        assert_eq!(convert(input), input);
    }

    #[test]
    fn test_exports_inside_strings_are_ignored() {
        let input = "const s = `\nexport default 1`;\n";
        assert_eq!(rewrite_exports(input), input);

        let input = "/*\nexport default 1\n*/\n// export { a };\n";
        assert_eq!(rewrite_exports(input), input);
    }

    #[test]
    fn test_apostrophe_in_string_does_not_hide_exports() {
        assert_eq!(
            convert("export const msg = \"it's\";\n"),
            "const msg = \"it's\";\nexports.msg = msg;\n"
        );
    }

    #[test]
    fn test_apostrophe_in_comment_does_not_hide_exports() {
        let output = convert("export function f() {}\n// don't\n");
        assert!(output.starts_with("function f() {}"));
        assert!(output.contains("exports.f = f;"));
    }

    #[test]
    fn test_imports_before_unbalanced_quotes_are_rewritten() {
        let input = "import { readFile } from \"fs\";\nconst s = \"it's\";\nexport { s };\n";
        assert_eq!(
            convert(input),
            "const { readFile } = require(\"fs\");\nconst s = \"it's\";\n\nexports.s = s;\n"
        );
    }

    #[test]
    fn test_escaped_quotes_stay_inside_string() {
        let input = "const s = 'a\\'; export default 1';\nexport { s };\n";
        let output = convert(input);
        assert!(output.contains("'a\\'; export default 1'"));
        assert!(output.ends_with("exports.s = s;\n"));
    }

    #[test]
    fn test_rewrite_imports() {
        assert_eq!(rewrite_imports("import 'x';"), "require('x');");
        assert_eq!(rewrite_imports("import a from \"a\";"), "const a = require(\"a\");");
        assert_eq!(
            rewrite_imports("import { b, c as d } from 'b';"),
            "const { b, c: d } = require('b');"
        );
        assert_eq!(rewrite_imports("import * as ns from 'ns';"), "const ns = require('ns');");
        assert_eq!(
            rewrite_imports("import e, { f } from 'e';"),
            "const e = require('e'); const { f } = e;"
        );
    }

    #[test]
    fn test_convert_full_chunk() {
        let input = "import { readFile } from \"fs\";\nfunction load(p) { return readFile(p); }\nexport { load };\n";
        let output = convert(input);
        assert_eq!(
            output,
            "const { readFile } = require(\"fs\");\nfunction load(p) { return readFile(p); }\n\nexports.load = load;\n"
        );
    }
}
