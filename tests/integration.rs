use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bundt::config::OverrideRule;
use bundt::{
    BuildConfig, BuildOptions, BundtError, Bundler, Chunk, Compiler, ConfigOverrides,
    PassthroughCompiler, Result,
};
use tempfile::TempDir;

fn write(dir: &Path, relative: &str, contents: &str) {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn read(dir: &Path, relative: &str) -> String {
    std::fs::read_to_string(dir.join(relative)).unwrap()
}

fn passthrough() -> Bundler {
    Bundler::new(Arc::new(PassthroughCompiler), BuildOptions::default())
}

#[tokio::test]
async fn test_build_full_package() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write(
        dir,
        "package.json",
        r#"{
            "name": "@demo/utils",
            "bin": "bin/cli.js",
            "exports": {
                ".": {
                    "types": "./index.d.ts",
                    "import": "./dist/index.mjs",
                    "require": "./dist/index.js"
                },
                "./math": {
                    "import": "./math/index.mjs",
                    "require": "./math/index.js"
                },
                "./package.json": "./package.json"
            }
        }"#,
    );
    write(dir, "src/index.js", "export function hello() { return 'hi'; }\n");
    write(dir, "src/index.d.ts", "export declare function hello(): string;\n");
    write(dir, "src/math.ts", "export const sum = (a, b) => a + b;\n");
    write(dir, "src/utils.js", "export default 1;\n");

    let outcome = passthrough().build(dir).await.unwrap();
    assert!(!outcome.is_degraded());

    assert!(read(dir, "dist/index.mjs").contains("export function hello()"));
    let cjs = read(dir, "dist/index.js");
    assert!(cjs.contains("exports.hello = hello;"));
    assert!(!cjs.contains("export function"));

    assert!(read(dir, "math/index.js").contains("exports.sum = sum;"));
    assert_eq!(read(dir, "index.d.ts"), "export declare function hello(): string;\n");

    // the scoped package name's last segment finds src/utils.js
    assert!(read(dir, "bin/cli.js").contains("module.exports = 1;"));

    let index_outputs = &outcome.outputs[&dir.join("src/index.js")];
    assert_eq!(
        index_outputs,
        &vec![
            dir.join("dist/index.js"),
            dir.join("dist/index.mjs"),
            dir.join("index.d.ts"),
        ]
    );
}

#[tokio::test]
async fn test_missing_source_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write(
        dir,
        "package.json",
        r#"{ "name": "demo", "exports": { "./feature": "./dist/feature.js" } }"#,
    );
    write(dir, "src/index.js", "export {};\n");

    let err = passthrough().build(dir).await.unwrap_err();
    assert!(matches!(err, BundtError::MissingEntry { .. }));
    assert_eq!(
        err.to_string(),
        "Missing `feature.([cm]?[tj]sx?)` file for \"./feature\" entry"
    );
}

#[tokio::test]
async fn test_missing_manifest_fields() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write(dir, "package.json", r#"{ "name": "demo" }"#);

    let err = passthrough().build(dir).await.unwrap_err();
    assert_eq!(err.to_string(), "Missing \"exports\" in `package.json` file");

    write(dir, "package.json", r#"{ "exports": "./index.js" }"#);
    let err = passthrough().build(dir).await.unwrap_err();
    assert_eq!(err.to_string(), "Missing \"name\" in `package.json` file");
}

#[tokio::test]
async fn test_module_package_default_condition_is_esm() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write(
        dir,
        "package.json",
        r#"{ "name": "demo", "type": "module", "exports": { ".": { "default": "./dist/index.js", "require": "./dist/index.cjs" } } }"#,
    );
    write(dir, "index.js", "export const a = 1;\n");

    passthrough().build(dir).await.unwrap();

    assert_eq!(read(dir, "dist/index.js"), "export const a = 1;\n");
    assert!(read(dir, "dist/index.cjs").contains("exports.a = a;"));
}

#[tokio::test]
async fn test_minify_from_production_condition() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write(
        dir,
        "package.json",
        r#"{
            "name": "demo",
            "exports": {
                ".": {
                    "production": { "import": "./dist/index.min.mjs" },
                    "import": "./dist/index.mjs"
                }
            }
        }"#,
    );
    let source = "export function add(first, second) {\n    // sum\n    return first + second;\n}\n";
    write(dir, "src/index.js", source);

    passthrough().build(dir).await.unwrap();

    assert_eq!(read(dir, "dist/index.mjs"), source);
    let minified = read(dir, "dist/index.min.mjs");
    assert!(minified.len() < source.len());
    assert!(!minified.contains("// sum"));
}

#[tokio::test]
async fn test_overrides_redirect_and_skip() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write(
        dir,
        "package.json",
        r#"{
            "name": "demo",
            "exports": {
                ".": {
                    "browser": { "import": "./browser/index.mjs" },
                    "import": "./dist/index.mjs"
                },
                "./legacy": "./legacy/index.js"
            }
        }"#,
    );
    write(dir, "src/index.js", "export const env = 'node';\n");
    write(dir, "src/browser.js", "export const env = 'browser';\n");
    write(dir, "src/legacy.js", "export {};\n");

    let overrides = ConfigOverrides::new(
        vec![
            OverrideRule {
                export: Some("./legacy".to_string()),
                skip: true,
                ..Default::default()
            },
            OverrideRule {
                condition: Some("browser".to_string()),
                file: Some("src/browser.js".into()),
                ..Default::default()
            },
        ],
        dir,
    );
    let outcome = passthrough()
        .with_hook(Arc::new(overrides))
        .build(dir)
        .await
        .unwrap();

    assert!(read(dir, "browser/index.mjs").contains("'browser'"));
    assert!(read(dir, "dist/index.mjs").contains("'node'"));
    assert!(!dir.join("legacy").exists());
    assert!(outcome.outputs.contains_key(&dir.join("src/browser.js")));
}

/// Fails every compilation of one entry.
struct FailingCompiler {
    broken: &'static str,
}

#[async_trait]
impl Compiler for FailingCompiler {
    async fn compile(&self, config: &BuildConfig) -> Result<Vec<Chunk>> {
        let entry = config.entry().unwrap();
        if entry.ends_with(self.broken) {
            return Err(BundtError::compile_error(entry, "Unexpected token"));
        }
        PassthroughCompiler.compile(config).await
    }
}

#[tokio::test]
async fn test_compile_failure_keeps_other_outputs() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    write(
        dir,
        "package.json",
        r#"{
            "name": "demo",
            "exports": {
                ".": "./dist/index.js",
                "./broken": "./dist/broken.js"
            }
        }"#,
    );
    write(dir, "src/index.js", "export default 1;\n");
    write(dir, "src/broken.js", "export default (;\n");

    let bundler = Bundler::new(
        Arc::new(FailingCompiler { broken: "broken.js" }),
        BuildOptions::default(),
    );
    let outcome = bundler.build(dir).await.unwrap();

    assert!(outcome.is_degraded());
    assert_eq!(outcome.failures.len(), 1);
    assert!(outcome.failures[0].to_string().contains("Unexpected token"));
    assert_eq!(read(dir, "dist/index.js"), "module.exports = 1;\n");
    assert!(!dir.join("dist/broken.js").exists());
}
