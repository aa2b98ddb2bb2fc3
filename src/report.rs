//! Human-readable size report of a finished build.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use colored::{ColoredString, Colorize};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

const UNITS: [&str; 4] = ["B ", "kB", "MB", "GB"];

#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Paths are shown relative to this directory.
    pub cwd: PathBuf,
    pub gzip: bool,
    pub colors: bool,
    /// Total build time, printed as a trailing "Done in" line.
    pub delta: Option<Duration>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            gzip: false,
            colors: false,
            delta: None,
        }
    }
}

struct FileStats {
    file: String,
    size: String,
    gzip: Option<String>,
}

/// Render one table per source file listing every output and its size.
pub async fn report(results: &BTreeMap<PathBuf, Vec<PathBuf>>, options: &ReportOptions) -> String {
    let (mut f, mut s, mut g) = (4, 8, 6);
    let mut max = 0;
    let mut record: Vec<(String, Vec<FileStats>)> = Vec::new();

    for (input, outputs) in results {
        let mut files = Vec::new();
        for file in outputs {
            let Some(stats) = inspect(file, &options.cwd, options.gzip).await else {
                continue;
            };
            f = f.max(stats.file.len());
            s = s.max(stats.size.len());
            if let Some(gzip) = &stats.gzip {
                g = g.max(gzip.len());
            }
            files.push(stats);
        }

        let input = display_path(input, &options.cwd);
        f = f.max(input.len());

        let mut width = 4 + 2 + f + s;
        if options.gzip {
            width += 2 + g;
        }
        max = max.max(width);

        files.sort_by(|a, b| a.file.cmp(&b.file));
        record.push((input, files));
    }

    let paint = |text: String, style: fn(ColoredString) -> ColoredString| -> String {
        if options.colors {
            style(text.normal()).to_string()
        } else {
            text
        }
    };

    let mut output = String::new();
    for (input, files) in &record {
        output.push_str("\n  ");
        output.push_str(&paint(rpad(input, f), |t| t.bold().dimmed().italic().underline()));
        output.push_str("    ");
        output.push_str(&paint(lpad("Filesize", s), |t| t.bold().dimmed().italic()));
        if options.gzip {
            output.push_str("  ");
            output.push_str(&paint(lpad("(gzip)", g), |t| t.bold().dimmed().italic()));
        }

        for stats in files {
            output.push_str("\n    ");
            output.push_str(&paint(rpad(&stats.file, f), |t| t.white()));
            output.push_str("  ");
            output.push_str(&paint(lpad(&stats.size, s), |t| t.cyan()));
            if options.gzip {
                let gzip = stats.gzip.as_deref().unwrap_or_default();
                output.push_str("  ");
                output.push_str(&paint(lpad(gzip, g), |t| t.dimmed().italic()));
            }
        }

        output.push('\n');
    }

    if let Some(delta) = options.delta {
        output.push('\n');
        output.push_str(&lpad(&format!("Done in {}", time(delta)), max));
        output.push('\n');
    }

    format!("\n{output}\n")
}

async fn inspect(file: &Path, cwd: &Path, gzip: bool) -> Option<FileStats> {
    let bytes = match tokio::fs::read(file).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("skipping {} in report: {e}", file.display());
            return None;
        }
    };

    let gzip = if gzip {
        gzip_len(&bytes).map(|len| size(len as i64))
    } else {
        None
    };

    Some(FileStats {
        file: display_path(file, cwd),
        size: size(bytes.len() as i64),
        gzip,
    })
}

fn gzip_len(bytes: &[u8]) -> Option<usize> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).ok()?;
    encoder.finish().ok().map(|out| out.len())
}

fn display_path(path: &Path, cwd: &Path) -> String {
    path.strip_prefix(cwd)
        .unwrap_or(path)
        .display()
        .to_string()
}

pub fn lpad(text: &str, max: usize) -> String {
    format!("{text:>max$}")
}

pub fn rpad(text: &str, max: usize) -> String {
    format!("{text:<max$}")
}

/// Byte count with three significant digits and exactly two decimals
/// above 1kB, e.g. `1024` → `1.02 kB`.
pub fn size(val: i64) -> String {
    let x = val.unsigned_abs() as f64;
    if x < 1e3 {
        return format!("{val} {}", UNITS[0]);
    }

    let exp = ((x.log10() / 3.0).floor() as usize).clamp(1, UNITS.len() - 1);
    let num = x / 1e3_f64.powi(exp as i32);

    let digits = num.log10().floor() as usize + 1;
    let precision = 3usize.saturating_sub(digits);
    let mut out = format!("{num:.precision$}");
    match out.find('.') {
        None => out.push_str(".00"),
        Some(idx) => {
            out.push_str("00");
            out.truncate(idx + 3);
        }
    }

    let sign = if val < 0 { "-" } else { "" };
    format!("{sign}{out} {}", UNITS[exp])
}

/// `350ms` under a second, `1.25s` above.
pub fn time(delta: Duration) -> String {
    if delta.as_secs() < 1 {
        let ms = (f64::from(delta.subsec_nanos()) / 1e6).round();
        format!("{ms}ms")
    } else {
        format!("{:.2}s", delta.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_size_zero_and_bytes() {
        assert_eq!(size(0), "0 B ");
        assert_eq!(size(1), "1 B ");
        assert_eq!(size(123), "123 B ");
    }

    #[test]
    fn test_size_positives() {
        assert_eq!(size(1_000), "1.00 kB");
        assert_eq!(size(1024), "1.02 kB");
        assert_eq!(size(1_230), "1.23 kB");
        assert_eq!(size(10_000), "10.00 kB");
        assert_eq!(size(100_000), "100.00 kB");

        assert_eq!(size(1_000_000), "1.00 MB");
        assert_eq!(size(1_230_000), "1.23 MB");
        assert_eq!(size(11_290_000), "11.30 MB");

        assert_eq!(size(1_000_000_000), "1.00 GB");
        assert_eq!(size(1_230_000_000), "1.23 GB");
        assert_eq!(size(11_290_000_000), "11.30 GB");
    }

    #[test]
    fn test_size_negatives() {
        assert_eq!(size(-1), "-1 B ");
        assert_eq!(size(-123), "-123 B ");
        assert_eq!(size(-1024), "-1.02 kB");
        assert_eq!(size(-100_000), "-100.00 kB");
        assert_eq!(size(-11_290_000), "-11.30 MB");
        assert_eq!(size(-1_230_000_000), "-1.23 GB");
    }

    #[test]
    fn test_padding() {
        assert_eq!(lpad("ab", 4), "  ab");
        assert_eq!(rpad("ab", 4), "ab  ");
        assert_eq!(lpad("abcdef", 4), "abcdef");
    }

    #[test]
    fn test_time() {
        assert_eq!(time(Duration::from_millis(350)), "350ms");
        assert_eq!(time(Duration::from_millis(1250)), "1.25s");
    }

    #[tokio::test]
    async fn test_report_layout() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        std::fs::create_dir_all(dir.join("dist")).unwrap();
        std::fs::write(dir.join("dist/index.js"), "x".repeat(1024)).unwrap();

        let results = BTreeMap::from([(
            dir.join("src/index.js"),
            vec![dir.join("dist/index.js"), dir.join("dist/missing.js")],
        )]);
        let options = ReportOptions {
            cwd: dir.to_path_buf(),
            ..Default::default()
        };

        let out = report(&results, &options).await;
        assert_eq!(
            out,
            "\n\n  src/index.js     Filesize\n    dist/index.js   1.02 kB\n\n"
        );
    }

    #[tokio::test]
    async fn test_report_gzip_and_delta() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("index.js");
        std::fs::write(&file, "a".repeat(4096)).unwrap();

        let results = BTreeMap::from([(file.clone(), vec![file])]);
        let options = ReportOptions {
            cwd: temp_dir.path().to_path_buf(),
            gzip: true,
            delta: Some(Duration::from_millis(12)),
            ..Default::default()
        };

        let out = report(&results, &options).await;
        assert!(out.contains("(gzip)"));
        assert!(out.contains("4.10 kB"));
        assert!(out.contains("Done in 12ms"));
    }
}
