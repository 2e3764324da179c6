use anyhow::{Context, Result};
use globset::GlobBuilder;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Files under `root` whose `/`-separated relative path matches `pattern`,
/// sorted. `*` does not cross directory separators; `**` does.
///
/// Meant for declaring a later stage over whatever an earlier stage produced.
pub fn files_matching(root: &Path, pattern: &str) -> Result<Vec<String>> {
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid file pattern `{}`", pattern))?
        .compile_matcher();
    let base = root.join(literal_prefix(pattern));
    if !base.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(&base).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) => normalise(rel),
            Err(_) => continue,
        };
        if matcher.is_match(&rel) {
            out.push(rel);
        }
    }
    out.sort();
    Ok(out)
}

/// Leading directories of `pattern` that contain no glob syntax.
fn literal_prefix(pattern: &str) -> PathBuf {
    let mut prefix = PathBuf::new();
    let parts: Vec<&str> = pattern.split('/').collect();
    for part in parts.iter().take(parts.len().saturating_sub(1)) {
        if part.contains(['*', '?', '[', '{']) {
            break;
        }
        prefix.push(part);
    }
    prefix
}

fn normalise(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;

    #[test]
    fn lists_matching_files_sorted() {
        let root = std::env::temp_dir().join(format!(
            "sweep_files_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(root.join("output/deep")).expect("dirs");
        for name in ["output/b.txt", "output/a.txt", "output/c.csv", "output/deep/d.txt"] {
            fs::write(root.join(name), "").expect("file");
        }
        assert_eq!(
            files_matching(&root, "output/*.txt").expect("match"),
            vec!["output/a.txt", "output/b.txt"]
        );
        assert_eq!(
            files_matching(&root, "output/**/*.txt").expect("match"),
            vec!["output/a.txt", "output/b.txt", "output/deep/d.txt"]
        );
        assert!(files_matching(&root, "missing/*.txt").expect("match").is_empty());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn literal_prefix_stops_at_glob() {
        assert_eq!(literal_prefix("output/*.txt"), PathBuf::from("output"));
        assert_eq!(literal_prefix("a/b/c?.txt"), PathBuf::from("a/b"));
        assert_eq!(literal_prefix("*/x.txt"), PathBuf::new());
        assert_eq!(literal_prefix("x.txt"), PathBuf::new());
    }
}
