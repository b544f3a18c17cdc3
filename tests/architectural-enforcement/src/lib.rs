//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No sleep() calls in production code
//! - No blocking I/O inside async functions
//! - The core library stays free of binary-only concerns (CLI, log output)
//! - No `unwrap()`/`expect()` in production code
//!
//! The helpers below scan source text; tests live in `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

/// Workspace root (two levels above this package)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: [&str; 2] = ["geotrack/core/src", "geotrack/daemon/src"];

/// A source line that broke a rule
#[derive(Debug, Clone)]
pub struct Violation {
    /// File the line is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Offending text
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// All `.rs` files under `dir`
pub fn rust_sources(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Production lines of a file: comments stripped, everything from the first
/// `#[cfg(test)]` on dropped
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, code_part(line)))
        .filter(|(_, code)| !code.trim().is_empty())
        .collect()
}

/// The part of a line before any `//` comment
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether `line` declares a function, and if so whether it is async
pub fn fn_declaration(line: &str) -> Option<bool> {
    let trimmed = line.trim_start();
    let rest = trimmed
        .strip_prefix("pub(crate) ")
        .or_else(|| trimmed.strip_prefix("pub "))
        .unwrap_or(trimmed);

    if rest.starts_with("async fn ") {
        Some(true)
    } else if rest.starts_with("fn ") {
        Some(false)
    } else {
        None
    }
}

/// Whether the line at `idx` sits inside an async function
pub fn is_in_async_function(lines: &[&str], idx: usize) -> bool {
    lines[..=idx]
        .iter()
        .rev()
        .find_map(|line| fn_declaration(line))
        .unwrap_or(false)
}

/// Scan every production file under `dirs` with `check`
pub fn scan<F>(dirs: &[&str], mut check: F) -> Vec<Violation>
where
    F: FnMut(&Path, &[&str], usize, &str) -> bool,
{
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in dirs {
        let dir = root.join(dir);
        assert!(dir.exists(), "missing source directory {}", dir.display());

        for path in rust_sources(&dir) {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            let production = production_lines(&content);
            let lines: Vec<&str> = production.iter().map(|(_, code)| *code).collect();

            for (idx, (line_no, code)) in production.iter().enumerate() {
                if check(&path, &lines, idx, code) {
                    violations.push(Violation {
                        path: path.clone(),
                        line: *line_no,
                        text: code.trim().to_string(),
                    });
                }
            }
        }
    }

    violations
}

/// Panic with a readable report if there are violations
pub fn report(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!(
        "\nFound {} violation(s) of: {rule}\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_function_detection() {
        let code = vec![
            "pub async fn load() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
            "fn parse() {",
            "    let contents = std::fs::read_to_string(\"config.toml\")?;",
            "}",
        ];

        assert!(is_in_async_function(&code, 1));
        assert!(!is_in_async_function(&code, 4));
    }

    #[test]
    fn test_test_module_excluded() {
        let content = "fn a() {}\n// note\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n";
        let lines = production_lines(content);
        assert_eq!(lines, vec![(1, "fn a() {}")]);
    }

    #[test]
    fn test_comments_stripped() {
        assert_eq!(code_part("let x = 1; // std::fs::read"), "let x = 1; ");
    }
}
