//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the production sources of `skylink/core` and `skylink/daemon`:
//! - No blocking sockets from `std::net`
//! - No thread-blocking sleeps in async code
//!
//! The helpers here walk the source trees and report offending lines. Test
//! modules are skipped: everything after a `#[cfg(test)]` attribute is test
//! code by convention in this workspace.

use std::fs;
use std::path::{Path, PathBuf};

/// A forbidden construct
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// Short description used in reports
    pub name: &'static str,
    /// Substrings that trigger the rule
    pub patterns: &'static [&'static str],
}

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Rule that matched
    pub rule: &'static str,
    /// Trimmed source line
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.text
        )
    }
}

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["skylink/core/src", "skylink/daemon/src"];

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Every `.rs` file below the production directories
#[must_use]
pub fn production_sources() -> Vec<PathBuf> {
    let root = workspace_root();
    PRODUCTION_DIRS
        .iter()
        .map(|dir| root.join(dir))
        .filter(|dir| dir.exists())
        .flat_map(|dir| {
            walkdir::WalkDir::new(dir)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("rs"))
                .map(walkdir::DirEntry::into_path)
        })
        .collect()
}

/// Check `content` of `path` against `rules`
#[must_use]
pub fn scan_source(path: &Path, content: &str, rules: &[Rule]) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        let code_part = line.split("//").next().unwrap_or(line);

        for rule in rules {
            if rule.patterns.iter().any(|pattern| code_part.contains(pattern)) {
                violations.push(Violation {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    rule: rule.name,
                    text: trimmed.to_string(),
                });
            }
        }
    }
    violations
}

/// Check every production source file against `rules`
#[must_use]
pub fn scan_production_code(rules: &[Rule]) -> Vec<Violation> {
    production_sources()
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok().map(|content| (path, content)))
        .flat_map(|(path, content)| scan_source(path, &content, rules))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLEEP: Rule = Rule {
        name: "Blocking sleep",
        patterns: &["std::thread::sleep", "thread::sleep("],
    };

    #[test]
    fn test_scan_reports_line() {
        let source = "fn main() {\n    std::thread::sleep(d);\n}\n";
        let violations = scan_source(Path::new("main.rs"), source, &[SLEEP]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 2);
        assert_eq!(violations[0].text, "std::thread::sleep(d);");
    }

    #[test]
    fn test_scan_ignores_comments_and_tests() {
        let source = "\
/// std::thread::sleep is forbidden
fn run() {} // thread::sleep(x)
#[cfg(test)]
mod tests {
    fn helper() { std::thread::sleep(d); }
}
";
        assert!(scan_source(Path::new("lib.rs"), source, &[SLEEP]).is_empty());
    }

    #[test]
    fn test_production_sources_found() {
        let sources = production_sources();
        assert!(sources.iter().any(|p| p.ends_with("lib.rs")));
        assert!(sources.iter().any(|p| p.ends_with("main.rs")));
    }
}
