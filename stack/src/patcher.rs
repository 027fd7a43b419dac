//! In-place configuration patching.
//!
//! Two kinds of rule exist. [`PatchRule::Replace`] rewrites every regex match
//! in a file and is a no-op once the pattern no longer occurs.
//! [`PatchRule::EnsureLine`] guarantees a line is present exactly once:
//! the first line equal to it or matched by `regexp` becomes the line and
//! later such lines are dropped; with no such line it is appended. Running
//! the same rule set any number of times leaves the files as after the
//! first run.
//!
//! ```no_run
//! use stack::patcher::{PatchRule, Patcher};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let patcher = Patcher::new(
//!     "/Users/me/ragflow",
//!     vec![
//!         PatchRule::replace("docker/.env", "TIMEZONE='Asia/Shanghai'", "TIMEZONE='America/Denver'"),
//!         PatchRule::ensure_line("docker/.env", "LIGHTEN=0").with_regexp("^LIGHTEN="),
//!     ],
//! );
//! for report in patcher.apply()? {
//!     println!("{}: changed={}", report.path.display(), report.changed);
//! }
//! # Ok(())
//! # }
//! ```

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

pub type PatchResult<T> = Result<T, PatchError>;

/// One edit to one file. Paths are relative to the patcher's root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchRule {
    /// Replace every match of `pattern`; `$1`/`${name}` in `replacement`
    /// expand to capture groups. `^`/`$` match at line boundaries.
    Replace {
        path: PathBuf,
        pattern: String,
        replacement: String,
    },
    /// Make sure `line` is present exactly once
    EnsureLine {
        path: PathBuf,
        line: String,
        #[serde(default)]
        regexp: Option<String>,
    },
}

impl PatchRule {
    pub fn replace(
        path: impl Into<PathBuf>,
        pattern: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        PatchRule::Replace {
            path: path.into(),
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    pub fn ensure_line(path: impl Into<PathBuf>, line: impl Into<String>) -> Self {
        PatchRule::EnsureLine {
            path: path.into(),
            line: line.into(),
            regexp: None,
        }
    }

    /// Set the regexp of an `EnsureLine` rule; no effect on `Replace`
    pub fn with_regexp(mut self, pattern: impl Into<String>) -> Self {
        if let PatchRule::EnsureLine { regexp, .. } = &mut self {
            *regexp = Some(pattern.into());
        }
        self
    }

    pub fn path(&self) -> &Path {
        match self {
            PatchRule::Replace { path, .. } | PatchRule::EnsureLine { path, .. } => path,
        }
    }
}

/// The stock rules for adapting a RagFlow checkout to macOS
pub fn default_rules(manifest: &Path, env_file: &Path) -> Vec<PatchRule> {
    vec![
        PatchRule::replace(manifest, r"onnxruntime-gpu==", "onnxruntime=="),
        PatchRule::replace(
            env_file,
            r"TIMEZONE='Asia/Shanghai'",
            "TIMEZONE='America/Denver'",
        ),
        PatchRule::ensure_line(env_file, "LIGHTEN=0").with_regexp("^LIGHTEN="),
        PatchRule::ensure_line(env_file, "MACOS=1").with_regexp("^MACOS="),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Replaced { count: usize },
    LineReplaced,
    Appended,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub path: PathBuf,
    pub changed: bool,
    pub outcomes: Vec<PatchOutcome>,
}

enum CompiledRule<'a> {
    Replace {
        regex: Regex,
        replacement: &'a str,
    },
    EnsureLine {
        line: &'a str,
        regex: Option<Regex>,
    },
}

impl<'a> CompiledRule<'a> {
    fn compile(rule: &'a PatchRule) -> PatchResult<Self> {
        match rule {
            PatchRule::Replace {
                pattern,
                replacement,
                ..
            } => {
                let regex = RegexBuilder::new(pattern)
                    .multi_line(true)
                    .build()
                    .map_err(|source| PatchError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })?;
                Ok(CompiledRule::Replace {
                    regex,
                    replacement: replacement.as_str(),
                })
            }
            PatchRule::EnsureLine { line, regexp, .. } => {
                let regex = regexp
                    .as_deref()
                    .map(|pattern| {
                        Regex::new(pattern).map_err(|source| PatchError::InvalidPattern {
                            pattern: pattern.to_string(),
                            source,
                        })
                    })
                    .transpose()?;
                Ok(CompiledRule::EnsureLine {
                    line: line.as_str(),
                    regex,
                })
            }
        }
    }

    fn apply(&self, content: &str) -> (String, PatchOutcome) {
        match self {
            CompiledRule::Replace { regex, replacement } => {
                let count = regex.find_iter(content).count();
                if count == 0 {
                    return (content.to_string(), PatchOutcome::Unchanged);
                }
                let replaced = regex.replace_all(content, *replacement).into_owned();
                if replaced == content {
                    (replaced, PatchOutcome::Unchanged)
                } else {
                    (replaced, PatchOutcome::Replaced { count })
                }
            }
            CompiledRule::EnsureLine { line, regex } => ensure_line(content, line, regex.as_ref()),
        }
    }
}

fn line_text(segment: &str) -> &str {
    segment.trim_end_matches('\n').trim_end_matches('\r')
}

fn ensure_line(content: &str, line: &str, regex: Option<&Regex>) -> (String, PatchOutcome) {
    let segments: Vec<&str> = content.split_inclusive('\n').collect();
    let matches: Vec<usize> = segments
        .iter()
        .enumerate()
        .filter(|(_, segment)| {
            let text = line_text(segment);
            text == line || regex.is_some_and(|regex| regex.is_match(text))
        })
        .map(|(i, _)| i)
        .collect();

    let Some(&keep) = matches.first() else {
        let mut patched = content.to_string();
        if !patched.is_empty() && !patched.ends_with('\n') {
            patched.push('\n');
        }
        patched.push_str(line);
        patched.push('\n');
        return (patched, PatchOutcome::Appended);
    };

    if matches.len() == 1 && line_text(segments[keep]) == line {
        return (content.to_string(), PatchOutcome::Unchanged);
    }

    let mut patched = String::with_capacity(content.len() + line.len());
    for (i, segment) in segments.iter().enumerate() {
        if i == keep {
            patched.push_str(line);
            patched.push_str(&segment[line_text(segment).len()..]);
        } else if !matches.contains(&i) {
            patched.push_str(segment);
        }
    }
    (patched, PatchOutcome::LineReplaced)
}

/// Apply rules in order to in-memory content
pub fn apply_rules(content: &str, rules: &[&PatchRule]) -> PatchResult<(String, Vec<PatchOutcome>)> {
    let compiled = rules
        .iter()
        .map(|rule| CompiledRule::compile(rule))
        .collect::<PatchResult<Vec<_>>>()?;

    let mut current = content.to_string();
    let mut outcomes = Vec::with_capacity(compiled.len());
    for rule in &compiled {
        let (next, outcome) = rule.apply(&current);
        current = next;
        outcomes.push(outcome);
    }
    Ok((current, outcomes))
}

/// Applies a rule list to files under a root directory
#[derive(Debug, Clone)]
pub struct Patcher {
    root: PathBuf,
    rules: Vec<PatchRule>,
}

impl Patcher {
    pub fn new(root: impl Into<PathBuf>, rules: Vec<PatchRule>) -> Self {
        Self {
            root: root.into(),
            rules,
        }
    }

    pub fn rules(&self) -> &[PatchRule] {
        &self.rules
    }

    /// Distinct target files, in first-mention order
    pub fn targets(&self) -> Vec<PathBuf> {
        let mut targets: Vec<PathBuf> = Vec::new();
        for rule in &self.rules {
            let path = self.root.join(rule.path());
            if !targets.contains(&path) {
                targets.push(path);
            }
        }
        targets
    }

    /// Check every pattern compiles without touching any file
    pub fn validate(&self) -> PatchResult<()> {
        for rule in &self.rules {
            CompiledRule::compile(rule)?;
        }
        Ok(())
    }

    /// Patch every target file; files are written only when their content
    /// changed.
    pub fn apply(&self) -> PatchResult<Vec<PatchReport>> {
        self.validate()?;

        let mut reports = Vec::new();
        for target in self.targets() {
            let rules: Vec<&PatchRule> = self
                .rules
                .iter()
                .filter(|rule| self.root.join(rule.path()) == target)
                .collect();

            let original = std::fs::read_to_string(&target).map_err(|source| PatchError::Io {
                path: target.display().to_string(),
                source,
            })?;

            let (patched, outcomes) = apply_rules(&original, &rules)?;
            for (rule, outcome) in rules.iter().zip(&outcomes) {
                if *outcome == PatchOutcome::Unchanged {
                    debug!(path = %target.display(), ?rule, "Rule left file unchanged");
                }
            }

            let changed = patched != original;
            if changed {
                std::fs::write(&target, &patched).map_err(|source| PatchError::Io {
                    path: target.display().to_string(),
                    source,
                })?;
            }
            info!(path = %target.display(), changed, rules = rules.len(), "Patched file");

            reports.push(PatchReport {
                path: target,
                changed,
                outcomes,
            });
        }

        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn apply_one(content: &str, rule: &PatchRule) -> (String, PatchOutcome) {
        let (patched, mut outcomes) = apply_rules(content, &[rule]).unwrap();
        (patched, outcomes.remove(0))
    }

    #[test]
    fn test_replace_timezone() {
        let rule = PatchRule::replace(".env", "TIMEZONE='Asia/Shanghai'", "TIMEZONE='America/Denver'");
        let (patched, outcome) = apply_one("SVR_HTTP_PORT=9380\nTIMEZONE='Asia/Shanghai'\n", &rule);

        assert_eq!(patched, "SVR_HTTP_PORT=9380\nTIMEZONE='America/Denver'\n");
        assert_eq!(outcome, PatchOutcome::Replaced { count: 1 });

        let (again, outcome) = apply_one(&patched, &rule);
        assert_eq!(again, patched);
        assert_eq!(outcome, PatchOutcome::Unchanged);
    }

    #[test]
    fn test_replace_with_capture_groups() {
        let rule = PatchRule::replace("pyproject.toml", r#"^(\s*)"onnxruntime-gpu==([\d.]+)""#, r#"${1}"onnxruntime==${2}""#);
        let (patched, _) = apply_one("dependencies = [\n    \"onnxruntime-gpu==1.19.2\",\n]\n", &rule);
        assert_eq!(patched, "dependencies = [\n    \"onnxruntime==1.19.2\",\n]\n");
    }

    #[test]
    fn test_ensure_line_appends_once() {
        let rule = PatchRule::ensure_line(".env", "LIGHTEN=0");
        let (once, outcome) = apply_one("TIMEZONE='America/Denver'", &rule);
        assert_eq!(once, "TIMEZONE='America/Denver'\nLIGHTEN=0\n");
        assert_eq!(outcome, PatchOutcome::Appended);

        let (twice, outcome) = apply_one(&once, &rule);
        assert_eq!(twice, once);
        assert_eq!(outcome, PatchOutcome::Unchanged);
    }

    #[test]
    fn test_ensure_line_keeps_first_regexp_match() {
        let rule = PatchRule::ensure_line(".env", "LIGHTEN=0").with_regexp("^LIGHTEN=");
        let (patched, outcome) = apply_one("A=b\r\nLIGHTEN=1\r\nC=d\nLIGHTEN=1\n", &rule);
        assert_eq!(patched, "A=b\r\nLIGHTEN=0\r\nC=d\n");
        assert_eq!(outcome, PatchOutcome::LineReplaced);
    }

    #[test]
    fn test_ensure_line_collapses_duplicate_lines() {
        let rule = PatchRule::ensure_line(".env", "LIGHTEN=0").with_regexp("^LIGHTEN=");
        let (once, outcome) = apply_one("LIGHTEN=0\nA=b\nLIGHTEN=0\n", &rule);
        assert_eq!(once, "LIGHTEN=0\nA=b\n");
        assert_eq!(outcome, PatchOutcome::LineReplaced);

        let (twice, outcome) = apply_one(&once, &rule);
        assert_eq!(twice, once);
        assert_eq!(outcome, PatchOutcome::Unchanged);
    }

    #[test]
    fn test_ensure_line_collapses_line_and_regexp_match() {
        let rule = PatchRule::ensure_line(".env", "LIGHTEN=0").with_regexp("^LIGHTEN=");
        let (once, _) = apply_one("LIGHTEN=0\nLIGHTEN=1\n", &rule);
        assert_eq!(once, "LIGHTEN=0\n");

        let (once, _) = apply_one("LIGHTEN=1\nLIGHTEN=0", &rule);
        assert_eq!(once, "LIGHTEN=0\n");
        assert_eq!(once.lines().filter(|l| l.starts_with("LIGHTEN=")).count(), 1);
    }

    #[test]
    fn test_ensure_line_without_regexp_drops_exact_duplicates() {
        let rule = PatchRule::ensure_line(".env", "MACOS=1");
        let (patched, outcome) = apply_one("MACOS=1\nMACOS=0\nMACOS=1\n", &rule);
        assert_eq!(patched, "MACOS=1\nMACOS=0\n");
        assert_eq!(outcome, PatchOutcome::LineReplaced);
    }

    #[test]
    fn test_ensure_line_on_empty_content() {
        let rule = PatchRule::ensure_line(".env", "MACOS=1").with_regexp("^MACOS=");
        let (patched, outcome) = apply_one("", &rule);
        assert_eq!(patched, "MACOS=1\n");
        assert_eq!(outcome, PatchOutcome::Appended);
    }

    #[test]
    fn test_with_regexp_ignored_for_replace() {
        let rule = PatchRule::replace("a", "b", "c").with_regexp("x");
        assert_eq!(rule, PatchRule::replace("a", "b", "c"));
    }

    #[test]
    fn test_invalid_pattern_touches_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".env"), "TIMEZONE='Asia/Shanghai'\n").unwrap();

        let patcher = Patcher::new(
            dir.path(),
            vec![
                PatchRule::replace(".env", "TIMEZONE='Asia/Shanghai'", "TIMEZONE='UTC'"),
                PatchRule::replace(".env", "([unclosed", "x"),
            ],
        );
        assert!(matches!(
            patcher.apply(),
            Err(PatchError::InvalidPattern { .. })
        ));
        assert_eq!(
            std::fs::read_to_string(dir.path().join(".env")).unwrap(),
            "TIMEZONE='Asia/Shanghai'\n"
        );
    }

    #[test]
    fn test_patcher_groups_rules_per_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("docker")).unwrap();
        std::fs::write(dir.path().join("docker/.env"), "TIMEZONE='Asia/Shanghai'\n").unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "\"onnxruntime==1.19.2\",\n").unwrap();

        let patcher = Patcher::new(
            dir.path(),
            default_rules(Path::new("pyproject.toml"), Path::new("docker/.env")),
        );
        assert_eq!(patcher.targets().len(), 2);

        let reports = patcher.apply().unwrap();
        assert_eq!(reports.len(), 2);
        assert!(!reports[0].changed, "manifest has nothing to replace");
        assert_eq!(reports[0].outcomes, vec![PatchOutcome::Unchanged]);
        assert!(reports[1].changed);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("docker/.env")).unwrap(),
            "TIMEZONE='America/Denver'\nLIGHTEN=0\nMACOS=1\n"
        );
    }

    #[test]
    fn test_default_rules_repair_duplicated_env_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("docker")).unwrap();
        std::fs::write(
            dir.path().join("docker/.env"),
            "LIGHTEN=0\nMACOS=1\nLIGHTEN=1\nMACOS=1\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "").unwrap();

        let patcher = Patcher::new(
            dir.path(),
            default_rules(Path::new("pyproject.toml"), Path::new("docker/.env")),
        );
        patcher.apply().unwrap();
        let first = std::fs::read_to_string(dir.path().join("docker/.env")).unwrap();
        assert_eq!(first, "LIGHTEN=0\nMACOS=1\n");

        let reports = patcher.apply().unwrap();
        assert!(reports.iter().all(|report| !report.changed));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let patcher = Patcher::new(dir.path(), vec![PatchRule::ensure_line(".env", "A=1")]);
        assert!(matches!(patcher.apply(), Err(PatchError::Io { .. })));
    }

    #[test]
    fn test_rules_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            patches: Vec<PatchRule>,
        }

        let wrapper: Wrapper = toml::from_str(
            r#"
            [[patches]]
            kind = "replace"
            path = "docker/.env"
            pattern = "TIMEZONE='Asia/Shanghai'"
            replacement = "TIMEZONE='Europe/Berlin'"

            [[patches]]
            kind = "ensure_line"
            path = "docker/.env"
            line = "LIGHTEN=0"
            regexp = "^LIGHTEN="
            "#,
        )
        .unwrap();

        assert_eq!(wrapper.patches.len(), 2);
        assert_eq!(
            wrapper.patches[1],
            PatchRule::ensure_line("docker/.env", "LIGHTEN=0").with_regexp("^LIGHTEN=")
        );
    }
}
