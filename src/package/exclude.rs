//! Exclusion rules for packaging
//!
//! Two pattern forms:
//! - `*suffix`: the normalized path ends with `suffix`
//! - anything else: the normalized path contains the pattern
//!
//! Paths are matched relative to the build root with `/` separators.
//! Directories are matched both bare and with a trailing `/`, so `tests/`
//! prunes `tests` and `*.tmp` prunes `cache.tmp`.

use std::path::Path;

use crate::config::BuildSpec;

/// Case policy, fixed for the lifetime of a rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    #[default]
    CaseSensitive,
    CaseInsensitive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Suffix(String),
    Contains(String),
}

impl Pattern {
    fn parse(raw: &str, policy: MatchPolicy) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        let raw = normalize_separators(raw);
        let raw = match policy {
            MatchPolicy::CaseSensitive => raw,
            MatchPolicy::CaseInsensitive => raw.to_lowercase(),
        };
        Some(match raw.strip_prefix('*') {
            Some(suffix) => Pattern::Suffix(suffix.to_string()),
            None => Pattern::Contains(raw),
        })
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Suffix(suffix) => path.ends_with(suffix.as_str()),
            Pattern::Contains(needle) => path.contains(needle.as_str()),
        }
    }
}

/// Exclusion rules for filtering manifest candidates
#[derive(Debug, Clone, Default)]
pub struct ExcludeRules {
    raw: Vec<String>,
    patterns: Vec<Pattern>,
    policy: MatchPolicy,
}

impl ExcludeRules {
    pub fn new<S: AsRef<str>>(patterns: &[S], policy: MatchPolicy) -> Self {
        let mut raw = Vec::new();
        let mut parsed = Vec::new();
        for pattern in patterns {
            if let Some(p) = Pattern::parse(pattern.as_ref(), policy) {
                raw.push(pattern.as_ref().to_string());
                parsed.push(p);
            }
        }
        Self {
            raw,
            patterns: parsed,
            policy,
        }
    }

    /// Rules and policy declared by a build specification
    pub fn from_spec(spec: &BuildSpec) -> Self {
        let policy = if spec.exclude_case_insensitive {
            MatchPolicy::CaseInsensitive
        } else {
            MatchPolicy::CaseSensitive
        };
        Self::new(&spec.exclude_patterns, policy)
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The first declared pattern that matches `path`, if any
    pub fn matching_pattern(&self, path: &str) -> Option<&str> {
        let normalized = normalize_separators(path);
        let candidate = match self.policy {
            MatchPolicy::CaseSensitive => normalized,
            MatchPolicy::CaseInsensitive => normalized.to_lowercase(),
        };
        self.patterns
            .iter()
            .position(|p| p.matches(&candidate))
            .map(|i| self.raw[i].as_str())
    }

    /// Check a path string (any separator style)
    pub fn is_excluded(&self, path: &str) -> bool {
        self.matching_pattern(path).is_some()
    }

    /// Check a file path relative to the build root
    pub fn is_excluded_file(&self, rel_path: &Path) -> bool {
        self.is_excluded(&rel_path.to_string_lossy())
    }

    /// Check a directory path relative to the build root, both bare and
    /// with a trailing `/`
    pub fn is_excluded_dir(&self, rel_path: &Path) -> bool {
        let bare = normalize_separators(&rel_path.to_string_lossy());
        let bare = bare.trim_end_matches('/');
        self.is_excluded(bare) || self.is_excluded(&format!("{}/", bare))
    }
}

/// Convert every `\` to `/`
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// One-shot, case-sensitive check
pub fn excluded<S: AsRef<str>>(path: &str, patterns: &[S]) -> bool {
    ExcludeRules::new(patterns, MatchPolicy::CaseSensitive).is_excluded(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_EXCLUDE_PATTERNS;

    fn default_rules() -> ExcludeRules {
        ExcludeRules::new(DEFAULT_EXCLUDE_PATTERNS, MatchPolicy::CaseSensitive)
    }

    #[test]
    fn test_suffix_pattern() {
        assert!(excluded("src/cache/file.tmp", &["*.tmp"]));
        assert!(!excluded("src/cache/file.tmp.php", &["*.tmp"]));
    }

    #[test]
    fn test_substring_pattern_anywhere() {
        assert!(excluded("assets/node_modules/x/index.js", &["node_modules/"]));
        assert!(excluded(".git/config", &[".git"]));
        assert!(!excluded("src/Core/Plugin.php", &[".git"]));
    }

    #[test]
    fn test_separators_normalized() {
        let rules = ExcludeRules::new(&["tests/"], MatchPolicy::CaseSensitive);
        assert!(rules.is_excluded("src\\tests\\Unit.php"));
        assert!(rules.is_excluded("src/tests/Unit.php"));

        let backslash_pattern = ExcludeRules::new(&["vendor\\"], MatchPolicy::CaseSensitive);
        assert!(backslash_pattern.is_excluded("vendor/autoload.php"));
    }

    #[test]
    fn test_case_sensitive_by_default() {
        let rules = default_rules();
        assert!(rules.is_excluded("assets/.DS_Store"));
        assert!(!rules.is_excluded("assets/.ds_store"));
        assert!(!rules.is_excluded("src/Tests/Helper.php"));
    }

    #[test]
    fn test_case_insensitive_policy() {
        let rules = ExcludeRules::new(&["tests/", "*.TMP"], MatchPolicy::CaseInsensitive);
        assert_eq!(rules.policy(), MatchPolicy::CaseInsensitive);
        assert!(rules.is_excluded("src/Tests/Helper.php"));
        assert!(rules.is_excluded("cache/a.tmp"));
    }

    #[test]
    fn test_directory_matched_with_trailing_slash() {
        let rules = default_rules();
        assert!(rules.is_excluded_dir(Path::new("tests")));
        assert!(rules.is_excluded_dir(Path::new("assets/node_modules")));
        assert!(!rules.is_excluded_dir(Path::new("src/Core")));
        // A file named like a pruned directory is not pruned by the `/` form
        assert!(!rules.is_excluded_file(Path::new("src/tests")));
    }

    #[test]
    fn test_suffix_pattern_prunes_directory() {
        let rules = ExcludeRules::new(&["*.tmp", ".git"], MatchPolicy::CaseSensitive);
        assert!(rules.is_excluded_dir(Path::new("src/cache.tmp")));
        assert!(rules.is_excluded_dir(Path::new("src/.git")));
        assert!(!rules.is_excluded_dir(Path::new("src/tmp")));
    }

    #[test]
    fn test_matching_pattern_reports_declared_form() {
        let rules = ExcludeRules::new(&["", "*.pyc", "__pycache__"], MatchPolicy::CaseSensitive);
        assert_eq!(rules.matching_pattern("lib/__pycache__/m.pyc"), Some("*.pyc"));
        assert_eq!(rules.matching_pattern("lib/__pycache__/"), Some("__pycache__"));
        assert_eq!(rules.matching_pattern("lib/m.py"), None);
    }

    #[test]
    fn test_empty_patterns_ignored() {
        let rules = ExcludeRules::new(&[""], MatchPolicy::CaseSensitive);
        assert!(rules.is_empty());
        assert!(!rules.is_excluded("anything"));
    }
}
