//! Built-in packaging defaults (lowest cascade layer)
//!
//! `plugin_name` and `version` are absent; a build must get them from a
//! document or the command line.

use serde::{Deserialize, Serialize};

/// Patterns excluded from every package unless a document replaces the list
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    ".git",
    ".github",
    ".build",
    ".gitignore",
    ".DS_Store",
    "Thumbs.db",
    "*.md.bak",
    "*.tmp",
    "*.temp",
    ".vscode",
    ".idea",
    "__pycache__",
    "*.pyc",
    "tests/",
    "vendor/",
    "node_modules/",
];

/// Default cap on individually reported issues of one kind
pub const DEFAULT_MAX_REPORTED_ISSUES: usize = 5;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Output filename shape (default: "production")
    pub environment: String,

    /// Destination directory, relative to the build root (default: "dist")
    pub output_dir: String,

    /// Directories packaged by default
    pub include_dirs: Vec<String>,

    /// Exclusion patterns
    pub exclude_patterns: Vec<String>,

    /// Abort before packaging when a required source file is missing (default: true)
    pub fail_on_missing: bool,

    /// Lower-case both sides before matching exclusions (default: false)
    pub exclude_case_insensitive: bool,

    /// Reporting cap per issue kind (default: 5)
    pub max_reported_issues: usize,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            output_dir: "dist".to_string(),
            include_dirs: vec![
                "src".to_string(),
                "assets".to_string(),
                "templates".to_string(),
            ],
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            fail_on_missing: true,
            exclude_case_insensitive: false,
            max_reported_issues: DEFAULT_MAX_REPORTED_ISSUES,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to a JSON value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "environment": self.environment,
            "output_dir": self.output_dir,
            "include_dirs": self.include_dirs,
            "include_files": [],
            "exclude_patterns": self.exclude_patterns,
            "required_files": [],
            "required_dirs": [],
            "critical_files": [],
            "fail_on_missing": self.fail_on_missing,
            "exclude_case_insensitive": self.exclude_case_insensitive,
            "max_reported_issues": self.max_reported_issues,
        })
    }
}
