//! Post-build structural audit
//!
//! Re-opens a produced archive and checks it against the build
//! specification. The archive is only ever read here; deciding whether to
//! keep it is the caller's business.
//!
//! Hard errors (fail the build):
//! - entry names containing `\`
//! - entries outside the single `{plugin_name}/` root
//! - drive letters, a leading `/` or `..` segments in entry names
//! - an archive with no entries
//! - missing required files and required directories without entries
//!
//! Warnings:
//! - zero-byte critical files
//! - entry names still matching an exclude pattern

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::config::BuildSpec;
use crate::package::ExcludeRules;
use crate::report::{Level, Record, Stage};

/// Key used in the file-type summary for names without an extension
pub const NO_EXTENSION: &str = "(none)";

/// Archive could not be read at all
#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error("cannot open archive {path}: {message}")]
    Open { path: PathBuf, message: String },

    #[error("cannot read entry {index} of {path}: {message}")]
    Entry {
        path: PathBuf,
        index: usize,
        message: String,
    },
}

/// What the audit found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    Backslash,
    /// More backslash entries than the reporting cap allows
    BackslashOverflow { remaining: usize },
    OutsideRoot,
    UnsafePath,
    EmptyArchive,
    MissingRequiredFile,
    MissingRequiredDir,
    EmptyCriticalFile,
    ExcludedLeak { pattern: String },
}

impl IssueKind {
    pub fn is_hard(&self) -> bool {
        !matches!(
            self,
            IssueKind::EmptyCriticalFile | IssueKind::ExcludedLeak { .. }
        )
    }

    fn describe(&self) -> String {
        match self {
            IssueKind::Backslash => "entry name contains a backslash".to_string(),
            IssueKind::BackslashOverflow { remaining } => {
                format!("... and {} more entries with backslashes", remaining)
            }
            IssueKind::OutsideRoot => "entry is outside the plugin root directory".to_string(),
            IssueKind::UnsafePath => {
                "entry name has a drive letter, leading '/' or '..' segment".to_string()
            }
            IssueKind::EmptyArchive => "archive contains no entries".to_string(),
            IssueKind::MissingRequiredFile => "required file missing from archive".to_string(),
            IssueKind::MissingRequiredDir => "required directory has no entries".to_string(),
            IssueKind::EmptyCriticalFile => "critical file is empty".to_string(),
            IssueKind::ExcludedLeak { pattern } => {
                format!("entry matches exclude pattern '{}'", pattern)
            }
        }
    }
}

/// One finding, in detection order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(flatten)]
    pub kind: IssueKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Issue {
    fn new(kind: IssueKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: Some(path.into()),
        }
    }

    fn bare(kind: IssueKind) -> Self {
        Self { kind, path: None }
    }

    pub fn is_hard(&self) -> bool {
        self.kind.is_hard()
    }

    pub fn to_record(&self) -> Record {
        let level = if self.is_hard() {
            Level::Error
        } else {
            Level::Warning
        };
        let record = Record::new(level, Stage::Validate, self.kind.describe());
        match &self.path {
            Some(path) => record.with_path(path.clone()),
            None => record,
        }
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path, self.kind.describe()),
            None => write!(f, "{}", self.kind.describe()),
        }
    }
}

/// Result of auditing one archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub archive: PathBuf,

    /// True iff no hard error was recorded
    pub ok: bool,

    pub issues: Vec<Issue>,

    /// Number of entries, directories included
    pub entry_count: usize,

    /// Uncompressed size of all file entries
    pub total_size: u64,

    /// File entries per lower-cased extension
    pub file_types: BTreeMap<String, usize>,
}

impl ValidationReport {
    pub fn hard_errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.is_hard())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| !i.is_hard())
    }

    pub fn to_records(&self) -> Vec<Record> {
        self.issues.iter().map(Issue::to_record).collect()
    }
}

struct ArchiveEntry {
    name: String,
    size: u64,
    is_dir: bool,
}

/// Audit `archive_path` against `spec`
pub fn validate(archive_path: &Path, spec: &BuildSpec) -> Result<ValidationReport, ValidateError> {
    let entries = read_entries(archive_path)?;
    let issues = audit(&entries, spec);

    let mut file_types = BTreeMap::new();
    let mut total_size = 0;
    for entry in entries.iter().filter(|e| !e.is_dir) {
        *file_types.entry(extension_of(&entry.name)).or_insert(0) += 1;
        total_size += entry.size;
    }

    let ok = !issues.iter().any(Issue::is_hard);
    tracing::debug!(
        archive = %archive_path.display(),
        entries = entries.len(),
        issues = issues.len(),
        ok,
        "archive validated"
    );

    Ok(ValidationReport {
        archive: archive_path.to_path_buf(),
        ok,
        issues,
        entry_count: entries.len(),
        total_size,
        file_types,
    })
}

fn read_entries(archive_path: &Path) -> Result<Vec<ArchiveEntry>, ValidateError> {
    let open_err = |message: String| ValidateError::Open {
        path: archive_path.to_path_buf(),
        message,
    };
    let file = File::open(archive_path).map_err(|e| open_err(e.to_string()))?;
    let mut archive = ZipArchive::new(file).map_err(|e| open_err(e.to_string()))?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index).map_err(|e| ValidateError::Entry {
            path: archive_path.to_path_buf(),
            index,
            message: e.to_string(),
        })?;
        entries.push(ArchiveEntry {
            name: entry.name().to_string(),
            size: entry.size(),
            is_dir: entry.is_dir(),
        });
    }
    Ok(entries)
}

fn audit(entries: &[ArchiveEntry], spec: &BuildSpec) -> Vec<Issue> {
    let mut issues = Vec::new();

    if entries.is_empty() {
        issues.push(Issue::bare(IssueKind::EmptyArchive));
    }

    check_hygiene(entries, spec, &mut issues);

    let names: BTreeSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    for required in spec.required_archive_paths() {
        if !names.contains(required.as_str()) {
            issues.push(Issue::new(IssueKind::MissingRequiredFile, required));
        }
    }

    for prefix in spec.required_dir_prefixes() {
        let populated = entries
            .iter()
            .any(|e| e.name.starts_with(&prefix) && e.name.len() > prefix.len());
        if !populated {
            issues.push(Issue::new(IssueKind::MissingRequiredDir, prefix));
        }
    }

    for critical in spec.critical_archive_paths() {
        let empty = entries
            .iter()
            .any(|e| !e.is_dir && e.name == critical && e.size == 0);
        if empty {
            issues.push(Issue::new(IssueKind::EmptyCriticalFile, critical));
        }
    }

    check_leakage(entries, spec, &mut issues);

    issues
}

fn check_hygiene(entries: &[ArchiveEntry], spec: &BuildSpec, issues: &mut Vec<Issue>) {
    let cap = spec.max_reported_issues;
    let mut backslashes = 0usize;

    for entry in entries {
        let name = entry.name.as_str();

        if name.contains('\\') {
            backslashes += 1;
            if backslashes <= cap {
                issues.push(Issue::new(IssueKind::Backslash, name));
            }
        }

        // Judge layout on the slash form so a backslash entry is reported once
        let slashed = name.replace('\\', "/");
        if is_unsafe(&slashed) {
            issues.push(Issue::new(IssueKind::UnsafePath, name));
            continue;
        }
        if slashed.split('/').next() != Some(spec.plugin_name.as_str()) {
            issues.push(Issue::new(IssueKind::OutsideRoot, name));
        }
    }

    if backslashes > cap {
        issues.push(Issue::bare(IssueKind::BackslashOverflow {
            remaining: backslashes - cap,
        }));
    }
}

fn is_unsafe(name: &str) -> bool {
    if name.starts_with('/') {
        return true;
    }
    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return true;
    }
    name.split('/').any(|segment| segment == "..")
}

fn check_leakage(entries: &[ArchiveEntry], spec: &BuildSpec, issues: &mut Vec<Issue>) {
    let rules = ExcludeRules::from_spec(spec);
    if rules.is_empty() {
        return;
    }
    let root = format!("{}/", spec.plugin_name);

    for entry in entries {
        let relative = entry.name.strip_prefix(&root).unwrap_or(&entry.name);
        if relative.is_empty() {
            continue;
        }
        if let Some(pattern) = rules.matching_pattern(relative) {
            issues.push(Issue::new(
                IssueKind::ExcludedLeak {
                    pattern: pattern.to_string(),
                },
                entry.name.clone(),
            ));
        }
    }
}

/// Lower-cased extension of the last path segment
pub fn extension_of(name: &str) -> String {
    let file = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name);
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_lowercase(),
        _ => NO_EXTENSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn spec_with(overrides: serde_json::Value) -> BuildSpec {
        let mut value = json!({
            "plugin_name": "demo",
            "version": "1.0.0",
            "output_dir": "dist",
            "exclude_patterns": [".git", "*.tmp", "tests/"],
            "required_files": ["src/Core/Plugin.php"]
        });
        for (k, v) in overrides.as_object().unwrap() {
            value[k] = v.clone();
        }
        BuildSpec::from_value(&value, Path::new("/work/demo")).unwrap()
    }

    fn zip_with(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("demo.zip");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        for (name, contents) in entries {
            zip.start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    fn kinds(report: &ValidationReport) -> Vec<&IssueKind> {
        report.issues.iter().map(|i| &i.kind).collect()
    }

    #[test]
    fn test_clean_archive_passes() {
        let dir = TempDir::new().unwrap();
        let archive = zip_with(
            dir.path(),
            &[
                ("demo/src/Core/Activator.php", "<?php"),
                ("demo/src/Core/Plugin.php", "<?php"),
                ("demo/assets/app.js", "x"),
            ],
        );

        let report = validate(&archive, &spec_with(json!({}))).unwrap();

        assert!(report.ok);
        assert!(report.issues.is_empty());
        assert_eq!(report.entry_count, 3);
        assert_eq!(report.file_types.get("php"), Some(&2));
        assert_eq!(report.file_types.get("js"), Some(&1));
    }

    #[test]
    fn test_missing_required_file_is_hard_error() {
        let dir = TempDir::new().unwrap();
        let archive = zip_with(dir.path(), &[("demo/src/Core/Activator.php", "<?php")]);

        let report = validate(&archive, &spec_with(json!({}))).unwrap();

        assert!(!report.ok);
        assert_eq!(report.hard_errors().count(), 1);
        assert_eq!(
            report.issues[0].path.as_deref(),
            Some("demo/src/Core/Plugin.php")
        );
    }

    #[test]
    fn test_required_file_prefix_normalized() {
        let dir = TempDir::new().unwrap();
        let archive = zip_with(dir.path(), &[("demo/src/Core/Plugin.php", "<?php")]);
        let spec = spec_with(json!({"required_files": ["./demo/src/Core/Plugin.php"]}));

        assert!(validate(&archive, &spec).unwrap().ok);
    }

    #[test]
    fn test_backslash_entries_collected_up_to_cap() {
        let dir = TempDir::new().unwrap();
        let archive = zip_with(
            dir.path(),
            &[
                ("demo/src/Core/Plugin.php", "<?php"),
                ("demo\\a.php", "a"),
                ("demo\\b.php", "b"),
                ("demo\\c.php", "c"),
            ],
        );
        let spec = spec_with(json!({"max_reported_issues": 2}));

        let report = validate(&archive, &spec).unwrap();

        assert!(!report.ok);
        assert_eq!(
            kinds(&report),
            vec![
                &IssueKind::Backslash,
                &IssueKind::Backslash,
                &IssueKind::BackslashOverflow { remaining: 1 },
            ]
        );
    }

    #[test]
    fn test_entry_outside_root_is_hard_error() {
        let dir = TempDir::new().unwrap();
        let archive = zip_with(
            dir.path(),
            &[("demo/src/Core/Plugin.php", "<?php"), ("other/x.php", "x")],
        );

        let report = validate(&archive, &spec_with(json!({}))).unwrap();

        assert!(!report.ok);
        assert_eq!(kinds(&report), vec![&IssueKind::OutsideRoot]);
    }

    #[test]
    fn test_unsafe_names_are_hard_errors() {
        assert!(is_unsafe("/demo/a.php"));
        assert!(is_unsafe("C:/demo/a.php"));
        assert!(is_unsafe("demo/../etc/passwd"));
        assert!(!is_unsafe("demo/..hidden/a.php"));
        assert!(!is_unsafe("demo/src/a.php"));
    }

    #[test]
    fn test_empty_archive_is_hard_error() {
        let dir = TempDir::new().unwrap();
        let archive = zip_with(dir.path(), &[]);

        let report = validate(&archive, &spec_with(json!({"required_files": []}))).unwrap();

        assert!(!report.ok);
        assert_eq!(kinds(&report), vec![&IssueKind::EmptyArchive]);
    }

    #[test]
    fn test_required_dir_without_entries() {
        let dir = TempDir::new().unwrap();
        let archive = zip_with(
            dir.path(),
            &[("demo/src/Core/Plugin.php", "<?php"), ("demo/assetsx/a.js", "a")],
        );
        let spec = spec_with(json!({"required_dirs": ["src", "assets"]}));

        let report = validate(&archive, &spec).unwrap();

        assert!(!report.ok);
        let missing: Vec<_> = report.hard_errors().map(|i| i.path.as_deref()).collect();
        assert_eq!(missing, vec![Some("demo/assets/")]);
    }

    #[test]
    fn test_zero_byte_critical_file_is_warning() {
        let dir = TempDir::new().unwrap();
        let archive = zip_with(
            dir.path(),
            &[
                ("demo/src/Core/Activator.php", ""),
                ("demo/src/Core/Plugin.php", "<?php"),
            ],
        );
        let spec = spec_with(json!({"critical_files": ["src/Core/Activator.php", "src/Absent.php"]}));

        let report = validate(&archive, &spec).unwrap();

        assert!(report.ok);
        assert_eq!(report.warnings().count(), 1);
        assert_eq!(kinds(&report), vec![&IssueKind::EmptyCriticalFile]);
    }

    #[test]
    fn test_excluded_leak_is_warning() {
        let dir = TempDir::new().unwrap();
        let archive = zip_with(
            dir.path(),
            &[
                ("demo/src/Core/Plugin.php", "<?php"),
                ("demo/src/cache/a.tmp", "t"),
            ],
        );

        let report = validate(&archive, &spec_with(json!({}))).unwrap();

        assert!(report.ok);
        assert_eq!(
            kinds(&report),
            vec![&IssueKind::ExcludedLeak {
                pattern: "*.tmp".to_string()
            }]
        );
    }

    #[test]
    fn test_leak_check_follows_case_policy() {
        let dir = TempDir::new().unwrap();
        let archive = zip_with(
            dir.path(),
            &[
                ("demo/src/Core/Plugin.php", "<?php"),
                ("demo/src/Tests/Helper.php", "<?php"),
            ],
        );

        let sensitive = validate(&archive, &spec_with(json!({}))).unwrap();
        assert!(sensitive.issues.is_empty());

        let insensitive =
            validate(&archive, &spec_with(json!({"exclude_case_insensitive": true}))).unwrap();
        assert_eq!(insensitive.warnings().count(), 1);
    }

    #[test]
    fn test_unreadable_archive_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.zip");
        std::fs::write(&path, "not a zip").unwrap();

        let err = validate(&path, &spec_with(json!({}))).unwrap_err();
        assert!(matches!(err, ValidateError::Open { .. }));
        assert!(path.exists());
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("demo/src/a.PHP"), "php");
        assert_eq!(extension_of("demo/LICENSE"), NO_EXTENSION);
        assert_eq!(extension_of("demo/.htaccess"), NO_EXTENSION);
        assert_eq!(extension_of("demo/a.min.js"), "js");
    }

    #[test]
    fn test_issue_records() {
        let hard = Issue::new(IssueKind::MissingRequiredFile, "demo/readme.txt");
        let soft = Issue::new(IssueKind::EmptyCriticalFile, "demo/a.php");
        assert_eq!(hard.to_record().level, Level::Error);
        assert_eq!(soft.to_record().level, Level::Warning);
        assert_eq!(
            hard.to_string(),
            "demo/readme.txt: required file missing from archive"
        );
    }
}
