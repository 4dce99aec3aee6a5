//! Release-history collaborator
//!
//! After a successful build the caller may record the release in a markdown
//! update log. Failures here are reported as warnings and never change the
//! build outcome.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::report::{Report, Stage};

/// Lines searched below a table header for its separator
const SEPARATOR_WINDOW: usize = 10;

/// Release category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Fix,
    Feature,
    Enhancement,
    Performance,
    Documentation,
    Security,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Fix => "fix",
            ChangeType::Feature => "feature",
            ChangeType::Enhancement => "enhancement",
            ChangeType::Performance => "performance",
            ChangeType::Documentation => "documentation",
            ChangeType::Security => "security",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            ChangeType::Fix => "🛠️",
            ChangeType::Feature => "✨",
            ChangeType::Enhancement => "🔧",
            ChangeType::Performance => "🚀",
            ChangeType::Documentation => "📝",
            ChangeType::Security => "🔒",
        }
    }
}

impl std::str::FromStr for ChangeType {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fix" => Ok(ChangeType::Fix),
            "feature" => Ok(ChangeType::Feature),
            "enhancement" => Ok(ChangeType::Enhancement),
            "performance" => Ok(ChangeType::Performance),
            "documentation" => Ok(ChangeType::Documentation),
            "security" => Ok(ChangeType::Security),
            _ => Err(ReleaseError::UnknownChangeType(s.to_string())),
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Release-history errors
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("unknown change type '{0}' (expected fix, feature, enhancement, performance, documentation or security)")]
    UnknownChangeType(String),

    #[error("no release table with Version and Date columns in {path}")]
    MissingTable { path: String },

    #[error("cannot access {path}: {message}")]
    Io { path: PathBuf, message: String },
}

/// One row of the release history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub version: String,
    pub summary: String,
    pub change_type: ChangeType,
    pub date: NaiveDate,

    /// Repository URL used to link the release tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

impl ChangelogEntry {
    /// Entry dated today in local time
    pub fn new(version: impl Into<String>, summary: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            version: version.into(),
            summary: summary.into(),
            change_type,
            date: chrono::Local::now().date_naive(),
            repository: None,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    pub fn with_repository(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.repository = Some(url.trim_end_matches('/').to_string());
        self
    }

    pub fn render_row(&self) -> String {
        let version = match &self.repository {
            Some(repo) => format!("[v{v}]({repo}/releases/tag/v{v})", v = self.version, repo = repo),
            None => format!("v{}", self.version),
        };
        format!(
            "| {} | {} | {} **{}**: {} |",
            version,
            self.date.format("%Y-%m-%d"),
            self.change_type.icon(),
            self.change_type.as_str(),
            self.summary
        )
    }
}

/// Destination for release-history rows
pub trait ChangelogSink {
    fn record(&mut self, entry: &ChangelogEntry) -> Result<(), ReleaseError>;
}

/// Markdown update log with a `| Version | Date | ... |` table
#[derive(Debug, Clone)]
pub struct MarkdownLogSink {
    path: PathBuf,
}

impl MarkdownLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChangelogSink for MarkdownLogSink {
    fn record(&mut self, entry: &ChangelogEntry) -> Result<(), ReleaseError> {
        let io_err = |e: std::io::Error| ReleaseError::Io {
            path: self.path.clone(),
            message: e.to_string(),
        };
        let document = fs::read_to_string(&self.path).map_err(io_err)?;
        let updated = insert_release_row(&document, &entry.render_row()).ok_or_else(|| {
            ReleaseError::MissingTable {
                path: self.path.display().to_string(),
            }
        })?;
        fs::write(&self.path, updated).map_err(io_err)?;
        tracing::debug!(path = %self.path.display(), version = %entry.version, "release row recorded");
        Ok(())
    }
}

/// Insert `row` directly below the separator of the first release table.
///
/// Returns `None` when no table header with `Version` and `Date` columns is
/// followed by a `|---` separator.
pub fn insert_release_row(document: &str, row: &str) -> Option<String> {
    let lines: Vec<&str> = document.split('\n').collect();

    let header = lines.iter().position(|line| {
        let line = line.trim();
        line.starts_with('|') && line.contains("Version") && line.contains("Date")
    })?;
    let separator = lines
        .iter()
        .enumerate()
        .skip(header + 1)
        .take(SEPARATOR_WINDOW)
        .find(|(_, line)| line.trim_start().starts_with("|") && line.contains("---"))
        .map(|(i, _)| i)?;

    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 1);
    out.extend_from_slice(&lines[..=separator]);
    out.push(row);
    out.extend_from_slice(&lines[separator + 1..]);
    Some(out.join("\n"))
}

/// Record `entry` in `sink`, turning failure into a warning.
///
/// Returns whether the row was recorded.
pub fn publish(sink: &mut dyn ChangelogSink, entry: &ChangelogEntry, report: &mut Report) -> bool {
    match sink.record(entry) {
        Ok(()) => {
            report.info(Stage::Changelog, format!("recorded release v{}", entry.version));
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "changelog update failed");
            report.warn(Stage::Changelog, "changelog update failed", e.to_string());
            false
        }
    }
}
