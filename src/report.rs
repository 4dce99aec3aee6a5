//! Structured build records
//!
//! Stages return records instead of printing; the binary decides how to
//! render them.

use serde::{Deserialize, Serialize};

/// Severity of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// Pipeline stage that produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Config,
    Manifest,
    Archive,
    Validate,
    Changelog,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Manifest => "manifest",
            Stage::Archive => "archive",
            Stage::Validate => "validate",
            Stage::Changelog => "changelog",
        }
    }
}

/// One reported fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub level: Level,
    pub stage: Stage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Record {
    pub fn new(level: Level, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            level,
            stage,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn is_warning(&self) -> bool {
        self.level == Level::Warning
    }

    pub fn is_error(&self) -> bool {
        self.level == Level::Error
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "[{}] {}: {}", self.stage.as_str(), self.message, path),
            None => write!(f, "[{}] {}", self.stage.as_str(), self.message),
        }
    }
}

/// Ordered record accumulator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    pub records: Vec<Record>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn info(&mut self, stage: Stage, message: impl Into<String>) {
        self.push(Record::new(Level::Info, stage, message));
    }

    pub fn warn(&mut self, stage: Stage, message: impl Into<String>, path: impl Into<String>) {
        self.push(Record::new(Level::Warning, stage, message).with_path(path));
    }

    pub fn error(&mut self, stage: Stage, message: impl Into<String>, path: impl Into<String>) {
        self.push(Record::new(Level::Error, stage, message).with_path(path));
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = Record>) {
        self.records.extend(records);
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| r.is_warning())
    }

    pub fn errors(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| r.is_error())
    }

    pub fn has_errors(&self) -> bool {
        self.records.iter().any(Record::is_error)
    }
}
