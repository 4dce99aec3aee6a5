//! plugpack - deterministic plugin archive builder
//!
//! Resolves a layered build configuration, collects the declared source
//! files into a sorted manifest, writes a reproducible zip archive under a
//! single `{plugin_name}/` root and audits the result before accepting it.

pub mod config;
pub mod error;
pub mod package;
pub mod pipeline;
pub mod release;
pub mod report;
pub mod validate;

pub use config::{BuildSpec, CascadeRequest, ConfigError, EffectiveConfig, Environment};
pub use error::{ExitCode, PackError, PackResult};
pub use package::{build_manifest, excluded, write_archive, ArchiveHandle, Manifest, ManifestError, PackagingError};
pub use pipeline::{resolve_spec, validate_and_retain, BuildOptions, BuildOutcome, BuildPipeline, BuildReport};
pub use report::{Level, Record, Report, Stage};
pub use validate::{validate, Issue, IssueKind, ValidateError, ValidationReport};
