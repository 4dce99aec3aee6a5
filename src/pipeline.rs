//! Build pipeline
//!
//! Cascade resolution, manifest construction, archive write and structural
//! validation, in that order. Any hard error stops the run at the stage that
//! found it; an archive that fails validation is deleted before returning.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{BuildSpec, CascadeRequest, EffectiveConfig, Environment};
use crate::error::{PackError, PackResult};
use crate::package::{build_manifest, write_archive, ArchiveHandle, Manifest};
use crate::report::{Record, Report, Stage};
use crate::validate::{extension_of, validate, ValidationReport};

/// Entries shown at each end of a manifest summary
pub const SUMMARY_SPAN: usize = 5;

/// Resolve the cascade and the typed specification in one step
pub fn resolve_spec(request: &CascadeRequest) -> PackResult<(EffectiveConfig, BuildSpec)> {
    let effective = EffectiveConfig::resolve(request)?;
    let spec = effective.to_build_spec(&request.root)?;
    Ok((effective, spec))
}

/// Pipeline options
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Stop after the manifest; never touch the output directory
    pub dry_run: bool,
}

/// Sorted-manifest summary for reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub files: usize,
    pub total_size: u64,
    pub head: Vec<String>,
    pub tail: Vec<String>,
    pub file_types: BTreeMap<String, usize>,
}

impl ManifestSummary {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let (head, tail) = manifest.head_tail(SUMMARY_SPAN);
        let mut file_types = BTreeMap::new();
        for path in manifest.archive_paths() {
            *file_types.entry(extension_of(path)).or_insert(0) += 1;
        }
        Self {
            files: manifest.len(),
            total_size: manifest.total_size(),
            head: head.iter().map(|e| e.archive_path.clone()).collect(),
            tail: tail.iter().map(|e| e.archive_path.clone()).collect(),
            file_types,
        }
    }
}

/// What a successful run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub plugin_name: String,
    pub version: String,
    pub environment: Environment,
    pub dry_run: bool,

    /// Final archive location, even for a dry run
    pub archive_path: PathBuf,

    pub summary: ManifestSummary,

    /// Every canonical path that was (or would be) written
    pub planned: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveHandle>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
}

/// One packaging run over a resolved specification
pub struct BuildPipeline<'a> {
    spec: &'a BuildSpec,
    options: BuildOptions,
    report: Report,
}

impl<'a> BuildPipeline<'a> {
    pub fn new(spec: &'a BuildSpec, options: BuildOptions) -> Self {
        Self {
            spec,
            options,
            report: Report::new(),
        }
    }

    /// Records gathered so far, including those from a failed run
    pub fn report(&self) -> &Report {
        &self.report
    }

    pub fn into_report(self) -> Report {
        self.report
    }

    pub fn run(&mut self) -> PackResult<BuildOutcome> {
        let spec = self.spec;
        let archive_path = spec.archive_path();
        tracing::info!(
            plugin = %spec.plugin_name,
            version = %spec.version,
            environment = spec.environment.as_str(),
            dry_run = self.options.dry_run,
            "starting build"
        );

        let outcome = build_manifest(spec)?;
        self.report.extend(outcome.report.records);
        let manifest = outcome.manifest;

        let mut result = BuildOutcome {
            plugin_name: spec.plugin_name.clone(),
            version: spec.version.clone(),
            environment: spec.environment,
            dry_run: self.options.dry_run,
            archive_path: archive_path.clone(),
            summary: ManifestSummary::from_manifest(&manifest),
            planned: manifest.archive_paths().map(str::to_string).collect(),
            archive: None,
            validation: None,
        };

        if self.options.dry_run {
            self.report.info(
                Stage::Archive,
                format!("dry run: {} entries not written", manifest.len()),
            );
            return Ok(result);
        }

        let handle = write_archive(&manifest, &archive_path)?;
        self.report.info(
            Stage::Archive,
            format!(
                "wrote {} entries ({} bytes) to {}",
                handle.entries.len(),
                handle.size_bytes,
                handle.path.display()
            ),
        );

        let validation = validate_and_retain(&archive_path, spec, &mut self.report)?;
        result.archive = Some(handle);
        result.validation = Some(validation);
        Ok(result)
    }
}

/// Validate a freshly built archive and delete it on any hard error.
///
/// Issues are appended to `report` in both cases.
pub fn validate_and_retain(
    archive_path: &Path,
    spec: &BuildSpec,
    report: &mut Report,
) -> PackResult<ValidationReport> {
    let validation = match validate(archive_path, spec) {
        Ok(validation) => validation,
        Err(e) => {
            discard(archive_path, report);
            return Err(e.into());
        }
    };
    report.extend(validation.to_records());

    if validation.ok {
        report.info(
            Stage::Validate,
            format!("validation passed ({} entries)", validation.entry_count),
        );
        return Ok(validation);
    }

    discard(archive_path, report);
    Err(PackError::ValidationFailure {
        archive: archive_path.to_path_buf(),
        issues: validation.hard_errors().cloned().collect(),
    })
}

fn discard(archive_path: &Path, report: &mut Report) {
    match fs::remove_file(archive_path) {
        Ok(()) => {
            tracing::warn!(path = %archive_path.display(), "archive deleted after failed validation");
            report.info(Stage::Validate, format!("deleted {}", archive_path.display()));
        }
        Err(e) => report.warn(
            Stage::Validate,
            format!("could not delete failed archive: {}", e),
            archive_path.display().to_string(),
        ),
    }
}

/// Machine-readable summary of a whole invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub ok: bool,
    pub exit_code: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_digest: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<BuildOutcome>,

    pub records: Vec<Record>,
}

impl BuildReport {
    pub fn new(
        result: &PackResult<BuildOutcome>,
        spec_digest: Option<String>,
        records: Vec<Record>,
    ) -> Self {
        match result {
            Ok(outcome) => Self {
                ok: true,
                exit_code: 0,
                error: None,
                spec_digest,
                outcome: Some(outcome.clone()),
                records,
            },
            Err(e) => Self {
                ok: false,
                exit_code: e.exit_code().as_i32(),
                error: Some(e.to_string()),
                spec_digest,
                outcome: None,
                records,
            },
        }
    }
}
