//! Manifest construction
//!
//! Walks the declared include targets under the build root and produces the
//! sorted list of (source file, canonical archive path) pairs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use super::exclude::{normalize_separators, ExcludeRules};
use super::writer::partial_path;
use crate::config::BuildSpec;
use crate::report::{Report, Stage};

/// One file to package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Absolute source path
    pub source: PathBuf,

    /// Path relative to the build root, `/` separated
    pub relative_path: String,

    /// `{plugin_name}/{relative_path}`
    pub archive_path: String,

    /// Size observed while walking
    pub size: u64,
}

/// Sorted, duplicate-free packaging list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn archive_paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.archive_path.as_str())
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// First `n` and last `n` entries; the tail is empty when they would overlap
    pub fn head_tail(&self, n: usize) -> (&[ManifestEntry], &[ManifestEntry]) {
        if self.entries.len() <= n * 2 {
            (&self.entries[..], &[])
        } else {
            (
                &self.entries[..n],
                &self.entries[self.entries.len() - n..],
            )
        }
    }
}

/// Manifest plus the records gathered while building it
#[derive(Debug)]
pub struct ManifestOutcome {
    pub manifest: Manifest,
    pub report: Report,
}

/// Manifest construction errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("include path escapes the build root: {path}")]
    EscapesRoot { path: String },

    #[error("symlink escapes the build root: {path}")]
    SymlinkEscapesRoot { path: PathBuf },

    #[error("duplicate archive path {archive_path} (from {first} and {second})")]
    DuplicatePath {
        archive_path: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("required source file missing: {path}")]
    MissingRequired { path: String },

    #[error("cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl ManifestError {
    fn io(path: &Path, err: impl std::fmt::Display) -> Self {
        ManifestError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Build the manifest for `spec`.
///
/// Deterministic for a fixed filesystem state: output order depends only on
/// canonical archive paths.
pub fn build_manifest(spec: &BuildSpec) -> Result<ManifestOutcome, ManifestError> {
    ManifestBuilder::new(spec)?.build()
}

struct ManifestBuilder<'a> {
    spec: &'a BuildSpec,
    rules: ExcludeRules,
    canonical_root: PathBuf,
    output: BuildOutput,
    entries: BTreeMap<String, ManifestEntry>,
    report: Report,
}

/// Where this build writes, relative to the root, so the walk never packages
/// its own output
#[derive(Debug, Clone)]
struct BuildOutput {
    dir: Option<PathBuf>,
    files: Vec<PathBuf>,
}

impl BuildOutput {
    fn locate(spec: &BuildSpec, canonical_root: &Path) -> Self {
        let output_dir = spec.output_dir();
        let dir = resolve_relative(&spec.root, &output_dir.to_string_lossy())
            .ok()
            .or_else(|| {
                let canonical = output_dir.canonicalize().ok()?;
                canonical.strip_prefix(canonical_root).ok().map(Path::to_path_buf)
            });
        let files = match &dir {
            Some(dir) => {
                let archive = dir.join(spec.archive_file_name());
                vec![partial_path(&archive), archive]
            }
            None => Vec::new(),
        };
        Self { dir, files }
    }

    /// True for the output directory and anything below it. An output
    /// directory equal to the root is never pruned as a whole.
    fn contains_dir(&self, rel_dir: &Path) -> bool {
        match &self.dir {
            Some(dir) if !dir.as_os_str().is_empty() => rel_dir.starts_with(dir),
            _ => false,
        }
    }

    fn contains_file(&self, rel_file: &Path) -> bool {
        self.files.iter().any(|f| f == rel_file)
            || rel_file.parent().is_some_and(|parent| self.contains_dir(parent))
    }
}

impl<'a> ManifestBuilder<'a> {
    fn new(spec: &'a BuildSpec) -> Result<Self, ManifestError> {
        let canonical_root = spec
            .root
            .canonicalize()
            .map_err(|e| ManifestError::io(&spec.root, e))?;
        let output = BuildOutput::locate(spec, &canonical_root);
        Ok(Self {
            spec,
            rules: ExcludeRules::from_spec(spec),
            canonical_root,
            output,
            entries: BTreeMap::new(),
            report: Report::new(),
        })
    }

    fn build(mut self) -> Result<ManifestOutcome, ManifestError> {
        let spec = self.spec;
        self.check_required_sources()?;

        for dir in &spec.include_dirs {
            self.collect_dir(dir)?;
        }
        for file in &spec.include_files {
            self.collect_file(file)?;
        }

        let manifest = Manifest {
            entries: self.entries.into_values().collect(),
        };
        tracing::debug!(files = manifest.len(), bytes = manifest.total_size(), "manifest built");
        self.report.info(
            Stage::Manifest,
            format!(
                "collected {} files ({} bytes)",
                manifest.len(),
                manifest.total_size()
            ),
        );

        Ok(ManifestOutcome {
            manifest,
            report: self.report,
        })
    }

    fn check_required_sources(&mut self) -> Result<(), ManifestError> {
        let spec = self.spec;
        for required in &spec.required_files {
            let rel = resolve_relative(&spec.root, &spec.normalize_relative(required))?;
            if spec.root.join(&rel).is_file() {
                continue;
            }
            let shown = to_slash(&rel);
            if spec.fail_on_missing {
                return Err(ManifestError::MissingRequired { path: shown });
            }
            self.report
                .warn(Stage::Manifest, "required file missing from source tree", shown);
        }
        Ok(())
    }

    fn collect_dir(&mut self, declared: &str) -> Result<(), ManifestError> {
        let rel = resolve_relative(&self.spec.root, declared)?;
        let abs = self.spec.root.join(&rel);

        if !abs.exists() {
            self.report
                .warn(Stage::Manifest, "include directory not found, skipped", declared);
            return Ok(());
        }
        if !abs.is_dir() {
            self.report
                .warn(Stage::Manifest, "include directory is not a directory, skipped", declared);
            return Ok(());
        }
        let canonical = abs.canonicalize().map_err(|e| ManifestError::io(&abs, e))?;
        if !canonical.starts_with(&self.canonical_root) {
            return Err(ManifestError::SymlinkEscapesRoot { path: abs });
        }
        if !rel.as_os_str().is_empty() && self.rules.is_excluded_dir(&rel) {
            tracing::debug!(dir = declared, "include directory matches an exclusion");
            return Ok(());
        }
        if self.output.contains_dir(&rel) {
            tracing::debug!(dir = declared, "include directory is the output directory");
            return Ok(());
        }

        let root = self.spec.root.clone();
        let rules = self.rules.clone();
        let output = self.output.clone();
        let walker = WalkDir::new(&abs)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                match entry.path().strip_prefix(&root) {
                    Ok(rel_dir) => !rules.is_excluded_dir(rel_dir) && !output.contains_dir(rel_dir),
                    Err(_) => true,
                }
            });

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| abs.clone());
                ManifestError::io(&path, e)
            })?;
            if entry.depth() == 0 || entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            let rel_file = path
                .strip_prefix(&self.spec.root)
                .map_err(|_| ManifestError::EscapesRoot {
                    path: path.display().to_string(),
                })?;

            if self.rules.is_excluded_file(rel_file) {
                tracing::trace!(path = %rel_file.display(), "excluded");
                continue;
            }
            if self.output.contains_file(rel_file) {
                tracing::trace!(path = %rel_file.display(), "build output skipped");
                continue;
            }

            if entry.file_type().is_symlink() {
                self.collect_symlink(path, rel_file)?;
                continue;
            }

            let size = entry.metadata().map_err(|e| ManifestError::io(path, e))?.len();
            self.insert(path.to_path_buf(), to_slash(rel_file), size)?;
        }

        Ok(())
    }

    fn collect_file(&mut self, declared: &str) -> Result<(), ManifestError> {
        let rel = resolve_relative(&self.spec.root, declared)?;
        let abs = self.spec.root.join(&rel);
        let rel_str = to_slash(&rel);

        if !abs.exists() {
            if self.spec.is_required(&rel_str) {
                return Err(ManifestError::MissingRequired { path: rel_str });
            }
            self.report
                .warn(Stage::Manifest, "include file not found, skipped", declared);
            return Ok(());
        }
        if !abs.is_file() {
            self.report
                .warn(Stage::Manifest, "include file is not a regular file, skipped", declared);
            return Ok(());
        }
        if self.rules.is_excluded_file(&rel) {
            self.report
                .warn(Stage::Manifest, "include file matches an exclusion, skipped", declared);
            return Ok(());
        }

        let canonical = abs.canonicalize().map_err(|e| ManifestError::io(&abs, e))?;
        if !canonical.starts_with(&self.canonical_root) {
            return Err(ManifestError::SymlinkEscapesRoot { path: abs });
        }

        let size = fs::metadata(&abs).map_err(|e| ManifestError::io(&abs, e))?.len();
        self.insert(abs, rel_str, size)
    }

    fn collect_symlink(&mut self, path: &Path, rel_file: &Path) -> Result<(), ManifestError> {
        let target = match path.canonicalize() {
            Ok(target) => target,
            Err(_) => {
                self.report
                    .warn(Stage::Manifest, "dangling symlink skipped", to_slash(rel_file));
                return Ok(());
            }
        };
        if !target.starts_with(&self.canonical_root) {
            return Err(ManifestError::SymlinkEscapesRoot {
                path: path.to_path_buf(),
            });
        }
        if target.is_dir() {
            self.report
                .warn(Stage::Manifest, "symlinked directory skipped", to_slash(rel_file));
            return Ok(());
        }
        let size = fs::metadata(&target).map_err(|e| ManifestError::io(&target, e))?.len();
        self.insert(path.to_path_buf(), to_slash(rel_file), size)
    }

    fn insert(&mut self, source: PathBuf, relative_path: String, size: u64) -> Result<(), ManifestError> {
        // Components may still carry `\` inside a file name
        let relative_path = normalize_separators(&relative_path);
        let archive_path = format!("{}/{}", self.spec.plugin_name, relative_path);
        if let Some(existing) = self.entries.get(&archive_path) {
            return Err(ManifestError::DuplicatePath {
                archive_path,
                first: existing.source.clone(),
                second: source,
            });
        }
        self.entries.insert(
            archive_path.clone(),
            ManifestEntry {
                source,
                relative_path,
                archive_path,
                size,
            },
        );
        Ok(())
    }
}

/// Lexically resolve a declared include path to a path relative to `root`.
///
/// `..` may not climb above the root; absolute paths must lie under it;
/// drive-letter prefixes are rejected.
pub fn resolve_relative(root: &Path, declared: &str) -> Result<PathBuf, ManifestError> {
    let escapes = || ManifestError::EscapesRoot {
        path: declared.to_string(),
    };
    let normalized = declared.replace('\\', "/");
    let declared_path = Path::new(&normalized);

    let relative = if declared_path.is_absolute() {
        declared_path.strip_prefix(root).map_err(|_| escapes())?
    } else {
        declared_path
    };

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for (index, component) in relative.components().enumerate() {
        match component {
            Component::Normal(part) => {
                if index == 0 && is_drive_letter(&part.to_string_lossy()) {
                    return Err(escapes());
                }
                parts.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(escapes());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escapes()),
        }
    }

    Ok(parts.into_iter().collect())
}

fn is_drive_letter(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Join path components with `/`
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
