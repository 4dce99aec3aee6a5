//! Archive materialization
//!
//! Writes a manifest into a zip archive with canonical entry names, a fixed
//! timestamp and fixed permissions, so identical sources give identical bytes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::manifest::Manifest;

/// Permissions stored on every entry
const ENTRY_MODE: u32 = 0o644;

/// Suffix of the in-progress file next to the destination
const PARTIAL_SUFFIX: &str = ".partial";

/// What the writer produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveHandle {
    pub path: PathBuf,

    /// Entry names in write order
    pub entries: Vec<String>,

    pub size_bytes: u64,

    /// SHA-256 of the archive bytes
    pub sha256: String,
}

/// Packaging errors
#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error("cannot create output directory {path}: {message}")]
    OutputDir { path: PathBuf, message: String },

    #[error("cannot remove stale archive {path}: {message}")]
    StaleArchive { path: PathBuf, message: String },

    #[error("source file unreadable: {path}: {message}")]
    SourceUnreadable { path: PathBuf, message: String },

    #[error("cannot write archive {path}: {message}")]
    Write { path: PathBuf, message: String },
}

impl PackagingError {
    fn write(path: &Path, err: impl std::fmt::Display) -> Self {
        PackagingError::Write {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Write `manifest` to `destination`.
///
/// Any existing file at `destination` is removed first. Nothing is left
/// behind on failure.
pub fn write_archive(manifest: &Manifest, destination: &Path) -> Result<ArchiveHandle, PackagingError> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| PackagingError::OutputDir {
                path: parent.to_path_buf(),
                message: e.to_string(),
            })?;
        }
    }

    if destination.exists() {
        fs::remove_file(destination).map_err(|e| PackagingError::StaleArchive {
            path: destination.to_path_buf(),
            message: e.to_string(),
        })?;
        tracing::debug!(path = %destination.display(), "removed stale archive");
    }

    let partial = partial_path(destination);
    let entries = match write_entries(manifest, &partial) {
        Ok(entries) => entries,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&partial, destination) {
        let _ = fs::remove_file(&partial);
        return Err(PackagingError::write(destination, e));
    }

    let bytes = fs::read(destination).map_err(|e| PackagingError::write(destination, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);

    Ok(ArchiveHandle {
        path: destination.to_path_buf(),
        entries,
        size_bytes: bytes.len() as u64,
        sha256: hex::encode(hasher.finalize()),
    })
}

fn write_entries(manifest: &Manifest, target: &Path) -> Result<Vec<String>, PackagingError> {
    let file = File::create(target).map_err(|e| PackagingError::write(target, e))?;
    let mut zip = ZipWriter::new(file);

    // DateTime::default() is 1980-01-01 00:00:00, the zip epoch
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(ENTRY_MODE);

    let mut written = Vec::with_capacity(manifest.len());
    for entry in &manifest.entries {
        let contents = read_source(&entry.source)?;

        zip.start_file(entry.archive_path.clone(), options)
            .map_err(|e| PackagingError::write(target, e))?;
        zip.write_all(&contents)
            .map_err(|e| PackagingError::write(target, e))?;

        written.push(entry.archive_path.clone());
    }

    zip.finish().map_err(|e| PackagingError::write(target, e))?;
    Ok(written)
}

fn read_source(path: &Path) -> Result<Vec<u8>, PackagingError> {
    let unreadable = |message: String| PackagingError::SourceUnreadable {
        path: path.to_path_buf(),
        message,
    };
    let metadata = fs::metadata(path).map_err(|e| unreadable(e.to_string()))?;
    if !metadata.is_file() {
        return Err(unreadable("no longer a regular file".to_string()));
    }
    fs::read(path).map_err(|e| unreadable(e.to_string()))
}

pub(super) fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    destination.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::ManifestEntry;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn manifest_in(dir: &Path, files: &[(&str, &str)]) -> Manifest {
        let mut entries: Vec<ManifestEntry> = files
            .iter()
            .map(|(rel, contents)| {
                let source = dir.join(rel);
                fs::create_dir_all(source.parent().unwrap()).unwrap();
                fs::write(&source, contents).unwrap();
                ManifestEntry {
                    source,
                    relative_path: rel.to_string(),
                    archive_path: format!("demo/{}", rel),
                    size: contents.len() as u64,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.archive_path.cmp(&b.archive_path));
        Manifest { entries }
    }

    #[test]
    fn test_writes_entries_in_manifest_order() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let manifest = manifest_in(src.path(), &[("src/b.php", "b"), ("assets/a.js", "a")]);
        let dest = out.path().join("nested/dist/demo-v1.zip");

        let handle = write_archive(&manifest, &dest).unwrap();

        assert_eq!(handle.entries, vec!["demo/assets/a.js", "demo/src/b.php"]);
        assert_eq!(handle.size_bytes, fs::metadata(&dest).unwrap().len());
        assert_eq!(handle.sha256.len(), 64);

        let mut archive = ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let mut contents = String::new();
        archive
            .by_name("demo/src/b.php")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "b");
        assert_eq!(archive.by_index(0).unwrap().name(), "demo/assets/a.js");
    }

    #[test]
    fn test_identical_input_gives_identical_bytes() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let manifest = manifest_in(src.path(), &[("src/a.php", "<?php echo 1;"), ("readme.txt", "r")]);

        let first = write_archive(&manifest, &out.path().join("one.zip")).unwrap();
        let second = write_archive(&manifest, &out.path().join("two.zip")).unwrap();

        assert_eq!(first.sha256, second.sha256);
        assert_eq!(
            fs::read(out.path().join("one.zip")).unwrap(),
            fs::read(out.path().join("two.zip")).unwrap()
        );
    }

    #[test]
    fn test_stale_archive_replaced() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let dest = out.path().join("demo.zip");
        fs::write(&dest, "stale bytes that are not a zip").unwrap();

        let manifest = manifest_in(src.path(), &[("a.php", "a")]);
        let handle = write_archive(&manifest, &dest).unwrap();

        assert_eq!(handle.entries, vec!["demo/a.php"]);
        assert!(ZipArchive::new(File::open(&dest).unwrap()).is_ok());
    }

    #[test]
    fn test_vanished_source_leaves_nothing_behind() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let manifest = manifest_in(src.path(), &[("a.php", "a"), ("b.php", "b")]);
        fs::remove_file(src.path().join("b.php")).unwrap();
        let dest = out.path().join("demo.zip");

        let err = write_archive(&manifest, &dest).unwrap_err();

        match err {
            PackagingError::SourceUnreadable { path, .. } => assert!(path.ends_with("b.php")),
            other => panic!("expected SourceUnreadable, got {:?}", other),
        }
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn test_entry_metadata_normalized() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let manifest = manifest_in(src.path(), &[("a.php", "a")]);
        let dest = out.path().join("demo.zip");
        write_archive(&manifest, &dest).unwrap();

        let mut archive = ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let entry = archive.by_index(0).unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Deflated);
        assert_eq!(entry.unix_mode().map(|m| m & 0o777), Some(ENTRY_MODE));
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/out/demo-v1.zip")),
            PathBuf::from("/out/demo-v1.zip.partial")
        );
    }
}
