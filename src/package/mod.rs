//! Deterministic packaging
//!
//! Turns a [`BuildSpec`](crate::config::BuildSpec) into a sorted manifest and
//! writes it to a zip archive whose entries all live under a single
//! `{plugin_name}/` root with `/` separators.

mod exclude;
mod manifest;
mod writer;

pub use exclude::{excluded, normalize_separators, ExcludeRules, MatchPolicy};
pub use manifest::{
    build_manifest, resolve_relative, to_slash, Manifest, ManifestEntry, ManifestError,
    ManifestOutcome,
};
pub use writer::{write_archive, ArchiveHandle, PackagingError};
