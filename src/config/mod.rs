//! Configuration cascade
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Default template (`.build/build.default.json`)
//! 3. Environment document (`.build/build.{environment}.json`)
//! 4. Local override (`.build/build.local.json`)
//! 5. Explicit document (`--config`)
//! 6. CLI overrides (`--version`, `--env`)

mod defaults;
mod effective;
mod merge;
mod spec;

pub use defaults::{BuiltinDefaults, DEFAULT_EXCLUDE_PATTERNS, DEFAULT_MAX_REPORTED_ISSUES};
pub use effective::{
    CascadeRequest, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, DEFAULT_CONFIG_DIR,
    DEFAULT_DOCUMENT, LOCAL_DOCUMENT,
};
pub use merge::{deep_merge, merge_layers};
pub use spec::{BuildSpec, Environment};
