//! Cascade resolution with provenance
//!
//! The effective configuration is the merge of every contributing layer plus
//! a record of where each layer came from.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::spec::{BuildSpec, Environment};

/// Schema version for the effective configuration document
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "plugpack/effective_config@1";

/// Directory (relative to the build root) searched for cascade documents
pub const DEFAULT_CONFIG_DIR: &str = ".build";

/// Mandatory default template
pub const DEFAULT_DOCUMENT: &str = "build.default.json";

/// Local, uncommitted override
pub const LOCAL_DOCUMENT: &str = "build.local.json";

/// Origin of a configuration layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Default,
    Environment,
    Local,
    Explicit,
    Cli,
}

/// A contributing layer with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// What the caller wants resolved
#[derive(Debug, Clone)]
pub struct CascadeRequest {
    /// Fixed build root
    pub root: PathBuf,

    /// Where cascade documents live (default: `{root}/.build`)
    pub config_dir: Option<PathBuf>,

    /// Explicitly named document (`--config`)
    pub explicit: Option<PathBuf>,

    /// Environment override (`--env`)
    pub environment: Option<Environment>,

    /// Version override (`--version`)
    pub version: Option<String>,

    /// Fail when the default template is absent
    pub require_default: bool,
}

impl CascadeRequest {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config_dir: None,
            explicit: None,
            environment: None,
            version: None,
            require_default: true,
        }
    }

    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    pub fn with_explicit(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_require_default(mut self, required: bool) -> Self {
        self.require_default = required;
        self
    }

    fn config_dir(&self) -> PathBuf {
        match &self.config_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.root.join(dir),
            None => self.root.join(DEFAULT_CONFIG_DIR),
        }
    }

    fn cli_overrides(&self) -> Option<Value> {
        let mut map = serde_json::Map::new();
        if let Some(version) = &self.version {
            map.insert("version".to_string(), Value::String(version.clone()));
        }
        if let Some(environment) = self.environment {
            map.insert(
                "environment".to_string(),
                Value::String(environment.as_str().to_string()),
            );
        }
        if map.is_empty() {
            None
        } else {
            Some(Value::Object(map))
        }
    }
}

/// Effective configuration with full provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,
    pub schema_id: String,

    /// The merged configuration object
    pub config: Value,

    /// Contributing layers in precedence order
    pub sources: Vec<ConfigSource>,

    /// SHA-256 of the RFC 8785 canonical form of `config`
    pub spec_digest: String,
}

impl EffectiveConfig {
    /// Resolve the cascade described by `request`.
    ///
    /// Layers: builtin, default, environment, local, explicit, cli.
    /// Absent optional documents are skipped.
    pub fn resolve(request: &CascadeRequest) -> Result<Self, ConfigError> {
        let config_dir = request.config_dir();
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        layers.push(BuiltinDefaults::default().to_value());
        sources.push(ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        });

        let default_path = config_dir.join(DEFAULT_DOCUMENT);
        let default_doc = if default_path.is_file() {
            Some(Self::push_document(
                &default_path,
                ConfigOrigin::Default,
                &mut layers,
                &mut sources,
            )?)
        } else if request.require_default {
            return Err(ConfigError::MissingDefault { path: default_path });
        } else {
            tracing::debug!(path = %default_path.display(), "default template absent, using builtins");
            None
        };

        let environment = match request.environment {
            Some(env) => env,
            None => match default_doc
                .as_ref()
                .and_then(|doc| doc.get("environment"))
                .and_then(Value::as_str)
            {
                Some(raw) => Environment::parse(raw)?,
                None => Environment::default(),
            },
        };

        let env_path = config_dir.join(format!("build.{}.json", environment.as_str()));
        if env_path.is_file() {
            Self::push_document(&env_path, ConfigOrigin::Environment, &mut layers, &mut sources)?;
        }

        let local_path = config_dir.join(LOCAL_DOCUMENT);
        if local_path.is_file() {
            Self::push_document(&local_path, ConfigOrigin::Local, &mut layers, &mut sources)?;
        }

        if let Some(explicit) = &request.explicit {
            let path = if explicit.is_absolute() {
                explicit.clone()
            } else {
                request.root.join(explicit)
            };
            if path.is_file() {
                Self::push_document(&path, ConfigOrigin::Explicit, &mut layers, &mut sources)?;
            } else {
                tracing::debug!(path = %path.display(), "explicit document absent, skipped");
            }
        }

        if let Some(cli) = request.cli_overrides() {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(&layers);
        let spec_digest = Self::canonical_digest(&merged)?;

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            config: merged,
            sources,
            spec_digest,
        })
    }

    /// Type and validate the merged document.
    pub fn to_build_spec(&self, root: &Path) -> Result<BuildSpec, ConfigError> {
        BuildSpec::from_value(&self.config, root)
    }

    fn push_document(
        path: &Path,
        origin: ConfigOrigin,
        layers: &mut Vec<Value>,
        sources: &mut Vec<ConfigSource>,
    ) -> Result<Value, ConfigError> {
        let (value, digest) = Self::load_document(path)?;
        tracing::debug!(path = %path.display(), origin = ?origin, "loaded config layer");
        layers.push(value.clone());
        sources.push(ConfigSource {
            origin,
            path: Some(path.to_string_lossy().to_string()),
            digest: Some(digest),
        });
        Ok(value)
    }

    /// Load a JSON or TOML document, returning the value and the digest of its bytes
    pub fn load_document(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: format!("invalid UTF-8: {}", e),
        })?;

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let value = if is_toml {
            let toml_value: toml::Value =
                toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: format!("TOML parse error: {}", e),
                })?;
            Self::toml_to_json(toml_value)
        } else {
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: format!("JSON parse error: {}", e),
            })?
        };

        if !value.is_object() {
            return Err(ConfigError::Parse {
                path: path.to_path_buf(),
                message: "document root must be an object".to_string(),
            });
        }

        Ok((value, digest))
    }

    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Self::toml_to_json).collect())
            }
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
        }
    }

    fn canonical_digest(value: &Value) -> Result<String, ConfigError> {
        let jcs = serde_json_canonicalizer::to_vec(value)
            .map_err(|e| ConfigError::Canonicalize(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(&jcs);
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON serialization failed: {}", e),
            )
        })?;
        fs::write(path, json)
    }

    /// Get a config value by dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("cannot parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("default configuration not found: {path}")]
    MissingDefault { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("canonicalization failed: {0}")]
    Canonicalize(String),
}
