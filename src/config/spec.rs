//! Typed build specification
//!
//! Produced once per build from the merged cascade and only ever borrowed
//! afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::defaults::DEFAULT_MAX_REPORTED_ISSUES;
use super::effective::ConfigError;

/// Build environment; only changes the output filename
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Development => "development",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw {
            "production" => Ok(Environment::Production),
            "development" => Ok(Environment::Development),
            other => Err(ConfigError::Invalid(format!(
                "environment must be 'production' or 'development', got '{}'",
                other
            ))),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Environment::parse(s)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_reported() -> usize {
    DEFAULT_MAX_REPORTED_ISSUES
}

/// The resolved configuration for one packaging run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Archive root directory name
    pub plugin_name: String,

    /// Caller-supplied version, only checked for presence
    pub version: String,

    #[serde(default)]
    pub environment: Environment,

    /// Destination directory; relative paths are taken from the build root
    pub output_dir: PathBuf,

    #[serde(default)]
    pub include_dirs: Vec<String>,

    #[serde(default)]
    pub include_files: Vec<String>,

    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Paths (relative to the package root) that must be in the archive
    #[serde(default)]
    pub required_files: Vec<String>,

    /// Directory prefixes that must hold at least one entry
    #[serde(default)]
    pub required_dirs: Vec<String>,

    /// Files that should not be zero bytes when present
    #[serde(default)]
    pub critical_files: Vec<String>,

    #[serde(default = "default_true")]
    pub fail_on_missing: bool,

    #[serde(default)]
    pub exclude_case_insensitive: bool,

    #[serde(default = "default_max_reported")]
    pub max_reported_issues: usize,

    /// Fixed build root; not part of any document
    #[serde(skip)]
    pub root: PathBuf,
}

impl BuildSpec {
    /// Deserialize and validate a merged cascade document
    pub fn from_value(value: &Value, root: &Path) -> Result<Self, ConfigError> {
        for key in ["plugin_name", "version"] {
            match value.get(key) {
                Some(Value::String(s)) if !s.trim().is_empty() => {}
                Some(Value::String(_)) | None | Some(Value::Null) => {
                    return Err(ConfigError::Invalid(format!("'{}' is required", key)))
                }
                Some(_) => {
                    return Err(ConfigError::Invalid(format!("'{}' must be a string", key)))
                }
            }
        }

        let mut spec: BuildSpec = serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        spec.root = root.to_path_buf();
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.plugin_name;
        if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(ConfigError::Invalid(format!(
                "plugin_name must be a single path component, got '{}'",
                name
            )));
        }
        let version = &self.version;
        if version.contains('/') || version.contains('\\') || version.contains("..") {
            return Err(ConfigError::Invalid(format!(
                "version must not contain path separators or '..', got '{}'",
                version
            )));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("'output_dir' must not be empty".to_string()));
        }
        Ok(())
    }

    /// `{plugin}-v{version}.zip` or `{plugin}-dev-v{version}.zip`
    pub fn archive_file_name(&self) -> String {
        match self.environment {
            Environment::Production => format!("{}-v{}.zip", self.plugin_name, self.version),
            Environment::Development => {
                format!("{}-dev-v{}.zip", self.plugin_name, self.version)
            }
        }
    }

    /// Absolute output directory
    pub fn output_dir(&self) -> PathBuf {
        if self.output_dir.is_absolute() {
            self.output_dir.clone()
        } else {
            self.root.join(&self.output_dir)
        }
    }

    /// Where the archive for this build lands
    pub fn archive_path(&self) -> PathBuf {
        self.output_dir().join(self.archive_file_name())
    }

    /// Strip `./`, leading `/` and a leading `{plugin}/`, and use `/` only
    pub fn normalize_relative(&self, raw: &str) -> String {
        let mut rel = raw.replace('\\', "/");
        loop {
            if let Some(rest) = rel.strip_prefix("./") {
                rel = rest.to_string();
            } else if let Some(rest) = rel.strip_prefix('/') {
                rel = rest.to_string();
            } else {
                break;
            }
        }
        let prefix = format!("{}/", self.plugin_name);
        match rel.strip_prefix(&prefix) {
            Some(rest) => rest.to_string(),
            None => rel,
        }
    }

    /// Canonical archive path for a package-relative path
    pub fn archive_name(&self, relative: &str) -> String {
        format!("{}/{}", self.plugin_name, self.normalize_relative(relative))
    }

    /// Canonical names of every required file
    pub fn required_archive_paths(&self) -> Vec<String> {
        self.required_files
            .iter()
            .map(|f| self.archive_name(f))
            .collect()
    }

    /// Required directory prefixes, each ending in `/`
    pub fn required_dir_prefixes(&self) -> Vec<String> {
        self.required_dirs
            .iter()
            .map(|d| {
                let name = self.archive_name(d);
                if name.ends_with('/') {
                    name
                } else {
                    format!("{}/", name)
                }
            })
            .collect()
    }

    pub fn critical_archive_paths(&self) -> Vec<String> {
        self.critical_files
            .iter()
            .map(|f| self.archive_name(f))
            .collect()
    }

    /// Whether a package-relative path names a required file
    pub fn is_required(&self, relative: &str) -> bool {
        let wanted = self.normalize_relative(relative);
        self.required_files
            .iter()
            .any(|f| self.normalize_relative(f) == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: Value) -> BuildSpec {
        BuildSpec::from_value(&value, Path::new("/work/plugin")).unwrap()
    }

    fn minimal() -> Value {
        json!({
            "plugin_name": "cart-quote",
            "version": "1.0.36",
            "output_dir": "dist"
        })
    }

    #[test]
    fn test_archive_file_name_by_environment() {
        let prod = spec(minimal());
        assert_eq!(prod.archive_file_name(), "cart-quote-v1.0.36.zip");

        let mut dev_value = minimal();
        dev_value["environment"] = json!("development");
        let dev = spec(dev_value);
        assert_eq!(dev.archive_file_name(), "cart-quote-dev-v1.0.36.zip");
    }

    #[test]
    fn test_missing_version_rejected() {
        let err = BuildSpec::from_value(
            &json!({"plugin_name": "p", "output_dir": "dist"}),
            Path::new("/r"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("'version' is required"));
    }

    #[test]
    fn test_blank_plugin_name_rejected() {
        let err = BuildSpec::from_value(
            &json!({"plugin_name": "  ", "version": "1", "output_dir": "dist"}),
            Path::new("/r"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("plugin_name"));
    }

    #[test]
    fn test_plugin_name_with_separator_rejected() {
        let err = BuildSpec::from_value(
            &json!({"plugin_name": "a/b", "version": "1", "output_dir": "dist"}),
            Path::new("/r"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_version_with_path_segments_rejected() {
        for version in ["1.0/../../escape", "..", "1.0\\x", "v1/2"] {
            let err = BuildSpec::from_value(
                &json!({"plugin_name": "p", "version": version, "output_dir": "dist"}),
                Path::new("/r"),
            )
            .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{}", version);
        }
        assert_eq!(spec(minimal()).version, "1.0.36");
    }

    #[test]
    fn test_numeric_version_rejected() {
        let err = BuildSpec::from_value(
            &json!({"plugin_name": "p", "version": 1.2, "output_dir": "dist"}),
            Path::new("/r"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be a string"));
    }

    #[test]
    fn test_relative_output_dir_under_root() {
        let s = spec(minimal());
        assert_eq!(s.output_dir(), PathBuf::from("/work/plugin/dist"));
        assert_eq!(
            s.archive_path(),
            PathBuf::from("/work/plugin/dist/cart-quote-v1.0.36.zip")
        );
    }

    #[test]
    fn test_normalize_relative() {
        let s = spec(minimal());
        assert_eq!(s.normalize_relative("./src/Core/Plugin.php"), "src/Core/Plugin.php");
        assert_eq!(s.normalize_relative("/readme.txt"), "readme.txt");
        assert_eq!(s.normalize_relative("cart-quote/uninstall.php"), "uninstall.php");
        assert_eq!(s.normalize_relative("src\\Core\\Plugin.php"), "src/Core/Plugin.php");
    }

    #[test]
    fn test_required_paths_namespaced() {
        let mut value = minimal();
        value["required_files"] = json!(["src/Core/Plugin.php", "cart-quote/readme.txt"]);
        value["required_dirs"] = json!(["src", "assets/"]);
        let s = spec(value);

        assert_eq!(
            s.required_archive_paths(),
            vec!["cart-quote/src/Core/Plugin.php", "cart-quote/readme.txt"]
        );
        assert_eq!(s.required_dir_prefixes(), vec!["cart-quote/src/", "cart-quote/assets/"]);
        assert!(s.is_required("./src/Core/Plugin.php"));
        assert!(!s.is_required("src/Core/Other.php"));
    }

    #[test]
    fn test_defaults_for_optional_fields() {
        let s = spec(minimal());
        assert!(s.fail_on_missing);
        assert!(!s.exclude_case_insensitive);
        assert_eq!(s.max_reported_issues, DEFAULT_MAX_REPORTED_ISSUES);
        assert_eq!(s.environment, Environment::Production);
    }
}
