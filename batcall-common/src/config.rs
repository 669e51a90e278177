//! Engine configuration loading and root folder resolution
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! The only process-wide values the classification engine needs are the tmp
//! root, the local→remote path mapping and the classifier service settings.
//! They are resolved once here and then passed around explicitly.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "BATCALL_ROOT_FOLDER";
/// Environment variable pointing at a TOML config file
pub const CONFIG_FILE_ENV: &str = "BATCALL_CONFIG";
/// Environment variable overriding the shared tmp root
pub const TMP_ROOT_ENV: &str = "BATCALL_TMP_ROOT";
/// Environment variable giving the classifier service's view of the tmp root
pub const REMOTE_TMP_ROOT_ENV: &str = "BATCALL_REMOTE_TMP_ROOT";

const DEFAULT_LISTEN_PORT: u16 = 5750;
const DATABASE_FILE_NAME: &str = "batcall.db";
const TMP_DIR_NAME: &str = "tmp";

/// Prefix rewrite between the engine's filesystem and the classifier's
///
/// The classifier service usually runs in its own container and mounts the
/// shared tmp directory at a different location, e.g. local `/var/app/tmp`
/// is `/app/tmp` inside the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub local_prefix: PathBuf,
    pub remote_prefix: PathBuf,
}

impl PathMapping {
    pub fn new(local_prefix: impl Into<PathBuf>, remote_prefix: impl Into<PathBuf>) -> Self {
        Self {
            local_prefix: local_prefix.into(),
            remote_prefix: remote_prefix.into(),
        }
    }

    /// Mapping where both sides see the same paths
    pub fn identity(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        Self::new(prefix.clone(), prefix)
    }

    /// Translate a local path into the classifier service's view
    ///
    /// Paths outside `local_prefix` are returned unchanged.
    pub fn to_remote(&self, local: &Path) -> PathBuf {
        match local.strip_prefix(&self.local_prefix) {
            Ok(rest) if rest.as_os_str().is_empty() => self.remote_prefix.clone(),
            Ok(rest) => self.remote_prefix.join(rest),
            Err(_) => local.to_path_buf(),
        }
    }
}

/// Classifier service connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierServiceConfig {
    /// Upper bound for one batch POST
    pub request_timeout_secs: u64,
    /// Liveness probe path appended to the service URL
    pub ping_path: String,
    /// Upper bound for the liveness probe
    pub ping_timeout_secs: u64,
}

impl Default for ClassifierServiceConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            ping_path: "/ping".to_string(),
            ping_timeout_secs: 10,
        }
    }
}

/// On-disk TOML layout; every field optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub tmp_root: Option<PathBuf>,
    pub remote_tmp_root: Option<PathBuf>,
    pub listen_port: Option<u16>,
    pub default_classifier_names: Option<Vec<String>>,
    pub classifier: ClassifierServiceConfig,
}

/// Fully resolved engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub root_folder: PathBuf,
    pub database_path: PathBuf,
    /// Shared working directory for batch clips and feature tables
    pub tmp_root: PathBuf,
    pub path_mapping: PathMapping,
    pub classifier: ClassifierServiceConfig,
    /// Classifier names tried in order when a run names none
    pub default_classifier_names: Vec<String>,
    pub listen_port: u16,
}

impl EngineConfig {
    /// Configuration with every value derived from `root_folder`
    pub fn with_root(root_folder: impl Into<PathBuf>) -> Self {
        let root_folder = root_folder.into();
        let tmp_root = root_folder.join(TMP_DIR_NAME);
        Self {
            database_path: root_folder.join(DATABASE_FILE_NAME),
            path_mapping: PathMapping::identity(tmp_root.clone()),
            tmp_root,
            root_folder,
            classifier: ClassifierServiceConfig::default(),
            default_classifier_names: default_classifier_names(),
            listen_port: DEFAULT_LISTEN_PORT,
        }
    }

    /// Resolve configuration from CLI arguments, environment and TOML
    pub fn resolve(cli_root: Option<&Path>, cli_config_file: Option<&Path>) -> Result<Self> {
        let toml_config = load_effective_toml(cli_config_file)?;

        let root_folder = cli_root
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(ROOT_FOLDER_ENV).ok().map(PathBuf::from))
            .or_else(|| toml_config.root_folder.clone())
            .unwrap_or_else(default_root_folder);

        let mut config = Self::with_root(root_folder);

        if let Some(path) = toml_config.database_path {
            config.database_path = path;
        }

        let tmp_root = std::env::var(TMP_ROOT_ENV)
            .ok()
            .map(PathBuf::from)
            .or(toml_config.tmp_root)
            .unwrap_or_else(|| config.tmp_root.clone());

        let remote_tmp_root = std::env::var(REMOTE_TMP_ROOT_ENV)
            .ok()
            .map(PathBuf::from)
            .or(toml_config.remote_tmp_root)
            .unwrap_or_else(|| tmp_root.clone());

        config.path_mapping = PathMapping::new(tmp_root.clone(), remote_tmp_root);
        config.tmp_root = tmp_root;
        config.classifier = toml_config.classifier;

        if let Some(names) = toml_config.default_classifier_names {
            config.default_classifier_names = names;
        }
        if let Some(port) = toml_config.listen_port {
            config.listen_port = port;
        }

        info!(
            root_folder = %config.root_folder.display(),
            tmp_root = %config.tmp_root.display(),
            remote_tmp_root = %config.path_mapping.remote_prefix.display(),
            "Engine configuration resolved"
        );

        Ok(config)
    }

    /// Create root folder and tmp root if missing
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(&self.tmp_root)?;
        Ok(())
    }
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Explicit config files must parse; the default location degrades to defaults
fn load_effective_toml(cli_config_file: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = cli_config_file {
        return load_toml_config(path);
    }

    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        return load_toml_config(Path::new(&path));
    }

    match default_config_file() {
        Some(path) if path.exists() => match load_toml_config(&path) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("Ignoring unreadable config file: {}", e);
                Ok(TomlConfig::default())
            }
        },
        _ => Ok(TomlConfig::default()),
    }
}

fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("batcall").join("config.toml"))
}

fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("batcall"))
        .unwrap_or_else(|| PathBuf::from("./batcall_data"))
}

fn default_classifier_names() -> Vec<String> {
    vec!["BatClassifier".to_string(), "Dummy".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_mapping_rewrites_prefix() {
        let mapping = PathMapping::new("/var/app/tmp", "/app/tmp");
        assert_eq!(
            mapping.to_remote(Path::new("/var/app/tmp/batch_0_7")),
            PathBuf::from("/app/tmp/batch_0_7")
        );
        assert_eq!(
            mapping.to_remote(Path::new("/var/app/tmp")),
            PathBuf::from("/app/tmp")
        );
    }

    #[test]
    fn test_path_mapping_leaves_foreign_paths() {
        let mapping = PathMapping::new("/var/app/tmp", "/app/tmp");
        assert_eq!(
            mapping.to_remote(Path::new("/srv/models/bat.pkl")),
            PathBuf::from("/srv/models/bat.pkl")
        );
    }

    #[test]
    fn test_with_root_derives_paths() {
        let config = EngineConfig::with_root("/data/batcall");
        assert_eq!(config.tmp_root, PathBuf::from("/data/batcall/tmp"));
        assert_eq!(config.database_path, PathBuf::from("/data/batcall/batcall.db"));
        assert_eq!(config.path_mapping, PathMapping::identity("/data/batcall/tmp"));
        assert_eq!(config.classifier.request_timeout_secs, 60);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            remote_tmp_root = "/app/tmp"

            [classifier]
            request_timeout_secs = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.remote_tmp_root, Some(PathBuf::from("/app/tmp")));
        assert_eq!(config.classifier.request_timeout_secs, 120);
        assert_eq!(config.classifier.ping_path, "/ping");
        assert!(config.root_folder.is_none());
    }
}
