//! Plugin manifests (`plugin.json`) and discovery of plugin directories.
//!
//! Layout:
//!
//! ```text
//! <plugins dir>/
//!   word-filter/
//!     plugin.json
//!     bin/plugin-word-filter
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use validator::{Validate, ValidationError};

use chathub_core::AppError;

use crate::api::ApiPermission;
use crate::supervisor::PluginSpec;

/// File name of a plugin manifest inside its directory.
pub const MANIFEST_FILE: &str = "plugin.json";

/// Errors loading a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("failed to read manifest '{path}': {source}")]
    Read {
        /// Manifest path.
        path: PathBuf,
        /// Cause.
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid JSON for a manifest.
    #[error("failed to parse manifest '{path}': {source}")]
    Parse {
        /// Manifest path.
        path: PathBuf,
        /// Cause.
        #[source]
        source: serde_json::Error,
    },

    /// The manifest parsed but holds invalid values.
    #[error("invalid manifest '{path}': {source}")]
    Invalid {
        /// Manifest path.
        path: PathBuf,
        /// Cause.
        #[source]
        source: validator::ValidationErrors,
    },
}

impl From<ManifestError> for AppError {
    fn from(err: ManifestError) -> Self {
        let app = match &err {
            ManifestError::Read { .. } => AppError::not_found(err.to_string()),
            ManifestError::Parse { .. } | ManifestError::Invalid { .. } => {
                AppError::validation(err.to_string())
            }
        };
        app.at("plugin.manifest")
    }
}

/// Describes a plugin: identity, how to launch it and what it may access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PluginManifest {
    /// Unique plugin id.
    #[validate(length(min = 1, max = 190), custom(function = "validate_plugin_id"))]
    pub id: String,

    /// Human-readable name.
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    /// Version string.
    #[serde(default)]
    pub version: String,

    /// Executable path, relative to the manifest directory unless absolute.
    #[validate(length(min = 1))]
    pub executable: String,

    /// Extra command-line arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Granted API permissions.
    #[serde(default)]
    pub permissions: Vec<ApiPermission>,

    /// Initial configuration blob.
    #[serde(default)]
    pub settings: Option<Value>,

    /// Directory the manifest was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn validate_plugin_id(id: &str) -> Result<(), ValidationError> {
    let valid = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("plugin_id_charset"))
    }
}

impl PluginManifest {
    /// Absolute-or-relative-to-cwd path of the executable.
    pub fn executable_path(&self) -> PathBuf {
        let exe = Path::new(&self.executable);
        if exe.is_absolute() {
            exe.to_path_buf()
        } else {
            self.base_dir.join(exe)
        }
    }

    /// Launch spec for the supervisor.
    pub fn to_spec(&self, forward_stderr: bool) -> PluginSpec {
        let mut spec = PluginSpec::new(self.id.clone(), self.executable_path());
        spec.args = self.args.clone();
        spec.working_dir = Some(self.base_dir.clone());
        spec.forward_stderr = forward_stderr;
        spec
    }
}

/// Loads and validates `<dir>/plugin.json`.
pub fn load_manifest(dir: &Path) -> Result<PluginManifest, ManifestError> {
    let path = dir.join(MANIFEST_FILE);
    let raw = std::fs::read_to_string(&path).map_err(|source| ManifestError::Read {
        path: path.clone(),
        source,
    })?;
    let mut manifest: PluginManifest =
        serde_json::from_str(&raw).map_err(|source| ManifestError::Parse {
            path: path.clone(),
            source,
        })?;
    manifest
        .validate()
        .map_err(|source| ManifestError::Invalid {
            path: path.clone(),
            source,
        })?;
    manifest.base_dir = dir.to_path_buf();
    Ok(manifest)
}

/// Loads every manifest found one level below `root`, sorted by directory
/// name. Directories without a manifest are ignored; invalid manifests are
/// logged and skipped.
pub fn discover_manifests(root: &Path) -> Result<Vec<PluginManifest>, AppError> {
    if !root.is_dir() {
        debug!(path = %root.display(), "Plugin directory does not exist");
        return Ok(Vec::new());
    }

    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() && path.join(MANIFEST_FILE).is_file() {
            dirs.push(path);
        }
    }
    dirs.sort();

    let mut manifests = Vec::with_capacity(dirs.len());
    for dir in dirs {
        match load_manifest(&dir) {
            Ok(manifest) => manifests.push(manifest),
            Err(err) => warn!(error = %err, "Skipping plugin with invalid manifest"),
        }
    }
    Ok(manifests)
}
