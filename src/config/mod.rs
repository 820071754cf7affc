//! Harness configuration
//!
//! Mirrors a Karma `files` configuration. Partial configurations merge over
//! [`HarnessConfig::default`], so a config that only names `files` keeps every
//! other default.

use crate::bridge::CollisionPolicy;
use crate::document::DEFAULT_URL;
use crate::expander::{DEFAULT_EXCLUDES, ExpandOrder};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default load list: utilities, application entry, services, controllers,
/// then test helpers
pub const DEFAULT_FILES: &[&str] = &[
    "src/utils/**/*.js",
    "src/app.js",
    "src/services/**/*.js",
    "src/controllers/**/*.js",
    "test/helpers/**/*.js",
];

/// Configuration for a script injection harness
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// Glob patterns of scripts to load
    pub files: Vec<String>,
    /// Accepted for Karma compatibility, no effect
    pub served: bool,
    /// Accepted for Karma compatibility, no effect
    pub included: bool,
    /// Globs removed from every expansion
    pub exclude: Vec<String>,
    /// Order in which expanded files are loaded
    pub order: ExpandOrder,
    /// Directory patterns and relative file paths are resolved against
    pub base_dir: PathBuf,
    /// URL reported by the simulated document
    pub url: String,
    /// Bridge window functions into the host scope after setup
    pub bridge: bool,
    /// What the bridge does when a name is already in the host scope
    pub on_collision: CollisionPolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            files: DEFAULT_FILES.iter().map(|p| p.to_string()).collect(),
            served: true,
            included: true,
            exclude: DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect(),
            order: ExpandOrder::default(),
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            url: DEFAULT_URL.to_string(),
            bridge: true,
            on_collision: CollisionPolicy::default(),
        }
    }
}

/// A partial configuration as written in a JSON file.
/// Every field that is present replaces the default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HarnessOverrides {
    pub files: Option<Vec<String>>,
    pub served: Option<bool>,
    pub included: Option<bool>,
    pub exclude: Option<Vec<String>>,
    pub order: Option<ExpandOrder>,
    pub base_dir: Option<PathBuf>,
    pub url: Option<String>,
    pub bridge: Option<bool>,
    pub on_collision: Option<CollisionPolicy>,
}

impl HarnessConfig {
    /// Create a config with a custom file list
    pub fn with_files<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            files: files.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_order(mut self, order: ExpandOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.on_collision = policy;
        self
    }

    /// Apply overrides on top of this config
    pub fn merge(mut self, overrides: HarnessOverrides) -> Self {
        if let Some(files) = overrides.files {
            self.files = files;
        }
        if let Some(served) = overrides.served {
            self.served = served;
        }
        if let Some(included) = overrides.included {
            self.included = included;
        }
        if let Some(exclude) = overrides.exclude {
            self.exclude = exclude;
        }
        if let Some(order) = overrides.order {
            self.order = order;
        }
        if let Some(base_dir) = overrides.base_dir {
            self.base_dir = base_dir;
        }
        if let Some(url) = overrides.url {
            self.url = url;
        }
        if let Some(bridge) = overrides.bridge {
            self.bridge = bridge;
        }
        if let Some(policy) = overrides.on_collision {
            self.on_collision = policy;
        }
        self
    }

    /// Parse a JSON config and merge it over the defaults
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let overrides: HarnessOverrides = serde_json::from_str(json)?;
        Ok(Self::default().merge(overrides))
    }

    /// Load a JSON config file. A relative `baseDir` in the file is taken
    /// relative to the file's directory; without one the file's directory is
    /// the base.
    pub fn from_json_file(path: &Path) -> std::io::Result<Self> {
        // A bare file name has an empty parent; anchor it to the working directory
        let path = std::path::absolute(path)?;
        let text = std::fs::read_to_string(&path)?;
        let mut overrides: HarnessOverrides = serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let config_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        overrides.base_dir = Some(match overrides.base_dir.take() {
            Some(dir) if dir.is_relative() => config_dir.join(dir),
            Some(dir) => dir,
            None => config_dir,
        });

        Ok(Self::default().merge(overrides))
    }
}
