//! Configuration loading via `ortho-config`.
//!
//! SSH settings live with the session in [`crate::session::SessionConfig`];
//! this module holds the bundle sources and the shared validation helpers.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Recipe-wide build configuration fetched for every package.
pub const DEFAULT_BUILD_CONFIG_URL: &str =
    "https://raw.githubusercontent.com/AnacondaRecipes/aggregate/master/conda_build_config.yaml";

/// GitHub API root used to look up a feedstock's default branch.
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com/repos/AnacondaRecipes/";

/// Prefix of feedstock repository URLs.
pub const DEFAULT_FEEDSTOCK_URL_PREFIX: &str = "https://github.com/AnacondaRecipes/";

/// Suffix appended to a package name to form its feedstock repository name.
pub const DEFAULT_FEEDSTOCK_SUFFIX: &str = "-feedstock";

/// Where the local data bundle gets its build configuration and feedstock.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SISYPHUS_BUNDLE",
    discovery(
        app_name = "sisyphus",
        env_var = "SISYPHUS_CONFIG_PATH",
        config_file_name = "sisyphus.toml",
        dotfile_name = ".sisyphus.toml",
        project_file_name = "sisyphus.toml"
    )
)]
pub struct BundleConfig {
    /// URL of the `conda_build_config.yaml` shipped with every build.
    #[ortho_config(default = DEFAULT_BUILD_CONFIG_URL.to_owned())]
    pub build_config_url: String,
    /// GitHub API base used to resolve default branches.
    #[ortho_config(default = DEFAULT_GITHUB_API_URL.to_owned())]
    pub github_api_url: String,
    /// Base URL under which feedstock repositories live.
    #[ortho_config(default = DEFAULT_FEEDSTOCK_URL_PREFIX.to_owned())]
    pub feedstock_url_prefix: String,
    /// Repository name suffix for feedstocks.
    #[ortho_config(default = DEFAULT_FEEDSTOCK_SUFFIX.to_owned())]
    pub feedstock_suffix: String,
}

impl BundleConfig {
    /// Settings pointing at the public AnacondaRecipes organisation.
    #[must_use]
    pub fn anaconda_recipes() -> Self {
        Self {
            build_config_url: DEFAULT_BUILD_CONFIG_URL.to_owned(),
            github_api_url: DEFAULT_GITHUB_API_URL.to_owned(),
            feedstock_url_prefix: DEFAULT_FEEDSTOCK_URL_PREFIX.to_owned(),
            feedstock_suffix: DEFAULT_FEEDSTOCK_SUFFIX.to_owned(),
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
pub(crate) struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    pub(crate) const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

/// Rejects empty or whitespace-only values.
pub(crate) fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to sisyphus.toml",
            metadata.description, metadata.env_var, metadata.toml_key
        )));
    }
    Ok(())
}

impl BundleConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("sisyphus")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a URL is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.build_config_url,
            &FieldMetadata::new(
                "build configuration URL",
                "SISYPHUS_BUNDLE_BUILD_CONFIG_URL",
                "build_config_url",
            ),
        )?;
        require_field(
            &self.github_api_url,
            &FieldMetadata::new(
                "GitHub API URL",
                "SISYPHUS_BUNDLE_GITHUB_API_URL",
                "github_api_url",
            ),
        )?;
        require_field(
            &self.feedstock_url_prefix,
            &FieldMetadata::new(
                "feedstock URL prefix",
                "SISYPHUS_BUNDLE_FEEDSTOCK_URL_PREFIX",
                "feedstock_url_prefix",
            ),
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
