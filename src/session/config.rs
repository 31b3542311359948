//! SSH client settings loaded through `ortho-config`.
//!
//! [`SessionConfig`] carries the credential pair for each supported target
//! kind alongside the client options shared by `ssh` and `scp`.

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::{ConfigError, FieldMetadata, require_field};

/// User the POSIX build image accepts.
pub const DEFAULT_POSIX_USER: &str = "ec2-user";

/// User the Windows build image accepts.
pub const DEFAULT_WINDOWS_USER: &str = "dev-admin";

/// Seconds allowed for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// SSH and SCP settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SISYPHUS_SSH",
    discovery(
        app_name = "sisyphus",
        env_var = "SISYPHUS_CONFIG_PATH",
        config_file_name = "sisyphus.toml",
        dotfile_name = ".sisyphus.toml",
        project_file_name = "sisyphus.toml"
    )
)]
pub struct SessionConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// TCP port of the remote SSH server.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// User presented when probing for a POSIX target.
    #[ortho_config(default = DEFAULT_POSIX_USER.to_owned())]
    pub posix_user: String,
    /// User presented when probing for a Windows target.
    #[ortho_config(default = DEFAULT_WINDOWS_USER.to_owned())]
    pub windows_user: String,
    /// Connection timeout passed to the client as `ConnectTimeout`.
    #[ortho_config(default = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,
    /// Whether to force batch mode so the client never prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking; build hosts are short-lived so
    /// this defaults to off.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Private key used for both target kinds. Supports `~/` expansion.
    pub ssh_identity_file: Option<String>,
}

impl SessionConfig {
    /// Loads configuration from defaults, configuration files, and the
    /// environment, ignoring the process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("sisyphus")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures every required value is present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.ssh_bin,
            &FieldMetadata::new("ssh client", "SISYPHUS_SSH_SSH_BIN", "ssh_bin"),
        )?;
        require_field(
            &self.scp_bin,
            &FieldMetadata::new("scp client", "SISYPHUS_SSH_SCP_BIN", "scp_bin"),
        )?;
        require_field(
            &self.posix_user,
            &FieldMetadata::new("POSIX user", "SISYPHUS_SSH_POSIX_USER", "posix_user"),
        )?;
        require_field(
            &self.windows_user,
            &FieldMetadata::new("Windows user", "SISYPHUS_SSH_WINDOWS_USER", "windows_user"),
        )?;
        if let Some(identity) = self.ssh_identity_file.as_deref() {
            require_field(
                identity,
                &FieldMetadata::new(
                    "identity file",
                    "SISYPHUS_SSH_SSH_IDENTITY_FILE",
                    "ssh_identity_file",
                ),
            )?;
        }
        Ok(())
    }
}

/// Expands a leading `~/` using `HOME`; other paths pass through untouched.
pub(crate) fn expand_tilde(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => format!("{}/{rest}", home.to_string_lossy()),
        _ => path.to_owned(),
    }
}
