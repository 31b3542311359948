//! One SSH channel to a build host.
//!
//! Each remote call is its own invocation of the system `ssh` (or `scp`)
//! client, so a [`RemoteSession`] is the connection parameters plus proof that
//! they work: opening a session runs a probe command and fails if the probe
//! does. Reconnecting means building a fresh session and dropping the old
//! value.

use std::ffi::OsString;
use std::fmt;

use camino::Utf8Path;
use thiserror::Error;
use tracing::debug;

mod config;
mod types;

pub use config::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_POSIX_USER, DEFAULT_WINDOWS_USER, SessionConfig,
};
pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner};

use config::expand_tilde;

/// Address and user a session authenticates as.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionTarget {
    /// IP address or host name of the build host.
    pub address: String,
    /// Remote account used for this target kind.
    pub user: String,
}

impl SessionTarget {
    /// Creates a target from an address and user.
    #[must_use]
    pub fn new(address: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user: user.into(),
        }
    }
}

impl fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.address)
    }
}

/// Errors surfaced by the SSH transport.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// Raised when a local client program cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the probe run while opening a session fails.
    #[error("could not open a session to {target}: {message}")]
    Connect {
        /// `user@address` that was tried.
        target: String,
        /// Client output explaining the failure.
        message: String,
    },
    /// Raised when a synchronous remote command exits non-zero.
    #[error("remote command `{command}` exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Command as shown in logs (secrets redacted).
        command: String,
        /// Exit status reported by the client.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Captured stderr.
        stderr: String,
    },
    /// Raised when `scp` fails to move a file.
    #[error("transfer from {source_path} to {destination} failed with status {status_text}: {stderr}")]
    TransferFailure {
        /// Path being copied.
        source_path: String,
        /// Destination of the copy.
        destination: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Captured stderr.
        stderr: String,
    },
}

/// A verified connection to one host as one user.
#[derive(Clone, Debug)]
pub struct RemoteSession<R: CommandRunner> {
    target: SessionTarget,
    config: SessionConfig,
    runner: R,
}

impl<R: CommandRunner> RemoteSession<R> {
    /// Opens a session by running `probe` on the target.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connect`] when the probe does not succeed, and
    /// [`SessionError::Spawn`] when the `ssh` client cannot be started.
    pub fn open(
        target: SessionTarget,
        config: SessionConfig,
        runner: R,
        probe: &str,
    ) -> Result<Self, SessionError> {
        let session = Self {
            target,
            config,
            runner,
        };
        let output = session.ssh(probe)?;
        if !output.is_success() {
            return Err(SessionError::Connect {
                target: session.target.to_string(),
                message: output.stderr.trim().to_owned(),
            });
        }
        debug!(target = %session.target, probe = output.stdout.trim(), "session opened");
        Ok(session)
    }

    /// Opens a fresh session to the same target, re-running `probe`.
    ///
    /// The current value is left untouched; callers replace it with the
    /// returned session.
    ///
    /// # Errors
    ///
    /// Fails exactly as [`RemoteSession::open`] does.
    pub fn reopen(&self, probe: &str) -> Result<Self, SessionError>
    where
        R: Clone,
    {
        Self::open(
            self.target.clone(),
            self.config.clone(),
            self.runner.clone(),
            probe,
        )
    }

    /// Target this session talks to.
    #[must_use]
    pub const fn target(&self) -> &SessionTarget {
        &self.target
    }

    /// Settings the session was opened with.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs `command` and returns its stdout.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CommandFailure`] on a non-zero exit.
    pub fn run(&self, command: &str) -> Result<String, SessionError> {
        self.run_displayed(command, command)
    }

    /// Runs `command`, logging and reporting it as `shown` instead.
    ///
    /// Used when the command line carries a secret.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CommandFailure`] on a non-zero exit.
    pub fn run_displayed(&self, command: &str, shown: &str) -> Result<String, SessionError> {
        debug!(command = shown, "running");
        let output = self.ssh(command)?;
        if !output.is_success() {
            return Err(SessionError::CommandFailure {
                command: shown.to_owned(),
                status: output.code,
                status_text: output.status_text(),
                stderr: output.stderr.trim().to_owned(),
            });
        }
        for line in output.stdout.lines() {
            debug!("{line}");
        }
        Ok(output.stdout)
    }

    /// Runs `command`, turning a non-zero exit into `None`.
    ///
    /// # Errors
    ///
    /// Only fails when the client cannot be started.
    pub fn run_quiet(&self, command: &str) -> Result<Option<String>, SessionError> {
        debug!(command, "running quietly");
        let output = self.ssh(command)?;
        if output.is_success() {
            Ok(Some(output.stdout))
        } else {
            debug!(status = %output.status_text(), "quiet command failed");
            Ok(None)
        }
    }

    /// Hands `command` to the remote host without observing its outcome.
    ///
    /// `command` must already detach itself from the SSH channel; the job is
    /// expected to report completion through sentinel files.
    ///
    /// # Errors
    ///
    /// Only fails when the client cannot be started.
    pub fn run_async(&self, command: &str) -> Result<(), SessionError> {
        debug!(command, "dispatching");
        let output = self.ssh(command)?;
        debug!(status = %output.status_text(), "dispatch returned");
        Ok(())
    }

    /// Copies a local file into a remote directory.
    ///
    /// `remote_dir` must already use forward slashes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransferFailure`] when `scp` fails.
    pub fn put(&self, local: &Utf8Path, remote_dir: &str) -> Result<(), SessionError> {
        let destination = format!("{}:{remote_dir}/", self.target);
        self.scp(local.as_str(), &destination)
    }

    /// Copies a remote file into a local directory.
    ///
    /// `remote` must already use forward slashes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransferFailure`] when `scp` fails.
    pub fn get(&self, remote: &str, local_dir: &Utf8Path) -> Result<(), SessionError> {
        let source = format!("{}:{remote}", self.target);
        self.scp(&source, local_dir.as_str())
    }

    fn ssh(&self, command: &str) -> Result<CommandOutput, SessionError> {
        let args = self.build_ssh_args(command);
        self.runner.run(&self.config.ssh_bin, &args)
    }

    fn scp(&self, source: &str, destination: &str) -> Result<(), SessionError> {
        debug!(source, destination, "copying");
        let mut args = self.common_options("-P");
        args.push(OsString::from(source));
        args.push(OsString::from(destination));
        let output = self.runner.run(&self.config.scp_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(SessionError::TransferFailure {
            source_path: source.to_owned(),
            destination: destination.to_owned(),
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }

    fn build_ssh_args(&self, command: &str) -> Vec<OsString> {
        let mut args = self.common_options("-p");
        args.push(OsString::from(self.target.to_string()));
        args.push(OsString::from(command));
        args
    }

    fn common_options(&self, port_flag: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from(port_flag),
            OsString::from(self.config.ssh_port.to_string()),
        ];

        if let Some(ref identity_file) = self.config.ssh_identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        let mut option = |value: String| {
            args.push(OsString::from("-o"));
            args.push(OsString::from(value));
        };
        option(format!("ConnectTimeout={}", self.config.connect_timeout_secs));
        if self.config.ssh_batch_mode {
            option(String::from("BatchMode=yes"));
        }
        if !self.config.ssh_strict_host_key_checking {
            option(String::from("StrictHostKeyChecking=no"));
        }
        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            option(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            ));
        }

        args
    }
}

#[cfg(test)]
mod tests;
