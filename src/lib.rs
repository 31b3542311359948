//! Core library for the Sisyphus remote conda build tool.
//!
//! A build host is reached over SSH and may run Linux or Windows; the crate
//! detects which, then drives the whole lifecycle of a package build on it:
//! environment preparation, data staging, a build detached from the SSH
//! channel, status and log polling through sentinel files, format
//! conversion, upload and download of the resulting archives.

pub mod bundle;
pub mod config;
pub mod host;
pub mod lifecycle;
pub mod platform;
pub mod sentinel;
pub mod session;
pub mod test_support;

pub use bundle::{ArtifactPackager, BundleError, FeedstockPackager};
pub use config::{BundleConfig, ConfigError};
pub use host::{Dispatch, Host, HostError, RemoteHost, RemoteJob};
pub use lifecycle::{BuildController, LifecycleError};
pub use platform::{Platform, TargetKind};
pub use sentinel::{BuildStatus, Stage, StageState};
pub use session::{
    CommandOutput, CommandRunner, ProcessCommandRunner, RemoteSession, SessionConfig,
    SessionError, SessionTarget,
};
