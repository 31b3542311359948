//! Command-line interface definitions for the `sisyphus` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `sisyphus` binary.
#[derive(Debug, Parser)]
#[command(
    name = "sisyphus",
    version,
    about = "Build conda packages on remote Linux and Windows hosts over SSH",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Logging level.
    #[arg(
        short = 'l',
        long,
        value_enum,
        global = true,
        default_value_t = LogLevel::Info
    )]
    pub(crate) log_level: LogLevel,
    /// Operation to run on the build host.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Operations on a build host.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Prepare the host for building and wait until it is ready.
    Prepare(HostArgs),
    /// Build a package on the host.
    Build(BuildCommand),
    /// Follow a build, or the host preparation when no package is given.
    Watch(WatchCommand),
    /// Upload built packages on the host to anaconda.org.
    Upload(UploadCommand),
    /// Print the build log (does not update in real time).
    Log(LogCommand),
    /// Download built packages from the host.
    Download(DownloadCommand),
    /// Convert built packages so each exists as .tar.bz2 and .conda.
    Transmute(PackageArgs),
    /// Print the build status.
    Status(PackageArgs),
    /// Wait for the build to finish; exits non-zero if it failed.
    Wait(PackageArgs),
}

/// Verbosity of log output.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warning,
    /// Progress messages.
    Info,
    /// Remote command text and timestamps.
    Debug,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    #[must_use]
    pub(crate) const fn directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// Build host selection shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct HostArgs {
    /// IP or FQDN of the build host.
    #[arg(short = 'H', long, value_name = "ADDRESS")]
    pub(crate) host: String,
}

/// Build host and package selection.
#[derive(Debug, Args)]
pub(crate) struct PackageArgs {
    #[command(flatten)]
    pub(crate) host: HostArgs,
    /// Name of the package being built.
    #[arg(short = 'P', long)]
    pub(crate) package: String,
}

/// Arguments for `sisyphus build`.
#[derive(Debug, Args)]
pub(crate) struct BuildCommand {
    #[command(flatten)]
    pub(crate) target: PackageArgs,
    /// Branch to build from in the feedstock's repository.
    #[arg(short = 'B', long)]
    pub(crate) branch: Option<String>,
    /// Don't watch the build after it starts.
    #[arg(long)]
    pub(crate) no_watch: bool,
}

/// Arguments for `sisyphus watch`.
#[derive(Debug, Args)]
pub(crate) struct WatchCommand {
    #[command(flatten)]
    pub(crate) host: HostArgs,
    /// Name of the package being built.
    #[arg(short = 'P', long)]
    pub(crate) package: Option<String>,
}

/// Arguments for `sisyphus upload`.
#[derive(Debug, Args)]
pub(crate) struct UploadCommand {
    #[command(flatten)]
    pub(crate) target: PackageArgs,
    /// Target channel on anaconda.org.
    #[arg(short = 'C', long)]
    pub(crate) channel: String,
    /// Token for the target channel on anaconda.org.
    #[arg(short = 't', long, env = "ANACONDA_TOKEN", hide_env_values = true)]
    pub(crate) token: String,
}

/// Arguments for `sisyphus log`.
#[derive(Debug, Args)]
pub(crate) struct LogCommand {
    #[command(flatten)]
    pub(crate) target: PackageArgs,
    /// Don't wait for the build to finish before printing the log.
    #[arg(long)]
    pub(crate) no_wait: bool,
}

/// Arguments for `sisyphus download`.
#[derive(Debug, Args)]
pub(crate) struct DownloadCommand {
    #[command(flatten)]
    pub(crate) target: PackageArgs,
    /// Destination directory; defaults to the current directory.
    #[arg(short = 'd', long, value_name = "DIR")]
    pub(crate) destination: Option<String>,
    /// Download the whole workspace for debugging.
    #[arg(short = 'a', long)]
    pub(crate) all: bool,
}
