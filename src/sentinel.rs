//! Stage status derived from sentinel marker files.
//!
//! Detached jobs report their outcome by touching `<stage>.ready` or
//! `<stage>.failed`. Everything here is a pure function of the names found in
//! a directory listing, so status decisions never touch the network.

use std::fmt;

use tracing::warn;

/// Name of the build log inside a workspace.
pub const BUILD_LOG: &str = "build.log";

/// Stages reporting through sentinel pairs.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Stage {
    /// Conda environment creation.
    Conda,
    /// GPU driver and toolkit installation (Windows only).
    Cuda,
    /// Package compilation.
    Build,
}

impl Stage {
    /// Sentinel name written when the stage succeeds.
    #[must_use]
    pub const fn ready(self) -> &'static str {
        match self {
            Self::Conda => "conda.ready",
            Self::Cuda => "cuda.ready",
            Self::Build => "build.ready",
        }
    }

    /// Sentinel name written when the stage fails.
    #[must_use]
    pub const fn failed(self) -> &'static str {
        match self {
            Self::Conda => "conda.failed",
            Self::Cuda => "cuda.failed",
            Self::Build => "build.failed",
        }
    }

    /// Log file name for stages with a single log.
    #[must_use]
    pub const fn log(self) -> Option<&'static str> {
        match self {
            Self::Conda => Some("conda.log"),
            Self::Cuda => None,
            Self::Build => Some(BUILD_LOG),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Conda => "conda",
            Self::Cuda => "cuda",
            Self::Build => "build",
        })
    }
}

/// Outcome of one stage as seen through its sentinels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StageState {
    /// Neither sentinel exists.
    Pending,
    /// `ready` exists.
    Ready,
    /// `failed` exists and `ready` does not.
    Failed,
}

impl StageState {
    /// Whether the stage has finished either way.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Reads `stage`'s state from the names in its directory.
///
/// `ready` wins when both sentinels exist; the conflict is logged.
#[must_use]
pub fn stage_state<S: AsRef<str>>(stage: Stage, names: &[S]) -> StageState {
    let ready = contains(names, stage.ready());
    let failed = contains(names, stage.failed());
    if ready && failed {
        warn!(%stage, "both sentinels present; treating the stage as ready");
    }
    if ready {
        StageState::Ready
    } else if failed {
        StageState::Failed
    } else {
        StageState::Pending
    }
}

/// Build status of a package workspace.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildStatus {
    /// Nothing has been dispatched.
    NotStarted,
    /// The build log exists but no sentinel does.
    Building,
    /// `build.ready` exists.
    Complete,
    /// `build.failed` exists and `build.ready` does not.
    Failed,
}

impl BuildStatus {
    /// Whether the build has finished either way.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "Not started",
            Self::Building => "Building",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        })
    }
}

/// Maps a workspace listing to a [`BuildStatus`].
///
/// Priority is `build.ready`, then `build.failed`, then `build.log`.
#[must_use]
pub fn build_status<S: AsRef<str>>(names: &[S]) -> BuildStatus {
    match stage_state(Stage::Build, names) {
        StageState::Ready => BuildStatus::Complete,
        StageState::Failed => BuildStatus::Failed,
        StageState::Pending if contains(names, BUILD_LOG) => BuildStatus::Building,
        StageState::Pending => BuildStatus::NotStarted,
    }
}

fn contains<S: AsRef<str>>(names: &[S], wanted: &str) -> bool {
    names.iter().any(|name| name.as_ref() == wanted)
}
