//! Errors raised by host detection and the remote primitives.

use thiserror::Error;

use crate::platform::TargetKind;
use crate::session::SessionError;

/// Failures surfaced by [`super::Host`] and other [`super::RemoteHost`]
/// implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HostError {
    /// Raised when no supported target kind answers the detection probe.
    #[error("couldn't connect to host '{address}' or figure out what type it is ({attempts})")]
    Connection {
        /// Address that was probed.
        address: String,
        /// One entry per probed target kind describing why it failed.
        attempts: String,
    },
    /// Raised when a remote command or transfer fails.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Raised when `mkdir` finds a file where a directory should be.
    #[error("cannot create directory {path}: a file is in the way")]
    DirectoryBlocked {
        /// Path occupied by a non-directory.
        path: String,
    },
    /// Raised when an operation has no meaning on the detected target kind.
    #[error("{operation} is not supported on {kind} hosts")]
    Unsupported {
        /// Detected target kind.
        kind: TargetKind,
        /// Operation that was requested.
        operation: &'static str,
    },
}
