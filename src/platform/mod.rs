//! Command text for each supported target kind.
//!
//! A [`Platform`] turns the uniform remote primitives into the shell text one
//! operating system family understands. Implementations are pure: they never
//! talk to a host, which keeps every quoting and chaining rule unit-testable.
//! Detection picks one implementation per host and nothing branches on the
//! kind afterwards.

use std::fmt;

mod posix;
mod windows;

pub use posix::Posix;
pub use windows::Windows;

/// Operating system family of a build host.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TargetKind {
    /// Linux and other `sh`-speaking hosts.
    Posix,
    /// Windows hosts whose SSH server starts `cmd.exe`.
    Windows,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Posix => "Linux",
            Self::Windows => "Windows",
        })
    }
}

/// Candidate platforms in the order detection probes them.
#[must_use]
pub fn candidates() -> Vec<Box<dyn Platform>> {
    vec![Box::new(Posix), Box::new(Windows)]
}

/// OS-specific rendering of the remote primitive set.
///
/// Commands that answer a yes/no question print `Yes` on stdout when the
/// answer is positive and nothing otherwise.
pub trait Platform: fmt::Debug + Send + Sync {
    /// Family this implementation targets.
    fn kind(&self) -> TargetKind;

    /// Path separator.
    fn separator(&self) -> char;

    /// Directory under which the work directory is created.
    fn top_dir(&self) -> &'static str;

    /// Name of the conda output directory for this platform.
    fn package_dir(&self) -> &'static str;

    /// Cheap command that only succeeds on this family.
    fn probe(&self) -> &'static str;

    /// Command making `conda activate` usable in later sessions.
    fn conda_init(&self) -> &'static str;

    /// Quotes a path for this family's shell.
    fn quote(&self, path: &str) -> String;

    /// Prints `Yes` when `path` exists.
    fn exists(&self, path: &str) -> String;

    /// Prints `Yes` when `path` is a directory.
    fn is_dir(&self, path: &str) -> String;

    /// Creates `path` and any missing parents.
    fn mkdir(&self, path: &str) -> String;

    /// Creates `path`, failing if anything already occupies it.
    fn mkdir_exclusive(&self, path: &str) -> String;

    /// Prints the names in `path`, one per line; prints nothing and succeeds
    /// when `path` is missing or empty.
    fn list(&self, path: &str) -> String;

    /// Deletes a file, or a directory recursively.
    fn remove(&self, path: &str, is_dir: bool) -> String;

    /// Extracts `archive` into the existing directory `dest`.
    fn extract(&self, archive: &str, dest: &str) -> String;

    /// Writes `archive` from `members`, given relative to `cwd` with `/`.
    fn create_archive(&self, cwd: &str, archive: &str, members: &[String]) -> String;

    /// Creates an empty file.
    fn touch(&self, path: &str) -> String;

    /// Prints a file.
    fn cat(&self, path: &str) -> String;

    /// Prints at most `max` lines of `path`, skipping the first `skip`.
    fn tail(&self, path: &str, skip: usize, max: usize) -> String;

    /// Runs `command` from `dir`.
    fn in_dir(&self, dir: &str, command: &str) -> String;

    /// Runs `then` after `first` whatever `first` returned.
    fn sequence(&self, first: &str, then: &str) -> String;

    /// Wraps `job` so it keeps running after the SSH channel closes.
    fn detach(&self, job: &str) -> String;

    /// Glob matching `pattern` inside `dir`, left for the remote tool to expand.
    fn glob(&self, dir: &str, pattern: &str) -> String;

    /// Command installing GPU drivers, for families that need one. The
    /// command writes its own logs below `work_dir`.
    fn driver_install(&self, work_dir: &str) -> Option<String>;

    /// Sends all output of `job` to `log`, including failures before its
    /// last step.
    fn redirect(&self, job: &str, log: &str) -> String {
        format!("({job}) > {} 2>&1", self.quote(log))
    }

    /// Path form accepted by `scp` for this family.
    fn transfer_path(&self, path: &str) -> String {
        path.to_owned()
    }

    /// Joins `parts` with the separator, collapsing runs of separators.
    ///
    /// Empty parts contribute nothing, so `["a", "", "b"]` and `["a", "b"]`
    /// produce the same path.
    fn path_join(&self, parts: &[&str]) -> String {
        let separator = self.separator();
        let mut joined = String::new();
        for (index, part) in parts.iter().enumerate() {
            if index > 0 {
                joined.push(separator);
            }
            joined.push_str(part);
        }

        let mut cleaned = String::with_capacity(joined.len());
        for ch in joined.chars() {
            if ch == separator && cleaned.ends_with(separator) {
                continue;
            }
            cleaned.push(ch);
        }
        cleaned
    }
}

#[cfg(test)]
mod tests;
