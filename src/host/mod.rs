//! Build hosts reached over SSH.
//!
//! [`Host::connect`] detects the target kind by probing each candidate
//! [`Platform`] with its own user and keeps the first one that answers. From
//! then on every primitive delegates its command text to that platform, so
//! callers see one contract for POSIX and Windows hosts alike.
//!
//! The lifecycle controller only talks to hosts through [`RemoteHost`], which
//! lets tests substitute an in-memory host.

use camino::Utf8Path;
use tracing::{debug, info};

use crate::platform::{Platform, TargetKind, candidates};
use crate::session::{CommandRunner, RemoteSession, SessionConfig, SessionTarget};

mod error;
pub mod toolchain;

pub use error::HostError;

/// Name of the work directory created under the platform's top directory.
pub const WORK_DIR_NAME: &str = "sisyphus";

/// Long-running work handed to a host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RemoteJob {
    /// Creates the conda environment builds run in.
    CreateEnvironment,
    /// Installs GPU drivers and toolkit.
    InstallDriver,
    /// Runs `conda build` for the feedstock staged in `workspace`.
    Build {
        /// Workspace holding the build configuration and feedstock.
        workspace: String,
    },
}

/// A detached job together with the sentinels reporting its outcome.
///
/// The job writes `ready` when it succeeds and `failed` otherwise. When
/// `release` is set the path is removed after either outcome.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dispatch {
    /// Work to run.
    pub job: RemoteJob,
    /// Sentinel touched on success.
    pub ready: String,
    /// Sentinel touched on failure.
    pub failed: String,
    /// File receiving the job's stdout and stderr.
    pub log: Option<String>,
    /// Lock directory removed once the job finishes.
    pub release: Option<String>,
}

impl Dispatch {
    /// Creates a dispatch with no log redirection and no lock.
    #[must_use]
    pub fn new(job: RemoteJob, ready: impl Into<String>, failed: impl Into<String>) -> Self {
        Self {
            job,
            ready: ready.into(),
            failed: failed.into(),
            log: None,
            release: None,
        }
    }

    /// Redirects the job's output to `log`.
    #[must_use]
    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    /// Removes the lock directory `lock` once the job finishes.
    #[must_use]
    pub fn releasing(mut self, lock: impl Into<String>) -> Self {
        self.release = Some(lock.into());
        self
    }
}

/// Uniform operations on a build host.
///
/// Predicates answer `false` for missing paths rather than failing. Paths
/// are host paths built with [`RemoteHost::path_join`].
pub trait RemoteHost {
    /// Detected target kind.
    fn kind(&self) -> TargetKind;

    /// Address the host was reached at.
    fn address(&self) -> &str;

    /// Work directory holding sentinels and package workspaces.
    fn work_dir(&self) -> &str;

    /// Name of the conda output directory for this host.
    fn package_dir(&self) -> &'static str;

    /// Whether a GPU driver stage applies to this host.
    fn installs_drivers(&self) -> bool;

    /// Joins path parts with the host's separator.
    fn path_join(&self, parts: &[&str]) -> String;

    /// Reports whether `path` exists.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the query cannot be run.
    fn exists(&self, path: &str) -> Result<bool, HostError>;

    /// Reports whether `path` is a directory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the query cannot be run.
    fn is_dir(&self, path: &str) -> Result<bool, HostError>;

    /// Creates `path` unless it is already a directory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::DirectoryBlocked`] when a file occupies `path`.
    fn mkdir(&self, path: &str) -> Result<(), HostError>;

    /// Creates `path`, returning `false` if anything already occupies it.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the command cannot be run at all.
    fn create_dir_exclusive(&self, path: &str) -> Result<bool, HostError>;

    /// Lists the names directly inside `path`; empty when it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the listing fails.
    fn ls(&self, path: &str) -> Result<Vec<String>, HostError>;

    /// Removes a file or directory tree; missing paths are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when removal fails.
    fn rm(&self, path: &str) -> Result<(), HostError>;

    /// Creates `dest` if needed and extracts `archive` into it.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when either step fails.
    fn extract_archive(&self, archive: &str, dest: &str) -> Result<(), HostError>;

    /// Writes `archive` holding `members`, given relative to `cwd`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when `tar` fails.
    fn create_archive(&self, cwd: &str, archive: &str, members: &[String])
    -> Result<(), HostError>;

    /// Creates an empty marker file.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the file cannot be written.
    fn touch(&self, path: &str) -> Result<(), HostError>;

    /// Returns the contents of a text file.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the file cannot be read.
    fn read_file(&self, path: &str) -> Result<String, HostError>;

    /// Returns at most `max` lines of `path` after skipping `skip`; empty
    /// when the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the command cannot be run.
    fn read_lines(&self, path: &str, skip: usize, max: usize) -> Result<Vec<String>, HostError>;

    /// Names of the conda environments on the host.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when `conda` cannot be queried.
    fn environment_names(&self) -> Result<Vec<String>, HostError>;

    /// Starts a detached job and returns without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the job cannot be handed over.
    fn dispatch(&self, dispatch: &Dispatch) -> Result<(), HostError>;

    /// Converts `file` in `dir` to the format with extension `extension`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the conversion fails.
    fn convert_package(&self, dir: &str, file: &str, extension: &str) -> Result<(), HostError>;

    /// Uploads the `.tar.bz2` packages in `dir` to `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the upload fails.
    fn upload_packages(&self, dir: &str, channel: &str, token: &str) -> Result<(), HostError>;

    /// Copies a local file into a remote directory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the transfer fails.
    fn put(&self, local: &Utf8Path, remote_dir: &str) -> Result<(), HostError>;

    /// Copies a remote file into a local directory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the transfer fails.
    fn get(&self, remote: &str, local_dir: &Utf8Path) -> Result<(), HostError>;

    /// Replaces the session with a freshly opened one.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the host no longer answers.
    fn reconnect(&mut self) -> Result<(), HostError>;
}

/// A detected build host.
#[derive(Debug)]
pub struct Host<R: CommandRunner + Clone> {
    session: RemoteSession<R>,
    platform: Box<dyn Platform>,
    work_dir: String,
}

impl<R: CommandRunner + Clone> Host<R> {
    /// Detects the target kind of `address`, initialises conda and creates
    /// the work directory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Connection`] when no candidate probe succeeds, or
    /// the failure of the initialisation commands.
    pub fn connect(address: &str, config: &SessionConfig, runner: R) -> Result<Self, HostError> {
        let mut attempts = Vec::new();
        for platform in candidates() {
            let kind = platform.kind();
            debug!(address, %kind, "attempting to connect");
            let target = SessionTarget::new(address, user_for(config, kind));
            match RemoteSession::open(target, config.clone(), runner.clone(), platform.probe()) {
                Ok(session) => return Self::initialise(session, platform),
                Err(err) => {
                    debug!(address, %kind, error = %err, "probe failed");
                    attempts.push(format!("{kind}: {err}"));
                }
            }
        }
        Err(HostError::Connection {
            address: address.to_owned(),
            attempts: attempts.join("; "),
        })
    }

    fn initialise(session: RemoteSession<R>, platform: Box<dyn Platform>) -> Result<Self, HostError> {
        info!(host = %session.target(), kind = %platform.kind(), "connected");
        session.run(platform.conda_init())?;
        let work_dir = platform.path_join(&[platform.top_dir(), WORK_DIR_NAME]);
        let host = Self {
            session,
            platform,
            work_dir,
        };
        host.mkdir(&host.work_dir)?;
        Ok(host)
    }

    fn answers_yes(&self, command: &str) -> Result<bool, HostError> {
        Ok(self.session.run(command)?.trim() == "Yes")
    }
}

fn user_for(config: &SessionConfig, kind: TargetKind) -> &str {
    match kind {
        TargetKind::Posix => &config.posix_user,
        TargetKind::Windows => &config.windows_user,
    }
}

impl<R: CommandRunner + Clone> RemoteHost for Host<R> {
    fn kind(&self) -> TargetKind {
        self.platform.kind()
    }

    fn address(&self) -> &str {
        &self.session.target().address
    }

    fn work_dir(&self) -> &str {
        &self.work_dir
    }

    fn package_dir(&self) -> &'static str {
        self.platform.package_dir()
    }

    fn installs_drivers(&self) -> bool {
        self.platform.driver_install(&self.work_dir).is_some()
    }

    fn path_join(&self, parts: &[&str]) -> String {
        self.platform.path_join(parts)
    }

    fn exists(&self, path: &str) -> Result<bool, HostError> {
        self.answers_yes(&self.platform.exists(path))
    }

    fn is_dir(&self, path: &str) -> Result<bool, HostError> {
        self.answers_yes(&self.platform.is_dir(path))
    }

    fn mkdir(&self, path: &str) -> Result<(), HostError> {
        if self.is_dir(path)? {
            return Ok(());
        }
        if self.exists(path)? {
            return Err(HostError::DirectoryBlocked {
                path: path.to_owned(),
            });
        }
        self.session.run(&self.platform.mkdir(path))?;
        Ok(())
    }

    fn create_dir_exclusive(&self, path: &str) -> Result<bool, HostError> {
        Ok(self
            .session
            .run_quiet(&self.platform.mkdir_exclusive(path))?
            .is_some())
    }

    fn ls(&self, path: &str) -> Result<Vec<String>, HostError> {
        let listing = self.session.run(&self.platform.list(path))?;
        Ok(listing
            .lines()
            .map(str::trim_end)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn rm(&self, path: &str) -> Result<(), HostError> {
        if !self.exists(path)? {
            return Ok(());
        }
        let is_dir = self.is_dir(path)?;
        self.session.run(&self.platform.remove(path, is_dir))?;
        Ok(())
    }

    fn extract_archive(&self, archive: &str, dest: &str) -> Result<(), HostError> {
        self.mkdir(dest)?;
        self.session.run(&self.platform.extract(archive, dest))?;
        Ok(())
    }

    fn create_archive(
        &self,
        cwd: &str,
        archive: &str,
        members: &[String],
    ) -> Result<(), HostError> {
        self.session
            .run(&self.platform.create_archive(cwd, archive, members))?;
        Ok(())
    }

    fn touch(&self, path: &str) -> Result<(), HostError> {
        self.session.run(&self.platform.touch(path))?;
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<String, HostError> {
        Ok(self.session.run(&self.platform.cat(path))?)
    }

    fn read_lines(&self, path: &str, skip: usize, max: usize) -> Result<Vec<String>, HostError> {
        let chunk = self
            .session
            .run_quiet(&self.platform.tail(path, skip, max))?
            .unwrap_or_default();
        Ok(chunk
            .lines()
            .map(|line| line.trim_end_matches('\r').to_owned())
            .collect())
    }

    fn environment_names(&self) -> Result<Vec<String>, HostError> {
        let listing = self.session.run(toolchain::LIST_ENVIRONMENTS)?;
        Ok(toolchain::parse_environments(&listing))
    }

    fn dispatch(&self, dispatch: &Dispatch) -> Result<(), HostError> {
        let command = self.render(dispatch)?;
        self.session.run_async(&command)?;
        Ok(())
    }

    fn convert_package(&self, dir: &str, file: &str, extension: &str) -> Result<(), HostError> {
        let convert = toolchain::convert(self.platform.as_ref(), file, extension);
        let command = toolchain::activated(&self.platform.in_dir(dir, &convert));
        self.session.run(&command)?;
        Ok(())
    }

    fn upload_packages(&self, dir: &str, channel: &str, token: &str) -> Result<(), HostError> {
        let platform = self.platform.as_ref();
        let command = toolchain::upload(platform, dir, channel, token);
        let shown = toolchain::upload(platform, dir, channel, "***");
        self.session.run_displayed(&command, &shown)?;
        Ok(())
    }

    fn put(&self, local: &Utf8Path, remote_dir: &str) -> Result<(), HostError> {
        self.session
            .put(local, &self.platform.transfer_path(remote_dir))?;
        Ok(())
    }

    fn get(&self, remote: &str, local_dir: &Utf8Path) -> Result<(), HostError> {
        self.session
            .get(&self.platform.transfer_path(remote), local_dir)?;
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), HostError> {
        debug!(host = %self.session.target(), "reconnecting");
        self.session = self.session.reopen(self.platform.probe())?;
        Ok(())
    }
}

impl<R: CommandRunner + Clone> Host<R> {
    /// Renders the full detached command line for `dispatch`.
    fn render(&self, dispatch: &Dispatch) -> Result<String, HostError> {
        let platform = self.platform.as_ref();
        let work = match dispatch.job {
            RemoteJob::CreateEnvironment => toolchain::create_environment(),
            RemoteJob::InstallDriver => platform.driver_install(&self.work_dir).ok_or(
                HostError::Unsupported {
                    kind: platform.kind(),
                    operation: "driver installation",
                },
            )?,
            RemoteJob::Build { ref workspace } => {
                platform.in_dir(&self.work_dir, &toolchain::build(platform, workspace))
            }
        };

        let mut job = work;
        if let Some(ref log) = dispatch.log {
            job = platform.redirect(&job, log);
        }
        job = format!(
            "{job} && {} || {}",
            platform.touch(&dispatch.ready),
            platform.touch(&dispatch.failed)
        );
        if let Some(ref lock) = dispatch.release {
            job = platform.sequence(&job, &platform.remove(lock, true));
        }
        Ok(platform.detach(&job))
    }
}
