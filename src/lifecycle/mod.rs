//! Build lifecycle of packages on a remote host.
//!
//! [`BuildController`] sequences environment preparation, data staging, build
//! dispatch and artifact retrieval for named packages. Remote work runs
//! detached from the SSH channel, so every completion signal is read from
//! sentinel files by polling; nothing here waits on a remote exit status.
//!
//! The controller only issues operations through [`RemoteHost`]; it never
//! renders command text itself.

use std::time::Duration;

use camino::Utf8PathBuf;
use tempfile::TempDir;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::bundle::{ArtifactPackager, BundleError};
use crate::host::toolchain::{BUILD_DIR, ENV_NAME};
use crate::host::{Dispatch, HostError, RemoteHost, RemoteJob};
use crate::sentinel::{BuildStatus, Stage, StageState, build_status, stage_state};

mod download;
mod transmute;

pub use transmute::{CONDA, Conversion, TAR_BZ2, is_package_archive, plan_conversions};

const TAIL_INTERVAL: Duration = Duration::from_secs(3);
const PREPARE_INTERVAL: Duration = Duration::from_secs(3);
const WAIT_INTERVAL: Duration = Duration::from_secs(60);

/// Lock directory held while a driver installation runs.
const DRIVER_LOCK: &str = "cuda.lock";

/// Maximum number of log lines fetched per poll.
pub const MAX_LOG_LINES: usize = 1000;

/// Errors surfaced by lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Raised when a host operation fails.
    #[error(transparent)]
    Host(#[from] HostError),
    /// Raised when a stage reports failure through its sentinel.
    #[error("{stage} stage failed")]
    StageFailed {
        /// Stage whose `failed` sentinel was found.
        stage: Stage,
    },
    /// Raised when another build of the same package holds the lock.
    #[error("package {package} is already being built; remove {lock} if no build is running")]
    Busy {
        /// Package being built.
        package: String,
        /// Lock directory on the host.
        lock: String,
    },
    /// Raised when the artifacts expected for a download are absent.
    #[error("nothing to download for {package}: {reason}")]
    Transfer {
        /// Package being downloaded.
        package: String,
        /// Why nothing could be transferred.
        reason: String,
    },
    /// Raised when the local data bundle cannot be produced.
    #[error(transparent)]
    Bundle(#[from] BundleError),
    /// Raised when a local file operation fails.
    #[error("local file operation on {path} failed: {message}")]
    Io {
        /// Local path involved.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Drives the build lifecycle of packages on one host.
#[derive(Debug)]
pub struct BuildController<H: RemoteHost> {
    host: H,
    tail_interval: Duration,
    prepare_interval: Duration,
    wait_interval: Duration,
}

impl<H: RemoteHost> BuildController<H> {
    /// Creates a controller with the default polling intervals.
    #[must_use]
    pub const fn new(host: H) -> Self {
        Self {
            host,
            tail_interval: TAIL_INTERVAL,
            prepare_interval: PREPARE_INTERVAL,
            wait_interval: WAIT_INTERVAL,
        }
    }

    /// Overrides the delay between log polls in `watch_build`.
    ///
    /// This is primarily used by tests to keep polling scenarios fast.
    #[must_use]
    pub const fn with_tail_interval(mut self, interval: Duration) -> Self {
        self.tail_interval = interval;
        self
    }

    /// Overrides the delay between sentinel polls in `watch_prepare`.
    ///
    /// This is primarily used by tests to keep polling scenarios fast.
    #[must_use]
    pub const fn with_prepare_interval(mut self, interval: Duration) -> Self {
        self.prepare_interval = interval;
        self
    }

    /// Overrides the delay between status polls in `wait`.
    ///
    /// This is primarily used by tests to keep polling scenarios fast.
    #[must_use]
    pub const fn with_wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval = interval;
        self
    }

    /// Host the controller drives.
    #[must_use]
    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Remote workspace of `package`.
    #[must_use]
    pub fn workspace(&self, package: &str) -> String {
        self.host.path_join(&[self.host.work_dir(), package])
    }

    /// Directory holding `package`'s built archives.
    #[must_use]
    pub fn output_dir(&self, package: &str) -> String {
        let workspace = self.workspace(package);
        self.host
            .path_join(&[&workspace, BUILD_DIR, self.host.package_dir()])
    }

    fn work_path(&self, name: &str) -> String {
        self.host.path_join(&[self.host.work_dir(), name])
    }

    fn lock_path(&self, package: &str) -> String {
        self.work_path(&format!("{package}.lock"))
    }

    /// Makes the host ready to build.
    ///
    /// When the build environment already exists `conda.ready` is written
    /// synchronously; otherwise its creation is dispatched. Hosts with a
    /// driver stage also get the driver installation dispatched unless a
    /// previous run left either of its sentinels or an installation is still
    /// running. A running installation holds `cuda.lock`, which the detached
    /// job removes when it finishes.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Host`] when a host operation fails.
    pub fn prepare(&self) -> Result<(), LifecycleError> {
        self.host.mkdir(self.host.work_dir())?;

        if self
            .host
            .environment_names()?
            .iter()
            .any(|name| name == ENV_NAME)
        {
            info!("environment '{ENV_NAME}' already exists");
            self.host.rm(&self.work_path(Stage::Conda.failed()))?;
            self.host.touch(&self.work_path(Stage::Conda.ready()))?;
        } else {
            self.dispatch_stage(Stage::Conda, RemoteJob::CreateEnvironment, None)?;
            info!("environment '{ENV_NAME}' is being created");
        }

        if self.host.installs_drivers() {
            let names = self.host.ls(self.host.work_dir())?;
            if stage_state(Stage::Cuda, &names).is_terminal() {
                info!("CUDA is already installed");
            } else {
                self.install_drivers()?;
            }
        }
        Ok(())
    }

    fn install_drivers(&self) -> Result<(), LifecycleError> {
        let lock = self.work_path(DRIVER_LOCK);
        if !self.host.create_dir_exclusive(&lock)? {
            info!("CUDA installation is already running");
            return Ok(());
        }
        if let Err(err) = self.dispatch_stage(Stage::Cuda, RemoteJob::InstallDriver, Some(&lock)) {
            if let Err(cleanup) = self.host.rm(&lock) {
                warn!(lock, error = %cleanup, "failed to release driver lock");
            }
            return Err(err);
        }
        info!("CUDA is being installed");
        Ok(())
    }

    fn dispatch_stage(
        &self,
        stage: Stage,
        job: RemoteJob,
        release: Option<&str>,
    ) -> Result<(), LifecycleError> {
        let ready = self.work_path(stage.ready());
        let failed = self.work_path(stage.failed());
        self.host.rm(&ready)?;
        self.host.rm(&failed)?;
        let mut dispatch = Dispatch::new(job, ready, failed);
        if let Some(log) = stage.log() {
            dispatch = dispatch.with_log(self.work_path(log));
        }
        if let Some(lock) = release {
            dispatch = dispatch.releasing(lock);
        }
        self.host.dispatch(&dispatch)?;
        Ok(())
    }

    /// Polls the preparation sentinels until every stage has finished.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::StageFailed`] naming the first stage that
    /// failed, after all stages have finished.
    pub async fn watch_prepare(&self) -> Result<(), LifecycleError> {
        let mut stages = vec![Stage::Conda];
        if self.host.installs_drivers() {
            stages.push(Stage::Cuda);
        }

        let mut failures = Vec::new();
        for stage in stages {
            let mut announced = false;
            loop {
                let names = self.host.ls(self.host.work_dir())?;
                match stage_state(stage, &names) {
                    StageState::Ready => {
                        info!(%stage, "stage is ready");
                        break;
                    }
                    StageState::Failed => {
                        warn!(%stage, "stage failed");
                        failures.push(stage);
                        break;
                    }
                    StageState::Pending => {
                        if !announced {
                            info!(%stage, "waiting for stage to complete");
                            announced = true;
                        }
                        sleep(self.prepare_interval).await;
                    }
                }
            }
        }

        failures
            .first()
            .map_or(Ok(()), |&stage| Err(LifecycleError::StageFailed { stage }))
    }

    /// Builds `package` from a fresh workspace.
    ///
    /// Prepares the host, stages the bundle produced by `packager`, waits for
    /// preparation to finish and dispatches the build. A lock directory keeps
    /// a second build of the same package out until the dispatched job ends.
    /// With `watch` set the call follows the build log until it finishes.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Busy`] when the package is locked, the
    /// failure of any staging step, or [`LifecycleError::StageFailed`] when a
    /// watched stage fails.
    pub async fn build<P: ArtifactPackager + ?Sized>(
        &self,
        package: &str,
        branch: Option<&str>,
        packager: &P,
        watch: bool,
    ) -> Result<(), LifecycleError> {
        info!(package, host = self.host.address(), "building");
        self.prepare()?;

        let lock = self.lock_path(package);
        if !self.host.create_dir_exclusive(&lock)? {
            return Err(LifecycleError::Busy {
                package: package.to_owned(),
                lock,
            });
        }

        if let Err(err) = self.stage_and_dispatch(package, branch, packager, &lock).await {
            if let Err(cleanup) = self.host.rm(&lock) {
                warn!(lock, error = %cleanup, "failed to release build lock");
            }
            return Err(err);
        }

        if watch {
            self.watch_build(package).await?;
        }
        Ok(())
    }

    async fn stage_and_dispatch<P: ArtifactPackager + ?Sized>(
        &self,
        package: &str,
        branch: Option<&str>,
        packager: &P,
        lock: &str,
    ) -> Result<(), LifecycleError> {
        let staging = TempDir::new().map_err(|err| LifecycleError::Io {
            path: Utf8PathBuf::from("<temporary directory>"),
            message: err.to_string(),
        })?;
        let staging_dir = Utf8PathBuf::from_path_buf(staging.path().to_path_buf()).map_err(
            |path| LifecycleError::Io {
                path: Utf8PathBuf::from(path.to_string_lossy().into_owned()),
                message: String::from("temporary directory path is not valid UTF-8"),
            },
        )?;

        let bundle = packager.package(package, branch, &staging_dir).await?;
        let bundle_name = bundle.file_name().ok_or_else(|| LifecycleError::Io {
            path: bundle.clone(),
            message: String::from("bundle path has no file name"),
        })?;

        let work_dir = self.host.work_dir().to_owned();
        self.host.put(&bundle, &work_dir)?;
        info!("data bundle uploaded");

        let workspace = self.workspace(package);
        let remote_bundle = self.work_path(bundle_name);
        self.host.rm(&workspace)?;
        self.host.extract_archive(&remote_bundle, &workspace)?;
        self.host.rm(&remote_bundle)?;
        info!(package, "data ready on host");

        self.watch_prepare().await?;

        self.host
            .mkdir(&self.host.path_join(&[&workspace, BUILD_DIR]))?;
        let dispatch = Dispatch::new(
            RemoteJob::Build {
                workspace: workspace.clone(),
            },
            self.host.path_join(&[&workspace, Stage::Build.ready()]),
            self.host.path_join(&[&workspace, Stage::Build.failed()]),
        )
        .with_log(self.build_log(package))
        .releasing(lock);
        self.host.dispatch(&dispatch)?;
        info!(package, "build is running");
        Ok(())
    }

    fn build_log(&self, package: &str) -> String {
        let workspace = self.workspace(package);
        self.host
            .path_join(&[&workspace, crate::sentinel::BUILD_LOG])
    }

    /// Reports the build status of `package` from one workspace listing.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Host`] when the listing fails.
    pub fn status(&self, package: &str) -> Result<BuildStatus, LifecycleError> {
        let names = self.host.ls(&self.workspace(package))?;
        Ok(build_status(&names))
    }

    /// Follows `package`'s build log until the build finishes.
    ///
    /// The log is read in chunks of at most [`MAX_LOG_LINES`] lines from a
    /// cursor that only moves forward. Once a sentinel shows up the rest of
    /// the log is drained before returning.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::StageFailed`] when the build fails.
    pub async fn watch_build(&self, package: &str) -> Result<(), LifecycleError> {
        let log = self.build_log(package);
        let mut cursor = 0_usize;
        loop {
            let status = self.status(package)?;
            if status.is_terminal() {
                while self.read_log_chunk(&log, &mut cursor)? == MAX_LOG_LINES {}
            } else {
                self.read_log_chunk(&log, &mut cursor)?;
            }

            match status {
                BuildStatus::Complete => {
                    info!(package, "build complete");
                    return Ok(());
                }
                BuildStatus::Failed => {
                    error!(package, "build failed");
                    return Err(LifecycleError::StageFailed {
                        stage: Stage::Build,
                    });
                }
                BuildStatus::NotStarted | BuildStatus::Building => {
                    sleep(self.tail_interval).await;
                }
            }
        }
    }

    fn read_log_chunk(&self, log: &str, cursor: &mut usize) -> Result<usize, LifecycleError> {
        let lines = self.host.read_lines(log, *cursor, MAX_LOG_LINES)?;
        for line in &lines {
            info!("{line}");
        }
        *cursor = cursor.saturating_add(lines.len());
        Ok(lines.len())
    }

    /// Blocks until `package`'s build finishes, reconnecting between polls.
    ///
    /// Returns `true` when the build succeeded and `false` when it failed.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Host`] when polling or reconnecting fails.
    pub async fn wait(&mut self, package: &str) -> Result<bool, LifecycleError> {
        loop {
            match self.status(package)? {
                BuildStatus::Complete => {
                    info!(package, "build complete");
                    return Ok(true);
                }
                BuildStatus::Failed => {
                    error!(package, "build failed");
                    return Ok(false);
                }
                BuildStatus::NotStarted => info!(package, "waiting for build to start"),
                BuildStatus::Building => info!(package, "waiting for the build to finish"),
            }
            sleep(self.wait_interval).await;
            self.host.reconnect()?;
        }
    }

    /// Returns `package`'s build log, first waiting for the build to finish
    /// when `wait` is set.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Host`] when waiting or reading fails.
    pub async fn log(&mut self, package: &str, wait: bool) -> Result<String, LifecycleError> {
        if wait {
            self.wait(package).await?;
        }
        Ok(self.host.read_file(&self.build_log(package))?)
    }

    /// Converts every archive in `package`'s output directory that lacks its
    /// counterpart in the other format. Returns the number of conversions.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Host`] when listing or converting fails.
    pub fn transmute(&self, package: &str) -> Result<usize, LifecycleError> {
        let output_dir = self.output_dir(package);
        let names = self.host.ls(&output_dir)?;
        let conversions = plan_conversions(&names);
        if conversions.is_empty() {
            info!(package, "every package exists in both formats");
        }
        for conversion in &conversions {
            info!(file = conversion.file, to = conversion.extension, "transmuting");
            self.host
                .convert_package(&output_dir, &conversion.file, conversion.extension)?;
        }
        Ok(conversions.len())
    }

    /// Uploads `package`'s `.tar.bz2` archives to `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Host`] when the upload fails.
    pub fn upload(&self, package: &str, channel: &str, token: &str) -> Result<(), LifecycleError> {
        let output_dir = self.output_dir(package);
        info!(directory = output_dir, channel, "uploading packages");
        self.host.upload_packages(&output_dir, channel, token)?;
        info!("done");
        Ok(())
    }
}
