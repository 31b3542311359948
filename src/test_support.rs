//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedRunner`] replays canned `ssh`/`scp` outputs so command text can
//! be asserted exactly. [`FakeHost`] goes one level higher: it implements
//! [`RemoteHost`] over an in-memory filesystem whose detached jobs complete
//! instantly (or on a schedule), which lets lifecycle tests run without any
//! process or network access.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex, MutexGuard};

use crate::bundle::{ArtifactPackager, BundleError, PackageFuture};
use crate::host::toolchain::ENV_NAME;
use crate::host::{Dispatch, HostError, RemoteHost, RemoteJob};
use crate::platform::{Platform, Posix, TargetKind, Windows};
use crate::session::{CommandOutput, CommandRunner, SessionError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status with no output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SessionError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| SessionError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// How a detached job dispatched to a [`FakeHost`] ends.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum JobOutcome {
    /// The job succeeds as soon as it is dispatched.
    #[default]
    Succeed,
    /// The job fails as soon as it is dispatched.
    Fail,
    /// The job never reports; tests drive progress with scheduled changes.
    Hang,
}

/// Kinds of detached job a [`FakeHost`] distinguishes.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum JobKind {
    /// Conda environment creation.
    Environment,
    /// GPU driver installation.
    Driver,
    /// Package build.
    Build,
}

impl JobKind {
    const fn of(job: &RemoteJob) -> Self {
        match job {
            RemoteJob::CreateEnvironment => Self::Environment,
            RemoteJob::InstallDriver => Self::Driver,
            RemoteJob::Build { .. } => Self::Build,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Node {
    Dir,
    File {
        lines: Vec<String>,
        members: Vec<(String, Vec<String>)>,
    },
}

impl Node {
    const fn empty_file() -> Self {
        Self::File {
            lines: Vec::new(),
            members: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
enum Change {
    Touch(String),
    Append(String, Vec<String>),
}

#[derive(Debug, Default)]
struct FakeState {
    nodes: BTreeMap<String, Node>,
    environments: Vec<String>,
    outcomes: BTreeMap<JobKind, JobOutcome>,
    build_outputs: Vec<String>,
    build_log: Vec<String>,
    scheduled: Vec<(usize, Change)>,
    listings: usize,
    dispatches: Vec<Dispatch>,
    conversions: Vec<(String, String)>,
    uploads: Vec<(String, String)>,
    log_reads: Vec<usize>,
    transfers_in: Vec<String>,
    reconnects: usize,
}

/// In-memory [`RemoteHost`] for lifecycle tests.
#[derive(Clone, Debug)]
pub struct FakeHost {
    kind: TargetKind,
    state: Rc<RefCell<FakeState>>,
}

impl FakeHost {
    /// A POSIX host with an empty work directory and no environments.
    #[must_use]
    pub fn posix() -> Self {
        Self::new(TargetKind::Posix)
    }

    /// A Windows host with an empty work directory and no environments.
    #[must_use]
    pub fn windows() -> Self {
        Self::new(TargetKind::Windows)
    }

    fn new(kind: TargetKind) -> Self {
        let host = Self {
            kind,
            state: Rc::new(RefCell::new(FakeState {
                build_log: vec![String::from("compiling"), String::from("linking")],
                ..FakeState::default()
            })),
        };
        let work_dir = host.work_dir().to_owned();
        host.state.borrow_mut().nodes.insert(work_dir, Node::Dir);
        host.state
            .borrow_mut()
            .build_outputs
            .push(String::from("{package}-1.0-0.tar.bz2"));
        host
    }

    const fn platform(&self) -> &'static dyn Platform {
        match self.kind {
            TargetKind::Posix => &Posix,
            TargetKind::Windows => &Windows,
        }
    }

    fn separator(&self) -> char {
        self.platform().separator()
    }

    /// Lists `name` among the host's conda environments.
    pub fn add_environment(&self, name: &str) {
        self.state.borrow_mut().environments.push(name.to_owned());
    }

    /// Sets how jobs of `kind` end.
    pub fn set_outcome(&self, kind: JobKind, outcome: JobOutcome) {
        self.state.borrow_mut().outcomes.insert(kind, outcome);
    }

    /// Names of the archives a successful build produces; `{package}` is
    /// replaced by the package name.
    pub fn set_build_outputs(&self, names: &[&str]) {
        self.state.borrow_mut().build_outputs = names.iter().map(|&name| name.to_owned()).collect();
    }

    /// Lines a finished build leaves in its log.
    pub fn set_build_log(&self, lines: &[&str]) {
        self.state.borrow_mut().build_log = lines.iter().map(|&line| line.to_owned()).collect();
    }

    /// Creates an empty file, and any parents, at `path`.
    pub fn seed_file(&self, path: &str) {
        self.insert(path, Node::empty_file());
    }

    /// Creates an empty directory at `path`.
    pub fn seed_dir(&self, path: &str) {
        self.insert(path, Node::Dir);
    }

    /// Creates a file holding `lines` at `path`.
    pub fn seed_lines(&self, path: &str, lines: &[&str]) {
        self.insert(
            path,
            Node::File {
                lines: lines.iter().map(|&line| line.to_owned()).collect(),
                members: Vec::new(),
            },
        );
    }

    /// Creates an empty file at `path` once `after` more listings happened.
    pub fn touch_after(&self, after: usize, path: &str) {
        self.schedule(after, Change::Touch(path.to_owned()));
    }

    /// Appends `lines` to `path` once `after` more listings happened.
    pub fn append_after(&self, after: usize, path: &str, lines: &[&str]) {
        let owned = lines.iter().map(|&line| line.to_owned()).collect();
        self.schedule(after, Change::Append(path.to_owned(), owned));
    }

    fn schedule(&self, after: usize, change: Change) {
        let mut state = self.state.borrow_mut();
        let due = state.listings.saturating_add(after);
        state.scheduled.push((due, change));
    }

    /// Whether anything exists at `path`.
    #[must_use]
    pub fn has(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    /// Number of times `path` itself is stored (0 or 1).
    #[must_use]
    pub fn count(&self, path: &str) -> usize {
        usize::from(self.state.borrow().nodes.contains_key(path))
    }

    /// Lines of the file at `path`.
    #[must_use]
    pub fn lines(&self, path: &str) -> Vec<String> {
        match self.state.borrow().nodes.get(path) {
            Some(Node::File { lines, .. }) => lines.clone(),
            _ => Vec::new(),
        }
    }

    /// Jobs dispatched so far.
    #[must_use]
    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.state.borrow().dispatches.clone()
    }

    /// Conversions run so far, as `(file, extension)`.
    #[must_use]
    pub fn conversions(&self) -> Vec<(String, String)> {
        self.state.borrow().conversions.clone()
    }

    /// Uploads run so far, as `(directory, channel)`.
    #[must_use]
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.state.borrow().uploads.clone()
    }

    /// Cursor positions passed to `read_lines`.
    #[must_use]
    pub fn log_reads(&self) -> Vec<usize> {
        self.state.borrow().log_reads.clone()
    }

    /// Remote paths of files received through `put`.
    #[must_use]
    pub fn transfers_in(&self) -> Vec<String> {
        self.state.borrow().transfers_in.clone()
    }

    /// Number of reconnections.
    #[must_use]
    pub fn reconnects(&self) -> usize {
        self.state.borrow().reconnects
    }

    fn prefix(&self, path: &str) -> String {
        let separator = self.separator();
        let mut prefix = path.trim_end_matches(separator).to_owned();
        prefix.push(separator);
        prefix
    }

    fn lookup(&self, path: &str) -> Option<Node> {
        let state = self.state.borrow();
        if let Some(node) = state.nodes.get(path) {
            return Some(node.clone());
        }
        let prefix = self.prefix(path);
        state
            .nodes
            .keys()
            .any(|key| key.starts_with(&prefix))
            .then_some(Node::Dir)
    }

    fn insert(&self, path: &str, node: Node) {
        self.state.borrow_mut().nodes.insert(path.to_owned(), node);
    }

    fn remove_tree(&self, path: &str) {
        let prefix = self.prefix(path);
        self.state
            .borrow_mut()
            .nodes
            .retain(|key, _| key != path && !key.starts_with(&prefix));
    }

    fn apply(&self, change: Change) {
        match change {
            Change::Touch(path) => self.seed_file(&path),
            Change::Append(path, extra) => {
                let mut state = self.state.borrow_mut();
                let node = state.nodes.entry(path).or_insert_with(Node::empty_file);
                if let Node::File { lines, .. } = node {
                    lines.extend(extra);
                }
            }
        }
    }

    fn run_due_changes(&self) {
        let due: Vec<Change> = {
            let mut state = self.state.borrow_mut();
            state.listings = state.listings.saturating_add(1);
            let now = state.listings;
            let (ready, later): (Vec<_>, Vec<_>) = state
                .scheduled
                .drain(..)
                .partition(|(when, _)| *when <= now);
            state.scheduled = later;
            ready.into_iter().map(|(_, change)| change).collect()
        };
        for change in due {
            self.apply(change);
        }
    }

    fn finish_job(&self, dispatch: &Dispatch) {
        let kind = JobKind::of(&dispatch.job);
        let outcome = self
            .state
            .borrow()
            .outcomes
            .get(&kind)
            .copied()
            .unwrap_or_default();
        if outcome == JobOutcome::Hang {
            return;
        }

        if let Some(ref log) = dispatch.log {
            let lines = self.state.borrow().build_log.clone();
            self.insert(
                log,
                Node::File {
                    lines,
                    members: Vec::new(),
                },
            );
        }
        if outcome == JobOutcome::Succeed {
            match dispatch.job {
                RemoteJob::CreateEnvironment => self.add_environment(ENV_NAME),
                RemoteJob::InstallDriver => {}
                RemoteJob::Build { ref workspace } => self.write_outputs(workspace),
            }
            self.seed_file(&dispatch.ready);
        } else {
            self.seed_file(&dispatch.failed);
        }
        if let Some(ref lock) = dispatch.release {
            self.remove_tree(lock);
        }
    }

    fn write_outputs(&self, workspace: &str) {
        let package = workspace
            .rsplit(self.separator())
            .next()
            .unwrap_or_default()
            .to_owned();
        let names = self.state.borrow().build_outputs.clone();
        let output_dir = self.path_join(&[workspace, "build", self.package_dir()]);
        for name in names {
            let file = name.replace("{package}", &package);
            self.seed_file(&self.path_join(&[&output_dir, &file]));
        }
    }

    fn files_below(&self, path: &str) -> Vec<(String, Vec<String>)> {
        let prefix = self.prefix(path);
        let separator = self.separator();
        self.state
            .borrow()
            .nodes
            .iter()
            .filter_map(|(key, node)| {
                let rest = key.strip_prefix(&prefix)?;
                match node {
                    Node::File { lines, .. } => Some((rest.replace(separator, "/"), lines.clone())),
                    Node::Dir => None,
                }
            })
            .collect()
    }

    fn command_failure(command: String) -> HostError {
        HostError::Session(SessionError::CommandFailure {
            command,
            status: Some(1),
            status_text: String::from("1"),
            stderr: String::from("No such file or directory"),
        })
    }
}

impl RemoteHost for FakeHost {
    fn kind(&self) -> TargetKind {
        self.kind
    }

    fn address(&self) -> &str {
        "fake-host"
    }

    fn work_dir(&self) -> &str {
        match self.kind {
            TargetKind::Posix => "/tmp/sisyphus",
            TargetKind::Windows => "\\sisyphus",
        }
    }

    fn package_dir(&self) -> &'static str {
        self.platform().package_dir()
    }

    fn installs_drivers(&self) -> bool {
        self.kind == TargetKind::Windows
    }

    fn path_join(&self, parts: &[&str]) -> String {
        self.platform().path_join(parts)
    }

    fn exists(&self, path: &str) -> Result<bool, HostError> {
        Ok(self.has(path))
    }

    fn is_dir(&self, path: &str) -> Result<bool, HostError> {
        Ok(matches!(self.lookup(path), Some(Node::Dir)))
    }

    fn mkdir(&self, path: &str) -> Result<(), HostError> {
        match self.lookup(path) {
            Some(Node::Dir) => Ok(()),
            Some(Node::File { .. }) => Err(HostError::DirectoryBlocked {
                path: path.to_owned(),
            }),
            None => {
                self.insert(path, Node::Dir);
                Ok(())
            }
        }
    }

    fn create_dir_exclusive(&self, path: &str) -> Result<bool, HostError> {
        if self.has(path) {
            return Ok(false);
        }
        self.insert(path, Node::Dir);
        Ok(true)
    }

    fn ls(&self, path: &str) -> Result<Vec<String>, HostError> {
        self.run_due_changes();
        let prefix = self.prefix(path);
        let separator = self.separator();
        let names: BTreeSet<String> = self
            .state
            .borrow()
            .nodes
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split(separator).next())
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(names.into_iter().collect())
    }

    fn rm(&self, path: &str) -> Result<(), HostError> {
        self.remove_tree(path);
        Ok(())
    }

    fn extract_archive(&self, archive: &str, dest: &str) -> Result<(), HostError> {
        self.mkdir(dest)?;
        let stored = self.state.borrow().nodes.get(archive).cloned();
        let Some(Node::File { members, .. }) = stored else {
            return Err(Self::command_failure(format!("tar -x -f {archive}")));
        };
        for (member, lines) in members {
            let relative = member.replace('/', &self.separator().to_string());
            let path = self.path_join(&[dest, &relative]);
            self.insert(
                &path,
                Node::File {
                    lines,
                    members: Vec::new(),
                },
            );
        }
        Ok(())
    }

    fn create_archive(&self, cwd: &str, archive: &str, members: &[String]) -> Result<(), HostError> {
        let mut collected = Vec::new();
        for member in members {
            let relative = member.replace('/', &self.separator().to_string());
            let path = self.path_join(&[cwd, &relative]);
            match self.lookup(&path) {
                Some(Node::File { lines, .. }) => collected.push((member.clone(), lines)),
                Some(Node::Dir) => collected.extend(
                    self.files_below(&path)
                        .into_iter()
                        .map(|(rest, lines)| (format!("{member}/{rest}"), lines)),
                ),
                None => return Err(Self::command_failure(format!("tar -cf {archive} {member}"))),
            }
        }
        self.insert(
            archive,
            Node::File {
                lines: Vec::new(),
                members: collected,
            },
        );
        Ok(())
    }

    fn touch(&self, path: &str) -> Result<(), HostError> {
        if !self.has(path) {
            self.seed_file(path);
        }
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<String, HostError> {
        match self.lookup(path) {
            Some(Node::File { lines, .. }) => {
                Ok(lines.iter().map(|line| format!("{line}\n")).collect())
            }
            _ => Err(Self::command_failure(format!("cat {path}"))),
        }
    }

    fn read_lines(&self, path: &str, skip: usize, max: usize) -> Result<Vec<String>, HostError> {
        self.state.borrow_mut().log_reads.push(skip);
        Ok(self
            .lines(path)
            .into_iter()
            .skip(skip)
            .take(max)
            .collect())
    }

    fn environment_names(&self) -> Result<Vec<String>, HostError> {
        Ok(self.state.borrow().environments.clone())
    }

    fn dispatch(&self, dispatch: &Dispatch) -> Result<(), HostError> {
        if dispatch.job == RemoteJob::InstallDriver && !self.installs_drivers() {
            return Err(HostError::Unsupported {
                kind: self.kind,
                operation: "driver installation",
            });
        }
        self.state.borrow_mut().dispatches.push(dispatch.clone());
        self.finish_job(dispatch);
        Ok(())
    }

    fn convert_package(&self, dir: &str, file: &str, extension: &str) -> Result<(), HostError> {
        let stem = file
            .strip_suffix(".tar.bz2")
            .or_else(|| file.strip_suffix(".conda"))
            .ok_or_else(|| Self::command_failure(format!("cph t {file} {extension}")))?;
        self.seed_file(&self.path_join(&[dir, &format!("{stem}{extension}")]));
        self.state
            .borrow_mut()
            .conversions
            .push((file.to_owned(), extension.to_owned()));
        Ok(())
    }

    fn upload_packages(&self, dir: &str, channel: &str, _token: &str) -> Result<(), HostError> {
        self.state
            .borrow_mut()
            .uploads
            .push((dir.to_owned(), channel.to_owned()));
        Ok(())
    }

    fn put(&self, local: &Utf8Path, remote_dir: &str) -> Result<(), HostError> {
        let transfer_error = |message: String| {
            HostError::Session(SessionError::TransferFailure {
                source_path: local.to_string(),
                destination: remote_dir.to_owned(),
                status_text: String::from("1"),
                stderr: message,
            })
        };
        let name = local
            .file_name()
            .ok_or_else(|| transfer_error(String::from("no file name")))?;
        let members = read_tar_members(local).map_err(|err| transfer_error(err.to_string()))?;
        let remote = self.path_join(&[remote_dir, name]);
        self.insert(
            &remote,
            Node::File {
                lines: Vec::new(),
                members,
            },
        );
        self.state.borrow_mut().transfers_in.push(remote);
        Ok(())
    }

    fn get(&self, remote: &str, local_dir: &Utf8Path) -> Result<(), HostError> {
        let transfer_error = |message: String| {
            HostError::Session(SessionError::TransferFailure {
                source_path: remote.to_owned(),
                destination: local_dir.to_string(),
                status_text: String::from("1"),
                stderr: message,
            })
        };
        let Some(Node::File { members, .. }) = self.lookup(remote) else {
            return Err(transfer_error(String::from("No such file")));
        };
        let name = remote
            .rsplit(self.separator())
            .next()
            .unwrap_or_default();
        write_tar(&local_dir.join(name), &members).map_err(|err| transfer_error(err.to_string()))
    }

    fn reconnect(&mut self) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        state.reconnects = state.reconnects.saturating_add(1);
        Ok(())
    }
}

fn read_tar_members(path: &Utf8Path) -> io::Result<Vec<(String, Vec<String>)>> {
    let mut archive = tar::Archive::new(File::open(path)?);
    let mut members = Vec::new();
    for item in archive.entries()? {
        let mut entry = item?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut contents = String::new();
        io::Read::read_to_string(&mut entry, &mut contents)?;
        members.push((name, contents.lines().map(str::to_owned).collect()));
    }
    Ok(members)
}

fn write_tar(path: &Utf8Path, members: &[(String, Vec<String>)]) -> io::Result<()> {
    let mut builder = tar::Builder::new(File::create(path)?);
    for (name, lines) in members {
        let contents: String = lines.iter().map(|line| format!("{line}\n")).collect();
        let mut header = tar::Header::new_gnu();
        header.set_size(u64::try_from(contents.len()).map_err(io::Error::other)?);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, contents.as_bytes())?;
    }
    builder.finish()
}

/// Packager writing a fixed bundle without touching the network.
#[derive(Clone, Debug)]
pub struct StaticPackager {
    files: Vec<(String, String)>,
    fail: bool,
    calls: Rc<RefCell<Vec<(String, Option<String>)>>>,
}

impl Default for StaticPackager {
    fn default() -> Self {
        Self::with_files(&[
            ("conda_build_config.yaml", "c_compiler:\n  - vs2022\n"),
            ("feedstock/recipe/meta.yaml", "package:\n  name: demo\n"),
        ])
    }
}

impl StaticPackager {
    /// Bundles the given `(path, contents)` pairs.
    #[must_use]
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|&(path, contents)| (path.to_owned(), contents.to_owned()))
                .collect(),
            fail: false,
            calls: Rc::default(),
        }
    }

    /// A packager whose every call fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Calls made so far, as `(package, branch)`.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.borrow().clone()
    }

    fn write(&self, package: &str, out_dir: &Utf8Path) -> Result<Utf8PathBuf, BundleError> {
        if self.fail {
            return Err(BundleError::Archive {
                message: String::from("simulated packaging failure"),
            });
        }
        let bundle = out_dir.join(format!("{package}.tar"));
        let members: Vec<(String, Vec<String>)> = self
            .files
            .iter()
            .map(|(path, contents)| (path.clone(), contents.lines().map(str::to_owned).collect()))
            .collect();
        write_tar(&bundle, &members).map_err(|err| BundleError::Io {
            path: bundle.clone(),
            message: err.to_string(),
        })?;
        Ok(bundle)
    }
}

impl ArtifactPackager for StaticPackager {
    fn package<'a>(
        &'a self,
        package: &'a str,
        branch: Option<&'a str>,
        out_dir: &'a Utf8Path,
    ) -> PackageFuture<'a> {
        self.calls
            .borrow_mut()
            .push((package.to_owned(), branch.map(str::to_owned)));
        let result = self.write(package, out_dir);
        Box::pin(async move { result })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
