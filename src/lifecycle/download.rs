//! Retrieval of build outputs as a single archive.

use std::fs::File;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::{debug, info, warn};

use super::{BuildController, LifecycleError, is_package_archive};
use crate::host::RemoteHost;
use crate::host::toolchain::BUILD_DIR;

impl<H: RemoteHost> BuildController<H> {
    /// Waits for `package`'s build, then copies its outputs under
    /// `destination/<package>/` and returns that directory.
    ///
    /// Without `all` only the archives of the platform output directory are
    /// fetched, after [`BuildController::transmute`] has paired their
    /// formats, and they replace any earlier download of that directory.
    /// With `all` the whole workspace replaces `destination/<package>/`;
    /// this also works for failed builds so their trees can be inspected.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Transfer`] when the build failed (without
    /// `all`) or there is nothing to fetch, and [`LifecycleError::Io`] when
    /// the local copy cannot be written.
    pub async fn download(
        &mut self,
        package: &str,
        destination: &Utf8Path,
        all: bool,
    ) -> Result<Utf8PathBuf, LifecycleError> {
        let succeeded = self.wait(package).await?;
        if succeeded {
            self.transmute(package)?;
        } else if !all {
            return Err(transfer_error(package, "the build failed"));
        }

        let workspace = self.workspace(package);
        let package_dir = self.host.package_dir();
        let (cwd, members) = if all {
            (workspace.clone(), self.host.ls(&workspace)?)
        } else {
            let build_dir = self.host.path_join(&[&workspace, BUILD_DIR]);
            let archives = self
                .host
                .ls(&self.output_dir(package))?
                .into_iter()
                .filter(|name| is_package_archive(name))
                .map(|name| format!("{package_dir}/{name}"))
                .collect::<Vec<_>>();
            (build_dir, archives)
        };
        if members.is_empty() {
            let reason = if all {
                format!("workspace {workspace} is empty")
            } else {
                format!("no package archives in {}", self.output_dir(package))
            };
            return Err(transfer_error(package, &reason));
        }

        let archive_name = format!("{package}.download.tar");
        let archive = self.work_path(&archive_name);
        info!(package, files = members.len(), "bundling outputs");
        self.host.create_archive(&cwd, &archive, &members)?;
        if !self.host.exists(&archive)? {
            return Err(transfer_error(
                package,
                &format!("bundle {archive} was not created"),
            ));
        }

        let target = destination.join(package);
        let dir = prepare_destination(&target, if all { None } else { Some(package_dir) })?;
        self.host.get(&archive, &target)?;
        unpack(&dir, &target, &archive_name)?;
        self.host.rm(&archive)?;
        info!(destination = %target, "done");
        Ok(target)
    }
}

fn transfer_error(package: &str, reason: &str) -> LifecycleError {
    LifecycleError::Transfer {
        package: package.to_owned(),
        reason: reason.to_owned(),
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> LifecycleError {
    LifecycleError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Creates `target` and clears what the new download replaces: the `subdir`
/// entry when given, otherwise everything inside `target`.
fn prepare_destination(target: &Utf8Path, subdir: Option<&str>) -> Result<Dir, LifecycleError> {
    Dir::create_ambient_dir_all(target, ambient_authority())
        .map_err(|err| io_error(target, &err))?;
    let dir = Dir::open_ambient_dir(target, ambient_authority())
        .map_err(|err| io_error(target, &err))?;

    let stale = match subdir {
        Some(name) => vec![String::from(name)],
        None => {
            let mut names = Vec::new();
            for item in dir.entries().map_err(|err| io_error(target, &err))? {
                let entry = item.map_err(|err| io_error(target, &err))?;
                names.push(entry.file_name().map_err(|err| io_error(target, &err))?);
            }
            names
        }
    };
    for name in stale {
        remove_entry(&dir, &name).map_err(|err| io_error(&target.join(&name), &err))?;
    }
    Ok(dir)
}

fn remove_entry(dir: &Dir, name: &str) -> io::Result<()> {
    match dir.symlink_metadata(name) {
        Ok(meta) if meta.is_dir() => {
            debug!(name, "removing previous download");
            dir.remove_dir_all(name)
        }
        Ok(_) => dir.remove_file(name),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn unpack(dir: &Dir, target: &Utf8Path, archive_name: &str) -> Result<(), LifecycleError> {
    let archive_path = target.join(archive_name);
    let file: File = dir
        .open(archive_name)
        .map_err(|err| io_error(&archive_path, &err))?
        .into_std();
    tar::Archive::new(file)
        .unpack(target)
        .map_err(|err| io_error(&archive_path, &err))?;
    if let Err(err) = dir.remove_file(archive_name) {
        warn!(archive = %archive_path, error = %err, "failed to remove downloaded bundle");
    }
    Ok(())
}
