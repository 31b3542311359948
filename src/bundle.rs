//! Local data bundles staged into package workspaces.
//!
//! A bundle is a plain tar archive holding `conda_build_config.yaml` and a
//! `feedstock/` tree. Building it locally keeps `git` and recursive copies off
//! the build host; the host only ever receives one file.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::LazyLock;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use flate2::read::GzDecoder;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BundleConfig;
use crate::host::toolchain::{BUILD_CONFIG_FILE, FEEDSTOCK_DIR};

const HTTP_TIMEOUT: Duration = Duration::from_secs(300);
const UNPACK_DIR: &str = "unpacked";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("sisyphus/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Errors raised while assembling a bundle.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BundleError {
    /// Raised when a request cannot be sent or its body cannot be read.
    #[error("request to {url} failed: {message}")]
    Http {
        /// URL being fetched.
        url: String,
        /// Client error message.
        message: String,
    },
    /// Raised when the server answers with a non-success status.
    #[error("{url} answered with HTTP status {status}")]
    Status {
        /// URL being fetched.
        url: String,
        /// Status code returned.
        status: u16,
    },
    /// Raised when the repository metadata cannot be decoded.
    #[error("unexpected response from {url}: {message}")]
    Decode {
        /// URL being fetched.
        url: String,
        /// Decoder error message.
        message: String,
    },
    /// Raised when the feedstock archive does not have the expected shape.
    #[error("feedstock archive is unusable: {message}")]
    Archive {
        /// Description of the problem.
        message: String,
    },
    /// Raised when a local file operation fails.
    #[error("failed to write {path}: {message}")]
    Io {
        /// Path being written.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Future returned by [`ArtifactPackager::package`].
pub type PackageFuture<'a> = Pin<Box<dyn Future<Output = Result<Utf8PathBuf, BundleError>> + Send + 'a>>;

/// Produces the bundle a build stages into its workspace.
pub trait ArtifactPackager {
    /// Writes the bundle for `package` into `out_dir` and returns its path.
    ///
    /// `branch` selects the feedstock branch; `None` means the repository
    /// default.
    fn package<'a>(
        &'a self,
        package: &'a str,
        branch: Option<&'a str>,
        out_dir: &'a Utf8Path,
    ) -> PackageFuture<'a>;
}

/// Bundles a feedstock downloaded from GitHub with the shared build
/// configuration.
#[derive(Clone, Debug)]
pub struct FeedstockPackager {
    config: BundleConfig,
}

#[derive(Deserialize)]
struct Repository {
    default_branch: String,
}

impl FeedstockPackager {
    /// Creates a packager reading from the sources in `config`.
    #[must_use]
    pub const fn new(config: BundleConfig) -> Self {
        Self { config }
    }

    /// GitHub API URL describing `package`'s feedstock repository.
    #[must_use]
    pub fn repository_url(&self, package: &str) -> String {
        format!(
            "{}{package}{}",
            self.config.github_api_url, self.config.feedstock_suffix
        )
    }

    /// Download URL of `branch` of `package`'s feedstock as a gzipped tarball.
    #[must_use]
    pub fn archive_url(&self, package: &str, branch: &str) -> String {
        format!(
            "{}{package}{}/archive/refs/heads/{branch}.tar.gz",
            self.config.feedstock_url_prefix, self.config.feedstock_suffix
        )
    }

    async fn default_branch(&self, package: &str) -> Result<String, BundleError> {
        let url = self.repository_url(package);
        let body = fetch(&url).await?;
        let repository: Repository =
            serde_json::from_slice(&body).map_err(|err| BundleError::Decode {
                url: url.clone(),
                message: err.to_string(),
            })?;
        Ok(repository.default_branch)
    }

    async fn assemble(
        &self,
        package: &str,
        branch: Option<&str>,
        out_dir: &Utf8Path,
    ) -> Result<Utf8PathBuf, BundleError> {
        info!(package, branch = branch.unwrap_or("<default>"), "preparing data bundle");
        let raw_config = fetch(&self.config.build_config_url).await?;
        let build_config = patch_build_config(&String::from_utf8_lossy(&raw_config));
        info!("downloaded {BUILD_CONFIG_FILE}");

        let resolved = match branch {
            Some(name) => name.to_owned(),
            None => {
                warn!("feedstock branch isn't set, using the repository default");
                self.default_branch(package).await?
            }
        };
        debug!(branch = resolved, "feedstock branch");

        let archive = fetch(&self.archive_url(package, &resolved)).await?;
        info!("downloaded feedstock");
        let bundle = write_bundle(out_dir, package, &build_config, &archive)?;
        info!(bundle = %bundle, "data bundle ready to upload");
        Ok(bundle)
    }
}

impl ArtifactPackager for FeedstockPackager {
    fn package<'a>(
        &'a self,
        package: &'a str,
        branch: Option<&'a str>,
        out_dir: &'a Utf8Path,
    ) -> PackageFuture<'a> {
        Box::pin(self.assemble(package, branch, out_dir))
    }
}

async fn fetch(url: &str) -> Result<Vec<u8>, BundleError> {
    debug!(url, "downloading");
    let http_error = |err: reqwest::Error| BundleError::Http {
        url: url.to_owned(),
        message: err.to_string(),
    };
    let response = HTTP_CLIENT.get(url).send().await.map_err(http_error)?;
    let status = response.status();
    if !status.is_success() {
        return Err(BundleError::Status {
            url: url.to_owned(),
            status: status.as_u16(),
        });
    }
    let body = response.bytes().await.map_err(http_error)?;
    Ok(body.to_vec())
}

/// Adjusts the shared build configuration for the build images.
#[must_use]
pub fn patch_build_config(contents: &str) -> String {
    contents.replace("vs2019", "vs2022")
}

/// Writes `<package>.tar` into `out_dir` from the build configuration text
/// and a gzipped feedstock tarball with a single top-level directory.
///
/// # Errors
///
/// Returns [`BundleError::Archive`] when the tarball is malformed or does not
/// hold exactly one top-level directory, and [`BundleError::Io`] when local
/// files cannot be written.
pub fn write_bundle(
    out_dir: &Utf8Path,
    package: &str,
    build_config: &str,
    feedstock_archive: &[u8],
) -> Result<Utf8PathBuf, BundleError> {
    let dir = Dir::open_ambient_dir(out_dir, ambient_authority())
        .map_err(|err| io_error(out_dir, &err))?;

    dir.write(BUILD_CONFIG_FILE, build_config)
        .map_err(|err| io_error(&out_dir.join(BUILD_CONFIG_FILE), &err))?;

    let unpacked = out_dir.join(UNPACK_DIR);
    dir.create_dir(UNPACK_DIR)
        .map_err(|err| io_error(&unpacked, &err))?;
    tar::Archive::new(GzDecoder::new(feedstock_archive))
        .unpack(&unpacked)
        .map_err(|err| BundleError::Archive {
            message: err.to_string(),
        })?;

    let top = single_top_dir(&dir, &unpacked)?;
    dir.rename(format!("{UNPACK_DIR}/{top}"), &dir, FEEDSTOCK_DIR)
        .map_err(|err| io_error(&out_dir.join(FEEDSTOCK_DIR), &err))?;

    let bundle = out_dir.join(format!("{package}.tar"));
    let file = dir
        .create(format!("{package}.tar"))
        .map_err(|err| io_error(&bundle, &err))?;
    let mut builder = tar::Builder::new(file.into_std());
    builder
        .append_path_with_name(out_dir.join(BUILD_CONFIG_FILE), BUILD_CONFIG_FILE)
        .and_then(|()| builder.append_dir_all(FEEDSTOCK_DIR, out_dir.join(FEEDSTOCK_DIR)))
        .and_then(|()| builder.finish())
        .map_err(|err| io_error(&bundle, &err))?;
    Ok(bundle)
}

fn single_top_dir(dir: &Dir, unpacked: &Utf8Path) -> Result<String, BundleError> {
    let entries = dir
        .read_dir(UNPACK_DIR)
        .map_err(|err| io_error(unpacked, &err))?;
    let mut names = Vec::new();
    for item in entries {
        let entry = item.map_err(|err| io_error(unpacked, &err))?;
        let name = entry.file_name().map_err(|err| io_error(unpacked, &err))?;
        let is_dir = entry
            .file_type()
            .map_err(|err| io_error(unpacked, &err))?
            .is_dir();
        if is_dir {
            names.push(name);
        }
    }
    match names.as_slice() {
        [only] => Ok(only.clone()),
        _ => Err(BundleError::Archive {
            message: format!(
                "expected one top-level directory, found {}",
                names.len()
            ),
        }),
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> BundleError {
    BundleError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
