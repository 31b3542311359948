//! Conda command lines run on build hosts.

use crate::platform::Platform;

/// Name of the conda environment builds run in.
pub const ENV_NAME: &str = "sisyphus";

/// Packages installed into [`ENV_NAME`] when it is created.
pub const CONDA_PACKAGES: &str =
    "conda-build distro-tooling::anaconda-linter git anaconda-client conda-package-handling";

/// Options passed to every `conda build`.
pub const BUILD_OPTIONS: &str = "--error-overlinking -c ai-staging";

/// Lists the conda environments present on the host.
pub const LIST_ENVIRONMENTS: &str = "conda env list";

/// Build configuration file name inside a workspace.
pub const BUILD_CONFIG_FILE: &str = "conda_build_config.yaml";

/// Feedstock directory name inside a workspace.
pub const FEEDSTOCK_DIR: &str = "feedstock";

/// Build root directory name inside a workspace.
pub const BUILD_DIR: &str = "build";

/// Prefixes `command` with the activation of [`ENV_NAME`].
///
/// `conda activate` is a shell function installed by `conda init`, so this
/// form only works in the login shell of an SSH command.
pub(crate) fn activated(command: &str) -> String {
    format!("conda activate {ENV_NAME} && {command}")
}

/// Runs `command` inside [`ENV_NAME`] without relying on shell functions.
///
/// Detached jobs start from a bare `sh -c` or `cmd.exe /c`, where the
/// `conda activate` function does not exist.
pub(crate) fn in_environment(command: &str) -> String {
    format!("conda run -n {ENV_NAME} --no-capture-output {command}")
}

/// Creates [`ENV_NAME`].
pub(crate) fn create_environment() -> String {
    format!("conda create -y -n {ENV_NAME} {CONDA_PACKAGES}")
}

/// Builds the feedstock staged in `workspace`.
pub(crate) fn build(platform: &dyn Platform, workspace: &str) -> String {
    let config = platform.path_join(&[workspace, BUILD_CONFIG_FILE]);
    let croot = platform.path_join(&[workspace, BUILD_DIR]);
    let feedstock = platform.path_join(&[workspace, FEEDSTOCK_DIR]);
    in_environment(&format!(
        "conda build {BUILD_OPTIONS} -e {} --croot={} {}",
        platform.quote(&config),
        platform.quote(&croot),
        platform.quote(&feedstock)
    ))
}

/// Converts `file` to the archive format with extension `extension`.
pub(crate) fn convert(platform: &dyn Platform, file: &str, extension: &str) -> String {
    format!("cph t {} {extension}", platform.quote(file))
}

/// Uploads every `.tar.bz2` in `package_dir`, rendering the token as `token`.
pub(crate) fn upload(
    platform: &dyn Platform,
    package_dir: &str,
    channel: &str,
    token: &str,
) -> String {
    activated(&format!(
        "anaconda -t {token} upload -c {} --force {}",
        platform.quote(channel),
        platform.glob(package_dir, "*.tar.bz2")
    ))
}

/// Extracts environment names from `conda env list` output.
pub(crate) fn parse_environments(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_owned)
        .collect()
}
