//! Shared fixtures and helpers for lifecycle BDD scenarios.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::fixture;
use sisyphus::BuildController;
use sisyphus::test_support::FakeHost;
use tempfile::TempDir;

#[derive(Clone, Debug)]
pub enum BuildOutcome {
    Dispatched,
    Busy,
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct LifecycleContext {
    pub host: FakeHost,
    pub outcomes: Vec<BuildOutcome>,
    pub downloads: Utf8PathBuf,
    _downloads_tmp: Arc<TempDir>,
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    let temp = TempDir::new().unwrap_or_else(|err| panic!("create download directory: {err}"));
    let downloads = Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("download path is not UTF-8: {}", path.display()));
    LifecycleContext {
        host: FakeHost::posix(),
        outcomes: Vec::new(),
        downloads,
        _downloads_tmp: Arc::new(temp),
    }
}

/// Controller over the context's host with polling delays removed.
pub fn controller(host: &FakeHost) -> BuildController<FakeHost> {
    BuildController::new(host.clone())
        .with_tail_interval(Duration::ZERO)
        .with_prepare_interval(Duration::ZERO)
        .with_wait_interval(Duration::ZERO)
}
