//! BDD step definitions for the build lifecycle.

use rstest_bdd_macros::{given, then, when};
use sisyphus::host::toolchain::ENV_NAME;
use sisyphus::test_support::{FakeHost, JobKind, JobOutcome, StaticPackager};
use sisyphus::{BuildStatus, LifecycleError, RemoteJob};
use tokio::runtime::Runtime;

use super::test_helpers::{BuildOutcome, LifecycleContext, controller};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn runtime() -> Result<Runtime, StepError> {
    Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))
}

fn host_of_kind(kind: &str) -> Result<FakeHost, StepError> {
    match kind {
        "linux" => Ok(FakeHost::posix()),
        "windows" => Ok(FakeHost::windows()),
        other => Err(StepError::Assertion(format!("unknown host kind {other}"))),
    }
}

#[given("a \"{kind}\" build host with the build environment")]
fn host_with_environment(
    mut lifecycle_context: LifecycleContext,
    kind: String,
) -> Result<LifecycleContext, StepError> {
    lifecycle_context.host = host_of_kind(&kind)?;
    lifecycle_context.host.add_environment(ENV_NAME);
    Ok(lifecycle_context)
}

#[given("a \"{kind}\" build host without the build environment")]
fn host_without_environment(
    mut lifecycle_context: LifecycleContext,
    kind: String,
) -> Result<LifecycleContext, StepError> {
    lifecycle_context.host = host_of_kind(&kind)?;
    Ok(lifecycle_context)
}

#[given("builds on the host fail")]
fn builds_fail(lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context
        .host
        .set_outcome(JobKind::Build, JobOutcome::Fail);
    lifecycle_context
}

#[given("builds on the host never finish")]
fn builds_hang(lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context
        .host
        .set_outcome(JobKind::Build, JobOutcome::Hang);
    lifecycle_context
}

fn request_build(
    mut lifecycle_context: LifecycleContext,
    package: &str,
) -> Result<LifecycleContext, StepError> {
    let lifecycle = controller(&lifecycle_context.host);
    let packager = StaticPackager::default();
    let result =
        runtime()?.block_on(async { lifecycle.build(package, None, &packager, false).await });
    lifecycle_context.outcomes.push(match result {
        Ok(()) => BuildOutcome::Dispatched,
        Err(LifecycleError::Busy { .. }) => BuildOutcome::Busy,
        Err(err) => BuildOutcome::Failed(err.to_string()),
    });
    Ok(lifecycle_context)
}

#[when("I build package \"{package}\"")]
fn build_package(
    lifecycle_context: LifecycleContext,
    package: String,
) -> Result<LifecycleContext, StepError> {
    request_build(lifecycle_context, &package)
}

#[when("a second build of \"{package}\" is requested")]
fn build_package_again(
    lifecycle_context: LifecycleContext,
    package: String,
) -> Result<LifecycleContext, StepError> {
    request_build(lifecycle_context, &package)
}

#[when("I prepare the host twice")]
fn prepare_twice(lifecycle_context: LifecycleContext) -> Result<LifecycleContext, StepError> {
    let lifecycle = controller(&lifecycle_context.host);
    lifecycle.prepare()?;
    lifecycle.prepare()?;
    Ok(lifecycle_context)
}

#[then("the build status of \"{package}\" is \"{expected}\"")]
fn build_status_is(
    lifecycle_context: &LifecycleContext,
    package: String,
    expected: String,
) -> Result<(), StepError> {
    let status: BuildStatus = controller(&lifecycle_context.host).status(&package)?;
    if status.to_string() == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected status {expected}, got {status}"
        )))
    }
}

#[then("downloading \"{package}\" fetches both package formats")]
fn download_fetches_both_formats(
    lifecycle_context: &LifecycleContext,
    package: String,
) -> Result<(), StepError> {
    let mut lifecycle = controller(&lifecycle_context.host);
    let destination = lifecycle_context.downloads.clone();
    let target = runtime()?
        .block_on(async { lifecycle.download(&package, &destination, false).await })?;

    for extension in [".tar.bz2", ".conda"] {
        let archive = target.join(format!("linux-64/{package}-1.0-0{extension}"));
        if !archive.is_file() {
            return Err(StepError::Assertion(format!("missing {archive}")));
        }
    }
    Ok(())
}

#[then("waiting for \"{package}\" reports failure")]
fn wait_reports_failure(
    lifecycle_context: &LifecycleContext,
    package: String,
) -> Result<(), StepError> {
    let mut lifecycle = controller(&lifecycle_context.host);
    let succeeded = runtime()?.block_on(async { lifecycle.wait(&package).await })?;
    if succeeded {
        Err(StepError::Assertion(String::from(
            "expected the build to have failed",
        )))
    } else {
        Ok(())
    }
}

#[then("the environment was created once")]
fn environment_created_once(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let creations = lifecycle_context
        .host
        .dispatches()
        .into_iter()
        .filter(|dispatch| dispatch.job == RemoteJob::CreateEnvironment)
        .count();
    if creations == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one environment creation, got {creations}"
        )))
    }
}

#[then("the driver installation was dispatched before the build")]
fn driver_before_build(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let jobs: Vec<RemoteJob> = lifecycle_context
        .host
        .dispatches()
        .into_iter()
        .map(|dispatch| dispatch.job)
        .collect();
    match jobs.as_slice() {
        [RemoteJob::InstallDriver, RemoteJob::Build { .. }] => Ok(()),
        other => Err(StepError::Assertion(format!(
            "unexpected dispatch order: {other:?}"
        ))),
    }
}

#[then("the second build is refused as busy")]
fn second_build_busy(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match lifecycle_context.outcomes.as_slice() {
        [BuildOutcome::Dispatched, BuildOutcome::Busy] => Ok(()),
        other => Err(StepError::Assertion(format!(
            "unexpected build outcomes: {other:?}"
        ))),
    }
}
