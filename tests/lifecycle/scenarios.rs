//! BDD scenarios for the build lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Build a package end to end"
)]
fn scenario_build_end_to_end(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Preparation is idempotent"
)]
fn scenario_prepare_idempotent(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "A failed build is reported"
)]
fn scenario_failed_build(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Windows hosts install drivers before building"
)]
fn scenario_windows_drivers(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "A second build of a running package is refused"
)]
fn scenario_busy_package(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}
