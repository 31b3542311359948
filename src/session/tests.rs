//! Unit tests for the SSH session.

use super::*;
use crate::test_support::{CommandInvocation, ScriptedRunner};
use rstest::{fixture, rstest};

#[fixture]
fn base_config() -> SessionConfig {
    SessionConfig {
        ssh_bin: String::from("ssh"),
        scp_bin: String::from("scp"),
        ssh_port: 2222,
        posix_user: String::from(DEFAULT_POSIX_USER),
        windows_user: String::from(DEFAULT_WINDOWS_USER),
        connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        ssh_batch_mode: true,
        ssh_strict_host_key_checking: false,
        ssh_known_hosts_file: String::from("/dev/null"),
        ssh_identity_file: None,
    }
}

fn open_session(config: SessionConfig, runner: &ScriptedRunner) -> RemoteSession<ScriptedRunner> {
    runner.push_output(Some(0), "Linux build 6.1.0\n", "");
    RemoteSession::open(
        SessionTarget::new("10.0.0.5", "ec2-user"),
        config,
        runner.clone(),
        "uname -a",
    )
    .expect("probe should succeed")
}

#[rstest]
fn open_runs_probe_against_user_at_address(base_config: SessionConfig) {
    let runner = ScriptedRunner::new();
    let _session = open_session(base_config, &runner);

    let invocations = runner.invocations();
    let probe = invocations.first().expect("probe invocation");
    assert_eq!(probe.program, "ssh");
    let command = probe.command_string();
    assert!(command.contains("-p 2222"), "port missing: {command}");
    assert!(command.contains("ConnectTimeout=10"), "timeout missing: {command}");
    assert!(command.contains("BatchMode=yes"), "batch mode missing: {command}");
    assert!(command.ends_with("ec2-user@10.0.0.5 uname -a"), "unexpected: {command}");
}

#[rstest]
fn open_fails_when_probe_fails(base_config: SessionConfig) {
    let runner = ScriptedRunner::new();
    runner.push_output(Some(255), "", "Permission denied (publickey).\n");

    let err = RemoteSession::open(
        SessionTarget::new("10.0.0.5", "ec2-user"),
        base_config,
        runner,
        "uname -a",
    )
    .expect_err("probe failure should fail open");

    assert_eq!(
        err,
        SessionError::Connect {
            target: String::from("ec2-user@10.0.0.5"),
            message: String::from("Permission denied (publickey)."),
        }
    );
}

#[rstest]
fn reopen_probes_again_with_the_same_target(base_config: SessionConfig) {
    let runner = ScriptedRunner::new();
    let session = open_session(base_config, &runner);
    runner.push_output(Some(0), "Linux build 6.1.0\n", "");

    let reopened = session.reopen("uname -a").expect("reopen should succeed");

    assert_eq!(reopened.target(), session.target());
    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 2);
    assert_eq!(
        invocations.first().map(CommandInvocation::command_string),
        invocations.last().map(CommandInvocation::command_string)
    );
}

#[rstest]
fn run_returns_stdout_on_success(base_config: SessionConfig) {
    let runner = ScriptedRunner::new();
    let session = open_session(base_config, &runner);
    runner.push_output(Some(0), "Yes\n", "");

    let stdout = session.run("echo Yes").expect("command should succeed");
    assert_eq!(stdout, "Yes\n");
}

#[rstest]
fn run_surfaces_non_zero_exit_as_command_failure(base_config: SessionConfig) {
    let runner = ScriptedRunner::new();
    let session = open_session(base_config, &runner);
    runner.push_failure(2);

    let err = session.run("ls /missing").expect_err("non-zero exit should fail");
    let SessionError::CommandFailure {
        command,
        status,
        status_text,
        ..
    } = err
    else {
        panic!("expected CommandFailure, got {err:?}");
    };
    assert_eq!(command, "ls /missing");
    assert_eq!(status, Some(2));
    assert_eq!(status_text, "2");
}

#[rstest]
fn run_displayed_hides_the_real_command(base_config: SessionConfig) {
    let runner = ScriptedRunner::new();
    let session = open_session(base_config, &runner);
    runner.push_failure(1);

    let err = session
        .run_displayed("anaconda -t s3cret upload", "anaconda -t *** upload")
        .expect_err("should fail");
    let rendered = err.to_string();
    assert!(!rendered.contains("s3cret"), "secret leaked: {rendered}");
    assert!(rendered.contains("anaconda -t *** upload"));
}

#[rstest]
fn run_quiet_swallows_failures(base_config: SessionConfig) {
    let runner = ScriptedRunner::new();
    let session = open_session(base_config, &runner);
    runner.push_failure(1);
    runner.push_output(Some(0), "ok", "");

    assert_eq!(session.run_quiet("false").expect("spawned"), None);
    assert_eq!(
        session.run_quiet("true").expect("spawned"),
        Some(String::from("ok"))
    );
}

#[rstest]
fn run_async_ignores_exit_status(base_config: SessionConfig) {
    let runner = ScriptedRunner::new();
    let session = open_session(base_config, &runner);
    runner.push_failure(1);

    assert!(session.run_async("nohup sh -c 'sleep 1' &").is_ok());
}

#[rstest]
fn spawn_failures_propagate(base_config: SessionConfig) {
    let runner = ScriptedRunner::new();
    let session = open_session(base_config, &runner);

    let err = session.run("echo").expect_err("no scripted response");
    assert!(matches!(err, SessionError::Spawn { .. }), "got {err:?}");
}

#[rstest]
fn put_copies_into_remote_directory_with_scp_port_flag(base_config: SessionConfig) {
    let cfg = SessionConfig {
        ssh_identity_file: Some(String::from("/keys/build")),
        ..base_config
    };
    let runner = ScriptedRunner::new();
    let session = open_session(cfg, &runner);
    runner.push_success();

    session
        .put(Utf8Path::new("/tmp/foo.tar"), "/sisyphus")
        .expect("put should succeed");

    let invocations = runner.invocations();
    let copy = invocations.last().expect("scp invocation");
    assert_eq!(copy.program, "scp");
    let command = copy.command_string();
    assert!(command.starts_with("scp -P 2222 -i /keys/build"), "got {command}");
    assert!(
        command.ends_with("/tmp/foo.tar ec2-user@10.0.0.5:/sisyphus/"),
        "got {command}"
    );
}

#[rstest]
fn get_reports_transfer_failure(base_config: SessionConfig) {
    let runner = ScriptedRunner::new();
    let session = open_session(base_config, &runner);
    runner.push_failure(1);

    let err = session
        .get("/tmp/sisyphus/foo.download.tar", Utf8Path::new("/dl"))
        .expect_err("scp failure should surface");
    assert!(
        matches!(err, SessionError::TransferFailure { ref source_path, .. }
            if source_path == "ec2-user@10.0.0.5:/tmp/sisyphus/foo.download.tar"),
        "got {err:?}"
    );
}

#[rstest]
fn validate_rejects_blank_identity_file(base_config: SessionConfig) {
    let cfg = SessionConfig {
        ssh_identity_file: Some(String::from("  ")),
        ..base_config
    };
    let message = cfg.validate().expect_err("blank identity").to_string();
    assert!(message.contains("SISYPHUS_SSH_SSH_IDENTITY_FILE"), "{message}");
}

#[rstest]
#[case("ssh_bin")]
#[case("scp_bin")]
#[case("posix_user")]
#[case("windows_user")]
fn validate_rejects_blank_required_fields(base_config: SessionConfig, #[case] field: &str) {
    let mut cfg = base_config;
    match field {
        "ssh_bin" => cfg.ssh_bin = String::new(),
        "scp_bin" => cfg.scp_bin = String::from(" "),
        "posix_user" => cfg.posix_user = String::new(),
        _ => cfg.windows_user = String::new(),
    }
    let message = cfg.validate().expect_err("blank field").to_string();
    assert!(message.contains(field), "{message}");
}

#[test]
fn expand_tilde_leaves_absolute_paths_alone() {
    assert_eq!(expand_tilde("/keys/id"), "/keys/id");
}
