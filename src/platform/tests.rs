//! Unit tests for platform command text.

use super::*;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use proptest::prelude::*;
use rstest::rstest;

fn decode_powershell(encoded: &str) -> String {
    let bytes = STANDARD.decode(encoded).expect("valid base64");
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).expect("valid utf-16")
}

#[rstest]
#[case(&Posix as &dyn Platform, &["/tmp", "sisyphus", "foo"], "/tmp/sisyphus/foo")]
#[case(&Posix as &dyn Platform, &["/tmp/", "/sisyphus//", "foo"], "/tmp/sisyphus/foo")]
#[case(&Windows as &dyn Platform, &["\\", "sisyphus", "foo"], "\\sisyphus\\foo")]
#[case(&Windows as &dyn Platform, &["\\sisyphus\\", "\\foo"], "\\sisyphus\\foo")]
fn path_join_collapses_separators(
    #[case] platform: &dyn Platform,
    #[case] parts: &[&str],
    #[case] expected: &str,
) {
    assert_eq!(platform.path_join(parts), expected);
}

#[rstest]
fn path_join_ignores_empty_middle_parts() {
    for platform in candidates() {
        assert_eq!(
            platform.path_join(&["a", "", "b"]),
            platform.path_join(&["a", "b"])
        );
    }
}

#[rstest]
fn path_join_only_collapses_the_platform_separator() {
    assert_eq!(Posix.path_join(&["a\\\\b", "c"]), "a\\\\b/c");
    assert_eq!(Windows.path_join(&["a//b", "c"]), "a//b\\c");
}

proptest! {
    #[test]
    fn path_join_never_emits_separator_runs(
        parts in prop::collection::vec("[a-z/\\\\]{0,6}", 0..6)
    ) {
        let borrowed: Vec<&str> = parts.iter().map(String::as_str).collect();
        for platform in candidates() {
            let sep = platform.separator();
            let doubled: String = [sep, sep].iter().collect();
            let joined = platform.path_join(&borrowed);
            prop_assert!(!joined.contains(&doubled), "{joined:?}");
            prop_assert_eq!(platform.path_join(&[joined.as_str()]), joined.clone());
        }
    }

    #[test]
    fn path_join_is_stable_under_inserted_empty_parts(
        parts in prop::collection::vec("[a-z]{1,4}", 2..5),
        at in 1usize..4
    ) {
        let borrowed: Vec<&str> = parts.iter().map(String::as_str).collect();
        let mut padded = borrowed.clone();
        padded.insert(at.min(borrowed.len() - 1), "");
        for platform in candidates() {
            prop_assert_eq!(platform.path_join(&padded), platform.path_join(&borrowed));
        }
    }
}

#[rstest]
fn posix_queries_print_yes() {
    assert_eq!(
        Posix.exists("/tmp/sisyphus"),
        "if [ -e /tmp/sisyphus ]; then echo Yes; fi"
    );
    assert_eq!(
        Posix.is_dir("/tmp/my dir"),
        "if [ -d '/tmp/my dir' ]; then echo Yes; fi"
    );
}

#[rstest]
fn windows_is_dir_tests_for_children_wildcard() {
    assert_eq!(
        Windows.is_dir("\\sisyphus"),
        "if exist \"\\sisyphus\\*\" echo Yes"
    );
}

#[rstest]
fn listings_tolerate_missing_directories() {
    assert_eq!(
        Posix.list("/tmp/sisyphus/foo"),
        "if [ -d /tmp/sisyphus/foo ]; then ls -1A /tmp/sisyphus/foo; fi"
    );
    assert_eq!(
        Windows.list("\\sisyphus\\foo"),
        "if exist \"\\sisyphus\\foo\\*\" (dir /b /a \"\\sisyphus\\foo\" 2>nul || type nul)"
    );
}

#[rstest]
fn windows_remove_distinguishes_files_from_directories() {
    assert_eq!(Windows.remove("\\x", true), "rd /s /q \"\\x\"");
    assert_eq!(Windows.remove("\\x", false), "del /f /q \"\\x\"");
    assert_eq!(Posix.remove("/x", true), Posix.remove("/x", false));
}

#[rstest]
fn tail_skips_read_lines_and_bounds_the_chunk() {
    assert_eq!(
        Posix.tail("/tmp/sisyphus/foo/build.log", 40, 1000),
        "tail -n +41 /tmp/sisyphus/foo/build.log | head -n 1000"
    );
    let windows = Windows.tail("\\sisyphus\\foo\\build.log", 40, 1000);
    assert!(windows.contains("Select-Object -Skip 40 -First 1000"), "{windows}");
}

#[rstest]
fn windows_tail_doubles_single_quotes_in_the_path() {
    let command = Windows.tail("\\sisyphus\\o'brien\\build.log", 0, 10);
    assert!(
        command.contains("-LiteralPath '\\sisyphus\\o''brien\\build.log'"),
        "{command}"
    );
}

#[rstest]
fn create_archive_runs_from_the_working_directory() {
    let members = vec![
        String::from("win-64/foo-1.0.conda"),
        String::from("win-64/foo-1.0.tar.bz2"),
    ];
    assert_eq!(
        Windows.create_archive("\\sisyphus\\foo\\build", "\\sisyphus\\foo.download.tar", &members),
        "cd /d \"\\sisyphus\\foo\\build\" && tar -cf \"\\sisyphus\\foo.download.tar\" \"win-64/foo-1.0.conda\" \"win-64/foo-1.0.tar.bz2\""
    );
}

#[rstest]
fn posix_detach_uses_nohup_and_releases_stdio() {
    let command = Posix.detach("make > log 2>&1 && touch ok || touch ko");
    assert_eq!(
        command,
        "nohup sh -c 'make > log 2>&1 && touch ok || touch ko' > /dev/null 2>&1 < /dev/null &"
    );
}

#[rstest]
fn windows_detach_encodes_a_wmi_process_creation() {
    let command = Windows.detach("build.cmd && type nul > \"it's.ready\"");
    let encoded = command
        .strip_prefix("powershell -NoProfile -EncodedCommand ")
        .expect("encoded powershell invocation");
    let script = decode_powershell(encoded);

    assert!(script.starts_with("Invoke-CimMethod -ClassName Win32_Process"), "{script}");
    assert!(
        script.contains("CommandLine='cmd.exe /c build.cmd && type nul > \"it''s.ready\"'"),
        "single quotes must be doubled: {script}"
    );
}

#[rstest]
fn only_windows_installs_drivers() {
    assert_eq!(Posix.driver_install("/tmp/sisyphus"), None);
    let install = Windows
        .driver_install("\\sisyphus")
        .expect("windows installs drivers");
    assert!(install.contains("install_cuda_driver.ps1 > \"\\sisyphus\\cuda_driver.log\""));
    assert!(install.contains(" && "));
    assert!(install.contains("install_cuda_12.3.0.ps1"));
}

#[rstest]
fn transfer_paths_use_forward_slashes() {
    assert_eq!(Windows.transfer_path("\\sisyphus\\foo.tar"), "/sisyphus/foo.tar");
    assert_eq!(Posix.transfer_path("/tmp/sisyphus"), "/tmp/sisyphus");
}

#[rstest]
fn candidates_probe_posix_first() {
    let kinds: Vec<TargetKind> = candidates().iter().map(|p| p.kind()).collect();
    assert_eq!(kinds, vec![TargetKind::Posix, TargetKind::Windows]);
}
