use assert_cmd::Command;
use predicates::prelude::*;

fn otogram() -> Command {
    let mut cmd = Command::cargo_bin("otogram-tui").unwrap();
    cmd.env_remove("OTOGRAM_LOG");
    cmd
}

#[test]
fn prints_version() {
    otogram()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    otogram()
        .arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("Otogram TUI"))
        .stdout(predicate::str::contains("--download <url> <id>"));
}

#[test]
fn download_needs_both_arguments() {
    otogram()
        .args(["--download", "/uploads/clip.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("usage: --download <url> <id>"));
}

#[test]
fn unknown_flags_are_rejected() {
    otogram()
        .arg("--frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown flag --frobnicate"));
}
