use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn prints_version() {
    Command::cargo_bin("tavern-gallery")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    Command::cargo_bin("tavern-gallery")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tavern Gallery"))
        .stdout(predicate::str::contains("--character"));
}

#[test]
fn rejects_unknown_arguments() {
    Command::cargo_bin("tavern-gallery")
        .unwrap()
        .arg("--bogus")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown argument --bogus"));
}

#[test]
fn flag_without_value_is_an_error() {
    Command::cargo_bin("tavern-gallery")
        .unwrap()
        .arg("--server")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--server needs a value"));
}
