//! End-to-end tests for the tessera shell.
//!
//! These pipe a session into the binary and check what it prints.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// The shell with the in-process backend and no user config.
fn tessera() -> Command {
    let mut cmd = Command::cargo_bin("tessera").unwrap();
    cmd.arg("--execution").arg("direct");
    cmd
}

// =============================================================================
// Sessions
// =============================================================================

#[test]
fn test_declare_and_call() {
    tessera()
        .write_stdin("int x = 10;\nint mu() { return x * 4; }\nmu()\n/exit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("x ==> 10"))
        .stdout(predicate::str::contains("|  created method mu()"))
        .stdout(predicate::str::contains("$1 ==> 40"));
}

#[test]
fn test_drop_corrals_dependent_method() {
    tessera()
        .write_stdin("int x = 10;\nint mu() { return x * 4; }\n/drop x\n/exit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("|  dropped variable x"))
        .stdout(predicate::str::contains(
            "|  update modified method mu(), however, it cannot be invoked until variable x is declared",
        ));
}

#[test]
fn test_multi_line_input_is_buffered() {
    tessera()
        .write_stdin("int twice(int n) {\n    return n * 2;\n}\ntwice(21)\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("|  created method twice(int)"))
        .stdout(predicate::str::contains("$1 ==> 42"));
}

#[test]
fn test_several_units_on_one_line() {
    tessera()
        .write_stdin("int a = 1; int b = 2; a + b\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("a ==> 1"))
        .stdout(predicate::str::contains("b ==> 2"))
        .stdout(predicate::str::contains("$1 ==> 3"));
}

#[test]
fn test_user_output_reaches_stdout() {
    tessera()
        .write_stdin("System.out.println(\"hello from a snippet\");\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello from a snippet"));
}

#[test]
fn test_rejected_snippet_reports_error() {
    tessera()
        .write_stdin("int y = \"text\";\n/list -all\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("|  Error:"))
        .stdout(predicate::str::contains("e1 : int y = \"text\";"));
}

#[test]
fn test_reload_replays_definitions() {
    tessera()
        .write_stdin("int x = 5;\n/reload\nx * 2\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Restarting and restoring state."))
        .stdout(predicate::str::contains("$1 ==> 10"));
}

#[test]
fn test_reset_forgets_definitions() {
    tessera()
        .write_stdin("int x = 5;\n/reset\n/vars\nx\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Resetting state."))
        .stdout(predicate::str::contains("|    int x = 5").not())
        .stdout(predicate::str::contains("|  Error:"));
}

#[test]
fn test_vars_lists_values() {
    tessera()
        .write_stdin("int x = 7;\nString s = \"hi\";\n/vars\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("|    int x = 7"))
        .stdout(predicate::str::contains("|    String s = \"hi\""));
}

#[test]
fn test_drop_unknown_name() {
    tessera()
        .write_stdin("/drop nothing\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("|  No such snippet: nothing"));
}

#[test]
fn test_ping_extension() {
    tessera()
        .write_stdin("/ext ping\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("|  pong"));
}

#[test]
fn test_concise_feedback() {
    tessera()
        .arg("--feedback")
        .arg("concise")
        .write_stdin("int f() { return 3; }\nf()\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("created").not())
        .stdout(predicate::str::contains("$1 ==> 3"));
}

// =============================================================================
// Startup errors
// =============================================================================

#[test]
fn test_bad_execution_spec() {
    Command::cargo_bin("tessera")
        .unwrap()
        .arg("--execution")
        .arg("jdi:launch(true)$")
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("execution control spec syntax error"));
}

#[test]
fn test_unknown_backend() {
    Command::cargo_bin("tessera")
        .unwrap()
        .arg("--execution")
        .arg("warp")
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown execution control: warp"));
}

#[test]
fn test_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        r#"{"execution": "direct", "startup": ["int base = 100;"]}"#,
    )
    .unwrap();
    Command::cargo_bin("tessera")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .write_stdin("base + 1\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("$1 ==> 101"));
}
