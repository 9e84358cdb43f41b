//! Smoke tests for the `xlbridge` binary.
//!
//! Each test points `XLBRIDGE_CONFIG` at a temp file so the user's own
//! config is never read.

use std::process::{Command, Output};

fn xlbridge(config: &tempfile::NamedTempFile) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_xlbridge"));
    cmd.env("XLBRIDGE_CONFIG", config.path());
    cmd
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn binary_responds_to_help() {
    let config = config_file("");
    let output = xlbridge(&config).arg("--help").output().expect("failed to execute xlbridge");
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("describe"));
    assert!(out.contains("call"));
    assert!(out.contains("watch"));
}

#[test]
fn describe_lists_registered_functions() {
    let config = config_file("");
    let output = xlbridge(&config).arg("describe").output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let descriptors: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let names: Vec<&str> = descriptors
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["name"].as_str())
        .collect();
    assert_eq!(names, vec!["ADD", "COUNTDOWN", "GREET", "SLOW.DOUBLE"]);
}

#[test]
fn call_plain_function_uses_defaults() {
    let config = config_file("");
    let output = xlbridge(&config).args(["call", "ADD", "40"]).output().unwrap();
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "40");

    let output = xlbridge(&config).args(["call", "ADD", "40", "2.5"]).output().unwrap();
    assert_eq!(stdout(&output).trim(), "42.5");
}

#[test]
fn call_passes_keyword_options() {
    let config = config_file("");
    let output = xlbridge(&config)
        .args(["call", "GREET", "Ada", "--kw", "greeting=Hi"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "Hi, Ada!");
}

#[test]
fn call_rejects_extra_arguments_with_keyword_options() {
    let config = config_file("");
    let output = xlbridge(&config)
        .args(["call", "GREET", "Ada", "extra", "--kw", "greeting=Hi"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("GREET takes at most 1 positional arguments"));
}

#[test]
fn call_native_async_function() {
    let config = config_file("");
    let output = xlbridge(&config).args(["call", "SLOW.DOUBLE", "21"]).output().unwrap();
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), "42");
}

#[test]
fn call_rtd_generator_prints_every_value() {
    let config = config_file("");
    let output = xlbridge(&config).args(["call", "COUNTDOWN", "2"]).output().unwrap();
    assert!(output.status.success());
    let lines: Vec<String> = stdout(&output).lines().map(str::to_string).collect();
    assert_eq!(lines, vec!["2", "1", "0"]);
}

#[test]
fn unknown_function_fails() {
    let config = config_file("");
    let output = xlbridge(&config).args(["call", "NOPE"]).output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No function named NOPE"));
}

#[test]
fn config_reflects_file_overrides() {
    let config = config_file("[rtd]\npoll_interval_ms = 250\n");
    let output = xlbridge(&config).arg("config").output().unwrap();
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(parsed["rtd"]["poll_interval_ms"], 250);
    assert_eq!(parsed["scheduler"]["thread_name"], "xlbridge-loop");
}
