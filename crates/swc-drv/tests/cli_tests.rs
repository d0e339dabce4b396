//! Driver CLI end-to-end tests.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn swc() -> Command {
    Command::cargo_bin("swc").unwrap()
}

fn temp_source(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".swgir")
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const SIMPLE: &str = "\
func answer (conv=c)
rax = load_imm 42, b64
ret
";

#[test]
fn no_inputs_is_a_command_line_error() {
    swc()
        .assert()
        .failure()
        .stderr(predicate::str::contains("no input files"));
}

#[test]
fn unknown_flag_prints_usage() {
    swc()
        .arg("--frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown argument"))
        .stderr(predicate::str::contains("usage: swc"));
}

#[test]
fn compiles_a_simple_function() {
    let source = temp_source(SIMPLE);
    swc()
        .arg(source.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("answer"))
        .stdout(predicate::str::contains("bytes"));
}

#[test]
fn writes_code_bytes_to_the_output_file() {
    let source = temp_source(SIMPLE);
    let out = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
    swc()
        .arg(source.path())
        .arg("-o")
        .arg(out.path())
        .assert()
        .success();

    let bytes = std::fs::read(out.path()).unwrap();
    assert!(!bytes.is_empty());
    // The function ends in ret.
    assert_eq!(*bytes.last().unwrap(), 0xC3);
}

#[test]
fn pass_print_dumps_ir() {
    let source = temp_source(SIMPLE);
    swc()
        .arg("--pass=pre-regalloc")
        .arg("--num-cores=1")
        .arg(source.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("[micro]"))
        .stdout(predicate::str::contains("load_reg_imm"));
}

#[test]
fn syntax_errors_fail_with_location() {
    let source = temp_source("func bad (conv=c)\nfrobnicate rax\n");
    swc()
        .arg("--diag-one-line")
        .arg(source.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("frobnicate"))
        .stderr(predicate::str::contains(":2:"));
}

#[test]
fn backend_optimize_levels_are_accepted() {
    for level in ["O0", "O1", "O2", "O3", "Os", "Oz"] {
        let source = temp_source(SIMPLE);
        swc()
            .arg(format!("--backend-optimize={}", level))
            .arg(source.path())
            .assert()
            .success();
    }
}

#[test]
fn debug_info_flag_round_trips() {
    let source = temp_source(SIMPLE);
    swc()
        .arg("--debug-info")
        .arg("--verbose")
        .arg(source.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("compiled 1/1"));
}
