#![allow(non_snake_case)]

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::tempdir;

const BINARY: &str = env!("CARGO_BIN_EXE_code_coverage");

fn dat(file: &str, line: u32, count: u64) -> String {
    format!("# SystemC::Coverage-3\nC '\x01f\x02{file}\x01l\x02{line}\x01h\x02top.t' {count}\n")
}

fn code_coverage(workdir: &Path, args: &[&str]) -> Output {
    Command::new(BINARY)
        .current_dir(workdir)
        .env_remove("VERILATOR_ROOT")
        .arg("--verilator-root")
        .arg(workdir)
        .args(["--coverage-dir", "cov", "--report-dir", "report"])
        .args(args)
        .output()
        .expect("run code_coverage")
}

fn json_from(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let start = stdout.find('{').expect("json object in stdout");
    serde_json::Deserializer::from_str(&stdout[start..])
        .into_iter::<Value>()
        .next()
        .expect("json value")
        .expect("valid json")
}

#[test]
fn code_coverage__collect_then_report_json__then_totals_from_merged_info() {
    let work = tempdir().expect("tempdir");
    let cov = work.path().join("cov/nested");
    fs::create_dir_all(&cov).expect("cov dir");
    let source = format!("{}/src/V3Ast.cpp", work.path().display());
    fs::write(cov.join("a.dat"), dat(&source, 10, 0)).expect("a");
    fs::write(cov.join("b.dat"), dat(&source, 10, 4)).expect("b");
    fs::write(cov.join("c.dat"), dat("/usr/include/vector", 3, 1)).expect("c");

    let output = code_coverage(work.path(), &["collect"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let info = fs::read_to_string(work.path().join("report/app_total.info")).expect("info");
    assert_eq!(info, "TN:verilator_coverage\nSF:src/V3Ast.cpp\nDA:10,4\nend_of_record\n");
    assert!(work.path().join("report/app_total.dat").is_file());

    let output = code_coverage(work.path(), &["report", "--format", "json"]);
    assert!(output.status.success());
    let json = json_from(&output);
    assert_eq!(json["files"], 1);
    assert_eq!(json["lines"]["hit"], 1);
    assert_eq!(json["lines"]["total"], 1);
}

#[test]
fn code_coverage__report_unknown_format__then_fails() {
    let work = tempdir().expect("tempdir");
    fs::create_dir_all(work.path().join("report")).expect("report dir");
    fs::write(
        work.path().join("report/app_total.info"),
        "TN:verilator_coverage\nend_of_record\n",
    )
    .expect("info");
    let output = code_coverage(work.path(), &["report", "--format", "xml"]);
    assert!(!output.status.success());
}

#[test]
fn code_coverage__clean__then_directories_reset() {
    let work = tempdir().expect("tempdir");
    fs::create_dir_all(work.path().join("cov")).expect("cov");
    fs::write(work.path().join("cov/old.dat"), dat("t.v", 1, 1)).expect("old");
    fs::create_dir_all(work.path().join("report")).expect("report");

    let output = code_coverage(work.path(), &["clean"]);
    assert!(output.status.success());
    assert!(work.path().join("cov").is_dir());
    assert!(!work.path().join("cov/old.dat").exists());
    assert!(!work.path().join("report").exists());
}

#[cfg(unix)]
#[test]
fn code_coverage__full__then_tests_run_collected_and_reported() {
    let work = tempdir().expect("tempdir");
    let template_a = work.path().join("a.tpl");
    let template_b = work.path().join("b.tpl");
    fs::write(&template_a, dat("t.v", 1, 2)).expect("template a");
    fs::write(&template_b, dat("t.v", 2, 0)).expect("template b");
    let test_a = format!("cp {} %c", template_a.display());
    let test_b = format!("cp {} \"$VERILATOR_COVERAGE_FILE\"", template_b.display());

    let output = code_coverage(
        work.path(),
        &["full", "--test", &test_a, "--test", &test_b, "-j", "2", "--format", "json"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[TIMING] Total full coverage workflow"));
    let json = json_from(&output);
    assert_eq!(json["lines"]["hit"], 1);
    assert_eq!(json["lines"]["total"], 2);
}

#[test]
fn code_coverage__duplicate_tests__then_rejected_before_running() {
    let work = tempdir().expect("tempdir");
    let output = code_coverage(
        work.path(),
        &["run", "--test", "touch ran.flag", "--test", "touch ran.flag"],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("overwrite the same coverage file"));
    assert!(!work.path().join("ran.flag").exists());
}
