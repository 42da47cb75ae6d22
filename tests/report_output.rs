//! Report files produced from complete runs.

mod common;

use assert_json_diff::assert_json_include;
use common::{program_output, run_scripted, unity_device};
use hil_monitor::ReportFormat;
use serde_json::{json, Value};

#[test]
fn test_json_report_from_completed_run() {
    let device = unity_device(
        "SCRIPT0",
        &[
            "Running getSetMnoProfile...",
            "C:/temp/file.c:890:getSetMnoProfile:PASS",
            "Running tcpEchoAsync...",
            "C:/temp/file.c:900:tcpEchoAsync:FAIL:Function sock.  Expression Evaluated To FALSE",
            "2 Tests 1 Failures 0 Ignored",
        ],
    );
    let outcome = run_scripted(device);
    let report = outcome.report("esp-idf", "cellular_tests");

    let mut out = Vec::new();
    report.write(ReportFormat::Json, &mut out).unwrap();
    let actual: Value = serde_json::from_slice(&out).unwrap();

    assert_json_include!(
        actual: actual,
        expected: json!({
            "suite": "esp-idf",
            "class_name": "cellular_tests",
            "tests": 2,
            "failures": 1,
            "ignored": 0,
            "reboots": 0,
            "ended_early": false,
            "testcases": [
                { "name": "getSetMnoProfile", "status": "PASS" },
                { "name": "tcpEchoAsync", "status": "FAIL" }
            ]
        })
    );
    assert!(actual.get("end_note").is_none());
    assert!(actual["run_id"].is_string());
}

#[test]
fn test_xml_report_file_for_truncated_run() {
    let program = program_output(
        "./unit_tests",
        &["Running testA...", "x.c:1:testA:PASS", "Running testB..."],
    );
    let outcome = run_scripted(program);
    let report = outcome.report("esp-idf", "cellular_tests");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.xml");
    report.write_to_path(ReportFormat::Xml, &path).unwrap();

    let xml = std::fs::read_to_string(&path).unwrap();
    assert!(xml.starts_with("<?xml"));
    assert!(xml.contains(r#"<testsuite name="esp-idf""#));
    assert!(xml.contains(r#"tests="2""#));
    assert!(!xml.contains("<failure"));
    assert!(xml.contains(r#"name="testA""#));
    assert!(xml.contains("<system-err>run ended early: the stream closed before the summary</system-err>"));
}

#[test]
fn test_report_overwrites_existing_file() {
    let outcome = run_scripted(unity_device("SCRIPT0", &["0 Tests 0 Failures 0 Ignored"]));
    let report = outcome.report("esp-idf", "cellular_tests");

    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "stale contents that are much longer than the report would be").unwrap();
    report.write_to_path(ReportFormat::Json, file.path()).unwrap();

    let written: Value = serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
    assert_eq!(written["tests"], 0);
}
