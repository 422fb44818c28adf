use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn run_inspect(dir: &Path, files: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bill-triage"))
        .arg("inspect")
        .args(files)
        .current_dir(dir)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run bill-triage")
}

#[test]
fn test_inspect_prints_format_and_candidates() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("filtered.json"),
        r#"{"relevant_bills": [{"bill_number": "SB01071", "title": "Palliative care", "url": "https://cga.ct.gov/SB01071", "reason": "Hospice"}]}"#,
    )
    .unwrap();

    let output = run_inspect(dir.path(), &["filtered.json"]);
    assert!(output.status.success());

    insta::assert_snapshot!(String::from_utf8_lossy(&output.stdout), @r#"
    {"file":"filtered.json","format":{"format":"ai_filtered","bill_count":1,"has_summary":false,"has_similarity_scores":false,"fields":["bill_number","reason","title","url"]}}
    {"identifier":"SB01071","title":"Palliative care","description":"","source_url":"https://cga.ct.gov/SB01071","provenance":{"reason":"Hospice"}}
    "#);
}

#[test]
fn test_inspect_fails_on_unknown_format() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("mystery.json"), r#"{"foo": []}"#).unwrap();

    let output = run_inspect(dir.path(), &["mystery.json"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown filter format"));
    assert!(stderr.contains("foo"));
}

#[test]
fn test_inspect_fails_on_malformed_json() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.json"), "{\"results\": [").unwrap();

    let output = run_inspect(dir.path(), &["broken.json"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Malformed input at byte"));
}
