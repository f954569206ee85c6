use std::process::Command;

#[test]
fn classweave_exits_non_zero_on_missing_input() {
    let output = Command::new(env!("CARGO_BIN_EXE_classweave"))
        .arg("--input")
        .arg("definitely-missing-element")
        .output()
        .expect("run classweave");

    assert!(!output.status.success());
}

#[test]
fn classweave_scans_an_empty_directory() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let output = Command::new(env!("CARGO_BIN_EXE_classweave"))
        .arg("--input")
        .arg(temp_dir.path())
        .arg("--quiet")
        .output()
        .expect("run classweave");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf8 report");
    assert!(stdout.contains("\"enumerated_classfiles\": 0"));
}
