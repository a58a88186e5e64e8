//! Drives the compiled `repcrec` binary.

mod common;

use std::io::Write;
use std::process::{Command, Stdio};

#[test]
fn run_prints_transcript_for_script_file() {
    let mut script = tempfile::NamedTempFile::new().expect("temp script");
    writeln!(script, "// scenario 3").expect("write");
    writeln!(script, "beginRO(T1)").expect("write");
    writeln!(script, "R(T1, x4)").expect("write");
    writeln!(script, "end(T1)").expect("write");
    script.flush().expect("flush");

    let output = Command::new(common::repcrec_bin())
        .arg("run")
        .arg(script.path())
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn repcrec");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "x4: 40\nT1 commits\n");
}

#[test]
fn run_reads_stdin_and_emits_json_lines() {
    let mut child = Command::new(common::repcrec_bin())
        .args(["run", "--format", "json"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn repcrec");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"begin(T1)\nW(T1, x1, 7)\nend(T1)\n")
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(events.len(), 3);
    assert_eq!(events[2]["outcome"]["outcome"], "committed");
    assert_eq!(events[2]["outcome"]["txn"], "T1");
    assert_eq!(events[2]["tick"], 3);
}

#[test]
fn verify_accepts_bundled_answers() {
    let output = Command::new(common::repcrec_bin())
        .arg("verify")
        .arg(common::data_dir())
        .output()
        .expect("spawn repcrec");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{stdout}");
    assert!(stdout.contains(" 0 failed"), "{stdout}");
}

#[test]
fn verify_reports_mismatch() {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(dir.path().join("bad.in"), "beginRO(T1)\nR(T1, x2)\n").expect("write in");
    std::fs::write(dir.path().join("bad.ans"), "x2: 21\n").expect("write ans");

    let output = Command::new(common::repcrec_bin())
        .arg("verify")
        .arg(dir.path())
        .output()
        .expect("spawn repcrec");
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("FAIL bad"), "{stdout}");
}

#[test]
fn zero_sites_is_rejected() {
    let output = Command::new(common::repcrec_bin())
        .args(["run", "--sites", "0"])
        .stdin(Stdio::null())
        .output()
        .expect("spawn repcrec");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("at least one site"), "{stderr}");
}
