use std::{fs, path::Path};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::tempdir;

fn run_with_report(workdir: &Path, args: &[&str]) -> Value {
    let json_path = workdir.join("report.json");
    let mut cmd = cargo_bin_cmd!("denoise-conv");
    cmd.current_dir(workdir)
        .args(args)
        .arg("--threads")
        .arg("2")
        .arg("--json")
        .arg(&json_path);
    cmd.assert().success();

    let payload = fs::read_to_string(&json_path).expect("read report");
    serde_json::from_str(&payload).expect("parse report")
}

fn dims(value: &Value) -> Vec<u64> {
    value
        .as_array()
        .expect("array")
        .iter()
        .map(|v| v.as_u64().expect("integer"))
        .collect()
}

#[test]
fn pooled_layer_verifies_against_reference() {
    let dir = tempdir().expect("tempdir");
    let report = run_with_report(
        dir.path(),
        &[
            "-c", "16", "-o", "32", "--height", "5", "--width", "10", "--post-op", "pool",
            "--verify",
        ],
    );

    assert_eq!(report["post_op"], "pool");
    assert_eq!(dims(&report["src"]), vec![16, 5, 10]);
    assert_eq!(dims(&report["dst"]), vec![32, 2, 5]);
    assert_eq!(dims(&report["global"]), vec![2, 3, 2]);
    assert_eq!(report["threads"], 2);
    assert_eq!(report["verification"]["passed"], true);
    assert_eq!(report["verification"]["mismatches"], 0);
}

#[test]
fn upsampled_layer_dumps_raw_output() {
    let dir = tempdir().expect("tempdir");
    let raw_path = dir.path().join("out").join("dst.f16");
    let raw_arg = raw_path.to_string_lossy().into_owned();
    let report = run_with_report(
        dir.path(),
        &[
            "--height", "3", "--width", "7", "--post-op", "upsample", "--iterations", "2",
            "--verify", "--dump-raw", &raw_arg,
        ],
    );

    assert_eq!(dims(&report["dst"]), vec![16, 6, 14]);
    assert_eq!(report["timing"]["iterations"], 2);
    assert_eq!(report["verification"]["passed"], true);
    let raw = fs::read(&raw_path).expect("raw dump");
    assert_eq!(raw.len(), 16 * 6 * 14 * 2);
}

#[test]
fn settings_file_controls_tiling() {
    let dir = tempdir().expect("tempdir");
    let settings_path = dir.path().join("settings.json");
    fs::write(
        &settings_path,
        r#"{ "tiling": { "eu_fusion": false, "max_group_items": 4 } }"#,
    )
    .expect("write settings");
    let settings_arg = settings_path.to_string_lossy().into_owned();

    let report = run_with_report(
        dir.path(),
        &["--height", "6", "--width", "40", "--config", &settings_arg],
    );

    assert_eq!(report["eu_fusion"], false);
    // (1, 3, 5) is all odd but padding is disabled.
    assert_eq!(dims(&report["global"]), vec![1, 3, 5]);
    let local: u64 = dims(&report["local"]).iter().product();
    assert!(local <= 4);
    assert!(report.get("verification").is_none());
}

#[test]
fn unaligned_channels_are_rejected() {
    let dir = tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("denoise-conv");
    cmd.current_dir(dir.path()).args(["-c", "24", "--threads", "1"]);
    let output = cmd.assert().failure().get_output().clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("divisible by 16"), "{stderr}");
}
