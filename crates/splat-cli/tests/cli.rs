use assert_cmd::Command;

fn cmd() -> Command {
    Command::cargo_bin("splat-transform").expect("Binary builds")
}

#[test]
fn version_flag_exits_zero() {
    cmd().arg("--version").assert().success();
    cmd().arg("-v").assert().success();
}

#[test]
fn help_exits_zero() {
    cmd().arg("--help").assert().success();
}

#[test]
fn no_arguments_fails_with_one() {
    cmd().assert().failure().code(1);
}

#[test]
fn generator_to_ply_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("grid.ply");

    cmd()
        .args(["-q", "grid.mjs", out.to_str().unwrap()])
        .assert()
        .success();

    let bytes = std::fs::read(&out).unwrap();
    assert!(bytes.starts_with(b"ply\nformat binary_little_endian 1.0\n"));
    // 16 splats, 14 float32 columns.
    let header_end = bytes
        .windows(12)
        .position(|w| w == b"\nend_header\n")
        .unwrap()
        + 12;
    assert_eq!(bytes.len() - header_end, 16 * 14 * 4);
}

#[test]
fn generator_params_change_the_output() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("grid.csv");

    cmd()
        .args([
            "-q",
            "grid.mjs",
            "-p",
            "size=2",
            out.to_str().unwrap(),
        ])
        .assert()
        .success();

    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text.lines().count(), 5, "Header plus 4 splats");
}

#[test]
fn overwrite_refused_without_flag() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("grid.ply");
    std::fs::write(&out, b"occupied").unwrap();

    cmd()
        .args(["-q", "grid.mjs", out.to_str().unwrap()])
        .assert()
        .failure()
        .code(1);
    assert_eq!(std::fs::read(&out).unwrap(), b"occupied");

    cmd()
        .args(["-q", "-w", "grid.mjs", out.to_str().unwrap()])
        .assert()
        .success();
    assert!(std::fs::read(&out).unwrap().starts_with(b"ply\n"));
}

#[test]
fn unsupported_output_fails_with_one() {
    cmd()
        .args(["-q", "grid.mjs", "out.unknown"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn missing_input_fails_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.ply");
    cmd()
        .args(["-q", "no-such-file.ply", out.to_str().unwrap()])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn empty_filter_result_fails_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.ply");
    cmd()
        .args([
            "-q",
            "grid.mjs",
            "-V",
            "x,gt,1000",
            out.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn actions_after_output_apply_to_combined_table() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("crop.csv");

    // Two grids merged, then cropped to the positive-x half.
    cmd()
        .args([
            "-q",
            "grid.mjs",
            "grid.mjs",
            out.to_str().unwrap(),
            "-B",
            "0,-,-,-,-,-",
        ])
        .assert()
        .success();

    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text.lines().count(), 17, "Header plus 2 x 8 splats");
}
