use std::{path::PathBuf, process::Command};

fn write_fixture() -> PathBuf {
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("graph.json");
    std::fs::write(&path, include_str!("data/expression_graph.json")).unwrap();
    path
}

#[test]
fn cli_check_accepts_the_fixture() {
    let path = write_fixture();
    let out = Command::new(env!("CARGO_BIN_EXE_animato"))
        .arg("check")
        .arg("--in")
        .arg(&path)
        .output()
        .unwrap();
    assert!(out.status.success());
}

#[test]
fn cli_run_prints_one_json_line_per_frame() {
    let path = write_fixture();
    let out = Command::new(env!("CARGO_BIN_EXE_animato"))
        .args(["run", "--frames", "3", "--in"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(out.status.success());

    let stdout = String::from_utf8(out.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);

    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["frame"], 0);
    assert_eq!(first["values"]["2"], 20.0);
    assert_eq!(first["values"]["3"], 40.0);
}
