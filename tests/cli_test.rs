//! The `maia_daq` binary end to end.

use std::io::Write;
use std::process::Command;

const BIN: &str = env!("CARGO_BIN_EXE_maia_daq");

fn plan_file(rows: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "name,serial,info,xstart,xstop,ystart,ystop,pitch,dwell,type,owner").unwrap();
    file.write_all(rows.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn fast_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "[executor]\nspeed_mm_per_sec = 1000.0\nsettle_ms = 0\ndwell_scale = 0.0"
    )
    .unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_validate_lists_plan() {
    let plan = plan_file("s1,A-1,first,0,10,0,10,2,0.01,powder,ops\ns2,A-2,second,0,5,0,5,1,0.5,film,ops\n");
    let output = Command::new(BIN)
        .args(["validate", "--plan"])
        .arg(plan.path())
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("s1"));
    assert!(stdout.contains("s2"));
    assert!(stdout.contains("2 scan(s)"));
}

#[test]
fn test_validate_reports_missing_columns() {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "name,xstart\ns1,0").unwrap();
    let output = Command::new(BIN)
        .args(["validate", "--plan"])
        .arg(file.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("missing required columns"));
}

#[test]
fn test_run_prints_status_lines() {
    let plan = plan_file("s1,A-1,first,0,10,0,10,2,0.01,powder,ops\n");
    let config = fast_config();
    for isolation in ["thread", "process"] {
        let output = Command::new(BIN)
            .args(["run", "--isolation", isolation, "--plan"])
            .arg(plan.path())
            .arg("--config")
            .arg(config.path())
            .env("RUST_LOG", "off")
            .output()
            .unwrap();

        assert!(output.status.success(), "{} isolation failed", isolation);
        let stdout = String::from_utf8(output.stdout).unwrap();
        let statuses: Vec<_> = stdout
            .lines()
            .map(|l| maia_daq::messages::decode_status(l).unwrap().label())
            .collect();
        assert_eq!(statuses, vec!["running", "completed"], "{} isolation", isolation);
    }
}
