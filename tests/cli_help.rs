use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn cli_help_runs() {
    let mut cmd = Command::cargo_bin("session2rrd").unwrap();
    cmd.arg("--help").assert().success();
}

#[test]
fn schema_lists_supported_parsers() {
    let mut cmd = Command::cargo_bin("session2rrd").unwrap();
    cmd.arg("schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("PcapGpsParser"))
        .stdout(predicate::str::contains("PcapLidarParser"))
        .stdout(predicate::str::contains("RiffParser"));
}
