use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_suggest_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("coinflow"));
    cmd.args(["suggest", "--cost", "23", "--ones", "100", "--fives", "100"]);

    cmd.assert()
        .success()
        // Best suggestion: pay 25, get 2 back as two 1-unit coins.
        .stdout(predicate::str::contains("\"amount\": \"25\""))
        .stdout(predicate::str::contains("\"change\": \"2\""))
        .stdout(predicate::str::contains("\"suggestions\""));

    Ok(())
}

#[test]
fn test_suggest_with_empty_hoppers_recommends_exact() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("coinflow"));
    cmd.args(["suggest", "--cost", "23"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"amount\": \"23\""))
        .stdout(predicate::str::contains("NoChangeAvailable"));

    Ok(())
}

#[test]
fn test_check_verdicts() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("coinflow"));
    cmd.args(["check", "--change", "7", "--ones", "2", "--fives", "1"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"dispensable\": true"))
        .stderr(predicate::str::contains("Change can be dispensed"));

    let mut cmd = Command::new(cargo_bin!("coinflow"));
    cmd.args(["check", "--change", "7", "--ones", "1", "--fives", "1"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"dispensable\": false"))
        .stderr(predicate::str::contains("Insufficient 1-unit coins"));

    Ok(())
}

#[test]
fn test_check_respects_reserve_flag() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("coinflow"));
    cmd.args([
        "check", "--change", "10", "--fives", "10", "--min-fives", "9",
    ]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"dispensable\": false"))
        .stderr(predicate::str::contains("below the reserve"));

    Ok(())
}

#[test]
fn test_dispense_simulated() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("coinflow"));
    cmd.args(["dispense", "--amount", "6", "--coin-delay-ms", "1"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"))
        .stdout(predicate::str::contains("\"actual_change\": \"6\""))
        .stderr(predicate::str::contains("Preparing to dispense 6 in change"))
        .stderr(predicate::str::contains("complete"));

    Ok(())
}
