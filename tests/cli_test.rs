use assert_cmd::Command;
use predicates::prelude::*;

fn benchmark() -> Command {
    let mut cmd = Command::cargo_bin("convolution-benchmark").unwrap();
    cmd.env("RUST_LOG", "warn");
    cmd
}

#[test]
fn test_inference_reuse_report() {
    benchmark()
        .args(["-m", "inference", "-a", "wt8x8", "-kt", "reuse"])
        .args(["-ic", "3", "-oc", "16", "-is", "32", "32", "-ks", "3", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Algorithm: WT8x8"))
        .stdout(predicate::str::contains("Input transform:"))
        .stdout(predicate::str::contains("Overhead:"));
}

#[test]
fn test_sequential_output_with_padding() {
    benchmark()
        .args(["-ic", "2", "-oc", "4", "-is", "20", "18", "-ks", "5", "5", "-ip", "2", "-t", "0", "-i", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Input: 20x18 with implicit padding 2"))
        .stdout(predicate::str::contains("Threads:").not())
        .stdout(predicate::str::contains("Iterations: 2"));
}

#[test]
fn test_missing_dimension() {
    benchmark()
        .args(["-ic", "3", "-oc", "16", "-is", "32", "32"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("kernel size is not specified"))
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_unknown_flag() {
    benchmark()
        .args(["-ic", "3", "-oc", "16", "-is", "32", "32", "-ks", "3", "3", "--frobnicate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_unparsable_value() {
    benchmark()
        .args(["-ic", "three", "-oc", "16", "-is", "32", "32", "-ks", "3", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_unknown_strategy_prints_usage() {
    benchmark()
        .args(["-m", "inference", "-kt", "bogus", "-ic", "3", "-oc", "16", "-is", "32", "32", "-ks", "3", "3"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("bogus"))
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_inference_requires_unit_batch() {
    benchmark()
        .args(["-m", "inference", "-b", "2", "-ic", "3", "-oc", "16", "-is", "32", "32", "-ks", "3", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unit batch size"));
}
