use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

const TRAIN: &str = "\
# user\trelation\titem
u1\tlikes\ti1
u1\tlikes\ti2
u2\tlikes\ti2
u2\tlikes\ti3
u3\tviewed\ti1
u3\tlikes\ti3
";

#[test]
fn test_cli_train_evaluate_predict() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let train = dir.path().join("train.tsv");
    let test = dir.path().join("test.tsv");
    let out = dir.path().join("ckpt");
    fs::write(&train, TRAIN)?;
    fs::write(&test, "u1\tlikes\ti3\n")?;

    let mut cmd = Command::cargo_bin("cf-kge")?;
    cmd.arg("train")
        .arg(&train)
        .arg("--model")
        .arg("transe")
        .arg("--dim")
        .arg("4")
        .arg("--epochs")
        .arg("3")
        .arg("-o")
        .arg(&out);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Model:       TransE"))
        .stdout(predicate::str::contains("Saved to"));

    assert!(out.join("weights.safetensors").exists());
    assert!(out.join("meta.json").exists());
    assert!(out.join("report.json").exists());

    let mut cmd = Command::cargo_bin("cf-kge")?;
    cmd.arg("evaluate")
        .arg(&out)
        .arg(&test)
        .arg("--known")
        .arg(&train);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("filtered"))
        .stdout(predicate::str::contains("(n=1)"));

    let mut cmd = Command::cargo_bin("cf-kge")?;
    cmd.arg("predict")
        .arg(&out)
        .arg("--head")
        .arg("u1")
        .arg("--relation")
        .arg("likes")
        .arg("--top")
        .arg("2");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Top 2 for (u1, likes, ?)"));

    Ok(())
}

#[test]
fn test_cli_rejects_malformed_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let train = dir.path().join("train.tsv");
    fs::write(&train, "u1\tlikes\ti1\nnot a triple\n")?;

    let mut cmd = Command::cargo_bin("cf-kge")?;
    cmd.arg("train").arg(&train).arg("-o").arg(dir.path().join("out"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));

    Ok(())
}

#[test]
fn test_cli_unknown_entity_in_predict() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let train = dir.path().join("train.tsv");
    let out = dir.path().join("ckpt");
    fs::write(&train, TRAIN)?;

    Command::cargo_bin("cf-kge")?
        .args(["train", "--model", "mur", "--dim", "4", "--epochs", "1"])
        .arg(&train)
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    Command::cargo_bin("cf-kge")?
        .arg("predict")
        .arg(&out)
        .args(["--head", "nobody", "--relation", "likes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown entity 'nobody'"));

    Ok(())
}

#[test]
fn test_cli_reports_restored_best_weights() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let train = dir.path().join("train.tsv");
    let valid = dir.path().join("valid.tsv");
    fs::write(&train, TRAIN)?;
    fs::write(&valid, "u1\tlikes\ti3\n")?;

    Command::cargo_bin("cf-kge")?
        .args(["train", "--model", "transe", "--dim", "4", "--epochs", "5"])
        .arg(&train)
        .arg("--valid")
        .arg(&valid)
        .arg("-o")
        .arg(dir.path().join("ckpt"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Best valid:"))
        .stdout(predicate::str::contains("weights restored"));

    Ok(())
}
