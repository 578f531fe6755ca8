use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn write(root: &Path, rel: &str, content: &str) {
    let p = root.join(rel);
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(p, content).unwrap();
}

fn mdhop() -> Command {
    Command::cargo_bin("mdhop").unwrap()
}

#[test]
fn build_stats_and_query_roundtrip() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[B]]\n[[Missing]]\n");
    write(root, "B.md", "body\n");

    mdhop()
        .arg("--vault")
        .arg(root)
        .arg("build")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 notes"));

    mdhop()
        .arg("--vault")
        .arg(root)
        .args(["--format", "json", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"notes_total\": 2"))
        .stdout(predicate::str::contains("\"phantoms\": 1"));

    mdhop()
        .arg("--vault")
        .arg(root)
        .args(["query", "B.md", "--backlinks"])
        .assert()
        .success()
        .stdout(predicate::str::contains("A.md"));

    mdhop()
        .arg("--vault")
        .arg(root)
        .args(["resolve", "--from", "A.md", "--link", "[[B]]"])
        .assert()
        .success()
        .stdout(predicate::str::contains("note B B.md"));
    Ok(())
}

#[test]
fn read_commands_suggest_build_when_index_is_missing() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    mdhop()
        .arg("--vault")
        .arg(temp.path())
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("mdhop build"));
    Ok(())
}

#[test]
fn move_command_reports_rewrites() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "[[M]]\n");
    write(root, "M.md", "root\n");
    write(root, "sub/M.md", "nested\n");

    mdhop().arg("--vault").arg(root).arg("build").assert().success();

    mdhop()
        .arg("--vault")
        .arg(root)
        .args(["move", "--from", "M.md", "--to", "archive/M.md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[[archive/M]]"));

    assert_eq!(fs::read_to_string(root.join("A.md"))?, "[[archive/M]]\n");
    Ok(())
}

#[test]
fn query_entry_detection_handles_tags() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let root = temp.path();
    write(root, "A.md", "#todo\n");

    mdhop().arg("--vault").arg(root).arg("build").assert().success();

    mdhop()
        .arg("--vault")
        .arg(root)
        .args(["--format", "json", "query", "#todo", "--backlinks"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"type\": \"tag\""))
        .stdout(predicate::str::contains("A.md"));
    Ok(())
}
