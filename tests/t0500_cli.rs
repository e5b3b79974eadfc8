use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_dump(dir: &Path) {
    fs::create_dir_all(dir.join("contents")).unwrap();
    fs::write(dir.join("contents/c1"), b"hi\n").unwrap();
    fs::write(dir.join("contents/c2"), b"feature\n").unwrap();

    let lines = concat!(
        r#"{"rev":1,"author":"kim","timestamp":1000000060,"message":"first","ops":[{"op":"add-dir","path":"trunk"},{"op":"add-file","path":"trunk/a.txt","content":"c1"}]}"#,
        "\n",
        r#"{"rev":2,"author":"sam","timestamp":1000000120,"message":"second","ops":[{"op":"add-file","path":"trunk/b.txt","content":"c2"}]}"#,
        "\n",
    );
    fs::write(dir.join("revisions.jsonl"), lines).unwrap();
}

fn git(repo: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .unwrap();
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout).trim_end().to_string()
}

#[test]
fn converts_a_dump_end_to_end() {
    let dump = TempDir::new().unwrap();
    write_dump(dump.path());
    let target = TempDir::new().unwrap();

    Command::cargo_bin("vss2git")
        .unwrap()
        .arg(dump.path())
        .arg("--target-repository")
        .arg(target.path())
        .arg("--quiet")
        .assert()
        .success();

    assert_eq!(
        git(target.path(), &["log", "--reverse", "--format=%s", "refs/heads/main"]),
        "first\nsecond"
    );
    assert_eq!(git(target.path(), &["show", "refs/heads/main:b.txt"]), "feature");
}

#[test]
fn make_authors_map_writes_template() {
    let dump = TempDir::new().unwrap();
    write_dump(dump.path());
    let target = TempDir::new().unwrap();
    let authors = dump.path().join("authors.json");

    Command::cargo_bin("vss2git")
        .unwrap()
        .arg(dump.path())
        .arg("--target-repository")
        .arg(target.path())
        .arg("--make-authors-map")
        .arg(&authors)
        .arg("--quiet")
        .assert()
        .success();

    let text = fs::read_to_string(&authors).unwrap();
    assert!(text.contains("\"kim\""));
    assert!(text.contains("kim@localhost"));
    assert!(text.contains("\"sam\""));
}

#[test]
fn missing_dump_directory_fails() {
    let target = TempDir::new().unwrap();

    Command::cargo_bin("vss2git")
        .unwrap()
        .arg("/nonexistent/dump")
        .arg("--target-repository")
        .arg(target.path())
        .arg("--quiet")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ERROR:"));
}

#[test]
fn malformed_config_exits_with_config_code() {
    let dump = TempDir::new().unwrap();
    write_dump(dump.path());
    let config = dump.path().join("conv.xml");
    fs::write(&config, "<Projects><Bogus/></Projects>").unwrap();

    Command::cargo_bin("vss2git")
        .unwrap()
        .arg(dump.path())
        .arg("--config")
        .arg(&config)
        .arg("--quiet")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unknown element"));
}

#[test]
fn version_flag() {
    Command::cargo_bin("vss2git")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("vss2git 0."));
}

#[test]
fn missing_directory_argument_prints_usage() {
    Command::cargo_bin("vss2git")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("USAGE:"));
}
