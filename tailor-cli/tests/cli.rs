//! Exit codes and summaries of the `tailor` binary.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn tailor(cwd: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tailor").unwrap();
    cmd.current_dir(cwd).env_remove("RUST_LOG");
    cmd
}

fn write_corpus(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(
        dir.join("m.c"),
        "int f2(int x) { return x + 1; }\nint f1(int y) { return f2(y) * 2; }\nint f3(void) { return 0; }\n",
    )
    .unwrap();
}

#[test]
fn clone_task_without_labels_exits_with_missing_artifact() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(&dir.path().join("src"));
    tailor(dir.path())
        .args(["-q", "extract", "--lang", "c", "--task", "clone"])
        .args(["--src_path", "src", "--encode_path", "enc", "--encoding"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("clone_labels.txt"));
}

#[test]
fn smell_task_without_labels_still_encodes() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(&dir.path().join("src"));
    tailor(dir.path())
        .args(["extract", "--lang", "c", "--task", "code_smell"])
        .args(["--src_path", "src", "--encode_path", "enc", "--encoding"])
        .assert()
        .success()
        .stdout(predicate::str::contains("graphs"));
    assert!(dir.path().join("enc/index.json").is_file());
}

#[test]
fn corrupt_cache_with_reextract_disallowed_exits_4() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("ir")).unwrap();
    fs::write(dir.path().join("ir/inter_results.json"), "{ truncated").unwrap();
    tailor(dir.path())
        .args(["-q", "extract", "--lang", "java", "--load_iresult", "--iresult_path", "ir"])
        .arg("--no_reextract")
        .assert()
        .code(4);
}

#[test]
fn training_without_encoding_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    tailor(dir.path())
        .args(["-q", "train", "--encode_path", "missing"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("tailor extract --encoding"));
}

#[test]
fn invalid_config_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("tailor.toml"), "[training]\nbatch_size = 0\n").unwrap();
    tailor(dir.path())
        .args(["-q", "train", "--encode_path", "enc"])
        .assert()
        .code(2);
}

#[test]
fn unknown_language_is_rejected_by_the_parser() {
    let dir = tempfile::tempdir().unwrap();
    tailor(dir.path())
        .args(["extract", "--lang", "cobol", "--src_path", "."])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown language"));
}
