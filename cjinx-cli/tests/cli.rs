use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use std::path::Path;
use std::process::Command;

const BLOCK: usize = 4096;

fn cjinx(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cjinx").unwrap();
    cmd.env_remove("CJINX_CONFIG").env_remove("CJINX_LOG").arg("--config").arg(config);
    cmd
}

/// Config using the in-process device backend, so an image file can stand in
/// for the block device.
fn setup(td: &assert_fs::TempDir) -> std::path::PathBuf {
    let logs = td.child("logs");
    logs.create_dir_all().unwrap();
    let cfg = td.child("cjinx.toml");
    cfg.write_str(&format!(
        "[paths]\ndatabase_file = {:?}\nlog_dir = {:?}\n\n[io]\nbackend = \"native\"\ndrop_cache = false\n",
        td.child("state/records.json").path(),
        logs.path()
    ))
    .unwrap();
    cfg.path().to_path_buf()
}

/// Two-block image whose block 1 starts with `first`.
fn image(td: &assert_fs::TempDir, first: u8) -> std::path::PathBuf {
    let mut data = vec![0x5Au8; 2 * BLOCK];
    data[BLOCK] = first;
    let img = td.child("disk.img");
    img.write_binary(&data).unwrap();
    img.path().to_path_buf()
}

fn seed_store(td: &assert_fs::TempDir, file: &Path, device: &Path, state: &str) {
    let rec = record_json(file, device, state);
    td.child("state").create_dir_all().unwrap();
    td.child("state/records.json")
        .write_str(&format!("{{\"version\":1,\"records\":[{rec}]}}"))
        .unwrap();
}

fn record_json(file: &Path, device: &Path, state: &str) -> String {
    format!(
        "{{\"path\":{:?},\"mtime\":0.0,\"device\":{:?},\"block\":1,\"offset\":0,\"original\":65,\"modified\":193,\"state\":\"{state}\"}}",
        file, device
    )
}

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("cjinx")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("corrupt"))
        .stdout(predicate::str::contains("revert"))
        .stdout(predicate::str::contains("wait"));
}

#[test]
fn missing_config_fails() {
    let td = assert_fs::TempDir::new().unwrap();
    cjinx(td.child("absent.toml").path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("read config"));
}

#[test]
fn missing_log_dir_fails() {
    let td = assert_fs::TempDir::new().unwrap();
    let cfg = td.child("cjinx.toml");
    cfg.write_str(&format!(
        "[paths]\ndatabase_file = \"db.json\"\nlog_dir = {:?}\n",
        td.child("nowhere").path()
    ))
    .unwrap();
    cjinx(cfg.path()).arg("list").assert().failure().stderr(predicate::str::contains("doesn't exist"));
}

#[test]
fn list_on_fresh_store_is_empty() {
    let td = assert_fs::TempDir::new().unwrap();
    let cfg = setup(&td);
    cjinx(&cfg)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("0 record(s)"));
    td.child("state/records.json").assert(predicate::path::is_file());
    td.child("logs/cj_debug.log").assert(predicate::path::is_file());
}

#[test]
fn db_flag_overrides_config() {
    let td = assert_fs::TempDir::new().unwrap();
    let cfg = setup(&td);
    let other = td.child("other.json");
    cjinx(&cfg).arg("--db").arg(other.path()).arg("list").assert().success();
    other.assert(predicate::path::is_file());
    td.child("state/records.json").assert(predicate::path::missing());
}

#[test]
fn zero_probability_touches_nothing() {
    let td = assert_fs::TempDir::new().unwrap();
    let cfg = setup(&td);
    let victim = td.child("victim.bin");
    victim.write_str("untouched").unwrap();
    cjinx(&cfg)
        .args(["corrupt", "-p", "0", "-f"])
        .arg(victim.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing happened this time"));
    victim.assert("untouched");
    cjinx(&cfg)
        .args(["-q", "list"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("0 record(s)"));
}

#[test]
fn quiet_silences_stdout() {
    let td = assert_fs::TempDir::new().unwrap();
    let cfg = setup(&td);
    cjinx(&cfg)
        .args(["-q", "corrupt", "-p", "0", "-f", "whatever"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    td.child("logs/cj_debug.log").assert(predicate::str::contains("Nothing happened this time"));
}

#[test]
fn corrupting_missing_file_fails() {
    let td = assert_fs::TempDir::new().unwrap();
    let cfg = setup(&td);
    cjinx(&cfg)
        .args(["corrupt", "-f"])
        .arg(td.child("ghost").path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("not a regular file"))
        .stderr(predicate::str::contains("not corrupted"));
}

#[test]
fn revert_with_empty_store_succeeds() {
    let td = assert_fs::TempDir::new().unwrap();
    let cfg = setup(&td);
    cjinx(&cfg).arg("revert").assert().success().stdout(predicate::str::contains("reverted 0"));
}

#[test]
fn revert_restores_recorded_byte() {
    let td = assert_fs::TempDir::new().unwrap();
    let cfg = setup(&td);
    let file = td.child("data.bin");
    file.write_str("payload").unwrap();
    let img = image(&td, 0xC1);
    seed_store(&td, file.path(), &img, "committed");

    cjinx(&cfg)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("committed"))
        .stdout(predicate::str::contains("0xc1"));

    cjinx(&cfg).args(["revert", "-f"]).arg(file.path()).assert().success();
    let bytes = std::fs::read(&img).unwrap();
    assert_eq!(bytes[BLOCK], 0x41);
    assert!(bytes[..BLOCK].iter().all(|b| *b == 0x5A));
    assert!(bytes[BLOCK + 1..].iter().all(|b| *b == 0x5A));
    cjinx(&cfg).arg("list").assert().success().stdout(predicate::str::is_empty());
    td.child("logs/cj.log").assert(predicate::str::contains("REVERT END success"));
}

#[test]
fn revert_refuses_changed_block() {
    let td = assert_fs::TempDir::new().unwrap();
    let cfg = setup(&td);
    let file = td.child("data.bin");
    file.write_str("payload").unwrap();
    let img = image(&td, 0x00);
    seed_store(&td, file.path(), &img, "committed");

    cjinx(&cfg).arg("revert").assert().failure().stderr(predicate::str::contains("could not be reverted"));
    assert_eq!(std::fs::read(&img).unwrap()[BLOCK], 0x00);
    cjinx(&cfg).arg("list").assert().success().stdout(predicate::str::contains("data.bin"));
}

#[test]
fn startup_commits_staged_record_found_on_disk() {
    let td = assert_fs::TempDir::new().unwrap();
    let cfg = setup(&td);
    let file = td.child("data.bin");
    file.write_str("payload").unwrap();
    let img = image(&td, 0xC1);
    seed_store(&td, file.path(), &img, "staged");

    cjinx(&cfg)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("committed"));
    td.child("logs/cj.log").assert(predicate::str::contains("CORRUPT record: ('"));
}

#[test]
fn startup_drops_staged_record_never_written() {
    let td = assert_fs::TempDir::new().unwrap();
    let cfg = setup(&td);
    let file = td.child("data.bin");
    file.write_str("payload").unwrap();
    let img = image(&td, 0x41);
    seed_store(&td, file.path(), &img, "staged");

    cjinx(&cfg)
        .args(["-q", "list"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("0 record(s)"));
}
