//! End-to-end CLI tests for the romfetch binary.

use std::fs;
use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Command isolated from the user's config and data directories.
fn romfetch(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("romfetch").unwrap();
    cmd.env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    romfetch(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Queue, download and install game files"))
        .stdout(predicate::str::contains("retry-extraction"));
}

#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    romfetch(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("romfetch"));
}

#[test]
fn test_binary_without_subcommand_fails() {
    let home = TempDir::new().unwrap();
    romfetch(&home)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_binary_invalid_concurrency_fails() {
    let home = TempDir::new().unwrap();
    romfetch(&home)
        .args(["-c", "9", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_list_json_on_empty_queue() {
    let home = TempDir::new().unwrap();
    let data_dir = home.path().join("state");
    romfetch(&home)
        .args(["list", "--json", "--data-dir"])
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"active_downloads\": []"))
        .stdout(predicate::str::contains("\"completed\": []"));
    assert!(data_dir.join("queue.db").exists());
}

#[test]
fn test_fetch_rejects_image_url() {
    let home = TempDir::new().unwrap();
    romfetch(&home)
        .args([
            "fetch",
            "https://example.com/covers/box.png",
            "--game-id",
            "1",
            "--title",
            "Game",
            "--platform",
            "psx",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a game file"));
}

#[test]
fn test_pause_unknown_entry_is_not_an_error() {
    let home = TempDir::new().unwrap();
    romfetch(&home).args(["pause", "42"]).assert().success();
}

#[test]
fn test_invalid_config_file_is_reported() {
    let home = TempDir::new().unwrap();
    let config_dir = home.path().join("config").join("romfetch");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("config.toml"), "max_concurrent = 12\n").unwrap();

    romfetch(&home)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_concurrent"));
}

#[test]
fn test_extract_prints_launch_path() {
    let home = TempDir::new().unwrap();
    let archive = home.path().join("pack.zip");
    let mut writer = ZipWriter::new(fs::File::create(&archive).unwrap());
    for (name, data) in [
        ("Game (Disc 1).chd", vec![1_u8; 2048]),
        ("Game (Disc 2).chd", vec![2_u8; 2048]),
    ] {
        writer
            .start_file(name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&data).unwrap();
    }
    writer.finish().unwrap();
    let roms = home.path().join("roms");

    romfetch(&home)
        .args(["extract", "--title", "Game", "--platform", "psx", "--storage-root"])
        .arg(&roms)
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("Game.m3u"));

    let playlist = fs::read_to_string(roms.join("psx").join("Game").join("Game.m3u")).unwrap();
    assert_eq!(playlist.lines().count(), 2);
}
