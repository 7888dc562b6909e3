use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn raw_imf_stream() -> Vec<u8> {
    vec![
        0x01, 0x20, 0x00, 0x00, // reg write, no delay
        0xB0, 0x20, 0x0A, 0x00, // keyon, delay 10
        0xB0, 0x00, 0x00, 0x00, // keyoff
    ]
}

#[test]
fn formats_lists_known_ids() {
    Command::cargo_bin("opl-cli")
        .unwrap()
        .arg("formats")
        .assert()
        .success()
        .stdout(predicate::str::contains("dro-v1"))
        .stdout(predicate::str::contains("imf-type0"));
}

#[test]
fn identify_confirms_a_known_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song.imf");
    std::fs::File::create(&path).unwrap().write_all(&raw_imf_stream()).unwrap();

    Command::cargo_bin("opl-cli")
        .unwrap()
        .arg("identify")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("confirmed:"));
}

#[test]
fn identify_fails_gracefully_on_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.bin");
    std::fs::File::create(&path).unwrap().write_all(&[0xFF; 3]).unwrap();

    Command::cargo_bin("opl-cli")
        .unwrap()
        .arg("identify")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("no unambiguous match"));
}

#[test]
fn dump_prints_tags_and_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song.imf");
    std::fs::File::create(&path).unwrap().write_all(&raw_imf_stream()).unwrap();

    Command::cargo_bin("opl-cli")
        .unwrap()
        .arg("dump")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("tags:"))
        .stdout(predicate::str::contains("NoteOn"));
}

#[test]
fn convert_writes_an_output_file_in_the_target_format() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("song.imf");
    std::fs::File::create(&input).unwrap().write_all(&raw_imf_stream()).unwrap();
    let output = dir.path().join("song.dro");

    Command::cargo_bin("opl-cli")
        .unwrap()
        .arg("convert")
        .arg(&input)
        .arg(&output)
        .arg("--to")
        .arg("dro-v1")
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote"));

    let bytes = std::fs::read(&output).unwrap();
    assert_eq!(&bytes[0..8], b"DBRAWOPL");
}

#[test]
fn convert_rejects_an_unknown_output_format() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("song.imf");
    std::fs::File::create(&input).unwrap().write_all(&raw_imf_stream()).unwrap();
    let output = dir.path().join("song.out");

    Command::cargo_bin("opl-cli")
        .unwrap()
        .arg("convert")
        .arg(&input)
        .arg(&output)
        .arg("--to")
        .arg("not-a-format")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown output format"));
}
