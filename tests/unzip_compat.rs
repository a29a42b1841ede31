use backup_archive::{ArchiveFactory, WriterOptions};
use std::process::Command;
use tempfile::tempdir;

// These tests write archives through the factory and then ask the system
// tools to verify them. If a tool is not present, its test is skipped.

fn tool_available(tool: &str, probe: &str) -> bool {
    Command::new(tool).arg(probe).output().is_ok()
}

#[test]
fn unzip_compatibility() {
    if !tool_available("unzip", "-v") {
        eprintln!("skipping test: `unzip` not found");
        return;
    }

    let dir = tempdir().unwrap();
    let zip_path = dir.path().join("compat.zip");

    {
        let mut writer = ArchiveFactory::global()
            .create_file_writer(&zip_path, &WriterOptions::default())
            .unwrap();
        writer
            .add_entry("hello.txt", &mut &b"hello from test"[..])
            .unwrap();
        // a moderate amount of data to ensure a non-trivial archive
        let big = vec![0u8; 1024 * 1024];
        writer
            .add_entry_sized("nested/big.bin", Some(big.len() as u64), &mut big.as_slice())
            .unwrap();
        writer.close().unwrap();
    }

    let output = Command::new("unzip")
        .arg("-t")
        .arg(&zip_path)
        .output()
        .expect("failed to run unzip");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "unzip reported failure: {} {}",
        stdout,
        stderr
    );
    assert!(stdout.contains("hello.txt"));
    assert!(stdout.contains("nested/big.bin"));
}

#[test]
fn tar_compatibility() {
    if !tool_available("tar", "--version") {
        eprintln!("skipping test: `tar` not found");
        return;
    }

    let dir = tempdir().unwrap();
    let tar_path = dir.path().join("compat.tar.gz");
    let long_name = format!("{}/file.txt", "deep".repeat(40));

    {
        let mut writer = ArchiveFactory::global()
            .create_file_writer(&tar_path, &WriterOptions::default())
            .unwrap();
        writer.add_entry("a.txt", &mut &b"hello"[..]).unwrap();
        writer.add_entry(&long_name, &mut &b"long"[..]).unwrap();
        writer.close().unwrap();
    }

    let output = Command::new("tar")
        .arg("-tzf")
        .arg(&tar_path)
        .output()
        .expect("failed to run tar");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "tar reported failure: {} {}",
        stdout,
        stderr
    );
    let listed: Vec<_> = stdout.lines().collect();
    assert_eq!(listed, ["a.txt", long_name.as_str()]);
}
