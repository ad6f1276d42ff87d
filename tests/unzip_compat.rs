use std::process::Command;
use tempfile::tempdir;

use zipcraft::{Entry, OutputStream};

/// Writes a ZIP using the library and then calls `unzip -t` to verify
/// compatibility with a real-world implementation. Skipped if `unzip` isn't
/// on the system running the tests.
#[test]
fn unzip_compatibility() {
    let check = Command::new("unzip").arg("-v").output();
    if check.is_err() {
        eprintln!("skipping test: `unzip` not found");
        return;
    }

    let dir = tempdir().unwrap();
    let zip_path = dir.path().join("compat.zip");

    {
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut writer = OutputStream::new(file);

        let mut hello = Entry::new("hello.txt").unwrap();
        hello.size = "hello from test".len() as u64;
        writer.put_next_entry(hello).unwrap();
        writer.write(b"hello from test").unwrap();

        let mut big = Entry::new("big.bin").unwrap();
        big.size = 1024 * 1024;
        writer.put_next_entry(big).unwrap();
        for _ in 0..1024 {
            writer.write(&vec![0u8; 1024]).unwrap();
        }

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
}
