use std::fs;
use std::process::Command;
use tempfile::tempdir;

// This test packages a directory and then calls `unzip` to verify compatibility.
// If `unzip` is not present on the system, the test will be skipped.

#[test]
fn unzip_compatibility() {
    use lambda_pack::{build_archive, PackageOptions};

    // Check if `unzip` exists by trying to run `unzip -v`.
    let check = Command::new("unzip").arg("-v").output();
    if check.is_err() {
        eprintln!("skipping test: `unzip` not found");
        return;
    }

    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("lib")).unwrap();
    fs::write(src.join("handler.py"), b"def handler(e, c):\n    return 'ok'\n").unwrap();
    // a moderate amount of data to ensure non-trivial archive
    fs::write(src.join("lib/blob.bin"), vec![7u8; 1024 * 1024]).unwrap();

    let package = build_archive(&src, &PackageOptions::default()).unwrap();
    let zip_path = dir.path().join("compat.zip");
    fs::write(&zip_path, &package.bytes).unwrap();

    // Run `unzip -t` to test archive integrity
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

    // Extract and compare contents
    let out = dir.path().join("out");
    let status = Command::new("unzip")
        .arg("-q")
        .arg(&zip_path)
        .arg("-d")
        .arg(&out)
        .status()
        .expect("failed to run unzip");
    assert!(status.success());
    assert_eq!(
        fs::read(out.join("lib/blob.bin")).unwrap(),
        vec![7u8; 1024 * 1024]
    );
}
