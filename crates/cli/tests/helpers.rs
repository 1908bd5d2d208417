use std::fs;

use emuexec::{canonicalize_or_current, file_uid, sha256_file};
use tempfile::tempdir;

#[test]
fn canonicalize_or_current_returns_cwd_for_dot() {
    let cwd = std::env::current_dir().expect("cwd");
    assert_eq!(canonicalize_or_current(".").expect("canonicalize"), cwd);
}

#[test]
fn canonicalize_or_current_resolves_existing_path() {
    let tmp = tempdir().expect("tempdir");
    let subdir = tmp.path().join("nested");
    fs::create_dir_all(&subdir).expect("create nested");

    let result = canonicalize_or_current(subdir.to_str().unwrap()).expect("canonicalize nested");
    assert_eq!(result, subdir.canonicalize().expect("canonicalize subdir"));
}

#[test]
fn canonicalize_or_current_accepts_missing_paths() {
    let result = canonicalize_or_current("not-created-yet").expect("fallback");
    assert!(result.is_absolute());
    assert!(result.ends_with("not-created-yet"));
}

#[test]
fn sha256_file_hashes_contents_and_counts_bytes() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("data.bin");
    fs::write(&path, b"abc").expect("write");

    let (digest, size) = sha256_file(&path).expect("hash");
    assert_eq!(digest, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    assert_eq!(size, 3);
    assert_eq!(file_uid(&path).expect("uid"), format!("{digest}_3"));
}

#[test]
fn sha256_file_errors_for_missing_file() {
    let tmp = tempdir().expect("tempdir");
    let err = sha256_file(&tmp.path().join("missing")).unwrap_err();
    assert!(err.to_string().contains("Failed to open file for hashing"));
}
