extern crate apksignerust;

mod common;

use apksignerust::{build_command, execute, verification::ArtifactVerifier, ui::Ui};
use common::{build_apk, fixtures};
use std::path::Path;

fn run(args: &[&str]) -> apksignerust::error::Result<()> {
    let mut argv = vec!["apksignerust", "-q"];
    argv.extend_from_slice(args);
    let matches = build_command().try_get_matches_from(argv).unwrap();
    execute(&matches)
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_align_sign_and_verify() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.apk");
    std::fs::write(&input, build_apk(true)).unwrap();
    let key = fixtures().join("test_key.pem");
    let cert = fixtures().join("test_cert.pem");

    // Align to the default output name, then check it.
    run(&["align", arg(&input), "-p"]).unwrap();
    let aligned = dir.path().join("app_aligned.apk");
    assert!(aligned.exists());
    run(&["align", arg(&aligned), "--check", "-p"]).unwrap();
    assert!(run(&["align", arg(&input), "--check"]).is_err());

    // Sign the aligned file
    let signed = dir.path().join("signed.apk");
    run(&[
        "sign",
        arg(&aligned),
        arg(&signed),
        "-k",
        arg(&key),
        "-c",
        arg(&cert),
    ])
    .unwrap();

    // Verify, pinned to the right and the wrong certificate
    run(&["verify", arg(&signed), "-c", arg(&cert)]).unwrap();
    let other = fixtures().join("other_cert.pem");
    assert!(run(&["verify", arg(&signed), "-c", arg(&other)]).is_err());

    // Existing output is refused without --overwrite
    let again = run(&[
        "sign",
        arg(&aligned),
        arg(&signed),
        "-k",
        arg(&key),
        "-c",
        arg(&cert),
    ]);
    assert!(again.is_err());
}

#[test]
fn test_process_in_place_with_keystore() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.apk");
    let asset = dir.path().join("config.json");
    std::fs::write(&input, build_apk(false)).unwrap();
    std::fs::write(&asset, b"{\"patched\":true}").unwrap();
    let replace = format!("assets/config.json={}", arg(&asset));

    run(&[
        "process",
        arg(&input),
        "-i",
        "-K",
        arg(&fixtures().join("test_keystore.p12")),
        "--alias",
        "testkey",
        "--store-pass",
        "changeme",
        "-r",
        &replace,
        "--scheme",
        "both",
    ])
    .unwrap();

    let bytes = std::fs::read(&input).unwrap();
    let report = ArtifactVerifier::verify(&bytes, None, &Ui::default()).unwrap();
    assert_eq!(report.v1_entries, 5);
    run(&["verify", arg(&input)]).unwrap();
}

#[test]
fn test_missing_input_is_reported() {
    let err = run(&["verify", "/nonexistent/apksignerust/app.apk"]).unwrap_err();
    assert!(matches!(err, apksignerust::error::ApkError::Config(_)));
}
