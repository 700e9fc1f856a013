mod common;

use apksignerust::{
    align::{AlignOptions, Aligner, PAGE_ALIGNMENT},
    archive::Archive,
    error::ApkError,
    patch::EntryReplacement,
    processor::{ArtifactProcessor, Destination, Source},
    signing::{SchemeId, SchemeSelection, Signer, SigningConfig},
    ui::Ui,
    verification::ArtifactVerifier,
};
use common::*;
use std::fs;

fn aligner() -> Aligner {
    Aligner::new(AlignOptions::default()).unwrap()
}

fn sign(bytes: &[u8], config: &SigningConfig) -> Vec<u8> {
    let archive = Archive::parse(bytes).unwrap();
    Signer::new(&Ui::default())
        .sign(&archive, config)
        .unwrap()
        .to_bytes()
        .unwrap()
}

#[test]
fn fixture_starts_misaligned() {
    let archive = Archive::parse(&build_apk(false)).unwrap();
    let err = aligner().check(&archive).unwrap_err();
    match err {
        ApkError::Alignment { entry, offset, .. } => {
            assert_eq!(entry, BLOB_NAME);
            assert_ne!(offset % 4, 0);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn alignment_is_idempotent() {
    let ui = Ui::default();
    let (once, first) = ArtifactProcessor::align(&build_apk(true), &aligner(), &ui).unwrap();
    let (twice, second) = ArtifactProcessor::align(&once, &aligner(), &ui).unwrap();
    assert!(first.padded > 0);
    assert_eq!(second.padded, 0);
    assert_eq!(once, twice);
}

#[test]
fn stored_entries_land_on_their_boundary() {
    let aligner = Aligner::new(AlignOptions::default().with_page_aligned_libraries()).unwrap();
    let (aligned, _) =
        ArtifactProcessor::align(&build_apk(true), &aligner, &Ui::default()).unwrap();
    let archive = Archive::parse(&aligned).unwrap();
    aligner.check(&archive).unwrap();

    for entry in archive.entries.iter().filter(|e| e.is_stored()) {
        let boundary = if entry.name == LIB_NAME {
            PAGE_ALIGNMENT as u64
        } else {
            4
        };
        assert_eq!(entry.data_offset() % boundary, 0, "{}", entry.name);
    }
}

#[test]
fn alignment_preserves_crc_and_content() {
    let input = build_apk(true);
    let (aligned, report) = ArtifactProcessor::align(&input, &aligner(), &Ui::default()).unwrap();
    assert_eq!(report.entries, 5);
    assert_eq!(contents(&aligned), contents(&input));
    assert_eq!(read_entry(&aligned, BLOB_NAME), BLOB);
    assert_eq!(ArtifactProcessor::verify_zip_integrity(&aligned).unwrap(), 5);
}

#[test]
fn signed_apk_verifies_with_both_schemes() {
    let config = SigningConfig::new(rsa_keys());
    let (aligned, _) = ArtifactProcessor::align(&build_apk(false), &aligner(), &Ui::default()).unwrap();
    let signed = sign(&aligned, &config);

    let report =
        ArtifactVerifier::verify(&signed, Some(config.key_chain.certificate()), &Ui::default())
            .unwrap();
    assert!(report.has_scheme(SchemeId::JarV1));
    assert!(report.has_scheme(SchemeId::BlockV2));
    assert_eq!(report.v1_entries, 4);

    // Signing keeps the existing layout, so the output is still aligned.
    aligner().check(&Archive::parse(&signed).unwrap()).unwrap();
    assert_eq!(read_entry(&signed, BLOB_NAME), BLOB);
}

#[test]
fn ecdsa_signatures_verify() {
    let config = SigningConfig::new(ec_keys());
    let signed = sign(&build_apk(false), &config);
    let archive = Archive::parse(&signed).unwrap();
    assert!(archive.entry("META-INF/CERT.EC").is_some());

    let report =
        ArtifactVerifier::verify(&signed, Some(config.key_chain.certificate()), &Ui::default())
            .unwrap();
    assert_eq!(report.schemes, vec![SchemeId::JarV1, SchemeId::BlockV2]);
}

#[test]
fn tampered_entry_data_is_detected() {
    let config = SigningConfig::new(rsa_keys());
    let mut signed = sign(&build_apk(false), &config);
    let pos = signed
        .windows(BLOB.len())
        .position(|w| w == BLOB)
        .unwrap();
    signed[pos] ^= 0x01;

    assert!(ArtifactVerifier::verify(&signed, None, &Ui::default()).is_err());
}

#[test]
fn tampered_central_directory_is_detected() {
    let config = SigningConfig::new(rsa_keys()).with_schemes(SchemeSelection::V2);
    let mut signed = sign(&build_apk(false), &config);

    let eocd = signed.len() - 22;
    let cd_offset = u32::from_le_bytes(signed[eocd + 16..eocd + 20].try_into().unwrap()) as usize;
    // First central record's external attributes.
    signed[cd_offset + 38] ^= 0x01;

    let err = ArtifactVerifier::verify(&signed, None, &Ui::default()).unwrap_err();
    assert!(matches!(err, ApkError::Validation(_)));
}

#[test]
fn aligning_a_signed_apk_is_rejected() {
    let signed = sign(&build_apk(false), &SigningConfig::new(rsa_keys()));
    let err = ArtifactProcessor::align(&signed, &aligner(), &Ui::default()).unwrap_err();
    assert!(matches!(err, ApkError::AlreadySignedConflict(_)));

    let v2_only = sign(
        &build_apk(false),
        &SigningConfig::new(rsa_keys()).with_schemes(SchemeSelection::V2),
    );
    let err = ArtifactProcessor::align(&v2_only, &aligner(), &Ui::default()).unwrap_err();
    assert!(matches!(err, ApkError::AlreadySignedConflict(_)));
}

#[test]
fn resigning_with_another_key_replaces_the_signer() {
    let first = sign(&build_apk(false), &SigningConfig::new(rsa_keys()));
    let other = SigningConfig::new(other_keys());
    let second = sign(&first, &other);

    let ui = Ui::default();
    ArtifactVerifier::verify(&second, Some(other.key_chain.certificate()), &ui).unwrap();
    let err = ArtifactVerifier::verify(&second, Some(rsa_keys().certificate()), &ui).unwrap_err();
    assert!(matches!(err, ApkError::Validation(_)));
}

#[test]
fn end_to_end_pipeline_with_keystore() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("app.apk");
    let output = dir.path().join("app_signed.apk");
    fs::write(&input, build_minimal_apk()).unwrap();

    let config = SigningConfig::new(keystore_keys());
    let ui = Ui::default();
    let report = ArtifactProcessor::process_file(
        &Source::File(input.clone()),
        &Destination::File {
            path: output.clone(),
            replace: false,
        },
        &[],
        &aligner(),
        &config,
        &ui,
    )
    .unwrap();
    assert_eq!(report.schemes, vec![SchemeId::JarV1, SchemeId::BlockV2]);
    assert_eq!(report.verification.v1_entries, 3);

    let signed = fs::read(&output).unwrap();
    assert_eq!(signed.len(), report.output_len);
    ArtifactVerifier::verify(&signed, Some(config.key_chain.certificate()), &ui).unwrap();
    aligner().check(&Archive::parse(&signed).unwrap()).unwrap();
    assert_eq!(read_entry(&signed, "resources.arsc"), b"arsc");

    // A second run must not clobber the first output.
    let err = ArtifactProcessor::process_file(
        &Source::File(input),
        &Destination::File {
            path: output.clone(),
            replace: false,
        },
        &[],
        &aligner(),
        &config,
        &ui,
    )
    .unwrap_err();
    assert!(matches!(err, ApkError::Config(_)));
    assert_eq!(fs::read(&output).unwrap(), signed);
}

#[test]
fn process_applies_replacements_before_signing() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("libextra.so");
    fs::write(&lib, b"\x7fELF patched").unwrap();
    let replacements = vec![EntryReplacement {
        name: "lib/x86_64/libextra.so".into(),
        source: lib,
    }];

    let config = SigningConfig::new(rsa_keys());
    let aligner = Aligner::new(AlignOptions::default().with_page_aligned_libraries()).unwrap();
    let (signed, report) = ArtifactProcessor::process(
        &build_apk(false),
        &replacements,
        &aligner,
        &config,
        &Ui::default(),
    )
    .unwrap();
    assert_eq!(report.replaced, 1);
    assert_eq!(report.verification.v1_entries, 5);

    let archive = Archive::parse(&signed).unwrap();
    let entry = archive.entry("lib/x86_64/libextra.so").unwrap();
    assert!(entry.is_stored());
    assert_eq!(entry.data_offset() % PAGE_ALIGNMENT as u64, 0);
    assert_eq!(read_entry(&signed, "lib/x86_64/libextra.so"), b"\x7fELF patched");
}

#[test]
fn unaligned_input_can_still_be_signed() {
    let config = SigningConfig::new(rsa_keys());
    let input = build_apk(false);
    let (signed, schemes, report) =
        ArtifactProcessor::sign(&input, &config, None, &Ui::default()).unwrap();
    assert_eq!(schemes, report.schemes);
    assert!(aligner().check(&Archive::parse(&signed).unwrap()).is_err());
}

#[test]
fn resigning_keeps_entries_after_old_signature_files_aligned() {
    let input = build_jarsigned_layout_apk();
    let archive = Archive::parse(&input).unwrap();
    assert!(archive.is_signed());
    aligner().check(&archive).unwrap();

    let config = SigningConfig::new(rsa_keys());
    let (signed, _, _) =
        ArtifactProcessor::sign(&input, &config, Some(&aligner()), &Ui::default()).unwrap();
    let resigned = Archive::parse(&signed).unwrap();
    aligner().check(&resigned).unwrap();
    assert_eq!(resigned.entries[0].name, "resources.arsc");
    assert_eq!(
        read_entry(&signed, "resources.arsc"),
        [0x02, 0x00, 0x0c, 0x00, 0x41, 0x42, 0x43]
    );
}

#[test]
fn non_ascii_names_split_by_manifest_wrapping_verify() {
    assert_eq!(WIDE_NAME.find('é'), Some(65));
    let config = SigningConfig::new(rsa_keys());
    let (signed, report) = ArtifactProcessor::process(
        &build_apk_with_wide_name(),
        &[],
        &aligner(),
        &config,
        &Ui::default(),
    )
    .unwrap();
    assert_eq!(report.verification.v1_entries, 2);
    ArtifactVerifier::verify(&signed, None, &Ui::default()).unwrap();
    assert_eq!(read_entry(&signed, WIDE_NAME), b"accented");
}
