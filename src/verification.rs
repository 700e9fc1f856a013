/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2024 Tiash / @MrCarb0n and Earth Inc.
 * Licensed under the MIT License.
 */

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::{
    archive::{is_signature_file, Archive, Entry},
    crypto::{CryptoEngine, DigestAlgorithm},
    error::{ApkError, Result},
    manifest::ParsedManifest,
    pkcs7::SignatureBlock,
    sigblock,
    signing::SchemeId,
    ui::Ui,
    MANIFEST_NAME,
};

/// Outcome of a successful verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub schemes: Vec<SchemeId>,
    /// Signer certificate of the v1 signature
    pub v1_certificate: Option<Vec<u8>>,
    /// Entries covered by the v1 manifest
    pub v1_entries: usize,
    /// Leaf certificate of each v2 signer
    pub v2_certificates: Vec<Vec<u8>>,
}

impl VerificationReport {
    pub fn has_scheme(&self, id: SchemeId) -> bool {
        self.schemes.contains(&id)
    }

    pub fn certificates(&self) -> impl Iterator<Item = &[u8]> {
        self.v1_certificate
            .iter()
            .chain(self.v2_certificates.iter())
            .map(Vec::as_slice)
    }
}

struct V1Outcome {
    certificate: Vec<u8>,
    entries: usize,
    claims_v2: bool,
}

/// Checks the v1 and v2 signatures of signed APKs.
pub struct ArtifactVerifier;

impl ArtifactVerifier {
    /// Verifies every signature present. With `expected_certificate`, each
    /// scheme's signer must also be exactly that certificate.
    pub fn verify(
        bytes: &[u8],
        expected_certificate: Option<&[u8]>,
        ui: &Ui,
    ) -> Result<VerificationReport> {
        let mut report = VerificationReport::default();

        let v2 = sigblock::verify_v2(bytes, ui)?;
        let v1 = Self::verify_v1(bytes, ui)?;

        if let Some(v1) = v1 {
            if v1.claims_v2 && v2.is_none() {
                return Err(ApkError::Validation(
                    "v1 signature declares a v2 signature, but the APK Signing Block is missing"
                        .into(),
                ));
            }
            ui.verbose(&format!("v1 signature verified ({} entries)", v1.entries));
            report.schemes.push(SchemeId::JarV1);
            report.v1_certificate = Some(v1.certificate);
            report.v1_entries = v1.entries;
        }
        if let Some(certificates) = v2 {
            ui.verbose(&format!(
                "v2 signature verified ({} signer(s))",
                certificates.len()
            ));
            report.schemes.push(SchemeId::BlockV2);
            report.v2_certificates = certificates;
        }

        if report.schemes.is_empty() {
            return Err(ApkError::Validation("archive is not signed".into()));
        }

        if let Some(expected) = expected_certificate {
            if report.certificates().any(|cert| cert != expected) {
                return Err(ApkError::Validation(
                    "APK is signed with a different certificate than expected".into(),
                ));
            }
        }

        for cert in report.certificates() {
            ui.debug(&format!(
                "Signer certificate SHA-256: {}",
                SignatureBlock::certificate_fingerprint(cert)
            ));
        }
        Ok(report)
    }

    fn verify_v1(bytes: &[u8], ui: &Ui) -> Result<Option<V1Outcome>> {
        // Names come from the same decoding the signer used to write the manifest.
        let archive = Archive::parse(bytes)?;

        let sf_entries: Vec<&Entry> = archive
            .entries
            .iter()
            .filter(|e| is_signature_file(&e.name) && e.name.to_ascii_uppercase().ends_with(".SF"))
            .collect();
        let sf_entry = match sf_entries.as_slice() {
            [] => return Ok(None),
            [entry] => *entry,
            _ => {
                return Err(ApkError::Validation(format!(
                    "multiple v1 signers ({}) are not supported",
                    sf_entries.len()
                )))
            }
        };
        let sf_name = sf_entry.name.as_str();

        let base = &sf_name[..sf_name.len() - 3];
        let block_entry = archive
            .entries
            .iter()
            .find(|e| {
                [".RSA", ".EC", ".DSA"]
                    .iter()
                    .any(|ext| e.name.eq_ignore_ascii_case(&format!("{}{}", base, ext)))
            })
            .ok_or_else(|| {
                ApkError::Validation(format!("no signature block file for {}", sf_name))
            })?;

        let sf_bytes = sf_entry.read_content()?;
        let block_bytes = block_entry.read_content()?;
        let manifest_bytes = archive
            .entry(MANIFEST_NAME)
            .ok_or_else(|| ApkError::Validation(format!("{} is missing", MANIFEST_NAME)))?
            .read_content()?;

        let certificate = SignatureBlock::parse(&block_bytes)?.verify(&sf_bytes)?;
        ui.very_verbose(&format!("{} verifies against {}", block_entry.name, sf_name));

        let sf = ParsedManifest::parse(&sf_bytes)?;
        let manifest = ParsedManifest::parse(&manifest_bytes)?;

        match sf.main.digest_attribute("-Manifest") {
            Some((alg, expected)) => {
                if CryptoEngine::compute_digest(alg, &manifest_bytes) != expected {
                    return Err(ApkError::Validation(format!(
                        "{} digest in {} does not match",
                        MANIFEST_NAME, sf_name
                    )));
                }
            }
            // Without the whole-manifest digest every section must be vouched for.
            None => {
                if let Some(name) = manifest.entries.keys().find(|n| !sf.entries.contains_key(*n)) {
                    return Err(ApkError::Validation(format!(
                        "{} has no manifest digest and does not cover `{}`",
                        sf_name, name
                    )));
                }
            }
        }
        for (name, section) in &sf.entries {
            let manifest_section = manifest.entries.get(name).ok_or_else(|| {
                ApkError::Validation(format!("{} names `{}`, absent from the manifest", sf_name, name))
            })?;
            let (alg, expected) = section.digest_attribute("").ok_or_else(|| {
                ApkError::Validation(format!("{} section `{}` has no digest", sf_name, name))
            })?;
            let raw = &manifest_bytes[manifest_section.range.clone()];
            if CryptoEngine::compute_digest(alg, raw) != expected {
                return Err(ApkError::Validation(format!(
                    "{} digest mismatch for manifest section `{}`",
                    sf_name, name
                )));
            }
        }

        let mut expected_digests: BTreeMap<&str, (DigestAlgorithm, &str)> = BTreeMap::new();
        for (name, section) in &manifest.entries {
            let digest = section.digest_attribute("").ok_or_else(|| {
                ApkError::Validation(format!("manifest section `{}` has no digest", name))
            })?;
            expected_digests.insert(name.as_str(), digest);
        }

        let signed_entries: Vec<&Entry> = archive
            .entries
            .iter()
            .filter(|e| !e.is_directory() && !is_signature_file(&e.name))
            .collect();
        for entry in &signed_entries {
            if !expected_digests.contains_key(entry.name.as_str()) {
                return Err(ApkError::Validation(format!(
                    "entry `{}` is not covered by the v1 signature",
                    entry.name
                )));
            }
        }
        for name in expected_digests.keys() {
            if archive.entry(name).is_none() {
                return Err(ApkError::Validation(format!(
                    "manifest references missing entry `{}`",
                    name
                )));
            }
        }

        signed_entries
            .par_iter()
            .map(|entry| {
                let (alg, expected) = expected_digests[entry.name.as_str()];
                let content = entry.read_content()?;
                let actual = CryptoEngine::compute_stream_digest(
                    alg,
                    &mut content.as_slice(),
                    Some(ui),
                    Some(entry.name.as_str()),
                )?;
                if actual != expected {
                    return Err(ApkError::Validation(format!(
                        "manifest digest mismatch for `{}`",
                        entry.name
                    )));
                }
                Ok(())
            })
            .collect::<Result<Vec<()>>>()?;

        let claims_v2 = sf
            .main
            .attribute("X-Android-APK-Signed")
            .is_some_and(|v| v.split(',').any(|id| id.trim() == "2"));

        Ok(Some(V1Outcome {
            certificate,
            entries: signed_entries.len(),
            claims_v2,
        }))
    }
}
