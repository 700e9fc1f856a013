/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! v1 (JAR) signature: manifest, signature file and PKCS#7 block, appended
//! to the archive as ordinary deflated entries.

use crate::{
    archive::{is_signature_file, Archive, Entry},
    crypto::{CryptoEngine, DigestAlgorithm},
    error::{ApkError, Result},
    manifest::{gen_manifest, gen_sf},
    pkcs7::{block_extension, gen_signature_block},
    signing::SigningConfig,
    ui::Ui,
    MANIFEST_NAME,
};
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};
use zip::DateTime;

/// The three generated files of a v1 signature.
#[derive(Debug, Clone)]
pub struct JarSignature {
    pub manifest: Vec<u8>,
    pub signature_file: Vec<u8>,
    pub signature_block: Vec<u8>,
    pub sf_name: String,
    pub block_name: String,
}

/// Digest of every non-directory entry other than the signature files,
/// keyed by entry name. Entries are inflated and digested in parallel.
pub fn compute_entry_digests(
    archive: &Archive,
    alg: DigestAlgorithm,
    ui: &Ui,
) -> Result<BTreeMap<String, String>> {
    let targets: Vec<&Entry> = archive
        .entries
        .iter()
        .filter(|e| !e.is_directory() && !is_signature_file(&e.name))
        .collect();

    if ui.verbose {
        ui.show_progress_bar(targets.len() as u64, "Digesting entries");
    }
    let done = AtomicU64::new(0);
    let results: Result<Vec<(String, String)>> = targets
        .par_iter()
        .map(|entry| {
            let content = entry.read_content()?;
            let digest = CryptoEngine::compute_stream_digest(
                alg,
                &mut content.as_slice(),
                Some(ui),
                Some(entry.name.as_str()),
            )?;
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            if ui.verbose && ui.has_progress_bar() {
                ui.update_progress(n);
            }
            Ok((entry.name.clone(), digest))
        })
        .collect();
    if ui.verbose && ui.has_progress_bar() {
        ui.finish_progress();
    }

    let mut digests = BTreeMap::new();
    for (name, digest) in results? {
        if digests.insert(name.clone(), digest).is_some() {
            return Err(ApkError::malformed(format!(
                "duplicate entry `{}` cannot be signed",
                name
            )));
        }
    }
    Ok(digests)
}

/// Builds the v1 signature files for `archive`.
pub fn sign(archive: &Archive, config: &SigningConfig, ui: &Ui) -> Result<JarSignature> {
    let digests = compute_entry_digests(archive, config.v1_digest, ui)?;
    ui.verbose(&format!(
        "Computed {} digests for {} entries",
        config.v1_digest,
        digests.len()
    ));

    let manifest = gen_manifest(&digests, config.v1_digest, &config.created_by);
    let signature_file = gen_sf(
        &manifest,
        &digests,
        config.v1_digest,
        &config.created_by,
        config.v2,
    );
    let signature_block = gen_signature_block(&config.key_chain, &signature_file)?;

    Ok(JarSignature {
        manifest,
        signature_file,
        signature_block,
        sf_name: format!("META-INF/{}.SF", config.signer_name),
        block_name: format!(
            "META-INF/{}.{}",
            config.signer_name,
            block_extension(&config.key_chain.signing_key)
        ),
    })
}

/// Appends the signature files after the existing entries, so no existing
/// entry moves.
pub fn append(archive: &mut Archive, signature: &JarSignature, timestamp: DateTime) -> Result<()> {
    archive
        .entries
        .push(Entry::new_deflated(MANIFEST_NAME, &signature.manifest, timestamp)?);
    archive.entries.push(Entry::new_deflated(
        &signature.sf_name,
        &signature.signature_file,
        timestamp,
    )?);
    archive.entries.push(Entry::new_deflated(
        &signature.block_name,
        &signature.signature_block,
        timestamp,
    )?);
    archive.refresh_offsets();
    Ok(())
}
