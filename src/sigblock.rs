/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! APK Signing Block and the v2 signature scheme stored inside it.
//!
//! Block layout: `u64 size`, a sequence of `u64 len, u32 id, value` pairs,
//! `u64 size` again and the 16 byte magic. Both size fields count every
//! byte after the leading one.

use crate::{
    archive::{ZipSections, EOCD_CD_OFFSET_FIELD},
    crypto::CryptoEngine,
    error::{ApkError, Result},
    keys::{KeyChain, SigningKey},
    ui::Ui,
};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use ring::signature;
use std::io::{self, Write};
use x509_parser::prelude::*;

pub const APK_SIGNING_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";
pub const APK_SIGNATURE_SCHEME_V2_BLOCK_ID: u32 = 0x7109871a;
pub const RSA_PKCS1V15_SHA2_256: u32 = 0x0103;
pub const ECDSA_SHA2_256: u32 = 0x0201;

pub fn algorithm_id(key: &SigningKey) -> u32 {
    match key {
        SigningKey::Rsa(_) => RSA_PKCS1V15_SHA2_256,
        SigningKey::Ecdsa(_) => ECDSA_SHA2_256,
    }
}

fn verification_algorithm(id: u32) -> Option<&'static dyn signature::VerificationAlgorithm> {
    match id {
        RSA_PKCS1V15_SHA2_256 => Some(&signature::RSA_PKCS1_2048_8192_SHA256),
        ECDSA_SHA2_256 => Some(&signature::ECDSA_P256_SHA256_ASN1),
        _ => None,
    }
}

/// Chunked digest over entries, central directory and EOCD, the last with
/// its central directory offset pointing at the signing block start.
pub fn content_digest(bytes: &[u8], sections: &ZipSections) -> Result<[u8; 32]> {
    let entries = &bytes[..sections.sb_start as usize];
    let cd = &bytes[sections.cd_start as usize..sections.cde_start as usize];
    let mut eocd = bytes[sections.cde_start as usize..].to_vec();
    let sb_start = u32::try_from(sections.sb_start)
        .map_err(|_| ApkError::malformed("archive exceeds zip32 size limits"))?;
    LittleEndian::write_u32(&mut eocd[EOCD_CD_OFFSET_FIELD..], sb_start);
    Ok(CryptoEngine::chunked_sha256(&[entries, cd, &eocd]))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Digest {
    algorithm: u32,
    digest: Vec<u8>,
}

impl Digest {
    fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.digest.len() as u32 + 8)?;
        w.write_u32::<LittleEndian>(self.algorithm)?;
        w.write_u32::<LittleEndian>(self.digest.len() as u32)?;
        w.write_all(&self.digest)
    }

    fn read(mut r: &[u8]) -> io::Result<Self> {
        let algorithm = r.read_u32::<LittleEndian>()?;
        let digest = take_prefixed(&mut r)?.to_vec();
        Ok(Self { algorithm, digest })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SignedData {
    digests: Vec<Digest>,
    certificates: Vec<Vec<u8>>,
    additional_attributes: Vec<(u32, Vec<u8>)>,
}

impl SignedData {
    fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u32::<LittleEndian>(
            self.digests.iter().map(|d| d.digest.len() as u32 + 12).sum(),
        )?;
        for digest in &self.digests {
            digest.write(w)?;
        }
        w.write_u32::<LittleEndian>(self.certificates.iter().map(|c| c.len() as u32 + 4).sum())?;
        for cert in &self.certificates {
            w.write_u32::<LittleEndian>(cert.len() as u32)?;
            w.write_all(cert)?;
        }
        w.write_u32::<LittleEndian>(
            self.additional_attributes
                .iter()
                .map(|(_, v)| v.len() as u32 + 8)
                .sum(),
        )?;
        for (id, value) in &self.additional_attributes {
            w.write_u32::<LittleEndian>(value.len() as u32 + 4)?;
            w.write_u32::<LittleEndian>(*id)?;
            w.write_all(value)?;
        }
        Ok(())
    }

    fn read(mut r: &[u8]) -> io::Result<Self> {
        let mut signed_data = SignedData::default();

        let mut digests = take_prefixed(&mut r)?;
        while !digests.is_empty() {
            signed_data
                .digests
                .push(Digest::read(take_prefixed(&mut digests)?)?);
        }

        let mut certificates = take_prefixed(&mut r)?;
        while !certificates.is_empty() {
            signed_data
                .certificates
                .push(take_prefixed(&mut certificates)?.to_vec());
        }

        let mut attributes = take_prefixed(&mut r)?;
        while !attributes.is_empty() {
            let mut attribute = take_prefixed(&mut attributes)?;
            let id = attribute.read_u32::<LittleEndian>()?;
            signed_data
                .additional_attributes
                .push((id, attribute.to_vec()));
        }
        Ok(signed_data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ApkSignature {
    algorithm: u32,
    signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ApkSigner {
    signed_data: Vec<u8>,
    signatures: Vec<ApkSignature>,
    /// SubjectPublicKeyInfo DER
    public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ApkSignatureBlockV2 {
    signers: Vec<ApkSigner>,
}

impl ApkSignatureBlockV2 {
    fn new(digest: [u8; 32], keys: &KeyChain) -> Result<Self> {
        let algorithm = algorithm_id(&keys.signing_key);
        let mut signed_data = vec![];
        SignedData {
            digests: vec![Digest {
                algorithm,
                digest: digest.to_vec(),
            }],
            certificates: keys.certificates().to_vec(),
            additional_attributes: vec![],
        }
        .write(&mut signed_data)?;
        let signature = keys.signing_key.sign(&signed_data)?;

        let (_, cert) = X509Certificate::from_der(keys.certificate())
            .map_err(|e| ApkError::InvalidKey(format!("invalid certificate: {}", e)))?;
        let public_key = cert.public_key().raw.to_vec();

        Ok(Self {
            signers: vec![ApkSigner {
                signed_data,
                signatures: vec![ApkSignature {
                    algorithm,
                    signature,
                }],
                public_key,
            }],
        })
    }

    fn read(mut r: &[u8]) -> io::Result<Self> {
        let mut signers_buf = take_prefixed(&mut r)?;
        let mut signers = vec![];
        while !signers_buf.is_empty() {
            let mut signer = take_prefixed(&mut signers_buf)?;
            let signed_data = take_prefixed(&mut signer)?.to_vec();

            let mut signatures_buf = take_prefixed(&mut signer)?;
            let mut signatures = vec![];
            while !signatures_buf.is_empty() {
                let mut sig = take_prefixed(&mut signatures_buf)?;
                let algorithm = sig.read_u32::<LittleEndian>()?;
                let signature = take_prefixed(&mut sig)?.to_vec();
                signatures.push(ApkSignature {
                    algorithm,
                    signature,
                });
            }

            let public_key = take_prefixed(&mut signer)?.to_vec();
            signers.push(ApkSigner {
                signed_data,
                signatures,
                public_key,
            });
        }
        Ok(Self { signers })
    }

    fn write(&self, w: &mut impl Write) -> io::Result<()> {
        let mut buffer = vec![];
        for signer in &self.signers {
            let mut signer_buffer = vec![];
            signer_buffer.write_u32::<LittleEndian>(signer.signed_data.len() as u32)?;
            signer_buffer.write_all(&signer.signed_data)?;
            let mut sig_buffer = vec![];
            for sig in &signer.signatures {
                sig_buffer.write_u32::<LittleEndian>(sig.signature.len() as u32 + 8)?;
                sig_buffer.write_u32::<LittleEndian>(sig.algorithm)?;
                sig_buffer.write_u32::<LittleEndian>(sig.signature.len() as u32)?;
                sig_buffer.write_all(&sig.signature)?;
            }
            signer_buffer.write_u32::<LittleEndian>(sig_buffer.len() as u32)?;
            signer_buffer.write_all(&sig_buffer)?;
            signer_buffer.write_u32::<LittleEndian>(signer.public_key.len() as u32)?;
            signer_buffer.write_all(&signer.public_key)?;
            buffer.write_u32::<LittleEndian>(signer_buffer.len() as u32)?;
            buffer.write_all(&signer_buffer)?;
        }
        w.write_u32::<LittleEndian>(buffer.len() as u32)?;
        w.write_all(&buffer)
    }
}

/// Splits a `u32` length-prefixed field off the front of `buf`.
fn take_prefixed<'a>(buf: &mut &'a [u8]) -> io::Result<&'a [u8]> {
    let len = buf.read_u32::<LittleEndian>()? as usize;
    if len > buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("field of {} bytes overruns its container", len),
        ));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn malformed_v2(e: io::Error) -> ApkError {
    ApkError::Validation(format!("malformed v2 signature block: {}", e))
}

/// Wraps `pairs` (id, value) into a complete signing block.
pub fn write_apk_signing_block(pairs: &[(u32, &[u8])]) -> Result<Vec<u8>> {
    let pairs_len: u64 = pairs.iter().map(|(_, v)| v.len() as u64 + 12).sum();
    let size = pairs_len + 24;
    let mut w = Vec::with_capacity(size as usize + 8);
    w.write_u64::<LittleEndian>(size)?;
    for (id, value) in pairs {
        w.write_u64::<LittleEndian>(value.len() as u64 + 4)?;
        w.write_u32::<LittleEndian>(*id)?;
        w.write_all(value)?;
    }
    w.write_u64::<LittleEndian>(size)?;
    w.write_all(APK_SIGNING_BLOCK_MAGIC)?;
    Ok(w)
}

/// Id/value pairs of a raw signing block.
pub fn parse_apk_signing_block(block: &[u8]) -> Result<Vec<(u32, &[u8])>> {
    if block.len() < 32 || &block[block.len() - 16..] != APK_SIGNING_BLOCK_MAGIC {
        return Err(ApkError::malformed("APK Signing Block magic missing"));
    }
    let mut pairs_buf = &block[8..block.len() - 24];
    let mut pairs = Vec::new();
    while !pairs_buf.is_empty() {
        let len = pairs_buf.read_u64::<LittleEndian>().map_err(|_| {
            ApkError::malformed("APK Signing Block pair header truncated")
        })?;
        if len < 4 || len > pairs_buf.len() as u64 {
            return Err(ApkError::malformed(format!(
                "APK Signing Block pair length {} out of range",
                len
            )));
        }
        let (pair, rest) = pairs_buf.split_at(len as usize);
        pairs.push((LittleEndian::read_u32(pair), &pair[4..]));
        pairs_buf = rest;
    }
    Ok(pairs)
}

/// Builds the signing block carrying a v2 signature over `unsigned`, an
/// archive serialised without any signing block.
pub fn sign_v2(unsigned: &[u8], keys: &KeyChain, ui: &Ui) -> Result<Vec<u8>> {
    let sections = ZipSections::locate(unsigned)?;
    if sections.has_signing_block() {
        return Err(ApkError::AlreadySignedConflict(
            "archive already carries an APK Signing Block".into(),
        ));
    }
    let digest = content_digest(unsigned, &sections)?;
    ui.debug(&format!(
        "v2 content digest: {}",
        digest.iter().map(|b| format!("{:02x}", b)).collect::<String>()
    ));

    let mut v2 = vec![];
    ApkSignatureBlockV2::new(digest, keys)?.write(&mut v2)?;
    write_apk_signing_block(&[(APK_SIGNATURE_SCHEME_V2_BLOCK_ID, &v2[..])])
}

/// Verifies the v2 scheme. Returns the leaf certificate of every signer,
/// or `None` when the archive carries no v2 signature.
pub fn verify_v2(bytes: &[u8], ui: &Ui) -> Result<Option<Vec<Vec<u8>>>> {
    let sections = ZipSections::locate(bytes)?;
    if !sections.has_signing_block() {
        return Ok(None);
    }
    let block = &bytes[sections.sb_start as usize..sections.cd_start as usize];
    let mut v2 = None;
    for (id, value) in parse_apk_signing_block(block)? {
        match id {
            APK_SIGNATURE_SCHEME_V2_BLOCK_ID => v2 = Some(value),
            id => ui.debug(&format!("Ignoring signing block pair {:#x}", id)),
        }
    }
    let Some(v2) = v2 else {
        return Ok(None);
    };

    let block = ApkSignatureBlockV2::read(v2).map_err(malformed_v2)?;
    if block.signers.is_empty() {
        return Err(ApkError::Validation("v2 block has no signers".into()));
    }
    let digest = content_digest(bytes, &sections)?;

    let mut certificates = Vec::new();
    for (index, signer) in block.signers.iter().enumerate() {
        certificates.push(verify_signer(signer, &digest, ui).map_err(|e| match e {
            ApkError::Validation(msg) => {
                ApkError::Validation(format!("v2 signer #{}: {}", index + 1, msg))
            }
            other => other,
        })?);
    }
    Ok(Some(certificates))
}

fn verify_signer(signer: &ApkSigner, content_digest: &[u8; 32], ui: &Ui) -> Result<Vec<u8>> {
    let (_, spki) = SubjectPublicKeyInfo::from_der(&signer.public_key)
        .map_err(|e| ApkError::Validation(format!("invalid public key: {}", e)))?;
    let key_bits: &[u8] = spki.subject_public_key.data.as_ref();

    let mut verified = Vec::new();
    for sig in &signer.signatures {
        let Some(algorithm) = verification_algorithm(sig.algorithm) else {
            ui.debug(&format!(
                "Skipping unsupported v2 signature algorithm {:#06x}",
                sig.algorithm
            ));
            continue;
        };
        signature::UnparsedPublicKey::new(algorithm, key_bits)
            .verify(&signer.signed_data, &sig.signature)
            .map_err(|_| {
                ApkError::Validation(format!(
                    "signature ({:#06x}) over signed data does not verify",
                    sig.algorithm
                ))
            })?;
        verified.push(sig.algorithm);
    }
    if verified.is_empty() {
        return Err(ApkError::Validation(
            "no signature with a supported algorithm".into(),
        ));
    }

    let signed_data = SignedData::read(&signer.signed_data).map_err(malformed_v2)?;
    let signature_algs: Vec<u32> = signer.signatures.iter().map(|s| s.algorithm).collect();
    let digest_algs: Vec<u32> = signed_data.digests.iter().map(|d| d.algorithm).collect();
    if signature_algs != digest_algs {
        return Err(ApkError::Validation(
            "signature and digest algorithm lists differ".into(),
        ));
    }
    for digest in &signed_data.digests {
        if verified.contains(&digest.algorithm) && digest.digest != content_digest {
            return Err(ApkError::Validation(
                "content digest mismatch; the archive was modified after signing".into(),
            ));
        }
    }

    let leaf = signed_data
        .certificates
        .first()
        .ok_or_else(|| ApkError::Validation("no certificates".into()))?;
    let (_, cert) = X509Certificate::from_der(leaf)
        .map_err(|e| ApkError::Validation(format!("invalid certificate: {}", e)))?;
    if cert.public_key().raw != signer.public_key.as_slice() {
        return Err(ApkError::Validation(
            "public key does not match the first certificate".into(),
        ));
    }
    Ok(leaf.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Archive, Entry};
    use std::path::Path;
    use zip::DateTime;

    fn keys(key: &str, cert: &str) -> KeyChain {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        KeyChain::from_files(&dir.join(key), &dir.join(cert), &Ui::default()).unwrap()
    }

    fn unsigned() -> Archive {
        let mut archive = Archive::default();
        archive.entries.push(
            Entry::new_deflated("AndroidManifest.xml", b"<manifest/>", DateTime::default())
                .unwrap(),
        );
        archive.entries.push(Entry::new_stored("resources.arsc", &[3u8; 64]));
        archive.refresh_offsets();
        archive
    }

    fn signed(keys: &KeyChain) -> Vec<u8> {
        let mut archive = unsigned();
        let bytes = archive.to_bytes().unwrap();
        archive.signing_block = Some(sign_v2(&bytes, keys, &Ui::default()).unwrap());
        archive.to_bytes().unwrap()
    }

    #[test]
    fn block_framing_round_trips() {
        let block = write_apk_signing_block(&[(1, &b"abc"[..]), (2, &b""[..])]).unwrap();
        assert_eq!(&block[block.len() - 16..], APK_SIGNING_BLOCK_MAGIC);
        let size = LittleEndian::read_u64(&block);
        assert_eq!(size as usize, block.len() - 8);
        assert_eq!(LittleEndian::read_u64(&block[block.len() - 24..]), size);
        assert_eq!(
            parse_apk_signing_block(&block).unwrap(),
            vec![(1, &b"abc"[..]), (2, &b""[..])]
        );
    }

    #[test]
    fn rsa_and_ec_signatures_verify() {
        for (key, cert) in [("test_key.pem", "test_cert.pem"), ("ec_key.pem", "ec_cert.pem")] {
            let keys = keys(key, cert);
            let bytes = signed(&keys);
            let certs = verify_v2(&bytes, &Ui::default()).unwrap().unwrap();
            assert_eq!(certs, vec![keys.certificate().to_vec()]);
        }
    }

    #[test]
    fn signed_archive_still_parses() {
        let keys = keys("test_key.pem", "test_cert.pem");
        let bytes = signed(&keys);
        let parsed = Archive::parse(&bytes).unwrap();
        assert!(parsed.signing_block.is_some());
        assert_eq!(parsed.entries, unsigned().entries);
    }

    #[test]
    fn modified_entry_data_is_detected() {
        let keys = keys("test_key.pem", "test_cert.pem");
        let mut bytes = signed(&keys);
        let stored = unsigned().entries[1].data_offset() as usize;
        bytes[stored] ^= 0xff;
        let err = verify_v2(&bytes, &Ui::default()).unwrap_err();
        assert!(matches!(err, ApkError::Validation(_)));
    }

    #[test]
    fn unsigned_archive_has_no_v2() {
        let bytes = unsigned().to_bytes().unwrap();
        assert!(verify_v2(&bytes, &Ui::default()).unwrap().is_none());
    }

    #[test]
    fn truncated_v2_value_is_rejected() {
        let mut archive = unsigned();
        let truncated: &[u8] = &[9, 0, 0, 0];
        archive.signing_block = Some(
            write_apk_signing_block(&[(APK_SIGNATURE_SCHEME_V2_BLOCK_ID, truncated)]).unwrap(),
        );
        let bytes = archive.to_bytes().unwrap();
        assert!(matches!(
            verify_v2(&bytes, &Ui::default()),
            Err(ApkError::Validation(_))
        ));
    }

    #[test]
    fn resigning_rsa_is_deterministic() {
        let keys = keys("test_key.pem", "test_cert.pem");
        assert_eq!(signed(&keys), signed(&keys));
    }
}
