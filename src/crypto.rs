/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

use crate::{
    error::{ApkError, Result},
    ui::Ui,
    BUFFER_SIZE,
};
use base64::{engine::general_purpose::STANDARD as base64_engine, Engine};
use ring::digest;
use std::{fmt, io::Read, str::FromStr};

/// v2 content digests hash the archive in chunks of this size.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Digest used for v1 (JAR) manifest and signature-file entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    Sha1,
    #[default]
    Sha256,
}

impl DigestAlgorithm {
    pub fn ring_algorithm(&self) -> &'static digest::Algorithm {
        match self {
            DigestAlgorithm::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            DigestAlgorithm::Sha256 => &digest::SHA256,
        }
    }

    /// Attribute name used in MANIFEST.MF sections, e.g. `SHA-256-Digest`.
    pub fn manifest_attribute(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA1-Digest",
            DigestAlgorithm::Sha256 => "SHA-256-Digest",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha1 => write!(f, "SHA-1"),
            DigestAlgorithm::Sha256 => write!(f, "SHA-256"),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = ApkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(DigestAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            other => Err(ApkError::Config(format!(
                "unknown digest algorithm `{}` (expected sha1 or sha256)",
                other
            ))),
        }
    }
}

pub struct CryptoEngine;

impl CryptoEngine {
    pub fn compute_digest(alg: DigestAlgorithm, data: &[u8]) -> String {
        base64_engine.encode(digest::digest(alg.ring_algorithm(), data).as_ref())
    }

    pub fn sha256(data: &[u8]) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(digest::digest(&digest::SHA256, data).as_ref());
        out
    }

    pub fn compute_stream_digest<R: Read>(
        alg: DigestAlgorithm,
        reader: &mut R,
        ui: Option<&Ui>,
        file_path: Option<&str>,
    ) -> Result<String> {
        let mut ctx = digest::Context::new(alg.ring_algorithm());

        if let (Some(ui), Some(path)) = (ui, file_path) {
            ui.very_verbose(&format!("{}: {}", alg, path));
        }

        let mut buf = vec![0u8; BUFFER_SIZE];
        let mut processed = 0u64;
        loop {
            let count = reader.read(&mut buf)?;
            if count == 0 {
                break;
            }
            ctx.update(&buf[..count]);
            processed += count as u64;
        }

        if let Some(ui) = ui {
            ui.debug(&format!("{} complete: {} bytes", alg, processed));
        }

        Ok(base64_engine.encode(ctx.finish().as_ref()))
    }

    /// Chunked SHA-256 over the given sections: each chunk is hashed as
    /// `0xa5 || len || data`, the root as `0x5a || count || chunk digests`.
    pub fn chunked_sha256(sections: &[&[u8]]) -> [u8; 32] {
        let mut chunks: Vec<[u8; 32]> = Vec::new();
        for section in sections {
            for chunk in section.chunks(MAX_CHUNK_SIZE) {
                let mut ctx = digest::Context::new(&digest::SHA256);
                ctx.update(&[0xa5]);
                ctx.update(&(chunk.len() as u32).to_le_bytes());
                ctx.update(chunk);
                let mut out = [0u8; 32];
                out.copy_from_slice(ctx.finish().as_ref());
                chunks.push(out);
            }
        }

        let mut root = digest::Context::new(&digest::SHA256);
        root.update(&[0x5a]);
        root.update(&(chunks.len() as u32).to_le_bytes());
        for chunk in &chunks {
            root.update(chunk);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(root.finish().as_ref());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_digests() {
        assert_eq!(
            CryptoEngine::compute_digest(DigestAlgorithm::Sha1, b"abc"),
            "qZk+NkcGgWq6PiVxeFDCbJzQ2J0="
        );
        assert_eq!(
            CryptoEngine::compute_digest(DigestAlgorithm::Sha256, b"abc"),
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
    }

    #[test]
    fn stream_digest_matches_one_shot() {
        let data = vec![42u8; BUFFER_SIZE * 3 + 17];
        let streamed = CryptoEngine::compute_stream_digest(
            DigestAlgorithm::Sha256,
            &mut &data[..],
            None,
            None,
        )
        .unwrap();
        assert_eq!(
            streamed,
            CryptoEngine::compute_digest(DigestAlgorithm::Sha256, &data)
        );
    }

    #[test]
    fn chunked_digest_splits_on_chunk_size() {
        let big = vec![1u8; MAX_CHUNK_SIZE + 10];
        let (head, tail) = big.split_at(MAX_CHUNK_SIZE);

        let mut manual = digest::Context::new(&digest::SHA256);
        manual.update(&[0x5a]);
        manual.update(&2u32.to_le_bytes());
        for chunk in [head, tail] {
            let mut ctx = digest::Context::new(&digest::SHA256);
            ctx.update(&[0xa5]);
            ctx.update(&(chunk.len() as u32).to_le_bytes());
            ctx.update(chunk);
            manual.update(ctx.finish().as_ref());
        }
        let empty: &[u8] = &[];
        assert_eq!(
            CryptoEngine::chunked_sha256(&[big.as_slice(), empty]).to_vec(),
            manual.finish().as_ref().to_vec()
        );
    }

    #[test]
    fn digest_names_parse() {
        assert_eq!("SHA1".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha1);
        assert_eq!(
            "sha-256".parse::<DigestAlgorithm>().unwrap(),
            DigestAlgorithm::Sha256
        );
        assert!("md5".parse::<DigestAlgorithm>().is_err());
    }
}
