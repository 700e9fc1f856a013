/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! JAR manifest (`MANIFEST.MF`) and signature file (`.SF`) text.

use crate::{
    crypto::{CryptoEngine, DigestAlgorithm},
    error::{ApkError, Result},
};
use std::collections::BTreeMap;
use std::ops::Range;

const MAX_LINE_BYTES: usize = 72;

/// Appends `key: value`, wrapped at 72 bytes with single-space continuation lines.
pub fn write_manifest_line(out: &mut Vec<u8>, key: &str, value: &str) {
    let line = format!("{}: {}", key, value).into_bytes();
    let mut cursor = 0;
    let len = line.len();
    while cursor < len {
        let remaining = len - cursor;
        let limit = if cursor == 0 {
            MAX_LINE_BYTES
        } else {
            MAX_LINE_BYTES - 1
        };
        let chunk_size = std::cmp::min(remaining, limit);
        if cursor > 0 {
            out.push(b' ');
        }
        out.extend_from_slice(&line[cursor..cursor + chunk_size]);
        out.extend_from_slice(b"\r\n");
        cursor += chunk_size;
    }
}

/// Manifest section for one entry, terminating blank line included.
pub fn manifest_section(name: &str, alg: DigestAlgorithm, digest: &str) -> Vec<u8> {
    let mut entry = Vec::with_capacity(name.len() + digest.len() + 40);
    write_manifest_line(&mut entry, "Name", name);
    write_manifest_line(&mut entry, alg.manifest_attribute(), digest);
    entry.extend_from_slice(b"\r\n");
    entry
}

pub fn gen_manifest(
    digests: &BTreeMap<String, String>,
    alg: DigestAlgorithm,
    created_by: &str,
) -> Vec<u8> {
    let estimated_size = 64 + digests.len() * 100;
    let mut out = Vec::with_capacity(estimated_size);
    out.extend_from_slice(b"Manifest-Version: 1.0\r\n");
    write_manifest_line(&mut out, "Created-By", created_by);
    out.extend_from_slice(b"\r\n");
    for (name, digest) in digests {
        out.extend(manifest_section(name, alg, digest));
    }
    out
}

/// Signature file covering the whole manifest and each of its sections.
/// `apk_signed_v2` records that a v2 signature accompanies this one, which
/// lets verifiers detect the v2 block being stripped.
pub fn gen_sf(
    manifest_bytes: &[u8],
    digests: &BTreeMap<String, String>,
    alg: DigestAlgorithm,
    created_by: &str,
    apk_signed_v2: bool,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"Signature-Version: 1.0\r\n");
    write_manifest_line(&mut out, "Created-By", created_by);
    let manifest_hash = CryptoEngine::compute_digest(alg, manifest_bytes);
    write_manifest_line(
        &mut out,
        &format!("{}-Manifest", alg.manifest_attribute()),
        &manifest_hash,
    );
    if apk_signed_v2 {
        write_manifest_line(&mut out, "X-Android-APK-Signed", "2");
    }
    out.extend_from_slice(b"\r\n");
    for (name, digest) in digests {
        let section_hash = CryptoEngine::compute_digest(alg, &manifest_section(name, alg, digest));
        write_manifest_line(&mut out, "Name", name);
        write_manifest_line(&mut out, alg.manifest_attribute(), &section_hash);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// One manifest section with its unfolded attributes and raw byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub attributes: Vec<(String, String)>,
    pub range: Range<usize>,
}

impl Section {
    /// Attribute lookup; names are case-insensitive.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Strongest digest attribute named `<alg>-Digest<suffix>`.
    pub fn digest_attribute(&self, suffix: &str) -> Option<(DigestAlgorithm, &str)> {
        [DigestAlgorithm::Sha256, DigestAlgorithm::Sha1]
            .into_iter()
            .find_map(|alg| {
                self.attribute(&format!("{}{}", alg.manifest_attribute(), suffix))
                    .map(|v| (alg, v))
            })
    }
}

#[derive(Debug, Clone)]
pub struct ParsedManifest {
    pub main: Section,
    pub entries: BTreeMap<String, Section>,
}

impl ParsedManifest {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut sections = split_sections(bytes)
            .into_iter()
            .map(|range| parse_section(bytes, range));
        let main = sections
            .next()
            .transpose()?
            .ok_or_else(|| ApkError::Validation("empty manifest".into()))?;

        let mut entries = BTreeMap::new();
        for section in sections {
            let section = section?;
            let name = section
                .attribute("Name")
                .ok_or_else(|| ApkError::Validation("manifest section without a Name".into()))?
                .to_string();
            if entries.insert(name.clone(), section).is_some() {
                return Err(ApkError::Validation(format!(
                    "duplicate manifest section for `{}`",
                    name
                )));
            }
        }
        Ok(Self { main, entries })
    }
}

/// Byte ranges of the blank-line separated sections, each including its
/// terminating blank line when there is one.
fn split_sections(bytes: &[u8]) -> Vec<Range<usize>> {
    let mut sections = Vec::new();
    let mut start = 0;
    let mut pos = 0;
    while pos < bytes.len() {
        let line_end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |i| pos + i + 1);
        let is_blank = bytes[pos..line_end]
            .iter()
            .all(|&b| b == b'\r' || b == b'\n');
        if is_blank {
            if line_end > start && pos > start {
                sections.push(start..line_end);
            }
            start = line_end;
        }
        pos = line_end;
    }
    if start < bytes.len() {
        sections.push(start..bytes.len());
    }
    sections
}

fn parse_section(bytes: &[u8], range: Range<usize>) -> Result<Section> {
    let mut attributes = Vec::new();
    for raw in unfold_lines(&bytes[range.clone()]) {
        if raw.is_empty() {
            continue;
        }
        // Wrapping is byte based, so decode only once the line is whole again.
        let line = String::from_utf8(raw).map_err(|e| {
            ApkError::Validation(format!(
                "manifest line is not UTF-8: `{}`",
                String::from_utf8_lossy(e.as_bytes())
            ))
        })?;
        let (key, value) = line.split_once(": ").ok_or_else(|| {
            ApkError::Validation(format!("malformed manifest line `{}`", line))
        })?;
        attributes.push((key.to_string(), value.to_string()));
    }
    Ok(Section { attributes, range })
}

fn unfold_lines(bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut out: Vec<Vec<u8>> = Vec::new();
    for line in bytes.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if let Some(last) = out.last_mut() {
            if let Some(rest) = line.strip_prefix(b" ") {
                last.extend_from_slice(rest);
                continue;
            }
        }
        out.push(line.to_vec());
    }
    out
}
