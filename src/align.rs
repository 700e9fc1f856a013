/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! zipalign-compatible placement of stored entries.
//!
//! Padding goes into the local extra field as an alignment record
//! (`0xD935`, u16 boundary followed by zero bytes). Earlier alignment
//! records and zero padding are dropped before new padding is computed.
//! Entries whose data already sits on the boundary are left untouched, so
//! aligning an aligned archive is a no-op.

use crate::{
    archive::{is_signature_file, Archive, Entry},
    error::{ApkError, Result},
};
use byteorder::{ByteOrder, LittleEndian};

pub const DEFAULT_ALIGNMENT: u32 = 4;
/// Boundary for uncompressed native libraries so they can be mmapped.
pub const PAGE_ALIGNMENT: u32 = 16384;
pub const MAX_ALIGNMENT: u32 = 32768;

const ALIGNMENT_EXTRA_ID: u16 = 0xD935;
/// id + size + alignment value
const ALIGNMENT_RECORD_HEADER: u64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignOptions {
    pub alignment: u32,
    /// Boundary for stored `lib/**.so` entries, when enabled
    pub page_align_libraries: Option<u32>,
}

impl Default for AlignOptions {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            page_align_libraries: None,
        }
    }
}

impl AlignOptions {
    pub fn with_alignment(mut self, alignment: u32) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_page_aligned_libraries(mut self) -> Self {
        self.page_align_libraries = Some(PAGE_ALIGNMENT);
        self
    }
}

fn validate_boundary(value: u32) -> Result<()> {
    if value == 0 || !value.is_power_of_two() || value > MAX_ALIGNMENT {
        return Err(ApkError::Config(format!(
            "alignment must be a power of two between 1 and {}, got {}",
            MAX_ALIGNMENT, value
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Aligner {
    options: AlignOptions,
}

impl Aligner {
    pub fn new(options: AlignOptions) -> Result<Self> {
        validate_boundary(options.alignment)?;
        if let Some(page) = options.page_align_libraries {
            validate_boundary(page)?;
        }
        Ok(Self { options })
    }

    /// Boundary the entry's data must start on, `None` for compressed entries.
    pub fn boundary_for(&self, entry: &Entry) -> Option<u32> {
        if !entry.is_stored() {
            return None;
        }
        match self.options.page_align_libraries {
            Some(page) if is_native_library(&entry.name) => Some(page),
            _ => Some(self.options.alignment),
        }
    }

    /// Returns a new archive in which every stored entry's data starts on its boundary.
    pub fn align(&self, archive: &Archive) -> Result<Archive> {
        if archive.is_signed() {
            return Err(ApkError::AlreadySignedConflict(
                "archive already carries a signature; padding entries would invalidate it. \
                 Align before signing."
                    .into(),
            ));
        }

        let boundaries: Vec<Option<u32>> =
            archive.entries.iter().map(|e| self.boundary_for(e)).collect();
        lay_out(archive, &boundaries)
    }

    /// Fails on the first stored entry whose data is off its boundary.
    pub fn check(&self, archive: &Archive) -> Result<()> {
        for entry in &archive.entries {
            if let Some(boundary) = self.boundary_for(entry) {
                let offset = entry.data_offset();
                if offset % boundary as u64 != 0 {
                    return Err(ApkError::alignment(
                        &entry.name,
                        offset,
                        format!("data is not aligned to a {}-byte boundary", boundary),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Drops the v1 signature files and the signing block. Stored entries that
/// sat on a boundary before keep it, even when removed files preceded them.
pub fn strip_signatures(archive: &Archive) -> Result<Archive> {
    let kept: Vec<&Entry> = archive
        .entries
        .iter()
        .filter(|e| !is_signature_file(&e.name))
        .collect();
    let boundaries: Vec<Option<u32>> = kept.iter().map(|e| held_boundary(e)).collect();
    let stripped = Archive {
        entries: kept.into_iter().cloned().collect(),
        comment: archive.comment.clone(),
        signing_block: None,
    };
    lay_out(&stripped, &boundaries)
}

/// Boundary a stored entry currently satisfies: a page for native
/// libraries already page aligned, otherwise the default one.
fn held_boundary(entry: &Entry) -> Option<u32> {
    if !entry.is_stored() {
        return None;
    }
    let offset = entry.data_offset();
    let page = is_native_library(&entry.name) && offset % PAGE_ALIGNMENT as u64 == 0;
    if page {
        Some(PAGE_ALIGNMENT)
    } else if offset % DEFAULT_ALIGNMENT as u64 == 0 {
        Some(DEFAULT_ALIGNMENT)
    } else {
        None
    }
}

/// Lays `archive` out back to back from offset zero, padding entry `i` onto
/// `boundaries[i]` when it has one.
fn lay_out(archive: &Archive, boundaries: &[Option<u32>]) -> Result<Archive> {
    let mut out = Archive {
        entries: Vec::with_capacity(archive.entries.len()),
        comment: archive.comment.clone(),
        signing_block: archive.signing_block.clone(),
    };
    let mut offset = 0u64;
    for (source, boundary) in archive.entries.iter().zip(boundaries) {
        let mut entry = source.clone();
        entry.header_offset = offset;
        if let Some(boundary) = *boundary {
            if entry.data_offset() % boundary as u64 != 0 {
                entry.local_extra = padded_extra(&entry, boundary)?;
            }
        }
        offset += entry.record_len();
        out.entries.push(entry);
    }
    Ok(out)
}

pub fn is_native_library(name: &str) -> bool {
    name.starts_with("lib/") && name.ends_with(".so")
}

/// Local extra field for `entry` at its current `header_offset`, padded so
/// the data begins on `boundary`.
fn padded_extra(entry: &Entry, boundary: u32) -> Result<Vec<u8>> {
    let boundary = boundary as u64;
    let header_end = entry.header_offset + entry.local_header_len() - entry.local_extra.len() as u64;

    let extra = match strip_alignment_records(&entry.local_extra) {
        Some(mut extra) => {
            let unpadded = header_end + extra.len() as u64 + ALIGNMENT_RECORD_HEADER;
            let pad = (boundary - unpadded % boundary) % boundary;
            let mut record = [0u8; ALIGNMENT_RECORD_HEADER as usize];
            LittleEndian::write_u16(&mut record[0..2], ALIGNMENT_EXTRA_ID);
            LittleEndian::write_u16(&mut record[2..4], (2 + pad).min(u16::MAX as u64) as u16);
            LittleEndian::write_u16(&mut record[4..6], boundary as u16);
            extra.extend_from_slice(&record);
            extra.resize(extra.len() + pad as usize, 0);
            extra
        }
        None => {
            // Not a sequence of records: keep it and pad with raw zeros.
            let unpadded = header_end + entry.local_extra.len() as u64;
            let pad = (boundary - unpadded % boundary) % boundary;
            let mut extra = entry.local_extra.clone();
            extra.resize(extra.len() + pad as usize, 0);
            extra
        }
    };

    if extra.len() > u16::MAX as usize {
        return Err(ApkError::alignment(
            &entry.name,
            entry.header_offset,
            format!(
                "padding to a {}-byte boundary needs a {}-byte extra field",
                boundary,
                extra.len()
            ),
        ));
    }
    Ok(extra)
}

/// Parses `extra` as (id, size, data) records, dropping alignment records
/// and trailing zero padding. `None` when the bytes are not well formed.
fn strip_alignment_records(extra: &[u8]) -> Option<Vec<u8>> {
    let mut kept = Vec::with_capacity(extra.len());
    let mut pos = 0;
    while pos < extra.len() {
        let rest = &extra[pos..];
        if rest.iter().all(|&b| b == 0) {
            break;
        }
        if rest.len() < 4 {
            return None;
        }
        let id = LittleEndian::read_u16(rest);
        let size = LittleEndian::read_u16(&rest[2..]) as usize;
        if id == 0 || 4 + size > rest.len() {
            return None;
        }
        if id != ALIGNMENT_EXTRA_ID {
            kept.extend_from_slice(&rest[..4 + size]);
        }
        pos += 4 + size;
    }
    Some(kept)
}
