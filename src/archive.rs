/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! In-memory model of a zip32 container.
//!
//! Entries carry their compressed payload and data descriptor verbatim, so
//! CRC-32 and sizes never drift. Serialisation lays the entries out back to
//! back from offset zero, followed by the optional APK Signing Block, the
//! central directory and the end-of-central-directory record, so the
//! directory offsets always agree with the entry positions.

use crate::{
    error::{ApkError, Result},
    sigblock::APK_SIGNING_BLOCK_MAGIC,
};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};
use std::io::{self, Cursor, Read, Write};
use zip::DateTime;

pub const LOCAL_HEADER_SIGNATURE: u32 = 0x04034b50;
pub const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014b50;
pub const EOCD_SIGNATURE: u32 = 0x06054b50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;
const ZIP64_LOCATOR_SIGNATURE: u32 = 0x07064b50;

pub const LOCAL_HEADER_LEN: u64 = 30;
pub const EOCD_LEN: u64 = 22;
/// Offset of the "central directory offset" field inside the EOCD record.
pub const EOCD_CD_OFFSET_FIELD: usize = 16;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATED: u16 = 8;

const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// Byte ranges of the three trailing sections of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZipSections {
    /// Start of the APK Signing Block, equal to `cd_start` when absent
    pub sb_start: u64,
    pub cd_start: u64,
    pub cd_size: u64,
    pub cde_start: u64,
    pub entry_count: u16,
}

impl ZipSections {
    pub fn locate(bytes: &[u8]) -> Result<Self> {
        let cde_start = find_cde_start_pos(bytes)?;
        let cde = &bytes[cde_start as usize..];
        let mut r = Cursor::new(cde);
        r.set_position(4);
        let disk = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let cd_disk = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let disk_entries = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let entry_count = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let cd_size = r.read_u32::<LittleEndian>().map_err(truncated)?;
        let cd_start = r.read_u32::<LittleEndian>().map_err(truncated)?;

        if cde_start >= 20
            && LittleEndian::read_u32(&bytes[cde_start as usize - 20..]) == ZIP64_LOCATOR_SIGNATURE
        {
            return Err(ApkError::malformed("zip64 archives are not supported"));
        }
        if entry_count == u16::MAX || cd_size == u32::MAX || cd_start == u32::MAX {
            return Err(ApkError::malformed("zip64 archives are not supported"));
        }
        if disk != 0 || cd_disk != 0 || disk_entries != entry_count {
            return Err(ApkError::malformed("multi-disk archives are not supported"));
        }

        let cd_start = cd_start as u64;
        let cd_size = cd_size as u64;
        if cd_start + cd_size != cde_start {
            return Err(ApkError::malformed(format!(
                "central directory ({} bytes at {}) does not end at the EOCD record ({})",
                cd_size, cd_start, cde_start
            )));
        }

        let sb_start = find_signing_block(bytes, cd_start)?;
        Ok(Self {
            sb_start,
            cd_start,
            cd_size,
            cde_start,
            entry_count,
        })
    }

    pub fn has_signing_block(&self) -> bool {
        self.sb_start < self.cd_start
    }
}

fn find_cde_start_pos(bytes: &[u8]) -> Result<u64> {
    let len = bytes.len() as u64;
    if len < EOCD_LEN {
        return Err(ApkError::malformed("file too small to be a zip archive"));
    }
    let lower_bound = len.saturating_sub(EOCD_LEN + u16::MAX as u64);
    let mut pos = len - EOCD_LEN;
    loop {
        let at = pos as usize;
        if LittleEndian::read_u32(&bytes[at..]) == EOCD_SIGNATURE {
            let comment_len = LittleEndian::read_u16(&bytes[at + 20..]) as u64;
            if pos + EOCD_LEN + comment_len == len {
                return Ok(pos);
            }
        }
        if pos == lower_bound {
            break;
        }
        pos -= 1;
    }
    Err(ApkError::malformed("end of central directory record not found"))
}

fn find_signing_block(bytes: &[u8], cd_start: u64) -> Result<u64> {
    let cd = cd_start as usize;
    if cd < 32 || &bytes[cd - 16..cd] != APK_SIGNING_BLOCK_MAGIC {
        return Ok(cd_start);
    }
    // The size fields count everything after the leading size field.
    let footer_size = LittleEndian::read_u64(&bytes[cd - 24..]);
    let total = footer_size.checked_add(8).unwrap_or(u64::MAX);
    if footer_size < 24 || total > cd_start {
        return Err(ApkError::malformed(format!(
            "APK Signing Block size {} out of range",
            footer_size
        )));
    }
    let sb_start = cd_start - total;
    let header_size = LittleEndian::read_u64(&bytes[sb_start as usize..]);
    if header_size != footer_size {
        return Err(ApkError::malformed(format!(
            "APK Signing Block header size {} disagrees with footer size {}",
            header_size, footer_size
        )));
    }
    Ok(sb_start)
}

fn truncated(e: io::Error) -> ApkError {
    ApkError::malformed(format!("truncated record: {}", e))
}

/// Fields of a local file header that may legitimately differ from the
/// central directory copy (e.g. zeroed sizes when a data descriptor follows).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    raw_name: Vec<u8>,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub local: LocalHeader,
    pub local_extra: Vec<u8>,
    pub central_extra: Vec<u8>,
    pub comment: Vec<u8>,
    /// Compressed payload exactly as stored
    pub data: Vec<u8>,
    /// Trailing data descriptor bytes, empty when flag bit 3 is clear
    pub descriptor: Vec<u8>,
    /// Local header offset in the most recent layout
    pub header_offset: u64,
}

impl Entry {
    /// Builds a deflated entry for content generated by this crate.
    pub fn new_deflated(name: &str, content: &[u8], modified: DateTime) -> Result<Self> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content)?;
        let data = encoder.finish()?;

        let too_large = || ApkError::malformed(format!("`{}` exceeds zip32 size limits", name));
        let compressed_size = u32::try_from(data.len()).map_err(|_| too_large())?;
        let uncompressed_size = u32::try_from(content.len()).map_err(|_| too_large())?;
        if name.len() > u16::MAX as usize {
            return Err(ApkError::malformed("entry name too long"));
        }
        let crc32 = crc32fast::hash(content);

        Ok(Self {
            name: name.to_string(),
            raw_name: name.as_bytes().to_vec(),
            version_made_by: 20,
            version_needed: 20,
            flags: 0,
            method: METHOD_DEFLATED,
            mod_time: modified.timepart(),
            mod_date: modified.datepart(),
            crc32,
            compressed_size,
            uncompressed_size,
            internal_attrs: 0,
            external_attrs: 0,
            local: LocalHeader {
                version_needed: 20,
                flags: 0,
                method: METHOD_DEFLATED,
                mod_time: modified.timepart(),
                mod_date: modified.datepart(),
                crc32,
                compressed_size,
                uncompressed_size,
            },
            local_extra: Vec::new(),
            central_extra: Vec::new(),
            comment: Vec::new(),
            data,
            descriptor: Vec::new(),
            header_offset: 0,
        })
    }

    #[cfg(test)]
    pub(crate) fn new_stored(name: &str, content: &[u8]) -> Self {
        let mut entry = Self::new_deflated(name, b"", DateTime::default())
            .expect("empty entry always fits");
        entry.method = METHOD_STORED;
        entry.local.method = METHOD_STORED;
        entry.data = content.to_vec();
        entry.crc32 = crc32fast::hash(content);
        entry.local.crc32 = entry.crc32;
        entry.compressed_size = content.len() as u32;
        entry.uncompressed_size = content.len() as u32;
        entry.local.compressed_size = entry.compressed_size;
        entry.local.uncompressed_size = entry.uncompressed_size;
        entry.version_needed = 10;
        entry.local.version_needed = 10;
        entry
    }

    pub fn is_stored(&self) -> bool {
        self.method == METHOD_STORED
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn local_header_len(&self) -> u64 {
        LOCAL_HEADER_LEN + self.raw_name.len() as u64 + self.local_extra.len() as u64
    }

    pub fn data_offset(&self) -> u64 {
        self.header_offset + self.local_header_len()
    }

    /// Bytes occupied by header, payload and descriptor.
    pub fn record_len(&self) -> u64 {
        self.local_header_len() + self.data.len() as u64 + self.descriptor.len() as u64
    }

    /// Inflates the payload and checks it against the recorded CRC-32.
    pub fn read_content(&self) -> Result<Vec<u8>> {
        let content = match self.method {
            METHOD_STORED => self.data.clone(),
            METHOD_DEFLATED => {
                let mut out = Vec::new();
                DeflateDecoder::new(&self.data[..])
                    .read_to_end(&mut out)
                    .map_err(|e| {
                        ApkError::malformed(format!("`{}`: inflate failed: {}", self.name, e))
                    })?;
                out
            }
            m => {
                return Err(ApkError::malformed(format!(
                    "`{}`: unsupported compression method {}",
                    self.name, m
                )))
            }
        };
        let computed = crc32fast::hash(&content);
        if computed != self.crc32 {
            return Err(ApkError::malformed(format!(
                "CRC mismatch for `{}`: stored={:#010x}, computed={:#010x}",
                self.name, self.crc32, computed
            )));
        }
        Ok(content)
    }

    fn read_central(r: &mut Cursor<&[u8]>) -> Result<Self> {
        let signature = r.read_u32::<LittleEndian>().map_err(truncated)?;
        if signature != CENTRAL_HEADER_SIGNATURE {
            return Err(ApkError::malformed(format!(
                "bad central directory signature {:#010x} at directory offset {}",
                signature,
                r.position() - 4
            )));
        }
        let version_made_by = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let version_needed = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let flags = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let method = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let mod_time = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let mod_date = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let crc32 = r.read_u32::<LittleEndian>().map_err(truncated)?;
        let compressed_size = r.read_u32::<LittleEndian>().map_err(truncated)?;
        let uncompressed_size = r.read_u32::<LittleEndian>().map_err(truncated)?;
        let name_len = r.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        let extra_len = r.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        let comment_len = r.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        let disk_start = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let internal_attrs = r.read_u16::<LittleEndian>().map_err(truncated)?;
        let external_attrs = r.read_u32::<LittleEndian>().map_err(truncated)?;
        let header_offset = r.read_u32::<LittleEndian>().map_err(truncated)?;

        let mut raw_name = vec![0u8; name_len];
        r.read_exact(&mut raw_name).map_err(truncated)?;
        let mut central_extra = vec![0u8; extra_len];
        r.read_exact(&mut central_extra).map_err(truncated)?;
        let mut comment = vec![0u8; comment_len];
        r.read_exact(&mut comment).map_err(truncated)?;

        let name = String::from_utf8_lossy(&raw_name).into_owned();
        if disk_start != 0 {
            return Err(ApkError::malformed(format!(
                "`{}` starts on disk {}; multi-disk archives are not supported",
                name, disk_start
            )));
        }
        if compressed_size == u32::MAX || uncompressed_size == u32::MAX || header_offset == u32::MAX
        {
            return Err(ApkError::malformed(format!(
                "`{}` uses zip64 fields; zip64 archives are not supported",
                name
            )));
        }

        Ok(Self {
            name,
            raw_name,
            version_made_by,
            version_needed,
            flags,
            method,
            mod_time,
            mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            internal_attrs,
            external_attrs,
            local: LocalHeader {
                version_needed,
                flags,
                method,
                mod_time,
                mod_date,
                crc32,
                compressed_size,
                uncompressed_size,
            },
            local_extra: Vec::new(),
            central_extra,
            comment,
            data: Vec::new(),
            descriptor: Vec::new(),
            header_offset: header_offset as u64,
        })
    }

    /// Fills in the local header, payload and descriptor. `limit` is the end
    /// of the entry region (start of the signing block or central directory).
    fn read_local(&mut self, bytes: &[u8], limit: u64) -> Result<()> {
        let offset = self.header_offset;
        if offset + LOCAL_HEADER_LEN > limit {
            return Err(ApkError::malformed(format!(
                "`{}`: local header offset {} lies outside the entry region",
                self.name, offset
            )));
        }
        let mut r = Cursor::new(&bytes[offset as usize..limit as usize]);
        let signature = r.read_u32::<LittleEndian>().map_err(truncated)?;
        if signature != LOCAL_HEADER_SIGNATURE {
            return Err(ApkError::malformed(format!(
                "`{}`: no local header at offset {}",
                self.name, offset
            )));
        }
        self.local = LocalHeader {
            version_needed: r.read_u16::<LittleEndian>().map_err(truncated)?,
            flags: r.read_u16::<LittleEndian>().map_err(truncated)?,
            method: r.read_u16::<LittleEndian>().map_err(truncated)?,
            mod_time: r.read_u16::<LittleEndian>().map_err(truncated)?,
            mod_date: r.read_u16::<LittleEndian>().map_err(truncated)?,
            crc32: r.read_u32::<LittleEndian>().map_err(truncated)?,
            compressed_size: r.read_u32::<LittleEndian>().map_err(truncated)?,
            uncompressed_size: r.read_u32::<LittleEndian>().map_err(truncated)?,
        };
        let name_len = r.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        let extra_len = r.read_u16::<LittleEndian>().map_err(truncated)? as usize;

        let mut local_name = vec![0u8; name_len];
        r.read_exact(&mut local_name).map_err(truncated)?;
        if local_name != self.raw_name {
            return Err(ApkError::malformed(format!(
                "local header name `{}` disagrees with central directory name `{}`",
                String::from_utf8_lossy(&local_name),
                self.name
            )));
        }
        if self.local.method != self.method {
            return Err(ApkError::malformed(format!(
                "`{}`: local compression method {} disagrees with central directory method {}",
                self.name, self.local.method, self.method
            )));
        }
        self.local_extra = vec![0u8; extra_len];
        r.read_exact(&mut self.local_extra).map_err(truncated)?;

        let data_start = self.data_offset();
        let data_end = data_start + self.compressed_size as u64;
        if data_end > limit {
            return Err(ApkError::malformed(format!(
                "`{}`: data runs past the end of the entry region",
                self.name
            )));
        }
        self.data = bytes[data_start as usize..data_end as usize].to_vec();

        if self.local.flags & FLAG_DATA_DESCRIPTOR != 0 {
            let has_signature = data_end + 4 <= limit
                && LittleEndian::read_u32(&bytes[data_end as usize..]) == DATA_DESCRIPTOR_SIGNATURE;
            let len = if has_signature { 16 } else { 12 };
            if data_end + len > limit {
                return Err(ApkError::malformed(format!(
                    "`{}`: data descriptor runs past the end of the entry region",
                    self.name
                )));
            }
            self.descriptor = bytes[data_end as usize..(data_end + len) as usize].to_vec();
        }
        Ok(())
    }

    fn write_local<W: Write>(&self, w: &mut W) -> Result<()> {
        let extra_len = u16::try_from(self.local_extra.len()).map_err(|_| {
            ApkError::alignment(
                &self.name,
                self.header_offset,
                "local extra field exceeds 65535 bytes",
            )
        })?;
        w.write_u32::<LittleEndian>(LOCAL_HEADER_SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.local.version_needed)?;
        w.write_u16::<LittleEndian>(self.local.flags)?;
        w.write_u16::<LittleEndian>(self.local.method)?;
        w.write_u16::<LittleEndian>(self.local.mod_time)?;
        w.write_u16::<LittleEndian>(self.local.mod_date)?;
        w.write_u32::<LittleEndian>(self.local.crc32)?;
        w.write_u32::<LittleEndian>(self.local.compressed_size)?;
        w.write_u32::<LittleEndian>(self.local.uncompressed_size)?;
        w.write_u16::<LittleEndian>(self.raw_name.len() as u16)?;
        w.write_u16::<LittleEndian>(extra_len)?;
        w.write_all(&self.raw_name)?;
        w.write_all(&self.local_extra)?;
        w.write_all(&self.data)?;
        w.write_all(&self.descriptor)?;
        Ok(())
    }

    fn write_central<W: Write>(&self, w: &mut W, header_offset: u32) -> Result<()> {
        let extra_len = u16::try_from(self.central_extra.len())
            .map_err(|_| ApkError::malformed(format!("`{}`: extra field too long", self.name)))?;
        let comment_len = u16::try_from(self.comment.len())
            .map_err(|_| ApkError::malformed(format!("`{}`: comment too long", self.name)))?;
        w.write_u32::<LittleEndian>(CENTRAL_HEADER_SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.version_made_by)?;
        w.write_u16::<LittleEndian>(self.version_needed)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.method)?;
        w.write_u16::<LittleEndian>(self.mod_time)?;
        w.write_u16::<LittleEndian>(self.mod_date)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size)?;
        w.write_u16::<LittleEndian>(self.raw_name.len() as u16)?;
        w.write_u16::<LittleEndian>(extra_len)?;
        w.write_u16::<LittleEndian>(comment_len)?;
        w.write_u16::<LittleEndian>(0)?;
        w.write_u16::<LittleEndian>(self.internal_attrs)?;
        w.write_u32::<LittleEndian>(self.external_attrs)?;
        w.write_u32::<LittleEndian>(header_offset)?;
        w.write_all(&self.raw_name)?;
        w.write_all(&self.central_extra)?;
        w.write_all(&self.comment)?;
        Ok(())
    }
}

/// True for the files that make up a v1 (JAR) signature.
pub fn is_signature_file(name: &str) -> bool {
    let Some(file) = name.strip_prefix("META-INF/") else {
        return false;
    };
    if file.contains('/') {
        return false;
    }
    let upper = file.to_ascii_uppercase();
    upper == "MANIFEST.MF"
        || upper.starts_with("SIG-")
        || [".SF", ".RSA", ".DSA", ".EC"]
            .iter()
            .any(|ext| upper.ends_with(ext))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archive {
    /// Entries in local-header order
    pub entries: Vec<Entry>,
    pub comment: Vec<u8>,
    /// Raw APK Signing Block, size fields and magic included
    pub signing_block: Option<Vec<u8>>,
}

impl Archive {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let sections = ZipSections::locate(bytes)?;
        let cd = &bytes[sections.cd_start as usize..sections.cde_start as usize];
        let mut r = Cursor::new(cd);

        let mut entries = Vec::with_capacity(sections.entry_count as usize);
        for _ in 0..sections.entry_count {
            let mut entry = Entry::read_central(&mut r)?;
            entry.read_local(bytes, sections.sb_start)?;
            entries.push(entry);
        }
        if r.position() != cd.len() as u64 {
            return Err(ApkError::malformed(format!(
                "central directory holds {} bytes beyond its {} records",
                cd.len() as u64 - r.position(),
                sections.entry_count
            )));
        }

        entries.sort_by_key(|e| e.header_offset);
        for pair in entries.windows(2) {
            if pair[0].header_offset + pair[0].record_len() > pair[1].header_offset {
                return Err(ApkError::malformed(format!(
                    "entries `{}` and `{}` overlap",
                    pair[0].name, pair[1].name
                )));
            }
        }

        let comment = bytes[(sections.cde_start + EOCD_LEN) as usize..].to_vec();
        let signing_block = sections
            .has_signing_block()
            .then(|| bytes[sections.sb_start as usize..sections.cd_start as usize].to_vec());

        Ok(Self {
            entries,
            comment,
            signing_block,
        })
    }

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn has_v1_signature(&self) -> bool {
        self.entries.iter().any(|e| is_signature_file(&e.name))
    }

    pub fn is_signed(&self) -> bool {
        self.signing_block.is_some() || self.has_v1_signature()
    }

    /// Copy of the archive with every v1 signature file and the signing block removed.
    pub fn without_signatures(&self) -> Self {
        let mut stripped = Self {
            entries: self
                .entries
                .iter()
                .filter(|e| !is_signature_file(&e.name))
                .cloned()
                .collect(),
            comment: self.comment.clone(),
            signing_block: None,
        };
        stripped.refresh_offsets();
        stripped
    }

    /// Recomputes `header_offset` for the back-to-back layout.
    pub fn refresh_offsets(&mut self) {
        let mut offset = 0u64;
        for entry in &mut self.entries {
            entry.header_offset = offset;
            offset += entry.record_len();
        }
    }

    /// Size of the entry region, i.e. where the signing block or central directory starts.
    pub fn entries_len(&self) -> u64 {
        self.entries.iter().map(Entry::record_len).sum()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let entry_count = u16::try_from(self.entries.len())
            .map_err(|_| ApkError::malformed("too many entries for a zip32 archive"))?;
        let comment_len = u16::try_from(self.comment.len())
            .map_err(|_| ApkError::malformed("archive comment too long"))?;

        let mut out = Vec::with_capacity(self.entries_len() as usize + 4096);
        let mut offsets = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let offset = u32::try_from(out.len())
                .map_err(|_| ApkError::malformed("archive exceeds zip32 size limits"))?;
            offsets.push(offset);
            entry.write_local(&mut out)?;
        }
        if let Some(block) = &self.signing_block {
            out.extend_from_slice(block);
        }

        let cd_start = u32::try_from(out.len())
            .map_err(|_| ApkError::malformed("archive exceeds zip32 size limits"))?;
        for (entry, offset) in self.entries.iter().zip(offsets) {
            entry.write_central(&mut out, offset)?;
        }
        let cd_size = out.len() as u32 - cd_start;

        out.write_u32::<LittleEndian>(EOCD_SIGNATURE)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(entry_count)?;
        out.write_u16::<LittleEndian>(entry_count)?;
        out.write_u32::<LittleEndian>(cd_size)?;
        out.write_u32::<LittleEndian>(cd_start)?;
        out.write_u16::<LittleEndian>(comment_len)?;
        out.write_all(&self.comment)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Archive {
        let mut archive = Archive::default();
        archive.entries.push(
            Entry::new_deflated("AndroidManifest.xml", b"<manifest/>", DateTime::default())
                .unwrap(),
        );
        archive.entries.push(
            Entry::new_deflated("classes.dex", &[7u8; 300], DateTime::default()).unwrap(),
        );
        archive.refresh_offsets();
        archive
    }

    #[test]
    fn layout_survives_reparse() {
        let archive = sample();
        let bytes = archive.to_bytes().unwrap();
        let parsed = Archive::parse(&bytes).unwrap();
        assert_eq!(parsed, archive);
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn zip_crate_reads_our_layout() {
        let bytes = sample().to_bytes().unwrap();
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut content = Vec::new();
        zip.by_name("classes.dex")
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, vec![7u8; 300]);
    }

    #[test]
    fn missing_eocd_is_malformed() {
        let err = Archive::parse(&[0u8; 64]).unwrap_err();
        assert!(matches!(err, ApkError::MalformedArchive(_)));
    }

    #[test]
    fn tiny_input_is_malformed() {
        let err = Archive::parse(b"PK").unwrap_err();
        assert!(matches!(err, ApkError::MalformedArchive(_)));
    }

    #[test]
    fn central_offset_mismatch_is_malformed() {
        let mut bytes = sample().to_bytes().unwrap();
        let cde = bytes.len() - EOCD_LEN as usize;
        let cd_offset = LittleEndian::read_u32(&bytes[cde + EOCD_CD_OFFSET_FIELD..]);
        LittleEndian::write_u32(&mut bytes[cde + EOCD_CD_OFFSET_FIELD..], cd_offset - 1);
        let err = Archive::parse(&bytes).unwrap_err();
        assert!(matches!(err, ApkError::MalformedArchive(_)));
    }

    #[test]
    fn entry_count_mismatch_is_malformed() {
        let mut bytes = sample().to_bytes().unwrap();
        let cde = bytes.len() - EOCD_LEN as usize;
        LittleEndian::write_u16(&mut bytes[cde + 8..], 1);
        LittleEndian::write_u16(&mut bytes[cde + 10..], 1);
        let err = Archive::parse(&bytes).unwrap_err();
        assert!(matches!(err, ApkError::MalformedArchive(_)));
    }

    #[test]
    fn corrupt_local_signature_is_malformed() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[0] = b'X';
        let err = Archive::parse(&bytes).unwrap_err();
        assert!(matches!(err, ApkError::MalformedArchive(_)));
    }

    #[test]
    fn archive_comment_is_kept() {
        let mut archive = sample();
        archive.comment = b"built by test".to_vec();
        let parsed = Archive::parse(&archive.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.comment, b"built by test");
    }

    #[test]
    fn deflated_content_round_trips() {
        let entry = Entry::new_deflated("a.txt", b"hello hello hello", DateTime::default()).unwrap();
        assert_eq!(entry.read_content().unwrap(), b"hello hello hello");
    }

    #[test]
    fn crc_mismatch_is_reported() {
        let mut entry = Entry::new_deflated("a.txt", b"hello", DateTime::default()).unwrap();
        entry.crc32 ^= 1;
        assert!(matches!(
            entry.read_content(),
            Err(ApkError::MalformedArchive(_))
        ));
    }

    #[test]
    fn signature_file_names() {
        assert!(is_signature_file("META-INF/MANIFEST.MF"));
        assert!(is_signature_file("META-INF/CERT.SF"));
        assert!(is_signature_file("META-INF/cert.rsa"));
        assert!(is_signature_file("META-INF/KEY.EC"));
        assert!(is_signature_file("META-INF/SIG-FOO"));
        assert!(!is_signature_file("META-INF/services/foo.SF"));
        assert!(!is_signature_file("META-INF/com/android/build.txt"));
        assert!(!is_signature_file("assets/CERT.SF"));
    }

    #[test]
    fn without_signatures_drops_v1_files_and_block() {
        let mut archive = sample();
        archive.entries.push(
            Entry::new_deflated("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\n", DateTime::default())
                .unwrap(),
        );
        archive.signing_block = Some(vec![0u8; 32]);
        assert!(archive.is_signed());
        let stripped = archive.without_signatures();
        assert!(!stripped.is_signed());
        assert_eq!(stripped.entries.len(), 2);
    }
}
