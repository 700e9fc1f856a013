/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! The file-level pipeline: read the input, optionally patch, align, sign,
//! check the result, and write it out atomically.

use crate::{
    align::Aligner,
    archive::Archive,
    error::{ApkError, Result},
    patch::{EntryPatcher, EntryReplacement},
    signing::{SchemeId, Signer, SigningConfig},
    ui::Ui,
    verification::{ArtifactVerifier, VerificationReport},
    BUFFER_SIZE,
};
use crc32fast::Hasher as Crc32;
use std::{
    fs,
    io::{self, BufWriter, Cursor, Read, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use zip::ZipArchive;

/// Where the input archive is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    File(PathBuf),
    Stdin,
}

impl Source {
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            Source::File(path) => Ok(fs::read(path)?),
            Source::Stdin => {
                let mut bytes = Vec::new();
                io::stdin().lock().read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Source::File(path) => path.display().to_string(),
            Source::Stdin => "<stdin pipe>".to_string(),
        }
    }
}

/// Where the result is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// `replace` allows an existing file to be overwritten
    File { path: PathBuf, replace: bool },
    Stdout,
}

impl Destination {
    pub fn describe(&self) -> String {
        match self {
            Destination::File { path, .. } => path.display().to_string(),
            Destination::Stdout => "<stdout pipe>".to_string(),
        }
    }

    /// Fails early, before any work is done, when the output would clobber a file.
    pub fn ensure_writable(&self) -> Result<()> {
        match self {
            Destination::File { path, replace } if !replace && path.exists() => {
                Err(ApkError::Config(format!(
                    "Output exists: {}. Use --overwrite.",
                    path.display()
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn write(&self, bytes: &[u8], ui: &Ui) -> Result<()> {
        match self {
            Destination::File { path, replace } => {
                ArtifactProcessor::persist_atomically(bytes, path, *replace, ui)
            }
            Destination::Stdout => {
                let stdout = io::stdout();
                let mut out = BufWriter::with_capacity(BUFFER_SIZE, stdout.lock());
                out.write_all(bytes)?;
                out.flush()?;
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignReport {
    pub entries: usize,
    /// Stored entries whose padding had to change
    pub padded: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessReport {
    pub replaced: usize,
    pub align: AlignReport,
    pub schemes: Vec<SchemeId>,
    pub verification: VerificationReport,
    pub output_len: usize,
}

pub struct ArtifactProcessor;

impl ArtifactProcessor {
    /// Aligns an unsigned archive held in memory.
    pub fn align(bytes: &[u8], aligner: &Aligner, ui: &Ui) -> Result<(Vec<u8>, AlignReport)> {
        let archive = Archive::parse(bytes)?;
        ui.verbose(&format!("Parsed {} entries", archive.entries.len()));
        Self::align_archive(&archive, aligner, ui)
    }

    fn align_archive(
        archive: &Archive,
        aligner: &Aligner,
        ui: &Ui,
    ) -> Result<(Vec<u8>, AlignReport)> {
        let aligned = aligner.align(archive)?;
        let padded = archive
            .entries
            .iter()
            .zip(&aligned.entries)
            .filter(|(before, after)| before.local_extra != after.local_extra)
            .count();
        for entry in &aligned.entries {
            if let Some(boundary) = aligner.boundary_for(entry) {
                ui.very_verbose(&format!(
                    "{} -> data at {} ({}-byte boundary)",
                    entry.name,
                    entry.data_offset(),
                    boundary
                ));
            }
        }
        let bytes = aligned.to_bytes()?;
        Ok((
            bytes,
            AlignReport {
                entries: aligned.entries.len(),
                padded,
            },
        ))
    }

    /// Signs `bytes` and checks the result. With `aligner`, the output must
    /// also satisfy its alignment; without one, misalignment only warns.
    pub fn sign(
        bytes: &[u8],
        config: &SigningConfig,
        aligner: Option<&Aligner>,
        ui: &Ui,
    ) -> Result<(Vec<u8>, Vec<SchemeId>, VerificationReport)> {
        let archive = Archive::parse(bytes)?;
        Self::sign_archive(&archive, config, aligner, ui)
    }

    fn sign_archive(
        archive: &Archive,
        config: &SigningConfig,
        aligner: Option<&Aligner>,
        ui: &Ui,
    ) -> Result<(Vec<u8>, Vec<SchemeId>, VerificationReport)> {
        ui.info(&format!("Signing as `{}`", config.key_chain.subject()));
        let signed = Signer::new(ui).sign(archive, config)?;
        let bytes = signed.to_bytes()?;
        ui.verbose(&format!("Signed archive: {} bytes", bytes.len()));

        let report = Self::check_output(&bytes, &signed.archive, config, aligner, ui)?;
        Ok((bytes, signed.schemes, report))
    }

    /// Patch, align and sign in one pass. Existing signatures are discarded
    /// before alignment.
    pub fn process(
        bytes: &[u8],
        replacements: &[EntryReplacement],
        aligner: &Aligner,
        config: &SigningConfig,
        ui: &Ui,
    ) -> Result<(Vec<u8>, ProcessReport)> {
        let patched;
        let input = if replacements.is_empty() {
            bytes
        } else {
            ui.info(&format!("Applying {} replacement(s)", replacements.len()));
            patched = EntryPatcher::apply(bytes, replacements, ui)?;
            &patched[..]
        };

        let mut archive = Archive::parse(input)?;
        if archive.is_signed() {
            ui.warn("Input already carries signatures; they are discarded before alignment.");
            archive = archive.without_signatures();
        }

        let (aligned, align) = Self::align_archive(&archive, aligner, ui)?;
        let (signed, schemes, verification) =
            Self::sign(&aligned, config, Some(aligner), ui)?;
        let output_len = signed.len();
        Ok((
            signed,
            ProcessReport {
                replaced: replacements.len(),
                align,
                schemes,
                verification,
                output_len,
            },
        ))
    }

    pub fn align_file(
        source: &Source,
        destination: &Destination,
        aligner: &Aligner,
        ui: &Ui,
    ) -> Result<AlignReport> {
        destination.ensure_writable()?;
        let bytes = source.read()?;
        let (aligned, report) = Self::align(&bytes, aligner, ui)?;
        Self::verify_zip_integrity(&aligned)?;
        destination.write(&aligned, ui)?;
        Ok(report)
    }

    /// Checks the alignment of `source` without writing anything.
    pub fn check_file(source: &Source, aligner: &Aligner, ui: &Ui) -> Result<usize> {
        let bytes = source.read()?;
        let archive = Archive::parse(&bytes)?;
        aligner.check(&archive)?;
        let checked = archive
            .entries
            .iter()
            .filter(|e| aligner.boundary_for(e).is_some())
            .count();
        ui.verbose(&format!("{} stored entries are on their boundary", checked));
        Ok(checked)
    }

    pub fn sign_file(
        source: &Source,
        destination: &Destination,
        config: &SigningConfig,
        ui: &Ui,
    ) -> Result<(Vec<SchemeId>, VerificationReport)> {
        destination.ensure_writable()?;
        let bytes = source.read()?;
        let (signed, schemes, report) = Self::sign(&bytes, config, None, ui)?;
        destination.write(&signed, ui)?;
        Ok((schemes, report))
    }

    pub fn process_file(
        source: &Source,
        destination: &Destination,
        replacements: &[EntryReplacement],
        aligner: &Aligner,
        config: &SigningConfig,
        ui: &Ui,
    ) -> Result<ProcessReport> {
        destination.ensure_writable()?;
        let bytes = source.read()?;
        let (signed, report) = Self::process(&bytes, replacements, aligner, config, ui)?;
        destination.write(&signed, ui)?;
        Ok(report)
    }

    fn check_output(
        bytes: &[u8],
        archive: &Archive,
        config: &SigningConfig,
        aligner: Option<&Aligner>,
        ui: &Ui,
    ) -> Result<VerificationReport> {
        let checked = Self::verify_zip_integrity(bytes)?;
        ui.verbose(&format!("CRC-32 verified for {} entries", checked));

        if let Some(aligner) = aligner {
            aligner.check(archive)?;
        } else if let Err(e) = Aligner::new(Default::default())?.check(archive) {
            ui.warn(&format!("Output is not zip-aligned: {}", e));
        }

        ArtifactVerifier::verify(bytes, Some(config.key_chain.certificate()), ui)
    }

    /// Inflates every entry and compares its CRC-32 with the recorded one.
    /// Returns the number of entries checked.
    pub fn verify_zip_integrity(bytes: &[u8]) -> Result<usize> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut buf = vec![0u8; BUFFER_SIZE];
        for i in 0..archive.len() {
            let mut f = archive.by_index(i)?;
            let mut hasher = Crc32::new();
            loop {
                let n = f.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            let stored = f.crc32();
            let computed = hasher.finalize();
            if stored != computed {
                return Err(ApkError::Validation(format!(
                    "CRC mismatch for `{}`: stored={:#010x}, computed={:#010x}",
                    f.name(),
                    stored,
                    computed
                )));
            }
        }
        Ok(archive.len())
    }

    /// Writes into a temp file next to `path` and renames it into place. On
    /// failure the temp file is removed and `path` is untouched.
    fn persist_atomically(bytes: &[u8], path: &Path, replace: bool, ui: &Ui) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let existing = fs::metadata(path).ok();
        if existing.is_some() && !replace {
            return Err(ApkError::Config(format!(
                "Output exists: {}. Use --overwrite.",
                path.display()
            )));
        }

        let mut temp = NamedTempFile::new_in(dir)?;
        ui.debug(&format!("Staging output in {:?}", temp.path()));
        {
            let mut writer = BufWriter::with_capacity(BUFFER_SIZE, temp.as_file_mut());
            writer.write_all(bytes)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = existing
                .as_ref()
                .map(|m| m.permissions().mode())
                .unwrap_or(0o644);
            fs::set_permissions(temp.path(), fs::Permissions::from_mode(mode))?;
        }

        temp.persist(path).map_err(|e| ApkError::SigningIo(e.error))?;
        ui.verbose(&format!("Wrote {} bytes to {}", bytes.len(), path.display()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::AlignOptions;

    fn stored_zip() -> Vec<u8> {
        use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(
                "a.txt",
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
            )
            .unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn integrity_check_counts_entries() {
        assert_eq!(ArtifactProcessor::verify_zip_integrity(&stored_zip()).unwrap(), 1);
    }

    #[test]
    fn corrupted_data_fails_integrity_check() {
        let mut bytes = stored_zip();
        let pos = bytes.windows(5).position(|w| w == b"hello").unwrap();
        bytes[pos] = b'j';
        assert!(ArtifactProcessor::verify_zip_integrity(&bytes).is_err());
    }

    #[test]
    fn existing_output_is_refused_without_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.apk");
        fs::write(&path, b"keep me").unwrap();

        let dest = Destination::File {
            path: path.clone(),
            replace: false,
        };
        assert!(matches!(dest.ensure_writable(), Err(ApkError::Config(_))));
        assert!(dest.write(b"new", &Ui::default()).is_err());
        assert_eq!(fs::read(&path).unwrap(), b"keep me");

        let dest = Destination::File {
            path: path.clone(),
            replace: true,
        };
        dest.write(b"new", &Ui::default()).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn failed_alignment_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.apk");
        let output = dir.path().join("out.apk");
        fs::write(&input, b"not a zip at all").unwrap();

        let aligner = Aligner::new(AlignOptions::default()).unwrap();
        let err = ArtifactProcessor::align_file(
            &Source::File(input),
            &Destination::File {
                path: output.clone(),
                replace: false,
            },
            &aligner,
            &Ui::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ApkError::MalformedArchive(_)));
        assert!(!output.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
