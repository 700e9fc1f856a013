/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Replacing or adding named entries before an APK is aligned and signed.

use crate::{
    archive::is_signature_file,
    error::{ApkError, Result},
    ui::Ui,
};
use std::{
    collections::BTreeMap,
    fs,
    io::{Cursor, Write},
    path::PathBuf,
    str::FromStr,
};
use zip::{
    write::{FileOptions, ZipWriter},
    CompressionMethod, DateTime, ZipArchive,
};

/// `NAME=PATH`: put the contents of `PATH` into the archive as `NAME`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReplacement {
    pub name: String,
    pub source: PathBuf,
}

impl FromStr for EntryReplacement {
    type Err = ApkError;

    fn from_str(s: &str) -> Result<Self> {
        let (name, source) = s.split_once('=').ok_or_else(|| {
            ApkError::Config(format!("replacement `{}` is not of the form NAME=PATH", s))
        })?;
        if name.is_empty() || source.is_empty() {
            return Err(ApkError::Config(format!(
                "replacement `{}` needs both an entry name and a path",
                s
            )));
        }
        let unsafe_name = name.starts_with('/')
            || name.contains('\\')
            || name.ends_with('/')
            || name.split('/').any(|part| part.is_empty() || part == "..");
        if unsafe_name {
            return Err(ApkError::Config(format!("invalid entry name `{}`", name)));
        }
        if is_signature_file(name) {
            return Err(ApkError::Config(format!(
                "`{}` is a signature file and is regenerated on signing",
                name
            )));
        }
        Ok(Self {
            name: name.to_string(),
            source: PathBuf::from(source),
        })
    }
}

/// New entries that Android expects uncompressed.
fn stored_by_default(name: &str) -> bool {
    name.ends_with(".so") || name.ends_with(".arsc")
}

pub struct EntryPatcher;

impl EntryPatcher {
    /// Rewrites `bytes` with the replacements applied. Untouched entries are
    /// copied raw, old signature files are dropped, and the result is unsigned.
    pub fn apply(bytes: &[u8], replacements: &[EntryReplacement], ui: &Ui) -> Result<Vec<u8>> {
        let mut pending: BTreeMap<&str, &EntryReplacement> = BTreeMap::new();
        for replacement in replacements {
            if pending
                .insert(replacement.name.as_str(), replacement)
                .is_some()
            {
                return Err(ApkError::Config(format!(
                    "entry `{}` is replaced more than once",
                    replacement.name
                )));
            }
        }

        let mut reader = ZipArchive::new(Cursor::new(bytes))?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(bytes.len())));

        for i in 0..reader.len() {
            let file = reader.by_index_raw(i)?;
            let name = file.name().to_string();
            if is_signature_file(&name) {
                ui.verbose(&format!("Dropping old signature file: {}", name));
                continue;
            }
            match pending.remove(name.as_str()) {
                Some(replacement) => {
                    let method = match file.compression() {
                        CompressionMethod::Stored => CompressionMethod::Stored,
                        _ => CompressionMethod::Deflated,
                    };
                    let mode = file.unix_mode().unwrap_or(0o644);
                    drop(file);
                    ui.info(&format!(
                        "Replacing {} with {}",
                        name,
                        replacement.source.display()
                    ));
                    Self::write_entry(&mut writer, &name, replacement, method, mode)?;
                }
                None => writer.raw_copy_file(file)?,
            }
        }

        for (name, replacement) in pending {
            let method = if stored_by_default(name) {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflated
            };
            ui.info(&format!(
                "Adding {} from {}",
                name,
                replacement.source.display()
            ));
            Self::write_entry(&mut writer, name, replacement, method, 0o644)?;
        }

        Ok(writer.finish()?.into_inner())
    }

    fn write_entry(
        writer: &mut ZipWriter<Cursor<Vec<u8>>>,
        name: &str,
        replacement: &EntryReplacement,
        method: CompressionMethod,
        mode: u32,
    ) -> Result<()> {
        let content = fs::read(&replacement.source)?;
        let options = FileOptions::<()>::default()
            .compression_method(method)
            .last_modified_time(DateTime::default())
            .unix_permissions(mode);
        writer.start_file(name, options)?;
        writer.write_all(&content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::write::SimpleFileOptions;

    fn sample() -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            |method| SimpleFileOptions::default().compression_method(method);
        writer
            .start_file("AndroidManifest.xml", options(CompressionMethod::Deflated))
            .unwrap();
        writer.write_all(b"<manifest/>").unwrap();
        writer
            .start_file("resources.arsc", options(CompressionMethod::Stored))
            .unwrap();
        writer.write_all(b"old table").unwrap();
        writer
            .start_file("META-INF/CERT.SF", options(CompressionMethod::Deflated))
            .unwrap();
        writer.write_all(b"Signature-Version: 1.0\r\n").unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn read(bytes: &[u8], name: &str) -> (Vec<u8>, CompressionMethod) {
        let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = zip.by_name(name).unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        (out, file.compression())
    }

    #[test]
    fn replacement_specs_parse() {
        let r: EntryReplacement = "lib/arm64-v8a/libfoo.so=/tmp/libfoo.so".parse().unwrap();
        assert_eq!(r.name, "lib/arm64-v8a/libfoo.so");
        assert_eq!(r.source, PathBuf::from("/tmp/libfoo.so"));

        for bad in [
            "no-separator",
            "=path",
            "name=",
            "/abs=x",
            "a/../b=x",
            "dir/=x",
            "META-INF/CERT.RSA=x",
        ] {
            assert!(
                matches!(bad.parse::<EntryReplacement>(), Err(ApkError::Config(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn replaces_adds_and_drops_signatures() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("table.bin");
        let lib = dir.path().join("libfoo.so");
        let readme = dir.path().join("readme.txt");
        fs::write(&table, b"new table").unwrap();
        fs::write(&lib, b"\x7fELF").unwrap();
        fs::write(&readme, b"hello").unwrap();

        let replacements = [
            EntryReplacement {
                name: "resources.arsc".into(),
                source: table,
            },
            EntryReplacement {
                name: "lib/x86/libfoo.so".into(),
                source: lib,
            },
            EntryReplacement {
                name: "assets/readme.txt".into(),
                source: readme,
            },
        ];
        let out = EntryPatcher::apply(&sample(), &replacements, &Ui::default()).unwrap();

        assert_eq!(
            read(&out, "resources.arsc"),
            (b"new table".to_vec(), CompressionMethod::Stored)
        );
        assert_eq!(read(&out, "lib/x86/libfoo.so").1, CompressionMethod::Stored);
        assert_eq!(read(&out, "assets/readme.txt").1, CompressionMethod::Deflated);
        assert_eq!(read(&out, "AndroidManifest.xml").0, b"<manifest/>");

        let zip = ZipArchive::new(Cursor::new(&out[..])).unwrap();
        assert!(zip.file_names().all(|n| !n.starts_with("META-INF/")));
    }

    #[test]
    fn unreadable_source_is_io_error() {
        let replacements = [EntryReplacement {
            name: "resources.arsc".into(),
            source: PathBuf::from("/nonexistent/apksignerust/table.bin"),
        }];
        let err = EntryPatcher::apply(&sample(), &replacements, &Ui::default()).unwrap_err();
        assert!(matches!(err, ApkError::SigningIo(_)));
    }

    #[test]
    fn duplicate_replacement_is_config_error() {
        let r = EntryReplacement {
            name: "a".into(),
            source: PathBuf::from("a"),
        };
        let err = EntryPatcher::apply(&sample(), &[r.clone(), r], &Ui::default()).unwrap_err();
        assert!(matches!(err, ApkError::Config(_)));
    }
}
