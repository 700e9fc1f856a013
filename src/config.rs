// ApkSigneRust - zip alignment and v1/v2 signing for Android packages
// Copyright (C) 2025 Tiash H Kabir / @MrCarb0n
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Configuration parsing and validation for the ApkSigneRust CLI.

use crate::{
    align::{AlignOptions, Aligner},
    crypto::DigestAlgorithm,
    error::{ApkError, Result},
    keys::{KeyChain, KeySource},
    patch::EntryReplacement,
    processor::{Destination, Source},
    signing::{SchemeSelection, SigningConfig},
    ui::Ui,
};
use clap::ArgMatches;
use std::path::{Path, PathBuf};

/// Execution mode for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Align an archive, or only report misaligned entries with `check`
    Align { options: AlignOptions, check: bool },
    /// Sign an archive as it is
    Sign {
        schemes: SchemeSelection,
        v1_digest: DigestAlgorithm,
    },
    /// Verify an archive's signatures, optionally pinned to a certificate
    Verify { certificate: Option<PathBuf> },
    /// Patch, align and sign in one pass
    Process {
        options: AlignOptions,
        replacements: Vec<EntryReplacement>,
        schemes: SchemeSelection,
        v1_digest: DigestAlgorithm,
    },
}

/// Application configuration parsed from command-line arguments.
#[derive(Debug)]
pub struct Config {
    pub source: Source,
    /// `None` when nothing is written (verify, align --check)
    pub destination: Option<Destination>,
    pub mode: Mode,
    /// Key material for `sign` and `process`
    pub key_source: Option<KeySource>,
    /// Whether the output replaces the input file
    pub inplace: bool,
}

impl Config {
    /// Parse configuration from command-line argument matches.
    ///
    /// # Arguments
    /// * `matches` - The clap argument matches structure
    /// * `ui` - User interface for verbose output
    ///
    /// # Returns
    /// Configuration object or an error
    pub fn from_matches(matches: &ArgMatches, ui: &Ui) -> Result<Self> {
        let (name, sub) = matches.subcommand().ok_or_else(|| {
            ApkError::Config(
                "No subcommand provided. Use 'align', 'sign', 'verify' or 'process'.".into(),
            )
        })?;
        let source = Self::parse_source(sub, ui)?;
        let mode = match name {
            "align" => Mode::Align {
                options: Self::parse_align_options(sub)?,
                check: sub.get_flag("check"),
            },
            "sign" => {
                let (schemes, v1_digest) = Self::parse_schemes(sub)?;
                Mode::Sign { schemes, v1_digest }
            }
            "verify" => Mode::Verify {
                certificate: Self::existing_path(sub, "cert", "Certificate")?,
            },
            "process" => {
                let (schemes, v1_digest) = Self::parse_schemes(sub)?;
                Mode::Process {
                    options: Self::parse_align_options(sub)?,
                    replacements: Self::parse_replacements(sub)?,
                    schemes,
                    v1_digest,
                }
            }
            other => {
                return Err(ApkError::Config(format!("Unknown subcommand `{}`", other)));
            }
        };

        let writes_output = match &mode {
            Mode::Align { check, .. } => !check,
            Mode::Verify { .. } => false,
            _ => true,
        };
        let inplace = writes_output && sub.get_flag("inplace");
        let destination = if writes_output {
            let suffix = if name == "align" { "aligned" } else { "signed" };
            Some(Self::parse_destination(sub, &source, inplace, suffix, ui)?)
        } else {
            None
        };

        let key_source = match mode {
            Mode::Sign { .. } | Mode::Process { .. } => Some(Self::parse_key_source(sub, ui)?),
            _ => None,
        };

        Ok(Self {
            source,
            destination,
            mode,
            key_source,
            inplace,
        })
    }

    /// Loads the key material and builds the signing configuration.
    pub fn signing_config(&self, ui: &Ui) -> Result<SigningConfig> {
        let key_source = self
            .key_source
            .as_ref()
            .ok_or_else(|| ApkError::Config("No signing key configured".into()))?;
        let (schemes, v1_digest) = match &self.mode {
            Mode::Sign { schemes, v1_digest } | Mode::Process { schemes, v1_digest, .. } => {
                (*schemes, *v1_digest)
            }
            _ => return Err(ApkError::Config("Mode does not sign".into())),
        };
        let key_chain = KeyChain::load(key_source, ui)?;
        let config = SigningConfig::new(key_chain)
            .with_schemes(schemes)
            .with_v1_digest(v1_digest);
        config.validate()?;
        Ok(config)
    }

    fn parse_source(matches: &ArgMatches, ui: &Ui) -> Result<Source> {
        let input = matches
            .get_one::<String>("input")
            .ok_or_else(|| ApkError::Config("No input file specified".into()))?;
        if input == "-" {
            ui.debug("Reading input from stdin");
            return Ok(Source::Stdin);
        }
        let path = PathBuf::from(input);
        let metadata = std::fs::metadata(&path).map_err(|e| {
            ApkError::Config(format!("Cannot access input file {}: {}", path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(ApkError::Config(format!(
                "Input is not a file: {}",
                path.display()
            )));
        }
        ui.debug(&format!("Using input file: {}", path.display()));
        Ok(Source::File(path))
    }

    fn parse_destination(
        matches: &ArgMatches,
        source: &Source,
        inplace: bool,
        suffix: &str,
        ui: &Ui,
    ) -> Result<Destination> {
        let overwrite = matches.get_flag("overwrite");
        let output = matches.get_one::<String>("output");

        let destination = match (source, inplace, output) {
            (Source::Stdin, true, _) => {
                return Err(ApkError::Config(
                    "Cannot use --inplace with stdin input.".into(),
                ))
            }
            (_, true, Some(_)) => {
                return Err(ApkError::Config(
                    "Cannot combine --inplace with an output path.".into(),
                ))
            }
            (Source::File(path), true, None) => Destination::File {
                path: path.clone(),
                replace: true,
            },
            (_, false, Some(out)) if out == "-" => Destination::Stdout,
            (_, false, Some(out)) => Destination::File {
                path: PathBuf::from(out),
                replace: overwrite,
            },
            (Source::Stdin, false, None) => Destination::Stdout,
            (Source::File(path), false, None) => Destination::File {
                path: Self::default_output(path, suffix)?,
                replace: overwrite,
            },
        };
        ui.debug(&format!("Output: {}", destination.describe()));
        Ok(destination)
    }

    /// `<dir>/<stem>_<suffix>.apk` next to the input.
    pub fn default_output(input: &Path, suffix: &str) -> Result<PathBuf> {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                ApkError::Config(format!(
                    "Invalid input filename (no stem or non-UTF8): {}",
                    input.display()
                ))
            })?;
        Ok(input.with_file_name(format!("{}_{}.apk", stem, suffix)))
    }

    fn parse_align_options(matches: &ArgMatches) -> Result<AlignOptions> {
        let mut options = AlignOptions::default();
        if let Some(alignment) = matches.get_one::<u32>("alignment") {
            options = options.with_alignment(*alignment);
        }
        if matches.get_flag("page_align") {
            options = options.with_page_aligned_libraries();
        }
        Aligner::new(options)?;
        Ok(options)
    }

    fn parse_schemes(matches: &ArgMatches) -> Result<(SchemeSelection, DigestAlgorithm)> {
        let schemes = match matches.get_one::<String>("scheme") {
            Some(s) => s.parse()?,
            None => SchemeSelection::default(),
        };
        let v1_digest = match matches.get_one::<String>("v1_digest") {
            Some(s) => s.parse()?,
            None => DigestAlgorithm::default(),
        };
        Ok((schemes, v1_digest))
    }

    fn parse_replacements(matches: &ArgMatches) -> Result<Vec<EntryReplacement>> {
        let replacements = matches
            .get_many::<String>("replace")
            .map(|values| {
                values
                    .map(|v| v.parse::<EntryReplacement>())
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();
        for replacement in &replacements {
            if !replacement.source.is_file() {
                return Err(ApkError::Config(format!(
                    "Replacement source does not exist: {}",
                    replacement.source.display()
                )));
            }
        }
        Ok(replacements)
    }

    fn parse_key_source(matches: &ArgMatches, ui: &Ui) -> Result<KeySource> {
        let key = Self::existing_path(matches, "private_key", "Private key")?;
        let cert = Self::existing_path(matches, "cert", "Certificate")?;
        let keystore = Self::existing_path(matches, "keystore", "Keystore")?;

        match (key, cert, keystore) {
            (None, None, Some(path)) => {
                let store_password = matches
                    .get_one::<String>("store_pass")
                    .cloned()
                    .ok_or_else(|| {
                        ApkError::Config("--keystore requires --store-pass".into())
                    })?;
                ui.debug(&format!("Using keystore: {}", path.display()));
                Ok(KeySource::Keystore {
                    path,
                    alias: matches.get_one::<String>("alias").cloned(),
                    store_password,
                    key_password: matches.get_one::<String>("key_pass").cloned(),
                })
            }
            (Some(private_key), Some(certificate), None) => {
                ui.debug(&format!("Using private key: {}", private_key.display()));
                ui.debug(&format!("Using certificate: {}", certificate.display()));
                Ok(KeySource::Files {
                    private_key,
                    certificate,
                })
            }
            (_, _, Some(_)) => Err(ApkError::Config(
                "Use either --keystore or --private-key/--cert, not both".into(),
            )),
            _ => Err(ApkError::Config(
                "Signing needs --private-key and --cert, or --keystore".into(),
            )),
        }
    }

    fn existing_path(matches: &ArgMatches, id: &str, what: &str) -> Result<Option<PathBuf>> {
        let Some(value) = matches.get_one::<String>(id) else {
            return Ok(None);
        };
        let path = PathBuf::from(value);
        if !path.exists() {
            return Err(ApkError::Config(format!(
                "{} file does not exist: {}",
                what,
                path.display()
            )));
        }
        Ok(Some(path))
    }
}
