/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! Signing schemes and the [`Signer`] that applies them in order.

use crate::{
    align,
    archive::Archive,
    crypto::DigestAlgorithm,
    error::{ApkError, Result},
    jar,
    keys::KeyChain,
    sigblock,
    ui::Ui,
    APP_NAME, APP_VERSION,
};
use std::{fmt, str::FromStr};

pub const DEFAULT_SIGNER_NAME: &str = "CERT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemeId {
    JarV1,
    BlockV2,
}

impl fmt::Display for SchemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemeId::JarV1 => write!(f, "v1 (JAR)"),
            SchemeId::BlockV2 => write!(f, "v2 (APK Signing Block)"),
        }
    }
}

/// One way of embedding a signature into an archive.
pub trait SignatureScheme {
    fn id(&self) -> SchemeId;

    /// Adds this scheme's signature to `archive`, which already carries the
    /// signatures of every scheme applied before it.
    fn apply(&self, archive: &mut Archive, config: &SigningConfig, ui: &Ui) -> Result<()>;
}

pub struct JarScheme;

impl SignatureScheme for JarScheme {
    fn id(&self) -> SchemeId {
        SchemeId::JarV1
    }

    fn apply(&self, archive: &mut Archive, config: &SigningConfig, ui: &Ui) -> Result<()> {
        let signature = jar::sign(archive, config, ui)?;
        let timestamp = config.key_chain.get_reproducible_timestamp();
        ui.very_verbose(&format!(
            "Timestamp used: {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            timestamp.year(),
            timestamp.month(),
            timestamp.day(),
            timestamp.hour(),
            timestamp.minute(),
            timestamp.second()
        ));
        jar::append(archive, &signature, timestamp)
    }
}

/// Must run last: the v2 digest covers every entry and the central directory.
pub struct BlockV2Scheme;

impl SignatureScheme for BlockV2Scheme {
    fn id(&self) -> SchemeId {
        SchemeId::BlockV2
    }

    fn apply(&self, archive: &mut Archive, config: &SigningConfig, ui: &Ui) -> Result<()> {
        archive.signing_block = None;
        archive.refresh_offsets();
        let unsigned = archive.to_bytes()?;
        let block = sigblock::sign_v2(&unsigned, &config.key_chain, ui)?;
        ui.verbose(&format!("APK Signing Block: {} bytes", block.len()));
        archive.signing_block = Some(block);
        Ok(())
    }
}

/// Which schemes to apply, as chosen on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemeSelection {
    V1,
    V2,
    #[default]
    Both,
}

impl SchemeSelection {
    pub fn v1(&self) -> bool {
        matches!(self, SchemeSelection::V1 | SchemeSelection::Both)
    }

    pub fn v2(&self) -> bool {
        matches!(self, SchemeSelection::V2 | SchemeSelection::Both)
    }
}

impl FromStr for SchemeSelection {
    type Err = ApkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "v1" => Ok(SchemeSelection::V1),
            "v2" => Ok(SchemeSelection::V2),
            "both" | "v1+v2" => Ok(SchemeSelection::Both),
            other => Err(ApkError::Config(format!(
                "unknown signature scheme `{}` (expected v1, v2 or both)",
                other
            ))),
        }
    }
}

/// Key material and scheme choices for one signing run.
#[derive(Debug)]
pub struct SigningConfig {
    pub key_chain: KeyChain,
    pub v1: bool,
    pub v2: bool,
    pub v1_digest: DigestAlgorithm,
    /// Base name of the `.SF` and signature block files
    pub signer_name: String,
    pub created_by: String,
}

impl SigningConfig {
    pub fn new(key_chain: KeyChain) -> Self {
        Self {
            key_chain,
            v1: true,
            v2: true,
            v1_digest: DigestAlgorithm::default(),
            signer_name: DEFAULT_SIGNER_NAME.to_string(),
            created_by: format!("{} {}", APP_NAME, APP_VERSION),
        }
    }

    pub fn with_schemes(mut self, selection: SchemeSelection) -> Self {
        self.v1 = selection.v1();
        self.v2 = selection.v2();
        self
    }

    pub fn with_v1_digest(mut self, alg: DigestAlgorithm) -> Self {
        self.v1_digest = alg;
        self
    }

    pub fn with_signer_name(mut self, name: impl Into<String>) -> Self {
        self.signer_name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.v1 && !self.v2 {
            return Err(ApkError::Config(
                "at least one signature scheme must be enabled".into(),
            ));
        }
        let valid_name = !self.signer_name.is_empty()
            && self.signer_name.len() <= 70
            && self
                .signer_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid_name {
            return Err(ApkError::Config(format!(
                "invalid signer name `{}`",
                self.signer_name
            )));
        }
        Ok(())
    }

    fn schemes(&self) -> Vec<Box<dyn SignatureScheme>> {
        let mut schemes: Vec<Box<dyn SignatureScheme>> = Vec::new();
        if self.v1 {
            schemes.push(Box::new(JarScheme));
        }
        if self.v2 {
            schemes.push(Box::new(BlockV2Scheme));
        }
        schemes
    }
}

#[derive(Debug, Clone)]
pub struct SignedArchive {
    pub archive: Archive,
    pub schemes: Vec<SchemeId>,
}

impl SignedArchive {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.archive.to_bytes()
    }
}

pub struct Signer<'a> {
    ui: &'a Ui,
}

impl<'a> Signer<'a> {
    pub fn new(ui: &'a Ui) -> Self {
        Self { ui }
    }

    /// Strips any existing signatures, then applies the configured schemes.
    /// Stored entries keep the boundary they held in `archive`.
    pub fn sign(&self, archive: &Archive, config: &SigningConfig) -> Result<SignedArchive> {
        config.validate()?;
        if archive.is_signed() {
            self.ui
                .warn("Input already carries signatures; they are replaced.");
        }
        let mut signed = align::strip_signatures(archive)?;

        let mut applied = Vec::new();
        for scheme in config.schemes() {
            self.ui.info(&format!("Applying {} signature", scheme.id()));
            scheme.apply(&mut signed, config, self.ui)?;
            applied.push(scheme.id());
        }
        Ok(SignedArchive {
            archive: signed,
            schemes: applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Entry;
    use std::path::Path;
    use zip::DateTime;

    fn config() -> SigningConfig {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        let keys = KeyChain::from_files(
            &dir.join("test_key.pem"),
            &dir.join("test_cert.pem"),
            &Ui::default(),
        )
        .unwrap();
        SigningConfig::new(keys)
    }

    fn archive() -> Archive {
        let mut archive = Archive::default();
        archive.entries.push(
            Entry::new_deflated("AndroidManifest.xml", b"<manifest/>", DateTime::default())
                .unwrap(),
        );
        archive.refresh_offsets();
        archive
    }

    #[test]
    fn scheme_selection_parses() {
        assert_eq!("V1".parse::<SchemeSelection>().unwrap(), SchemeSelection::V1);
        assert!("both".parse::<SchemeSelection>().unwrap().v2());
        assert!(matches!(
            "v3".parse::<SchemeSelection>(),
            Err(ApkError::Config(_))
        ));
    }

    #[test]
    fn invalid_signer_name_is_config_error() {
        let config = config().with_signer_name("BAD NAME");
        let err = Signer::new(&Ui::default())
            .sign(&archive(), &config)
            .unwrap_err();
        assert!(matches!(err, ApkError::Config(_)));
    }

    #[test]
    fn schemes_are_applied_in_order() {
        let ui = Ui::default();
        let signed = Signer::new(&ui).sign(&archive(), &config()).unwrap();
        assert_eq!(signed.schemes, vec![SchemeId::JarV1, SchemeId::BlockV2]);
        assert!(signed.archive.signing_block.is_some());
        assert!(signed.archive.has_v1_signature());

        let v2_only = config().with_schemes(SchemeSelection::V2);
        let signed = Signer::new(&ui).sign(&archive(), &v2_only).unwrap();
        assert_eq!(signed.schemes, vec![SchemeId::BlockV2]);
        assert!(!signed.archive.has_v1_signature());
    }

    #[test]
    fn resigning_replaces_previous_signature() {
        let ui = Ui::default();
        let first = Signer::new(&ui).sign(&archive(), &config()).unwrap();
        let second = Signer::new(&ui).sign(&first.archive, &config()).unwrap();
        assert_eq!(first.to_bytes().unwrap(), second.to_bytes().unwrap());
    }
}
