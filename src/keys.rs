// ApkSigneRust - zip alignment and APK signing for Android packages
// Copyright (C) 2026 Tiash H Kabir / @MrCarb0n
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

use crate::{
    error::{ApkError, Result},
    ui::Ui,
};
use ::pem as pem_crate;
use p12_keystore::{KeyStore, KeyStoreEntry};
use ring::{
    rand::SystemRandom,
    signature::{self, EcdsaKeyPair, KeyPair, RsaKeyPair},
};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use x509_parser::prelude::*;
use zip::DateTime;

/// Private key able to produce the signatures Android accepts.
pub enum SigningKey {
    Rsa(RsaKeyPair),
    Ecdsa(EcdsaKeyPair),
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey({})", self.algorithm_name())
    }
}

impl SigningKey {
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            SigningKey::Rsa(_) => "RSA/SHA-256",
            SigningKey::Ecdsa(_) => "ECDSA-P256/SHA-256",
        }
    }

    /// RSASSA-PKCS1-v1_5 or ECDSA (ASN.1 DER signature), both over SHA-256.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let rng = SystemRandom::new();
        match self {
            SigningKey::Rsa(key_pair) => {
                let mut sig = vec![0u8; key_pair.public().modulus_len()];
                key_pair.sign(&signature::RSA_PKCS1_SHA256, &rng, message, &mut sig)?;
                Ok(sig)
            }
            SigningKey::Ecdsa(key_pair) => Ok(key_pair.sign(&rng, message)?.as_ref().to_vec()),
        }
    }

    /// Raw key as it appears inside the certificate's SubjectPublicKeyInfo bit string.
    pub fn public_key_bytes(&self) -> &[u8] {
        match self {
            SigningKey::Rsa(key_pair) => key_pair.public().as_ref(),
            SigningKey::Ecdsa(key_pair) => key_pair.public_key().as_ref(),
        }
    }
}

/// Where the signing key and certificate come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Files {
        private_key: PathBuf,
        certificate: PathBuf,
    },
    Keystore {
        path: PathBuf,
        alias: Option<String>,
        store_password: String,
        key_password: Option<String>,
    },
}

#[derive(Debug)]
pub struct KeyChain {
    pub signing_key: SigningKey,
    /// Leaf first
    chain: Vec<Vec<u8>>,
    cert_not_before: Option<DateTime>,
    subject: String,
}

impl KeyChain {
    pub fn load(source: &KeySource, ui: &Ui) -> Result<Self> {
        match source {
            KeySource::Files {
                private_key,
                certificate,
            } => Self::from_files(private_key, certificate, ui),
            KeySource::Keystore {
                path,
                alias,
                store_password,
                key_password,
            } => Self::from_keystore(
                path,
                alias.as_deref(),
                store_password,
                key_password.as_deref(),
                ui,
            ),
        }
    }

    pub fn from_files(key_path: &Path, cert_path: &Path, ui: &Ui) -> Result<Self> {
        Self::check_key_permissions(key_path, ui)?;
        let key_bytes = fs::read(key_path)?;
        let cert_bytes = fs::read(cert_path)?;
        let chain = parse_certificates(&cert_bytes)?;
        ui.verbose(&format!(
            "Loaded {} certificate(s) from {}",
            chain.len(),
            cert_path.display()
        ));
        let signing_key = Self::parse_private_key(&key_bytes, ui)?;
        Self::from_parts(signing_key, chain, ui)
    }

    /// Opens a PKCS#12 keystore. PKCS#12 protects keys and certificates with a
    /// single password, so a differing key password cannot be honoured.
    pub fn from_keystore(
        path: &Path,
        alias: Option<&str>,
        store_password: &str,
        key_password: Option<&str>,
        ui: &Ui,
    ) -> Result<Self> {
        if key_password.is_some_and(|kp| kp != store_password) {
            return Err(ApkError::InvalidKey(
                "PKCS#12 keystores use one password; the key password must match the store password"
                    .into(),
            ));
        }
        Self::check_key_permissions(path, ui)?;
        let data = fs::read(path)?;
        let store = KeyStore::from_pkcs12(&data, store_password).map_err(|e| {
            ApkError::InvalidKey(format!("cannot open keystore {}: {}", path.display(), e))
        })?;

        let key_chain = match alias {
            Some(alias) => match store.entry(alias) {
                Some(KeyStoreEntry::PrivateKeyChain(chain)) => chain,
                Some(KeyStoreEntry::Certificate(_)) => {
                    return Err(ApkError::InvalidKey(format!(
                        "keystore alias `{}` holds a certificate, not a private key",
                        alias
                    )))
                }
                None => {
                    return Err(ApkError::InvalidKey(format!(
                        "alias `{}` not found in keystore {}",
                        alias,
                        path.display()
                    )))
                }
            },
            None => {
                let (alias, chain) = store.private_key_chain().ok_or_else(|| {
                    ApkError::InvalidKey(format!(
                        "keystore {} holds no private key",
                        path.display()
                    ))
                })?;
                ui.verbose(&format!("Using keystore alias: {}", alias));
                chain
            }
        };

        let chain: Vec<Vec<u8>> = key_chain
            .chain()
            .iter()
            .map(|c| c.as_der().to_vec())
            .collect();
        if chain.is_empty() {
            return Err(ApkError::InvalidKey(
                "keystore entry has no certificate".into(),
            ));
        }
        let signing_key = Self::parse_pkcs8(key_chain.key())?;
        Self::from_parts(signing_key, chain, ui)
    }

    /// Pairs a key with its certificate chain, rejecting a leaf certificate
    /// whose public key is not the key's.
    pub fn from_parts(signing_key: SigningKey, chain: Vec<Vec<u8>>, ui: &Ui) -> Result<Self> {
        let leaf = chain
            .first()
            .ok_or_else(|| ApkError::InvalidKey("no signing certificate supplied".into()))?;
        let (_, cert) = X509Certificate::from_der(leaf)
            .map_err(|e| ApkError::InvalidKey(format!("invalid certificate: {}", e)))?;

        let spki = cert.public_key();
        let expected_oid = match signing_key {
            SigningKey::Rsa(_) => x509_parser::oid_registry::OID_PKCS1_RSAENCRYPTION,
            SigningKey::Ecdsa(_) => x509_parser::oid_registry::OID_KEY_TYPE_EC_PUBLIC_KEY,
        };
        let cert_key: &[u8] = spki.subject_public_key.data.as_ref();
        if spki.algorithm.algorithm != expected_oid || cert_key != signing_key.public_key_bytes() {
            return Err(ApkError::InvalidKey(format!(
                "private key ({}) does not match the public key of certificate `{}`",
                signing_key.algorithm_name(),
                cert.subject()
            )));
        }

        let cert_not_before = Some(Self::asn1_to_zip_datetime(cert.validity().not_before, ui));
        let subject = cert.subject().to_string();
        ui.debug(&format!(
            "Key {} matches certificate `{}`",
            signing_key.algorithm_name(),
            subject
        ));

        Ok(Self {
            signing_key,
            chain,
            cert_not_before,
            subject,
        })
    }

    pub fn certificate(&self) -> &[u8] {
        &self.chain[0]
    }

    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.chain
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Timestamp for generated entries, so re-signing yields identical bytes.
    pub fn get_reproducible_timestamp(&self) -> DateTime {
        if let Some(dt) = &self.cert_not_before {
            return *dt;
        }
        DateTime::from_date_and_time(2008, 1, 1, 0, 0, 0).unwrap_or_default()
    }

    fn parse_private_key(content: &[u8], ui: &Ui) -> Result<SigningKey> {
        let blocks = pem_crate::parse_many(content).unwrap_or_default();
        if blocks.is_empty() {
            ui.debug("Key is not PEM, attempting to parse as binary PK8/DER...");
            return Self::parse_pkcs8(content);
        }
        for block in &blocks {
            match block.tag() {
                "PRIVATE KEY" => return Self::parse_pkcs8(block.contents()),
                "RSA PRIVATE KEY" => {
                    return RsaKeyPair::from_der(block.contents())
                        .map(SigningKey::Rsa)
                        .map_err(|e| {
                            ApkError::InvalidKey(format!("invalid PKCS#1 RSA key: {}", e))
                        })
                }
                "ENCRYPTED PRIVATE KEY" => {
                    return Err(ApkError::InvalidKey(
                        "encrypted PKCS#8 keys are not supported; use a PKCS#12 keystore".into(),
                    ))
                }
                "EC PRIVATE KEY" => {
                    return Err(ApkError::InvalidKey(
                        "SEC1 EC keys are not supported; convert the key to PKCS#8".into(),
                    ))
                }
                other => ui.debug(&format!("Skipping PEM block `{}`", other)),
            }
        }
        Err(ApkError::InvalidKey(
            "no private key block found in PEM input".into(),
        ))
    }

    fn parse_pkcs8(der: &[u8]) -> Result<SigningKey> {
        let rsa_err = match RsaKeyPair::from_pkcs8(der) {
            Ok(key_pair) => return Ok(SigningKey::Rsa(key_pair)),
            Err(e) => e,
        };
        let rng = SystemRandom::new();
        EcdsaKeyPair::from_pkcs8(&signature::ECDSA_P256_SHA256_ASN1_SIGNING, der, &rng)
            .map(SigningKey::Ecdsa)
            .map_err(|ec_err| {
                ApkError::InvalidKey(format!(
                    "unsupported or malformed PKCS#8 key (RSA: {}, ECDSA P-256: {})",
                    rsa_err, ec_err
                ))
            })
    }

    #[cfg(unix)]
    fn check_key_permissions(path: &Path, ui: &Ui) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(path)?;
        let permissions = metadata.permissions().mode();
        if permissions & 0o077 != 0 {
            ui.warn(&format!(
                "Private key '{}' is accessible by others (mode {:o}).",
                path.display(),
                permissions & 0o777
            ));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn check_key_permissions(_path: &Path, _ui: &Ui) -> Result<()> {
        Ok(())
    }

    fn asn1_to_zip_datetime(asn1: ASN1Time, ui: &Ui) -> DateTime {
        let dt = asn1.to_datetime();
        let year = (dt.year().clamp(1980, 2107)) as u16;

        DateTime::from_date_and_time(
            year,
            dt.month() as u8,
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
        )
        .unwrap_or_else(|_| {
            ui.warn("Certificate date does not fit a zip timestamp. Fallback used.");
            DateTime::default()
        })
    }
}

/// All certificates in PEM `CERTIFICATE` blocks, or the input itself as one DER certificate.
pub fn parse_certificates(content: &[u8]) -> Result<Vec<Vec<u8>>> {
    let blocks = pem_crate::parse_many(content).unwrap_or_default();
    let certs: Vec<Vec<u8>> = if blocks.is_empty() {
        vec![content.to_vec()]
    } else {
        blocks
            .into_iter()
            .filter(|b| b.tag() == "CERTIFICATE")
            .map(|b| b.contents().to_vec())
            .collect()
    };
    if certs.is_empty() {
        return Err(ApkError::InvalidKey("no certificate found".into()));
    }
    for der in &certs {
        X509Certificate::from_der(der)
            .map_err(|e| ApkError::InvalidKey(format!("invalid certificate: {}", e)))?;
    }
    Ok(certs)
}

/// Leaf certificate DER from a PEM or DER file.
pub fn load_certificate(path: &Path) -> Result<Vec<u8>> {
    let content = fs::read(path)?;
    let mut certs = parse_certificates(&content)?;
    Ok(certs.swap_remove(0))
}
