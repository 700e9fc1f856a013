/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! PKCS#7 SignedData for the v1 signature block file (`CERT.RSA` / `CERT.EC`).

use crate::{
    crypto::{CryptoEngine, DigestAlgorithm},
    error::{ApkError, Result},
    keys::{KeyChain, SigningKey},
};
use ring::{digest, signature};
use simple_asn1::{ASN1Block, ASN1Class, BigInt, BigUint};
use x509_parser::prelude::*;

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;
const TAG_CONTEXT_0: u8 = 0xa0;
const TAG_CONTEXT_1: u8 = 0xa1;

const OID_SIGNED_DATA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];
const OID_SHA1: &[u8] = &[0x2b, 0x0e, 0x03, 0x02, 0x1a];
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
const OID_RSA_ENCRYPTION: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];
const OID_SHA1_WITH_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x05];
const OID_SHA256_WITH_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b];
const OID_EC_PUBLIC_KEY: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
const OID_ECDSA_WITH_SHA256: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];
const OID_MESSAGE_DIGEST: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x04];

/// File extension of the signature block for the given key type.
pub fn block_extension(key: &SigningKey) -> &'static str {
    match key {
        SigningKey::Rsa(_) => "RSA",
        SigningKey::Ecdsa(_) => "EC",
    }
}

/// Detached PKCS#7 SignedData over `sf`, carrying the whole certificate
/// chain and a single signer without authenticated attributes.
pub fn gen_signature_block(keys: &KeyChain, sf: &[u8]) -> Result<Vec<u8>> {
    let signature_bytes = keys.signing_key.sign(sf)?;

    let (_, cert) = X509Certificate::from_der(keys.certificate())
        .map_err(|e| ApkError::InvalidKey(format!("failed to parse cert for PKCS#7: {}", e)))?;

    // The issuer is spliced in as-is so its string types survive re-encoding.
    let issuer = DerReader::new(cert.tbs_certificate.issuer.as_raw()).expect(TAG_SEQUENCE)?;
    let serial = BigInt::from_signed_bytes_be(cert.tbs_certificate.raw_serial());

    let oid_signed_data = simple_asn1::oid!(1, 2, 840, 113549, 1, 7, 2);
    let oid_data = simple_asn1::oid!(1, 2, 840, 113549, 1, 7, 1);
    let oid_sha256 = simple_asn1::oid!(2, 16, 840, 1, 101, 3, 4, 2, 1);

    let sha256_alg = ASN1Block::Sequence(
        0,
        vec![
            ASN1Block::ObjectIdentifier(0, oid_sha256),
            ASN1Block::Null(0),
        ],
    );
    let signature_alg = match keys.signing_key {
        SigningKey::Rsa(_) => ASN1Block::Sequence(
            0,
            vec![
                ASN1Block::ObjectIdentifier(0, simple_asn1::oid!(1, 2, 840, 113549, 1, 1, 1)),
                ASN1Block::Null(0),
            ],
        ),
        SigningKey::Ecdsa(_) => ASN1Block::Sequence(
            0,
            vec![ASN1Block::ObjectIdentifier(
                0,
                simple_asn1::oid!(1, 2, 840, 10045, 4, 3, 2),
            )],
        ),
    };

    let certificates: Vec<u8> = keys.certificates().concat();

    let signer_info = ASN1Block::Sequence(
        0,
        vec![
            ASN1Block::Integer(0, BigInt::from(1u32)),
            ASN1Block::Sequence(
                0,
                vec![
                    ASN1Block::Unknown(
                        ASN1Class::Universal,
                        true,
                        0,
                        BigUint::from(16u32),
                        issuer.content.to_vec(),
                    ),
                    ASN1Block::Integer(0, serial),
                ],
            ),
            sha256_alg.clone(),
            signature_alg,
            ASN1Block::OctetString(0, signature_bytes),
        ],
    );

    let signed_data = vec![
        ASN1Block::Integer(0, BigInt::from(1u32)),
        ASN1Block::Set(0, vec![sha256_alg]),
        ASN1Block::Sequence(0, vec![ASN1Block::ObjectIdentifier(0, oid_data)]),
        // certificates [0] IMPLICIT SET OF Certificate
        ASN1Block::Unknown(
            ASN1Class::ContextSpecific,
            true,
            0,
            BigUint::from(0u32),
            certificates,
        ),
        ASN1Block::Set(0, vec![signer_info]),
    ];

    let content_info = vec![
        ASN1Block::ObjectIdentifier(0, oid_signed_data),
        ASN1Block::Explicit(
            ASN1Class::ContextSpecific,
            0,
            BigUint::from(0u32),
            Box::new(ASN1Block::Sequence(0, signed_data)),
        ),
    ];

    simple_asn1::to_der(&ASN1Block::Sequence(0, content_info))
        .map_err(|e| ApkError::Validation(format!("ASN.1 encode error: {}", e)))
}

/// One `SignerInfo` of a parsed SignedData.
#[derive(Debug, Clone)]
pub struct SignerInfo {
    /// Issuer `Name`, full DER.
    pub issuer: Vec<u8>,
    /// Serial number `INTEGER` content octets.
    pub serial: Vec<u8>,
    pub digest_oid: Vec<u8>,
    pub signature_oid: Vec<u8>,
    /// Authenticated attributes re-tagged as a `SET OF`, which is what gets signed.
    pub signed_attributes: Option<Vec<u8>>,
    pub message_digest: Option<Vec<u8>>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SignatureBlock {
    pub certificates: Vec<Vec<u8>>,
    pub signers: Vec<SignerInfo>,
}

impl SignatureBlock {
    pub fn parse(der: &[u8]) -> Result<Self> {
        let outer = DerReader::new(der).expect(TAG_SEQUENCE)?;
        let mut content_info = DerReader::new(outer.content);
        if content_info.expect(TAG_OID)?.content != OID_SIGNED_DATA {
            return Err(invalid("content type is not signedData"));
        }
        let explicit = content_info.expect(TAG_CONTEXT_0)?;
        let signed_data = DerReader::new(explicit.content).expect(TAG_SEQUENCE)?;

        let mut r = DerReader::new(signed_data.content);
        r.expect(TAG_INTEGER)?;
        r.expect(TAG_SET)?;
        r.expect(TAG_SEQUENCE)?;

        let mut certificates = Vec::new();
        if r.peek_tag() == Some(TAG_CONTEXT_0) {
            let mut certs = DerReader::new(r.read()?.content);
            while !certs.is_empty() {
                certificates.push(certs.read()?.raw.to_vec());
            }
        }
        if r.peek_tag() == Some(TAG_CONTEXT_1) {
            r.read()?;
        }

        let mut signer_infos = DerReader::new(r.expect(TAG_SET)?.content);
        let mut signers = Vec::new();
        while !signer_infos.is_empty() {
            signers.push(parse_signer_info(signer_infos.expect(TAG_SEQUENCE)?.content)?);
        }
        if signers.is_empty() {
            return Err(invalid("no signer infos"));
        }

        Ok(Self {
            certificates,
            signers,
        })
    }

    /// Verifies the first signer over `content` and returns its certificate.
    pub fn verify(&self, content: &[u8]) -> Result<Vec<u8>> {
        let signer = &self.signers[0];
        let cert_der = self
            .certificates
            .iter()
            .find(|der| {
                X509Certificate::from_der(der).is_ok_and(|(_, cert)| {
                    cert.tbs_certificate.issuer.as_raw() == signer.issuer.as_slice()
                        && cert.tbs_certificate.raw_serial() == signer.serial.as_slice()
                })
            })
            .ok_or_else(|| invalid("signer certificate not included"))?;
        let (_, cert) = X509Certificate::from_der(cert_der)
            .map_err(|e| ApkError::Validation(format!("invalid signer certificate: {}", e)))?;

        let digest_alg = match signer.digest_oid.as_slice() {
            OID_SHA256 => DigestAlgorithm::Sha256,
            OID_SHA1 => DigestAlgorithm::Sha1,
            _ => return Err(invalid("unsupported digest algorithm")),
        };

        let signed = match (&signer.signed_attributes, &signer.message_digest) {
            (Some(attrs), Some(expected)) => {
                let actual = digest::digest(digest_alg.ring_algorithm(), content);
                if actual.as_ref() != expected.as_slice() {
                    return Err(ApkError::Validation(
                        "signature file does not match the signed messageDigest".into(),
                    ));
                }
                attrs.as_slice()
            }
            (Some(_), None) => return Err(invalid("signed attributes without messageDigest")),
            (None, _) => content,
        };

        let algorithm = verification_algorithm(&signer.signature_oid, digest_alg)?;
        let public_key = cert.public_key().subject_public_key.data.as_ref();
        signature::UnparsedPublicKey::new(algorithm, public_key)
            .verify(signed, &signer.signature)
            .map_err(|_| {
                ApkError::Validation(format!(
                    "signature by `{}` does not verify",
                    cert.subject()
                ))
            })?;
        Ok(cert_der.clone())
    }

    /// Digest of the signing certificate, for reporting.
    pub fn certificate_fingerprint(cert_der: &[u8]) -> String {
        CryptoEngine::sha256(cert_der)
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

fn verification_algorithm(
    signature_oid: &[u8],
    digest_alg: DigestAlgorithm,
) -> Result<&'static dyn signature::VerificationAlgorithm> {
    match (signature_oid, digest_alg) {
        (OID_RSA_ENCRYPTION, DigestAlgorithm::Sha256) | (OID_SHA256_WITH_RSA, _) => {
            Ok(&signature::RSA_PKCS1_2048_8192_SHA256)
        }
        (OID_RSA_ENCRYPTION, DigestAlgorithm::Sha1) | (OID_SHA1_WITH_RSA, _) => {
            Ok(&signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY)
        }
        (OID_EC_PUBLIC_KEY, DigestAlgorithm::Sha256) | (OID_ECDSA_WITH_SHA256, _) => {
            Ok(&signature::ECDSA_P256_SHA256_ASN1)
        }
        _ => Err(invalid("unsupported signature algorithm")),
    }
}

fn parse_signer_info(der: &[u8]) -> Result<SignerInfo> {
    let mut r = DerReader::new(der);
    r.expect(TAG_INTEGER)?;
    let mut sid = DerReader::new(r.expect(TAG_SEQUENCE)?.content);
    let issuer = sid.expect(TAG_SEQUENCE)?.raw.to_vec();
    let serial = sid.expect(TAG_INTEGER)?.content.to_vec();
    let digest_oid = algorithm_oid(r.expect(TAG_SEQUENCE)?.content)?;

    let mut signed_attributes = None;
    let mut message_digest = None;
    if r.peek_tag() == Some(TAG_CONTEXT_0) {
        let attrs = r.read()?;
        let mut retagged = attrs.raw.to_vec();
        retagged[0] = TAG_SET;
        signed_attributes = Some(retagged);

        let mut list = DerReader::new(attrs.content);
        while !list.is_empty() {
            let mut attr = DerReader::new(list.expect(TAG_SEQUENCE)?.content);
            let oid = attr.expect(TAG_OID)?;
            if oid.content == OID_MESSAGE_DIGEST {
                let mut values = DerReader::new(attr.expect(TAG_SET)?.content);
                message_digest = Some(values.expect(TAG_OCTET_STRING)?.content.to_vec());
            }
        }
    }

    let signature_oid = algorithm_oid(r.expect(TAG_SEQUENCE)?.content)?;
    let signature = r.expect(TAG_OCTET_STRING)?.content.to_vec();

    Ok(SignerInfo {
        issuer,
        serial,
        digest_oid,
        signature_oid,
        signed_attributes,
        message_digest,
        signature,
    })
}

fn algorithm_oid(algorithm_identifier: &[u8]) -> Result<Vec<u8>> {
    Ok(DerReader::new(algorithm_identifier)
        .expect(TAG_OID)?
        .content
        .to_vec())
}

fn invalid(msg: &str) -> ApkError {
    ApkError::Validation(format!("invalid PKCS#7 signature block: {}", msg))
}

struct Tlv<'a> {
    tag: u8,
    content: &'a [u8],
    raw: &'a [u8],
}

/// Minimal DER walker; definite lengths and low tag numbers only.
struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn read(&mut self) -> Result<Tlv<'a>> {
        let start = self.pos;
        let tag = self.byte()?;
        if tag & 0x1f == 0x1f {
            return Err(invalid("high tag numbers are not supported"));
        }
        let first = self.byte()?;
        let len = match first {
            0x00..=0x7f => first as usize,
            0x81..=0x84 => {
                let mut len = 0usize;
                for _ in 0..(first & 0x7f) {
                    len = (len << 8) | self.byte()? as usize;
                }
                len
            }
            _ => return Err(invalid("unsupported length encoding")),
        };
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| invalid("truncated element"))?;
        let content = &self.data[self.pos..end];
        self.pos = end;
        Ok(Tlv {
            tag,
            content,
            raw: &self.data[start..end],
        })
    }

    fn expect(&mut self, tag: u8) -> Result<Tlv<'a>> {
        let tlv = self.read()?;
        if tlv.tag != tag {
            return Err(invalid(&format!(
                "expected tag {:#04x}, found {:#04x}",
                tag, tlv.tag
            )));
        }
        Ok(tlv)
    }

    fn byte(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| invalid("unexpected end of data"))?;
        self.pos += 1;
        Ok(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::Ui;
    use std::path::{Path, PathBuf};

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    fn keys(key: &str, cert: &str) -> KeyChain {
        KeyChain::from_files(
            &fixture(key),
            &fixture(cert),
            &Ui::new(false, false, false, true, false),
        )
        .unwrap()
    }

    #[test]
    fn rsa_block_round_trips_through_parser() {
        let keys = keys("test_key.pem", "test_cert.pem");
        let sf = b"Signature-Version: 1.0\r\n\r\n";
        let block = gen_signature_block(&keys, sf).unwrap();

        let parsed = SignatureBlock::parse(&block).unwrap();
        assert_eq!(parsed.certificates, vec![keys.certificate().to_vec()]);
        assert_eq!(parsed.signers.len(), 1);
        assert!(parsed.signers[0].signed_attributes.is_none());
        assert_eq!(parsed.signers[0].signature_oid, OID_RSA_ENCRYPTION);

        assert_eq!(parsed.verify(sf).unwrap(), keys.certificate());
        assert!(matches!(
            parsed.verify(b"Signature-Version: 2.0\r\n\r\n"),
            Err(ApkError::Validation(_))
        ));
    }

    #[test]
    fn ec_block_uses_ecdsa_algorithm() {
        let keys = keys("ec_key.pem", "ec_cert.pem");
        assert_eq!(block_extension(&keys.signing_key), "EC");
        let block = gen_signature_block(&keys, b"sf").unwrap();
        let parsed = SignatureBlock::parse(&block).unwrap();
        assert_eq!(parsed.signers[0].signature_oid, OID_ECDSA_WITH_SHA256);
        parsed.verify(b"sf").unwrap();
    }

    #[test]
    fn signed_attributes_are_checked() {
        let sf = std::fs::read(fixture("attrs.sf")).unwrap();
        let block = std::fs::read(fixture("attrs.p7s")).unwrap();
        let parsed = SignatureBlock::parse(&block).unwrap();

        let signer = &parsed.signers[0];
        assert_eq!(signer.signed_attributes.as_ref().map(|a| a[0]), Some(TAG_SET));
        assert_eq!(
            signer.message_digest.as_deref(),
            Some(&CryptoEngine::sha256(&sf)[..])
        );
        parsed.verify(&sf).unwrap();

        let mut tampered = sf.clone();
        tampered.push(b'x');
        assert!(parsed.verify(&tampered).is_err());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let keys = keys("test_key.pem", "test_cert.pem");
        let block = gen_signature_block(&keys, b"sf").unwrap();
        assert!(SignatureBlock::parse(&block[..block.len() - 10]).is_err());
        assert!(SignatureBlock::parse(&[0x30, 0x85, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn long_form_lengths() {
        let mut data = vec![0x04, 0x82, 0x01, 0x00];
        data.extend(std::iter::repeat(7u8).take(256));
        let tlv = DerReader::new(&data).expect(TAG_OCTET_STRING).unwrap();
        assert_eq!(tlv.content.len(), 256);
        assert_eq!(tlv.raw.len(), 260);
    }
}
