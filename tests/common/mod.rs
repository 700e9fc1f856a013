#![allow(dead_code)]

use apksignerust::{keys::KeyChain, ui::Ui};
use std::{
    io::{Cursor, Read, Write},
    path::PathBuf,
};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

pub const BLOB_NAME: &str = "res/raw/blob.db";
pub const BLOB: &[u8] = b"stored resource payload that must stay byte-exact";
pub const LIB_NAME: &str = "lib/arm64-v8a/libnative.so";

pub fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn options(method: CompressionMethod) -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(method)
}

/// A small unsigned APK whose first stored entry is off every even boundary.
pub fn build_apk(with_lib: bool) -> Vec<u8> {
    let mut w = ZipWriter::new(Cursor::new(Vec::new()));
    w.start_file(BLOB_NAME, options(CompressionMethod::Stored))
        .unwrap();
    w.write_all(BLOB).unwrap();
    w.start_file("AndroidManifest.xml", options(CompressionMethod::Deflated))
        .unwrap();
    w.write_all(b"<manifest package=\"com.example.app\"/>").unwrap();
    w.start_file("resources.arsc", options(CompressionMethod::Stored))
        .unwrap();
    w.write_all(&[0x02, 0x00, 0x0c, 0x00, 0x41]).unwrap();
    w.start_file("classes.dex", options(CompressionMethod::Deflated))
        .unwrap();
    w.write_all(&b"dex\n035\0".repeat(64)).unwrap();
    if with_lib {
        w.start_file(LIB_NAME, options(CompressionMethod::Stored))
            .unwrap();
        w.write_all(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]).unwrap();
    }
    w.finish().unwrap().into_inner()
}

/// The three-entry APK of the end-to-end pipeline.
pub fn build_minimal_apk() -> Vec<u8> {
    let mut w = ZipWriter::new(Cursor::new(Vec::new()));
    w.start_file("AndroidManifest.xml", options(CompressionMethod::Deflated))
        .unwrap();
    w.write_all(b"<manifest/>").unwrap();
    w.start_file("classes.dex", options(CompressionMethod::Deflated))
        .unwrap();
    w.write_all(b"dex\n035\0").unwrap();
    w.start_file("resources.arsc", options(CompressionMethod::Stored))
        .unwrap();
    w.write_all(b"arsc").unwrap();
    w.finish().unwrap().into_inner()
}

/// An APK re-signed by jarsigner: its manifest comes first and the stored
/// resource table after it is already 4-byte aligned.
pub fn build_jarsigned_layout_apk() -> Vec<u8> {
    let mut w = ZipWriter::new(Cursor::new(Vec::new()));
    w.start_file("META-INF/MANIFEST.MF", options(CompressionMethod::Deflated))
        .unwrap();
    w.write_all(b"Manifest-Version: 1.0\r\nCreated-By: 1.8 (Oracle)\r\n\r\n")
        .unwrap();
    w.start_file(
        "resources.arsc",
        options(CompressionMethod::Stored).with_alignment(4),
    )
    .unwrap();
    w.write_all(&[0x02, 0x00, 0x0c, 0x00, 0x41, 0x42, 0x43]).unwrap();
    w.start_file("classes.dex", options(CompressionMethod::Deflated))
        .unwrap();
    w.write_all(b"dex\n035\0").unwrap();
    w.finish().unwrap().into_inner()
}

/// An APK with a non-ASCII name whose second UTF-8 byte falls on column 73
/// of its `Name:` manifest line.
pub const WIDE_NAME: &str = "assets/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaé.txt";

pub fn build_apk_with_wide_name() -> Vec<u8> {
    let mut w = ZipWriter::new(Cursor::new(Vec::new()));
    w.start_file("AndroidManifest.xml", options(CompressionMethod::Deflated))
        .unwrap();
    w.write_all(b"<manifest/>").unwrap();
    w.start_file(WIDE_NAME, options(CompressionMethod::Deflated))
        .unwrap();
    w.write_all(b"accented").unwrap();
    w.finish().unwrap().into_inner()
}

pub fn read_entry(bytes: &[u8], name: &str) -> Vec<u8> {
    let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut file = zip.by_name(name).unwrap();
    let mut out = Vec::new();
    file.read_to_end(&mut out).unwrap();
    out
}

/// `(name, crc32, content)` of every entry, in archive order.
pub fn contents(bytes: &[u8]) -> Vec<(String, u32, Vec<u8>)> {
    let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..zip.len())
        .map(|i| {
            let mut file = zip.by_index(i).unwrap();
            let mut out = Vec::new();
            file.read_to_end(&mut out).unwrap();
            (file.name().to_string(), file.crc32(), out)
        })
        .collect()
}

pub fn rsa_keys() -> KeyChain {
    KeyChain::from_files(
        &fixtures().join("test_key.pem"),
        &fixtures().join("test_cert.pem"),
        &Ui::default(),
    )
    .unwrap()
}

pub fn other_keys() -> KeyChain {
    KeyChain::from_files(
        &fixtures().join("other_key.pem"),
        &fixtures().join("other_cert.pem"),
        &Ui::default(),
    )
    .unwrap()
}

pub fn ec_keys() -> KeyChain {
    KeyChain::from_files(
        &fixtures().join("ec_key.pem"),
        &fixtures().join("ec_cert.pem"),
        &Ui::default(),
    )
    .unwrap()
}

pub fn keystore_keys() -> KeyChain {
    KeyChain::from_keystore(
        &fixtures().join("test_keystore.p12"),
        Some("testkey"),
        "changeme",
        None,
        &Ui::default(),
    )
    .unwrap()
}
