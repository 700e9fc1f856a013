/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

//! # ApkSigneRust Library
//!
//! Zip alignment and v1 (JAR) / v2 (APK Signing Block) signing for Android
//! packages. The pipeline is patch, then [`align::Aligner`], then
//! [`signing::Signer`], with [`verification::ArtifactVerifier`] checking the
//! result. It provides the core functionality for the `apksignerust`
//! command-line tool.

pub mod align;
pub mod archive;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod jar;
pub mod keys;
pub mod manifest;
pub mod patch;
pub mod pkcs7;
pub mod processor;
pub mod sigblock;
pub mod signing;
pub mod ui;
pub mod verification;

pub use cli::{build_command, execute};

pub const APP_NAME: &str = "ApkSigneRust";
pub const APP_BIN_NAME: &str = "apksignerust";
pub const APP_VERSION: &str = "1.0.0";
pub const APP_AUTHOR: &str = "Tiash H Kabir / @MrCarb0n";
pub const APP_ABOUT: &str =
    "Zip alignment and v1/v2 signing for Android APK packages.";
pub const BUFFER_SIZE: usize = 64 * 1024;

pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";
