/*
 * ApkSigneRust v1.0.0
 * Copyright (c) 2026 Tiash H Kabir / @MrCarb0n.
 * Licensed under the MIT License.
 */

use crate::{
    align::Aligner,
    config::{Config, Mode},
    error::Result,
    keys::load_certificate,
    pkcs7::SignatureBlock,
    processor::{ArtifactProcessor, Destination},
    signing::SchemeId,
    ui::Ui,
    verification::{ArtifactVerifier, VerificationReport},
    *,
};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

fn input_arg() -> Arg {
    Arg::new("input")
        .required(true)
        .help("Path to the input APK (- for stdin)")
        .index(1)
}

fn output_args() -> [Arg; 3] {
    [
        Arg::new("output")
            .help("Where to write the result (- for stdout, optional)")
            .index(2),
        Arg::new("overwrite")
            .short('f')
            .long("overwrite")
            .action(ArgAction::SetTrue)
            .help("Force overwrite if output exists"),
        Arg::new("inplace")
            .short('i')
            .long("inplace")
            .action(ArgAction::SetTrue)
            .help("Replace the input file with the result"),
    ]
}

fn align_args() -> [Arg; 2] {
    [
        Arg::new("alignment")
            .short('a')
            .long("alignment")
            .value_parser(value_parser!(u32))
            .help("Boundary for stored entries in bytes (default 4)"),
        Arg::new("page_align")
            .short('p')
            .long("page-align")
            .action(ArgAction::SetTrue)
            .help("Align stored lib/**.so files to 16 KiB pages"),
    ]
}

fn key_args() -> [Arg; 6] {
    [
        Arg::new("private_key")
            .short('k')
            .long("private-key")
            .help("Private key (PKCS#8 PEM/DER or PKCS#1 PEM)"),
        Arg::new("cert")
            .short('c')
            .long("cert")
            .help("Certificate chain (PEM or DER)"),
        Arg::new("keystore")
            .short('K')
            .long("keystore")
            .help("PKCS#12 keystore instead of key and certificate files"),
        Arg::new("alias")
            .long("alias")
            .help("Keystore entry to sign with (default: first key entry)"),
        Arg::new("store_pass")
            .long("store-pass")
            .help("Keystore password"),
        Arg::new("key_pass")
            .long("key-pass")
            .help("Key password (must match the store password for PKCS#12)"),
    ]
}

fn scheme_args() -> [Arg; 2] {
    [
        Arg::new("scheme")
            .long("scheme")
            .value_parser(["v1", "v2", "both"])
            .help("Signature schemes to apply (default: both)"),
        Arg::new("v1_digest")
            .long("v1-digest")
            .value_parser(["sha256", "sha1"])
            .help("Digest for MANIFEST.MF and .SF entries (default: sha256); the PKCS#7 block is always SHA-256"),
    ]
}

pub fn build_command() -> Command {
    Command::new(APP_NAME)
        .bin_name(APP_BIN_NAME)
        .version(APP_VERSION)
        .author(APP_AUTHOR)
        .about(APP_ABOUT)
        .disable_version_flag(true)
        .help_template("{about-with-newline}{usage-heading} {usage}\n\n{all-args}\n")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("align")
                .about("Zip-align an unsigned APK")
                .arg_required_else_help(true)
                .arg(input_arg())
                .args(output_args())
                .args(align_args())
                .arg(
                    Arg::new("check")
                        .long("check")
                        .action(ArgAction::SetTrue)
                        .help("Only check alignment, write nothing"),
                ),
        )
        .subcommand(
            Command::new("sign")
                .about("Sign an APK with v1 and/or v2 signatures")
                .arg_required_else_help(true)
                .arg(input_arg())
                .args(output_args())
                .args(key_args())
                .args(scheme_args()),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify the signatures of an APK")
                .arg_required_else_help(true)
                .arg(input_arg())
                .arg(
                    Arg::new("cert")
                        .short('c')
                        .long("cert")
                        .help("Require the APK to be signed with this certificate"),
                ),
        )
        .subcommand(
            Command::new("process")
                .about("Patch, align and sign an APK in one pass")
                .arg_required_else_help(true)
                .arg(input_arg())
                .args(output_args())
                .args(key_args())
                .args(align_args())
                .arg(
                    Arg::new("replace")
                        .short('r')
                        .long("replace")
                        .action(ArgAction::Append)
                        .value_name("NAME=PATH")
                        .help("Replace or add an entry (repeatable)"),
                )
                .args(scheme_args()),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::Count)
                .help("Set verbosity level (-v for verbose, -vv for more verbose, -vvv for debug)"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Suppress all output except errors"),
        )
        .arg(
            Arg::new("version_custom")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print version information"),
        )
}

pub fn run() -> Result<()> {
    let matches = build_command().get_matches();

    if matches.get_flag("version_custom") {
        let mut ui = Ui::new(false, false, false, false, true);
        ui.enable_colors_if_supported();
        ui.print_version_info();
        return Ok(());
    }

    execute(&matches)
}

/// Runs the subcommand in `matches`.
pub fn execute(matches: &ArgMatches) -> Result<()> {
    let scoped = matches.subcommand().map(|(_, sub)| sub).unwrap_or(matches);
    let verbosity_level = scoped.get_count("verbose");
    let quiet = scoped.get_flag("quiet");
    let mut ui = Ui::from_verbosity_level(verbosity_level, quiet, true);

    // Enable colors if supported on the platform
    ui.enable_colors_if_supported();

    ui.print_banner();

    let config = Config::from_matches(matches, &ui)?;
    run_logic(&config, &ui)
}

fn run_logic(config: &Config, ui: &Ui) -> Result<()> {
    match &config.mode {
        Mode::Align { options, check } => {
            let aligner = Aligner::new(*options)?;
            if *check {
                ui.print_mode_header("ALIGNMENT CHECK");
                ui.info(&format!("Checking: {}", config.source.describe()));
                let checked = ArtifactProcessor::check_file(&config.source, &aligner, ui)?;
                ui.success("Archive is aligned.");
                ui.print_summary(
                    "Alignment Report",
                    &[
                        ("Status", "Aligned".to_string()),
                        ("Boundary", options.alignment.to_string()),
                        ("Stored", checked.to_string()),
                    ],
                );
                return Ok(());
            }

            let destination = output_of(config)?;
            ui.print_mode_header("ALIGNMENT MODE");
            ui.info(&format!("Source: {}", config.source.describe()));
            ui.info(&format!("Target: {}", destination.describe()));
            let report =
                ArtifactProcessor::align_file(&config.source, destination, &aligner, ui)?;
            ui.success("Archive successfully aligned.");
            ui.print_summary(
                "Alignment Report",
                &[
                    ("Status", "Success".to_string()),
                    ("Mode", mode_label(config)),
                    ("Output", destination.describe()),
                    ("Entries", report.entries.to_string()),
                    ("Padded", report.padded.to_string()),
                ],
            );
        }
        Mode::Sign { .. } => {
            let destination = output_of(config)?;
            ui.info("Loading keys...");
            let signing = config.signing_config(ui)?;

            ui.print_mode_header("SIGNING MODE");
            ui.info(&format!("Source: {}", config.source.describe()));
            ui.info(&format!("Target: {}", destination.describe()));
            let (schemes, report) =
                ArtifactProcessor::sign_file(&config.source, destination, &signing, ui)?;
            ui.success("Archive successfully signed.");
            ui.print_summary(
                "Signing Report",
                &[
                    ("Status", "Success".to_string()),
                    ("Mode", mode_label(config)),
                    ("Output", destination.describe()),
                    ("Schemes", schemes_label(&schemes)),
                    ("Signer", signing.key_chain.subject().to_string()),
                    ("SHA-256", fingerprint(&report)),
                ],
            );
        }
        Mode::Verify { certificate } => {
            ui.print_mode_header("VERIFICATION MODE");
            ui.info(&format!("Verifying integrity: {}", config.source.describe()));
            let expected = certificate
                .as_deref()
                .map(load_certificate)
                .transpose()?;
            if let Some(path) = certificate {
                ui.verbose(&format!("Pinned certificate: {}", path.display()));
            }

            let bytes = config.source.read()?;
            let report = ArtifactVerifier::verify(&bytes, expected.as_deref(), ui)?;
            ui.success(&format!(
                "Signature valid ({}). Artifact authentic.",
                schemes_label(&report.schemes)
            ));
            ui.print_summary(
                "Verification Report",
                &[
                    ("Status", "Verified".to_string()),
                    ("Schemes", schemes_label(&report.schemes)),
                    ("Entries", report.v1_entries.to_string()),
                    ("SHA-256", fingerprint(&report)),
                ],
            );
        }
        Mode::Process {
            options,
            replacements,
            ..
        } => {
            let destination = output_of(config)?;
            let aligner = Aligner::new(*options)?;
            ui.info("Loading keys...");
            let signing = config.signing_config(ui)?;

            ui.print_mode_header("PROCESSING MODE");
            ui.info(&format!("Source: {}", config.source.describe()));
            ui.info(&format!("Target: {}", destination.describe()));
            let report = ArtifactProcessor::process_file(
                &config.source,
                destination,
                replacements,
                &aligner,
                &signing,
                ui,
            )?;
            ui.success("Archive successfully aligned and signed.");
            ui.print_summary(
                "Processing Report",
                &[
                    ("Status", "Success".to_string()),
                    ("Mode", mode_label(config)),
                    ("Output", destination.describe()),
                    ("Replaced", report.replaced.to_string()),
                    ("Padded", report.align.padded.to_string()),
                    ("Schemes", schemes_label(&report.schemes)),
                    ("Size", format!("{} bytes", report.output_len)),
                    ("SHA-256", fingerprint(&report.verification)),
                ],
            );
        }
    }
    Ok(())
}

fn output_of(config: &Config) -> Result<&Destination> {
    config
        .destination
        .as_ref()
        .ok_or_else(|| error::ApkError::Config("No output configured".into()))
}

fn mode_label(config: &Config) -> String {
    if config.inplace {
        "In-Place".to_string()
    } else {
        "Standard".to_string()
    }
}

fn schemes_label(schemes: &[SchemeId]) -> String {
    schemes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn fingerprint(report: &VerificationReport) -> String {
    report
        .certificates()
        .next()
        .map(SignatureBlock::certificate_fingerprint)
        .unwrap_or_else(|| "-".to_string())
}
