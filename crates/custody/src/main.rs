//! Custody - forensic integrity and chain-of-custody tool.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use custody_common::crc32::{crc32_hex, verify_crc32};
use custody_common::hash::{digest_binary, digest_reader, digest_string};
use custody_manifest::{AttachmentSet, ValidationVerdict};
use custody_workflow::{
    read_audit_log, verify_bundle_file, FsBlobStore, ImportReport, JsonlAuditSink, Workflow,
    WorkflowConfig,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "custody")]
#[command(
    author,
    version,
    about = "Seal and verify forensic case exports with tamper-evident manifests"
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Blob store root directory (overrides config)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Audit log file (overrides config)
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,

    /// Examiner name recorded in the audit trail (overrides config)
    #[arg(long, global = true)]
    examiner: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, export and import cases
    #[command(subcommand)]
    Case(CaseCommand),

    /// Record, export and import confirmations
    #[command(subcommand)]
    Confirm(ConfirmCommand),

    /// Validate a case bundle without importing it
    Verify {
        /// Case bundle file path
        #[arg(long)]
        bundle: PathBuf,
    },

    /// Print the SHA-256 digest of a file
    Hash {
        /// File to hash
        #[arg(long)]
        file: PathBuf,

        /// Hash the file as UTF-8 text
        #[arg(long)]
        text: bool,
    },

    /// Print the CRC32 checksum of a file (not an integrity check)
    Checksum {
        /// File to checksum
        #[arg(long)]
        file: PathBuf,

        /// Expected checksum in hex
        #[arg(long)]
        expect_crc: Option<String>,
    },

    /// Show the audit trail
    Audit {
        /// Only show entries for this case
        #[arg(long)]
        case_number: Option<String>,
    },
}

#[derive(Subcommand)]
enum CaseCommand {
    /// Create a case from a directory of images
    Create {
        #[arg(long)]
        case_number: String,

        /// Directory holding the case images
        #[arg(long)]
        images: PathBuf,
    },

    /// Export a case as a sealed bundle
    Export {
        #[arg(long)]
        case_number: String,

        /// Output bundle file path
        #[arg(long, short)]
        out: PathBuf,
    },

    /// Validate and import a case bundle
    Import {
        /// Case bundle file path
        #[arg(long)]
        bundle: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfirmCommand {
    /// Confirm an identification on a case image
    Create {
        #[arg(long)]
        case_number: String,

        /// Image identifier (its file name in the case)
        #[arg(long)]
        image: String,

        #[arg(long)]
        note: Option<String>,
    },

    /// Export a case's confirmations as a sealed package
    Export {
        #[arg(long)]
        case_number: String,

        /// Output package file path
        #[arg(long, short)]
        out: PathBuf,
    },

    /// Validate and import a confirmation package
    Import {
        /// Confirmation package file path
        #[arg(long)]
        package: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    let (plain, json) = if cli.log_json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (
            Some(fmt::layer().with_target(false).with_writer(std::io::stderr)),
            None,
        )
    };
    tracing_subscriber::registry()
        .with(plain)
        .with(json)
        .with(filter)
        .init();

    let config = load_config(&cli)?;
    let format = cli.format;

    match cli.command {
        Commands::Case(command) => {
            let workflow = open_workflow(&config).await?;
            match command {
                CaseCommand::Create {
                    case_number,
                    images,
                } => {
                    let attachments = read_images(&images)?;
                    let data = workflow.create_case(&case_number, attachments).await?;
                    emit(format, &data, |d| {
                        println!("Created case {} with {} images", d.case_number, d.files.len());
                    })?;
                }
                CaseCommand::Export { case_number, out } => {
                    let report = workflow.export_case(&case_number, &out).await?;
                    emit(format, &report, |r| {
                        println!("Exported case {} to {}", r.case_number, r.path.display());
                        println!("  Files:         {}", r.manifest.total_files);
                        println!("  Manifest hash: {}", r.manifest.manifest_hash);
                    })?;
                }
                CaseCommand::Import { bundle } => {
                    let report = workflow.import_case(&bundle).await?;
                    finish_import(format, &report, "case bundle")?;
                }
            }
        }

        Commands::Confirm(command) => {
            let workflow = open_workflow(&config).await?;
            match command {
                ConfirmCommand::Create {
                    case_number,
                    image,
                    note,
                } => {
                    let stored = workflow
                        .create_confirmation(&case_number, &image, note)
                        .await?;
                    emit(format, &stored, |s| {
                        println!(
                            "Confirmation {} recorded for {} in case {}",
                            s.record.confirmation_id, s.record.original_image_id, s.record.case_number
                        );
                    })?;
                }
                ConfirmCommand::Export { case_number, out } => {
                    let report = workflow.export_confirmations(&case_number, &out).await?;
                    emit(format, &report, |r| {
                        println!(
                            "Exported confirmations for case {} to {}",
                            r.case_number,
                            r.path.display()
                        );
                        println!("  Manifest hash: {}", r.manifest.manifest_hash);
                    })?;
                }
                ConfirmCommand::Import { package } => {
                    let report = workflow.import_confirmations(&package).await?;
                    finish_import(format, &report, "confirmation package")?;
                }
            }
        }

        Commands::Verify { bundle } => {
            info!("Verifying bundle: {:?}", bundle);
            let (contents, verdict) = verify_bundle_file(&bundle)?;
            emit(format, &verdict, |v| {
                print_verdict(v);
                for entry in &contents.unrecognized_entries {
                    println!("  Warning: unrecognized entry {}", entry);
                }
            })?;
            if !verdict.is_valid {
                bail!("Bundle failed verification");
            }
        }

        Commands::Hash { file, text } => {
            let digest = if text {
                let content = std::fs::read_to_string(&file)
                    .with_context(|| format!("{} is not readable as UTF-8 text", file.display()))?;
                digest_string(&content)
            } else {
                let reader = std::fs::File::open(&file)
                    .with_context(|| format!("failed to open {}", file.display()))?;
                digest_reader(std::io::BufReader::new(reader))?
            };
            let output = HashOutput {
                file: &file,
                sha256: digest.as_str(),
            };
            emit(format, &output, |o| println!("{}  {}", o.sha256, o.file.display()))?;
        }

        Commands::Checksum { file, expect_crc } => {
            let content = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let output = ChecksumOutput {
                file: &file,
                sha256: digest_binary(&content).into(),
                crc32: crc32_hex(&content),
                matches: expect_crc.as_deref().map(|e| verify_crc32(&content, e)),
            };
            emit(format, &output, |o| {
                println!("{}  {}", o.crc32, o.file.display());
                println!("  SHA-256: {}", o.sha256);
                println!("  CRC32 detects accidental corruption only and is not a forensic check.");
            })?;
            if output.matches == Some(false) {
                bail!("CRC32 mismatch for {}", file.display());
            }
        }

        Commands::Audit { case_number } => {
            let log = read_audit_log(&config.audit_log_path()).await?;
            let entries: Vec<_> = match &case_number {
                Some(case_number) => log.for_case(case_number).collect(),
                None => log.entries().iter().collect(),
            };
            emit(format, &entries, |entries| {
                for e in entries {
                    println!(
                        "#{:<4} {} {:<20} {:<9} {} {}",
                        e.seq,
                        e.started_at.to_rfc3339(),
                        e.action.to_string(),
                        format!("{:?}", e.result).to_lowercase(),
                        e.user,
                        e.case_number.as_deref().unwrap_or("-"),
                    );
                    if let Some(error) = &e.error {
                        println!("      error: {}", error);
                    }
                }
            })?;
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct HashOutput<'a> {
    file: &'a Path,
    sha256: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChecksumOutput<'a> {
    file: &'a Path,
    sha256: String,
    crc32: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    matches: Option<bool>,
}

fn load_config(cli: &Cli) -> anyhow::Result<WorkflowConfig> {
    let mut config = match &cli.config {
        Some(path) => WorkflowConfig::load(path)?,
        None => WorkflowConfig::default(),
    };
    if let Some(store) = &cli.store {
        config.store_root = store.clone();
    }
    if let Some(audit_log) = &cli.audit_log {
        config.audit_log = Some(audit_log.clone());
    }
    if let Some(examiner) = &cli.examiner {
        config.examiner = examiner.clone();
    }
    config.validate()?;
    debug!("Using configuration: {:?}", config);
    Ok(config)
}

async fn open_workflow(config: &WorkflowConfig) -> anyhow::Result<Workflow> {
    let store = Arc::new(FsBlobStore::new(&config.store_root));
    let sink = Arc::new(JsonlAuditSink::open(config.audit_log_path()).await?);
    Ok(Workflow::new(store, sink, &config.examiner))
}

/// Read every regular file in a directory as a case image.
fn read_images(dir: &Path) -> anyhow::Result<AttachmentSet> {
    let mut images = AttachmentSet::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read image directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry
            .file_name()
            .into_string()
            .map_err(|n| anyhow::anyhow!("image file name {:?} is not valid UTF-8", n))?;
        let content = std::fs::read(entry.path())?;
        debug!("Read image {} ({} bytes)", name, content.len());
        images.insert(name, content);
    }
    Ok(images)
}

fn emit<T: Serialize + ?Sized>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(&T),
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(value),
    }
    Ok(())
}

fn print_verdict(verdict: &ValidationVerdict) {
    println!("{}", verdict.summary);
    for error in &verdict.errors {
        println!("  - {}", error);
    }
}

fn finish_import(format: OutputFormat, report: &ImportReport, what: &str) -> anyhow::Result<()> {
    emit(format, report, |r| {
        print_verdict(&r.verdict);
        if r.accepted {
            println!(
                "Imported {} for case {} ({} items)",
                what,
                r.case_number.as_deref().unwrap_or("-"),
                r.items_written
            );
        }
        for warning in &r.warnings {
            println!("  Warning: {}", warning);
        }
    })?;
    if !report.accepted {
        bail!("Rejected {}: integrity validation failed", what);
    }
    Ok(())
}
