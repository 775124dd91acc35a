//! Command-line interface for attachment archive inspection.
//!
//! This CLI tool inspects files as if they were mail attachments: it lists
//! the members of (nested) archives and applies the configured policy.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use unpacker::{
    AttachmentSource, ExtractionReport, Inspection, Inspector, ToolAvailability, Unpacker,
    UnpackerConfig, Verdict,
};

#[derive(Parser)]
#[command(name = "unpack-attachment")]
#[command(version, about = "Inspect archive attachments against policy", long_about = None)]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect files as the attachments of one message
    Scan {
        /// Attachment files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Content-Type header to assume for every file
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recursively list the members of one archive
    List {
        /// Archive file
        archive: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report which archive tool would be used
    Probe,
}

#[derive(Serialize)]
struct ScanOutput<'a> {
    inspection: &'a Inspection,
    archives: &'a [ExtractionReport],
    verdict: &'a Verdict,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match load_config(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Scan {
                files,
                content_type,
                json,
            } => handle_scan(config, files, content_type, json).await,
            Commands::List { archive, json } => handle_list(config, archive, json).await,
            Commands::Probe => handle_probe(config),
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<UnpackerConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(UnpackerConfig::load(path)?),
        None => Ok(UnpackerConfig::default()),
    }
}

fn build_unpacker(config: &UnpackerConfig) -> Unpacker {
    let tool = ToolAvailability::resolve(config.tool_path.as_deref());
    Unpacker::new(config, tool)
}

async fn handle_scan(
    config: UnpackerConfig,
    files: Vec<PathBuf>,
    content_type: String,
    json: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let unpacker = build_unpacker(&config);
    let inspector = Inspector::new(config, unpacker);

    let mut sources = Vec::with_capacity(files.len());
    for file in &files {
        sources.push(AttachmentSource::from_path(file, &content_type).await?);
    }

    let (inspection, reports) = inspector.inspect(sources).await;
    let verdict = inspector.evaluate(&inspection);

    if json {
        let output = ScanOutput {
            inspection: &inspection,
            archives: &reports,
            verdict: &verdict,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for record in &inspection.records {
            println!(
                "{}\t{}\t{}\t{} bytes",
                record.file, record.ctype, record.md5, record.bytes
            );
        }
        for report in &reports {
            if let Some(class) = report.classification {
                println!("{}: {}", report.attachment, class);
            }
            for entry in &report.entries {
                println!("  {}", entry.full_path);
            }
        }
        match &verdict {
            Verdict::Accept => println!("accept"),
            Verdict::Deny(msg) => println!("deny: {}", msg),
            Verdict::DenySoft(msg) => println!("denysoft: {}", msg),
        }
    }

    Ok(match verdict {
        Verdict::Accept => 0,
        Verdict::Deny(_) => 2,
        Verdict::DenySoft(_) => 3,
    })
}

async fn handle_list(
    config: UnpackerConfig,
    archive: PathBuf,
    json: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    if !archive.exists() {
        return Err(Box::new(unpacker::UnpackError::NotFound(archive)));
    }

    let unpacker = build_unpacker(&config);
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let outcome = unpacker.extract(&archive, &name).await;
    let report = ExtractionReport::new(name, outcome);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for entry in &report.entries {
            println!("{}", entry.full_path);
        }
        if let Some(class) = report.classification {
            eprintln!("{}", class);
        }
    }

    Ok(if report.classification.is_some() { 2 } else { 0 })
}

fn handle_probe(config: UnpackerConfig) -> Result<i32, Box<dyn std::error::Error>> {
    match ToolAvailability::resolve(config.tool_path.as_deref()) {
        ToolAvailability::Available(tool) => {
            println!("{}", tool.path().display());
            Ok(0)
        }
        ToolAvailability::Unavailable { reason } => {
            println!("archive support disabled: {}", reason);
            Ok(1)
        }
    }
}
