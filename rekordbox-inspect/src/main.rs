//! Inspection CLI for export.pdb and ANLZ files

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use rekordbox_codec::validate::Severity;
use rekordbox_codec::{validate_bytes, AnlzFile, Options, Report, SectionPayload, TableType};

#[derive(Parser)]
#[command(name = "rbinspect")]
#[command(about = "Decode and check Pioneer export files")]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON file with validation options
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Table statistics and validation issues of an export.pdb
    Pdb {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Sections of an ANLZ file
    Anlz {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = match &cli.config {
        Some(path) => {
            let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            Options::from_json(&json).with_context(|| format!("loading {}", path.display()))?
        }
        None => Options::default(),
    };

    let mut stdout = io::stdout().lock();
    let ok = match cli.command {
        Commands::Pdb { file, json } => inspect_pdb(&file, &options, json, &mut stdout)?,
        Commands::Anlz { file, json } => {
            inspect_anlz(&file, json, &mut stdout)?;
            true
        }
    };
    stdout.flush()?;

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Print the validation report of a PDB file. Returns false when the report
/// holds errors.
fn inspect_pdb(path: &Path, options: &Options, json: bool, out: &mut impl Write) -> anyhow::Result<bool> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    info!("Inspecting {:?} ({} bytes)", path, bytes.len());

    let report = validate_bytes(&bytes, options);
    if json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
    } else {
        print_report(&report, out)?;
    }
    Ok(report.is_valid())
}

fn print_report(report: &Report, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "PDB Validation Results")?;
    writeln!(out, "======================")?;
    writeln!(out)?;
    writeln!(out, "Status: {}", if report.is_valid() { "VALID" } else { "INVALID" })?;
    writeln!(out)?;

    let stats = &report.stats;
    writeln!(out, "Statistics:")?;
    writeln!(out, "  Total pages: {}", stats.total_pages)?;
    writeln!(out, "  Next unused page: {}", stats.next_unused_page)?;
    writeln!(out, "  Sequence: {}", stats.sequence)?;
    for table in TableType::ALL {
        let rows = stats.row_count(table);
        if rows > 0 {
            writeln!(out, "  {}: {}", table, rows)?;
        }
    }
    writeln!(out)?;

    for (severity, title) in [
        (Severity::Error, "Errors"),
        (Severity::Warning, "Warnings"),
        (Severity::Info, "Info"),
    ] {
        let issues: Vec<_> = report.issues.iter().filter(|i| i.severity == severity).collect();
        if issues.is_empty() {
            continue;
        }
        writeln!(out, "{}:", title)?;
        for issue in issues {
            let table = issue.table.map(|t| format!("[{}] ", t)).unwrap_or_default();
            let page = issue.page.map(|p| format!("page {}: ", p)).unwrap_or_default();
            writeln!(out, "  - {}{}{}", table, page, issue.message)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct SectionSummary {
    tag: String,
    header_len: usize,
    total_len: usize,
    payload: SectionPayload,
}

fn inspect_anlz(path: &Path, json: bool, out: &mut impl Write) -> anyhow::Result<()> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let file = AnlzFile::decode(&bytes).with_context(|| format!("decoding {}", path.display()))?;
    debug!(sections = file.sections.len(), trailer = file.trailer.len(), "decoded anlz");

    let summaries: Vec<SectionSummary> = file
        .sections
        .iter()
        .map(|section| SectionSummary {
            tag: section.tag_str(),
            header_len: section.header_len(),
            total_len: section.total_len(),
            payload: section.payload(),
        })
        .collect();

    if json {
        serde_json::to_writer_pretty(&mut *out, &summaries)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "{} sections, {} bytes", summaries.len(), bytes.len())?;
    for summary in &summaries {
        writeln!(
            out,
            "  {:<4} header {:>4}  total {:>7}  {}",
            summary.tag,
            summary.header_len,
            summary.total_len,
            describe(&summary.payload)
        )?;
    }
    Ok(())
}

fn describe(payload: &SectionPayload) -> String {
    match payload {
        SectionPayload::Path { path } => format!("path {}", path),
        SectionPayload::Waveform {
            entry_count,
            entry_width,
            ..
        } => format!("{} entries of {} bytes", entry_count, entry_width),
        SectionPayload::BeatGrid { beats } => match beats.first() {
            Some(beat) => format!("{} beats at {:.2} BPM", beats.len(), beat.tempo as f64 / 100.0),
            None => "empty beat grid".to_string(),
        },
        SectionPayload::Cues {
            list_type,
            entry_count,
            memory_count,
        } => match memory_count {
            Some(memory) => format!("list {} with {} entries, {} memory", list_type, entry_count, memory),
            None => format!("list {} with {} entries", list_type, entry_count),
        },
        SectionPayload::Raw => "raw".to_string(),
    }
}
