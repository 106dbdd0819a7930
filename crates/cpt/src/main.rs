use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use cpt_core::ingestion::{ingest_files, FileInput, FileStatus};
use cpt_core::{preprocess, validate_with, Config, ValidatedRecord};
use cpt_parser::{CptRecord, NegativeValuePolicy};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Reads, validates and preprocesses CPT soundings (GEF and BRO XML).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse and validate soundings and print a summary.
    Inspect(InspectArgs),
    /// Run the full pipeline and print the processed soundings.
    Process(ProcessArgs),
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// File paths or glob patterns.
    #[arg(required = true)]
    patterns: Vec<String>,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// File paths or glob patterns.
    #[arg(required = true)]
    patterns: Vec<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `preprocess.negative_values` from the config file.
    #[arg(long, value_enum)]
    negative_values: Option<PolicyArg>,
    #[arg(long)]
    no_inclination_correction: bool,
    /// Print the processed records as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    Clip,
    Interpolate,
}

impl From<PolicyArg> for NegativeValuePolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Clip => NegativeValuePolicy::Clip,
            PolicyArg::Interpolate => NegativeValuePolicy::Interpolate,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Inspect(args) => {
            let config = load_config(args.config.as_ref())?;
            let mut run = Run::default();
            let validated = run.validated(&args.patterns, &config)?;
            if !validated.is_empty() {
                println!("{}", inspect_table(&validated));
            }
            run.finish()
        }
        Command::Process(args) => {
            let mut config = load_config(args.config.as_ref())?;
            if let Some(policy) = args.negative_values {
                config.preprocess.negative_values = policy.into();
            }
            if args.no_inclination_correction {
                config.preprocess.inclination_correction = false;
            }

            let mut run = Run::default();
            let mut processed = Vec::new();
            for record in run.validated(&args.patterns, &config)? {
                match preprocess(&record, &config.preprocess) {
                    Ok(record) => processed.push(record),
                    Err(err) => run.fail(display_path(&record), &err),
                }
            }

            if args.json {
                println!("{}", serde_json::to_string_pretty(&processed)?);
            } else if !processed.is_empty() {
                println!("{}", process_table(&processed));
            }
            run.finish()
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(Config::default()),
    }
}

#[derive(Default)]
struct Run {
    failures: usize,
}

impl Run {
    fn fail(&mut self, path: String, err: &dyn std::fmt::Display) {
        eprintln!("{path}: {err}");
        self.failures += 1;
    }

    /// Expands the patterns, ingests every file once and validates the
    /// parsed records. Failed files are reported and skipped.
    fn validated(&mut self, patterns: &[String], config: &Config) -> Result<Vec<ValidatedRecord>> {
        let mut files = Vec::new();
        for pattern in patterns {
            let entries =
                glob::glob(pattern).with_context(|| format!("invalid glob pattern {pattern}"))?;
            for entry in entries {
                match entry {
                    Ok(path) if path.is_file() => match std::fs::read(&path) {
                        Ok(contents) => files.push((path.display().to_string(), contents)),
                        Err(err) => self.fail(path.display().to_string(), &err),
                    },
                    Ok(_) => {}
                    Err(err) => self.fail(err.path().display().to_string(), &err),
                }
            }
        }
        if files.is_empty() && self.failures == 0 {
            bail!("no files matched {}", patterns.join(" "));
        }

        let inputs: Vec<FileInput<'_>> = files
            .iter()
            .map(|(path, contents)| FileInput {
                path,
                contents,
            })
            .collect();
        let batch = ingest_files(&inputs, &HashSet::new());
        for report in &batch.reports {
            match report.status {
                FileStatus::Parsed => {}
                FileStatus::Duplicate => warn!(path = %report.path, "duplicate file skipped"),
                FileStatus::Failed => {
                    let message = report.error.as_deref().unwrap_or("parse failed");
                    self.fail(report.path.clone(), &message);
                }
            }
        }

        let mut validated = Vec::with_capacity(batch.parsed.len());
        for record in batch.parsed {
            let path = display_path(&record);
            match validate_with(record, &config.validation) {
                Ok(record) => validated.push(record),
                Err(err) => self.fail(path, &err),
            }
        }
        info!(records = validated.len(), failures = self.failures, "validation finished");
        Ok(validated)
    }

    fn finish(self) -> Result<()> {
        if self.failures > 0 {
            bail!("{} file(s) failed", self.failures);
        }
        Ok(())
    }
}

fn display_path(record: &CptRecord) -> String {
    record
        .source
        .path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| record.id.clone())
}

fn penetration(record: &CptRecord) -> String {
    record
        .raw
        .penetration_length
        .last()
        .map(|length| format!("{length:.2}"))
        .unwrap_or_default()
}

fn inspect_table(records: &[ValidatedRecord]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "id", "format", "samples", "length (m)", "pre-drill (m)", "warnings",
    ]);
    for record in records {
        let warnings: Vec<String> = record.warnings().iter().map(ToString::to_string).collect();
        table.add_row(vec![
            record.id.clone(),
            record.source.format.to_string(),
            record.sample_count().to_string(),
            penetration(record),
            format!("{:.2}", record.metadata.pre_drill_depth),
            warnings.join("\n"),
        ]);
    }
    table
}

fn process_table(records: &[CptRecord]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "id",
        "format",
        "samples",
        "synthetic",
        "depth source",
        "pore pressure",
        "corrections",
    ]);
    for record in records {
        let Some(processed) = record.processed() else {
            continue;
        };
        let provenance = &processed.provenance;
        let corrections: Vec<String> = provenance
            .corrections
            .iter()
            .map(|(channel, count)| format!("{channel}: {count}"))
            .collect();
        table.add_row(vec![
            record.id.clone(),
            record.source.format.to_string(),
            processed.len().to_string(),
            processed.synthetic_samples.to_string(),
            provenance.depth_source.to_string(),
            processed.governing_pore_pressure.to_string(),
            corrections.join("\n"),
        ]);
    }
    table
}
