use std::collections::HashSet;
use std::path::PathBuf;

use cpt_parser::{CptRecord, FormatError, ParserAttempt};
use tracing::{info, warn};

use crate::error::CptError;
use crate::reader::{compute_hash, parse_bytes};

#[derive(Debug)]
pub struct FileInput<'a> {
    pub path: &'a str,
    pub contents: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Duplicate,
    Parsed,
    Failed,
}

#[derive(Debug)]
pub struct FileReport {
    pub path: String,
    pub hash: String,
    pub status: FileStatus,
    /// Parsers that did not recognise the document, in the order tried.
    pub parser_attempts: Vec<ParserAttempt>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct IngestionBatch {
    pub parsed: Vec<CptRecord>,
    pub reports: Vec<FileReport>,
    pub new_hashes: Vec<String>,
}

impl IngestionBatch {
    pub fn failed(&self) -> impl Iterator<Item = &FileReport> {
        self.reports
            .iter()
            .filter(|report| report.status == FileStatus::Failed)
    }
}

/// Parses every input whose hash is neither in `existing_hashes` nor seen
/// earlier in the same batch. A failing file never stops the batch.
pub fn ingest_files(inputs: &[FileInput<'_>], existing_hashes: &HashSet<String>) -> IngestionBatch {
    let mut parsed = Vec::new();
    let mut reports = Vec::new();
    let mut new_hashes = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for input in inputs {
        let hash = compute_hash(input.contents);
        if existing_hashes.contains(&hash) || !seen.insert(hash.clone()) {
            info!(path = input.path, hash = %hash, "skipping duplicate file");
            reports.push(FileReport {
                path: input.path.to_string(),
                hash,
                status: FileStatus::Duplicate,
                parser_attempts: Vec::new(),
                error: None,
            });
            continue;
        }

        match parse_bytes(input.contents, None) {
            Ok(mut record) => {
                record.source.path = Some(PathBuf::from(input.path));
                new_hashes.push(hash.clone());
                parsed.push(record);
                reports.push(FileReport {
                    path: input.path.to_string(),
                    hash,
                    status: FileStatus::Parsed,
                    parser_attempts: Vec::new(),
                    error: None,
                });
            }
            Err(err) => {
                warn!(path = input.path, error = %err, "failed to parse file");
                let parser_attempts = match &err {
                    CptError::Format(FormatError::NoMatchingParser { attempts }) => {
                        attempts.clone()
                    }
                    _ => Vec::new(),
                };
                reports.push(FileReport {
                    path: input.path.to_string(),
                    hash,
                    status: FileStatus::Failed,
                    parser_attempts,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    IngestionBatch {
        parsed,
        reports,
        new_hashes,
    }
}
