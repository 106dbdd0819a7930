use std::fs;
use std::io::Read;
use std::path::Path;

use blake3::Hasher;
use cpt_parser::{parse_as, parse_cpt_file, CptRecord, SourceFormat};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{CptError, Result};
use crate::preprocessing::preprocess;
use crate::validation::validate_with;

/// Where a sounding document comes from. The handle is only held while the
/// document is read into memory.
pub enum Source<'a> {
    Path(&'a Path),
    Reader(&'a mut dyn Read),
}

impl<'a> From<&'a Path> for Source<'a> {
    fn from(path: &'a Path) -> Self {
        Source::Path(path)
    }
}

impl<'a, R: Read> From<&'a mut R> for Source<'a> {
    fn from(reader: &'a mut R) -> Self {
        Source::Reader(reader)
    }
}

pub fn compute_hash(contents: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(contents);
    hasher.finalize().to_hex().to_string()
}

/// Reads and parses one document, detecting its format. The returned record
/// is raw: nothing has been validated or corrected yet.
pub fn read<'a>(source: impl Into<Source<'a>>) -> Result<CptRecord> {
    read_source(source.into(), None)
}

/// Like [`read`], but parses with the adapter for `format` directly.
pub fn read_with<'a>(format: SourceFormat, source: impl Into<Source<'a>>) -> Result<CptRecord> {
    read_source(source.into(), Some(format))
}

pub fn read_path(path: impl AsRef<Path>) -> Result<CptRecord> {
    read(path.as_ref())
}

pub fn read_from(reader: &mut impl Read) -> Result<CptRecord> {
    read(reader)
}

fn read_source(source: Source<'_>, format: Option<SourceFormat>) -> Result<CptRecord> {
    match source {
        Source::Path(path) => {
            let bytes = fs::read(path).map_err(|source| CptError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let mut record = parse_bytes(&bytes, format)?;
            record.source.path = Some(path.to_path_buf());
            info!(
                path = %path.display(),
                sounding = %record.id,
                format = %record.source.format,
                samples = record.sample_count(),
                "parsed sounding"
            );
            Ok(record)
        }
        Source::Reader(reader) => {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).map_err(CptError::Stream)?;
            parse_bytes(&bytes, format)
        }
    }
}

/// Parses an in-memory document and stamps it with the hash of its bytes.
/// Bytes that are not valid UTF-8 are decoded lossily; both formats keep
/// their structure in ASCII.
pub fn parse_bytes(bytes: &[u8], format: Option<SourceFormat>) -> Result<CptRecord> {
    let content = String::from_utf8_lossy(bytes);
    let mut record = match format {
        Some(format) => parse_as(format, &content)?,
        None => parse_cpt_file(&content)?,
    };
    record.source.file_hash = compute_hash(bytes);
    debug!(sounding = %record.id, hash = %record.source.file_hash, "hashed source");
    Ok(record)
}

/// Runs the whole read, validate and preprocess sequence for one document.
pub fn process<'a>(source: impl Into<Source<'a>>, config: &Config) -> Result<CptRecord> {
    let record = read(source)?;
    let validated = validate_with(record, &config.validation)?;
    Ok(preprocess(&validated, &config.preprocess)?)
}
