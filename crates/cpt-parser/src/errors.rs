use std::fmt;

use thiserror::Error;

use crate::model::Channel;

#[derive(Debug, Clone)]
pub struct ParserAttempt {
    pub parser: &'static str,
    pub message: String,
}

impl ParserAttempt {
    pub fn new(parser: &'static str, message: impl Into<String>) -> Self {
        Self {
            parser,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParserAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.parser, self.message)
    }
}

/// Malformed or unparseable source document. `row` is the 0-based index of
/// the data row, `line` the 1-based line in the source text.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("{parser} format mismatch: {reason}")]
    FormatMismatch {
        parser: &'static str,
        reason: String,
    },

    #[error("{parser} header line {line} invalid: {message}")]
    InvalidHeader {
        parser: &'static str,
        line: usize,
        message: String,
    },

    #[error(
        "{parser} data row {row} (line {line}) has {found} values but the header declares {expected} columns"
    )]
    ColumnCount {
        parser: &'static str,
        row: usize,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("{parser} data row {row} (line {line}) invalid: {message}")]
    DataRow {
        parser: &'static str,
        row: usize,
        line: usize,
        message: String,
    },

    #[error("{parser} document is missing mandatory element '{element}'")]
    MissingElement {
        parser: &'static str,
        element: String,
    },

    #[error("{parser} element '{element}' invalid: {message}")]
    InvalidValue {
        parser: &'static str,
        element: String,
        message: String,
    },

    #[error("{parser} column {column} unit '{unit}' cannot hold {channel}")]
    UnitMismatch {
        parser: &'static str,
        column: usize,
        unit: String,
        channel: Channel,
    },

    #[error("{parser} channel arrays are inconsistent: {message}")]
    Inconsistent {
        parser: &'static str,
        message: String,
    },

    #[error("{parser} XML error: {source}")]
    Xml {
        parser: &'static str,
        #[source]
        source: roxmltree::Error,
    },

    #[error("{parser} CSV error: {source}")]
    Csv {
        parser: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("{parser} document did not contain any data rows")]
    EmptyData { parser: &'static str },

    #[error("no parser recognized this document; attempts: {attempts:?}")]
    NoMatchingParser { attempts: Vec<ParserAttempt> },
}
