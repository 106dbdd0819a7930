use std::path::PathBuf;

use cpt_parser::FormatError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::preprocessing::PreprocessingError;
use crate::validation::ValidationError;

#[derive(Debug, Error)]
pub enum CptError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read input stream: {0}")]
    Stream(#[source] std::io::Error),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Preprocessing(#[from] PreprocessingError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, CptError>;
