pub mod config;
pub mod error;
pub mod ingestion;
pub mod preprocessing;
pub mod reader;
pub mod validation;

pub use config::{Config, PreprocessOptions, ValidationOptions};
pub use error::{CptError, Result};
pub use preprocessing::{preprocess, PreprocessingError};
pub use reader::{process, read, read_from, read_path, read_with, Source};
pub use validation::{validate, validate_with, ValidatedRecord, ValidationError};
