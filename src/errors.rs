use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaxonomyError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    FileReadError(#[from] std::io::Error),

    #[error("Invalid record in {path}: {reason}")]
    InvalidRecord { path: PathBuf, reason: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing credentials: {0} (set it in taxo.toml or via TAXO_* environment variables)")]
    MissingCredentials(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Prompt template {path} is missing placeholder {placeholder}")]
    BadTemplate { path: PathBuf, placeholder: String },

    #[error("Internal tree operation failed: {0}")]
    InternalError(String),
}

pub type TaxonomyResult<T> = Result<T, TaxonomyError>;
