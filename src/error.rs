//! Error handling for mooring preprocessing operations.
//!
//! Provides comprehensive error types with context for instrument export
//! parsing, schema validation, quality-control, and dataset output failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MooringError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    Dataset(#[from] netcdf::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Date/time parsing error: {0}")]
    TimeParsing(#[from] chrono::ParseError),

    /// Schema or filesystem precondition failure in the configuration
    /// document. Always recoverable: callers skip the offending instrument
    /// section and continue with the others.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// No quiescent pre-deployment interval could be located in a depth
    /// series. Fatal for the current deployment, not the whole batch.
    #[error("Zero-drift boundary not found in depth series ({context})")]
    DriftBoundaryNotFound { context: String },

    /// The pre-averaged data group expected by a downstream pass is absent.
    #[error("No average-data group in dataset: {path}")]
    MissingAverageGroup { path: PathBuf },

    /// A quality-control pass was left with no usable data, or an input
    /// array violated a structural invariant.
    #[error("Data integrity error: {message}")]
    DataIntegrity { message: String },

    /// An instrument entry names a brand this crate has no converter for.
    #[error("Unsupported instrument brand '{brand}': unrealized conversion")]
    UnsupportedBrand { brand: String },

    #[error("Invalid instrument export in file: {path} - {reason}")]
    InvalidExport { path: PathBuf, reason: String },

    #[error("Matrix export parsing failed for file: {path} - {reason}")]
    MatrixParsing { path: PathBuf, reason: String },
}

impl MooringError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a data integrity error
    pub fn data_integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity {
            message: message.into(),
        }
    }

    /// Create an unsupported-brand error
    pub fn unsupported_brand(brand: impl Into<String>) -> Self {
        Self::UnsupportedBrand {
            brand: brand.into(),
        }
    }

    /// Create an invalid-export error with path context
    pub fn invalid_export(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidExport {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True when the failure only invalidates one instrument section and the
    /// batch driver may proceed with the remaining sections.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

pub type Result<T> = std::result::Result<T, MooringError>;
