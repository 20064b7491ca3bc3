use std::path::PathBuf;
use thiserror::Error;

/// Broad class of a failure, independent of where it was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// the input could not be opened or parsed as a table
    DataLoad,
    /// a required column is absent
    Schema,
    /// the image could not be written
    OutputWrite,
    /// the viewer could not be launched
    Display,
}

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("could not open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("no columns to parse from input")]
    NoHeader,

    #[error("line {line}: invalid {column} value {value:?}")]
    InvalidNumber {
        column: String,
        line: u64,
        value: String,
    },

    #[error("line {line}: could not parse {value:?} as a datetime")]
    InvalidTime { line: u64, value: String },

    #[error("column {0:?} not found")]
    MissingColumn(String),

    #[error("could not write {}: {reason}", .path.display())]
    OutputWrite { path: PathBuf, reason: String },

    #[error("could not show {}: {reason}", .path.display())]
    Show { path: PathBuf, reason: String },
}

impl PlotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlotError::Open { .. }
            | PlotError::Csv(_)
            | PlotError::NoHeader
            | PlotError::InvalidNumber { .. }
            | PlotError::InvalidTime { .. } => ErrorKind::DataLoad,
            PlotError::MissingColumn(_) => ErrorKind::Schema,
            PlotError::OutputWrite { .. } => ErrorKind::OutputWrite,
            PlotError::Show { .. } => ErrorKind::Display,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlotError>;
