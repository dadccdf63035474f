//! Error types for the hrtree index

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TreeError>;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{op} failed at offset {offset}: {source}")]
    IoAt {
        op: &'static str,
        offset: u64,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Element not found: key {0}")]
    NotFound(u64),

    #[error("Operation on a closed tree or store")]
    Closed,

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<bincode::Error> for TreeError {
    fn from(err: bincode::Error) -> Self {
        TreeError::Serialization(err.to_string())
    }
}
