use thiserror::Error;

/// Ways the boundary dataset can fail to become a pair of aligned collections.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadError {
    #[error("failed to fetch boundary dataset: {0}")]
    Fetch(String),
    #[error("boundary dataset is not a well-formed feature collection: {0}")]
    Parse(String),
    #[error("cannot derive markers aligned with the boundary dataset: {0}")]
    Alignment(String),
}
