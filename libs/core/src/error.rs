use datagen_backpressure::AdmissionError;
use thiserror::Error;

/// Problems building the exception catalog. Always fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown exception kind `{0}` (expected invalid-operation, argument or timeout)")]
    UnknownKind(String),
    #[error("at least one exception kind is required")]
    Empty,
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Admission(#[from] AdmissionError),
}
