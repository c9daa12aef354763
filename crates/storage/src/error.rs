#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid source reference '{0}': expected <bucket>/<prefix>")]
    InvalidSource(String),

    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Result encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
