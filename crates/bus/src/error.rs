#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    #[error("Message encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Malformed delivery {id}: {reason}")]
    Malformed { id: String, reason: String },
}
