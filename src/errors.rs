use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status} for {endpoint}: {body}")]
    Status { endpoint: String, status: u16, body: String },
    #[error("invalid backend payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("backend payload is missing `{0}`")]
    MissingField(&'static str),
    #[error("malformed record {id}: {reason}")]
    Malformed { id: String, reason: String },
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid hex in rpc response: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("unexpected return data: {0}")]
    ReturnData(String),
    #[error("block {0} not found")]
    MissingBlock(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("document serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("batch of {size} operations exceeds store ceiling of {max}")]
    BatchTooLarge { size: usize, max: usize },
    #[error("flush threshold {threshold} must be in 1..{ceiling}")]
    InvalidThreshold { threshold: usize, ceiling: usize },
    #[error("invalid document key `{0}`")]
    InvalidKey(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
