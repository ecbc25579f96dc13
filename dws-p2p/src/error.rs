use thiserror::Error;

#[derive(Error, Debug)]
pub enum P2pError {
    #[error("peer store error: {0}")]
    PeerStore(#[from] dws_peer_store::PeerStoreError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, P2pError>;
