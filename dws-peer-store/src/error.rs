use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeerStoreError {
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("persisted layout version mismatch (found {found}, expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
}

pub type Result<T> = std::result::Result<T, PeerStoreError>;
