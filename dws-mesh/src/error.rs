use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("service already registered: {0}")]
    AlreadyRegistered(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("certificate verification failed: {0}")]
    VerificationFailed(String),

    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, MeshError>;
