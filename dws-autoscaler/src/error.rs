use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutoscalerError {
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    #[error("pool not found: {0}")]
    PoolNotFound(String),

    #[error("scale callback failed: {0}")]
    CallbackFailed(String),

    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, AutoscalerError>;
