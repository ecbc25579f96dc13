use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngressError {
    #[error("host already bound: {0}")]
    HostAlreadyBound(String),

    #[error("rule not found for {host}{path}")]
    RuleNotFound { host: String, path: String },

    #[error("rate limited")]
    RateLimited,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, IngressError>;
