use thiserror::Error;

#[derive(Error, Debug)]
pub enum PocError {
    #[error("quote parse error: {0}")]
    QuoteParse(String),

    #[error("quote verification error: {0}")]
    QuoteVerification(String),

    #[error("registry error: {0}")]
    Registry(String),
}

pub type Result<T> = std::result::Result<T, PocError>;
