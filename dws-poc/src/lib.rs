//! Proof-of-Cloud node verifier: validates hardware attestation quotes
//! against a registry and derives reputation adjustments.

pub mod error;
pub mod types;
pub mod verifier;

pub use error::{PocError, Result};
pub use types::{HardwareRegistry, OutcomeKind, ParsedQuote, PocEvent, QuoteParser, RegistryEntry, VerifyOutcome};
pub use verifier::{EventHandler, PocVerifier, BATCH_CONCURRENCY, DEFAULT_CACHE_TTL_MS};
