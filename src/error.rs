//! Error types for the content generation workflow.
//!
//! Only two classes ever reach an HTTP caller: [`GenerationError::Exhausted`]
//! (retries spent) and non-retryable provider/storage failures. Quota hits are
//! absorbed by the retry executor; parse failures and duplicate keys are
//! skipped inside a bulk run.

use thiserror::Error;

/// Errors that can occur while generating content through a provider.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The provider signalled quota exhaustion (HTTP 429). Transient;
    /// retried with exponential backoff.
    #[error("generation quota exhausted")]
    QuotaExceeded {
        /// Server-suggested wait, if the response carried a `Retry-After` header.
        retry_after: Option<u64>,
    },

    /// The provider response was not a usable JSON payload after fence
    /// stripping. Recoverable: a bulk run skips the item.
    #[error("unusable generation payload: {reason}")]
    Parse { reason: String },

    /// A non-retryable provider failure (network error, 4xx/5xx other than 429,
    /// malformed completion envelope).
    #[error("generation provider error: {message}")]
    Provider { message: String },

    /// All retry attempts were spent on quota errors.
    #[error("generation failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    /// No provider is configured.
    #[error("generation provider is disabled; set [generation] provider and model in the config")]
    Disabled,
}
