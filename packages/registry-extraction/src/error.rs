//! Typed errors for the extraction library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to keep the
//! failure taxonomy explicit at the consumer boundary: hard failures
//! are errors, an exhausted-but-loaded page is `Outcome::Empty`.

use thiserror::Error;

/// Errors that can occur while driving a registry page.
///
/// Everything here is a *hard* failure. A page that loads but yields no
/// valid records is not an error — see [`crate::types::Outcome::Empty`].
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The page could not be reached or did not load.
    #[error("navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },

    /// The per-call deadline elapsed while driving the page.
    #[error("timed out while loading {url}")]
    Timeout { url: String },

    /// No extraction profile exists for this source type.
    ///
    /// This is a permanent condition: retrying will not help until a
    /// profile is implemented.
    #[error("source type not supported: {source_type}")]
    Unsupported { source_type: String },

    /// Transport-level failure from the underlying HTTP client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A candidate URL could not be constructed or parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ExtractError {
    /// Whether retrying the same call later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ExtractError::Unsupported { .. } | ExtractError::InvalidUrl(_))
    }
}

/// Result alias used throughout the library.
pub type ExtractResult<T> = Result<T, ExtractError>;
