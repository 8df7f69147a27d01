//! Error taxonomy for the ingestion service.
//!
//! Malformed model output and under-extraction are not errors: they are
//! represented in the normal result types. Only transport, persistence and
//! review-state failures surface here.

use thiserror::Error;

/// Failures talking to the generation endpoint.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("generation API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("could not decode generation response: {0}")]
    Decode(String),
}

impl LlmError {
    /// Only a throttling signal is worth retrying.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Failures talking to the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),

    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode store response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// A primary write in the commit gate failed. Writes for earlier record
/// types in the same approval stay committed.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("could not persist {collection}: {source}")]
    Persist {
        collection: &'static str,
        #[source]
        source: StoreError,
    },
}

/// Failures of the review/diff staging state machine.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("an approval is already in flight")]
    AlreadySaving,

    #[error("cannot {action} while {state}")]
    InvalidState {
        state: &'static str,
        action: &'static str,
    },

    #[error("no staged {kind} at index {index}")]
    UnknownItem { kind: &'static str, index: usize },

    #[error(transparent)]
    Commit(#[from] CommitError),
}
