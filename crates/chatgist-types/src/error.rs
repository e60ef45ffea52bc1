use thiserror::Error;

use crate::chat::{BatchGist, ChatId};
use crate::llm::ProviderError;

/// Errors raised by a chat transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("chat {0} not found on the remote side")]
    ChatNotFound(ChatId),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed transport data: {0}")]
    Malformed(String),

    #[error("remote rejected request: {0}")]
    Rejected(String),
}

/// Errors raised while producing or manipulating audio artifacts.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} timed out after {secs}s")]
    TimedOut { tool: String, secs: u64 },

    #[error("{tool} produced no output files")]
    NoOutput { tool: String },

    #[error("invalid audio: {0}")]
    Invalid(String),
}

/// Service-level error taxonomy for gist, audio and read-state operations.
#[derive(Debug, Error)]
pub enum GistError {
    #[error("chat {0} not found")]
    ChatNotFound(ChatId),

    #[error("chat has no gist yet")]
    EmptyGist,

    #[error("batch {requested} out of range (chat has {available} batches)")]
    BatchOutOfRange { requested: usize, available: usize },

    #[error("transport error during {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("quota exceeded: all {pool_size} credentials exhausted")]
    QuotaExceeded { pool_size: usize },

    #[error("{operation}: max retries exceeded after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("{operation} failed: {source}")]
    Model {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    #[error("{operation} exceeded its deadline")]
    DeadlineExceeded { operation: &'static str },

    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("{operation} panicked: {message}")]
    Panicked {
        operation: &'static str,
        message: String,
    },

    /// Some batches finished before the failure; they are kept on the chat
    /// and also carried here.
    #[error("stopped after {} completed batches: {source}", .completed.len())]
    Incomplete {
        completed: Vec<BatchGist>,
        #[source]
        source: Box<GistError>,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl GistError {
    /// Batches produced before the failure, if this is a partial result.
    pub fn completed_batches(&self) -> &[BatchGist] {
        match self {
            GistError::Incomplete { completed, .. } => completed,
            _ => &[],
        }
    }

    /// The underlying cause, unwrapping a partial-result envelope.
    pub fn root(&self) -> &GistError {
        match self {
            GistError::Incomplete { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the caller asked for something that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root(),
            GistError::ChatNotFound(_) | GistError::EmptyGist | GistError::BatchOutOfRange { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_unwraps_to_root() {
        let err = GistError::Incomplete {
            completed: Vec::new(),
            source: Box::new(GistError::QuotaExceeded { pool_size: 2 }),
        };
        assert!(matches!(err.root(), GistError::QuotaExceeded { pool_size: 2 }));
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("0 completed batches"));
    }

    #[test]
    fn not_found_family() {
        assert!(GistError::EmptyGist.is_not_found());
        assert!(GistError::ChatNotFound(4).is_not_found());
        assert!(
            GistError::BatchOutOfRange {
                requested: 3,
                available: 1
            }
            .is_not_found()
        );
    }
}
