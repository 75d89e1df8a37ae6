//! Error types and recovery hints for the governance runtime
//!
//! The taxonomy mirrors what callers need to react to: validation and auth
//! errors are terminal for the call, retryable errors carry a hint about
//! when to try again, and internal/storage errors are logged in full
//! server-side while clients only ever see a sanitized message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main runtime error type
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("State machine violation: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Retryable error: {0}")]
    Retryable(#[from] RetryableError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Input validation failures
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("{field} out of range: {reason}")]
    OutOfRange { field: String, reason: String },

    #[error("{field} exceeds maximum size of {limit} bytes")]
    TooLarge { field: String, limit: usize },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Malformed input: {0}")]
    Malformed(String),
}

/// Authentication and privilege failures
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("API key does not match agent {agent_id}")]
    KeyMismatch { agent_id: String },

    #[error("API key required for agent {agent_id}")]
    KeyRequired { agent_id: String },

    #[error("Cross-agent operation denied: {reason}")]
    CrossAgent { reason: String },

    #[error("Administrative operation refused: {reason}")]
    AdminRefused { reason: String },
}

/// Operations attempted against the wrong state
#[derive(Error, Debug, Clone)]
pub enum StateMachineError {
    #[error("Session {session_id} is {actual}, expected {expected}")]
    WrongSessionState {
        session_id: String,
        expected: String,
        actual: String,
    },

    #[error("Agent {agent_id} cannot transition from {from} to {to}")]
    InvalidTransition {
        agent_id: String,
        from: String,
        to: String,
    },

    #[error("Agent {agent_id} carries the pioneer tag and cannot be deleted")]
    PioneerProtected { agent_id: String },

    #[error("Agent {agent_id} is not paused")]
    NotPaused { agent_id: String },

    #[error("Destructive operation requires confirm=true")]
    ConfirmationRequired,
}

/// Transient failures the caller should retry
#[derive(Error, Debug, Clone)]
pub enum RetryableError {
    #[error("Timed out acquiring lock on {resource}")]
    LockTimeout { resource: String },

    #[error("Rate limit exceeded for {category}")]
    RateLimited {
        category: String,
        reset_at: DateTime<Utc>,
    },

    #[error("Loop pattern {pattern} detected; cooldown for {remaining_seconds:.1}s")]
    LoopCooldown {
        pattern: String,
        remaining_seconds: f64,
    },

    #[error("Tool {tool} exceeded its {limit_ms}ms timeout")]
    ToolTimeout { tool: String, limit_ms: u64 },
}

/// Missing entities
#[derive(Error, Debug, Clone)]
pub enum NotFoundError {
    #[error("Agent not found: {0}")]
    Agent(String),

    #[error("Dialectic session not found: {0}")]
    Session(String),

    #[error("Discovery not found: {0}")]
    Discovery(String),

    #[error("Unknown tool: {0}")]
    Tool(String),
}

/// Filesystem persistence failures. The message may contain paths and is
/// never sent to clients verbatim.
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("I/O failure on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Corrupt record in {path}: {message}")]
    Corrupt { path: String, message: String },
}

/// Structured recovery hint attached to error envelopes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryHint {
    pub action: String,
    pub related_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
}

/// Wire shape of a failed tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryHint>,
}

impl RuntimeError {
    /// Stable machine-readable code for the error class.
    pub fn error_code(&self) -> &'static str {
        match self {
            RuntimeError::Validation(_) => "VALIDATION",
            RuntimeError::Auth(_) => "AUTH_FAILED",
            RuntimeError::StateMachine(StateMachineError::PioneerProtected { .. }) => {
                "PIONEER_PROTECTED"
            }
            RuntimeError::StateMachine(_) => "STATE_VIOLATION",
            RuntimeError::Retryable(RetryableError::LockTimeout { .. }) => "LOCK_TIMEOUT",
            RuntimeError::Retryable(RetryableError::RateLimited { .. }) => "RATE_LIMITED",
            RuntimeError::Retryable(RetryableError::LoopCooldown { .. }) => "LOOP_COOLDOWN",
            RuntimeError::Retryable(RetryableError::ToolTimeout { .. }) => "TIMEOUT",
            RuntimeError::NotFound(_) => "NOT_FOUND",
            RuntimeError::Storage(_) => "STORAGE",
            RuntimeError::Internal(_) => "INTERNAL",
        }
    }

    /// True when the caller can reasonably retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RuntimeError::Retryable(_))
    }

    /// Client-facing message. Storage and internal errors are collapsed to
    /// an opaque description; everything else is already path-free.
    pub fn client_message(&self) -> String {
        match self {
            RuntimeError::Storage(_) => "A storage operation failed; please retry".to_string(),
            RuntimeError::Internal(_) => {
                "An internal error occurred; the incident has been logged".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Recovery guidance for the envelope, where a meaningful next step
    /// exists.
    pub fn recovery(&self) -> Option<RecoveryHint> {
        match self {
            RuntimeError::Retryable(RetryableError::LoopCooldown {
                remaining_seconds, ..
            }) => Some(RecoveryHint {
                action: format!("Wait {remaining_seconds:.1}s before the next update"),
                related_tools: vec!["get_governance_metrics".to_string()],
                workflow: None,
            }),
            RuntimeError::Retryable(RetryableError::RateLimited { reset_at, .. }) => {
                Some(RecoveryHint {
                    action: format!("Retry after {}", super::time::to_iso(reset_at)),
                    related_tools: vec![],
                    workflow: None,
                })
            }
            RuntimeError::Retryable(RetryableError::LockTimeout { .. }) => Some(RecoveryHint {
                action: "Retry the call; a concurrent operation held the lock".to_string(),
                related_tools: vec!["cleanup_stale_locks".to_string()],
                workflow: None,
            }),
            RuntimeError::Auth(_) => Some(RecoveryHint {
                action: "Supply the api_key returned at registration".to_string(),
                related_tools: vec!["get_agent_api_key".to_string()],
                workflow: None,
            }),
            RuntimeError::StateMachine(StateMachineError::NotPaused { .. }) => Some(RecoveryHint {
                action: "Only paused agents can enter dialectic recovery".to_string(),
                related_tools: vec!["get_agent_metadata".to_string()],
                workflow: None,
            }),
            _ => None,
        }
    }

    /// Build the wire envelope for a failed call.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            success: false,
            error: self.client_message(),
            error_code: Some(self.error_code().to_string()),
            recovery: self.recovery(),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io {
            path: String::new(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_sanitized() {
        let err = RuntimeError::Storage(StorageError::Io {
            path: "/var/data/agents/alpha_state.json".to_string(),
            message: "permission denied".to_string(),
        });
        let envelope = err.to_envelope();
        assert!(!envelope.error.contains("/var/data"));
        assert_eq!(envelope.error_code.as_deref(), Some("STORAGE"));
    }

    #[test]
    fn cooldown_carries_remaining_time() {
        let err = RuntimeError::Retryable(RetryableError::LoopCooldown {
            pattern: "rapid-fire".to_string(),
            remaining_seconds: 4.2,
        });
        assert_eq!(err.error_code(), "LOOP_COOLDOWN");
        assert!(err.is_retryable());
        let hint = err.recovery().unwrap();
        assert!(hint.action.contains("4.2"));
    }
}
