//! Error types for the agent runtime

/// Error returned by tool execution.
///
/// Tool-level failures are reported back to the LLM as `is_error` results;
/// they never abort the loop on their own.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// The requested tool was not found
    #[error("tool not found: {name}")]
    NotFound { name: String },

    /// The tool arguments failed validation
    #[error("invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    /// The tool execution failed
    #[error("tool execution failed: {message}")]
    ExecutionFailed { message: String },

    /// Permission for the call was denied
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// The call was cancelled
    #[error("tool call cancelled")]
    Cancelled,

    /// A generic tool error
    #[error("{0}")]
    Other(String),
}

impl ToolError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn invalid_arguments(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<String> for ToolError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for ToolError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

/// Errors from the permission subsystem.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PermissionError {
    #[error("permission request timed out")]
    Timeout,

    #[error("permission request cancelled")]
    Cancelled,

    #[error("no pending request with id: {0}")]
    UnknownRequest(String),

    #[error("failed to persist permission settings: {0}")]
    Persist(String),
}

/// Errors that can occur during agent execution.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("stream processing failed: {0}")]
    Stream(String),

    #[error("max turns ({0}) exceeded")]
    ExceededTurns(u32),

    #[error("too many tool calls: {count} (max: {max})")]
    ExceededToolCalls { count: usize, max: usize },

    #[error("compaction failed: {0}")]
    Compaction(String),

    #[error("run was cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("provider error: {0}")]
    Provider(String),
}

impl AgentError {
    /// Whether the loop exhausted a configured limit (vs failed outright).
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::ExceededTurns(_) | Self::ExceededToolCalls { .. }
        )
    }
}
