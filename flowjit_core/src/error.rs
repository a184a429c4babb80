//! Unified error handling for flowjit
//!
//! Every fallible operation in the crate returns [`FlowResult`]. Errors are
//! classified so callers can tell a compile failure that is contained at one
//! node (retry after the graph is corrected) from an internal inconsistency.

use thiserror::Error;

/// Main error type for flowjit operations
#[derive(Debug, Error)]
pub enum FlowError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A node produced an invalid codegen description, or its logic refused to compile
    #[error("Codegen error in '{unit}': {message}")]
    Codegen { unit: String, message: String },

    /// Link failed because one or more imports matched no resolver layer
    #[error("Unresolved symbol(s) while linking '{unit}': {}", symbols.join(", "))]
    UnresolvedSymbol { unit: String, symbols: Vec<String> },

    /// An export collides with a symbol already exported by another installed module
    #[error("Symbol '{0}' is already exported by an installed module")]
    DuplicateSymbol(String),

    /// Backend rejected the module while defining or finalizing it
    #[error("Link error in '{unit}': {message}")]
    Link { unit: String, message: String },

    /// A symbol expected to be installed could not be found at lookup time
    #[error("Unresolved address for '{0}'")]
    UnresolvedAddress(String),

    /// Native backend could not be initialized
    #[error("Backend error: {0}")]
    Backend(String),

    /// Resource not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Already exists errors (for creation operations)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Two controls (or a control and a group) carry different value types
    #[error("Incompatible types: {expected} vs {found}")]
    IncompatibleTypes { expected: String, found: String },

    /// Generic internal errors (use sparingly)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using FlowError
pub type FlowResult<T> = Result<T, FlowError>;

impl From<toml::de::Error> for FlowError {
    fn from(err: toml::de::Error) -> Self {
        FlowError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for FlowError {
    fn from(err: toml::ser::Error) -> Self {
        FlowError::Config(format!("TOML serialization error: {}", err))
    }
}

// Helper methods
impl FlowError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        FlowError::Config(msg.into())
    }

    /// Create a codegen error for a unit
    pub fn codegen<S: Into<String>, T: Into<String>>(unit: S, message: T) -> Self {
        FlowError::Codegen {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Create a link error for a unit
    pub fn link<S: Into<String>, T: Into<String>>(unit: S, message: T) -> Self {
        FlowError::Link {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Create a backend error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        FlowError::Backend(msg.into())
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        FlowError::NotFound(resource.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        FlowError::InvalidInput(msg.into())
    }

    /// Create an incompatible types error
    pub fn incompatible<S: ToString, T: ToString>(expected: S, found: T) -> Self {
        FlowError::IncompatibleTypes {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        FlowError::Internal(msg.into())
    }

    /// Compile or link failure contained at one node; the node stays dirty and
    /// can be retried once the graph is corrected.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowError::Codegen { .. }
                | FlowError::UnresolvedSymbol { .. }
                | FlowError::DuplicateSymbol(_)
                | FlowError::Link { .. }
        )
    }

    /// Internal inconsistency of the engine itself.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlowError::UnresolvedAddress(_) | FlowError::Backend(_) | FlowError::Internal(_)
        )
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, FlowError::NotFound(_))
    }

    /// Check if this is an unresolved-symbol link failure
    pub fn is_unresolved_symbol(&self) -> bool {
        matches!(self, FlowError::UnresolvedSymbol { .. })
    }
}
