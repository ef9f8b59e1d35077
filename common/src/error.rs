//! Typed error taxonomy
//!
//! Every fallible call across a component boundary returns
//! `Result<T, EngineError>`; the error carries the kind, a message and the
//! id of the component that raised it. No panics on fallible paths.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Enumerated error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Configuration out of range; fatal at construction
    InvalidArgument,
    /// Bar or field fails validation; skip, surface, do not mutate
    InvalidData,
    /// Operation before `initialize`
    NotInitialized,
    /// Signal or sizing computation failed
    StrategyError,
    /// `on_data` outside the Running state
    StrategyNotRunning,
    /// Illegal state machine edge; state unchanged
    InvalidStateTransition,
    /// Proposed positions violate limits
    RiskLimitExceeded,
    /// Persistence layer failure
    DatabaseError,
    /// Export or file persistence failed
    FileIoError,
    /// Live transport failure after retries
    Network,
    /// Database or broker used before connect
    NotConnected,
    /// Symbol missing from the instrument registry
    UnknownInstrument,
    /// Optimizer did not converge; last iterate used
    ConvergenceFailure,
}

/// Error carried across every component boundary
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("[{component}] {kind:?}: {message}")]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub component: String,
}

impl EngineError {
    /// Create an error with an explicit kind
    pub fn new(kind: ErrorKind, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            component: component.into(),
        }
    }

    pub fn invalid_argument(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, component, message)
    }

    pub fn invalid_data(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidData, component, message)
    }

    pub fn not_initialized(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotInitialized, component, message)
    }

    pub fn strategy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StrategyError, component, message)
    }

    pub fn not_running(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StrategyNotRunning, component, message)
    }

    pub fn invalid_transition(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidStateTransition, component, message)
    }

    pub fn risk_limit(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RiskLimitExceeded, component, message)
    }

    pub fn database(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DatabaseError, component, message)
    }

    pub fn network(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, component, message)
    }

    pub fn not_connected(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotConnected, component, message)
    }

    pub fn unknown_instrument(component: impl Into<String>, symbol: &str) -> Self {
        Self::new(
            ErrorKind::UnknownInstrument,
            component,
            format!("no instrument registered for symbol '{symbol}'"),
        )
    }

    pub fn convergence(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConvergenceFailure, component, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_component() {
        let err = EngineError::invalid_data("trend_following", "bad bar");
        let rendered = err.to_string();
        assert!(rendered.contains("trend_following"));
        assert!(rendered.contains("InvalidData"));
        assert!(rendered.contains("bad bar"));
    }

    #[test]
    fn kind_is_matchable() {
        let err = EngineError::unknown_instrument("registry", "ZZ");
        assert_eq!(err.kind, ErrorKind::UnknownInstrument);
    }
}
