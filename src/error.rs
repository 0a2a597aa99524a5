//! Error taxonomy for the sync core.
//!
//! Nothing here is fatal to the process. Transport errors are recovered by
//! the reconnect timer, protocol violations are rejected before any state
//! changes, remote failures leave state untouched for an explicit retry and
//! handler faults are contained at the dispatch boundary.

use thiserror::Error;

use crate::store::ConflictId;

/// Broad classification used for logging and operator hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection drop, timeout, undecodable frame
    Transport,

    /// Operator intent rejected by the conflict/push rules
    Protocol,

    /// Deployment endpoint rejected the push
    Remote,

    /// A dispatch subscriber failed
    Handler,

    /// Bad configuration value
    Configuration,
}

impl ErrorKind {
    /// Every error in this crate can be recovered from, either automatically
    /// (reconnect) or by operator action. Configuration errors need a restart
    /// with corrected input.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorKind::Configuration)
    }

    /// Retried without operator involvement.
    pub fn is_automatic(&self) -> bool {
        matches!(self, ErrorKind::Transport)
    }

    pub fn hint(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "the session reconnects automatically",
            ErrorKind::Protocol => "resolve every open conflict and wait for the shadow runtime",
            ErrorKind::Remote => "state is unchanged; retry the push when the endpoint recovers",
            ErrorKind::Handler => "a subscriber failed; other subscribers were still notified",
            ErrorKind::Configuration => "check the config file and SHADOW_SYNC_* variables",
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connection lost: {0}")]
    Io(String),

    #[error("undecodable frame: {0}")]
    Decode(String),

    #[error("connection closed: {0}")]
    Closed(String),
}

/// An operator intent that breaks the resolution or push rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("no conflict with id {0}")]
    UnknownConflict(ConflictId),

    #[error("conflict {0} is already resolved")]
    AlreadyResolved(ConflictId),

    #[error("push blocked: {count} unresolved conflict(s)")]
    UnresolvedConflicts { count: usize },

    #[error("push blocked: shadow runtime is not ready")]
    ShadowNotReady,
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("policy violation: {0}")]
    Policy(#[from] ProtocolViolation),

    /// The endpoint answered and refused the push. Carries its message verbatim.
    #[error("deployment rejected: {0}")]
    Remote(String),

    /// The endpoint could not be reached or answered garbage.
    #[error("deployment endpoint error: {0:#}")]
    Endpoint(#[source] anyhow::Error),
}

impl PushError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PushError::Policy(_) => ErrorKind::Protocol,
            PushError::Remote(_) | PushError::Endpoint(_) => ErrorKind::Remote,
        }
    }

    pub fn is_policy_violation(&self) -> bool {
        matches!(self, PushError::Policy(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transport
    }
}

impl ProtocolViolation {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let push = PushError::from(ProtocolViolation::ShadowNotReady);
        assert_eq!(push.kind(), ErrorKind::Protocol);
        assert!(push.is_policy_violation());

        let remote = PushError::Remote("live runtime locked".into());
        assert_eq!(remote.kind(), ErrorKind::Remote);
        assert!(!remote.is_policy_violation());
        assert_eq!(remote.to_string(), "deployment rejected: live runtime locked");
    }

    #[test]
    fn test_recoverable() {
        assert!(ErrorKind::Transport.is_recoverable());
        assert!(ErrorKind::Transport.is_automatic());
        assert!(ErrorKind::Remote.is_recoverable());
        assert!(!ErrorKind::Remote.is_automatic());
        assert!(!ErrorKind::Configuration.is_recoverable());
    }
}
