use courier_models::gateway::FrameError;
use courier_models::reply::Reply;
use thiserror::Error;

/// Failure reported by a collaborator (message store, context directory,
/// session validator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connection is not authenticated")]
    Unauthenticated,
    #[error("exactly one of receiverId or contextId is required")]
    InvalidAddressing,
    #[error("{0}")]
    Validation(String),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Authorization(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("heartbeat timed out")]
    HeartbeatTimeout,
}

impl GatewayError {
    /// Stable machine-readable code sent as `reason` in error replies.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidAddressing => "invalid_addressing",
            Self::Validation(_) => "validation_error",
            Self::UnknownEvent(_) => "unknown_event",
            Self::NotFound(_) => "not_found",
            Self::Authorization(_) => "authorization_error",
            Self::Persistence(_) => "persistence_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transport(_) => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
        }
    }

    pub fn to_reply(&self) -> Reply {
        let retry_after_ms = match self {
            Self::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        };
        Reply::Error {
            reason: self.reason().to_string(),
            message: self.to_string(),
            retry_after_ms,
        }
    }

    /// Store failures seen while handling an event. `what` names the
    /// missing entity for `NotFound`.
    pub fn from_store(err: StoreError, what: impl Into<String>) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound(what.into()),
            other => Self::Persistence(other.to_string()),
        }
    }
}

impl From<FrameError> for GatewayError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::UnknownEvent(name) => Self::UnknownEvent(name),
            other => Self::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_not_found_or_persistence() {
        assert!(matches!(
            GatewayError::from_store(StoreError::NotFound, "message 4"),
            GatewayError::NotFound(what) if what == "message 4"
        ));
        assert!(matches!(
            GatewayError::from_store(StoreError::Timeout, "message 4"),
            GatewayError::Persistence(_)
        ));
    }

    #[test]
    fn rate_limit_reply_carries_retry_hint() {
        let reply = GatewayError::RateLimited { retry_after_ms: 250 }.to_reply();
        assert_eq!(
            reply,
            Reply::Error {
                reason: "rate_limited".into(),
                message: "rate limited, retry after 250ms".into(),
                retry_after_ms: Some(250),
            }
        );
    }

    #[test]
    fn unknown_events_keep_their_own_reason() {
        let err: GatewayError = FrameError::UnknownEvent("shout".into()).into();
        assert_eq!(err.reason(), "unknown_event");
    }
}
