use serde::{Deserialize, Serialize};

use crate::message::StoredMessage;

/// Terminal acknowledgement for one inbound event. Every event a client
/// sends gets exactly one of these back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Authenticated {
        #[serde(rename = "userId")]
        user_id: i64,
    },
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<StoredMessage>,
    },
    Error {
        reason: String,
        message: String,
        #[serde(
            rename = "retryAfterMs",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        retry_after_ms: Option<u64>,
    },
}

impl Reply {
    pub fn ok() -> Self {
        Self::Success { message: None }
    }

    pub fn with_message(message: StoredMessage) -> Self {
        Self::Success {
            message: Some(message),
        }
    }

    pub fn error(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The error reason code, if this is an error reply.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Error { reason, .. } => Some(reason.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replies_carry_a_status_tag() {
        assert_eq!(
            serde_json::to_value(Reply::Authenticated { user_id: 5 }).unwrap(),
            json!({ "status": "authenticated", "userId": 5 })
        );
        assert_eq!(
            serde_json::to_value(Reply::ok()).unwrap(),
            json!({ "status": "success" })
        );
        assert_eq!(
            serde_json::to_value(Reply::error("unauthenticated", "log in first")).unwrap(),
            json!({
                "status": "error",
                "reason": "unauthenticated",
                "message": "log in first"
            })
        );
    }

    #[test]
    fn reason_is_only_set_on_errors() {
        assert_eq!(Reply::ok().reason(), None);
        assert_eq!(
            Reply::error("invalid_addressing", "x").reason(),
            Some("invalid_addressing")
        );
    }
}
