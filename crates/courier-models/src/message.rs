use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a message is delivered. A message is either direct (one receiver)
/// or posted into a context such as an order thread; never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Addressing {
    Direct {
        #[serde(rename = "receiverId")]
        receiver_id: i64,
    },
    Context {
        #[serde(rename = "contextId")]
        context_id: i64,
    },
}

impl Addressing {
    /// Build addressing from the raw optional wire fields. Returns `None`
    /// when both or neither are set.
    pub fn from_parts(receiver_id: Option<i64>, context_id: Option<i64>) -> Option<Self> {
        match (receiver_id, context_id) {
            (Some(receiver_id), None) => Some(Self::Direct { receiver_id }),
            (None, Some(context_id)) => Some(Self::Context { context_id }),
            _ => None,
        }
    }

    pub fn receiver_id(&self) -> Option<i64> {
        match self {
            Self::Direct { receiver_id } => Some(*receiver_id),
            Self::Context { .. } => None,
        }
    }

    pub fn context_id(&self) -> Option<i64> {
        match self {
            Self::Direct { .. } => None,
            Self::Context { context_id } => Some(*context_id),
        }
    }
}

/// A message accepted by the gateway and handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: i64,
    pub addressing: Addressing,
    pub content: String,
    pub attachment_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub display_name: String,
}

/// A persisted message as returned by the store, with denormalized
/// sender and receiver summaries for clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: i64,
    pub sender_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<i64>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub sender: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<UserSummary>,
}

impl StoredMessage {
    pub fn addressing(&self) -> Option<Addressing> {
        Addressing::from_parts(self.receiver_id, self.context_id)
    }
}

/// Pushed to the original sender when a receiver reads a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    pub message_id: i64,
    pub read_by: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressing_requires_exactly_one_target() {
        assert_eq!(
            Addressing::from_parts(Some(7), None),
            Some(Addressing::Direct { receiver_id: 7 })
        );
        assert_eq!(
            Addressing::from_parts(None, Some(3)),
            Some(Addressing::Context { context_id: 3 })
        );
        assert_eq!(Addressing::from_parts(Some(7), Some(3)), None);
        assert_eq!(Addressing::from_parts(None, None), None);
    }

    #[test]
    fn stored_message_serializes_camel_case_and_omits_missing_target() {
        let message = StoredMessage {
            id: 10,
            sender_id: 1,
            receiver_id: Some(2),
            context_id: None,
            content: "hello".into(),
            attachment_url: None,
            created_at: Utc::now(),
            is_read: false,
            sender: UserSummary {
                id: 1,
                display_name: "Ana".into(),
            },
            receiver: None,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["senderId"], 1);
        assert_eq!(value["receiverId"], 2);
        assert_eq!(value["isRead"], false);
        assert_eq!(value["sender"]["displayName"], "Ana");
        assert!(value.get("contextId").is_none());
        assert!(value.get("attachmentUrl").is_none());
    }
}
