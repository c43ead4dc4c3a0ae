use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::location::LocationUpdate;
use crate::message::{MessageRead, StoredMessage};
use crate::reply::Reply;

// Client -> Server events
pub const EVENT_AUTHENTICATE: &str = "authenticate";
pub const EVENT_SEND_MESSAGE: &str = "send_message";
pub const EVENT_READ_MESSAGE: &str = "read_message";
pub const EVENT_UPDATE_LOCATION: &str = "update_location";
pub const EVENT_SUBSCRIBE_CONTEXT: &str = "subscribe_context";
pub const EVENT_UNSUBSCRIBE_CONTEXT: &str = "unsubscribe_context";
pub const EVENT_HEARTBEAT: &str = "heartbeat";

// Server -> Client events
pub const EVENT_REPLY: &str = "reply";
pub const EVENT_HELLO: &str = "hello";
pub const EVENT_NEW_MESSAGE: &str = "new_message";
pub const EVENT_MESSAGE_READ: &str = "message_read";
pub const EVENT_LOCATION_UPDATED: &str = "location_updated";
pub const EVENT_PING: &str = "ping";

// Close codes
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4009;
pub const CLOSE_DELIVERY_FAILED: u16 = 4010;

/// Envelope for every text frame in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<u64>,
}

impl GatewayFrame {
    pub fn reply(reference: Option<u64>, reply: &Reply) -> Result<String, serde_json::Error> {
        serde_json::to_string(&GatewayFrame {
            event: EVENT_REPLY.to_string(),
            data: serde_json::to_value(reply)?,
            reference,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatePayload {
    pub user_id: i64,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default)]
    pub sender_id: Option<i64>,
    #[serde(default)]
    pub receiver_id: Option<i64>,
    #[serde(default)]
    pub context_id: Option<i64>,
    pub content: String,
    #[serde(default)]
    pub attachment_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMessagePayload {
    pub message_id: i64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPayload {
    pub context_id: i64,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("invalid payload for '{event}': {source}")]
    InvalidPayload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Every event a client may send, already decoded.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Authenticate(AuthenticatePayload),
    SendMessage(SendMessagePayload),
    ReadMessage(ReadMessagePayload),
    UpdateLocation(LocationUpdate),
    SubscribeContext(ContextPayload),
    UnsubscribeContext(ContextPayload),
    Heartbeat,
}

impl ClientEvent {
    pub fn parse(event: &str, data: Value) -> Result<Self, FrameError> {
        fn payload<T: serde::de::DeserializeOwned>(
            event: &'static str,
            data: Value,
        ) -> Result<T, FrameError> {
            serde_json::from_value(data)
                .map_err(|source| FrameError::InvalidPayload { event, source })
        }

        match event {
            EVENT_AUTHENTICATE => Ok(Self::Authenticate(payload(EVENT_AUTHENTICATE, data)?)),
            EVENT_SEND_MESSAGE => Ok(Self::SendMessage(payload(EVENT_SEND_MESSAGE, data)?)),
            EVENT_READ_MESSAGE => Ok(Self::ReadMessage(payload(EVENT_READ_MESSAGE, data)?)),
            EVENT_UPDATE_LOCATION => {
                Ok(Self::UpdateLocation(payload(EVENT_UPDATE_LOCATION, data)?))
            }
            EVENT_SUBSCRIBE_CONTEXT => {
                Ok(Self::SubscribeContext(payload(EVENT_SUBSCRIBE_CONTEXT, data)?))
            }
            EVENT_UNSUBSCRIBE_CONTEXT => {
                Ok(Self::UnsubscribeContext(payload(EVENT_UNSUBSCRIBE_CONTEXT, data)?))
            }
            EVENT_HEARTBEAT => Ok(Self::Heartbeat),
            other => Err(FrameError::UnknownEvent(other.to_string())),
        }
    }

    /// Decode a whole text frame, returning the client's `ref` alongside
    /// the event so the reply can echo it even when the payload is bad.
    pub fn from_text(text: &str) -> (Option<u64>, Result<Self, FrameError>) {
        match serde_json::from_str::<GatewayFrame>(text) {
            Ok(frame) => (frame.reference, Self::parse(&frame.event, frame.data)),
            Err(err) => (None, Err(FrameError::Malformed(err))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate(_) => EVENT_AUTHENTICATE,
            Self::SendMessage(_) => EVENT_SEND_MESSAGE,
            Self::ReadMessage(_) => EVENT_READ_MESSAGE,
            Self::UpdateLocation(_) => EVENT_UPDATE_LOCATION,
            Self::SubscribeContext(_) => EVENT_SUBSCRIBE_CONTEXT,
            Self::UnsubscribeContext(_) => EVENT_UNSUBSCRIBE_CONTEXT,
            Self::Heartbeat => EVENT_HEARTBEAT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    /// Milliseconds between server pings.
    pub heartbeat_interval: u64,
}

/// Server-initiated pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Hello(HelloPayload),
    NewMessage(StoredMessage),
    MessageRead(MessageRead),
    LocationUpdated(LocationUpdate),
    Ping,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello(_) => EVENT_HELLO,
            Self::NewMessage(_) => EVENT_NEW_MESSAGE,
            Self::MessageRead(_) => EVENT_MESSAGE_READ,
            Self::LocationUpdated(_) => EVENT_LOCATION_UPDATED,
            Self::Ping => EVENT_PING,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_events() {
        let event = ClientEvent::parse(
            EVENT_SEND_MESSAGE,
            json!({ "senderId": 1, "contextId": 4, "content": "on my way" }),
        )
        .unwrap();
        match event {
            ClientEvent::SendMessage(payload) => {
                assert_eq!(payload.sender_id, Some(1));
                assert_eq!(payload.context_id, Some(4));
                assert_eq!(payload.receiver_id, None);
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert!(matches!(
            ClientEvent::parse(EVENT_HEARTBEAT, Value::Null),
            Ok(ClientEvent::Heartbeat)
        ));
    }

    #[test]
    fn unknown_and_invalid_events_are_distinguished() {
        assert!(matches!(
            ClientEvent::parse("delete_everything", json!({})),
            Err(FrameError::UnknownEvent(name)) if name == "delete_everything"
        ));
        assert!(matches!(
            ClientEvent::parse(EVENT_READ_MESSAGE, json!({ "messageId": "abc" })),
            Err(FrameError::InvalidPayload { event: EVENT_READ_MESSAGE, .. })
        ));
    }

    #[test]
    fn from_text_keeps_the_reference() {
        let (reference, event) =
            ClientEvent::from_text(r#"{"event":"authenticate","data":{"userId":3},"ref":42}"#);
        assert_eq!(reference, Some(42));
        assert!(matches!(event, Ok(ClientEvent::Authenticate(p)) if p.user_id == 3));

        let (reference, event) = ClientEvent::from_text("not json");
        assert_eq!(reference, None);
        assert!(matches!(event, Err(FrameError::Malformed(_))));
    }

    #[test]
    fn server_events_use_event_and_data_keys() {
        let text = ServerEvent::MessageRead(MessageRead {
            message_id: 8,
            read_by: 2,
        })
        .to_text()
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({ "event": "message_read", "data": { "messageId": 8, "readBy": 2 } })
        );

        let hello: Value = serde_json::from_str(
            &ServerEvent::Hello(HelloPayload {
                heartbeat_interval: 30_000,
            })
            .to_text()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(hello["event"], "hello");
        assert_eq!(hello["data"]["heartbeatInterval"], 30_000);
    }

    #[test]
    fn reply_frames_echo_the_reference() {
        let text = GatewayFrame::reply(Some(7), &Reply::ok()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({ "event": "reply", "data": { "status": "success" }, "ref": 7 })
        );
    }
}
