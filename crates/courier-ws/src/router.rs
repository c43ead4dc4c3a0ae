use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use courier_core::locations::{LatestPositions, LocationOutcome};
use courier_core::subscriptions::ContextSubscriptions;
use courier_core::{Collaborators, ConnectionId, GatewayError};
use courier_models::gateway::{
    ClientEvent, ContextPayload, ReadMessagePayload, SendMessagePayload, ServerEvent,
};
use courier_models::location::LocationUpdate;
use courier_models::message::{Addressing, MessageRead, NewMessage};
use courier_models::reply::Reply;

use crate::connection::Connection;

/// What to push after an event has been handled.
#[derive(Debug)]
pub enum Delivery {
    None,
    Users {
        targets: HashSet<i64>,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    },
    Subscribers {
        context_id: i64,
        event: ServerEvent,
    },
    Origin(ServerEvent),
}

#[derive(Debug)]
pub struct Routed {
    pub reply: Reply,
    pub delivery: Delivery,
}

/// Validates, authorizes and persists domain events for authenticated
/// connections, and decides who hears about them.
pub struct EventRouter {
    subscriptions: Arc<ContextSubscriptions>,
    positions: LatestPositions,
    max_content_length: usize,
}

impl EventRouter {
    pub fn new(subscriptions: Arc<ContextSubscriptions>, max_content_length: usize) -> Self {
        Self {
            subscriptions,
            positions: LatestPositions::new(),
            max_content_length,
        }
    }

    /// Drop latest positions of contexts that went quiet. Returns how many
    /// were dropped.
    pub fn prune_positions(&self, max_age: Duration) -> usize {
        self.positions.retain_recent(max_age)
    }

    pub async fn route(
        &self,
        collaborators: &Collaborators,
        connection: &Arc<Connection>,
        event: ClientEvent,
    ) -> Result<Routed, GatewayError> {
        let user_id = connection.user_id().ok_or(GatewayError::Unauthenticated)?;
        match event {
            ClientEvent::SendMessage(payload) => {
                self.send_message(collaborators, connection, user_id, payload)
                    .await
            }
            ClientEvent::ReadMessage(payload) => {
                self.read_message(collaborators, user_id, payload).await
            }
            ClientEvent::UpdateLocation(update) => {
                self.update_location(collaborators, user_id, update).await
            }
            ClientEvent::SubscribeContext(payload) => {
                self.subscribe_context(collaborators, connection, user_id, payload)
                    .await
            }
            ClientEvent::UnsubscribeContext(payload) => {
                self.subscriptions
                    .unsubscribe(payload.context_id, connection.id());
                Ok(Routed {
                    reply: Reply::ok(),
                    delivery: Delivery::None,
                })
            }
            ClientEvent::Authenticate(_) | ClientEvent::Heartbeat => Err(
                GatewayError::Validation(format!("'{}' is not a routed event", event.name())),
            ),
        }
    }

    async fn send_message(
        &self,
        collaborators: &Collaborators,
        connection: &Arc<Connection>,
        user_id: i64,
        payload: SendMessagePayload,
    ) -> Result<Routed, GatewayError> {
        if payload.sender_id.is_some_and(|sender_id| sender_id != user_id) {
            return Err(GatewayError::Authorization(
                "senderId does not match the authenticated user".into(),
            ));
        }
        let addressing = Addressing::from_parts(payload.receiver_id, payload.context_id)
            .ok_or(GatewayError::InvalidAddressing)?;
        let content = payload.content;
        if content.trim().is_empty() && payload.attachment_url.is_none() {
            return Err(GatewayError::Validation("content must not be empty".into()));
        }
        if content.chars().count() > self.max_content_length {
            return Err(GatewayError::Validation(format!(
                "content exceeds {} characters",
                self.max_content_length
            )));
        }

        let mut targets = match addressing {
            Addressing::Direct { receiver_id } => HashSet::from([receiver_id]),
            Addressing::Context { context_id } => {
                let participants = self.participants(collaborators, context_id).await?;
                if !participants.contains(&user_id) {
                    return Err(GatewayError::Authorization(format!(
                        "not a participant of context {context_id}"
                    )));
                }
                participants
            }
        };
        // The sender's other devices mirror the conversation.
        targets.insert(user_id);

        let stored = collaborators
            .messages
            .persist_message(NewMessage {
                sender_id: user_id,
                addressing,
                content,
                attachment_url: payload.attachment_url,
            })
            .await
            .map_err(|err| GatewayError::from_store(err, "message target"))?;

        tracing::debug!(
            message_id = stored.id,
            sender_id = user_id,
            receiver_id = ?stored.receiver_id,
            context_id = ?stored.context_id,
            "message persisted"
        );

        Ok(Routed {
            reply: Reply::with_message(stored.clone()),
            delivery: Delivery::Users {
                targets,
                event: ServerEvent::NewMessage(stored),
                exclude: Some(connection.id()),
            },
        })
    }

    async fn read_message(
        &self,
        collaborators: &Collaborators,
        user_id: i64,
        payload: ReadMessagePayload,
    ) -> Result<Routed, GatewayError> {
        let message_id = payload.message_id;
        let message = collaborators
            .messages
            .get_message(message_id)
            .await
            .map_err(|err| GatewayError::from_store(err, format!("message {message_id}")))?
            .ok_or_else(|| GatewayError::NotFound(format!("message {message_id}")))?;

        let allowed = match message.addressing() {
            Some(Addressing::Direct { receiver_id }) => receiver_id == user_id,
            Some(Addressing::Context { context_id }) => {
                message.sender_id != user_id
                    && self
                        .participants(collaborators, context_id)
                        .await?
                        .contains(&user_id)
            }
            None => false,
        };
        if !allowed {
            return Err(GatewayError::Authorization(format!(
                "cannot mark message {message_id} as read"
            )));
        }

        let updated = collaborators
            .messages
            .mark_message_read(message_id, user_id)
            .await
            .map_err(|err| GatewayError::from_store(err, format!("message {message_id}")))?;

        Ok(Routed {
            delivery: Delivery::Users {
                targets: HashSet::from([updated.sender_id]),
                event: ServerEvent::MessageRead(MessageRead {
                    message_id,
                    read_by: user_id,
                }),
                exclude: None,
            },
            reply: Reply::with_message(updated),
        })
    }

    async fn update_location(
        &self,
        collaborators: &Collaborators,
        user_id: i64,
        update: LocationUpdate,
    ) -> Result<Routed, GatewayError> {
        if update.user_id != user_id {
            return Err(GatewayError::Authorization(
                "cannot publish location for another user".into(),
            ));
        }
        update
            .validate()
            .map_err(|reason| GatewayError::Validation(reason.to_string()))?;

        let context_id = update.context_id;
        let authorized = collaborators
            .contexts
            .authorize_location_update(user_id, context_id)
            .await
            .map_err(|err| GatewayError::from_store(err, format!("context {context_id}")))?;
        if !authorized {
            return Err(GatewayError::Authorization(format!(
                "not allowed to publish location for context {context_id}"
            )));
        }

        let delivery = match self.positions.apply(&update) {
            LocationOutcome::Applied => Delivery::Subscribers {
                context_id,
                event: ServerEvent::LocationUpdated(update),
            },
            LocationOutcome::Stale { latest_timestamp } => {
                tracing::debug!(
                    context_id,
                    user_id,
                    timestamp = update.timestamp,
                    latest_timestamp,
                    "stale location update ignored"
                );
                Delivery::None
            }
        };
        Ok(Routed {
            reply: Reply::ok(),
            delivery,
        })
    }

    async fn subscribe_context(
        &self,
        collaborators: &Collaborators,
        connection: &Arc<Connection>,
        user_id: i64,
        payload: ContextPayload,
    ) -> Result<Routed, GatewayError> {
        let context_id = payload.context_id;
        let participants = self.participants(collaborators, context_id).await?;
        if !participants.contains(&user_id) {
            return Err(GatewayError::Authorization(format!(
                "not a participant of context {context_id}"
            )));
        }
        self.subscriptions.subscribe(context_id, connection.id());

        let delivery = match self.positions.latest(context_id) {
            Some(latest) => Delivery::Origin(ServerEvent::LocationUpdated(latest)),
            None => Delivery::None,
        };
        Ok(Routed {
            reply: Reply::ok(),
            delivery,
        })
    }

    /// Context participants. An unresolvable or empty set is a storage
    /// failure; there is no fallback audience.
    async fn participants(
        &self,
        collaborators: &Collaborators,
        context_id: i64,
    ) -> Result<HashSet<i64>, GatewayError> {
        let participants = collaborators
            .contexts
            .resolve_context_participants(context_id)
            .await
            .map_err(|err| {
                GatewayError::Persistence(format!(
                    "could not resolve participants of context {context_id}: {err}"
                ))
            })?;
        if participants.is_empty() {
            return Err(GatewayError::Persistence(format!(
                "context {context_id} has no participants"
            )));
        }
        Ok(participants)
    }
}
