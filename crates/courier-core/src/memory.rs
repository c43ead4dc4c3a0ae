//! Process-local implementation of every collaborator port. Backs the
//! standalone server and the test suites; production deployments plug in
//! their own store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use chrono::Utc;
use courier_models::message::{Addressing, NewMessage, StoredMessage, UserSummary};
use dashmap::DashMap;

use crate::error::StoreError;
use crate::ports::{
    BoxFuture, ContextDirectory, MessageStore, SessionValidator, StoreResult,
};

#[derive(Debug, Clone)]
struct UserRecord {
    display_name: String,
    token: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct ContextRecord {
    participants: HashSet<i64>,
    publishers: HashSet<i64>,
}

pub struct InMemoryBackend {
    next_message_id: AtomicI64,
    users: DashMap<i64, UserRecord>,
    contexts: DashMap<i64, ContextRecord>,
    messages: DashMap<i64, StoredMessage>,
    available: AtomicBool,
    persisted: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1),
            users: DashMap::new(),
            contexts: DashMap::new(),
            messages: DashMap::new(),
            available: AtomicBool::new(true),
            persisted: AtomicUsize::new(0),
        }
    }

    /// Register a user. With a token, `validate_session` requires it to match.
    pub fn add_user(&self, user_id: i64, display_name: impl Into<String>, token: Option<String>) {
        self.users.insert(
            user_id,
            UserRecord {
                display_name: display_name.into(),
                token,
            },
        );
    }

    /// Create or replace a context with its participant set.
    pub fn add_context(&self, context_id: i64, participants: impl IntoIterator<Item = i64>) {
        let mut record = self.contexts.entry(context_id).or_default();
        record.participants = participants.into_iter().collect();
    }

    /// Allow `user_id` to publish positions for a context.
    pub fn allow_location_publisher(&self, context_id: i64, user_id: i64) {
        self.contexts
            .entry(context_id)
            .or_default()
            .publishers
            .insert(user_id);
    }

    /// Simulate a storage outage: every call fails with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of messages persisted so far.
    pub fn persisted_count(&self) -> usize {
        self.persisted.load(Ordering::SeqCst)
    }

    pub fn message(&self, message_id: i64) -> Option<StoredMessage> {
        self.messages.get(&message_id).map(|m| m.clone())
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store is offline".into()))
        }
    }

    fn summary(&self, user_id: i64) -> UserSummary {
        let display_name = self
            .users
            .get(&user_id)
            .map(|user| user.display_name.clone())
            .unwrap_or_else(|| format!("user-{user_id}"));
        UserSummary {
            id: user_id,
            display_name,
        }
    }

    fn store_message(&self, message: NewMessage) -> StoreResult<StoredMessage> {
        self.ensure_available()?;
        let receiver = match message.addressing {
            Addressing::Direct { receiver_id } => {
                if !self.users.contains_key(&receiver_id) {
                    return Err(StoreError::NotFound);
                }
                Some(self.summary(receiver_id))
            }
            Addressing::Context { context_id } => {
                if !self.contexts.contains_key(&context_id) {
                    return Err(StoreError::NotFound);
                }
                None
            }
        };
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let stored = StoredMessage {
            id,
            sender_id: message.sender_id,
            receiver_id: message.addressing.receiver_id(),
            context_id: message.addressing.context_id(),
            content: message.content,
            attachment_url: message.attachment_url,
            created_at: Utc::now(),
            is_read: false,
            sender: self.summary(message.sender_id),
            receiver,
        };
        self.messages.insert(id, stored.clone());
        self.persisted.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    fn mark_read(&self, message_id: i64) -> StoreResult<StoredMessage> {
        self.ensure_available()?;
        let mut message = self.messages.get_mut(&message_id).ok_or(StoreError::NotFound)?;
        message.is_read = true;
        Ok(message.clone())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for InMemoryBackend {
    fn persist_message(&self, message: NewMessage) -> BoxFuture<'_, StoreResult<StoredMessage>> {
        Box::pin(async move { self.store_message(message) })
    }

    fn mark_message_read(
        &self,
        message_id: i64,
        _reader_id: i64,
    ) -> BoxFuture<'_, StoreResult<StoredMessage>> {
        Box::pin(async move { self.mark_read(message_id) })
    }

    fn get_message(&self, message_id: i64) -> BoxFuture<'_, StoreResult<Option<StoredMessage>>> {
        Box::pin(async move {
            self.ensure_available()?;
            Ok(self.message(message_id))
        })
    }
}

impl ContextDirectory for InMemoryBackend {
    fn resolve_context_participants(
        &self,
        context_id: i64,
    ) -> BoxFuture<'_, StoreResult<HashSet<i64>>> {
        Box::pin(async move {
            self.ensure_available()?;
            self.contexts
                .get(&context_id)
                .map(|context| context.participants.clone())
                .ok_or(StoreError::NotFound)
        })
    }

    fn authorize_location_update(
        &self,
        user_id: i64,
        context_id: i64,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            self.ensure_available()?;
            self.contexts
                .get(&context_id)
                .map(|context| context.publishers.contains(&user_id))
                .ok_or(StoreError::NotFound)
        })
    }
}

impl SessionValidator for InMemoryBackend {
    fn validate_session(
        &self,
        user_id: i64,
        credentials: Option<String>,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            self.ensure_available()?;
            let Some(user) = self.users.get(&user_id) else {
                return Ok(false);
            };
            Ok(match &user.token {
                Some(expected) => credentials.as_deref() == Some(expected.as_str()),
                None => true,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.add_user(1, "Pharmacy", None);
        backend.add_user(2, "Customer", Some("secret".into()));
        backend.add_context(10, [1, 2]);
        backend
    }

    #[tokio::test]
    async fn persists_direct_messages_with_summaries() {
        let backend = backend();
        let stored = backend
            .persist_message(NewMessage {
                sender_id: 1,
                addressing: Addressing::Direct { receiver_id: 2 },
                content: "ready for pickup".into(),
                attachment_url: None,
            })
            .await
            .unwrap();
        assert_eq!(stored.receiver_id, Some(2));
        assert_eq!(stored.sender.display_name, "Pharmacy");
        assert_eq!(stored.receiver.unwrap().display_name, "Customer");
        assert!(!stored.is_read);
        assert_eq!(backend.persisted_count(), 1);
    }

    #[tokio::test]
    async fn unknown_receiver_is_not_found() {
        let backend = backend();
        let err = backend
            .persist_message(NewMessage {
                sender_id: 1,
                addressing: Addressing::Direct { receiver_id: 99 },
                content: "hi".into(),
                attachment_url: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound);
        assert_eq!(backend.persisted_count(), 0);
    }

    #[tokio::test]
    async fn mark_read_on_missing_message_is_not_found() {
        let backend = backend();
        assert_eq!(
            backend.mark_message_read(404, 2).await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test]
    async fn session_tokens_are_checked_when_configured() {
        let backend = backend();
        assert!(backend.validate_session(1, None).await.unwrap());
        assert!(!backend.validate_session(2, None).await.unwrap());
        assert!(!backend.validate_session(2, Some("wrong".into())).await.unwrap());
        assert!(backend.validate_session(2, Some("secret".into())).await.unwrap());
        assert!(!backend.validate_session(3, None).await.unwrap());
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let backend = backend();
        backend.set_available(false);
        assert!(matches!(
            backend.resolve_context_participants(10).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            backend.validate_session(1, None).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn only_registered_publishers_may_update_location() {
        let backend = backend();
        backend.allow_location_publisher(10, 1);
        assert!(backend.authorize_location_update(1, 10).await.unwrap());
        assert!(!backend.authorize_location_update(2, 10).await.unwrap());
        assert_eq!(
            backend.authorize_location_update(1, 11).await.unwrap_err(),
            StoreError::NotFound
        );
    }
}
