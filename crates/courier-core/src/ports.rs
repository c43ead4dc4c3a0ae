//! Interfaces to the systems the gateway depends on but does not own:
//! the message store, the context (order) directory and session validation.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use courier_models::message::{NewMessage, StoredMessage};

use crate::error::StoreError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type StoreResult<T> = Result<T, StoreError>;

pub trait MessageStore: Send + Sync {
    fn persist_message(&self, message: NewMessage) -> BoxFuture<'_, StoreResult<StoredMessage>>;

    /// Mark a message read by `reader_id`. Fails with `StoreError::NotFound`
    /// for unknown ids.
    fn mark_message_read(
        &self,
        message_id: i64,
        reader_id: i64,
    ) -> BoxFuture<'_, StoreResult<StoredMessage>>;

    fn get_message(&self, message_id: i64) -> BoxFuture<'_, StoreResult<Option<StoredMessage>>>;
}

pub trait ContextDirectory: Send + Sync {
    fn resolve_context_participants(
        &self,
        context_id: i64,
    ) -> BoxFuture<'_, StoreResult<HashSet<i64>>>;

    /// Whether `user_id` may publish positions for `context_id`.
    fn authorize_location_update(
        &self,
        user_id: i64,
        context_id: i64,
    ) -> BoxFuture<'_, StoreResult<bool>>;
}

pub trait SessionValidator: Send + Sync {
    fn validate_session(
        &self,
        user_id: i64,
        credentials: Option<String>,
    ) -> BoxFuture<'_, StoreResult<bool>>;
}
