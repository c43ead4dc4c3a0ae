use std::sync::Arc;

use courier_core::ports::SessionValidator;
use courier_core::subscriptions::ContextSubscriptions;
use courier_core::{GatewayError, StoreError};
use courier_models::gateway::AuthenticatePayload;

use crate::connection::Connection;
use crate::registry::ConnectionRegistry;

/// Binds a socket to a user after the session collaborator vouches for it.
pub struct AuthenticationHandshake {
    registry: Arc<ConnectionRegistry>,
    subscriptions: Arc<ContextSubscriptions>,
}

impl AuthenticationHandshake {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        subscriptions: Arc<ContextSubscriptions>,
    ) -> Self {
        Self {
            registry,
            subscriptions,
        }
    }

    /// Validate and bind. A rejected session leaves the connection
    /// unauthenticated, even if it was bound before, and the client may
    /// try again. A validator outage changes nothing.
    pub async fn authenticate(
        &self,
        sessions: &dyn SessionValidator,
        connection: &Arc<Connection>,
        payload: AuthenticatePayload,
    ) -> Result<i64, GatewayError> {
        let user_id = payload.user_id;
        let valid = sessions
            .validate_session(user_id, payload.token)
            .await
            .or_else(|err| match err {
                StoreError::NotFound => Ok(false),
                other => Err(GatewayError::Persistence(other.to_string())),
            })?;
        if !valid {
            let revoked = self.revoke(connection);
            tracing::warn!(
                target: "security",
                connection_id = %connection.id(),
                user_id,
                revoked_user_id = ?revoked,
                "session validation rejected"
            );
            return Err(GatewayError::Unauthenticated);
        }

        let previous = connection.bind_user(user_id);
        if let Some(previous) = previous.filter(|previous| *previous != user_id) {
            // Context subscriptions were authorized for the old identity.
            let dropped = self.subscriptions.remove_connection(connection.id());
            tracing::info!(
                connection_id = %connection.id(),
                previous_user_id = previous,
                user_id,
                dropped_subscriptions = dropped,
                "connection re-authenticated as a different user"
            );
        }
        self.registry.register(user_id, connection);

        tracing::info!(
            connection_id = %connection.id(),
            user_id,
            reauthenticated = previous.is_some(),
            "connection authenticated"
        );
        Ok(user_id)
    }

    /// Strip an existing binding so a rejected session cannot keep acting
    /// as the user it was bound to.
    fn revoke(&self, connection: &Arc<Connection>) -> Option<i64> {
        let previous = connection.unbind_user()?;
        self.registry.unregister(connection.id());
        self.subscriptions.remove_connection(connection.id());
        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::memory::InMemoryBackend;
    use tokio::sync::mpsc;

    type Fixture = (
        AuthenticationHandshake,
        Arc<ConnectionRegistry>,
        Arc<ContextSubscriptions>,
        InMemoryBackend,
    );

    fn setup() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let subscriptions = Arc::new(ContextSubscriptions::new());
        let backend = InMemoryBackend::new();
        backend.add_user(1, "Courier", None);
        backend.add_user(2, "Customer", Some("token-2".into()));
        (
            AuthenticationHandshake::new(registry.clone(), subscriptions.clone()),
            registry,
            subscriptions,
            backend,
        )
    }

    fn connection() -> Arc<Connection> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(Connection::new(tx))
    }

    fn payload(user_id: i64, token: Option<&str>) -> AuthenticatePayload {
        AuthenticatePayload {
            user_id,
            token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn rejected_sessions_leave_the_connection_unbound() {
        let (handshake, registry, _, backend) = setup();
        let conn = connection();
        let err = handshake
            .authenticate(&backend, &conn, payload(2, Some("nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated));
        assert!(!conn.is_authenticated());
        assert!(registry.is_empty());

        // Retry with the right token succeeds.
        let user_id = handshake
            .authenticate(&backend, &conn, payload(2, Some("token-2")))
            .await
            .unwrap();
        assert_eq!(user_id, 2);
        assert_eq!(registry.get(2).len(), 1);
    }

    #[tokio::test]
    async fn re_authentication_does_not_duplicate_entries() {
        let (handshake, registry, _, backend) = setup();
        let conn = connection();
        handshake.authenticate(&backend, &conn, payload(1, None)).await.unwrap();
        handshake.authenticate(&backend, &conn, payload(1, None)).await.unwrap();
        assert_eq!(registry.get(1).len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn switching_users_drops_old_subscriptions() {
        let (handshake, registry, subscriptions, backend) = setup();
        let conn = connection();
        handshake.authenticate(&backend, &conn, payload(1, None)).await.unwrap();
        subscriptions.subscribe(77, conn.id());

        handshake
            .authenticate(&backend, &conn, payload(2, Some("token-2")))
            .await
            .unwrap();
        assert!(subscriptions.subscribers(77).is_empty());
        assert!(!registry.is_online(1));
        assert!(registry.is_online(2));
    }

    #[tokio::test]
    async fn rejected_re_authentication_revokes_the_binding() {
        let (handshake, registry, subscriptions, backend) = setup();
        let conn = connection();
        handshake
            .authenticate(&backend, &conn, payload(2, Some("token-2")))
            .await
            .unwrap();
        subscriptions.subscribe(77, conn.id());

        backend.add_user(2, "Customer", Some("rotated".into()));
        let err = handshake
            .authenticate(&backend, &conn, payload(2, Some("token-2")))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated));
        assert_eq!(conn.user_id(), None);
        assert!(!registry.contains(conn.id()));
        assert!(!registry.is_online(2));
        assert!(subscriptions.subscribers(77).is_empty());
    }

    #[tokio::test]
    async fn validator_outage_keeps_an_existing_binding() {
        let (handshake, registry, _, backend) = setup();
        let conn = connection();
        handshake.authenticate(&backend, &conn, payload(1, None)).await.unwrap();

        backend.set_available(false);
        let err = handshake
            .authenticate(&backend, &conn, payload(1, None))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Persistence(_)));
        assert_eq!(conn.user_id(), Some(1));
        assert!(registry.is_online(1));
    }

    #[tokio::test]
    async fn validator_outage_is_a_persistence_error() {
        let (handshake, registry, _, backend) = setup();
        backend.set_available(false);
        let err = handshake
            .authenticate(&backend, &connection(), payload(1, None))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Persistence(_)));
        assert!(registry.is_empty());
    }
}
