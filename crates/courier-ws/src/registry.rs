use std::collections::HashMap;
use std::sync::Arc;

use courier_core::ConnectionId;
use dashmap::DashMap;

use crate::connection::Connection;

/// Index of authenticated connections: User -> {ConnectionId -> Connection},
/// plus the reverse ConnectionId -> User map for O(1) removal.
///
/// A connection is filed under at most one user, and a user with no
/// connections has no entry.
#[derive(Default)]
pub struct ConnectionRegistry {
    users: DashMap<i64, HashMap<ConnectionId, Arc<Connection>>>,
    owners: DashMap<ConnectionId, i64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// File `connection` under `user_id`. Registering the same pair again is
    /// a no-op; registering under a new user moves it. Returns `true` if the
    /// connection was newly added for this user.
    pub fn register(&self, user_id: i64, connection: &Arc<Connection>) -> bool {
        if connection.is_closed() {
            return false;
        }
        let id = connection.id();
        // Both maps change under the bucket's entry lock, so an unregister
        // never sees the owner without the bucket entry.
        let (added, previous) = {
            let mut bucket = self.users.entry(user_id).or_default();
            let added = bucket.insert(id, connection.clone()).is_none();
            (added, self.owners.insert(id, user_id))
        };
        if let Some(previous) = previous.filter(|previous| *previous != user_id) {
            self.remove_from_bucket(previous, id);
        }

        // A close that raced with registration may have unregistered before
        // the entry existed. Clean up both maps here rather than relying on
        // the owner lookup in `unregister`.
        if connection.is_closed() {
            self.owners.remove_if(&id, |_, owner| *owner == user_id);
            self.remove_from_bucket(user_id, id);
            return false;
        }
        if added {
            tracing::debug!(
                user_id,
                connection_id = %id,
                "connection registered"
            );
        }
        added
    }

    /// Remove a connection wherever it is filed. Returns the user it was
    /// filed under, or `None` if it was not registered.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<i64> {
        let (_, user_id) = self.owners.remove(&connection_id)?;
        self.remove_from_bucket(user_id, connection_id);
        tracing::debug!(
            user_id,
            connection_id = %connection_id,
            "connection unregistered"
        );
        Some(user_id)
    }

    fn remove_from_bucket(&self, user_id: i64, connection_id: ConnectionId) {
        if let Some(mut bucket) = self.users.get_mut(&user_id) {
            bucket.remove(&connection_id);
        }
        self.users.remove_if(&user_id, |_, bucket| bucket.is_empty());
    }

    /// Snapshot of every connection filed under `user_id`, live or not.
    pub fn get(&self, user_id: i64) -> Vec<Arc<Connection>> {
        self.users
            .get(&user_id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Connections of `user_id` whose liveness flag is set.
    pub fn live(&self, user_id: i64) -> Vec<Arc<Connection>> {
        let mut connections = self.get(user_id);
        connections.retain(|connection| connection.is_alive());
        connections
    }

    /// Apply `f` to each live connection of `user_id`. Runs over a snapshot,
    /// so `f` may unregister connections. Returns how many were visited.
    pub fn for_each(&self, user_id: i64, mut f: impl FnMut(&Arc<Connection>)) -> usize {
        let connections = self.live(user_id);
        for connection in &connections {
            f(connection);
        }
        connections.len()
    }

    pub fn connection(&self, connection_id: ConnectionId) -> Option<Arc<Connection>> {
        let user_id = *self.owners.get(&connection_id)?;
        self.users
            .get(&user_id)
            .and_then(|bucket| bucket.get(&connection_id).cloned())
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.owners.contains_key(&connection_id)
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.users.contains_key(&user_id)
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.users
            .iter()
            .flat_map(|bucket| bucket.values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Remove and return every registered connection.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let drained = self.all();
        for connection in &drained {
            self.unregister(connection.id());
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}
