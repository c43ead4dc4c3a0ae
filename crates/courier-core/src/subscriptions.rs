use std::collections::HashSet;

use dashmap::DashMap;

use crate::ConnectionId;

/// In-memory index: Context -> Set<ConnectionId>, with the reverse index
/// so a closing connection can be dropped from every context at once.
/// Empty sets are removed on both sides.
pub struct ContextSubscriptions {
    contexts: DashMap<i64, HashSet<ConnectionId>>,
    connections: DashMap<ConnectionId, HashSet<i64>>,
}

impl ContextSubscriptions {
    pub fn new() -> Self {
        Self {
            contexts: DashMap::new(),
            connections: DashMap::new(),
        }
    }

    /// Returns `true` if the connection was not already subscribed.
    pub fn subscribe(&self, context_id: i64, connection_id: ConnectionId) -> bool {
        let added = self
            .contexts
            .entry(context_id)
            .or_default()
            .insert(connection_id);
        self.connections
            .entry(connection_id)
            .or_default()
            .insert(context_id);
        added
    }

    /// Returns `true` if a subscription was removed.
    pub fn unsubscribe(&self, context_id: i64, connection_id: ConnectionId) -> bool {
        let removed = match self.contexts.get_mut(&context_id) {
            Some(mut members) => members.remove(&connection_id),
            None => false,
        };
        self.contexts.remove_if(&context_id, |_, members| members.is_empty());

        if let Some(mut contexts) = self.connections.get_mut(&connection_id) {
            contexts.remove(&context_id);
        }
        self.connections
            .remove_if(&connection_id, |_, contexts| contexts.is_empty());
        removed
    }

    /// Drop a connection from every context it joined. Returns how many
    /// subscriptions were removed.
    pub fn remove_connection(&self, connection_id: ConnectionId) -> usize {
        let Some((_, contexts)) = self.connections.remove(&connection_id) else {
            return 0;
        };
        for context_id in &contexts {
            if let Some(mut members) = self.contexts.get_mut(context_id) {
                members.remove(&connection_id);
            }
            self.contexts.remove_if(context_id, |_, members| members.is_empty());
        }
        tracing::debug!(
            connection_id = %connection_id,
            contexts = contexts.len(),
            "connection removed from context subscriptions"
        );
        contexts.len()
    }

    /// Snapshot of the connections subscribed to a context.
    pub fn subscribers(&self, context_id: i64) -> Vec<ConnectionId> {
        self.contexts
            .get(&context_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contexts_for(&self, connection_id: ConnectionId) -> Vec<i64> {
        self.connections
            .get(&connection_id)
            .map(|contexts| contexts.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn clear(&self) {
        self.contexts.clear();
        self.connections.clear();
    }
}

impl Default for ContextSubscriptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribing_twice_is_idempotent() {
        let subs = ContextSubscriptions::new();
        let conn = ConnectionId::new();
        assert!(subs.subscribe(7, conn));
        assert!(!subs.subscribe(7, conn));
        assert_eq!(subs.subscribers(7), vec![conn]);
    }

    #[test]
    fn last_unsubscribe_drops_the_context() {
        let subs = ContextSubscriptions::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        subs.subscribe(7, a);
        subs.subscribe(7, b);

        assert!(subs.unsubscribe(7, a));
        assert_eq!(subs.context_count(), 1);
        assert!(subs.unsubscribe(7, b));
        assert_eq!(subs.context_count(), 0);
        assert!(subs.contexts_for(b).is_empty());
        assert!(!subs.unsubscribe(7, b));
    }

    #[test]
    fn removing_a_connection_clears_all_its_contexts() {
        let subs = ContextSubscriptions::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        subs.subscribe(1, a);
        subs.subscribe(2, a);
        subs.subscribe(2, b);

        assert_eq!(subs.remove_connection(a), 2);
        assert!(subs.subscribers(1).is_empty());
        assert_eq!(subs.subscribers(2), vec![b]);
        assert_eq!(subs.context_count(), 1);
        assert_eq!(subs.remove_connection(a), 0);
    }
}
