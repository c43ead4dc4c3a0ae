use std::collections::HashSet;
use std::sync::Arc;

use courier_core::subscriptions::ContextSubscriptions;
use courier_core::ConnectionId;
use courier_models::gateway::{ServerEvent, CLOSE_DELIVERY_FAILED};

use crate::connection::{Connection, Outbound};
use crate::registry::ConnectionRegistry;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    /// Target users with no live connection. Nothing is queued for them.
    pub skipped_users: Vec<i64>,
    /// Connections that could not take the frame and were evicted.
    pub failed: Vec<ConnectionId>,
}

/// Pushes server events to live connections. The frame is encoded once
/// and shared; a connection that cannot accept it is closed and removed
/// without affecting any other delivery.
pub struct FanoutDispatcher {
    registry: Arc<ConnectionRegistry>,
    subscriptions: Arc<ContextSubscriptions>,
}

impl FanoutDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        subscriptions: Arc<ContextSubscriptions>,
    ) -> Self {
        Self {
            registry,
            subscriptions,
        }
    }

    /// Deliver `event` to every live connection of every target user,
    /// except `exclude`.
    pub fn dispatch(
        &self,
        targets: &HashSet<i64>,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> FanoutReport {
        let mut report = FanoutReport::default();
        let Some(frame) = encode(event) else {
            return report;
        };
        for &user_id in targets {
            let mut connections = self.registry.live(user_id);
            connections.retain(|connection| Some(connection.id()) != exclude);
            if connections.is_empty() {
                tracing::debug!(
                    user_id,
                    event = event.name(),
                    "no live connections for user, skipping"
                );
                report.skipped_users.push(user_id);
                continue;
            }
            for connection in &connections {
                self.push(connection, &frame, &mut report);
            }
        }
        report
    }

    /// Deliver `event` to every live connection subscribed to a context.
    pub fn dispatch_to_subscribers(&self, context_id: i64, event: &ServerEvent) -> FanoutReport {
        let connections: Vec<Arc<Connection>> = self
            .subscriptions
            .subscribers(context_id)
            .into_iter()
            .filter_map(|id| self.registry.connection(id))
            .filter(|connection| connection.is_alive())
            .collect();
        self.dispatch_to_connections(&connections, event)
    }

    pub fn dispatch_to_connections(
        &self,
        connections: &[Arc<Connection>],
        event: &ServerEvent,
    ) -> FanoutReport {
        let mut report = FanoutReport::default();
        let Some(frame) = encode(event) else {
            return report;
        };
        for connection in connections {
            self.push(connection, &frame, &mut report);
        }
        report
    }

    fn push(&self, connection: &Arc<Connection>, frame: &Arc<str>, report: &mut FanoutReport) {
        match connection.try_send(Outbound::Text(frame.clone())) {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                tracing::warn!(
                    connection_id = %connection.id(),
                    user_id = ?connection.user_id(),
                    error = %err,
                    "push failed, evicting connection"
                );
                connection.close(CLOSE_DELIVERY_FAILED, "delivery failed");
                self.registry.unregister(connection.id());
                self.subscriptions.remove_connection(connection.id());
                report.failed.push(connection.id());
            }
        }
    }
}

fn encode(event: &ServerEvent) -> Option<Arc<str>> {
    match event.to_text() {
        Ok(text) => Some(Arc::from(text)),
        Err(err) => {
            tracing::error!(event = event.name(), error = %err, "failed to encode push");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_models::message::MessageRead;
    use tokio::sync::mpsc;

    fn event() -> ServerEvent {
        ServerEvent::MessageRead(MessageRead {
            message_id: 1,
            read_by: 2,
        })
    }

    fn registered(
        registry: &ConnectionRegistry,
        user_id: i64,
    ) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let connection = Arc::new(Connection::new(tx));
        registry.register(user_id, &connection);
        (connection, rx)
    }

    fn dispatcher() -> (FanoutDispatcher, Arc<ConnectionRegistry>, Arc<ContextSubscriptions>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let subscriptions = Arc::new(ContextSubscriptions::new());
        (
            FanoutDispatcher::new(registry.clone(), subscriptions.clone()),
            registry,
            subscriptions,
        )
    }

    #[test]
    fn every_device_of_a_target_receives_the_frame() {
        let (fanout, registry, _) = dispatcher();
        let (_a, mut rx_a) = registered(&registry, 1);
        let (_b, mut rx_b) = registered(&registry, 1);

        let report = fanout.dispatch(&HashSet::from([1]), &event(), None);
        assert_eq!(report.delivered, 2);
        assert!(matches!(rx_a.try_recv(), Ok(Outbound::Text(_))));
        assert!(matches!(rx_b.try_recv(), Ok(Outbound::Text(_))));
    }

    #[test]
    fn offline_users_are_skipped() {
        let (fanout, _, _) = dispatcher();
        let report = fanout.dispatch(&HashSet::from([42]), &event(), None);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.skipped_users, vec![42]);
    }

    #[test]
    fn excluded_connection_is_not_pushed() {
        let (fanout, registry, _) = dispatcher();
        let (origin, mut rx_origin) = registered(&registry, 1);
        let (_other, mut rx_other) = registered(&registry, 1);

        let report = fanout.dispatch(&HashSet::from([1]), &event(), Some(origin.id()));
        assert_eq!(report.delivered, 1);
        assert!(rx_origin.try_recv().is_err());
        assert!(rx_other.try_recv().is_ok());
    }

    #[test]
    fn a_broken_connection_is_evicted_without_affecting_siblings() {
        let (fanout, registry, subscriptions) = dispatcher();
        let (broken, rx_broken) = registered(&registry, 1);
        let (_sibling, mut rx_sibling) = registered(&registry, 1);
        let (_other_user, mut rx_other) = registered(&registry, 2);
        subscriptions.subscribe(5, broken.id());
        drop(rx_broken);

        let report = fanout.dispatch(&HashSet::from([1, 2]), &event(), None);
        assert_eq!(report.failed, vec![broken.id()]);
        assert_eq!(report.delivered, 2);
        assert!(rx_sibling.try_recv().is_ok());
        assert!(rx_other.try_recv().is_ok());
        assert!(!registry.contains(broken.id()));
        assert!(broken.is_closed());
        assert!(subscriptions.subscribers(5).is_empty());
    }

    #[test]
    fn subscribers_receive_context_pushes() {
        let (fanout, registry, subscriptions) = dispatcher();
        let (watcher, mut rx_watcher) = registered(&registry, 1);
        let (_bystander, mut rx_bystander) = registered(&registry, 2);
        subscriptions.subscribe(9, watcher.id());

        let report = fanout.dispatch_to_subscribers(9, &event());
        assert_eq!(report.delivered, 1);
        assert!(rx_watcher.try_recv().is_ok());
        assert!(rx_bystander.try_recv().is_err());
    }
}
