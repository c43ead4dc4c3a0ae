use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use courier_core::subscriptions::ContextSubscriptions;
use courier_core::{Collaborators, ConnectionId, GatewayConfig, GatewayError};
use courier_models::gateway::{
    ClientEvent, HelloPayload, ServerEvent, CLOSE_DELIVERY_FAILED, CLOSE_GOING_AWAY,
    CLOSE_HEARTBEAT_TIMEOUT,
};
use courier_models::reply::Reply;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection::{Connection, Outbound};
use crate::fanout::{FanoutDispatcher, FanoutReport};
use crate::handshake::AuthenticationHandshake;
use crate::heartbeat::HeartbeatMonitor;
use crate::limits::EventRateLimits;
use crate::registry::ConnectionRegistry;
use crate::router::{Delivery, EventRouter};

/// Heartbeat intervals a context may go without an applied location
/// update before its latest position is forgotten.
const POSITION_RETENTION_TICKS: u32 = 10;

/// Composition root for the realtime gateway. Owns the registry, the
/// subscription map and the heartbeat, and turns transport callbacks into
/// replies and pushes.
pub struct GatewayService {
    config: GatewayConfig,
    /// Every open socket, authenticated or not. The heartbeat walks this.
    tracked: DashMap<ConnectionId, Arc<Connection>>,
    registry: Arc<ConnectionRegistry>,
    subscriptions: Arc<ContextSubscriptions>,
    handshake: AuthenticationHandshake,
    router: EventRouter,
    fanout: FanoutDispatcher,
    heartbeat: Arc<HeartbeatMonitor>,
    limits: EventRateLimits,
    collaborators: RwLock<Option<Collaborators>>,
    shutting_down: AtomicBool,
}

impl GatewayService {
    pub fn new(config: GatewayConfig, collaborators: Collaborators) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let subscriptions = Arc::new(ContextSubscriptions::new());
        Arc::new(Self {
            tracked: DashMap::new(),
            handshake: AuthenticationHandshake::new(registry.clone(), subscriptions.clone()),
            router: EventRouter::new(subscriptions.clone(), config.max_content_length),
            fanout: FanoutDispatcher::new(registry.clone(), subscriptions.clone()),
            heartbeat: Arc::new(HeartbeatMonitor::new(config.heartbeat_interval)),
            limits: EventRateLimits::new(
                config.max_events_per_minute,
                config.max_location_updates_per_minute,
            ),
            collaborators: RwLock::new(Some(collaborators)),
            shutting_down: AtomicBool::new(false),
            registry,
            subscriptions,
            config,
        })
    }

    /// Start the heartbeat loop. It runs until `shutdown`.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = self.heartbeat.clone();
        let gateway = self.clone();
        tokio::spawn(async move { monitor.run(gateway).await })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn subscriptions(&self) -> &ContextSubscriptions {
        &self.subscriptions
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn tracked_connections(&self) -> Vec<Arc<Connection>> {
        self.tracked.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn hello(&self) -> ServerEvent {
        ServerEvent::Hello(HelloPayload {
            heartbeat_interval: u64::try_from(self.config.heartbeat_interval.as_millis())
                .unwrap_or(u64::MAX),
        })
    }

    /// A socket was accepted. The connection is unauthenticated and tracked
    /// by the heartbeat from here on.
    pub fn on_connect(&self, outbound: mpsc::Sender<Outbound>) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(outbound));
        if self.is_shutting_down() {
            connection.close(CLOSE_GOING_AWAY, "server shutting down");
            return connection;
        }
        self.tracked.insert(connection.id(), connection.clone());
        tracing::debug!(connection_id = %connection.id(), "connection opened");
        connection
    }

    /// Handle one inbound event and produce its terminal reply.
    pub async fn on_event(&self, connection: &Arc<Connection>, event: &str, data: Value) -> Reply {
        match ClientEvent::parse(event, data) {
            Ok(event) => self.handle(connection, event).await,
            Err(err) => self.reject(connection, event, &err.into()),
        }
    }

    pub async fn handle(&self, connection: &Arc<Connection>, event: ClientEvent) -> Reply {
        let name = event.name();
        match self.dispatch_event(connection, event).await {
            Ok(reply) => reply,
            Err(err) => self.reject(connection, name, &err),
        }
    }

    async fn dispatch_event(
        &self,
        connection: &Arc<Connection>,
        event: ClientEvent,
    ) -> Result<Reply, GatewayError> {
        let event = match event {
            ClientEvent::Heartbeat => {
                self.on_pong(connection);
                return Ok(Reply::ok());
            }
            ClientEvent::Authenticate(payload) => {
                let collaborators = self.collaborators()?;
                let user_id = self
                    .handshake
                    .authenticate(collaborators.sessions.as_ref(), connection, payload)
                    .await?;
                return Ok(Reply::Authenticated { user_id });
            }
            other => other,
        };

        let user_id = connection.user_id().ok_or(GatewayError::Unauthenticated)?;
        self.limits
            .check(user_id, &event)
            .map_err(|retry_after_ms| GatewayError::RateLimited { retry_after_ms })?;

        let collaborators = self.collaborators()?;
        let routed = self.router.route(&collaborators, connection, event).await?;
        self.deliver(connection, routed.delivery);
        Ok(routed.reply)
    }

    fn deliver(&self, connection: &Arc<Connection>, delivery: Delivery) -> FanoutReport {
        let report = match delivery {
            Delivery::None => return FanoutReport::default(),
            Delivery::Users {
                targets,
                event,
                exclude,
            } => self.fanout.dispatch(&targets, &event, exclude),
            Delivery::Subscribers { context_id, event } => {
                self.fanout.dispatch_to_subscribers(context_id, &event)
            }
            Delivery::Origin(event) => self
                .fanout
                .dispatch_to_connections(std::slice::from_ref(connection), &event),
        };
        tracing::debug!(
            connection_id = %connection.id(),
            delivered = report.delivered,
            skipped_users = report.skipped_users.len(),
            failed = report.failed.len(),
            "fanout complete"
        );
        report
    }

    fn reject(&self, connection: &Arc<Connection>, event: &str, err: &GatewayError) -> Reply {
        let connection_id = connection.id();
        let user_id = connection.user_id();
        match err {
            GatewayError::Authorization(_) => {
                tracing::warn!(
                    target: "security",
                    connection_id = %connection_id,
                    user_id = ?user_id,
                    event,
                    error = %err,
                    "event rejected"
                );
            }
            GatewayError::Persistence(_) => {
                tracing::error!(
                    connection_id = %connection_id,
                    user_id = ?user_id,
                    event,
                    error = %err,
                    "event failed"
                );
            }
            _ => {
                tracing::debug!(
                    connection_id = %connection_id,
                    user_id = ?user_id,
                    event,
                    reason = err.reason(),
                    error = %err,
                    "event rejected"
                );
            }
        }
        err.to_reply()
    }

    pub fn on_pong(&self, connection: &Connection) {
        connection.mark_alive();
    }

    /// The transport is gone; forget the connection everywhere.
    pub fn on_disconnect(&self, connection: &Connection) {
        let id = connection.id();
        self.tracked.remove(&id);
        let user_id = self.registry.unregister(id);
        let subscriptions = self.subscriptions.remove_connection(id);
        tracing::info!(
            connection_id = %id,
            user_id = ?user_id,
            subscriptions,
            connected_for_secs = (chrono::Utc::now() - connection.connected_at()).num_seconds(),
            "connection closed"
        );
    }

    /// Close a connection from the server side and forget it.
    pub(crate) fn evict(&self, connection: &Connection, cause: &GatewayError) {
        let (code, reason) = match cause {
            GatewayError::HeartbeatTimeout => (CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout"),
            _ => (CLOSE_DELIVERY_FAILED, "delivery failed"),
        };
        connection.close(code, reason);
        self.on_disconnect(connection);
    }

    /// Periodic housekeeping, run by the heartbeat after each tick.
    pub(crate) fn prune_idle_state(&self) {
        self.limits.retain_recent();
        let retention = self
            .config
            .heartbeat_interval
            .checked_mul(POSITION_RETENTION_TICKS)
            .unwrap_or(Duration::MAX);
        self.router.prune_positions(retention);
    }

    fn collaborators(&self) -> Result<Collaborators, GatewayError> {
        self.collaborators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| GatewayError::Persistence("gateway is shutting down".into()))
    }

    /// Stop the heartbeat, close every socket, then release collaborators.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.heartbeat.stop();

        let connections: Vec<Arc<Connection>> = self
            .tracked
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for connection in &connections {
            connection.close(CLOSE_GOING_AWAY, "server shutting down");
        }
        let drained = self.registry.drain();
        self.tracked.clear();
        self.subscriptions.clear();
        tracing::info!(
            closed = connections.len(),
            authenticated = drained.len(),
            "gateway connections closed"
        );

        self.collaborators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::info!("gateway collaborators released");
    }
}
