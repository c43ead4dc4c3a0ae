use std::sync::Arc;
use std::time::Duration;

use courier_core::GatewayError;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use crate::connection::{EnqueueError, Outbound};
use crate::gateway::GatewayService;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub pinged: usize,
    pub evicted: usize,
}

/// Two-tick liveness check. Each tick clears every connection's flag and
/// pings it; a connection still flagged dead at the next tick never
/// answered and is evicted.
pub struct HeartbeatMonitor {
    interval: Duration,
    stop: Notify,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stop: Notify::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn tick(&self, gateway: &GatewayService) -> TickReport {
        let mut report = TickReport::default();
        for connection in gateway.tracked_connections() {
            if connection.is_closed() {
                continue;
            }
            if !connection.mark_suspect() {
                tracing::info!(
                    connection_id = %connection.id(),
                    user_id = ?connection.user_id(),
                    "no pong since last heartbeat, evicting"
                );
                gateway.evict(&connection, &GatewayError::HeartbeatTimeout);
                report.evicted += 1;
                continue;
            }
            match connection.try_send(Outbound::Ping) {
                Ok(()) => report.pinged += 1,
                // Still suspect; the next tick evicts it if nothing arrives.
                Err(EnqueueError::Full) => {
                    tracing::debug!(
                        connection_id = %connection.id(),
                        "outbound queue full, ping skipped"
                    );
                }
                Err(EnqueueError::Closed) => {
                    gateway.evict(
                        &connection,
                        &GatewayError::Transport("ping enqueue failed".into()),
                    );
                    report.evicted += 1;
                }
            }
        }
        report
    }

    /// Tick until `stop` is called.
    pub async fn run(&self, gateway: Arc<GatewayService>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // skip immediate first tick
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick(&gateway);
                    gateway.prune_idle_state();
                    tracing::trace!(
                        pinged = report.pinged,
                        evicted = report.evicted,
                        "heartbeat tick"
                    );
                }
                () = self.stop.notified() => break,
            }
        }
        tracing::info!("heartbeat monitor stopped");
    }

    pub fn stop(&self) {
        self.stop.notify_one();
    }
}
