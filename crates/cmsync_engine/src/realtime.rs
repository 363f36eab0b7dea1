//! Realtime change channel.
//!
//! Subscribes to the broadcast hub and forwards every inbound message to
//! [`ReplicaStore::reconcile`], including the client's own echoes. On
//! connection loss the channel reconnects with bounded attempts; once the
//! attempts are spent it stops in [`ChannelState::Exhausted`] and the
//! replica keeps its last-known state.

use crate::api::{BroadcastHub, ChangeStream};
use crate::config::ChannelConfig;
use crate::replica::ReplicaStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Connection state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not started.
    Idle,
    /// Opening the first subscription.
    Connecting,
    /// Subscribed and forwarding messages.
    Connected,
    /// Connection lost, trying again.
    Reconnecting,
    /// Gave up after the configured attempts.
    Exhausted,
}

impl ChannelState {
    /// Returns true while a subscription task is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ChannelState::Connecting | ChannelState::Connected | ChannelState::Reconnecting
        )
    }

    /// Returns true if `initialize` would start a new task.
    pub fn can_start(&self) -> bool {
        matches!(self, ChannelState::Idle | ChannelState::Exhausted)
    }
}

/// Counters for the channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Messages received from the hub.
    pub messages_received: u64,
    /// Messages the replica rejected.
    pub reconcile_failures: u64,
    /// Successful reconnections after a lost connection.
    pub reconnects: u64,
    /// Subscription attempts made, successful or not.
    pub connect_attempts: u64,
}

struct ChannelInner {
    hub: Arc<dyn BroadcastHub>,
    replica: Arc<ReplicaStore>,
    config: ChannelConfig,
    state: watch::Sender<ChannelState>,
    running: AtomicBool,
    messages_received: AtomicU64,
    reconcile_failures: AtomicU64,
    reconnects: AtomicU64,
    connect_attempts: AtomicU64,
}

/// Client side of the push channel.
pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeChannel {
    /// Creates an idle channel.
    pub fn new(
        hub: Arc<dyn BroadcastHub>,
        replica: Arc<ReplicaStore>,
        config: ChannelConfig,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        Self {
            inner: Arc::new(ChannelInner {
                hub,
                replica,
                config,
                state,
                running: AtomicBool::new(false),
                messages_received: AtomicU64::new(0),
                reconcile_failures: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
                connect_attempts: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Starts the subscription task.
    ///
    /// Returns false without doing anything if a task is already live.
    /// Must be called from within a tokio runtime.
    pub fn initialize(&self) -> bool {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("realtime channel already running");
            return false;
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run().await });
        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        true
    }

    /// Current connection state.
    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    /// Current counters.
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            messages_received: self.inner.messages_received.load(Ordering::SeqCst),
            reconcile_failures: self.inner.reconcile_failures.load(Ordering::SeqCst),
            reconnects: self.inner.reconnects.load(Ordering::SeqCst),
            connect_attempts: self.inner.connect_attempts.load(Ordering::SeqCst),
        }
    }

    /// Stops the subscription task.
    pub fn shutdown(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.set_state(ChannelState::Idle);
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ChannelInner {
    fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }

    async fn run(self: Arc<Self>) {
        let mut reconnecting = false;
        loop {
            let Some(stream) = self.connect(reconnecting).await else {
                let attempts = self.config.retry.max_attempts;
                tracing::warn!(attempts, "realtime channel gave up connecting");
                self.replica.record_issue(
                    "realtime channel",
                    &format!("gave up connecting after {attempts} attempts"),
                );
                self.running.store(false, Ordering::SeqCst);
                self.set_state(ChannelState::Exhausted);
                return;
            };

            if reconnecting {
                self.reconnects.fetch_add(1, Ordering::SeqCst);
            }
            self.set_state(ChannelState::Connected);
            if reconnecting {
                tracing::info!("realtime channel reconnected");
                if self.config.refresh_on_reconnect {
                    let report = self.replica.refresh().await;
                    if report.is_complete() {
                        tracing::debug!("replica resynchronized after reconnect");
                    }
                    self.replica.flush();
                }
            } else {
                tracing::info!("realtime channel connected");
            }

            self.pump(stream).await;

            tracing::warn!("realtime connection lost");
            self.set_state(ChannelState::Reconnecting);
            reconnecting = true;
        }
    }

    async fn connect(&self, reconnecting: bool) -> Option<ChangeStream> {
        let retry = &self.config.retry;
        if !reconnecting {
            self.set_state(ChannelState::Connecting);
        }

        for attempt in 0..retry.max_attempts {
            // A reconnection waits before its first attempt as well.
            let delay = retry.delay_for_attempt(if reconnecting { attempt + 1 } else { attempt });
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            match tokio::time::timeout(retry.attempt_timeout, self.hub.subscribe()).await {
                Ok(Ok(stream)) => return Some(stream),
                Ok(Err(e)) => {
                    tracing::debug!(attempt = attempt + 1, error = %e, "subscribe failed");
                }
                Err(_) => {
                    tracing::debug!(attempt = attempt + 1, "subscribe timed out");
                }
            }
        }
        None
    }

    async fn pump(&self, mut stream: ChangeStream) {
        while let Some(message) = stream.recv().await {
            self.messages_received.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = self.replica.reconcile(&message) {
                self.reconcile_failures.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    kind = %message.entity_kind,
                    action = ?message.action,
                    error = %e,
                    "change message rejected"
                );
                self.replica.record_issue("reconcile change message", &e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MockApi, MockHub};
    use crate::config::RetryConfig;
    use cmsync_persist::{LocalPersistence, PersistConfig};
    use cmsync_protocol::{ChangeMessage, EntityKind, Product};
    use cmsync_storage::InMemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn setup(config: ChannelConfig) -> (Arc<MockHub>, Arc<ReplicaStore>, RealtimeChannel) {
        let hub = Arc::new(MockHub::new());
        let replica = Arc::new(ReplicaStore::new(
            Arc::new(MockApi::new()),
            Duration::from_secs(5),
        ));
        let channel = RealtimeChannel::new(hub.clone(), replica.clone(), config);
        (hub, replica, channel)
    }

    async fn wait_for(channel: &RealtimeChannel, state: ChannelState) {
        let mut rx = channel.watch_state();
        rx.wait_for(|s| *s == state).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_messages_to_replica() {
        let (hub, replica, channel) = setup(ChannelConfig::default());
        assert!(channel.initialize());
        wait_for(&channel, ChannelState::Connected).await;

        hub.publish(ChangeMessage::created(
            EntityKind::Product,
            json!({ "id": "p-1", "title": "X" }),
        ))
        .await;
        hub.publish(ChangeMessage::created(EntityKind::Product, json!({ "id": "p-2" })))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(replica.list::<Product>().len(), 1);
        let stats = channel.stats();
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.reconcile_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_is_idempotent() {
        let (hub, _, channel) = setup(ChannelConfig::default());
        assert!(channel.initialize());
        assert!(!channel.initialize());
        wait_for(&channel, ChannelState::Connected).await;
        assert!(!channel.initialize());
        assert_eq!(hub.subscriptions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_loss() {
        let (hub, _, channel) = setup(ChannelConfig::default());
        channel.initialize();
        wait_for(&channel, ChannelState::Connected).await;

        hub.disconnect();
        wait_for(&channel, ChannelState::Reconnecting).await;
        wait_for(&channel, ChannelState::Connected).await;

        assert_eq!(channel.stats().reconnects, 1);
        assert_eq!(hub.subscriptions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_non_fatal_and_restartable() {
        let retry = RetryConfig::new(3).with_initial_delay(Duration::from_secs(1));
        let (hub, _, channel) = setup(ChannelConfig::default().with_retry(retry));
        hub.set_available(false);

        let started = tokio::time::Instant::now();
        channel.initialize();
        wait_for(&channel, ChannelState::Exhausted).await;

        assert_eq!(channel.stats().connect_attempts, 3);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(channel.state().can_start());

        hub.set_available(true);
        assert!(channel.initialize());
        wait_for(&channel, ChannelState::Connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_messages_and_exhaustion_are_recorded() {
        let persist = Arc::new(LocalPersistence::new(
            Arc::new(InMemoryStore::new()),
            PersistConfig::default(),
        ));
        let hub = Arc::new(MockHub::new());
        let replica = Arc::new(
            ReplicaStore::new(Arc::new(MockApi::new()), Duration::from_secs(5))
                .with_issue_sink(persist.clone()),
        );
        let retry = RetryConfig::new(2).with_initial_delay(Duration::from_secs(1));
        let channel =
            RealtimeChannel::new(hub.clone(), replica, ChannelConfig::default().with_retry(retry));

        channel.initialize();
        wait_for(&channel, ChannelState::Connected).await;
        hub.publish(ChangeMessage::created(EntityKind::Product, json!({ "id": "p-2" })))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        hub.set_available(false);
        hub.disconnect();
        wait_for(&channel, ChannelState::Exhausted).await;

        let issues = persist.metrics().recent_issues;
        assert_eq!(issues.len(), 2);
        assert!(issues[0].description.starts_with("reconcile change message: "));
        assert_eq!(
            issues[1].description,
            "realtime channel: gave up connecting after 2 attempts"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_task() {
        let (_, _, channel) = setup(ChannelConfig::default());
        channel.initialize();
        wait_for(&channel, ChannelState::Connected).await;

        channel.shutdown();
        assert_eq!(channel.state(), ChannelState::Idle);
        assert!(channel.initialize());
    }

    #[test]
    fn state_helpers() {
        assert!(ChannelState::Idle.can_start());
        assert!(ChannelState::Exhausted.can_start());
        assert!(!ChannelState::Connected.can_start());
        assert!(ChannelState::Reconnecting.is_active());
        assert!(!ChannelState::Exhausted.is_active());
    }
}
