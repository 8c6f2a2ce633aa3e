//! Subscription controller.
//!
//! A [`Subscription`] has a stable identity for as long as the consumer holds
//! it. Each call to [`Subscription::update`] either keeps the live instance,
//! or tears it down and starts a brand-new one for the newly resolved key.
//! An instance is one driver task that owns the document store, runs the
//! connection state machine and publishes [`SyncView`]s through a `watch`
//! channel.

use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::SyncConfig;
use crate::decoder::{decode_frame, Frame, Operation};
use crate::diagnostics::{CounterSnapshot, Recorder, SyncCounters};
use crate::document::{Document, DocumentStore, Effect};
use crate::endpoint::{Endpoint, ResolvedEndpoint, SubscriptionKey};
use crate::error::{ConnectionError, DecodeError, EndpointError, SyncError};
use crate::registry::{ActiveSubscription, Registry, SlotId};
use crate::state::{ConnectionState, StateEvent};
use crate::transport::{
    spawn_pump, ConnectionId, Connector, Tagged, TransportEvent, WebSocketConnector,
};
use crate::view::SyncView;

/// Entry point: shares one connector and configuration across subscriptions.
#[derive(Clone)]
pub struct SyncClient {
    connector: Arc<dyn Connector>,
    config: SyncConfig,
    registry: Arc<Mutex<Registry>>,
}

impl SyncClient {
    pub fn new(connector: impl Connector, config: SyncConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            config,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn websocket(config: SyncConfig) -> Self {
        Self::new(WebSocketConnector, config)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Creates an idle subscription whose data is `placeholder` until the
    /// first sync.
    pub fn subscribe(&self, placeholder: Value) -> Subscription {
        let placeholder = Document::new(placeholder);
        let (views, receiver) = watch::channel(SyncView::placeholder(
            placeholder.clone(),
            ConnectionState::Idle,
        ));
        let slot = self.registry.lock().register(receiver);
        Subscription {
            slot,
            client: self.clone(),
            placeholder,
            views: Arc::new(views),
            generation: Arc::new(AtomicU64::new(0)),
            counters: Arc::new(SyncCounters::default()),
            instance: None,
        }
    }

    /// Subscriptions that are enabled with a resolved endpoint, including
    /// ones whose instance stopped with `Errored` or `Completed`.
    pub fn active(&self) -> Vec<ActiveSubscription> {
        self.registry.lock().active()
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("config", &self.config)
            .field("subscriptions", &self.registry.lock().len())
            .finish_non_exhaustive()
    }
}

struct Instance {
    resolved: ResolvedEndpoint,
    cancel: CancellationToken,
}

/// One logical subscription.
pub struct Subscription {
    slot: SlotId,
    client: SyncClient,
    placeholder: Document,
    views: Arc<watch::Sender<SyncView>>,
    generation: Arc<AtomicU64>,
    counters: Arc<SyncCounters>,
    instance: Option<Instance>,
}

impl Subscription {
    /// Reconciles the subscription with the caller's current inputs.
    ///
    /// Starts an instance when `enabled` is set and the endpoint resolves,
    /// keeps the running one when the key is unchanged, and tears down
    /// otherwise. Must be called from within a Tokio runtime.
    pub fn update(
        &mut self,
        endpoint: Option<&Endpoint>,
        enabled: bool,
    ) -> Result<(), EndpointError> {
        let resolved = match endpoint.filter(|_| enabled) {
            Some(endpoint) => match endpoint.resolve() {
                Ok(resolved) => Some(resolved),
                Err(err) => {
                    self.teardown();
                    return Err(err);
                }
            },
            None => None,
        };

        let unchanged = match (&self.instance, &resolved) {
            (Some(instance), Some(resolved)) => instance.resolved.key == resolved.key,
            _ => false,
        };
        if unchanged {
            return Ok(());
        }
        self.teardown();
        if let Some(resolved) = resolved {
            self.start(resolved);
        }
        Ok(())
    }

    /// Restarts an instance that stopped with an error. Returns false when
    /// there is nothing to retry.
    pub fn retry(&mut self) -> bool {
        if self.views.borrow().state() != ConnectionState::Errored {
            return false;
        }
        let Some(resolved) = self.instance.as_ref().map(|instance| instance.resolved.clone()) else {
            return false;
        };
        info!(subscription = %self.slot, key = %resolved.key, "retrying subscription");
        self.teardown();
        self.start(resolved);
        true
    }

    pub fn close(&mut self) {
        self.teardown();
    }

    pub fn view(&self) -> SyncView {
        self.views.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SyncView> {
        self.views.subscribe()
    }

    pub fn key(&self) -> Option<&SubscriptionKey> {
        self.instance.as_ref().map(|instance| &instance.resolved.key)
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    fn start(&mut self, resolved: ResolvedEndpoint) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        info!(subscription = %self.slot, key = %resolved.key, generation, "starting subscription");
        self.client
            .registry
            .lock()
            .activate(self.slot, resolved.key.clone());

        let driver = Driver {
            slot: self.slot,
            connector: self.client.connector.clone(),
            config: self.client.config.clone(),
            url: resolved.url.clone(),
            generation,
            current: self.generation.clone(),
            views: self.views.clone(),
            counters: self.counters.clone(),
            recorder: Recorder::new(&resolved.label),
            cancel: cancel.clone(),
            store: DocumentStore::new(self.placeholder.clone()),
            state: ConnectionState::Idle,
            error: None,
            backoff: Backoff::new(self.client.config.backoff.clone()),
            connections: 0,
        };
        tokio::spawn(driver.run());
        self.instance = Some(Instance { resolved, cancel });
    }

    fn teardown(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };
        // Retire the generation first so the old driver can no longer publish.
        self.generation.fetch_add(1, Ordering::SeqCst);
        instance.cancel.cancel();
        self.client.registry.lock().deactivate(self.slot);
        let from = self.views.borrow().state();
        let state = match from.on(StateEvent::Teardown) {
            Ok(next) => next,
            Err(err) => {
                warn!(subscription = %self.slot, error = %err, "ignoring state event");
                from
            }
        };
        self.views
            .send_replace(SyncView::placeholder(self.placeholder.clone(), state));
        info!(subscription = %self.slot, key = %instance.resolved.key, from = %from, "subscription torn down");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.teardown();
        self.client.registry.lock().release(self.slot);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("slot", &self.slot)
            .field("key", &self.key())
            .field("state", &self.views.borrow().state())
            .finish()
    }
}

enum SessionEnd {
    Cancelled,
    Finished,
    SnapshotTimeout,
    Lost(ConnectionError),
}

enum FrameOutcome {
    Continue,
    Finished,
}

struct Driver {
    slot: SlotId,
    connector: Arc<dyn Connector>,
    config: SyncConfig,
    url: url::Url,
    generation: u64,
    current: Arc<AtomicU64>,
    views: Arc<watch::Sender<SyncView>>,
    counters: Arc<SyncCounters>,
    recorder: Recorder,
    cancel: CancellationToken,
    store: DocumentStore,
    state: ConnectionState,
    error: Option<SyncError>,
    backoff: Backoff,
    connections: u64,
}

impl Driver {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Tagged>();
        self.transition(StateEvent::Start);
        self.publish();

        loop {
            if !self.state.may_connect() {
                warn!(subscription = %self.slot, state = %self.state, "refusing to connect");
                return;
            }
            self.connections += 1;
            let id = ConnectionId(self.connections);
            self.store.begin_connection();
            debug!(subscription = %self.slot, connection_id = %id, url = %self.url, "connecting");

            let connect = time::timeout(self.config.connect_timeout, self.connector.connect(&self.url));
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return,
                attempt = connect => attempt,
            };
            let stream = match attempt {
                Ok(Ok(stream)) => stream,
                Ok(Err(err)) => {
                    if self.connection_lost(err).await {
                        continue;
                    }
                    return;
                }
                Err(_) => {
                    let err = ConnectionError::ConnectTimeout(self.config.connect_timeout);
                    if self.connection_lost(err).await {
                        continue;
                    }
                    return;
                }
            };

            let _pump = spawn_pump(id, stream, events_tx.clone());
            self.transition(StateEvent::Opened);
            info!(subscription = %self.slot, connection_id = %id, "connection open");
            self.publish();

            match self.session(id, &mut events_rx).await {
                SessionEnd::Cancelled => return,
                SessionEnd::Finished => {
                    info!(subscription = %self.slot, connection_id = %id, "stream finished by server");
                    self.transition(StateEvent::Finish);
                    self.publish();
                    return;
                }
                SessionEnd::SnapshotTimeout => {
                    let timeout = self.config.snapshot_timeout.unwrap_or_default();
                    warn!(
                        subscription = %self.slot,
                        connection_id = %id,
                        timeout_ms = timeout.as_millis() as u64,
                        "no snapshot received, giving up"
                    );
                    self.error = Some(SyncError::SnapshotTimeout(timeout));
                    self.transition(StateEvent::Fail);
                    self.publish();
                    return;
                }
                SessionEnd::Lost(err) => {
                    if !self.connection_lost(err).await {
                        return;
                    }
                }
            }
        }
    }

    async fn session(
        &mut self,
        id: ConnectionId,
        events: &mut mpsc::UnboundedReceiver<Tagged>,
    ) -> SessionEnd {
        let cancel = self.cancel.clone();
        let deadline = self
            .config
            .snapshot_timeout
            .map(|timeout| Instant::now() + timeout);

        loop {
            let waiting = deadline.filter(|_| !self.store.is_synced());
            let tagged = tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                _ = sleep_until(waiting) => return SessionEnd::SnapshotTimeout,
                tagged = events.recv() => tagged,
            };
            let Some(tagged) = tagged else {
                return SessionEnd::Lost(ConnectionError::Transport("event channel closed".into()));
            };
            if tagged.connection != id {
                self.recorder.stale_frame(&self.counters);
                debug!(
                    subscription = %self.slot,
                    connection_id = %tagged.connection,
                    current = %id,
                    "discarding event from superseded connection"
                );
                continue;
            }
            match tagged.event {
                TransportEvent::Frame(text) => {
                    if let FrameOutcome::Finished = self.handle_frame(id, &text) {
                        return SessionEnd::Finished;
                    }
                }
                TransportEvent::Malformed(err) => {
                    self.recorder.frame(&self.counters);
                    self.malformed(id, &err);
                }
                TransportEvent::Closed(reason) => {
                    return SessionEnd::Lost(ConnectionError::Closed { reason })
                }
                TransportEvent::Failed(err) => return SessionEnd::Lost(err),
            }
        }
    }

    fn handle_frame(&mut self, id: ConnectionId, text: &str) -> FrameOutcome {
        self.recorder.frame(&self.counters);
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(err) => {
                self.malformed(id, &err);
                return FrameOutcome::Continue;
            }
        };

        let was_initialized = self.store.is_initialized();
        let had_error = self.error.is_some();
        match frame {
            Frame::Finished => return FrameOutcome::Finished,
            Frame::Ready => {
                debug!(subscription = %self.slot, connection_id = %id, "initial state complete");
                self.store.mark_ready();
                self.synced();
            }
            Frame::Patch(ops) => {
                for op in &ops {
                    self.apply(id, op);
                }
            }
        }

        let changed = self.store.commit();
        if changed
            || was_initialized != self.store.is_initialized()
            || had_error != self.error.is_some()
        {
            self.publish();
        }
        FrameOutcome::Continue
    }

    fn malformed(&self, id: ConnectionId, err: &DecodeError) {
        self.recorder.decode_error(&self.counters);
        warn!(subscription = %self.slot, connection_id = %id, error = %err, "dropping malformed frame");
    }

    fn apply(&mut self, id: ConnectionId, op: &Operation) {
        match self.store.apply(op) {
            Ok(Effect::Replaced) => {
                self.recorder.applied(&self.counters);
                self.recorder.snapshot(&self.counters);
                debug!(subscription = %self.slot, connection_id = %id, "snapshot applied");
                self.synced();
            }
            Ok(Effect::Changed) => self.recorder.applied(&self.counters),
            Ok(Effect::Unchanged) => {
                self.recorder.noop_remove(&self.counters);
                debug!(subscription = %self.slot, path = op.path(), "remove of missing path ignored");
            }
            Err(err) => {
                self.recorder.apply_error(&self.counters);
                warn!(
                    subscription = %self.slot,
                    connection_id = %id,
                    op = op.kind(),
                    error = %err,
                    "skipping operation"
                );
            }
        }
    }

    fn synced(&mut self) {
        self.backoff.reset();
        self.error = None;
    }

    /// Records the failure and waits out the backoff. Returns false when the
    /// driver should stop.
    async fn connection_lost(&mut self, err: ConnectionError) -> bool {
        let Some(delay) = self.backoff.next_delay() else {
            let attempts = self.backoff.attempts();
            warn!(subscription = %self.slot, attempts, error = %err, "reconnect attempts exhausted");
            self.error = Some(SyncError::Connection(ConnectionError::RetriesExhausted {
                attempts,
                last: Box::new(err),
            }));
            self.transition(StateEvent::Fail);
            self.publish();
            return false;
        };

        info!(
            subscription = %self.slot,
            attempt = self.backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "connection lost, scheduling reconnect"
        );
        self.error = Some(SyncError::Connection(err));
        self.transition(StateEvent::Lost);
        self.recorder.reconnect(&self.counters);
        self.publish();

        tokio::select! {
            _ = self.cancel.cancelled() => return false,
            _ = time::sleep(delay) => {}
        }
        self.transition(StateEvent::Retry);
        self.publish();
        true
    }

    fn transition(&mut self, event: StateEvent) {
        match self.state.on(event) {
            Ok(next) => {
                debug!(subscription = %self.slot, from = %self.state, to = %next, "state change");
                self.state = next;
            }
            Err(err) => warn!(subscription = %self.slot, error = %err, "ignoring state event"),
        }
    }

    fn publish(&self) {
        let view = SyncView {
            data: self.store.data().clone(),
            state: self.state,
            initialized: self.store.is_initialized(),
            error: self.error.clone(),
        };
        let generation = self.generation;
        let current = &self.current;
        self.views.send_if_modified(move |slot| {
            if current.load(Ordering::SeqCst) != generation {
                return false;
            }
            *slot = view;
            true
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channel;
    use serde_json::json;
    use std::time::Duration;

    fn driver(views: Arc<watch::Sender<SyncView>>, placeholder: Document) -> Driver {
        let (connector, _acceptor) = channel::channel();
        let config = SyncConfig::default().with_snapshot_timeout(None);
        let slot = Registry::default().register(views.subscribe());
        Driver {
            slot,
            connector: Arc::new(connector),
            backoff: Backoff::new(config.backoff.clone()),
            config,
            url: url::Url::parse("ws://test/stream").unwrap(),
            generation: 1,
            current: Arc::new(AtomicU64::new(1)),
            views,
            counters: Arc::new(SyncCounters::default()),
            recorder: Recorder::new("/driver-test/ws"),
            cancel: CancellationToken::new(),
            store: DocumentStore::new(placeholder),
            state: ConnectionState::Open,
            error: None,
            connections: 2,
        }
    }

    fn views(placeholder: &Document) -> (Arc<watch::Sender<SyncView>>, watch::Receiver<SyncView>) {
        let (tx, rx) = watch::channel(SyncView::placeholder(
            placeholder.clone(),
            ConnectionState::Idle,
        ));
        (Arc::new(tx), rx)
    }

    #[tokio::test]
    async fn events_from_a_superseded_connection_are_discarded() {
        let placeholder = Document::new(json!({}));
        let (sender, mut rx) = views(&placeholder);
        let mut driver = driver(sender, placeholder);
        let (tx, mut events) = mpsc::unbounded_channel();
        let send = |connection: u64, event: TransportEvent| {
            tx.send(Tagged {
                connection: ConnectionId(connection),
                event,
            })
            .unwrap();
        };
        send(
            1,
            TransportEvent::Frame(r#"{"op":"replace","path":"","value":{"from":"old"}}"#.into()),
        );
        send(
            2,
            TransportEvent::Frame(r#"{"op":"replace","path":"","value":{"from":"new"}}"#.into()),
        );
        send(1, TransportEvent::Closed(None));
        send(2, TransportEvent::Closed(Some("bye".into())));

        let end = driver.session(ConnectionId(2), &mut events).await;
        assert!(matches!(
            end,
            SessionEnd::Lost(ConnectionError::Closed { reason: Some(_) })
        ));
        assert_eq!(**driver.store.data(), json!({"from": "new"}));
        assert_eq!(driver.counters.snapshot().stale_frames, 2);
        assert_eq!(rx.borrow_and_update().data()["from"], "new");
    }

    #[tokio::test]
    async fn retired_generation_cannot_publish() {
        let placeholder = Document::new(json!({"commands": []}));
        let (sender, rx) = views(&placeholder);
        let mut driver = driver(sender, placeholder);
        driver.current.store(2, Ordering::SeqCst);
        driver.error = Some(SyncError::SnapshotTimeout(Duration::from_secs(1)));
        driver.publish();
        assert!(!rx.has_changed().unwrap());
        assert_eq!(rx.borrow().state(), ConnectionState::Idle);
        assert!(rx.borrow().error().is_none());
    }

    #[tokio::test]
    async fn snapshot_clears_a_transient_error_and_resets_backoff() {
        let placeholder = Document::new(json!({}));
        let (sender, rx) = views(&placeholder);
        let mut driver = driver(sender, placeholder);
        driver.error = Some(SyncError::Connection(ConnectionError::Transport("reset".into())));
        driver.backoff.next_delay();
        driver.backoff.next_delay();

        driver.handle_frame(ConnectionId(2), r#"{"op":"replace","path":"","value":{"ok":true}}"#);
        assert!(driver.error.is_none());
        assert_eq!(driver.backoff.attempts(), 0);
        let view = rx.borrow().clone();
        assert!(view.is_initialized());
        assert!(view.is_connected());
        assert_eq!(**view.data(), json!({"ok": true}));
    }
}
