//! Connection state machine and the [`FleetGateway`] handle.
//!
//! The gateway owns one link to the dispatch endpoint at a time. A session
//! is opened, authenticated, then handed to a reader task; when it drops,
//! reconnection backs off exponentially until the attempt budget is spent,
//! at which point the gateway degrades to request/response polling. Every
//! command sent while the link is down lands in the durable outbox and is
//! replayed in order once a session is back.
//!
//! Sessions are tagged with a monotonically increasing epoch. Teardown is
//! only honored for the epoch that observed the failure, so a stale reader
//! can never tear down the session that replaced its own.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use fleetlink_core::config::GatewayConfig;
use fleetlink_core::types::OutboundCommand;

use crate::bus::{EventBus, EventKind, GatewayEvent, SubscriptionHandle};
use crate::hooks::{EmergencyHook, FallbackPoller, RouteMembership, TokenProvider};
use crate::outbox::{Outbox, OutboxError};
use crate::protocol::{AuthFrame, CommandFrame};
use crate::router::{FleetState, Router};
use crate::transport::{FrameSink, FrameStream, Transport, TransportError, WsTransport};

/// Gateway-level failures surfaced to dispatch callers.
///
/// Transport trouble never appears here: a failed send queues the command
/// and recycles the link instead of erroring out.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport failed outside the recoverable send path
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Outbox storage failed
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// A frame could not be encoded
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Lifecycle states of the link to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No link; commands are queued
    Disconnected,
    /// Dialing the endpoint
    Connecting,
    /// Link open, authentication frame sent
    Authenticated,
    /// Session live; traffic flows
    Connected,
}

/// Point-in-time connectivity report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivitySnapshot {
    /// Current link state
    pub state: ConnectionState,
    /// Whether the gateway is in degraded polling mode
    pub degraded_polling: bool,
    /// Reconnect attempts consumed since the last successful open
    pub reconnect_attempts: u32,
    /// Commands waiting in the offline outbox
    pub queued_commands: usize,
}

/// How a command left the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Pushed over the live link
    Sent,
    /// Persisted to the outbox for replay
    Queued,
}

enum Link {
    Down,
    Up { sink: Box<dyn FrameSink>, epoch: u64 },
}

pub(crate) struct GatewayInner {
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    pub(crate) route_membership: Option<Arc<dyn RouteMembership>>,
    poller: Option<Arc<dyn FallbackPoller>>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) router: Router,
    pub(crate) outbox: Outbox,
    link: Mutex<Link>,
    state_cache: RwLock<ConnectionState>,
    epoch: AtomicU64,
    attempts: AtomicU32,
    degraded: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl GatewayInner {
    fn transition(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.state_cache.write().unwrap();
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        };
        if changed {
            info!(state = ?next, "connection state changed");
            self.bus.publish(&GatewayEvent::ConnectivityChanged(next));
        }
    }

    /// Win the `Disconnected` → `Connecting` gate. The check and the
    /// transition happen under one lock; whoever loses must not dial, so
    /// at most one transport is ever being opened.
    fn begin_connecting(&self) -> bool {
        {
            let mut state = self.state_cache.write().unwrap();
            if *state != ConnectionState::Disconnected {
                return false;
            }
            *state = ConnectionState::Connecting;
        }
        info!(state = ?ConnectionState::Connecting, "connection state changed");
        self.bus
            .publish(&GatewayEvent::ConnectivityChanged(ConnectionState::Connecting));
        true
    }

    /// Open, authenticate, and install a new session. The caller must have
    /// won [`begin_connecting`](Self::begin_connecting) first.
    async fn try_open(self: &Arc<Self>) -> Result<(), GatewayError> {
        let (mut sink, stream) = self.transport.open(&self.config.endpoint).await?;

        let token = self.token_provider.as_ref().and_then(|p| p.token());
        sink.send(AuthFrame::new(token).to_text()?).await?;
        self.transition(ConnectionState::Authenticated);

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.link.lock().await = Link::Up { sink, epoch };

        self.attempts.store(0, Ordering::SeqCst);
        self.degraded.store(false, Ordering::SeqCst);
        self.transition(ConnectionState::Connected);
        info!(epoch, endpoint = %self.config.endpoint, "session established");

        self.spawn_reader(stream, epoch);
        self.drain_outbox().await;
        Ok(())
    }

    fn spawn_reader(self: &Arc<Self>, mut stream: Box<dyn FrameStream>, epoch: u64) {
        let inner = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = stream.next_frame() => match frame {
                        Some(Ok(text)) => inner.router.handle_raw(&text),
                        Some(Err(err)) => {
                            warn!(epoch, %err, "read failed; recycling session");
                            break;
                        }
                        None => {
                            info!(epoch, "peer closed the session");
                            break;
                        }
                    },
                    _ = shutdown.changed() => return,
                }
            }
            inner.on_session_closed(epoch).await;
        });
    }

    /// Tear down and schedule a reconnect, but only if `epoch` still owns
    /// the link.
    async fn on_session_closed(self: &Arc<Self>, epoch: u64) {
        {
            let mut link = self.link.lock().await;
            match &*link {
                Link::Up { epoch: current, .. } if *current == epoch => *link = Link::Down,
                // A newer session owns the link; nothing to do.
                _ => return,
            }
        }
        self.transition(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    /// Queue the next reconnect with exponential backoff, or degrade to
    /// polling once the attempt budget is spent.
    fn schedule_reconnect(self: &Arc<Self>) {
        let budget = self.config.max_reconnect_attempts;
        let attempt = match self
            .attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < budget).then_some(n + 1)
            }) {
            Ok(previous) => previous,
            // Budget already spent; the counter stays at the dial count.
            Err(_) => {
                self.enter_degraded_polling();
                return;
            }
        };

        let delay = Duration::from_secs(1u64 << attempt);
        info!(attempt = attempt + 1, delay_secs = delay.as_secs(), "reconnect scheduled");

        let inner = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    // An explicit connect may have beaten this retry.
                    if !inner.begin_connecting() {
                        return;
                    }
                    if let Err(err) = inner.try_open().await {
                        warn!(%err, "reconnect attempt failed");
                        inner.transition(ConnectionState::Disconnected);
                        inner.schedule_reconnect();
                    }
                }
                _ = shutdown.changed() => {}
            }
        });
    }

    /// Switch to request/response polling. The poll loop runs until a
    /// session comes back (via an explicit connect) or shutdown.
    fn enter_degraded_polling(self: &Arc<Self>) {
        if self.degraded.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(
            attempts = self.config.max_reconnect_attempts,
            interval_secs = self.config.poll_interval_secs,
            "reconnect budget spent; degrading to polling"
        );

        if self.poller.is_none() {
            warn!("no fallback poller configured; inbound traffic paused until reconnect");
            return;
        }

        let inner = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(inner.config.poll_interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; polling starts one interval in.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !inner.degraded.load(Ordering::SeqCst) {
                            return;
                        }
                        inner.poll_once().await;
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    /// One degraded-mode poll cycle: fetch pending frames and route them.
    async fn poll_once(&self) {
        let Some(poller) = &self.poller else { return };
        match poller.poll().await {
            Ok(frames) => {
                debug!(count = frames.len(), "fallback poll delivered frames");
                for frame in frames {
                    self.router.handle_raw(&frame);
                }
            }
            Err(err) => warn!(%err, "fallback poll failed"),
        }
    }

    /// Push a command over the live link, or persist it for replay.
    ///
    /// The state check and the send happen under one lock, so a session
    /// recycle can never race a command into the void: a mid-flight send
    /// failure queues the command before the link is recycled.
    pub(crate) async fn send_or_queue(
        self: &Arc<Self>,
        command: OutboundCommand,
    ) -> Result<Delivery, GatewayError> {
        let text = CommandFrame::from_command(&command).to_text()?;

        let mut link = self.link.lock().await;
        match &mut *link {
            Link::Up { sink, .. } => match sink.send(text).await {
                Ok(()) => {
                    debug!(driver_id = %command.target_driver_id, kind = command.kind.as_str(), "command sent");
                    Ok(Delivery::Sent)
                }
                Err(err) => {
                    warn!(%err, "send failed; queueing command and recycling session");
                    self.outbox.enqueue(&command)?;
                    sink.close().await;
                    *link = Link::Down;
                    drop(link);
                    self.transition(ConnectionState::Disconnected);
                    self.schedule_reconnect();
                    Ok(Delivery::Queued)
                }
            },
            Link::Down => {
                drop(link);
                let seq = self.outbox.enqueue(&command)?;
                debug!(seq, driver_id = %command.target_driver_id, "link down; command queued");
                Ok(Delivery::Queued)
            }
        }
    }

    /// Replay queued commands in FIFO order. Stops at the first failure;
    /// the failed command stays queued for the next session.
    async fn drain_outbox(self: &Arc<Self>) {
        loop {
            let front = match self.outbox.front() {
                Ok(Some(entry)) => entry,
                Ok(None) => return,
                Err(err) => {
                    warn!(%err, "outbox read failed; aborting replay");
                    return;
                }
            };

            let text = match CommandFrame::from_command(&front.command).to_text() {
                Ok(text) => text,
                Err(err) => {
                    warn!(seq = front.seq, %err, "dropping unencodable queued command");
                    if self.outbox.remove(front.seq).is_err() {
                        return;
                    }
                    continue;
                }
            };

            let mut link = self.link.lock().await;
            let Link::Up { sink, .. } = &mut *link else {
                return;
            };
            match sink.send(text).await {
                Ok(()) => {
                    drop(link);
                    debug!(seq = front.seq, "queued command replayed");
                    if let Err(err) = self.outbox.remove(front.seq) {
                        warn!(%err, "failed to clear replayed command; aborting replay");
                        return;
                    }
                }
                Err(err) => {
                    warn!(%err, "replay send failed; recycling session");
                    *link = Link::Down;
                    drop(link);
                    self.transition(ConnectionState::Disconnected);
                    self.schedule_reconnect();
                    return;
                }
            }
        }
    }
}

/// Cloneable handle to the gateway. All methods are safe to call from any
/// task.
#[derive(Clone)]
pub struct FleetGateway {
    pub(crate) inner: Arc<GatewayInner>,
}

impl FleetGateway {
    /// Builder with `config` applied and the production websocket transport.
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Establish a session now. Resets the reconnect budget and leaves
    /// degraded polling; on failure the normal backoff schedule takes over.
    pub async fn connect(&self) {
        if !self.inner.begin_connecting() {
            debug!(state = ?self.state(), "connect ignored; session already active");
            return;
        }

        // Re-arm task cancellation in case a previous disconnect tripped it.
        self.inner.shutdown.send_replace(false);
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.degraded.store(false, Ordering::SeqCst);

        if let Err(err) = self.inner.try_open().await {
            warn!(%err, "connect failed");
            self.inner.transition(ConnectionState::Disconnected);
            self.inner.schedule_reconnect();
        }
    }

    /// Close the session and stop all background tasks. Queued commands
    /// stay in the outbox for the next run.
    pub async fn disconnect(&self) {
        self.inner.shutdown.send_replace(true);
        self.inner.degraded.store(false, Ordering::SeqCst);

        let mut link = self.inner.link.lock().await;
        if let Link::Up { sink, .. } = &mut *link {
            sink.close().await;
        }
        *link = Link::Down;
        drop(link);

        self.inner.transition(ConnectionState::Disconnected);
        info!("gateway disconnected");
    }

    /// Current link state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_cache.read().unwrap()
    }

    /// Point-in-time connectivity report.
    pub fn connectivity(&self) -> ConnectivitySnapshot {
        ConnectivitySnapshot {
            state: self.state(),
            degraded_polling: self.inner.degraded.load(Ordering::SeqCst),
            reconnect_attempts: self.inner.attempts.load(Ordering::SeqCst),
            queued_commands: self.inner.outbox.len().unwrap_or(0),
        }
    }

    /// Push `command` over the live link, or queue it for replay.
    pub async fn send_command(&self, command: OutboundCommand) -> Result<Delivery, GatewayError> {
        self.inner.send_or_queue(command).await
    }

    /// Subscribe to gateway events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(kind, handler)
    }

    /// Remove a subscription. Idempotent.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.inner.bus.unsubscribe(handle);
    }

    /// Latest-wins entity state derived from inbound telemetry.
    pub fn fleet(&self) -> Arc<FleetState> {
        Arc::clone(self.inner.router.state())
    }
}

/// Assembles a [`FleetGateway`] from its collaborators.
pub struct GatewayBuilder {
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    route_membership: Option<Arc<dyn RouteMembership>>,
    emergency_hook: Option<Arc<dyn EmergencyHook>>,
    poller: Option<Arc<dyn FallbackPoller>>,
}

impl GatewayBuilder {
    /// Start from `config` with the production websocket transport.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            transport: Arc::new(WsTransport),
            token_provider: None,
            route_membership: None,
            emergency_hook: None,
            poller: None,
        }
    }

    /// Replace the transport. Tests use the in-process loopback here.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Supply authentication tokens. Without one, an empty token is sent.
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Resolve route assignments for route-scoped broadcasts.
    pub fn route_membership(mut self, membership: Arc<dyn RouteMembership>) -> Self {
        self.route_membership = Some(membership);
        self
    }

    /// Receive critical emergencies out-of-band.
    pub fn emergency_hook(mut self, hook: Arc<dyn EmergencyHook>) -> Self {
        self.emergency_hook = Some(hook);
        self
    }

    /// Fetch frames while degraded. Without one, degraded mode is silent.
    pub fn fallback_poller(mut self, poller: Arc<dyn FallbackPoller>) -> Self {
        self.poller = Some(poller);
        self
    }

    /// Open the outbox and assemble the gateway. No session is established
    /// until [`FleetGateway::connect`].
    pub fn build(self) -> Result<FleetGateway, GatewayError> {
        let outbox = Outbox::open(&self.config.outbox_path, self.config.outbox_max_queued)?;
        let bus = Arc::new(EventBus::new());
        let router = Router::new(Arc::clone(&bus), self.emergency_hook);
        let (shutdown, _) = watch::channel(false);

        Ok(FleetGateway {
            inner: Arc::new(GatewayInner {
                config: self.config,
                transport: self.transport,
                token_provider: self.token_provider,
                route_membership: self.route_membership,
                poller: self.poller,
                bus,
                router,
                outbox,
                link: Mutex::new(Link::Down),
                state_cache: RwLock::new(ConnectionState::Disconnected),
                epoch: AtomicU64::new(0),
                attempts: AtomicU32::new(0),
                degraded: AtomicBool::new(false),
                shutdown,
            }),
        })
    }
}
