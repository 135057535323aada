//! Tunnel lifecycle controller
//!
//! The controller owns the interface handle, sequences start/stop against
//! the tunnel engine and supervises the forwarding worker. At most one
//! tunnel is active per controller, and the controller is the only mutator
//! of the interface handle; the worker only performs I/O through it.
//!
//! The start sequence is: validate, check the host capability, claim the
//! single instance, establish the interface, start the engine (rolling the
//! interface back if the engine refuses), launch the forwarding worker.
//! Stop reverses it: cancel the worker, join it with a bounded wait, stop
//! the engine best-effort, release the interface. Both report only after
//! they have fully completed, so callers never observe a half-torn-down
//! tunnel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use aura_tun::{InterfaceConfig, InterfaceHandle, InterfaceProvider};

use crate::config::TunnelConfig;
use crate::control::{SharedStats, SharedStatsRef};
use crate::engine::{EngineClient, TunnelEngine};
use crate::error::{Error, Result};
use crate::event::{EventHandler, LifecycleState, LoggingEventHandler, StateCell, TunnelEvent};
use crate::forward::ForwardingLoop;
use crate::relay::RelayConnector;

/// Bounded wait for the forwarding worker to exit during stop
pub const LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// The active tunnel's resources, held only while `Running`
struct ActiveTunnel {
    handle: InterfaceHandle,
    shutdown_tx: broadcast::Sender<()>,
    worker: JoinHandle<()>,
}

/// Tunnel lifecycle controller
///
/// Collaborators (interface provider, tunnel engine, relay connector) are
/// injected; the hosting application owns the controller and its lifetime.
pub struct TunnelController {
    provider: Arc<dyn InterfaceProvider>,
    engine: EngineClient,
    relay: Arc<dyn RelayConnector>,
    events: Arc<dyn EventHandler>,
    state: StateCell,
    stats: SharedStatsRef,
    active: Mutex<Option<ActiveTunnel>>,
    weak: std::sync::Weak<TunnelController>,
}

impl TunnelController {
    /// Create a controller with the default logging event handler
    pub fn new(
        provider: Arc<dyn InterfaceProvider>,
        engine: Arc<dyn TunnelEngine>,
        relay: Arc<dyn RelayConnector>,
    ) -> Arc<Self> {
        Self::with_event_handler(provider, engine, relay, Arc::new(LoggingEventHandler))
    }

    /// Create a controller with a custom event handler
    pub fn with_event_handler(
        provider: Arc<dyn InterfaceProvider>,
        engine: Arc<dyn TunnelEngine>,
        relay: Arc<dyn RelayConnector>,
        events: Arc<dyn EventHandler>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            provider,
            engine: EngineClient::new(engine),
            relay,
            events,
            state: StateCell::new(),
            stats: Arc::new(SharedStats::new()),
            active: Mutex::new(None),
            weak: weak.clone(),
        })
    }

    /// Current lifecycle state (non-blocking)
    pub fn status(&self) -> LifecycleState {
        self.state.load()
    }

    /// Simplified running/stopped projection of [`status`](Self::status)
    pub fn is_running(&self) -> bool {
        self.state.load().is_running()
    }

    /// Live engine status, for resynchronizing a host after restart
    pub fn engine_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Forwarding statistics
    pub fn stats(&self) -> SharedStatsRef {
        self.stats.clone()
    }

    /// Start the tunnel
    ///
    /// Fails fast on invalid configuration before touching any resource.
    /// Duplicate starts return [`Error::AlreadyRunning`] with no side
    /// effects. Whenever establishment succeeds but the engine refuses to
    /// start, the interface is closed before the error is returned and the
    /// state returns to `Idle`, so a retry is possible.
    pub async fn start(&self, config: TunnelConfig) -> Result<()> {
        config.validate()?;

        if self.state.load() != LifecycleState::Idle {
            log::warn!("start requested while tunnel is {}", self.state.load());
            return Err(Error::AlreadyRunning);
        }

        if !self.provider.is_authorized() {
            return Err(Error::PermissionRequired);
        }

        // Claim the single instance; a concurrent start loses the race here
        if !self
            .state
            .transition(LifecycleState::Idle, LifecycleState::Starting)
        {
            return Err(Error::AlreadyRunning);
        }
        self.emit(TunnelEvent::StateChanged {
            old: LifecycleState::Idle,
            new: LifecycleState::Starting,
        })
        .await;

        match self.start_inner(&config).await {
            Ok(()) => {
                self.set_state(LifecycleState::Running).await;
                self.emit(TunnelEvent::Started {
                    interface: self
                        .active
                        .lock()
                        .await
                        .as_ref()
                        .map(|a| a.handle.name().to_string())
                        .unwrap_or_default(),
                    domain: config.domain.clone(),
                })
                .await;
                log::info!("tunnel started for {}", config.domain);
                Ok(())
            }
            Err(e) => {
                // Transient failure marker, then back to Idle for retry
                self.set_state(LifecycleState::Failed).await;
                self.set_state(LifecycleState::Idle).await;
                log::error!("failed to start tunnel: {}", e);
                Err(e)
            }
        }
    }

    async fn start_inner(&self, config: &TunnelConfig) -> Result<()> {
        let mut iface_config = InterfaceConfig::builder().dns_server(config.resolver_addr());
        for app in config.allowed_apps.iter().flatten() {
            iface_config = iface_config.allow_app(app.clone());
        }
        let iface_config = iface_config
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let handle = match self.provider.establish(&iface_config).await {
            Ok(handle) => handle,
            Err(e) if e.is_permission_denied() => return Err(Error::PermissionRequired),
            Err(e) => return Err(Error::InterfaceUnavailable(e.to_string())),
        };
        log::debug!("interface {} established", handle.name());

        if let Err(e) = self.engine.start(config.engine_dns_arg(), &config.domain) {
            // Roll back: the engine never came up, so the interface must not
            // outlive this attempt
            drop(handle);
            return Err(e);
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let forwarder = ForwardingLoop::new(
            handle.io(),
            self.relay.clone(),
            shutdown_rx,
            self.stats.clone(),
        );

        let weak = self.weak.clone();
        let worker = tokio::spawn(async move {
            if let Err(e) = forwarder.run().await {
                if let Some(controller) = weak.upgrade() {
                    controller.handle_worker_failure(e).await;
                }
            }
        });

        *self.active.lock().await = Some(ActiveTunnel {
            handle,
            shutdown_tx,
            worker,
        });
        Ok(())
    }

    /// Stop the tunnel
    ///
    /// A no-op success when nothing is running. Safe to call repeatedly and
    /// from a different caller than the one that started the tunnel; while a
    /// start or another stop is in flight, that operation owns teardown and
    /// this call returns without acting.
    pub async fn stop(&self) -> Result<()> {
        if !self
            .state
            .transition(LifecycleState::Running, LifecycleState::Stopping)
        {
            log::debug!("stop requested while tunnel is {}", self.state.load());
            return Ok(());
        }
        self.emit(TunnelEvent::StateChanged {
            old: LifecycleState::Running,
            new: LifecycleState::Stopping,
        })
        .await;

        let active = self.active.lock().await.take();
        if let Some(active) = active {
            // Signal the worker and give it a bounded window to drain
            let _ = active.shutdown_tx.send(());
            match tokio::time::timeout(LOOP_JOIN_TIMEOUT, active.worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("forwarding worker ended abnormally: {}", e),
                Err(_) => {
                    log::warn!(
                        "forwarding worker did not stop within {:?}",
                        LOOP_JOIN_TIMEOUT
                    )
                }
            }

            // Engine stop is best-effort; the interface must be released
            // regardless
            self.engine.stop();
            drop(active.handle);
        } else {
            self.engine.stop();
        }

        self.set_state(LifecycleState::Idle).await;
        self.emit(TunnelEvent::Stopped {
            reason: "stop requested".into(),
        })
        .await;
        log::info!("tunnel stopped");
        Ok(())
    }

    /// Entry point for a worker that terminated with a fatal error
    ///
    /// The start that launched the worker may still be completing; wait for
    /// it to reach `Running` before claiming teardown so the failure is
    /// never lost in the launch window.
    async fn handle_worker_failure(&self, cause: Error) {
        while self.state.load() == LifecycleState::Starting {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.self_stop(cause).await;
    }

    /// Teardown after the forwarding worker died underneath a running tunnel
    ///
    /// Runs on the worker's own task, so there is no join step: the loop has
    /// already exited and only its resources remain to be released. The
    /// `Running -> Stopping` claim keeps this from racing an external stop.
    async fn self_stop(&self, cause: Error) {
        if !self
            .state
            .transition(LifecycleState::Running, LifecycleState::Stopping)
        {
            return;
        }
        self.emit(TunnelEvent::ForwardingError {
            message: cause.to_string(),
            fatal: true,
        })
        .await;

        if let Some(active) = self.active.lock().await.take() {
            self.engine.stop();
            drop(active.handle);
        }

        self.set_state(LifecycleState::Idle).await;
        self.emit(TunnelEvent::Stopped {
            reason: format!("forwarding failed: {}", cause),
        })
        .await;
        log::warn!("tunnel self-stopped after forwarding failure");
    }

    async fn set_state(&self, new: LifecycleState) {
        let old = self.state.swap(new);
        if old != new {
            self.emit(TunnelEvent::StateChanged { old, new }).await;
        }
    }

    async fn emit(&self, event: TunnelEvent) {
        self.events.on_event(event).await;
    }
}

impl std::fmt::Debug for TunnelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelController")
            .field("state", &self.state.load())
            .finish()
    }
}
