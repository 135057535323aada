//! Tunnel lifecycle state and events

use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;

/// Tunnel lifecycle state
///
/// Exactly one instance of this state exists per controller; only one tunnel
/// may be active per process. `Starting` and `Stopping` are transient states
/// guarding re-entrancy while a transition is in flight, `Failed` is a
/// transient marker on the start-failure path before the state resets to
/// `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// No tunnel is active
    Idle = 0,
    /// A start request is establishing resources
    Starting = 1,
    /// Interface, engine and forwarding loop are all up
    Running = 2,
    /// A stop request is tearing resources down
    Stopping = 3,
    /// A start attempt failed; resets to `Idle` so a retry is possible
    Failed = 4,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Idle,
            1 => LifecycleState::Starting,
            2 => LifecycleState::Running,
            3 => LifecycleState::Stopping,
            _ => LifecycleState::Failed,
        }
    }

    /// Check whether the tunnel is fully up
    pub fn is_running(&self) -> bool {
        matches!(self, LifecycleState::Running)
    }

    /// Check whether a start or stop transition is in flight
    pub fn is_transitioning(&self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Stopping)
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Lock-free cell holding the lifecycle state
///
/// Status reads never block, and compare-and-swap transitions are what
/// enforce the single-instance guarantee: two concurrent starts race on
/// `Idle -> Starting` and exactly one wins.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Create a new cell in the `Idle` state
    pub const fn new() -> Self {
        Self(AtomicU8::new(LifecycleState::Idle as u8))
    }

    /// Read the current state
    pub fn load(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store a new state, returning the previous one
    pub fn swap(&self, next: LifecycleState) -> LifecycleState {
        LifecycleState::from_u8(self.0.swap(next as u8, Ordering::AcqRel))
    }

    /// Atomically transition `from -> to`; false if the state was not `from`
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Events emitted by the tunnel controller
#[derive(Debug, Clone)]
pub enum TunnelEvent {
    /// State changed
    StateChanged {
        old: LifecycleState,
        new: LifecycleState,
    },

    /// Tunnel started successfully
    Started {
        /// Interface name
        interface: String,
        /// Tunnel domain
        domain: String,
    },

    /// Tunnel stopped
    Stopped {
        /// Reason for stopping
        reason: String,
    },

    /// The forwarding loop reported an error
    ForwardingError {
        /// Error message
        message: String,
        /// Whether the error terminated the loop
        fatal: bool,
    },
}

/// Event handler trait for observing tunnel events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle a tunnel event
    async fn on_event(&self, event: TunnelEvent);
}

/// Event handler that logs events
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn on_event(&self, event: TunnelEvent) {
        match event {
            TunnelEvent::StateChanged { old, new } => {
                log::info!("tunnel state: {} -> {}", old, new);
            }
            TunnelEvent::Started { interface, domain } => {
                log::info!("tunnel started on {} for {}", interface, domain);
            }
            TunnelEvent::Stopped { reason } => {
                log::info!("tunnel stopped: {}", reason);
            }
            TunnelEvent::ForwardingError { message, fatal } => {
                if fatal {
                    log::error!("forwarding failed: {}", message);
                } else {
                    log::warn!("forwarding error: {}", message);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_exclusive() {
        let cell = StateCell::new();
        assert!(cell.transition(LifecycleState::Idle, LifecycleState::Starting));
        assert!(!cell.transition(LifecycleState::Idle, LifecycleState::Starting));
        assert_eq!(cell.load(), LifecycleState::Starting);
    }

    #[test]
    fn swap_returns_previous_state() {
        let cell = StateCell::new();
        assert_eq!(cell.swap(LifecycleState::Running), LifecycleState::Idle);
        assert_eq!(cell.load(), LifecycleState::Running);
        assert!(cell.load().is_running());
    }

    #[test]
    fn descriptions_are_lowercase_words() {
        assert_eq!(LifecycleState::Idle.to_string(), "idle");
        assert_eq!(LifecycleState::Running.to_string(), "running");
        assert!(LifecycleState::Starting.is_transitioning());
        assert!(LifecycleState::Stopping.is_transitioning());
    }
}
