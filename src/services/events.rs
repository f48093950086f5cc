//! Event system for ledger operations
//!
//! Events are emitted after a unit of work commits. They feed the audit log
//! and are never needed for ledger/counter consistency.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::db::ActionKind;

/// Events emitted by services
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    /// A toggle changed ledger state and projected a counter delta
    ActionToggled {
        user_id: i64,
        target_id: i64,
        action_kind: ActionKind,
        on_state: bool,
        delta: i64,
    },
    /// A toggle lost a write race or hit a busy database and was retried
    ToggleRetried {
        user_id: i64,
        target_id: i64,
        action_kind: ActionKind,
        attempt: u32,
    },
    /// Counters were recomputed from the ledger
    CountersReconciled {
        target_id: i64,
        corrected_kinds: usize,
    },
    /// Reference seed applied
    SeedApplied {
        projects: usize,
        users: usize,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &LedgerEvent);
}

/// Event bus for broadcasting ledger events
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: LedgerEvent) {
        trace!(event = ?event, "Emitting ledger event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::ActionToggled {
                user_id,
                target_id,
                action_kind,
                on_state,
                delta,
            } => {
                info!(
                    user_id,
                    target_id,
                    kind = %action_kind,
                    on = on_state,
                    delta,
                    "Engagement toggled"
                );
            }
            LedgerEvent::ToggleRetried { attempt, target_id, .. } => {
                debug!(target_id, attempt, "Toggle retried");
            }
            LedgerEvent::CountersReconciled {
                target_id,
                corrected_kinds,
            } if *corrected_kinds > 0 => {
                warn!(target_id, corrected_kinds, "Counters corrected by reconciliation");
            }
            _ => {
                trace!(event = ?event, "Ledger event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(LedgerEvent::ActionToggled {
            user_id: 1,
            target_id: 100,
            action_kind: ActionKind::Like,
            on_state: true,
            delta: 1,
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            LedgerEvent::ActionToggled { target_id, delta, .. } => {
                assert_eq!(target_id, 100);
                assert_eq!(delta, 1);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        bus.emit(LedgerEvent::CountersReconciled {
            target_id: 1,
            corrected_kinds: 0,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
