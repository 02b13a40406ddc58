//! Phase-transition event bus.
//!
//! The Phase Orchestrator publishes `phase_entered`/`phase_exited` events
//! through a [`PhaseEventBus`] (§4.1). Handlers are invoked synchronously,
//! in registration order, on the thread driving the transition. A handler
//! that fails never aborts the transition itself — the bus collects and
//! reports the failure instead (§4.1: "handler failure must not abort
//! transition, must be reported").

use aether_core::{CycleId, Phase};
use std::sync::{Arc, Mutex};

/// A phase-transition event published by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    Entered { cycle_id: CycleId, phase: Phase },
    Exited { cycle_id: CycleId, phase: Phase },
}

impl PhaseEvent {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseEvent::Entered { phase, .. } => *phase,
            PhaseEvent::Exited { phase, .. } => *phase,
        }
    }

    pub fn cycle_id(&self) -> CycleId {
        match self {
            PhaseEvent::Entered { cycle_id, .. } => *cycle_id,
            PhaseEvent::Exited { cycle_id, .. } => *cycle_id,
        }
    }
}

/// A subscriber to phase-transition events. Implementors typically
/// (de)activate agents or record telemetry; `handle` must not panic — a
/// returned `Err` is recorded as a reported failure, not propagated.
pub trait PhaseEventHandler: Send + Sync {
    fn handle(&self, event: &PhaseEvent) -> Result<(), String>;

    /// A stable name used in failure reports; defaults to a generic label.
    fn name(&self) -> &str {
        "unnamed_handler"
    }
}

/// One handler's failure to process one event, reported rather than
/// propagated.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub handler_name: String,
    pub event: PhaseEvent,
    pub reason: String,
}

/// Synchronous, registration-ordered fanout of [`PhaseEvent`]s to
/// subscribers (§4.1, §5: "Phase-transition events are delivered to
/// subscribers in a single serial order per cycle").
#[derive(Default)]
pub struct PhaseEventBus {
    handlers: Mutex<Vec<Arc<dyn PhaseEventHandler>>>,
}

impl PhaseEventBus {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, handler: Arc<dyn PhaseEventHandler>) {
        self.handlers.lock().expect("phase event bus lock poisoned").push(handler);
    }

    /// Publish `event` to every subscriber in registration order. Returns
    /// the failures collected from handlers that returned `Err`; the
    /// publish itself never fails.
    pub fn publish(&self, event: PhaseEvent) -> Vec<HandlerFailure> {
        let handlers = self.handlers.lock().expect("phase event bus lock poisoned").clone();
        let mut failures = Vec::new();
        for handler in handlers.iter() {
            if let Err(reason) = handler.handle(&event) {
                tracing::warn!(handler = handler.name(), ?event, %reason, "phase event handler failed");
                failures.push(HandlerFailure {
                    handler_name: handler.name().to_string(),
                    event: event.clone(),
                    reason,
                });
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        seen: Arc<Mutex<Vec<PhaseEvent>>>,
        order_slot: usize,
        observed_order: Arc<Mutex<Vec<usize>>>,
    }

    impl PhaseEventHandler for Recorder {
        fn handle(&self, event: &PhaseEvent) -> Result<(), String> {
            self.seen.lock().unwrap().push(event.clone());
            self.observed_order.lock().unwrap().push(self.order_slot);
            Ok(())
        }
    }

    struct Failing;

    impl PhaseEventHandler for Failing {
        fn handle(&self, _event: &PhaseEvent) -> Result<(), String> {
            Err("boom".to_string())
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = PhaseEventBus::new();
        let observed_order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            bus.subscribe(Arc::new(Recorder {
                seen: Arc::new(Mutex::new(Vec::new())),
                order_slot: i,
                observed_order: observed_order.clone(),
            }));
        }
        bus.publish(PhaseEvent::Entered {
            cycle_id: CycleId::now_v7(),
            phase: Phase::Phase1,
        });
        assert_eq!(*observed_order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn failing_handler_is_reported_not_fatal() {
        let bus = PhaseEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(Arc::new(Failing));
        bus.subscribe(Arc::new(Recorder {
            seen: seen.clone(),
            order_slot: 0,
            observed_order: Arc::new(Mutex::new(Vec::new())),
        }));

        let failures = bus.publish(PhaseEvent::Exited {
            cycle_id: CycleId::now_v7(),
            phase: Phase::Phase2,
        });

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].handler_name, "failing");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
