//! Phase Orchestrator (§4.1): owns the one current [`AtoCycle`] and drives
//! it through the six-phase transition graph, either by wall-clock
//! [`PhaseOrchestrator::tick`] or explicit [`PhaseOrchestrator::advance`].
//! Every transition publishes `phase_exited`/`phase_entered` through an
//! [`aether_events::PhaseEventBus`] the kernel subscribes to in order to
//! (de)activate agents per `active_agent_ids`.

use aether_core::{AtoCycle, CycleId, CycleSchedule, OrchestratorError, Phase};
use aether_events::{HandlerFailure, PhaseEvent, PhaseEventBus, PhaseEventHandler};
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};

/// What a [`PhaseOrchestrator::tick`] call did: zero or more transitions
/// (clock skew can carry a stalled process through several phases in one
/// tick), plus any handler failures collected along the way.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub transitioned: Vec<Phase>,
    pub failures: Vec<HandlerFailure>,
}

/// Drives the six-phase ATO cycle state machine (§4.1). One instance per
/// kernel; `tick`/`advance`/`skip_to` take an exclusive lock on the cycle
/// for the duration of the transition, so publish order is a single serial
/// stream per cycle (§5).
pub struct PhaseOrchestrator {
    schedule: CycleSchedule,
    bus: Arc<PhaseEventBus>,
    cycle: RwLock<Option<AtoCycle>>,
}

impl PhaseOrchestrator {
    pub fn new(schedule: CycleSchedule, bus: Arc<PhaseEventBus>) -> Self {
        Self {
            schedule,
            bus,
            cycle: RwLock::new(None),
        }
    }

    pub fn subscribe(&self, handler: Arc<dyn PhaseEventHandler>) {
        self.bus.subscribe(handler);
    }

    /// §4.1: fails with `AlreadyActive` if a cycle is current; initializes
    /// to PHASE1 at offset 0.
    pub fn start_cycle(&self, cycle_id: CycleId, now: DateTime<Utc>) -> Result<AtoCycle, OrchestratorError> {
        let mut guard = self.cycle.write().expect("orchestrator lock poisoned");
        if guard.is_some() {
            return Err(OrchestratorError::AlreadyActive);
        }
        let cycle = AtoCycle::start(cycle_id, now);
        *guard = Some(cycle.clone());
        drop(guard);
        self.bus.publish(PhaseEvent::Entered {
            cycle_id,
            phase: Phase::Phase1,
        });
        Ok(cycle)
    }

    pub fn current_phase(&self) -> Result<Phase, OrchestratorError> {
        self.cycle
            .read()
            .expect("orchestrator lock poisoned")
            .as_ref()
            .map(|c| c.current_phase)
            .ok_or(OrchestratorError::NoActiveCycle)
    }

    pub fn current_cycle(&self) -> Result<AtoCycle, OrchestratorError> {
        self.cycle
            .read()
            .expect("orchestrator lock poisoned")
            .clone()
            .ok_or(OrchestratorError::NoActiveCycle)
    }

    /// §4.1: moves to the next phase per the transition graph. Never
    /// skips, so critical-phase protection never applies here; use
    /// [`Self::skip_to`] for anything that isn't a single forward step.
    pub fn advance(&self, now: DateTime<Utc>) -> Result<(Phase, Vec<HandlerFailure>), OrchestratorError> {
        let mut guard = self.cycle.write().expect("orchestrator lock poisoned");
        let cycle = guard.as_mut().ok_or(OrchestratorError::NoActiveCycle)?;
        let next = cycle.current_phase.next();
        let failures = self.transition_to(cycle, next, now);
        Ok((next, failures))
    }

    /// Jumps ahead of the single next-phase step. Critical phases
    /// (PHASE3, PHASE4 by default) can never be skipped over, even with
    /// `override_reason` set; skipping only non-critical phases requires
    /// an explicit override, which is logged as the audit record (§4.1).
    pub fn skip_to(
        &self,
        target: Phase,
        now: DateTime<Utc>,
        override_reason: Option<String>,
    ) -> Result<Phase, OrchestratorError> {
        let mut guard = self.cycle.write().expect("orchestrator lock poisoned");
        let cycle = guard.as_mut().ok_or(OrchestratorError::NoActiveCycle)?;
        let current = cycle.current_phase;

        if target.index() <= current.index() {
            return Err(OrchestratorError::IllegalTransition { from: current, to: target });
        }
        if target == current.next() {
            self.transition_to(cycle, target, now);
            return Ok(target);
        }

        for idx in (current.index() + 1)..target.index() {
            let skipped = Phase::ORDER[idx];
            if self.schedule.is_critical(skipped) {
                return Err(OrchestratorError::CannotSkipCriticalPhase(skipped));
            }
        }
        let Some(reason) = override_reason else {
            return Err(OrchestratorError::IllegalTransition { from: current, to: target });
        };
        tracing::warn!(cycle_id = %cycle.cycle_id, from = %current, to = %target, %reason, "non-critical phase skip applied under override");
        self.transition_to(cycle, target, now);
        Ok(target)
    }

    /// §4.1: idempotent given the same `now`. Transitions are computed
    /// from `now - phase_start_time`, never from an elapsed delta, so
    /// repeated calls with an unchanged `now` never re-fire. Bounded to
    /// one full lap of the cycle so a zero-duration phase can't spin
    /// forever.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome, OrchestratorError> {
        let mut guard = self.cycle.write().expect("orchestrator lock poisoned");
        let cycle = guard.as_mut().ok_or(OrchestratorError::NoActiveCycle)?;

        let mut outcome = TickOutcome::default();
        for _ in 0..Phase::ORDER.len() {
            let elapsed_hours = (now - cycle.phase_start_time).num_seconds() as f64 / 3600.0;
            let duration = self.schedule.duration_hours(cycle.current_phase);
            if elapsed_hours < duration {
                break;
            }
            // The new phase nominally starts `duration` after the old one
            // did, not at `now` — so a stalled tick correctly keeps
            // walking forward through however many phases clock skew
            // carried it past, rather than snapping to `now` and stopping
            // after a single hop.
            let next = cycle.current_phase.next();
            let next_start = cycle.phase_start_time + chrono::Duration::seconds((duration * 3600.0) as i64);
            outcome.failures.extend(self.transition_to(cycle, next, next_start));
            outcome.transitioned.push(next);
        }
        Ok(outcome)
    }

    fn transition_to(&self, cycle: &mut AtoCycle, target: Phase, phase_start_time: DateTime<Utc>) -> Vec<HandlerFailure> {
        let cycle_id = cycle.cycle_id;
        let mut failures = self.bus.publish(PhaseEvent::Exited {
            cycle_id,
            phase: cycle.current_phase,
        });
        cycle.current_phase = target;
        cycle.phase_start_time = phase_start_time;
        failures.extend(self.bus.publish(PhaseEvent::Entered { cycle_id, phase: target }));
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_core::PhaseConfig;

    fn schedule() -> CycleSchedule {
        CycleSchedule {
            phases: vec![
                PhaseConfig::new(Phase::Phase1, 6.0, 0.0),
                PhaseConfig::new(Phase::Phase2, 12.0, 6.0),
                PhaseConfig::new(Phase::Phase3, 24.0, 18.0).critical(),
                PhaseConfig::new(Phase::Phase4, 18.0, 42.0).critical(),
                PhaseConfig::new(Phase::Phase5, 9.0, 60.0),
                PhaseConfig::new(Phase::Phase6, 3.0, 69.0),
            ],
        }
    }

    fn now(hours_from_epoch: f64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(0, 0).unwrap() + chrono::Duration::seconds((hours_from_epoch * 3600.0) as i64)
    }

    #[test]
    fn start_cycle_fails_when_already_active() {
        let orchestrator = PhaseOrchestrator::new(schedule(), Arc::new(PhaseEventBus::new()));
        orchestrator.start_cycle(CycleId::now_v7(), now(0.0)).unwrap();
        let result = orchestrator.start_cycle(CycleId::now_v7(), now(0.0));
        assert!(matches!(result, Err(OrchestratorError::AlreadyActive)));
    }

    #[test]
    fn advance_moves_to_next_phase() {
        let orchestrator = PhaseOrchestrator::new(schedule(), Arc::new(PhaseEventBus::new()));
        orchestrator.start_cycle(CycleId::now_v7(), now(0.0)).unwrap();
        let (phase, _) = orchestrator.advance(now(0.0)).unwrap();
        assert_eq!(phase, Phase::Phase2);
    }

    #[test]
    fn tick_is_idempotent_given_same_now() {
        let orchestrator = PhaseOrchestrator::new(schedule(), Arc::new(PhaseEventBus::new()));
        orchestrator.start_cycle(CycleId::now_v7(), now(0.0)).unwrap();
        let first = orchestrator.tick(now(7.0)).unwrap();
        assert_eq!(first.transitioned, vec![Phase::Phase2]);
        let second = orchestrator.tick(now(7.0)).unwrap();
        assert!(second.transitioned.is_empty());
    }

    #[test]
    fn tick_carries_through_multiple_phases_on_clock_skew() {
        let orchestrator = PhaseOrchestrator::new(schedule(), Arc::new(PhaseEventBus::new()));
        orchestrator.start_cycle(CycleId::now_v7(), now(0.0)).unwrap();
        let outcome = orchestrator.tick(now(20.0)).unwrap();
        assert_eq!(outcome.transitioned, vec![Phase::Phase2, Phase::Phase3]);
    }

    #[test]
    fn tick_wraps_cycle_restart_edge() {
        let orchestrator = PhaseOrchestrator::new(schedule(), Arc::new(PhaseEventBus::new()));
        orchestrator.start_cycle(CycleId::now_v7(), now(0.0)).unwrap();
        let outcome = orchestrator.tick(now(100.0)).unwrap();
        assert_eq!(outcome.transitioned.last(), Some(&Phase::Phase1));
    }

    #[test]
    fn skip_to_rejects_skipping_a_critical_phase() {
        let orchestrator = PhaseOrchestrator::new(schedule(), Arc::new(PhaseEventBus::new()));
        orchestrator.start_cycle(CycleId::now_v7(), now(0.0)).unwrap();
        let result = orchestrator.skip_to(Phase::Phase4, now(0.0), Some("commander override".into()));
        assert!(matches!(result, Err(OrchestratorError::CannotSkipCriticalPhase(Phase::Phase3))));
    }

    #[test]
    fn skip_to_non_critical_requires_override() {
        let orchestrator = PhaseOrchestrator::new(schedule(), Arc::new(PhaseEventBus::new()));
        orchestrator.start_cycle(CycleId::now_v7(), now(0.0)).unwrap();
        orchestrator.advance(now(0.0)).unwrap();
        orchestrator.advance(now(0.0)).unwrap();
        orchestrator.advance(now(0.0)).unwrap();
        // now at Phase4; skip to Phase6 only crosses non-critical Phase5
        let rejected = orchestrator.skip_to(Phase::Phase6, now(0.0), None);
        assert!(matches!(rejected, Err(OrchestratorError::IllegalTransition { .. })));
        let allowed = orchestrator.skip_to(Phase::Phase6, now(0.0), Some("compressing schedule".into()));
        assert_eq!(allowed, Ok(Phase::Phase6));
    }

    #[test]
    fn subscribers_see_exit_then_entry_in_order() {
        struct Recorder(Arc<std::sync::Mutex<Vec<String>>>);
        impl PhaseEventHandler for Recorder {
            fn handle(&self, event: &PhaseEvent) -> Result<(), String> {
                let label = match event {
                    PhaseEvent::Entered { phase, .. } => format!("enter:{phase}"),
                    PhaseEvent::Exited { phase, .. } => format!("exit:{phase}"),
                };
                self.0.lock().unwrap().push(label);
                Ok(())
            }
        }

        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let bus = Arc::new(PhaseEventBus::new());
        bus.subscribe(Arc::new(Recorder(log.clone())));
        let orchestrator = PhaseOrchestrator::new(schedule(), bus);
        orchestrator.start_cycle(CycleId::now_v7(), now(0.0)).unwrap();
        orchestrator.advance(now(0.0)).unwrap();

        let entries = log.lock().unwrap().clone();
        assert_eq!(entries, vec!["enter:PHASE1", "exit:PHASE1", "enter:PHASE2"]);
    }

    #[test]
    fn failing_handler_does_not_abort_transition() {
        struct AlwaysFails;
        impl PhaseEventHandler for AlwaysFails {
            fn handle(&self, _event: &PhaseEvent) -> Result<(), String> {
                Err("boom".to_string())
            }
            fn name(&self) -> &str {
                "always_fails"
            }
        }

        let bus = Arc::new(PhaseEventBus::new());
        bus.subscribe(Arc::new(AlwaysFails));
        let orchestrator = PhaseOrchestrator::new(schedule(), bus);
        orchestrator.start_cycle(CycleId::now_v7(), now(0.0)).unwrap();
        let (phase, failures) = orchestrator.advance(now(0.0)).unwrap();
        assert_eq!(phase, Phase::Phase2);
        assert_eq!(failures.len(), 2);
    }

    #[test]
    fn no_active_cycle_errors_cleanly() {
        let orchestrator = PhaseOrchestrator::new(schedule(), Arc::new(PhaseEventBus::new()));
        assert!(matches!(orchestrator.current_phase(), Err(OrchestratorError::NoActiveCycle)));
        assert!(matches!(orchestrator.advance(now(0.0)), Err(OrchestratorError::NoActiveCycle)));
    }

    proptest::proptest! {
        /// §4.1: `advance` only ever takes a single forward step through
        /// the fixed transition graph, so the phase sequence visited over
        /// any run of `n` advances is a prefix of the infinite cyclic
        /// sequence PHASE1..PHASE6 repeated, for any `n`.
        #[test]
        fn advance_sequence_is_a_prefix_of_the_cyclic_order(n in 0usize..30) {
            let orchestrator = PhaseOrchestrator::new(schedule(), Arc::new(PhaseEventBus::new()));
            orchestrator.start_cycle(CycleId::now_v7(), now(0.0)).unwrap();

            let mut visited = vec![orchestrator.current_phase().unwrap()];
            for _ in 0..n {
                let (phase, _) = orchestrator.advance(now(0.0)).unwrap();
                visited.push(phase);
            }

            for (i, phase) in visited.iter().enumerate() {
                prop_assert_eq!(*phase, Phase::ORDER[i % Phase::ORDER.len()]);
            }
        }
    }
}
