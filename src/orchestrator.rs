//! Steps every conveyor of the line once per cycle.
//!
//! Conveyors are visited in list order, which is build order, so a child
//! always sees the state its parent reached earlier in the same cycle.
//! Errors are isolated per conveyor: a failing or faulted unit is reported
//! in the [`CycleReport`] and the remaining units are still stepped or
//! stopped.

use std::mem;

use tracing::warn;

use crate::conveyor::{Conveyor, ConveyorState, CycleContext, StatusUpdate};
use crate::error::{ConveyorError, ConveyorFault};

/// An error raised by one conveyor during a cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CycleError {
    /// Status id of the conveyor.
    pub id: u32,
    /// Configuration key of the conveyor.
    pub key: String,
    /// What went wrong.
    pub error: ConveyorError,
}

/// Everything observable from one pass over the line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// State changes, in list order.
    pub updates: Vec<StatusUpdate>,
    /// Per-conveyor errors, in list order.
    pub errors: Vec<CycleError>,
}

impl CycleReport {
    /// Whether nothing changed and nothing failed.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.errors.is_empty()
    }

    /// Faults latched during the cycle.
    pub fn faults(&self) -> impl Iterator<Item = &ConveyorFault> {
        self.errors.iter().filter_map(|e| match &e.error {
            ConveyorError::Fault(fault) => Some(fault),
            ConveyorError::Hardware(_) => None,
        })
    }

    /// Append another report.
    pub fn merge(&mut self, other: CycleReport) {
        self.updates.extend(other.updates);
        self.errors.extend(other.errors);
    }

    fn record(&mut self, conveyor: &mut Conveyor, result: Result<(), ConveyorError>) {
        if let Err(error) = result {
            if let ConveyorError::Hardware(e) = &error {
                warn!(conveyor = conveyor.id(), key = conveyor.key(), error = %e, "hardware command failed");
            }
            self.errors.push(CycleError {
                id: conveyor.id(),
                key: conveyor.key().to_string(),
                error,
            });
        }
        if let Some(update) = conveyor.take_status() {
            self.updates.push(update);
        }
    }
}

/// The live list of conveyors.
#[derive(Debug, Default)]
pub struct ControlAllConveyor {
    conveyors: Vec<Conveyor>,
}

impl ControlAllConveyor {
    /// Take ownership of a built topology.
    pub fn new(conveyors: Vec<Conveyor>) -> Self {
        Self { conveyors }
    }

    /// Number of conveyors.
    pub fn len(&self) -> usize {
        self.conveyors.len()
    }

    /// Whether the line has no conveyors.
    pub fn is_empty(&self) -> bool {
        self.conveyors.is_empty()
    }

    /// Conveyors in step order.
    pub fn conveyors(&self) -> &[Conveyor] {
        &self.conveyors
    }

    /// Look up a conveyor by configuration key.
    pub fn by_key(&self, key: &str) -> Option<&Conveyor> {
        self.conveyors.iter().find(|c| c.key() == key)
    }

    /// Current state of every conveyor.
    pub fn states(&self) -> Vec<(u32, ConveyorState)> {
        self.conveyors.iter().map(|c| (c.id(), c.state())).collect()
    }

    /// Step every conveyor once, in order. `ctx.parent` is filled in per
    /// conveyor.
    pub fn run_all(&mut self, ctx: &CycleContext) -> CycleReport {
        let mut report = CycleReport::default();
        for index in 0..self.conveyors.len() {
            let parent = self.conveyors[index]
                .parent()
                .and_then(|p| self.conveyors.get(p))
                .map(Conveyor::state);
            let conveyor = &mut self.conveyors[index];
            let ctx = CycleContext { parent, ..*ctx };
            let result = conveyor.step(&ctx);
            report.record(conveyor, result);
        }
        report
    }

    /// Stop every conveyor, continuing past failures.
    pub fn stop_all(&mut self, now_ms: u64) -> CycleReport {
        let mut report = CycleReport::default();
        for conveyor in &mut self.conveyors {
            let result = conveyor.stop(now_ms);
            report.record(conveyor, result);
        }
        report
    }

    /// Keep a stopped line safe: re-send any stop or safe-position command
    /// that has not been confirmed. States are left as they are.
    pub fn hold_all(&mut self, now_ms: u64) -> CycleReport {
        let mut report = CycleReport::default();
        for conveyor in &mut self.conveyors {
            let result = conveyor.hold_safe(now_ms);
            report.record(conveyor, result);
        }
        report
    }

    /// Force every conveyor to INIT and clear latched faults.
    pub fn reset_all(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        for conveyor in &mut self.conveyors {
            conveyor.reset();
            report.record(conveyor, Ok(()));
        }
        report
    }

    /// Whether every drive is stopped and every cylinder is confirmed safe.
    pub fn is_quiescent(&self, now_ms: u64) -> bool {
        self.conveyors.iter().all(|c| c.is_quiescent(now_ms))
    }

    /// Whether every drive has confirmed a stop command.
    pub fn drives_stopped(&self) -> bool {
        self.conveyors.iter().all(Conveyor::is_drive_stopped)
    }

    /// Swap in a new list, returning the old one.
    pub fn replace(&mut self, conveyors: Vec<Conveyor>) -> Vec<Conveyor> {
        mem::replace(&mut self.conveyors, conveyors)
    }

    /// Status of every conveyor, whether or not it changed.
    pub fn snapshot(&mut self) -> Vec<StatusUpdate> {
        self.conveyors
            .iter_mut()
            .map(|c| {
                c.take_status();
                StatusUpdate {
                    id: c.id(),
                    state: c.state(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConveyorConfig, ConveyorType, LineConfig, SensorConfig};
    use crate::hal::{HalEvent, MockHal};
    use crate::safety::SafetySnapshot;
    use crate::topology::build_topology;

    fn line(hal: &MockHal) -> ControlAllConveyor {
        let config = LineConfig::new()
            .with_conveyor(
                "infeed",
                ConveyorConfig::new(ConveyorType::Infeed, "m1")
                    .with_box_sensor(SensorConfig::new("e1")),
            )
            .with_conveyor("tail", ConveyorConfig::new(ConveyorType::Follower, "m2"));
        ControlAllConveyor::new(build_topology(&config, hal).unwrap())
    }

    fn plant() -> MockHal {
        MockHal::new().with_vfd("m1").with_vfd("m2").with_input("e1")
    }

    fn ok(now_ms: u64) -> CycleContext {
        CycleContext::new(now_ms, SafetySnapshot::operational())
    }

    #[test]
    fn child_sees_parent_state_from_same_cycle() {
        let hal = plant();
        let mut line = line(&hal);
        let report = line.run_all(&ok(0));
        assert_eq!(
            line.states(),
            vec![(1, ConveyorState::Running), (2, ConveyorState::Running)]
        );
        assert_eq!(report.updates.len(), 2);
        assert!(hal.is_running("m2"));
    }

    #[test]
    fn status_only_on_change() {
        let hal = plant();
        let mut line = line(&hal);
        line.run_all(&ok(0));
        assert!(line.run_all(&ok(100)).is_empty());

        hal.set_input("e1", true);
        let report = line.run_all(&ok(200));
        assert_eq!(
            report.updates,
            vec![
                StatusUpdate { id: 1, state: ConveyorState::Stopping },
                StatusUpdate { id: 2, state: ConveyorState::Stopping },
            ]
        );
    }

    #[test]
    fn failure_is_isolated() {
        let hal = plant();
        let mut line = line(&hal);
        hal.fail_device("m1");
        let report = line.run_all(&ok(0));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].key, "infeed");
        assert_eq!(report.faults().count(), 0);

        // The follower was still stepped.
        assert_eq!(line.states()[1].1, ConveyorState::Stopping);

        let report = line.stop_all(100);
        assert_eq!(report.errors.len(), 1);
        assert!(!hal.is_running("m2"));
    }

    #[test]
    fn hold_all_retries_a_rejected_stop() {
        let hal = plant();
        let mut line = line(&hal);
        line.run_all(&ok(0));
        assert!(hal.is_running("m1"));

        hal.fail_device("m1");
        assert_eq!(line.stop_all(100).errors.len(), 1);
        assert!(!line.is_quiescent(100));
        assert_eq!(line.hold_all(200).errors.len(), 1);

        hal.recover_device("m1");
        hal.clear_journal();
        assert!(line.hold_all(300).is_empty());
        assert_eq!(hal.journal(), vec![HalEvent::Stop("m1".into())]);
        assert!(!hal.is_running("m1"));
        assert!(line.is_quiescent(300));

        hal.clear_journal();
        line.hold_all(400);
        assert!(hal.journal().is_empty());
    }

    #[test]
    fn stop_all_and_reset_all() {
        let hal = plant();
        let mut line = line(&hal);
        line.run_all(&ok(0));
        line.stop_all(100);
        assert!(line.is_quiescent(100));
        assert_eq!(
            line.states(),
            vec![(1, ConveyorState::Init), (2, ConveyorState::Stopping)]
        );

        let report = line.reset_all();
        assert_eq!(report.updates, vec![StatusUpdate { id: 2, state: ConveyorState::Init }]);
    }

    #[test]
    fn replace_swaps_whole_list() {
        let hal = plant();
        let mut line = line(&hal);
        let old = line.replace(Vec::new());
        assert_eq!(old.len(), 2);
        assert!(line.is_empty());
        assert!(line.run_all(&ok(0)).is_empty());
    }
}
