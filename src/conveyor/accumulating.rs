//! Accumulating conveyor.
//!
//! Keeps running while product builds up. The dwell timer only advances
//! while both the box and accumulation sensors are covered, so short gaps
//! pause it instead of resetting it. With a pusher fitted, the first box
//! after each pick is pushed into position straight away and the belt
//! keeps accumulating behind it.

use super::{Core, ConveyorState, CycleContext, Cylinder, Sensor};
use crate::error::{ConveyorError, HardwareError};
use crate::timer::Timer;

/// Accumulating conveyor with dwell and restart timing.
pub struct Accumulating {
    box_sensor: Sensor,
    accumulation_sensor: Sensor,
    pusher: Option<Cylinder>,
    dwell: Timer,
    restart: Timer,
    first_box_ready: bool,
    box_was_picked: bool,
}

impl Accumulating {
    /// Create with both sensors, optional pusher, and the dwell and restart
    /// durations.
    pub fn new(
        box_sensor: Sensor,
        accumulation_sensor: Sensor,
        pusher: Option<Cylinder>,
        accumulation_time_ms: u64,
        restart_time_ms: u64,
    ) -> Self {
        Self {
            box_sensor,
            accumulation_sensor,
            pusher,
            dwell: Timer::new(accumulation_time_ms),
            restart: Timer::new(restart_time_ms),
            first_box_ready: false,
            box_was_picked: false,
        }
    }

    /// Accumulation dwell timer.
    pub fn dwell_timer(&self) -> &Timer {
        &self.dwell
    }

    /// Whether a pushed box is waiting in the pick position.
    pub fn first_box_ready(&self) -> bool {
        self.first_box_ready
    }

    pub(super) fn step(&mut self, core: &mut Core, ctx: &CycleContext) -> Result<(), ConveyorError> {
        let now = ctx.now_ms;
        match core.state() {
            ConveyorState::Init => {
                self.first_box_ready = false;
                if self.retracted(now)? {
                    core.drive().run()?;
                    core.transition(ConveyorState::Running);
                }
            }

            ConveyorState::Running => {
                let covered = self.box_sensor.active();
                if covered && self.accumulation_sensor.active() {
                    if self.dwell.is_paused() {
                        self.dwell.unpause(now);
                    } else if !self.dwell.is_started() {
                        self.dwell.start(now);
                    }
                } else {
                    self.dwell.pause(now);
                }

                if self.pusher.is_some() && covered && !self.first_box_ready {
                    core.drive().halt()?;
                    self.dwell.pause(now);
                    core.transition(ConveyorState::Pushing);
                } else if self.dwell.done(now) {
                    core.drive().halt()?;
                    self.dwell.stop();
                    core.transition(ConveyorState::Stopping);
                } else if ctx.picking && self.first_box_ready {
                    core.drive().halt()?;
                    core.transition(ConveyorState::Stopping);
                }
            }

            ConveyorState::Pushing => match self.pusher.as_mut() {
                Some(pusher) => {
                    pusher.push(now)?;
                    if pusher.is_pushed(now) {
                        pusher.idle(now)?;
                        core.transition(ConveyorState::Retract);
                    }
                }
                None => core.transition(ConveyorState::Running),
            },

            ConveyorState::Retract => {
                self.first_box_ready = true;
                match self.pusher.as_mut() {
                    Some(pusher) => {
                        pusher.pull(now)?;
                        if pusher.is_pulled(now) {
                            pusher.idle(now)?;
                            core.drive().run()?;
                            core.transition(ConveyorState::Running);
                        }
                    }
                    None => {
                        core.drive().run()?;
                        core.transition(ConveyorState::Running);
                    }
                }
            }

            ConveyorState::Stopping => {
                if self.retracted(now)? {
                    if let Some(pusher) = self.pusher.as_mut() {
                        pusher.idle(now)?;
                    }
                    self.box_was_picked = false;
                    core.transition(ConveyorState::WaitingForPick);
                }
            }

            ConveyorState::WaitingForPick => {
                self.first_box_ready = false;
                if !self.box_sensor.active() {
                    self.box_was_picked = true;
                }
                if self.box_was_picked && !ctx.picking && !self.restart.is_started() {
                    self.restart.start(now);
                }
                if self.restart.done(now) {
                    self.restart.stop();
                    core.drive().run()?;
                    core.transition(ConveyorState::Running);
                }
            }

            _ => core.transition(ConveyorState::Init),
        }
        Ok(())
    }

    /// Retract the pusher if needed; true once it is confirmed retracted or
    /// absent.
    fn retracted(&mut self, now_ms: u64) -> Result<bool, HardwareError> {
        match self.pusher.as_mut() {
            Some(pusher) if pusher.is_pulled(now_ms) => Ok(true),
            Some(pusher) => {
                pusher.pull(now_ms)?;
                Ok(false)
            }
            None => Ok(true),
        }
    }

    pub(super) fn secure(&mut self, now_ms: u64) -> Result<ConveyorState, HardwareError> {
        self.dwell.stop();
        self.restart.stop();
        self.first_box_ready = false;
        self.box_was_picked = false;
        if let Some(pusher) = self.pusher.as_mut() {
            pusher.pull(now_ms)?;
        }
        Ok(ConveyorState::Init)
    }

    pub(super) fn is_secured(&self, now_ms: u64) -> bool {
        self.pusher.as_ref().map_or(true, |p| p.is_pulled(now_ms))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{
        AccumulationSensorConfig, ConveyorConfig, ConveyorType, CylinderConfig, SensorConfig,
    };
    use crate::conveyor::{Behavior, Conveyor, ConveyorState, CycleContext};
    use crate::hal::MockHal;
    use crate::safety::SafetySnapshot;
    use crate::topology::build_conveyor;

    fn ok(now_ms: u64) -> CycleContext {
        CycleContext::new(now_ms, SafetySnapshot::operational())
    }

    fn build(hal: &MockHal, pusher: bool) -> Conveyor {
        let mut config = ConveyorConfig::new(ConveyorType::Accumulating, "belt")
            .with_box_sensor(SensorConfig::new("eye"))
            .with_accumulation_sensor(AccumulationSensorConfig::new("acc").with_times(1_000, 500));
        if pusher {
            config = config.with_pusher(CylinderConfig::new("pusher"));
        }
        build_conveyor(1, "acc", &config, None, hal).unwrap()
    }

    fn plant() -> MockHal {
        MockHal::new()
            .with_vfd("belt")
            .with_input("eye")
            .with_input("acc")
            .with_pneumatic("pusher")
    }

    fn first_box_ready(conveyor: &Conveyor) -> bool {
        match conveyor.behavior() {
            Behavior::Accumulating(b) => b.first_box_ready(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn dwell_pauses_across_gaps() {
        let hal = plant();
        let mut conveyor = build(&hal, false);
        conveyor.step(&ok(0)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);

        hal.set_input("eye", true);
        hal.set_input("acc", true);
        conveyor.step(&ok(100)).unwrap(); // dwell starts
        conveyor.step(&ok(600)).unwrap(); // 500 elapsed

        hal.set_input("acc", false);
        conveyor.step(&ok(700)).unwrap(); // paused at 600
        conveyor.step(&ok(5_000)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);

        hal.set_input("acc", true);
        conveyor.step(&ok(5_100)).unwrap(); // resumes
        conveyor.step(&ok(5_499)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);
        conveyor.step(&ok(5_500)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Stopping);
        assert!(!hal.is_running("belt"));
    }

    #[test]
    fn restart_after_pick_and_delay() {
        let hal = plant();
        let mut conveyor = build(&hal, false);
        conveyor.step(&ok(0)).unwrap();
        hal.set_input("eye", true);
        hal.set_input("acc", true);
        conveyor.step(&ok(100)).unwrap();
        conveyor.step(&ok(1_100)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Stopping);
        conveyor.step(&ok(1_200)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::WaitingForPick);

        hal.set_input("eye", false);
        conveyor.step(&ok(2_000)).unwrap();
        conveyor.step(&ok(2_499)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::WaitingForPick);
        conveyor.step(&ok(2_500)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);
        assert!(hal.is_running("belt"));
    }

    #[test]
    fn first_box_is_pushed_before_dwell() {
        let hal = plant();
        let mut conveyor = build(&hal, true);
        conveyor.step(&ok(0)).unwrap(); // retract
        conveyor.step(&ok(100)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);

        hal.set_input("eye", true);
        conveyor.step(&ok(200)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Pushing);
        assert!(!hal.is_running("belt"));

        conveyor.step(&ok(300)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Retract);
        conveyor.step(&ok(400)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);
        assert!(first_box_ready(&conveyor));
        assert!(hal.is_running("belt"));

        // Covered box no longer pre-empts.
        conveyor.step(&ok(500)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);
    }

    #[test]
    fn picking_stops_belt_when_first_box_ready() {
        let hal = plant();
        let mut conveyor = build(&hal, true);
        conveyor.step(&ok(0)).unwrap();
        conveyor.step(&ok(100)).unwrap();
        hal.set_input("eye", true);
        conveyor.step(&ok(200)).unwrap();
        conveyor.step(&ok(300)).unwrap();
        conveyor.step(&ok(400)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);

        conveyor.step(&ok(500).with_picking(true)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Stopping);
        assert!(!hal.is_running("belt"));

        conveyor.step(&ok(600).with_picking(true)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::WaitingForPick);
        conveyor.step(&ok(700).with_picking(true)).unwrap();
        assert!(!first_box_ready(&conveyor));
    }

    #[test]
    fn stop_clears_dwell() {
        let hal = plant();
        let mut conveyor = build(&hal, false);
        conveyor.step(&ok(0)).unwrap();
        hal.set_input("eye", true);
        hal.set_input("acc", true);
        conveyor.step(&ok(100)).unwrap();

        conveyor.stop(200).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Init);
        match conveyor.behavior() {
            Behavior::Accumulating(b) => assert!(!b.dwell_timer().is_started()),
            _ => unreachable!(),
        }
    }
}
