//! Infeed conveyor: brings one box into the pick zone, optionally pushes it
//! against a datum, then waits for the robot.
//!
//! ```text
//! INIT ─► RUNNING ─► STOPPING ─► PUSHING ─► RETRACT ─► WAITING_FOR_PICK
//!  │                    └───────────(no pusher)──────────────┘     │
//!  └─(pushed)─► RETRACT                         RUNNING ◄─(restart timer)
//! ```

use super::{Core, ConveyorState, CycleContext, Cylinder, Sensor};
use crate::error::{ConveyorError, HardwareError};
use crate::timer::Timer;

/// Single-box infeed.
pub struct Infeed {
    box_sensor: Sensor,
    pusher: Option<Cylinder>,
    restart: Timer,
}

impl Infeed {
    /// Create with the box sensor and optional pusher. The restart delay is
    /// the pusher's retract delay, or zero without a pusher.
    pub fn new(box_sensor: Sensor, pusher: Option<Cylinder>) -> Self {
        let restart_ms = pusher.as_ref().map_or(0, Cylinder::retract_delay_ms);
        Self {
            box_sensor,
            pusher,
            restart: Timer::new(restart_ms),
        }
    }

    /// Restart timer, armed once the pick zone is clear.
    pub fn restart_timer(&self) -> &Timer {
        &self.restart
    }

    pub(super) fn step(&mut self, core: &mut Core, ctx: &CycleContext) -> Result<(), ConveyorError> {
        let now = ctx.now_ms;
        match core.state() {
            ConveyorState::Init => match self.pusher.as_mut() {
                Some(pusher) if pusher.is_pushed(now) => {
                    pusher.pull(now)?;
                    core.transition(ConveyorState::Retract);
                }
                Some(pusher) if !pusher.is_pulled(now) => pusher.pull(now)?,
                _ => {
                    core.drive().run()?;
                    core.transition(ConveyorState::Running);
                }
            },

            ConveyorState::Running => {
                if let Some(pusher) = self.pusher.as_mut() {
                    pusher.idle(now)?;
                }
                if self.box_sensor.active() {
                    core.drive().halt()?;
                    core.transition(ConveyorState::Stopping);
                }
            }

            ConveyorState::Stopping => {
                if self.pusher.is_some() {
                    core.transition(ConveyorState::Pushing);
                } else {
                    core.transition(ConveyorState::WaitingForPick);
                }
            }

            ConveyorState::Pushing => {
                if let Some(pusher) = self.pusher.as_mut() {
                    pusher.push(now)?;
                    if pusher.is_pushed(now) {
                        pusher.idle(now)?;
                        core.transition(ConveyorState::Retract);
                    }
                } else {
                    core.transition(ConveyorState::WaitingForPick);
                }
            }

            ConveyorState::Retract => {
                if let Some(pusher) = self.pusher.as_mut() {
                    pusher.pull(now)?;
                    if pusher.is_pulled(now) {
                        pusher.idle(now)?;
                        core.transition(ConveyorState::WaitingForPick);
                    }
                } else {
                    core.transition(ConveyorState::WaitingForPick);
                }
            }

            ConveyorState::WaitingForPick => {
                if !self.box_sensor.active() && !ctx.picking && !self.restart.is_started() {
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

    pub(super) fn secure(&mut self, now_ms: u64) -> Result<ConveyorState, HardwareError> {
        self.restart.stop();
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
    use crate::config::{ConveyorConfig, ConveyorType, CylinderConfig, SensorConfig};
    use crate::conveyor::{Conveyor, ConveyorState, CycleContext};
    use crate::hal::MockHal;
    use crate::safety::SafetySnapshot;
    use crate::topology::build_conveyor;
    use crate::traits::PneumaticPosition;

    fn ok(now_ms: u64) -> CycleContext {
        CycleContext::new(now_ms, SafetySnapshot::operational())
    }

    fn with_pusher(hal: &MockHal) -> Conveyor {
        let config = ConveyorConfig::new(ConveyorType::Infeed, "belt")
            .with_box_sensor(SensorConfig::new("eye"))
            .with_pusher(CylinderConfig::new("pusher").with_delays(400, 600));
        build_conveyor(1, "infeed", &config, None, hal).unwrap()
    }

    fn plant() -> MockHal {
        MockHal::new()
            .with_vfd("belt")
            .with_input("eye")
            .with_pneumatic("pusher")
    }

    #[test]
    fn init_retracts_unknown_pusher_before_running() {
        let hal = plant();
        let mut conveyor = with_pusher(&hal);

        conveyor.step(&ok(0)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Init);
        assert_eq!(hal.commanded("pusher"), PneumaticPosition::Pulled);
        assert!(!hal.is_running("belt"));

        conveyor.step(&ok(100)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);
        assert!(hal.is_running("belt"));
    }

    #[test]
    fn init_with_extended_pusher_goes_through_retract() {
        let hal = plant();
        hal.set_position("pusher", PneumaticPosition::Pushed);
        let mut conveyor = with_pusher(&hal);

        conveyor.step(&ok(0)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Retract);
        conveyor.step(&ok(100)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::WaitingForPick);
    }

    #[test]
    fn full_pick_cycle() {
        let hal = plant();
        let mut conveyor = with_pusher(&hal);
        conveyor.step(&ok(0)).unwrap();
        conveyor.step(&ok(100)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);

        hal.set_input("eye", true);
        let mut now = 200;
        for expected in [
            ConveyorState::Stopping,
            ConveyorState::Pushing,
            ConveyorState::Retract,
            ConveyorState::WaitingForPick,
        ] {
            conveyor.step(&ok(now)).unwrap();
            assert_eq!(conveyor.state(), expected);
            now += 100;
        }
        assert!(!hal.is_running("belt"));
        assert_eq!(hal.position("pusher"), PneumaticPosition::Pulled);
    }

    #[test]
    fn restart_waits_for_retract_delay_after_box_clears() {
        let hal = plant();
        let mut conveyor = with_pusher(&hal);
        conveyor.step(&ok(0)).unwrap();
        conveyor.step(&ok(100)).unwrap();
        hal.set_input("eye", true);
        for now in [200, 300, 400, 500] {
            conveyor.step(&ok(now)).unwrap();
        }
        assert_eq!(conveyor.state(), ConveyorState::WaitingForPick);

        // Box still present: nothing happens.
        conveyor.step(&ok(1_000)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::WaitingForPick);

        let t = 2_000;
        hal.set_input("eye", false);
        conveyor.step(&ok(t)).unwrap();
        conveyor.step(&ok(t + 599)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::WaitingForPick);
        assert!(!hal.is_running("belt"));

        conveyor.step(&ok(t + 600)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);
        assert!(hal.is_running("belt"));
    }

    #[test]
    fn robot_picking_delays_restart() {
        let hal = plant();
        let mut conveyor = with_pusher(&hal);
        conveyor.step(&ok(0)).unwrap();
        conveyor.step(&ok(100)).unwrap();
        hal.set_input("eye", true);
        for now in [200, 300, 400, 500] {
            conveyor.step(&ok(now)).unwrap();
        }
        hal.set_input("eye", false);

        conveyor.step(&ok(600).with_picking(true)).unwrap();
        conveyor.step(&ok(5_000).with_picking(true)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::WaitingForPick);

        conveyor.step(&ok(5_100)).unwrap();
        conveyor.step(&ok(5_700)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);
    }

    #[test]
    fn without_pusher_skips_push_cycle() {
        let hal = MockHal::new().with_vfd("belt").with_input("eye");
        let config = ConveyorConfig::new(ConveyorType::Infeed, "belt")
            .with_box_sensor(SensorConfig::new("eye"));
        let mut conveyor = build_conveyor(1, "infeed", &config, None, &hal).unwrap();

        conveyor.step(&ok(0)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);
        hal.set_input("eye", true);
        conveyor.step(&ok(100)).unwrap();
        conveyor.step(&ok(200)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::WaitingForPick);

        hal.set_input("eye", false);
        conveyor.step(&ok(300)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);
    }

    #[test]
    fn safety_loss_retracts_pusher() {
        let hal = plant();
        let mut conveyor = with_pusher(&hal);
        conveyor.step(&ok(0)).unwrap();
        conveyor.step(&ok(100)).unwrap();
        hal.set_input("eye", true);
        conveyor.step(&ok(200)).unwrap();
        conveyor.step(&ok(300)).unwrap();
        conveyor.step(&ok(400)).unwrap();
        assert_eq!(hal.position("pusher"), PneumaticPosition::Pushed);

        let unsafe_ctx = CycleContext::new(
            500,
            SafetySnapshot {
                drives_ready: false,
                ..SafetySnapshot::operational()
            },
        );
        conveyor.step(&unsafe_ctx).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Init);
        assert_eq!(hal.commanded("pusher"), PneumaticPosition::Pulled);
        assert!(!hal.is_running("belt"));
    }
}
