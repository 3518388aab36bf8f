//! Simple conveyor: runs until its box sensor is covered.

use super::{Core, ConveyorState, CycleContext, Sensor};
use crate::error::ConveyorError;

/// Run/stop on a single box sensor.
pub struct Simple {
    box_sensor: Sensor,
}

impl Simple {
    /// Create with the box sensor.
    pub fn new(box_sensor: Sensor) -> Self {
        Self { box_sensor }
    }

    pub(super) fn step(&mut self, core: &mut Core, _ctx: &CycleContext) -> Result<(), ConveyorError> {
        if self.box_sensor.active() {
            core.drive().halt()?;
            core.transition(ConveyorState::Stopping);
        } else {
            core.drive().run()?;
            core.transition(ConveyorState::Running);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ConveyorConfig, ConveyorType, SensorConfig};
    use crate::conveyor::{ConveyorState, CycleContext};
    use crate::hal::MockHal;
    use crate::safety::SafetySnapshot;
    use crate::topology::build_conveyor;

    fn ok(now_ms: u64) -> CycleContext {
        CycleContext::new(now_ms, SafetySnapshot::operational())
    }

    #[test]
    fn runs_until_box_then_stops() {
        let hal = MockHal::new().with_vfd("belt").with_input("eye");
        let config = ConveyorConfig::new(ConveyorType::Simple, "belt")
            .with_box_sensor(SensorConfig::new("eye"));
        let mut conveyor = build_conveyor(1, "s", &config, None, &hal).unwrap();

        conveyor.step(&ok(0)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);
        assert!(hal.is_running("belt"));

        hal.set_input("eye", true);
        conveyor.step(&ok(100)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Stopping);
        assert!(!hal.is_running("belt"));

        hal.set_input("eye", false);
        conveyor.step(&ok(200)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);
    }

    #[test]
    fn inverted_sensor_stops_when_low() {
        let hal = MockHal::new().with_vfd("belt").with_input("eye");
        let config = ConveyorConfig::new(ConveyorType::Simple, "belt")
            .with_box_sensor(SensorConfig::new("eye").inverted());
        let mut conveyor = build_conveyor(1, "s", &config, None, &hal).unwrap();

        conveyor.step(&ok(0)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Stopping);
        hal.set_input("eye", true);
        conveyor.step(&ok(100)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Running);
    }

    #[test]
    fn safety_loss_forces_init_and_stop() {
        let hal = MockHal::new().with_vfd("belt").with_input("eye");
        let config = ConveyorConfig::new(ConveyorType::Simple, "belt")
            .with_box_sensor(SensorConfig::new("eye"));
        let mut conveyor = build_conveyor(1, "s", &config, None, &hal).unwrap();

        conveyor.step(&ok(0)).unwrap();
        let estop = SafetySnapshot {
            estop: true,
            ..SafetySnapshot::operational()
        };
        conveyor.step(&CycleContext::new(100, estop)).unwrap();
        assert_eq!(conveyor.state(), ConveyorState::Init);
        assert!(!hal.is_running("belt"));
    }
}
