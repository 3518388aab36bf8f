//! Conveyor-side wrappers around hardware handles.
//!
//! [`Drive`] hides the VFD/axis distinction, [`Sensor`] applies inverted
//! logic, and [`Cylinder`] turns fire-and-forget pneumatic commands into
//! polled "pushed"/"pulled" confirmation.
//!
//! Drive and cylinder commands are only sent when they differ from the last
//! accepted command; a rejected command is retried on the next call.

use tracing::warn;

use crate::config::{AxisConfig, CylinderConfig};
use crate::error::HardwareError;
use crate::timer::Timer;
use crate::traits::{AxisActuator, DigitalInput, Pneumatic, PneumaticPosition, VfdMotor};

// ============================================================================
// Drive
// ============================================================================

/// The two mutually exclusive drive flavors.
pub enum DriveHandle {
    /// Variable-frequency drive with speed parameterised on the drive.
    Vfd(Box<dyn VfdMotor>),
    /// Generic actuator in continuous mode.
    Axis {
        /// Actuator handle.
        actuator: Box<dyn AxisActuator>,
        /// Speed and ramps.
        params: AxisConfig,
    },
}

/// Conveyor belt drive.
pub struct Drive {
    name: String,
    handle: DriveHandle,
    running: Option<bool>,
}

impl Drive {
    /// Wrap a hardware handle.
    pub fn new(name: impl Into<String>, handle: DriveHandle) -> Self {
        Self {
            name: name.into(),
            handle,
            running: None,
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the last accepted command was a run command.
    pub fn is_running(&self) -> bool {
        self.running == Some(true)
    }

    /// Whether the last accepted command was a stop command. False after a
    /// rejected command, whatever was sent before.
    pub fn is_stopped(&self) -> bool {
        self.running == Some(false)
    }

    /// Start the belt.
    pub fn run(&mut self) -> Result<(), HardwareError> {
        if self.running == Some(true) {
            return Ok(());
        }
        self.send(true)
    }

    /// Stop the belt.
    pub fn halt(&mut self) -> Result<(), HardwareError> {
        if self.running == Some(false) {
            return Ok(());
        }
        self.send(false)
    }

    /// Stop the belt even if it is believed to be stopped already.
    pub fn force_halt(&mut self) -> Result<(), HardwareError> {
        self.send(false)
    }

    fn send(&mut self, run: bool) -> Result<(), HardwareError> {
        let result = match (&mut self.handle, run) {
            (DriveHandle::Vfd(vfd), true) => vfd.move_forward(),
            (DriveHandle::Vfd(vfd), false) => vfd.stop(),
            (DriveHandle::Axis { actuator, params }, true) => {
                actuator.move_continuous(params.speed, params.acceleration)
            }
            (DriveHandle::Axis { actuator, params }, false) => actuator.stop(params.deceleration),
        };
        match result {
            Ok(()) => {
                self.running = Some(run);
                Ok(())
            }
            Err(e) => {
                self.running = None;
                warn!(drive = %self.name, error = %e, "drive command failed");
                Err(e)
            }
        }
    }
}

// ============================================================================
// Sensor
// ============================================================================

/// Digital sensor with optional inverted logic.
pub struct Sensor {
    input: Box<dyn DigitalInput>,
    inverted: bool,
}

impl Sensor {
    /// Wrap an input.
    pub fn new(input: Box<dyn DigitalInput>, inverted: bool) -> Self {
        Self { input, inverted }
    }

    /// Whether a box is detected.
    #[inline]
    pub fn active(&self) -> bool {
        self.input.state() != self.inverted
    }
}

/// [`Sensor`] that reports rising edges between successive samples.
pub struct EdgeSensor {
    sensor: Sensor,
    last: bool,
}

impl EdgeSensor {
    /// Wrap a sensor. The first sample never counts as an edge if the
    /// sensor is already active.
    pub fn new(sensor: Sensor) -> Self {
        let last = sensor.active();
        Self { sensor, last }
    }

    /// Sample the sensor; true on a low-to-high transition.
    pub fn rising(&mut self) -> bool {
        let now = self.sensor.active();
        let rising = now && !self.last;
        self.last = now;
        rising
    }
}

// ============================================================================
// Cylinder
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Push,
    Pull,
    Idle,
}

/// Pusher or stopper.
///
/// With a position sensor, confirmation is the sensed position. Without
/// one, a push or pull is confirmed once its configured travel time has
/// elapsed since the command was issued, and an idled cylinder keeps the
/// position it had reached.
pub struct Cylinder {
    name: String,
    handle: Box<dyn Pneumatic>,
    position_sensor: bool,
    extend_delay_ms: u64,
    retract_delay_ms: u64,
    command: Option<Command>,
    travel: Timer,
    resting: PneumaticPosition,
}

impl Cylinder {
    /// Wrap a pneumatic handle with its configuration.
    pub fn new(handle: Box<dyn Pneumatic>, config: &CylinderConfig) -> Self {
        Self {
            name: config.name.clone(),
            handle,
            position_sensor: config.sensors_present,
            extend_delay_ms: config.extend_delay_ms,
            retract_delay_ms: config.retract_delay_ms,
            command: None,
            travel: Timer::new(0),
            resting: PneumaticPosition::Unknown,
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Travel time to full retraction.
    pub fn retract_delay_ms(&self) -> u64 {
        self.retract_delay_ms
    }

    /// Confirmed position at `now_ms`.
    pub fn position(&self, now_ms: u64) -> PneumaticPosition {
        if self.position_sensor {
            return self.handle.state();
        }
        match self.command {
            Some(Command::Push) if self.travel.done(now_ms) => PneumaticPosition::Pushed,
            Some(Command::Pull) if self.travel.done(now_ms) => PneumaticPosition::Pulled,
            Some(Command::Push | Command::Pull) => PneumaticPosition::Unknown,
            Some(Command::Idle) | None => self.resting,
        }
    }

    /// Whether the cylinder is confirmed extended.
    pub fn is_pushed(&self, now_ms: u64) -> bool {
        self.position(now_ms) == PneumaticPosition::Pushed
    }

    /// Whether the cylinder is confirmed retracted.
    pub fn is_pulled(&self, now_ms: u64) -> bool {
        self.position(now_ms) == PneumaticPosition::Pulled
    }

    /// Extend.
    pub fn push(&mut self, now_ms: u64) -> Result<(), HardwareError> {
        self.send(Command::Push, now_ms)
    }

    /// Retract.
    pub fn pull(&mut self, now_ms: u64) -> Result<(), HardwareError> {
        self.send(Command::Pull, now_ms)
    }

    /// Release both valves.
    pub fn idle(&mut self, now_ms: u64) -> Result<(), HardwareError> {
        self.send(Command::Idle, now_ms)
    }

    fn send(&mut self, command: Command, now_ms: u64) -> Result<(), HardwareError> {
        if self.command == Some(command) {
            return Ok(());
        }
        let result = match command {
            Command::Push => self.handle.push_async(),
            Command::Pull => self.handle.pull_async(),
            Command::Idle => self.handle.idle_async(),
        };
        if let Err(e) = result {
            warn!(cylinder = %self.name, error = %e, "pneumatic command failed");
            return Err(e);
        }

        self.resting = self.position(now_ms);
        match command {
            Command::Push => self.travel = Timer::new(self.extend_delay_ms),
            Command::Pull => self.travel = Timer::new(self.retract_delay_ms),
            Command::Idle => self.travel = Timer::new(0),
        }
        if command != Command::Idle {
            self.travel.start(now_ms);
        }
        self.command = Some(command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{HalEvent, MockHal};
    use crate::traits::HardwareRegistry;

    fn unsensed(hal: &MockHal, name: &str) -> Cylinder {
        let config = CylinderConfig::new(name)
            .with_delays(300, 200)
            .without_position_sensors();
        Cylinder::new(hal.pneumatic(name).unwrap(), &config)
    }

    #[test]
    fn drive_deduplicates_commands() {
        let hal = MockHal::new().with_vfd("belt");
        let mut drive = Drive::new("belt", DriveHandle::Vfd(hal.vfd("belt").unwrap()));
        drive.run().unwrap();
        drive.run().unwrap();
        drive.halt().unwrap();
        drive.halt().unwrap();
        drive.force_halt().unwrap();
        assert_eq!(
            hal.journal(),
            vec![
                HalEvent::Forward("belt".into()),
                HalEvent::Stop("belt".into()),
                HalEvent::Stop("belt".into()),
            ]
        );
    }

    #[test]
    fn rejected_stop_leaves_drive_unconfirmed_until_retried() {
        let hal = MockHal::new().with_vfd("belt");
        let mut drive = Drive::new("belt", DriveHandle::Vfd(hal.vfd("belt").unwrap()));
        drive.run().unwrap();

        hal.fail_device("belt");
        assert!(drive.halt().is_err());
        assert!(!drive.is_running());
        assert!(!drive.is_stopped());

        hal.recover_device("belt");
        drive.halt().unwrap();
        assert!(drive.is_stopped());
        assert!(!hal.is_running("belt"));
    }

    #[test]
    fn axis_drive_uses_configured_ramps() {
        let hal = MockHal::new().with_actuator("axis");
        let params = AxisConfig::new(120.0, 400.0, 600.0);
        let mut drive = Drive::new(
            "axis",
            DriveHandle::Axis {
                actuator: hal.actuator("axis").unwrap(),
                params,
            },
        );
        drive.run().unwrap();
        drive.halt().unwrap();
        assert_eq!(
            hal.journal(),
            vec![
                HalEvent::MoveContinuous {
                    name: "axis".into(),
                    speed: 120.0,
                    acceleration: 400.0
                },
                HalEvent::StopAxis {
                    name: "axis".into(),
                    deceleration: 600.0
                },
            ]
        );
    }

    #[test]
    fn failed_drive_command_is_retried() {
        let hal = MockHal::new().with_vfd("belt");
        let mut drive = Drive::new("belt", DriveHandle::Vfd(hal.vfd("belt").unwrap()));
        drive.run().unwrap();
        hal.fail_device("belt");
        assert!(drive.halt().is_err());
        assert!(!drive.is_running());
        assert!(drive.halt().is_err());
    }

    #[test]
    fn inverted_sensor() {
        let hal = MockHal::new().with_input("eye");
        let sensor = Sensor::new(hal.input("eye").unwrap(), true);
        assert!(sensor.active());
        hal.set_input("eye", true);
        assert!(!sensor.active());
    }

    #[test]
    fn edge_sensor_counts_rising_edges_only() {
        let hal = MockHal::new().with_input("gate");
        let mut gate = EdgeSensor::new(Sensor::new(hal.input("gate").unwrap(), false));
        assert!(!gate.rising());
        hal.set_input("gate", true);
        assert!(gate.rising());
        assert!(!gate.rising());
        hal.set_input("gate", false);
        assert!(!gate.rising());
        hal.set_input("gate", true);
        assert!(gate.rising());
    }

    #[test]
    fn edge_sensor_ignores_initially_covered_input() {
        let hal = MockHal::new().with_input("gate");
        hal.set_input("gate", true);
        let mut gate = EdgeSensor::new(Sensor::new(hal.input("gate").unwrap(), false));
        assert!(!gate.rising());
    }

    #[test]
    fn sensed_cylinder_follows_sensor() {
        let hal = MockHal::new().with_slow_pneumatic("pusher");
        let config = CylinderConfig::new("pusher");
        let mut pusher = Cylinder::new(hal.pneumatic("pusher").unwrap(), &config);
        pusher.push(0).unwrap();
        assert!(!pusher.is_pushed(10_000));
        hal.complete_motion("pusher");
        assert!(pusher.is_pushed(0));
    }

    #[test]
    fn unsensed_cylinder_confirms_after_travel_time() {
        let hal = MockHal::new().with_unsensed_pneumatic("pusher");
        let mut pusher = unsensed(&hal, "pusher");
        assert_eq!(pusher.position(0), PneumaticPosition::Unknown);

        pusher.push(1_000).unwrap();
        assert!(!pusher.is_pushed(1_299));
        assert!(pusher.is_pushed(1_300));

        pusher.idle(1_400).unwrap();
        assert!(pusher.is_pushed(5_000));

        pusher.pull(5_000).unwrap();
        assert!(!pusher.is_pulled(5_199));
        assert!(pusher.is_pulled(5_200));
    }

    #[test]
    fn unsensed_cylinder_idled_mid_travel_is_unknown() {
        let hal = MockHal::new().with_unsensed_pneumatic("pusher");
        let mut pusher = unsensed(&hal, "pusher");
        pusher.push(0).unwrap();
        pusher.idle(100).unwrap();
        assert_eq!(pusher.position(10_000), PneumaticPosition::Unknown);
    }

    #[test]
    fn repeated_cylinder_command_sent_once() {
        let hal = MockHal::new().with_pneumatic("stopper");
        let config = CylinderConfig::new("stopper");
        let mut stopper = Cylinder::new(hal.pneumatic("stopper").unwrap(), &config);
        stopper.push(0).unwrap();
        stopper.push(100).unwrap();
        assert_eq!(hal.journal_for("stopper").len(), 1);
    }
}
