//! Hardware abstraction traits for drives, inputs, and pneumatics.
//!
//! This module defines the interfaces the conveyor state machines use to
//! talk to the plant. Every command is fire-and-forget: it returns as soon
//! as the request is handed to the device, and confirmation (for example a
//! cylinder reaching its end position) is polled on a later cycle.
//!
//! # Key Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`VfdMotor`] | Variable-frequency drive with fixed forward speed |
//! | [`AxisActuator`] | Generic servo/stepper axis with speed and ramp parameters |
//! | [`DigitalInput`] | Photo-eye or any boolean input |
//! | [`Pneumatic`] | Push/pull cylinder with optional position feedback |
//! | [`HardwareRegistry`] | Name-based lookup used at configuration time |
//! | [`Clock`] | Monotonic millisecond time source |
//!
//! # Implementation
//!
//! For testing and desktop development, use the mock implementations from
//! [`crate::hal::mock`].
//!
//! # Example
//!
//! ```rust
//! use conveyor_fsm::hal::MockHal;
//! use conveyor_fsm::traits::{HardwareRegistry, VfdMotor};
//!
//! let hal = MockHal::new().with_vfd("belt_1");
//! let mut motor = hal.vfd("belt_1").unwrap();
//! motor.move_forward().unwrap();
//! assert!(hal.is_running("belt_1"));
//! ```

use crate::error::HardwareError;

/// Variable-frequency drive.
///
/// Speed and ramps are parameterised on the drive itself, so the controller
/// only ever asks it to run forward or stop.
pub trait VfdMotor: Send {
    /// Start running forward.
    fn move_forward(&mut self) -> Result<(), HardwareError>;

    /// Stop using the drive's configured ramp.
    fn stop(&mut self) -> Result<(), HardwareError>;
}

/// Generic axis actuator driven in continuous (velocity) mode.
pub trait AxisActuator: Send {
    /// Move continuously at `speed` after ramping with `acceleration`.
    fn move_continuous(&mut self, speed: f32, acceleration: f32) -> Result<(), HardwareError>;

    /// Decelerate to standstill with `deceleration`.
    fn stop(&mut self, deceleration: f32) -> Result<(), HardwareError>;
}

/// Boolean input such as a photo-eye.
pub trait DigitalInput: Send {
    /// Raw electrical state, before any configured inversion.
    fn state(&self) -> bool;
}

/// End position reported by a cylinder's position sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PneumaticPosition {
    /// Rod fully extended.
    Pushed,
    /// Rod fully retracted.
    Pulled,
    /// Travelling, or no sensor reading.
    #[default]
    Unknown,
}

impl PneumaticPosition {
    /// Returns the position as the lowercase name used on the wire.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PneumaticPosition::Pushed => "pushed",
            PneumaticPosition::Pulled => "pulled",
            PneumaticPosition::Unknown => "unknown",
        }
    }
}

/// Double-acting pneumatic cylinder (pusher or stopper).
///
/// All three commands are asynchronous. `state()` only carries meaning
/// when the cylinder is fitted with a position sensor.
pub trait Pneumatic: Send {
    /// Energise the extend valve.
    fn push_async(&mut self) -> Result<(), HardwareError>;

    /// Energise the retract valve.
    fn pull_async(&mut self) -> Result<(), HardwareError>;

    /// De-energise both valves, leaving the rod where it is.
    fn idle_async(&mut self) -> Result<(), HardwareError>;

    /// Current sensed position.
    fn state(&self) -> PneumaticPosition;
}

/// Name-based lookup of live hardware handles.
///
/// Each lookup returns `None` if no device of that capability exists under
/// the given name. The topology builder probes [`vfd`](Self::vfd) first and
/// falls back to [`actuator`](Self::actuator) for conveyor drives.
pub trait HardwareRegistry {
    /// Look up a variable-frequency drive.
    fn vfd(&self, name: &str) -> Option<Box<dyn VfdMotor>>;

    /// Look up a generic axis actuator.
    fn actuator(&self, name: &str) -> Option<Box<dyn AxisActuator>>;

    /// Look up a digital input.
    fn input(&self, name: &str) -> Option<Box<dyn DigitalInput>>;

    /// Look up a pneumatic cylinder.
    fn pneumatic(&self, name: &str) -> Option<Box<dyn Pneumatic>>;
}

/// Time source.
///
/// Provides monotonic time in milliseconds for timers and the control loop.
///
/// # Example
///
/// ```rust
/// use conveyor_fsm::traits::Clock;
/// use conveyor_fsm::hal::MockClock;
///
/// let mut clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.advance(100);
/// assert_eq!(clock.now_ms(), 100);
/// ```
pub trait Clock {
    /// Returns current time in milliseconds since an arbitrary epoch.
    ///
    /// Must be monotonically increasing.
    fn now_ms(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_default_is_unknown() {
        assert_eq!(PneumaticPosition::default(), PneumaticPosition::Unknown);
    }

    #[test]
    fn position_names() {
        assert_eq!(PneumaticPosition::Pushed.as_str(), "pushed");
        assert_eq!(PneumaticPosition::Pulled.as_str(), "pulled");
        assert_eq!(PneumaticPosition::Unknown.as_str(), "unknown");
    }

    struct Eye(bool);

    impl DigitalInput for Eye {
        fn state(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn digital_input_is_object_safe() {
        let inputs: Vec<Box<dyn DigitalInput>> = vec![Box::new(Eye(true)), Box::new(Eye(false))];
        let states: Vec<bool> = inputs.iter().map(|i| i.state()).collect();
        assert_eq!(states, vec![true, false]);
    }
}
