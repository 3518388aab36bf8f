//! Trait definitions for hardware and network abstraction.
//!
//! These abstractions let the conveyor engine run against real plant I/O or
//! against the in-process mocks used by the tests.
//!
//! # Submodules
//!
//! - `hardware`: Drives, digital inputs, pneumatics, name lookup, clock
//! - `network`: MQTT client trait
//!
//! # Hardware Abstraction
//!
//! - [`VfdMotor`] / [`AxisActuator`]: the two mutually exclusive drive flavors
//! - [`DigitalInput`]: box, accumulation and stopper pass-through sensors
//! - [`Pneumatic`]: pushers and stoppers
//! - [`HardwareRegistry`]: configuration-time lookup of the above by name

pub mod hardware;
pub mod network;

pub use hardware::*;
pub use network::*;
