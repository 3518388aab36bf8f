//! # conveyor-fsm
//!
//! Cyclic control engine for chains of conveyors feeding a pick robot.
//!
//! ## Features
//!
//! - **Safety gate**: e-stop and drive readiness are checked on every cycle;
//!   losing either puts every conveyor in its safe state in the same cycle
//! - **Conveyor variants**: simple, infeed, accumulating, dual-sensor pacing
//!   infeed, and the parent-dependent follower, queueing and transfer units
//! - **Ordered stepping**: parents are stepped before their children, so a
//!   child always sees its parent's state from the same cycle
//! - **Live reconfiguration**: stop, quiesce, rebuild and swap the whole line
//!   without ever stepping old and new conveyors in the same cycle
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `traits` - Hardware and network abstractions
//! - `config` - Line configuration model (JSON)
//! - `conveyor` - Per-unit state machines
//! - `topology` - Builds conveyors from configuration
//! - `orchestrator` - Steps the whole line once per cycle
//! - `control_loop` - Periodic worker: run/stop, reset, reconfiguration
//! - `messages` - Topic names and inbound event routing
//! - `hal` - Simulated plant and mocks
//!
//! ## Example
//!
//! ```rust
//! use conveyor_fsm::{
//!     config::{ConveyorConfig, ConveyorType, LineConfig, SensorConfig},
//!     hal::MockHal,
//!     ControlLoop, ConveyorState,
//! };
//!
//! let hal = MockHal::new()
//!     .with_vfd("infeed_motor")
//!     .with_vfd("tail_motor")
//!     .with_input("infeed_eye");
//!
//! let config = LineConfig::new()
//!     .with_conveyor(
//!         "infeed",
//!         ConveyorConfig::new(ConveyorType::Infeed, "infeed_motor")
//!             .with_box_sensor(SensorConfig::new("infeed_eye")),
//!     )
//!     .with_conveyor("tail", ConveyorConfig::new(ConveyorType::Follower, "tail_motor"));
//!
//! let mut control = ControlLoop::new(hal.clone(), config).unwrap();
//! control.safety().set_drives_ready(true);
//! control.safety().set_run(true);
//!
//! control.cycle(0);
//! assert!(hal.is_running("tail_motor"));
//!
//! // A box reaches the pick zone: the infeed stops and the follower with it.
//! hal.set_input("infeed_eye", true);
//! control.cycle(100);
//! assert_eq!(control.line().states()[1].1, ConveyorState::Stopping);
//! assert!(!hal.is_running("tail_motor"));
//! ```

#![warn(missing_docs)]

/// Line configuration model with JSON load/save.
pub mod config;
/// Periodic control worker and the requests it consumes.
pub mod control_loop;
/// Conveyor state machines.
pub mod conveyor;
/// Error types.
pub mod error;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// Topic names and inbound event routing.
pub mod messages;
/// Steps the whole line once per cycle.
pub mod orchestrator;
/// Shared safety flags and the robot picking flag.
pub mod safety;
/// Message bus services.
pub mod services;
/// Pausable millisecond timer.
pub mod timer;
/// Builds conveyors from configuration.
pub mod topology;
/// Core traits for hardware and network abstraction.
pub mod traits;

// Re-exports for convenience
pub use config::{ConveyorConfig, ConveyorType, LineConfig};
pub use control_loop::{ControlLoop, ControlRequests};
pub use conveyor::{Conveyor, ConveyorState, CycleContext, StatusUpdate};
pub use error::{ConfigError, ConveyorError, ConveyorFault, HardwareError, MessageError};
pub use messages::{ControlEvent, EventRouter};
pub use orchestrator::{ControlAllConveyor, CycleError, CycleReport};
pub use safety::{PickingFlag, SafetySnapshot, SafetyState};
pub use timer::Timer;
pub use topology::{build_conveyor, build_topology};
pub use traits::{
    // Hardware
    AxisActuator,
    Clock,
    DigitalInput,
    HardwareRegistry,
    // Network
    MqttClient,
    MqttMessage,
    Pneumatic,
    PneumaticPosition,
    VfdMotor,
};
