//! Error types for configuration, hardware commands, and conveyor faults.
//!
//! Configuration errors abort topology construction. Hardware errors and
//! conveyor faults are isolated per conveyor and reported through
//! [`CycleReport`](crate::orchestrator::CycleReport) without stopping the
//! rest of the line.

use thiserror::Error;

/// A hardware handle rejected or failed to deliver a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    /// The device did not accept the command.
    #[error("device {device} rejected {command}: {reason}")]
    Command {
        /// Device name as configured.
        device: String,
        /// Command that failed (e.g. `"stop"`, `"push"`).
        command: &'static str,
        /// Driver-provided reason.
        reason: String,
    },

    /// The device is no longer reachable.
    #[error("device {0} is offline")]
    Offline(String),
}

/// Errors raised while turning a [`LineConfig`](crate::config::LineConfig)
/// into live conveyors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither a VFD nor a generic actuator exists under this name.
    #[error("conveyor {key}: actuator {name} not found")]
    ActuatorNotFound {
        /// Conveyor key in the configuration.
        key: String,
        /// Actuator name looked up in the hardware layer.
        name: String,
    },

    /// A configured digital input does not exist.
    #[error("conveyor {key}: input {name} not found")]
    InputNotFound {
        /// Conveyor key in the configuration.
        key: String,
        /// Input name looked up in the hardware layer.
        name: String,
    },

    /// A configured pusher or stopper does not exist.
    #[error("conveyor {key}: pneumatic {name} not found")]
    PneumaticNotFound {
        /// Conveyor key in the configuration.
        key: String,
        /// Pneumatic name looked up in the hardware layer.
        name: String,
    },

    /// The conveyor type needs a device the configuration does not provide.
    #[error("conveyor {key}: {kind} requires {device}")]
    MissingDevice {
        /// Conveyor key in the configuration.
        key: String,
        /// Type tag of the conveyor.
        kind: &'static str,
        /// Human readable device role (e.g. `"a box sensor"`).
        device: &'static str,
    },

    /// A follower, queueing or transfer conveyor appears before any parent.
    #[error("conveyor {key}: {kind} has no preceding parent conveyor")]
    OrphanConveyor {
        /// Conveyor key in the configuration.
        key: String,
        /// Type tag of the conveyor.
        kind: &'static str,
    },

    /// More conveyors than status ids.
    #[error("too many conveyors: {count} already built")]
    TooManyConveyors {
        /// Conveyors built before the one that ran out of ids.
        count: usize,
    },

    /// The configuration document is not valid JSON for the line model.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration file could not be read or written.
    #[error("configuration file: {0}")]
    Io(#[from] std::io::Error),
}

/// A latched, conveyor-local fault that halts the unit until reset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConveyorFault {
    /// More product was detected than can physically be present.
    #[error("conveyor {id}: detected {detected} box(es) with only {expected} expected")]
    ImpossibleCount {
        /// Status id of the conveyor.
        id: u32,
        /// Number of detections in the offending evaluation.
        detected: u8,
        /// Boxes still expected before the detection.
        expected: u8,
    },
}

/// An inbound message that could not be turned into a control event.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The topic is not one the controller listens to.
    #[error("unknown topic {0}")]
    UnknownTopic(String),

    /// The payload is not valid UTF-8.
    #[error("non-text payload on {0}")]
    NotText(String),

    /// A boolean topic carried something other than true/false.
    #[error("unexpected payload {payload:?} on {topic}")]
    UnexpectedPayload {
        /// Topic the message arrived on.
        topic: String,
        /// Payload text.
        payload: String,
    },

    /// A reconfigure payload is not a valid line configuration.
    #[error("rejected configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Error produced by a single conveyor step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConveyorError {
    /// A hardware command failed.
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// The conveyor latched a fault this cycle.
    #[error(transparent)]
    Fault(#[from] ConveyorFault),
}
