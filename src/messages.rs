//! Topic names and inbound event handling for the plant message bus.
//!
//! Inbound messages are parsed into [`ControlEvent`]s and applied by an
//! [`EventRouter`]. The router only ever touches shared state (safety flags,
//! picking flag, sensor mirror, pending control requests); actuators are
//! commanded exclusively by the control loop.
//!
//! # Example
//!
//! ```
//! use conveyor_fsm::messages::{status_topic, topics, ControlEvent};
//!
//! let event = ControlEvent::parse(topics::ESTOP, b"True").unwrap();
//! assert_eq!(event, ControlEvent::Estop(true));
//!
//! let event = ControlEvent::parse("io-expander/devices/d1/inputs/3", b"1").unwrap();
//! assert_eq!(event, ControlEvent::Sensor { name: "d1/3".into(), active: true });
//!
//! assert_eq!(status_topic(4), "conveyors/4/state");
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::LineConfig;
use crate::control_loop::ControlRequests;
use crate::error::MessageError;
use crate::hal::SensorMirror;
use crate::safety::{parse_bool_payload, PickingFlag, SafetyState};
use crate::traits::MqttMessage;

/// Topic names.
pub mod topics {
    /// Emergency stop status, boolean text.
    pub const ESTOP: &str = "estop/status";
    /// Drive readiness, boolean text.
    pub const DRIVES_READY: &str = "smartDrives/areReady";
    /// Start the line, any payload.
    pub const START: &str = "conveyors/control/start";
    /// Stop the line, any payload.
    pub const STOP: &str = "conveyors/control/stop";
    /// Replace the line configuration, full JSON payload.
    pub const RESTART: &str = "conveyors/control/restart";
    /// Clear latched faults, any payload.
    pub const RESET: &str = "conveyors/control/reset";
    /// Pick robot reaching into a pick zone, boolean text.
    pub const PICKING: &str = "robot/picking";
    /// Subscription filter for mirrored sensor inputs.
    pub const SENSORS: &str = "io-expander/devices/+/inputs/+";
}

/// Every topic the controller subscribes to.
pub const SUBSCRIPTIONS: [&str; 8] = [
    topics::ESTOP,
    topics::DRIVES_READY,
    topics::START,
    topics::STOP,
    topics::RESTART,
    topics::RESET,
    topics::PICKING,
    topics::SENSORS,
];

/// Topic carrying the state name of conveyor `id`.
pub fn status_topic(id: u32) -> String {
    format!("conveyors/{id}/state")
}

/// Topic carrying the latched fault text of conveyor `id`.
pub fn fault_topic(id: u32) -> String {
    format!("conveyors/{id}/fault")
}

/// Split `io-expander/devices/{device}/inputs/{port}` into device and port.
fn sensor_address(topic: &str) -> Option<(&str, &str)> {
    let rest = topic.strip_prefix("io-expander/devices/")?;
    let (device, port) = rest.split_once("/inputs/")?;
    if device.is_empty() || port.is_empty() || port.contains('/') {
        return None;
    }
    Some((device, port))
}

// ============================================================================
// Events
// ============================================================================

/// A parsed inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlEvent {
    /// Emergency stop changed.
    Estop(bool),
    /// Drive readiness changed.
    DrivesReady(bool),
    /// Run command set.
    Start,
    /// Run command cleared.
    Stop,
    /// New line configuration.
    Restart(Box<LineConfig>),
    /// Clear latched faults.
    Reset,
    /// Robot picking flag changed.
    Picking(bool),
    /// Mirrored sensor value, keyed by `device/port`.
    Sensor {
        /// Sensor address.
        name: String,
        /// Input level.
        active: bool,
    },
}

impl ControlEvent {
    /// Parse a message received on `topic`.
    pub fn parse(topic: &str, payload: &[u8]) -> Result<Self, MessageError> {
        match topic {
            topics::START => return Ok(ControlEvent::Start),
            topics::STOP => return Ok(ControlEvent::Stop),
            topics::RESET => return Ok(ControlEvent::Reset),
            topics::RESTART => {
                let config = LineConfig::from_slice(payload)?;
                return Ok(ControlEvent::Restart(Box::new(config)));
            }
            _ => {}
        }

        let text = std::str::from_utf8(payload).map_err(|_| MessageError::NotText(topic.to_string()))?;
        let flag = || {
            parse_bool_payload(text).ok_or_else(|| MessageError::UnexpectedPayload {
                topic: topic.to_string(),
                payload: text.to_string(),
            })
        };

        match topic {
            topics::ESTOP => flag().map(ControlEvent::Estop),
            topics::DRIVES_READY => flag().map(ControlEvent::DrivesReady),
            topics::PICKING => flag().map(ControlEvent::Picking),
            _ => match sensor_address(topic) {
                Some((device, port)) => flag().map(|active| ControlEvent::Sensor {
                    name: SensorMirror::address(device, port),
                    active,
                }),
                None => Err(MessageError::UnknownTopic(topic.to_string())),
            },
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Applies inbound events to the shared state read by the control loop.
#[derive(Clone, Debug)]
pub struct EventRouter {
    safety: Arc<SafetyState>,
    picking: Arc<PickingFlag>,
    requests: Arc<ControlRequests>,
    mirror: Arc<SensorMirror>,
    config_path: Option<PathBuf>,
}

impl EventRouter {
    /// Create a router over the shared state.
    pub fn new(
        safety: Arc<SafetyState>,
        picking: Arc<PickingFlag>,
        requests: Arc<ControlRequests>,
        mirror: Arc<SensorMirror>,
    ) -> Self {
        Self {
            safety,
            picking,
            requests,
            mirror,
            config_path: None,
        }
    }

    /// Persist every accepted reconfiguration to `path`.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Parse and apply one message. Malformed messages are logged and
    /// dropped; shared state is left unchanged.
    pub fn route(&self, message: &MqttMessage) {
        match ControlEvent::parse(&message.topic, &message.payload) {
            Ok(event) => self.apply(event),
            Err(MessageError::Config(e)) => {
                error!(topic = %message.topic, error = %e, "reconfiguration rejected");
            }
            Err(e) => warn!(error = %e, "ignoring message"),
        }
    }

    /// Apply an already parsed event.
    pub fn apply(&self, event: ControlEvent) {
        match event {
            ControlEvent::Estop(active) => self.safety.set_estop(active),
            ControlEvent::DrivesReady(ready) => self.safety.set_drives_ready(ready),
            ControlEvent::Start => {
                info!("start command received");
                self.safety.set_run(true);
            }
            ControlEvent::Stop => {
                info!("stop command received");
                self.safety.set_run(false);
            }
            ControlEvent::Restart(config) => {
                if let Some(path) = &self.config_path {
                    if let Err(e) = config.save(path) {
                        warn!(path = %path.display(), error = %e, "could not persist configuration");
                    }
                }
                info!(conveyors = config.conveyors.len(), "reconfiguration requested");
                self.requests.request_reconfigure(*config);
            }
            ControlEvent::Reset => {
                info!("fault reset requested");
                self.requests.request_reset();
            }
            ControlEvent::Picking(picking) => self.picking.set(picking),
            ControlEvent::Sensor { name, active } => {
                debug!(sensor = %name, active, "sensor mirror update");
                self.mirror.update(&name, active);
            }
        }
    }
}
