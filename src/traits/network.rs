//! Network abstraction for the plant message bus.
//!
//! The control engine consumes safety and control events and produces
//! per-conveyor status over a publish/subscribe transport:
//!
//! ```text
//! estop/status                          - "true" / "false"
//! smartDrives/areReady                  - "true" / "false"
//! conveyors/control/start               - any payload
//! conveyors/control/stop                - any payload
//! conveyors/control/restart             - full JSON line configuration
//! conveyors/control/reset               - clear latched faults
//! robot/picking                         - "true" / "false"
//! io-expander/devices/{d}/inputs/{p}    - "1" / "0" sensor mirror
//! conveyors/{id}/state                  - published state name
//! ```

/// MQTT client trait for pub/sub messaging.
///
/// This trait uses a **sync-first design**: `publish` and `subscribe` hand
/// the request to the client and return, and `try_recv` never blocks. That
/// keeps it usable from the periodic control worker, which must not block
/// on I/O.
///
/// # Example
///
/// ```rust,ignore
/// use conveyor_fsm::traits::MqttClient;
///
/// fn publish_state<M: MqttClient>(client: &mut M, id: u32, state: &str) {
///     let topic = format!("conveyors/{}/state", id);
///     client.publish(&topic, state.as_bytes(), false).unwrap();
/// }
/// ```
pub trait MqttClient {
    /// Error type for MQTT operations.
    type Error;

    /// Publish a message to a topic.
    ///
    /// # Arguments
    /// - `topic`: MQTT topic path
    /// - `payload`: Message bytes
    /// - `retain`: If true, broker keeps message for new subscribers
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), Self::Error>;

    /// Subscribe to a topic.
    ///
    /// Supports wildcards: `conveyors/control/#` or `io-expander/devices/+/inputs/+`
    fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Try to receive the next message (non-blocking).
    ///
    /// Returns `None` if no message is available.
    fn try_recv(&mut self) -> Option<MqttMessage>;

    /// Check if connected to broker.
    fn is_connected(&self) -> bool;
}

/// An MQTT message received from a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Message payload as raw bytes.
    pub payload: Vec<u8>,
}

impl MqttMessage {
    /// Create a new MQTT message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Returns the payload as a UTF-8 string, if valid.
    pub fn payload_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_str_valid_utf8() {
        let msg = MqttMessage::new("estop/status", "true");
        assert_eq!(msg.payload_str(), Some("true"));
    }

    #[test]
    fn payload_str_invalid_utf8() {
        let msg = MqttMessage::new("estop/status", vec![0xff, 0xfe]);
        assert_eq!(msg.payload_str(), None);
    }
}
