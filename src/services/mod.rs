//! Message bus services for the control loop.
//!
//! - `mqtt_runner`: transport-agnostic runner over any [`MqttClient`]
//!   (always available, exercised with [`MockMqtt`] in tests)
//! - `mqtt` feature: rumqttc client and the tokio control task
//!
//! [`MqttClient`]: crate::traits::MqttClient
//! [`MockMqtt`]: crate::hal::MockMqtt

pub mod mqtt_runner;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use mqtt_runner::MqttServiceRunner;

#[cfg(feature = "mqtt")]
pub use mqtt::{run_control, MqttError, MqttRuntimeConfig, RumqttClient};
