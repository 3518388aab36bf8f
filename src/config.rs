//! Line configuration: which conveyors exist, in what order, and with which
//! devices.
//!
//! The document is JSON. The `conveyors` object is read in document order,
//! and that order is the build order: every follower, queueing or transfer
//! conveyor is wired to the closest root conveyor above it.
//!
//! # Example
//!
//! ```rust
//! use conveyor_fsm::config::{ConveyorType, LineConfig};
//!
//! let json = r#"{
//!     "conveyors": {
//!         "infeed": {
//!             "type": "InfeedConveyor",
//!             "enabled": "True",
//!             "name": "belt_1",
//!             "box_sensor": { "name": "eye_1", "present": true }
//!         },
//!         "tail": { "type": "FollowerConveyor", "name": "belt_2" }
//!     }
//! }"#;
//!
//! let config = LineConfig::from_json(json).unwrap();
//! assert_eq!(config.conveyors.len(), 2);
//! assert_eq!(config.conveyors[0].key, "infeed");
//! assert_eq!(config.conveyors[1].config.kind, ConveyorType::Follower);
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ============================================================================
// Defaults
// ============================================================================

const fn default_true() -> bool {
    true
}

const fn default_cycle_ms() -> u64 {
    100
}

const fn default_quiesce_timeout_ms() -> u64 {
    3_000
}

const fn default_cylinder_delay_ms() -> u64 {
    500
}

const fn default_accumulation_time_ms() -> u64 {
    2_000
}

const fn default_restart_time_ms() -> u64 {
    1_000
}

const fn default_startup_ms() -> u64 {
    3_000
}

const fn default_sustain_ms() -> u64 {
    500
}

const fn default_pacing_ms() -> u64 {
    1_500
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete line configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LineConfig {
    /// Control loop timing.
    #[serde(default)]
    pub control: ControlConfig,
    /// Conveyors in build order.
    #[serde(with = "ordered_conveyors")]
    pub conveyors: Vec<ConveyorEntry>,
}

impl LineConfig {
    /// Create an empty configuration with default loop timing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set control loop configuration
    pub fn with_control(mut self, control: ControlConfig) -> Self {
        self.control = control;
        self
    }

    /// Append a conveyor
    pub fn with_conveyor(mut self, key: impl Into<String>, config: ConveyorConfig) -> Self {
        self.conveyors.push(ConveyorEntry {
            key: key.into(),
            config,
        });
        self
    }

    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a JSON document from raw bytes (e.g. an MQTT payload).
    pub fn from_slice(json: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(json)?)
    }

    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Iterate over enabled conveyors in build order.
    pub fn enabled(&self) -> impl Iterator<Item = &ConveyorEntry> {
        self.conveyors.iter().filter(|entry| entry.config.enabled)
    }
}

/// One keyed entry of the `conveyors` object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConveyorEntry {
    /// Key in the configuration document.
    pub key: String,
    /// Conveyor record.
    pub config: ConveyorConfig,
}

// ============================================================================
// Control Config
// ============================================================================

/// Control loop configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Period of the control cycle in milliseconds
    #[serde(default = "default_cycle_ms")]
    pub cycle_ms: u64,
    /// Upper bound on waiting for cylinders to reach a safe position
    /// during reconfiguration
    #[serde(default = "default_quiesce_timeout_ms")]
    pub quiesce_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            cycle_ms: default_cycle_ms(),
            quiesce_timeout_ms: default_quiesce_timeout_ms(),
        }
    }
}

impl ControlConfig {
    /// Set the cycle period
    pub fn with_cycle_ms(mut self, ms: u64) -> Self {
        self.cycle_ms = ms;
        self
    }

    /// Set the quiesce timeout
    pub fn with_quiesce_timeout_ms(mut self, ms: u64) -> Self {
        self.quiesce_timeout_ms = ms;
        self
    }
}

// ============================================================================
// Conveyor Config
// ============================================================================

/// Conveyor variant selected by the `type` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConveyorType {
    /// Run until a box is seen, then stop.
    #[serde(rename = "SimpleConveyor")]
    Simple,
    /// Single-box infeed with optional pusher.
    #[serde(rename = "InfeedConveyor")]
    Infeed,
    /// Accumulating conveyor with dwell timing.
    #[serde(rename = "AccumulatingConveyor")]
    Accumulating,
    /// Dual-sensor, stopper-gated pacing infeed.
    #[serde(rename = "DoublePickInfeedConveyor", alias = "PacingInfeedConveyor")]
    PacingInfeed,
    /// Mirrors its parent's running state.
    #[serde(rename = "FollowerConveyor")]
    Follower,
    /// Follows its parent but only stops once its own sensor is covered.
    #[serde(rename = "QueueingConveyor")]
    Queueing,
    /// Transfer conveyor with optional pusher, paced by its parent.
    #[serde(rename = "TransferConveyor")]
    Transfer,
}

impl ConveyorType {
    /// Returns the configuration tag.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConveyorType::Simple => "SimpleConveyor",
            ConveyorType::Infeed => "InfeedConveyor",
            ConveyorType::Accumulating => "AccumulatingConveyor",
            ConveyorType::PacingInfeed => "DoublePickInfeedConveyor",
            ConveyorType::Follower => "FollowerConveyor",
            ConveyorType::Queueing => "QueueingConveyor",
            ConveyorType::Transfer => "TransferConveyor",
        }
    }

    /// Whether this variant derives its behavior from a parent conveyor.
    pub const fn needs_parent(&self) -> bool {
        matches!(
            self,
            ConveyorType::Follower | ConveyorType::Queueing | ConveyorType::Transfer
        )
    }
}

impl fmt::Display for ConveyorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration record for a single conveyor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConveyorConfig {
    /// Variant tag
    #[serde(rename = "type")]
    pub kind: ConveyorType,
    /// Disabled conveyors are skipped at build time
    #[serde(default = "default_true", deserialize_with = "flexible_bool::deserialize")]
    pub enabled: bool,
    /// Drive name in the hardware layer
    pub name: String,
    /// Motion parameters, used only when the drive is a generic actuator
    #[serde(default)]
    pub axis: AxisConfig,
    /// Primary box presence sensor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_sensor: Option<SensorConfig>,
    /// Secondary accumulation sensor with dwell and restart timing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accumulation_sensor: Option<AccumulationSensorConfig>,
    /// Sideways pusher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pusher: Option<CylinderConfig>,
    /// Flow stopper
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopper: Option<CylinderConfig>,
    /// Pacing infeed timers
    #[serde(default)]
    pub timing: TimingConfig,
}

impl ConveyorConfig {
    /// Create an enabled conveyor with no sensors or cylinders.
    pub fn new(kind: ConveyorType, name: impl Into<String>) -> Self {
        Self {
            kind,
            enabled: true,
            name: name.into(),
            axis: AxisConfig::default(),
            box_sensor: None,
            accumulation_sensor: None,
            pusher: None,
            stopper: None,
            timing: TimingConfig::default(),
        }
    }

    /// Enable or disable the conveyor
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the axis parameters
    pub fn with_axis(mut self, axis: AxisConfig) -> Self {
        self.axis = axis;
        self
    }

    /// Attach a box sensor
    pub fn with_box_sensor(mut self, sensor: SensorConfig) -> Self {
        self.box_sensor = Some(sensor);
        self
    }

    /// Attach an accumulation sensor
    pub fn with_accumulation_sensor(mut self, sensor: AccumulationSensorConfig) -> Self {
        self.accumulation_sensor = Some(sensor);
        self
    }

    /// Attach a pusher
    pub fn with_pusher(mut self, pusher: CylinderConfig) -> Self {
        self.pusher = Some(pusher);
        self
    }

    /// Attach a stopper
    pub fn with_stopper(mut self, stopper: CylinderConfig) -> Self {
        self.stopper = Some(stopper);
        self
    }

    /// Set the pacing infeed timers
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Box sensor if configured and marked present.
    pub fn present_box_sensor(&self) -> Option<&SensorConfig> {
        self.box_sensor.as_ref().filter(|s| s.present)
    }

    /// Accumulation sensor if configured and marked present.
    pub fn present_accumulation_sensor(&self) -> Option<&AccumulationSensorConfig> {
        self.accumulation_sensor.as_ref().filter(|s| s.present)
    }

    /// Pusher if configured and marked present.
    pub fn present_pusher(&self) -> Option<&CylinderConfig> {
        self.pusher.as_ref().filter(|c| c.present)
    }

    /// Stopper if configured and marked present.
    pub fn present_stopper(&self) -> Option<&CylinderConfig> {
        self.stopper.as_ref().filter(|c| c.present)
    }
}

/// Speed and ramp parameters for generic actuators
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Continuous speed
    #[serde(default)]
    pub speed: f32,
    /// Acceleration ramp
    #[serde(default)]
    pub acceleration: f32,
    /// Deceleration ramp used when stopping
    #[serde(default)]
    pub deceleration: f32,
}

impl AxisConfig {
    /// Create axis parameters
    pub fn new(speed: f32, acceleration: f32, deceleration: f32) -> Self {
        Self {
            speed,
            acceleration,
            deceleration,
        }
    }
}

/// Digital sensor configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Input name in the hardware layer
    pub name: String,
    /// Whether the sensor is fitted
    #[serde(default = "default_true", deserialize_with = "flexible_bool::deserialize")]
    pub present: bool,
    /// Invert the electrical level (sensor reads low when a box is present)
    #[serde(default, deserialize_with = "flexible_bool::deserialize")]
    pub reverse_logic: bool,
}

impl SensorConfig {
    /// A present, non-inverted sensor
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            present: true,
            reverse_logic: false,
        }
    }

    /// Set inverted logic
    pub fn inverted(mut self) -> Self {
        self.reverse_logic = true;
        self
    }
}

/// Accumulation sensor with its dwell and restart durations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulationSensorConfig {
    /// Input name in the hardware layer
    pub name: String,
    /// Whether the sensor is fitted
    #[serde(default = "default_true", deserialize_with = "flexible_bool::deserialize")]
    pub present: bool,
    /// Invert the electrical level
    #[serde(default, deserialize_with = "flexible_bool::deserialize")]
    pub reverse_logic: bool,
    /// Dwell with both sensors covered before the conveyor stops
    #[serde(default = "default_accumulation_time_ms")]
    pub accumulation_time_ms: u64,
    /// Delay between a completed pick and restarting the belt
    #[serde(default = "default_restart_time_ms")]
    pub restart_time_ms: u64,
}

impl AccumulationSensorConfig {
    /// A present, non-inverted sensor with default timing
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            present: true,
            reverse_logic: false,
            accumulation_time_ms: default_accumulation_time_ms(),
            restart_time_ms: default_restart_time_ms(),
        }
    }

    /// Set the dwell and restart durations
    pub fn with_times(mut self, accumulation_time_ms: u64, restart_time_ms: u64) -> Self {
        self.accumulation_time_ms = accumulation_time_ms;
        self.restart_time_ms = restart_time_ms;
        self
    }

    /// Set inverted logic
    pub fn inverted(mut self) -> Self {
        self.reverse_logic = true;
        self
    }
}

/// Pusher or stopper configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CylinderConfig {
    /// Pneumatic name in the hardware layer
    pub name: String,
    /// Whether the cylinder is fitted
    #[serde(default = "default_true", deserialize_with = "flexible_bool::deserialize")]
    pub present: bool,
    /// Valve logic label for extending, kept for the hardware layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extend_logic: Option<String>,
    /// Valve logic label for retracting, kept for the hardware layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retract_logic: Option<String>,
    /// Travel time to full extension
    #[serde(default = "default_cylinder_delay_ms")]
    pub extend_delay_ms: u64,
    /// Travel time to full retraction
    #[serde(default = "default_cylinder_delay_ms")]
    pub retract_delay_ms: u64,
    /// Whether end-position sensors report the rod position
    #[serde(default, deserialize_with = "flexible_bool::deserialize")]
    pub sensors_present: bool,
    /// Pass-through sensor next to a stopper, used to count released boxes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_name: Option<String>,
    /// Invert the pass-through sensor's electrical level
    #[serde(default, deserialize_with = "flexible_bool::deserialize")]
    pub sensor_reverse_logic: bool,
}

impl CylinderConfig {
    /// A present cylinder with position sensors and default delays
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            present: true,
            extend_logic: None,
            retract_logic: None,
            extend_delay_ms: default_cylinder_delay_ms(),
            retract_delay_ms: default_cylinder_delay_ms(),
            sensors_present: true,
            sensor_name: None,
            sensor_reverse_logic: false,
        }
    }

    /// Set the extend and retract travel times
    pub fn with_delays(mut self, extend_delay_ms: u64, retract_delay_ms: u64) -> Self {
        self.extend_delay_ms = extend_delay_ms;
        self.retract_delay_ms = retract_delay_ms;
        self
    }

    /// Rely on travel time instead of position sensors
    pub fn without_position_sensors(mut self) -> Self {
        self.sensors_present = false;
        self
    }

    /// Set the pass-through sensor
    pub fn with_sensor_name(mut self, name: impl Into<String>) -> Self {
        self.sensor_name = Some(name.into());
        self
    }

    /// Invert the pass-through sensor
    pub fn with_inverted_sensor(mut self) -> Self {
        self.sensor_reverse_logic = true;
        self
    }
}

/// Pacing infeed timers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Settle time after enabling before counting queued boxes
    #[serde(default = "default_startup_ms")]
    pub startup_ms: u64,
    /// How long both sensors must stay covered before pushing
    #[serde(default = "default_sustain_ms")]
    pub sustain_ms: u64,
    /// Gap between restarting after a pick and releasing the next batch
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            startup_ms: default_startup_ms(),
            sustain_ms: default_sustain_ms(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

impl TimingConfig {
    /// Create pacing timers
    pub fn new(startup_ms: u64, sustain_ms: u64, pacing_ms: u64) -> Self {
        Self {
            startup_ms,
            sustain_ms,
            pacing_ms,
        }
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

/// Booleans stored either as JSON booleans or as text.
mod flexible_bool {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    use crate::safety::parse_bool_payload;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Bool(bool),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Repr::deserialize(deserializer)? {
            Repr::Bool(value) => Ok(value),
            Repr::Text(text) => parse_bool_payload(&text)
                .ok_or_else(|| D::Error::custom(format!("expected a boolean, got {text:?}"))),
        }
    }
}

/// `conveyors` is a JSON object whose key order is significant.
mod ordered_conveyors {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::{ConveyorConfig, ConveyorEntry};

    pub fn serialize<S>(entries: &[ConveyorEntry], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for entry in entries {
            map.serialize_entry(&entry.key, &entry.config)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<ConveyorEntry>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = Vec<ConveyorEntry>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of conveyor key to conveyor configuration")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, config)) = access.next_entry::<String, ConveyorConfig>()? {
                    entries.push(ConveyorEntry { key, config });
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = r#"{
        "control": { "cycle_ms": 50 },
        "conveyors": {
            "z_first": {
                "type": "DoublePickInfeedConveyor",
                "enabled": "True",
                "name": "vfd_1",
                "box_sensor": { "name": "eye_box", "present": "true", "reverse_logic": "false" },
                "accumulation_sensor": {
                    "name": "eye_acc",
                    "present": true,
                    "accumulation_time_ms": 1200,
                    "restart_time_ms": 800
                },
                "pusher": { "name": "push_1", "present": "True", "sensors_present": "true" },
                "stopper": { "name": "stop_1", "sensor_name": "eye_gate", "sensors_present": true },
                "timing": { "startup_ms": 2000 }
            },
            "a_second": { "type": "QueueingConveyor", "name": "belt_2",
                          "box_sensor": { "name": "eye_2" } },
            "m_third": { "type": "FollowerConveyor", "enabled": false, "name": "belt_3" }
        }
    }"#;

    #[test]
    fn preserves_document_order() {
        let config = LineConfig::from_json(LINE).unwrap();
        let keys: Vec<&str> = config.conveyors.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["z_first", "a_second", "m_third"]);
    }

    #[test]
    fn text_booleans_and_defaults() {
        let config = LineConfig::from_json(LINE).unwrap();
        let first = &config.conveyors[0].config;
        assert_eq!(first.kind, ConveyorType::PacingInfeed);
        assert!(first.enabled);
        assert!(first.present_box_sensor().is_some());
        assert!(!first.box_sensor.as_ref().unwrap().reverse_logic);

        let acc = first.present_accumulation_sensor().unwrap();
        assert_eq!(acc.accumulation_time_ms, 1200);
        assert_eq!(acc.restart_time_ms, 800);

        let pusher = first.present_pusher().unwrap();
        assert_eq!(pusher.extend_delay_ms, 500);
        assert!(pusher.sensors_present);

        assert_eq!(first.timing.startup_ms, 2000);
        assert_eq!(first.timing.sustain_ms, 500);
        assert_eq!(config.control.cycle_ms, 50);
        assert_eq!(config.control.quiesce_timeout_ms, 3_000);
    }

    #[test]
    fn enabled_skips_disabled_entries() {
        let config = LineConfig::from_json(LINE).unwrap();
        let keys: Vec<&str> = config.enabled().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["z_first", "a_second"]);
    }

    #[test]
    fn pacing_alias_accepted() {
        let json = r#"{ "conveyors": { "p": { "type": "PacingInfeedConveyor", "name": "m" } } }"#;
        let config = LineConfig::from_json(json).unwrap();
        assert_eq!(config.conveyors[0].config.kind, ConveyorType::PacingInfeed);
    }

    #[test]
    fn unknown_type_rejected() {
        let json = r#"{ "conveyors": { "x": { "type": "TeleportConveyor", "name": "m" } } }"#;
        assert!(matches!(
            LineConfig::from_json(json),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn bad_boolean_text_rejected() {
        let json = r#"{ "conveyors": { "x": { "type": "SimpleConveyor", "name": "m", "enabled": "sometimes" } } }"#;
        assert!(LineConfig::from_json(json).is_err());
    }

    #[test]
    fn absent_devices_are_filtered() {
        let config = ConveyorConfig::new(ConveyorType::Infeed, "belt")
            .with_box_sensor(SensorConfig {
                present: false,
                ..SensorConfig::new("eye")
            })
            .with_pusher(CylinderConfig {
                present: false,
                ..CylinderConfig::new("push")
            });
        assert!(config.present_box_sensor().is_none());
        assert!(config.present_pusher().is_none());
    }

    #[test]
    fn save_and_load_keep_order() {
        let path = std::env::temp_dir().join(format!("conveyor-fsm-config-{}.json", std::process::id()));
        let original = LineConfig::new()
            .with_conveyor("b", ConveyorConfig::new(ConveyorType::Simple, "m1"))
            .with_conveyor("a", ConveyorConfig::new(ConveyorType::Follower, "m2"));

        original.save(&path).unwrap();
        let loaded = LineConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, original);
    }

    #[test]
    fn needs_parent() {
        assert!(ConveyorType::Follower.needs_parent());
        assert!(ConveyorType::Queueing.needs_parent());
        assert!(ConveyorType::Transfer.needs_parent());
        assert!(!ConveyorType::Simple.needs_parent());
        assert!(!ConveyorType::PacingInfeed.needs_parent());
    }
}
