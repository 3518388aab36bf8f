//! Turns a [`LineConfig`] into live conveyors.
//!
//! Enabled entries are built in document order. Every Simple, Infeed,
//! Accumulating or pacing infeed conveyor becomes the parent of the
//! Follower, Queueing and Transfer conveyors that follow it, until the next
//! such root. Parents are therefore always built, and stepped, before their
//! children, and the parent link is just an index into the built list.
//!
//! Any missing device aborts the whole build: a line never runs with a
//! conveyor that lacks its actuator or a required sensor.
//!
//! # Example
//!
//! ```rust
//! use conveyor_fsm::config::{ConveyorConfig, ConveyorType, LineConfig, SensorConfig};
//! use conveyor_fsm::hal::MockHal;
//! use conveyor_fsm::topology::build_topology;
//!
//! let hal = MockHal::new().with_vfd("m1").with_vfd("m2").with_input("eye");
//! let config = LineConfig::new()
//!     .with_conveyor(
//!         "infeed",
//!         ConveyorConfig::new(ConveyorType::Infeed, "m1").with_box_sensor(SensorConfig::new("eye")),
//!     )
//!     .with_conveyor("tail", ConveyorConfig::new(ConveyorType::Follower, "m2"));
//!
//! let conveyors = build_topology(&config, &hal).unwrap();
//! assert_eq!(conveyors[0].id(), 1);
//! assert_eq!(conveyors[1].parent(), Some(0));
//! ```

use tracing::info;

use crate::config::{ConveyorConfig, ConveyorType, CylinderConfig, LineConfig};
use crate::conveyor::{
    Accumulating, Behavior, Conveyor, Core, Cylinder, Drive, DriveHandle, Follower, Infeed,
    PacingInfeed, Queueing, Sensor, Simple, Transfer,
};
use crate::error::ConfigError;
use crate::traits::HardwareRegistry;

/// Build every enabled conveyor of `config`.
///
/// Status ids are assigned 1, 2, ... in build order.
pub fn build_topology(
    config: &LineConfig,
    hal: &dyn HardwareRegistry,
) -> Result<Vec<Conveyor>, ConfigError> {
    let mut conveyors: Vec<Conveyor> = Vec::new();
    let mut root: Option<usize> = None;

    for entry in config.enabled() {
        let kind = entry.config.kind;
        let index = conveyors.len();
        let parent = if kind.needs_parent() {
            let parent = root.ok_or_else(|| ConfigError::OrphanConveyor {
                key: entry.key.clone(),
                kind: kind.as_str(),
            })?;
            Some(parent)
        } else {
            root = Some(index);
            None
        };

        let id = status_id(index)?;
        let conveyor = build_conveyor(id, &entry.key, &entry.config, parent, hal)?;
        info!(
            id,
            key = %entry.key,
            kind = %kind,
            drive = %entry.config.name,
            parent = ?parent.map(|p| conveyors[p].key().to_string()),
            "conveyor built"
        );
        conveyors.push(conveyor);
    }

    info!(count = conveyors.len(), "topology built");
    Ok(conveyors)
}

/// 1-based status id for the conveyor at `index` in build order.
fn status_id(index: usize) -> Result<u32, ConfigError> {
    u32::try_from(index)
        .ok()
        .and_then(|i| i.checked_add(1))
        .ok_or(ConfigError::TooManyConveyors { count: index })
}

/// Build a single conveyor.
///
/// `parent` is required for Follower, Queueing and Transfer conveyors and
/// ignored for the others.
pub fn build_conveyor(
    id: u32,
    key: &str,
    config: &ConveyorConfig,
    parent: Option<usize>,
    hal: &dyn HardwareRegistry,
) -> Result<Conveyor, ConfigError> {
    let kind = config.kind;
    let parent = if kind.needs_parent() {
        Some(parent.ok_or_else(|| ConfigError::OrphanConveyor {
            key: key.to_string(),
            kind: kind.as_str(),
        })?)
    } else {
        None
    };

    let builder = Builder { key, config, hal };
    let drive = builder.drive()?;

    let behavior = match kind {
        ConveyorType::Simple => Behavior::Simple(Simple::new(builder.box_sensor()?)),
        ConveyorType::Infeed => {
            Behavior::Infeed(Infeed::new(builder.box_sensor()?, builder.pusher()?))
        }
        ConveyorType::Accumulating => {
            let accumulation = builder.required(
                config.present_accumulation_sensor().map(|s| (s.name.as_str(), s.reverse_logic)),
                "an accumulation sensor",
            )?;
            let (dwell_ms, restart_ms) = config
                .present_accumulation_sensor()
                .map(|s| (s.accumulation_time_ms, s.restart_time_ms))
                .unwrap_or_default();
            Behavior::Accumulating(Accumulating::new(
                builder.box_sensor()?,
                accumulation,
                builder.pusher()?,
                dwell_ms,
                restart_ms,
            ))
        }
        ConveyorType::PacingInfeed => {
            let accumulation = builder.required(
                config.present_accumulation_sensor().map(|s| (s.name.as_str(), s.reverse_logic)),
                "an accumulation sensor",
            )?;
            let restart_ms = config
                .present_accumulation_sensor()
                .map_or(0, |s| s.restart_time_ms);
            let stopper_config = config
                .present_stopper()
                .ok_or_else(|| builder.missing("a stopper"))?;
            let gate = builder.required(
                stopper_config
                    .sensor_name
                    .as_deref()
                    .map(|name| (name, stopper_config.sensor_reverse_logic)),
                "a stopper sensor",
            )?;
            Behavior::PacingInfeed(PacingInfeed::new(
                builder.box_sensor()?,
                accumulation,
                gate,
                builder.pusher()?,
                builder.cylinder(stopper_config)?,
                config.timing,
                restart_ms,
            ))
        }
        ConveyorType::Follower => Behavior::Follower(Follower::new()),
        ConveyorType::Queueing => Behavior::Queueing(Queueing::new(builder.box_sensor()?)),
        ConveyorType::Transfer => {
            Behavior::Transfer(Transfer::new(builder.box_sensor()?, builder.pusher()?))
        }
    };

    Ok(Conveyor::new(key, Core::new(id, drive), behavior, parent))
}

/// Device lookups for one conveyor entry.
struct Builder<'a> {
    key: &'a str,
    config: &'a ConveyorConfig,
    hal: &'a dyn HardwareRegistry,
}

impl Builder<'_> {
    /// VFD first, generic actuator as fallback.
    fn drive(&self) -> Result<Drive, ConfigError> {
        let name = &self.config.name;
        let handle = if let Some(vfd) = self.hal.vfd(name) {
            DriveHandle::Vfd(vfd)
        } else if let Some(actuator) = self.hal.actuator(name) {
            DriveHandle::Axis {
                actuator,
                params: self.config.axis,
            }
        } else {
            return Err(ConfigError::ActuatorNotFound {
                key: self.key.to_string(),
                name: name.clone(),
            });
        };
        Ok(Drive::new(name.clone(), handle))
    }

    fn box_sensor(&self) -> Result<Sensor, ConfigError> {
        self.required(
            self.config
                .present_box_sensor()
                .map(|s| (s.name.as_str(), s.reverse_logic)),
            "a box sensor",
        )
    }

    fn pusher(&self) -> Result<Option<Cylinder>, ConfigError> {
        self.config
            .present_pusher()
            .map(|pusher| self.cylinder(pusher))
            .transpose()
    }

    fn cylinder(&self, config: &CylinderConfig) -> Result<Cylinder, ConfigError> {
        let handle = self
            .hal
            .pneumatic(&config.name)
            .ok_or_else(|| ConfigError::PneumaticNotFound {
                key: self.key.to_string(),
                name: config.name.clone(),
            })?;
        Ok(Cylinder::new(handle, config))
    }

    /// Look up a sensor the variant cannot run without.
    fn required(
        &self,
        sensor: Option<(&str, bool)>,
        device: &'static str,
    ) -> Result<Sensor, ConfigError> {
        let (name, inverted) = sensor.ok_or_else(|| self.missing(device))?;
        let input = self.hal.input(name).ok_or_else(|| ConfigError::InputNotFound {
            key: self.key.to_string(),
            name: name.to_string(),
        })?;
        Ok(Sensor::new(input, inverted))
    }

    fn missing(&self, device: &'static str) -> ConfigError {
        ConfigError::MissingDevice {
            key: self.key.to_string(),
            kind: self.config.kind.as_str(),
            device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccumulationSensorConfig, SensorConfig};
    use crate::hal::MockHal;

    fn infeed(name: &str, eye: &str) -> ConveyorConfig {
        ConveyorConfig::new(ConveyorType::Infeed, name).with_box_sensor(SensorConfig::new(eye))
    }

    #[test]
    fn dependents_attach_to_most_recent_root() {
        let hal = MockHal::new()
            .with_vfd("m1")
            .with_vfd("m2")
            .with_vfd("m3")
            .with_vfd("m4")
            .with_input("e1")
            .with_input("e3");
        let config = LineConfig::new()
            .with_conveyor("a", infeed("m1", "e1"))
            .with_conveyor("b", ConveyorConfig::new(ConveyorType::Follower, "m2"))
            .with_conveyor("c", infeed("m3", "e3"))
            .with_conveyor("d", ConveyorConfig::new(ConveyorType::Follower, "m4"));

        let conveyors = build_topology(&config, &hal).unwrap();
        let parents: Vec<Option<usize>> = conveyors.iter().map(Conveyor::parent).collect();
        assert_eq!(parents, vec![None, Some(0), None, Some(2)]);
        let ids: Vec<u32> = conveyors.iter().map(Conveyor::id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn disabled_entries_are_skipped() {
        let hal = MockHal::new().with_vfd("m1").with_vfd("m2").with_input("e1");
        let config = LineConfig::new()
            .with_conveyor("off", infeed("missing", "missing").with_enabled(false))
            .with_conveyor("a", infeed("m1", "e1"))
            .with_conveyor("b", ConveyorConfig::new(ConveyorType::Follower, "m2"));

        let conveyors = build_topology(&config, &hal).unwrap();
        assert_eq!(conveyors.len(), 2);
        assert_eq!(conveyors[0].key(), "a");
        assert_eq!(conveyors[0].id(), 1);
    }

    #[test]
    fn orphan_dependent_is_rejected() {
        let hal = MockHal::new().with_vfd("m1");
        let config =
            LineConfig::new().with_conveyor("tail", ConveyorConfig::new(ConveyorType::Follower, "m1"));
        assert!(matches!(
            build_topology(&config, &hal),
            Err(ConfigError::OrphanConveyor { kind: "FollowerConveyor", .. })
        ));
    }

    #[test]
    fn actuator_fallback_and_absence() {
        let hal = MockHal::new().with_actuator("axis").with_input("e1");
        let conveyor = build_conveyor(1, "a", &infeed("axis", "e1"), None, &hal).unwrap();
        assert_eq!(conveyor.kind(), ConveyorType::Infeed);

        let err = build_conveyor(1, "a", &infeed("nothing", "e1"), None, &hal).unwrap_err();
        assert!(matches!(err, ConfigError::ActuatorNotFound { ref name, .. } if name == "nothing"));
    }

    #[test]
    fn missing_and_unknown_sensors() {
        let hal = MockHal::new().with_vfd("m1");
        let no_sensor = ConveyorConfig::new(ConveyorType::Simple, "m1");
        assert!(matches!(
            build_conveyor(1, "s", &no_sensor, None, &hal),
            Err(ConfigError::MissingDevice { device: "a box sensor", .. })
        ));

        let unknown = infeed("m1", "ghost");
        assert!(matches!(
            build_conveyor(1, "s", &unknown, None, &hal),
            Err(ConfigError::InputNotFound { ref name, .. }) if name == "ghost"
        ));
    }

    #[test]
    fn pacing_infeed_requires_stopper_sensor() {
        let hal = MockHal::new()
            .with_vfd("m1")
            .with_input("eye")
            .with_input("acc")
            .with_pneumatic("stopper");
        let config = ConveyorConfig::new(ConveyorType::PacingInfeed, "m1")
            .with_box_sensor(SensorConfig::new("eye"))
            .with_accumulation_sensor(AccumulationSensorConfig::new("acc"))
            .with_stopper(CylinderConfig::new("stopper"));
        assert!(matches!(
            build_conveyor(1, "p", &config, None, &hal),
            Err(ConfigError::MissingDevice { device: "a stopper sensor", .. })
        ));

        let no_stopper = ConveyorConfig {
            stopper: None,
            ..config
        };
        assert!(matches!(
            build_conveyor(1, "p", &no_stopper, None, &hal),
            Err(ConfigError::MissingDevice { device: "a stopper", .. })
        ));
    }

    #[test]
    fn status_ids_are_one_based_and_bounded() {
        assert_eq!(status_id(0).unwrap(), 1);
        assert_eq!(status_id(41).unwrap(), 42);
        assert!(matches!(
            status_id(u32::MAX as usize),
            Err(ConfigError::TooManyConveyors { .. })
        ));
    }

    #[test]
    fn unknown_pusher_is_rejected() {
        let hal = MockHal::new().with_vfd("m1").with_input("e1");
        let config = infeed("m1", "e1").with_pusher(CylinderConfig::new("ghost"));
        assert!(matches!(
            build_conveyor(1, "a", &config, None, &hal),
            Err(ConfigError::PneumaticNotFound { .. })
        ));
    }
}
