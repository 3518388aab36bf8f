//! Mock implementations for testing without plant hardware.
//!
//! This module provides test doubles for all hardware and network traits,
//! enabling development and testing on desktop without a machine attached.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockHal`] | [`HardwareRegistry`] | Named devices sharing one simulated plant |
//! | [`MockVfd`] | [`VfdMotor`] | Tracks forward/stop calls |
//! | [`MockAxis`] | [`AxisActuator`] | Tracks continuous moves and decelerations |
//! | [`MockPneumatic`] | [`Pneumatic`] | Cylinder with optional simulated position sensor |
//! | [`MockClock`] | [`Clock`] | Controllable time source |
//! | [`MockMqtt`] | [`MqttClient`] | Captures pub/sub operations |
//!
//! Every command issued through a [`MockHal`] handle is appended to a shared
//! journal of [`HalEvent`]s, so tests can assert on command ordering across
//! devices.
//!
//! # Example
//!
//! ```rust
//! use conveyor_fsm::hal::{HalEvent, MockHal};
//! use conveyor_fsm::traits::{HardwareRegistry, Pneumatic, PneumaticPosition};
//!
//! let hal = MockHal::new().with_pneumatic("pusher");
//! let mut pusher = hal.pneumatic("pusher").unwrap();
//!
//! pusher.push_async().unwrap();
//! assert_eq!(pusher.state(), PneumaticPosition::Pushed);
//! assert_eq!(hal.journal(), vec![HalEvent::Push("pusher".into())]);
//! ```
//!
//! [`HardwareRegistry`]: crate::traits::HardwareRegistry
//! [`VfdMotor`]: crate::traits::VfdMotor
//! [`AxisActuator`]: crate::traits::AxisActuator
//! [`Pneumatic`]: crate::traits::Pneumatic
//! [`Clock`]: crate::traits::Clock
//! [`MqttClient`]: crate::traits::MqttClient

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::HardwareError;
use crate::hal::mirror::SensorMirror;
use crate::traits::{
    AxisActuator, Clock, DigitalInput, HardwareRegistry, MqttClient, MqttMessage, Pneumatic,
    PneumaticPosition, VfdMotor,
};

// ============================================================================
// Simulated Plant
// ============================================================================

/// One hardware command, as seen by the mock plant.
#[derive(Clone, Debug, PartialEq)]
pub enum HalEvent {
    /// VFD started forward.
    Forward(String),
    /// VFD stopped.
    Stop(String),
    /// Axis moving continuously.
    MoveContinuous {
        /// Device name.
        name: String,
        /// Requested speed.
        speed: f32,
        /// Requested acceleration.
        acceleration: f32,
    },
    /// Axis decelerating to standstill.
    StopAxis {
        /// Device name.
        name: String,
        /// Requested deceleration.
        deceleration: f32,
    },
    /// Cylinder extend.
    Push(String),
    /// Cylinder retract.
    Pull(String),
    /// Cylinder valves released.
    Idle(String),
}

impl HalEvent {
    /// Device the command was sent to.
    pub fn device(&self) -> &str {
        match self {
            HalEvent::Forward(name)
            | HalEvent::Stop(name)
            | HalEvent::Push(name)
            | HalEvent::Pull(name)
            | HalEvent::Idle(name) => name,
            HalEvent::MoveContinuous { name, .. } | HalEvent::StopAxis { name, .. } => name,
        }
    }

    /// Whether the command brings a drive to standstill.
    pub fn is_stop(&self) -> bool {
        matches!(self, HalEvent::Stop(_) | HalEvent::StopAxis { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CylinderSensing {
    /// Position follows the last command immediately.
    Instant,
    /// Position only changes through [`MockHal::complete_motion`].
    Manual,
    /// No position sensor: always reports `Unknown`.
    None,
}

#[derive(Debug)]
struct Cylinder {
    sensing: CylinderSensing,
    commanded: PneumaticPosition,
    position: PneumaticPosition,
}

#[derive(Debug, Default)]
struct Plant {
    journal: Vec<HalEvent>,
    vfds: HashMap<String, bool>,
    axes: HashMap<String, bool>,
    cylinders: HashMap<String, Cylinder>,
    failing: HashSet<String>,
}

impl Plant {
    fn command(
        &mut self,
        device: &str,
        command: &'static str,
        event: HalEvent,
    ) -> Result<(), HardwareError> {
        if self.failing.contains(device) {
            return Err(HardwareError::Command {
                device: device.to_string(),
                command,
                reason: "simulated failure".to_string(),
            });
        }
        self.journal.push(event);
        Ok(())
    }
}

type SharedPlant = Arc<Mutex<Plant>>;

fn lock(plant: &SharedPlant) -> MutexGuard<'_, Plant> {
    plant.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated plant exposing named devices through [`HardwareRegistry`].
///
/// Cloning a `MockHal` yields another view of the same plant, so a test can
/// keep one copy for inspection while the control loop owns another.
///
/// # Example
///
/// ```rust
/// use conveyor_fsm::hal::MockHal;
/// use conveyor_fsm::traits::{DigitalInput, HardwareRegistry};
///
/// let hal = MockHal::new().with_input("eye_1");
/// let eye = hal.input("eye_1").unwrap();
/// assert!(!eye.state());
///
/// hal.set_input("eye_1", true);
/// assert!(eye.state());
/// assert!(hal.input("eye_2").is_none());
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockHal {
    plant: SharedPlant,
    mirror: Arc<SensorMirror>,
    provisioning: bool,
}

impl MockHal {
    /// Creates an empty plant.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a plant whose inputs are read from an existing mirror.
    pub fn with_mirror(mirror: Arc<SensorMirror>) -> Self {
        Self {
            plant: SharedPlant::default(),
            mirror,
            provisioning: false,
        }
    }

    /// Creates devices on first lookup instead of reporting them missing.
    ///
    /// Drives are provisioned as VFDs and cylinders with instant position
    /// sensors. Used by the simulator, where any configuration must build.
    pub fn provisioning(mut self) -> Self {
        self.provisioning = true;
        self
    }

    /// Adds a variable-frequency drive.
    pub fn with_vfd(self, name: &str) -> Self {
        lock(&self.plant).vfds.insert(name.to_string(), false);
        self
    }

    /// Adds a generic axis actuator.
    pub fn with_actuator(self, name: &str) -> Self {
        lock(&self.plant).axes.insert(name.to_string(), false);
        self
    }

    /// Adds a digital input (initially low).
    pub fn with_input(self, name: &str) -> Self {
        self.mirror.handle(name);
        self
    }

    /// Adds a cylinder whose position sensor confirms each command at once.
    pub fn with_pneumatic(self, name: &str) -> Self {
        self.add_cylinder(name, CylinderSensing::Instant)
    }

    /// Adds a cylinder that only reaches its commanded position when
    /// [`complete_motion`](Self::complete_motion) is called.
    pub fn with_slow_pneumatic(self, name: &str) -> Self {
        self.add_cylinder(name, CylinderSensing::Manual)
    }

    /// Adds a cylinder without a position sensor.
    pub fn with_unsensed_pneumatic(self, name: &str) -> Self {
        self.add_cylinder(name, CylinderSensing::None)
    }

    fn add_cylinder(self, name: &str, sensing: CylinderSensing) -> Self {
        lock(&self.plant).cylinders.insert(
            name.to_string(),
            Cylinder {
                sensing,
                commanded: PneumaticPosition::Unknown,
                position: PneumaticPosition::Unknown,
            },
        );
        self
    }

    /// Sets the raw electrical state of an input.
    pub fn set_input(&self, name: &str, state: bool) {
        self.mirror.update(name, state);
    }

    /// The mirror backing this plant's inputs.
    pub fn mirror(&self) -> Arc<SensorMirror> {
        Arc::clone(&self.mirror)
    }

    /// Whether the named drive (VFD or axis) is currently running.
    pub fn is_running(&self, name: &str) -> bool {
        let plant = lock(&self.plant);
        plant
            .vfds
            .get(name)
            .or_else(|| plant.axes.get(name))
            .copied()
            .unwrap_or(false)
    }

    /// Last command sent to a cylinder, `Unknown` for idle or never commanded.
    pub fn commanded(&self, name: &str) -> PneumaticPosition {
        lock(&self.plant)
            .cylinders
            .get(name)
            .map_or(PneumaticPosition::Unknown, |c| c.commanded)
    }

    /// Sensed position of a cylinder.
    pub fn position(&self, name: &str) -> PneumaticPosition {
        lock(&self.plant)
            .cylinders
            .get(name)
            .map_or(PneumaticPosition::Unknown, |c| c.position)
    }

    /// Forces the sensed position of a cylinder.
    pub fn set_position(&self, name: &str, position: PneumaticPosition) {
        if let Some(cylinder) = lock(&self.plant).cylinders.get_mut(name) {
            cylinder.position = position;
        }
    }

    /// Moves a slow cylinder to its last commanded position.
    pub fn complete_motion(&self, name: &str) {
        if let Some(cylinder) = lock(&self.plant).cylinders.get_mut(name) {
            if cylinder.commanded != PneumaticPosition::Unknown {
                cylinder.position = cylinder.commanded;
            }
        }
    }

    /// Makes every further command to `name` fail.
    pub fn fail_device(&self, name: &str) {
        lock(&self.plant).failing.insert(name.to_string());
    }

    /// Lets commands to `name` succeed again.
    pub fn recover_device(&self, name: &str) {
        lock(&self.plant).failing.remove(name);
    }

    /// Copy of every command issued so far.
    pub fn journal(&self) -> Vec<HalEvent> {
        lock(&self.plant).journal.clone()
    }

    /// Commands issued to one device.
    pub fn journal_for(&self, name: &str) -> Vec<HalEvent> {
        lock(&self.plant)
            .journal
            .iter()
            .filter(|e| e.device() == name)
            .cloned()
            .collect()
    }

    /// Forget all recorded commands.
    pub fn clear_journal(&self) {
        lock(&self.plant).journal.clear();
    }
}

impl HardwareRegistry for MockHal {
    fn vfd(&self, name: &str) -> Option<Box<dyn VfdMotor>> {
        let mut plant = lock(&self.plant);
        if self.provisioning && !plant.vfds.contains_key(name) && !plant.axes.contains_key(name) {
            plant.vfds.insert(name.to_string(), false);
        }
        plant.vfds.contains_key(name).then(|| {
            Box::new(MockVfd {
                name: name.to_string(),
                plant: Arc::clone(&self.plant),
            }) as Box<dyn VfdMotor>
        })
    }

    fn actuator(&self, name: &str) -> Option<Box<dyn AxisActuator>> {
        lock(&self.plant).axes.contains_key(name).then(|| {
            Box::new(MockAxis {
                name: name.to_string(),
                plant: Arc::clone(&self.plant),
            }) as Box<dyn AxisActuator>
        })
    }

    fn input(&self, name: &str) -> Option<Box<dyn DigitalInput>> {
        (self.provisioning || self.mirror.contains(name))
            .then(|| Box::new(self.mirror.handle(name)) as Box<dyn DigitalInput>)
    }

    fn pneumatic(&self, name: &str) -> Option<Box<dyn Pneumatic>> {
        let mut plant = lock(&self.plant);
        if self.provisioning && !plant.cylinders.contains_key(name) {
            plant.cylinders.insert(
                name.to_string(),
                Cylinder {
                    sensing: CylinderSensing::Instant,
                    commanded: PneumaticPosition::Unknown,
                    position: PneumaticPosition::Unknown,
                },
            );
        }
        plant.cylinders.contains_key(name).then(|| {
            Box::new(MockPneumatic {
                name: name.to_string(),
                plant: Arc::clone(&self.plant),
            }) as Box<dyn Pneumatic>
        })
    }
}

// ============================================================================
// Hardware Mocks
// ============================================================================

/// Mock variable-frequency drive handed out by [`MockHal`].
#[derive(Debug)]
pub struct MockVfd {
    name: String,
    plant: SharedPlant,
}

impl VfdMotor for MockVfd {
    fn move_forward(&mut self) -> Result<(), HardwareError> {
        let mut plant = lock(&self.plant);
        plant.command(&self.name, "move_forward", HalEvent::Forward(self.name.clone()))?;
        plant.vfds.insert(self.name.clone(), true);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        let mut plant = lock(&self.plant);
        plant.command(&self.name, "stop", HalEvent::Stop(self.name.clone()))?;
        plant.vfds.insert(self.name.clone(), false);
        Ok(())
    }
}

/// Mock axis actuator handed out by [`MockHal`].
#[derive(Debug)]
pub struct MockAxis {
    name: String,
    plant: SharedPlant,
}

impl AxisActuator for MockAxis {
    fn move_continuous(&mut self, speed: f32, acceleration: f32) -> Result<(), HardwareError> {
        let mut plant = lock(&self.plant);
        let event = HalEvent::MoveContinuous {
            name: self.name.clone(),
            speed,
            acceleration,
        };
        plant.command(&self.name, "move_continuous", event)?;
        plant.axes.insert(self.name.clone(), true);
        Ok(())
    }

    fn stop(&mut self, deceleration: f32) -> Result<(), HardwareError> {
        let mut plant = lock(&self.plant);
        let event = HalEvent::StopAxis {
            name: self.name.clone(),
            deceleration,
        };
        plant.command(&self.name, "stop", event)?;
        plant.axes.insert(self.name.clone(), false);
        Ok(())
    }
}

/// Mock pneumatic cylinder handed out by [`MockHal`].
#[derive(Debug)]
pub struct MockPneumatic {
    name: String,
    plant: SharedPlant,
}

impl MockPneumatic {
    fn apply(
        &mut self,
        command: &'static str,
        event: HalEvent,
        target: PneumaticPosition,
    ) -> Result<(), HardwareError> {
        let mut plant = lock(&self.plant);
        plant.command(&self.name, command, event)?;
        if let Some(cylinder) = plant.cylinders.get_mut(&self.name) {
            cylinder.commanded = target;
            if cylinder.sensing == CylinderSensing::Instant && target != PneumaticPosition::Unknown {
                cylinder.position = target;
            }
        }
        Ok(())
    }
}

impl Pneumatic for MockPneumatic {
    fn push_async(&mut self) -> Result<(), HardwareError> {
        let event = HalEvent::Push(self.name.clone());
        self.apply("push", event, PneumaticPosition::Pushed)
    }

    fn pull_async(&mut self) -> Result<(), HardwareError> {
        let event = HalEvent::Pull(self.name.clone());
        self.apply("pull", event, PneumaticPosition::Pulled)
    }

    fn idle_async(&mut self) -> Result<(), HardwareError> {
        let event = HalEvent::Idle(self.name.clone());
        self.apply("idle", event, PneumaticPosition::Unknown)
    }

    fn state(&self) -> PneumaticPosition {
        let plant = lock(&self.plant);
        match plant.cylinders.get(&self.name) {
            Some(c) if c.sensing != CylinderSensing::None => c.position,
            _ => PneumaticPosition::Unknown,
        }
    }
}

/// Mock clock for testing.
///
/// Provides a controllable time source for testing time-dependent behavior.
///
/// # Example
///
/// ```rust
/// use conveyor_fsm::hal::MockClock;
/// use conveyor_fsm::traits::Clock;
///
/// let mut clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.set(1000);
/// assert_eq!(clock.now_ms(), 1000);
///
/// clock.advance(500);
/// assert_eq!(clock.now_ms(), 1500);
/// ```
#[derive(Debug, Default)]
pub struct MockClock {
    current_ms: u64,
}

impl MockClock {
    /// Creates a new mock clock starting at 0ms.
    pub fn new() -> Self {
        Self { current_ms: 0 }
    }

    /// Sets the current time in milliseconds.
    pub fn set(&mut self, ms: u64) {
        self.current_ms = ms;
    }

    /// Advances the clock by the given duration.
    pub fn advance(&mut self, ms: u64) {
        self.current_ms += ms;
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.current_ms
    }
}

// ============================================================================
// Network Mocks
// ============================================================================

/// Mock MQTT client for testing.
///
/// Records all publish/subscribe operations and allows injecting
/// incoming messages for testing message handling.
///
/// # Example
///
/// ```rust
/// use conveyor_fsm::hal::MockMqtt;
/// use conveyor_fsm::traits::MqttClient;
///
/// let mut mqtt = MockMqtt::new();
///
/// mqtt.queue_message("estop/status", "true");
/// assert_eq!(mqtt.try_recv().unwrap().topic, "estop/status");
///
/// mqtt.publish("conveyors/1/state", b"RUNNING", false).unwrap();
/// assert_eq!(mqtt.published_to("conveyors/1/state").len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockMqtt {
    /// Messages that have been published (topic, payload, retain).
    pub published: Vec<(String, Vec<u8>, bool)>,
    /// Topics that have been subscribed to.
    pub subscriptions: Vec<String>,
    /// Queue of incoming messages to be returned by `try_recv()`.
    pub incoming: Vec<MqttMessage>,
    /// Whether the client is connected.
    pub connected: bool,
}

impl MockMqtt {
    /// Creates a new mock MQTT client in connected state.
    pub fn new() -> Self {
        Self {
            connected: true,
            ..Default::default()
        }
    }

    /// Queue an incoming message
    pub fn queue_message(&mut self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.incoming.push(MqttMessage::new(topic, payload));
    }

    /// Check if a topic was subscribed to
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|t| t == topic)
    }

    /// Get published messages for a topic
    pub fn published_to(&self, topic: &str) -> Vec<&(String, Vec<u8>, bool)> {
        self.published
            .iter()
            .filter(|(t, _, _)| t == topic)
            .collect()
    }
}

impl MqttClient for MockMqtt {
    type Error = ();

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ()> {
        if !self.connected {
            return Err(());
        }
        self.published.push((topic.into(), payload.to_vec(), retain));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), ()> {
        self.subscriptions.push(topic.into());
        Ok(())
    }

    fn try_recv(&mut self) -> Option<MqttMessage> {
        if self.incoming.is_empty() {
            None
        } else {
            Some(self.incoming.remove(0))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Tests
// ============================================================================
