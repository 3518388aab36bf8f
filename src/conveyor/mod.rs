//! Conveyor state machines.
//!
//! One [`Conveyor`] per physical unit. Each cycle the orchestrator calls
//! [`Conveyor::step`] with a [`CycleContext`] holding the cycle's safety
//! snapshot, the robot picking flag and, for dependent variants, the state
//! of the parent conveyor as already updated this cycle.
//!
//! Common rules, applied before any variant logic:
//!
//! - Safety loss (e-stop active or drives not ready) puts the unit in its
//!   safe state in the same step: drive stopped, pusher retracted, stopper
//!   extended, timers cleared.
//! - A latched [`ConveyorFault`] holds the unit in that safe state until
//!   [`Conveyor::reset`].
//! - At most one transition happens per step.
//!
//! # Example
//!
//! ```rust
//! use conveyor_fsm::config::{ConveyorConfig, ConveyorType, SensorConfig};
//! use conveyor_fsm::conveyor::{ConveyorState, CycleContext};
//! use conveyor_fsm::hal::MockHal;
//! use conveyor_fsm::safety::SafetySnapshot;
//! use conveyor_fsm::topology::build_conveyor;
//!
//! let hal = MockHal::new().with_vfd("belt").with_input("eye");
//! let config = ConveyorConfig::new(ConveyorType::Simple, "belt")
//!     .with_box_sensor(SensorConfig::new("eye"));
//! let mut conveyor = build_conveyor(1, "belt", &config, None, &hal).unwrap();
//!
//! let ctx = CycleContext::new(0, SafetySnapshot::operational());
//! conveyor.step(&ctx).unwrap();
//! assert_eq!(conveyor.state(), ConveyorState::Running);
//! assert!(hal.is_running("belt"));
//! ```

pub mod accumulating;
pub mod dependent;
pub mod infeed;
pub mod io;
pub mod pacing;
pub mod simple;

use std::fmt;

use tracing::{debug, error};

use crate::config::ConveyorType;
use crate::error::{ConveyorError, ConveyorFault, HardwareError};
use crate::safety::SafetySnapshot;

pub use accumulating::Accumulating;
pub use dependent::{Follower, Queueing, Transfer};
pub use infeed::Infeed;
pub use io::{Cylinder, Drive, DriveHandle, EdgeSensor, Sensor};
pub use pacing::PacingInfeed;
pub use simple::Simple;

// ============================================================================
// State
// ============================================================================

/// Symbolic conveyor state, published on `conveyors/{id}/state`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConveyorState {
    /// Starting up or recovering to a known position.
    #[default]
    Init,
    /// Belt moving.
    Running,
    /// Belt stopped, deciding what comes next.
    Stopping,
    /// Pusher extending.
    Pushing,
    /// Pusher retracting.
    Retract,
    /// Product in the pick zone.
    WaitingForPick,
    /// Settling after enable, before counting queued boxes.
    Startup,
    /// Gap between restarting and releasing the next batch.
    Pacing,
    /// Stopper open, counting boxes through.
    Queueing,
    /// Holding until the box sensor clears.
    Waiting,
}

impl ConveyorState {
    /// Upper-case state name used on the wire.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConveyorState::Init => "INIT",
            ConveyorState::Running => "RUNNING",
            ConveyorState::Stopping => "STOPPING",
            ConveyorState::Pushing => "PUSHING",
            ConveyorState::Retract => "RETRACT",
            ConveyorState::WaitingForPick => "WAITING_FOR_PICK",
            ConveyorState::Startup => "STARTUP",
            ConveyorState::Pacing => "PACING",
            ConveyorState::Queueing => "QUEUEING",
            ConveyorState::Waiting => "WAITING",
        }
    }
}

impl fmt::Display for ConveyorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Cycle inputs and outputs
// ============================================================================

/// Everything a conveyor may read besides its own sensors and timers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleContext {
    /// Cycle time in milliseconds.
    pub now_ms: u64,
    /// Safety flags, read once for the whole cycle.
    pub safety: SafetySnapshot,
    /// Whether the pick robot is currently reaching into a pick zone.
    pub picking: bool,
    /// Parent state as of this cycle, for dependent variants.
    pub parent: Option<ConveyorState>,
}

impl CycleContext {
    /// Context with the robot idle and no parent.
    pub fn new(now_ms: u64, safety: SafetySnapshot) -> Self {
        Self {
            now_ms,
            safety,
            picking: false,
            parent: None,
        }
    }

    /// Set the picking flag
    pub fn with_picking(mut self, picking: bool) -> Self {
        self.picking = picking;
        self
    }

    /// Set the parent state
    pub fn with_parent(mut self, parent: ConveyorState) -> Self {
        self.parent = Some(parent);
        self
    }

    fn parent_running(&self) -> bool {
        self.parent == Some(ConveyorState::Running)
    }
}

/// A conveyor reached a new state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Status id (1-based build order).
    pub id: u32,
    /// New state.
    pub state: ConveyorState,
}

// ============================================================================
// Conveyor
// ============================================================================

/// State shared by every variant.
pub struct Core {
    id: u32,
    state: ConveyorState,
    drive: Drive,
}

impl Core {
    /// Wrap a drive. Starts in INIT.
    pub fn new(id: u32, drive: Drive) -> Self {
        Self {
            id,
            state: ConveyorState::Init,
            drive,
        }
    }

    /// Status id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> ConveyorState {
        self.state
    }

    /// Belt drive.
    pub fn drive(&mut self) -> &mut Drive {
        &mut self.drive
    }

    /// Move to `next`, logging the transition.
    pub fn transition(&mut self, next: ConveyorState) {
        if self.state != next {
            debug!(conveyor = self.id, from = %self.state, to = %next, "state transition");
            self.state = next;
        }
    }
}

/// Variant-specific behavior.
pub enum Behavior {
    /// Run until a box is seen.
    Simple(Simple),
    /// Single-box infeed with optional pusher.
    Infeed(Infeed),
    /// Accumulating conveyor.
    Accumulating(Accumulating),
    /// Dual-sensor pacing infeed.
    PacingInfeed(PacingInfeed),
    /// Mirrors its parent.
    Follower(Follower),
    /// Follows its parent, stops only when covered.
    Queueing(Queueing),
    /// Transfer with optional pusher.
    Transfer(Transfer),
}

impl Behavior {
    /// Variant tag.
    pub fn kind(&self) -> ConveyorType {
        match self {
            Behavior::Simple(_) => ConveyorType::Simple,
            Behavior::Infeed(_) => ConveyorType::Infeed,
            Behavior::Accumulating(_) => ConveyorType::Accumulating,
            Behavior::PacingInfeed(_) => ConveyorType::PacingInfeed,
            Behavior::Follower(_) => ConveyorType::Follower,
            Behavior::Queueing(_) => ConveyorType::Queueing,
            Behavior::Transfer(_) => ConveyorType::Transfer,
        }
    }

    fn step(&mut self, core: &mut Core, ctx: &CycleContext) -> Result<(), ConveyorError> {
        match self {
            Behavior::Simple(b) => b.step(core, ctx),
            Behavior::Infeed(b) => b.step(core, ctx),
            Behavior::Accumulating(b) => b.step(core, ctx),
            Behavior::PacingInfeed(b) => b.step(core, ctx),
            Behavior::Follower(b) => b.step(core, ctx),
            Behavior::Queueing(b) => b.step(core, ctx),
            Behavior::Transfer(b) => b.step(core, ctx),
        }
    }

    /// Put cylinders in their safe position and clear timers. Returns the
    /// state the unit rests in while unsafe.
    fn secure(&mut self, now_ms: u64) -> Result<ConveyorState, HardwareError> {
        match self {
            Behavior::Simple(_) => Ok(ConveyorState::Init),
            Behavior::Infeed(b) => b.secure(now_ms),
            Behavior::Accumulating(b) => b.secure(now_ms),
            Behavior::PacingInfeed(b) => b.secure(now_ms),
            Behavior::Follower(_) | Behavior::Queueing(_) => Ok(ConveyorState::Stopping),
            Behavior::Transfer(b) => b.secure(now_ms),
        }
    }

    /// State entered on an explicit stop command.
    fn stopped_state(&self) -> ConveyorState {
        match self {
            Behavior::Infeed(_) | Behavior::Accumulating(_) | Behavior::PacingInfeed(_) => {
                ConveyorState::Init
            }
            Behavior::Simple(_)
            | Behavior::Follower(_)
            | Behavior::Queueing(_)
            | Behavior::Transfer(_) => ConveyorState::Stopping,
        }
    }

    fn is_secured(&self, now_ms: u64) -> bool {
        match self {
            Behavior::Infeed(b) => b.is_secured(now_ms),
            Behavior::Accumulating(b) => b.is_secured(now_ms),
            Behavior::PacingInfeed(b) => b.is_secured(now_ms),
            Behavior::Transfer(b) => b.is_secured(now_ms),
            Behavior::Simple(_) | Behavior::Follower(_) | Behavior::Queueing(_) => true,
        }
    }
}

/// One physical conveyor.
pub struct Conveyor {
    key: String,
    core: Core,
    behavior: Behavior,
    parent: Option<usize>,
    fault: Option<ConveyorFault>,
    reported: Option<ConveyorState>,
}

impl Conveyor {
    /// Assemble a conveyor. `parent` is the index of the parent conveyor in
    /// the orchestrator's list.
    pub fn new(key: impl Into<String>, core: Core, behavior: Behavior, parent: Option<usize>) -> Self {
        Self {
            key: key.into(),
            core,
            behavior,
            parent,
            fault: None,
            reported: None,
        }
    }

    /// Status id.
    pub fn id(&self) -> u32 {
        self.core.id
    }

    /// Configuration key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Variant tag.
    pub fn kind(&self) -> ConveyorType {
        self.behavior.kind()
    }

    /// Current state.
    pub fn state(&self) -> ConveyorState {
        self.core.state
    }

    /// Index of the parent conveyor, for dependent variants.
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Latched fault, if any.
    pub fn fault(&self) -> Option<&ConveyorFault> {
        self.fault.as_ref()
    }

    /// Whether the drive was last commanded to run.
    pub fn is_driving(&self) -> bool {
        self.core.drive.is_running()
    }

    /// Whether the drive has confirmed a stop command.
    pub fn is_drive_stopped(&self) -> bool {
        self.core.drive.is_stopped()
    }

    /// Variant behavior, for inspection.
    pub fn behavior(&self) -> &Behavior {
        &self.behavior
    }

    /// Advance one control cycle.
    ///
    /// Hardware errors abort the step and leave the unit where it was; the
    /// next step retries. A fault detected during the step is latched and
    /// returned once.
    pub fn step(&mut self, ctx: &CycleContext) -> Result<(), ConveyorError> {
        if self.fault.is_some() {
            return self.make_safe(ctx.now_ms).map_err(Into::into);
        }
        if !ctx.safety.motion_permitted() {
            return self.make_safe(ctx.now_ms).map_err(Into::into);
        }

        match self.behavior.step(&mut self.core, ctx) {
            Err(ConveyorError::Fault(fault)) => {
                error!(conveyor = self.core.id, key = %self.key, %fault, "conveyor faulted");
                self.fault = Some(fault.clone());
                // Hold safe even if a command fails; the fault is reported either way.
                if let Err(e) = self.make_safe(ctx.now_ms) {
                    debug!(conveyor = self.core.id, error = %e, "securing faulted conveyor failed");
                }
                Err(ConveyorError::Fault(fault))
            }
            other => other,
        }
    }

    /// Explicit stop transition: belt stopped, cylinders to their safe
    /// position, timers cleared.
    pub fn stop(&mut self, now_ms: u64) -> Result<(), ConveyorError> {
        let drive = self.core.drive.force_halt();
        let secured = self.behavior.secure(now_ms);
        self.core.transition(self.behavior.stopped_state());
        drive?;
        secured?;
        Ok(())
    }

    /// Re-issue every safe-state command that is not confirmed yet, without
    /// changing state. Used while the line is held stopped.
    pub fn hold_safe(&mut self, now_ms: u64) -> Result<(), ConveyorError> {
        let drive = self.core.drive.halt();
        let secured = self.behavior.secure(now_ms);
        drive?;
        secured?;
        Ok(())
    }

    /// Force INIT and clear any latched fault.
    pub fn reset(&mut self) {
        self.fault = None;
        self.core.transition(ConveyorState::Init);
    }

    /// Whether the drive is confirmed stopped and every cylinder is confirmed
    /// in its safe position.
    pub fn is_quiescent(&self, now_ms: u64) -> bool {
        self.core.drive.is_stopped() && self.behavior.is_secured(now_ms)
    }

    /// Status update if the state changed since the last call.
    pub fn take_status(&mut self) -> Option<StatusUpdate> {
        if self.reported == Some(self.core.state) {
            return None;
        }
        self.reported = Some(self.core.state);
        Some(StatusUpdate {
            id: self.core.id,
            state: self.core.state,
        })
    }

    fn make_safe(&mut self, now_ms: u64) -> Result<(), HardwareError> {
        let drive = self.core.drive.halt();
        let secured = self.behavior.secure(now_ms);
        if let Ok(state) = secured {
            self.core.transition(state);
        }
        drive?;
        secured.map(|_| ())
    }
}

impl fmt::Debug for Conveyor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conveyor")
            .field("id", &self.core.id)
            .field("key", &self.key)
            .field("kind", &self.kind())
            .field("state", &self.core.state)
            .field("parent", &self.parent)
            .field("fault", &self.fault)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_match_wire_format() {
        assert_eq!(ConveyorState::WaitingForPick.as_str(), "WAITING_FOR_PICK");
        assert_eq!(ConveyorState::Init.to_string(), "INIT");
        assert_eq!(ConveyorState::Queueing.as_str(), "QUEUEING");
    }

    #[test]
    fn context_builders() {
        let ctx = CycleContext::new(5, SafetySnapshot::operational())
            .with_picking(true)
            .with_parent(ConveyorState::Running);
        assert!(ctx.picking);
        assert!(ctx.parent_running());
        assert!(!CycleContext::default().parent_running());
    }
}
