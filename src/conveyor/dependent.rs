//! Conveyors that take their cue from a parent conveyor.
//!
//! The parent's state arrives through [`CycleContext::parent`] and is the
//! parent's state as of the current cycle.

use super::{Core, ConveyorState, CycleContext, Cylinder, Sensor};
use crate::error::{ConveyorError, HardwareError};

// ============================================================================
// Follower
// ============================================================================

/// Runs exactly when its parent runs.
#[derive(Debug, Default)]
pub struct Follower;

impl Follower {
    /// Create a follower.
    pub fn new() -> Self {
        Self
    }

    pub(super) fn step(&mut self, core: &mut Core, ctx: &CycleContext) -> Result<(), ConveyorError> {
        if ctx.parent_running() {
            core.drive().run()?;
            core.transition(ConveyorState::Running);
        } else {
            core.drive().halt()?;
            core.transition(ConveyorState::Stopping);
        }
        Ok(())
    }
}

// ============================================================================
// Queueing
// ============================================================================

/// Runs with its parent, but once running only stops when its own box
/// sensor is covered, so no gap is left in the queue.
///
/// The first step adopts the parent's state, so a queueing unit built
/// behind a waiting parent reports that state until something happens.
pub struct Queueing {
    box_sensor: Sensor,
    adopted: bool,
}

impl Queueing {
    /// Create with the box sensor.
    pub fn new(box_sensor: Sensor) -> Self {
        Self {
            box_sensor,
            adopted: false,
        }
    }

    pub(super) fn step(&mut self, core: &mut Core, ctx: &CycleContext) -> Result<(), ConveyorError> {
        if !self.adopted {
            self.adopted = true;
            if let Some(parent) = ctx.parent {
                core.transition(parent);
            }
        }
        if ctx.parent_running() {
            core.drive().run()?;
            core.transition(ConveyorState::Running);
        } else if self.box_sensor.active() {
            core.drive().halt()?;
            core.transition(ConveyorState::Stopping);
        }
        Ok(())
    }
}

// ============================================================================
// Transfer
// ============================================================================

/// Transfer conveyor with an optional pusher that ejects onto the parent
/// while the parent is running.
pub struct Transfer {
    box_sensor: Sensor,
    pusher: Option<Cylinder>,
}

impl Transfer {
    /// Create with the box sensor and optional pusher.
    pub fn new(box_sensor: Sensor, pusher: Option<Cylinder>) -> Self {
        Self { box_sensor, pusher }
    }

    pub(super) fn step(&mut self, core: &mut Core, ctx: &CycleContext) -> Result<(), ConveyorError> {
        let now = ctx.now_ms;
        match core.state() {
            ConveyorState::Init => {
                if let Some(pusher) = self.pusher.as_mut() {
                    if !pusher.is_pulled(now) {
                        pusher.pull(now)?;
                    }
                }
                core.drive().run()?;
                core.transition(ConveyorState::Running);
            }

            ConveyorState::Running => {
                if self.box_sensor.active() {
                    core.drive().halt()?;
                    core.transition(ConveyorState::Stopping);
                }
            }

            ConveyorState::Stopping => {
                if !self.box_sensor.active() {
                    core.drive().run()?;
                    core.transition(ConveyorState::Running);
                } else if self.pusher.is_none() {
                    core.transition(ConveyorState::Waiting);
                } else if ctx.parent_running() {
                    core.transition(ConveyorState::Pushing);
                }
            }

            ConveyorState::Pushing => match self.pusher.as_mut() {
                Some(pusher) => {
                    pusher.push(now)?;
                    if pusher.is_pushed(now) {
                        pusher.idle(now)?;
                        core.transition(ConveyorState::Retract);
                    }
                }
                None => core.transition(ConveyorState::Waiting),
            },

            ConveyorState::Retract => match self.pusher.as_mut() {
                Some(pusher) => {
                    pusher.pull(now)?;
                    if pusher.is_pulled(now) {
                        pusher.idle(now)?;
                        core.transition(ConveyorState::Waiting);
                    }
                }
                None => core.transition(ConveyorState::Waiting),
            },

            ConveyorState::Waiting => {
                if !self.box_sensor.active() {
                    core.drive().run()?;
                    core.transition(ConveyorState::Running);
                }
            }

            _ => core.transition(ConveyorState::Init),
        }
        Ok(())
    }

    pub(super) fn secure(&mut self, now_ms: u64) -> Result<ConveyorState, HardwareError> {
        if let Some(pusher) = self.pusher.as_mut() {
            pusher.pull(now_ms)?;
        }
        Ok(ConveyorState::Init)
    }

    pub(super) fn is_secured(&self, now_ms: u64) -> bool {
        self.pusher.as_ref().map_or(true, |p| p.is_pulled(now_ms))
    }
}
