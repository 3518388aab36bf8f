//! Dual-sensor pacing infeed (configured as `DoublePickInfeedConveyor`).
//!
//! The pick zone holds up to [`QUEUE_CAPACITY`] boxes, watched by the box
//! and accumulation sensors. A stopper gates product into the zone and a
//! pass-through sensor next to it counts boxes released through the gate.
//! `boxes_to_queue` is the number of boxes the zone still expects:
//!
//! - STARTUP: settles, then subtracts every box already present.
//! - QUEUEING: stopper open, one box subtracted per gate pulse.
//! - WAITING_FOR_PICK: after the pick, recounted from the zone sensors.
//!
//! Seeing more boxes than the zone can hold latches
//! [`ConveyorFault::ImpossibleCount`].
//!
//! ```text
//! INIT ─► STARTUP ─► QUEUEING ─► RUNNING ─► PUSHING ─► RETRACT ─► WAITING_FOR_PICK
//!            └─(zone full)──────────►┘          ▲                        │
//!                        QUEUEING ◄── PACING ◄──┼────────(restart)───────┘
//! ```

use tracing::debug;

use super::{Core, ConveyorState, CycleContext, Cylinder, EdgeSensor, Sensor};
use crate::config::TimingConfig;
use crate::error::{ConveyorError, ConveyorFault, HardwareError};
use crate::timer::Timer;

/// Boxes the pick zone holds.
pub const QUEUE_CAPACITY: u8 = 2;

/// Stopper-gated, dual-sensor infeed.
pub struct PacingInfeed {
    box_sensor: Sensor,
    accumulation_sensor: Sensor,
    gate: EdgeSensor,
    pusher: Option<Cylinder>,
    stopper: Cylinder,
    startup: Timer,
    sustain: Timer,
    pacing: Timer,
    restart: Timer,
    boxes_to_queue: u8,
    startup_pulses: u8,
    box_was_picked: bool,
}

impl PacingInfeed {
    /// Create from its devices and timers.
    pub fn new(
        box_sensor: Sensor,
        accumulation_sensor: Sensor,
        gate: Sensor,
        pusher: Option<Cylinder>,
        stopper: Cylinder,
        timing: TimingConfig,
        restart_time_ms: u64,
    ) -> Self {
        Self {
            box_sensor,
            accumulation_sensor,
            gate: EdgeSensor::new(gate),
            pusher,
            stopper,
            startup: Timer::new(timing.startup_ms),
            sustain: Timer::new(timing.sustain_ms),
            pacing: Timer::new(timing.pacing_ms),
            restart: Timer::new(restart_time_ms),
            boxes_to_queue: QUEUE_CAPACITY,
            startup_pulses: 0,
            box_was_picked: false,
        }
    }

    /// Boxes still expected in the pick zone.
    pub fn boxes_to_queue(&self) -> u8 {
        self.boxes_to_queue
    }

    pub(super) fn step(&mut self, core: &mut Core, ctx: &CycleContext) -> Result<(), ConveyorError> {
        let now = ctx.now_ms;
        let passed = self.gate.rising();

        match core.state() {
            ConveyorState::Init => {
                if let Some(pusher) = self.pusher.as_mut() {
                    pusher.pull(now)?;
                }
                self.stopper.push(now)?;
                if self.pusher_retracted(now) {
                    if !self.startup.is_started() {
                        self.startup.start(now);
                    }
                    self.boxes_to_queue = QUEUE_CAPACITY;
                    self.startup_pulses = 0;
                    core.transition(ConveyorState::Startup);
                }
            }

            ConveyorState::Startup => {
                if passed {
                    self.startup_pulses = self.startup_pulses.saturating_add(1);
                }
                let covered = self.box_sensor.active();
                let accumulated = self.accumulation_sensor.active();
                if self.startup.done(now) || (covered && accumulated) {
                    self.startup.stop();
                    let detected = u8::from(covered) + u8::from(accumulated) + self.startup_pulses;
                    self.startup_pulses = 0;
                    self.take(core.id(), detected)?;
                    debug!(conveyor = core.id(), boxes_to_queue = self.boxes_to_queue, "startup count");
                    if self.boxes_to_queue > 0 {
                        self.stopper.idle(now)?;
                        core.transition(ConveyorState::Queueing);
                    } else {
                        core.drive().run()?;
                        core.transition(ConveyorState::Running);
                    }
                }
            }

            ConveyorState::Queueing => {
                self.stopper.pull(now)?;
                if passed {
                    self.take(core.id(), 1)?;
                }
                if self.boxes_to_queue == 0 {
                    self.stopper.idle(now)?;
                    core.drive().run()?;
                    core.transition(ConveyorState::Running);
                }
            }

            ConveyorState::Running => {
                self.stopper.push(now)?;
                if passed {
                    self.take(core.id(), 1)?;
                }
                if self.box_sensor.active() && self.accumulation_sensor.active() {
                    if !self.sustain.is_started() {
                        self.sustain.start(now);
                    }
                } else {
                    self.sustain.stop();
                }
                if self.sustain.done(now) {
                    self.sustain.stop();
                    core.drive().halt()?;
                    core.transition(ConveyorState::Pushing);
                }
            }

            ConveyorState::Pushing => {
                if passed {
                    self.take(core.id(), 1)?;
                }
                match self.pusher.as_mut() {
                    Some(pusher) => {
                        pusher.push(now)?;
                        if pusher.is_pushed(now) {
                            pusher.idle(now)?;
                            core.transition(ConveyorState::Retract);
                        }
                    }
                    None => {
                        self.box_was_picked = false;
                        core.transition(ConveyorState::WaitingForPick);
                    }
                }
            }

            ConveyorState::Retract => {
                if passed {
                    self.take(core.id(), 1)?;
                }
                match self.pusher.as_mut() {
                    Some(pusher) => {
                        pusher.pull(now)?;
                        if pusher.is_pulled(now) {
                            pusher.idle(now)?;
                            self.box_was_picked = false;
                            core.transition(ConveyorState::WaitingForPick);
                        }
                    }
                    None => {
                        self.box_was_picked = false;
                        core.transition(ConveyorState::WaitingForPick);
                    }
                }
            }

            ConveyorState::WaitingForPick => {
                if passed {
                    self.take(core.id(), 1)?;
                }
                let covered = self.box_sensor.active();
                let accumulated = self.accumulation_sensor.active();
                if !covered || !accumulated {
                    self.box_was_picked = true;
                }
                if self.box_was_picked && !ctx.picking && !self.restart.is_started() {
                    self.restart.start(now);
                }
                if self.restart.done(now) {
                    self.restart.stop();
                    self.boxes_to_queue =
                        QUEUE_CAPACITY - u8::from(covered) - u8::from(accumulated);
                    core.drive().run()?;
                    self.pacing.start(now);
                    core.transition(ConveyorState::Pacing);
                }
            }

            ConveyorState::Pacing => {
                if passed {
                    self.take(core.id(), 1)?;
                }
                if self.pacing.done(now) {
                    self.pacing.stop();
                    if self.boxes_to_queue > 0 {
                        self.stopper.idle(now)?;
                    }
                    debug!(conveyor = core.id(), boxes_to_queue = self.boxes_to_queue, "pacing done");
                    core.transition(ConveyorState::Queueing);
                }
            }

            _ => core.transition(ConveyorState::Init),
        }
        Ok(())
    }

    /// Subtract `detected` boxes from the expected count.
    fn take(&mut self, id: u32, detected: u8) -> Result<(), ConveyorFault> {
        match self.boxes_to_queue.checked_sub(detected) {
            Some(left) => {
                self.boxes_to_queue = left;
                Ok(())
            }
            None => Err(ConveyorFault::ImpossibleCount {
                id,
                detected,
                expected: self.boxes_to_queue,
            }),
        }
    }

    fn pusher_retracted(&self, now_ms: u64) -> bool {
        self.pusher.as_ref().map_or(true, |p| p.is_pulled(now_ms))
    }

    pub(super) fn secure(&mut self, now_ms: u64) -> Result<ConveyorState, HardwareError> {
        self.startup.stop();
        self.sustain.stop();
        self.pacing.stop();
        self.restart.stop();
        self.boxes_to_queue = QUEUE_CAPACITY;
        self.startup_pulses = 0;
        self.box_was_picked = false;

        let pusher = match self.pusher.as_mut() {
            Some(pusher) => pusher.pull(now_ms),
            None => Ok(()),
        };
        let stopper = self.stopper.push(now_ms);
        pusher?;
        stopper?;
        Ok(ConveyorState::Init)
    }

    pub(super) fn is_secured(&self, now_ms: u64) -> bool {
        self.pusher_retracted(now_ms) && self.stopper.is_pushed(now_ms)
    }
}
