//! The periodic control worker.
//!
//! [`ControlLoop::cycle`] is the only code path that commands actuators. The
//! event side (see [`crate::messages::EventRouter`]) writes the shared
//! [`SafetyState`], [`PickingFlag`] and [`ControlRequests`]; each cycle reads
//! them once and then:
//!
//! 1. handles a pending reconfiguration: stop the current line, wait until
//!    it is quiescent (or the timeout passes and every drive has confirmed
//!    its stop), build and install the new line. No cycle steps conveyors
//!    while a reconfiguration is in flight.
//! 2. applies a pending fault reset.
//! 3. stops the line on the falling edge of the run command. While it stays
//!    off, or whenever e-stop or drive readiness forbids motion, nothing is
//!    stepped and unconfirmed stop and safe-position commands are re-sent.
//! 4. steps every conveyor once.
//!
//! # Example
//!
//! ```rust
//! use conveyor_fsm::config::{ConveyorConfig, ConveyorType, LineConfig, SensorConfig};
//! use conveyor_fsm::control_loop::ControlLoop;
//! use conveyor_fsm::conveyor::ConveyorState;
//! use conveyor_fsm::hal::MockHal;
//!
//! let hal = MockHal::new().with_vfd("belt").with_input("eye");
//! let config = LineConfig::new().with_conveyor(
//!     "belt",
//!     ConveyorConfig::new(ConveyorType::Simple, "belt").with_box_sensor(SensorConfig::new("eye")),
//! );
//! let mut control = ControlLoop::new(hal.clone(), config).unwrap();
//!
//! control.safety().set_drives_ready(true);
//! control.safety().set_run(true);
//! let report = control.cycle(0);
//! assert_eq!(report.updates[0].state, ConveyorState::Running);
//! assert!(hal.is_running("belt"));
//! ```

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::config::LineConfig;
use crate::conveyor::CycleContext;
use crate::error::ConfigError;
use crate::orchestrator::{ControlAllConveyor, CycleReport};
use crate::safety::{PickingFlag, SafetyState};
use crate::topology::build_topology;
use crate::traits::HardwareRegistry;

// ============================================================================
// Requests
// ============================================================================

/// Control requests raised by the event side, consumed by the control loop.
#[derive(Debug, Default)]
pub struct ControlRequests {
    reconfigure: Mutex<Option<LineConfig>>,
    reset: AtomicBool,
}

impl ControlRequests {
    /// Create with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a new configuration. A request still pending is replaced.
    pub fn request_reconfigure(&self, config: LineConfig) {
        let mut pending = self.reconfigure.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_some() {
            debug!("pending reconfiguration superseded");
        }
        *pending = Some(config);
    }

    /// Take the pending configuration, if any.
    pub fn take_reconfigure(&self) -> Option<LineConfig> {
        self.reconfigure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Ask for latched faults to be cleared.
    pub fn request_reset(&self) {
        self.reset.store(true, Ordering::Release);
    }

    /// Consume a pending reset request.
    pub fn take_reset(&self) -> bool {
        self.reset.swap(false, Ordering::AcqRel)
    }
}

// ============================================================================
// Control Loop
// ============================================================================

#[derive(Debug)]
enum Phase {
    Running,
    Quiescing {
        config: LineConfig,
        deadline_ms: u64,
        stalled: bool,
    },
}

/// Periodic worker owning the live conveyor list.
pub struct ControlLoop<H: HardwareRegistry> {
    hal: H,
    config: LineConfig,
    line: ControlAllConveyor,
    safety: Arc<SafetyState>,
    picking: Arc<PickingFlag>,
    requests: Arc<ControlRequests>,
    phase: Phase,
    run_latched: bool,
    held: bool,
}

impl<H: HardwareRegistry> ControlLoop<H> {
    /// Build the initial line. Any configuration error aborts startup.
    pub fn new(hal: H, config: LineConfig) -> Result<Self, ConfigError> {
        let line = ControlAllConveyor::new(build_topology(&config, &hal)?);
        Ok(Self {
            hal,
            config,
            line,
            safety: Arc::new(SafetyState::new()),
            picking: Arc::new(PickingFlag::new()),
            requests: Arc::new(ControlRequests::new()),
            phase: Phase::Running,
            run_latched: false,
            held: false,
        })
    }

    /// Shared safety state, written by the event side.
    pub fn safety(&self) -> &Arc<SafetyState> {
        &self.safety
    }

    /// Shared robot picking flag.
    pub fn picking(&self) -> &Arc<PickingFlag> {
        &self.picking
    }

    /// Shared reconfigure/reset requests.
    pub fn requests(&self) -> &Arc<ControlRequests> {
        &self.requests
    }

    /// Hardware registry.
    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// Configuration of the installed line.
    pub fn config(&self) -> &LineConfig {
        &self.config
    }

    /// Installed line.
    pub fn line(&self) -> &ControlAllConveyor {
        &self.line
    }

    /// Period between cycles.
    pub fn cycle_ms(&self) -> u64 {
        self.config.control.cycle_ms
    }

    /// Whether a reconfiguration is waiting for the line to settle.
    pub fn is_reconfiguring(&self) -> bool {
        matches!(self.phase, Phase::Quiescing { .. })
    }

    /// Run one control cycle at `now_ms`.
    pub fn cycle(&mut self, now_ms: u64) -> CycleReport {
        let mut report = CycleReport::default();

        if let Some(config) = self.requests.take_reconfigure() {
            if let Phase::Running = self.phase {
                info!(conveyors = self.line.len(), "stopping line for reconfiguration");
                report.merge(self.line.stop_all(now_ms));
            }
            let deadline_ms = now_ms + self.config.control.quiesce_timeout_ms;
            self.phase = Phase::Quiescing {
                config,
                deadline_ms,
                stalled: false,
            };
            return report;
        }

        if let Phase::Quiescing { config, deadline_ms, stalled } =
            mem::replace(&mut self.phase, Phase::Running)
        {
            report.merge(self.line.hold_all(now_ms));
            let quiet = self.line.is_quiescent(now_ms);
            let timed_out = now_ms >= deadline_ms;
            // The timeout only covers cylinders; a drive is never dropped
            // before it has confirmed its stop.
            if !quiet && !(timed_out && self.line.drives_stopped()) {
                if timed_out && !stalled {
                    warn!("a drive has not confirmed its stop, holding reconfiguration");
                }
                self.phase = Phase::Quiescing {
                    config,
                    deadline_ms,
                    stalled: stalled || timed_out,
                };
                return report;
            }
            if !quiet {
                warn!("line did not settle before the quiesce timeout");
            }
            report.merge(self.install(config));
            return report;
        }

        if self.requests.take_reset() {
            info!("clearing conveyor faults");
            report.merge(self.line.reset_all());
        }

        let safety = self.safety.snapshot();
        if !safety.run_command {
            if self.run_latched {
                info!("run command cleared, stopping line");
                self.run_latched = false;
                self.held = true;
                report.merge(self.line.stop_all(now_ms));
            } else if self.held || !safety.motion_permitted() {
                report.merge(self.line.hold_all(now_ms));
            }
            return report;
        }
        if !self.run_latched {
            info!("run command set, starting line");
            self.run_latched = true;
        }

        let ctx = CycleContext::new(now_ms, safety).with_picking(self.picking.get());
        report.merge(self.line.run_all(&ctx));
        report
    }

    /// Stop every conveyor and drop the run command, e.g. on shutdown.
    pub fn stop_line(&mut self, now_ms: u64) -> CycleReport {
        info!("stopping line");
        self.safety.set_run(false);
        self.run_latched = false;
        self.held = true;
        self.line.stop_all(now_ms)
    }

    fn install(&mut self, config: LineConfig) -> CycleReport {
        match build_topology(&config, &self.hal) {
            Ok(conveyors) => {
                info!(conveyors = conveyors.len(), "new topology installed");
                self.line.replace(conveyors);
                self.config = config;
                CycleReport::default()
            }
            Err(e) => {
                error!(error = %e, "new configuration rejected, keeping previous line");
                self.line.reset_all()
            }
        }
    }
}
