//! Plant-wide safety state and the shared picking flag.
//!
//! [`SafetyState`] is owned once per process and shared by `Arc` between the
//! event context (the only writer) and the periodic control worker (the only
//! reader). All three flags live in a single atomic word, so
//! [`SafetyState::snapshot`] can never observe half of a multi-field update.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tracing::{debug, warn};

const ESTOP: u8 = 0b001;
const DRIVES_READY: u8 = 0b010;
const RUN_COMMAND: u8 = 0b100;

/// Parse a boolean-as-text payload.
///
/// Accepts `true`/`false` in any case and `1`/`0`, surrounding whitespace
/// ignored. Anything else yields `None`.
///
/// # Examples
///
/// ```
/// use conveyor_fsm::safety::parse_bool_payload;
///
/// assert_eq!(parse_bool_payload("True"), Some(true));
/// assert_eq!(parse_bool_payload(" false\n"), Some(false));
/// assert_eq!(parse_bool_payload("1"), Some(true));
/// assert_eq!(parse_bool_payload("maybe"), None);
/// ```
pub fn parse_bool_payload(payload: &str) -> Option<bool> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Consistent view of the safety flags for one control cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SafetySnapshot {
    /// Emergency stop is active.
    pub estop: bool,
    /// Motor drives report ready.
    pub drives_ready: bool,
    /// Operator run command is active.
    pub run_command: bool,
}

impl SafetySnapshot {
    /// Snapshot with drives ready, no e-stop and the run command set.
    pub const fn operational() -> Self {
        Self {
            estop: false,
            drives_ready: true,
            run_command: true,
        }
    }

    /// Whether motion is permitted at all.
    ///
    /// Motion is blocked if the drives are not ready OR the e-stop is active.
    #[inline]
    pub const fn motion_permitted(&self) -> bool {
        self.drives_ready && !self.estop
    }

    fn from_bits(bits: u8) -> Self {
        Self {
            estop: bits & ESTOP != 0,
            drives_ready: bits & DRIVES_READY != 0,
            run_command: bits & RUN_COMMAND != 0,
        }
    }
}

/// Process-wide safety state.
///
/// Starts with drives not ready, e-stop released and the run command off,
/// so nothing moves until the plant reports readiness.
#[derive(Debug, Default)]
pub struct SafetyState {
    bits: AtomicU8,
}

impl SafetyState {
    /// Create the initial (not ready) state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read all flags at once.
    #[inline]
    pub fn snapshot(&self) -> SafetySnapshot {
        SafetySnapshot::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Emergency stop flag.
    pub fn estop(&self) -> bool {
        self.snapshot().estop
    }

    /// Drive readiness flag.
    pub fn drives_ready(&self) -> bool {
        self.snapshot().drives_ready
    }

    /// Run command flag.
    pub fn run_command(&self) -> bool {
        self.snapshot().run_command
    }

    /// Set the emergency stop flag.
    pub fn set_estop(&self, active: bool) {
        self.set_bit(ESTOP, active);
    }

    /// Set the drive readiness flag.
    pub fn set_drives_ready(&self, ready: bool) {
        self.set_bit(DRIVES_READY, ready);
    }

    /// Set the run command flag.
    pub fn set_run(&self, run: bool) {
        self.set_bit(RUN_COMMAND, run);
    }

    /// Apply an e-stop payload. Unrecognized payloads are logged and ignored.
    pub fn on_estop_payload(&self, payload: &str) {
        match parse_bool_payload(payload) {
            Some(active) => self.set_estop(active),
            None => warn!(payload, "unexpected payload on estop topic"),
        }
    }

    /// Apply a drive-readiness payload. Unrecognized payloads are logged and ignored.
    pub fn on_drives_ready_payload(&self, payload: &str) {
        match parse_bool_payload(payload) {
            Some(ready) => self.set_drives_ready(ready),
            None => warn!(payload, "unexpected payload on drive readiness topic"),
        }
    }

    fn set_bit(&self, bit: u8, value: bool) {
        let previous = if value {
            self.bits.fetch_or(bit, Ordering::AcqRel)
        } else {
            self.bits.fetch_and(!bit, Ordering::AcqRel)
        };
        if (previous & bit != 0) != value {
            debug!(
                state = ?SafetySnapshot::from_bits(self.bits.load(Ordering::Acquire)),
                "safety state changed"
            );
        }
    }
}

/// Flag raised by the pick robot while it is reaching into a pick zone.
#[derive(Debug, Default)]
pub struct PickingFlag(AtomicBool);

impl PickingFlag {
    /// Create a cleared flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value.
    #[inline]
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Update the value.
    pub fn set(&self, picking: bool) {
        self.0.store(picking, Ordering::Release);
    }

    /// Apply a `robot/picking` payload. Unrecognized payloads are logged and ignored.
    pub fn on_payload(&self, payload: &str) {
        match parse_bool_payload(payload) {
            Some(picking) => self.set(picking),
            None => warn!(payload, "unexpected payload on robot picking topic"),
        }
    }
}
