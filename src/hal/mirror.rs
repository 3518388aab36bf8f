//! Digital inputs whose value is mirrored from inbound messages.
//!
//! The I/O expander publishes every input change on
//! `io-expander/devices/{device}/inputs/{port}`. A [`SensorMirror`] keeps the
//! last value per input so conveyor steps can read it without touching the
//! network. Inputs are named by their address, `"{device}/{port}"`.
//!
//! # Example
//!
//! ```rust
//! use conveyor_fsm::hal::SensorMirror;
//! use conveyor_fsm::traits::DigitalInput;
//!
//! let mirror = SensorMirror::new();
//! let eye = mirror.handle("2/5");
//! assert!(!eye.state());
//!
//! mirror.update(&SensorMirror::address("2", "5"), true);
//! assert!(eye.state());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::traits::DigitalInput;

/// Last known value of every mirrored input.
#[derive(Debug, Default)]
pub struct SensorMirror {
    inputs: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl SensorMirror {
    /// Create an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Input name for an expander device and port.
    pub fn address(device: &str, port: &str) -> String {
        format!("{device}/{port}")
    }

    /// Handle to the named input, creating it (low) if unseen.
    pub fn handle(&self, name: &str) -> MirroredInput {
        MirroredInput {
            value: self.slot(name),
        }
    }

    /// Whether the named input has been registered or updated.
    pub fn contains(&self, name: &str) -> bool {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Record a new value for the named input.
    pub fn update(&self, name: &str, value: bool) {
        self.slot(name).store(value, Ordering::Release);
    }

    /// Current value of the named input (low if unseen).
    pub fn get(&self, name: &str) -> bool {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .is_some_and(|v| v.load(Ordering::Acquire))
    }

    fn slot(&self, name: &str) -> Arc<AtomicBool> {
        let mut inputs = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(inputs.entry(name.to_string()).or_default())
    }
}

/// A [`DigitalInput`] backed by a [`SensorMirror`] slot.
#[derive(Clone, Debug)]
pub struct MirroredInput {
    value: Arc<AtomicBool>,
}

impl DigitalInput for MirroredInput {
    fn state(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_input_reads_low() {
        let mirror = SensorMirror::new();
        assert!(!mirror.get("9/9"));
        assert!(!mirror.contains("9/9"));
    }

    #[test]
    fn handles_share_the_slot() {
        let mirror = SensorMirror::new();
        let a = mirror.handle("1/0");
        let b = mirror.handle("1/0");
        mirror.update("1/0", true);
        assert!(a.state());
        assert!(b.state());
        mirror.update("1/0", false);
        assert!(!a.state());
    }

    #[test]
    fn update_before_handle_is_kept() {
        let mirror = SensorMirror::new();
        mirror.update("3/1", true);
        assert!(mirror.handle("3/1").state());
    }
}
