//! MQTT service runner, generic over any [`MqttClient`].
//!
//! Bridges the message bus and the control loop without owning either:
//! inbound messages go through an [`EventRouter`], and each cycle's
//! [`CycleReport`] is published as per-conveyor status.
//!
//! # Example
//!
//! ```ignore
//! let mut runner = MqttServiceRunner::new(client, router);
//! runner.subscribe_control_topics()?;
//!
//! // In the control loop:
//! runner.poll();
//! let report = control.cycle(clock.now_ms());
//! runner.publish_report(&report)?;
//! ```

use tracing::{debug, warn};

use crate::conveyor::StatusUpdate;
use crate::error::ConveyorError;
use crate::messages::{fault_topic, status_topic, EventRouter, SUBSCRIPTIONS};
use crate::orchestrator::CycleReport;
use crate::traits::MqttClient;

// ============================================================================
// MQTT Service Runner
// ============================================================================

/// Routes inbound messages and publishes conveyor status.
pub struct MqttServiceRunner<C: MqttClient> {
    client: C,
    router: EventRouter,
}

impl<C: MqttClient> MqttServiceRunner<C> {
    /// Create a runner over a connected client.
    pub fn new(client: C, router: EventRouter) -> Self {
        Self { client, router }
    }

    /// Get a reference to the MQTT client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Get a mutable reference to the MQTT client.
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// Subscribe to every control topic.
    pub fn subscribe_control_topics(&mut self) -> Result<(), C::Error> {
        for topic in SUBSCRIPTIONS {
            self.client.subscribe(topic)?;
        }
        Ok(())
    }

    /// Drain and route every pending message. Returns how many were seen.
    pub fn poll(&mut self) -> usize {
        let mut count = 0;
        while let Some(message) = self.client.try_recv() {
            self.router.route(&message);
            count += 1;
        }
        count
    }

    /// Publish state changes and latched faults from one cycle.
    pub fn publish_report(&mut self, report: &CycleReport) -> Result<(), C::Error> {
        self.publish_states(&report.updates)?;
        for failure in &report.errors {
            if let ConveyorError::Fault(fault) = &failure.error {
                let text = fault.to_string();
                self.client.publish(&fault_topic(failure.id), text.as_bytes(), false)?;
            }
        }
        Ok(())
    }

    /// Publish the given states.
    pub fn publish_states(&mut self, updates: &[StatusUpdate]) -> Result<(), C::Error> {
        for update in updates {
            debug!(conveyor = update.id, state = %update.state, "publishing state");
            self.client
                .publish(&status_topic(update.id), update.state.as_str().as_bytes(), false)?;
        }
        Ok(())
    }

    /// Publish a report, logging instead of failing when the broker is away.
    pub fn publish_or_warn(&mut self, report: &CycleReport) {
        if report.is_empty() {
            return;
        }
        if self.publish_report(report).is_err() {
            warn!(
                updates = report.updates.len(),
                connected = self.client.is_connected(),
                "status publish failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::control_loop::ControlRequests;
    use crate::conveyor::ConveyorState;
    use crate::error::ConveyorFault;
    use crate::hal::{MockMqtt, SensorMirror};
    use crate::messages::topics;
    use crate::orchestrator::CycleError;
    use crate::safety::{PickingFlag, SafetyState};

    fn runner() -> (MqttServiceRunner<MockMqtt>, Arc<SafetyState>) {
        let safety = Arc::new(SafetyState::new());
        let router = EventRouter::new(
            Arc::clone(&safety),
            Arc::new(PickingFlag::new()),
            Arc::new(ControlRequests::new()),
            Arc::new(SensorMirror::new()),
        );
        (MqttServiceRunner::new(MockMqtt::new(), router), safety)
    }

    #[test]
    fn subscribes_every_control_topic() {
        let (mut runner, _) = runner();
        runner.subscribe_control_topics().unwrap();
        for topic in SUBSCRIPTIONS {
            assert!(runner.client().is_subscribed(topic));
        }
    }

    #[test]
    fn poll_routes_pending_messages() {
        let (mut runner, safety) = runner();
        runner.client_mut().queue_message(topics::ESTOP, "true");
        runner.client_mut().queue_message(topics::DRIVES_READY, "garbage");
        assert_eq!(runner.poll(), 2);
        assert_eq!(runner.poll(), 0);
        assert!(safety.estop());
        assert!(!safety.drives_ready());
    }

    #[test]
    fn publishes_states_and_faults() {
        let (mut runner, _) = runner();
        let report = CycleReport {
            updates: vec![StatusUpdate { id: 2, state: ConveyorState::WaitingForPick }],
            errors: vec![CycleError {
                id: 3,
                key: "pacer".into(),
                error: ConveyorFault::ImpossibleCount { id: 3, detected: 1, expected: 0 }.into(),
            }],
        };
        runner.publish_report(&report).unwrap();

        let state = runner.client().published_to("conveyors/2/state");
        assert_eq!(state.len(), 1);
        assert_eq!(state[0].1, b"WAITING_FOR_PICK".to_vec());
        assert_eq!(runner.client().published_to("conveyors/3/fault").len(), 1);
    }

    #[test]
    fn disconnected_publish_is_logged_not_fatal() {
        let (mut runner, _) = runner();
        runner.client_mut().connected = false;
        let report = CycleReport {
            updates: vec![StatusUpdate { id: 1, state: ConveyorState::Running }],
            errors: Vec::new(),
        };
        assert!(runner.publish_report(&report).is_err());
        runner.publish_or_warn(&report);
        assert!(runner.client().published.is_empty());
    }
}
