//! rumqttc-backed [`MqttClient`] and the tokio control task.
//!
//! **Subscribe Topics:** see [`SUBSCRIPTIONS`](crate::messages::SUBSCRIPTIONS).
//!
//! **Publish Topics:**
//! - `conveyors/{id}/state` - state name on every change
//! - `conveyors/{id}/fault` - fault text when a conveyor latches a fault
//!
//! The rumqttc event loop runs on its own task and forwards publishes into a
//! channel; the control task drains that channel at the start of every
//! cycle, so the sync-first [`MqttClient`] contract holds.
//!
//! ```ignore
//! let (client, _events) = RumqttClient::connect(&MqttRuntimeConfig::new("broker", 1883));
//! let runner = MqttServiceRunner::new(client, router);
//! run_control(control, runner, SystemClock::new()).await;
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::control_loop::ControlLoop;
use crate::traits::{Clock, HardwareRegistry, MqttClient, MqttMessage};

use super::mqtt_runner::MqttServiceRunner;

// ============================================================================
// Configuration
// ============================================================================

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttRuntimeConfig {
    /// MQTT broker hostname
    pub host: String,
    /// MQTT broker port
    pub port: u16,
    /// Client ID
    pub client_id: String,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u16,
    /// Delay before retrying after a connection error
    pub retry_ms: u64,
}

impl Default for MqttRuntimeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "conveyor-fsm".to_string(),
            keep_alive_secs: 30,
            retry_ms: 5_000,
        }
    }
}

impl MqttRuntimeConfig {
    /// Create a new config with the given broker address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the client ID
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(u64::from(self.keep_alive_secs)));
        options
    }
}

/// MQTT-related errors
#[derive(Debug, Error)]
pub enum MqttError {
    /// The request could not be queued to the event loop.
    #[error("mqtt request failed: {0}")]
    Client(#[from] ClientError),
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Topics the client wants, plus whether the session is up.
///
/// Both live under one lock so a topic registered while a ConnAck is being
/// handled is sent exactly once: either by the ConnAck handler or by the
/// registering call.
#[derive(Debug, Default)]
struct Subscriptions {
    topics: Vec<String>,
    connected: bool,
}

impl Subscriptions {
    /// Record `topic`. True if it must be sent now, because the session is
    /// already up; otherwise the next ConnAck sends it.
    fn register(&mut self, topic: &str) -> bool {
        if !self.topics.iter().any(|t| t == topic) {
            self.topics.push(topic.to_string());
        }
        self.connected
    }

    /// Session established. Returns every topic to (re)subscribe.
    fn connected(&mut self) -> Vec<String> {
        self.connected = true;
        self.topics.clone()
    }

    fn disconnected(&mut self) {
        self.connected = false;
    }
}

type SharedSubscriptions = Arc<Mutex<Subscriptions>>;

fn lock(subscriptions: &SharedSubscriptions) -> MutexGuard<'_, Subscriptions> {
    subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Client
// ============================================================================

/// Non-blocking MQTT client over rumqttc.
pub struct RumqttClient {
    client: AsyncClient,
    incoming: mpsc::UnboundedReceiver<MqttMessage>,
    subscriptions: SharedSubscriptions,
}

impl RumqttClient {
    /// Create the client and spawn its event loop on the current tokio
    /// runtime. Subscriptions are sent on every ConnAck.
    pub fn connect(config: &MqttRuntimeConfig) -> (Self, JoinHandle<()>) {
        let (client, eventloop) = AsyncClient::new(config.options(), 64);
        let (tx, incoming) = mpsc::unbounded_channel();
        let subscriptions = SharedSubscriptions::default();

        let task = tokio::spawn(drive_event_loop(
            eventloop,
            client.clone(),
            tx,
            Arc::clone(&subscriptions),
            Duration::from_millis(config.retry_ms),
        ));
        info!(host = %config.host, port = config.port, "mqtt client started");

        (
            Self {
                client,
                incoming,
                subscriptions,
            },
            task,
        )
    }
}

impl MqttClient for RumqttClient {
    type Error = MqttError;

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), MqttError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())?;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        let mut subscriptions = lock(&self.subscriptions);
        if subscriptions.register(topic) {
            self.client.try_subscribe(topic, QoS::AtLeastOnce)?;
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Option<MqttMessage> {
        self.incoming.try_recv().ok()
    }

    fn is_connected(&self) -> bool {
        lock(&self.subscriptions).connected
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    tx: mpsc::UnboundedSender<MqttMessage>,
    subscriptions: SharedSubscriptions,
    retry: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = MqttMessage::new(publish.topic, publish.payload.to_vec());
                if tx.send(message).is_err() {
                    // Client dropped.
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                let topics = lock(&subscriptions).connected();
                for topic in topics {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        warn!(%topic, error = %e, "subscribe failed");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                lock(&subscriptions).disconnected();
                warn!(error = %e, "mqtt connection error, retrying");
                tokio::time::sleep(retry).await;
            }
        }
    }
}

// ============================================================================
// Control Task
// ============================================================================

/// Run the control loop until Ctrl-C, then stop the line.
///
/// Each tick drains inbound messages, runs one cycle and publishes the
/// resulting status. The tick period follows `control.cycle_ms` of the
/// installed configuration.
pub async fn run_control<H, C, K>(
    mut control: ControlLoop<H>,
    mut runner: MqttServiceRunner<C>,
    clock: K,
) where
    H: HardwareRegistry,
    C: MqttClient,
    K: Clock,
{
    // Registers the topics; the client sends them once the broker acks.
    if runner.subscribe_control_topics().is_err() {
        warn!("subscribe failed");
    }

    let mut period = control.cycle_ms().max(1);
    let mut interval = tokio::time::interval(Duration::from_millis(period));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                runner.poll();
                let report = control.cycle(clock.now_ms());
                runner.publish_or_warn(&report);

                let wanted = control.cycle_ms().max(1);
                if wanted != period {
                    info!(cycle_ms = wanted, "cycle period changed");
                    period = wanted;
                    interval = tokio::time::interval(Duration::from_millis(period));
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                let report = control.stop_line(clock.now_ms());
                runner.publish_or_warn(&report);
                break;
            }
        }
    }
}
