use crate::state::MeterState;
use async_trait::async_trait;
use serde_derive::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

pub const DEFAULT_TOPIC: &str = "espferraris1/status";

/// Telemetry payload. Field order is part of the wire format.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub start_timestamp: i64,
    pub update_timestamp: i64,
    #[serde(rename = "treshholdValue")]
    pub threshold_value: f64,
    pub updates_total: u64,
    pub updates_today: u64,
    pub power_consumption_total: f64,
    pub power_consumption_today: f64,
    pub curr_power: f64,
}

impl Snapshot {
    /// Captures the state right after a rotation has been recorded.
    pub fn capture(state: &MeterState, threshold_value: f64) -> Self {
        Self {
            start_timestamp: state.start_timestamp(),
            update_timestamp: state.last_rotation_timestamp(),
            threshold_value,
            updates_total: state.total_rounds(),
            updates_today: state.day_rounds(),
            power_consumption_total: state.total_consumption_kwh(),
            power_consumption_today: state.day_consumption_kwh(),
            curr_power: state.current_power_watts(),
        }
    }
}

/// Transport failure below the `TelemetrySink` boolean surface.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("no telemetry endpoint configured")]
    NoEndpoint,
    #[error("sink is not connected")]
    NotConnected,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
}

/// Transport that delivers telemetry to the remote collector.
#[async_trait]
pub trait TelemetrySink: Send {
    /// Attempts to establish the connection. Returns whether the sink is usable.
    async fn connect(&mut self) -> bool;
    fn is_connected(&self) -> bool;
    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool;
}

#[async_trait]
impl<S: TelemetrySink + ?Sized> TelemetrySink for Box<S> {
    async fn connect(&mut self) -> bool {
        (**self).connect().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool {
        (**self).publish(topic, payload, retain).await
    }
}

/// Bounds how long a single publish may hold up the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherSettings {
    pub topic: String,
    pub retain: bool,
    pub retry: RetryPolicy,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            retain: true,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered { attempts: u32 },
    /// Every attempt failed, the snapshot was discarded.
    Dropped,
}

/// Builds snapshots and hands them to the sink with bounded retries.
pub struct TelemetryPublisher<S> {
    sink: S,
    settings: PublisherSettings,
    sink_down: bool,
}

impl<S: TelemetrySink> TelemetryPublisher<S> {
    pub fn new(sink: S, settings: PublisherSettings) -> Self {
        Self {
            sink,
            settings,
            sink_down: false,
        }
    }

    /// True when the most recent publish exhausted its attempts.
    pub fn sink_down(&self) -> bool {
        self.sink_down
    }

    #[cfg(test)]
    pub(crate) fn sink(&self) -> &S {
        &self.sink
    }

    /// Connects the sink ahead of the first publish. A failure is logged and left to the
    /// retries of the next publish.
    pub async fn connect(&mut self) -> bool {
        let connected = self.sink.is_connected() || self.sink.connect().await;
        if connected {
            info!("telemetry sink connected");
        } else {
            warn!("telemetry sink not reachable at startup");
        }
        connected
    }

    pub async fn publish(&mut self, state: &MeterState, threshold_value: f64) -> PublishOutcome {
        let snapshot = Snapshot::capture(state, threshold_value);
        self.publish_snapshot(&snapshot).await
    }

    pub async fn publish_snapshot(&mut self, snapshot: &Snapshot) -> PublishOutcome {
        let payload = match serde_json::to_vec(snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "cannot serialize snapshot");
                return PublishOutcome::Dropped;
            }
        };

        let max_attempts = self.settings.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if !self.sink.is_connected() && !self.sink.connect().await {
                warn!(attempt, max_attempts, "telemetry sink not connected");
            } else if self
                .sink
                .publish(&self.settings.topic, &payload, self.settings.retain)
                .await
            {
                self.sink_down = false;
                info!(
                    topic = %self.settings.topic,
                    payload = %String::from_utf8_lossy(&payload),
                    "snapshot published"
                );
                return PublishOutcome::Delivered { attempts: attempt };
            } else {
                warn!(attempt, max_attempts, "error publishing snapshot");
            }

            if attempt < max_attempts {
                sleep(self.settings.retry.retry_delay).await;
            }
        }

        self.sink_down = true;
        error!(
            max_attempts,
            updates_total = snapshot.updates_total,
            "telemetry sink unreachable, snapshot dropped"
        );
        PublishOutcome::Dropped
    }
}
