use crate::telemetry::{SinkError, TelemetrySink};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

const RECONNECT_DELAY: Duration = Duration::from_millis(2000);
const CONNECT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// How long `connect` waits for the broker to acknowledge the session.
    pub connect_timeout: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "ESP8266Client".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Publishes telemetry to an MQTT broker.
///
/// The rumqttc event loop runs in its own task and only shares the connection flag with the
/// sink. It keeps reconnecting on its own once started.
pub struct MqttSink {
    settings: MqttSettings,
    client: Option<AsyncClient>,
    connected: Arc<AtomicBool>,
    event_loop_task: Option<JoinHandle<()>>,
}

impl MqttSink {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            event_loop_task: None,
        }
    }

    fn start_event_loop(&mut self) {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options.set_keep_alive(self.settings.keep_alive);
        if let Some(username) = &self.settings.username {
            options.set_credentials(
                username.clone(),
                self.settings.password.clone().unwrap_or_default(),
            );
        }

        info!(
            host = %self.settings.host,
            port = self.settings.port,
            "starting MQTT connection"
        );
        let (client, event_loop) = AsyncClient::new(options, 16);
        let connected = self.connected.clone();
        self.event_loop_task = Some(tokio::spawn(async move {
            drive_event_loop(event_loop, connected).await;
        }));
        self.client = Some(client);
    }

    async fn send(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), SinkError> {
        let client = match &self.client {
            Some(client) if self.is_connected() => client,
            _ => return Err(SinkError::NotConnected),
        };
        client
            .publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .await?;
        Ok(())
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}

async fn drive_event_loop(mut event_loop: EventLoop, connected: Arc<AtomicBool>) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::Relaxed);
                info!("Connected to MQTT broker");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::Relaxed);
                warn!("MQTT broker closed the session");
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                connected.store(false, Ordering::Relaxed);
                warn!(?code, "MQTT broker refused connection");
                sleep(RECONNECT_DELAY).await;
            }
            Err(e) => {
                connected.store(false, Ordering::Relaxed);
                warn!(error = %e, "MQTT connection to broker failed");
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl TelemetrySink for MqttSink {
    async fn connect(&mut self) -> bool {
        if self.client.is_none() {
            self.start_event_loop();
        }

        let connected = self.connected.clone();
        timeout(self.settings.connect_timeout, async move {
            while !connected.load(Ordering::Relaxed) {
                sleep(CONNECT_POLL).await;
            }
        })
        .await
        .is_ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool {
        match self.send(topic, payload, retain).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "MQTT publish failed");
                false
            }
        }
    }
}
