use crate::telemetry::{SinkError, TelemetrySink};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpSettings {
    pub endpoint_url: String,
    pub auth_token: Option<String>,
}

/// Posts each snapshot as JSON to `<endpoint>/<topic>`.
///
/// HTTP has no session, so the sink counts as connected until a request fails.
pub struct HttpSink {
    endpoint_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
    connected: bool,
}

impl HttpSink {
    pub fn new(settings: HttpSettings) -> Self {
        Self {
            endpoint_url: settings.endpoint_url.trim_end_matches('/').to_string(),
            auth_token: settings.auth_token,
            client: reqwest::Client::new(),
            connected: false,
        }
    }

    async fn post(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), SinkError> {
        if self.endpoint_url.is_empty() {
            return Err(SinkError::NoEndpoint);
        }
        let mut request = self
            .client
            .post(format!("{}/{}", self.endpoint_url, topic))
            .header(CONTENT_TYPE, "application/json")
            .header("x-retain", if retain { "true" } else { "false" })
            .body(payload.to_vec());
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    async fn connect(&mut self) -> bool {
        self.connected = !self.endpoint_url.is_empty();
        self.connected
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> bool {
        match self.post(topic, payload, retain).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "telemetry POST failed");
                self.connected = false;
                false
            }
        }
    }
}
