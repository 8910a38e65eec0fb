//! Post-launch liveness polling.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::LivenessSettings;

/// Upper bound for a single probe request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LivenessError {
    #[error("{url} never came up after {attempts} attempts")]
    Timeout { url: String, attempts: u32 },

    #[error("failed to build probe client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Waits until a freshly started instance answers.
#[async_trait]
pub trait Liveness: Send + Sync {
    /// Returns the number of attempts it took.
    async fn wait_up(&self, url: &str) -> Result<u32, LivenessError>;
}

/// Plain HTTP GET polling; any response counts as up.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    max_attempts: u32,
    interval: Duration,
}

impl HttpProbe {
    pub fn new(max_attempts: u32, interval: Duration) -> Result<Self, LivenessError> {
        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            client,
            max_attempts: max_attempts.max(1),
            interval,
        })
    }

    pub fn from_settings(settings: &LivenessSettings) -> Result<Self, LivenessError> {
        Self::new(
            settings.max_attempts,
            Duration::from_millis(settings.interval_ms),
        )
    }
}

#[async_trait]
impl Liveness for HttpProbe {
    async fn wait_up(&self, url: &str) -> Result<u32, LivenessError> {
        info!(url = url, max_attempts = self.max_attempts, "Waiting for instance");

        for attempt in 1..=self.max_attempts {
            match self.client.get(url).send().await {
                Ok(response) => {
                    info!(url = url, attempt, status = %response.status(), "Instance is up");
                    return Ok(attempt);
                }
                Err(e) => {
                    debug!(url = url, attempt, error = %e, "Instance not answering yet");
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        Err(LivenessError::Timeout {
            url: url.to_string(),
            attempts: self.max_attempts,
        })
    }
}
