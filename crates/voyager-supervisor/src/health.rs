//! Readiness probe for the daemon's local REST server

use async_trait::async_trait;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` once the daemon answers
    async fn is_healthy(&self) -> bool;
}

/// Lists keys through the daemon's REST API; any 2xx answer counts as healthy
pub struct LcdKeysProbe {
    client: reqwest::Client,
    url: String,
}

impl LcdKeysProbe {
    pub fn new(lcd_url: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: format!("{}/keys", lcd_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl HealthProbe for LcdKeysProbe {
    async fn is_healthy(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
