//! Client for the opaque model that produces signal price levels.

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::config::Config;
use crate::models::signal::{SignalPayload, Timeframe};
use crate::models::user::SubscriptionTier;

#[derive(Debug, Clone, Serialize)]
pub struct SignalRequest {
    pub timeframe: Timeframe,
    pub tier: SubscriptionTier,
}

pub trait SignalModel: Send + Sync {
    fn generate(
        &self,
        request: &SignalRequest,
    ) -> impl Future<Output = anyhow::Result<SignalPayload>> + Send;
}

pub struct HttpSignalModel {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpSignalModel {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        // Timeouts surface as a retryable generation failure.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.signal_model_timeout_secs))
            .build()
            .context("failed to build signal model HTTP client")?;

        Ok(Self {
            client,
            url: config.signal_model_url.clone(),
            api_key: config.signal_model_api_key.clone(),
        })
    }
}

impl SignalModel for HttpSignalModel {
    async fn generate(&self, request: &SignalRequest) -> anyhow::Result<SignalPayload> {
        let mut call = self.client.post(&self.url).json(request);
        if !self.api_key.is_empty() {
            call = call.bearer_auth(&self.api_key);
        }

        let response = call.send().await.context("signal model unreachable")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("signal model error {}: {}", status, body);
        }

        response
            .json::<SignalPayload>()
            .await
            .context("signal model returned an unreadable payload")
    }
}
