//! Generation engine client.

use std::time::Duration;

use anyhow::{Context, bail};
use genworker_http::{HttpChannel, HttpRequest};
use genworker_protocol::{EngineResult, EngineSubmission};
use serde_json::Value;
use tracing::{debug, info};

pub struct EngineClient<C> {
    channel: C,
    prompt_url: String,
    timeout: Duration,
}

impl<C: HttpChannel> EngineClient<C> {
    pub fn new(channel: C, prompt_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            channel,
            prompt_url: prompt_url.into(),
            timeout,
        }
    }

    /// Submits a job spec and waits for the engine to finish it.
    ///
    /// A response without an `images` field is rejected; an empty list is
    /// accepted.
    pub async fn submit(&self, prompt: Value) -> anyhow::Result<EngineResult> {
        let submission = EngineSubmission {
            prompt,
            client_id: uuid::Uuid::new_v4().to_string(),
        };
        debug!(client_id = %submission.client_id, url = %self.prompt_url, "submitting job");

        let request = HttpRequest::post(&self.prompt_url)
            .json(serde_json::to_value(&submission)?)
            .timeout(self.timeout);
        let resp = self
            .channel
            .send(request)
            .await
            .context("engine request failed")?;
        if resp.class().is_some() {
            bail!("engine returned HTTP {}: {}", resp.status, resp.snippet());
        }

        let body: Value = resp.json().context("engine response is not JSON")?;
        if body.get("images").is_none() {
            bail!("engine response has no images field: {}", resp.snippet());
        }
        let result: EngineResult =
            serde_json::from_value(body).context("unexpected engine response")?;
        info!(job_id = %result.id, images = result.images.len(), "engine job finished");
        Ok(result)
    }
}
