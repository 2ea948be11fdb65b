//! Job-queue client.
//!
//! Every call is a single best-effort attempt: failures are logged and
//! reported as "no task" or silently dropped, and the main loop carries on.

use std::time::Duration;

use anyhow::{Context, bail};
use genworker_http::{HttpChannel, HttpRequest};
use genworker_protocol::{GetTaskResponse, Task, TaskUpdate};
use tracing::{debug, warn};

pub struct QueueClient<C> {
    channel: C,
    get_task_url: String,
    update_task_url: String,
    token: String,
    timeout: Duration,
}

impl<C: HttpChannel> QueueClient<C> {
    pub fn new(
        channel: C,
        get_task_url: impl Into<String>,
        update_task_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            channel,
            get_task_url: get_task_url.into(),
            update_task_url: update_task_url.into(),
            token: token.into(),
            timeout,
        }
    }

    /// Asks the backend for the next task. `None` when there is no work or
    /// the poll failed.
    pub async fn next_task(&self) -> Option<Task> {
        match self.poll().await {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "task poll failed");
                None
            }
        }
    }

    async fn poll(&self) -> anyhow::Result<Option<Task>> {
        let request = HttpRequest::post(&self.get_task_url)
            .form(vec![("token".into(), self.token.clone())])
            .timeout(self.timeout);
        let resp = self.channel.send(request).await.context("queue unreachable")?;
        if resp.class().is_some() {
            bail!("queue returned HTTP {}: {}", resp.status, resp.snippet());
        }
        let body: GetTaskResponse = resp.json().context("unexpected queue response")?;
        Ok(body.into_task())
    }

    /// Reports task progress. Failures are logged only.
    pub async fn update_task(&self, update: TaskUpdate) {
        let mut fields = vec![("token".to_string(), self.token.clone())];
        fields.extend(update.form_fields());
        let request = HttpRequest::post(&self.update_task_url)
            .form(fields)
            .timeout(self.timeout);

        match self.channel.send(request).await {
            Ok(resp) if resp.class().is_none() => {
                debug!(task_id = %update.id, status = update.status.as_str(), "task updated");
            }
            Ok(resp) => warn!(
                task_id = %update.id,
                status = resp.status,
                body = %resp.snippet(),
                "task update rejected"
            ),
            Err(e) => warn!(task_id = %update.id, error = %e, "task update failed"),
        }
    }
}
