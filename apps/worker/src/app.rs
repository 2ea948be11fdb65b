//! Main worker loop.

use std::sync::Arc;
use std::time::Duration;

use genworker_http::{ChannelError, HttpChannel, ReqwestChannel};
use genworker_protocol::{Task, TaskStatus, TaskUpdate};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::handler::{TaskHandler, TaskKind};
use crate::queue::QueueClient;

/// Pause between two tasks.
const AFTER_TASK_PAUSE: Duration = Duration::from_secs(1);

/// Runs the worker until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let channel_config = config.channel_config();
    let channel = Arc::new(ReqwestChannel::new(&channel_config)?);

    let queue = QueueClient::new(
        Arc::clone(&channel),
        config.url(&config.routes.get_task),
        config.url(&config.routes.update_task),
        config.api_token.clone(),
        config.queue_timeout(),
    );
    let connect = move || ReqwestChannel::new(&channel_config);
    let handler = TaskHandler::new(&config, Arc::clone(&channel), connect);

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("SIGINT received, finishing current work");
            signal.cancel();
        }
    });

    tracing::info!(name = %config.name, poll = ?config.poll_interval(), "worker ready");
    serve(&queue, &handler, config.poll_interval(), &cancel).await;
    tracing::info!("worker loop stopped");
    Ok(())
}

/// Polls and handles tasks one at a time until `cancel` fires.
///
/// A task in progress always runs to completion and is reported.
async fn serve<Q, C, F, D>(
    queue: &QueueClient<Q>,
    handler: &TaskHandler<C, F>,
    poll_interval: Duration,
    cancel: &CancellationToken,
) where
    Q: HttpChannel,
    C: HttpChannel + Clone,
    F: Fn() -> Result<D, ChannelError> + Send + Sync + 'static,
    D: HttpChannel + 'static,
{
    while !cancel.is_cancelled() {
        let task = tokio::select! {
            _ = cancel.cancelled() => break,
            task = queue.next_task() => task,
        };

        let pause = match task {
            Some(task) => {
                process(queue, handler, task).await;
                AFTER_TASK_PAUSE
            }
            None => poll_interval,
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

async fn process<Q, C, F, D>(queue: &QueueClient<Q>, handler: &TaskHandler<C, F>, task: Task)
where
    Q: HttpChannel,
    C: HttpChannel + Clone,
    F: Fn() -> Result<D, ChannelError> + Send + Sync + 'static,
    D: HttpChannel + 'static,
{
    tracing::info!(
        task_id = %task.id,
        kind = %task.kind,
        workflow = %task.workflow_key,
        "task received"
    );

    let Some(kind) = TaskKind::parse(&task.kind) else {
        tracing::error!(task_id = %task.id, kind = %task.kind, "unknown task type");
        let update = TaskUpdate::new(task.id.as_str(), TaskStatus::Failed)
            .with_error(format!("unknown task type: {}", task.kind));
        queue.update_task(update).await;
        return;
    };

    queue
        .update_task(
            TaskUpdate::new(task.id.as_str(), TaskStatus::Running)
                .with_payload(json!({"stage": kind.started_stage()})),
        )
        .await;

    match handler.handle(&task, kind).await {
        Ok(payload) => {
            tracing::info!(task_id = %task.id, "task done");
            queue
                .update_task(TaskUpdate::new(task.id.as_str(), TaskStatus::Done).with_payload(payload))
                .await;
        }
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!(task_id = %task.id, error = %message, "task failed");
            queue
                .update_task(
                    TaskUpdate::new(task.id.as_str(), TaskStatus::Failed)
                        .with_error(message)
                        .with_payload(json!({"stage": kind.failed_stage()})),
                )
                .await;
        }
    }
}
