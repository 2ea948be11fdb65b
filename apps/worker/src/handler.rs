//! Task handlers: one flow per task type.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, anyhow, bail};
use genworker_artifacts::{ArtifactWatcher, FfprobeValidator, LocalFs, stage_artifact};
use genworker_assemble::{FfmpegTool, MediaAssembler, MergeStrategy};
use genworker_fetch::{DependencyInstaller, FetchPool};
use genworker_http::{ChannelError, HttpChannel};
use genworker_protocol::{Dependency, EngineImage, EngineResult, ResourceId, Task};
use genworker_transfer::{FinalizedUpload, TransferClient};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::config::Config;
use crate::engine::EngineClient;
use crate::template;

/// Task types the worker knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Image,
    WanVideo,
    UpscaleVideo,
}

impl TaskKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "lora_image" | "frame_image" | "other" => Some(Self::Image),
            "wan_video" => Some(Self::WanVideo),
            "upscale_video" => Some(Self::UpscaleVideo),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::WanVideo => "wan",
            Self::UpscaleVideo => "upscale",
        }
    }

    /// Progress stage reported when the task starts.
    pub fn started_stage(&self) -> String {
        format!("{}_started", self.label())
    }

    /// Progress stage reported when the task fails.
    pub fn failed_stage(&self) -> String {
        format!("{}_failed", self.label())
    }
}

/// Output locations and selector templates.
#[derive(Debug, Clone)]
struct Layout {
    workflows_dir: PathBuf,
    staging_dir: PathBuf,
    output_dir: PathBuf,
    video_prefix: String,
    video_selectors: Vec<String>,
    segment_selector: String,
    merged_output: String,
}

impl Layout {
    fn render(&self, template: &str, job_id: &str) -> String {
        let output_dir = self.output_dir.to_string_lossy();
        let vars = [
            ("output_dir", output_dir.as_ref()),
            ("prefix", self.video_prefix.as_str()),
            ("job_id", job_id),
        ];
        render_template(template, &vars)
    }
}

/// Runs one task end to end and returns its payload update.
pub struct TaskHandler<C, F> {
    engine: EngineClient<C>,
    uploads: TransferClient<C>,
    installer: DependencyInstaller<F>,
    video_watcher: ArtifactWatcher<LocalFs, FfprobeValidator>,
    segment_watcher: ArtifactWatcher<LocalFs, FfprobeValidator>,
    assembler: MediaAssembler<FfmpegTool, FfprobeValidator>,
    layout: Layout,
}

impl<C, F, D> TaskHandler<C, F>
where
    C: HttpChannel + Clone,
    F: Fn() -> Result<D, ChannelError> + Send + Sync + 'static,
    D: HttpChannel + 'static,
{
    /// `channel` serves the engine and uploads; `connect` opens one channel
    /// per dependency download worker.
    pub fn new(config: &Config, channel: C, connect: F) -> Self {
        let validator = FfprobeValidator::new(&config.tools.ffprobe);
        Self {
            engine: EngineClient::new(
                channel.clone(),
                config.prompt_url(),
                config.engine_timeout(),
            ),
            uploads: TransferClient::new(
                channel,
                config.upload_endpoints(),
                config.api_token.clone(),
                config.transfer_config(),
            ),
            installer: DependencyInstaller::new(
                FetchPool::new(connect, config.fetch_backoff()),
                config.installer_config(),
            ),
            video_watcher: ArtifactWatcher::new(LocalFs, validator.clone(), config.video_watch()),
            segment_watcher: ArtifactWatcher::new(
                LocalFs,
                validator.clone(),
                config.segment_watch(),
            ),
            assembler: MediaAssembler::new(
                FfmpegTool::new(&config.tools.ffmpeg),
                validator,
                config.assemble_config(),
            ),
            layout: Layout {
                workflows_dir: config.workflows_dir.clone(),
                staging_dir: config.staging_dir.clone(),
                output_dir: config.output_dir.clone(),
                video_prefix: config.video.prefix.clone(),
                video_selectors: config.video.selectors.clone(),
                segment_selector: config.upscale.segment_selector.clone(),
                merged_output: config.upscale.merged_output.clone(),
            },
        }
    }

    pub async fn handle(&self, task: &Task, kind: TaskKind) -> anyhow::Result<Value> {
        let payload = task.payload();
        self.install_dependencies(&payload).await?;

        match kind {
            TaskKind::Image => self.run_image(task, &payload).await,
            TaskKind::WanVideo => self.run_wan(task, &payload).await,
            TaskKind::UpscaleVideo => self.run_upscale(task, &payload).await,
        }
    }

    async fn install_dependencies(&self, payload: &Map<String, Value>) -> anyhow::Result<()> {
        let Some(list) = payload.get("dependency") else {
            return Ok(());
        };
        let dependencies = parse_dependencies(list)?;
        if dependencies.is_empty() {
            return Ok(());
        }
        let installed = self
            .installer
            .install(&dependencies)
            .await
            .context("dependency install failed")?;
        info!(files = installed.len(), "dependencies ready");
        Ok(())
    }

    async fn submit(
        &self,
        task: &Task,
        payload: &Map<String, Value>,
    ) -> anyhow::Result<EngineResult> {
        let spec =
            template::build_job_spec(&self.layout.workflows_dir, &task.workflow_key, payload)
                .await?;
        self.engine
            .submit(spec)
            .await
            .with_context(|| format!("engine job for workflow {} failed", task.workflow_key))
    }

    async fn run_image(&self, task: &Task, payload: &Map<String, Value>) -> anyhow::Result<Value> {
        let result = self.submit(task, payload).await?;
        let image = result
            .images
            .first()
            .ok_or_else(|| anyhow!("engine job {} returned no images", result.id))?;
        let bytes = image
            .decode()
            .ok_or_else(|| anyhow!("first image carries no data"))?
            .context("image is not valid base64")?;

        let dir = &self.layout.staging_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
        let local = dir.join(image_file_name(&result.id, image));
        tokio::fs::write(&local, &bytes)
            .await
            .with_context(|| format!("writing {}", local.display()))?;
        info!(task_id = %task.id, path = %local.display(), bytes = bytes.len(), "image staged");

        let result_path = self
            .uploads
            .upload_whole(&local, &task.id)
            .await
            .context("image upload failed")?;
        Ok(json!({
            "result_path": result_path,
            "comfy_id": result.id,
        }))
    }

    async fn run_wan(&self, task: &Task, payload: &Map<String, Value>) -> anyhow::Result<Value> {
        let started = SystemTime::now();
        let result = self.submit(task, payload).await?;

        let selectors: Vec<String> = self
            .layout
            .video_selectors
            .iter()
            .map(|s| self.layout.render(s, &result.id))
            .collect();
        let artifact = self
            .video_watcher
            .wait_newest(&selectors, started)
            .await
            .context("video output never became ready")?;

        let stamp = started
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let name = format!("wan_{stamp}.{}", extension_or(&artifact.path, "mp4"));
        let staged = stage_artifact(&artifact.path, &self.layout.staging_dir, &name)
            .await
            .context("staging video")?;
        let upload = self.upload_video(task, &staged).await?;

        Ok(json!({
            "note": "wan video ready",
            "comfy_id": result.id,
            "stats": result.stats,
            "video_comfy_output": artifact.path.display().to_string(),
            "video_local": staged.display().to_string(),
            "result_path": upload.path,
            "size": upload.size,
            "sha256": upload.sha256,
        }))
    }

    async fn run_upscale(
        &self,
        task: &Task,
        payload: &Map<String, Value>,
    ) -> anyhow::Result<Value> {
        let result = self.submit(task, payload).await?;
        if result.id.is_empty() {
            bail!("engine returned no job id, cannot locate segments");
        }

        let selector = self.layout.render(&self.layout.segment_selector, &result.id);
        let segments: Vec<PathBuf> = self
            .segment_watcher
            .wait_set(&selector)
            .await
            .context("upscaled segments never became ready")?
            .into_iter()
            .map(|c| c.path)
            .collect();

        let target = PathBuf::from(self.layout.render(&self.layout.merged_output, &result.id));
        let merged = self
            .assembler
            .merge(&segments, &target)
            .await
            .with_context(|| format!("merging {} segments", segments.len()))?;

        let name = format!("upscale_{}.mp4", short_id(&result.id));
        let staged = stage_artifact(&merged.path, &self.layout.staging_dir, &name)
            .await
            .context("staging merged video")?;
        let upload = self.upload_video(task, &staged).await?;

        Ok(json!({
            "note": "upscaled video ready",
            "comfy_id": result.id,
            "stats": result.stats,
            "video_comfy_output": merged.path.display().to_string(),
            "video_local": staged.display().to_string(),
            "video_segments": segments.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            "segments_count": merged.segments,
            "merge_strategy": strategy_label(merged.strategy),
            "result_path": upload.path,
            "size": upload.size,
            "sha256": upload.sha256,
        }))
    }

    async fn upload_video(&self, task: &Task, path: &Path) -> anyhow::Result<FinalizedUpload> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("staged file has no name: {}", path.display()))?;
        self.uploads
            .transfer_one(path, ResourceId::new(task.id.as_str(), file_name))
            .await
            .with_context(|| format!("uploading {}", path.display()))
    }
}

/// Keeps well-formed entries of a `dependency` list.
/// Parses the payload's `dependency` field. `null` means none; any entry
/// that does not parse fails the whole list.
fn parse_dependencies(list: &Value) -> anyhow::Result<Vec<Dependency>> {
    let entries = match list {
        Value::Null => return Ok(Vec::new()),
        Value::Array(entries) => entries,
        other => bail!("dependency field must be a list, got {other}"),
    };
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_value(entry.clone())
                .with_context(|| format!("dependency #{index} is malformed: {entry}"))
        })
        .collect()
}

/// Replaces `{name}` placeholders.
fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}

/// First eight safe characters of an engine job id.
fn short_id(id: &str) -> String {
    let short: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(8)
        .collect();
    if short.is_empty() { "job".into() } else { short }
}

fn image_file_name(job_id: &str, image: &EngineImage) -> String {
    let ext = image
        .filename()
        .map(|f| extension_or(Path::new(f), "png"))
        .unwrap_or_else(|| "png".into());
    format!("image_{}.{ext}", short_id(job_id))
}

fn extension_or(path: &Path, fallback: &str) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| fallback.to_string())
}

fn strategy_label(strategy: MergeStrategy) -> &'static str {
    match strategy {
        MergeStrategy::Single => "single",
        MergeStrategy::FastConcat => "fast_concat",
        MergeStrategy::ReEncode => "re_encode",
    }
}
