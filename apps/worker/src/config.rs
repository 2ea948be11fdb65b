//! Worker configuration.
//!
//! Configuration is stored as TOML at `$GENWORKER_CONFIG` or
//! `~/.config/genworker/worker.toml`. A missing file yields defaults.
//! Durations are given in seconds (`*_secs`, fractions allowed).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use genworker_artifacts::WatchConfig;
use genworker_assemble::AssembleConfig;
use genworker_fetch::InstallerConfig;
use genworker_http::{ChannelConfig, RetryPolicy};
use genworker_transfer::{DEFAULT_CHUNK_SIZE, TransferConfig, UploadEndpoints};
use serde::{Deserialize, Serialize};

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name reported in logs and the user agent (hostname by default).
    #[serde(default = "default_name")]
    pub name: String,

    /// Base URL every backend route is resolved against.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default)]
    pub api_token: String,

    /// Generation engine base URL.
    #[serde(default = "default_engine_url")]
    pub engine_url: String,

    /// Bearer token for `civitai` dependency downloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,

    /// Idle wait between queue polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,

    /// Timeout for one queue call.
    #[serde(default = "default_queue_timeout")]
    pub queue_timeout_secs: f64,

    /// Timeout for one engine submission, generation included.
    #[serde(default = "default_engine_timeout")]
    pub engine_timeout_secs: f64,

    /// Directory holding `<workflow_key>.json` templates.
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: PathBuf,

    /// Local copies of results are placed here before upload.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Engine install root; dependencies land under its `models/` tree.
    #[serde(default = "default_engine_root")]
    pub engine_root: PathBuf,

    /// Where the engine writes its outputs.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub routes: Routes,

    #[serde(default)]
    pub upload: UploadSection,

    #[serde(default)]
    pub fetch: FetchSection,

    #[serde(default)]
    pub video: VideoSection,

    #[serde(default)]
    pub upscale: UpscaleSection,

    #[serde(default)]
    pub tools: ToolsSection,
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "genworker".into())
}

fn default_api_base() -> String {
    "http://127.0.0.1/".into()
}

fn default_engine_url() -> String {
    "http://127.0.0.1:3000".into()
}

fn default_poll_interval() -> f64 {
    5.0
}

fn default_queue_timeout() -> f64 {
    15.0
}

fn default_engine_timeout() -> f64 {
    7200.0
}

fn default_workflows_dir() -> PathBuf {
    "/opt/comfy_workflows".into()
}

fn default_staging_dir() -> PathBuf {
    "/tmp/genworker".into()
}

fn default_engine_root() -> PathBuf {
    "/opt/ComfyUI".into()
}

fn default_output_dir() -> PathBuf {
    "/opt/ComfyUI/output".into()
}

/// Backend routes, relative to `api_base`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Routes {
    pub get_task: String,
    pub update_task: String,
    pub upload_image: String,
    pub upload_init: String,
    pub upload_chunk: String,
    pub upload_final: String,
    pub download_file: String,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            get_task: "index.php?r=worker/getTask".into(),
            update_task: "index.php?r=worker/updateTask".into(),
            upload_image: "index.php?r=worker/uploadImage".into(),
            upload_init: "index.php?r=chunkUpload/uploadInit".into(),
            upload_chunk: "index.php?r=chunkUpload/uploadChunk".into(),
            upload_final: "index.php?r=chunkUpload/uploadFinal".into(),
            download_file: "index.php?r=worker/getFile".into(),
        }
    }
}

/// Backoff settings shared by the upload and fetch sections.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    pub jitter_secs: f64,
}

impl Backoff {
    fn from_policy(policy: RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            base_delay_secs: policy.base_delay.as_secs_f64(),
            max_delay_secs: policy.max_delay.as_secs_f64(),
            jitter_secs: policy.jitter.as_secs_f64(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: secs(self.base_delay_secs),
            max_delay: secs(self.max_delay_secs),
            jitter: secs(self.jitter_secs),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_policy(RetryPolicy::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub chunk_size: usize,
    pub max_offset_conflicts: u32,
    /// Bound on one chunked upload; 0 waits indefinitely.
    pub total_timeout_secs: f64,
    pub init_timeout_secs: f64,
    pub chunk_timeout_secs: f64,
    pub finalize_timeout_secs: f64,
    pub retry: Backoff,
}

impl Default for UploadSection {
    fn default() -> Self {
        let base = TransferConfig::default();
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_offset_conflicts: base.max_offset_conflicts,
            total_timeout_secs: 0.0,
            init_timeout_secs: base.init_timeout.as_secs_f64(),
            chunk_timeout_secs: base.chunk_timeout.as_secs_f64(),
            finalize_timeout_secs: base.finalize_timeout.as_secs_f64(),
            retry: Backoff::from_policy(base.retry),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub max_workers: usize,
    /// Files already present at or above this size are reused.
    pub min_existing_size: u64,
    pub request_timeout_secs: f64,
    /// Bound on installing one task's dependencies; 0 waits indefinitely.
    pub total_timeout_secs: f64,
    pub retry: Backoff,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            max_workers: genworker_fetch::DEFAULT_MAX_WORKERS,
            min_existing_size: 1024,
            request_timeout_secs: 600.0,
            total_timeout_secs: 3600.0,
            retry: Backoff {
                max_attempts: genworker_fetch::DEFAULT_MAX_ATTEMPTS,
                ..Backoff::from_policy(RetryPolicy::download())
            },
        }
    }
}

/// Single-output video jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSection {
    /// Substituted for `{prefix}` in the selectors.
    pub prefix: String,
    /// Glob templates over `{output_dir}` and `{prefix}`.
    pub selectors: Vec<String>,
    pub poll_secs: f64,
    pub settle_secs: f64,
    pub min_size: u64,
    pub timeout_secs: f64,
    pub mtime_slack_secs: f64,
    pub validate_extensions: Vec<String>,
}

impl Default for VideoSection {
    fn default() -> Self {
        let watch = WatchConfig::single_output();
        Self {
            prefix: "ComfyUI".into(),
            selectors: ["mp4", "webm", "mov", "mkv", "gif"]
                .iter()
                .map(|ext| format!("{{output_dir}}/video/{{prefix}}*.{ext}"))
                .collect(),
            poll_secs: watch.poll_interval.as_secs_f64(),
            settle_secs: watch.settle_interval.as_secs_f64(),
            min_size: watch.min_size,
            timeout_secs: watch.timeout.as_secs_f64(),
            mtime_slack_secs: watch.mtime_slack.as_secs_f64(),
            validate_extensions: watch.validate_extensions,
        }
    }
}

/// Segmented upscale jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleSection {
    /// Glob template over `{output_dir}` and `{job_id}`.
    pub segment_selector: String,
    /// Merge destination, same placeholders as the selector. Must not match
    /// the selector, or a re-run would pick up the merge as a segment.
    pub merged_output: String,
    pub poll_secs: f64,
    pub settle_secs: f64,
    pub min_size: u64,
    pub timeout_secs: f64,
    pub validate_extensions: Vec<String>,
    pub min_merged_size: u64,
    pub crf: u8,
    pub video_codec: String,
    pub pix_fmt: String,
}

impl Default for UpscaleSection {
    fn default() -> Self {
        let watch = WatchConfig::segments();
        let assemble = AssembleConfig::default();
        Self {
            segment_selector: "{output_dir}/{job_id}_video/*.mp4".into(),
            merged_output: "{output_dir}/{job_id}_merged.mp4".into(),
            poll_secs: watch.poll_interval.as_secs_f64(),
            settle_secs: watch.settle_interval.as_secs_f64(),
            min_size: watch.min_size,
            timeout_secs: watch.timeout.as_secs_f64(),
            validate_extensions: watch.validate_extensions,
            min_merged_size: assemble.min_output_size,
            crf: assemble.crf,
            video_codec: assemble.video_codec,
            pix_fmt: assemble.pix_fmt,
        }
    }
}

/// External media programs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            api_base: default_api_base(),
            api_token: String::new(),
            engine_url: default_engine_url(),
            bearer_token: None,
            poll_interval_secs: default_poll_interval(),
            queue_timeout_secs: default_queue_timeout(),
            engine_timeout_secs: default_engine_timeout(),
            workflows_dir: default_workflows_dir(),
            staging_dir: default_staging_dir(),
            engine_root: default_engine_root(),
            output_dir: default_output_dir(),
            routes: Routes::default(),
            upload: UploadSection::default(),
            fetch: FetchSection::default(),
            video: VideoSection::default(),
            upscale: UpscaleSection::default(),
            tools: ToolsSection::default(),
        }
    }
}

impl Config {
    /// Loads the configuration file, then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&config_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads `path`, or returns defaults when it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("GENWORKER_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = lookup("GENWORKER_API_TOKEN") {
            self.api_token = v;
        }
        if let Some(v) = lookup("GENWORKER_ENGINE_URL") {
            self.engine_url = v;
        }
        if let Some(v) = lookup("GENWORKER_BEARER_TOKEN") {
            self.bearer_token = Some(v).filter(|t| !t.is_empty());
        }
    }

    /// Resolves a backend route against `api_base`.
    pub fn url(&self, route: &str) -> String {
        join_url(&self.api_base, route)
    }

    pub fn prompt_url(&self) -> String {
        join_url(&self.engine_url, "prompt")
    }

    pub fn poll_interval(&self) -> Duration {
        secs(self.poll_interval_secs)
    }

    pub fn queue_timeout(&self) -> Duration {
        secs(self.queue_timeout_secs)
    }

    pub fn engine_timeout(&self) -> Duration {
        secs(self.engine_timeout_secs)
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            user_agent: format!("genworker/{} ({})", env!("CARGO_PKG_VERSION"), self.name),
            ..ChannelConfig::default()
        }
    }

    pub fn upload_endpoints(&self) -> UploadEndpoints {
        UploadEndpoints {
            init: self.url(&self.routes.upload_init),
            chunk: self.url(&self.routes.upload_chunk),
            finalize: self.url(&self.routes.upload_final),
            whole: self.url(&self.routes.upload_image),
        }
    }

    pub fn transfer_config(&self) -> TransferConfig {
        let u = &self.upload;
        TransferConfig {
            chunk_size: u.chunk_size.max(1),
            retry: u.retry.policy(),
            max_offset_conflicts: u.max_offset_conflicts,
            total_timeout: Some(secs(u.total_timeout_secs)).filter(|d| !d.is_zero()),
            init_timeout: secs(u.init_timeout_secs),
            chunk_timeout: secs(u.chunk_timeout_secs),
            finalize_timeout: secs(u.finalize_timeout_secs),
        }
    }

    pub fn installer_config(&self) -> InstallerConfig {
        let f = &self.fetch;
        InstallerConfig {
            api_token: self.api_token.clone(),
            bearer_token: self.bearer_token.clone(),
            min_existing_size: f.min_existing_size,
            max_workers: f.max_workers,
            max_attempts: f.retry.max_attempts,
            request_timeout: secs(f.request_timeout_secs),
            total_timeout: Some(secs(f.total_timeout_secs)).filter(|d| !d.is_zero()),
            ..InstallerConfig::with_root(&self.engine_root, self.url(&self.routes.download_file))
        }
    }

    pub fn fetch_backoff(&self) -> RetryPolicy {
        self.fetch.retry.policy()
    }

    pub fn video_watch(&self) -> WatchConfig {
        let v = &self.video;
        WatchConfig {
            poll_interval: secs(v.poll_secs),
            settle_interval: secs(v.settle_secs),
            min_size: v.min_size,
            timeout: secs(v.timeout_secs),
            mtime_slack: secs(v.mtime_slack_secs),
            validate_extensions: v.validate_extensions.clone(),
        }
    }

    pub fn segment_watch(&self) -> WatchConfig {
        let u = &self.upscale;
        WatchConfig {
            poll_interval: secs(u.poll_secs),
            settle_interval: secs(u.settle_secs),
            min_size: u.min_size,
            timeout: secs(u.timeout_secs),
            validate_extensions: u.validate_extensions.clone(),
            ..WatchConfig::segments()
        }
    }

    pub fn assemble_config(&self) -> AssembleConfig {
        let u = &self.upscale;
        AssembleConfig {
            min_output_size: u.min_merged_size,
            crf: u.crf,
            video_codec: u.video_codec.clone(),
            pix_fmt: u.pix_fmt.clone(),
        }
    }
}

/// Negative or non-finite values read as zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn join_url(base: &str, route: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), route.trim_start_matches('/'))
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("GENWORKER_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("genworker")
        .join("worker.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(!config.name.is_empty());
        assert_eq!(config.engine_url, "http://127.0.0.1:3000");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.video.selectors.len(), 5);
        assert_eq!(config.video.selectors[0], "{output_dir}/video/{prefix}*.mp4");
        assert!(config.bearer_token.is_none());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = Config {
            name: "gpu-01".into(),
            api_token: "secret".into(),
            bearer_token: Some("bearer".into()),
            poll_interval_secs: 2.5,
            ..Config::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.name, "gpu-01");
        assert_eq!(parsed.api_token, "secret");
        assert_eq!(parsed.bearer_token.as_deref(), Some("bearer"));
        assert_eq!(parsed.poll_interval(), Duration::from_millis(2500));
        assert_eq!(parsed.routes, Routes::default());
        assert_eq!(parsed.upscale, UpscaleSection::default());
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
            api_base = "https://jobs.example"

            [upload]
            chunk_size = 1024

            [video]
            timeout_secs = 60
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_base, "https://jobs.example");
        assert_eq!(config.upload.chunk_size, 1024);
        assert_eq!(config.upload.max_offset_conflicts, 16);
        assert_eq!(config.video.timeout_secs, 60.0);
        assert_eq!(config.video.prefix, "ComfyUI");
        assert_eq!(config.fetch, FetchSection::default());
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("GENWORKER_API_BASE", "https://override"),
            ("GENWORKER_API_TOKEN", "tok"),
            ("GENWORKER_BEARER_TOKEN", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config {
            bearer_token: Some("from-file".into()),
            ..Config::default()
        };
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_base, "https://override");
        assert_eq!(config.api_token, "tok");
        assert_eq!(config.engine_url, "http://127.0.0.1:3000");
        assert!(config.bearer_token.is_none());
    }

    #[test]
    fn routes_resolve_against_api_base() {
        let config = Config {
            api_base: "https://jobs.example/api/".into(),
            ..Config::default()
        };
        assert_eq!(
            config.url(&config.routes.get_task),
            "https://jobs.example/api/index.php?r=worker/getTask"
        );
        assert_eq!(
            config.upload_endpoints().chunk,
            "https://jobs.example/api/index.php?r=chunkUpload/uploadChunk"
        );
        assert_eq!(config.prompt_url(), "http://127.0.0.1:3000/prompt");
    }

    #[test]
    fn component_configs_follow_sections() {
        let mut config = Config::default();
        config.upload.total_timeout_secs = 0.0;
        config.upload.retry.max_attempts = 3;
        config.fetch.retry.max_attempts = 2;
        config.upscale.crf = 23;
        config.video.settle_secs = -1.0;

        let transfer = config.transfer_config();
        assert_eq!(transfer.total_timeout, None);
        assert_eq!(transfer.retry.max_attempts, 3);

        let installer = config.installer_config();
        assert_eq!(installer.max_attempts, 2);
        assert_eq!(installer.total_timeout, Some(Duration::from_secs(3600)));
        assert!(installer.backend_download_url.ends_with("worker/getFile"));
        config.fetch.total_timeout_secs = 0.0;
        assert_eq!(config.installer_config().total_timeout, None);

        assert_eq!(config.assemble_config().crf, 23);
        assert_eq!(config.video_watch().settle_interval, Duration::ZERO);
        assert_eq!(config.segment_watch().min_size, 200_000);
    }

    #[test]
    fn merged_output_is_outside_segment_dir() {
        let upscale = UpscaleSection::default();
        let render = |template: &str| {
            template
                .replace("{output_dir}", "/out")
                .replace("{job_id}", "abc")
        };
        let merged = PathBuf::from(render(&upscale.merged_output));
        let selector = PathBuf::from(render(&upscale.segment_selector));
        assert_eq!(merged, PathBuf::from("/out/abc_merged.mp4"));
        assert_ne!(merged.parent(), selector.parent());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_from(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.poll_interval_secs, 5.0);
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("worker.toml");
        std::fs::write(&path, "name = \"from-disk\"\n[tools]\nffmpeg = \"/usr/local/bin/ffmpeg\"\n")
            .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.name, "from-disk");
        assert_eq!(config.tools.ffmpeg, PathBuf::from("/usr/local/bin/ffmpeg"));
        assert_eq!(config.tools.ffprobe, PathBuf::from("ffprobe"));
    }

    #[test]
    fn invalid_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("worker.toml");
        std::fs::write(&path, "poll_interval_secs = \"soon\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
