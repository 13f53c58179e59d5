//! Daemon configuration: source list, batch boundary knobs, processing
//! spine options, and the output tail. JSON config file with environment
//! overrides applied on top, then validated.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::stage::validate_stage_name;

const DEFAULT_BATCH_WIDTH: u32 = 720;
const DEFAULT_BATCH_HEIGHT: u32 = 480;
const DEFAULT_PUSH_TIMEOUT_US: u64 = 4_000_000;
const DEFAULT_CAPTURE_FPS: u32 = 30;
const DEFAULT_CAPTURE_WIDTH: u32 = 1920;
const DEFAULT_CAPTURE_HEIGHT: u32 = 1080;
const DEFAULT_CAPTURE_FORMAT: &str = "NV12";
const DEFAULT_MODEL_CONFIG: &str = "config_infer_primary.txt";
const DEFAULT_TRACKER_LIB: &str = "libnvds_mot_klt.so";
const DEFAULT_ANALYTICS_CONFIG: &str = "analytics.txt";
const DEFAULT_PUBLISH_BITRATE_KBPS: u32 = 4_000;

/// External identity of one camera stream. The handle keys the dynamic
/// slot on both sides of the batch boundary.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub handle: u32,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct BatchSettings {
    /// Batched output frame dimensions.
    pub width: u32,
    pub height: u32,
    /// Slot capacity of the batching stage; defaults to the source count.
    pub batch_size: Option<u32>,
    /// Maximum wait before pushing an incomplete batch, in microseconds.
    pub push_timeout_us: u64,
    pub live_source: bool,
    pub sync_inputs: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_BATCH_WIDTH,
            height: DEFAULT_BATCH_HEIGHT,
            batch_size: None,
            push_timeout_us: DEFAULT_PUSH_TIMEOUT_US,
            live_source: true,
            sync_inputs: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub format: String,
    /// When set, capture stages report end of stream after this many
    /// frames. Unset means run until stopped.
    pub frame_budget: Option<u64>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            fps: DEFAULT_CAPTURE_FPS,
            width: DEFAULT_CAPTURE_WIDTH,
            height: DEFAULT_CAPTURE_HEIGHT,
            format: DEFAULT_CAPTURE_FORMAT.to_string(),
            frame_budget: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InferenceSettings {
    pub model_config: String,
    pub tracker_lib: String,
    pub analytics_config: String,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            model_config: DEFAULT_MODEL_CONFIG.to_string(),
            tracker_lib: DEFAULT_TRACKER_LIB.to_string(),
            analytics_config: DEFAULT_ANALYTICS_CONFIG.to_string(),
        }
    }
}

/// Output tail of each per-camera egress chain.
#[derive(Clone, Debug)]
pub enum SinkSettings {
    /// Local display: overlay -> transform -> display sink.
    Display { sync: bool },
    /// Network publish: overlay -> encode -> parse -> publish sink. The
    /// per-camera location is `<location>/<source name>`.
    Publish { location: String, bitrate_kbps: u32 },
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self::Display { sync: false }
    }
}

/// Everything the pipeline assembly needs.
#[derive(Clone, Debug, Default)]
pub struct PipelineSettings {
    pub sources: Vec<SourceDescriptor>,
    pub batch: BatchSettings,
    pub capture: CaptureSettings,
    pub inference: InferenceSettings,
    pub sink: SinkSettings,
}

// ----------------------------------------------------------------------------
// File + environment loading
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct DaemonConfigFile {
    sources: Option<Vec<SourceDescriptor>>,
    batch: Option<BatchConfigFile>,
    capture: Option<CaptureConfigFile>,
    inference: Option<InferenceConfigFile>,
    sink: Option<SinkConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct BatchConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    batch_size: Option<u32>,
    push_timeout_us: Option<u64>,
    live_source: Option<bool>,
    sync_inputs: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    format: Option<String>,
    frame_budget: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    model_config: Option<String>,
    tracker_lib: Option<String>,
    analytics_config: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    mode: Option<String>,
    sync: Option<bool>,
    location: Option<String>,
    bitrate_kbps: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub pipeline: PipelineSettings,
}

impl DaemonConfig {
    /// Load configuration: explicit path, else `CAMGRAPH_CONFIG`, else
    /// defaults; environment overrides applied after the file.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("CAMGRAPH_CONFIG").ok();
        let file_cfg = match explicit_path {
            Some(path) => Some(read_config_file(path)?),
            None => match env_path.as_deref() {
                Some(path) => Some(read_config_file(Path::new(path))?),
                None => None,
            },
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DaemonConfigFile) -> Self {
        let sources = file.sources.unwrap_or_else(default_sources);
        let batch_file = file.batch.unwrap_or_default();
        let batch = BatchSettings {
            width: batch_file.width.unwrap_or(DEFAULT_BATCH_WIDTH),
            height: batch_file.height.unwrap_or(DEFAULT_BATCH_HEIGHT),
            batch_size: batch_file.batch_size,
            push_timeout_us: batch_file.push_timeout_us.unwrap_or(DEFAULT_PUSH_TIMEOUT_US),
            live_source: batch_file.live_source.unwrap_or(true),
            sync_inputs: batch_file.sync_inputs.unwrap_or(true),
        };
        let capture_file = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            fps: capture_file.fps.unwrap_or(DEFAULT_CAPTURE_FPS),
            width: capture_file.width.unwrap_or(DEFAULT_CAPTURE_WIDTH),
            height: capture_file.height.unwrap_or(DEFAULT_CAPTURE_HEIGHT),
            format: capture_file
                .format
                .unwrap_or_else(|| DEFAULT_CAPTURE_FORMAT.to_string()),
            frame_budget: capture_file.frame_budget,
        };
        let inference_file = file.inference.unwrap_or_default();
        let inference = InferenceSettings {
            model_config: inference_file
                .model_config
                .unwrap_or_else(|| DEFAULT_MODEL_CONFIG.to_string()),
            tracker_lib: inference_file
                .tracker_lib
                .unwrap_or_else(|| DEFAULT_TRACKER_LIB.to_string()),
            analytics_config: inference_file
                .analytics_config
                .unwrap_or_else(|| DEFAULT_ANALYTICS_CONFIG.to_string()),
        };
        let sink_file = file.sink.unwrap_or_default();
        let sink = match sink_file.mode.as_deref() {
            Some("publish") => SinkSettings::Publish {
                location: sink_file.location.unwrap_or_default(),
                bitrate_kbps: sink_file
                    .bitrate_kbps
                    .unwrap_or(DEFAULT_PUBLISH_BITRATE_KBPS),
            },
            _ => SinkSettings::Display {
                sync: sink_file.sync.unwrap_or(false),
            },
        };
        Self {
            pipeline: PipelineSettings {
                sources,
                batch,
                capture,
                inference,
                sink,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(sources) = std::env::var("CAMGRAPH_SOURCES") {
            if !sources.trim().is_empty() {
                self.pipeline.sources = parse_sources(&sources)?;
            }
        }
        if let Ok(size) = std::env::var("CAMGRAPH_BATCH_SIZE") {
            let size: u32 = size
                .parse()
                .map_err(|_| anyhow!("CAMGRAPH_BATCH_SIZE must be an integer"))?;
            self.pipeline.batch.batch_size = Some(size);
        }
        if let Ok(budget) = std::env::var("CAMGRAPH_FRAME_BUDGET") {
            let budget: u64 = budget
                .parse()
                .map_err(|_| anyhow!("CAMGRAPH_FRAME_BUDGET must be an integer"))?;
            self.pipeline.capture.frame_budget = Some(budget);
        }
        if let Ok(mode) = std::env::var("CAMGRAPH_SINK_MODE") {
            match mode.as_str() {
                "display" => {
                    if !matches!(self.pipeline.sink, SinkSettings::Display { .. }) {
                        self.pipeline.sink = SinkSettings::Display { sync: false };
                    }
                }
                "publish" => {
                    if !matches!(self.pipeline.sink, SinkSettings::Publish { .. }) {
                        self.pipeline.sink = SinkSettings::Publish {
                            location: String::new(),
                            bitrate_kbps: DEFAULT_PUBLISH_BITRATE_KBPS,
                        };
                    }
                }
                other => {
                    return Err(anyhow!(
                        "CAMGRAPH_SINK_MODE must be 'display' or 'publish', got '{}'",
                        other
                    ))
                }
            }
        }
        if let Ok(location) = std::env::var("CAMGRAPH_PUBLISH_LOCATION") {
            if !location.trim().is_empty() {
                match &mut self.pipeline.sink {
                    SinkSettings::Publish { location: slot, .. } => *slot = location,
                    SinkSettings::Display { .. } => {
                        self.pipeline.sink = SinkSettings::Publish {
                            location,
                            bitrate_kbps: DEFAULT_PUBLISH_BITRATE_KBPS,
                        };
                    }
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.sources.is_empty() {
            return Err(anyhow!("at least one source is required"));
        }
        for source in &self.pipeline.sources {
            validate_stage_name(&source.name)
                .map_err(|reason| anyhow!("bad source name: {}", reason))?;
        }
        if self.pipeline.capture.fps == 0 {
            return Err(anyhow!("capture fps must be >= 1"));
        }
        if self.pipeline.batch.width == 0 || self.pipeline.batch.height == 0 {
            return Err(anyhow!("batch output dimensions must be non-zero"));
        }
        if let SinkSettings::Publish { location, .. } = &self.pipeline.sink {
            if location.trim().is_empty() {
                return Err(anyhow!("publish sink requires a location"));
            }
        }
        Ok(())
    }
}

fn default_sources() -> Vec<SourceDescriptor> {
    vec![
        SourceDescriptor {
            handle: 0,
            name: "camera1".to_string(),
        },
        SourceDescriptor {
            handle: 1,
            name: "camera2".to_string(),
        },
    ]
}

fn read_config_file(path: &Path) -> Result<DaemonConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// Parse a source list of the form "0:camera1,1:camera2".
fn parse_sources(value: &str) -> Result<Vec<SourceDescriptor>> {
    let mut sources = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (handle, name) = entry
            .split_once(':')
            .ok_or_else(|| anyhow!("source entry '{}' must be '<handle>:<name>'", entry))?;
        let handle: u32 = handle
            .trim()
            .parse()
            .map_err(|_| anyhow!("source handle in '{}' must be an integer", entry))?;
        sources.push(SourceDescriptor {
            handle,
            name: name.trim().to_string(),
        });
    }
    Ok(sources)
}
