//! Stage factory: kind registry, option validation, built-in blueprints.
//!
//! Configuration application is all-or-nothing. A blueprint validates every
//! option (name, type, required presence) before any stage is constructed;
//! one bad option and the caller gets `RejectedConfig` with nothing to
//! clean up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;

use crate::diag::DiagnosticSender;
use crate::error::BuildError;
use crate::lifecycle::PipelineState;
use crate::stage::{validate_stage_name, PortCount, Stage, StageConfig, StageRuntime};

/// Expected type of an option value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    UInt,
    Str,
}

/// One option a stage kind accepts.
#[derive(Clone, Copy, Debug)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub required: bool,
}

const fn opt(name: &'static str, kind: OptionKind) -> OptionSpec {
    OptionSpec {
        name,
        kind,
        required: false,
    }
}

const fn req(name: &'static str, kind: OptionKind) -> OptionSpec {
    OptionSpec {
        name,
        kind,
        required: true,
    }
}

/// A stage kind the factory can produce.
pub trait StageBlueprint: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Port layout. The config is available so variable-arity kinds can
    /// bound their pool from an option (the batcher's `batch-size`).
    fn ports(&self, config: &StageConfig) -> (PortCount, PortCount);

    /// Validate the whole configuration; any `Err` discards the stage.
    fn validate(&self, config: &StageConfig) -> Result<(), String>;

    /// Build the execution half.
    fn runtime(&self, name: &str, config: &StageConfig) -> Box<dyn StageRuntime>;
}

/// Registry of stage kinds.
pub struct StageFactory {
    blueprints: HashMap<&'static str, Box<dyn StageBlueprint>>,
}

impl StageFactory {
    pub fn new() -> Self {
        Self {
            blueprints: HashMap::new(),
        }
    }

    /// A factory preloaded with every built-in stage kind.
    pub fn with_builtin_kinds() -> Self {
        let mut factory = Self::new();
        for kind in BUILTIN_KINDS {
            factory.register(Box::new(*kind));
        }
        factory
    }

    pub fn register(&mut self, blueprint: Box<dyn StageBlueprint>) {
        self.blueprints.insert(blueprint.kind(), blueprint);
    }

    /// Registered kinds, sorted for stable output.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.blueprints.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Create a configured stage, or fail with nothing left behind.
    pub fn create(
        &self,
        kind: &str,
        name: &str,
        config: StageConfig,
    ) -> Result<Stage, BuildError> {
        let blueprint = self
            .blueprints
            .get(kind)
            .ok_or_else(|| BuildError::UnavailableKind(kind.to_string()))?;

        validate_stage_name(name).map_err(|reason| BuildError::RejectedConfig {
            stage: name.to_string(),
            reason,
        })?;
        blueprint
            .validate(&config)
            .map_err(|reason| BuildError::RejectedConfig {
                stage: name.to_string(),
                reason,
            })?;

        let (inputs, outputs) = blueprint.ports(&config);
        let runtime = blueprint.runtime(name, &config);
        Ok(Stage::new(kind, name, config, inputs, outputs, runtime))
    }
}

impl Default for StageFactory {
    fn default() -> Self {
        Self::with_builtin_kinds()
    }
}

// ----------------------------------------------------------------------------
// Built-in stage kinds
// ----------------------------------------------------------------------------

/// Table-driven blueprint shared by every built-in kind.
#[derive(Clone, Copy)]
pub struct BuiltinKind {
    kind: &'static str,
    inputs: SideSpec,
    outputs: SideSpec,
    options: &'static [OptionSpec],
    runtime: RuntimeKind,
}

#[derive(Clone, Copy)]
enum SideSpec {
    Fixed(u32),
    /// Pool capacity taken from a configuration option, or unbounded.
    OnRequest(Option<&'static str>),
}

#[derive(Clone, Copy)]
enum RuntimeKind {
    Passive,
    SyntheticCapture,
}

/// The stage vocabulary of a multi-camera batch pipeline: per-source
/// capture/normalize chains, the batch/demux boundary pair, the GPU
/// processing spine, and display/publish output tails.
pub const BUILTIN_KINDS: &[BuiltinKind] = &[
    BuiltinKind {
        kind: "capture",
        inputs: SideSpec::Fixed(0),
        outputs: SideSpec::Fixed(1),
        options: &[
            req("sensor-id", OptionKind::UInt),
            opt("do-timestamp", OptionKind::Bool),
            opt("fps", OptionKind::UInt),
            opt("frames", OptionKind::UInt),
        ],
        runtime: RuntimeKind::SyntheticCapture,
    },
    BuiltinKind {
        kind: "convert",
        inputs: SideSpec::Fixed(1),
        outputs: SideSpec::Fixed(1),
        options: &[
            opt("width", OptionKind::UInt),
            opt("height", OptionKind::UInt),
            opt("format", OptionKind::Str),
        ],
        runtime: RuntimeKind::Passive,
    },
    BuiltinKind {
        kind: "batch",
        inputs: SideSpec::OnRequest(Some("batch-size")),
        outputs: SideSpec::Fixed(1),
        options: &[
            req("width", OptionKind::UInt),
            req("height", OptionKind::UInt),
            req("batch-size", OptionKind::UInt),
            opt("batched-push-timeout", OptionKind::UInt),
            opt("live-source", OptionKind::Bool),
            opt("sync-inputs", OptionKind::Bool),
        ],
        runtime: RuntimeKind::Passive,
    },
    BuiltinKind {
        kind: "infer",
        inputs: SideSpec::Fixed(1),
        outputs: SideSpec::Fixed(1),
        options: &[
            req("config-file", OptionKind::Str),
            opt("gpu-id", OptionKind::UInt),
        ],
        runtime: RuntimeKind::Passive,
    },
    BuiltinKind {
        kind: "track",
        inputs: SideSpec::Fixed(1),
        outputs: SideSpec::Fixed(1),
        options: &[
            opt("lib-file", OptionKind::Str),
            opt("gpu-id", OptionKind::UInt),
            opt("batch-process", OptionKind::Bool),
            opt("past-frames", OptionKind::Bool),
        ],
        runtime: RuntimeKind::Passive,
    },
    BuiltinKind {
        kind: "analytics",
        inputs: SideSpec::Fixed(1),
        outputs: SideSpec::Fixed(1),
        options: &[req("config-file", OptionKind::Str)],
        runtime: RuntimeKind::Passive,
    },
    BuiltinKind {
        kind: "demux",
        inputs: SideSpec::Fixed(1),
        outputs: SideSpec::OnRequest(None),
        options: &[],
        runtime: RuntimeKind::Passive,
    },
    BuiltinKind {
        kind: "queue",
        inputs: SideSpec::Fixed(1),
        outputs: SideSpec::Fixed(1),
        options: &[],
        runtime: RuntimeKind::Passive,
    },
    BuiltinKind {
        kind: "overlay",
        inputs: SideSpec::Fixed(1),
        outputs: SideSpec::Fixed(1),
        options: &[opt("process-mode", OptionKind::UInt)],
        runtime: RuntimeKind::Passive,
    },
    BuiltinKind {
        kind: "transform",
        inputs: SideSpec::Fixed(1),
        outputs: SideSpec::Fixed(1),
        options: &[],
        runtime: RuntimeKind::Passive,
    },
    BuiltinKind {
        kind: "display-sink",
        inputs: SideSpec::Fixed(1),
        outputs: SideSpec::Fixed(0),
        options: &[opt("sync", OptionKind::Bool)],
        runtime: RuntimeKind::Passive,
    },
    BuiltinKind {
        kind: "encode",
        inputs: SideSpec::Fixed(1),
        outputs: SideSpec::Fixed(1),
        options: &[opt("bitrate", OptionKind::UInt)],
        runtime: RuntimeKind::Passive,
    },
    BuiltinKind {
        kind: "parse",
        inputs: SideSpec::Fixed(1),
        outputs: SideSpec::Fixed(1),
        options: &[],
        runtime: RuntimeKind::Passive,
    },
    BuiltinKind {
        kind: "publish-sink",
        inputs: SideSpec::Fixed(1),
        outputs: SideSpec::Fixed(0),
        options: &[req("location", OptionKind::Str), opt("sync", OptionKind::Bool)],
        runtime: RuntimeKind::Passive,
    },
];

impl StageBlueprint for BuiltinKind {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn ports(&self, config: &StageConfig) -> (PortCount, PortCount) {
        (side_count(self.inputs, config), side_count(self.outputs, config))
    }

    fn validate(&self, config: &StageConfig) -> Result<(), String> {
        for (name, value) in config.iter() {
            let spec = self
                .options
                .iter()
                .find(|spec| spec.name == name)
                .ok_or_else(|| format!("unknown option '{}'", name))?;
            check_option_type(spec, value)?;
        }
        for spec in self.options.iter().filter(|spec| spec.required) {
            if config.get(spec.name).is_none() {
                return Err(format!("missing required option '{}'", spec.name));
            }
        }
        Ok(())
    }

    fn runtime(&self, name: &str, config: &StageConfig) -> Box<dyn StageRuntime> {
        match self.runtime {
            RuntimeKind::Passive => Box::new(PassiveRuntime::new(name)),
            RuntimeKind::SyntheticCapture => Box::new(SyntheticCaptureRuntime::new(name, config)),
        }
    }
}

fn side_count(spec: SideSpec, config: &StageConfig) -> PortCount {
    match spec {
        SideSpec::Fixed(n) => PortCount::Fixed(n),
        SideSpec::OnRequest(option) => PortCount::OnRequest {
            capacity: option.and_then(|name| config.get_u32(name)),
        },
    }
}

fn check_option_type(spec: &OptionSpec, value: &Value) -> Result<(), String> {
    let ok = match spec.kind {
        OptionKind::Bool => value.is_boolean(),
        OptionKind::UInt => value.is_u64(),
        OptionKind::Str => value.is_string(),
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "option '{}' expects a {}",
            spec.name,
            match spec.kind {
                OptionKind::Bool => "boolean",
                OptionKind::UInt => "non-negative integer",
                OptionKind::Str => "string",
            }
        ))
    }
}

// ----------------------------------------------------------------------------
// Built-in runtimes
// ----------------------------------------------------------------------------

/// Runtime for stages whose work happens outside this core (GPU inference,
/// conversion, sinks). Acknowledges transitions on the bus and otherwise
/// stays quiet.
pub struct PassiveRuntime {
    name: String,
}

impl PassiveRuntime {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl StageRuntime for PassiveRuntime {
    fn start(&mut self, bus: &DiagnosticSender) -> Result<()> {
        bus.state_changed(&self.name, PipelineState::Playing);
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Synthetic capture runtime: a worker thread that paces frames at the
/// configured rate and reports end of stream once an optional frame budget
/// runs out. Stands in for a real sensor in tests and dry runs.
pub struct SyntheticCaptureRuntime {
    name: String,
    fps: u32,
    frame_budget: Option<u64>,
    quit: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticCaptureRuntime {
    pub fn new(name: &str, config: &StageConfig) -> Self {
        Self {
            name: name.to_string(),
            fps: config.get_u32("fps").unwrap_or(30).max(1),
            frame_budget: config.get_u64("frames"),
            quit: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl StageRuntime for SyntheticCaptureRuntime {
    fn start(&mut self, bus: &DiagnosticSender) -> Result<()> {
        self.quit.store(false, Ordering::SeqCst);
        let name = self.name.clone();
        let bus = bus.clone();
        let quit = self.quit.clone();
        let frame_budget = self.frame_budget;
        let interval = Duration::from_millis(1_000 / u64::from(self.fps));

        let worker = std::thread::Builder::new()
            .name(format!("{}-capture", name))
            .spawn(move || {
                bus.state_changed(&name, PipelineState::Playing);
                let mut produced = 0u64;
                loop {
                    if quit.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Some(budget) = frame_budget {
                        if produced >= budget {
                            bus.end_of_stream(&name);
                            break;
                        }
                    }
                    produced += 1;
                    std::thread::sleep(interval);
                }
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.quit.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("capture worker for '{}' panicked during shutdown", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_is_refused() {
        let factory = StageFactory::with_builtin_kinds();
        let err = factory
            .create("bogus-stage", "x", StageConfig::new())
            .unwrap_err();
        assert!(matches!(err, BuildError::UnavailableKind(kind) if kind == "bogus-stage"));
    }

    #[test]
    fn unknown_option_discards_the_stage() {
        let factory = StageFactory::with_builtin_kinds();
        let config = StageConfig::new().set("sensor-id", 0u32).set("gamma", 3u32);
        let err = factory.create("capture", "cam1-capture", config).unwrap_err();
        assert!(matches!(err, BuildError::RejectedConfig { .. }));
    }

    #[test]
    fn wrong_option_type_discards_the_stage() {
        let factory = StageFactory::with_builtin_kinds();
        let config = StageConfig::new().set("sensor-id", "zero");
        let err = factory.create("capture", "cam1-capture", config).unwrap_err();
        assert!(matches!(err, BuildError::RejectedConfig { .. }));
    }

    #[test]
    fn missing_required_option_discards_the_stage() {
        let factory = StageFactory::with_builtin_kinds();
        let err = factory
            .create("publish-sink", "cam1-sink", StageConfig::new())
            .unwrap_err();
        assert!(matches!(err, BuildError::RejectedConfig { .. }));
    }

    #[test]
    fn batch_pool_capacity_comes_from_batch_size() {
        let factory = StageFactory::with_builtin_kinds();
        let config = StageConfig::new()
            .set("width", 720u32)
            .set("height", 480u32)
            .set("batch-size", 2u32);
        let mut stage = factory.create("batch", "muxer", config).expect("batch stage");
        stage.request_input(0).expect("slot 0");
        stage.request_input(1).expect("slot 1");
        let err = stage.request_input(2).unwrap_err();
        assert!(matches!(err, BuildError::PortUnavailable { handle: 2, .. }));
    }

    #[test]
    fn bad_stage_name_is_rejected() {
        let factory = StageFactory::with_builtin_kinds();
        let err = factory
            .create("queue", "Bad Name", StageConfig::new())
            .unwrap_err();
        assert!(matches!(err, BuildError::RejectedConfig { .. }));
    }
}
