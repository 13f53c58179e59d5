//! Pipeline lifecycle: the shared state machine and teardown ordering.
//!
//! Idle --build--> Ready --start--> Playing --stop--> Idle. The transition
//! to Playing is requested once for the whole graph and not awaited;
//! per-stage readiness arrives asynchronously on the diagnostic channel.

use anyhow::{anyhow, Result};

use crate::diag::DiagnosticSender;
use crate::graph::Graph;

/// State shared by the whole graph. Stages acknowledge transitions
/// independently; the controller's view moves atomically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Ready,
    Paused,
    Playing,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Ready => "ready",
            PipelineState::Paused => "paused",
            PipelineState::Playing => "playing",
        };
        f.write_str(name)
    }
}

/// Drives the assembled graph through state transitions and owns teardown
/// ordering. Holding the controller keeps every stage alive; dropping it
/// destroys the graph.
pub struct LifecycleController {
    graph: Graph,
    state: PipelineState,
    bus: DiagnosticSender,
    #[cfg(feature = "gst-backend")]
    executor: Option<crate::gst::GstExecutor>,
}

impl LifecycleController {
    /// Take ownership of a successfully built graph. Build success is what
    /// makes the pipeline Ready.
    pub fn new(graph: Graph, bus: DiagnosticSender) -> Self {
        Self {
            graph,
            state: PipelineState::Ready,
            bus,
            #[cfg(feature = "gst-backend")]
            executor: None,
        }
    }

    /// Execute the graph on a real GStreamer pipeline instead of the
    /// built-in stage runtimes.
    #[cfg(feature = "gst-backend")]
    pub fn with_gst_executor(mut self, executor: crate::gst::GstExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Request the transition to Playing. Fire-and-forget: a stage that
    /// fails to come up reports through the diagnostic channel, not here.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Playing => {
                log::debug!("start() while already playing is a no-op");
                return Ok(());
            }
            PipelineState::Idle => {
                return Err(anyhow!("cannot start an idle pipeline; rebuild the graph"));
            }
            PipelineState::Ready | PipelineState::Paused => {}
        }

        #[cfg(feature = "gst-backend")]
        if let Some(executor) = &mut self.executor {
            executor.start(&self.bus)?;
            self.state = PipelineState::Playing;
            log::info!("pipeline started ({} stages, gstreamer)", self.graph.len());
            return Ok(());
        }

        let bus = self.bus.clone();
        for stage in self.graph.stages_mut() {
            if let Err(e) = stage.start_runtime(&bus) {
                log::error!("stage '{}' failed to start: {}", stage.name(), e);
                bus.error(stage.name(), format!("failed to start: {}", e));
            }
        }
        self.state = PipelineState::Playing;
        log::info!(
            "pipeline started ({} stages, {} links)",
            self.graph.len(),
            self.graph.links().len()
        );
        Ok(())
    }

    /// Transition to Idle and tear down. Idempotent: stop from Idle is a
    /// no-op. The graph reaches Idle before any stage is quiesced, and
    /// dynamic ports are released only after every runtime has been told
    /// to stop; stages themselves live until the controller is dropped.
    pub fn stop(&mut self) {
        if self.state == PipelineState::Idle {
            log::debug!("stop() while idle is a no-op");
            return;
        }
        self.state = PipelineState::Idle;

        #[cfg(feature = "gst-backend")]
        if let Some(executor) = &mut self.executor {
            executor.stop();
        }

        // Reverse order: sinks quiesce before the stages feeding them.
        let mut stages: Vec<&mut crate::stage::Stage> = self.graph.stages_mut().collect();
        for stage in stages.iter_mut().rev() {
            stage.stop_runtime();
        }

        self.graph.release_dynamic_ports();
        log::info!("pipeline stopped, dynamic ports released");
    }
}
