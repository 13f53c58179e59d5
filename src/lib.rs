//! camgraph: multi-camera pipeline graph orchestration.
//!
//! This crate builds and drives real-time video processing graphs: N
//! capture streams fanned into a single batched GPU-processing spine
//! (inference, tracking, analytics), then demultiplexed back into N
//! independent per-camera output chains.
//!
//! # Architecture
//!
//! Construction fails fast and leaves nothing behind:
//!
//! 1. The **stage factory** creates configured stages; configuration is
//!    all-or-nothing.
//! 2. The **graph builder** wires static 1:1 links in declaration order.
//! 3. The **ingress/egress managers** allocate one dynamic slot per source
//!    on the batcher and the demultiplexer, keyed by the source handle on
//!    both sides. Source k in is source k out; there is no correlation
//!    table to get out of sync.
//! 4. The **lifecycle controller** transitions the whole graph
//!    (Idle -> Ready -> Playing -> Idle) and owns teardown ordering.
//! 5. The **diagnostic channel** is the single suspension point: a
//!    single-consumer event loop that dispatches asynchronous stage
//!    notifications until a terminal event arrives.
//!
//! # Module Structure
//!
//! - `error`: build-phase error taxonomy
//! - `stage`, `port`: stages, ports, and the dynamic port allocation table
//! - `factory`: stage kind registry and built-in blueprints
//! - `graph`: the graph itself plus static/slot link operations
//! - `ingress`, `egress`: the batch fan-in/fan-out boundary managers
//! - `pipeline`: full multi-camera assembly
//! - `lifecycle`, `diag`: state machine and the notification loop
//! - `config`: daemon configuration (JSON file + environment)
//! - `gst` (feature `gst-backend`): GStreamer execution backend

pub mod config;
pub mod diag;
pub mod egress;
pub mod error;
pub mod factory;
pub mod graph;
#[cfg(feature = "gst-backend")]
pub mod gst;
pub mod ingress;
pub mod lifecycle;
pub mod pipeline;
pub mod port;
pub mod stage;

pub use config::{
    BatchSettings, CaptureSettings, DaemonConfig, InferenceSettings, PipelineSettings,
    SinkSettings, SourceDescriptor,
};
pub use diag::{channel, DiagnosticChannel, DiagnosticSender, Notification, RunOutcome};
pub use egress::BatchEgressManager;
pub use error::BuildError;
pub use factory::{StageBlueprint, StageFactory};
pub use graph::{Graph, GraphBuilder, Link};
pub use ingress::BatchIngressManager;
pub use lifecycle::{LifecycleController, PipelineState};
pub use port::{Port, PortBinding, PortDirection, PortPool};
pub use stage::{Stage, StageConfig, StageRuntime};
