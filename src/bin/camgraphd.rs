//! camgraphd - multi-camera pipeline daemon
//!
//! 1. Loads configuration (JSON file + environment overrides)
//! 2. Assembles the processing graph: per-source capture chains fanned
//!    into the batcher, the GPU spine, and per-source output chains fanned
//!    out of the demultiplexer
//! 3. Starts the pipeline and blocks in the diagnostic event loop
//! 4. Tears down on end of stream, fault, or SIGINT; exits non-zero only
//!    on fault

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use camgraph::{diag, pipeline, DaemonConfig, LifecycleController, RunOutcome, StageFactory};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Execute on a real GStreamer pipeline instead of the built-in
    /// stage runtimes.
    #[cfg(feature = "gst-backend")]
    #[arg(long)]
    gst: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = DaemonConfig::load(args.config.as_deref())?;

    let factory = StageFactory::with_builtin_kinds();
    let graph = pipeline::assemble(&factory, &cfg.pipeline)?;
    log::info!(
        "graph assembled: {} sources, {} stages, {} links",
        cfg.pipeline.sources.len(),
        graph.len(),
        graph.links().len()
    );

    let (bus, mut channel) = diag::channel();

    #[cfg(feature = "gst-backend")]
    let executor = if args.gst {
        Some(camgraph::gst::GstExecutor::materialize(&graph)?)
    } else {
        None
    };

    #[allow(unused_mut)]
    let mut controller = LifecycleController::new(graph, bus);
    #[cfg(feature = "gst-backend")]
    if let Some(executor) = executor {
        controller = controller.with_gst_executor(executor);
    }

    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = interrupt.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    controller.start()?;
    let outcome = channel.run(&mut controller, &interrupt);

    match outcome {
        RunOutcome::EndOfStream => {
            log::info!("pipeline drained, exiting");
            Ok(())
        }
        RunOutcome::Interrupted => {
            log::info!("shutdown requested, exiting");
            Ok(())
        }
        RunOutcome::Fault { stage, detail } => {
            Err(anyhow!("pipeline fault in stage '{}': {}", stage, detail))
        }
    }
}
