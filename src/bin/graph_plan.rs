//! graph_plan - topology dry run
//!
//! Assembles the graph for a configuration without starting it and prints
//! the stages, links, and slot assignments. Exits non-zero when the build
//! would fail, making it usable as a config check.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use camgraph::{pipeline, DaemonConfig, StageFactory};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let cfg = DaemonConfig::load(args.config.as_deref())?;
    let factory = StageFactory::with_builtin_kinds();
    let graph = pipeline::assemble(&factory, &cfg.pipeline)?;

    println!("stages ({}):", graph.len());
    for stage in graph.stages() {
        println!(
            "  {:<24} kind={:<14} in={} out={}",
            stage.name(),
            stage.kind(),
            stage.inputs().len(),
            stage.outputs().len()
        );
    }

    println!("links ({}):", graph.links().len());
    for link in graph.links() {
        let slot = link
            .to
            .slot
            .or(link.from.slot)
            .map(|s| format!("  [slot {}]", s))
            .unwrap_or_default();
        println!("  {} -> {}{}", link.from.stage, link.to.stage, slot);
    }

    let ingress = graph
        .stage(pipeline::BATCH_STAGE)
        .map(|s| s.input_slots())
        .unwrap_or_default();
    let egress = graph
        .stage(pipeline::DEMUX_STAGE)
        .map(|s| s.output_slots())
        .unwrap_or_default();
    println!("slot map (ingress/egress):");
    for handle in &ingress {
        let correlated = if egress.contains(handle) { "ok" } else { "MISSING" };
        println!("  handle {}: sink_{} -> src_{} {}", handle, handle, handle, correlated);
    }

    Ok(())
}
