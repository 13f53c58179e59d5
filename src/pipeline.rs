//! Full multi-camera assembly: the batch -> infer -> track -> analytics ->
//! convert -> demux spine, with per-source ingress and egress chains fanned
//! in and out at the dynamic boundaries.

use crate::config::PipelineSettings;
use crate::egress::BatchEgressManager;
use crate::error::BuildError;
use crate::factory::StageFactory;
use crate::graph::{Graph, GraphBuilder};
use crate::ingress::BatchIngressManager;
use crate::stage::StageConfig;

pub const BATCH_STAGE: &str = "muxer";
pub const DEMUX_STAGE: &str = "demuxer";

/// Assemble the whole processing graph for the configured source set.
///
/// Construction fails fast: any factory, link, or slot error aborts the
/// build and drops every stage created so far.
pub fn assemble(factory: &StageFactory, settings: &PipelineSettings) -> Result<Graph, BuildError> {
    let batch_size = settings
        .batch
        .batch_size
        .unwrap_or(settings.sources.len() as u32);

    let mut builder = GraphBuilder::new(factory);

    let batch_config = StageConfig::new()
        .set("width", settings.batch.width)
        .set("height", settings.batch.height)
        .set("batch-size", batch_size)
        .set("batched-push-timeout", settings.batch.push_timeout_us)
        .set("live-source", settings.batch.live_source)
        .set("sync-inputs", settings.batch.sync_inputs);
    builder.add("batch", BATCH_STAGE, batch_config)?;

    let infer_config = StageConfig::new()
        .set("config-file", settings.inference.model_config.as_str());
    builder.add("infer", "primary-inference", infer_config)?;

    let track_config = StageConfig::new()
        .set("lib-file", settings.inference.tracker_lib.as_str())
        .set("batch-process", true)
        .set("past-frames", true);
    builder.add("track", "tracker", track_config)?;

    let analytics_config = StageConfig::new()
        .set("config-file", settings.inference.analytics_config.as_str());
    builder.add("analytics", "analytics", analytics_config)?;

    builder.add("convert", "osd-convert", StageConfig::new())?;
    builder.add("demux", DEMUX_STAGE, StageConfig::new())?;

    builder.link(BATCH_STAGE, "primary-inference")?;
    builder.link("primary-inference", "tracker")?;
    builder.link("tracker", "analytics")?;
    builder.link("analytics", "osd-convert")?;
    builder.link("osd-convert", DEMUX_STAGE)?;

    let graph = builder.graph_mut();
    BatchIngressManager::new(factory, BATCH_STAGE).attach(
        graph,
        &settings.sources,
        &settings.capture,
    )?;
    BatchEgressManager::new(factory, DEMUX_STAGE).attach(
        graph,
        &settings.sources,
        &settings.sink,
    )?;

    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceDescriptor;

    fn settings(entries: &[(u32, &str)]) -> PipelineSettings {
        PipelineSettings {
            sources: entries
                .iter()
                .map(|&(handle, name)| SourceDescriptor {
                    handle,
                    name: name.to_string(),
                })
                .collect(),
            ..PipelineSettings::default()
        }
    }

    #[test]
    fn n_sources_yield_n_correlated_slot_pairs() {
        let factory = StageFactory::with_builtin_kinds();
        for n in 1..=4u32 {
            let entries: Vec<(u32, String)> =
                (0..n).map(|k| (k, format!("cam{}", k + 1))).collect();
            let borrowed: Vec<(u32, &str)> =
                entries.iter().map(|(h, s)| (*h, s.as_str())).collect();
            let graph = assemble(&factory, &settings(&borrowed)).expect("assemble");

            let ingress = graph.stage(BATCH_STAGE).unwrap().input_slots();
            let egress = graph.stage(DEMUX_STAGE).unwrap().output_slots();
            assert_eq!(ingress.len() as u32, n);
            // Slot k in == slot k out for every handle.
            assert_eq!(ingress, egress);
        }
    }

    #[test]
    fn unknown_kind_leaves_no_graph_behind() {
        let factory = StageFactory::new();
        // Empty registry: the very first stage kind is unavailable.
        let err = assemble(&factory, &settings(&[(0, "cam1")])).unwrap_err();
        assert!(matches!(err, BuildError::UnavailableKind(_)));
    }

    #[test]
    fn duplicate_handles_fail_before_sinks_exist() {
        let factory = StageFactory::with_builtin_kinds();
        let err = assemble(&factory, &settings(&[(0, "cam1"), (0, "cam2")])).unwrap_err();
        assert!(matches!(err, BuildError::PortUnavailable { handle: 0, .. }));
    }

    #[test]
    fn undersized_batch_capacity_fails_the_build() {
        let factory = StageFactory::with_builtin_kinds();
        let mut settings = settings(&[(0, "cam1"), (1, "cam2")]);
        settings.batch.batch_size = Some(1);
        let err = assemble(&factory, &settings).unwrap_err();
        assert!(matches!(err, BuildError::PortUnavailable { handle: 1, .. }));
    }
}
