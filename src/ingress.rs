//! Batch ingress: one dynamic input slot per source on the batching stage.
//!
//! Slot index equals the external source handle, not allocation order, so
//! slot assignment is deterministic across runs with the same source set.

use crate::config::{CaptureSettings, SourceDescriptor};
use crate::error::BuildError;
use crate::factory::StageFactory;
use crate::graph::Graph;
use crate::stage::StageConfig;

/// Builds each source's private capture chain and fans it into the
/// batching stage.
pub struct BatchIngressManager<'a> {
    factory: &'a StageFactory,
    batch_stage: String,
}

impl<'a> BatchIngressManager<'a> {
    pub fn new(factory: &'a StageFactory, batch_stage: &str) -> Self {
        Self {
            factory,
            batch_stage: batch_stage.to_string(),
        }
    }

    /// For each source, ascending by handle: build capture -> convert and
    /// link the chain into the batch slot keyed by the handle. Any failure
    /// aborts the whole build.
    pub fn attach(
        &self,
        graph: &mut Graph,
        sources: &[SourceDescriptor],
        capture: &CaptureSettings,
    ) -> Result<(), BuildError> {
        let mut ordered: Vec<&SourceDescriptor> = sources.iter().collect();
        ordered.sort_by_key(|source| source.handle);

        for source in ordered {
            let capture_name = format!("{}-capture", source.name);
            let convert_name = format!("{}-convert", source.name);

            let mut capture_config = StageConfig::new()
                .set("sensor-id", source.handle)
                .set("do-timestamp", true)
                .set("fps", capture.fps);
            if let Some(budget) = capture.frame_budget {
                capture_config = capture_config.set("frames", budget);
            }
            let stage = self.factory.create("capture", &capture_name, capture_config)?;
            graph.add_stage(stage)?;

            let convert_config = StageConfig::new()
                .set("width", capture.width)
                .set("height", capture.height)
                .set("format", capture.format.as_str());
            let stage = self.factory.create("convert", &convert_name, convert_config)?;
            graph.add_stage(stage)?;

            graph.link_static(&capture_name, &convert_name)?;
            graph.link_into_slot(&convert_name, &self.batch_stage, source.handle)?;
            log::debug!(
                "ingress: source '{}' bound to batch slot {}",
                source.name,
                source.handle
            );
        }
        Ok(())
    }
}
