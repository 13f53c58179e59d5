//! Batch egress: one dynamic output slot per source on the demultiplexing
//! stage, routed into an independent per-camera output chain.
//!
//! The slot is keyed by the same source handle the ingress side used.
//! There is no correlation table; the handle being the key on both sides
//! is what makes source k in come out as source k.

use crate::config::{SinkSettings, SourceDescriptor};
use crate::error::BuildError;
use crate::factory::StageFactory;
use crate::graph::Graph;
use crate::stage::StageConfig;

/// Builds each source's private output chain and fans the demultiplexer
/// out into them.
pub struct BatchEgressManager<'a> {
    factory: &'a StageFactory,
    demux_stage: String,
}

impl<'a> BatchEgressManager<'a> {
    pub fn new(factory: &'a StageFactory, demux_stage: &str) -> Self {
        Self {
            factory,
            demux_stage: demux_stage.to_string(),
        }
    }

    /// For each source, ascending by handle: allocate the demux slot keyed
    /// by the handle, then build and link queue -> convert -> overlay
    /// followed by the configured sink tail.
    pub fn attach(
        &self,
        graph: &mut Graph,
        sources: &[SourceDescriptor],
        sink: &SinkSettings,
    ) -> Result<(), BuildError> {
        let mut ordered: Vec<&SourceDescriptor> = sources.iter().collect();
        ordered.sort_by_key(|source| source.handle);

        for source in ordered {
            let queue_name = format!("{}-queue", source.name);
            let convert_name = format!("{}-out-convert", source.name);
            let overlay_name = format!("{}-overlay", source.name);

            let stage = self.factory.create("queue", &queue_name, StageConfig::new())?;
            graph.add_stage(stage)?;
            graph.link_from_slot(&self.demux_stage, source.handle, &queue_name)?;

            let stage = self
                .factory
                .create("convert", &convert_name, StageConfig::new())?;
            graph.add_stage(stage)?;
            graph.link_static(&queue_name, &convert_name)?;

            let stage = self
                .factory
                .create("overlay", &overlay_name, StageConfig::new())?;
            graph.add_stage(stage)?;
            graph.link_static(&convert_name, &overlay_name)?;

            match sink {
                SinkSettings::Display { sync } => {
                    self.attach_display_tail(graph, source, &overlay_name, *sync)?
                }
                SinkSettings::Publish {
                    location,
                    bitrate_kbps,
                } => self.attach_publish_tail(
                    graph,
                    source,
                    &overlay_name,
                    location,
                    *bitrate_kbps,
                )?,
            }
            log::debug!(
                "egress: demux slot {} routed to '{}' chain",
                source.handle,
                source.name
            );
        }
        Ok(())
    }

    fn attach_display_tail(
        &self,
        graph: &mut Graph,
        source: &SourceDescriptor,
        upstream: &str,
        sync: bool,
    ) -> Result<(), BuildError> {
        let transform_name = format!("{}-transform", source.name);
        let sink_name = format!("{}-sink", source.name);

        let stage = self
            .factory
            .create("transform", &transform_name, StageConfig::new())?;
        graph.add_stage(stage)?;
        graph.link_static(upstream, &transform_name)?;

        let sink_config = StageConfig::new().set("sync", sync);
        let stage = self.factory.create("display-sink", &sink_name, sink_config)?;
        graph.add_stage(stage)?;
        graph.link_static(&transform_name, &sink_name)?;
        Ok(())
    }

    fn attach_publish_tail(
        &self,
        graph: &mut Graph,
        source: &SourceDescriptor,
        upstream: &str,
        location: &str,
        bitrate_kbps: u32,
    ) -> Result<(), BuildError> {
        let encode_name = format!("{}-encode", source.name);
        let parse_name = format!("{}-parse", source.name);
        let sink_name = format!("{}-sink", source.name);

        let encode_config = StageConfig::new().set("bitrate", bitrate_kbps);
        let stage = self.factory.create("encode", &encode_name, encode_config)?;
        graph.add_stage(stage)?;
        graph.link_static(upstream, &encode_name)?;

        let stage = self.factory.create("parse", &parse_name, StageConfig::new())?;
        graph.add_stage(stage)?;
        graph.link_static(&encode_name, &parse_name)?;

        let sink_config = StageConfig::new()
            .set("location", format!("{}/{}", location, source.name))
            .set("sync", false);
        let stage = self.factory.create("publish-sink", &sink_name, sink_config)?;
        graph.add_stage(stage)?;
        graph.link_static(&parse_name, &sink_name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;

    fn demux_graph() -> (StageFactory, Graph) {
        let factory = StageFactory::with_builtin_kinds();
        let mut builder = GraphBuilder::new(&factory);
        builder
            .add("demux", "demuxer", StageConfig::new())
            .expect("demux stage");
        let graph = builder.finish();
        (factory, graph)
    }

    fn sources(entries: &[(u32, &str)]) -> Vec<SourceDescriptor> {
        entries
            .iter()
            .map(|&(handle, name)| SourceDescriptor {
                handle,
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn display_tail_builds_one_chain_per_source() {
        let (factory, mut graph) = demux_graph();
        let manager = BatchEgressManager::new(&factory, "demuxer");
        let sources = sources(&[(0, "cam1"), (1, "cam2")]);
        manager
            .attach(&mut graph, &sources, &SinkSettings::Display { sync: false })
            .expect("egress");

        assert_eq!(graph.stage("demuxer").unwrap().output_slots(), vec![0, 1]);
        for name in ["cam1", "cam2"] {
            assert!(graph.stage(&format!("{}-queue", name)).is_some());
            assert!(graph.stage(&format!("{}-transform", name)).is_some());
            assert!(graph.stage(&format!("{}-sink", name)).is_some());
        }
    }

    #[test]
    fn publish_tail_carries_per_source_locations() {
        let (factory, mut graph) = demux_graph();
        let manager = BatchEgressManager::new(&factory, "demuxer");
        let sources = sources(&[(0, "cam1")]);
        manager
            .attach(
                &mut graph,
                &sources,
                &SinkSettings::Publish {
                    location: "rtmp://media.example.net/live".to_string(),
                    bitrate_kbps: 2_500,
                },
            )
            .expect("egress");

        let sink = graph.stage("cam1-sink").expect("publish sink");
        assert_eq!(
            sink.config().get_str("location"),
            Some("rtmp://media.example.net/live/cam1")
        );
        assert!(graph.stage("cam1-encode").is_some());
        assert!(graph.stage("cam1-parse").is_some());
    }

    #[test]
    fn duplicate_handle_fails_before_any_sink_exists() {
        let (factory, mut graph) = demux_graph();
        let manager = BatchEgressManager::new(&factory, "demuxer");
        let sources = sources(&[(0, "cam1"), (0, "cam2")]);
        let err = manager
            .attach(&mut graph, &sources, &SinkSettings::Display { sync: false })
            .unwrap_err();
        assert!(matches!(err, BuildError::PortUnavailable { handle: 0, .. }));
        assert!(graph.stage("cam2-sink").is_none());
    }
}
