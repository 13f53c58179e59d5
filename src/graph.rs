//! The pipeline graph: ordered stages plus the links between their ports.
//!
//! The graph is the sole owner of every stage. Topology is frozen once the
//! build phase completes; after that the only permitted operations are
//! lifecycle transitions and dynamic-port release during teardown.

use std::collections::HashMap;

use crate::error::BuildError;
use crate::factory::StageFactory;
use crate::port::{PortBinding, PortDirection};
use crate::stage::{Stage, StageConfig};

/// One endpoint of a link. `slot` is set when the endpoint is a dynamic
/// port, carrying the source handle it was keyed by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkEnd {
    pub stage: String,
    pub direction: PortDirection,
    pub port: usize,
    pub slot: Option<u32>,
}

/// A directed edge from one output port to one input port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub from: LinkEnd,
    pub to: LinkEnd,
}

impl Link {
    fn is_dynamic(&self) -> bool {
        self.from.slot.is_some() || self.to.slot.is_some()
    }
}

/// Ordered collection of stages and their links.
pub struct Graph {
    stages: Vec<Stage>,
    links: Vec<Link>,
    index: HashMap<String, usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            links: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add a stage; the graph takes ownership. Names are identities and
    /// must be unique.
    pub fn add_stage(&mut self, stage: Stage) -> Result<(), BuildError> {
        if self.index.contains_key(stage.name()) {
            return Err(BuildError::DuplicateStage(stage.name().to_string()));
        }
        self.index.insert(stage.name().to_string(), self.stages.len());
        self.stages.push(stage);
        Ok(())
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    pub fn stage_mut(&mut self, name: &str) -> Option<&mut Stage> {
        let i = *self.index.get(name)?;
        Some(&mut self.stages[i])
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }

    pub(crate) fn stages_mut(&mut self) -> impl Iterator<Item = &mut Stage> {
        self.stages.iter_mut()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn require(&self, name: &str, other: &str) -> Result<usize, BuildError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| link_failed(name, other, format!("no stage named '{}'", name)))
    }

    /// Link the first free static output of `upstream` to the first free
    /// static input of `downstream`.
    pub fn link_static(&mut self, upstream: &str, downstream: &str) -> Result<(), BuildError> {
        let up = self.require(upstream, downstream)?;
        let down = self.require(downstream, upstream)?;

        let from_port = self.stages[up].free_static_output().ok_or_else(|| {
            link_failed(upstream, downstream, "upstream has no free output port")
        })?;
        let to_port = self.stages[down].free_static_input().ok_or_else(|| {
            link_failed(upstream, downstream, "downstream has no free input port")
        })?;

        self.stages[up].bind_output(from_port, PortBinding::Static);
        self.stages[down].bind_input(to_port, PortBinding::Static);
        self.links.push(Link {
            from: LinkEnd {
                stage: upstream.to_string(),
                direction: PortDirection::Output,
                port: from_port,
                slot: None,
            },
            to: LinkEnd {
                stage: downstream.to_string(),
                direction: PortDirection::Input,
                port: to_port,
                slot: None,
            },
        });
        Ok(())
    }

    /// Link `upstream`'s free static output into a dynamic input slot on
    /// the batching stage, keyed by `handle`.
    pub fn link_into_slot(
        &mut self,
        upstream: &str,
        batch: &str,
        handle: u32,
    ) -> Result<(), BuildError> {
        let up = self.require(upstream, batch)?;
        let down = self.require(batch, upstream)?;

        let from_port = self.stages[up].free_static_output().ok_or_else(|| {
            link_failed(upstream, batch, "upstream has no free output port")
        })?;
        let to_port = self.stages[down].request_input(handle)?;

        self.stages[up].bind_output(from_port, PortBinding::Static);
        self.stages[down].bind_input(to_port, PortBinding::Dynamic { slot: handle });
        self.links.push(Link {
            from: LinkEnd {
                stage: upstream.to_string(),
                direction: PortDirection::Output,
                port: from_port,
                slot: None,
            },
            to: LinkEnd {
                stage: batch.to_string(),
                direction: PortDirection::Input,
                port: to_port,
                slot: Some(handle),
            },
        });
        Ok(())
    }

    /// Link a dynamic output slot on the demultiplexing stage, keyed by
    /// `handle`, into `downstream`'s free static input.
    pub fn link_from_slot(
        &mut self,
        demux: &str,
        handle: u32,
        downstream: &str,
    ) -> Result<(), BuildError> {
        let up = self.require(demux, downstream)?;
        let down = self.require(downstream, demux)?;

        let to_port = self.stages[down].free_static_input().ok_or_else(|| {
            link_failed(demux, downstream, "downstream has no free input port")
        })?;
        let from_port = self.stages[up].request_output(handle)?;

        self.stages[up].bind_output(from_port, PortBinding::Dynamic { slot: handle });
        self.stages[down].bind_input(to_port, PortBinding::Static);
        self.links.push(Link {
            from: LinkEnd {
                stage: demux.to_string(),
                direction: PortDirection::Output,
                port: from_port,
                slot: Some(handle),
            },
            to: LinkEnd {
                stage: downstream.to_string(),
                direction: PortDirection::Input,
                port: to_port,
                slot: None,
            },
        });
        Ok(())
    }

    /// Release every dynamic port and the links that ran through them.
    /// Static topology is untouched.
    pub fn release_dynamic_ports(&mut self) {
        self.links.retain(|link| !link.is_dynamic());
        for stage in &mut self.stages {
            stage.release_requested_ports();
        }
    }

    /// Total dynamic ports currently allocated across the graph.
    pub fn dynamic_port_count(&self) -> usize {
        self.stages
            .iter()
            .map(|s| {
                s.input_pool().map(|p| p.len()).unwrap_or(0)
                    + s.output_pool().map(|p| p.len()).unwrap_or(0)
            })
            .sum()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("stages", &self.stages.len())
            .field("links", &self.links.len())
            .finish()
    }
}

fn link_failed(upstream: &str, downstream: &str, reason: impl Into<String>) -> BuildError {
    BuildError::LinkFailed {
        upstream: upstream.to_string(),
        downstream: downstream.to_string(),
        reason: reason.into(),
    }
}

/// Incremental graph construction over a stage factory. Any error aborts
/// the build; dropping the builder releases every stage created so far.
pub struct GraphBuilder<'a> {
    factory: &'a StageFactory,
    graph: Graph,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(factory: &'a StageFactory) -> Self {
        Self {
            factory,
            graph: Graph::new(),
        }
    }

    /// Create a stage from the factory and add it to the graph.
    pub fn add(&mut self, kind: &str, name: &str, config: StageConfig) -> Result<(), BuildError> {
        let stage = self.factory.create(kind, name, config)?;
        self.graph.add_stage(stage)
    }

    pub fn link(&mut self, upstream: &str, downstream: &str) -> Result<(), BuildError> {
        self.graph.link_static(upstream, downstream)
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn finish(self) -> Graph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> StageFactory {
        StageFactory::with_builtin_kinds()
    }

    #[test]
    fn duplicate_stage_names_are_refused() {
        let factory = factory();
        let mut builder = GraphBuilder::new(&factory);
        builder.add("queue", "q", StageConfig::new()).expect("first q");
        let err = builder.add("queue", "q", StageConfig::new()).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateStage(name) if name == "q"));
    }

    #[test]
    fn static_links_bind_in_order() {
        let factory = factory();
        let mut builder = GraphBuilder::new(&factory);
        builder.add("queue", "a", StageConfig::new()).expect("a");
        builder.add("queue", "b", StageConfig::new()).expect("b");
        builder.link("a", "b").expect("a -> b");

        let graph = builder.finish();
        assert_eq!(graph.links().len(), 1);
        assert!(graph.stage("a").unwrap().free_static_output().is_none());
        assert!(graph.stage("b").unwrap().free_static_input().is_none());
    }

    #[test]
    fn exhausted_static_ports_fail_the_link() {
        let factory = factory();
        let mut builder = GraphBuilder::new(&factory);
        builder.add("queue", "a", StageConfig::new()).expect("a");
        builder.add("queue", "b", StageConfig::new()).expect("b");
        builder.add("queue", "c", StageConfig::new()).expect("c");
        builder.link("a", "b").expect("a -> b");
        let err = builder.link("a", "c").unwrap_err();
        assert!(matches!(err, BuildError::LinkFailed { .. }));
    }

    #[test]
    fn missing_stage_fails_the_link() {
        let factory = factory();
        let mut builder = GraphBuilder::new(&factory);
        builder.add("queue", "a", StageConfig::new()).expect("a");
        let err = builder.link("a", "ghost").unwrap_err();
        assert!(matches!(err, BuildError::LinkFailed { .. }));
    }

    #[test]
    fn slot_links_record_the_handle_on_both_sides() {
        let factory = factory();
        let mut builder = GraphBuilder::new(&factory);
        builder.add("queue", "src", StageConfig::new()).expect("src");
        builder
            .add(
                "batch",
                "muxer",
                StageConfig::new()
                    .set("width", 720u32)
                    .set("height", 480u32)
                    .set("batch-size", 2u32),
            )
            .expect("muxer");

        let graph = builder.graph_mut();
        graph.link_into_slot("src", "muxer", 1).expect("into slot 1");
        assert_eq!(graph.stage("muxer").unwrap().input_slots(), vec![1]);
        assert_eq!(graph.links()[0].to.slot, Some(1));
        assert_eq!(graph.dynamic_port_count(), 1);
    }

    #[test]
    fn release_clears_dynamic_links_and_ports() {
        let factory = factory();
        let mut builder = GraphBuilder::new(&factory);
        builder.add("queue", "src", StageConfig::new()).expect("src");
        builder
            .add(
                "batch",
                "muxer",
                StageConfig::new()
                    .set("width", 720u32)
                    .set("height", 480u32)
                    .set("batch-size", 2u32),
            )
            .expect("muxer");
        builder.add("queue", "out", StageConfig::new()).expect("out");

        let graph = builder.graph_mut();
        graph.link_into_slot("src", "muxer", 0).expect("into slot");
        graph.link_static("muxer", "out").expect("muxer -> out");
        assert_eq!(graph.links().len(), 2);

        graph.release_dynamic_ports();
        assert_eq!(graph.dynamic_port_count(), 0);
        // The static spine link survives teardown of the dynamic boundary.
        assert_eq!(graph.links().len(), 1);
    }
}
