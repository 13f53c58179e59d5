//! Stages: named processing units with ports, opaque configuration, and an
//! execution half behind the `StageRuntime` trait.
//!
//! The orchestration core owns stage bookkeeping (ports, slots, links);
//! actual frame work happens inside runtime implementations, on threads
//! they own, and is observed only through the diagnostic channel.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use anyhow::Result;
use serde_json::Value;

use crate::diag::DiagnosticSender;
use crate::error::BuildError;
use crate::port::{Port, PortBinding, PortDirection, PortPool};

/// A conforming stage or source name is a local identifier, not free text.
///
/// Allowed: "muxer", "cam1-capture", "primary-inference"
/// Disallowed: whitespace, slashes, uppercase, punctuation outside [_-].
pub fn validate_stage_name(name: &str) -> Result<(), String> {
    static NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").unwrap());

    if !re.is_match(name) {
        return Err(format!(
            "name '{}' must match ^[a-z0-9][a-z0-9_-]{{0,63}}$",
            name
        ));
    }
    Ok(())
}

/// Opaque per-stage configuration: option name -> value, validated entirely
/// by the stage blueprint and forwarded untouched to the runtime.
#[derive(Clone, Debug, Default)]
pub struct StageConfig {
    options: BTreeMap<String, Value>,
}

impl StageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style option setter.
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.options.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.options.get(name).and_then(Value::as_u64)
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.get_u64(name).and_then(|v| u32::try_from(v).ok())
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.options.get(name).and_then(Value::as_bool)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.options.get(name).and_then(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// How many ports a stage side carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortCount {
    /// Created up front, linked statically.
    Fixed(u32),
    /// Granted on request from a `PortPool`, keyed by source handle.
    /// Capacity may be bounded by a configuration option (the batcher's
    /// `batch-size`) or unbounded (the demultiplexer).
    OnRequest { capacity: Option<u32> },
}

/// The execution half of a stage.
///
/// Implementations own their worker threads and report progress only via
/// the diagnostic channel. `stop` must quiesce and must be safe to call
/// more than once; the core's teardown proceeds regardless.
pub trait StageRuntime: Send {
    fn start(&mut self, bus: &DiagnosticSender) -> Result<()>;
    fn stop(&mut self);
}

/// A named, typed processing unit. Owned exclusively by the graph once
/// added; identity is the name.
pub struct Stage {
    name: String,
    kind: String,
    config: StageConfig,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    fixed_inputs: usize,
    fixed_outputs: usize,
    input_pool: Option<PortPool>,
    output_pool: Option<PortPool>,
    runtime: Box<dyn StageRuntime>,
}

impl Stage {
    pub fn new(
        kind: &str,
        name: &str,
        config: StageConfig,
        inputs: PortCount,
        outputs: PortCount,
        runtime: Box<dyn StageRuntime>,
    ) -> Self {
        let (input_ports, input_pool) = side(PortDirection::Input, inputs);
        let (output_ports, output_pool) = side(PortDirection::Output, outputs);
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            config,
            fixed_inputs: input_ports.len(),
            fixed_outputs: output_ports.len(),
            inputs: input_ports,
            outputs: output_ports,
            input_pool,
            output_pool,
            runtime,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    /// First fixed output port that carries no link yet.
    pub fn free_static_output(&self) -> Option<usize> {
        self.outputs[..self.fixed_outputs]
            .iter()
            .position(|p| !p.is_linked())
    }

    /// First fixed input port that carries no link yet.
    pub fn free_static_input(&self) -> Option<usize> {
        self.inputs[..self.fixed_inputs]
            .iter()
            .position(|p| !p.is_linked())
    }

    /// Request a dynamic input port keyed by `handle`.
    pub fn request_input(&mut self, handle: u32) -> Result<usize, BuildError> {
        let stage = self.name.clone();
        let index = self.inputs.len();
        let granted = self
            .input_pool
            .as_mut()
            .map(|pool| pool.allocate(handle, index).is_ok())
            .unwrap_or(false);
        if !granted {
            return Err(BuildError::PortUnavailable { stage, handle });
        }
        self.inputs
            .push(Port::requested(PortDirection::Input, handle));
        Ok(index)
    }

    /// Request a dynamic output port keyed by `handle`.
    pub fn request_output(&mut self, handle: u32) -> Result<usize, BuildError> {
        let stage = self.name.clone();
        let index = self.outputs.len();
        let granted = self
            .output_pool
            .as_mut()
            .map(|pool| pool.allocate(handle, index).is_ok())
            .unwrap_or(false);
        if !granted {
            return Err(BuildError::PortUnavailable { stage, handle });
        }
        self.outputs
            .push(Port::requested(PortDirection::Output, handle));
        Ok(index)
    }

    pub fn input_pool(&self) -> Option<&PortPool> {
        self.input_pool.as_ref()
    }

    pub fn output_pool(&self) -> Option<&PortPool> {
        self.output_pool.as_ref()
    }

    /// Slots currently bound on the input side, ascending by handle.
    pub fn input_slots(&self) -> Vec<u32> {
        self.input_pool
            .as_ref()
            .map(|p| p.handles().collect())
            .unwrap_or_default()
    }

    /// Slots currently bound on the output side, ascending by handle.
    pub fn output_slots(&self) -> Vec<u32> {
        self.output_pool
            .as_ref()
            .map(|p| p.handles().collect())
            .unwrap_or_default()
    }

    /// Drop every requested port and clear the allocation tables. Fixed
    /// ports and their bindings survive; requested ports always live past
    /// the fixed ones, so truncation cannot disturb static indices.
    pub fn release_requested_ports(&mut self) {
        self.inputs.truncate(self.fixed_inputs);
        self.outputs.truncate(self.fixed_outputs);
        if let Some(pool) = self.input_pool.as_mut() {
            pool.clear();
        }
        if let Some(pool) = self.output_pool.as_mut() {
            pool.clear();
        }
    }

    pub(crate) fn bind_input(&mut self, index: usize, binding: PortBinding) {
        self.inputs[index].binding = binding;
    }

    pub(crate) fn bind_output(&mut self, index: usize, binding: PortBinding) {
        self.outputs[index].binding = binding;
    }

    pub fn start_runtime(&mut self, bus: &DiagnosticSender) -> Result<()> {
        self.runtime.start(bus)
    }

    pub fn stop_runtime(&mut self) {
        self.runtime.stop();
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

fn side(direction: PortDirection, count: PortCount) -> (Vec<Port>, Option<PortPool>) {
    match count {
        PortCount::Fixed(n) => {
            let ports = (0..n).map(|_| Port::fixed(direction)).collect();
            (ports, None)
        }
        PortCount::OnRequest { capacity } => (Vec::new(), Some(PortPool::new(capacity))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopRuntime;

    impl StageRuntime for NoopRuntime {
        fn start(&mut self, _bus: &DiagnosticSender) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) {}
    }

    fn batcher() -> Stage {
        Stage::new(
            "batch",
            "muxer",
            StageConfig::new(),
            PortCount::OnRequest { capacity: Some(2) },
            PortCount::Fixed(1),
            Box::new(NoopRuntime),
        )
    }

    #[test]
    fn stage_names_are_validated() {
        assert!(validate_stage_name("cam1-capture").is_ok());
        assert!(validate_stage_name("muxer").is_ok());
        assert!(validate_stage_name("Muxer").is_err());
        assert!(validate_stage_name("has space").is_err());
        assert!(validate_stage_name("").is_err());
    }

    #[test]
    fn requested_ports_are_keyed_by_handle() {
        let mut stage = batcher();
        stage.request_input(1).expect("slot 1");
        stage.request_input(0).expect("slot 0");
        // Ascending by handle, not allocation order.
        assert_eq!(stage.input_slots(), vec![0, 1]);
    }

    #[test]
    fn duplicate_handle_is_refused_not_overwritten() {
        let mut stage = batcher();
        let first = stage.request_input(0).expect("slot 0");
        let err = stage.request_input(0).unwrap_err();
        assert!(matches!(
            err,
            BuildError::PortUnavailable { handle: 0, .. }
        ));
        assert_eq!(stage.input_pool().unwrap().port_index(0), Some(first));
    }

    #[test]
    fn fixed_side_refuses_dynamic_requests() {
        let mut stage = batcher();
        let err = stage.request_output(0).unwrap_err();
        assert!(matches!(err, BuildError::PortUnavailable { .. }));
    }

    #[test]
    fn release_drops_requested_ports_only() {
        let mut stage = batcher();
        stage.request_input(0).expect("slot 0");
        stage.request_input(1).expect("slot 1");
        assert_eq!(stage.inputs().len(), 2);

        stage.release_requested_ports();
        assert!(stage.inputs().is_empty());
        assert_eq!(stage.outputs().len(), 1);
        assert!(stage.input_pool().unwrap().is_empty());
    }
}
