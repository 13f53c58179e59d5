//! End-to-end orchestration scenarios: build, start, inject notifications,
//! observe teardown.

use std::sync::atomic::AtomicBool;

use camgraph::{
    diag, pipeline, BuildError, LifecycleController, PipelineSettings, PipelineState, RunOutcome,
    SourceDescriptor, StageConfig, StageFactory,
};

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
fn build_yields_correlated_slot_pairs() {
    let factory = StageFactory::with_builtin_kinds();
    let graph = pipeline::assemble(&factory, &settings(&[(0, "cam1"), (1, "cam2")]))
        .expect("assemble");

    let ingress = graph.stage(pipeline::BATCH_STAGE).unwrap().input_slots();
    let egress = graph.stage(pipeline::DEMUX_STAGE).unwrap().output_slots();
    assert_eq!(ingress, vec![0, 1]);
    assert_eq!(ingress, egress);
}

#[test]
fn bogus_stage_kind_fails_with_unavailable_kind() {
    let factory = StageFactory::with_builtin_kinds();
    let err = factory
        .create("bogus-stage", "anything", StageConfig::new())
        .unwrap_err();
    assert!(matches!(err, BuildError::UnavailableKind(kind) if kind == "bogus-stage"));
}

// Scenario A: two sources; a synthetic EndOfStream drives the graph to
// Idle and releases both dynamic port pairs.
#[test]
fn end_of_stream_drives_graph_to_idle_and_releases_ports() {
    let factory = StageFactory::with_builtin_kinds();
    let graph = pipeline::assemble(&factory, &settings(&[(0, "cam1"), (1, "cam2")]))
        .expect("assemble");
    assert_eq!(graph.dynamic_port_count(), 4);

    let (bus, mut channel) = diag::channel();
    let injector = bus.clone();
    let mut controller = LifecycleController::new(graph, bus);
    controller.start().expect("start");

    injector.end_of_stream("cam1-capture");

    let interrupt = AtomicBool::new(false);
    let outcome = channel.run(&mut controller, &interrupt);
    assert_eq!(outcome, RunOutcome::EndOfStream);
    assert_eq!(controller.state(), PipelineState::Idle);
    assert_eq!(controller.graph().dynamic_port_count(), 0);
}

// Scenario B: one source; a synthetic runtime error stops the pipeline
// once and surfaces as a fault (the daemon maps this to a non-zero exit).
#[test]
fn runtime_error_stops_once_and_reports_fault() {
    let factory = StageFactory::with_builtin_kinds();
    let graph =
        pipeline::assemble(&factory, &settings(&[(0, "cam1")])).expect("assemble");

    let (bus, mut channel) = diag::channel();
    let injector = bus.clone();
    let mut controller = LifecycleController::new(graph, bus);
    controller.start().expect("start");

    injector.error("cam1-capture", "decode failed mid-stream");

    let interrupt = AtomicBool::new(false);
    let outcome = channel.run(&mut controller, &interrupt);
    assert_eq!(
        outcome,
        RunOutcome::Fault {
            stage: "cam1-capture".to_string(),
            detail: "decode failed mid-stream".to_string(),
        }
    );
    assert_eq!(controller.state(), PipelineState::Idle);

    // The loop already stopped the pipeline; a second stop is a no-op.
    controller.stop();
    assert_eq!(controller.state(), PipelineState::Idle);
    assert_eq!(controller.graph().dynamic_port_count(), 0);
}

// Scenario C: two sources sharing a handle must fail the build before any
// sink stage is created.
#[test]
fn duplicate_handles_fail_before_sinks_exist() {
    let factory = StageFactory::with_builtin_kinds();
    let err = pipeline::assemble(&factory, &settings(&[(0, "cam1"), (0, "cam2")])).unwrap_err();
    assert!(matches!(err, BuildError::PortUnavailable { handle: 0, .. }));
}

#[test]
fn warnings_do_not_terminate_the_loop() {
    let factory = StageFactory::with_builtin_kinds();
    let graph =
        pipeline::assemble(&factory, &settings(&[(0, "cam1")])).expect("assemble");

    let (bus, mut channel) = diag::channel();
    let injector = bus.clone();
    let mut controller = LifecycleController::new(graph, bus);
    controller.start().expect("start");

    injector.warning("cam1-capture", "frame late");
    injector.emit(camgraph::Notification::Other {
        stage: "cam1-capture".to_string(),
        kind: "qos".to_string(),
    });
    injector.end_of_stream("cam1-capture");

    let interrupt = AtomicBool::new(false);
    let outcome = channel.run(&mut controller, &interrupt);
    // The warning and the unrecognized kind were logged and skipped; only
    // the end of stream terminated the loop.
    assert_eq!(outcome, RunOutcome::EndOfStream);
}

// With a frame budget configured, the capture runtimes drain on their own
// and end of stream arrives without any injection.
#[test]
fn pipeline_drains_when_capture_budget_runs_out() {
    let factory = StageFactory::with_builtin_kinds();
    let mut settings = settings(&[(0, "cam1")]);
    settings.capture.fps = 100;
    settings.capture.frame_budget = Some(3);
    let graph = pipeline::assemble(&factory, &settings).expect("assemble");

    let (bus, mut channel) = diag::channel();
    let mut controller = LifecycleController::new(graph, bus);
    controller.start().expect("start");

    let interrupt = AtomicBool::new(false);
    let outcome = channel.run(&mut controller, &interrupt);
    assert_eq!(outcome, RunOutcome::EndOfStream);
    assert_eq!(controller.state(), PipelineState::Idle);
}
