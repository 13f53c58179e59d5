//! GStreamer execution backend (feature "gst-backend").
//!
//! Materializes a built graph as a real `gstreamer::Pipeline`: one element
//! per stage, options forwarded as element properties, request pads
//! `sink_<handle>` / `src_<handle>` at the dynamic boundaries, and a bus
//! poll thread forwarding Error/Eos/Warning/StateChanged messages into the
//! diagnostic channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use serde_json::Value;

use crate::diag::{DiagnosticSender, Notification};
use crate::graph::Graph;
use crate::lifecycle::PipelineState;
use crate::stage::Stage;

/// GStreamer element factory for each built-in stage kind.
fn element_for(kind: &str) -> Option<&'static str> {
    let name = match kind {
        "capture" => "nvarguscamerasrc",
        "convert" => "nvvideoconvert",
        "batch" => "nvstreammux",
        "infer" => "nvinfer",
        "track" => "nvtracker",
        "analytics" => "nvdsanalytics",
        "demux" => "nvstreamdemux",
        "queue" => "queue",
        "overlay" => "nvdsosd",
        "transform" => "nvegltransform",
        "display-sink" => "nveglglessink",
        "encode" => "nvv4l2h264enc",
        "parse" => "h264parse",
        "publish-sink" => "rtmpsink",
        _ => return None,
    };
    Some(name)
}

/// Translate a stage option to the element property it configures.
/// `None` means the option has no element-level counterpart and is skipped
/// (synthetic pacing knobs, caps-level format hints).
fn property_for(kind: &str, option: &str) -> Option<String> {
    let renamed = match (kind, option) {
        ("infer", "config-file") => "config-file-path",
        ("track", "lib-file") => "ll-lib-file",
        ("track", "batch-process") => "enable-batch-process",
        ("track", "past-frames") => "enable-past-frame",
        ("capture", "fps") | ("capture", "frames") => return None,
        ("convert", "width") | ("convert", "height") | ("convert", "format") => return None,
        (_, option) => option,
    };
    Some(renamed.to_string())
}

fn value_as_property_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn apply_options(element: &gst::Element, stage: &Stage) -> Result<()> {
    for (option, value) in stage.config().iter() {
        let Some(property) = property_for(stage.kind(), option) else {
            log::debug!(
                "stage '{}': option '{}' has no element property, skipped",
                stage.name(),
                option
            );
            continue;
        };
        if element.find_property(&property).is_none() {
            log::warn!(
                "stage '{}': element has no property '{}', skipped",
                stage.name(),
                property
            );
            continue;
        }
        let Some(raw) = value_as_property_str(value) else {
            return Err(anyhow!(
                "stage '{}': option '{}' has an unsupported value shape",
                stage.name(),
                option
            ));
        };
        element.set_property_from_str(&property, &raw);
    }
    Ok(())
}

fn map_state(state: gst::State) -> PipelineState {
    match state {
        gst::State::Playing => PipelineState::Playing,
        gst::State::Paused => PipelineState::Paused,
        gst::State::Ready => PipelineState::Ready,
        _ => PipelineState::Idle,
    }
}

/// A materialized GStreamer pipeline plus its bus watcher.
pub struct GstExecutor {
    pipeline: gst::Pipeline,
    quit: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

impl GstExecutor {
    /// Build the element graph. The orchestration graph stays the source
    /// of truth; this only mirrors its topology.
    pub fn materialize(graph: &Graph) -> Result<Self> {
        gst::init().context("initialize gstreamer")?;

        let pipeline = gst::Pipeline::new();
        let mut elements: HashMap<String, gst::Element> = HashMap::new();

        for stage in graph.stages() {
            let factory = element_for(stage.kind()).ok_or_else(|| {
                anyhow!(
                    "stage kind '{}' has no gstreamer element mapping",
                    stage.kind()
                )
            })?;
            let element = gst::ElementFactory::make(factory)
                .name(stage.name())
                .build()
                .with_context(|| format!("create element '{}' for stage '{}'", factory, stage.name()))?;
            apply_options(&element, stage)?;
            pipeline
                .add(&element)
                .with_context(|| format!("add stage '{}' to pipeline", stage.name()))?;
            elements.insert(stage.name().to_string(), element);
        }

        for link in graph.links() {
            let from = &elements[&link.from.stage];
            let to = &elements[&link.to.stage];
            match (link.from.slot, link.to.slot) {
                (None, None) => {
                    from.link(to).with_context(|| {
                        format!("link '{}' -> '{}'", link.from.stage, link.to.stage)
                    })?;
                }
                (None, Some(slot)) => {
                    let srcpad = from
                        .static_pad("src")
                        .with_context(|| format!("stage '{}' has no src pad", link.from.stage))?;
                    let sinkpad = to
                        .request_pad_simple(&format!("sink_{}", slot))
                        .with_context(|| {
                            format!("stage '{}' refused pad sink_{}", link.to.stage, slot)
                        })?;
                    srcpad.link(&sinkpad).map_err(|e| {
                        anyhow!(
                            "link '{}' into slot {} on '{}': {:?}",
                            link.from.stage,
                            slot,
                            link.to.stage,
                            e
                        )
                    })?;
                }
                (Some(slot), None) => {
                    let srcpad = from
                        .request_pad_simple(&format!("src_{}", slot))
                        .with_context(|| {
                            format!("stage '{}' refused pad src_{}", link.from.stage, slot)
                        })?;
                    let sinkpad = to
                        .static_pad("sink")
                        .with_context(|| format!("stage '{}' has no sink pad", link.to.stage))?;
                    srcpad.link(&sinkpad).map_err(|e| {
                        anyhow!(
                            "link slot {} on '{}' into '{}': {:?}",
                            slot,
                            link.from.stage,
                            link.to.stage,
                            e
                        )
                    })?;
                }
                (Some(_), Some(_)) => {
                    return Err(anyhow!(
                        "link '{}' -> '{}' is dynamic on both ends",
                        link.from.stage,
                        link.to.stage
                    ));
                }
            }
        }

        Ok(Self {
            pipeline,
            quit: Arc::new(AtomicBool::new(false)),
            watcher: None,
        })
    }

    /// Set the pipeline playing and start forwarding bus messages.
    pub fn start(&mut self, bus: &DiagnosticSender) -> Result<()> {
        self.pipeline
            .set_state(gst::State::Playing)
            .context("set pipeline to Playing")?;

        self.quit.store(false, Ordering::SeqCst);
        let gst_bus = self.pipeline.bus().context("pipeline has no bus")?;
        let sender = bus.clone();
        let quit = self.quit.clone();

        let watcher = std::thread::Builder::new()
            .name("gst-bus-watch".to_string())
            .spawn(move || {
                use gst::MessageView;
                while !quit.load(Ordering::SeqCst) {
                    let Some(message) = gst_bus.timed_pop(gst::ClockTime::from_mseconds(100))
                    else {
                        continue;
                    };
                    let source = message
                        .src()
                        .map(|s| s.path_string().to_string())
                        .unwrap_or_else(|| "pipeline".to_string());
                    match message.view() {
                        MessageView::Error(err) => {
                            sender.error(&source, err.error().to_string());
                        }
                        MessageView::Eos(..) => {
                            sender.end_of_stream(&source);
                        }
                        MessageView::Warning(warning) => {
                            sender.warning(&source, warning.error().to_string());
                        }
                        MessageView::StateChanged(change) => {
                            sender.state_changed(&source, map_state(change.current()));
                        }
                        _ => {
                            sender.emit(Notification::Other {
                                stage: source,
                                kind: format!("{:?}", message.type_()),
                            });
                        }
                    }
                }
            })?;
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Quiesce the bus watcher and drop the pipeline to Null.
    pub fn stop(&mut self) {
        self.quit.store(true, Ordering::SeqCst);
        if let Some(watcher) = self.watcher.take() {
            if watcher.join().is_err() {
                log::warn!("gstreamer bus watcher panicked during shutdown");
            }
        }
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("failed to set pipeline to Null: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_kind_has_an_element_mapping() {
        for kind in crate::factory::StageFactory::with_builtin_kinds().kinds() {
            assert!(element_for(kind).is_some(), "kind '{}' unmapped", kind);
        }
    }

    #[test]
    fn synthetic_options_have_no_property_counterpart() {
        assert_eq!(property_for("capture", "frames"), None);
        assert_eq!(property_for("capture", "fps"), None);
        assert_eq!(
            property_for("infer", "config-file").as_deref(),
            Some("config-file-path")
        );
        assert_eq!(
            property_for("track", "past-frames").as_deref(),
            Some("enable-past-frame")
        );
    }
}
