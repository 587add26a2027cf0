// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! `GStreamer` backend.
//!
//! Every node becomes one `GStreamer` element within a single pipeline, the
//! video mixer is followed by a `capsfilter` which fixes the canvas size.
//! Feeds are pumped into their `appsrc` by one thread each.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use gst::prelude::*;
use gst_app::{AppSink, AppSinkCallbacks, AppSrc};
use parking_lot::Mutex;

use crate::{
    AudioMix, Backend, Caps, Codec, CompositeFrame, Container, DrainSignal, Element, Encoding,
    Feed, FeedEnded, FeedEvent, MediaKind, PadRef, ParamValue, ProcessingNode, Sink, Size,
    Target, Topology,
};

/// How long a pump waits for a sample before checking whether to stop.
const PUMP_POLL: Duration = Duration::from_millis(100);

type SharedSink = Arc<Mutex<Box<dyn Sink>>>;

#[derive(Debug)]
struct Entry {
    element: gst::Element,
    /// element providing the `src` pad if it is not `element` itself
    output: Option<gst::Element>,
    canvas: Size,
}

impl Entry {
    fn elements(&self) -> impl Iterator<Item = &gst::Element> {
        std::iter::once(&self.element).chain(self.output.as_ref())
    }
}

#[derive(Debug)]
struct Pump {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

#[derive(Debug)]
struct BusWatch {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// [`Backend`] running the graph within a `GStreamer` pipeline.
#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct GstBackend {
    pipeline: gst::Pipeline,
    nodes: HashMap<String, Entry>,
    requested: HashMap<PadRef, gst::Pad>,
    feeds: HashMap<String, Feed>,
    pumps: HashMap<String, Pump>,
    #[derivative(Debug = "ignore")]
    sinks: HashMap<String, SharedSink>,
    canvas: Arc<Mutex<Size>>,
    #[derivative(Debug = "ignore")]
    feed_ended: Option<FeedEnded>,
    draining: Arc<AtomicBool>,
    #[derivative(Debug = "ignore")]
    drained: DrainSignal,
    bus: Option<BusWatch>,
}

impl GstBackend {
    /// Create an empty pipeline.
    ///
    /// # Errors
    ///
    /// This can fail if `GStreamer` cannot be initialized.
    pub fn new(name: &str) -> Result<Self> {
        gst::init().context("unable to initialize GStreamer")?;
        let pipeline = gst::Pipeline::new(Some(name));
        Ok(Self {
            pipeline,
            nodes: HashMap::new(),
            requested: HashMap::new(),
            feeds: HashMap::new(),
            pumps: HashMap::new(),
            sinks: HashMap::new(),
            canvas: Arc::new(Mutex::new(Size::default())),
            feed_ended: None,
            draining: Arc::new(AtomicBool::new(false)),
            drained: DrainSignal::new(),
            bus: None,
        })
    }

    fn is_active(&self) -> bool {
        self.bus.is_some()
    }

    fn entry(&self, node: &str) -> Result<&Entry> {
        self.nodes
            .get(node)
            .with_context(|| format!("there is no element for node '{node}'"))
    }

    fn pad(&self, pad: &PadRef) -> Result<gst::Pad> {
        if let Some(requested) = self.requested.get(pad) {
            return Ok(requested.clone());
        }
        let entry = self.entry(&pad.node)?;
        let element = match (&entry.output, pad.pad.as_str()) {
            (Some(output), "src") => output,
            _ => &entry.element,
        };
        element
            .static_pad(&pad.pad)
            .with_context(|| format!("unable to get static pad '{pad}'"))
    }

    fn start_pump(&mut self, node: &str) -> Result<()> {
        let Some(feed) = self.feeds.get(node).cloned() else {
            return Ok(());
        };
        let appsrc = self
            .entry(node)?
            .element
            .clone()
            .downcast::<AppSrc>()
            .map_err(|_| anyhow!("'{node}' is no appsrc"))?;
        let stop = Arc::new(AtomicBool::new(false));
        let feed_ended = self.feed_ended.clone();
        let draining = self.draining.clone();
        let name = node.to_owned();
        let thread = std::thread::Builder::new()
            .name(format!("pump-{node}"))
            .spawn({
                let stop = stop.clone();
                move || pump(&name, &feed, &appsrc, &stop, &draining, feed_ended)
            })
            .with_context(|| format!("unable to spawn pump for '{node}'"))?;
        if let Some(previous) = self.pumps.insert(node.to_owned(), Pump { stop, thread }) {
            stop_pump(node, previous);
        }
        Ok(())
    }

    fn sync_state(&self, node: &str) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        for element in self.entry(node)?.elements() {
            element
                .sync_state_with_parent()
                .with_context(|| format!("unable to sync state of '{node}'"))?;
        }
        Ok(())
    }

    fn update_canvas(&mut self, node: &str, name: &str, value: &ParamValue) -> Result<()> {
        let entry = self
            .nodes
            .get_mut(node)
            .with_context(|| format!("there is no element for node '{node}'"))?;
        let size = usize::try_from(value.as_u64().context("expected an unsigned integer")?)?;
        match name {
            "width" => entry.canvas.width = size,
            _ => entry.canvas.height = size,
        }
        if let Some(filter) = &entry.output {
            filter.set_property("caps", canvas_caps(entry.canvas)?);
        }
        *self.canvas.lock() = entry.canvas;
        Ok(())
    }
}

impl Backend for GstBackend {
    fn create(&mut self, node: &ProcessingNode) -> Result<()> {
        let name = node.name();
        let element = gst::ElementFactory::make(node.element().factory_name())
            .name(name)
            .build()
            .with_context(|| format!("unable to build {}", node.element()))?;

        let mut output = None;
        match node.element() {
            Element::AppSrc(caps) => {
                element.set_property("caps", gst_caps(caps));
                element.set_property_from_str("stream-type", "stream");
            }
            Element::CapsFilter(caps) => element.set_property("caps", gst_caps(caps)),
            Element::VideoMixer => {
                element.set_property("zero-size-is-unscaled", true);
                output = Some(
                    gst::ElementFactory::make("capsfilter")
                        .name(format!("{name}_canvas"))
                        .build()
                        .context("unable to build capsfilter")?,
                );
            }
            _ => {}
        }

        self.pipeline
            .add(&element)
            .with_context(|| format!("unable to add '{name}' to pipeline"))?;
        if let Some(filter) = &output {
            self.pipeline
                .add(filter)
                .with_context(|| format!("unable to add canvas of '{name}' to pipeline"))?;
            element
                .link(filter)
                .with_context(|| format!("unable to link '{name}' with its canvas"))?;
        }
        self.nodes.insert(
            name.to_owned(),
            Entry {
                element,
                output,
                canvas: Size::default(),
            },
        );

        for (param, value) in node.params() {
            self.set_parameter(&Target::Node(name.to_owned()), param, value)?;
        }
        self.sync_state(name)
    }

    fn remove(&mut self, node: &str) -> Result<()> {
        if let Some(pump) = self.pumps.remove(node) {
            stop_pump(node, pump);
        }
        self.feeds.remove(node);
        self.requested.retain(|pad, _| pad.node != node);
        let entry = self
            .nodes
            .remove(node)
            .with_context(|| format!("there is no element for node '{node}'"))?;
        for element in entry.elements() {
            element
                .set_state(gst::State::Null)
                .with_context(|| format!("unable to stop '{node}'"))?;
            self.pipeline
                .remove(element)
                .with_context(|| format!("unable to remove '{node}' from pipeline"))?;
        }
        if let Some(sink) = self.sinks.remove(node) {
            sink.lock()
                .on_exit()
                .with_context(|| format!("unable to exit sink of '{node}'"))?;
        }
        Ok(())
    }

    fn request_pad(&mut self, node: &str, template: &str, pad: &str) -> Result<()> {
        let element = &self.entry(node)?.element;
        let templ = element
            .pad_template(template)
            .with_context(|| format!("'{node}' has no pad template '{template}'"))?;
        let requested = element
            .request_pad(&templ, Some(pad), None)
            .with_context(|| format!("unable to request pad '{pad}' of '{node}'"))?;
        self.requested.insert(PadRef::new(node, pad), requested);
        Ok(())
    }

    fn release_pad(&mut self, node: &str, pad: &str) -> Result<()> {
        let key = PadRef::new(node, pad);
        let requested = self
            .requested
            .remove(&key)
            .with_context(|| format!("pad '{key}' has not been requested"))?;
        self.entry(node)?.element.release_request_pad(&requested);
        Ok(())
    }

    fn link(&mut self, src: &PadRef, sink: &PadRef) -> Result<()> {
        let src_pad = self.pad(src)?;
        let sink_pad = self.pad(sink)?;
        src_pad
            .link(&sink_pad)
            .map_err(|error| anyhow!("unable to link '{src}' with '{sink}': {error:?}"))?;
        self.sync_state(&src.node)?;
        self.sync_state(&sink.node)
    }

    fn unlink(&mut self, src: &PadRef, sink: &PadRef) -> Result<()> {
        let src_pad = self.pad(src)?;
        let sink_pad = self.pad(sink)?;
        src_pad
            .unlink(&sink_pad)
            .with_context(|| format!("unable to unlink '{src}' from '{sink}'"))
    }

    fn set_parameter(&mut self, target: &Target, name: &str, value: &ParamValue) -> Result<()> {
        match target {
            Target::Node(node) => {
                let entry = self.entry(node)?;
                if entry.output.is_some() && (name == "width" || name == "height") {
                    return self.update_canvas(node, name, value);
                }
                set_property(&entry.element, name, value)
            }
            Target::Pad(pad) => set_property(&self.pad(pad)?, name, value),
        }
    }

    fn attach_feed(&mut self, node: &str, feed: Feed) -> Result<()> {
        self.feeds.insert(node.to_owned(), feed);
        if self.is_active() {
            self.start_pump(node)?;
        }
        Ok(())
    }

    fn attach_sink(&mut self, node: &str, mut sink: Box<dyn Sink>) -> Result<()> {
        let appsink = self
            .entry(node)?
            .element
            .clone()
            .downcast::<AppSink>()
            .map_err(|_| anyhow!("only appsink nodes can deliver to a sink, '{node}' cannot"))?;
        if self.is_active() {
            sink.on_play().context("unable to set sink to playing")?;
        }
        let sink: SharedSink = Arc::new(Mutex::new(sink));
        let sequence = Arc::new(AtomicU64::new(0));
        let canvas = self.canvas.clone();
        let name = node.to_owned();
        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample({
                    let sink = sink.clone();
                    move |appsink| {
                        let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                        let pts = sample
                            .buffer()
                            .and_then(gst::BufferRef::pts)
                            .map(|pts| Duration::from_nanos(pts.nseconds()))
                            .unwrap_or_default();
                        let is_video = sample
                            .caps()
                            .and_then(|caps| caps.structure(0))
                            .is_some_and(|s| s.name().starts_with("video/"));
                        let sequence = sequence.fetch_add(1, Ordering::Relaxed);
                        let result = if is_video {
                            sink.lock().on_video(&CompositeFrame {
                                sequence,
                                pts,
                                canvas: *canvas.lock(),
                                layers: Vec::new(),
                            })
                        } else {
                            sink.lock().on_audio(&AudioMix {
                                sequence,
                                pts,
                                chunks: Vec::new(),
                            })
                        };
                        if let Err(error) = result {
                            warn!("sink '{name}' failed to handle sample: {error:#}");
                        }
                        Ok(gst::FlowSuccess::Ok)
                    }
                })
                .eos({
                    let sink = sink.clone();
                    move |_| {
                        if let Err(error) = sink.lock().on_eos() {
                            warn!("sink failed to handle end-of-stream: {error:#}");
                        }
                    }
                })
                .build(),
        );
        self.sinks.insert(node.to_owned(), sink);
        Ok(())
    }

    fn commit(&mut self, topology: &Topology) -> Result<()> {
        // parameters are applied to the elements right away
        trace!("commit: {} node(s)", topology.len());
        Ok(())
    }

    fn activate(&mut self, feed_ended: FeedEnded) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        for (name, sink) in &self.sinks {
            sink.lock()
                .on_play()
                .with_context(|| format!("unable to set sink '{name}' to playing"))?;
        }
        self.feed_ended = Some(feed_ended);

        let bus = self.pipeline.bus().context("failed to get bus of pipeline")?;
        let stop = Arc::new(AtomicBool::new(false));
        let drained = self.drained.clone();
        let thread = std::thread::Builder::new()
            .name("pipeline-bus".to_owned())
            .spawn({
                let stop = stop.clone();
                move || read_bus(&bus, &stop, &drained)
            })
            .context("unable to spawn bus reader")?;
        self.bus = Some(BusWatch { stop, thread });

        self.pipeline
            .set_state(gst::State::Playing)
            .context("unable to start pipeline")?;
        let nodes = self.feeds.keys().cloned().collect::<Vec<_>>();
        for node in nodes {
            self.start_pump(&node)?;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        if self.draining.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for feed in self.feeds.values() {
            feed.end();
        }
        if !self.is_active() {
            self.drained.notify();
        }
        Ok(())
    }

    fn drained(&self) -> DrainSignal {
        self.drained.clone()
    }

    fn teardown(&mut self, grace: Duration) -> Result<()> {
        debug!("Nulling pipeline...");
        for (node, pump) in self.pumps.drain() {
            stop_pump(&node, pump);
        }
        for feed in self.feeds.values() {
            feed.end();
        }
        let mut result = self
            .pipeline
            .set_state(gst::State::Null)
            .map(|_| ())
            .context("unable to set the pipeline to the `Null` state");
        let (_, state, _) = self.pipeline.state(gst::ClockTime::from_nseconds(
            u64::try_from(grace.as_nanos()).unwrap_or(u64::MAX),
        ));
        trace!("pipeline is {state:?}");

        if let Some(bus) = self.bus.take() {
            bus.stop.store(true, Ordering::SeqCst);
            if bus.thread.join().is_err() {
                error!("bus reader panicked");
            }
        }
        for (name, sink) in self.sinks.drain() {
            let Some(mut sink) = sink.try_lock_for(grace) else {
                warn!("sink '{name}' is still busy after {grace:?}, skipping it");
                result = result.and(Err(anyhow!(
                    "sink '{name}' did not become free within {grace:?}"
                )));
                continue;
            };
            if let Err(error) = sink.on_exit() {
                error!("unable to call on_exit on sink '{name}': {error:#}");
            }
        }
        self.feeds.clear();
        result
    }
}

impl Drop for GstBackend {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(error) = self.teardown(Duration::from_secs(1)) {
                error!("unable to tear down pipeline: {error:#}");
            }
        }
    }
}

/// Body of a pump thread.
fn pump(
    name: &str,
    feed: &Feed,
    appsrc: &AppSrc,
    stop: &AtomicBool,
    draining: &AtomicBool,
    feed_ended: Option<FeedEnded>,
) {
    debug!("pumping feed of track '{}' into '{name}'", feed.track().id);
    while !stop.load(Ordering::SeqCst) {
        match feed.next_timeout(PUMP_POLL) {
            FeedEvent::Sample(sample) => {
                let buffer = gst::Buffer::from_slice(sample.payload);
                if let Err(error) = appsrc.push_buffer(buffer) {
                    debug!("'{name}' refused buffer: {error:?}");
                    break;
                }
            }
            FeedEvent::Empty => {}
            FeedEvent::Ended => {
                if let Err(error) = appsrc.end_of_stream() {
                    warn!("unable to send end-of-stream on '{name}': {error:?}");
                }
                if !draining.load(Ordering::SeqCst) {
                    if let Some(feed_ended) = &feed_ended {
                        feed_ended(name);
                    }
                }
                break;
            }
        }
    }
    trace!("pump of '{name}' stopped");
}

fn stop_pump(node: &str, pump: Pump) {
    pump.stop.store(true, Ordering::SeqCst);
    if pump.thread.join().is_err() {
        error!("pump of '{node}' panicked");
    }
}

/// Read the pipeline bus until `stop` is raised.
fn read_bus(bus: &gst::Bus, stop: &AtomicBool, drained: &DrainSignal) {
    use gst::MessageView;
    while !stop.load(Ordering::SeqCst) {
        let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(100)) else {
            continue;
        };
        match msg.view() {
            MessageView::Eos(_) => {
                info!("pipeline reached end-of-stream");
                drained.notify();
            }
            MessageView::Error(err) => {
                error!(
                    "Error received from element {:?}: {}",
                    err.src().map(GstObjectExt::path_string),
                    err.error(),
                );
                if let Some(info) = err.debug() {
                    debug!("Debugging information: {}", info);
                }
            }
            MessageView::Warning(warning) => {
                warn!(
                    "Warning received from element {:?}: {}",
                    warning.src().map(GstObjectExt::path_string),
                    warning.error(),
                );
            }
            _ => (),
        }
    }
}

/// Set a property, converting `value` into the type the property declares.
fn set_property(object: &impl IsA<glib::Object>, name: &str, value: &ParamValue) -> Result<()> {
    let Some(pspec) = object.find_property(name) else {
        bail!("there is no property '{name}'");
    };
    let ty = pspec.value_type();
    let int = || value.as_i64().context("expected an integer");
    let uint = || value.as_u64().context("expected an unsigned integer");
    let converted = if ty == glib::Type::BOOL {
        value.as_bool().context("expected a boolean")?.to_value()
    } else if ty == glib::Type::I32 {
        i32::try_from(int()?)?.to_value()
    } else if ty == glib::Type::I64 {
        int()?.to_value()
    } else if ty == glib::Type::U32 {
        u32::try_from(uint()?)?.to_value()
    } else if ty == glib::Type::U64 {
        uint()?.to_value()
    } else if ty == glib::Type::F64 {
        value.as_f64().context("expected a float")?.to_value()
    } else if ty == glib::Type::F32 {
        #[allow(clippy::cast_possible_truncation)]
        (value.as_f64().context("expected a float")? as f32).to_value()
    } else {
        // strings, enums and flags
        let text = value.as_str().map_or_else(|| value.to_string(), str::to_owned);
        object.set_property_from_str(name, &text);
        return Ok(());
    };
    object.set_property_from_value(name, &converted);
    Ok(())
}

fn canvas_caps(canvas: Size) -> Result<gst::Caps> {
    let mut builder = gst::Caps::builder("video/x-raw");
    if canvas.width > 0 {
        builder = builder.field("width", i32::try_from(canvas.width)?);
    }
    if canvas.height > 0 {
        builder = builder.field("height", i32::try_from(canvas.height)?);
    }
    Ok(builder.build())
}

fn clock_rate(codec: Codec) -> i32 {
    match codec.kind() {
        MediaKind::Video => 90_000,
        MediaKind::Audio => 48_000,
    }
}

/// Translate caps of the graph model into `GStreamer` caps.
fn gst_caps(caps: Caps) -> gst::Caps {
    match (caps.media, caps.encoding) {
        (None, None) => gst::Caps::new_any(),
        (Some(media), None) => gst::Caps::builder(format!("{media}/x-raw")).build(),
        (media, Some(Encoding::Raw)) => {
            gst::Caps::builder(format!("{}/x-raw", media.unwrap_or(MediaKind::Video))).build()
        }
        (_, Some(Encoding::Rtp(codec))) => gst::Caps::builder("application/x-rtp")
            .field("media", codec.kind().to_string())
            .field("encoding-name", codec.encoding_name())
            .field("clock-rate", clock_rate(codec))
            .build(),
        (_, Some(Encoding::Coded(codec))) => gst::Caps::builder(format!(
            "{}/x-{}",
            codec.kind(),
            codec.encoding_name().to_lowercase()
        ))
        .build(),
        (_, Some(Encoding::Container(Container::Mp4))) => {
            gst::Caps::builder("video/quicktime").build()
        }
        (_, Some(Encoding::Container(Container::Matroska))) => {
            gst::Caps::builder("video/x-matroska").build()
        }
    }
}
