// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::{
    fmt::{Debug, Display},
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

mod config;
pub mod debug;
mod sink;
mod stream;

pub use config::*;
pub use sink::*;
pub use stream::*;

use crate::{
    Backend, Caps, Element, Error, Feed, FeedEnded, FeedbackSink, Graph, KeyframeRequester,
    Layout, LayoutError, LinkedPads, MediaKind, NodeKind, OverflowPolicy, PadRef, ParamValue,
    ProcessingNode, Rect, Result, SoftBackend, Topology, TrackInfo, TrackIngestionBridge,
};

/// Name of the node compositing all video sources.
pub const VIDEO_MIXER: &str = "video_mixer";
/// Name of the node mixing all audio sources.
pub const AUDIO_MIXER: &str = "audio_mixer";

/// `format` value of an application source producing timestamps
const FORMAT_TIME: i32 = 3;

/// Lifecycle state of a [`Compositor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// graph can be built, nothing flows yet
    Idle,
    /// media is flowing, the graph can still be changed
    Running,
    /// end-of-stream has been sent, waiting for it to reach the sinks
    Draining,
    /// torn down, every operation fails
    Stopped,
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        })
    }
}

#[derive(Debug)]
struct Inner {
    state: State,
    // `None` once stopped
    graph: Option<Graph>,
    layout: Layout,
    overflow: OverflowPolicy,
    /// active video sources in arrival order
    video: Vec<ActiveSource>,
    audio: Vec<ActiveSource>,
    placements: Vec<Placement>,
    video_output: bool,
    audio_output: bool,
    feedback: Option<Arc<dyn FeedbackSink>>,
    next_id: u64,
}

#[derive(Debug)]
struct Shared {
    config: CompositorConfig,
    inner: Mutex<Inner>,
}

/// Live compositor mixing a changing set of sources into one output.
///
/// The compositor owns a processing graph with one video and one audio mixer.
/// Sources can be added and removed at any time before it is stopped, video
/// sources are arranged on the canvas by a [`Layout`] which is re-evaluated
/// whenever the number of active video sources changes.
///
/// All operations are serialized by one lock, the handle can be cloned and
/// shared between threads.
///
/// ```text
///  bridge ─▶ video0_src ─▶ … ─▶ video0_caps ─┐
///  bridge ─▶ video1_src ─▶ … ─▶ video1_caps ─┴▶ video_mixer ─▶ (video sink chain)
///  bridge ─▶ audio2_src ─▶ … ─▶ audio2_convert ─▶ audio_mixer ─▶ (audio sink chain)
/// ```
#[derive(Clone)]
pub struct Compositor {
    shared: Arc<Shared>,
}

impl Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Compositor {
    /// Create an idle compositor running its graph on `backend`.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot create the mixers.
    pub fn new(config: CompositorConfig, layout: Layout, backend: impl Backend) -> Result<Self> {
        info!("create( {} )", layout.canvas());
        let mut graph = Graph::new(Box::new(backend));
        let canvas = layout.canvas();
        graph.add(
            ProcessingNode::new(Element::VideoMixer, VIDEO_MIXER)
                .with_parameter("width", canvas.width)?
                .with_parameter("height", canvas.height)?,
        )?;
        graph.add(ProcessingNode::new(Element::AudioMixer, AUDIO_MIXER))?;

        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: State::Idle,
                    graph: Some(graph),
                    layout,
                    overflow: config.overflow,
                    video: Vec::new(),
                    audio: Vec::new(),
                    placements: Vec::new(),
                    video_output: false,
                    audio_output: false,
                    feedback: None,
                    next_id: 0,
                }),
                config,
            }),
        })
    }

    /// Create an idle compositor on the in-process [`SoftBackend`].
    ///
    /// # Errors
    ///
    /// Fails if the mixers cannot be created.
    pub fn soft(config: CompositorConfig, layout: Layout) -> Result<Self> {
        let backend = SoftBackend::new(config.runtime());
        Self::new(config, layout, backend)
    }

    #[must_use]
    pub fn config(&self) -> &CompositorConfig {
        &self.shared.config
    }

    /// Create a bridge for `track` using the queue settings of this compositor.
    #[must_use]
    pub fn bridge(&self, track: TrackInfo) -> TrackIngestionBridge {
        TrackIngestionBridge::new(track, self.shared.config.bridge())
    }

    /// Send keyframe requests of all video sources added from now on to `sink`.
    pub fn set_feedback(&self, sink: Arc<dyn FeedbackSink>) {
        self.shared.inner.lock().feedback = Some(sink);
    }

    /// Register a node without linking it.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken or the node cannot be created.
    pub fn add(&self, node: ProcessingNode) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        inner.graph("add")?.add(node)
    }

    /// Build a video branch for the track of `bridge` and link it to the video mixer.
    ///
    /// The layout for the new number of video sources is checked before the
    /// graph is touched. If anything fails later, all nodes created for the
    /// branch are removed again.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Layout`] if the source cannot be placed, with
    /// [`Error::Construction`] for a non-video track and with [`Error::Link`]
    /// if the branch cannot be linked.
    pub fn add_video(&self, bridge: &TrackIngestionBridge) -> Result<SourceId> {
        let track = bridge.track().clone();
        info!("add_video( '{}', {} )", track.id, track.codec);

        let mut inner = self.shared.inner.lock();
        inner.graph("add_video")?;
        check_track(&track, MediaKind::Video)?;

        let id = SourceId(inner.next_id);
        let mut ids = inner.video_ids();
        ids.push(id);
        let placements = evaluate(&inner.layout, inner.overflow, &ids)?;

        let prefix = format!("video{}", id.0);
        let nodes = vec![
            app_source(&prefix, &track)?,
            ProcessingNode::new(Element::Depayloader(track.codec), format!("{prefix}_depay")),
            ProcessingNode::new(Element::Decoder(track.codec), format!("{prefix}_dec")),
            ProcessingNode::new(Element::VideoConvert, format!("{prefix}_convert")),
            ProcessingNode::new(Element::VideoScale, format!("{prefix}_scale")),
            ProcessingNode::new(
                Element::CapsFilter(Caps::raw(MediaKind::Video)),
                format!("{prefix}_caps"),
            ),
        ];
        let names = node_names(&nodes);
        let mixer_pad = build_branch(inner.graph("add_video")?, nodes, bridge.feed(), VIDEO_MIXER)?;

        inner.next_id += 1;
        inner.video.push(ActiveSource {
            id,
            kind: MediaKind::Video,
            track: Some(track.id.clone()),
            feed_node: format!("{prefix}_src"),
            nodes: names,
            mixer_pad,
            keyframes: None,
        });

        if let Err(error) = inner.apply(placements).and_then(|()| inner.commit()) {
            warn!("unable to place video source {id}, removing it: {error}");
            if let Err(error) = inner.remove(id, "add_video") {
                error!("unable to roll back video source {id}: {error}");
            }
            return Err(error);
        }

        let keyframes = match (self.shared.config.keyframe_interval(), &inner.feedback) {
            (Some(interval), Some(sink)) => {
                match KeyframeRequester::start(bridge.clone(), interval, sink.clone()) {
                    Ok(requester) => Some(requester),
                    Err(error) => {
                        warn!("unable to request keyframes for '{}': {error:#}", track.id);
                        None
                    }
                }
            }
            _ => None,
        };
        if let Some(source) = inner.video.last_mut() {
            source.keyframes = keyframes;
        }

        debug!("Added video source {id}");
        inner.debug_dot("add_video");
        Ok(id)
    }

    /// Build an audio branch for the track of `bridge` and link it to the audio mixer.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Construction`] for a non-audio track and with
    /// [`Error::Link`] if the branch cannot be linked.
    pub fn add_audio(&self, bridge: &TrackIngestionBridge) -> Result<SourceId> {
        let track = bridge.track().clone();
        info!("add_audio( '{}', {} )", track.id, track.codec);

        let mut inner = self.shared.inner.lock();
        inner.graph("add_audio")?;
        check_track(&track, MediaKind::Audio)?;

        let id = SourceId(inner.next_id);
        let prefix = format!("audio{}", id.0);
        let nodes = vec![
            app_source(&prefix, &track)?,
            ProcessingNode::new(
                Element::CapsFilter(Caps::rtp(track.codec)),
                format!("{prefix}_caps"),
            ),
            ProcessingNode::new(Element::Depayloader(track.codec), format!("{prefix}_depay")),
            ProcessingNode::new(Element::Decoder(track.codec), format!("{prefix}_dec")),
            ProcessingNode::new(Element::AudioConvert, format!("{prefix}_convert")),
        ];
        let names = node_names(&nodes);
        let mixer_pad = build_branch(inner.graph("add_audio")?, nodes, bridge.feed(), AUDIO_MIXER)?;

        inner.next_id += 1;
        inner.audio.push(ActiveSource {
            id,
            kind: MediaKind::Audio,
            track: Some(track.id.clone()),
            feed_node: format!("{prefix}_src"),
            nodes: names,
            mixer_pad,
            keyframes: None,
        });
        if let Err(error) = inner.commit() {
            if let Err(error) = inner.remove(id, "add_audio") {
                error!("unable to roll back audio source {id}: {error}");
            }
            return Err(error);
        }

        debug!("Added audio source {id}");
        inner.debug_dot("add_audio");
        Ok(id)
    }

    /// Link the caller built chain ending at `tail` to the video mixer.
    ///
    /// The chain must start at a source node, its nodes belong to the new
    /// source from now on and are removed with it.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Layout`] if the source cannot be placed and with
    /// [`Error::Link`] if the chain cannot be linked.
    pub fn add_video_node(&self, tail: &str) -> Result<SourceId> {
        info!("add_video_node( '{tail}' )");
        let mut inner = self.shared.inner.lock();
        let chain = inner.chain("add_video_node", tail, VIDEO_MIXER)?;

        let id = SourceId(inner.next_id);
        let mut ids = inner.video_ids();
        ids.push(id);
        let placements = evaluate(&inner.layout, inner.overflow, &ids)?;

        let linked = inner.graph("add_video_node")?.link(tail, VIDEO_MIXER)?;
        inner.next_id += 1;
        inner.video.push(ActiveSource {
            id,
            kind: MediaKind::Video,
            track: None,
            feed_node: chain.first().cloned().unwrap_or_default(),
            nodes: chain,
            mixer_pad: linked.sink,
            keyframes: None,
        });
        if let Err(error) = inner.apply(placements).and_then(|()| inner.commit()) {
            if let Err(error) = inner.remove(id, "add_video_node") {
                error!("unable to roll back video source {id}: {error}");
            }
            return Err(error);
        }
        Ok(id)
    }

    /// Link the caller built chain ending at `tail` to the audio mixer.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Link`] if the chain cannot be linked.
    pub fn add_audio_node(&self, tail: &str) -> Result<SourceId> {
        info!("add_audio_node( '{tail}' )");
        let mut inner = self.shared.inner.lock();
        let chain = inner.chain("add_audio_node", tail, AUDIO_MIXER)?;

        let linked = inner.graph("add_audio_node")?.link(tail, AUDIO_MIXER)?;
        let id = SourceId(inner.next_id);
        inner.next_id += 1;
        inner.audio.push(ActiveSource {
            id,
            kind: MediaKind::Audio,
            track: None,
            feed_node: chain.first().cloned().unwrap_or_default(),
            nodes: chain,
            mixer_pad: linked.sink,
            keyframes: None,
        });
        if let Err(error) = inner.commit() {
            if let Err(error) = inner.remove(id, "add_audio_node") {
                error!("unable to roll back audio source {id}: {error}");
            }
            return Err(error);
        }
        Ok(id)
    }

    /// Feed the source node `node` from `bridge`.
    ///
    /// # Errors
    ///
    /// Fails if `node` is not a source node.
    pub fn attach_bridge(&self, node: &str, bridge: &TrackIngestionBridge) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        inner.graph("attach_bridge")?.attach_feed(node, bridge.feed())?;
        inner.commit()
    }

    /// Link a free src pad of `src` to a compatible sink pad of `sink`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Link`] naming the endpoints.
    pub fn link(&self, src: &str, sink: &str) -> Result<LinkedPads> {
        let mut inner = self.shared.inner.lock();
        let linked = inner.graph("link")?.link(src, sink)?;
        inner.commit()?;
        Ok(linked)
    }

    /// Link the named pads.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Link`] naming the endpoints.
    pub fn link_pads(&self, src: &PadRef, sink: &PadRef) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        inner.graph("link_pads")?.link_pads(src, sink)?;
        inner.commit()
    }

    /// Request a pad of `node` from `template`, returns the pad name.
    ///
    /// # Errors
    ///
    /// Fails if the node has no such request template.
    pub fn request_pad(&self, node: &str, template: &str) -> Result<String> {
        let mut inner = self.shared.inner.lock();
        inner.graph("request_pad")?.request_pad(node, template)
    }

    /// Set a parameter of `node`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidParameter`] if the node rejects it.
    pub fn set_parameter(&self, node: &str, name: &str, value: impl Into<ParamValue>) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        inner.graph("set_parameter")?.set_parameter(node, name, value)?;
        inner.commit()
    }

    /// Link the output of the video mixer to `node`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Link`] if `node` does not accept raw video.
    pub fn link_video_sink(&self, node: &str) -> Result<LinkedPads> {
        info!("link_video_sink( '{node}' )");
        let mut inner = self.shared.inner.lock();
        let linked = inner.graph("link_video_sink")?.link(VIDEO_MIXER, node)?;
        inner.video_output = true;
        inner.commit()?;
        Ok(linked)
    }

    /// Link the output of the audio mixer to `node`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Link`] if `node` does not accept raw audio.
    pub fn link_audio_sink(&self, node: &str) -> Result<LinkedPads> {
        info!("link_audio_sink( '{node}' )");
        let mut inner = self.shared.inner.lock();
        let linked = inner.graph("link_audio_sink")?.link(AUDIO_MIXER, node)?;
        inner.audio_output = true;
        inner.commit()?;
        Ok(linked)
    }

    /// Deliver whatever reaches the sink node `node` to `sink`.
    ///
    /// # Errors
    ///
    /// Fails if `node` is not a sink node.
    pub fn attach_sink(&self, node: &str, sink: impl Sink) -> Result<()> {
        info!("attach_sink( '{node}', {sink:?} )");
        let mut inner = self.shared.inner.lock();
        inner.graph("attach_sink")?.attach_sink(node, Box::new(sink))?;
        inner.commit()
    }

    /// Unlink and remove the branch of an active source.
    ///
    /// Removing a video source re-evaluates the layout for the remaining ones.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownSource`] if `id` is not active.
    pub fn remove_source(&self, id: SourceId) -> Result<()> {
        info!("remove_source( {id} )");
        let mut inner = self.shared.inner.lock();
        inner.remove(id, "remove_source")?;
        debug!("Removed source {id}");
        inner.debug_dot("remove_source");
        Ok(())
    }

    /// Replace the layout and re-arrange the active video sources.
    ///
    /// Nothing changes if the new layout cannot place the active sources.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Layout`] if the active sources do not fit.
    pub fn set_layout(&self, layout: Layout) -> Result<()> {
        info!("set_layout( {} )", layout.canvas());
        let mut inner = self.shared.inner.lock();
        inner.graph("set_layout")?;
        let placements = evaluate(&layout, inner.overflow, &inner.video_ids())?;

        let canvas = layout.canvas();
        if canvas != inner.layout.canvas() {
            let graph = inner.graph("set_layout")?;
            graph.set_parameter(VIDEO_MIXER, "width", canvas.width)?;
            graph.set_parameter(VIDEO_MIXER, "height", canvas.height)?;
        }
        inner.layout = layout;
        inner.apply(placements)?;
        inner.commit()
    }

    /// Start processing.
    ///
    /// Starting a running compositor has no effect.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NoSinkChain`] if no mixer output is linked and with
    /// [`Error::Lifecycle`] unless the compositor is idle or running.
    pub fn start(&self) -> Result<()> {
        info!("start()");
        let mut inner = self.shared.inner.lock();
        match inner.state {
            State::Idle => {}
            State::Running => return Ok(()),
            state => {
                return Err(Error::Lifecycle {
                    operation: "start",
                    state,
                })
            }
        }
        if !inner.video_output && !inner.audio_output {
            return Err(Error::NoSinkChain);
        }

        let feed_ended = evict_on_end(Arc::downgrade(&self.shared));
        inner.graph("start")?.activate(feed_ended)?;
        inner.state = State::Running;
        inner.debug_dot("start");
        Ok(())
    }

    /// Send end-of-stream through every branch.
    ///
    /// Every bridge is closed and every sink receives end-of-stream once
    /// everything queued has been processed. Sending it twice has no effect.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Lifecycle`] unless the compositor is running or draining.
    pub fn send_eos(&self) -> Result<()> {
        info!("send_eos()");
        let mut inner = self.shared.inner.lock();
        match inner.state {
            State::Running => inner.drain(),
            State::Draining => Ok(()),
            state => Err(Error::Lifecycle {
                operation: "send_eos",
                state,
            }),
        }
    }

    /// Wait for the drain to complete, at most for the configured grace period,
    /// then tear the graph down.
    ///
    /// A running compositor is drained first. An idle one is torn down at once.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Lifecycle`] if the compositor has already been
    /// stopped and with [`Error::Backend`] if the teardown was not clean.
    pub fn stop(&self) -> Result<()> {
        info!("stop()");
        let (graph, draining, sources) = {
            let mut guard = self.shared.inner.lock();
            let inner = &mut *guard;
            match inner.state {
                State::Stopped => {
                    return Err(Error::Lifecycle {
                        operation: "stop",
                        state: State::Stopped,
                    })
                }
                State::Running => inner.drain()?,
                State::Idle | State::Draining => {}
            }
            let draining = inner.state == State::Draining;
            inner.state = State::Stopped;
            inner.placements.clear();
            let sources = inner
                .video
                .drain(..)
                .chain(inner.audio.drain(..))
                .collect::<Vec<_>>();
            (inner.graph.take(), draining, sources)
        };
        // stops the keyframe requests
        drop(sources);

        let Some(graph) = graph else {
            return Ok(());
        };
        let grace = self.shared.config.drain_grace();
        if draining && !graph.drained().wait(grace) {
            warn!("drain did not complete within {grace:?}, stopping anyway");
        }
        graph.teardown(grace)?;
        debug!("Stopped compositor");
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.shared.inner.lock().state
    }

    /// Active video sources in arrival order.
    #[must_use]
    pub fn active_video(&self) -> Vec<SourceId> {
        self.shared.inner.lock().video_ids()
    }

    /// Active audio sources in arrival order.
    #[must_use]
    pub fn active_audio(&self) -> Vec<SourceId> {
        self.shared.inner.lock().audio.iter().map(|s| s.id).collect()
    }

    #[must_use]
    pub fn source(&self, id: SourceId) -> Option<SourceInfo> {
        let inner = self.shared.inner.lock();
        inner
            .video
            .iter()
            .chain(&inner.audio)
            .find(|source| source.id == id)
            .map(ActiveSource::info)
    }

    /// Current placement of every active video source in arrival order.
    #[must_use]
    pub fn placements(&self) -> Vec<Placement> {
        self.shared.inner.lock().placements.clone()
    }

    #[must_use]
    pub fn layout(&self) -> Layout {
        self.shared.inner.lock().layout.clone()
    }

    /// Snapshot of the graph model, `None` once stopped.
    #[must_use]
    pub fn topology(&self) -> Option<Topology> {
        self.shared
            .inner
            .lock()
            .graph
            .as_ref()
            .map(|graph| graph.topology().clone())
    }

    /// Write a DOT file of the graph, see [`debug::dot_ext`].
    pub fn dot(&self, filename_without_extension: &str, params: &debug::Params) {
        if let Some(graph) = &self.shared.inner.lock().graph {
            debug::dot_ext(graph.topology(), filename_without_extension, params);
        }
    }
}

impl Inner {
    /// Graph for an operation which is only allowed while idle or running.
    fn graph(&mut self, operation: &'static str) -> Result<&mut Graph> {
        match (self.state, self.graph.as_mut()) {
            (State::Idle | State::Running, Some(graph)) => Ok(graph),
            (state, _) => Err(Error::Lifecycle { operation, state }),
        }
    }

    fn commit(&mut self) -> Result<()> {
        self.graph("commit")?.commit()
    }

    fn video_ids(&self) -> Vec<SourceId> {
        self.video.iter().map(|source| source.id).collect()
    }

    /// Validate the chain ending at `tail` before linking it to `mixer`.
    ///
    /// Returns the chain's node names, source first.
    fn chain(&mut self, operation: &'static str, tail: &str, mixer: &str) -> Result<Vec<String>> {
        let topology = self.graph(operation)?.topology();
        if !topology.contains(tail) {
            return Err(Error::UnknownNode(tail.to_owned()));
        }
        let mut chain = topology.upstream_chain(tail);
        let starts_at_source = chain
            .last()
            .and_then(|name| topology.node(name))
            .is_some_and(|node| node.kind() == NodeKind::Source);
        if !starts_at_source {
            return Err(Error::Link {
                src: tail.to_owned(),
                sink: mixer.to_owned(),
                reason: "the chain does not start at a source node".to_owned(),
            });
        }
        if let Some(owner) = self
            .video
            .iter()
            .chain(&self.audio)
            .find(|source| chain.iter().any(|name| source.nodes.contains(name)))
        {
            return Err(Error::Link {
                src: tail.to_owned(),
                sink: mixer.to_owned(),
                reason: format!("the chain is part of source {}", owner.id),
            });
        }
        chain.reverse();
        Ok(chain)
    }

    /// Push `placements` onto the video mixer pads.
    fn apply(&mut self, placements: Vec<Placement>) -> Result<()> {
        let pads = placements
            .iter()
            .filter_map(|placement| {
                self.video
                    .iter()
                    .find(|source| source.id == placement.source)
                    .map(|source| (source.mixer_pad.clone(), placement.rect))
            })
            .collect::<Vec<_>>();

        let graph = self.graph("relayout")?;
        for (zorder, (pad, rect)) in pads.into_iter().enumerate() {
            let (rect, alpha) = match rect {
                Some(rect) => (rect, 1.0),
                None => (Rect::default(), 0.0),
            };
            trace!("placing {pad} at {rect}, alpha {alpha}");
            graph.set_pad_parameter(&pad, "xpos", rect.pos.x)?;
            graph.set_pad_parameter(&pad, "ypos", rect.pos.y)?;
            graph.set_pad_parameter(&pad, "width", rect.size.width)?;
            graph.set_pad_parameter(&pad, "height", rect.size.height)?;
            graph.set_pad_parameter(&pad, "alpha", alpha)?;
            graph.set_pad_parameter(&pad, "zorder", zorder)?;
        }
        self.placements = placements;
        Ok(())
    }

    /// Re-arrange the video sources after one has gone.
    ///
    /// Without a rule for the remaining count all sources are hidden.
    fn relayout(&mut self) -> Result<()> {
        let ids = self.video_ids();
        let placements = match evaluate(&self.layout, self.overflow, &ids) {
            Ok(placements) => placements,
            Err(error) => {
                warn!("{error}, hiding all video sources");
                ids.into_iter()
                    .map(|source| Placement { source, rect: None })
                    .collect()
            }
        };
        self.apply(placements)
    }

    fn remove(&mut self, id: SourceId, operation: &'static str) -> Result<()> {
        self.graph(operation)?;
        let source = if let Some(index) = self.video.iter().position(|s| s.id == id) {
            self.video.remove(index)
        } else if let Some(index) = self.audio.iter().position(|s| s.id == id) {
            self.audio.remove(index)
        } else {
            return Err(Error::UnknownSource(id));
        };

        let graph = self.graph(operation)?;
        let mut result = graph.release_pad(&source.mixer_pad.node, &source.mixer_pad.pad);
        for name in &source.nodes {
            if !graph.contains(name) {
                continue;
            }
            if let Err(error) = graph.remove(name) {
                warn!("unable to remove '{name}' of source {id}: {error}");
                result = result.and(Err(error));
            }
        }
        let kind = source.kind;
        // the keyframe requester stops here
        drop(source);

        if kind == MediaKind::Video {
            self.relayout()?;
        }
        self.commit()?;
        result
    }

    fn drain(&mut self) -> Result<()> {
        self.graph("send_eos")?.drain()?;
        for source in self.video.iter_mut() {
            source.keyframes = None;
        }
        self.state = State::Draining;
        debug!("Draining compositor");
        Ok(())
    }

    fn debug_dot(&self, name: &str) {
        if let Some(graph) = &self.graph {
            debug::debug_dot(graph.topology(), &format!("compositor-{name}"));
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        inner.video.clear();
        inner.audio.clear();
        if let Some(graph) = inner.graph.take() {
            debug!("Dropping compositor...");
            if let Err(error) = graph.teardown(self.config.drain_grace()) {
                error!("Unable to tear down the graph, error: {error}");
            }
        }
    }
}

/// Callback removing the source of a feed which ended while running.
fn evict_on_end(shared: Weak<Shared>) -> FeedEnded {
    Arc::new(move |node: &str| {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut inner = shared.inner.lock();
        if inner.state != State::Running {
            return;
        }
        let Some(id) = inner
            .video
            .iter()
            .chain(&inner.audio)
            .find(|source| source.feed_node == node)
            .map(|source| source.id)
        else {
            return;
        };
        info!("track of source {id} ended, removing it");
        if let Err(error) = inner.remove(id, "remove_source") {
            warn!("unable to remove ended source {id}: {error}");
        }
    })
}

fn evaluate(
    layout: &Layout,
    overflow: OverflowPolicy,
    ids: &[SourceId],
) -> Result<Vec<Placement>, LayoutError> {
    Ok(ids
        .iter()
        .zip(layout.assign(ids.len(), overflow)?)
        .map(|(&source, rect)| Placement { source, rect })
        .collect())
}

fn check_track(track: &TrackInfo, kind: MediaKind) -> Result<()> {
    if track.kind != kind || track.codec.kind() != kind {
        return Err(Error::Construction {
            node: track.id.to_string(),
            reason: format!("expected a {kind} track, got {} {}", track.kind, track.codec),
        });
    }
    Ok(())
}

fn app_source(prefix: &str, track: &TrackInfo) -> Result<ProcessingNode> {
    ProcessingNode::new(
        Element::AppSrc(Caps::rtp(track.codec)),
        format!("{prefix}_src"),
    )
    .with_parameter("is-live", true)?
    .with_parameter("do-timestamp", true)?
    .with_parameter("format", FORMAT_TIME)
}

fn node_names(nodes: &[ProcessingNode]) -> Vec<String> {
    nodes.iter().map(|node| node.name().to_owned()).collect()
}

/// Add `nodes`, link them in order, link the last one to `mixer` and feed the
/// first one from `feed`.
///
/// On failure every node added here is removed again, nodes which existed
/// before are left alone.
fn build_branch(
    graph: &mut Graph,
    nodes: Vec<ProcessingNode>,
    feed: Feed,
    mixer: &str,
) -> Result<PadRef> {
    let mut added = Vec::with_capacity(nodes.len());
    let result = assemble(graph, nodes, &mut added, feed, mixer);
    if result.is_err() {
        for name in added.iter().rev() {
            if let Err(error) = graph.remove(name) {
                error!("unable to remove '{name}' during rollback: {error}");
            }
        }
    }
    result
}

fn assemble(
    graph: &mut Graph,
    nodes: Vec<ProcessingNode>,
    added: &mut Vec<String>,
    feed: Feed,
    mixer: &str,
) -> Result<PadRef> {
    for node in nodes {
        let name = node.name().to_owned();
        graph.add(node)?;
        added.push(name);
    }
    for pair in added.windows(2) {
        graph.link(&pair[0], &pair[1])?;
    }
    let (Some(head), Some(tail)) = (added.first(), added.last()) else {
        return Err(Error::Construction {
            node: mixer.to_owned(),
            reason: "a branch needs at least one node".to_owned(),
        });
    };
    let pad = graph.link(tail, mixer)?.sink;
    // attached last, removing the node would end the feed
    graph.attach_feed(head, feed)?;
    Ok(pad)
}
