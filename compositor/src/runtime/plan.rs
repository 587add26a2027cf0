// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    Element, Feed, PadDirection, PadRef, ParamValue, Presence, ProcessingNode, Rect,
    Sink, Size, Topology,
};

pub(super) type SharedSink = Arc<Mutex<Box<dyn Sink>>>;

#[derive(Clone)]
pub(super) struct SinkHandle {
    pub(super) name: String,
    pub(super) sink: SharedSink,
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SinkHandle").field(&self.name).finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct VideoInput {
    pub(super) pad: String,
    pub(super) feed: String,
    pub(super) rect: Rect,
    pub(super) alpha: f64,
    pub(super) zorder: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct AudioInput {
    pub(super) pad: String,
    pub(super) feed: String,
    pub(super) volume: f64,
    pub(super) mute: bool,
}

/// Snapshot of everything the executor needs for one tick.
///
/// A new plan is derived on every commit and replaces the previous one as a
/// whole, so one frame never mixes geometry of two commits.
#[derive(Debug, Clone, Default)]
pub(super) struct Plan {
    pub(super) canvas: Size,
    /// every feed which reaches a mixer
    pub(super) feeds: Vec<(String, Feed)>,
    pub(super) video: Vec<VideoInput>,
    pub(super) audio: Vec<AudioInput>,
    pub(super) video_sinks: Vec<SinkHandle>,
    pub(super) audio_sinks: Vec<SinkHandle>,
}

impl Plan {
    pub(super) fn derive(
        topology: &Topology,
        feeds: &HashMap<String, Feed>,
        sinks: &HashMap<String, SharedSink>,
    ) -> Self {
        let mut plan = Self::default();

        for mixer in topology.nodes() {
            let is_video = match mixer.element() {
                Element::VideoMixer => true,
                Element::AudioMixer => false,
                _ => continue,
            };
            if is_video && plan.canvas == Size::default() {
                plan.canvas = canvas(mixer);
            }

            let inputs = mixer
                .pads_in(PadDirection::Sink)
                .filter(|pad| pad.presence() == Presence::Request)
                .enumerate();
            for (index, pad) in inputs {
                let pad_ref = PadRef::new(mixer.name(), pad.name());
                let Some(source) = topology.upstream_source(&pad_ref) else {
                    continue;
                };
                let Some(feed) = feeds.get(source.name()) else {
                    continue;
                };
                if !plan.feeds.iter().any(|(name, _)| name == source.name()) {
                    plan.feeds.push((source.name().to_owned(), feed.clone()));
                }

                let int = |name: &str| pad.parameter(name).and_then(ParamValue::as_i64);
                let float = |name: &str| pad.parameter(name).and_then(ParamValue::as_f64);
                if is_video {
                    plan.video.push(VideoInput {
                        pad: pad.name().to_owned(),
                        feed: source.name().to_owned(),
                        rect: Rect::new(
                            int("xpos").unwrap_or_default(),
                            int("ypos").unwrap_or_default(),
                            dimension(int("width")),
                            dimension(int("height")),
                        ),
                        alpha: float("alpha").unwrap_or(1.0),
                        zorder: pad
                            .parameter("zorder")
                            .and_then(ParamValue::as_u64)
                            .unwrap_or(index as u64),
                    });
                } else {
                    plan.audio.push(AudioInput {
                        pad: pad.name().to_owned(),
                        feed: source.name().to_owned(),
                        volume: float("volume").unwrap_or(1.0),
                        mute: pad
                            .parameter("mute")
                            .and_then(ParamValue::as_bool)
                            .unwrap_or_default(),
                    });
                }
            }

            let outputs = topology
                .downstream_sinks(&PadRef::new(mixer.name(), "src"))
                .into_iter()
                .filter_map(|name| {
                    sinks.get(&name).map(|sink| SinkHandle {
                        name,
                        sink: sink.clone(),
                    })
                });
            if is_video {
                plan.video_sinks.extend(outputs);
            } else {
                plan.audio_sinks.extend(outputs);
            }
        }

        plan
    }

    /// Every attached sink reached by a mixer, each one once.
    pub(super) fn sinks(&self) -> Vec<SinkHandle> {
        let mut sinks: Vec<SinkHandle> = Vec::new();
        for handle in self.video_sinks.iter().chain(&self.audio_sinks) {
            if !sinks.iter().any(|s| s.name == handle.name) {
                sinks.push(handle.clone());
            }
        }
        sinks
    }
}

fn canvas(mixer: &ProcessingNode) -> Size {
    let value = |name: &str| {
        mixer
            .parameter(name)
            .and_then(ParamValue::as_u64)
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or_default()
    };
    Size::new(value("width"), value("height"))
}

fn dimension(value: Option<i64>) -> usize {
    value.and_then(|v| usize::try_from(v).ok()).unwrap_or_default()
}
