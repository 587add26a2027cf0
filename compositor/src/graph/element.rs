// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::fmt::Display;

use super::{
    Caps, Codec, Container, MediaKind, PadDirection, PadTemplate, ParamSpec,
    ParamType::{Bool, Float, Int, Str, UInt},
};

/// Role of a node within the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// produces data, has no sink pads
    Source,
    /// one input, one output
    Transform,
    /// many inputs through request pads, one output
    Mux,
    /// consumes data, has no src pads
    Sink,
}

/// The closed set of elements a graph can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Element {
    /// Application source fed by a track ingestion bridge.
    AppSrc(Caps),
    /// Restricts the data passing through to the given caps.
    CapsFilter(Caps),
    Queue,
    Depayloader(Codec),
    Decoder(Codec),
    VideoScale,
    VideoConvert,
    AudioConvert,
    Encoder(Codec),
    /// Composites raw video from request pads `sink_%u` onto a canvas of
    /// `width` x `height`.
    VideoMixer,
    /// Mixes raw audio from request pads `sink_%u`.
    AudioMixer,
    /// Muxes coded streams from request pads `video_%u` and `audio_%u`.
    Muxer(Container),
    FileSink,
    FakeSink,
    /// Sink handing its input to the application.
    AppSink,
    AutoVideoSink,
    AutoAudioSink,
}

use PadDirection::{Sink as In, Src as Out};

const APP_SRC_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("is-live", Bool),
    ParamSpec::new("do-timestamp", Bool),
    ParamSpec::new("format", Int),
    ParamSpec::new("max-bytes", UInt),
    ParamSpec::new("block", Bool),
];
const QUEUE_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("max-size-buffers", UInt),
    ParamSpec::new("leaky", Str),
];
const VPX_ENCODER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("target-bitrate", Int),
    ParamSpec::new("deadline", Int),
];
const H264_ENCODER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("bitrate", UInt),
    ParamSpec::new("tune", Str),
];
const OPUS_ENCODER_PARAMS: &[ParamSpec] = &[ParamSpec::new("bitrate", Int)];
const VIDEO_MIXER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("latency", UInt),
    ParamSpec::new("width", UInt),
    ParamSpec::new("height", UInt),
];
const AUDIO_MIXER_PARAMS: &[ParamSpec] = &[ParamSpec::new("latency", UInt)];
const MP4_PARAMS: &[ParamSpec] = &[ParamSpec::new("faststart", Bool)];
const MATROSKA_PARAMS: &[ParamSpec] = &[ParamSpec::new("streamable", Bool)];
const FILE_SINK_PARAMS: &[ParamSpec] = &[ParamSpec::new("location", Str)];
const SYNC_PARAMS: &[ParamSpec] = &[ParamSpec::new("sync", Bool)];

const VIDEO_MIXER_PAD_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("xpos", Int),
    ParamSpec::new("ypos", Int),
    ParamSpec::new("width", Int),
    ParamSpec::new("height", Int),
    ParamSpec::new("alpha", Float),
    ParamSpec::new("zorder", UInt),
];
const AUDIO_MIXER_PAD_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("volume", Float),
    ParamSpec::new("mute", Bool),
];

impl Element {
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::AppSrc(_) => NodeKind::Source,
            Self::CapsFilter(_)
            | Self::Queue
            | Self::Depayloader(_)
            | Self::Decoder(_)
            | Self::VideoScale
            | Self::VideoConvert
            | Self::AudioConvert
            | Self::Encoder(_) => NodeKind::Transform,
            Self::VideoMixer | Self::AudioMixer | Self::Muxer(_) => NodeKind::Mux,
            Self::FileSink
            | Self::FakeSink
            | Self::AppSink
            | Self::AutoVideoSink
            | Self::AutoAudioSink => NodeKind::Sink,
        }
    }

    /// Name of the `GStreamer` element factory implementing this element.
    #[must_use]
    pub fn factory_name(&self) -> &'static str {
        match self {
            Self::AppSrc(_) => "appsrc",
            Self::CapsFilter(_) => "capsfilter",
            Self::Queue => "queue",
            Self::Depayloader(codec) => match codec {
                Codec::Vp8 => "rtpvp8depay",
                Codec::Vp9 => "rtpvp9depay",
                Codec::H264 => "rtph264depay",
                Codec::Opus => "rtpopusdepay",
            },
            Self::Decoder(codec) => match codec {
                Codec::Vp8 => "vp8dec",
                Codec::Vp9 => "vp9dec",
                Codec::H264 => "avdec_h264",
                Codec::Opus => "opusdec",
            },
            Self::VideoScale => "videoscale",
            Self::VideoConvert => "videoconvert",
            Self::AudioConvert => "audioconvert",
            Self::Encoder(codec) => match codec {
                Codec::Vp8 => "vp8enc",
                Codec::Vp9 => "vp9enc",
                Codec::H264 => "x264enc",
                Codec::Opus => "opusenc",
            },
            Self::VideoMixer => "compositor",
            Self::AudioMixer => "audiomixer",
            Self::Muxer(Container::Mp4) => "mp4mux",
            Self::Muxer(Container::Matroska) => "matroskamux",
            Self::FileSink => "filesink",
            Self::FakeSink => "fakesink",
            Self::AppSink => "appsink",
            Self::AutoVideoSink => "autovideosink",
            Self::AutoAudioSink => "autoaudiosink",
        }
    }

    /// Pads the element provides.
    #[must_use]
    pub fn templates(&self) -> Vec<PadTemplate> {
        let video = Caps::raw(MediaKind::Video);
        let audio = Caps::raw(MediaKind::Audio);
        match *self {
            Self::AppSrc(caps) => vec![PadTemplate::always("src", Out, caps)],
            Self::CapsFilter(caps) => vec![
                PadTemplate::always("sink", In, caps),
                PadTemplate::always("src", Out, caps),
            ],
            Self::Queue => vec![
                PadTemplate::always("sink", In, Caps::ANY),
                PadTemplate::always("src", Out, Caps::ANY),
            ],
            Self::Depayloader(codec) => vec![
                PadTemplate::always("sink", In, Caps::rtp(codec)),
                PadTemplate::always("src", Out, Caps::coded(codec)),
            ],
            Self::Decoder(codec) => vec![
                PadTemplate::always("sink", In, Caps::coded(codec)),
                PadTemplate::always("src", Out, Caps::raw(codec.kind())),
            ],
            Self::VideoScale | Self::VideoConvert => vec![
                PadTemplate::always("sink", In, video),
                PadTemplate::always("src", Out, video),
            ],
            Self::AudioConvert => vec![
                PadTemplate::always("sink", In, audio),
                PadTemplate::always("src", Out, audio),
            ],
            Self::Encoder(codec) => vec![
                PadTemplate::always("sink", In, Caps::raw(codec.kind())),
                PadTemplate::always("src", Out, Caps::coded(codec)),
            ],
            Self::VideoMixer => vec![
                PadTemplate::request("sink_%u", In, video),
                PadTemplate::always("src", Out, video),
            ],
            Self::AudioMixer => vec![
                PadTemplate::request("sink_%u", In, audio),
                PadTemplate::always("src", Out, audio),
            ],
            Self::Muxer(container) => vec![
                PadTemplate::request("video_%u", In, Caps::media(MediaKind::Video)),
                PadTemplate::request("audio_%u", In, Caps::media(MediaKind::Audio)),
                PadTemplate::always("src", Out, Caps::container(container)),
            ],
            Self::FileSink | Self::FakeSink | Self::AppSink => {
                vec![PadTemplate::always("sink", In, Caps::ANY)]
            }
            Self::AutoVideoSink => vec![PadTemplate::always("sink", In, video)],
            Self::AutoAudioSink => vec![PadTemplate::always("sink", In, audio)],
        }
    }

    /// Parameters the element accepts.
    #[must_use]
    pub fn params(&self) -> &'static [ParamSpec] {
        match self {
            Self::AppSrc(_) => APP_SRC_PARAMS,
            Self::Queue => QUEUE_PARAMS,
            Self::Encoder(Codec::Vp8 | Codec::Vp9) => VPX_ENCODER_PARAMS,
            Self::Encoder(Codec::H264) => H264_ENCODER_PARAMS,
            Self::Encoder(Codec::Opus) => OPUS_ENCODER_PARAMS,
            Self::VideoMixer => VIDEO_MIXER_PARAMS,
            Self::AudioMixer => AUDIO_MIXER_PARAMS,
            Self::Muxer(Container::Mp4) => MP4_PARAMS,
            Self::Muxer(Container::Matroska) => MATROSKA_PARAMS,
            Self::FileSink => FILE_SINK_PARAMS,
            Self::FakeSink | Self::AppSink | Self::AutoVideoSink | Self::AutoAudioSink => {
                SYNC_PARAMS
            }
            Self::CapsFilter(_)
            | Self::Depayloader(_)
            | Self::Decoder(_)
            | Self::VideoScale
            | Self::VideoConvert
            | Self::AudioConvert => &[],
        }
    }

    /// Parameters the element's request pads accept.
    #[must_use]
    pub fn pad_params(&self) -> &'static [ParamSpec] {
        match self {
            Self::VideoMixer => VIDEO_MIXER_PAD_PARAMS,
            Self::AudioMixer => AUDIO_MIXER_PAD_PARAMS,
            _ => &[],
        }
    }
}

impl Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.factory_name())
    }
}
