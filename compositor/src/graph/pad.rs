// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use super::ParamValue;

/// Kind of media a track or pad carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Audio => "audio",
            Self::Video => "video",
        })
    }
}

/// Codecs the compositor can build source branches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Codec {
    Vp8,
    Vp9,
    H264,
    Opus,
}

impl Codec {
    /// Media kind the codec encodes.
    #[must_use]
    pub const fn kind(self) -> MediaKind {
        match self {
            Self::Vp8 | Self::Vp9 | Self::H264 => MediaKind::Video,
            Self::Opus => MediaKind::Audio,
        }
    }

    /// RTP encoding name.
    #[must_use]
    pub const fn encoding_name(self) -> &'static str {
        match self {
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
            Self::H264 => "H264",
            Self::Opus => "OPUS",
        }
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.encoding_name())
    }
}

/// Error returned when parsing an unknown codec name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown codec '{0}'")]
pub struct UnknownCodec(pub String);

impl FromStr for Codec {
    type Err = UnknownCodec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // accept mime types like `video/VP8` as well
        let name = s.rsplit('/').next().unwrap_or(s);
        match name.to_ascii_lowercase().as_str() {
            "vp8" => Ok(Self::Vp8),
            "vp9" => Ok(Self::Vp9),
            "h264" => Ok(Self::H264),
            "opus" => Ok(Self::Opus),
            _ => Err(UnknownCodec(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Codec {
    type Error = UnknownCodec;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Container formats a muxer can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Matroska,
}

/// How the data on a pad is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// decoded frames or samples
    Raw,
    /// RTP packets of the given codec
    Rtp(Codec),
    /// elementary stream of the given codec
    Coded(Codec),
    /// muxed container stream
    Container(Container),
}

/// Capabilities of a pad.
///
/// A missing field matches anything, so [`Caps::ANY`] is compatible with every
/// other caps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Caps {
    pub media: Option<MediaKind>,
    pub encoding: Option<Encoding>,
}

impl Caps {
    pub const ANY: Self = Self {
        media: None,
        encoding: None,
    };

    /// Any encoding of the given media kind.
    #[must_use]
    pub const fn media(kind: MediaKind) -> Self {
        Self {
            media: Some(kind),
            encoding: None,
        }
    }

    #[must_use]
    pub const fn raw(kind: MediaKind) -> Self {
        Self {
            media: Some(kind),
            encoding: Some(Encoding::Raw),
        }
    }

    #[must_use]
    pub const fn rtp(codec: Codec) -> Self {
        Self {
            media: Some(codec.kind()),
            encoding: Some(Encoding::Rtp(codec)),
        }
    }

    #[must_use]
    pub const fn coded(codec: Codec) -> Self {
        Self {
            media: Some(codec.kind()),
            encoding: Some(Encoding::Coded(codec)),
        }
    }

    #[must_use]
    pub const fn container(container: Container) -> Self {
        Self {
            media: None,
            encoding: Some(Encoding::Container(container)),
        }
    }

    /// Return `true` if data described by `self` may flow into a pad with `other`.
    #[must_use]
    pub fn is_compatible(&self, other: &Self) -> bool {
        fn field_matches<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        }
        field_matches(self.media, other.media) && field_matches(self.encoding, other.encoding)
    }

    /// Caps which describe data matching both, or `None` if they are incompatible.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        self.is_compatible(other).then(|| Self {
            media: self.media.or(other.media),
            encoding: self.encoding.or(other.encoding),
        })
    }
}

impl Display for Caps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.media, self.encoding) {
            (None, None) => f.write_str("ANY"),
            (Some(media), None) => write!(f, "{media}/*"),
            (media, Some(Encoding::Raw)) => match media {
                Some(media) => write!(f, "{media}/x-raw"),
                None => f.write_str("*/x-raw"),
            },
            (_, Some(Encoding::Rtp(codec))) => write!(
                f,
                "application/x-rtp, media={}, encoding-name={codec}",
                codec.kind()
            ),
            (_, Some(Encoding::Coded(codec))) => {
                write!(f, "{}/x-{}", codec.kind(), codec.encoding_name().to_lowercase())
            }
            (_, Some(Encoding::Container(Container::Mp4))) => f.write_str("video/quicktime"),
            (_, Some(Encoding::Container(Container::Matroska))) => {
                f.write_str("video/x-matroska")
            }
        }
    }
}

/// Data flow direction of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadDirection {
    Src,
    Sink,
}

/// When a pad exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// created together with the node
    Always,
    /// created on request, the template name contains `%u`
    Request,
}

/// Description of pads an element provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadTemplate {
    pub name: &'static str,
    pub direction: PadDirection,
    pub presence: Presence,
    pub caps: Caps,
}

impl PadTemplate {
    pub(crate) const fn always(name: &'static str, direction: PadDirection, caps: Caps) -> Self {
        Self {
            name,
            direction,
            presence: Presence::Always,
            caps,
        }
    }

    pub(crate) const fn request(name: &'static str, direction: PadDirection, caps: Caps) -> Self {
        Self {
            name,
            direction,
            presence: Presence::Request,
            caps,
        }
    }

    /// Name of the `n`th pad requested from this template.
    #[must_use]
    pub fn pad_name(&self, n: usize) -> String {
        self.name.replace("%u", &n.to_string())
    }
}

/// Reference to a pad of a named node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PadRef {
    pub node: String,
    pub pad: String,
}

impl PadRef {
    #[must_use]
    pub fn new(node: impl Into<String>, pad: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            pad: pad.into(),
        }
    }
}

impl Display for PadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node, self.pad)
    }
}

/// A pad of a [`ProcessingNode`](super::ProcessingNode).
#[derive(Debug, Clone, PartialEq)]
pub struct Pad {
    name: String,
    template: &'static str,
    direction: PadDirection,
    presence: Presence,
    caps: Caps,
    peer: Option<PadRef>,
    params: BTreeMap<String, ParamValue>,
}

impl Pad {
    pub(super) fn new(name: String, template: &PadTemplate) -> Self {
        Self {
            name,
            template: template.name,
            direction: template.direction,
            presence: template.presence,
            caps: template.caps,
            peer: None,
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the template the pad was created from.
    #[must_use]
    pub fn template(&self) -> &'static str {
        self.template
    }

    #[must_use]
    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    #[must_use]
    pub fn presence(&self) -> Presence {
        self.presence
    }

    #[must_use]
    pub fn caps(&self) -> Caps {
        self.caps
    }

    /// The pad this one is linked to.
    #[must_use]
    pub fn peer(&self) -> Option<&PadRef> {
        self.peer.as_ref()
    }

    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.peer.is_some()
    }

    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub(super) fn set_peer(&mut self, peer: Option<PadRef>) -> Option<PadRef> {
        std::mem::replace(&mut self.peer, peer)
    }

    pub(super) fn set_param(&mut self, name: &str, value: ParamValue) {
        self.params.insert(name.to_owned(), value);
    }
}
