// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::time::Duration;

use crate::{Rect, Sample, Size};

/// One input of a composited frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// mixer pad the input is linked to
    pub pad: String,
    /// source node feeding the pad
    pub feed: String,
    pub rect: Rect,
    pub alpha: f64,
    pub zorder: u64,
    /// latest sample of the feed, `None` until the first one arrived
    pub sample: Option<Sample>,
    /// `true` if `sample` arrived since the previous frame
    pub fresh: bool,
    /// `true` if the feed has not delivered for a while and `sample` is reused
    pub stalled: bool,
}

impl Layer {
    /// Return `true` if the layer shows up in the output.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.alpha > 0.0 && self.rect.size.width > 0 && self.rect.size.height > 0
    }
}

/// Everything the video mixer outputs for one tick.
///
/// Layers are ordered bottom to top.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeFrame {
    pub sequence: u64,
    pub pts: Duration,
    pub canvas: Size,
    pub layers: Vec<Layer>,
}

impl CompositeFrame {
    pub fn visible_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().filter(|layer| layer.is_visible())
    }
}

/// Samples of one audio input collected during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub pad: String,
    pub feed: String,
    pub volume: f64,
    pub samples: Vec<Sample>,
}

/// Everything the audio mixer outputs for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMix {
    pub sequence: u64,
    pub pts: Duration,
    pub chunks: Vec<AudioChunk>,
}
