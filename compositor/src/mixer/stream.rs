// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Active sources.

use std::fmt::Display;

use crate::{KeyframeRequester, MediaKind, PadRef, Rect, TrackId};

/// Identifier of an active source, unique within one compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub(crate) u64);

impl SourceId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an active video source is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub source: SourceId,
    /// `None` if the source is linked but hidden
    pub rect: Option<Rect>,
}

/// Public view onto an active source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub id: SourceId,
    pub kind: MediaKind,
    /// track feeding the source, if it was added from a bridge
    pub track: Option<TrackId>,
    /// name of the source node at the head of the branch
    pub feed_node: String,
    /// mixer pad the branch is linked to
    pub mixer_pad: PadRef,
}

/// A branch of the graph which ends at a mixer input.
#[derive(Debug)]
pub(crate) struct ActiveSource {
    pub(crate) id: SourceId,
    pub(crate) kind: MediaKind,
    pub(crate) track: Option<TrackId>,
    /// nodes of the branch, source first
    pub(crate) nodes: Vec<String>,
    pub(crate) feed_node: String,
    pub(crate) mixer_pad: PadRef,
    pub(crate) keyframes: Option<KeyframeRequester>,
}

impl ActiveSource {
    pub(crate) fn info(&self) -> SourceInfo {
        SourceInfo {
            id: self.id,
            kind: self.kind,
            track: self.track.clone(),
            feed_node: self.feed_node.clone(),
            mixer_pad: self.mixer_pad.clone(),
        }
    }
}
