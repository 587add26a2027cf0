// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Error types.

use thiserror::Error;

use crate::{Rect, Size, SourceId, State, TrackId};

/// Result type of all compositor operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors reported by the compositor.
///
/// Construction and lifecycle errors abort the whole operation without leaving a
/// half built graph behind. Link and layout errors are scoped to the source which
/// was being added, the rest of the graph keeps running.
#[derive(Debug, Error)]
pub enum Error {
    /// A node could not be created by the backend.
    #[error("unable to construct '{node}': {reason}")]
    Construction { node: String, reason: String },

    /// Two pads could not be linked.
    ///
    /// `src` and `sink` name the endpoints as `node.pad` (or just `node` if no
    /// pad could be selected).
    #[error("unable to link '{src}' with '{sink}': {reason}")]
    Link {
        src: String,
        sink: String,
        reason: String,
    },

    /// A pad could not be requested, released or found.
    #[error("pad '{node}.{pad}': {reason}")]
    Pad {
        node: String,
        pad: String,
        reason: String,
    },

    /// The layout cannot place the active video sources.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// A sample chunk was rejected by an ingestion bridge.
    #[error(transparent)]
    Ingestion(#[from] IngestError),

    /// The operation is not allowed in the current lifecycle state.
    #[error("'{operation}' is not allowed while the compositor is {state}")]
    Lifecycle {
        operation: &'static str,
        state: State,
    },

    /// `start` was called before any sink chain was linked to a mixer output.
    #[error("no sink chain has been linked to the mixer outputs")]
    NoSinkChain,

    /// A backend operation on an existing node failed.
    #[error("backend failed to {operation} '{target}': {reason}")]
    Backend {
        operation: &'static str,
        target: String,
        reason: String,
    },

    /// A parameter name or value was rejected.
    #[error("invalid parameter '{name}' on '{target}': {reason}")]
    InvalidParameter {
        target: String,
        name: String,
        reason: String,
    },

    /// There is no node with the given name in the graph.
    #[error("there is no node named '{0}'")]
    UnknownNode(String),

    /// A node with the same name has already been added.
    #[error("a node named '{0}' already exists")]
    DuplicateNode(String),

    /// There is no active source with the given id.
    #[error("there is no active source {0}")]
    UnknownSource(SourceId),
}

/// Configuration or policy gaps of a [`Layout`](crate::Layout).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// Neither an exact nor a smaller rule is registered.
    #[error("no layout rule registered for {active} active video source(s)")]
    NoRule { active: usize },

    /// The selected rule has fewer slots than there are active sources.
    #[error("{active} active video source(s) exceed the {slots} slot(s) of the rule for {count}")]
    NotEnoughSlots {
        active: usize,
        slots: usize,
        count: usize,
    },

    /// A rule was registered with less slots than its source count.
    #[error("a rule for {count} source(s) needs at least {count} slot(s), got {slots}")]
    RuleTooSmall { count: usize, slots: usize },

    /// Rules can only be registered for a positive source count.
    #[error("rules must be registered for a positive source count")]
    ZeroCount,

    /// A generated arrangement cannot be laid out on the canvas.
    #[error("unable to arrange sources on a {0} canvas")]
    InvalidCanvas(Size),

    /// A slot does not fit into the canvas.
    #[error("slot {index} ({rect}) lies outside the {canvas} canvas")]
    OutOfCanvas {
        index: usize,
        rect: Rect,
        canvas: Size,
    },
}

/// Recoverable problems with a single sample chunk.
///
/// The chunk is dropped, ingestion continues with the next one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("empty chunk")]
    Empty,

    #[error("malformed RTP packet: {0}")]
    Malformed(String),

    #[error("unsupported RTP version {0}")]
    Version(u8),

    #[error("chunk carries no payload")]
    EmptyPayload,

    #[error("bridge for track '{0}' is closed")]
    Closed(TrackId),
}
