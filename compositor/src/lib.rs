// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

/*!
    # Purpose
    The *compositor* crate mixes a changing set of live audio and video tracks into one output.
    It keeps a mutable processing graph with one video mixer and one audio mixer, adds and removes
    source branches while media is flowing and arranges all video sources on the output canvas
    using a declarative layout.

    - [Compositor]
      owns the graph, the active sources and the lifecycle `Idle → Running → Draining → Stopped`.
    - [Graph]
      models nodes, pads and links and forwards every change to a [Backend].

    # Layouts

    A [Layout] maps the number of active video sources to a [LayoutRule], an ordered list of
    [LayoutSlot]s. Lookup uses the rule for the exact count, otherwise the one registered for the
    highest count below it.

    - [Layout::grid]
      generates rules which arrange all sources in a grid
    - [Layout::speaker]
      generates rules which show the first source big and the others beside it

    # Source & Sink

    - [TrackIngestionBridge]
      hands validated chunks of one network track to the graph through a bounded queue.
    - [KeyframeRequester]
      periodically asks the sender of a video track for a keyframe via a [FeedbackSink].
    - [Sink]
      is a trait for everything attached to a sink node to receive the mixer output.
    - [ManifestSink]
      writes a line based manifest of the composited output into a file.
    - [CollectSink]
      forwards the output to a channel.

    # Backends

    - [SoftBackend]
      runs the graph on a thread of its own and hands frame geometry and samples to the sinks.
    - `GstBackend` (feature `gstreamer`)
      runs the graph within a [GStreamer](https://gstreamer.freedesktop.org/) pipeline.

    # Testing

    - [TestSource]
      pushes generated RTP packets into a bridge.
    - [FakeSink]
      is a sink without any output which counts what it received.

    # Debugging

    - [dot](debug::dot), [debug_dot](debug::debug_dot) and [dot_ext](debug::dot_ext)
      write the graph in DOT format into `$COMPOSITOR_DOT_DIR` with a counting index
*/

#![allow(clippy::module_name_repetitions)]

#[macro_use]
extern crate log;

mod error;
mod graph;
pub mod layout;
mod mixer;
#[cfg(feature = "gstreamer")]
mod pipeline;
mod runtime;
mod sinks;
mod sources;

#[cfg(test)]
mod tests;

pub use error::*;
pub use graph::*;
pub use layout::*;
pub use mixer::*;
#[cfg(feature = "gstreamer")]
pub use pipeline::GstBackend;
pub use runtime::*;
pub use sinks::*;
pub use sources::*;

#[cfg(test)]
pub use tests::testing;
