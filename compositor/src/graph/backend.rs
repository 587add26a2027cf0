// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Contract between the graph model and the media processing runtime.

use std::{fmt::Display, sync::Arc, time::Duration};

use anyhow::Result;
use parking_lot::{Condvar, Mutex};

use super::{PadRef, ParamValue, ProcessingNode, Topology};
use crate::{Feed, Sink};

/// Target of a parameter change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(String),
    Pad(PadRef),
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(node) => f.write_str(node),
            Self::Pad(pad) => write!(f, "{pad}"),
        }
    }
}

/// Called with the name of the source node whose feed has ended.
pub type FeedEnded = Arc<dyn Fn(&str) + Send + Sync>;

/// Media processing runtime which executes a graph.
///
/// The [`Graph`](super::Graph) validates every change against its model
/// before forwarding it, so implementations only see well-formed operations.
/// Changes made after [`activate`](Backend::activate) take effect with the
/// next [`commit`](Backend::commit).
pub trait Backend: Send + 'static {
    /// Instantiate a node.
    fn create(&mut self, node: &ProcessingNode) -> Result<()>;

    /// Destroy an unlinked node.
    fn remove(&mut self, node: &str) -> Result<()>;

    /// Create pad `pad` on `node` from the request template `template`.
    fn request_pad(&mut self, node: &str, template: &str, pad: &str) -> Result<()>;

    fn release_pad(&mut self, node: &str, pad: &str) -> Result<()>;

    fn link(&mut self, src: &PadRef, sink: &PadRef) -> Result<()>;

    fn unlink(&mut self, src: &PadRef, sink: &PadRef) -> Result<()>;

    fn set_parameter(&mut self, target: &Target, name: &str, value: &ParamValue) -> Result<()>;

    /// Let the source node `node` pull its data from `feed`.
    fn attach_feed(&mut self, node: &str, feed: Feed) -> Result<()>;

    /// Hand the data reaching the sink node `node` to `sink`.
    fn attach_sink(&mut self, node: &str, sink: Box<dyn Sink>) -> Result<()>;

    /// Apply all changes since the last commit as one batch.
    fn commit(&mut self, topology: &Topology) -> Result<()>;

    /// Start processing. `feed_ended` is called whenever a feed ends while not draining.
    fn activate(&mut self, feed_ended: FeedEnded) -> Result<()>;

    /// End every feed so end-of-stream propagates through all branches.
    fn drain(&mut self) -> Result<()>;

    /// Signal which is raised once every sink has seen end-of-stream.
    fn drained(&self) -> DrainSignal;

    /// Stop processing and release all resources.
    ///
    /// Waits at most `grace` for the processing to stop.
    fn teardown(&mut self, grace: Duration) -> Result<()>;
}

/// One-shot signal raised when a drain completed.
#[derive(Debug, Clone, Default)]
pub struct DrainSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl DrainSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake up all waiters.
    pub fn notify(&self) {
        let (raised, condvar) = &*self.inner;
        *raised.lock() = true;
        condvar.notify_all();
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Wait until the signal is raised or `timeout` elapsed.
    ///
    /// Returns `true` if the signal has been raised.
    #[must_use]
    pub fn wait(&self, timeout: Duration) -> bool {
        let (raised, condvar) = &*self.inner;
        let mut raised = raised.lock();
        if !*raised {
            let _ = condvar.wait_while_for(&mut raised, |raised| !*raised, timeout);
        }
        *raised
    }
}
