// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use serde::Deserialize;

use super::rtp::RtpHeader;
use crate::{Codec, IngestError, MediaKind};

/// Identifier of a track as assigned by the network side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Metadata of an incoming track.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackInfo {
    pub id: TrackId,
    pub kind: MediaKind,
    pub codec: Codec,
}

impl TrackInfo {
    /// Track of the given codec, the kind follows from the codec.
    #[must_use]
    pub fn new(id: impl Into<TrackId>, codec: Codec) -> Self {
        Self {
            id: id.into(),
            kind: codec.kind(),
            codec,
        }
    }
}

/// One validated chunk of a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// position within the track, starting at zero
    pub sequence: u64,
    /// arrival time relative to the first sample of the track
    pub pts: Duration,
    pub payload: Bytes,
    pub rtp: Option<RtpHeader>,
}

/// Queue parameters of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// maximum number of queued samples
    pub capacity: usize,
    /// how long a push waits for room before the oldest sample is dropped
    pub push_timeout: Duration,
    /// validate chunks as RTP packets
    pub rtp: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            push_timeout: Duration::from_millis(20),
            rtp: true,
        }
    }
}

/// Counters of a bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// chunks handed to `push`
    pub pushed: u64,
    /// samples which made it into the queue
    pub delivered: u64,
    /// queued samples dropped to make room
    pub dropped: u64,
    /// chunks rejected by validation
    pub malformed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    pushed: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
}

#[derive(Debug)]
struct Shared {
    track: TrackInfo,
    config: BridgeConfig,
    // `None` once closed
    sender: Mutex<Option<Sender<Sample>>>,
    receiver: Receiver<Sample>,
    sequence: AtomicU64,
    epoch: OnceLock<Instant>,
    ssrc: OnceLock<u32>,
    counters: Counters,
}

impl Shared {
    fn close(&self) {
        if self.sender.lock().take().is_some() {
            debug!("closed bridge of track '{}'", self.track.id);
        }
    }
}

/// Hand-off point between a network thread and the processing graph.
///
/// The network side [`push`](Self::push)es chunks of one track, the graph pulls
/// them from a [`Feed`]. The queue is bounded: if it is full a push waits for
/// `push_timeout` and then drops the oldest queued sample, so a producer never
/// blocks for longer than that.
#[derive(Debug, Clone)]
pub struct TrackIngestionBridge {
    shared: Arc<Shared>,
}

impl TrackIngestionBridge {
    #[must_use]
    pub fn new(track: TrackInfo, config: BridgeConfig) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(config.capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                track,
                config,
                sender: Mutex::new(Some(sender)),
                receiver,
                sequence: AtomicU64::new(0),
                epoch: OnceLock::new(),
                ssrc: OnceLock::new(),
                counters: Counters::default(),
            }),
        }
    }

    #[must_use]
    pub fn track(&self) -> &TrackInfo {
        &self.shared.track
    }

    /// Validate a chunk and queue it in arrival order.
    ///
    /// Returns the sequence number assigned to the sample.
    ///
    /// # Errors
    ///
    /// Fails if the chunk is malformed, it is dropped then and later chunks are
    /// still accepted. Fails with [`IngestError::Closed`] after [`close`](Self::close).
    pub fn push(&self, chunk: impl Into<Bytes>) -> Result<u64, IngestError> {
        let shared = &*self.shared;
        let payload = chunk.into();
        shared.counters.pushed.fetch_add(1, Ordering::Relaxed);

        let rtp = if shared.config.rtp {
            match RtpHeader::parse(&payload) {
                Ok(header) => Some(header),
                Err(error) => {
                    shared.counters.malformed.fetch_add(1, Ordering::Relaxed);
                    debug!("dropping chunk of track '{}': {error}", shared.track.id);
                    return Err(error);
                }
            }
        } else if payload.is_empty() {
            shared.counters.malformed.fetch_add(1, Ordering::Relaxed);
            return Err(IngestError::Empty);
        } else {
            None
        };

        // hold the sender during the whole push to keep arrival order
        let sender = shared.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(IngestError::Closed(shared.track.id.clone()));
        };

        if let Some(header) = rtp {
            shared.ssrc.get_or_init(|| header.ssrc);
        }
        let epoch = *shared.epoch.get_or_init(Instant::now);
        let sequence = shared.sequence.fetch_add(1, Ordering::Relaxed);
        let sample = Sample {
            sequence,
            pts: epoch.elapsed(),
            payload,
            rtp,
        };

        match sender.send_timeout(sample, shared.config.push_timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(sample)) => {
                if shared.receiver.try_recv().is_ok() {
                    shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(
                        "queue of track '{}' is full, dropped oldest sample",
                        shared.track.id
                    );
                }
                match sender.try_send(sample) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                        shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        return Ok(sequence);
                    }
                }
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                return Err(IngestError::Closed(shared.track.id.clone()));
            }
        }
        shared.counters.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(sequence)
    }

    /// End the track. Queued samples can still be pulled.
    ///
    /// Calling this more than once has no effect.
    pub fn close(&self) {
        self.shared.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.sender.lock().is_none()
    }

    /// SSRC learned from the first valid RTP packet.
    #[must_use]
    pub fn ssrc(&self) -> Option<u32> {
        self.shared.ssrc.get().copied()
    }

    /// Number of samples currently queued.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.receiver.len()
    }

    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        let counters = &self.shared.counters;
        BridgeStats {
            pushed: counters.pushed.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            malformed: counters.malformed.load(Ordering::Relaxed),
        }
    }

    /// Receiving end for the graph.
    #[must_use]
    pub fn feed(&self) -> Feed {
        Feed {
            receiver: self.shared.receiver.clone(),
            shared: self.shared.clone(),
        }
    }
}

/// Result of polling a [`Feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Sample(Sample),
    /// nothing queued right now
    Empty,
    /// the bridge is closed and everything has been pulled
    Ended,
}

/// Receiving end of a [`TrackIngestionBridge`].
#[derive(Debug, Clone)]
pub struct Feed {
    receiver: Receiver<Sample>,
    shared: Arc<Shared>,
}

impl Feed {
    #[must_use]
    pub fn track(&self) -> &TrackInfo {
        &self.shared.track
    }

    /// Pull the next sample without blocking.
    #[must_use]
    pub fn poll(&self) -> FeedEvent {
        match self.receiver.try_recv() {
            Ok(sample) => FeedEvent::Sample(sample),
            Err(TryRecvError::Empty) => FeedEvent::Empty,
            Err(TryRecvError::Disconnected) => FeedEvent::Ended,
        }
    }

    /// Wait up to `timeout` for the next sample.
    #[must_use]
    pub fn next_timeout(&self, timeout: Duration) -> FeedEvent {
        match self.receiver.recv_timeout(timeout) {
            Ok(sample) => FeedEvent::Sample(sample),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => FeedEvent::Empty,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => FeedEvent::Ended,
        }
    }

    /// Close the bridge from the receiving side.
    pub fn end(&self) {
        self.shared.close();
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.shared.sender.lock().is_none() && self.receiver.is_empty()
    }
}
