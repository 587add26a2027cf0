// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Outbound control messages to the network side.

use std::{fmt::Debug, sync::Arc, thread::JoinHandle, time::Duration};

use anyhow::Result;
use crossbeam_channel::{select, Sender};
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;

use super::{TrackId, TrackIngestionBridge};

/// Message for the sender of a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    /// Ask the sender for a new keyframe.
    ///
    /// `pli` is ready to be marshalled into the RTCP stream of the track.
    PictureLossIndication {
        track: TrackId,
        pli: PictureLossIndication,
    },
}

impl Feedback {
    /// Keyframe request for the media source `ssrc` of `track`.
    #[must_use]
    pub fn picture_loss(track: TrackId, ssrc: u32) -> Self {
        Self::PictureLossIndication {
            track,
            pli: PictureLossIndication {
                // the compositor does not send media on this connection
                sender_ssrc: 0,
                media_ssrc: ssrc,
            },
        }
    }
}

/// Accepts feedback messages, usually by writing RTCP to the peer connection.
pub trait FeedbackSink: Send + Sync + Debug + 'static {
    /// # Errors
    ///
    /// Implementations report transport failures, they are logged by the caller.
    fn send(&self, feedback: Feedback) -> Result<()>;
}

/// Periodically requests keyframes for one video track.
///
/// The timer thread stops when the requester is dropped.
#[derive(Debug)]
pub struct KeyframeRequester {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl KeyframeRequester {
    /// Start requesting keyframes for the track of `bridge` every `interval`.
    ///
    /// Requests start once the SSRC of the track is known and end with the
    /// track.
    ///
    /// # Errors
    ///
    /// Fails if the timer thread cannot be spawned.
    pub fn start(
        bridge: TrackIngestionBridge,
        interval: Duration,
        sink: Arc<dyn FeedbackSink>,
    ) -> Result<Self> {
        let (stop, stopped) = crossbeam_channel::bounded::<()>(0);
        let track = bridge.track().id.clone();
        let thread = std::thread::Builder::new()
            .name(format!("keyframes-{track}"))
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    select! {
                        recv(stopped) -> _ => break,
                        recv(ticker) -> _ => {
                            if bridge.is_closed() {
                                break;
                            }
                            let Some(ssrc) = bridge.ssrc() else {
                                continue;
                            };
                            trace!("requesting keyframe for track '{track}'");
                            let feedback = Feedback::picture_loss(track.clone(), ssrc);
                            if let Err(error) = sink.send(feedback) {
                                warn!("unable to request keyframe for track '{track}': {error:#}");
                            }
                        },
                    }
                }
                debug!("stopped keyframe requests for track '{track}'");
            })?;
        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }
}

impl Drop for KeyframeRequester {
    fn drop(&mut self) {
        // dropping the sender disconnects the channel and wakes up the thread
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("keyframe request thread panicked");
            }
        }
    }
}
