// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};

use crate::{AudioMix, CompositeFrame, Sink};

pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything a [`CollectSink`] forwards.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Play,
    Video(CompositeFrame),
    Audio(AudioMix),
    Eos,
    Exit,
}

/// Sink forwarding its input to a channel.
///
/// Frames and mixes are dropped while the channel is full, control events wait
/// up to [`CONTROL_TIMEOUT`] for room.
#[derive(Debug)]
pub struct CollectSink {
    sender: Sender<SinkEvent>,
}

impl CollectSink {
    /// Create a sink buffering up to `capacity` frames and mixes.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<SinkEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        (Self { sender }, receiver)
    }

    fn forward(&self, event: SinkEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => trace!("receiver is lagging, dropped {event:?}"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn control(&self, event: SinkEvent) {
        if let Err(SendTimeoutError::Timeout(event)) =
            self.sender.send_timeout(event, CONTROL_TIMEOUT)
        {
            warn!("receiver is stuck, dropped {event:?}");
        }
    }
}

impl Sink for CollectSink {
    fn on_video(&mut self, frame: &CompositeFrame) -> Result<()> {
        self.forward(SinkEvent::Video(frame.clone()));
        Ok(())
    }

    fn on_audio(&mut self, mix: &AudioMix) -> Result<()> {
        self.forward(SinkEvent::Audio(mix.clone()));
        Ok(())
    }

    fn on_play(&mut self) -> Result<()> {
        self.control(SinkEvent::Play);
        Ok(())
    }

    fn on_eos(&mut self) -> Result<()> {
        self.control(SinkEvent::Eos);
        Ok(())
    }

    fn on_exit(&mut self) -> Result<()> {
        self.control(SinkEvent::Exit);
        Ok(())
    }
}
