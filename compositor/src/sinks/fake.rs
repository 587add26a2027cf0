// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::{AudioMix, CompositeFrame, Sink};

/// What a [`FakeSink`] has seen so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeSinkStats {
    pub frames: u64,
    pub mixes: u64,
    /// audio samples received over all mixes
    pub audio_samples: u64,
    pub played: u64,
    pub eos: u64,
    pub exited: u64,
    pub last_frame: Option<CompositeFrame>,
}

/// Fake sink to catch the compositor output without any further processing.
///
/// Clones share their statistics, keep one to inspect what the attached
/// sink received.
#[derive(Debug, Clone, Default)]
pub struct FakeSink {
    stats: Arc<Mutex<FakeSinkStats>>,
}

impl FakeSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stats(&self) -> FakeSinkStats {
        self.stats.lock().clone()
    }
}

impl Sink for FakeSink {
    fn on_video(&mut self, frame: &CompositeFrame) -> Result<()> {
        let mut stats = self.stats.lock();
        stats.frames += 1;
        stats.last_frame = Some(frame.clone());
        Ok(())
    }

    fn on_audio(&mut self, mix: &AudioMix) -> Result<()> {
        let mut stats = self.stats.lock();
        stats.mixes += 1;
        stats.audio_samples += mix
            .chunks
            .iter()
            .map(|chunk| chunk.samples.len() as u64)
            .sum::<u64>();
        Ok(())
    }

    fn on_play(&mut self) -> Result<()> {
        self.stats.lock().played += 1;
        Ok(())
    }

    fn on_eos(&mut self) -> Result<()> {
        self.stats.lock().eos += 1;
        Ok(())
    }

    fn on_exit(&mut self) -> Result<()> {
        self.stats.lock().exited += 1;
        Ok(())
    }
}
