// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Sink trait.

use anyhow::Result;
use std::fmt::Debug;

use crate::{AudioMix, CompositeFrame};

/// Trait of an output sink.
///
/// A sink is attached to a sink node of the graph and receives everything
/// which reaches that node from the mixers.
pub trait Sink: Send + Debug + 'static {
    /// Called for every frame of the video mixer.
    ///
    /// # Errors
    ///
    /// Errors are logged, delivery continues with the next frame.
    fn on_video(&mut self, _frame: &CompositeFrame) -> Result<()> {
        Ok(())
    }

    /// Called for every tick of the audio mixer.
    ///
    /// # Errors
    ///
    /// Errors are logged, delivery continues with the next mix.
    fn on_audio(&mut self, _mix: &AudioMix) -> Result<()> {
        Ok(())
    }

    /// Called when processing starts.
    ///
    /// # Errors
    ///
    /// This cannot fail, it's doing nothing.
    fn on_play(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called exactly once after the last frame of a drain.
    ///
    /// # Errors
    ///
    /// This cannot fail, it's doing nothing.
    fn on_eos(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when the graph is torn down.
    ///
    /// # Errors
    ///
    /// This cannot fail, it's doing nothing.
    fn on_exit(&mut self) -> Result<()> {
        Ok(())
    }
}
