// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::time::Duration;

use serde::Deserialize;

use crate::{BridgeConfig, OverflowPolicy, RuntimeConfig};

/// Tuning parameters of a [`Compositor`](super::Compositor).
///
/// All durations are given in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// output frames per second
    pub framerate: u32,
    /// maximum samples queued per track
    pub queue_capacity: usize,
    /// how long a push waits for room before the oldest sample is dropped
    pub push_timeout_ms: u64,
    /// time without samples after which a source counts as stalled
    pub stall_timeout_ms: u64,
    /// maximum time to wait for a drain and for the runtime to stop
    pub drain_grace_ms: u64,
    /// keyframe request interval per video track, `0` disables requests
    pub keyframe_interval_ms: u64,
    /// what to do with video sources the layout has no slot for
    pub overflow: OverflowPolicy,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            framerate: 30,
            queue_capacity: 64,
            push_timeout_ms: 20,
            stall_timeout_ms: 500,
            drain_grace_ms: 5000,
            keyframe_interval_ms: 3000,
            overflow: OverflowPolicy::Reject,
        }
    }
}

impl CompositorConfig {
    #[must_use]
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    #[must_use]
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    #[must_use]
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    #[must_use]
    pub fn keyframe_interval(&self) -> Option<Duration> {
        (self.keyframe_interval_ms > 0).then(|| Duration::from_millis(self.keyframe_interval_ms))
    }

    /// Queue parameters for bridges feeding this compositor.
    #[must_use]
    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            capacity: self.queue_capacity,
            push_timeout: self.push_timeout(),
            ..BridgeConfig::default()
        }
    }

    #[must_use]
    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            framerate: self.framerate,
            stall_timeout: self.stall_timeout(),
        }
    }
}
