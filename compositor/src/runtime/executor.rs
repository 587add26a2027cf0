// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{select, Receiver};
use tokio::sync::watch;

use super::plan::{Plan, SinkHandle};
use crate::{
    AudioChunk, AudioMix, CompositeFrame, DrainSignal, FeedEnded, FeedEvent, Layer, Sample, Sink,
};

#[derive(Debug)]
struct FeedState {
    last: Option<Sample>,
    // samples pulled during the current tick
    received: Vec<Sample>,
    last_arrival: Instant,
    stalled: bool,
    ended: bool,
}

impl FeedState {
    fn new(now: Instant) -> Self {
        Self {
            last: None,
            received: Vec::new(),
            last_arrival: now,
            stalled: false,
            ended: false,
        }
    }
}

/// Body of the runtime thread.
pub(super) struct Executor {
    pub(super) plan: watch::Receiver<Arc<Plan>>,
    pub(super) shutdown: Receiver<()>,
    pub(super) draining: Arc<AtomicBool>,
    pub(super) drained: DrainSignal,
    pub(super) feed_ended: FeedEnded,
    pub(super) frame_interval: Duration,
    pub(super) stall_timeout: Duration,
}

#[derive(Default)]
struct Progress {
    feeds: HashMap<String, FeedState>,
    video_sequence: u64,
    audio_sequence: u64,
    eos_sent: bool,
}

impl Executor {
    pub(super) fn run(self) {
        debug!("runtime started, one frame every {:?}", self.frame_interval);
        let ticker = crossbeam_channel::tick(self.frame_interval);
        let mut progress = Progress::default();
        loop {
            select! {
                recv(self.shutdown) -> _ => break,
                recv(ticker) -> tick => {
                    let now = tick.unwrap_or_else(|_| Instant::now());
                    self.tick(&mut progress, now);
                },
            }
        }
        debug!("runtime stopped after {} frame(s)", progress.video_sequence);
    }

    fn tick(&self, progress: &mut Progress, now: Instant) {
        // one plan per tick keeps the geometry of a frame consistent
        let plan = self.plan.borrow().clone();
        let draining = self.draining.load(Ordering::SeqCst);

        let ended = self.pull(&plan, progress, now);

        if !progress.eos_sent {
            if !plan.video_sinks.is_empty() {
                let frame = compose(&plan, progress, self.pts(progress.video_sequence));
                deliver(&plan.video_sinks, "video", |sink| sink.on_video(&frame));
                progress.video_sequence += 1;
            }
            if !plan.audio_sinks.is_empty() {
                let audio = mix(&plan, progress, self.pts(progress.audio_sequence));
                deliver(&plan.audio_sinks, "audio", |sink| sink.on_audio(&audio));
                progress.audio_sequence += 1;
            }
        }

        if draining {
            let complete = plan
                .feeds
                .iter()
                .all(|(name, _)| progress.feeds.get(name).is_some_and(|state| state.ended));
            if complete && !progress.eos_sent {
                info!("all feeds ended, sending end-of-stream");
                deliver(&plan.sinks(), "end-of-stream", |sink| sink.on_eos());
                progress.eos_sent = true;
                self.drained.notify();
            }
        } else {
            for name in ended {
                (self.feed_ended)(&name);
            }
        }
    }

    /// Output time of the frame or mix with the given sequence number.
    fn pts(&self, sequence: u64) -> Duration {
        self.frame_interval
            .saturating_mul(u32::try_from(sequence).unwrap_or(u32::MAX))
    }

    /// Drain every feed and return the ones which ended during this tick.
    fn pull(&self, plan: &Plan, progress: &mut Progress, now: Instant) -> Vec<String> {
        let mut ended = Vec::new();
        for (name, feed) in &plan.feeds {
            let state = progress
                .feeds
                .entry(name.clone())
                .or_insert_with(|| FeedState::new(now));
            state.received.clear();
            if state.ended {
                continue;
            }
            loop {
                match feed.poll() {
                    FeedEvent::Sample(sample) => state.received.push(sample),
                    FeedEvent::Empty => break,
                    FeedEvent::Ended => {
                        debug!("feed '{name}' ended");
                        state.ended = true;
                        state.stalled = false;
                        ended.push(name.clone());
                        break;
                    }
                }
            }
            if let Some(sample) = state.received.last() {
                state.last = Some(sample.clone());
                state.last_arrival = now;
                if state.stalled {
                    info!("feed '{name}' resumed");
                    state.stalled = false;
                }
            } else if !state.ended
                && !state.stalled
                && now.saturating_duration_since(state.last_arrival) > self.stall_timeout
            {
                info!("feed '{name}' stalled, reusing its last sample");
                state.stalled = true;
            }
        }
        progress
            .feeds
            .retain(|name, _| plan.feeds.iter().any(|(feed, _)| feed == name));
        ended
    }
}

fn compose(plan: &Plan, progress: &Progress, pts: Duration) -> CompositeFrame {
    let mut layers = plan
        .video
        .iter()
        .map(|input| {
            let state = progress.feeds.get(&input.feed);
            Layer {
                pad: input.pad.clone(),
                feed: input.feed.clone(),
                rect: input.rect,
                alpha: input.alpha,
                zorder: input.zorder,
                sample: state.and_then(|state| state.last.clone()),
                fresh: state.is_some_and(|state| !state.received.is_empty()),
                stalled: state.is_some_and(|state| state.stalled),
            }
        })
        .collect::<Vec<_>>();
    layers.sort_by_key(|layer| layer.zorder);

    CompositeFrame {
        sequence: progress.video_sequence,
        pts,
        canvas: plan.canvas,
        layers,
    }
}

fn mix(plan: &Plan, progress: &Progress, pts: Duration) -> AudioMix {
    let chunks = plan
        .audio
        .iter()
        .filter(|input| !input.mute && input.volume > 0.0)
        .filter_map(|input| {
            let state = progress.feeds.get(&input.feed)?;
            (!state.received.is_empty()).then(|| AudioChunk {
                pad: input.pad.clone(),
                feed: input.feed.clone(),
                volume: input.volume,
                samples: state.received.clone(),
            })
        })
        .collect();
    AudioMix {
        sequence: progress.audio_sequence,
        pts,
        chunks,
    }
}

fn deliver(
    sinks: &[SinkHandle],
    what: &str,
    mut f: impl FnMut(&mut Box<dyn Sink>) -> anyhow::Result<()>,
) {
    for handle in sinks {
        let mut sink = handle.sink.lock();
        if let Err(error) = f(&mut sink) {
            warn!("sink '{}' failed to handle {what}: {error:#}", handle.name);
        }
    }
}
