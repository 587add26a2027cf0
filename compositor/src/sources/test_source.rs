// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::{thread::JoinHandle, time::Duration};

use anyhow::{Context, Result};
use crossbeam_channel::{select, Sender};

use super::{rtp, TrackIngestionBridge};
use crate::{IngestError, MediaKind};

/// Parameters of a [`TestSource`].
#[derive(Clone, Debug)]
pub struct TestSourceParameters {
    /// time between two packets
    pub interval: Duration,
    /// bytes of payload per packet
    pub payload_size: usize,
    pub ssrc: u32,
    /// stop after this many packets and close the bridge
    pub limit: Option<u64>,
}

impl Default for TestSourceParameters {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(20),
            payload_size: 160,
            ssrc: 0x1234_5678,
            limit: None,
        }
    }
}

/// Produces synthetic RTP packets into a bridge from its own thread.
///
/// Acts like a network thread would and is used for testing and the demo
/// session.
#[derive(Debug)]
pub struct TestSource {
    bridge: TrackIngestionBridge,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<u64>>,
}

impl TestSource {
    /// Start pushing packets into `bridge`.
    ///
    /// # Errors
    ///
    /// Fails if the producer thread cannot be spawned.
    pub fn start(bridge: TrackIngestionBridge, params: TestSourceParameters) -> Result<Self> {
        trace!("TestSource::start({}, {params:?})", bridge.track().id);
        let (stop, stopped) = crossbeam_channel::bounded::<()>(0);
        let producer = bridge.clone();
        let thread = std::thread::Builder::new()
            .name(format!("test-source-{}", bridge.track().id))
            .spawn(move || produce(&producer, &params, &stopped))
            .context("unable to spawn test source thread")?;
        Ok(Self {
            bridge,
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    #[must_use]
    pub fn bridge(&self) -> &TrackIngestionBridge {
        &self.bridge
    }

    /// Stop producing and close the bridge. Returns the number of packets sent.
    pub fn finish(mut self) -> u64 {
        let sent = self.join();
        self.bridge.close();
        sent
    }

    fn join(&mut self) -> u64 {
        self.stop.take();
        self.thread
            .take()
            .map(|thread| thread.join().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl Drop for TestSource {
    fn drop(&mut self) {
        self.join();
    }
}

fn produce(
    bridge: &TrackIngestionBridge,
    params: &TestSourceParameters,
    stopped: &crossbeam_channel::Receiver<()>,
) -> u64 {
    let track = bridge.track();
    let (payload_type, clock_rate) = match track.kind {
        MediaKind::Video => (96, 90_000),
        MediaKind::Audio => (111, 48_000),
    };
    let step = u32::try_from(params.interval.as_micros() * clock_rate / 1_000_000).unwrap_or(0);
    let payload = vec![0xa5_u8; params.payload_size.max(1)];
    let ticker = crossbeam_channel::tick(params.interval);

    let mut sent = 0_u64;
    loop {
        if params.limit.is_some_and(|limit| sent >= limit) {
            bridge.close();
            break;
        }
        select! {
            recv(stopped) -> _ => break,
            recv(ticker) -> _ => {
                #[allow(clippy::cast_possible_truncation)]
                let packet = rtp::packet(
                    payload_type,
                    sent as u16,
                    step.wrapping_mul(sent as u32),
                    params.ssrc,
                    track.kind == MediaKind::Video,
                    &payload,
                );
                let packet = match packet {
                    Ok(packet) => packet,
                    Err(error) => {
                        warn!("test source '{}' cannot build a packet: {error}", track.id);
                        break;
                    }
                };
                match bridge.push(packet) {
                    Ok(_) => sent += 1,
                    Err(IngestError::Closed(_)) => break,
                    Err(error) => warn!("test source '{}' produced a bad packet: {error}", track.id),
                }
            },
        }
    }
    debug!("test source '{}' sent {sent} packet(s)", track.id);
    sent
}
