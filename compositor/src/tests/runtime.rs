// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use parking_lot::Mutex;
use webrtc::util::Marshal;

use crate::{
    testing, CollectSink, CompositeFrame, Compositor, CompositorConfig, Element, Error, Feedback,
    FeedbackSink, FakeSink, ProcessingNode, Rect, Sink, SinkEvent, State, TestSource,
    TestSourceParameters, TrackId, TrackIngestionBridge,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn params(limit: Option<u64>) -> TestSourceParameters {
    TestSourceParameters {
        interval: Duration::from_millis(10),
        limit,
        ..TestSourceParameters::default()
    }
}

fn last_frame(sink: &FakeSink) -> Option<CompositeFrame> {
    sink.stats().last_frame
}

/// wait for a frame matching `condition` and return it
fn wait_for_frame(sink: &FakeSink, condition: impl Fn(&CompositeFrame) -> bool) -> CompositeFrame {
    assert!(
        testing::wait_until(TIMEOUT, || last_frame(sink).is_some_and(|f| condition(&f))),
        "no matching frame, last one was {:?}",
        last_frame(sink)
    );
    last_frame(sink).unwrap()
}

#[test]
fn test_frames_follow_placements() {
    testing::init();
    let (compositor, sinks) = testing::compositor(testing::config(), testing::layout());
    compositor.start().unwrap();
    assert_eq!(compositor.state(), State::Running);
    // starting twice has no effect
    compositor.start().unwrap();

    let sources = (0..2)
        .map(|n| {
            let bridge = compositor.bridge(testing::video_track(&format!("camera{n}")));
            compositor.add_video(&bridge).unwrap();
            TestSource::start(bridge, params(None)).unwrap()
        })
        .collect::<Vec<_>>();

    let frame = wait_for_frame(&sinks.video, |frame| {
        frame.visible_layers().count() == 2
            && frame.layers.iter().all(|layer| layer.sample.is_some())
    });
    assert_eq!(frame.canvas, testing::RESOLUTION);
    assert_eq!(frame.layers[0].feed, "video0_src");
    assert_eq!(frame.layers[0].pad, "sink_0");
    assert_eq!(frame.layers[0].rect, Rect::new(0, 180, 640, 360));
    assert_eq!(frame.layers[1].feed, "video1_src");
    assert_eq!(frame.layers[1].rect, Rect::new(640, 180, 640, 360));
    assert_eq!(sinks.video.stats().played, 1);

    drop(sources);
    compositor.stop().unwrap();
}

#[test]
fn test_removal_while_running() {
    testing::init();
    let (compositor, sinks) = testing::compositor(testing::config(), testing::layout());
    compositor.start().unwrap();

    let mut ids = Vec::new();
    let mut sources = Vec::new();
    for n in 0..3 {
        let bridge = compositor.bridge(testing::video_track(&format!("camera{n}")));
        ids.push(compositor.add_video(&bridge).unwrap());
        sources.push(TestSource::start(bridge, params(None)).unwrap());
    }
    wait_for_frame(&sinks.video, |frame| frame.visible_layers().count() == 3);

    compositor.remove_source(ids[1]).unwrap();
    let frame = wait_for_frame(&sinks.video, |frame| frame.layers.len() == 2);
    let feeds = frame
        .layers
        .iter()
        .map(|layer| layer.feed.as_str())
        .collect::<Vec<_>>();
    assert_eq!(feeds, ["video0_src", "video2_src"]);
    assert_eq!(frame.layers[1].rect, Rect::new(640, 180, 640, 360));
    // the removed branch closed its bridge
    assert!(sources[1].bridge().is_closed());

    compositor.stop().unwrap();
}

#[test]
fn test_send_eos() {
    testing::init();
    let (compositor, sinks) = testing::compositor(testing::config(), testing::layout());
    compositor.start().unwrap();

    let video = compositor.bridge(testing::video_track("camera"));
    compositor.add_video(&video).unwrap();
    let audio = compositor.bridge(testing::audio_track("microphone"));
    compositor.add_audio(&audio).unwrap();
    let sources = [
        TestSource::start(video.clone(), params(None)).unwrap(),
        TestSource::start(audio.clone(), params(None)).unwrap(),
    ];
    wait_for_frame(&sinks.video, |frame| {
        frame.layers.first().is_some_and(|layer| layer.sample.is_some())
    });

    compositor.send_eos().unwrap();
    assert_eq!(compositor.state(), State::Draining);
    // sending it twice has no effect
    compositor.send_eos().unwrap();
    assert!(video.is_closed());
    assert!(audio.is_closed());

    assert!(testing::wait_until(TIMEOUT, || sinks.video.stats().eos == 1
        && sinks.audio.stats().eos == 1));
    // ended feeds are not evicted while draining
    assert_eq!(compositor.active_video().len(), 1);
    assert_eq!(compositor.active_audio().len(), 1);

    // nothing is added while draining
    let late = compositor.bridge(testing::video_track("late"));
    assert!(compositor.add_video(&late).is_err());

    let frames = sinks.video.stats().frames;
    testing::wait_millis(100);
    assert_eq!(sinks.video.stats().frames, frames);

    drop(sources);
    compositor.stop().unwrap();
    assert_eq!(compositor.state(), State::Stopped);
    let stats = sinks.video.stats();
    assert_eq!(stats.eos, 1);
    assert_eq!(stats.exited, 1);
}

#[test]
fn test_stop_while_running_drains() {
    testing::init();
    let (compositor, sinks) = testing::compositor(testing::config(), testing::layout());
    compositor.start().unwrap();

    let bridge = compositor.bridge(testing::video_track("camera"));
    compositor.add_video(&bridge).unwrap();
    let source = TestSource::start(bridge.clone(), params(None)).unwrap();
    wait_for_frame(&sinks.video, |frame| {
        frame.layers.first().is_some_and(|layer| layer.sample.is_some())
    });

    compositor.stop().unwrap();
    assert_eq!(compositor.state(), State::Stopped);
    assert!(bridge.is_closed());
    assert!(compositor.topology().is_none());
    for stats in [sinks.video.stats(), sinks.audio.stats()] {
        assert_eq!(stats.played, 1);
        assert_eq!(stats.eos, 1);
        assert_eq!(stats.exited, 1);
    }
    source.finish();
}

#[test]
fn test_ended_track_is_evicted() {
    testing::init();
    let (compositor, sinks) = testing::compositor(testing::config(), testing::layout());
    compositor.start().unwrap();

    let endless = compositor.bridge(testing::video_track("endless"));
    let kept = compositor.add_video(&endless).unwrap();
    let short = compositor.bridge(testing::video_track("short"));
    let ended = compositor.add_video(&short).unwrap();
    let sources = [
        TestSource::start(endless, params(None)).unwrap(),
        TestSource::start(short, params(Some(3))).unwrap(),
    ];

    assert!(testing::wait_until(TIMEOUT, || compositor.active_video() == [kept]));
    assert!(compositor.source(ended).is_none());
    assert_eq!(
        compositor.placements()[0].rect,
        Some(Rect::new(0, 0, 1280, 720))
    );
    let frame = wait_for_frame(&sinks.video, |frame| frame.layers.len() == 1);
    assert_eq!(frame.layers[0].rect, Rect::new(0, 0, 1280, 720));
    assert_eq!(compositor.state(), State::Running);

    drop(sources);
    compositor.stop().unwrap();
}

#[test]
fn test_stalled_track_keeps_slot() {
    testing::init();
    let (compositor, sinks) = testing::compositor(testing::config(), testing::layout());
    compositor.start().unwrap();

    let bridge = compositor.bridge(testing::video_track("camera"));
    compositor.add_video(&bridge).unwrap();
    bridge.push(testing::packet(0)).unwrap();

    // stall timeout of the test configuration is 100ms
    let frame = wait_for_frame(&sinks.video, |frame| {
        frame.layers.first().is_some_and(|layer| layer.stalled)
    });
    let layer = &frame.layers[0];
    assert!(!layer.fresh);
    assert_eq!(
        layer.sample.as_ref().and_then(|sample| sample.rtp).map(|rtp| rtp.sequence_number),
        Some(0)
    );
    assert_eq!(compositor.active_video().len(), 1);
    assert!(layer.is_visible());

    bridge.push(testing::packet(1)).unwrap();
    wait_for_frame(&sinks.video, |frame| {
        frame.layers.first().is_some_and(|layer| !layer.stalled)
    });

    compositor.stop().unwrap();
}

#[test]
fn test_audio_mix() {
    testing::init();
    let (compositor, sinks) = testing::compositor(testing::config(), testing::layout());
    compositor.start().unwrap();

    let bridge = compositor.bridge(testing::audio_track("microphone"));
    compositor.add_audio(&bridge).unwrap();
    let source = TestSource::start(bridge, params(None)).unwrap();

    assert!(testing::wait_until(TIMEOUT, || sinks.audio.stats().audio_samples >= 5));
    // audio does not show up in the video output
    assert!(last_frame(&sinks.video).is_some_and(|frame| frame.layers.is_empty()));

    source.finish();
    compositor.stop().unwrap();
}

#[test]
fn test_sink_attached_while_running() {
    testing::init();
    let (compositor, _) = testing::compositor(testing::config(), testing::layout());
    compositor.start().unwrap();

    let late = FakeSink::new();
    compositor
        .add(crate::ProcessingNode::new(crate::Element::FakeSink, "late_sink"))
        .unwrap();
    // the video mixer has only one output
    assert!(matches!(
        compositor.link_video_sink("late_sink"),
        Err(crate::Error::Link { .. })
    ));
    compositor.attach_sink("late_sink", late.clone()).unwrap();
    assert_eq!(late.stats().played, 1);

    compositor.stop().unwrap();
    assert_eq!(late.stats().exited, 1);
    // the unlinked sink never saw any output
    assert_eq!(late.stats().frames, 0);
}

#[derive(Debug, Default)]
struct RecordingFeedback {
    received: Mutex<Vec<Feedback>>,
}

impl FeedbackSink for RecordingFeedback {
    fn send(&self, feedback: Feedback) -> Result<()> {
        self.received.lock().push(feedback);
        Ok(())
    }
}

#[test]
fn test_keyframe_requests() {
    testing::init();
    let config = CompositorConfig {
        keyframe_interval_ms: 10,
        ..testing::config()
    };
    let (compositor, _) = testing::compositor(config, testing::layout());
    let feedback = Arc::new(RecordingFeedback::default());
    compositor.set_feedback(feedback.clone());

    let bridge = compositor.bridge(testing::video_track("camera"));
    let id = compositor.add_video(&bridge).unwrap();

    // nothing is requested before the SSRC is known
    testing::wait_millis(50);
    assert!(feedback.received.lock().is_empty());

    bridge.push(testing::packet(0)).unwrap();
    assert!(testing::wait_until(TIMEOUT, || !feedback
        .received
        .lock()
        .is_empty()));
    let Feedback::PictureLossIndication { track, pli } = feedback.received.lock()[0].clone();
    assert_eq!(track, TrackId::from("camera"));
    assert_eq!(pli.media_ssrc, 0xcafe);
    // ready to go out as RTCP
    assert_eq!(pli.marshal().unwrap().len(), 12);

    // requests end with the source
    compositor.remove_source(id).unwrap();
    let count = feedback.received.lock().len();
    testing::wait_millis(50);
    assert_eq!(feedback.received.lock().len(), count);
}

#[test]
fn test_concurrent_changes() {
    testing::init();
    let (compositor, sinks) = testing::compositor(testing::config(), testing::layout());
    compositor.start().unwrap();

    let threads = (0..4)
        .map(|n| {
            let compositor = compositor.clone();
            std::thread::spawn(move || {
                let bridge: TrackIngestionBridge =
                    compositor.bridge(testing::video_track(&format!("camera{n}")));
                let id = compositor.add_video(&bridge).unwrap();
                let source = TestSource::start(bridge, params(None)).unwrap();
                testing::wait_millis(50);
                if n % 2 == 0 {
                    compositor.remove_source(id).unwrap();
                }
                source
            })
        })
        .collect::<Vec<_>>();
    let sources = threads
        .into_iter()
        .map(|thread| thread.join().unwrap())
        .collect::<Vec<_>>();

    assert_eq!(compositor.active_video().len(), 2);
    assert_eq!(
        compositor
            .placements()
            .iter()
            .map(|placement| placement.rect)
            .collect::<Vec<_>>(),
        vec![
            Some(Rect::new(0, 180, 640, 360)),
            Some(Rect::new(640, 180, 640, 360)),
        ]
    );
    wait_for_frame(&sinks.video, |frame| {
        frame.layers.len() == 2 && frame.layers.iter().all(|layer| layer.sample.is_some())
    });

    drop(sources);
    compositor.stop().unwrap();
}

/// compositor delivering its video output into a channel
fn collecting_compositor(
    config: CompositorConfig,
) -> (Compositor, crossbeam_channel::Receiver<SinkEvent>) {
    let compositor = Compositor::soft(config, testing::layout()).unwrap();
    let (sink, events) = CollectSink::new(4096);
    compositor
        .add(ProcessingNode::new(Element::AppSink, "collect"))
        .unwrap();
    compositor.link_video_sink("collect").unwrap();
    compositor.attach_sink("collect", sink).unwrap();
    (compositor, events)
}

#[test]
fn test_frame_timestamps() {
    testing::init();
    let (compositor, events) = collecting_compositor(testing::config());
    compositor.start().unwrap();

    let frames = events
        .iter()
        .filter_map(|event| match event {
            SinkEvent::Video(frame) => Some(frame),
            _ => None,
        })
        .take(3)
        .collect::<Vec<_>>();
    for (n, frame) in (0_u64..).zip(&frames) {
        assert_eq!(frame.sequence, n);
        // 50 frames per second
        assert_eq!(frame.pts, Duration::from_millis(n * 20));
    }

    compositor.stop().unwrap();
}

#[test]
fn test_adding_source_keeps_flowing_branch() {
    testing::init();
    let config = CompositorConfig {
        stall_timeout_ms: 1000,
        ..testing::config()
    };
    let (compositor, events) = collecting_compositor(config);
    compositor.start().unwrap();

    let first = compositor.bridge(testing::video_track("camera0"));
    let first_id = compositor.add_video(&first).unwrap();
    let first_pad = compositor.source(first_id).unwrap().mixer_pad;

    let mut seen = Vec::new();
    let mut second = None;
    for n in 0..20_u16 {
        if n == 10 {
            let bridge = compositor.bridge(testing::video_track("camera1"));
            compositor.add_video(&bridge).unwrap();
            second = Some(TestSource::start(bridge, params(None)).unwrap());
        }
        first.push(testing::packet(n)).unwrap();
        // the next packet is pushed once this one made it into a frame
        loop {
            let SinkEvent::Video(frame) = events.recv_timeout(TIMEOUT).unwrap() else {
                continue;
            };
            let Some(layer) = frame.layers.iter().find(|layer| layer.feed == "video0_src") else {
                continue;
            };
            assert!(!layer.stalled, "video0_src stalled in frame {}", frame.sequence);
            let Some(sequence) = layer
                .sample
                .as_ref()
                .and_then(|sample| sample.rtp)
                .map(|rtp| rtp.sequence_number)
            else {
                continue;
            };
            if seen.last() != Some(&sequence) {
                seen.push(sequence);
            }
            if sequence == n {
                break;
            }
        }
    }

    assert_eq!(seen, (0..20).collect::<Vec<_>>());
    assert_eq!(compositor.source(first_id).unwrap().mixer_pad, first_pad);
    assert_eq!(compositor.active_video().len(), 2);
    assert_eq!(first.stats().dropped, 0);

    drop(second);
    compositor.stop().unwrap();
}

/// sink which blocks in `on_video` until released
#[derive(Debug)]
struct BlockingSink {
    entered: crossbeam_channel::Sender<()>,
    release: crossbeam_channel::Receiver<()>,
}

impl Sink for BlockingSink {
    fn on_video(&mut self, _frame: &CompositeFrame) -> Result<()> {
        let _ = self.entered.try_send(());
        let _ = self.release.recv();
        Ok(())
    }
}

#[test]
fn test_stop_with_blocked_sink() {
    testing::init();
    let config = CompositorConfig {
        drain_grace_ms: 300,
        ..testing::config()
    };
    let compositor = Compositor::soft(config, testing::layout()).unwrap();
    let (entered, blocked) = crossbeam_channel::bounded(1);
    let (release, released) = crossbeam_channel::bounded::<()>(0);
    compositor
        .add(ProcessingNode::new(Element::FakeSink, "blocking"))
        .unwrap();
    compositor.link_video_sink("blocking").unwrap();
    compositor
        .attach_sink(
            "blocking",
            BlockingSink {
                entered,
                release: released,
            },
        )
        .unwrap();
    compositor.start().unwrap();
    blocked.recv_timeout(TIMEOUT).unwrap();

    let (done, stopped) = crossbeam_channel::bounded(1);
    let stopping = compositor.clone();
    std::thread::spawn(move || {
        let _ = done.send(stopping.stop());
    });
    // drain, runtime shutdown and sink release wait 300ms each at most
    let result = stopped.recv_timeout(Duration::from_secs(3)).unwrap();
    assert!(matches!(result, Err(Error::Backend { .. })), "{result:?}");
    assert_eq!(compositor.state(), State::Stopped);
    assert!(compositor.topology().is_none());

    drop(release);
}
