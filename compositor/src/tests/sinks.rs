// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::time::Duration;

use crate::{
    testing, AudioChunk, AudioMix, CollectSink, CompositeFrame, Element, Layer, ManifestParameters,
    ManifestSink, ProcessingNode, Rect, Sink, SinkEvent, Size, TestSource, TestSourceParameters,
};

fn frame(sequence: u64, layers: Vec<Layer>) -> CompositeFrame {
    CompositeFrame {
        sequence,
        pts: Duration::from_millis(sequence * 20),
        canvas: Size::HD,
        layers,
    }
}

fn layer(feed: &str, rect: Rect, alpha: f64) -> Layer {
    Layer {
        pad: "sink_0".to_owned(),
        feed: feed.to_owned(),
        rect,
        alpha,
        zorder: 0,
        sample: None,
        fresh: false,
        stalled: false,
    }
}

#[test]
fn test_manifest() {
    testing::init();
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("out").join("manifest.txt");
    let mut sink = ManifestSink::create(ManifestParameters {
        file_path: file_path.clone(),
        changes_only: false,
    })
    .unwrap();

    sink.on_play().unwrap();
    sink.on_video(&frame(0, vec![])).unwrap();
    sink.on_video(&frame(
        1,
        vec![
            layer("video0_src", Rect::new(0, 0, 640, 360), 1.0),
            layer("video1_src", Rect::default(), 0.0),
        ],
    ))
    .unwrap();
    // empty mixes are skipped
    sink.on_audio(&AudioMix {
        sequence: 0,
        pts: Duration::ZERO,
        chunks: vec![],
    })
    .unwrap();
    sink.on_audio(&AudioMix {
        sequence: 1,
        pts: Duration::from_millis(20),
        chunks: vec![AudioChunk {
            pad: "sink_0".to_owned(),
            feed: "audio2_src".to_owned(),
            volume: 1.0,
            samples: vec![],
        }],
    })
    .unwrap();
    sink.on_eos().unwrap();
    // nothing is written after end-of-stream
    sink.on_video(&frame(2, vec![])).unwrap();
    sink.on_exit().unwrap();

    let manifest = std::fs::read_to_string(&file_path).unwrap();
    assert_eq!(
        manifest.lines().collect::<Vec<_>>(),
        [
            "video 0 0 1280x720",
            "video 1 20 1280x720 video0_src@640x360+0+0",
            "audio 1 20 audio2_src:0",
            "eos",
        ]
    );
}

#[test]
fn test_manifest_changes_only() {
    testing::init();
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("manifest.txt");
    let mut sink = ManifestSink::create(ManifestParameters {
        file_path: file_path.clone(),
        changes_only: true,
    })
    .unwrap();

    let full = layer("video0_src", Rect::new(0, 0, 1280, 720), 1.0);
    for sequence in 0..3 {
        sink.on_video(&frame(sequence, vec![full.clone()])).unwrap();
    }
    sink.on_video(&frame(3, vec![])).unwrap();
    sink.on_exit().unwrap();

    let manifest = std::fs::read_to_string(&file_path).unwrap();
    assert_eq!(
        manifest.lines().collect::<Vec<_>>(),
        [
            "video 0 0 1280x720 video0_src@1280x720+0+0",
            "video 3 60 1280x720",
        ]
    );
}

#[test]
fn test_collect_sink() {
    testing::init();
    let (compositor, _) = testing::compositor(testing::config(), testing::layout());
    let (sink, events) = CollectSink::new(16);
    compositor
        .add(ProcessingNode::new(Element::AppSink, "collect"))
        .unwrap();
    compositor.attach_sink("collect", sink).unwrap();
    compositor.start().unwrap();

    assert_eq!(
        events.recv_timeout(Duration::from_secs(1)).unwrap(),
        SinkEvent::Play
    );
    compositor.stop().unwrap();
    assert_eq!(
        events.recv_timeout(Duration::from_secs(1)).unwrap(),
        SinkEvent::Exit
    );
}

#[test]
fn test_collect_sink_receives_output() {
    testing::init();
    let compositor = crate::Compositor::soft(testing::config(), testing::layout()).unwrap();
    let (sink, events) = CollectSink::new(1024);
    compositor
        .add(ProcessingNode::new(Element::AppSink, "collect"))
        .unwrap();
    compositor.link_video_sink("collect").unwrap();
    compositor.attach_sink("collect", sink).unwrap();
    compositor.start().unwrap();

    let bridge = compositor.bridge(testing::video_track("camera"));
    compositor.add_video(&bridge).unwrap();
    let source = TestSource::start(
        bridge,
        TestSourceParameters {
            interval: Duration::from_millis(10),
            ..TestSourceParameters::default()
        },
    )
    .unwrap();
    assert!(testing::wait_until(Duration::from_secs(5), || {
        events.try_iter().any(|event| {
            matches!(event, SinkEvent::Video(frame)
                if frame.layers.first().is_some_and(|layer| layer.sample.is_some()))
        })
    }));

    compositor.stop().unwrap();
    source.finish();
    let tail = events.try_iter().collect::<Vec<_>>();
    let eos = tail.iter().position(|event| *event == SinkEvent::Eos).unwrap();
    assert_eq!(tail.last(), Some(&SinkEvent::Exit));
    // nothing but the exit follows end-of-stream
    assert_eq!(eos + 2, tail.len());
}
