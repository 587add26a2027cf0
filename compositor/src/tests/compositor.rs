// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use crate::{
    testing, Caps, Codec, Compositor, Element, Error, Layout, LayoutError, LayoutRule, LayoutSlot,
    OverflowPolicy, PadRef, ParamValue, Placement, ProcessingNode, Rect, Size, SourceId, State,
    AUDIO_MIXER, VIDEO_MIXER,
};

fn compositor() -> Compositor {
    testing::init();
    testing::compositor(testing::config(), testing::layout()).0
}

fn pad_parameter(compositor: &Compositor, pad: &PadRef, name: &str) -> Option<ParamValue> {
    compositor
        .topology()
        .unwrap()
        .node(&pad.node)
        .and_then(|node| node.pad(&pad.pad))
        .and_then(|pad| pad.parameter(name).cloned())
}

fn add_videos(compositor: &Compositor, count: usize) -> Vec<SourceId> {
    (0..count)
        .map(|n| {
            let bridge = compositor.bridge(testing::video_track(&format!("camera{n}")));
            compositor.add_video(&bridge).unwrap()
        })
        .collect()
}

fn rects(compositor: &Compositor) -> Vec<Option<Rect>> {
    compositor
        .placements()
        .into_iter()
        .map(|placement| placement.rect)
        .collect()
}

#[test]
fn test_add_video_builds_branch() {
    let compositor = compositor();
    let bridge = compositor.bridge(testing::video_track("camera"));
    let id = compositor.add_video(&bridge).unwrap();

    let topology = compositor.topology().unwrap();
    for suffix in ["src", "depay", "dec", "convert", "scale", "caps"] {
        assert!(topology.contains(&format!("video0_{suffix}")), "{suffix}");
    }
    assert_eq!(
        topology.upstream_chain("video0_caps"),
        vec![
            "video0_caps",
            "video0_scale",
            "video0_convert",
            "video0_dec",
            "video0_depay",
            "video0_src"
        ]
    );

    let info = compositor.source(id).unwrap();
    assert_eq!(info.feed_node, "video0_src");
    assert_eq!(info.mixer_pad, PadRef::new(VIDEO_MIXER, "sink_0"));
    assert_eq!(info.track, Some("camera".into()));
    assert_eq!(
        topology
            .upstream_source(&info.mixer_pad)
            .map(ProcessingNode::name),
        Some("video0_src")
    );

    assert_eq!(
        compositor.placements(),
        vec![Placement {
            source: id,
            rect: Some(Rect::new(0, 0, 1280, 720)),
        }]
    );
    let pad = &info.mixer_pad;
    assert_eq!(pad_parameter(&compositor, pad, "width"), Some(ParamValue::Int(1280)));
    assert_eq!(pad_parameter(&compositor, pad, "alpha"), Some(ParamValue::Float(1.0)));
    assert_eq!(pad_parameter(&compositor, pad, "zorder"), Some(ParamValue::UInt(0)));
    assert_eq!(compositor.state(), State::Idle);
}

#[test]
fn test_layout_follows_source_count() {
    let compositor = compositor();
    let ids = add_videos(&compositor, 2);
    assert_eq!(
        rects(&compositor),
        vec![
            Some(Rect::new(0, 180, 640, 360)),
            Some(Rect::new(640, 180, 640, 360)),
        ]
    );

    let ids = [ids, add_videos(&compositor, 2)].concat();
    assert_eq!(compositor.active_video(), ids);
    assert_eq!(
        rects(&compositor),
        vec![
            Some(Rect::new(0, 0, 640, 360)),
            Some(Rect::new(640, 0, 640, 360)),
            Some(Rect::new(0, 360, 640, 360)),
            Some(Rect::new(640, 360, 640, 360)),
        ]
    );
    let last = compositor.source(ids[3]).unwrap().mixer_pad;
    assert_eq!(pad_parameter(&compositor, &last, "xpos"), Some(ParamValue::Int(640)));
    assert_eq!(pad_parameter(&compositor, &last, "ypos"), Some(ParamValue::Int(360)));
}

/// one centered source, two side by side, three as a pyramid, four in quarters
fn conference_layout() -> Layout {
    let slot = |x: i64, y: i64| LayoutSlot::new(x, y, 640, 360);
    Layout::new(Size::HD)
        .with_rule(
            1,
            LayoutRule::new().with_slot(LayoutSlot::with_symmetric_margins(
                0, 0, 640, 360, 320, 180,
            )),
        )
        .unwrap()
        .with_rule(
            2,
            LayoutRule::new()
                .with_slot(LayoutSlot::with_symmetric_margins(0, 0, 640, 360, 0, 180))
                .with_slot(LayoutSlot::with_symmetric_margins(640, 0, 640, 360, 0, 180)),
        )
        .unwrap()
        .with_rule(
            3,
            LayoutRule::new()
                .with_slot(slot(0, 0))
                .with_slot(slot(640, 0))
                .with_slot(slot(320, 360)),
        )
        .unwrap()
        .with_rule(
            4,
            LayoutRule::new()
                .with_slot(slot(0, 0))
                .with_slot(slot(640, 0))
                .with_slot(slot(0, 360))
                .with_slot(slot(640, 360)),
        )
        .unwrap()
}

#[test]
fn test_layout_after_each_addition() {
    testing::init();
    let (compositor, _) = testing::compositor(testing::config(), conference_layout());
    let expected = [
        vec![(320, 180)],
        vec![(0, 180), (640, 180)],
        vec![(0, 0), (640, 0), (320, 360)],
        vec![(0, 0), (640, 0), (0, 360), (640, 360)],
    ];

    for (n, positions) in expected.iter().enumerate() {
        let bridge = compositor.bridge(testing::video_track(&format!("camera{n}")));
        compositor.add_video(&bridge).unwrap();
        let rects = rects(&compositor);
        assert_eq!(
            rects,
            positions
                .iter()
                .map(|&(x, y)| Some(Rect::new(x, y, 640, 360)))
                .collect::<Vec<_>>(),
            "{} source(s)",
            n + 1
        );
        for rect in rects.into_iter().flatten() {
            assert!(rect.fits(Size::HD), "{rect} leaves the canvas");
        }
    }

    let placements = compositor.placements();
    let bridge = compositor.bridge(testing::video_track("camera4"));
    assert!(matches!(
        compositor.add_video(&bridge),
        Err(Error::Layout(LayoutError::NotEnoughSlots {
            active: 5,
            slots: 4,
            count: 4
        }))
    ));
    assert_eq!(compositor.placements(), placements);
}

#[test]
fn test_failed_branch_is_rolled_back() {
    let compositor = compositor();
    // takes the name of a node of the next video branch
    compositor
        .add(ProcessingNode::new(Element::VideoConvert, "video0_dec"))
        .unwrap();
    let before = compositor.topology().unwrap().len();

    let bridge = compositor.bridge(testing::video_track("camera"));
    assert!(matches!(
        compositor.add_video(&bridge),
        Err(Error::DuplicateNode(name)) if name == "video0_dec"
    ));

    let topology = compositor.topology().unwrap();
    assert_eq!(topology.len(), before);
    assert!(!topology.contains("video0_src"));
    assert!(!topology.contains("video0_depay"));
    // the node which existed before is kept
    assert!(topology.contains("video0_dec"));
    assert!(compositor.active_video().is_empty());
    assert!(compositor.placements().is_empty());
    assert!(!bridge.is_closed());
}

#[test]
fn test_source_beyond_layout_is_rejected() {
    let compositor = compositor();
    add_videos(&compositor, 4);
    let before = compositor.topology().unwrap();
    let placements = compositor.placements();

    let bridge = compositor.bridge(testing::video_track("camera4"));
    let error = compositor.add_video(&bridge).unwrap_err();
    assert!(matches!(
        error,
        Error::Layout(LayoutError::NotEnoughSlots {
            active: 5,
            slots: 4,
            count: 4
        })
    ));

    // the graph has not been touched
    let after = compositor.topology().unwrap();
    assert_eq!(after.len(), before.len());
    assert!(!after.contains("video4_src"));
    assert_eq!(
        after.node(VIDEO_MIXER).unwrap().pads().count(),
        before.node(VIDEO_MIXER).unwrap().pads().count()
    );
    assert_eq!(compositor.placements(), placements);
    assert_eq!(compositor.active_video().len(), 4);
    assert!(!bridge.is_closed());
}

#[test]
fn test_removal_shrinks_layout() {
    let compositor = compositor();
    let ids = add_videos(&compositor, 3);
    let removed = compositor.source(ids[0]).unwrap();

    compositor.remove_source(ids[0]).unwrap();

    assert_eq!(compositor.active_video(), ids[1..]);
    assert_eq!(
        rects(&compositor),
        vec![
            Some(Rect::new(0, 180, 640, 360)),
            Some(Rect::new(640, 180, 640, 360)),
        ]
    );
    let topology = compositor.topology().unwrap();
    assert!(!topology.contains("video0_src"));
    assert!(!topology.contains("video0_caps"));
    assert!(topology
        .node(VIDEO_MIXER)
        .unwrap()
        .pad(&removed.mixer_pad.pad)
        .is_none());
    assert!(compositor.source(ids[0]).is_none());

    assert!(matches!(
        compositor.remove_source(ids[0]),
        Err(Error::UnknownSource(id)) if id == ids[0]
    ));
}

#[test]
fn test_removal_without_rule_hides_sources() {
    let compositor = compositor();
    let ids = add_videos(&compositor, 2);
    let only_two = Layout::new(testing::RESOLUTION)
        .with_rule(2, testing::layout().rule_for(2).unwrap().1.clone())
        .unwrap();
    compositor.set_layout(only_two).unwrap();

    compositor.remove_source(ids[0]).unwrap();

    assert_eq!(rects(&compositor), vec![None]);
    let pad = compositor.source(ids[1]).unwrap().mixer_pad;
    assert_eq!(pad_parameter(&compositor, &pad, "alpha"), Some(ParamValue::Float(0.0)));
}

#[test]
fn test_set_layout() {
    let compositor = compositor();
    add_videos(&compositor, 2);

    compositor
        .set_layout(Layout::grid(Size::FHD, 4).unwrap())
        .unwrap();
    assert_eq!(compositor.layout().canvas(), Size::FHD);
    assert_eq!(
        rects(&compositor),
        vec![
            Some(Rect::new(0, 270, 960, 540)),
            Some(Rect::new(960, 270, 960, 540)),
        ]
    );
    let topology = compositor.topology().unwrap();
    let mixer = topology.node(VIDEO_MIXER).unwrap();
    assert_eq!(mixer.parameter("width"), Some(&ParamValue::UInt(1920)));
    assert_eq!(mixer.parameter("height"), Some(&ParamValue::UInt(1080)));

    // a layout which cannot place both sources changes nothing
    let single = Layout::new(Size::SD)
        .with_rule(
            1,
            LayoutRule::new().with_slot(LayoutSlot::new(0, 0, 640, 480)),
        )
        .unwrap();
    assert!(matches!(
        compositor.set_layout(single),
        Err(Error::Layout(LayoutError::NotEnoughSlots { .. }))
    ));
    assert_eq!(compositor.layout().canvas(), Size::FHD);
    assert_eq!(rects(&compositor).len(), 2);
}

#[test]
fn test_hide_overflow() {
    testing::init();
    let config = crate::CompositorConfig {
        overflow: OverflowPolicy::Hide,
        ..testing::config()
    };
    let (compositor, _) = testing::compositor(config, testing::layout());
    let ids = add_videos(&compositor, 5);

    let placements = compositor.placements();
    assert_eq!(placements.len(), 5);
    assert!(placements[..4].iter().all(|p| p.rect.is_some()));
    assert_eq!(placements[4].rect, None);

    let hidden = compositor.source(ids[4]).unwrap().mixer_pad;
    assert_eq!(pad_parameter(&compositor, &hidden, "alpha"), Some(ParamValue::Float(0.0)));
    assert_eq!(pad_parameter(&compositor, &hidden, "width"), Some(ParamValue::Int(0)));

    // the hidden source moves up once there is room
    compositor.remove_source(ids[0]).unwrap();
    assert!(compositor.placements().iter().all(|p| p.rect.is_some()));
}

#[test]
fn test_wrong_track_kind() {
    let compositor = compositor();
    let before = compositor.topology().unwrap().len();

    let audio = compositor.bridge(testing::audio_track("microphone"));
    assert!(matches!(
        compositor.add_video(&audio),
        Err(Error::Construction { node, .. }) if node == "microphone"
    ));
    let video = compositor.bridge(testing::video_track("camera"));
    assert!(matches!(
        compositor.add_audio(&video),
        Err(Error::Construction { .. })
    ));

    assert_eq!(compositor.topology().unwrap().len(), before);
    assert!(compositor.active_video().is_empty());
    assert!(compositor.active_audio().is_empty());
}

#[test]
fn test_add_audio() {
    let compositor = compositor();
    add_videos(&compositor, 1);
    let bridge = compositor.bridge(testing::audio_track("microphone"));
    let id = compositor.add_audio(&bridge).unwrap();

    // ids are unique over both kinds
    assert_eq!(id.get(), 1);
    let info = compositor.source(id).unwrap();
    assert_eq!(info.feed_node, "audio1_src");
    assert_eq!(info.mixer_pad, PadRef::new(AUDIO_MIXER, "sink_0"));
    assert_eq!(compositor.active_audio(), vec![id]);
    // audio does not take a slot
    assert_eq!(compositor.placements().len(), 1);

    compositor.remove_source(id).unwrap();
    let topology = compositor.topology().unwrap();
    assert!(!topology.contains("audio1_src"));
    assert_eq!(topology.node(AUDIO_MIXER).unwrap().pads().count(), 1);
}

#[test]
fn test_add_video_node() {
    let compositor = compositor();
    compositor
        .add(ProcessingNode::new(
            Element::AppSrc(Caps::rtp(Codec::H264)),
            "screen_src",
        ))
        .unwrap();
    compositor
        .add(ProcessingNode::new(Element::Depayloader(Codec::H264), "screen_depay"))
        .unwrap();
    compositor
        .add(ProcessingNode::new(Element::Decoder(Codec::H264), "screen_dec"))
        .unwrap();
    compositor.link("screen_src", "screen_depay").unwrap();
    compositor.link("screen_depay", "screen_dec").unwrap();

    // a chain which does not start at a source cannot be added
    compositor
        .add(ProcessingNode::new(Element::VideoConvert, "dangling"))
        .unwrap();
    assert!(matches!(
        compositor.add_video_node("dangling"),
        Err(Error::Link { .. })
    ));
    assert!(matches!(
        compositor.add_video_node("missing"),
        Err(Error::UnknownNode(_))
    ));

    let bridge = compositor.bridge(crate::TrackInfo::new("screen", Codec::H264));
    compositor.attach_bridge("screen_src", &bridge).unwrap();
    let id = compositor.add_video_node("screen_dec").unwrap();
    let info = compositor.source(id).unwrap();
    assert_eq!(info.feed_node, "screen_src");
    assert_eq!(info.track, None);
    assert_eq!(rects(&compositor), vec![Some(Rect::new(0, 0, 1280, 720))]);

    // the chain belongs to the source now
    assert!(matches!(
        compositor.add_video_node("screen_dec"),
        Err(Error::Link { .. })
    ));

    compositor.remove_source(id).unwrap();
    let topology = compositor.topology().unwrap();
    assert!(!topology.contains("screen_src"));
    assert!(!topology.contains("screen_dec"));
    assert!(topology.contains("dangling"));
    // removing the source node ended the feed
    assert!(bridge.is_closed());
}

#[test]
fn test_start_without_sink_chain() {
    testing::init();
    let compositor = Compositor::soft(testing::config(), testing::layout()).unwrap();
    assert!(matches!(compositor.start(), Err(Error::NoSinkChain)));
    assert_eq!(compositor.state(), State::Idle);
}

#[test]
fn test_lifecycle_errors() {
    let compositor = compositor();
    assert!(matches!(
        compositor.send_eos(),
        Err(Error::Lifecycle {
            operation: "send_eos",
            state: State::Idle
        })
    ));

    compositor.stop().unwrap();
    assert_eq!(compositor.state(), State::Stopped);
    assert!(compositor.topology().is_none());

    let bridge = compositor.bridge(testing::video_track("camera"));
    assert!(matches!(
        compositor.add_video(&bridge),
        Err(Error::Lifecycle {
            operation: "add_video",
            state: State::Stopped
        })
    ));
    assert!(matches!(
        compositor.start(),
        Err(Error::Lifecycle { state: State::Stopped, .. })
    ));
    assert!(matches!(
        compositor.stop(),
        Err(Error::Lifecycle { state: State::Stopped, .. })
    ));
    assert!(matches!(
        compositor.set_layout(testing::layout()),
        Err(Error::Lifecycle { .. })
    ));
    assert!(matches!(
        compositor.remove_source(SourceId(0)),
        Err(Error::Lifecycle { .. })
    ));
}

#[test]
fn test_dot() {
    let compositor = compositor();
    add_videos(&compositor, 2);
    let dot = compositor.topology().unwrap().dot("test_dot");
    assert!(dot.contains("\"video1_caps\":\"src\" -> \"video_mixer\":\"sink_1\""));
    assert!(dot.contains("\"video_mixer\":\"src\" -> \"video_sink\":\"sink\""));
    compositor.dot("test_dot", testing::DOT_PARAMS);
}
