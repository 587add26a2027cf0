// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

mod compositor;
mod layout;
mod runtime;
mod sinks;

pub mod testing {

    use crate::*;
    use bytes::Bytes;
    use core::time::Duration;
    use std::{sync::Once, time::Instant};

    /// canvas to use when creating a compositor for testing
    pub const RESOLUTION: Size = Size::HD;
    /// parameters to use when generating DOT files within testing
    pub const DOT_PARAMS: &debug::Params = &debug::Params { index: true };

    /// name of the fake sink node linked to the video mixer
    pub const VIDEO_SINK: &str = "video_sink";
    /// name of the fake sink node linked to the audio mixer
    pub const AUDIO_SINK: &str = "audio_sink";

    static INIT: Once = Once::new();

    /// initialize for testing
    pub fn init() {
        trace!("init()");
        INIT.call_once(init_function);
    }

    fn init_function() {
        if let Ok(path) = std::env::var(debug::DOT_DIR_ENV) {
            debug!("Removing any *.dot files in {path}");
            for path in glob::glob(&(path.to_string() + "/*.dot")).unwrap() {
                match path {
                    Ok(path) => std::fs::remove_file(path).unwrap(),
                    Err(err) => error!("path not found: {err:?}"),
                }
            }
        }
        // init logger
        env_logger::try_init().ok();
    }

    /// configuration with a fast frame rate and short timeouts
    pub fn config() -> CompositorConfig {
        CompositorConfig {
            framerate: 50,
            stall_timeout_ms: 100,
            drain_grace_ms: 2000,
            keyframe_interval_ms: 0,
            ..CompositorConfig::default()
        }
    }

    /// layout with rules for one to four sources
    ///
    /// one source fills the canvas, two are side by side, three and four
    /// share the quarters of the canvas
    pub fn layout() -> Layout {
        let (w, h) = (RESOLUTION.width, RESOLUTION.height);
        let (hw, hh) = (w / 2, h / 2);
        let quarter = |n: usize| LayoutSlot::new((n % 2 * hw) as i64, (n / 2 * hh) as i64, hw, hh);
        Layout::new(RESOLUTION)
            .with_rule(1, LayoutRule::new().with_slot(LayoutSlot::new(0, 0, w, h)))
            .unwrap()
            .with_rule(
                2,
                LayoutRule::new()
                    .with_slot(LayoutSlot::new(0, (hh / 2) as i64, hw, hh))
                    .with_slot(LayoutSlot::new(hw as i64, (hh / 2) as i64, hw, hh)),
            )
            .unwrap()
            .with_rule(3, (0..3).map(quarter).collect())
            .unwrap()
            .with_rule(4, (0..4).map(quarter).collect())
            .unwrap()
    }

    /// fake sinks attached behind the mixers
    #[derive(Debug, Clone, Default)]
    pub struct Sinks {
        pub video: FakeSink,
        pub audio: FakeSink,
    }

    /// compositor with fake sinks linked to both mixer outputs
    pub fn compositor(config: CompositorConfig, layout: Layout) -> (Compositor, Sinks) {
        let compositor = Compositor::soft(config, layout).unwrap();
        let sinks = link_fake_sinks(&compositor);
        (compositor, sinks)
    }

    /// link one fake sink node to each mixer
    pub fn link_fake_sinks(compositor: &Compositor) -> Sinks {
        let sinks = Sinks::default();
        compositor
            .add(ProcessingNode::new(Element::FakeSink, VIDEO_SINK))
            .unwrap();
        compositor.link_video_sink(VIDEO_SINK).unwrap();
        compositor
            .attach_sink(VIDEO_SINK, sinks.video.clone())
            .unwrap();
        compositor
            .add(ProcessingNode::new(Element::FakeSink, AUDIO_SINK))
            .unwrap();
        compositor.link_audio_sink(AUDIO_SINK).unwrap();
        compositor
            .attach_sink(AUDIO_SINK, sinks.audio.clone())
            .unwrap();
        sinks
    }

    pub fn video_track(id: &str) -> TrackInfo {
        TrackInfo::new(id, Codec::Vp8)
    }

    pub fn audio_track(id: &str) -> TrackInfo {
        TrackInfo::new(id, Codec::Opus)
    }

    /// valid RTP packet with the given sequence number
    pub fn packet(sequence: u16) -> Bytes {
        rtp::packet(96, sequence, u32::from(sequence) * 3000, 0xcafe, true, &[1, 2, 3, 4])
            .unwrap()
    }

    /// poll `condition` until it holds or `timeout` elapsed
    pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// wait the given amount of milliseconds
    pub fn wait_millis(milliseconds: u64) {
        info!("-- waiting {milliseconds} millisecond(s) --");
        std::thread::sleep(Duration::from_millis(milliseconds));
    }
}
