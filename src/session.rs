// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::path::PathBuf;

use anyhow::{Context, Result};
use compositor::{
    Compositor, Element, ManifestParameters, ManifestSink, MediaKind, ProcessingNode, SourceId,
    TestSource, TestSourceParameters, TrackInfo,
};
use log::{debug, info, warn};
use tokio::{
    select,
    sync::watch,
    task::spawn_blocking,
    time::{interval, sleep, Duration},
};

use crate::settings::{Settings, SourceSettings};

const VIDEO_OUTPUT: &str = "video_manifest";
const AUDIO_OUTPUT: &str = "audio_manifest";
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// A running compositor fed by synthetic tracks and writing manifests.
#[derive(Debug)]
pub struct Session {
    compositor: Compositor,
    sources: Vec<(SourceId, TestSource)>,
    duration: Option<Duration>,
}

impl Session {
    /// Build the graph, start it and add all configured sources.
    ///
    /// Sources the compositor refuses are skipped with a warning.
    pub fn create(settings: &Settings) -> Result<Self> {
        let compositor = create_compositor(settings)?;

        let output = &settings.output;
        std::fs::create_dir_all(&output.directory)
            .with_context(|| format!("unable to create {:?}", output.directory))?;
        compositor.add(ProcessingNode::new(Element::AppSink, VIDEO_OUTPUT))?;
        compositor.link_video_sink(VIDEO_OUTPUT)?;
        attach_manifest(
            &compositor,
            VIDEO_OUTPUT,
            output.video_manifest(),
            output.changes_only,
        )?;
        compositor.add(ProcessingNode::new(Element::AppSink, AUDIO_OUTPUT))?;
        compositor.link_audio_sink(AUDIO_OUTPUT)?;
        attach_manifest(
            &compositor,
            AUDIO_OUTPUT,
            output.audio_manifest(),
            output.changes_only,
        )?;

        compositor.start().context("unable to start compositor")?;

        let mut session = Self {
            compositor,
            sources: Vec::new(),
            duration: settings.duration_ms.map(Duration::from_millis),
        };
        for source in &settings.sources {
            if let Err(err) = session.add_source(source) {
                warn!("skipping source '{}': {err:#}", source.id);
            }
        }
        Ok(session)
    }

    fn add_source(&mut self, settings: &SourceSettings) -> Result<()> {
        let track = TrackInfo::new(settings.id.clone(), settings.codec);
        let bridge = self.compositor.bridge(track);
        let id = match settings.codec.kind() {
            MediaKind::Video => self.compositor.add_video(&bridge)?,
            MediaKind::Audio => self.compositor.add_audio(&bridge)?,
        };
        let source = TestSource::start(
            bridge,
            TestSourceParameters {
                interval: Duration::from_millis(settings.interval_ms),
                limit: settings.limit,
                ..TestSourceParameters::default()
            },
        )?;
        info!("added source {id} for track '{}'", settings.id);
        self.sources.push((id, source));
        Ok(())
    }

    /// Run until shutdown is requested or the configured duration elapsed,
    /// then drain and stop the compositor.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let duration = self.duration;
        let timeout = async move {
            match duration {
                Some(duration) => sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timeout);
        let mut report = interval(REPORT_INTERVAL);

        while !*shutdown.borrow() {
            select! {
                result = shutdown.changed() => {
                    if result.is_err() {
                        break;
                    }
                }
                () = &mut timeout => {
                    info!("session duration elapsed");
                    break;
                }
                _ = report.tick() => self.report(),
            }
        }

        self.finish().await
    }

    fn report(&self) {
        for placement in self.compositor.placements() {
            match placement.rect {
                Some(rect) => debug!("source {} at {rect}", placement.source),
                None => debug!("source {} hidden", placement.source),
            }
        }
        info!(
            "{} video and {} audio source(s) active",
            self.compositor.active_video().len(),
            self.compositor.active_audio().len()
        );
    }

    async fn finish(self) -> Result<()> {
        let Self {
            compositor,
            sources,
            ..
        } = self;
        spawn_blocking(move || {
            compositor.send_eos()?;
            compositor.stop()?;
            for (id, source) in sources {
                debug!("source {id} produced {} packet(s)", source.finish());
            }
            info!("session stopped");
            Ok::<_, anyhow::Error>(())
        })
        .await
        .context("session teardown panicked")?
    }
}

fn attach_manifest(
    compositor: &Compositor,
    node: &str,
    file_path: PathBuf,
    changes_only: bool,
) -> Result<()> {
    let sink = ManifestSink::create(ManifestParameters {
        file_path,
        changes_only,
    })?;
    compositor.attach_sink(node, sink)?;
    Ok(())
}

#[cfg(feature = "gstreamer")]
fn create_compositor(settings: &Settings) -> Result<Compositor> {
    let layout = settings.layout()?;
    if settings.gstreamer {
        let backend = compositor::GstBackend::new("livemix")?;
        return Ok(Compositor::new(
            settings.compositor.clone(),
            layout,
            backend,
        )?);
    }
    Ok(Compositor::soft(settings.compositor.clone(), layout)?)
}

#[cfg(not(feature = "gstreamer"))]
fn create_compositor(settings: &Settings) -> Result<Compositor> {
    if settings.gstreamer {
        warn!("built without GStreamer support, using the built-in runtime");
    }
    Ok(Compositor::soft(
        settings.compositor.clone(),
        settings.layout()?,
    )?)
}
