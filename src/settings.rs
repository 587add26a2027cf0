// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use compositor::{Codec, CompositorConfig, Layout, LayoutDescription, TrackId};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

/// prefix of environment variables overriding the configuration file
pub const ENV_PREFIX: &str = "LIVEMIX";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub compositor: CompositorConfig,
    #[serde(default = "default_layout")]
    pub layout: LayoutDescription,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub sources: Vec<SourceSettings>,
    /// stop on its own after this many milliseconds
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// run the graph on GStreamer if the feature is enabled
    #[serde(default)]
    pub gstreamer: bool,
}

impl Settings {
    /// Read settings from a TOML file, overridden by `LIVEMIX_*` environment
    /// variables like `LIVEMIX_COMPOSITOR__FRAMERATE`.
    pub fn load(file_name: impl AsRef<Path>) -> Result<Self> {
        let file_name = file_name.as_ref();
        let settings: Self = Config::builder()
            .add_source(File::from(file_name).format(FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize::<Self>)
            .with_context(|| format!("unable to read settings from {file_name:?}"))?;
        settings.layout().context("invalid layout")?;
        Ok(settings)
    }

    /// Layout built from the configured description.
    pub fn layout(&self) -> Result<Layout> {
        Ok(Layout::try_from(self.layout.clone())?)
    }
}

fn default_layout() -> LayoutDescription {
    LayoutDescription::Grid {
        width: 1280,
        height: 720,
        max_sources: 4,
    }
}

/// Where the manifests of a session are written to.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub directory: PathBuf,
    /// only write video frames whose visible layers changed
    pub changes_only: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
            changes_only: true,
        }
    }
}

impl OutputSettings {
    #[must_use]
    pub fn video_manifest(&self) -> PathBuf {
        self.directory.join("video.manifest")
    }

    #[must_use]
    pub fn audio_manifest(&self) -> PathBuf {
        self.directory.join("audio.manifest")
    }
}

/// Synthetic track fed into the compositor.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSettings {
    pub id: TrackId,
    pub codec: Codec,
    /// time between two packets
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// end the track after this many packets
    #[serde(default)]
    pub limit: Option<u64>,
}

const fn default_interval_ms() -> u64 {
    20
}
