// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};

use crate::{AudioMix, CompositeFrame, Sink};

/// Manifest sink parameters
#[derive(Debug, Clone)]
pub struct ManifestParameters {
    /// Output file path
    pub file_path: PathBuf,
    /// only write frames whose visible layers changed
    pub changes_only: bool,
}

/// Writes a line based manifest of the composited output.
///
/// Every frame is written as
/// `video <sequence> <pts ms> <canvas> [<feed>@<rect> ...]`, every non-empty
/// audio mix as `audio <sequence> <pts ms> [<feed>:<samples> ...]`, followed by
/// a final `eos`.
#[derive(Debug)]
pub struct ManifestSink {
    params: ManifestParameters,
    writer: Option<BufWriter<File>>,
    last_layers: Option<String>,
}

impl ManifestSink {
    /// Create the manifest file.
    ///
    /// # Errors
    ///
    /// This can fail if the file cannot be created.
    pub fn create(params: ManifestParameters) -> Result<Self> {
        trace!("create({:?})", params.file_path);
        if let Some(parent) = params.file_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("unable to create directory {parent:?}"))?;
        }
        let file = File::create(&params.file_path)
            .with_context(|| format!("unable to create manifest {:?}", params.file_path))?;
        Ok(Self {
            params,
            writer: Some(BufWriter::new(file)),
            last_layers: None,
        })
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writeln!(writer, "{line}")
            .with_context(|| format!("unable to write to {:?}", self.params.file_path))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("unable to flush {:?}", self.params.file_path))?;
            debug!("closed manifest {:?}", self.params.file_path);
        }
        Ok(())
    }
}

impl Sink for ManifestSink {
    fn on_video(&mut self, frame: &CompositeFrame) -> Result<()> {
        let layers = frame
            .visible_layers()
            .map(|layer| format!("{}@{}", layer.feed, layer.rect))
            .collect::<Vec<_>>()
            .join(" ");
        if self.params.changes_only && self.last_layers.as_ref() == Some(&layers) {
            return Ok(());
        }
        let line = format!(
            "video {} {} {} {layers}",
            frame.sequence,
            frame.pts.as_millis(),
            frame.canvas
        );
        self.last_layers = Some(layers);
        self.write_line(line.trim_end())
    }

    fn on_audio(&mut self, mix: &AudioMix) -> Result<()> {
        if mix.chunks.is_empty() {
            return Ok(());
        }
        let chunks = mix
            .chunks
            .iter()
            .map(|chunk| format!("{}:{}", chunk.feed, chunk.samples.len()))
            .collect::<Vec<_>>()
            .join(" ");
        let line = format!("audio {} {} {chunks}", mix.sequence, mix.pts.as_millis());
        self.write_line(&line)
    }

    fn on_eos(&mut self) -> Result<()> {
        self.write_line("eos")?;
        self.close()
    }

    fn on_exit(&mut self) -> Result<()> {
        self.close()
    }
}
