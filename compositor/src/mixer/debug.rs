// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Functions for debugging.

use std::path::PathBuf;

use crate::Topology;

/// Environment variable naming the directory DOT files are written to.
pub const DOT_DIR_ENV: &str = "COMPOSITOR_DOT_DIR";

/// Graph DOT debugging parameters
#[derive(Debug, Clone, Copy)]
pub struct Params {
    /// Use an index prefix for the output files
    pub index: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self { index: true }
    }
}

/// Make a DOT file of the given graph if log level is `debug`.
pub fn debug_dot(topology: &Topology, filename_without_extension: &str) {
    if log::max_level() >= log::Level::Debug {
        dot(topology, filename_without_extension);
    }
}

/// Make a DOT file of the given graph with a counting index and default parameters.
pub fn dot(topology: &Topology, filename_without_extension: &str) -> Option<PathBuf> {
    dot_ext(topology, filename_without_extension, &Params::default())
}

/// Make a DOT file of the given graph with the given parameters.
///
/// Nothing is written unless [`DOT_DIR_ENV`] is set. Returns the path of the
/// written file.
pub fn dot_ext(
    topology: &Topology,
    filename_without_extension: &str,
    params: &Params,
) -> Option<PathBuf> {
    // count calls
    use std::sync::atomic::{AtomicUsize, Ordering};
    static COUNT: AtomicUsize = AtomicUsize::new(0);

    let path = std::env::var(DOT_DIR_ENV).ok()?;

    if let Err(e) = std::fs::create_dir_all(&path) {
        error!("Generation of dot file failed: can not create dir from {DOT_DIR_ENV}: {e:?}");
        return None;
    };

    let name = if params.index {
        let n = COUNT.fetch_add(1, Ordering::SeqCst);
        format!("{n}-{filename_without_extension}")
    } else {
        filename_without_extension.to_string()
    };

    let file = PathBuf::from(path).join(format!("{name}.dot"));
    info!("GENERATING DOT FILE: '{}'", file.display());
    if let Err(e) = std::fs::write(&file, topology.dot(filename_without_extension)) {
        error!("Generation of dot file failed: {e:?}");
        return None;
    }
    Some(file)
}
