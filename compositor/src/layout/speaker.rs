// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use super::{LayoutRule, LayoutSlot, Position, Size};

const VIEWER_SCALE: usize = 4;

/// Speaker plus a right column and a bottom row of viewers.
pub(super) const MAX_VISIBLES: usize = 2 * VIEWER_SCALE;

/// Speaker arrangement
#[derive(Debug, Clone)]
pub(super) struct Speaker {
    // Size of the target picture in pixels.
    resolution: Size,
    visibles: usize,
}

impl Speaker {
    pub(super) fn new(resolution: Size, visibles: usize) -> Self {
        Self {
            resolution,
            visibles,
        }
    }

    pub(super) fn rule(&self) -> LayoutRule {
        (0..self.visibles).map(|n| self.slot(n)).collect()
    }

    fn slot(&self, stream_position: usize) -> LayoutSlot {
        let (pos, size) = match stream_position {
            0 => (self.speaker_position(), self.speaker_size()),
            _ => (
                self.viewers_position(stream_position - 1),
                self.viewers_size(),
            ),
        };
        LayoutSlot::new(pos.x, pos.y, size.width, size.height)
    }

    fn viewers_height(&self) -> usize {
        self.viewers_width() * self.resolution.height / self.resolution.width
    }

    fn viewers_width(&self) -> usize {
        match self.visibles {
            0 | 1 => 0,
            2 => self.resolution.width / 2,
            _ => self.resolution.width / VIEWER_SCALE,
        }
    }

    fn speaker_size(&self) -> Size {
        Size {
            height: self.speaker_height(),
            width: self.speaker_width(),
        }
    }

    fn speaker_height(&self) -> usize {
        self.resolution.height - self.viewers_height()
    }

    fn speaker_width(&self) -> usize {
        (self.speaker_height() * self.resolution.width / self.resolution.height)
            .min(self.resolution.width)
    }

    fn viewers_position(&self, viewer: usize) -> Position {
        match self.visibles {
            0 | 1 => Position { x: 0, y: 0 },
            // place one viewer centered beside the speaker
            2 => Position {
                x: self.resolution.width as i64 / 2,
                y: self.resolution.height as i64 / 4,
            },
            // otherwise fill the right column first, then the bottom row from right to left
            _ => {
                if viewer < VIEWER_SCALE {
                    Position {
                        x: self.speaker_width() as i64,
                        y: (self.viewers_height() * viewer) as i64,
                    }
                } else {
                    // the bottom right corner is already taken by the right column
                    let horizontal_index = viewer - VIEWER_SCALE + 1;
                    let horizontal_offset = (self.viewers_width() * horizontal_index) as i64;
                    Position {
                        x: self.speaker_width() as i64 - horizontal_offset,
                        y: self.speaker_height() as i64,
                    }
                }
            }
        }
    }

    fn viewers_size(&self) -> Size {
        Size {
            width: self.viewers_width(),
            height: self.viewers_height(),
        }
    }

    fn speaker_position(&self) -> Position {
        match self.visibles {
            // place speaker beside single viewer
            2 => Position {
                x: 0,
                y: self.resolution.height as i64 / 4,
            },
            _ => Position { x: 0, y: 0 },
        }
    }
}
