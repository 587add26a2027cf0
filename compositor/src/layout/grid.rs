// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use super::{LayoutRule, LayoutSlot, Size};

/// Grid arrangement
/// Places a given number of sources in a grid on the canvas.
#[derive(Debug, Clone)]
pub(super) struct Grid {
    resolution: Size,
    visibles: usize,
}

impl Grid {
    pub(super) fn new(resolution: Size, visibles: usize) -> Self {
        Self {
            resolution,
            visibles,
        }
    }

    /// Generate one slot per visible source.
    pub(super) fn rule(&self) -> LayoutRule {
        (0..self.visibles).map(|n| self.slot(n)).collect()
    }

    fn slot(&self, position: usize) -> LayoutSlot {
        let row = position / self.columns();
        let column = position % self.columns();
        LayoutSlot::new(
            (self.width() * column) as i64,
            (self.height() * row + self.padding()) as i64,
            self.width(),
            self.height(),
        )
    }

    fn columns(&self) -> usize {
        self.grid().0
    }

    fn rows(&self) -> usize {
        self.grid().1
    }

    fn grid(&self) -> (usize, usize) {
        if self.visibles > 1 {
            let columns = (f64::sqrt(self.visibles as f64) + 0.9) as usize;
            let rows = (self.visibles + columns - 1) / columns;
            if rows > columns {
                (columns + 1, rows - 1)
            } else {
                (columns, rows)
            }
        } else {
            (1, 1)
        }
    }

    fn width(&self) -> usize {
        self.uni_size().width
    }

    fn height(&self) -> usize {
        self.uni_size().height
    }

    fn uni_size(&self) -> Size {
        let width = self.resolution.width / self.columns();
        let height = width * self.resolution.height / self.resolution.width;
        Size { width, height }
    }

    fn padding(&self) -> usize {
        self.resolution
            .height
            .saturating_sub(self.height() * self.rows())
            / 2
    }
}
