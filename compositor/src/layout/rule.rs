// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use serde::{Deserialize, Serialize};

use super::Rect;

/// Symmetric margins around a slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Margin {
    /// left and right margin
    pub horizontal: usize,
    /// top and bottom margin
    pub vertical: usize,
}

/// Placement of one video source within the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "SlotDescription")]
pub struct LayoutSlot {
    rect: Rect,
    margin: Option<Margin>,
}

impl LayoutSlot {
    /// Slot covering the given rectangle.
    #[must_use]
    pub const fn new(x: i64, y: i64, width: usize, height: usize) -> Self {
        Self {
            rect: Rect::new(x, y, width, height),
            margin: None,
        }
    }

    /// Slot centered within a cell at `x`/`y` which is surrounded by symmetric margins.
    ///
    /// The cell spans `width + 2 * margin_x` by `height + 2 * margin_y` pixels, the
    /// source is rendered at its center in `width` x `height`.
    #[must_use]
    pub const fn with_symmetric_margins(
        x: i64,
        y: i64,
        width: usize,
        height: usize,
        margin_x: usize,
        margin_y: usize,
    ) -> Self {
        Self {
            rect: Rect::new(
                x.saturating_add(saturating_i64(margin_x)),
                y.saturating_add(saturating_i64(margin_y)),
                width,
                height,
            ),
            margin: Some(Margin {
                horizontal: margin_x,
                vertical: margin_y,
            }),
        }
    }

    /// Rectangle the source is rendered into.
    #[must_use]
    pub const fn rect(self) -> Rect {
        self.rect
    }

    #[must_use]
    pub const fn margin(&self) -> Option<Margin> {
        self.margin
    }

    /// The whole cell including margins.
    #[must_use]
    pub fn cell(&self) -> Rect {
        match self.margin {
            None => self.rect,
            Some(margin) => Rect::new(
                self.rect.pos.x.saturating_sub(saturating_i64(margin.horizontal)),
                self.rect.pos.y.saturating_sub(saturating_i64(margin.vertical)),
                self.rect
                    .size
                    .width
                    .saturating_add(margin.horizontal.saturating_mul(2)),
                self.rect
                    .size
                    .height
                    .saturating_add(margin.vertical.saturating_mul(2)),
            ),
        }
    }
}

// out of range values end up outside of every canvas
const fn saturating_i64(value: usize) -> i64 {
    if value > i64::MAX as usize {
        i64::MAX
    } else {
        value as i64
    }
}

/// Serialized form of a [`LayoutSlot`].
#[derive(Debug, Clone, Deserialize)]
struct SlotDescription {
    x: i64,
    y: i64,
    width: usize,
    height: usize,
    #[serde(default)]
    margin_x: Option<usize>,
    #[serde(default)]
    margin_y: Option<usize>,
}

impl From<SlotDescription> for LayoutSlot {
    fn from(slot: SlotDescription) -> Self {
        match (slot.margin_x, slot.margin_y) {
            (None, None) => Self::new(slot.x, slot.y, slot.width, slot.height),
            (margin_x, margin_y) => Self::with_symmetric_margins(
                slot.x,
                slot.y,
                slot.width,
                slot.height,
                margin_x.unwrap_or_default(),
                margin_y.unwrap_or_default(),
            ),
        }
    }
}

/// Ordered slots of one arrangement.
///
/// The `n`th active source is shown in the `n`th slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct LayoutRule {
    slots: Vec<LayoutSlot>,
}

impl LayoutRule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a slot.
    pub fn add_slot(&mut self, slot: LayoutSlot) {
        self.slots.push(slot);
    }

    #[must_use]
    pub fn with_slot(mut self, slot: LayoutSlot) -> Self {
        self.add_slot(slot);
        self
    }

    #[must_use]
    pub fn slots(&self) -> &[LayoutSlot] {
        &self.slots
    }

    #[must_use]
    pub fn slot(&self, n: usize) -> Option<LayoutSlot> {
        self.slots.get(n).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl FromIterator<LayoutSlot> for LayoutRule {
    fn from_iter<T: IntoIterator<Item = LayoutSlot>>(iter: T) -> Self {
        Self {
            slots: iter.into_iter().collect(),
        }
    }
}
