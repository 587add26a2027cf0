// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Declarative layout model.
//!
//! A [`Layout`] maps the number of active video sources to the [`LayoutRule`]
//! which shall be used to arrange them on the canvas.

mod description;
mod grid;
mod rule;
mod speaker;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::LayoutError;

pub use description::*;
pub use rule::*;

/// Cartesian pixel position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// X position
    pub x: i64,
    /// Y position
    pub y: i64,
}

/// Cartesian pixel dimension
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    /// horizontal dimension
    pub width: usize,
    /// vertical dimension
    pub height: usize,
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl Size {
    /// SD (Standard Definition)
    pub const SD: Self = Self {
        width: 640,
        height: 480,
    };
    /// HD (High Definition)
    pub const HD: Self = Self {
        width: 1280,
        height: 720,
    };
    /// Full HD (FHD)
    pub const FHD: Self = Self {
        width: 1920,
        height: 1080,
    };

    #[must_use]
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// return ratio between width and height
    #[must_use]
    pub fn ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// Rectangle on the canvas a source is rendered into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub pos: Position,
    pub size: Size,
}

impl Rect {
    #[must_use]
    pub const fn new(x: i64, y: i64, width: usize, height: usize) -> Self {
        Self {
            pos: Position { x, y },
            size: Size { width, height },
        }
    }

    /// Return `true` if the rectangle lies completely within `canvas`.
    #[must_use]
    pub fn fits(&self, canvas: Size) -> bool {
        let within = |pos: i64, len: usize, limit: usize| {
            pos >= 0
                && i64::try_from(len)
                    .ok()
                    .and_then(|len| pos.checked_add(len))
                    .zip(i64::try_from(limit).ok())
                    .is_some_and(|(end, limit)| end <= limit)
        };
        within(self.pos.x, self.size.width, canvas.width)
            && within(self.pos.y, self.size.height, canvas.height)
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}+{}", self.size, self.pos.x, self.pos.y)
    }
}

/// What to do with active video sources that do not get a slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Refuse to add a source the layout has no slot for.
    #[default]
    Reject,
    /// Keep the source linked but invisible.
    Hide,
}

/// Canvas size plus a mapping from active video count to the rule to use.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "LayoutDescription")]
pub struct Layout {
    canvas: Size,
    rules: BTreeMap<usize, LayoutRule>,
}

impl Layout {
    /// Create an empty layout for the given canvas.
    #[must_use]
    pub fn new(canvas: Size) -> Self {
        Self {
            canvas,
            rules: BTreeMap::new(),
        }
    }

    /// Register `rule` to be used when `count` video sources are active.
    ///
    /// An existing rule for the same count is replaced.
    ///
    /// # Errors
    ///
    /// This fails if `count` is zero, if the rule has fewer than `count` slots or
    /// if any slot lies outside the canvas.
    pub fn add_rule(&mut self, count: usize, rule: LayoutRule) -> Result<(), LayoutError> {
        if count == 0 {
            return Err(LayoutError::ZeroCount);
        }
        if rule.len() < count {
            return Err(LayoutError::RuleTooSmall {
                count,
                slots: rule.len(),
            });
        }
        for (index, slot) in rule.slots().iter().enumerate() {
            let rect = slot.rect();
            if !rect.fits(self.canvas) {
                return Err(LayoutError::OutOfCanvas {
                    index,
                    rect,
                    canvas: self.canvas,
                });
            }
        }
        self.rules.insert(count, rule);
        Ok(())
    }

    /// Builder flavour of [`add_rule`](Self::add_rule).
    ///
    /// # Errors
    ///
    /// See [`add_rule`](Self::add_rule).
    pub fn with_rule(mut self, count: usize, rule: LayoutRule) -> Result<Self, LayoutError> {
        self.add_rule(count, rule)?;
        Ok(self)
    }

    #[must_use]
    pub fn canvas(&self) -> Size {
        self.canvas
    }

    /// Registered rules ordered by source count.
    pub fn rules(&self) -> impl Iterator<Item = (usize, &LayoutRule)> {
        self.rules.iter().map(|(count, rule)| (*count, rule))
    }

    /// Highest source count a rule is registered for.
    #[must_use]
    pub fn max_count(&self) -> Option<usize> {
        self.rules.keys().next_back().copied()
    }

    /// Find the rule for `active` sources.
    ///
    /// Uses the exact entry if there is one, otherwise the rule registered for the
    /// highest count below `active`. Returns the count the rule was registered for.
    ///
    /// # Errors
    ///
    /// Fails with [`LayoutError::NoRule`] if there is no rule at or below `active`.
    pub fn rule_for(&self, active: usize) -> Result<(usize, &LayoutRule), LayoutError> {
        self.rules
            .range(..=active)
            .next_back()
            .map(|(count, rule)| (*count, rule))
            .ok_or(LayoutError::NoRule { active })
    }

    /// Assign rectangles to `active` sources in arrival order.
    ///
    /// Entry `i` belongs to the `i`th active source. `None` means the source is
    /// hidden, which only happens with [`OverflowPolicy::Hide`].
    ///
    /// # Errors
    ///
    /// Fails if no rule applies, or if the rule has too few slots and `policy`
    /// is [`OverflowPolicy::Reject`].
    pub fn assign(
        &self,
        active: usize,
        policy: OverflowPolicy,
    ) -> Result<Vec<Option<Rect>>, LayoutError> {
        if active == 0 {
            return Ok(Vec::new());
        }

        let (count, rule) = self.rule_for(active)?;
        if rule.len() < active && policy == OverflowPolicy::Reject {
            return Err(LayoutError::NotEnoughSlots {
                active,
                slots: rule.len(),
                count,
            });
        }

        Ok((0..active)
            .map(|n| rule.slot(n).map(LayoutSlot::rect))
            .collect())
    }

    /// Generate a layout which arranges up to `max_sources` in a grid.
    ///
    /// # Errors
    ///
    /// Fails if the canvas is empty or larger than [`MAX_CANVAS_DIMENSION`].
    pub fn grid(canvas: Size, max_sources: usize) -> Result<Self, LayoutError> {
        check_generated_canvas(canvas)?;
        let mut layout = Self::new(canvas);
        for count in 1..=max_sources {
            layout.add_rule(count, grid::Grid::new(canvas, count).rule())?;
        }
        Ok(layout)
    }

    /// Generate a layout showing the first source big and the others beside it.
    ///
    /// `max_sources` is capped at [`SPEAKER_MAX_SOURCES`].
    ///
    /// # Errors
    ///
    /// Fails if the canvas is empty or larger than [`MAX_CANVAS_DIMENSION`].
    pub fn speaker(canvas: Size, max_sources: usize) -> Result<Self, LayoutError> {
        check_generated_canvas(canvas)?;
        let mut layout = Self::new(canvas);
        for count in 1..=max_sources.min(SPEAKER_MAX_SOURCES) {
            layout.add_rule(count, speaker::Speaker::new(canvas, count).rule())?;
        }
        Ok(layout)
    }
}

/// Maximum number of sources the speaker arrangement has room for.
pub const SPEAKER_MAX_SOURCES: usize = speaker::MAX_VISIBLES;

/// Largest canvas width or height generated arrangements accept.
pub const MAX_CANVAS_DIMENSION: usize = 1 << 15;

fn check_generated_canvas(canvas: Size) -> Result<(), LayoutError> {
    let valid = 1..=MAX_CANVAS_DIMENSION;
    if valid.contains(&canvas.width) && valid.contains(&canvas.height) {
        Ok(())
    } else {
        Err(LayoutError::InvalidCanvas(canvas))
    }
}
