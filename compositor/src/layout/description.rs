// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use serde::Deserialize;

use super::{Layout, LayoutRule, LayoutSlot, Size};
use crate::LayoutError;

/// Rule for a given source count as written in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuleDescription {
    pub count: usize,
    pub slots: Vec<LayoutSlot>,
}

/// Serialized form of a [`Layout`].
///
/// ```toml
/// [layout]
/// type = "rules"
/// width = 1280
/// height = 720
///
/// [[layout.rules]]
/// count = 1
/// slots = [{ x = 0, y = 0, width = 640, height = 360, margin_x = 320, margin_y = 180 }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayoutDescription {
    /// Explicit slots for each source count.
    Rules {
        width: usize,
        height: usize,
        rules: Vec<RuleDescription>,
    },
    /// Generated grid arrangement.
    Grid {
        width: usize,
        height: usize,
        max_sources: usize,
    },
    /// Generated speaker arrangement.
    Speaker {
        width: usize,
        height: usize,
        max_sources: usize,
    },
}

impl TryFrom<LayoutDescription> for Layout {
    type Error = LayoutError;

    fn try_from(description: LayoutDescription) -> Result<Self, Self::Error> {
        match description {
            LayoutDescription::Rules {
                width,
                height,
                rules,
            } => rules.into_iter().try_fold(
                Layout::new(Size::new(width, height)),
                |layout, rule| {
                    layout.with_rule(rule.count, rule.slots.into_iter().collect::<LayoutRule>())
                },
            ),
            LayoutDescription::Grid {
                width,
                height,
                max_sources,
            } => Layout::grid(Size::new(width, height), max_sources),
            LayoutDescription::Speaker {
                width,
                height,
                max_sources,
            } => Layout::speaker(Size::new(width, height), max_sources),
        }
    }
}
