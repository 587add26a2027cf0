// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use crate::{
    testing, Layout, LayoutDescription, LayoutError, LayoutRule, LayoutSlot, OverflowPolicy, Rect,
    Size, SPEAKER_MAX_SOURCES,
};

fn rule(slots: usize) -> LayoutRule {
    (0..slots)
        .map(|n| LayoutSlot::new(n as i64 * 100, 0, 100, 100))
        .collect()
}

#[test]
fn test_rule_lookup_prefers_exact_count() {
    let layout = Layout::new(testing::RESOLUTION)
        .with_rule(1, rule(1))
        .unwrap()
        .with_rule(3, rule(3))
        .unwrap();

    assert_eq!(layout.rule_for(1).unwrap().0, 1);
    assert_eq!(layout.rule_for(3).unwrap().0, 3);
    // falls back to the highest count below
    assert_eq!(layout.rule_for(2).unwrap().0, 1);
    assert_eq!(layout.rule_for(7).unwrap().0, 3);
    assert_eq!(layout.max_count(), Some(3));
}

#[test]
fn test_rule_lookup_without_smaller_rule() {
    let layout = Layout::new(testing::RESOLUTION).with_rule(2, rule(2)).unwrap();
    assert_eq!(
        layout.rule_for(1).unwrap_err(),
        LayoutError::NoRule { active: 1 }
    );
    assert_eq!(
        layout.assign(1, OverflowPolicy::Reject).unwrap_err(),
        LayoutError::NoRule { active: 1 }
    );
}

#[test]
fn test_rule_validation() {
    let mut layout = Layout::new(Size::new(300, 100));
    assert_eq!(layout.add_rule(0, rule(1)), Err(LayoutError::ZeroCount));
    assert_eq!(
        layout.add_rule(3, rule(2)),
        Err(LayoutError::RuleTooSmall { count: 3, slots: 2 })
    );
    assert_eq!(
        layout.add_rule(4, rule(4)),
        Err(LayoutError::OutOfCanvas {
            index: 3,
            rect: Rect::new(300, 0, 100, 100),
            canvas: Size::new(300, 100),
        })
    );
    // nothing has been registered
    assert_eq!(layout.rules().count(), 0);

    // more slots than the count are fine
    layout.add_rule(2, rule(3)).unwrap();
    assert_eq!(layout.rules().count(), 1);
}

#[test]
fn test_rule_replaces_same_count() {
    let mut layout = Layout::new(testing::RESOLUTION);
    layout.add_rule(1, rule(1)).unwrap();
    layout
        .add_rule(1, LayoutRule::new().with_slot(LayoutSlot::new(10, 10, 20, 20)))
        .unwrap();
    assert_eq!(layout.rules().count(), 1);
    assert_eq!(
        layout.assign(1, OverflowPolicy::Reject).unwrap(),
        vec![Some(Rect::new(10, 10, 20, 20))]
    );
}

#[test]
fn test_assign_in_arrival_order() {
    let layout = testing::layout();
    let rects = layout.assign(4, OverflowPolicy::Reject).unwrap();
    assert_eq!(
        rects,
        vec![
            Some(Rect::new(0, 0, 640, 360)),
            Some(Rect::new(640, 0, 640, 360)),
            Some(Rect::new(0, 360, 640, 360)),
            Some(Rect::new(640, 360, 640, 360)),
        ]
    );
    assert!(layout.assign(0, OverflowPolicy::Reject).unwrap().is_empty());
}

#[test]
fn test_assign_overflow() {
    let layout = testing::layout();

    assert_eq!(
        layout.assign(5, OverflowPolicy::Reject).unwrap_err(),
        LayoutError::NotEnoughSlots {
            active: 5,
            slots: 4,
            count: 4,
        }
    );

    let rects = layout.assign(6, OverflowPolicy::Hide).unwrap();
    assert_eq!(rects.len(), 6);
    assert!(rects[..4].iter().all(Option::is_some));
    assert!(rects[4..].iter().all(Option::is_none));
}

#[test]
fn test_symmetric_margins() {
    let slot = LayoutSlot::with_symmetric_margins(100, 50, 200, 100, 10, 20);
    assert_eq!(slot.rect(), Rect::new(110, 70, 200, 100));
    assert_eq!(slot.cell(), Rect::new(100, 50, 220, 140));

    let plain = LayoutSlot::new(1, 2, 3, 4);
    assert_eq!(plain.margin(), None);
    assert_eq!(plain.cell(), plain.rect());
}

#[test]
fn test_margins_are_checked_against_canvas() {
    let mut layout = Layout::new(Size::new(200, 100));
    let rule = LayoutRule::new().with_slot(LayoutSlot::with_symmetric_margins(0, 0, 200, 100, 1, 0));
    assert!(matches!(
        layout.add_rule(1, rule),
        Err(LayoutError::OutOfCanvas { index: 0, .. })
    ));
}

#[test]
fn test_grid_fits_canvas() {
    let layout = Layout::grid(testing::RESOLUTION, 9).unwrap();
    assert_eq!(layout.max_count(), Some(9));
    for (count, rule) in layout.rules() {
        assert_eq!(rule.len(), count);
        for slot in rule.slots() {
            assert!(slot.rect().fits(testing::RESOLUTION), "{count}: {:?}", slot.rect());
        }
    }
    assert_eq!(
        layout.assign(1, OverflowPolicy::Reject).unwrap(),
        vec![Some(Rect::new(0, 0, 1280, 720))]
    );
}

#[test]
fn test_speaker_fits_canvas() {
    let layout = Layout::speaker(testing::RESOLUTION, 100).unwrap();
    assert_eq!(layout.max_count(), Some(SPEAKER_MAX_SOURCES));

    let rects = layout.assign(3, OverflowPolicy::Reject).unwrap();
    let speaker = rects[0].unwrap();
    let viewer = rects[1].unwrap();
    assert!(speaker.size.width > viewer.size.width);
    for rect in rects.into_iter().flatten() {
        assert!(rect.fits(testing::RESOLUTION));
    }
}

#[test]
fn test_layout_from_description() {
    let description: LayoutDescription = centered_description();
    let layout = Layout::try_from(description).unwrap();
    assert_eq!(layout.canvas(), Size::new(1280, 720));
    assert_eq!(
        layout.assign(1, OverflowPolicy::Reject).unwrap(),
        vec![Some(Rect::new(320, 180, 640, 360))]
    );
    assert_eq!(
        layout.assign(2, OverflowPolicy::Reject).unwrap(),
        vec![Some(Rect::new(0, 0, 640, 360)), Some(Rect::new(640, 0, 640, 360))]
    );
}

/// description with an explicitly centered single slot and a side by side pair
fn centered_description() -> LayoutDescription {
    use crate::RuleDescription;
    LayoutDescription::Rules {
        width: 1280,
        height: 720,
        rules: vec![
            RuleDescription {
                count: 1,
                slots: vec![LayoutSlot::with_symmetric_margins(0, 0, 640, 360, 320, 180)],
            },
            RuleDescription {
                count: 2,
                slots: vec![
                    LayoutSlot::new(0, 0, 640, 360),
                    LayoutSlot::new(640, 0, 640, 360),
                ],
            },
        ],
    }
}

#[test]
fn test_invalid_description_is_rejected() {
    let description = LayoutDescription::Rules {
        width: 100,
        height: 100,
        rules: vec![crate::RuleDescription {
            count: 2,
            slots: vec![LayoutSlot::new(0, 0, 50, 50)],
        }],
    };
    assert_eq!(
        Layout::try_from(description).unwrap_err(),
        LayoutError::RuleTooSmall { count: 2, slots: 1 }
    );
}

#[test]
fn test_huge_values_are_out_of_canvas() {
    let mut layout = Layout::new(testing::RESOLUTION);
    let wide = LayoutSlot::new(i64::MAX - 10, 0, 100, 100);
    assert!(!wide.rect().fits(testing::RESOLUTION));
    assert!(matches!(
        layout.add_rule(1, LayoutRule::new().with_slot(wide)),
        Err(LayoutError::OutOfCanvas { index: 0, .. })
    ));

    let margins = LayoutSlot::with_symmetric_margins(0, 0, 100, 100, usize::MAX, 0);
    assert_eq!(margins.rect().pos.x, i64::MAX);
    assert_eq!(margins.cell().size.width, usize::MAX);
    assert!(matches!(
        layout.add_rule(1, LayoutRule::new().with_slot(margins)),
        Err(LayoutError::OutOfCanvas { index: 0, .. })
    ));

    let tall = LayoutSlot::new(0, 0, 100, usize::MAX);
    assert!(matches!(
        layout.add_rule(1, LayoutRule::new().with_slot(tall)),
        Err(LayoutError::OutOfCanvas { index: 0, .. })
    ));
    assert_eq!(layout.max_count(), None);
}

#[test]
fn test_generated_layouts_check_canvas() {
    for canvas in [Size::new(0, 720), Size::new(1280, 0), Size::new(usize::MAX, 720)] {
        assert_eq!(
            Layout::grid(canvas, 4).unwrap_err(),
            LayoutError::InvalidCanvas(canvas)
        );
        assert_eq!(
            Layout::speaker(canvas, 4).unwrap_err(),
            LayoutError::InvalidCanvas(canvas)
        );
    }
}
