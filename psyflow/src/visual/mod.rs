// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use strum::{Display, EnumString};

pub mod color;
pub mod frame;
pub mod screen;
pub mod stimuli;
pub mod viewport;

/// Names accepted by `anchor` parameters.
pub const ANCHOR_NAMES: &[&str] = &[
    "center",
    "lowerleft",
    "upperleft",
    "lowerright",
    "upperright",
    "left",
    "right",
    "top",
    "bottom",
];

/// Which point of an object its `position` parameter refers to. The y axis
/// points up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Anchor {
    Center,
    LowerLeft,
    UpperLeft,
    LowerRight,
    UpperRight,
    Left,
    Right,
    Top,
    Bottom,
}

impl Anchor {
    /// Center of an object of `size` anchored at `position`.
    pub fn center_of(self, position: [f64; 2], size: [f64; 2]) -> [f64; 2] {
        let [x, y] = position;
        let (hw, hh) = (size[0] / 2.0, size[1] / 2.0);
        match self {
            Anchor::Center => [x, y],
            Anchor::LowerLeft => [x + hw, y + hh],
            Anchor::UpperLeft => [x + hw, y - hh],
            Anchor::LowerRight => [x - hw, y + hh],
            Anchor::UpperRight => [x - hw, y - hh],
            Anchor::Left => [x + hw, y],
            Anchor::Right => [x - hw, y],
            Anchor::Top => [x, y - hh],
            Anchor::Bottom => [x, y + hh],
        }
    }

    /// Lower left corner of an object of `size` anchored at `position`.
    pub fn lower_left_of(self, position: [f64; 2], size: [f64; 2]) -> [f64; 2] {
        let [cx, cy] = self.center_of(position, size);
        [cx - size[0] / 2.0, cy - size[1] / 2.0]
    }
}

/// First two elements of a position or size sequence.
pub(crate) fn xy(values: &[f64]) -> [f64; 2] {
    [
        values.first().copied().unwrap_or(0.0),
        values.get(1).copied().unwrap_or(0.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_parse_from_lowercase_names() {
        for name in ANCHOR_NAMES {
            assert!(name.parse::<Anchor>().is_ok(), "{}", name);
        }
        assert_eq!("lowerleft".parse::<Anchor>().unwrap(), Anchor::LowerLeft);
        assert_eq!(Anchor::UpperRight.to_string(), "upperright");
    }

    #[test]
    fn resolves_centers() {
        let size = [4.0, 2.0];
        assert_eq!(Anchor::Center.center_of([10.0, 10.0], size), [10.0, 10.0]);
        assert_eq!(Anchor::LowerLeft.center_of([10.0, 10.0], size), [12.0, 11.0]);
        assert_eq!(Anchor::UpperRight.center_of([10.0, 10.0], size), [8.0, 9.0]);
        assert_eq!(Anchor::Top.lower_left_of([10.0, 10.0], size), [8.0, 8.0]);
    }
}
