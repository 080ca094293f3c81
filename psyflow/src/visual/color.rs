// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::errors::PsyflowError;
use crate::parameters::TypeTag;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Reads an RGB or RGBA sequence.
    pub fn from_sequence(values: &[f64]) -> Result<Self, PsyflowError> {
        match values {
            [r, g, b] => Ok(Self::new(*r as f32, *g as f32, *b as f32, 1.0)),
            [r, g, b, a] => Ok(Self::new(*r as f32, *g as f32, *b as f32, *a as f32)),
            _ => Err(PsyflowError::validation(
                "color",
                format!("expected 3 or 4 components, got {}", values.len()),
            )),
        }
    }

    /// Type tag of color parameters.
    pub fn type_tag() -> TypeTag {
        TypeTag::AnyOf(vec![TypeTag::Sequence(Some(3)), TypeTag::Sequence(Some(4))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_rgb_and_rgba() {
        assert_eq!(Rgba::from_sequence(&[1.0, 0.5, 0.0]).unwrap(), Rgba::new(1.0, 0.5, 0.0, 1.0));
        assert_eq!(Rgba::from_sequence(&[0.0, 0.0, 0.0, 0.5]).unwrap().a, 0.5);
        assert!(Rgba::from_sequence(&[1.0]).is_err());
    }
}
