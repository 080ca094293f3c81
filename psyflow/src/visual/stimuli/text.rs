// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::str::FromStr;

use uuid::Uuid;

use super::Stimulus;
use crate::errors::PsyflowError;
use crate::parameters::{Constraint, ParameterDefinition, ParameterValue, Parameters, SharedParameters, TypeTag};
use crate::visual::color::Rgba;
use crate::visual::frame::Frame;
use crate::visual::{xy, Anchor, ANCHOR_NAMES};

// advance of an average glyph relative to the font size
const GLYPH_ASPECT: f64 = 0.6;

/// A single line of text.
///
/// Font name and size are fixed at construction. The extent used for
/// anchoring is estimated from the character count.
#[derive(Debug)]
pub struct TextStimulus {
    id: Uuid,
    parameters: SharedParameters,
}

impl TextStimulus {
    pub fn parameter_definitions() -> Vec<ParameterDefinition> {
        vec![
            ParameterDefinition::new("on", true, TypeTag::Boolean),
            ParameterDefinition::new("text", "the string", TypeTag::String),
            ParameterDefinition::new("color", [1.0, 1.0, 1.0], Rgba::type_tag()),
            ParameterDefinition::new("position", [0.0, 0.0], TypeTag::Sequence(Some(2))),
            ParameterDefinition::new("anchor", "lowerleft", TypeTag::String)
                .constraint(Constraint::OneOf(ANCHOR_NAMES.iter().map(|s| s.to_string()).collect())),
            ParameterDefinition::new("font_size", 30i64, TypeTag::UnsignedInteger)
                .constraint(Constraint::Range { min: 1.0, max: 1000.0 })
                .constant(),
            ParameterDefinition::new("font_name", "default", TypeTag::String).constant(),
        ]
    }

    pub fn new(text: &str) -> Result<Self, PsyflowError> {
        Self::with_values([("text", ParameterValue::from(text))])
    }

    pub fn with_values<S: AsRef<str>>(values: impl IntoIterator<Item = (S, ParameterValue)>) -> Result<Self, PsyflowError> {
        Ok(Self {
            id: Uuid::new_v4(),
            parameters: Parameters::with_values(Self::parameter_definitions(), values)?.into(),
        })
    }

    /// Estimated width and height of the current text.
    pub fn extent(&self) -> Result<[f64; 2], PsyflowError> {
        let p = self.parameters.lock();
        let font_size = p.get_f64("font_size")?;
        let chars = p.get_str("text")?.chars().count() as f64;
        Ok([chars * font_size * GLYPH_ASPECT, font_size])
    }
}

impl Stimulus for TextStimulus {
    fn draw(&mut self, frame: &mut Frame) -> Result<(), PsyflowError> {
        let extent = self.extent()?;
        let p = self.parameters.lock();
        if !p.get_bool("on")? {
            return Ok(());
        }
        let anchor =
            Anchor::from_str(p.get_str("anchor")?).map_err(|_| PsyflowError::validation("anchor", "unknown anchor"))?;
        let lower_left = anchor.lower_left_of(xy(p.get_sequence("position")?), extent);
        frame.draw_text(
            lower_left,
            p.get_str("text")?,
            p.get_str("font_name")?,
            p.get_f64("font_size")?,
            Rgba::from_sequence(p.get_sequence("color")?)?,
        );
        Ok(())
    }

    fn parameters(&self) -> SharedParameters {
        self.parameters.clone()
    }

    fn uuid(&self) -> Uuid {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visual::frame::DrawCommand;

    #[test]
    fn font_is_fixed_at_construction() {
        let text = TextStimulus::with_values([
            ("text", ParameterValue::from("hello")),
            ("font_size", ParameterValue::Integer(20)),
        ])
        .unwrap();
        assert_eq!(text.extent().unwrap(), [60.0, 20.0]);
        assert!(matches!(
            text.parameters().set("font_size", 12i64),
            Err(PsyflowError::ImmutableError(_))
        ));
    }

    #[test]
    fn centered_text_is_shifted_by_half_its_extent() {
        let mut text = TextStimulus::with_values([
            ("text", ParameterValue::from("abcd")),
            ("font_size", ParameterValue::Integer(10)),
            ("anchor", ParameterValue::from("center")),
            ("position", ParameterValue::from([100.0, 100.0])),
        ])
        .unwrap();
        let mut frame = Frame::new(Rgba::new(0.0, 0.0, 0.0, 1.0));
        text.draw(&mut frame).unwrap();
        match &frame.commands()[0] {
            DrawCommand::Text { lower_left, text, .. } => {
                assert_eq!(text, "abcd");
                assert!((lower_left[0] - 88.0).abs() < 1e-9);
                assert!((lower_left[1] - 95.0).abs() < 1e-9);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
