// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::str::FromStr;

use super::frame::Frame;
use super::stimuli::Stimulus;
use super::{xy, Anchor, ANCHOR_NAMES};
use crate::errors::PsyflowError;
use crate::parameters::{Constraint, ParameterDefinition, ParameterValue, Parameters, SharedParameters, TypeTag};

/// A rectangular region of a screen holding an ordered list of stimuli.
#[derive(Debug)]
pub struct Viewport {
    parameters: SharedParameters,
    stimuli: Vec<Box<dyn Stimulus>>,
}

impl Viewport {
    pub fn parameter_definitions(screen_size: [f64; 2]) -> Vec<ParameterDefinition> {
        vec![
            ParameterDefinition::new("position", [0.0, 0.0], TypeTag::Sequence(Some(2)))
                .description("position on the screen in pixels"),
            ParameterDefinition::new("size", screen_size, TypeTag::Sequence(Some(2))).description("size in pixels"),
            ParameterDefinition::new("anchor", "lowerleft", TypeTag::String)
                .constraint(Constraint::OneOf(ANCHOR_NAMES.iter().map(|s| s.to_string()).collect()))
                .description("how the position parameter is used"),
        ]
    }

    /// Creates a viewport covering a screen of `screen_size`.
    pub fn new(screen_size: [f64; 2], stimuli: Vec<Box<dyn Stimulus>>) -> Result<Self, PsyflowError> {
        Self::with_values(screen_size, stimuli, Vec::<(&str, ParameterValue)>::new())
    }

    pub fn with_values<S: AsRef<str>>(
        screen_size: [f64; 2],
        stimuli: Vec<Box<dyn Stimulus>>,
        values: impl IntoIterator<Item = (S, ParameterValue)>,
    ) -> Result<Self, PsyflowError> {
        let parameters = Parameters::with_values(Self::parameter_definitions(screen_size), values)?;
        Ok(Self {
            parameters: parameters.into(),
            stimuli,
        })
    }

    pub fn parameters(&self) -> SharedParameters {
        self.parameters.clone()
    }

    /// Appends a stimulus; later stimuli are drawn on top.
    pub fn add_stimulus(&mut self, stimulus: Box<dyn Stimulus>) {
        self.stimuli.push(stimulus);
    }

    pub fn stimuli(&self) -> &[Box<dyn Stimulus>] {
        &self.stimuli
    }

    /// Draws all stimuli in order.
    pub fn draw(&mut self, frame: &mut Frame) -> Result<(), PsyflowError> {
        let origin = {
            let p = self.parameters.lock();
            let anchor = Anchor::from_str(p.get_str("anchor")?)
                .map_err(|_| PsyflowError::validation("anchor", "unknown anchor"))?;
            anchor.lower_left_of(xy(p.get_sequence("position")?), xy(p.get_sequence("size")?))
        };
        frame.set_origin(origin);
        for stimulus in self.stimuli.iter_mut() {
            stimulus.draw(frame)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visual::color::Rgba;
    use crate::visual::frame::DrawCommand;
    use crate::visual::stimuli::FixationSpot;

    #[test]
    fn draws_stimuli_relative_to_the_viewport() {
        let spot = FixationSpot::new().unwrap();
        let mut viewport = Viewport::with_values(
            [640.0, 480.0],
            vec![Box::new(spot)],
            [("position", ParameterValue::from([100.0, 100.0]))],
        )
        .unwrap();
        let mut frame = Frame::new(Rgba::new(0.0, 0.0, 0.0, 1.0));
        viewport.draw(&mut frame).unwrap();
        match &frame.commands()[0] {
            DrawCommand::Rect { lower_left, .. } => assert_eq!(*lower_left, [418.0, 338.0]),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn anchor_must_be_known() {
        let viewport = Viewport::new([640.0, 480.0], Vec::new()).unwrap();
        assert!(viewport.parameters().set("anchor", "middle").is_err());
        assert!(viewport.parameters().set("anchor", "center").is_ok());
    }
}
