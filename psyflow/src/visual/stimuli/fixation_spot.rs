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

/// A filled rectangle, typically used as a fixation spot.
#[derive(Debug)]
pub struct FixationSpot {
    id: Uuid,
    parameters: SharedParameters,
}

impl FixationSpot {
    pub fn parameter_definitions() -> Vec<ParameterDefinition> {
        vec![
            ParameterDefinition::new("on", true, TypeTag::Boolean).description("draw?"),
            ParameterDefinition::new("color", [1.0, 1.0, 1.0], Rgba::type_tag()).description("color"),
            ParameterDefinition::new(
                "position",
                [320.0, 240.0],
                TypeTag::AnyOf(vec![
                    TypeTag::Sequence(Some(2)),
                    TypeTag::Sequence(Some(3)),
                    TypeTag::Sequence(Some(4)),
                ]),
            )
            .description("position in eye coordinates"),
            ParameterDefinition::new("anchor", "center", TypeTag::String)
                .constraint(Constraint::OneOf(ANCHOR_NAMES.iter().map(|s| s.to_string()).collect()))
                .description("how position parameter is used"),
            ParameterDefinition::new("size", [4.0, 4.0], TypeTag::Sequence(Some(2)))
                .description("size in eye coordinates"),
        ]
    }

    pub fn new() -> Result<Self, PsyflowError> {
        Self::with_values(Vec::<(&str, ParameterValue)>::new())
    }

    pub fn with_values<S: AsRef<str>>(values: impl IntoIterator<Item = (S, ParameterValue)>) -> Result<Self, PsyflowError> {
        Ok(Self {
            id: Uuid::new_v4(),
            parameters: Parameters::with_values(Self::parameter_definitions(), values)?.into(),
        })
    }
}

impl Stimulus for FixationSpot {
    fn draw(&mut self, frame: &mut Frame) -> Result<(), PsyflowError> {
        let p = self.parameters.lock();
        if !p.get_bool("on")? {
            return Ok(());
        }
        let size = xy(p.get_sequence("size")?);
        let anchor =
            Anchor::from_str(p.get_str("anchor")?).map_err(|_| PsyflowError::validation("anchor", "unknown anchor"))?;
        let center = anchor.center_of(xy(p.get_sequence("position")?), size);
        let color = Rgba::from_sequence(p.get_sequence("color")?)?;
        frame.draw_rect(center, size, color);
        Ok(())
    }

    fn parameters(&self) -> SharedParameters {
        self.parameters.clone()
    }

    fn uuid(&self) -> Uuid {
        self.id
    }
}
