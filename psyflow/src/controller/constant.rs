// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use super::{check_type, natural_type, Controller, EvalFrequency, TemporalVariables, TimeBasis};
use crate::errors::PsyflowError;
use crate::parameters::{ParameterValue, TypeTag};

/// Returns one fixed value during go loops and another between them.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantController {
    during_go_value: ParameterValue,
    between_go_value: ParameterValue,
    eval_frequency: EvalFrequency,
    temporal_variables: TemporalVariables,
    return_type: TypeTag,
}

impl ConstantController {
    /// Creates a controller returning `value` in every phase, evaluated every
    /// frame.
    pub fn new(value: impl Into<ParameterValue>) -> Self {
        let value = value.into();
        Self {
            return_type: natural_type(&value),
            between_go_value: value.clone(),
            during_go_value: value,
            eval_frequency: EvalFrequency::every_frame(),
            temporal_variables: TemporalVariables::TIME_INDEPENDENT,
        }
    }

    /// Creates a controller with distinct go and between-go values. The
    /// return type is inferred from `during_go` and `between_go` must fit it.
    pub fn with_values(
        during_go: impl Into<ParameterValue>,
        between_go: impl Into<ParameterValue>,
    ) -> Result<Self, PsyflowError> {
        let mut controller = Self::new(during_go);
        controller.set_between_go_value(between_go)?;
        Ok(controller)
    }

    pub fn with_eval_frequency(mut self, eval_frequency: EvalFrequency) -> Self {
        self.eval_frequency = eval_frequency;
        self
    }

    pub fn with_temporal_variables(mut self, temporal_variables: TemporalVariables) -> Self {
        self.temporal_variables = temporal_variables;
        self
    }

    /// Declares the return type explicitly. Both values must fit it.
    pub fn with_return_type(mut self, return_type: TypeTag) -> Result<Self, PsyflowError> {
        check_type(&return_type, &self.during_go_value.type_tag())?;
        check_type(&return_type, &self.between_go_value.type_tag())?;
        self.return_type = return_type;
        Ok(self)
    }

    pub fn during_go_value(&self) -> &ParameterValue {
        &self.during_go_value
    }

    pub fn between_go_value(&self) -> &ParameterValue {
        &self.between_go_value
    }

    pub fn set_during_go_value(&mut self, value: impl Into<ParameterValue>) -> Result<(), PsyflowError> {
        let value = value.into();
        check_type(&self.return_type, &value.type_tag())?;
        self.during_go_value = value;
        Ok(())
    }

    pub fn set_between_go_value(&mut self, value: impl Into<ParameterValue>) -> Result<(), PsyflowError> {
        let value = value.into();
        check_type(&self.return_type, &value.type_tag())?;
        self.between_go_value = value;
        Ok(())
    }
}

impl Controller for ConstantController {
    fn eval_frequency(&self) -> EvalFrequency {
        self.eval_frequency
    }

    fn temporal_variables(&self) -> TemporalVariables {
        self.temporal_variables
    }

    fn returns_type(&self) -> TypeTag {
        self.return_type.clone()
    }

    fn during_go_eval(&mut self, _basis: &TimeBasis) -> Result<ParameterValue, PsyflowError> {
        Ok(self.during_go_value.clone())
    }

    fn between_go_eval(&mut self, _basis: &TimeBasis) -> Result<ParameterValue, PsyflowError> {
        Ok(self.between_go_value.clone())
    }

    fn describe(&self) -> String {
        format!(
            "const({}, {}, {}, {}, {})",
            self.during_go_value, self.between_go_value, self.eval_frequency, self.temporal_variables, self.return_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Phase;

    #[test]
    fn returns_value_for_phase() {
        let mut c = ConstantController::with_values(1.0, 0.0).unwrap();
        assert_eq!(c.evaluate(&TimeBasis::time_independent(Phase::Go)).unwrap(), ParameterValue::Real(1.0));
        assert_eq!(
            c.evaluate(&TimeBasis::time_independent(Phase::BetweenGo)).unwrap(),
            ParameterValue::Real(0.0)
        );
    }

    #[test]
    fn between_value_must_match_the_inferred_type() {
        let err = ConstantController::with_values(1.0, "off").unwrap_err();
        assert!(matches!(err, PsyflowError::TypeMismatchError { .. }));
    }

    #[test]
    fn integers_may_turn_negative() {
        let mut c = ConstantController::new(3i64);
        assert_eq!(c.returns_type(), TypeTag::Integer);
        assert!(c.set_during_go_value(-3i64).is_ok());
    }

    #[test]
    fn describes_itself() {
        let c = ConstantController::with_values(1.0, 0.0).unwrap();
        assert_eq!(c.describe(), "const(1.0, 0.0, EVERY_FRAME, TIME_INDEPENDENT, float)");
    }
}
