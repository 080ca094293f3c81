// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use derive_debug::Dbg;

use super::{check_type, Controller, EvalFlag, EvalFrequency, TemporalVariable, TemporalVariables, TimeBasis};
use crate::errors::PsyflowError;
use crate::parameters::{ParameterValue, TypeTag};

type EvalFn = Box<dyn FnMut(&TimeBasis) -> Result<ParameterValue, PsyflowError> + Send>;

/// Wraps Rust closures as a controller.
///
/// Without a between-go function the controller is not evaluated between go
/// loops.
#[derive(Dbg)]
pub struct FunctionController {
    #[dbg(placeholder = "...")]
    during_go: EvalFn,
    #[dbg(placeholder = "...")]
    between_go: Option<EvalFn>,
    eval_frequency: EvalFrequency,
    temporal_variables: TemporalVariables,
    return_type: TypeTag,
}

impl FunctionController {
    pub fn new<F>(return_type: TypeTag, during_go: F) -> Self
    where
        F: FnMut(&TimeBasis) -> Result<ParameterValue, PsyflowError> + Send + 'static,
    {
        Self {
            during_go: Box::new(during_go),
            between_go: None,
            eval_frequency: EvalFrequency::every_frame().not_between_go(),
            temporal_variables: TemporalVariables::only(TemporalVariable::TimeSecSinceGo),
            return_type,
        }
    }

    pub fn with_between_go<F>(mut self, between_go: F) -> Self
    where
        F: FnMut(&TimeBasis) -> Result<ParameterValue, PsyflowError> + Send + 'static,
    {
        self.between_go = Some(Box::new(between_go));
        self.eval_frequency = self.eval_frequency.without(EvalFlag::NotBetweenGo);
        self
    }

    pub fn with_eval_frequency(mut self, eval_frequency: EvalFrequency) -> Self {
        self.eval_frequency = eval_frequency;
        self
    }

    pub fn with_temporal_variables(mut self, temporal_variables: TemporalVariables) -> Self {
        self.temporal_variables = temporal_variables;
        self
    }

    fn checked(&self, value: ParameterValue) -> Result<ParameterValue, PsyflowError> {
        check_type(&self.return_type, &value.type_tag())?;
        Ok(value)
    }
}

impl Controller for FunctionController {
    fn eval_frequency(&self) -> EvalFrequency {
        self.eval_frequency
    }

    fn temporal_variables(&self) -> TemporalVariables {
        self.temporal_variables
    }

    fn returns_type(&self) -> TypeTag {
        self.return_type.clone()
    }

    fn during_go_eval(&mut self, basis: &TimeBasis) -> Result<ParameterValue, PsyflowError> {
        let value = (self.during_go)(basis)?;
        self.checked(value)
    }

    fn between_go_eval(&mut self, basis: &TimeBasis) -> Result<ParameterValue, PsyflowError> {
        match self.between_go.as_mut() {
            Some(f) => {
                let value = f(basis)?;
                self.checked(value)
            }
            None => Err(PsyflowError::StateError(
                "function controller has no between-go function".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Phase;

    #[test]
    fn calls_the_closure_with_the_time_basis() {
        let mut c = FunctionController::new(TypeTag::Real, |basis| {
            Ok(ParameterValue::Real(basis.time_sec_since_go.unwrap_or(0.0) * 2.0))
        });
        let basis = TimeBasis::new(Phase::Go, 5.0, 1.5, 0, 0);
        assert_eq!(c.evaluate(&basis).unwrap(), ParameterValue::Real(3.0));
        assert!(c.eval_frequency().contains(EvalFlag::NotBetweenGo));
    }

    #[test]
    fn rejects_values_of_the_wrong_type() {
        let mut c = FunctionController::new(TypeTag::Boolean, |_| Ok(ParameterValue::Real(1.0)));
        let basis = TimeBasis::time_independent(Phase::Go);
        assert!(matches!(c.evaluate(&basis), Err(PsyflowError::TypeMismatchError { .. })));
    }

    #[test]
    fn between_go_function_clears_the_exclusion() {
        let c = FunctionController::new(TypeTag::Real, |_| Ok(ParameterValue::Real(1.0)))
            .with_between_go(|_| Ok(ParameterValue::Real(0.0)));
        assert!(!c.eval_frequency().contains(EvalFlag::NotBetweenGo));
        assert!(format!("{:?}", c).contains("..."));
    }
}
