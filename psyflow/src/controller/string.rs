// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Controllers defined by formula or statement strings.

use strum::Display;

use super::{check_type, natural_type, Controller, EvalFrequency, Phase, TemporalVariable, TemporalVariables, TimeBasis};
use crate::errors::PsyflowError;
use crate::formula::{check_variables, Formula, Namespace, Script, Value};
use crate::parameters::{escape_string, ParameterValue, TypeTag};

/// Name of the variable a statement controller returns unless told
/// otherwise.
pub const DEFAULT_RESULT_VARIABLE: &str = "x";

/// Whether the strings are single formulas or statement lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StringKind {
    /// `"t * 360.0"`
    #[strum(serialize = "eval_str")]
    Formula,
    /// `"y = t * 2; x = y + 1"`, returning `x`
    #[strum(serialize = "exec_str")]
    Statement,
}

#[derive(Debug, Clone, PartialEq)]
enum Program {
    Formula(Formula),
    Script(Script),
}

impl Program {
    fn parse(kind: StringKind, source: &str, result_variable: &str) -> Result<Self, PsyflowError> {
        match kind {
            StringKind::Formula => Formula::parse(source).map(Program::Formula),
            StringKind::Statement => Script::parse(source, result_variable).map(Program::Script),
        }
    }

    fn source(&self) -> &str {
        match self {
            Program::Formula(f) => f.source(),
            Program::Script(s) => s.source(),
        }
    }

    fn variables(&self) -> Vec<&str> {
        match self {
            Program::Formula(f) => f.variables(),
            Program::Script(s) => s.variables(),
        }
    }

    fn evaluate(&self, namespace: &Namespace) -> Result<Value, PsyflowError> {
        match self {
            Program::Formula(f) => f.evaluate(namespace),
            Program::Script(s) => s.evaluate(namespace),
        }
    }
}

/// Evaluates a formula (or statement list) against the time variables of
/// each tick.
///
/// Formulas are checked against the controller's temporal variables when the
/// controller is built, so a formula reading `t_abs` on a controller that only
/// provides `TIME_SEC_SINCE_GO` is rejected right away. Since-go variables
/// (`t`, `frame`) are not available to the between-go string.
#[derive(Debug, Clone, PartialEq)]
pub struct StringController {
    kind: StringKind,
    during_go: Program,
    between_go: Option<Program>,
    eval_frequency: EvalFrequency,
    temporal_variables: TemporalVariables,
    return_type: TypeTag,
}

impl StringController {
    /// Starts building a formula controller.
    pub fn formula(during_go: &str) -> StringControllerBuilder {
        StringControllerBuilder::new(StringKind::Formula, during_go)
    }

    /// Starts building a statement controller. The statements must assign
    /// the result variable (`x` by default).
    pub fn statements(during_go: &str) -> StringControllerBuilder {
        StringControllerBuilder::new(StringKind::Statement, during_go)
    }

    pub fn kind(&self) -> StringKind {
        self.kind
    }

    pub fn during_go_source(&self) -> &str {
        self.during_go.source()
    }

    pub fn between_go_source(&self) -> Option<&str> {
        self.between_go.as_ref().map(Program::source)
    }

    /// Evaluates every string the controller will run, at time zero, and
    /// checks the results against the return type.
    pub fn safety_check(&self) -> Result<(), PsyflowError> {
        for phase in [Phase::Go, Phase::BetweenGo] {
            if !self.eval_frequency.runs_in(phase) {
                continue;
            }
            if let Some(program) = self.program(phase) {
                log::debug!("executing \"{}\" as safety check", program.source());
                let value = probe(program, phase, self.temporal_variables)?.into_parameter(Some(&self.return_type));
                check_type(&self.return_type, &value.type_tag())?;
            }
        }
        Ok(())
    }

    fn program(&self, phase: Phase) -> Option<&Program> {
        match phase {
            Phase::Go => Some(&self.during_go),
            _ => self.between_go.as_ref(),
        }
    }

    fn eval_phase(&self, phase: Phase, basis: &TimeBasis) -> Result<ParameterValue, PsyflowError> {
        let program = self.program(phase).ok_or_else(|| {
            PsyflowError::StateError(format!("no between-go string for \"{}\"", self.during_go.source()))
        })?;
        let value = program
            .evaluate(&basis.namespace())?
            .into_parameter(Some(&self.return_type));
        check_type(&self.return_type, &value.type_tag())?;
        Ok(value)
    }
}

fn probe(program: &Program, phase: Phase, variables: TemporalVariables) -> Result<Value, PsyflowError> {
    let basis = TimeBasis::new(phase, 0.0, 0.0, 0, 0).masked(variables);
    program.evaluate(&basis.namespace())
}

impl Controller for StringController {
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
        self.eval_phase(Phase::Go, basis)
    }

    fn between_go_eval(&mut self, basis: &TimeBasis) -> Result<ParameterValue, PsyflowError> {
        self.eval_phase(Phase::BetweenGo, basis)
    }

    fn describe(&self) -> String {
        let between = match &self.between_go {
            Some(p) => format!("\"{}\"", escape_string(p.source())),
            None => "None".to_string(),
        };
        format!(
            "{}(\"{}\", {}, {}, {}, {})",
            self.kind,
            escape_string(self.during_go.source()),
            between,
            self.eval_frequency,
            self.temporal_variables,
            self.return_type
        )
    }
}

/// Builder for [`StringController`].
///
/// Defaults: `EVERY_FRAME`, `TIME_SEC_SINCE_GO`, return type inferred by
/// evaluating the go string at `t = 0`. Without a between-go string the
/// controller gets `NOT_BETWEEN_GO`.
#[derive(Debug, Clone)]
pub struct StringControllerBuilder {
    kind: StringKind,
    during_go: String,
    between_go: Option<String>,
    eval_frequency: Option<EvalFrequency>,
    temporal_variables: Option<TemporalVariables>,
    return_type: Option<TypeTag>,
    result_variable: String,
}

impl StringControllerBuilder {
    fn new(kind: StringKind, during_go: &str) -> Self {
        Self {
            kind,
            during_go: during_go.to_string(),
            between_go: None,
            eval_frequency: None,
            temporal_variables: None,
            return_type: None,
            result_variable: DEFAULT_RESULT_VARIABLE.to_string(),
        }
    }

    pub fn between_go(mut self, source: &str) -> Self {
        self.between_go = Some(source.to_string());
        self
    }

    pub fn eval_frequency(mut self, eval_frequency: EvalFrequency) -> Self {
        self.eval_frequency = Some(eval_frequency);
        self
    }

    pub fn temporal_variables(mut self, temporal_variables: TemporalVariables) -> Self {
        self.temporal_variables = Some(temporal_variables);
        self
    }

    pub fn return_type(mut self, return_type: TypeTag) -> Self {
        self.return_type = Some(return_type);
        self
    }

    pub fn result_variable(mut self, name: &str) -> Self {
        self.result_variable = name.to_string();
        self
    }

    pub fn build(self) -> Result<StringController, PsyflowError> {
        let mut eval_frequency = self.eval_frequency.unwrap_or_else(EvalFrequency::every_frame);
        if self.between_go.is_none() {
            eval_frequency = eval_frequency.not_between_go();
        }
        let temporal_variables = self
            .temporal_variables
            .unwrap_or_else(|| TemporalVariables::only(TemporalVariable::TimeSecSinceGo));

        let during_go = Program::parse(self.kind, &self.during_go, &self.result_variable)?;
        check_variables(
            during_go.source(),
            &during_go.variables(),
            &temporal_variables.formula_names(Phase::Go),
        )?;

        let between_go = match &self.between_go {
            Some(source) => {
                let program = Program::parse(self.kind, source, &self.result_variable)?;
                check_variables(
                    program.source(),
                    &program.variables(),
                    &temporal_variables.formula_names(Phase::BetweenGo),
                )?;
                Some(program)
            }
            None => None,
        };

        let return_type = match self.return_type {
            Some(return_type) => return_type,
            None => {
                let inferred = natural_type(&probe(&during_go, Phase::Go, temporal_variables)?.into_parameter(None));
                if let Some(program) = &between_go {
                    let found = probe(program, Phase::BetweenGo, temporal_variables)?
                        .into_parameter(Some(&inferred))
                        .type_tag();
                    check_type(&inferred, &found)?;
                }
                inferred
            }
        };

        Ok(StringController {
            kind: self.kind,
            during_go,
            between_go,
            eval_frequency,
            temporal_variables,
            return_type,
        })
    }
}
