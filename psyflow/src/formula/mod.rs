// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A small, sandboxed formula language for string controllers.
//!
//! Formulas can only read the variables of a [`Namespace`] (the time and
//! frame variables of the current tick plus statement-local variables) and
//! call a fixed set of math functions. There is no way to reach the host
//! program from a formula, which makes it safe to accept formulas from remote
//! clients.
//!
//! ```text
//! formula    := expr
//! statements := (name '=' expr) ((';' | newline) name '=' expr)*
//! expr       := or ('?' expr ':' expr)?
//! or         := and (('||' | 'or') and)*
//! and        := cmp (('&&' | 'and') cmp)*
//! cmp        := add (('==' | '!=' | '<' | '<=' | '>' | '>=') add)?
//! add        := mul (('+' | '-') mul)*
//! mul        := unary (('*' | '/' | '%') unary)*
//! unary      := ('-' | '+' | '!' | 'not') unary | pow
//! pow        := atom (('**' | '^') unary)?
//! atom       := number | true | false | name | name '(' args ')' | '(' expr ')' | '[' args ']'
//! ```

use std::collections::HashMap;
use std::fmt;

use crate::errors::PsyflowError;
use crate::parameters::{ParameterValue, TypeTag};

mod lexer;
mod parser;

use lexer::{lex, Operator};
use parser::{Assignment, Expr, Function, Parser};

/// Position and description of a parse failure.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub position: usize,
    pub message: String,
}

impl SyntaxError {
    pub(crate) fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

/// The result of evaluating a formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Sequence(Vec<f64>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::Sequence(_) => "sequence",
        }
    }

    /// Converts into a parameter value. Numbers become integers when the
    /// requested type only accepts integers and the number is integral.
    pub fn into_parameter(self, wanted: Option<&TypeTag>) -> ParameterValue {
        match self {
            Value::Number(n) => {
                let wants_integer = wanted.map_or(false, |tag| {
                    (TypeTag::Integer.is_subtype_of(tag) && !TypeTag::Real.is_subtype_of(tag))
                        || *tag == TypeTag::UnsignedInteger
                });
                if wants_integer && n.fract() == 0.0 && n.is_finite() {
                    ParameterValue::Integer(n as i64)
                } else {
                    ParameterValue::Real(n)
                }
            }
            Value::Bool(b) => ParameterValue::Bool(b),
            Value::Sequence(v) => ParameterValue::Sequence(v),
        }
    }
}

/// Names a formula may read.
///
/// Time variables are only present when the owning controller asked for them
/// through its temporal variables; reading an absent one is an error.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    pub t: Option<f64>,
    pub t_abs: Option<f64>,
    pub frame: Option<f64>,
    pub frame_abs: Option<f64>,
    locals: HashMap<String, Value>,
}

/// Names that always resolve, independent of the controller's configuration.
const CONSTANTS: &[(&str, f64)] = &[("pi", std::f64::consts::PI), ("e", std::f64::consts::E)];

/// Time and frame variable names, with their aliases.
pub(crate) const TIME_VARIABLES: &[&str] = &["t", "t_abs", "frame", "f", "frame_abs", "f_abs"];

impl Namespace {
    pub fn new(t: Option<f64>, t_abs: Option<f64>, frame: Option<f64>, frame_abs: Option<f64>) -> Self {
        Self {
            t,
            t_abs,
            frame,
            frame_abs,
            locals: HashMap::new(),
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.locals.get(name) {
            return Some(v.clone());
        }
        let time = match name {
            "t" => self.t,
            "t_abs" => self.t_abs,
            "frame" | "f" => self.frame,
            "frame_abs" | "f_abs" => self.frame_abs,
            _ => CONSTANTS.iter().find(|(n, _)| *n == name).map(|(_, v)| *v),
        };
        time.map(Value::Number)
    }
}

/// A parsed single-expression formula, e.g. `"sin(t * 2 * pi) * 0.5 + 0.5"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, PsyflowError> {
        let expr = lex(source)
            .and_then(|tokens| Parser::new(tokens, source.len()).parse_formula())
            .map_err(|e| PsyflowError::evaluation(source, e.to_string()))?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of all variables the formula reads (time variables, constants or
    /// unknown names), without duplicates.
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.expr.collect_variables(&mut names);
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn evaluate(&self, namespace: &Namespace) -> Result<Value, PsyflowError> {
        eval(&self.expr, namespace).map_err(|reason| PsyflowError::evaluation(&self.source, reason))
    }
}

/// A parsed statement list, e.g. `"y = t * 2; x = y + 1"`. The value of the
/// result variable after the last statement is the script's result.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    source: String,
    statements: Vec<Assignment>,
    result_variable: String,
}

impl Script {
    pub fn parse(source: &str, result_variable: &str) -> Result<Self, PsyflowError> {
        let statements = lex(source)
            .and_then(|tokens| Parser::new(tokens, source.len()).parse_statements())
            .map_err(|e| PsyflowError::evaluation(source, e.to_string()))?;
        if !statements.iter().any(|s| s.target == result_variable) {
            return Err(PsyflowError::evaluation(
                source,
                format!("result variable \"{}\" is never assigned", result_variable),
            ));
        }
        Ok(Self {
            source: source.to_string(),
            statements,
            result_variable: result_variable.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn result_variable(&self) -> &str {
        &self.result_variable
    }

    /// Names read by the script that are not assigned by an earlier
    /// statement.
    pub fn variables(&self) -> Vec<&str> {
        let mut assigned: Vec<&str> = Vec::new();
        let mut free = Vec::new();
        for statement in &self.statements {
            let mut read = Vec::new();
            statement.expr.collect_variables(&mut read);
            free.extend(read.into_iter().filter(|name| !assigned.contains(name)));
            assigned.push(statement.target.as_str());
        }
        free.sort_unstable();
        free.dedup();
        free
    }

    pub fn evaluate(&self, namespace: &Namespace) -> Result<Value, PsyflowError> {
        let mut scope = namespace.clone();
        for statement in &self.statements {
            let value = eval(&statement.expr, &scope).map_err(|reason| PsyflowError::evaluation(&self.source, reason))?;
            scope.locals.insert(statement.target.clone(), value);
        }
        scope.locals.remove(&self.result_variable).ok_or_else(|| {
            PsyflowError::evaluation(&self.source, format!("\"{}\" was not set", self.result_variable))
        })
    }
}

/// Returns an error naming the first variable in `names` that will never be
/// available given the set of time variables the controller provides.
pub(crate) fn check_variables(source: &str, names: &[&str], available: &[&str]) -> Result<(), PsyflowError> {
    for name in names {
        if CONSTANTS.iter().any(|(c, _)| c == name) || available.contains(name) {
            continue;
        }
        let reason = if TIME_VARIABLES.contains(name) {
            format!("variable \"{}\" is not enabled by the controller's temporal variables", name)
        } else {
            format!("unknown variable \"{}\"", name)
        };
        return Err(PsyflowError::evaluation(source, reason));
    }
    Ok(())
}

fn number(value: Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => Ok(n),
        other => Err(format!("expected a number, got a {}", other.type_name())),
    }
}

fn boolean(value: Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(format!("expected a bool, got a {}", other.type_name())),
    }
}

fn eval(expr: &Expr, ns: &Namespace) -> Result<Value, String> {
    match expr {
        Expr::Num(n) => Ok(Value::Number(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Var(name) => ns.lookup(name).ok_or_else(|| format!("variable \"{}\" is not available", name)),
        Expr::Seq(items) => items
            .iter()
            .map(|item| eval(item, ns).and_then(number))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Sequence),
        Expr::Neg(inner) => match eval(inner, ns)? {
            Value::Sequence(v) => Ok(Value::Sequence(v.into_iter().map(|x| -x).collect())),
            other => Ok(Value::Number(-number(other)?)),
        },
        Expr::Not(inner) => Ok(Value::Bool(!boolean(eval(inner, ns)?)?)),
        Expr::Cond(cond, a, b) => {
            if boolean(eval(cond, ns)?)? {
                eval(a, ns)
            } else {
                eval(b, ns)
            }
        }
        Expr::Binary(Operator::And, a, b) => {
            // short circuit
            Ok(Value::Bool(boolean(eval(a, ns)?)? && boolean(eval(b, ns)?)?))
        }
        Expr::Binary(Operator::Or, a, b) => Ok(Value::Bool(boolean(eval(a, ns)?)? || boolean(eval(b, ns)?)?)),
        Expr::Binary(op, a, b) => binary(*op, eval(a, ns)?, eval(b, ns)?),
        Expr::Call(function, args) => {
            let args = args
                .iter()
                .map(|a| eval(a, ns).and_then(number))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, &args).map(Value::Number)
        }
    }
}

fn binary(op: Operator, a: Value, b: Value) -> Result<Value, String> {
    match (op, a, b) {
        (Operator::Eq, Value::Bool(x), Value::Bool(y)) => Ok(Value::Bool(x == y)),
        (Operator::NotEq, Value::Bool(x), Value::Bool(y)) => Ok(Value::Bool(x != y)),
        // element-wise arithmetic between a sequence and a scalar
        (op, Value::Sequence(v), Value::Number(s)) => v
            .into_iter()
            .map(|x| arithmetic(op, x, s))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Sequence),
        (op, Value::Number(s), Value::Sequence(v)) => v
            .into_iter()
            .map(|x| arithmetic(op, s, x))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Sequence),
        (op, Value::Sequence(v), Value::Sequence(w)) => {
            if v.len() != w.len() {
                return Err(format!("sequence lengths differ ({} and {})", v.len(), w.len()));
            }
            v.into_iter()
                .zip(w)
                .map(|(x, y)| arithmetic(op, x, y))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Sequence)
        }
        (op, a, b) => {
            let (x, y) = (number(a)?, number(b)?);
            match op {
                Operator::Eq => Ok(Value::Bool(x == y)),
                Operator::NotEq => Ok(Value::Bool(x != y)),
                Operator::Lt => Ok(Value::Bool(x < y)),
                Operator::Le => Ok(Value::Bool(x <= y)),
                Operator::Gt => Ok(Value::Bool(x > y)),
                Operator::Ge => Ok(Value::Bool(x >= y)),
                op => arithmetic(op, x, y).map(Value::Number),
            }
        }
    }
}

fn arithmetic(op: Operator, x: f64, y: f64) -> Result<f64, String> {
    match op {
        Operator::Add => Ok(x + y),
        Operator::Sub => Ok(x - y),
        Operator::Mul => Ok(x * y),
        Operator::Div if y == 0.0 => Err("division by zero".to_string()),
        Operator::Div => Ok(x / y),
        Operator::Rem if y == 0.0 => Err("modulo by zero".to_string()),
        // the result has the sign of the divisor
        Operator::Rem => Ok(x - y * (x / y).floor()),
        Operator::Pow => Ok(x.powf(y)),
        _ => Err("operator not supported for sequences".to_string()),
    }
}

fn call(function: Function, args: &[f64]) -> Result<f64, String> {
    let a = args.first().copied().unwrap_or(0.0);
    let b = args.get(1).copied().unwrap_or(0.0);
    let result = match function {
        Function::Sin => a.sin(),
        Function::Cos => a.cos(),
        Function::Tan => a.tan(),
        Function::Asin => a.asin(),
        Function::Acos => a.acos(),
        Function::Atan => a.atan(),
        Function::Atan2 => a.atan2(b),
        Function::Sqrt if a < 0.0 => return Err("square root of a negative number".to_string()),
        Function::Sqrt => a.sqrt(),
        Function::Abs => a.abs(),
        Function::Exp => a.exp(),
        Function::Ln if a <= 0.0 => return Err("logarithm of a non-positive number".to_string()),
        Function::Ln => a.ln(),
        Function::Log10 if a <= 0.0 => return Err("logarithm of a non-positive number".to_string()),
        Function::Log10 => a.log10(),
        Function::Floor => a.floor(),
        Function::Ceil => a.ceil(),
        Function::Round => a.round(),
        Function::Fract => a - a.floor(),
        Function::Sign => {
            if a > 0.0 {
                1.0
            } else if a < 0.0 {
                -1.0
            } else {
                0.0
            }
        }
        Function::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
        Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Function::Clamp => a.max(b).min(args.get(2).copied().unwrap_or(b)),
        Function::Pow => a.powf(b),
        Function::Step => {
            if b < a {
                0.0
            } else {
                1.0
            }
        }
        Function::Deg2Rad => a.to_radians(),
        Function::Rad2Deg => a.to_degrees(),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(t: f64) -> Namespace {
        Namespace::new(Some(t), Some(t + 10.0), Some(3.0), Some(100.0))
    }

    #[test]
    fn evaluates_time_formulas() {
        let f = Formula::parse("t * 360.0").unwrap();
        assert_eq!(f.evaluate(&ns(0.5)).unwrap(), Value::Number(180.0));

        let f = Formula::parse("t_abs - t + f_abs").unwrap();
        assert_eq!(f.evaluate(&ns(0.5)).unwrap(), Value::Number(110.0));
    }

    #[test]
    fn conditionals_and_booleans() {
        let f = Formula::parse("frame % 2 == 1 ? 1.0 : 0.0").unwrap();
        assert_eq!(f.evaluate(&ns(0.0)).unwrap(), Value::Number(1.0));

        let f = Formula::parse("t > 1 and not (frame < 2)").unwrap();
        assert_eq!(f.evaluate(&ns(2.0)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn sequences_support_elementwise_math() {
        let f = Formula::parse("[320, 240] + [t, 0] * 10").unwrap();
        assert_eq!(f.evaluate(&ns(1.0)).unwrap(), Value::Sequence(vec![330.0, 240.0]));
    }

    #[test]
    fn missing_time_variable_is_an_evaluation_error() {
        let f = Formula::parse("t * 2").unwrap();
        let err = f.evaluate(&Namespace::default()).unwrap_err();
        assert!(matches!(err, PsyflowError::EvaluationError { .. }));
    }

    #[test]
    fn syntax_errors_become_evaluation_errors() {
        let err = Formula::parse("t * (2").unwrap_err();
        assert!(matches!(err, PsyflowError::EvaluationError { source_text, .. } if source_text == "t * (2"));
    }

    #[test]
    fn host_code_cannot_be_reached() {
        assert!(Formula::parse("__import__('os')").is_err());
        assert!(Formula::parse("open(\"/etc/passwd\")").is_err());
    }

    #[test]
    fn scripts_return_the_result_variable() {
        let s = Script::parse("y = t * 2\nx = y + 1", "x").unwrap();
        assert_eq!(s.evaluate(&ns(1.5)).unwrap(), Value::Number(4.0));
        assert_eq!(s.variables(), vec!["t"]);
    }

    #[test]
    fn scripts_must_assign_the_result_variable() {
        assert!(Script::parse("y = 1", "x").is_err());
    }

    #[test]
    fn variable_check_names_disabled_time_variables() {
        let f = Formula::parse("t_abs + pi").unwrap();
        assert!(check_variables(f.source(), &f.variables(), &["t"]).is_err());
        assert!(check_variables(f.source(), &f.variables(), &["t_abs"]).is_ok());
        let f = Formula::parse("q").unwrap();
        assert!(check_variables(f.source(), &f.variables(), TIME_VARIABLES).is_err());
    }

    #[test]
    fn numbers_convert_to_integers_on_request() {
        assert_eq!(
            Value::Number(3.0).into_parameter(Some(&TypeTag::Integer)),
            ParameterValue::Integer(3)
        );
        assert_eq!(Value::Number(3.0).into_parameter(Some(&TypeTag::Real)), ParameterValue::Real(3.0));
        assert_eq!(Value::Number(3.5).into_parameter(Some(&TypeTag::Integer)), ParameterValue::Real(3.5));
    }
}
