// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Controllers supply parameter values once per tick.
//!
//! A controller declares *when* it wants to be evaluated
//! ([`EvalFrequency`]), *which* time variables it reads
//! ([`TemporalVariables`]) and *what* it returns ([`TypeTag`]). The
//! presentation loop uses these declarations to decide which controllers to
//! call on a given tick and which parts of the [`TimeBasis`] to hand them.

use std::fmt;
use std::str::FromStr;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::errors::PsyflowError;
use crate::formula::Namespace;
use crate::parameters::{ParameterValue, TypeTag};

mod constant;
mod encapsulated;
mod function;
mod string;

pub use constant::ConstantController;
pub use encapsulated::{DelegateHandle, EncapsulatedController};
pub use function::FunctionController;
pub use string::{StringController, StringControllerBuilder, StringKind};

/// Phase of the presentation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    BetweenGo,
    Go,
}

/// A single evaluation frequency flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EvalFlag {
    EveryFrame,
    Transitions,
    Once,
    NotDuringGo,
    NotBetweenGo,
}

impl EvalFlag {
    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// When a controller is evaluated. An empty set means never.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EvalFrequency {
    bits: u8,
}

impl EvalFrequency {
    pub const NEVER: EvalFrequency = EvalFrequency { bits: 0 };

    /// Builds a flag set, rejecting `ONCE` combined with `TRANSITIONS` or
    /// `EVERY_FRAME`.
    pub fn new(flags: impl IntoIterator<Item = EvalFlag>) -> Result<Self, PsyflowError> {
        let mut frequency = Self::NEVER;
        for flag in flags {
            frequency.bits |= flag.bit();
        }
        frequency.check()?;
        Ok(frequency)
    }

    pub fn every_frame() -> Self {
        Self {
            bits: EvalFlag::EveryFrame.bit(),
        }
    }

    pub fn transitions() -> Self {
        Self {
            bits: EvalFlag::Transitions.bit(),
        }
    }

    pub fn once() -> Self {
        Self {
            bits: EvalFlag::Once.bit(),
        }
    }

    /// Returns a copy with `flag` added.
    pub fn with(self, flag: EvalFlag) -> Result<Self, PsyflowError> {
        let frequency = Self {
            bits: self.bits | flag.bit(),
        };
        frequency.check()?;
        Ok(frequency)
    }

    /// Returns a copy with `flag` removed.
    pub fn without(self, flag: EvalFlag) -> Self {
        Self {
            bits: self.bits & !flag.bit(),
        }
    }

    /// Returns a copy excluded from go loops. Exclusion flags never conflict.
    pub fn not_during_go(self) -> Self {
        Self {
            bits: self.bits | EvalFlag::NotDuringGo.bit(),
        }
    }

    /// Returns a copy excluded from the between-go phase.
    pub fn not_between_go(self) -> Self {
        Self {
            bits: self.bits | EvalFlag::NotBetweenGo.bit(),
        }
    }

    fn check(&self) -> Result<(), PsyflowError> {
        if self.contains(EvalFlag::Once) {
            for other in [EvalFlag::Transitions, EvalFlag::EveryFrame] {
                if self.contains(other) {
                    return Err(PsyflowError::InvalidFlags(format!("ONCE cannot be combined with {}", other)));
                }
            }
        }
        Ok(())
    }

    pub fn contains(&self, flag: EvalFlag) -> bool {
        self.bits & flag.bit() != 0
    }

    pub fn is_never(&self) -> bool {
        self.bits == 0
    }

    pub fn flags(&self) -> impl Iterator<Item = EvalFlag> + '_ {
        EvalFlag::iter().filter(|flag| self.contains(*flag))
    }

    /// False if the controller is excluded from `phase`.
    pub fn runs_in(&self, phase: Phase) -> bool {
        match phase {
            Phase::Go => !self.contains(EvalFlag::NotDuringGo),
            Phase::BetweenGo => !self.contains(EvalFlag::NotBetweenGo),
            Phase::Idle => false,
        }
    }

    /// True if the controller is evaluated when a phase is entered.
    pub fn fires_on_entry(&self) -> bool {
        self.contains(EvalFlag::Transitions) || self.contains(EvalFlag::Once)
    }
}

impl fmt::Display for EvalFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            return write!(f, "NEVER");
        }
        let names: Vec<String> = self.flags().map(|flag| flag.to_string()).collect();
        write!(f, "{}", names.join(" | "))
    }
}

impl fmt::Debug for EvalFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvalFrequency({})", self)
    }
}

impl FromStr for EvalFrequency {
    type Err = PsyflowError;

    /// Parses `"EVERY_FRAME | NOT_DURING_GO"`, `"NEVER"` and the
    /// `Controller.`-qualified spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = Vec::new();
        for part in s.split('|').map(str::trim) {
            let name = part.strip_prefix("Controller.").unwrap_or(part);
            if name == "NEVER" {
                continue;
            }
            let flag = EvalFlag::from_str(name)
                .map_err(|_| PsyflowError::InvalidFlags(format!("unknown eval frequency flag \"{}\"", part)))?;
            flags.push(flag);
        }
        Self::new(flags)
    }
}

/// A time variable a controller may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TemporalVariable {
    TimeSecAbsolute,
    TimeSecSinceGo,
    FramesAbsolute,
    FramesSinceGo,
}

impl TemporalVariable {
    fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Formula names bound to this variable.
    pub fn formula_names(self) -> &'static [&'static str] {
        match self {
            TemporalVariable::TimeSecAbsolute => &["t_abs"],
            TemporalVariable::TimeSecSinceGo => &["t"],
            TemporalVariable::FramesAbsolute => &["frame_abs", "f_abs"],
            TemporalVariable::FramesSinceGo => &["frame", "f"],
        }
    }

    /// Since-go variables have no value between go loops.
    pub fn is_since_go(self) -> bool {
        matches!(self, TemporalVariable::TimeSecSinceGo | TemporalVariable::FramesSinceGo)
    }
}

/// The time variables a controller reads. An empty set is
/// `TIME_INDEPENDENT`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TemporalVariables {
    bits: u8,
}

impl TemporalVariables {
    pub const TIME_INDEPENDENT: TemporalVariables = TemporalVariables { bits: 0 };

    pub fn new(variables: impl IntoIterator<Item = TemporalVariable>) -> Self {
        let mut set = Self::TIME_INDEPENDENT;
        for variable in variables {
            set.bits |= variable.bit();
        }
        set
    }

    pub fn only(variable: TemporalVariable) -> Self {
        Self::new([variable])
    }

    pub fn all() -> Self {
        Self::new(TemporalVariable::iter())
    }

    pub fn with(self, variable: TemporalVariable) -> Self {
        Self {
            bits: self.bits | variable.bit(),
        }
    }

    pub fn contains(&self, variable: TemporalVariable) -> bool {
        self.bits & variable.bit() != 0
    }

    pub fn is_time_independent(&self) -> bool {
        self.bits == 0
    }

    pub fn variables(&self) -> impl Iterator<Item = TemporalVariable> + '_ {
        TemporalVariable::iter().filter(|v| self.contains(*v))
    }

    /// Formula names available in `phase`.
    pub fn formula_names(&self, phase: Phase) -> Vec<&'static str> {
        self.variables()
            .filter(|v| phase == Phase::Go || !v.is_since_go())
            .flat_map(|v| v.formula_names().iter().copied())
            .collect()
    }
}

impl fmt::Display for TemporalVariables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_time_independent() {
            return write!(f, "TIME_INDEPENDENT");
        }
        let names: Vec<String> = self.variables().map(|v| v.to_string()).collect();
        write!(f, "{}", names.join(" | "))
    }
}

impl fmt::Debug for TemporalVariables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TemporalVariables({})", self)
    }
}

impl FromStr for TemporalVariables {
    type Err = PsyflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = Self::TIME_INDEPENDENT;
        for part in s.split('|').map(str::trim) {
            let name = part.strip_prefix("Controller.").unwrap_or(part);
            if name == "TIME_INDEPENDENT" {
                continue;
            }
            let variable = TemporalVariable::from_str(name)
                .map_err(|_| PsyflowError::InvalidFlags(format!("unknown temporal variable \"{}\"", part)))?;
            set = set.with(variable);
        }
        Ok(set)
    }
}

/// Time and frame counters of the current tick, as seen by one controller.
///
/// Fields the controller did not ask for are `None`. Since-go counters are
/// also `None` outside of a go loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBasis {
    pub phase: Phase,
    pub time_sec_absolute: Option<f64>,
    pub time_sec_since_go: Option<f64>,
    pub frames_absolute: Option<u64>,
    pub frames_since_go: Option<u64>,
}

impl TimeBasis {
    /// A basis carrying every counter. Since-go counters are dropped outside
    /// of the go phase.
    pub fn new(phase: Phase, time_sec_absolute: f64, time_sec_since_go: f64, frames_absolute: u64, frames_since_go: u64) -> Self {
        let in_go = phase == Phase::Go;
        Self {
            phase,
            time_sec_absolute: Some(time_sec_absolute),
            time_sec_since_go: in_go.then_some(time_sec_since_go),
            frames_absolute: Some(frames_absolute),
            frames_since_go: in_go.then_some(frames_since_go),
        }
    }

    /// A basis with only the phase set.
    pub fn time_independent(phase: Phase) -> Self {
        Self {
            phase,
            time_sec_absolute: None,
            time_sec_since_go: None,
            frames_absolute: None,
            frames_since_go: None,
        }
    }

    /// Keeps only the counters listed in `variables`.
    pub fn masked(&self, variables: TemporalVariables) -> Self {
        let keep = |v: TemporalVariable| variables.contains(v);
        Self {
            phase: self.phase,
            time_sec_absolute: self.time_sec_absolute.filter(|_| keep(TemporalVariable::TimeSecAbsolute)),
            time_sec_since_go: self.time_sec_since_go.filter(|_| keep(TemporalVariable::TimeSecSinceGo)),
            frames_absolute: self.frames_absolute.filter(|_| keep(TemporalVariable::FramesAbsolute)),
            frames_since_go: self.frames_since_go.filter(|_| keep(TemporalVariable::FramesSinceGo)),
        }
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(
            self.time_sec_since_go,
            self.time_sec_absolute,
            self.frames_since_go.map(|f| f as f64),
            self.frames_absolute.map(|f| f as f64),
        )
    }
}

/// A unit of computation producing one parameter value per evaluation.
pub trait Controller: downcast_rs::Downcast + fmt::Debug + Send {
    fn eval_frequency(&self) -> EvalFrequency;

    fn temporal_variables(&self) -> TemporalVariables;

    /// Type of every value this controller returns.
    fn returns_type(&self) -> TypeTag;

    fn during_go_eval(&mut self, basis: &TimeBasis) -> Result<ParameterValue, PsyflowError>;

    fn between_go_eval(&mut self, basis: &TimeBasis) -> Result<ParameterValue, PsyflowError>;

    /// Evaluates for the phase recorded in `basis`.
    fn evaluate(&mut self, basis: &TimeBasis) -> Result<ParameterValue, PsyflowError> {
        match basis.phase {
            Phase::Go => self.during_go_eval(basis),
            _ => self.between_go_eval(basis),
        }
    }

    /// Called by the presentation loop before any controller is evaluated on
    /// a tick. Returns true if the controller now behaves as a different one
    /// (a committed delegate swap), which re-arms `ONCE`.
    fn on_tick_boundary(&mut self) -> bool {
        false
    }

    /// Single-line description used by remote queries.
    fn describe(&self) -> String {
        format!(
            "function({}, {}, {})",
            self.eval_frequency(),
            self.temporal_variables(),
            self.returns_type()
        )
    }
}

downcast_rs::impl_downcast!(Controller);

/// Type a constant controller infers from a value. Non-negative integers are
/// widened to `int` so that a later negative value still fits.
pub(crate) fn natural_type(value: &ParameterValue) -> TypeTag {
    match value.type_tag() {
        TypeTag::UnsignedInteger => TypeTag::Integer,
        other => other,
    }
}

/// Fails with a type mismatch unless `found` may be used where `expected` is
/// required.
pub(crate) fn check_type(expected: &TypeTag, found: &TypeTag) -> Result<(), PsyflowError> {
    if found.is_subtype_of(expected) {
        Ok(())
    } else {
        Err(PsyflowError::TypeMismatchError {
            expected: expected.clone(),
            found: found.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_cannot_be_combined_with_transitions_or_every_frame() {
        assert!(EvalFrequency::new([EvalFlag::Once, EvalFlag::Transitions]).is_err());
        assert!(EvalFrequency::new([EvalFlag::Once, EvalFlag::EveryFrame]).is_err());
        assert!(EvalFrequency::once().with(EvalFlag::NotDuringGo).is_ok());
        assert!(EvalFrequency::every_frame().with(EvalFlag::Transitions).is_ok());
    }

    #[test]
    fn flags_display_and_parse() {
        let ef: EvalFrequency = "EVERY_FRAME|NOT_BETWEEN_GO".parse().unwrap();
        assert_eq!(ef.to_string(), "EVERY_FRAME | NOT_BETWEEN_GO");
        assert_eq!(EvalFrequency::NEVER.to_string(), "NEVER");
        assert_eq!("NEVER".parse::<EvalFrequency>().unwrap(), EvalFrequency::NEVER);
        assert!("Controller.ONCE".parse::<EvalFrequency>().unwrap().contains(EvalFlag::Once));
        assert!("SOMETIMES".parse::<EvalFrequency>().is_err());

        let tv: TemporalVariables = "TIME_SEC_ABSOLUTE | TIME_SEC_SINCE_GO".parse().unwrap();
        assert_eq!(tv.to_string(), "TIME_SEC_ABSOLUTE | TIME_SEC_SINCE_GO");
        assert!("TIME_INDEPENDENT".parse::<TemporalVariables>().unwrap().is_time_independent());
    }

    #[test]
    fn phase_exclusion() {
        let ef = EvalFrequency::every_frame().with(EvalFlag::NotDuringGo).unwrap();
        assert!(!ef.runs_in(Phase::Go));
        assert!(ef.runs_in(Phase::BetweenGo));
        assert!(!ef.runs_in(Phase::Idle));
    }

    #[test]
    fn time_basis_masks_unrequested_counters() {
        let basis = TimeBasis::new(Phase::Go, 12.0, 2.0, 720, 120);
        let masked = basis.masked(TemporalVariables::only(TemporalVariable::TimeSecSinceGo));
        assert_eq!(masked.time_sec_since_go, Some(2.0));
        assert_eq!(masked.time_sec_absolute, None);
        assert_eq!(masked.frames_since_go, None);

        let between = TimeBasis::new(Phase::BetweenGo, 12.0, 2.0, 720, 120);
        assert_eq!(between.time_sec_since_go, None);
        assert_eq!(between.frames_absolute, Some(720));
    }

    #[test]
    fn namespace_carries_the_masked_counters() {
        let basis = TimeBasis::new(Phase::Go, 12.0, 2.0, 720, 120);
        let ns = basis
            .masked(TemporalVariables::only(TemporalVariable::FramesSinceGo))
            .namespace();
        assert_eq!(ns.frame, Some(120.0));
        assert_eq!(ns.t, None);
        assert_eq!(ns.t_abs, None);
        assert_eq!(ns.frame_abs, None);
    }

    #[test]
    fn since_go_names_are_only_available_during_go() {
        let tv = TemporalVariables::all();
        assert!(tv.formula_names(Phase::Go).contains(&"t"));
        assert!(!tv.formula_names(Phase::BetweenGo).contains(&"t"));
        assert!(tv.formula_names(Phase::BetweenGo).contains(&"t_abs"));
    }
}
