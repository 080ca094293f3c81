// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Named, typed parameter slots.
//!
//! Every stimulus, viewport and screen keeps its state in a [`Parameters`]
//! container. Controllers write into these containers once per tick, so all
//! validation happens at the moment of assignment: a value that does not match
//! the declared [`TypeTag`] or [`Constraint`] is rejected and the previous
//! value stays in place.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::errors::PsyflowError;

/// A parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    None,
    Bool(bool),
    Integer(i64),
    Real(f64),
    String(String),
    Sequence(Vec<f64>),
}

impl ParameterValue {
    /// Returns the most specific type tag describing this value.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            ParameterValue::None => TypeTag::None,
            ParameterValue::Bool(_) => TypeTag::Boolean,
            ParameterValue::Integer(i) if *i >= 0 => TypeTag::UnsignedInteger,
            ParameterValue::Integer(_) => TypeTag::Integer,
            ParameterValue::Real(_) => TypeTag::Real,
            ParameterValue::String(_) => TypeTag::String,
            ParameterValue::Sequence(v) => TypeTag::Sequence(Some(v.len())),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Real(v) => Some(*v),
            ParameterValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterValue::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[f64]> {
        match self {
            ParameterValue::Sequence(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Applies the numeric widening allowed by `target` (integers may be
    /// stored in real-valued slots). Any other value is returned unchanged.
    pub fn widen_to(self, target: &TypeTag) -> Self {
        if let ParameterValue::Integer(i) = &self {
            if !target.accepts_exact(&self.type_tag()) && target.accepts_exact(&TypeTag::Real) {
                return ParameterValue::Real(*i as f64);
            }
        }
        self
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::None => write!(f, "None"),
            ParameterValue::Bool(v) => write!(f, "{}", v),
            ParameterValue::Integer(v) => write!(f, "{}", v),
            ParameterValue::Real(v) => write!(f, "{:?}", v),
            ParameterValue::String(v) => write!(f, "\"{}\"", escape_string(v)),
            ParameterValue::Sequence(v) => {
                let items: Vec<String> = v.iter().map(|x| format!("{:?}", x)).collect();
                write!(f, "({})", items.join(", "))
            }
        }
    }
}

/// Escapes newlines, quotes and backslashes so that a string fits on a single
/// protocol line.
pub(crate) fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Real(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Integer(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Bool(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::String(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::String(value)
    }
}

impl From<Vec<f64>> for ParameterValue {
    fn from(value: Vec<f64>) -> Self {
        ParameterValue::Sequence(value)
    }
}

impl<const N: usize> From<[f64; N]> for ParameterValue {
    fn from(value: [f64; N]) -> Self {
        ParameterValue::Sequence(value.to_vec())
    }
}

/// Declared type of a parameter or of a controller's output.
///
/// Numeric types form a widening chain `UnsignedInteger ⊂ Integer ⊂ Real`.
/// `Sequence(Some(n))` is a real-valued sequence of exactly `n` elements and
/// is a subtype of `Sequence(None)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    None,
    Boolean,
    UnsignedInteger,
    Integer,
    Real,
    String,
    Sequence(Option<usize>),
    AnyOf(Vec<TypeTag>),
}

impl TypeTag {
    /// Returns true if a value of type `self` may be used where `other` is
    /// expected.
    pub fn is_subtype_of(&self, other: &TypeTag) -> bool {
        match (self, other) {
            (TypeTag::AnyOf(members), _) => members.iter().all(|m| m.is_subtype_of(other)),
            (_, TypeTag::AnyOf(members)) => members.iter().any(|m| self.is_subtype_of(m)),
            (a, b) if a == b => true,
            (TypeTag::UnsignedInteger, TypeTag::Integer | TypeTag::Real) => true,
            (TypeTag::Integer, TypeTag::Real) => true,
            (TypeTag::Sequence(Some(_)), TypeTag::Sequence(None)) => true,
            _ => false,
        }
    }

    /// Like [`TypeTag::is_subtype_of`] but without numeric widening.
    fn accepts_exact(&self, tag: &TypeTag) -> bool {
        match self {
            TypeTag::AnyOf(members) => members.iter().any(|m| m.accepts_exact(tag)),
            TypeTag::Integer => matches!(tag, TypeTag::Integer | TypeTag::UnsignedInteger),
            TypeTag::Sequence(None) => matches!(tag, TypeTag::Sequence(_)),
            other => other == tag,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::None => write!(f, "None"),
            TypeTag::Boolean => write!(f, "bool"),
            TypeTag::UnsignedInteger => write!(f, "uint"),
            TypeTag::Integer => write!(f, "int"),
            TypeTag::Real => write!(f, "float"),
            TypeTag::String => write!(f, "str"),
            TypeTag::Sequence(None) => write!(f, "sequence"),
            TypeTag::Sequence(Some(n)) => write!(f, "sequence{}", n),
            TypeTag::AnyOf(members) => {
                let names: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                write!(f, "any_of({})", names.join(", "))
            }
        }
    }
}

impl FromStr for TypeTag {
    type Err = PsyflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let tag = match s {
            "None" | "none" | "types.NoneType" => TypeTag::None,
            "bool" | "types.BooleanType" => TypeTag::Boolean,
            "uint" => TypeTag::UnsignedInteger,
            "int" | "types.IntType" => TypeTag::Integer,
            "float" | "real" | "types.FloatType" => TypeTag::Real,
            "str" | "string" | "types.StringType" => TypeTag::String,
            "sequence" | "types.TupleType" | "types.ListType" => TypeTag::Sequence(None),
            other => match other.strip_prefix("sequence").map(str::parse::<usize>) {
                Some(Ok(n)) => TypeTag::Sequence(Some(n)),
                _ => return Err(PsyflowError::ProtocolError(format!("unknown type \"{}\"", other))),
            },
        };
        Ok(tag)
    }
}

/// Additional restriction on the values a parameter may hold.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub enum Constraint {
    #[default]
    None,
    /// Inclusive numeric range. For sequences it applies to every element.
    Range { min: f64, max: f64 },
    /// The value must be one of the listed strings.
    OneOf(Vec<String>),
}

impl Constraint {
    fn check(&self, value: &ParameterValue) -> Result<(), String> {
        match (self, value) {
            (Constraint::None, _) => Ok(()),
            (Constraint::Range { min, max }, value) => {
                let in_range = |x: f64| x >= *min && x <= *max;
                let ok = match value {
                    ParameterValue::Sequence(v) => v.iter().all(|x| in_range(*x)),
                    other => other.as_f64().map(in_range).unwrap_or(true),
                };
                if ok {
                    Ok(())
                } else {
                    Err(format!("{} is outside of [{}, {}]", value, min, max))
                }
            }
            (Constraint::OneOf(options), ParameterValue::String(s)) => {
                if options.iter().any(|o| o == s) {
                    Ok(())
                } else {
                    Err(format!("\"{}\" is not one of {:?}", s, options))
                }
            }
            (Constraint::OneOf(_), _) => Ok(()),
        }
    }
}

/// Declaration of a single parameter: its default value, type and
/// constraints.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    pub default: ParameterValue,
    pub type_tag: TypeTag,
    pub constraint: Constraint,
    /// Constant parameters can only be set when the container is created.
    pub constant: bool,
    pub description: String,
}

impl ParameterDefinition {
    pub fn new(name: &str, default: impl Into<ParameterValue>, type_tag: TypeTag) -> Self {
        Self {
            name: name.to_string(),
            default: default.into(),
            type_tag,
            constraint: Constraint::None,
            constant: false,
            description: String::new(),
        }
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Checks `value` against the declared type and constraint, returning the
    /// (possibly widened) value that should be stored.
    pub fn validate(&self, value: ParameterValue) -> Result<ParameterValue, PsyflowError> {
        let found = value.type_tag();
        if !found.is_subtype_of(&self.type_tag) {
            return Err(PsyflowError::validation(
                &self.name,
                format!("expected {}, got {} ({})", self.type_tag, found, value),
            ));
        }
        let value = value.widen_to(&self.type_tag);
        self.constraint
            .check(&value)
            .map_err(|reason| PsyflowError::validation(&self.name, reason))?;
        Ok(value)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    definition: ParameterDefinition,
    value: ParameterValue,
}

/// A container of named parameters.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
}

impl Parameters {
    /// Creates a container holding the default value of every definition.
    pub fn new(definitions: impl IntoIterator<Item = ParameterDefinition>) -> Result<Self, PsyflowError> {
        Self::with_values(definitions, Vec::<(&str, ParameterValue)>::new())
    }

    /// Creates a container, overriding defaults with `values`. This is the
    /// only place where constant parameters can receive a non-default value.
    pub fn with_values<S: AsRef<str>>(
        definitions: impl IntoIterator<Item = ParameterDefinition>,
        values: impl IntoIterator<Item = (S, ParameterValue)>,
    ) -> Result<Self, PsyflowError> {
        let mut params = Parameters::default();
        for definition in definitions {
            if params.index.contains_key(&definition.name) {
                return Err(PsyflowError::ConfigError(format!(
                    "parameter \"{}\" declared twice",
                    definition.name
                )));
            }
            let value = definition.validate(definition.default.clone())?;
            params.index.insert(definition.name.clone(), params.slots.len());
            params.slots.push(Slot { definition, value });
        }

        for (name, value) in values {
            let slot = params.slot_mut(name.as_ref())?;
            slot.value = slot.definition.validate(value)?;
        }

        Ok(params)
    }

    fn slot(&self, name: &str) -> Result<&Slot, PsyflowError> {
        self.index
            .get(name)
            .map(|i| &self.slots[*i])
            .ok_or_else(|| PsyflowError::UnknownParameter(name.to_string()))
    }

    fn slot_mut(&mut self, name: &str) -> Result<&mut Slot, PsyflowError> {
        match self.index.get(name) {
            Some(i) => Ok(&mut self.slots[*i]),
            None => Err(PsyflowError::UnknownParameter(name.to_string())),
        }
    }

    /// Returns the current value of a parameter.
    pub fn get(&self, name: &str) -> Result<&ParameterValue, PsyflowError> {
        self.slot(name).map(|slot| &slot.value)
    }

    /// Sets a parameter, validating the value first. On failure the previous
    /// value is kept.
    pub fn set(&mut self, name: &str, value: impl Into<ParameterValue>) -> Result<(), PsyflowError> {
        let slot = self.slot_mut(name)?;
        if slot.definition.constant {
            return Err(PsyflowError::ImmutableError(name.to_string()));
        }
        slot.value = slot.definition.validate(value.into())?;
        Ok(())
    }

    pub fn definition(&self, name: &str) -> Result<&ParameterDefinition, PsyflowError> {
        self.slot(name).map(|slot| &slot.definition)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Parameter names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.definition.name.as_str())
    }

    // typed getters used by the stimuli

    pub fn get_f64(&self, name: &str) -> Result<f64, PsyflowError> {
        let value = self.get(name)?;
        value
            .as_f64()
            .ok_or_else(|| PsyflowError::validation(name, format!("{} is not a number", value)))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, PsyflowError> {
        let value = self.get(name)?;
        value
            .as_bool()
            .ok_or_else(|| PsyflowError::validation(name, format!("{} is not a boolean", value)))
    }

    pub fn get_str(&self, name: &str) -> Result<&str, PsyflowError> {
        let value = self.get(name)?;
        value
            .as_str()
            .ok_or_else(|| PsyflowError::validation(name, format!("{} is not a string", value)))
    }

    pub fn get_sequence(&self, name: &str) -> Result<&[f64], PsyflowError> {
        let value = self.get(name)?;
        value
            .as_sequence()
            .ok_or_else(|| PsyflowError::validation(name, format!("{} is not a sequence", value)))
    }
}

/// A parameter container shared between its owner (a stimulus, viewport or
/// screen) and the controllers that write into it.
#[derive(Debug, Clone)]
pub struct SharedParameters(Arc<Mutex<Parameters>>);

impl SharedParameters {
    pub fn new(parameters: Parameters) -> Self {
        Self(Arc::new(Mutex::new(parameters)))
    }

    /// Locks the container. The presentation loop is the only writer, so a
    /// poisoned lock still holds consistent data and is recovered.
    pub fn lock(&self) -> MutexGuard<'_, Parameters> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, name: &str) -> Result<ParameterValue, PsyflowError> {
        self.lock().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: impl Into<ParameterValue>) -> Result<(), PsyflowError> {
        self.lock().set(name, value)
    }

    /// Returns true if both handles point to the same container.
    pub fn ptr_eq(&self, other: &SharedParameters) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Parameters> for SharedParameters {
    fn from(parameters: Parameters) -> Self {
        Self::new(parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spot_parameters() -> Parameters {
        Parameters::with_values(
            vec![
                ParameterDefinition::new("on", true, TypeTag::Boolean),
                ParameterDefinition::new("size", [4.0, 4.0], TypeTag::Sequence(Some(2))),
                ParameterDefinition::new("contrast", 1.0, TypeTag::Real)
                    .constraint(Constraint::Range { min: 0.0, max: 1.0 }),
                ParameterDefinition::new("anchor", "center", TypeTag::String)
                    .constraint(Constraint::OneOf(vec!["center".into(), "lowerleft".into()])),
                ParameterDefinition::new("font_size", 36_i64, TypeTag::UnsignedInteger).constant(),
            ],
            vec![("font_size", ParameterValue::Integer(12))],
        )
        .unwrap()
    }

    #[test]
    fn get_returns_defaults_and_construction_values() {
        let params = spot_parameters();
        assert_eq!(params.get("on").unwrap(), &ParameterValue::Bool(true));
        assert_eq!(params.get("font_size").unwrap(), &ParameterValue::Integer(12));
        assert!(matches!(params.get("missing"), Err(PsyflowError::UnknownParameter(_))));
    }

    #[test]
    fn set_rejects_wrong_type_and_keeps_old_value() {
        let mut params = spot_parameters();
        let err = params.set("on", 1.5).unwrap_err();
        assert!(matches!(err, PsyflowError::ValidationError { .. }));
        assert_eq!(params.get("on").unwrap(), &ParameterValue::Bool(true));

        let err = params.set("size", [1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, PsyflowError::ValidationError { .. }));
    }

    #[test]
    fn set_checks_constraints() {
        let mut params = spot_parameters();
        assert!(params.set("contrast", 0.5).is_ok());
        assert!(params.set("contrast", 1.5).is_err());
        assert_eq!(params.get_f64("contrast").unwrap(), 0.5);

        assert!(params.set("anchor", "lowerleft").is_ok());
        assert!(params.set("anchor", "nowhere").is_err());
    }

    #[test]
    fn constant_parameters_are_immutable() {
        let mut params = spot_parameters();
        let err = params.set("font_size", 20_i64).unwrap_err();
        assert!(matches!(err, PsyflowError::ImmutableError(name) if name == "font_size"));
    }

    #[test]
    fn integers_widen_to_reals() {
        let mut params = spot_parameters();
        params.set("contrast", 1_i64).unwrap();
        assert_eq!(params.get("contrast").unwrap(), &ParameterValue::Real(1.0));
    }

    #[test]
    fn subtype_relationships() {
        assert!(TypeTag::UnsignedInteger.is_subtype_of(&TypeTag::Real));
        assert!(TypeTag::Integer.is_subtype_of(&TypeTag::Real));
        assert!(!TypeTag::Real.is_subtype_of(&TypeTag::Integer));
        assert!(!TypeTag::Boolean.is_subtype_of(&TypeTag::Integer));
        assert!(TypeTag::Sequence(Some(3)).is_subtype_of(&TypeTag::Sequence(None)));

        let color = TypeTag::AnyOf(vec![TypeTag::Sequence(Some(3)), TypeTag::Sequence(Some(4))]);
        assert!(TypeTag::Sequence(Some(4)).is_subtype_of(&color));
        assert!(!TypeTag::Sequence(Some(2)).is_subtype_of(&color));
    }

    #[test]
    fn type_tags_parse_from_protocol_names() {
        assert_eq!("float".parse::<TypeTag>().unwrap(), TypeTag::Real);
        assert_eq!("types.FloatType".parse::<TypeTag>().unwrap(), TypeTag::Real);
        assert_eq!("sequence3".parse::<TypeTag>().unwrap(), TypeTag::Sequence(Some(3)));
        assert!("complex".parse::<TypeTag>().is_err());
    }
}
