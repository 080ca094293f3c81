// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{check_type, Controller, EvalFrequency, TemporalVariables, TimeBasis};
use crate::errors::PsyflowError;
use crate::parameters::{ParameterValue, TypeTag};

#[derive(Debug)]
struct DelegateSlot {
    active: Box<dyn Controller>,
    // replaces `active` at the next tick boundary
    staged: Option<Box<dyn Controller>>,
    require_type: TypeTag,
}

/// Shared access to the delegate of an [`EncapsulatedController`].
///
/// Handles can be cloned and kept by whoever decides on replacements (for
/// example a remote listener) while the controller itself is owned by the
/// presentation.
#[derive(Debug, Clone)]
pub struct DelegateHandle(Arc<Mutex<DelegateSlot>>);

impl DelegateHandle {
    fn lock(&self) -> MutexGuard<'_, DelegateSlot> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The type every delegate must return.
    pub fn require_type(&self) -> TypeTag {
        self.lock().require_type.clone()
    }

    /// Stages `new` as the next delegate. Fails with a type mismatch if `new`
    /// does not return the required type; the current delegate stays in
    /// place either way until the next tick boundary.
    pub fn set_new_controller(&self, new: Box<dyn Controller>) -> Result<(), PsyflowError> {
        let mut slot = self.lock();
        check_type(&slot.require_type, &new.returns_type())?;
        slot.staged = Some(new);
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        self.lock().staged.is_some()
    }

    /// Describes the delegate that will be active on the next tick.
    pub fn describe(&self) -> String {
        let slot = self.lock();
        slot.staged.as_ref().unwrap_or(&slot.active).describe()
    }

    /// Runs `f` on the active delegate.
    pub fn with_active<R>(&self, f: impl FnOnce(&dyn Controller) -> R) -> R {
        f(self.lock().active.as_ref())
    }

    fn commit(&self) -> bool {
        let mut slot = self.lock();
        match slot.staged.take() {
            Some(next) => {
                log::debug!("swapping delegate to {}", next.describe());
                slot.active = next;
                true
            }
            None => false,
        }
    }
}

/// Forwards everything to a replaceable inner controller.
///
/// Replacements made through [`EncapsulatedController::set_new_controller`]
/// or a [`DelegateHandle`] become active at the next tick boundary, so a
/// tick never sees two different delegates.
#[derive(Debug)]
pub struct EncapsulatedController {
    handle: DelegateHandle,
}

impl EncapsulatedController {
    /// Wraps `initial`. Its return type becomes the contract for all later
    /// delegates.
    pub fn new(initial: impl Controller + 'static) -> Self {
        let require_type = initial.returns_type();
        Self::from_parts(Box::new(initial), require_type)
    }

    /// Wraps `initial` under an explicit contract, which `initial` must
    /// satisfy.
    pub fn with_require_type(initial: Box<dyn Controller>, require_type: TypeTag) -> Result<Self, PsyflowError> {
        check_type(&require_type, &initial.returns_type())?;
        Ok(Self::from_parts(initial, require_type))
    }

    fn from_parts(active: Box<dyn Controller>, require_type: TypeTag) -> Self {
        Self {
            handle: DelegateHandle(Arc::new(Mutex::new(DelegateSlot {
                active,
                staged: None,
                require_type,
            }))),
        }
    }

    pub fn handle(&self) -> DelegateHandle {
        self.handle.clone()
    }

    pub fn set_new_controller(&self, new: impl Controller + 'static) -> Result<(), PsyflowError> {
        self.handle.set_new_controller(Box::new(new))
    }

    /// Activates a staged delegate now. Returns true if there was one.
    pub fn commit(&mut self) -> bool {
        self.handle.commit()
    }
}

impl Controller for EncapsulatedController {
    fn eval_frequency(&self) -> EvalFrequency {
        self.handle.lock().active.eval_frequency()
    }

    fn temporal_variables(&self) -> TemporalVariables {
        self.handle.lock().active.temporal_variables()
    }

    fn returns_type(&self) -> TypeTag {
        self.handle.require_type()
    }

    fn during_go_eval(&mut self, basis: &TimeBasis) -> Result<ParameterValue, PsyflowError> {
        self.handle.lock().active.during_go_eval(basis)
    }

    fn between_go_eval(&mut self, basis: &TimeBasis) -> Result<ParameterValue, PsyflowError> {
        self.handle.lock().active.between_go_eval(basis)
    }

    fn on_tick_boundary(&mut self) -> bool {
        let inner_changed = self.handle.lock().active.on_tick_boundary();
        self.handle.commit() || inner_changed
    }

    fn describe(&self) -> String {
        self.handle.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ConstantController, Phase, StringController};

    fn go() -> TimeBasis {
        TimeBasis::new(Phase::Go, 0.0, 2.0, 0, 0)
    }

    #[test]
    fn incompatible_swap_keeps_previous_delegate() {
        let mut c = EncapsulatedController::new(ConstantController::new(1.0));
        let err = c.set_new_controller(ConstantController::new("text")).unwrap_err();
        assert!(matches!(err, PsyflowError::TypeMismatchError { .. }));
        assert_eq!(c.evaluate(&go()).unwrap(), ParameterValue::Real(1.0));
        c.on_tick_boundary();
        assert_eq!(c.evaluate(&go()).unwrap(), ParameterValue::Real(1.0));
    }

    #[test]
    fn swap_becomes_visible_at_the_tick_boundary() {
        let mut c = EncapsulatedController::new(ConstantController::new(1.0));
        let handle = c.handle();
        handle
            .set_new_controller(Box::new(StringController::formula("t * 2.0").build().unwrap()))
            .unwrap();
        assert!(handle.has_pending());
        assert_eq!(c.evaluate(&go()).unwrap(), ParameterValue::Real(1.0));

        c.on_tick_boundary();
        assert!(!handle.has_pending());
        assert_eq!(c.evaluate(&go()).unwrap(), ParameterValue::Real(4.0));
        assert!(c.describe().starts_with("eval_str("));
    }

    #[test]
    fn subtypes_satisfy_the_contract() {
        let c = EncapsulatedController::new(ConstantController::new(1.0));
        assert!(c.set_new_controller(ConstantController::new(2i64)).is_ok());
    }

    #[test]
    fn explicit_contract_must_hold_for_initial_delegate() {
        let initial = Box::new(ConstantController::new(true));
        assert!(EncapsulatedController::with_require_type(initial, TypeTag::Real).is_err());
    }
}
