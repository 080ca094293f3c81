// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use uuid::Uuid;

use super::frame::Frame;
use crate::errors::PsyflowError;
use crate::parameters::SharedParameters;

mod fixation_spot;
mod text;

pub use fixation_spot::FixationSpot;
pub use text::TextStimulus;

/// The stimulus trait.
pub trait Stimulus: downcast_rs::Downcast + std::fmt::Debug + Send {
    /// Draw the stimulus onto the frame.
    fn draw(&mut self, frame: &mut Frame) -> Result<(), PsyflowError>;

    /// Handle to the stimulus' parameters, for binding controllers.
    fn parameters(&self) -> SharedParameters;

    /// Return the UUID that identifies the stimulus.
    fn uuid(&self) -> Uuid;

    /// Check if two stimuli are equal.
    fn equal(&self, other: &dyn Stimulus) -> bool {
        self.uuid() == other.uuid()
    }

    /// Returns true if the stimulus is currently visible.
    fn visible(&self) -> bool {
        self.parameters().lock().get_bool("on").unwrap_or(true)
    }
}

downcast_rs::impl_downcast!(Stimulus);
