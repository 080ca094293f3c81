// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Frame-locked stimulus presentation with parameters driven by
//! controllers, locally or over a network connection.

pub mod clock;
pub mod controller;
pub mod errors;
pub mod formula;
pub mod frame_timer;
pub mod options;
pub mod parameters;
pub mod presentation;
pub mod remote;
pub mod utils;
pub mod visual;

pub mod prelude {
    pub use crate::clock::{Clock, SimulatedClock, SystemClock};
    pub use crate::controller::{
        ConstantController, Controller, EncapsulatedController, EvalFlag, EvalFrequency, FunctionController,
        Phase, StringController, TemporalVariable, TemporalVariables, TimeBasis,
    };
    pub use crate::errors::PsyflowError;
    pub use crate::frame_timer::FrameTimer;
    pub use crate::options::{FrameTimerOptions, GoDuration, PresentationOptions};
    pub use crate::parameters::{ParameterDefinition, ParameterValue, Parameters, SharedParameters, TypeTag};
    pub use crate::presentation::{ControllerId, GoSummary, Presentation, PresentationContext, PresentationSignals};
    pub use crate::remote::{SocketListenController, TcpServer};
    pub use crate::visual::color::Rgba;
    pub use crate::visual::screen::{HeadlessScreen, Screen, VsyncMode};
    pub use crate::visual::stimuli::{FixationSpot, Stimulus, TextStimulus};
    pub use crate::visual::viewport::Viewport;
}
