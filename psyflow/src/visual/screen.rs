// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use derive_debug::Dbg;

use super::color::Rgba;
use super::frame::Frame;
use crate::clock::{Clock, SimulatedClock};
use crate::errors::PsyflowError;
use crate::parameters::{ParameterDefinition, ParameterValue, Parameters, SharedParameters, TypeTag};
use crate::utils::time::Instant;

/// A display surface.
///
/// Per tick the presentation calls [`Screen::clear`], then
/// [`Screen::submit`] with everything the viewports on this screen drew, and
/// finally [`Screen::swap_buffers`] once every screen has submitted.
pub trait Screen: downcast_rs::Downcast + std::fmt::Debug + Send {
    fn name(&self) -> &str;

    fn parameters(&self) -> SharedParameters;

    fn size(&self) -> [f64; 2];

    fn refresh_rate_hz(&self) -> f64;

    /// Starts a new frame filled with the background color.
    fn clear(&mut self) -> Result<Frame, PsyflowError>;

    /// Hands over the finished frame.
    fn submit(&mut self, frame: Frame) -> Result<(), PsyflowError>;

    /// Shows the submitted frame. Blocks until the next refresh if the
    /// screen is synchronized to it.
    fn swap_buffers(&mut self) -> Result<(), PsyflowError>;

    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

downcast_rs::impl_downcast!(Screen);

/// Something that happened on a screen, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenEvent {
    Clear { screen: String },
    Submit { screen: String, commands: usize },
    Swap { screen: String },
    Close { screen: String },
}

/// Shared event log for one or more screens.
#[derive(Debug, Clone, Default)]
pub struct ScreenRecorder(Arc<Mutex<Vec<ScreenEvent>>>);

impl ScreenRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: ScreenEvent) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }

    pub fn events(&self) -> Vec<ScreenEvent> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// How a headless screen waits for the next refresh.
#[derive(Debug, Clone)]
pub enum VsyncMode {
    /// Don't wait.
    Off,
    /// Move a simulated clock to the next refresh.
    Simulated(SimulatedClock),
    /// Sleep on the system clock until the next refresh.
    Sleep,
}

/// A screen without a window. Frames are kept in memory.
#[derive(Dbg)]
pub struct HeadlessScreen {
    name: String,
    parameters: SharedParameters,
    vsync: VsyncMode,
    swaps: u64,
    // value of the simulated clock when the screen was created
    clock_origin_sec: f64,
    next_deadline: Option<Instant>,
    #[dbg(placeholder = "...")]
    sleeper: spin_sleep::SpinSleeper,
    pending: Option<Frame>,
    last_presented: Option<Frame>,
    recorder: Option<ScreenRecorder>,
    fail_next_swap: bool,
    closed: bool,
}

impl HeadlessScreen {
    /// Parameters: `bgcolor` (RGB or RGBA), and the constants `size`,
    /// `refresh_rate_hz` and `sync_swap`.
    pub fn parameter_definitions() -> Vec<ParameterDefinition> {
        vec![
            ParameterDefinition::new("bgcolor", [0.5, 0.5, 0.5], Rgba::type_tag()).description("background color"),
            ParameterDefinition::new("size", [640.0, 480.0], TypeTag::Sequence(Some(2)))
                .constant()
                .description("size in pixels"),
            ParameterDefinition::new("refresh_rate_hz", 60.0, TypeTag::Real)
                .constant()
                .description("nominal refresh rate"),
            ParameterDefinition::new("sync_swap", true, TypeTag::Boolean)
                .constant()
                .description("wait for the next refresh on every swap"),
        ]
    }

    pub fn new(name: &str, vsync: VsyncMode) -> Result<Self, PsyflowError> {
        Self::with_values(name, vsync, Vec::<(&str, ParameterValue)>::new())
    }

    /// Creates a screen, overriding parameter defaults (including constants).
    pub fn with_values<S: AsRef<str>>(
        name: &str,
        vsync: VsyncMode,
        values: impl IntoIterator<Item = (S, ParameterValue)>,
    ) -> Result<Self, PsyflowError> {
        let parameters = Parameters::with_values(Self::parameter_definitions(), values)?;
        let refresh = parameters.get_f64("refresh_rate_hz")?;
        if !(refresh > 0.0) {
            return Err(PsyflowError::validation("refresh_rate_hz", "must be positive"));
        }
        let clock_origin_sec = match &vsync {
            VsyncMode::Simulated(clock) => clock.now_sec(),
            _ => 0.0,
        };
        log::debug!("created headless screen \"{}\" at {} Hz", name, refresh);
        Ok(Self {
            name: name.to_string(),
            parameters: parameters.into(),
            vsync,
            swaps: 0,
            clock_origin_sec,
            next_deadline: None,
            sleeper: spin_sleep::SpinSleeper::new(1_000_000).with_spin_strategy(spin_sleep::SpinStrategy::YieldThread),
            pending: None,
            last_presented: None,
            recorder: None,
            fail_next_swap: false,
            closed: false,
        })
    }

    pub fn with_recorder(mut self, recorder: ScreenRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Makes the next swap fail, as a lost display would.
    pub fn fail_next_swap(&mut self) {
        self.fail_next_swap = true;
    }

    pub fn swap_count(&self) -> u64 {
        self.swaps
    }

    /// The frame shown by the last swap.
    pub fn last_presented(&self) -> Option<&Frame> {
        self.last_presented.as_ref()
    }

    fn record(&self, event: ScreenEvent) {
        if let Some(recorder) = &self.recorder {
            recorder.push(event);
        }
    }

    fn ensure_open(&self) -> Result<(), PsyflowError> {
        if self.closed {
            Err(PsyflowError::StateError(format!("screen \"{}\" is closed", self.name)))
        } else {
            Ok(())
        }
    }

    fn wait_for_refresh(&mut self) -> Result<(), PsyflowError> {
        if !self.parameters.lock().get_bool("sync_swap")? {
            return Ok(());
        }
        let period = 1.0 / self.refresh_rate_hz();
        match &self.vsync {
            VsyncMode::Off => {}
            VsyncMode::Simulated(clock) => {
                // swaps of several screens at the same rate land on the same refresh
                let target = self.clock_origin_sec + self.swaps as f64 * period;
                if target > clock.now_sec() {
                    clock.set(target);
                }
            }
            VsyncMode::Sleep => {
                let now = Instant::now();
                let deadline = match self.next_deadline {
                    Some(deadline) if deadline > now => {
                        self.sleeper.sleep(deadline - now);
                        deadline
                    }
                    _ => now,
                };
                self.next_deadline = Some(deadline + Duration::from_secs_f64(period));
            }
        }
        Ok(())
    }
}

impl Screen for HeadlessScreen {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> SharedParameters {
        self.parameters.clone()
    }

    fn size(&self) -> [f64; 2] {
        let parameters = self.parameters.lock();
        parameters
            .get_sequence("size")
            .map(super::xy)
            .unwrap_or([0.0, 0.0])
    }

    fn refresh_rate_hz(&self) -> f64 {
        self.parameters.lock().get_f64("refresh_rate_hz").unwrap_or(60.0)
    }

    fn clear(&mut self) -> Result<Frame, PsyflowError> {
        self.ensure_open()?;
        let bg_color = Rgba::from_sequence(self.parameters.lock().get_sequence("bgcolor")?)?;
        self.record(ScreenEvent::Clear {
            screen: self.name.clone(),
        });
        Ok(Frame::new(bg_color))
    }

    fn submit(&mut self, frame: Frame) -> Result<(), PsyflowError> {
        self.ensure_open()?;
        self.record(ScreenEvent::Submit {
            screen: self.name.clone(),
            commands: frame.commands().len(),
        });
        self.pending = Some(frame);
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<(), PsyflowError> {
        self.ensure_open()?;
        if self.fail_next_swap {
            self.fail_next_swap = false;
            return Err(PsyflowError::IOError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("swap failed on screen \"{}\"", self.name),
            )));
        }
        self.swaps += 1;
        self.wait_for_refresh()?;
        if let Some(frame) = self.pending.take() {
            self.last_presented = Some(frame);
        }
        self.record(ScreenEvent::Swap {
            screen: self.name.clone(),
        });
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.pending = None;
            self.record(ScreenEvent::Close {
                screen: self.name.clone(),
            });
            log::debug!("closed headless screen \"{}\"", self.name);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_parameters_come_from_construction() {
        let screen = HeadlessScreen::with_values(
            "main",
            VsyncMode::Off,
            [("refresh_rate_hz", ParameterValue::Real(120.0))],
        )
        .unwrap();
        assert_eq!(screen.refresh_rate_hz(), 120.0);
        assert!(matches!(
            screen.parameters().set("size", [800.0, 600.0]),
            Err(PsyflowError::ImmutableError(_))
        ));
        assert!(screen.parameters().set("bgcolor", [0.0, 0.0, 0.0]).is_ok());
    }

    #[test]
    fn simulated_vsync_advances_the_clock_once_per_refresh() {
        let clock = SimulatedClock::new(0.0);
        let mut a = HeadlessScreen::new("a", VsyncMode::Simulated(clock.clone())).unwrap();
        let mut b = HeadlessScreen::new("b", VsyncMode::Simulated(clock.clone())).unwrap();
        for _ in 0..3 {
            a.swap_buffers().unwrap();
            b.swap_buffers().unwrap();
        }
        assert!((clock.now_sec() - 3.0 / 60.0).abs() < 1e-12);
    }

    #[test]
    fn swap_presents_the_submitted_frame() {
        let mut screen = HeadlessScreen::new("main", VsyncMode::Off).unwrap();
        let mut frame = screen.clear().unwrap();
        frame.draw_rect([0.0, 0.0], [1.0, 1.0], Rgba::new(1.0, 1.0, 1.0, 1.0));
        screen.submit(frame).unwrap();
        assert!(screen.last_presented().is_none());
        screen.swap_buffers().unwrap();
        assert_eq!(screen.last_presented().map(|f| f.commands().len()), Some(1));
        assert_eq!(screen.swap_count(), 1);
    }

    #[test]
    fn injected_failure_affects_one_swap() {
        let mut screen = HeadlessScreen::new("main", VsyncMode::Off).unwrap();
        screen.fail_next_swap();
        assert!(screen.swap_buffers().is_err());
        assert!(screen.swap_buffers().is_ok());
    }

    #[test]
    fn closed_screens_refuse_work() {
        let recorder = ScreenRecorder::new();
        let mut screen = HeadlessScreen::new("main", VsyncMode::Off).unwrap().with_recorder(recorder.clone());
        screen.close();
        screen.close();
        assert!(screen.clear().is_err());
        assert_eq!(
            recorder.events(),
            vec![ScreenEvent::Close {
                screen: "main".to_string()
            }]
        );
    }
}
