// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The frame-locked presentation loop.
//!
//! A [`Presentation`] moves through `IDLE -> BETWEEN_GO <-> GO -> IDLE`.
//! Every tick it
//!
//! 1. lets every controller commit staged changes,
//! 2. evaluates the controllers allowed in the current phase, in the order
//!    they were added, and writes their results into the bound parameters,
//! 3. draws the viewports of every open screen in the order they were added,
//! 4. swaps all screens, and only then
//! 5. advances its frame counters (and the frame timer during go loops).
//!
//! Entering a phase runs one extra evaluation pass for `TRANSITIONS` and
//! `ONCE` controllers.

use std::fmt;

use crate::controller::{check_type, Controller, EvalFlag, Phase, TimeBasis};
use crate::errors::PsyflowError;
use crate::frame_timer::FrameTimer;
use crate::options::{GoDuration, PresentationOptions};
use crate::parameters::{ParameterValue, SharedParameters, TypeTag};
use crate::visual::viewport::Viewport;

mod context;
mod signals;

pub use context::PresentationContext;
pub use signals::PresentationSignals;

// used for the time basis when no open screen reports a refresh rate
const FALLBACK_REFRESH_RATE_HZ: f64 = 60.0;

/// Identifies a controller added to a [`Presentation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(u64);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct Target {
    parameters: SharedParameters,
    name: String,
}

#[derive(Debug)]
struct Binding {
    id: ControllerId,
    target: Option<Target>,
    controller: Box<dyn Controller>,
    // value of a ONCE controller since it fired in the current phase
    once_value: Option<ParameterValue>,
}

impl Binding {
    fn apply(&mut self, basis: &TimeBasis) -> Result<ParameterValue, PsyflowError> {
        let masked = basis.masked(self.controller.temporal_variables());
        let value = self.controller.evaluate(&masked)?;
        self.write(value.clone())?;
        Ok(value)
    }

    fn write(&self, value: ParameterValue) -> Result<(), PsyflowError> {
        if let Some(target) = &self.target {
            let mut parameters = target.parameters.lock();
            check_type(&parameters.definition(&target.name)?.type_tag, &value.type_tag())?;
            parameters.set(&target.name, value)?;
        }
        Ok(())
    }
}

/// What happened during one go loop.
#[derive(Debug, Clone, PartialEq)]
pub struct GoSummary {
    /// Number of frames drawn.
    pub frames: u64,
    pub duration_sec: f64,
    /// `None` unless timing info was collected over at least two frames.
    pub mean_ifi_sec: Option<f64>,
    pub longest_ifi_sec: Option<f64>,
    pub frames_dropped: bool,
}

/// Drives controllers, viewports and screens frame by frame.
#[derive(Debug)]
pub struct Presentation {
    context: PresentationContext,
    // viewports with the index of the screen they draw on
    viewports: Vec<(usize, Viewport)>,
    bindings: Vec<Binding>,
    next_id: u64,
    options: PresentationOptions,
    signals: PresentationSignals,
    phase: Phase,
    frames_absolute: u64,
    frames_since_go: u64,
    go_start_sec: Option<f64>,
    last_go_start_sec: Option<f64>,
    frames_dropped_in_last_go: bool,
    last_frame_timer: Option<FrameTimer>,
}

impl Presentation {
    pub fn new(context: PresentationContext, options: PresentationOptions) -> Self {
        Self {
            context,
            viewports: Vec::new(),
            bindings: Vec::new(),
            next_id: 0,
            options,
            signals: PresentationSignals::new(),
            phase: Phase::Idle,
            frames_absolute: 0,
            frames_since_go: 0,
            go_start_sec: None,
            last_go_start_sec: None,
            frames_dropped_in_last_go: false,
            last_frame_timer: None,
        }
    }

    pub fn context(&self) -> &PresentationContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut PresentationContext {
        &mut self.context
    }

    pub fn options(&self) -> &PresentationOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut PresentationOptions {
        &mut self.options
    }

    /// A handle for quitting or triggering go loops from elsewhere.
    pub fn signals(&self) -> PresentationSignals {
        self.signals.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn frames_absolute(&self) -> u64 {
        self.frames_absolute
    }

    /// Adds a viewport to the screen with index `screen`. Viewports are
    /// drawn in the order they were added.
    pub fn add_viewport(&mut self, screen: usize, viewport: Viewport) -> Result<(), PsyflowError> {
        if self.context.screen(screen).is_none() {
            return Err(PsyflowError::ConfigError(format!("no screen with index {}", screen)));
        }
        self.viewports.push((screen, viewport));
        Ok(())
    }

    pub fn viewports(&self) -> impl Iterator<Item = &Viewport> {
        self.viewports.iter().map(|(_, v)| v)
    }

    /// Adds a controller writing into parameter `name` of `parameters`.
    ///
    /// Controllers without a target must return [`TypeTag::None`]; they are
    /// evaluated for their side effects only.
    pub fn add_controller(
        &mut self,
        target: Option<(SharedParameters, &str)>,
        controller: Box<dyn Controller>,
    ) -> Result<ControllerId, PsyflowError> {
        let target = match target {
            Some((parameters, name)) => {
                {
                    let guard = parameters.lock();
                    let definition = guard.definition(name)?;
                    if definition.constant {
                        return Err(PsyflowError::ImmutableError(name.to_string()));
                    }
                    check_type(&definition.type_tag, &controller.returns_type())?;
                }
                if self.bindings.iter().any(|b| {
                    b.target
                        .as_ref()
                        .is_some_and(|t| t.name == name && t.parameters.ptr_eq(&parameters))
                }) {
                    log::warn!("parameter \"{}\" is already controlled, both controllers will write to it", name);
                }
                Some(Target {
                    parameters,
                    name: name.to_string(),
                })
            }
            None => {
                if controller.returns_type() != TypeTag::None {
                    return Err(PsyflowError::ConfigError(format!(
                        "a controller returning {} needs a parameter to write to",
                        controller.returns_type()
                    )));
                }
                None
            }
        };

        let id = ControllerId(self.next_id);
        self.next_id += 1;
        log::debug!("adding controller {}: {}", id, controller.describe());
        self.bindings.push(Binding {
            id,
            target,
            controller,
            once_value: None,
        });
        Ok(id)
    }

    /// Removes a controller. The parameter it wrote to keeps its value.
    pub fn remove_controller(&mut self, id: ControllerId) -> Option<Box<dyn Controller>> {
        let index = self.bindings.iter().position(|b| b.id == id)?;
        Some(self.bindings.remove(index).controller)
    }

    /// Removes every controller writing into parameter `name` of
    /// `parameters` and returns how many were removed.
    pub fn remove_controllers_for(&mut self, parameters: &SharedParameters, name: &str) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|b| {
            !b.target
                .as_ref()
                .is_some_and(|t| t.name == name && t.parameters.ptr_eq(parameters))
        });
        before - self.bindings.len()
    }

    pub fn controller(&self, id: ControllerId) -> Option<&dyn Controller> {
        self.bindings
            .iter()
            .find(|b| b.id == id)
            .map(|b| b.controller.as_ref())
    }

    pub fn controller_mut(&mut self, id: ControllerId) -> Option<&mut (dyn Controller + 'static)> {
        self.bindings
            .iter_mut()
            .find(|b| b.id == id)
            .map(|b| b.controller.as_mut())
    }

    /// Ids of all controllers in evaluation order.
    pub fn controller_ids(&self) -> Vec<ControllerId> {
        self.bindings.iter().map(|b| b.id).collect()
    }

    /// Runs one go loop and returns to the between-go phase.
    ///
    /// Starting from `IDLE` the between-go phase is entered first.
    pub fn go(&mut self) -> Result<GoSummary, PsyflowError> {
        if self.phase == Phase::Go {
            return Err(PsyflowError::StateError("already in a go loop".to_string()));
        }
        if self.phase == Phase::Idle {
            self.enter_phase(Phase::BetweenGo).map_err(|e| self.halt(e))?;
        }

        self.signals.clear_abort_go();
        self.frames_since_go = 0;
        let start = self.current_time_abs_sec();
        self.go_start_sec = Some(start);
        self.last_go_start_sec = Some(start);
        log::debug!("go loop starting at {:.4} sec", start);

        let summary = match self.run_go_loop(start) {
            Ok(summary) => summary,
            Err(e) => return Err(self.halt(e)),
        };
        self.go_start_sec = None;
        self.enter_phase(Phase::BetweenGo).map_err(|e| self.halt(e))?;
        Ok(summary)
    }

    fn run_go_loop(&mut self, start: f64) -> Result<GoSummary, PsyflowError> {
        self.enter_phase(Phase::Go)?;
        let mut timer = if self.options.collect_timing_info {
            Some(FrameTimer::with_clock(self.options.frame_timer, self.context.clock())?)
        } else {
            None
        };

        loop {
            if self.signals.quit_requested() || self.signals.take_abort_go() {
                log::info!("go loop aborted after {} frames", self.frames_since_go);
                break;
            }
            let done = match self.options.go_duration {
                GoDuration::Seconds(duration) => self.current_time_abs_sec() - start >= duration,
                GoDuration::Frames(frames) => self.frames_since_go >= frames,
                GoDuration::Forever => false,
            };
            if done {
                break;
            }
            self.tick()?;
            if let Some(timer) = timer.as_mut() {
                timer.tick();
            }
        }

        let frames = self.frames_since_go;
        let duration_sec = self.current_time_abs_sec() - start;
        let mut summary = GoSummary {
            frames,
            duration_sec,
            mean_ifi_sec: None,
            longest_ifi_sec: None,
            frames_dropped: false,
        };
        if let Some(timer) = &timer {
            summary.mean_ifi_sec = timer.average_ifi_sec().ok();
            summary.longest_ifi_sec = timer.longest_frame_duration_sec();
            summary.frames_dropped = self.check_timing(timer);
            timer.log_histogram();
        }
        self.frames_dropped_in_last_go = summary.frames_dropped;
        self.last_frame_timer = timer;
        log::info!("go loop done: {} frames in {:.3} sec", frames, duration_sec);
        Ok(summary)
    }

    // logs timing problems and returns true if frames were dropped
    fn check_timing(&self, timer: &FrameTimer) -> bool {
        let Some(refresh_rate) = self.context.nominal_refresh_rate_hz() else {
            return false;
        };
        let period = 1.0 / refresh_rate;
        let mut dropped = false;
        if let Some(longest) = timer.longest_frame_duration_sec() {
            if longest > self.options.warn_longest_frame_threshold * period {
                log::warn!(
                    "One or more frames took {:.1} msec, which is significantly longer than the expected inter frame \
                     interval of {:.1} msec. Is the display synchronized to the vertical refresh?",
                    longest * 1000.0,
                    period * 1000.0
                );
                dropped = true;
            }
        }
        if let Ok(mean) = timer.average_ifi_sec() {
            let fps = 1.0 / mean;
            if ((fps - refresh_rate) / refresh_rate).abs() > self.options.warn_mean_fps_threshold {
                log::warn!(
                    "Calculated frames per second was {:.3}, while the nominal refresh rate is {:.3}.",
                    fps,
                    refresh_rate
                );
            }
        }
        dropped
    }

    /// Runs a single between-go tick, entering the between-go phase first if
    /// the presentation is idle.
    pub fn between_presentations(&mut self) -> Result<(), PsyflowError> {
        match self.phase {
            Phase::Go => return Err(PsyflowError::StateError("inside a go loop".to_string())),
            Phase::Idle => self.enter_phase(Phase::BetweenGo).map_err(|e| self.halt(e))?,
            Phase::BetweenGo => {}
        }
        self.tick().map_err(|e| self.halt(e))
    }

    /// Runs between-go ticks until quit is requested, starting a go loop
    /// whenever one is requested through the signals. Returns to `IDLE`.
    pub fn run_forever(&mut self) -> Result<(), PsyflowError> {
        log::info!("presentation running until quit");
        while !self.signals.quit_requested() {
            if self.signals.take_go_request() {
                self.go()?;
            } else {
                self.between_presentations()?;
            }
        }
        self.signals.clear_quit();
        self.stop();
        Ok(())
    }

    /// Returns to `IDLE`. Screens stay open.
    pub fn stop(&mut self) {
        if self.phase != Phase::Idle {
            log::debug!("presentation stopped after {} frames", self.frames_absolute);
        }
        self.phase = Phase::Idle;
        self.go_start_sec = None;
    }

    pub fn were_frames_dropped_in_last_go_loop(&self) -> bool {
        self.frames_dropped_in_last_go
    }

    pub fn last_go_loop_start_time_abs_sec(&self) -> Option<f64> {
        self.last_go_start_sec
    }

    /// Timer of the last go loop, if timing info was collected.
    pub fn last_frame_timer(&self) -> Option<&FrameTimer> {
        self.last_frame_timer.as_ref()
    }

    fn halt(&mut self, error: PsyflowError) -> PsyflowError {
        log::error!("presentation halted: {}", error);
        self.stop();
        error
    }

    fn frame_period_sec(&self) -> f64 {
        1.0 / self
            .context
            .nominal_refresh_rate_hz()
            .unwrap_or(FALLBACK_REFRESH_RATE_HZ)
    }

    fn current_time_abs_sec(&self) -> f64 {
        if self.options.override_t_abs {
            self.frames_absolute as f64 * self.frame_period_sec()
        } else {
            self.context.now_sec()
        }
    }

    fn time_basis(&self) -> TimeBasis {
        let t_abs = self.current_time_abs_sec();
        let t = self.go_start_sec.map(|start| t_abs - start).unwrap_or(0.0);
        TimeBasis::new(self.phase, t_abs, t, self.frames_absolute, self.frames_since_go)
    }

    fn enter_phase(&mut self, phase: Phase) -> Result<(), PsyflowError> {
        log::debug!("entering {}", phase);
        self.phase = phase;
        for binding in self.bindings.iter_mut() {
            binding.once_value = None;
            binding.controller.on_tick_boundary();
        }
        let basis = self.time_basis();
        self.evaluate_pass(&basis, true)
    }

    fn tick(&mut self) -> Result<(), PsyflowError> {
        for binding in self.bindings.iter_mut() {
            if binding.controller.on_tick_boundary() {
                binding.once_value = None;
            }
        }
        let basis = self.time_basis();
        self.evaluate_pass(&basis, false)?;
        self.draw_and_swap()?;
        self.frames_absolute += 1;
        if self.phase == Phase::Go {
            self.frames_since_go += 1;
        }
        Ok(())
    }

    fn evaluate_pass(&mut self, basis: &TimeBasis, on_entry: bool) -> Result<(), PsyflowError> {
        let strict = self.options.strict;
        for binding in self.bindings.iter_mut() {
            let eval_frequency = binding.controller.eval_frequency();
            if !eval_frequency.runs_in(basis.phase) {
                continue;
            }
            let once = eval_frequency.contains(EvalFlag::Once);
            let due = if on_entry {
                eval_frequency.fires_on_entry()
            } else {
                eval_frequency.contains(EvalFlag::EveryFrame) || (once && binding.once_value.is_none())
            };
            let result = if due {
                binding.apply(basis).map(|value| {
                    if once {
                        binding.once_value = Some(value);
                    }
                })
            } else if let Some(value) = binding.once_value.clone() {
                // a fired ONCE controller keeps its value in place
                binding.write(value)
            } else {
                continue;
            };
            match result {
                Ok(()) => {}
                Err(e) if strict => return Err(e),
                Err(e) => log::warn!("controller {} skipped: {}", binding.id, e),
            }
        }
        Ok(())
    }

    fn draw_and_swap(&mut self) -> Result<(), PsyflowError> {
        let Self {
            context, viewports, ..
        } = self;
        for (index, screen) in context.screens.iter_mut().enumerate() {
            if screen.is_closed() {
                continue;
            }
            let mut frame = screen.clear()?;
            for (_, viewport) in viewports.iter_mut().filter(|(s, _)| *s == index) {
                viewport.draw(&mut frame)?;
            }
            screen.submit(frame)?;
        }
        // every screen has its frame before the first one flips
        for screen in context.screens.iter_mut().filter(|s| !s.is_closed()) {
            screen.swap_buffers()?;
        }
        Ok(())
    }
}
