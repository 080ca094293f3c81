// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::visual::screen::Screen;

/// Everything a presentation draws on, and the clock it reads.
#[derive(Debug)]
pub struct PresentationContext {
    pub(crate) screens: Vec<Box<dyn Screen>>,
    clock: Arc<dyn Clock>,
}

impl PresentationContext {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            screens: Vec::new(),
            clock,
        }
    }

    /// A context reading the system clock.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }

    /// Adds a screen and returns its index.
    pub fn add_screen(&mut self, screen: Box<dyn Screen>) -> usize {
        log::debug!("adding screen \"{}\"", screen.name());
        self.screens.push(screen);
        self.screens.len() - 1
    }

    pub fn with_screen(mut self, screen: impl Screen + 'static) -> Self {
        self.add_screen(Box::new(screen));
        self
    }

    pub fn screens(&self) -> &[Box<dyn Screen>] {
        &self.screens
    }

    pub fn screen(&self, index: usize) -> Option<&dyn Screen> {
        self.screens.get(index).map(|s| s.as_ref())
    }

    pub fn screen_mut(&mut self, index: usize) -> Option<&mut (dyn Screen + 'static)> {
        self.screens.get_mut(index).map(|s| s.as_mut())
    }

    /// Looks up a screen and downcasts it to its concrete type.
    pub fn screen_as<S: Screen>(&self, index: usize) -> Option<&S> {
        self.screens.get(index).and_then(|s| (**s).downcast_ref::<S>())
    }

    pub fn screen_as_mut<S: Screen>(&mut self, index: usize) -> Option<&mut S> {
        self.screens.get_mut(index).and_then(|s| (**s).downcast_mut::<S>())
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn now_sec(&self) -> f64 {
        self.clock.now_sec()
    }

    /// Refresh rate of the first open screen.
    pub fn nominal_refresh_rate_hz(&self) -> Option<f64> {
        self.screens
            .iter()
            .find(|s| !s.is_closed())
            .map(|s| s.refresh_rate_hz())
    }

    pub fn close_all(&mut self) {
        for screen in self.screens.iter_mut() {
            screen.close();
        }
    }
}
