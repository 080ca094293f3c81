// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Time sources for the presentation loop.

use std::sync::Arc;

use atomic_float::AtomicF64;

use crate::utils::{time::Instant, AtomicExt};

/// A monotonic time source, in seconds since an arbitrary origin.
pub trait Clock: std::fmt::Debug + Send + Sync {
    fn now_sec(&self) -> f64;
}

/// Wall clock time.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_sec(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to. Headless screens advance it by one
/// refresh period per buffer swap, which makes whole presentations
/// reproducible.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock(Arc<AtomicF64>);

impl SimulatedClock {
    pub fn new(start_sec: f64) -> Self {
        Self(Arc::new(AtomicF64::new(start_sec)))
    }

    pub fn advance(&self, dt_sec: f64) {
        self.0.store_relaxed(self.0.load_relaxed() + dt_sec);
    }

    pub fn set(&self, t_sec: f64) {
        self.0.store_relaxed(t_sec);
    }
}

impl Clock for SimulatedClock {
    fn now_sec(&self) -> f64 {
        self.0.load_relaxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_clock_is_shared_between_clones() {
        let clock = SimulatedClock::new(1.0);
        let other = clock.clone();
        other.advance(0.5);
        assert_eq!(clock.now_sec(), 1.5);
        clock.set(0.0);
        assert_eq!(other.now_sec(), 0.0);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_sec();
        let b = clock.now_sec();
        assert!(b >= a);
    }
}
