// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::utils::AtomicExt;

/// Requests to a running presentation. Clones share the same flags.
///
/// Flags are only looked at between ticks.
#[derive(Debug, Clone, Default)]
pub struct PresentationSignals {
    quit: Arc<AtomicBool>,
    enter_go_loop: Arc<AtomicBool>,
    abort_go: Arc<AtomicBool>,
}

impl PresentationSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ends `run_forever` and any running go loop.
    pub fn request_quit(&self) {
        self.quit.store_relaxed(true);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load_relaxed()
    }

    /// Makes `run_forever` start a go loop at the next tick boundary.
    pub fn request_go(&self) {
        self.enter_go_loop.store_relaxed(true);
    }

    /// Ends the running go loop at the next tick boundary.
    pub fn request_abort_go(&self) {
        self.abort_go.store_relaxed(true);
    }

    pub(crate) fn take_go_request(&self) -> bool {
        self.enter_go_loop.swap(false, Ordering::Relaxed)
    }

    pub(crate) fn take_abort_go(&self) -> bool {
        self.abort_go.swap(false, Ordering::Relaxed)
    }

    pub(crate) fn clear_abort_go(&self) {
        self.abort_go.store_relaxed(false);
    }

    pub(crate) fn clear_quit(&self) {
        self.quit.store_relaxed(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_consumed_once() {
        let signals = PresentationSignals::new();
        let remote = signals.clone();
        remote.request_go();
        assert!(signals.take_go_request());
        assert!(!signals.take_go_request());
        remote.request_quit();
        assert!(signals.quit_requested());
        assert!(signals.quit_requested());
    }
}
