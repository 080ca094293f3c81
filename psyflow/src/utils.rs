// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::atomic::Ordering;

pub use web_time as time;

pub(crate) trait AtomicExt<T> {
    fn load_relaxed(&self) -> T;
    fn store_relaxed(&self, value: T);
}

impl AtomicExt<f64> for atomic_float::AtomicF64 {
    fn load_relaxed(&self) -> f64 {
        self.load(Ordering::Relaxed)
    }

    fn store_relaxed(&self, value: f64) {
        self.store(value, Ordering::Relaxed);
    }
}

impl AtomicExt<bool> for std::sync::atomic::AtomicBool {
    fn load_relaxed(&self) -> bool {
        self.load(Ordering::Relaxed)
    }

    fn store_relaxed(&self, value: bool) {
        self.store(value, Ordering::Relaxed);
    }
}
