// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::PsyflowError;

/// How long a go loop lasts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GoDuration {
    /// Until at least this many seconds have passed since go started.
    Seconds(f64),
    /// Exactly this many frames.
    Frames(u64),
    /// Until the go loop is aborted through its signals.
    Forever,
}

/// Options for a presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentationOptions {
    /// Length of each go loop.
    pub go_duration: GoDuration,

    /// Propagate controller errors and stop the presentation instead of
    /// logging them and skipping the controller for that tick.
    pub strict: bool,

    /// Time every go loop with a [`crate::frame_timer::FrameTimer`] and log
    /// its histogram afterwards.
    pub collect_timing_info: bool,

    /// Warn if the mean frame rate of a go loop deviates from the nominal
    /// refresh rate by more than this fraction.
    pub warn_mean_fps_threshold: f64,

    /// Report dropped frames if the longest inter-frame interval exceeds
    /// this multiple of the nominal frame period.
    pub warn_longest_frame_threshold: f64,

    /// Derive absolute time from the frame count at the nominal refresh rate
    /// instead of reading the clock. Useful for rendering offline where every
    /// frame must advance time by exactly one period.
    pub override_t_abs: bool,

    /// Histogram settings for the frame timer.
    pub frame_timer: FrameTimerOptions,
}

impl Default for PresentationOptions {
    fn default() -> Self {
        Self {
            go_duration: GoDuration::Seconds(5.0),
            strict: false,
            collect_timing_info: true,
            warn_mean_fps_threshold: 0.01,
            warn_longest_frame_threshold: 2.0,
            override_t_abs: false,
            frame_timer: FrameTimerOptions::default(),
        }
    }
}

impl PresentationOptions {
    /// Defaults overridden by `PSYFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, PsyflowError> {
        Self::from_vars(std::env::vars())
    }

    /// Defaults overridden by the given `PSYFLOW_*` variables. Unknown
    /// variables are ignored.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `PSYFLOW_GO_DURATION_SEC` | `go_duration = Seconds(..)` |
    /// | `PSYFLOW_GO_DURATION_FRAMES` | `go_duration = Frames(..)` |
    /// | `PSYFLOW_STRICT` | `strict` |
    /// | `PSYFLOW_COLLECT_TIMING_INFO` | `collect_timing_info` |
    /// | `PSYFLOW_WARN_MEAN_FPS_THRESHOLD` | `warn_mean_fps_threshold` |
    /// | `PSYFLOW_WARN_LONGEST_FRAME_THRESHOLD` | `warn_longest_frame_threshold` |
    /// | `PSYFLOW_OVERRIDE_T_ABS` | `override_t_abs` |
    /// | `PSYFLOW_SAVE_ALL_FRAMETIMES` | `frame_timer.save_all_frametimes` |
    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Result<Self, PsyflowError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "PSYFLOW_GO_DURATION_SEC" => options.go_duration = GoDuration::Seconds(parse(key, value)?),
                "PSYFLOW_GO_DURATION_FRAMES" => options.go_duration = GoDuration::Frames(parse(key, value)?),
                "PSYFLOW_STRICT" => options.strict = parse_flag(key, value)?,
                "PSYFLOW_COLLECT_TIMING_INFO" => options.collect_timing_info = parse_flag(key, value)?,
                "PSYFLOW_WARN_MEAN_FPS_THRESHOLD" => options.warn_mean_fps_threshold = parse(key, value)?,
                "PSYFLOW_WARN_LONGEST_FRAME_THRESHOLD" => options.warn_longest_frame_threshold = parse(key, value)?,
                "PSYFLOW_OVERRIDE_T_ABS" => options.override_t_abs = parse_flag(key, value)?,
                "PSYFLOW_SAVE_ALL_FRAMETIMES" => options.frame_timer.save_all_frametimes = parse_flag(key, value)?,
                _ => continue,
            }
            log::debug!("{} = {} (from environment)", key, value);
        }
        Ok(options)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, PsyflowError> {
    value
        .parse()
        .map_err(|_| PsyflowError::ConfigError(format!("cannot parse {}=\"{}\"", key, value)))
}

// accepts 0/1 as well as true/false
fn parse_flag(key: &str, value: &str) -> Result<bool, PsyflowError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PsyflowError::ConfigError(format!("cannot parse {}=\"{}\"", key, value))),
    }
}

/// Histogram layout of a [`crate::frame_timer::FrameTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameTimerOptions {
    pub bin_start_msec: f64,
    pub bin_stop_msec: f64,
    pub bin_width_msec: f64,
    /// Number of timestamps kept for the running average; 0 disables it.
    pub running_average_num_frames: usize,
    /// Keep every timestamp so it can be exported later.
    pub save_all_frametimes: bool,
}

impl Default for FrameTimerOptions {
    fn default() -> Self {
        Self {
            bin_start_msec: 2.0,
            bin_stop_msec: 28.0,
            bin_width_msec: 2.0,
            running_average_num_frames: 0,
            save_all_frametimes: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_overrides_defaults() {
        let options = PresentationOptions::from_vars([
            ("PSYFLOW_GO_DURATION_FRAMES", "120"),
            ("PSYFLOW_STRICT", "1"),
            ("PSYFLOW_SAVE_ALL_FRAMETIMES", "true"),
            ("HOME", "/root"),
        ])
        .unwrap();
        assert_eq!(options.go_duration, GoDuration::Frames(120));
        assert!(options.strict);
        assert!(options.frame_timer.save_all_frametimes);
        assert!(options.collect_timing_info);
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let err = PresentationOptions::from_vars([("PSYFLOW_STRICT", "maybe")]).unwrap_err();
        assert!(matches!(err, PsyflowError::ConfigError(_)));
        assert!(PresentationOptions::from_vars([("PSYFLOW_GO_DURATION_SEC", "five")]).is_err());
    }
}
