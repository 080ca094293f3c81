// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Inter-frame interval statistics.
//!
//! A [`FrameTimer`] only observes. The presentation loop calls
//! [`FrameTimer::tick`] after every buffer swap; the timer never feeds
//! anything back into scheduling.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::errors::PsyflowError;
use crate::options::FrameTimerOptions;

/// Histogram of inter-frame intervals.
///
/// Bucket `i` covers `[lower_i, lower_i + width)` msec where
/// `lower_i = bin_start - width + i * width`. Intervals below the first
/// bucket are counted in it; intervals beyond the last bucket are counted in
/// the last one, which therefore reads as "this value or longer".
#[derive(Debug)]
pub struct FrameTimer {
    options: FrameTimerOptions,
    lower_edges_msec: Vec<f64>,
    histogram: Vec<u64>,
    first_tick_sec: Option<f64>,
    last_tick_sec: Option<f64>,
    longest_frame_sec: Option<f64>,
    total_frames: u64,
    recent_ticks_sec: VecDeque<f64>,
    all_frametimes_sec: Vec<f64>,
    clock: Arc<dyn Clock>,
}

impl FrameTimer {
    /// Creates a timer reading the system clock.
    pub fn new(options: FrameTimerOptions) -> Result<Self, PsyflowError> {
        Self::with_clock(options, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(options: FrameTimerOptions, clock: Arc<dyn Clock>) -> Result<Self, PsyflowError> {
        let FrameTimerOptions {
            bin_start_msec: start,
            bin_stop_msec: stop,
            bin_width_msec: width,
            ..
        } = options;
        if !(width > 0.0) || !(stop > start) {
            return Err(PsyflowError::ConfigError(format!(
                "invalid histogram bins: start {} msec, stop {} msec, width {} msec",
                start, stop, width
            )));
        }
        let count = ((stop - start) / width).ceil() as usize;
        let lower_edges_msec = (0..count).map(|i| start - width + i as f64 * width).collect();

        Ok(Self {
            options,
            lower_edges_msec,
            histogram: vec![0; count],
            first_tick_sec: None,
            last_tick_sec: None,
            longest_frame_sec: None,
            total_frames: 0,
            recent_ticks_sec: VecDeque::with_capacity(options.running_average_num_frames + 1),
            all_frametimes_sec: Vec::new(),
            clock,
        })
    }

    /// Declares that a frame has just been drawn.
    pub fn tick(&mut self) {
        let now = self.clock.now_sec();
        self.tick_at(now);
    }

    /// Declares that a frame was drawn at `timestamp_sec`, for frames
    /// timestamped elsewhere (e.g. by the display driver).
    pub fn tick_at(&mut self, timestamp_sec: f64) {
        if let Some(last) = self.last_tick_sec {
            let interval = timestamp_sec - last;
            let index = self.bucket_index(interval * 1000.0);
            self.histogram[index] += 1;
            self.longest_frame_sec = Some(self.longest_frame_sec.map_or(interval, |l| l.max(interval)));
        } else {
            self.first_tick_sec = Some(timestamp_sec);
        }
        self.last_tick_sec = Some(timestamp_sec);
        self.total_frames += 1;

        let window = self.options.running_average_num_frames;
        if window > 0 {
            self.recent_ticks_sec.push_back(timestamp_sec);
            while self.recent_ticks_sec.len() > window {
                self.recent_ticks_sec.pop_front();
            }
        }
        if self.options.save_all_frametimes {
            self.all_frametimes_sec.push(timestamp_sec);
        }
    }

    fn bucket_index(&self, interval_msec: f64) -> usize {
        let first_edge = self.lower_edges_msec[0];
        let position = ((interval_msec - first_edge) / self.options.bin_width_msec).floor();
        if position <= 0.0 || position.is_nan() {
            0
        } else {
            (position as usize).min(self.histogram.len() - 1)
        }
    }

    /// Mean inter-frame interval over all ticks.
    pub fn average_ifi_sec(&self) -> Result<f64, PsyflowError> {
        let intervals: u64 = self.histogram.iter().sum();
        match (self.first_tick_sec, self.last_tick_sec) {
            (Some(first), Some(last)) if intervals > 0 => Ok((last - first) / intervals as f64),
            _ => Err(PsyflowError::StateError(
                "fewer than 2 frames were timed, can't calculate average IFI".to_string(),
            )),
        }
    }

    /// Mean inter-frame interval over the last `running_average_num_frames`
    /// ticks, `None` until two ticks are in the window.
    pub fn running_average_ifi_sec(&self) -> Result<Option<f64>, PsyflowError> {
        if self.options.running_average_num_frames == 0 {
            return Err(PsyflowError::ConfigError(
                "running_average_num_frames not set when creating the frame timer".to_string(),
            ));
        }
        let ticks = &self.recent_ticks_sec;
        match (ticks.front(), ticks.back()) {
            (Some(first), Some(last)) if ticks.len() >= 2 => Ok(Some((last - first) / (ticks.len() - 1) as f64)),
            _ => Ok(None),
        }
    }

    pub fn longest_frame_duration_sec(&self) -> Option<f64> {
        self.longest_frame_sec
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn histogram(&self) -> &[u64] {
        &self.histogram
    }

    /// Lower edge of every bucket, in msec.
    pub fn bins(&self) -> &[f64] {
        &self.lower_edges_msec
    }

    pub fn all_frametimes(&self) -> Result<&[f64], PsyflowError> {
        if self.options.save_all_frametimes {
            Ok(&self.all_frametimes_sec)
        } else {
            Err(PsyflowError::ConfigError("must set save_all_frametimes".to_string()))
        }
    }

    /// Writes every saved timestamp with its preceding interval as CSV.
    pub fn write_frametimes_csv(&self, path: impl AsRef<Path>) -> Result<(), PsyflowError> {
        let frametimes = self.all_frametimes()?;
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["frame", "timestamp_sec", "ifi_sec"])?;
        let mut previous: Option<f64> = None;
        for (frame, timestamp) in frametimes.iter().enumerate() {
            let ifi = previous.map(|p| (timestamp - p).to_string()).unwrap_or_default();
            writer.write_record([frame.to_string(), timestamp.to_string(), ifi])?;
            previous = Some(*timestamp);
        }
        writer.flush()?;
        Ok(())
    }

    /// Renders the histogram as a text bar chart.
    pub fn histogram_report(&self) -> String {
        let mut out = String::new();
        let average_ifi = match self.average_ifi_sec() {
            Ok(ifi) => ifi,
            Err(_) => {
                let _ = writeln!(out, "{} frames were drawn.", self.total_frames);
                return out;
            }
        };
        let longest = self.longest_frame_sec.unwrap_or(0.0);
        let _ = writeln!(out, "{} frames were drawn.", self.total_frames);
        let _ = writeln!(
            out,
            "Mean IFI was {:.2} msec ({:.2} fps), longest IFI was {:.2} msec.",
            average_ifi * 1000.0,
            1.0 / average_ifi,
            longest * 1000.0
        );

        let max_count = self.histogram.iter().copied().max().unwrap_or(0) as f64;
        let lines = (max_count.ceil() as usize).min(10);
        let _ = writeln!(out, "histogram:");
        for line in 0..lines {
            let level = (lines - 1 - line) as f64;
            let _ = write!(out, "{:6}   ", (max_count * level / lines as f64).round() as u64);
            for count in &self.histogram {
                let scaled = *count as f64 / max_count * lines as f64;
                let _ = write!(out, "{:>4} ", if scaled > level { "*" } else { " " });
            }
            let _ = writeln!(out);
        }
        let _ = write!(out, " Time: ");
        for edge in &self.lower_edges_msec {
            let _ = write!(out, "{:4} ", edge.round() as i64);
        }
        let _ = writeln!(out, "+(msec)");
        let _ = write!(out, "Total:    ");
        for count in &self.histogram {
            if *count <= 999 {
                let _ = write!(out, "{:^5}", count);
            } else {
                let _ = write!(out, " +++ ");
            }
        }
        let _ = writeln!(out);
        out
    }

    /// Sends the histogram to the log.
    pub fn log_histogram(&self) {
        log::info!("\n{}", self.histogram_report());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;

    fn timer(options: FrameTimerOptions) -> FrameTimer {
        FrameTimer::with_clock(options, Arc::new(SimulatedClock::default())).unwrap()
    }

    #[test]
    fn default_layout_has_thirteen_buckets() {
        let t = timer(FrameTimerOptions::default());
        assert_eq!(t.histogram().len(), 13);
        assert_eq!(t.bins()[0], 0.0);
        assert_eq!(t.bins()[12], 24.0);
    }

    #[test]
    fn constant_sixty_hz_lands_in_one_bucket() {
        let mut t = timer(FrameTimerOptions::default());
        for i in 0..60 {
            t.tick_at(i as f64 * 0.016667);
        }
        assert!((t.average_ifi_sec().unwrap() - 0.016667).abs() < 1e-9);
        assert_eq!(t.histogram()[8], 59);
        assert_eq!(t.histogram().iter().sum::<u64>(), 59);
        assert_eq!(t.total_frames(), 60);
    }

    #[test]
    fn long_and_short_intervals_are_clamped() {
        let mut t = timer(FrameTimerOptions::default());
        t.tick_at(0.0);
        t.tick_at(0.5);
        t.tick_at(0.5);
        assert_eq!(t.histogram()[12], 1);
        assert_eq!(t.histogram()[0], 1);
        assert_eq!(t.longest_frame_duration_sec(), Some(0.5));
    }

    #[test]
    fn average_needs_two_ticks() {
        let mut t = timer(FrameTimerOptions::default());
        assert!(matches!(t.average_ifi_sec(), Err(PsyflowError::StateError(_))));
        t.tick_at(1.0);
        assert!(t.average_ifi_sec().is_err());
    }

    #[test]
    fn running_average_requires_configuration() {
        let t = timer(FrameTimerOptions::default());
        assert!(matches!(t.running_average_ifi_sec(), Err(PsyflowError::ConfigError(_))));

        let mut t = timer(FrameTimerOptions {
            running_average_num_frames: 3,
            ..Default::default()
        });
        t.tick_at(0.0);
        assert_eq!(t.running_average_ifi_sec().unwrap(), None);
        for ts in [0.01, 0.02, 0.04, 0.06] {
            t.tick_at(ts);
        }
        let avg = t.running_average_ifi_sec().unwrap().unwrap();
        assert!((avg - 0.02).abs() < 1e-12);
    }

    #[test]
    fn frametimes_are_only_kept_on_request() {
        let t = timer(FrameTimerOptions::default());
        assert!(t.all_frametimes().is_err());

        let mut t = timer(FrameTimerOptions {
            save_all_frametimes: true,
            ..Default::default()
        });
        t.tick_at(0.0);
        t.tick_at(0.016);
        assert_eq!(t.all_frametimes().unwrap(), &[0.0, 0.016]);
    }

    #[test]
    fn writes_frametimes_as_csv() {
        let mut t = timer(FrameTimerOptions {
            save_all_frametimes: true,
            ..Default::default()
        });
        t.tick_at(0.0);
        t.tick_at(0.5);
        let path = std::env::temp_dir().join(format!("psyflow-frametimes-{}.csv", uuid::Uuid::new_v4()));
        t.write_frametimes_csv(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(written, "frame,timestamp_sec,ifi_sec\n0,0,\n1,0.5,0.5\n");
    }

    #[test]
    fn tick_reads_the_clock() {
        let clock = SimulatedClock::new(0.0);
        let mut t = FrameTimer::with_clock(FrameTimerOptions::default(), Arc::new(clock.clone())).unwrap();
        t.tick();
        clock.advance(0.011);
        t.tick();
        assert_eq!(t.histogram()[5], 1);
    }

    #[test]
    fn report_mentions_frame_count() {
        let mut t = timer(FrameTimerOptions::default());
        for i in 0..10 {
            t.tick_at(i as f64 * 0.016667);
        }
        let report = t.histogram_report();
        assert!(report.starts_with("10 frames were drawn."));
        assert!(report.contains("+(msec)"));
    }

    #[test]
    fn rejects_empty_layout() {
        let options = FrameTimerOptions {
            bin_width_msec: 0.0,
            ..Default::default()
        };
        assert!(FrameTimer::new(options).is_err());
    }
}
