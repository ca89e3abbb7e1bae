// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::VecDeque;
use std::time::Instant;

use tracing::debug;

use super::timing::CLOCK_PULSES_PER_QUARTER;

/// Smoothing parameters for the external clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockConfig {
    /// Number of pulse intervals averaged.
    pub window: usize,
    /// Largest accepted relative deviation of an interval from the average.
    pub tolerance: f64,
    /// Consecutive rejected pulses after which the window is discarded.
    pub max_rejections: usize,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            window: 24,
            tolerance: 0.25,
            max_rejections: 4,
        }
    }
}

/// Intervals needed before a tempo is reported.
const MIN_INTERVALS: usize = 6;

/// Derives a tempo from 24 PPQN clock pulses.
#[derive(Debug)]
pub struct ExternalClock {
    config: ClockConfig,
    last_pulse: Option<Instant>,
    intervals: VecDeque<f64>,
    rejections: usize,
}

impl ExternalClock {
    pub fn new(config: ClockConfig) -> ExternalClock {
        let window = config.window.max(MIN_INTERVALS);
        ExternalClock {
            config: ClockConfig { window, ..config },
            last_pulse: None,
            intervals: VecDeque::with_capacity(window),
            rejections: 0,
        }
    }

    /// Forgets every pulse seen so far.
    pub fn reset(&mut self) {
        self.last_pulse = None;
        self.intervals.clear();
        self.rejections = 0;
    }

    /// Records a pulse. Returns the smoothed tempo once enough pulses have
    /// been accepted, or `None` while warming up or when the pulse was
    /// rejected as jitter.
    pub fn pulse(&mut self, at: Instant) -> Option<f64> {
        let last = self.last_pulse.replace(at)?;
        let interval = at.saturating_duration_since(last).as_secs_f64();
        if interval <= 0.0 {
            return None;
        }

        if self.intervals.len() >= MIN_INTERVALS {
            let average = self.average();
            let deviation = (interval - average).abs() / average;
            if deviation > self.config.tolerance {
                self.rejections += 1;
                if self.rejections < self.config.max_rejections {
                    return None;
                }
                debug!(
                    rejections = self.rejections,
                    interval, "Clock pulses keep deviating, resetting tempo window"
                );
                self.intervals.clear();
                self.rejections = 0;
            }
        }

        self.rejections = 0;
        if self.intervals.len() == self.config.window {
            self.intervals.pop_front();
        }
        self.intervals.push_back(interval);
        self.bpm()
    }

    /// The smoothed tempo, if enough pulses were seen.
    pub fn bpm(&self) -> Option<f64> {
        if self.intervals.len() < MIN_INTERVALS {
            return None;
        }
        Some(60.0 / (self.average() * f64::from(CLOCK_PULSES_PER_QUARTER)))
    }

    fn average(&self) -> f64 {
        self.intervals.iter().sum::<f64>() / self.intervals.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn pulse_interval(bpm: f64) -> Duration {
        Duration::from_secs_f64(60.0 / (bpm * f64::from(CLOCK_PULSES_PER_QUARTER)))
    }

    fn feed(clock: &mut ExternalClock, at: &mut Instant, bpm: f64, pulses: usize) -> Option<f64> {
        let mut last = None;
        for _ in 0..pulses {
            *at += pulse_interval(bpm);
            last = clock.pulse(*at);
        }
        last
    }

    #[test]
    fn test_converges_to_pulse_tempo() {
        let mut clock = ExternalClock::new(ClockConfig::default());
        let mut at = Instant::now();
        assert!(clock.pulse(at).is_none());
        let bpm = feed(&mut clock, &mut at, 128.0, 48).expect("tempo");
        assert!((bpm - 128.0).abs() < 0.01, "{bpm}");
    }

    #[test]
    fn test_warm_up() {
        let mut clock = ExternalClock::new(ClockConfig::default());
        let mut at = Instant::now();
        clock.pulse(at);
        assert!(feed(&mut clock, &mut at, 120.0, MIN_INTERVALS - 1).is_none());
        assert!(feed(&mut clock, &mut at, 120.0, 1).is_some());
    }

    #[test]
    fn test_rejects_outlier_pulse() {
        let mut clock = ExternalClock::new(ClockConfig::default());
        let mut at = Instant::now();
        clock.pulse(at);
        feed(&mut clock, &mut at, 120.0, 24);

        // One pulse arrives 10ms late; both the long and the short interval
        // around it are rejected.
        let late = at + pulse_interval(120.0) + Duration::from_millis(10);
        assert!(clock.pulse(late).is_none());
        at += pulse_interval(120.0) * 2;
        assert!(clock.pulse(at).is_none());

        let bpm = feed(&mut clock, &mut at, 120.0, 1).expect("tempo");
        assert!((bpm - 120.0).abs() < 0.01, "{bpm}");
    }

    #[test]
    fn test_resets_on_tempo_jump() {
        let mut clock = ExternalClock::new(ClockConfig::default());
        let mut at = Instant::now();
        clock.pulse(at);
        feed(&mut clock, &mut at, 120.0, 24);

        // Halving the tempo is rejected until the window gives up on the old
        // tempo, then the new one is learned from scratch.
        assert!(feed(&mut clock, &mut at, 60.0, 3).is_none());
        let bpm = feed(&mut clock, &mut at, 60.0, MIN_INTERVALS).expect("tempo");
        assert!((bpm - 60.0).abs() < 0.01, "{bpm}");
    }
}
