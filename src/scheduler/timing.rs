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

//! Conversions between musical time and output frames.

use std::time::Duration;

/// MIDI beat clock resolution.
pub const CLOCK_PULSES_PER_QUARTER: u32 = 24;

/// Length of one sequencer step in frames. Fractional so that long runs do not
/// accumulate rounding error.
pub fn frames_per_step(bpm: f64, steps_per_beat: u32, sample_rate: u32) -> f64 {
    if bpm <= 0.0 || steps_per_beat == 0 {
        return 0.0;
    }
    60.0 / bpm / f64::from(steps_per_beat) * f64::from(sample_rate)
}

/// Output frame at which a step must be started so that it is heard at its
/// musical position: `origin + steps * frames_per_step - latency + lookahead`,
/// rounded to the nearest frame and never below zero.
pub fn step_target_frame(
    origin: f64,
    steps_from_origin: u64,
    frames_per_step: f64,
    latency_frames: u64,
    lookahead_frames: u64,
) -> u64 {
    let target = origin + steps_from_origin as f64 * frames_per_step + lookahead_frames as f64
        - latency_frames as f64;
    target.round().max(0.0) as u64
}

pub fn duration_to_frames(duration: Duration, sample_rate: u32) -> u64 {
    (duration.as_secs_f64() * f64::from(sample_rate)).round() as u64
}
