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

//! Per-voice signal processors. Everything here is sample-clocked, allocation
//! free after construction and safe to run on the audio callback thread.

pub mod envelope;
pub mod filter;
pub mod lfo;

pub use envelope::{Envelope, Stage};
pub use filter::StateVariableFilter;
pub use lfo::Lfo;

/// Converts a duration in milliseconds into frames at the given sample rate.
#[inline]
pub(crate) fn ms_to_frames(ms: f32, sample_rate: u32) -> f64 {
    f64::from(ms.max(0.0)) * f64::from(sample_rate) / 1000.0
}

/// Converts semitones into a playback rate multiplier.
#[inline]
pub fn semitones_to_ratio(semitones: f32) -> f32 {
    (semitones / 12.0).exp2()
}

/// Constant-power pan gains for a position in [-1, 1].
#[inline]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pan_is_constant_power() {
        for pan in [-1.0, -0.5, 0.0, 0.3, 1.0] {
            let (left, right) = pan_gains(pan);
            assert!((left * left + right * right - 1.0).abs() < 1e-6);
        }
        let (left, right) = pan_gains(-1.0);
        assert!((left - 1.0).abs() < 1e-6 && right.abs() < 1e-6);
    }

    #[test]
    fn test_semitones_to_ratio() {
        assert!((semitones_to_ratio(12.0) - 2.0).abs() < 1e-6);
        assert!((semitones_to_ratio(-12.0) - 0.5).abs() < 1e-6);
        assert!((semitones_to_ratio(0.0) - 1.0).abs() < 1e-6);
    }
}
