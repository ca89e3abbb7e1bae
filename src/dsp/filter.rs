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
use std::f64::consts::PI;

use crate::config::FilterMode;

pub const MIN_CUTOFF_HZ: f32 = 10.0;
pub const MAX_CUTOFF_RATIO: f32 = 0.49;
pub const MIN_Q: f32 = 0.1;
pub const MAX_Q: f32 = 40.0;

/// Two-pole state-variable filter with trapezoidal integrators.
///
/// Low, band and high outputs are computed together; `mode` picks which one
/// `process` returns.
#[derive(Debug, Clone)]
pub struct StateVariableFilter {
    sample_rate: f32,
    mode: FilterMode,
    cutoff_hz: f32,
    q: f32,
    k: f32,
    a1: f32,
    a2: f32,
    a3: f32,
    ic1: f32,
    ic2: f32,
}

impl StateVariableFilter {
    pub fn new(sample_rate: u32) -> StateVariableFilter {
        let mut filter = StateVariableFilter {
            sample_rate: sample_rate as f32,
            mode: FilterMode::LowPass,
            cutoff_hz: 0.0,
            q: 0.0,
            k: 0.0,
            a1: 0.0,
            a2: 0.0,
            a3: 0.0,
            ic1: 0.0,
            ic2: 0.0,
        };
        filter.configure(FilterMode::LowPass, 1000.0, std::f32::consts::FRAC_1_SQRT_2);
        filter
    }

    /// Recomputes coefficients. Cutoff and Q are clamped into the stable range.
    pub fn configure(&mut self, mode: FilterMode, cutoff_hz: f32, q: f32) {
        let max_cutoff = self.sample_rate * MAX_CUTOFF_RATIO;
        let cutoff_hz = if cutoff_hz.is_finite() {
            cutoff_hz.clamp(MIN_CUTOFF_HZ, max_cutoff)
        } else {
            max_cutoff
        };
        let q = if q.is_finite() { q.clamp(MIN_Q, MAX_Q) } else { MIN_Q };

        self.mode = mode;
        if cutoff_hz == self.cutoff_hz && q == self.q {
            return;
        }
        self.cutoff_hz = cutoff_hz;
        self.q = q;

        let g = (PI * f64::from(cutoff_hz) / f64::from(self.sample_rate)).tan();
        let k = 1.0 / f64::from(q);
        let a1 = 1.0 / (1.0 + g * (g + k));
        let a2 = g * a1;
        self.k = k as f32;
        self.a1 = a1 as f32;
        self.a2 = a2 as f32;
        self.a3 = (g * a2) as f32;
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    pub fn q(&self) -> f32 {
        self.q
    }

    /// The derived gains `[k, a1, a2, a3]`.
    pub fn coefficients(&self) -> [f32; 4] {
        [self.k, self.a1, self.a2, self.a3]
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let v3 = x - self.ic2;
        let v1 = self.a1 * self.ic1 + self.a2 * v3;
        let v2 = self.ic2 + self.a2 * self.ic1 + self.a3 * v3;
        self.ic1 = 2.0 * v1 - self.ic1;
        self.ic2 = 2.0 * v2 - self.ic2;

        match self.mode {
            FilterMode::LowPass => v2,
            FilterMode::BandPass => v1,
            FilterMode::HighPass => x - self.k * v1 - v2,
        }
    }

    pub fn reset(&mut self) {
        self.ic1 = 0.0;
        self.ic2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    const SAMPLE_RATE: u32 = 44_100;

    #[test]
    fn test_coefficients_finite_across_sweep() {
        let mut filter = StateVariableFilter::new(SAMPLE_RATE);
        let nyquist = SAMPLE_RATE as f32 / 2.0;
        for mode in [FilterMode::LowPass, FilterMode::BandPass, FilterMode::HighPass] {
            let mut cutoff = 20.0;
            while cutoff < nyquist - 1.0 {
                for q in [0.5, 0.707, 1.0, 4.0, 10.0, 20.0] {
                    filter.configure(mode, cutoff, q);
                    for coefficient in filter.coefficients() {
                        assert!(coefficient.is_finite(), "cutoff {cutoff} q {q}");
                    }
                    assert!(filter.process(0.5).is_finite());
                }
                cutoff *= 1.25;
            }
            filter.configure(mode, nyquist - 1.0, 20.0);
            assert!(filter.coefficients().iter().all(|c| c.is_finite()));
        }
    }

    #[test]
    fn test_clamps_out_of_range_parameters() {
        let mut filter = StateVariableFilter::new(SAMPLE_RATE);
        filter.configure(FilterMode::LowPass, 0.0, 0.0);
        assert_eq!(filter.cutoff_hz(), MIN_CUTOFF_HZ);
        assert_eq!(filter.q(), MIN_Q);

        filter.configure(FilterMode::LowPass, 1.0e9, 1000.0);
        assert_eq!(filter.cutoff_hz(), SAMPLE_RATE as f32 * MAX_CUTOFF_RATIO);
        assert_eq!(filter.q(), MAX_Q);

        filter.configure(FilterMode::LowPass, f32::NAN, f32::INFINITY);
        assert!(filter.coefficients().iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_lowpass_attenuates_highs() {
        let mut filter = StateVariableFilter::new(SAMPLE_RATE);
        filter.configure(FilterMode::LowPass, 200.0, 0.707);
        let low = testutil::sine(100.0, SAMPLE_RATE, 8820);
        let high = testutil::sine(8000.0, SAMPLE_RATE, 8820);

        let low_out: Vec<f32> = low.iter().map(|x| filter.process(*x)).collect();
        filter.reset();
        let high_out: Vec<f32> = high.iter().map(|x| filter.process(*x)).collect();

        let low_rms = testutil::calculate_rms(&low_out[4410..]);
        let high_rms = testutil::calculate_rms(&high_out[4410..]);
        assert!(low_rms > 0.5, "low rms {low_rms}");
        assert!(high_rms < 0.01, "high rms {high_rms}");
    }

    #[test]
    fn test_highpass_attenuates_lows() {
        let mut filter = StateVariableFilter::new(SAMPLE_RATE);
        filter.configure(FilterMode::HighPass, 4000.0, 0.707);
        let low = testutil::sine(50.0, SAMPLE_RATE, 8820);
        let out: Vec<f32> = low.iter().map(|x| filter.process(*x)).collect();
        assert!(testutil::calculate_rms(&out[4410..]) < 0.01);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut filter = StateVariableFilter::new(SAMPLE_RATE);
        filter.configure(FilterMode::BandPass, 1000.0, 5.0);
        for _ in 0..100 {
            filter.process(1.0);
        }
        filter.reset();
        assert_eq!(filter.process(0.0), 0.0);
    }
}
