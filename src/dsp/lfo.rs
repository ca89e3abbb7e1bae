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
use std::f64::consts::TAU;

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::config::{LfoDestination, LfoSettings, LfoWaveform};

/// A per-voice low frequency oscillator.
///
/// Free-running LFOs derive their phase from the absolute frame the voice
/// started at, so every voice of a pad sees the same cycle. Retriggered LFOs
/// start each note at phase zero.
#[derive(Debug, Clone)]
pub struct Lfo {
    settings: LfoSettings,
    sample_rate: f64,
    phase: f64,
    increment: f64,
    held: f64,
    rng: SmallRng,
}

impl Lfo {
    pub fn new(settings: LfoSettings, sample_rate: u32, bpm: f64, seed: u64) -> Lfo {
        let mut lfo = Lfo {
            settings,
            sample_rate: f64::from(sample_rate.max(1)),
            phase: 0.0,
            increment: 0.0,
            held: 0.0,
            rng: SmallRng::seed_from_u64(seed),
        };
        lfo.set_tempo(bpm);
        lfo
    }

    /// Recomputes the phase increment. Only tempo-synced rates change.
    pub fn set_tempo(&mut self, bpm: f64) {
        self.increment = self.settings.rate.frequency(bpm) / self.sample_rate;
    }

    /// Positions the phase for a note starting at `start_frame`.
    pub fn start(&mut self, start_frame: u64) {
        self.phase = if self.settings.retrigger {
            0.0
        } else {
            (start_frame as f64 * self.increment).fract()
        };
        self.held = self.rng.gen_range(-1.0..=1.0);
    }

    pub fn destination(&self) -> LfoDestination {
        self.settings.destination
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Returns `depth * waveform(phase)` and advances one frame.
    pub fn process(&mut self) -> f32 {
        let value = f64::from(self.settings.depth) * self.waveform();
        self.phase += self.increment;
        if self.phase >= 1.0 {
            self.phase = self.phase.fract();
            if self.settings.waveform == LfoWaveform::SteppedRandom {
                self.held = self.rng.gen_range(-1.0..=1.0);
            }
        }
        value as f32
    }

    fn waveform(&self) -> f64 {
        let phase = self.phase;
        match self.settings.waveform {
            LfoWaveform::Sine => (TAU * phase).sin(),
            LfoWaveform::Triangle => {
                if phase < 0.25 {
                    4.0 * phase
                } else if phase < 0.75 {
                    2.0 - 4.0 * phase
                } else {
                    4.0 * phase - 4.0
                }
            }
            LfoWaveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            LfoWaveform::RampUp => 2.0 * phase - 1.0,
            LfoWaveform::RampDown => 1.0 - 2.0 * phase,
            LfoWaveform::SteppedRandom => self.held,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LfoRate, TempoDivision};

    fn settings(waveform: LfoWaveform, rate: LfoRate, retrigger: bool) -> LfoSettings {
        LfoSettings {
            waveform,
            rate,
            depth: 1.0,
            destination: LfoDestination::Pitch,
            retrigger,
        }
    }

    #[test]
    fn test_phase_wraps() {
        let mut lfo = Lfo::new(
            settings(LfoWaveform::RampUp, LfoRate::Hz(1000.0), true),
            48_000,
            120.0,
            1,
        );
        lfo.start(0);
        for _ in 0..10_000 {
            let value = lfo.process();
            assert!((-1.0..=1.0).contains(&value));
            assert!((0.0..1.0).contains(&lfo.phase()));
        }
    }

    #[test]
    fn test_waveform_values() {
        // 4 frames per cycle lands exactly on the quarter points.
        let cases = [
            (LfoWaveform::Sine, [0.0, 1.0, 0.0, -1.0]),
            (LfoWaveform::Triangle, [0.0, 1.0, 0.0, -1.0]),
            (LfoWaveform::Square, [1.0, 1.0, -1.0, -1.0]),
            (LfoWaveform::RampUp, [-1.0, -0.5, 0.0, 0.5]),
            (LfoWaveform::RampDown, [1.0, 0.5, 0.0, -0.5]),
        ];
        for (waveform, expected) in cases {
            let mut lfo = Lfo::new(settings(waveform, LfoRate::Hz(1.0), true), 4, 120.0, 1);
            lfo.start(0);
            for value in expected {
                let actual = lfo.process();
                assert!((actual - value).abs() < 1e-6, "{waveform:?}: {actual} != {value}");
            }
        }
    }

    #[test]
    fn test_depth_scales_output() {
        let mut lfo_settings = settings(LfoWaveform::Square, LfoRate::Hz(1.0), true);
        lfo_settings.depth = 0.25;
        let mut lfo = Lfo::new(lfo_settings, 100, 120.0, 1);
        lfo.start(0);
        assert_eq!(lfo.process(), 0.25);
    }

    #[test]
    fn test_free_running_phase_follows_start_frame() {
        let mut lfo = Lfo::new(
            settings(LfoWaveform::Sine, LfoRate::Hz(1.0), false),
            1000,
            120.0,
            1,
        );
        lfo.start(250);
        assert!((lfo.phase() - 0.25).abs() < 1e-9);
        lfo.start(1750);
        assert!((lfo.phase() - 0.75).abs() < 1e-9);

        let mut retriggered = Lfo::new(
            settings(LfoWaveform::Sine, LfoRate::Hz(1.0), true),
            1000,
            120.0,
            1,
        );
        retriggered.start(250);
        assert_eq!(retriggered.phase(), 0.0);
    }

    #[test]
    fn test_tempo_sync_follows_bpm() {
        let mut lfo = Lfo::new(
            settings(LfoWaveform::RampUp, LfoRate::Sync(TempoDivision::Quarter), true),
            1000,
            120.0,
            1,
        );
        lfo.start(0);
        // 2 Hz at 120 BPM: half a cycle in 250 frames.
        for _ in 0..250 {
            lfo.process();
        }
        assert!((lfo.phase() - 0.5).abs() < 1e-9);

        lfo.set_tempo(60.0);
        for _ in 0..250 {
            lfo.process();
        }
        assert!((lfo.phase() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_stepped_random_holds_per_cycle() {
        // 8 Hz at 1024 frames per second is exactly 128 frames per cycle.
        let mut lfo = Lfo::new(
            settings(LfoWaveform::SteppedRandom, LfoRate::Hz(8.0), true),
            1024,
            120.0,
            7,
        );
        lfo.start(0);
        let first = lfo.process();
        for _ in 1..128 {
            assert_eq!(lfo.process(), first);
        }
        let mut changed = false;
        for _ in 0..10 {
            let next = lfo.process();
            changed |= next != first;
            for _ in 1..128 {
                assert_eq!(lfo.process(), next);
            }
        }
        assert!(changed);
        assert!((-1.0..=1.0).contains(&first));
    }
}
