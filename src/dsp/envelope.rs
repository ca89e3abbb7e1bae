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
use crate::config::{EnvelopeSettings, EnvelopeShape};

use super::ms_to_frames;

/// Slack when comparing an accumulated level against its stage target.
const LEVEL_EPSILON: f64 = 1e-9;

/// Envelope state machine stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
}

/// A linear, sample-clocked envelope generator.
///
/// Levels are accumulated in f64 so that long stages land on their targets.
/// Every stage whose length is a single frame or less is taken instantly.
#[derive(Debug, Clone)]
pub struct Envelope {
    settings: EnvelopeSettings,
    sample_rate: u32,
    stage: Stage,
    level: f64,
    peak: f64,
    step: f64,
    hold_remaining: u64,
}

impl Envelope {
    pub fn new(settings: EnvelopeSettings, sample_rate: u32) -> Envelope {
        Envelope {
            settings,
            sample_rate,
            stage: Stage::Idle,
            level: 0.0,
            peak: 1.0,
            step: 0.0,
            hold_remaining: 0,
        }
    }

    /// Replaces the settings. Takes effect at the next stage transition.
    pub fn set_settings(&mut self, settings: EnvelopeSettings) {
        self.settings = settings;
    }

    pub fn settings(&self) -> &EnvelopeSettings {
        &self.settings
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level as f32
    }

    pub fn is_active(&self) -> bool {
        self.stage != Stage::Idle
    }

    /// Returns to idle at zero without a release.
    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.level = 0.0;
        self.step = 0.0;
        self.hold_remaining = 0;
    }

    /// Starts the attack from the current level.
    pub fn trigger_on(&mut self, velocity: u8) {
        let velocity = f64::from(velocity.min(127)) / 127.0;
        let to_level = f64::from(self.settings.velocity_to_level);
        let to_attack = self.settings.velocity_to_attack * velocity as f32;

        self.peak = 1.0 - to_level * (1.0 - velocity);
        let attack_frames = ms_to_frames(
            self.settings.attack_ms * (1.0 - to_attack),
            self.sample_rate,
        );

        if attack_frames <= 1.0 || self.level >= self.peak - LEVEL_EPSILON {
            self.level = self.peak;
            self.finish_attack();
        } else {
            self.stage = Stage::Attack;
            self.step = self.peak / attack_frames;
        }
    }

    /// Moves any non-idle stage into release from the current level.
    pub fn trigger_off(&mut self) {
        if self.stage == Stage::Idle {
            return;
        }
        let frames = ms_to_frames(self.settings.release_ms, self.sample_rate);
        if frames <= 1.0 || self.level <= LEVEL_EPSILON {
            self.reset();
        } else {
            self.stage = Stage::Release;
            self.step = self.level / frames;
        }
    }

    /// Advances one frame and returns the new level.
    pub fn process(&mut self) -> f32 {
        match self.stage {
            Stage::Idle | Stage::Sustain => {}
            Stage::Attack => {
                self.level += self.step;
                if self.level >= self.peak - LEVEL_EPSILON {
                    self.level = self.peak;
                    self.finish_attack();
                }
            }
            Stage::Hold => {
                self.hold_remaining = self.hold_remaining.saturating_sub(1);
                if self.hold_remaining == 0 {
                    self.start_decay();
                }
            }
            Stage::Decay => {
                let target = self.decay_target();
                self.level -= self.step;
                if self.level <= target + LEVEL_EPSILON {
                    self.level = target;
                    self.finish_decay();
                }
            }
            Stage::Release => {
                self.level -= self.step;
                if self.level <= LEVEL_EPSILON {
                    self.reset();
                }
            }
        }
        self.level as f32
    }

    fn finish_attack(&mut self) {
        if self.settings.shape == EnvelopeShape::Ahdsr {
            let hold = ms_to_frames(self.settings.hold_ms, self.sample_rate).round() as u64;
            if hold > 0 {
                self.stage = Stage::Hold;
                self.hold_remaining = hold;
                return;
            }
        }
        self.start_decay();
    }

    fn decay_target(&self) -> f64 {
        match self.settings.shape {
            EnvelopeShape::Ad => 0.0,
            EnvelopeShape::Adsr | EnvelopeShape::Ahdsr => {
                f64::from(self.settings.sustain.clamp(0.0, 1.0)) * self.peak
            }
        }
    }

    fn start_decay(&mut self) {
        let target = self.decay_target();
        let frames = ms_to_frames(self.settings.decay_ms, self.sample_rate);
        if frames <= 1.0 || self.level <= target + LEVEL_EPSILON {
            self.level = target;
            self.finish_decay();
        } else {
            self.stage = Stage::Decay;
            self.step = (self.level - target) / frames;
        }
    }

    fn finish_decay(&mut self) {
        if self.level <= LEVEL_EPSILON {
            self.reset();
        } else {
            self.stage = Stage::Sustain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 44_100;

    fn run(envelope: &mut Envelope, frames: usize) -> f32 {
        let mut level = envelope.level();
        for _ in 0..frames {
            level = envelope.process();
        }
        level
    }

    #[test]
    fn test_attack_reaches_peak_on_time() {
        for attack_ms in [0.0, 0.01, 1.0, 3.3, 10.0, 250.0] {
            let settings = EnvelopeSettings::adsr(attack_ms, 1000.0, 0.5, 50.0);
            let mut envelope = Envelope::new(settings, SAMPLE_RATE);
            envelope.trigger_on(127);

            let frames = (f64::from(attack_ms) * f64::from(SAMPLE_RATE) / 1000.0).ceil() as usize;
            let level = run(&mut envelope, frames);
            assert!(
                (level - 1.0).abs() < 1e-4,
                "attack {attack_ms}ms ended at {level}"
            );
            assert_ne!(envelope.stage(), Stage::Attack, "attack {attack_ms}ms");
        }
    }

    #[test]
    fn test_zero_attack_does_not_stick() {
        let mut envelope = Envelope::new(EnvelopeSettings::adsr(0.0, 0.0, 1.0, 0.0), SAMPLE_RATE);
        envelope.trigger_on(100);
        assert_eq!(envelope.stage(), Stage::Sustain);
        assert_eq!(envelope.process(), 1.0);
    }

    #[test]
    fn test_decay_settles_on_sustain() {
        let mut envelope = Envelope::new(EnvelopeSettings::adsr(0.0, 10.0, 0.25, 10.0), SAMPLE_RATE);
        envelope.trigger_on(127);
        let level = run(&mut envelope, 442);
        assert_eq!(envelope.stage(), Stage::Sustain);
        assert!((level - 0.25).abs() < 1e-6);
        // Sustain holds.
        assert!((run(&mut envelope, 1000) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_release_from_attack_ends_idle() {
        let mut envelope = Envelope::new(EnvelopeSettings::adsr(100.0, 10.0, 0.8, 10.0), SAMPLE_RATE);
        envelope.trigger_on(127);
        let level = run(&mut envelope, 100);
        assert!(level > 0.0 && level < 0.1);

        envelope.trigger_off();
        assert_eq!(envelope.stage(), Stage::Release);
        run(&mut envelope, 442);
        assert_eq!(envelope.stage(), Stage::Idle);
        assert!(!envelope.is_active());
        assert_eq!(envelope.level(), 0.0);
    }

    #[test]
    fn test_zero_sustain_goes_idle() {
        let mut envelope = Envelope::new(EnvelopeSettings::adsr(1.0, 5.0, 0.0, 100.0), SAMPLE_RATE);
        envelope.trigger_on(127);
        run(&mut envelope, 300);
        assert!(!envelope.is_active());
    }

    #[test]
    fn test_ad_shape_decays_to_idle() {
        let mut envelope = Envelope::new(EnvelopeSettings::ad(0.0, 20.0), SAMPLE_RATE);
        envelope.trigger_on(127);
        assert_eq!(envelope.stage(), Stage::Decay);
        run(&mut envelope, 883);
        assert_eq!(envelope.stage(), Stage::Idle);
    }

    #[test]
    fn test_hold_keeps_peak() {
        let settings = EnvelopeSettings {
            shape: EnvelopeShape::Ahdsr,
            hold_ms: 10.0,
            decay_ms: 10.0,
            sustain: 0.5,
            ..EnvelopeSettings::default()
        };
        let mut envelope = Envelope::new(settings, SAMPLE_RATE);
        envelope.trigger_on(127);
        assert_eq!(envelope.stage(), Stage::Hold);
        assert_eq!(run(&mut envelope, 440), 1.0);
        assert_eq!(envelope.stage(), Stage::Hold);
        run(&mut envelope, 1);
        assert_eq!(envelope.stage(), Stage::Decay);
    }

    #[test]
    fn test_velocity_scales_peak_and_attack() {
        let settings = EnvelopeSettings {
            attack_ms: 10.0,
            velocity_to_level: 1.0,
            velocity_to_attack: 1.0,
            ..EnvelopeSettings::default()
        };

        let mut soft = Envelope::new(settings, SAMPLE_RATE);
        soft.trigger_on(0);
        assert_eq!(soft.level(), 0.0);
        assert!(!soft.is_active());

        let mut hard = Envelope::new(settings, SAMPLE_RATE);
        hard.trigger_on(127);
        // Full velocity removes the attack entirely.
        assert_eq!(hard.level(), 1.0);

        let mut medium = Envelope::new(settings, SAMPLE_RATE);
        medium.trigger_on(64);
        let peak = 64.0 / 127.0;
        let level = run(&mut medium, 441);
        assert!((level - peak).abs() < 1e-5);
    }

    #[test]
    fn test_retrigger_continues_from_level() {
        let mut envelope = Envelope::new(EnvelopeSettings::adsr(10.0, 0.0, 1.0, 100.0), SAMPLE_RATE);
        envelope.trigger_on(127);
        run(&mut envelope, 441);
        envelope.trigger_off();
        let released = run(&mut envelope, 100);
        envelope.trigger_on(127);
        assert_eq!(envelope.stage(), Stage::Attack);
        let next = envelope.process();
        assert!(next > released);
    }
}
