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

//! Pad, envelope, filter and LFO settings.
//!
//! These types are the single schema for pad sound design. Kit files deserialize
//! straight into them and the engine consumes them unchanged, so there is no
//! second copy of the structures to keep in sync.

use serde::{Deserialize, Serialize};

/// Highest MIDI-style velocity accepted by the engine.
pub const MAX_VELOCITY: u8 = 127;

/// Maximum number of LFOs a single pad may carry.
pub const MAX_LFOS: usize = 2;

/// Validation failures for pad settings.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PadError {
    #[error("pad {0} has no sample layers")]
    NoLayers(u32),
    #[error("pad {pad} layer {layer} has invalid velocity range [{low}, {high}]")]
    VelocityRange { pad: u32, layer: usize, low: u8, high: u8 },
    #[error("pad {pad} has {count} LFOs, at most {MAX_LFOS} are supported")]
    TooManyLfos { pad: u32, count: usize },
    #[error("pad {pad} has invalid {field}: {value}")]
    OutOfRange {
        pad: u32,
        field: &'static str,
        value: f32,
    },
}

/// Shape of an envelope's stage sequence.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeShape {
    /// Attack, decay, sustain, release. Hold is ignored.
    #[default]
    Adsr,
    /// Attack, hold, decay, sustain, release.
    Ahdsr,
    /// Attack then decay to silence. No sustain stage.
    Ad,
}

/// Stage timings and velocity response of an envelope.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, PartialEq)]
pub struct EnvelopeSettings {
    #[serde(default)]
    pub shape: EnvelopeShape,
    #[serde(default)]
    pub attack_ms: f32,
    #[serde(default)]
    pub hold_ms: f32,
    #[serde(default)]
    pub decay_ms: f32,
    #[serde(default = "unity")]
    pub sustain: f32,
    #[serde(default = "default_release_ms")]
    pub release_ms: f32,
    /// How much a hard hit shortens the attack (0 = none, 1 = a full-velocity hit has no attack).
    #[serde(default)]
    pub velocity_to_attack: f32,
    /// How much a soft hit lowers the peak level (0 = none, 1 = peak follows velocity).
    #[serde(default)]
    pub velocity_to_level: f32,
    /// Pitch shift in semitones at full level when used as the pitch envelope.
    #[serde(default)]
    pub amount: f32,
}

fn unity() -> f32 {
    1.0
}

fn default_release_ms() -> f32 {
    5.0
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        Self {
            shape: EnvelopeShape::Adsr,
            attack_ms: 0.0,
            hold_ms: 0.0,
            decay_ms: 0.0,
            sustain: 1.0,
            release_ms: default_release_ms(),
            velocity_to_attack: 0.0,
            velocity_to_level: 0.0,
            amount: 0.0,
        }
    }
}

impl EnvelopeSettings {
    /// A plain ADSR with no velocity response.
    pub fn adsr(attack_ms: f32, decay_ms: f32, sustain: f32, release_ms: f32) -> Self {
        Self {
            attack_ms,
            decay_ms,
            sustain,
            release_ms,
            ..Self::default()
        }
    }

    /// An attack/decay one-shot envelope.
    pub fn ad(attack_ms: f32, decay_ms: f32) -> Self {
        Self {
            shape: EnvelopeShape::Ad,
            attack_ms,
            decay_ms,
            sustain: 0.0,
            release_ms: 0.0,
            ..Self::default()
        }
    }

    fn validate(&self, pad: u32, field: &'static str) -> Result<(), PadError> {
        for value in [self.attack_ms, self.hold_ms, self.decay_ms, self.release_ms] {
            if !value.is_finite() || value < 0.0 {
                return Err(PadError::OutOfRange { pad, field, value });
            }
        }
        for value in [
            self.sustain,
            self.velocity_to_attack,
            self.velocity_to_level,
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PadError::OutOfRange { pad, field, value });
            }
        }
        if !self.amount.is_finite() {
            return Err(PadError::OutOfRange {
                pad,
                field,
                value: self.amount,
            });
        }
        Ok(())
    }
}

/// State-variable filter response.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    LowPass,
    BandPass,
    HighPass,
}

/// Per-pad filter configuration.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, PartialEq)]
pub struct FilterSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: FilterMode,
    #[serde(default = "default_cutoff_hz")]
    pub cutoff_hz: f32,
    #[serde(default = "default_resonance")]
    pub resonance: f32,
    /// Cutoff shift in octaves at full filter-envelope level.
    #[serde(default)]
    pub envelope_amount: f32,
}

fn default_cutoff_hz() -> f32 {
    18_000.0
}

fn default_resonance() -> f32 {
    std::f32::consts::FRAC_1_SQRT_2
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: FilterMode::LowPass,
            cutoff_hz: default_cutoff_hz(),
            resonance: default_resonance(),
            envelope_amount: 0.0,
        }
    }
}

impl FilterSettings {
    /// An enabled filter with the given response.
    pub fn new(mode: FilterMode, cutoff_hz: f32, resonance: f32) -> Self {
        Self {
            enabled: true,
            mode,
            cutoff_hz,
            resonance,
            envelope_amount: 0.0,
        }
    }

    /// Returns true if cutoff and resonance are usable.
    pub fn is_valid(&self) -> bool {
        self.cutoff_hz.is_finite()
            && self.cutoff_hz > 0.0
            && self.resonance.is_finite()
            && self.resonance > 0.0
            && self.envelope_amount.is_finite()
    }
}

/// LFO waveform.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LfoWaveform {
    #[default]
    Sine,
    Triangle,
    Square,
    RampUp,
    RampDown,
    /// A new random value each cycle, held for the whole cycle.
    SteppedRandom,
}

/// Musical note length used for tempo-synced LFO rates.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, PartialEq, Eq)]
pub enum TempoDivision {
    #[serde(rename = "1/1")]
    Whole,
    #[serde(rename = "1/2")]
    Half,
    #[serde(rename = "1/4")]
    Quarter,
    #[serde(rename = "1/8")]
    Eighth,
    #[serde(rename = "1/16")]
    Sixteenth,
    #[serde(rename = "1/32")]
    ThirtySecond,
    #[serde(rename = "1/4d")]
    DottedQuarter,
    #[serde(rename = "1/8d")]
    DottedEighth,
    #[serde(rename = "1/16d")]
    DottedSixteenth,
    #[serde(rename = "1/4t")]
    QuarterTriplet,
    #[serde(rename = "1/8t")]
    EighthTriplet,
    #[serde(rename = "1/16t")]
    SixteenthTriplet,
}

impl TempoDivision {
    /// Length of one cycle in quarter-note beats.
    pub fn beats(&self) -> f64 {
        match self {
            TempoDivision::Whole => 4.0,
            TempoDivision::Half => 2.0,
            TempoDivision::Quarter => 1.0,
            TempoDivision::Eighth => 0.5,
            TempoDivision::Sixteenth => 0.25,
            TempoDivision::ThirtySecond => 0.125,
            TempoDivision::DottedQuarter => 1.5,
            TempoDivision::DottedEighth => 0.75,
            TempoDivision::DottedSixteenth => 0.375,
            TempoDivision::QuarterTriplet => 2.0 / 3.0,
            TempoDivision::EighthTriplet => 1.0 / 3.0,
            TempoDivision::SixteenthTriplet => 1.0 / 6.0,
        }
    }
}

/// LFO speed, either free in Hz or locked to the tempo.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LfoRate {
    Hz(f32),
    Sync(TempoDivision),
}

impl LfoRate {
    /// Cycle frequency in Hz at the given tempo.
    pub fn frequency(&self, bpm: f64) -> f64 {
        match self {
            LfoRate::Hz(hz) => f64::from(*hz).max(0.0),
            LfoRate::Sync(division) => bpm.max(0.0) / 60.0 / division.beats(),
        }
    }
}

/// Parameter an LFO modulates.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LfoDestination {
    /// Depth in semitones.
    #[default]
    Pitch,
    /// Depth as a fraction of the voice gain.
    Volume,
    /// Depth added to the pan position.
    Pan,
    /// Depth in octaves of cutoff shift.
    FilterCutoff,
}

#[derive(Deserialize, Clone, Copy, Serialize, Debug, PartialEq)]
pub struct LfoSettings {
    #[serde(default)]
    pub waveform: LfoWaveform,
    pub rate: LfoRate,
    #[serde(default)]
    pub depth: f32,
    #[serde(default)]
    pub destination: LfoDestination,
    /// Restart the cycle on every trigger instead of following the global timeline.
    #[serde(default)]
    pub retrigger: bool,
}

impl LfoSettings {
    fn validate(&self, pad: u32) -> Result<(), PadError> {
        if !self.depth.is_finite() || self.depth < 0.0 {
            return Err(PadError::OutOfRange {
                pad,
                field: "LFO depth",
                value: self.depth,
            });
        }
        if let LfoRate::Hz(hz) = self.rate {
            if !hz.is_finite() || hz < 0.0 {
                return Err(PadError::OutOfRange {
                    pad,
                    field: "LFO rate",
                    value: hz,
                });
            }
        }
        Ok(())
    }
}

/// How a pad picks among layers whose velocity range matches a hit.
#[derive(Deserialize, Clone, Copy, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LayerTriggerRule {
    /// The first layer whose range contains the velocity.
    #[default]
    Velocity,
    /// Cycle through matching layers in order.
    RoundRobin,
    /// Pick a matching layer at random.
    Random,
}

/// One sample assigned to a pad.
#[derive(Deserialize, Clone, Serialize, Debug, PartialEq)]
pub struct SampleLayer {
    /// Sample cache id.
    pub sample: String,
    /// Inclusive velocity range [low, high].
    #[serde(default = "full_velocity_range")]
    pub velocity: [u8; 2],
    /// Tuning offset in semitones.
    #[serde(default)]
    pub tuning: f32,
    #[serde(default = "unity")]
    pub gain: f32,
    #[serde(default)]
    pub pan: f32,
}

fn full_velocity_range() -> [u8; 2] {
    [0, MAX_VELOCITY]
}

impl SampleLayer {
    /// A full-range layer with neutral offsets.
    pub fn new(sample: &str) -> Self {
        Self {
            sample: sample.to_string(),
            velocity: full_velocity_range(),
            tuning: 0.0,
            gain: 1.0,
            pan: 0.0,
        }
    }

    /// Restricts the layer to a velocity range.
    pub fn with_velocity(mut self, low: u8, high: u8) -> Self {
        self.velocity = [low, high];
        self
    }

    /// Returns true if the velocity falls into this layer's range.
    pub fn accepts(&self, velocity: u8) -> bool {
        velocity >= self.velocity[0] && velocity <= self.velocity[1]
    }
}

/// Everything the engine needs to turn a pad hit into a voice.
#[derive(Deserialize, Clone, Serialize, Debug, PartialEq)]
pub struct PadSettings {
    pub id: u32,
    pub layers: Vec<SampleLayer>,
    #[serde(default)]
    pub trigger_rule: LayerTriggerRule,
    #[serde(default = "unity")]
    pub volume: f32,
    #[serde(default)]
    pub pan: f32,
    /// Tuning in semitones.
    #[serde(default)]
    pub tuning: f32,
    /// Pads sharing a non-zero group choke each other.
    #[serde(default)]
    pub mute_group: u32,
    /// Maximum simultaneous voices for this pad, 0 for no limit.
    #[serde(default)]
    pub polyphony: u32,
    #[serde(default)]
    pub amp_envelope: EnvelopeSettings,
    #[serde(default)]
    pub filter_envelope: Option<EnvelopeSettings>,
    #[serde(default)]
    pub pitch_envelope: Option<EnvelopeSettings>,
    #[serde(default)]
    pub filter: FilterSettings,
    #[serde(default)]
    pub lfos: Vec<LfoSettings>,
}

impl PadSettings {
    /// A pad playing a single full-range sample with default sound design.
    pub fn new(id: u32, sample: &str) -> Self {
        Self {
            id,
            layers: vec![SampleLayer::new(sample)],
            trigger_rule: LayerTriggerRule::Velocity,
            volume: 1.0,
            pan: 0.0,
            tuning: 0.0,
            mute_group: 0,
            polyphony: 0,
            amp_envelope: EnvelopeSettings::default(),
            filter_envelope: None,
            pitch_envelope: None,
            filter: FilterSettings::default(),
            lfos: Vec::new(),
        }
    }

    /// Checks ranges that would otherwise produce silence, NaNs or panics downstream.
    pub fn validate(&self) -> Result<(), PadError> {
        let pad = self.id;
        if self.layers.is_empty() {
            return Err(PadError::NoLayers(pad));
        }
        for (layer, sample_layer) in self.layers.iter().enumerate() {
            let [low, high] = sample_layer.velocity;
            if low > high || high > MAX_VELOCITY {
                return Err(PadError::VelocityRange {
                    pad,
                    layer,
                    low,
                    high,
                });
            }
            if !sample_layer.gain.is_finite() || sample_layer.gain < 0.0 {
                return Err(PadError::OutOfRange {
                    pad,
                    field: "layer gain",
                    value: sample_layer.gain,
                });
            }
            if !sample_layer.tuning.is_finite() {
                return Err(PadError::OutOfRange {
                    pad,
                    field: "layer tuning",
                    value: sample_layer.tuning,
                });
            }
        }
        if self.lfos.len() > MAX_LFOS {
            return Err(PadError::TooManyLfos {
                pad,
                count: self.lfos.len(),
            });
        }
        for lfo in &self.lfos {
            lfo.validate(pad)?;
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(PadError::OutOfRange {
                pad,
                field: "volume",
                value: self.volume,
            });
        }
        if !(-1.0..=1.0).contains(&self.pan) {
            return Err(PadError::OutOfRange {
                pad,
                field: "pan",
                value: self.pan,
            });
        }
        if !self.tuning.is_finite() {
            return Err(PadError::OutOfRange {
                pad,
                field: "tuning",
                value: self.tuning,
            });
        }
        if !self.filter.is_valid() {
            return Err(PadError::OutOfRange {
                pad,
                field: "filter cutoff",
                value: self.filter.cutoff_hz,
            });
        }
        self.amp_envelope.validate(pad, "amp envelope")?;
        if let Some(envelope) = &self.filter_envelope {
            envelope.validate(pad, "filter envelope")?;
        }
        if let Some(envelope) = &self.pitch_envelope {
            envelope.validate(pad, "pitch envelope")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pad_is_valid() {
        assert_eq!(PadSettings::new(1, "kick").validate(), Ok(()));
    }

    #[test]
    fn test_rejects_empty_layers() {
        let mut pad = PadSettings::new(3, "kick");
        pad.layers.clear();
        assert_eq!(pad.validate(), Err(PadError::NoLayers(3)));
    }

    #[test]
    fn test_rejects_inverted_velocity_range() {
        let mut pad = PadSettings::new(1, "snare");
        pad.layers = vec![SampleLayer::new("snare").with_velocity(100, 20)];
        assert!(matches!(
            pad.validate(),
            Err(PadError::VelocityRange { low: 100, high: 20, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_sustain() {
        let mut pad = PadSettings::new(1, "hat");
        pad.amp_envelope.sustain = 1.5;
        assert!(matches!(
            pad.validate(),
            Err(PadError::OutOfRange {
                field: "amp envelope",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_three_lfos() {
        let mut pad = PadSettings::new(1, "hat");
        let lfo = LfoSettings {
            waveform: LfoWaveform::Sine,
            rate: LfoRate::Hz(2.0),
            depth: 0.5,
            destination: LfoDestination::Pan,
            retrigger: false,
        };
        pad.lfos = vec![lfo; 3];
        assert_eq!(
            pad.validate(),
            Err(PadError::TooManyLfos { pad: 1, count: 3 })
        );
    }

    #[test]
    fn test_rejects_non_finite_lfo() {
        let lfo = LfoSettings {
            waveform: LfoWaveform::Triangle,
            rate: LfoRate::Hz(4.0),
            depth: 1.0,
            destination: LfoDestination::Pitch,
            retrigger: true,
        };
        let mut pad = PadSettings::new(2, "tom");
        pad.lfos = vec![lfo];
        assert_eq!(pad.validate(), Ok(()));

        pad.lfos = vec![LfoSettings { depth: f32::NAN, ..lfo }];
        assert!(matches!(
            pad.validate(),
            Err(PadError::OutOfRange { field: "LFO depth", .. })
        ));
        pad.lfos = vec![LfoSettings { depth: -0.5, ..lfo }];
        assert!(matches!(
            pad.validate(),
            Err(PadError::OutOfRange { field: "LFO depth", .. })
        ));
        pad.lfos = vec![LfoSettings {
            rate: LfoRate::Hz(f32::INFINITY),
            ..lfo
        }];
        assert!(matches!(
            pad.validate(),
            Err(PadError::OutOfRange { field: "LFO rate", .. })
        ));
    }

    #[test]
    fn test_tempo_division_frequency() {
        // A quarter note at 120 BPM is 2 Hz, a sixteenth 8 Hz.
        assert!((LfoRate::Sync(TempoDivision::Quarter).frequency(120.0) - 2.0).abs() < 1e-9);
        assert!((LfoRate::Sync(TempoDivision::Sixteenth).frequency(120.0) - 8.0).abs() < 1e-9);
        assert!((LfoRate::Sync(TempoDivision::EighthTriplet).frequency(120.0) - 6.0).abs() < 1e-9);
        assert!((LfoRate::Hz(3.5).frequency(90.0) - 3.5).abs() < 1e-6);
    }

    #[test]
    fn test_layer_accepts() {
        let layer = SampleLayer::new("snare").with_velocity(40, 90);
        assert!(!layer.accepts(39));
        assert!(layer.accepts(40));
        assert!(layer.accepts(90));
        assert!(!layer.accepts(91));
    }
}
