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

//! A single playing sample.
//!
//! Voices live in a fixed pool owned by the mixer and are reused in place, so
//! starting a voice only copies settings and never allocates.

use std::fmt;
use std::sync::Arc;

use crate::config::{EnvelopeSettings, FilterSettings, LfoDestination, LfoSettings, MAX_LFOS};
use crate::dsp::{pan_gains, semitones_to_ratio, Envelope, Lfo, StateVariableFilter};

use super::LoadedSample;

/// Identifies a voice for its whole lifetime. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice-{}", self.0)
    }
}

/// Everything needed to start a voice, resolved on the control side.
#[derive(Clone)]
pub struct VoiceSpec {
    pub id: VoiceId,
    pub sample: Arc<LoadedSample>,
    /// Pad that produced the voice, `None` for direct sample triggers.
    pub pad_id: Option<u32>,
    pub mute_group: u32,
    pub polyphony: u32,
    pub velocity: u8,
    pub gain: f32,
    pub pan: f32,
    /// Semitones.
    pub tuning: f32,
    pub amp_envelope: EnvelopeSettings,
    pub filter_envelope: Option<EnvelopeSettings>,
    pub pitch_envelope: Option<EnvelopeSettings>,
    pub filter: FilterSettings,
    pub lfos: [Option<LfoSettings>; MAX_LFOS],
    /// Seeds stepped-random LFOs.
    pub seed: u64,
}

impl VoiceSpec {
    /// A plain one-shot of a sample with no pad sound design.
    pub fn one_shot(id: VoiceId, sample: Arc<LoadedSample>, gain: f32, pan: f32) -> VoiceSpec {
        VoiceSpec {
            id,
            sample,
            pad_id: None,
            mute_group: 0,
            polyphony: 0,
            velocity: 127,
            gain,
            pan: pan.clamp(-1.0, 1.0),
            tuning: 0.0,
            amp_envelope: EnvelopeSettings::default(),
            filter_envelope: None,
            pitch_envelope: None,
            filter: FilterSettings::default(),
            lfos: [None; MAX_LFOS],
            seed: id.0,
        }
    }
}

impl fmt::Debug for VoiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceSpec")
            .field("id", &self.id)
            .field("pad_id", &self.pad_id)
            .field("velocity", &self.velocity)
            .field("gain", &self.gain)
            .field("pan", &self.pan)
            .field("tuning", &self.tuning)
            .finish()
    }
}

/// A pool slot. Idle slots hold no sample.
pub struct Voice {
    id: VoiceId,
    sample: Option<Arc<LoadedSample>>,
    pad_id: Option<u32>,
    mute_group: u32,
    start_frame: u64,
    sample_rate: u32,
    position: f64,
    base_rate: f64,
    gain: f32,
    pan: f32,
    tuning: f32,
    amp: Envelope,
    filter_envelope: Option<Envelope>,
    pitch_envelope: Option<Envelope>,
    pitch_amount: f32,
    filter: FilterSettings,
    filters: [StateVariableFilter; 2],
    /// The filters are tuned away from `filter.cutoff_hz`.
    cutoff_modulated: bool,
    lfos: [Option<Lfo>; MAX_LFOS],
}

impl Voice {
    pub fn new(sample_rate: u32) -> Voice {
        Voice {
            id: VoiceId(0),
            sample: None,
            pad_id: None,
            mute_group: 0,
            start_frame: 0,
            sample_rate,
            position: 0.0,
            base_rate: 1.0,
            gain: 0.0,
            pan: 0.0,
            tuning: 0.0,
            amp: Envelope::new(EnvelopeSettings::default(), sample_rate),
            filter_envelope: None,
            pitch_envelope: None,
            pitch_amount: 0.0,
            filter: FilterSettings::default(),
            filters: [
                StateVariableFilter::new(sample_rate),
                StateVariableFilter::new(sample_rate),
            ],
            cutoff_modulated: false,
            lfos: [None, None],
        }
    }

    pub fn id(&self) -> VoiceId {
        self.id
    }

    pub fn pad_id(&self) -> Option<u32> {
        self.pad_id
    }

    pub fn mute_group(&self) -> u32 {
        self.mute_group
    }

    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub fn is_active(&self) -> bool {
        self.sample.is_some()
    }

    /// True if this voice should be stolen before `other`.
    pub fn is_older_than(&self, other: &Voice) -> bool {
        (self.start_frame, self.id) < (other.start_frame, other.id)
    }

    /// Starts the voice. The slot must already be retired.
    pub fn start(&mut self, spec: VoiceSpec, start_frame: u64, bpm: f64) {
        debug_assert!(self.sample.is_none(), "starting a voice that is still playing");

        self.id = spec.id;
        self.pad_id = spec.pad_id;
        self.mute_group = spec.mute_group;
        self.start_frame = start_frame;
        self.position = 0.0;
        self.base_rate = f64::from(spec.sample.sample_rate()) / f64::from(self.sample_rate.max(1));
        self.gain = spec.gain;
        self.pan = spec.pan;
        self.tuning = spec.tuning;

        self.amp = Envelope::new(spec.amp_envelope, self.sample_rate);
        self.amp.trigger_on(spec.velocity);
        self.filter_envelope = spec.filter_envelope.map(|settings| {
            let mut envelope = Envelope::new(settings, self.sample_rate);
            envelope.trigger_on(spec.velocity);
            envelope
        });
        self.pitch_amount = spec.pitch_envelope.map_or(0.0, |settings| settings.amount);
        self.pitch_envelope = spec.pitch_envelope.map(|settings| {
            let mut envelope = Envelope::new(settings, self.sample_rate);
            envelope.trigger_on(spec.velocity);
            envelope
        });

        self.set_filter(spec.filter);
        for filter in self.filters.iter_mut() {
            filter.reset();
        }

        for (index, (slot, settings)) in self.lfos.iter_mut().zip(spec.lfos).enumerate() {
            *slot = settings.map(|settings| {
                let mut lfo = Lfo::new(
                    settings,
                    self.sample_rate,
                    bpm,
                    spec.seed.wrapping_add(index as u64),
                );
                lfo.start(start_frame);
                lfo
            });
        }

        self.sample = Some(spec.sample);
    }

    /// Moves the amplitude envelope into release. The voice retires once the
    /// release completes.
    pub fn release(&mut self) {
        self.amp.trigger_off();
        if let Some(envelope) = self.filter_envelope.as_mut() {
            envelope.trigger_off();
        }
        if let Some(envelope) = self.pitch_envelope.as_mut() {
            envelope.trigger_off();
        }
    }

    /// Retires the voice immediately, handing back its sample reference.
    pub fn retire(&mut self) -> Option<Arc<LoadedSample>> {
        self.amp.reset();
        self.sample.take()
    }

    pub fn set_filter(&mut self, filter: FilterSettings) {
        self.filter = filter;
        self.cutoff_modulated = false;
        for channel in self.filters.iter_mut() {
            channel.configure(filter.mode, filter.cutoff_hz, filter.resonance);
        }
    }

    pub fn set_tempo(&mut self, bpm: f64) {
        for lfo in self.lfos.iter_mut().flatten() {
            lfo.set_tempo(bpm);
        }
    }

    /// Mixes `frames` frames into the interleaved `out` buffer and returns
    /// false once the voice is exhausted. The caller retires exhausted voices.
    pub fn render(&mut self, out: &mut [f32], channels: usize, frames: usize) -> bool {
        let Some(sample) = self.sample.as_ref() else {
            return false;
        };
        let last_frame = (sample.frame_count() - 1) as f64;
        let stereo = sample.channel_count() > 1;

        for frame in 0..frames {
            let mut pitch = self.tuning;
            let mut volume = 1.0;
            let mut pan = self.pan;
            let mut octaves = 0.0;
            for lfo in self.lfos.iter_mut().flatten() {
                let value = lfo.process();
                match lfo.destination() {
                    LfoDestination::Pitch => pitch += value,
                    LfoDestination::Volume => volume *= (1.0 + value).max(0.0),
                    LfoDestination::Pan => pan += value,
                    LfoDestination::FilterCutoff => octaves += value,
                }
            }

            let level = self.amp.process();
            if let Some(envelope) = self.pitch_envelope.as_mut() {
                pitch += envelope.process() * self.pitch_amount;
            }
            if let Some(envelope) = self.filter_envelope.as_mut() {
                octaves += envelope.process() * self.filter.envelope_amount;
            }

            let index = self.position as usize;
            let fraction = (self.position - index as f64) as f32;
            let next = if (index as f64) < last_frame { index + 1 } else { index };
            let read = |channel: usize| {
                let a = sample.sample(index, channel);
                let b = sample.sample(next, channel);
                a + (b - a) * fraction
            };
            let mut left = read(0);
            let mut right = if stereo { read(1) } else { left };

            if self.filter.enabled {
                if octaves != 0.0 || self.cutoff_modulated {
                    let cutoff = self.filter.cutoff_hz * octaves.exp2();
                    for channel in self.filters.iter_mut() {
                        channel.configure(self.filter.mode, cutoff, self.filter.resonance);
                    }
                    self.cutoff_modulated = octaves != 0.0;
                }
                left = self.filters[0].process(left);
                right = if stereo {
                    self.filters[1].process(right)
                } else {
                    left
                };
            }

            let gain = self.gain * level * volume;
            let base = frame * channels;
            if channels == 1 {
                out[base] += 0.5 * (left + right) * gain;
            } else {
                let (pan_left, pan_right) = pan_gains(pan);
                out[base] += left * gain * pan_left;
                out[base + 1] += right * gain * pan_right;
            }

            self.position += self.base_rate * f64::from(semitones_to_ratio(pitch));
            if self.position > last_frame || !self.amp.is_active() {
                return false;
            }
        }
        true
    }
}
