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

//! Turns a pad hit into a concrete voice.

use rand::{rngs::SmallRng, Rng, SeedableRng};
use tracing::debug;

use crate::config::{LayerTriggerRule, PadSettings, SampleLayer, MAX_LFOS, MAX_VELOCITY};

use super::{SampleCache, VoiceId, VoiceSpec};

/// Layer selection state kept alongside a registered pad.
#[derive(Debug, Clone)]
pub struct PadState {
    round_robin: usize,
    rng: SmallRng,
}

impl PadState {
    pub fn new(seed: u64) -> PadState {
        PadState {
            round_robin: 0,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Picks the layer to play for a velocity according to the pad's rule.
    pub fn select_layer<'a>(&mut self, pad: &'a PadSettings, velocity: u8) -> Option<&'a SampleLayer> {
        let matching = move || pad.layers.iter().filter(move |layer| layer.accepts(velocity));
        let count = matching().count();
        if count == 0 {
            return None;
        }
        let index = match pad.trigger_rule {
            LayerTriggerRule::Velocity => 0,
            LayerTriggerRule::RoundRobin => {
                let index = self.round_robin % count;
                self.round_robin = self.round_robin.wrapping_add(1);
                index
            }
            LayerTriggerRule::Random => self.rng.gen_range(0..count),
        };
        matching().nth(index)
    }

    /// Resolves a hit into a voice spec. Returns `None` if no layer matches or
    /// the layer's sample is not loaded.
    pub fn resolve(
        &mut self,
        pad: &PadSettings,
        velocity: u8,
        cache: &SampleCache,
        id: VoiceId,
    ) -> Option<VoiceSpec> {
        if velocity > MAX_VELOCITY {
            debug!(pad = pad.id, velocity, "Velocity out of range");
            return None;
        }
        let Some(layer) = self.select_layer(pad, velocity) else {
            debug!(pad = pad.id, velocity, "No layer matches velocity");
            return None;
        };
        let Some(sample) = cache.get(&layer.sample) else {
            debug!(pad = pad.id, sample = %layer.sample, "Sample not loaded");
            return None;
        };

        let mut lfos = [None; MAX_LFOS];
        for (slot, lfo) in lfos.iter_mut().zip(pad.lfos.iter()) {
            *slot = Some(*lfo);
        }

        Some(VoiceSpec {
            id,
            sample,
            pad_id: Some(pad.id),
            mute_group: pad.mute_group,
            polyphony: pad.polyphony,
            velocity,
            gain: pad.volume * layer.gain * f32::from(velocity) / f32::from(MAX_VELOCITY),
            pan: (pad.pan + layer.pan).clamp(-1.0, 1.0),
            tuning: pad.tuning + layer.tuning,
            amp_envelope: pad.amp_envelope,
            filter_envelope: pad.filter_envelope,
            pitch_envelope: pad.pitch_envelope,
            filter: pad.filter,
            lfos,
            seed: id.0 ^ u64::from(pad.id).rotate_left(32),
        })
    }
}
