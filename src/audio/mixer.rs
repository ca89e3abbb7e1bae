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

//! The voice pool and the real-time mixing path.
//!
//! Everything reachable from [`Mixer::render`] runs on the audio callback
//! thread: it never allocates, blocks or logs. Work arrives through a bounded
//! command queue, and sample references released by finished voices go back
//! to the control side through a bounded return queue so that the last
//! reference to a sample is dropped off the audio thread.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::engine::{EngineStatus, MixerCommand, ScheduledTrigger};
use crate::samples::{LoadedSample, Voice, VoiceSpec};

/// Sizes fixed when the mixer is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub max_voices: usize,
    pub scheduled_capacity: usize,
    /// Upper bound on queued commands handled per callback.
    pub commands_per_callback: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        MixerConfig {
            sample_rate: 44100,
            channels: 2,
            max_voices: 64,
            scheduled_capacity: 256,
            commands_per_callback: 256,
        }
    }
}

pub struct Mixer {
    config: MixerConfig,
    voices: Vec<Voice>,
    pending: Vec<ScheduledTrigger>,
    commands: Receiver<MixerCommand>,
    returns: Sender<Arc<LoadedSample>>,
    status: Arc<EngineStatus>,
    frame: u64,
    bpm: f64,
}

impl Mixer {
    pub fn new(
        config: MixerConfig,
        commands: Receiver<MixerCommand>,
        returns: Sender<Arc<LoadedSample>>,
        status: Arc<EngineStatus>,
    ) -> Mixer {
        let mut mixer = Mixer {
            config,
            voices: Vec::new(),
            pending: Vec::new(),
            commands,
            returns,
            status,
            frame: 0,
            bpm: 120.0,
        };
        mixer.configure(config.sample_rate, config.channels);
        mixer
    }

    /// Rebuilds the voice pool for a new output format. Allocates, so this
    /// must only be called while no stream is running.
    pub fn configure(&mut self, sample_rate: u32, channels: u16) {
        self.stop_all();
        self.clear_pending(0, false);
        self.config.sample_rate = sample_rate;
        self.config.channels = channels.max(1);
        self.voices = (0..self.config.max_voices.max(1))
            .map(|_| Voice::new(sample_rate))
            .collect();
        self.pending = Vec::with_capacity(self.config.scheduled_capacity.max(1));
        self.status.set_sample_rate(sample_rate);
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Absolute frame at the start of the next buffer.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|voice| voice.is_active()).count()
    }

    pub fn pending_triggers(&self) -> usize {
        self.pending.len()
    }

    /// Renders one interleaved buffer.
    pub fn render(&mut self, out: &mut [f32]) {
        let channels = usize::from(self.config.channels);
        let frames = out.len() / channels;
        let start = self.frame;
        let end = start + frames as u64;

        self.drain_commands();
        out.fill(0.0);

        // Split the buffer at every frame where a pending trigger is due.
        let mut offset = 0;
        loop {
            let now = start + offset as u64;
            self.realize_due(now);

            let next = self
                .pending
                .first()
                .map(|trigger| trigger.target_frame)
                .filter(|target| *target < end);
            let split = match next {
                Some(target) => (target - start) as usize,
                None => frames,
            };
            self.render_voices(&mut out[offset * channels..split * channels], split - offset);
            offset = split;
            if offset >= frames {
                break;
            }
        }

        self.frame = end;
        self.status.set_current_frame(end);
        self.status.set_active_voices(self.active_voices());
    }

    /// Advances the timeline without producing audio. Used when the callback
    /// cannot take the mixer lock, so scheduled frames stay aligned with the
    /// device.
    pub fn skip(&mut self, frames: usize) {
        self.frame += frames as u64;
        self.status.set_current_frame(self.frame);
    }

    pub fn stop_all(&mut self) {
        for index in 0..self.voices.len() {
            if self.voices[index].is_active() {
                self.retire(index);
            }
        }
    }

    fn drain_commands(&mut self) {
        for _ in 0..self.config.commands_per_callback {
            let Ok(command) = self.commands.try_recv() else {
                return;
            };
            match command {
                MixerCommand::Trigger(spec) => self.start_voice(spec, self.frame),
                MixerCommand::Schedule(trigger) => {
                    if self.pending.len() < self.pending.capacity() {
                        // Sorted by target frame, first queued first within a frame.
                        let index = self
                            .pending
                            .partition_point(|pending| pending.target_frame <= trigger.target_frame);
                        self.pending.insert(index, trigger);
                    } else {
                        self.status.record_missed();
                        self.recycle(trigger.spec.sample);
                    }
                }
                MixerCommand::Stop(id) => {
                    if let Some(voice) = self
                        .voices
                        .iter_mut()
                        .find(|voice| voice.is_active() && voice.id() == id)
                    {
                        voice.release();
                    }
                }
                MixerCommand::StopAll => self.stop_all(),
                MixerCommand::SetPadFilter { pad_id, settings } => {
                    for voice in self.voices.iter_mut() {
                        if voice.is_active() && voice.pad_id() == Some(pad_id) {
                            voice.set_filter(settings);
                        }
                    }
                }
                MixerCommand::ClearScheduled {
                    from_frame,
                    pattern_only,
                } => self.clear_pending(from_frame, pattern_only),
                MixerCommand::SetTempo(bpm) => {
                    self.bpm = bpm;
                    for voice in self.voices.iter_mut().filter(|voice| voice.is_active()) {
                        voice.set_tempo(bpm);
                    }
                }
            }
        }
    }

    fn clear_pending(&mut self, from_frame: u64, pattern_only: bool) {
        let mut index = 0;
        while index < self.pending.len() {
            let trigger = &self.pending[index];
            if trigger.target_frame >= from_frame && (!pattern_only || trigger.is_pattern()) {
                let trigger = self.pending.remove(index);
                self.recycle(trigger.spec.sample);
            } else {
                index += 1;
            }
        }
    }

    /// Starts every pending trigger due at or before `now`. Triggers whose
    /// target already passed are late: they still play, but count as missed.
    fn realize_due(&mut self, now: u64) {
        while self
            .pending
            .first()
            .is_some_and(|trigger| trigger.target_frame <= now)
        {
            let trigger = self.pending.remove(0);
            if trigger.target_frame < self.frame {
                self.status.record_missed();
            }
            self.status.record_realized(
                now.saturating_sub(trigger.enqueued_frame),
                now - trigger.target_frame,
            );
            self.start_voice(trigger.spec, now);
        }
    }

    fn render_voices(&mut self, out: &mut [f32], frames: usize) {
        if frames == 0 {
            return;
        }
        let channels = usize::from(self.config.channels);
        for index in 0..self.voices.len() {
            if self.voices[index].is_active() && !self.voices[index].render(out, channels, frames) {
                self.retire(index);
            }
        }
    }

    fn start_voice(&mut self, spec: VoiceSpec, frame: u64) {
        if spec.mute_group != 0 {
            for index in 0..self.voices.len() {
                let voice = &self.voices[index];
                if voice.is_active() && voice.mute_group() == spec.mute_group {
                    self.steal(index);
                }
            }
        }

        let cap = spec.polyphony as usize;
        if let (Some(pad_id), true) = (spec.pad_id, cap > 0) {
            while self.count_pad_voices(pad_id) >= cap {
                match self.oldest(|voice| voice.pad_id() == Some(pad_id)) {
                    Some(index) => self.steal(index),
                    None => break,
                }
            }
        }

        let slot = match self.voices.iter().position(|voice| !voice.is_active()) {
            Some(index) => Some(index),
            None => {
                let oldest = self.oldest(|_| true);
                if let Some(index) = oldest {
                    self.steal(index);
                }
                oldest
            }
        };
        match slot {
            Some(index) => self.voices[index].start(spec, frame, self.bpm),
            None => self.recycle(spec.sample),
        }
    }

    fn count_pad_voices(&self, pad_id: u32) -> usize {
        self.voices
            .iter()
            .filter(|voice| voice.is_active() && voice.pad_id() == Some(pad_id))
            .count()
    }

    /// Index of the oldest active voice matching `predicate`.
    fn oldest(&self, predicate: impl Fn(&Voice) -> bool) -> Option<usize> {
        let mut oldest: Option<usize> = None;
        for (index, voice) in self.voices.iter().enumerate() {
            if !voice.is_active() || !predicate(voice) {
                continue;
            }
            match oldest {
                Some(current) if !voice.is_older_than(&self.voices[current]) => {}
                _ => oldest = Some(index),
            }
        }
        oldest
    }

    fn steal(&mut self, index: usize) {
        self.status.record_stolen();
        self.retire(index);
    }

    fn retire(&mut self, index: usize) {
        if let Some(sample) = self.voices[index].retire() {
            self.recycle(sample);
        }
    }

    fn recycle(&self, sample: Arc<LoadedSample>) {
        // A full queue drops the reference here instead.
        let _ = self.returns.try_send(sample);
    }
}
