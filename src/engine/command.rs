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
use std::fmt;

use crate::config::FilterSettings;
use crate::samples::{VoiceId, VoiceSpec};

/// Where a scheduled trigger came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOrigin {
    /// Pushed by the host through `schedule_step_trigger`.
    Manual,
    /// Planned by the sequencer for a pattern step.
    Pattern { step: u64 },
}

/// A trigger waiting for its output frame.
#[derive(Clone)]
pub struct ScheduledTrigger {
    pub pad_id: Option<u32>,
    pub velocity: u8,
    pub target_frame: u64,
    pub origin: TriggerOrigin,
    pub spec: VoiceSpec,
    /// Mixer frame at the time the trigger was queued.
    pub enqueued_frame: u64,
}

impl ScheduledTrigger {
    pub fn is_pattern(&self) -> bool {
        matches!(self.origin, TriggerOrigin::Pattern { .. })
    }
}

impl fmt::Debug for ScheduledTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTrigger")
            .field("pad_id", &self.pad_id)
            .field("velocity", &self.velocity)
            .field("target_frame", &self.target_frame)
            .field("origin", &self.origin)
            .field("voice", &self.spec.id)
            .finish()
    }
}

/// Messages from the control side to the mixer.
#[derive(Debug)]
pub enum MixerCommand {
    /// Start a voice at the beginning of the next buffer.
    Trigger(VoiceSpec),
    /// Start a voice at an exact frame.
    Schedule(ScheduledTrigger),
    /// Release a voice.
    Stop(VoiceId),
    /// Silence every voice immediately.
    StopAll,
    /// Replace the filter of the pad's playing voices.
    SetPadFilter { pad_id: u32, settings: FilterSettings },
    /// Drop pending triggers due at or after `from_frame`.
    ClearScheduled { from_frame: u64, pattern_only: bool },
    /// Retune tempo-synced LFOs.
    SetTempo(f64),
}
