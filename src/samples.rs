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

//! Sample playback.
//!
//! This module provides:
//! - In-memory sample storage shared between voices
//! - Pad layer selection (velocity, round-robin, random)
//! - The per-voice playback and modulation path

mod cache;
mod layers;
mod voice;

pub use cache::{LoadedSample, PcmError, PcmSource, SampleCache};
pub use layers::PadState;
pub use voice::{Voice, VoiceId, VoiceSpec};
