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

//! Real-time core of a pad sampler: a voice mixer that renders sample voices
//! with envelopes, filters and LFOs into device buffers, and a step scheduler
//! that queues pattern triggers at exact output frames.

pub mod audio;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod samples;
pub mod scheduler;

#[cfg(test)]
mod testutil;

pub use engine::{Engine, SequencerHandle, TimingStatistics};
pub use scheduler::Transport;
