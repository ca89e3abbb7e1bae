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

//! Decoded sample storage.
//!
//! The engine never parses audio files itself. Hosts hand over interleaved f32
//! PCM in a [`PcmSource`] and the cache keeps it behind an `Arc` so voices can
//! share it without copying.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum PcmError {
    #[error("sample has no channels")]
    NoChannels,
    #[error("sample rate must be non-zero")]
    ZeroSampleRate,
    #[error("sample has no frames")]
    Empty,
    #[error("{len} samples is not a whole number of {channels}-channel frames")]
    PartialFrame { len: usize, channels: u16 },
    #[error("unable to read WAV file: {0}")]
    Wav(#[from] hound::Error),
}

/// Interleaved PCM handed over by the host.
#[derive(Clone, PartialEq)]
pub struct PcmSource {
    data: Vec<f32>,
    channel_count: u16,
    sample_rate: u32,
}

impl PcmSource {
    pub fn new(data: Vec<f32>, channel_count: u16, sample_rate: u32) -> Result<PcmSource, PcmError> {
        if channel_count == 0 {
            return Err(PcmError::NoChannels);
        }
        if sample_rate == 0 {
            return Err(PcmError::ZeroSampleRate);
        }
        if data.is_empty() {
            return Err(PcmError::Empty);
        }
        if data.len() % usize::from(channel_count) != 0 {
            return Err(PcmError::PartialFrame {
                len: data.len(),
                channels: channel_count,
            });
        }
        Ok(PcmSource {
            data,
            channel_count,
            sample_rate,
        })
    }

    /// Reads a whole WAV file into memory, scaling integer formats to [-1, 1].
    pub fn from_wav(path: &Path) -> Result<PcmSource, PcmError> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let data = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                // i64 so that 32-bit samples do not overflow the shift.
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|sample| sample as f32 * scale))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        debug!(path = ?path, channels = spec.channels, sample_rate = spec.sample_rate, "Read WAV file");
        PcmSource::new(data, spec.channels, spec.sample_rate)
    }

    pub fn frame_count(&self) -> usize {
        self.data.len() / usize::from(self.channel_count)
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl fmt::Debug for PcmSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcmSource")
            .field("frames", &self.frame_count())
            .field("channel_count", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// Immutable decoded sample shared between the cache and playing voices.
pub struct LoadedSample {
    data: Vec<f32>,
    channel_count: u16,
    sample_rate: u32,
    frame_count: usize,
}

impl LoadedSample {
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Reads one channel of one frame. Callers must stay below `frame_count`.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        debug_assert!(frame < self.frame_count, "read past the last frame");
        let channels = usize::from(self.channel_count);
        self.data[frame * channels + channel.min(channels - 1)]
    }
}

impl From<PcmSource> for LoadedSample {
    fn from(source: PcmSource) -> Self {
        let frame_count = source.frame_count();
        LoadedSample {
            data: source.data,
            channel_count: source.channel_count,
            sample_rate: source.sample_rate,
            frame_count,
        }
    }
}

impl fmt::Debug for LoadedSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedSample")
            .field("frames", &self.frame_count)
            .field("channel_count", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// Maps sample ids to loaded samples.
#[derive(Default)]
pub struct SampleCache {
    samples: HashMap<String, Arc<LoadedSample>>,
}

impl SampleCache {
    pub fn new() -> SampleCache {
        SampleCache::default()
    }

    /// Stores a sample, replacing any sample with the same id. Voices still
    /// playing the replaced sample keep their reference.
    pub fn insert(&mut self, id: &str, source: PcmSource) -> Arc<LoadedSample> {
        let sample = Arc::new(LoadedSample::from(source));
        info!(
            id,
            frames = sample.frame_count(),
            channels = sample.channel_count(),
            sample_rate = sample.sample_rate(),
            memory_kb = sample.memory_size() / 1024,
            "Sample loaded"
        );
        self.samples.insert(id.to_string(), sample.clone());
        sample
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<LoadedSample>> {
        self.samples.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<LoadedSample>> {
        self.samples.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.samples.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Total memory used by cached samples, in bytes.
    pub fn memory_size(&self) -> usize {
        self.samples.values().map(|sample| sample.memory_size()).sum()
    }
}
