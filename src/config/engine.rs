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
use std::{path::Path, time::Duration};

use config::{Config, Environment, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use crate::audio::{MixerConfig, StreamParams};
use crate::scheduler::{ClockConfig, SchedulerConfig};

const DEFAULT_SAMPLE_RATE: u32 = 48000;
const DEFAULT_FRAMES_PER_BURST: u32 = 256;
const DEFAULT_CHANNELS: u16 = 2;
const DEFAULT_MAX_VOICES: usize = 64;
const DEFAULT_SCHEDULED_CAPACITY: usize = 256;
const DEFAULT_COMMAND_QUEUE_SIZE: usize = 1024;
const DEFAULT_COMMANDS_PER_CALLBACK: usize = 256;
const DEFAULT_LOOKAHEAD: Duration = Duration::from_millis(10);
const DEFAULT_SCHEDULER_INTERVAL: Duration = Duration::from_millis(5);
const DEFAULT_BPM: f64 = 120.0;

/// A YAML representation of the engine configuration. Every value can be
/// overridden with a `PADCORE_` environment variable, e.g. `PADCORE_SAMPLE_RATE`.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct EngineConfig {
    /// Output device name. The host default is used when unset.
    device: Option<String>,

    /// Output sample rate in Hz (default: 48000)
    sample_rate: Option<u32>,

    /// Frames per device callback (default: 256)
    frames_per_burst: Option<u32>,

    /// Output channels (default: 2)
    channels: Option<u16>,

    /// Ask the device for a fixed buffer of frames_per_burst frames (default: true)
    low_latency: Option<bool>,

    /// Size of the voice pool (default: 64)
    max_voices: Option<usize>,

    /// Scheduled triggers the mixer can hold (default: 256)
    scheduled_capacity: Option<usize>,

    /// Capacity of the command queue into the mixer (default: 1024)
    command_queue_size: Option<usize>,

    /// Commands the mixer applies per callback (default: 256)
    commands_per_callback: Option<usize>,

    /// Safety margin added to scheduled step targets, e.g. "10ms".
    lookahead: Option<String>,

    /// How often the sequencer thread runs a scheduling pass, e.g. "5ms".
    scheduler_interval: Option<String>,

    /// Initial tempo (default: 120)
    bpm: Option<f64>,

    /// External clock pulse intervals averaged (default: 24)
    clock_window: Option<usize>,

    /// Relative deviation above which a clock pulse is rejected (default: 0.25)
    clock_tolerance: Option<f64>,
}

impl EngineConfig {
    /// An engine configuration with every value at its default.
    pub fn new() -> EngineConfig {
        EngineConfig::default()
    }

    /// Loads the configuration from a YAML file, applying `PADCORE_`
    /// environment overrides.
    pub fn deserialize(path: &Path) -> Result<EngineConfig, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("PADCORE").try_parsing(true))
            .build()?
            .try_deserialize::<EngineConfig>()?)
    }

    pub fn with_device(mut self, device: &str) -> EngineConfig {
        self.device = Some(device.to_string());
        self
    }

    pub fn with_bpm(mut self, bpm: f64) -> EngineConfig {
        self.bpm = Some(bpm);
        self
    }

    pub fn with_max_voices(mut self, max_voices: usize) -> EngineConfig {
        self.max_voices = Some(max_voices);
        self
    }

    pub fn with_lookahead(mut self, lookahead: &str) -> EngineConfig {
        self.lookahead = Some(lookahead.to_string());
        self
    }

    pub fn with_command_queue_size(mut self, size: usize) -> EngineConfig {
        self.command_queue_size = Some(size);
        self
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn frames_per_burst(&self) -> u32 {
        self.frames_per_burst.unwrap_or(DEFAULT_FRAMES_PER_BURST).max(1)
    }

    pub fn channels(&self) -> u16 {
        self.channels.unwrap_or(DEFAULT_CHANNELS).clamp(1, 2)
    }

    pub fn low_latency(&self) -> bool {
        self.low_latency.unwrap_or(true)
    }

    pub fn command_queue_size(&self) -> usize {
        self.command_queue_size.unwrap_or(DEFAULT_COMMAND_QUEUE_SIZE).max(1)
    }

    pub fn bpm(&self) -> f64 {
        self.bpm.unwrap_or(DEFAULT_BPM)
    }

    pub fn lookahead(&self) -> Result<Duration, ConfigError> {
        parse_duration("lookahead", &self.lookahead, DEFAULT_LOOKAHEAD)
    }

    pub fn scheduler_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("scheduler_interval", &self.scheduler_interval, DEFAULT_SCHEDULER_INTERVAL)
    }

    /// Stream parameters as configured.
    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            sample_rate: self.sample_rate(),
            frames_per_burst: self.frames_per_burst(),
            channels: self.channels(),
            low_latency: self.low_latency(),
        }
    }

    pub fn mixer_config(&self) -> MixerConfig {
        MixerConfig {
            sample_rate: self.sample_rate(),
            channels: self.channels(),
            max_voices: self.max_voices.unwrap_or(DEFAULT_MAX_VOICES).max(1),
            scheduled_capacity: self
                .scheduled_capacity
                .unwrap_or(DEFAULT_SCHEDULED_CAPACITY)
                .max(1),
            commands_per_callback: self
                .commands_per_callback
                .unwrap_or(DEFAULT_COMMANDS_PER_CALLBACK)
                .max(1),
        }
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig, ConfigError> {
        let defaults = ClockConfig::default();
        Ok(SchedulerConfig {
            sample_rate: self.sample_rate(),
            bpm: self.bpm(),
            lookahead: self.lookahead()?,
            pass_interval: self.scheduler_interval()?,
            clock: ClockConfig {
                window: self.clock_window.unwrap_or(defaults.window),
                tolerance: self.clock_tolerance.unwrap_or(defaults.tolerance),
                ..defaults
            },
        })
    }
}

fn parse_duration(
    field: &'static str,
    value: &Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => DurationString::from_string(value.clone())
            .map(Duration::from)
            .map_err(|e| ConfigError::InvalidDuration {
                field,
                value: value.clone(),
                reason: e.to_string(),
            }),
        None => Ok(default),
    }
}
