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
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::Deserialize;

use super::error::ConfigError;
use super::{PadSettings, MAX_VELOCITY};
use crate::scheduler::{Pattern, PatternTrack};

/// Velocity of an `x` step.
const HIT_VELOCITY: u8 = 100;

fn default_steps_per_beat() -> u32 {
    4
}

/// One pad's row in a kit pattern.
#[derive(Deserialize, Clone, Debug)]
pub struct TrackConfig {
    pub pad: u32,
    /// One character per step: `.` or `-` rest, `x` hit, `X` accent, `1`-`9`
    /// graded velocities. Whitespace and `|` are ignored.
    pub steps: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct PatternConfig {
    #[serde(default = "default_steps_per_beat")]
    pub steps_per_beat: u32,
    pub tracks: Vec<TrackConfig>,
}

/// A YAML kit: the samples to load, the pads that play them and an optional
/// step pattern.
#[derive(Deserialize, Clone, Debug)]
pub struct Kit {
    bpm: Option<f64>,
    /// Sample id to WAV file, relative to the kit file.
    #[serde(default)]
    samples: BTreeMap<String, PathBuf>,
    pads: Vec<PadSettings>,
    pattern: Option<PatternConfig>,
    #[serde(skip)]
    base_path: PathBuf,
}

impl Kit {
    /// Parses and validates a kit file.
    pub fn deserialize(path: &Path) -> Result<Kit, ConfigError> {
        let mut kit = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Kit>()?;
        kit.base_path = path.parent().map(Path::to_path_buf).unwrap_or_default();
        kit.validate()?;
        Ok(kit)
    }

    pub fn bpm(&self) -> Option<f64> {
        self.bpm
    }

    pub fn pads(&self) -> &[PadSettings] {
        &self.pads
    }

    /// Sample ids and the files they are loaded from.
    pub fn sample_files(&self) -> impl Iterator<Item = (&str, PathBuf)> + '_ {
        self.samples
            .iter()
            .map(|(id, file)| (id.as_str(), self.base_path.join(file)))
    }

    /// The kit's pattern, if it has one.
    pub fn pattern(&self) -> Result<Option<Pattern>, ConfigError> {
        let Some(pattern) = &self.pattern else {
            return Ok(None);
        };
        let tracks = pattern
            .tracks
            .iter()
            .map(|track| -> Result<PatternTrack, ConfigError> {
                Ok(PatternTrack::new(track.pad, parse_steps(track.pad, &track.steps)?))
            })
            .collect::<Result<Vec<PatternTrack>, ConfigError>>()?;
        Ok(Some(Pattern::new(pattern.steps_per_beat, tracks)?))
    }

    /// Checks every pad, that every layer's sample is declared and that the
    /// pattern only plays known pads.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for pad in &self.pads {
            pad.validate()?;
            if !ids.insert(pad.id) {
                return Err(ConfigError::DuplicatePad(pad.id));
            }
            if let Some(layer) = pad
                .layers
                .iter()
                .find(|layer| !self.samples.contains_key(&layer.sample))
            {
                return Err(ConfigError::UnknownSample {
                    pad: pad.id,
                    sample: layer.sample.clone(),
                });
            }
        }
        if let Some(pattern) = &self.pattern {
            if let Some(track) = pattern.tracks.iter().find(|track| !ids.contains(&track.pad)) {
                return Err(ConfigError::UnknownPad(track.pad));
            }
        }
        self.pattern()?;
        Ok(())
    }
}

/// Parses a step string into velocities, 0 meaning rest.
pub fn parse_steps(pad: u32, steps: &str) -> Result<Vec<u8>, ConfigError> {
    steps
        .chars()
        .filter(|step| !step.is_whitespace() && *step != '|')
        .map(|step| match step {
            '.' | '-' => Ok(0),
            'x' => Ok(HIT_VELOCITY),
            'X' => Ok(MAX_VELOCITY),
            '0'..='9' => {
                let level = step.to_digit(10).unwrap_or(0) as u8;
                Ok((level * 14).min(MAX_VELOCITY))
            }
            _ => Err(ConfigError::InvalidStep { pad, step }),
        })
        .collect()
}
