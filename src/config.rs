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
use std::error::Error;
use std::path::Path;

use tracing::info;

use crate::engine::Engine;
use crate::samples::PcmSource;

mod engine;
mod error;
mod kit;
mod pad;

pub use self::engine::EngineConfig;
pub use self::error::ConfigError;
pub use self::kit::{parse_steps, Kit, PatternConfig, TrackConfig};
pub use self::pad::{
    EnvelopeSettings, EnvelopeShape, FilterMode, FilterSettings, LayerTriggerRule, LfoDestination,
    LfoRate, LfoSettings, LfoWaveform, PadError, PadSettings, SampleLayer, TempoDivision,
    MAX_LFOS, MAX_VELOCITY,
};

/// Loads the engine configuration, falling back to defaults when no file is given.
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    match path {
        Some(path) => EngineConfig::deserialize(path),
        None => Ok(EngineConfig::new()),
    }
}

/// Decodes every sample of the kit and registers its pads and pattern with
/// the engine.
pub fn load_kit(engine: &Engine, kit: &Kit) -> Result<(), Box<dyn Error>> {
    for (id, file) in kit.sample_files() {
        let source = PcmSource::from_wav(&file)
            .map_err(|e| format!("error loading sample {} from {}: {}", id, file.display(), e))?;
        if !engine.load_sample(id, source) {
            return Err(format!("sample {} was rejected by the engine", id).into());
        }
    }
    for pad in kit.pads() {
        if !engine.register_pad(pad.clone()) {
            return Err(format!("pad {} was rejected by the engine", pad.id).into());
        }
    }
    if let Some(bpm) = kit.bpm() {
        engine.set_tempo(bpm);
    }
    if let Some(pattern) = kit.pattern()? {
        engine.set_pattern(pattern);
    }
    info!(
        samples = kit.sample_files().count(),
        pads = kit.pads().len(),
        "Kit loaded"
    );
    Ok(())
}
