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
use crate::config::PadError;
use crate::scheduler::PatternError;

/// Typed error for config load/parse failures so callers can distinguish
/// e.g. file-not-found from parse errors without string matching.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid duration for {field}: {value} ({reason})")]
    InvalidDuration {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid pad: {0}")]
    InvalidPad(#[from] PadError),
    #[error("pad {0} is defined more than once")]
    DuplicatePad(u32),
    #[error("pad {pad} uses unknown sample {sample}")]
    UnknownSample { pad: u32, sample: String },
    #[error("pattern references unknown pad {0}")]
    UnknownPad(u32),
    #[error("pattern track for pad {pad} has invalid step '{step}'")]
    InvalidStep { pad: u32, step: char },
    #[error("invalid pattern: {0}")]
    Pattern(#[from] PatternError),
}
