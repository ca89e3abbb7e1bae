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
use crate::config::MAX_VELOCITY;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatternError {
    #[error("pattern has no tracks")]
    NoTracks,
    #[error("pattern has no steps")]
    NoSteps,
    #[error("steps per beat must be greater than zero")]
    ZeroStepsPerBeat,
    #[error("track for pad {pad_id} has {actual} steps, expected {expected}")]
    UnequalLength {
        pad_id: u32,
        expected: usize,
        actual: usize,
    },
    #[error("track for pad {pad_id} has velocity {velocity} at step {step}")]
    Velocity { pad_id: u32, step: usize, velocity: u8 },
}

/// The steps of one pad. A velocity of 0 is a rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternTrack {
    pub pad_id: u32,
    pub steps: Vec<u8>,
}

impl PatternTrack {
    pub fn new(pad_id: u32, steps: Vec<u8>) -> PatternTrack {
        PatternTrack { pad_id, steps }
    }
}

/// A looping step pattern. Every track has the same number of steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    steps_per_beat: u32,
    length: usize,
    tracks: Vec<PatternTrack>,
}

impl Pattern {
    pub fn new(steps_per_beat: u32, tracks: Vec<PatternTrack>) -> Result<Pattern, PatternError> {
        if steps_per_beat == 0 {
            return Err(PatternError::ZeroStepsPerBeat);
        }
        let Some(first) = tracks.first() else {
            return Err(PatternError::NoTracks);
        };
        let length = first.steps.len();
        if length == 0 {
            return Err(PatternError::NoSteps);
        }
        for track in &tracks {
            if track.steps.len() != length {
                return Err(PatternError::UnequalLength {
                    pad_id: track.pad_id,
                    expected: length,
                    actual: track.steps.len(),
                });
            }
            if let Some((step, velocity)) = track
                .steps
                .iter()
                .enumerate()
                .find(|(_, velocity)| **velocity > MAX_VELOCITY)
            {
                return Err(PatternError::Velocity {
                    pad_id: track.pad_id,
                    step,
                    velocity: *velocity,
                });
            }
        }

        Ok(Pattern {
            steps_per_beat,
            length,
            tracks,
        })
    }

    pub fn steps_per_beat(&self) -> u32 {
        self.steps_per_beat
    }

    /// Steps before the pattern loops.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn tracks(&self) -> &[PatternTrack] {
        &self.tracks
    }

    /// Pads hit on an absolute step, with their velocities. Steps wrap at
    /// the pattern length.
    pub fn hits_at(&self, step: u64) -> impl Iterator<Item = (u32, u8)> + '_ {
        let index = (step % self.length as u64) as usize;
        self.tracks.iter().filter_map(move |track| {
            let velocity = track.steps[index];
            (velocity > 0).then_some((track.pad_id, velocity))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_on_the_floor() -> Pattern {
        Pattern::new(
            4,
            vec![
                PatternTrack::new(1, vec![127, 0, 0, 0, 100, 0, 0, 0]),
                PatternTrack::new(2, vec![0, 0, 90, 0, 0, 0, 90, 0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_hits_wrap() {
        let pattern = four_on_the_floor();
        assert_eq!(pattern.length(), 8);
        assert_eq!(pattern.hits_at(0).collect::<Vec<_>>(), vec![(1, 127)]);
        assert_eq!(pattern.hits_at(1).count(), 0);
        assert_eq!(pattern.hits_at(2).collect::<Vec<_>>(), vec![(2, 90)]);
        assert_eq!(pattern.hits_at(12).collect::<Vec<_>>(), vec![(1, 100)]);
    }

    #[test]
    fn test_rejects_bad_patterns() {
        assert_eq!(Pattern::new(4, vec![]), Err(PatternError::NoTracks));
        assert_eq!(
            Pattern::new(0, vec![PatternTrack::new(1, vec![1])]),
            Err(PatternError::ZeroStepsPerBeat)
        );
        assert_eq!(
            Pattern::new(4, vec![PatternTrack::new(1, vec![])]),
            Err(PatternError::NoSteps)
        );
        assert_eq!(
            Pattern::new(
                4,
                vec![
                    PatternTrack::new(1, vec![1, 0]),
                    PatternTrack::new(2, vec![1, 0, 0])
                ]
            ),
            Err(PatternError::UnequalLength {
                pad_id: 2,
                expected: 2,
                actual: 3
            })
        );
        assert_eq!(
            Pattern::new(4, vec![PatternTrack::new(3, vec![0, 128])]),
            Err(PatternError::Velocity {
                pad_id: 3,
                step: 1,
                velocity: 128
            })
        );
    }
}
