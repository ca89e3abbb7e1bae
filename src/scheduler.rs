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

//! Plans pattern steps onto the output timeline ahead of real time.
//!
//! The scheduler never talks to the mixer itself. Every operation that
//! invalidates already queued steps returns the frame from which queued
//! pattern triggers have to be dropped, and [`Scheduler::plan`] returns the
//! steps that became due. The caller turns those into mixer commands.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, info};

pub mod clock;
pub mod pattern;
pub mod timing;

pub use clock::{ClockConfig, ExternalClock};
pub use pattern::{Pattern, PatternError, PatternTrack};

pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 400.0;

/// Steps per beat used while no pattern is set.
const DEFAULT_STEPS_PER_BEAT: u32 = 4;

/// Smallest clock-derived tempo change that causes a replan.
const CLOCK_TEMPO_THRESHOLD: f64 = 0.05;

/// Upper bound of steps planned in a single pass.
const MAX_STEPS_PER_PASS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Play from the first step.
    Start,
    /// Stop and remember the position.
    Stop,
    /// Resume from the remembered position.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub sample_rate: u32,
    pub bpm: f64,
    /// Safety margin added to every target frame.
    pub lookahead: Duration,
    /// How far past the lookahead a pass plans, normally the pass interval.
    pub pass_interval: Duration,
    pub clock: ClockConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            sample_rate: 44100,
            bpm: 120.0,
            lookahead: Duration::from_millis(10),
            pass_interval: Duration::from_millis(5),
            clock: ClockConfig::default(),
        }
    }
}

/// One pad hit that became due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedStep {
    pub step: u64,
    pub pad_id: u32,
    pub velocity: u8,
    pub target_frame: u64,
}

#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    bpm: f64,
    pattern: Option<Pattern>,
    state: TransportState,
    external_clock: Option<ExternalClock>,
    latency_frames: u64,
    /// Speaker-side frame at which `anchor_step` sounds.
    anchor_frame: f64,
    anchor_step: u64,
    /// First step not planned yet.
    next_step: u64,
    resume_step: u64,
    /// Planned steps and their target frames, oldest first.
    planned: VecDeque<(u64, u64)>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Scheduler {
        Scheduler {
            bpm: config.bpm.clamp(MIN_BPM, MAX_BPM),
            config,
            pattern: None,
            state: TransportState::Stopped,
            external_clock: None,
            latency_frames: 0,
            anchor_frame: 0.0,
            anchor_step: 0,
            next_step: 0,
            resume_step: 0,
            planned: VecDeque::new(),
        }
    }

    /// Changes the output sample rate. A running transport is stopped, since
    /// the frame timeline restarts with the new stream.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if self.state == TransportState::Playing {
            self.resume_step = self.next_step;
            self.state = TransportState::Stopped;
        }
        self.planned.clear();
        self.config.sample_rate = sample_rate;
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn pattern(&self) -> Option<&Pattern> {
        self.pattern.as_ref()
    }

    pub fn lookahead_frames(&self) -> u64 {
        timing::duration_to_frames(self.config.lookahead, self.config.sample_rate)
    }

    pub fn is_external_clock_enabled(&self) -> bool {
        self.external_clock.is_some()
    }

    /// Output latency used for the next targets.
    pub fn set_latency_frames(&mut self, latency_frames: u64) {
        self.latency_frames = latency_frames;
    }

    pub fn frames_per_step(&self) -> f64 {
        let steps_per_beat = self
            .pattern
            .as_ref()
            .map(Pattern::steps_per_beat)
            .unwrap_or(DEFAULT_STEPS_PER_BEAT);
        timing::frames_per_step(self.bpm, steps_per_beat, self.config.sample_rate)
    }

    /// Sets the tempo. Ignored while the external clock drives the tempo.
    pub fn set_tempo(&mut self, bpm: f64, clear_from: u64) -> Option<u64> {
        if self.external_clock.is_some() {
            debug!(bpm, "Ignoring tempo change while following the external clock");
            return None;
        }
        if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
            debug!(bpm, "Ignoring out of range tempo");
            return None;
        }
        self.apply_tempo(bpm, clear_from)
    }

    /// Replaces the pattern. The musical position is kept.
    pub fn set_pattern(&mut self, pattern: Pattern, clear_from: u64) -> Option<u64> {
        let playing = self.state == TransportState::Playing;
        if playing {
            self.reanchor(clear_from);
        }
        info!(
            length = pattern.length(),
            tracks = pattern.tracks().len(),
            "Pattern set"
        );
        self.pattern = Some(pattern);
        playing.then_some(clear_from)
    }

    pub fn set_external_clock_enabled(&mut self, enabled: bool) {
        match (enabled, self.external_clock.is_some()) {
            (true, false) => self.external_clock = Some(ExternalClock::new(self.config.clock)),
            (false, true) => self.external_clock = None,
            _ => return,
        }
        info!(enabled, "External clock");
    }

    /// Feeds an external clock pulse received at `at`.
    pub fn handle_clock_pulse(&mut self, at: Instant, clear_from: u64) -> Option<u64> {
        let bpm = self.external_clock.as_mut()?.pulse(at)?;
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        if (bpm - self.bpm).abs() <= CLOCK_TEMPO_THRESHOLD {
            return None;
        }
        self.apply_tempo(bpm, clear_from)
    }

    pub fn handle_transport(&mut self, transport: Transport, clear_from: u64) -> Option<u64> {
        info!(?transport, step = self.next_step, "Transport");
        match transport {
            Transport::Start => {
                self.restart_at(0, clear_from);
                Some(clear_from)
            }
            Transport::Stop => {
                if self.state != TransportState::Playing {
                    return None;
                }
                self.resume_step = self.first_unrealized(clear_from);
                self.state = TransportState::Stopped;
                self.planned.clear();
                Some(clear_from)
            }
            Transport::Continue => {
                if self.state == TransportState::Stopped {
                    self.restart_at(self.resume_step, clear_from);
                }
                None
            }
        }
    }

    /// Plans every step whose target frame falls before
    /// `now + lookahead + pass interval`.
    pub fn plan(&mut self, now: u64) -> Vec<PlannedStep> {
        while self.planned.front().is_some_and(|(_, target)| *target < now) {
            self.planned.pop_front();
        }
        let frames_per_step = self.frames_per_step();
        if self.state != TransportState::Playing || frames_per_step <= 0.0 {
            return Vec::new();
        }

        let lookahead_frames = self.lookahead_frames();
        let horizon = now
            + lookahead_frames
            + timing::duration_to_frames(self.config.pass_interval, self.config.sample_rate);
        let mut due = Vec::new();
        for _ in 0..MAX_STEPS_PER_PASS {
            let target_frame = timing::step_target_frame(
                self.anchor_frame,
                self.next_step - self.anchor_step,
                frames_per_step,
                self.latency_frames,
                lookahead_frames,
            );
            if target_frame >= horizon {
                break;
            }
            if let Some(pattern) = &self.pattern {
                due.extend(
                    pattern
                        .hits_at(self.next_step)
                        .map(|(pad_id, velocity)| PlannedStep {
                            step: self.next_step,
                            pad_id,
                            velocity,
                            target_frame,
                        }),
                );
            }
            self.planned.push_back((self.next_step, target_frame));
            self.next_step += 1;
        }
        due
    }

    fn apply_tempo(&mut self, bpm: f64, clear_from: u64) -> Option<u64> {
        if bpm == self.bpm {
            return None;
        }
        debug!(from = self.bpm, to = bpm, "Tempo change");
        let playing = self.state == TransportState::Playing;
        if playing {
            self.reanchor(clear_from);
        }
        self.bpm = bpm;
        playing.then_some(clear_from)
    }

    /// Fixes the musical position of the first step that will not have
    /// played by `clear_from` and forgets everything planned after it.
    fn reanchor(&mut self, clear_from: u64) {
        let step = self.first_unrealized(clear_from);
        let steps = step as f64 - self.anchor_step as f64;
        self.anchor_frame += steps * self.frames_per_step();
        self.anchor_step = step;
        self.next_step = step;
        self.planned.retain(|(planned, _)| *planned < step);
    }

    fn restart_at(&mut self, step: u64, clear_from: u64) {
        self.anchor_step = step;
        self.next_step = step;
        self.resume_step = step;
        self.anchor_frame = (clear_from + self.latency_frames) as f64;
        self.planned.clear();
        self.state = TransportState::Playing;
    }

    fn first_unrealized(&self, clear_from: u64) -> u64 {
        self.planned
            .iter()
            .find(|(_, target)| *target >= clear_from)
            .map(|(step, _)| *step)
            .unwrap_or(self.next_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 48000;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            sample_rate: SAMPLE_RATE,
            bpm: 120.0,
            lookahead: Duration::from_millis(10),
            pass_interval: Duration::from_millis(5),
            clock: ClockConfig::default(),
        }
    }

    fn every_step(pad_id: u32, length: usize) -> Pattern {
        Pattern::new(4, vec![PatternTrack::new(pad_id, vec![100; length])]).unwrap()
    }

    /// Runs passes every `step` frames up to `until` and returns everything planned.
    fn run(scheduler: &mut Scheduler, from: u64, until: u64, step: u64) -> Vec<PlannedStep> {
        let mut planned = Vec::new();
        let mut now = from;
        while now < until {
            planned.extend(scheduler.plan(now));
            now += step;
        }
        planned
    }

    #[test]
    fn test_stopped_plans_nothing() {
        let mut scheduler = Scheduler::new(config());
        scheduler.set_pattern(every_step(1, 16), 0);
        assert!(scheduler.plan(0).is_empty());
        assert!(run(&mut scheduler, 0, 48000, 256).is_empty());
    }

    #[test]
    fn test_sixteenths_at_120_bpm() {
        let mut scheduler = Scheduler::new(config());
        scheduler.set_pattern(every_step(1, 16), 0);
        scheduler.set_latency_frames(1024);
        scheduler.handle_transport(Transport::Start, 512);

        let planned = run(&mut scheduler, 0, 48000, 256);
        assert!(planned.len() >= 7);
        for (index, step) in planned.iter().enumerate() {
            assert_eq!(step.step, index as u64);
            // Origin 512 is where the speaker plays the first frame queued
            // after `now`, so latency cancels out.
            let expected = 512 + step.step * 6000 + 480;
            assert!(step.target_frame.abs_diff(expected) <= 1, "{step:?}");
        }
    }

    #[test]
    fn test_latency_change_moves_targets() {
        let mut scheduler = Scheduler::new(config());
        scheduler.set_pattern(every_step(1, 16), 0);
        scheduler.handle_transport(Transport::Start, 0);
        let first = scheduler.plan(0);
        assert_eq!(first[0].target_frame, 480);

        scheduler.set_latency_frames(200);
        let planned = run(&mut scheduler, 256, 6000, 256);
        assert_eq!(planned[0].step, 1);
        assert_eq!(planned[0].target_frame, 6000 - 200 + 480);
    }

    #[test]
    fn test_plans_only_within_horizon() {
        let mut scheduler = Scheduler::new(config());
        scheduler.set_pattern(every_step(1, 16), 0);
        scheduler.handle_transport(Transport::Start, 0);
        let planned = scheduler.plan(0);
        assert_eq!(planned.len(), 1);
        assert!(scheduler.plan(100).is_empty());
        // Step 1 targets 6480 and enters the horizon once now + 720 passes it.
        assert!(scheduler.plan(5760).is_empty());
        assert_eq!(scheduler.plan(5761).len(), 1);
    }

    #[test]
    fn test_tempo_change_keeps_position() {
        let mut scheduler = Scheduler::new(config());
        scheduler.set_pattern(every_step(1, 16), 0);
        scheduler.handle_transport(Transport::Start, 0);
        let before = run(&mut scheduler, 0, 6000, 256);
        let last = *before.last().unwrap();
        assert_eq!(last.step, 1);

        // Step 1 at 6480 has not played by frame 6000 so it is replanned at
        // the same frame and every later step follows the new tempo.
        assert_eq!(scheduler.set_tempo(60.0, 6000), Some(6000));
        let after = run(&mut scheduler, 6000, 40000, 256);
        assert_eq!(after[0].step, 1);
        assert_eq!(after[0].target_frame, 6480);
        assert_eq!(after[1].step, 2);
        assert_eq!(after[1].target_frame, 6480 + 12000);
        assert_eq!(after[2].target_frame, 6480 + 24000);
    }

    #[test]
    fn test_tempo_change_after_realized_step() {
        let mut scheduler = Scheduler::new(config());
        scheduler.set_pattern(every_step(1, 16), 0);
        scheduler.handle_transport(Transport::Start, 0);
        run(&mut scheduler, 0, 6000, 256);

        // Step 1 at 6480 has already played, so step 2 is anchored where the
        // old tempo put it.
        assert_eq!(scheduler.set_tempo(240.0, 7000), Some(7000));
        let after = run(&mut scheduler, 7000, 20000, 256);
        assert_eq!(after[0].step, 2);
        assert_eq!(after[0].target_frame, 12480);
        assert_eq!(after[1].target_frame, 12480 + 3000);
    }

    #[test]
    fn test_tempo_bounds_and_stopped_changes() {
        let mut scheduler = Scheduler::new(config());
        assert_eq!(scheduler.set_tempo(10.0, 0), None);
        assert_eq!(scheduler.bpm(), 120.0);
        assert_eq!(scheduler.set_tempo(90.0, 0), None);
        assert_eq!(scheduler.bpm(), 90.0);
    }

    #[test]
    fn test_stop_and_continue_resume_position() {
        let mut scheduler = Scheduler::new(config());
        scheduler.set_pattern(every_step(1, 16), 0);
        scheduler.handle_transport(Transport::Start, 0);
        run(&mut scheduler, 0, 12000, 256);

        // Steps 0 and 1 played, step 2 at 12480 had been queued.
        assert_eq!(scheduler.handle_transport(Transport::Stop, 12000), Some(12000));
        assert_eq!(scheduler.state(), TransportState::Stopped);
        assert!(scheduler.plan(12000).is_empty());
        assert_eq!(scheduler.handle_transport(Transport::Stop, 12000), None);

        assert_eq!(scheduler.handle_transport(Transport::Continue, 30000), None);
        let resumed = scheduler.plan(30000);
        assert_eq!(resumed[0].step, 2);
        assert_eq!(resumed[0].target_frame, 30480);

        scheduler.handle_transport(Transport::Start, 40000);
        assert_eq!(scheduler.plan(40000)[0].step, 0);
    }

    #[test]
    fn test_pattern_change_while_playing() {
        let mut scheduler = Scheduler::new(config());
        scheduler.set_pattern(every_step(1, 16), 0);
        scheduler.handle_transport(Transport::Start, 0);
        run(&mut scheduler, 0, 6000, 256);

        assert_eq!(scheduler.set_pattern(every_step(2, 4), 6000), Some(6000));
        let after = scheduler.plan(6000);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].pad_id, 2);
        assert_eq!(after[0].step, 1);
        assert_eq!(after[0].target_frame, 6480);
    }

    #[test]
    fn test_external_clock_drives_tempo() {
        let mut scheduler = Scheduler::new(config());
        scheduler.set_external_clock_enabled(true);
        assert_eq!(scheduler.set_tempo(90.0, 0), None);
        assert_eq!(scheduler.bpm(), 120.0);

        let interval = Duration::from_secs_f64(60.0 / (100.0 * 24.0));
        let mut at = Instant::now();
        for _ in 0..48 {
            scheduler.handle_clock_pulse(at, 0);
            at += interval;
        }
        assert!((scheduler.bpm() - 100.0).abs() <= CLOCK_TEMPO_THRESHOLD);

        scheduler.set_external_clock_enabled(false);
        assert!(scheduler.handle_clock_pulse(at, 0).is_none());
        scheduler.set_tempo(90.0, 0);
        assert_eq!(scheduler.bpm(), 90.0);
    }
}
