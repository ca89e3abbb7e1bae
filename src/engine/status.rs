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

//! Lock-free engine status shared between the audio callback and control threads.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Counters and scalars written by the audio side and read by the host.
#[derive(Debug)]
pub struct EngineStatus {
    sample_rate: AtomicU32,
    current_frame: AtomicU64,
    active_voices: AtomicUsize,
    stream_open: AtomicBool,
    realtime: AtomicBool,
    latency_frames: AtomicU64,
    underruns: AtomicU64,
    missed_triggers: AtomicU64,
    dropped_commands: AtomicU64,
    stolen_voices: AtomicU64,
    realized_triggers: AtomicU64,
    latency_sum: AtomicU64,
    latency_min: AtomicU64,
    latency_max: AtomicU64,
    jitter_sum: AtomicU64,
}

/// A point-in-time copy of the scheduling statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimingStatistics {
    /// Mean time from queueing a scheduled trigger to its realization.
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    /// Mean distance between a trigger's target frame and the frame it played at.
    pub jitter_ms: f64,
    pub missed_triggers: u64,
    pub underruns: u64,
    pub dropped_commands: u64,
    pub stolen_voices: u64,
    pub realized_triggers: u64,
}

impl EngineStatus {
    pub fn new(sample_rate: u32) -> EngineStatus {
        EngineStatus {
            sample_rate: AtomicU32::new(sample_rate),
            current_frame: AtomicU64::new(0),
            active_voices: AtomicUsize::new(0),
            stream_open: AtomicBool::new(false),
            realtime: AtomicBool::new(false),
            latency_frames: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            missed_triggers: AtomicU64::new(0),
            dropped_commands: AtomicU64::new(0),
            stolen_voices: AtomicU64::new(0),
            realized_triggers: AtomicU64::new(0),
            latency_sum: AtomicU64::new(0),
            latency_min: AtomicU64::new(u64::MAX),
            latency_max: AtomicU64::new(0),
            jitter_sum: AtomicU64::new(0),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }

    /// Absolute frame at the end of the last rendered buffer.
    pub fn current_frame(&self) -> u64 {
        self.current_frame.load(Ordering::Acquire)
    }

    pub(crate) fn set_current_frame(&self, frame: u64) {
        self.current_frame.store(frame, Ordering::Release);
    }

    pub fn active_voices(&self) -> usize {
        self.active_voices.load(Ordering::Relaxed)
    }

    pub(crate) fn set_active_voices(&self, count: usize) {
        self.active_voices.store(count, Ordering::Relaxed);
    }

    pub fn is_stream_open(&self) -> bool {
        self.stream_open.load(Ordering::Acquire)
    }

    pub(crate) fn set_stream_open(&self, open: bool) {
        self.stream_open.store(open, Ordering::Release);
    }

    /// True once the callback thread runs with real-time scheduling.
    pub fn is_realtime(&self) -> bool {
        self.realtime.load(Ordering::Relaxed)
    }

    pub(crate) fn set_realtime(&self, realtime: bool) {
        self.realtime.store(realtime, Ordering::Relaxed);
    }

    pub fn latency_frames(&self) -> u64 {
        self.latency_frames.load(Ordering::Relaxed)
    }

    pub(crate) fn set_latency_frames(&self, frames: u64) {
        self.latency_frames.store(frames, Ordering::Relaxed);
    }

    pub(crate) fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_missed(&self) {
        self.missed_triggers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_command(&self) {
        self.dropped_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stolen(&self) {
        self.stolen_voices.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a scheduled trigger that started playing.
    pub(crate) fn record_realized(&self, latency_frames: u64, jitter_frames: u64) {
        self.realized_triggers.fetch_add(1, Ordering::Relaxed);
        self.latency_sum.fetch_add(latency_frames, Ordering::Relaxed);
        self.latency_min.fetch_min(latency_frames, Ordering::Relaxed);
        self.latency_max.fetch_max(latency_frames, Ordering::Relaxed);
        self.jitter_sum.fetch_add(jitter_frames, Ordering::Relaxed);
    }

    pub fn timing_statistics(&self) -> TimingStatistics {
        let frames_to_ms = |frames: u64| {
            let sample_rate = f64::from(self.sample_rate().max(1));
            frames as f64 * 1000.0 / sample_rate
        };
        let realized = self.realized_triggers.load(Ordering::Relaxed);
        let mut statistics = TimingStatistics {
            missed_triggers: self.missed_triggers.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            dropped_commands: self.dropped_commands.load(Ordering::Relaxed),
            stolen_voices: self.stolen_voices.load(Ordering::Relaxed),
            realized_triggers: realized,
            ..TimingStatistics::default()
        };
        if realized > 0 {
            let count = realized as f64;
            statistics.avg_latency_ms =
                frames_to_ms(self.latency_sum.load(Ordering::Relaxed)) / count;
            statistics.min_latency_ms = frames_to_ms(self.latency_min.load(Ordering::Relaxed));
            statistics.max_latency_ms = frames_to_ms(self.latency_max.load(Ordering::Relaxed));
            statistics.jitter_ms = frames_to_ms(self.jitter_sum.load(Ordering::Relaxed)) / count;
        }
        statistics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_statistics() {
        let status = EngineStatus::new(48000);
        assert_eq!(status.timing_statistics(), TimingStatistics::default());
    }

    #[test]
    fn test_latency_statistics() {
        let status = EngineStatus::new(1000);
        status.record_realized(10, 0);
        status.record_realized(30, 4);
        status.record_missed();
        status.record_underrun();

        let statistics = status.timing_statistics();
        assert_eq!(statistics.realized_triggers, 2);
        assert_eq!(statistics.avg_latency_ms, 20.0);
        assert_eq!(statistics.min_latency_ms, 10.0);
        assert_eq!(statistics.max_latency_ms, 30.0);
        assert_eq!(statistics.jitter_ms, 2.0);
        assert_eq!(statistics.missed_triggers, 1);
        assert_eq!(statistics.underruns, 1);
    }
}
