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

//! The command gateway between the host and the real-time path.
//!
//! All methods take `&self` and may be called from any control thread. The
//! audio callback only ever sees the [`Mixer`] and the commands queued for it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::audio::cpal::CpalBackend;
use crate::audio::{AudioStream, Mixer, OutputBackend, Renderer, StreamParams};
use crate::config::{ConfigError, EngineConfig, FilterMode, FilterSettings, PadSettings};
use crate::samples::{LoadedSample, PadState, PcmSource, SampleCache, VoiceId, VoiceSpec};
use crate::scheduler::{Pattern, PlannedStep, Scheduler, Transport};

mod command;
mod status;

pub use command::{MixerCommand, ScheduledTrigger, TriggerOrigin};
pub use status::{EngineStatus, TimingStatistics};

struct RegisteredPad {
    settings: PadSettings,
    state: PadState,
}

impl RegisteredPad {
    fn new(settings: PadSettings) -> RegisteredPad {
        RegisteredPad {
            state: PadState::new(pad_seed(settings.id)),
            settings,
        }
    }
}

fn pad_seed(pad_id: u32) -> u64 {
    u64::from(pad_id).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// The sampler engine. Owns the mixer, the output stream, the sample cache,
/// registered pads and the step scheduler.
pub struct Engine {
    status: Arc<EngineStatus>,
    mixer: Arc<Mutex<Mixer>>,
    stream: AudioStream,
    /// Serializes stream open and close with the reconfiguration around them.
    lifecycle: Mutex<()>,
    commands: Sender<MixerCommand>,
    returns: Receiver<Arc<LoadedSample>>,
    samples: RwLock<SampleCache>,
    pads: Mutex<HashMap<u32, RegisteredPad>>,
    scheduler: Mutex<Scheduler>,
    params: Mutex<StreamParams>,
    next_voice_id: AtomicU64,
}

impl Engine {
    /// Creates an engine that plays through cpal.
    pub fn new(config: &EngineConfig) -> Result<Engine, ConfigError> {
        let backend = CpalBackend::new(config.device().map(str::to_string));
        Engine::with_backend(config, Box::new(backend))
    }

    /// Creates an engine that plays through the given backend.
    pub fn with_backend(
        config: &EngineConfig,
        backend: Box<dyn OutputBackend>,
    ) -> Result<Engine, ConfigError> {
        let scheduler = Scheduler::new(config.scheduler_config()?);
        let mixer_config = config.mixer_config();
        let status = Arc::new(EngineStatus::new(mixer_config.sample_rate));

        let (command_tx, command_rx) = bounded(config.command_queue_size());
        let _ = command_tx.try_send(MixerCommand::SetTempo(scheduler.bpm()));
        // Every voice slot plus every pending trigger can hold a sample.
        let (return_tx, return_rx) =
            bounded(mixer_config.max_voices + mixer_config.scheduled_capacity);
        let mixer = Mixer::new(mixer_config, command_rx, return_tx, status.clone());

        info!(
            backend = %backend,
            max_voices = mixer_config.max_voices,
            bpm = scheduler.bpm(),
            "Engine created"
        );
        Ok(Engine {
            stream: AudioStream::new(backend, status.clone()),
            lifecycle: Mutex::new(()),
            status,
            mixer: Arc::new(Mutex::new(mixer)),
            commands: command_tx,
            returns: return_rx,
            samples: RwLock::new(SampleCache::new()),
            pads: Mutex::new(HashMap::new()),
            scheduler: Mutex::new(scheduler),
            params: Mutex::new(config.stream_params()),
            next_voice_id: AtomicU64::new(1),
        })
    }

    /// Opens and starts the output stream. Returns false if a stream is
    /// already open or the device could not be opened.
    pub fn initialize(&self, sample_rate: u32, frames_per_burst: u32, low_latency: bool) -> bool {
        if sample_rate == 0 || frames_per_burst == 0 {
            warn!(sample_rate, frames_per_burst, "Invalid stream parameters");
            return false;
        }
        let _lifecycle = self.lifecycle.lock();
        if self.stream.is_open() {
            warn!("Output stream is already open");
            return false;
        }

        let params = {
            let mut current = self.params.lock();
            current.sample_rate = sample_rate;
            current.frames_per_burst = frames_per_burst;
            current.low_latency = low_latency;
            *current
        };
        self.mixer.lock().configure(sample_rate, params.channels);
        self.scheduler.lock().set_sample_rate(sample_rate);
        self.collect_garbage();

        let renderer = Renderer::new(self.mixer.clone(), self.status.clone(), &params);
        match self.stream.initialize(params, renderer) {
            Ok(_) => true,
            Err(e) => {
                warn!(err = %e, "Unable to initialize output stream");
                false
            }
        }
    }

    /// Stops the output stream and silences every voice.
    pub fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.stream.shutdown();
        self.mixer.lock().stop_all();
        self.collect_garbage();
    }

    /// Triggers a pad from its settings. A registered pad with the same id
    /// contributes its round-robin and random state.
    pub fn trigger_pad(&self, pad: &PadSettings, velocity: u8) -> Option<VoiceId> {
        if let Err(e) = pad.validate() {
            debug!(err = %e, "Ignoring trigger of invalid pad");
            return None;
        }
        let id = self.next_voice_id();
        let spec = {
            let mut pads = self.pads.lock();
            let samples = self.samples.read();
            match pads.get_mut(&pad.id) {
                Some(registered) => registered.state.resolve(pad, velocity, &samples, id),
                None => PadState::new(pad_seed(pad.id)).resolve(pad, velocity, &samples, id),
            }
        }?;
        self.send(MixerCommand::Trigger(spec)).then_some(id)
    }

    /// Triggers a registered pad.
    pub fn trigger_pad_id(&self, pad_id: u32, velocity: u8) -> Option<VoiceId> {
        let id = self.next_voice_id();
        let spec = self.resolve_pad(pad_id, velocity, id)?;
        self.send(MixerCommand::Trigger(spec)).then_some(id)
    }

    /// Plays a loaded sample once with default sound design.
    pub fn trigger_sample(&self, sample_id: &str, gain: f32, pan: f32) -> Option<VoiceId> {
        if !gain.is_finite() || gain < 0.0 || !pan.is_finite() {
            debug!(sample = sample_id, gain, pan, "Ignoring trigger with invalid gain or pan");
            return None;
        }
        let Some(sample) = self.samples.read().get(sample_id) else {
            debug!(sample = sample_id, "Sample not loaded");
            return None;
        };
        let id = self.next_voice_id();
        let spec = VoiceSpec::one_shot(id, sample, gain, pan.clamp(-1.0, 1.0));
        self.send(MixerCommand::Trigger(spec)).then_some(id)
    }

    /// Moves a voice into its release stage.
    pub fn stop_voice(&self, id: VoiceId) {
        self.send(MixerCommand::Stop(id));
    }

    /// Silences every voice at the start of the next buffer.
    pub fn stop_all(&self) {
        self.send(MixerCommand::StopAll);
    }

    /// Adds or replaces a sample. Voices playing a replaced sample keep the
    /// old data until they finish.
    pub fn load_sample(&self, sample_id: &str, source: PcmSource) -> bool {
        if sample_id.is_empty() {
            warn!("Refusing to load a sample without an id");
            return false;
        }
        self.collect_garbage();
        self.samples.write().insert(sample_id, source);
        true
    }

    /// Removes a sample from the cache. Playing voices finish normally.
    pub fn unload_sample(&self, sample_id: &str) -> bool {
        self.collect_garbage();
        let removed = self.samples.write().remove(sample_id).is_some();
        if removed {
            info!(sample = sample_id, "Sample unloaded");
        }
        removed
    }

    /// Registers or replaces a pad. Replacing a pad resets its layer state.
    pub fn register_pad(&self, settings: PadSettings) -> bool {
        if let Err(e) = settings.validate() {
            warn!(err = %e, "Refusing to register pad");
            return false;
        }
        let pad_id = settings.id;
        let layers = settings.layers.len();
        self.pads.lock().insert(pad_id, RegisteredPad::new(settings));
        info!(pad = pad_id, layers, "Pad registered");
        true
    }

    /// Changes a pad's filter, including on its playing voices.
    pub fn set_pad_filter(
        &self,
        pad_id: u32,
        enabled: bool,
        mode: FilterMode,
        cutoff_hz: f32,
        resonance: f32,
    ) -> bool {
        let mut pads = self.pads.lock();
        let envelope_amount = pads
            .get(&pad_id)
            .map(|registered| registered.settings.filter.envelope_amount)
            .unwrap_or(0.0);
        let settings = FilterSettings {
            enabled,
            mode,
            cutoff_hz,
            resonance,
            envelope_amount,
        };
        if !settings.is_valid() {
            debug!(pad = pad_id, cutoff_hz, resonance, "Ignoring invalid filter settings");
            return false;
        }
        if let Some(registered) = pads.get_mut(&pad_id) {
            registered.settings.filter = settings;
        }
        drop(pads);
        self.send(MixerCommand::SetPadFilter { pad_id, settings })
    }

    /// Queues a registered pad to start at an absolute output frame.
    pub fn schedule_step_trigger(&self, pad_id: u32, velocity: u8, target_frame: u64) -> bool {
        let id = self.next_voice_id();
        let Some(spec) = self.resolve_pad(pad_id, velocity, id) else {
            return false;
        };
        self.send(MixerCommand::Schedule(ScheduledTrigger {
            pad_id: Some(pad_id),
            velocity,
            target_frame,
            origin: TriggerOrigin::Manual,
            spec,
            enqueued_frame: self.status.current_frame(),
        }))
    }

    /// Drops every scheduled trigger that has not started yet.
    pub fn clear_scheduled_events(&self) {
        self.send(MixerCommand::ClearScheduled {
            from_frame: 0,
            pattern_only: false,
        });
    }

    /// Sets the sequencer tempo. Ignored while following an external clock.
    pub fn set_tempo(&self, bpm: f64) {
        let mut scheduler = self.scheduler.lock();
        let before = scheduler.bpm();
        let clear_from = scheduler.set_tempo(bpm, self.timeline_frame());
        self.apply_tempo(before, scheduler.bpm(), clear_from);
    }

    pub fn set_external_clock_enabled(&self, enabled: bool) {
        self.scheduler.lock().set_external_clock_enabled(enabled);
    }

    pub fn handle_transport(&self, transport: Transport) {
        {
            let mut scheduler = self.scheduler.lock();
            scheduler.set_latency_frames(self.status.latency_frames());
            if let Some(from_frame) = scheduler.handle_transport(transport, self.timeline_frame()) {
                self.clear_pattern_from(from_frame);
            }
        }
        self.run_scheduling_pass();
    }

    /// Feeds an external clock pulse received now.
    pub fn handle_clock_pulse(&self) {
        self.handle_clock_pulse_at(Instant::now());
    }

    /// Feeds an external clock pulse with its arrival time.
    pub fn handle_clock_pulse_at(&self, at: Instant) {
        let mut scheduler = self.scheduler.lock();
        let before = scheduler.bpm();
        let clear_from = scheduler.handle_clock_pulse(at, self.timeline_frame());
        self.apply_tempo(before, scheduler.bpm(), clear_from);
    }

    /// Replaces the sequencer pattern, keeping the musical position.
    pub fn set_pattern(&self, pattern: Pattern) {
        let cleared = {
            let mut scheduler = self.scheduler.lock();
            let cleared = scheduler.set_pattern(pattern, self.timeline_frame());
            if let Some(from_frame) = cleared {
                self.clear_pattern_from(from_frame);
            }
            cleared.is_some()
        };
        if cleared {
            self.run_scheduling_pass();
        }
    }

    /// Queues every pattern step that became due. Returns the number of
    /// triggers queued.
    pub fn run_scheduling_pass(&self) -> usize {
        self.collect_garbage();
        let due: Vec<PlannedStep> = {
            let mut scheduler = self.scheduler.lock();
            scheduler.set_latency_frames(self.status.latency_frames());
            scheduler.plan(self.timeline_frame())
        };

        let enqueued_frame = self.status.current_frame();
        let mut queued = 0;
        for step in due {
            let id = self.next_voice_id();
            let Some(spec) = self.resolve_pad(step.pad_id, step.velocity, id) else {
                continue;
            };
            let trigger = ScheduledTrigger {
                pad_id: Some(step.pad_id),
                velocity: step.velocity,
                target_frame: step.target_frame,
                origin: TriggerOrigin::Pattern { step: step.step },
                spec,
                enqueued_frame,
            };
            if self.send(MixerCommand::Schedule(trigger)) {
                queued += 1;
            } else {
                // The scheduler has moved past this step, so it will not be retried.
                self.status.record_missed();
            }
        }
        queued
    }

    /// Runs scheduling passes on a background thread every `interval`.
    pub fn start_sequencer(self: &Arc<Self>, interval: Duration) -> SequencerHandle {
        let engine = self.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let thread = {
            let cancelled = cancelled.clone();
            thread::Builder::new()
                .name("padcore-sequencer".to_string())
                .spawn(move || {
                    let mut next = Instant::now();
                    while !cancelled.load(Ordering::Acquire) {
                        engine.run_scheduling_pass();
                        next += interval;
                        spin_sleep::sleep(next.saturating_duration_since(Instant::now()));
                    }
                })
        };
        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(e) => {
                warn!(err = %e, "Unable to start sequencer thread");
                None
            }
        };
        info!(?interval, "Sequencer started");
        SequencerHandle { cancelled, thread }
    }

    pub fn active_voice_count(&self) -> usize {
        self.status.active_voices()
    }

    /// Output latency measured from the device callbacks.
    pub fn reported_latency_frames(&self) -> u64 {
        self.status.latency_frames()
    }

    pub fn timing_statistics(&self) -> TimingStatistics {
        self.status.timing_statistics()
    }

    pub fn is_stream_open(&self) -> bool {
        self.stream.is_open()
    }

    /// Absolute frame at the end of the last rendered buffer.
    pub fn current_frame(&self) -> u64 {
        self.status.current_frame()
    }

    pub fn bpm(&self) -> f64 {
        self.scheduler.lock().bpm()
    }

    pub fn sample_rate(&self) -> u32 {
        self.status.sample_rate()
    }

    /// Renders one interleaved block without a device, e.g. for bouncing.
    /// Refused while a stream is open.
    pub fn render(&self, out: &mut [f32]) -> bool {
        if self.stream.is_open() {
            debug!("Refusing offline render while the stream is open");
            return false;
        }
        self.mixer.lock().render(out);
        self.collect_garbage();
        true
    }

    fn next_voice_id(&self) -> VoiceId {
        VoiceId(self.next_voice_id.fetch_add(1, Ordering::Relaxed))
    }

    fn resolve_pad(&self, pad_id: u32, velocity: u8, id: VoiceId) -> Option<VoiceSpec> {
        let mut pads = self.pads.lock();
        let Some(registered) = pads.get_mut(&pad_id) else {
            debug!(pad = pad_id, "Pad not registered");
            return None;
        };
        let samples = self.samples.read();
        let RegisteredPad { settings, state } = registered;
        state.resolve(settings, velocity, &samples, id)
    }

    /// The first frame a command sent now can still affect.
    fn timeline_frame(&self) -> u64 {
        self.status.current_frame() + u64::from(self.params.lock().frames_per_burst)
    }

    fn apply_tempo(&self, before: f64, after: f64, clear_from: Option<u64>) {
        if let Some(from_frame) = clear_from {
            self.clear_pattern_from(from_frame);
        }
        if after != before {
            self.send(MixerCommand::SetTempo(after));
        }
    }

    fn clear_pattern_from(&self, from_frame: u64) {
        self.send(MixerCommand::ClearScheduled {
            from_frame,
            pattern_only: true,
        });
    }

    fn send(&self, command: MixerCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                self.status.record_dropped_command();
                debug!(?command, "Command queue full, dropping command");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Drops sample references handed back by the mixer.
    fn collect_garbage(&self) -> usize {
        self.returns.try_iter().count()
    }
}

/// Stops the sequencer thread when stopped or dropped.
pub struct SequencerHandle {
    cancelled: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SequencerHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    pub fn stop(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            info!("Sequencer stopped");
        }
    }
}

impl Drop for SequencerHandle {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::audio::mock::MockBackend;

    #[test]
    fn test_concurrent_initialize_leaves_stream_consistent() {
        let engine = Engine::with_backend(&EngineConfig::new(), Box::new(MockBackend::new())).unwrap();

        let (a, b) = thread::scope(|scope| {
            // Hold the mixer so both calls are in flight at once.
            let guard = engine.mixer.lock();
            let a = scope.spawn(|| engine.initialize(48000, 256, true));
            let b = scope.spawn(|| engine.initialize(22050, 64, true));
            thread::sleep(Duration::from_millis(50));
            drop(guard);
            (a.join().unwrap(), b.join().unwrap())
        });

        assert!(a != b, "exactly one initialize must succeed: {a} {b}");
        let state = engine.stream.state().unwrap();
        assert_eq!(engine.mixer.lock().sample_rate(), state.sample_rate);
        assert_eq!(engine.sample_rate(), state.sample_rate);
        assert_eq!(engine.params.lock().frames_per_burst, state.frames_per_burst);
        assert_eq!(engine.scheduler.lock().sample_rate(), state.sample_rate);
    }

    #[test]
    fn test_rejected_initialize_keeps_format() {
        let engine = Engine::with_backend(&EngineConfig::new(), Box::new(MockBackend::new())).unwrap();
        assert!(engine.initialize(48000, 256, true));
        assert!(!engine.initialize(22050, 64, false));
        assert_eq!(engine.mixer.lock().sample_rate(), 48000);
        assert_eq!(engine.params.lock().frames_per_burst, 256);
        assert_eq!(engine.sample_rate(), 48000);
    }
}
