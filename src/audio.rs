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

//! Output stream lifecycle.
//!
//! [`AudioStream`] moves between closed and open. Opening goes through an
//! [`OutputBackend`] (cpal for hardware, [`mock`] in tests), which drives a
//! [`Renderer`] once per device callback.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ::thread_priority::ThreadPriorityValue;
use tracing::{info, warn};

use crate::engine::EngineStatus;

pub mod cpal;
pub mod mixer;
pub mod mock;
mod thread_priority;

pub use mixer::{Mixer, MixerConfig};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream is already open")]
    AlreadyOpen,
    #[error("no output device found with name {0}")]
    NoDevice(String),
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("unable to build output stream: {0}")]
    Build(String),
    #[error("unable to start output stream: {0}")]
    Play(String),
    #[error("output stream failed while starting")]
    FailedDuringStart,
    #[error("audio backend error: {0}")]
    Backend(String),
}

/// What the host asks for when opening a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub frames_per_burst: u32,
    pub channels: u16,
    /// Prefer a fixed buffer of `frames_per_burst` frames.
    pub low_latency: bool,
}

/// Format of the open stream. Owned by the [`AudioStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamState {
    pub sample_rate: u32,
    pub frames_per_burst: u32,
    pub channels: u16,
    pub open: bool,
}

/// A running output stream. Dropping it without `close` leaks nothing but
/// may leave the device thread running until the process exits.
pub trait OutputStream: Send {
    fn close(self: Box<Self>);
}

/// Something that can open output streams.
pub trait OutputBackend: fmt::Display + Send + Sync {
    /// Opens and starts a stream that calls `renderer` once per device buffer.
    /// `on_error` must be invoked if the device fails.
    fn open(
        &self,
        params: &StreamParams,
        renderer: Renderer,
        on_error: ErrorNotifier,
    ) -> Result<Box<dyn OutputStream>, StreamError>;
}

/// Marks the stream closed when the device reports an error. Errors from a
/// stream that has since been replaced are ignored.
#[derive(Clone)]
pub struct ErrorNotifier {
    generation: u64,
    current: Arc<AtomicU64>,
    status: Arc<EngineStatus>,
    failed: Arc<AtomicBool>,
}

impl ErrorNotifier {
    pub fn notify(&self) {
        if self.current.load(Ordering::Acquire) == self.generation {
            self.failed.store(true, Ordering::Release);
            self.status.set_stream_open(false);
        }
    }
}

/// The per-callback entry point handed to a backend.
pub struct Renderer {
    mixer: Arc<Mutex<Mixer>>,
    status: Arc<EngineStatus>,
    channels: usize,
    sample_rate: u32,
    frames_per_burst: u64,
    priority: Option<ThreadPriorityValue>,
    rt_audio: bool,
    priority_set: bool,
    skipped_frames: usize,
    scratch: Vec<f32>,
}

impl Renderer {
    pub fn new(mixer: Arc<Mutex<Mixer>>, status: Arc<EngineStatus>, params: &StreamParams) -> Renderer {
        let scratch_len = params.frames_per_burst.max(64) as usize * usize::from(params.channels) * 4;
        Renderer {
            mixer,
            status,
            channels: usize::from(params.channels.max(1)),
            sample_rate: params.sample_rate.max(1),
            frames_per_burst: u64::from(params.frames_per_burst),
            priority: thread_priority::callback_thread_priority(),
            rt_audio: thread_priority::rt_audio_enabled(),
            priority_set: false,
            skipped_frames: 0,
            scratch: vec![0.0; scratch_len],
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Leaves the calling thread's priority alone. For backends that render
    /// on a thread they do not own.
    pub fn without_thread_priority(mut self) -> Renderer {
        self.priority_set = true;
        self
    }

    /// Renders one interleaved f32 buffer. `output_latency` is the time from
    /// this callback until the buffer reaches the speaker, if the device knows.
    /// Without it the latency is taken to be one burst.
    pub fn render(&mut self, out: &mut [f32], output_latency: Option<Duration>) {
        if !self.priority_set {
            let realtime = thread_priority::configure_audio_thread_priority(self.priority, self.rt_audio);
            self.status.set_realtime(realtime);
            self.priority_set = true;
        }

        let started = Instant::now();
        let frames = out.len() / self.channels;
        match self.mixer.try_lock() {
            Some(mut mixer) => {
                if self.skipped_frames > 0 {
                    mixer.skip(self.skipped_frames);
                    self.skipped_frames = 0;
                }
                mixer.render(out);
            }
            None => {
                out.fill(0.0);
                self.skipped_frames += frames;
                self.status.record_underrun();
            }
        }

        let latency_frames = match output_latency {
            Some(latency) => (latency.as_secs_f64() * f64::from(self.sample_rate)).round() as u64,
            None => self.frames_per_burst,
        };
        self.status.set_latency_frames(latency_frames);

        let period = Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate));
        if started.elapsed() > period {
            self.status.record_underrun();
        }
    }

    /// Renders into a non-f32 device buffer through the preallocated scratch
    /// buffer, in chunks if the device buffer is larger than expected.
    pub fn render_with<T>(&mut self, out: &mut [T], output_latency: Option<Duration>, convert: impl Fn(f32) -> T) {
        let chunk_len = (self.scratch.len() / self.channels).max(1) * self.channels;
        let mut scratch = std::mem::take(&mut self.scratch);
        for chunk in out.chunks_mut(chunk_len) {
            let len = chunk.len();
            self.render(&mut scratch[..len], output_latency);
            for (dst, src) in chunk.iter_mut().zip(scratch[..len].iter()) {
                *dst = convert(*src);
            }
        }
        self.scratch = scratch;
    }
}

struct StreamInner {
    state: Option<StreamState>,
    stream: Option<Box<dyn OutputStream>>,
}

/// Owns the output stream and its state.
pub struct AudioStream {
    backend: Box<dyn OutputBackend>,
    status: Arc<EngineStatus>,
    generation: Arc<AtomicU64>,
    inner: Mutex<StreamInner>,
}

impl AudioStream {
    pub fn new(backend: Box<dyn OutputBackend>, status: Arc<EngineStatus>) -> AudioStream {
        AudioStream {
            backend,
            status,
            generation: Arc::new(AtomicU64::new(0)),
            inner: Mutex::new(StreamInner {
                state: None,
                stream: None,
            }),
        }
    }

    /// Opens the stream. Fails if a stream is already open; on failure no
    /// stream is kept.
    pub fn initialize(&self, params: StreamParams, renderer: Renderer) -> Result<StreamState, StreamError> {
        let mut inner = self.inner.lock();
        if self.status.is_stream_open() {
            return Err(StreamError::AlreadyOpen);
        }
        // A stream closed by a device error is still around until re-initialized.
        if let Some(stream) = inner.stream.take() {
            stream.close();
        }
        inner.state = None;

        // Until the first callback reports, assume one burst of latency.
        self.status.set_latency_frames(u64::from(params.frames_per_burst));

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let failed = Arc::new(AtomicBool::new(false));
        let notifier = ErrorNotifier {
            generation,
            current: self.generation.clone(),
            status: self.status.clone(),
            failed: failed.clone(),
        };

        self.status.set_stream_open(true);
        let stream = match self.backend.open(&params, renderer, notifier) {
            Ok(stream) => stream,
            Err(e) => {
                self.status.set_stream_open(false);
                warn!(backend = %self.backend, err = %e, "Unable to open output stream");
                return Err(e);
            }
        };
        if failed.load(Ordering::Acquire) {
            stream.close();
            self.status.set_stream_open(false);
            return Err(StreamError::FailedDuringStart);
        }

        let state = StreamState {
            sample_rate: params.sample_rate,
            frames_per_burst: params.frames_per_burst,
            channels: params.channels,
            open: true,
        };
        info!(
            backend = %self.backend,
            sample_rate = params.sample_rate,
            frames_per_burst = params.frames_per_burst,
            channels = params.channels,
            low_latency = params.low_latency,
            "Output stream open"
        );
        inner.state = Some(state);
        inner.stream = Some(stream);
        Ok(state)
    }

    /// Closes the stream if one exists.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.status.set_stream_open(false);
        inner.state = None;
        if let Some(stream) = inner.stream.take() {
            stream.close();
            info!(backend = %self.backend, "Output stream closed");
        }
    }

    /// The current state, with `open` reflecting device errors.
    pub fn state(&self) -> Option<StreamState> {
        let inner = self.inner.lock();
        inner.state.map(|state| StreamState {
            open: self.status.is_stream_open(),
            ..state
        })
    }

    pub fn is_open(&self) -> bool {
        self.status.is_stream_open()
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockBackend;
    use crossbeam_channel::bounded;

    fn make_stream() -> (AudioStream, mock::MockHandle, Arc<Mutex<Mixer>>, Arc<EngineStatus>) {
        let status = Arc::new(EngineStatus::new(48000));
        let (_command_tx, command_rx) = bounded(16);
        let (return_tx, _return_rx) = bounded(16);
        let mixer = Arc::new(Mutex::new(Mixer::new(
            MixerConfig::default(),
            command_rx,
            return_tx,
            status.clone(),
        )));
        let backend = MockBackend::new();
        let handle = backend.handle();
        (
            AudioStream::new(Box::new(backend), status.clone()),
            handle,
            mixer,
            status,
        )
    }

    fn params() -> StreamParams {
        StreamParams {
            sample_rate: 48000,
            frames_per_burst: 128,
            channels: 2,
            low_latency: true,
        }
    }

    #[test]
    fn test_lifecycle() {
        let (stream, handle, mixer, status) = make_stream();
        let renderer = || Renderer::new(mixer.clone(), status.clone(), &params());

        let state = stream.initialize(params(), renderer()).unwrap();
        assert!(state.open);
        assert!(stream.is_open());
        assert!(matches!(
            stream.initialize(params(), renderer()),
            Err(StreamError::AlreadyOpen)
        ));
        assert_eq!(handle.open_count(), 1);

        assert_eq!(handle.pump(128).map(|buffer| buffer.len()), Some(256));
        assert_eq!(status.current_frame(), 128);

        stream.shutdown();
        assert!(!stream.is_open());
        assert!(stream.state().is_none());
        assert!(handle.pump(128).is_none());
    }

    #[test]
    fn test_error_closes_and_reinitialize_succeeds() {
        let (stream, handle, mixer, status) = make_stream();
        let renderer = || Renderer::new(mixer.clone(), status.clone(), &params());

        stream.initialize(params(), renderer()).unwrap();
        handle.fail();
        assert!(!stream.is_open());
        assert_eq!(stream.state().map(|state| state.open), Some(false));

        stream.initialize(params(), renderer()).unwrap();
        assert!(stream.is_open());
        assert_eq!(handle.open_count(), 2);
    }

    #[test]
    fn test_open_failure_leaves_no_state() {
        let (stream, handle, mixer, status) = make_stream();
        handle.fail_next_open();
        let result = stream.initialize(params(), Renderer::new(mixer.clone(), status.clone(), &params()));
        assert!(result.is_err());
        assert!(!stream.is_open());
        assert!(stream.state().is_none());

        stream
            .initialize(params(), Renderer::new(mixer, status, &params()))
            .unwrap();
        assert!(stream.is_open());
    }

    #[test]
    fn test_contended_mixer_renders_silence() {
        let (stream, handle, mixer, status) = make_stream();
        stream
            .initialize(params(), Renderer::new(mixer.clone(), status.clone(), &params()))
            .unwrap();

        let guard = mixer.lock();
        let buffer = handle.pump(64).unwrap();
        drop(guard);
        assert!(buffer.iter().all(|s| *s == 0.0));
        assert_eq!(status.timing_statistics().underruns, 1);

        // The timeline catches up on the next callback.
        handle.pump(64).unwrap();
        assert_eq!(status.current_frame(), 128);
    }

    #[test]
    fn test_render_with_converts() {
        let (_stream, _handle, mixer, status) = make_stream();
        let mut renderer = Renderer::new(mixer, status.clone(), &params());
        let mut out = vec![1i16; 2 * 2000];
        renderer.render_with(&mut out, Some(Duration::from_millis(10)), |s| (s * 32767.0) as i16);
        assert!(out.iter().all(|s| *s == 0));
        assert_eq!(status.current_frame(), 2000);
        assert_eq!(status.latency_frames(), 480);
    }

    #[test]
    fn test_latency_falls_back_to_burst() {
        let (_stream, _handle, mixer, status) = make_stream();
        let mut renderer = Renderer::new(mixer, status.clone(), &params());
        renderer.render(&mut [0.0; 256], Some(Duration::from_millis(10)));
        assert_eq!(status.latency_frames(), 480);
        renderer.render(&mut [0.0; 256], None);
        assert_eq!(status.latency_frames(), 128);
    }

    #[test]
    fn test_initialize_resets_latency() {
        let (stream, handle, mixer, status) = make_stream();
        stream
            .initialize(params(), Renderer::new(mixer.clone(), status.clone(), &params()))
            .unwrap();
        handle.pump(128).unwrap();
        assert_eq!(status.latency_frames(), 128);
        stream.shutdown();

        let slow = StreamParams {
            sample_rate: 22050,
            frames_per_burst: 512,
            ..params()
        };
        stream
            .initialize(slow, Renderer::new(mixer, status.clone(), &slow))
            .unwrap();
        assert_eq!(status.latency_frames(), 512);
    }
}
