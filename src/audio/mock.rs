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
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::info;

use super::{ErrorNotifier, OutputBackend, OutputStream, Renderer, StreamError, StreamParams};

/// A mock backend. Nothing is played; callers drive callbacks with
/// [`MockHandle::pump`].
pub struct MockBackend {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    running: Mutex<Option<Running>>,
    fail_next_open: AtomicBool,
    opens: AtomicUsize,
}

struct Running {
    params: StreamParams,
    renderer: Renderer,
    on_error: ErrorNotifier,
}

/// Test-side control over a [`MockBackend`].
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

struct MockStream {
    shared: Arc<Shared>,
}

impl MockBackend {
    pub fn new() -> MockBackend {
        MockBackend {
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        MockBackend::new()
    }
}

impl fmt::Display for MockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mock")
    }
}

impl OutputBackend for MockBackend {
    fn open(
        &self,
        params: &StreamParams,
        renderer: Renderer,
        on_error: ErrorNotifier,
    ) -> Result<Box<dyn OutputStream>, StreamError> {
        if self.shared.fail_next_open.swap(false, Ordering::AcqRel) {
            return Err(StreamError::Build("mock device refused to open".to_string()));
        }
        self.shared.opens.fetch_add(1, Ordering::Relaxed);
        *self.shared.running.lock() = Some(Running {
            params: *params,
            renderer: renderer.without_thread_priority(),
            on_error,
        });
        info!(sample_rate = params.sample_rate, "Mock stream started");
        Ok(Box::new(MockStream {
            shared: self.shared.clone(),
        }))
    }
}

impl OutputStream for MockStream {
    fn close(self: Box<Self>) {
        self.shared.running.lock().take();
    }
}

impl MockHandle {
    /// Runs one device callback of `frames` frames and returns the buffer, or
    /// `None` if no stream is running.
    pub fn pump(&self, frames: usize) -> Option<Vec<f32>> {
        let mut running = self.shared.running.lock();
        let running = running.as_mut()?;
        let mut buffer = vec![0.0; frames * usize::from(running.params.channels)];
        let latency = Duration::from_secs_f64(
            f64::from(running.params.frames_per_burst) / f64::from(running.params.sample_rate.max(1)),
        );
        running.renderer.render(&mut buffer, Some(latency));
        Some(buffer)
    }

    /// Simulates a device error.
    pub fn fail(&self) {
        if let Some(running) = self.shared.running.lock().as_ref() {
            running.on_error.notify();
        }
    }

    /// Makes the next open fail.
    pub fn fail_next_open(&self) {
        self.shared.fail_next_open.store(true, Ordering::Release);
    }

    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.lock().is_some()
    }
}
