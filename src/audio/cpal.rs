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
use std::{fmt, thread};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::FromSample;
use crossbeam_channel::{bounded, Sender};
use tracing::{error, info};

use super::{ErrorNotifier, OutputBackend, OutputStream, Renderer, StreamError, StreamParams};

/// An output device as reported by cpal.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub host: String,
    pub max_channels: u16,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Channels={}) ({})", self.name, self.max_channels, self.host)
    }
}

/// Lists output devices on every available host.
pub fn list_devices() -> Result<Vec<DeviceInfo>, StreamError> {
    let mut devices = Vec::new();
    for host_id in cpal::available_hosts() {
        let host = cpal::host_from_id(host_id).map_err(|e| StreamError::Backend(e.to_string()))?;
        let host_devices = match host.devices() {
            Ok(host_devices) => host_devices,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };

        for device in host_devices {
            let Ok(output_configs) = device.supported_output_configs() else {
                continue;
            };
            let max_channels = output_configs.map(|config| config.channels()).max().unwrap_or(0);
            if max_channels == 0 {
                continue;
            }
            let Ok(name) = device.name() else {
                continue;
            };
            devices.push(DeviceInfo {
                name,
                host: host_id.name().to_string(),
                max_channels,
            });
        }
    }

    devices.sort_by_key(|device| device.name.to_string());
    Ok(devices)
}

/// Plays through a cpal device. `None` selects the host's default output.
pub struct CpalBackend {
    device: Option<String>,
}

impl CpalBackend {
    pub fn new(device: Option<String>) -> CpalBackend {
        CpalBackend { device }
    }

    fn find_device(&self) -> Result<cpal::Device, StreamError> {
        let host = cpal::default_host();
        match &self.device {
            None => host
                .default_output_device()
                .ok_or_else(|| StreamError::NoDevice("default".to_string())),
            Some(name) => host
                .output_devices()
                .map_err(|e| StreamError::Backend(e.to_string()))?
                .find(|device| device.name().map(|n| n.trim() == name).unwrap_or(false))
                .ok_or_else(|| StreamError::NoDevice(name.clone())),
        }
    }
}

impl fmt::Display for CpalBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpal:{}", self.device.as_deref().unwrap_or("default"))
    }
}

/// Chooses the buffer size. A fixed buffer is only requested when the hint is
/// set and the device accepts that size.
fn buffer_size(device: &cpal::Device, params: &StreamParams) -> cpal::BufferSize {
    if !params.low_latency {
        return cpal::BufferSize::Default;
    }
    let fits = device
        .supported_output_configs()
        .map(|mut configs| {
            configs.any(|config| {
                config.channels() == params.channels
                    && match config.buffer_size() {
                        cpal::SupportedBufferSize::Range { min, max } => {
                            (*min..=*max).contains(&params.frames_per_burst)
                        }
                        cpal::SupportedBufferSize::Unknown => true,
                    }
            })
        })
        .unwrap_or(false);
    if fits {
        cpal::BufferSize::Fixed(params.frames_per_burst)
    } else {
        cpal::BufferSize::Default
    }
}

fn output_latency(info: &cpal::OutputCallbackInfo) -> Option<std::time::Duration> {
    let timestamp = info.timestamp();
    timestamp.playback.duration_since(&timestamp.callback)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
    on_error: ErrorNotifier,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + FromSample<f32>,
{
    device.build_output_stream(
        config,
        move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
            renderer.render_with(data, output_latency(info), |sample| T::from_sample(sample));
        },
        move |err| {
            error!("CPAL output stream error: {}", err);
            on_error.notify();
        },
        None,
    )
}

fn build_f32_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
    on_error: ErrorNotifier,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    device.build_output_stream(
        config,
        move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
            renderer.render(data, output_latency(info));
        },
        move |err| {
            error!("CPAL output stream error: {}", err);
            on_error.notify();
        },
        None,
    )
}

impl OutputBackend for CpalBackend {
    fn open(
        &self,
        params: &StreamParams,
        renderer: Renderer,
        on_error: ErrorNotifier,
    ) -> Result<Box<dyn OutputStream>, StreamError> {
        let device = self.find_device()?;
        let sample_format = device
            .default_output_config()
            .map_err(|e| StreamError::UnsupportedFormat(e.to_string()))?
            .sample_format();
        let config = cpal::StreamConfig {
            channels: params.channels,
            sample_rate: cpal::SampleRate(params.sample_rate),
            buffer_size: buffer_size(&device, params),
        };

        let (ready_tx, ready_rx) = bounded::<Result<(), StreamError>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        // cpal streams are not Send on every platform, so the stream lives and
        // dies on its own thread.
        let thread = thread::Builder::new()
            .name("padcore-output".to_string())
            .spawn(move || {
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => build_f32_stream(&device, &config, renderer, on_error),
                    cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, renderer, on_error),
                    cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, renderer, on_error),
                    cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, renderer, on_error),
                    other => {
                        let _ = ready_tx.send(Err(StreamError::UnsupportedFormat(format!("{other:?}"))));
                        return;
                    }
                };
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(StreamError::Build(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(StreamError::Play(e.to_string())));
                    return;
                }
                info!(
                    format = ?sample_format,
                    buffer_size = ?config.buffer_size,
                    "CPAL output stream started successfully"
                );
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until closed.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| StreamError::Backend(e.to_string()))?;

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(StreamError::Backend("output thread exited".to_string())));
        if let Err(e) = started {
            let _ = thread.join();
            return Err(e);
        }

        Ok(Box::new(CpalStream {
            shutdown: shutdown_tx,
            thread: Some(thread),
        }))
    }
}

struct CpalStream {
    shutdown: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl OutputStream for CpalStream {
    fn close(mut self: Box<Self>) {
        let _ = self.shutdown.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
