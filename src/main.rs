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
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use padcore::audio::cpal::list_devices;
use padcore::config::{load_engine_config, load_kit, Kit};
use padcore::samples::PcmSource;
use padcore::{Engine, Transport};
use tracing_subscriber::EnvFilter;

const DEFAULT_PLAY_DURATION: &str = "8s";

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A real-time pad sampler engine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Verifies a kit file and the samples it references.
    Verify {
        /// The path to the kit file.
        kit_path: PathBuf,
    },
    /// Plays a kit's pattern through the audio interface.
    Play {
        /// The path to the kit file.
        kit_path: PathBuf,
        /// The engine configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Overrides the kit tempo.
        #[arg(short, long)]
        bpm: Option<f64>,
        /// How long to play, e.g. 30s.
        #[arg(short, long, default_value = DEFAULT_PLAY_DURATION)]
        duration: String,
    },
    /// Renders a kit's pattern into a WAV file without an audio device.
    Bounce {
        /// The path to the kit file.
        kit_path: PathBuf,
        /// The WAV file to write.
        output: PathBuf,
        /// The engine configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// How much to render, e.g. 4s.
        #[arg(short, long, default_value = DEFAULT_PLAY_DURATION)]
        duration: String,
    },
}

fn parse_duration(duration: &str) -> Result<Duration, Box<dyn Error>> {
    Ok(DurationString::from_string(duration.to_string())?.into())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Verify { kit_path } => {
            let kit = Kit::deserialize(&kit_path)?;

            println!("Samples:");
            for (id, file) in kit.sample_files() {
                match PcmSource::from_wav(&file) {
                    Ok(source) => println!(
                        "- {}: {} ({} frames, {} channels, {} Hz)",
                        id,
                        file.display(),
                        source.frame_count(),
                        source.channel_count(),
                        source.sample_rate()
                    ),
                    Err(e) => return Err(format!("sample {} ({}): {}", id, file.display(), e).into()),
                }
            }

            println!("Pads:");
            for pad in kit.pads() {
                let samples: Vec<&str> = pad.layers.iter().map(|layer| layer.sample.as_str()).collect();
                println!(
                    "- {}: {} (mute group {}, polyphony {})",
                    pad.id,
                    samples.join(", "),
                    pad.mute_group,
                    pad.polyphony
                );
            }

            match kit.pattern()? {
                Some(pattern) => println!(
                    "Pattern: {} steps, {} per beat, {} tracks",
                    pattern.length(),
                    pattern.steps_per_beat(),
                    pattern.tracks().len()
                ),
                None => println!("No pattern."),
            }
        }
        Commands::Play {
            kit_path,
            config,
            bpm,
            duration,
        } => {
            let duration = parse_duration(&duration)?;
            let config = load_engine_config(config.as_deref())?;
            let kit = Kit::deserialize(&kit_path)?;
            let engine = Arc::new(Engine::new(&config)?);
            load_kit(&engine, &kit)?;
            if let Some(bpm) = bpm {
                engine.set_tempo(bpm);
            }

            if !engine.initialize(
                config.sample_rate(),
                config.frames_per_burst(),
                config.low_latency(),
            ) {
                return Err("unable to open the output stream".into());
            }
            let sequencer = engine.start_sequencer(config.scheduler_interval()?);
            engine.handle_transport(Transport::Start);
            thread::sleep(duration);
            engine.handle_transport(Transport::Stop);
            sequencer.stop();
            engine.shutdown();

            let statistics = engine.timing_statistics();
            println!("Triggers: {}", statistics.realized_triggers);
            println!(
                "Latency: avg {:.2}ms, min {:.2}ms, max {:.2}ms",
                statistics.avg_latency_ms, statistics.min_latency_ms, statistics.max_latency_ms
            );
            println!("Jitter: {:.3}ms", statistics.jitter_ms);
            println!(
                "Missed: {}, underruns: {}, dropped commands: {}, stolen voices: {}",
                statistics.missed_triggers,
                statistics.underruns,
                statistics.dropped_commands,
                statistics.stolen_voices
            );
        }
        Commands::Bounce {
            kit_path,
            output,
            config,
            duration,
        } => {
            let duration = parse_duration(&duration)?;
            let config = load_engine_config(config.as_deref())?;
            let kit = Kit::deserialize(&kit_path)?;
            let engine = Engine::new(&config)?;
            load_kit(&engine, &kit)?;

            let channels = config.channels();
            let frames_per_burst = config.frames_per_burst() as usize;
            let total_frames = duration.as_secs_f64() * f64::from(engine.sample_rate());
            let mut writer = hound::WavWriter::create(
                &output,
                hound::WavSpec {
                    channels,
                    sample_rate: engine.sample_rate(),
                    bits_per_sample: 32,
                    sample_format: hound::SampleFormat::Float,
                },
            )?;

            engine.handle_transport(Transport::Start);
            let mut buffer = vec![0.0; frames_per_burst * usize::from(channels)];
            while (engine.current_frame() as f64) < total_frames {
                engine.run_scheduling_pass();
                engine.render(&mut buffer);
                for sample in &buffer {
                    writer.write_sample(*sample)?;
                }
            }
            writer.finalize()?;
            println!(
                "Rendered {} frames to {}",
                engine.current_frame(),
                output.display()
            );
        }
    }

    Ok(())
}
