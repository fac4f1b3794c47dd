//! # Cadence
//!
//! Command-line player: file demuxer, decode thread, and device output wired
//! through one media pipe.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cadence_audio::{
    default_device_name, list_output_devices, AudioBackend, AudioDecoder, CpalSink, DecoderEvent,
    FileSource, MediaPipe, NullSink, OutputConfig, PipelineConfig, QueueLimits,
};
use cadence_core::{AudioFormat, ChannelLayout, SampleFormat};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the playback position is printed.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(name = "cadence", version, about = "Play an audio file")]
struct Args {
    /// File to play.
    #[arg(required_unless_present = "list_devices")]
    file: Option<PathBuf>,

    /// Print the available output devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Decode without a sound device.
    #[arg(long)]
    null_sink: bool,

    /// Frames handed to the device per delivery.
    #[arg(long, default_value_t = 1024)]
    samples_per_deliver: usize,

    /// Audio track to play (0-based).
    #[arg(long, default_value_t = 0)]
    stream: u32,

    /// Queue ceiling in bytes before the demuxer blocks.
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    max_queue_bytes: usize,

    /// Output sample rate. Defaults to the device rate.
    #[arg(long)]
    rate: Option<u32>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence=info,cadence_audio=info".into()),
        )
        .init();

    let args = Args::parse();
    info!("Starting Cadence v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        return print_devices();
    }
    let Some(file) = args.file else {
        bail!("No file given");
    };

    let config = PipelineConfig {
        samples_per_deliver: args.samples_per_deliver.max(1),
        limits: QueueLimits {
            max_bytes: args.max_queue_bytes,
            ..QueueLimits::default()
        },
        ..PipelineConfig::default()
    };

    let source = FileSource::open(&file, args.stream)
        .with_context(|| format!("Failed to open {}", file.display()))?;

    let pipe = Arc::new(MediaPipe::new(config.limits));
    pipe.select_stream(args.stream);

    let sink = if args.null_sink {
        let rate = args.rate.unwrap_or(match source.sample_rate() {
            0 => 48000,
            rate => rate,
        });
        NullSink::factory(AudioFormat::new(
            rate,
            SampleFormat::F32,
            ChannelLayout::STEREO,
        ))
    } else {
        CpalSink::factory(OutputConfig {
            sample_rate: args.rate,
            ..OutputConfig::default()
        })
    };

    let decoder = AudioDecoder::spawn(Arc::clone(&pipe), AudioBackend::new(sink), config)?;
    let producer = source.spawn(Arc::clone(&pipe))?;

    let mut failed = None;
    while !producer.is_finished() {
        match decoder.events().recv_timeout(PROGRESS_INTERVAL) {
            Ok(DecoderEvent::FormatChanged { input, output }) => {
                info!("Converting {input} to {output}");
            }
            Ok(DecoderEvent::ResamplerUnavailable(format)) => {
                warn!("Cannot convert {format}, audio will be silent");
            }
            Ok(DecoderEvent::Fatal(message)) => {
                failed = Some(message);
                break;
            }
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => print_position(&pipe),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Some(message) = failed {
        // The decoder closed the pipe, which stops the producer.
        let _ = producer.join();
        let _ = decoder.join();
        bail!("Playback failed: {message}");
    }

    let pushed = match producer.join() {
        Ok(result) => result?,
        Err(_) => bail!("File source thread panicked"),
    };

    let stats = decoder.shutdown()?;
    println!();
    info!(
        "Played {} of {} units, {} frames delivered, {} discarded",
        stats.units_decoded, pushed, stats.frames_delivered, stats.units_discarded
    );

    Ok(())
}

fn print_devices() -> Result<()> {
    let default = default_device_name();
    for name in list_output_devices()? {
        let marker = if default.as_deref() == Some(name.as_str()) { "*" } else { " " };
        println!("{marker} {name}");
    }
    Ok(())
}

fn print_position(pipe: &MediaPipe) {
    let state = pipe.clock().snapshot();
    if let Some(micros) = pipe.clock().current_time(state.epoch) {
        let seconds = micros.max(0) as f64 / 1_000_000.0;
        print!("\r{:>4}:{:05.2}", (seconds / 60.0) as u64, seconds % 60.0);
        let _ = std::io::stdout().flush();
    }
}
