//! Render the chirped oscillator to a WAV file
//!
//! Runs the same producer the graph source is fed by, without a graph or a
//! loop. Useful for listening to the tone offline.

use anyhow::{Context, Result};
use clap::Parser;
use hound::{WavSpec, WavWriter};
use std::path::PathBuf;

use branchflow_core::{SampleFormat, StreamFormat};
use branchflow_runtime::SampleProducer;

/// Render the chirped oscillator to a WAV file
#[derive(Parser, Debug)]
#[command(name = "render-tone")]
#[command(about = "Render the synthetic source to a WAV file", long_about = None)]
struct Args {
    /// Output WAV file
    #[arg(short, long)]
    output: PathBuf,

    /// Sample rate (Hz)
    #[arg(short, long, default_value_t = 44100)]
    sample_rate: u32,

    /// Number of channels
    #[arg(short, long, default_value_t = 1)]
    channels: u16,

    /// Duration (seconds)
    #[arg(short, long, default_value_t = 5.0)]
    duration: f64,

    /// Bytes per generated chunk
    #[arg(long, default_value_t = 1024)]
    chunk_bytes: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    println!("Rendering tone:");
    println!("  Output: {}", args.output.display());
    println!("  Sample rate: {} Hz", args.sample_rate);
    println!("  Channels: {}", args.channels);
    println!("  Duration: {:.1} seconds", args.duration);

    let format = StreamFormat::new(SampleFormat::S16LE, args.sample_rate, args.channels);
    let mut producer = SampleProducer::new(format, args.chunk_bytes).context("Invalid chunk size or format")?;

    let spec = WavSpec {
        channels: args.channels,
        sample_rate: args.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&args.output, spec)
        .with_context(|| format!("Failed to create output file: {}", args.output.display()))?;

    let total_frames = (f64::from(args.sample_rate) * args.duration.max(0.0)) as u64;
    while producer.samples_produced() < total_frames {
        let chunk = producer.next_chunk();
        let remaining = (total_frames - chunk.offset()).min(chunk.frames() as u64) as usize;
        let bytes = remaining * format.bytes_per_frame();

        for sample in chunk.data()[..bytes].chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .context("Failed to write sample")?;
        }
    }

    writer.finalize().context("Failed to finalize WAV file")?;

    println!("Successfully wrote {total_frames} frames");
    Ok(())
}
