//! branchflow - runs a synthetic audio stream through a three-branch graph
//!
//! Main application entry point.

mod recorder;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use branchflow_core::{SampleFormat, StreamFormat};
use branchflow_graph::PipelineDescription;
use branchflow_runtime::{Runner, RunnerConfig};

use crate::recorder::Recorder;

/// Feed a chirped tone through a tee into audio, visualization and app branches
#[derive(Parser, Debug)]
#[command(name = "branchflow")]
#[command(about = "Run a branching media graph fed by a synthetic source", long_about = None)]
struct Args {
    /// Pipeline description (RON). Defaults to the built-in three-branch pipeline.
    #[arg(short, long)]
    pipeline: Option<PathBuf>,

    /// Write the pipeline description to this file and exit
    #[arg(long)]
    dump_pipeline: Option<PathBuf>,

    /// Stop after this many seconds (runs until killed otherwise)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Sample rate (Hz) of the built-in pipeline
    #[arg(short, long, default_value_t = 44100)]
    sample_rate: u32,

    /// Number of channels of the built-in pipeline
    #[arg(short, long, default_value_t = 1)]
    channels: u16,

    /// Sample format of the built-in pipeline (s16 or f32)
    #[arg(short, long, default_value = "s16")]
    format: SampleFormat,

    /// Bytes per generated chunk
    #[arg(long, default_value_t = 1024)]
    chunk_bytes: usize,

    /// Write samples handed back by the app sink to a WAV file
    #[arg(short, long)]
    record: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "branchflow=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let description = match &args.pipeline {
        Some(path) => PipelineDescription::load(path)
            .with_context(|| format!("Failed to load pipeline: {}", path.display()))?,
        None => {
            let format = StreamFormat::new(args.format, args.sample_rate, args.channels);
            format.validate().context("Invalid stream format")?;
            PipelineDescription::three_branch(format)
        }
    };

    if let Some(path) = &args.dump_pipeline {
        description
            .save(path)
            .with_context(|| format!("Failed to write pipeline: {}", path.display()))?;
        println!("Wrote pipeline '{}' to {}", description.name, path.display());
        return Ok(());
    }

    run(&args, &description)
}

fn run(args: &Args, description: &PipelineDescription) -> Result<()> {
    tracing::info!("Starting branchflow with pipeline '{}'", description.name);

    let config = RunnerConfig {
        chunk_bytes: args.chunk_bytes,
        ..RunnerConfig::default()
    };
    let mut runner = Runner::new(config);

    let recorder = match &args.record {
        Some(path) => Some(Recorder::create(path, description.format)?),
        None => None,
    };
    if let Some(recorder) = &recorder {
        let recorder = recorder.clone();
        runner.on_new_sample(move |_, chunk| recorder.write(chunk));
    }

    runner.build(description).context("Failed to build pipeline")?;
    runner.start().context("Failed to start pipeline")?;

    if let Some(seconds) = args.duration {
        let duration = Duration::try_from_secs_f64(seconds).context("Invalid duration")?;
        let handle = runner.handle();
        std::thread::spawn(move || {
            std::thread::sleep(duration);
            tracing::info!("Duration elapsed, stopping");
            handle.request_stop();
        });
    }

    // Finish the recording even when streaming failed
    let result = runner.run();

    if let Some(recorder) = recorder {
        let frames = recorder.finish()?;
        tracing::info!("Recorded {} frames", frames);
    }
    result.context("Pipeline stopped with an error")?;

    tracing::info!("branchflow shutting down");
    Ok(())
}
