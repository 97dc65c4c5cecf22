//! WAV recording of samples handed back by the app sink.

use anyhow::{Context, Result};
use hound::{WavSpec, WavWriter};
use std::cell::RefCell;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::rc::Rc;

use branchflow_core::{SampleChunk, SampleFormat, StreamFormat};

type Writer = WavWriter<BufWriter<File>>;

/// Shared WAV writer; clones write to the same file
#[derive(Clone)]
pub struct Recorder {
    format: StreamFormat,
    writer: Rc<RefCell<Option<Writer>>>,
    frames: Rc<RefCell<u64>>,
}

impl Recorder {
    pub fn create(path: &Path, format: StreamFormat) -> Result<Self> {
        let spec = match format.format {
            SampleFormat::S16LE => WavSpec {
                channels: format.channels,
                sample_rate: format.sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
            SampleFormat::F32LE => WavSpec {
                channels: format.channels,
                sample_rate: format.sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            },
        };

        let writer = WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        tracing::info!("Recording app sink samples to {}", path.display());

        Ok(Self {
            format,
            writer: Rc::new(RefCell::new(Some(writer))),
            frames: Rc::new(RefCell::new(0)),
        })
    }

    /// Append one chunk. Write errors are logged; recording stops at the first one.
    pub fn write(&self, chunk: &SampleChunk) {
        let mut slot = self.writer.borrow_mut();
        let Some(writer) = slot.as_mut() else {
            return;
        };

        let result = match self.format.format {
            SampleFormat::S16LE => chunk
                .data()
                .chunks_exact(2)
                .try_for_each(|bytes| writer.write_sample(i16::from_le_bytes([bytes[0], bytes[1]]))),
            SampleFormat::F32LE => chunk.data().chunks_exact(4).try_for_each(|bytes| {
                writer.write_sample(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }),
        };

        match result {
            Ok(()) => *self.frames.borrow_mut() += chunk.frames() as u64,
            Err(e) => {
                tracing::warn!("Failed to write samples, recording stopped: {}", e);
                *slot = None;
            }
        }
    }

    /// Finalize the file and return the number of frames written
    pub fn finish(self) -> Result<u64> {
        let frames = *self.frames.borrow();
        if let Some(writer) = self.writer.borrow_mut().take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchflow_core::ClockTime;

    #[test]
    fn test_record_s16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let format = StreamFormat::new(SampleFormat::S16LE, 44100, 1);

        let recorder = Recorder::create(&path, format).unwrap();
        let data: Vec<u8> = [0i16, 100, -100, i16::MAX].iter().flat_map(|s| s.to_le_bytes()).collect();
        recorder.write(&SampleChunk::new(ClockTime::ZERO, ClockTime::ZERO, 0, 4, data));
        assert_eq!(recorder.finish().unwrap(), 4);

        let reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.into_samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0, 100, -100, i16::MAX]);
    }
}
