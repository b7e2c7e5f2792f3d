//! Audio destinations for filtered 8-bit mono samples.
//!
//! Opening a sink is its constructor and the only step allowed to fail
//! fatally; every method on [`Sink`] reports errors that the stream loop
//! logs and tolerates.

use anyhow::Context;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub use crate::audio_io::CpalSink;

/// Midpoint of the unsigned 8-bit range.
pub const SILENCE: u8 = 128;

pub trait Sink {
    /// Hand `samples` to the destination. May block to pace the caller.
    fn write(&mut self, samples: &[u8]) -> anyhow::Result<()>;

    fn set_rate(&mut self, sample_rate: u32) -> anyhow::Result<()>;

    fn set_latency(&mut self, latency_ms: u32) -> anyhow::Result<()>;

    /// Flush and release the destination. Further writes fail.
    fn close(&mut self) -> anyhow::Result<()>;
}

/// 8-bit unsigned mono PCM WAV file.
pub struct WavSink {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
    sample_rate: u32,
}

impl WavSink {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 8,
            sample_format: SampleFormat::Int,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let writer = WavWriter::create(&path, spec)
            .with_context(|| format!("failed to create WAV file {}", path.display()))?;
        log::info!("rendering to {} at {sample_rate} Hz", path.display());
        Ok(Self {
            writer: Some(writer),
            path,
            sample_rate,
        })
    }
}

impl Sink for WavSink {
    fn write(&mut self, samples: &[u8]) -> anyhow::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .context("WAV file already finalized")?;
        for &sample in samples {
            // hound takes signed 8-bit and stores it offset by 128.
            writer.write_sample((i16::from(sample) - 128) as i8)?;
        }
        Ok(())
    }

    fn set_rate(&mut self, sample_rate: u32) -> anyhow::Result<()> {
        if sample_rate == self.sample_rate {
            return Ok(());
        }
        anyhow::bail!(
            "cannot switch {} from {} Hz to {sample_rate} Hz mid-file",
            self.path.display(),
            self.sample_rate
        )
    }

    fn set_latency(&mut self, _latency_ms: u32) -> anyhow::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .with_context(|| format!("failed to finalize {}", self.path.display()))?;
        }
        Ok(())
    }
}
