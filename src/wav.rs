//! WAV file adapters for the capture and playback collaborators.
//!
//! Capture downmixes to mono and normalizes integer PCM to [-1, 1). Playback
//! writes mono PCM, 16-bit integer or 32-bit float.

use crate::control::{CaptureSource, PlaybackSink};
use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

pub struct WavCapture<R: Read> {
    reader: WavReader<R>,
    channels: usize,
    /// `None` for float files.
    int_scale: Option<f32>,
}

impl WavCapture<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)
            .with_context(|| format!("failed to open capture WAV '{}'", path.display()))?;
        Self::new(reader)
    }
}

impl<R: Read> WavCapture<R> {
    pub fn new(reader: WavReader<R>) -> Result<Self> {
        let spec = reader.spec();
        let int_scale = match spec.sample_format {
            SampleFormat::Float if spec.bits_per_sample == 32 => None,
            SampleFormat::Int if (8..=32).contains(&spec.bits_per_sample) => {
                Some(1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32)
            }
            _ => anyhow::bail!(
                "unsupported WAV format: {:?} {}-bit",
                spec.sample_format,
                spec.bits_per_sample
            ),
        };
        Ok(Self {
            reader,
            channels: spec.channels.max(1) as usize,
            int_scale,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.reader.spec().sample_rate
    }

    /// Length of the file in frames.
    pub fn frames(&self) -> u32 {
        self.reader.duration()
    }

    fn next_sample(&mut self) -> Result<Option<f32>> {
        Ok(match self.int_scale {
            None => self.reader.samples::<f32>().next().transpose()?,
            Some(scale) => self
                .reader
                .samples::<i32>()
                .next()
                .transpose()?
                .map(|v| v as f32 * scale),
        })
    }
}

impl<R: Read + Send> CaptureSource for WavCapture<R> {
    fn read(&mut self, max_samples: usize) -> Result<Vec<f32>> {
        let mut out = Vec::with_capacity(max_samples);
        'frames: while out.len() < max_samples {
            let mut sum = 0.0f32;
            for _ in 0..self.channels {
                match self.next_sample()? {
                    Some(v) => sum += v,
                    None => break 'frames,
                }
            }
            out.push(sum / self.channels as f32);
        }
        Ok(out)
    }
}

pub struct WavPlayback<W: Write + Seek> {
    writer: Option<WavWriter<W>>,
    float: bool,
}

impl WavPlayback<BufWriter<File>> {
    /// 16-bit mono file at `sample_rate`.
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let writer = WavWriter::create(path, mono_spec(sample_rate, false))
            .with_context(|| format!("failed to create output WAV '{}'", path.display()))?;
        Ok(Self::from_writer(writer))
    }
}

impl<W: Write + Seek> WavPlayback<W> {
    pub fn new(sink: W, sample_rate: u32, float: bool) -> Result<Self> {
        let writer = WavWriter::new(sink, mono_spec(sample_rate, float))
            .context("failed to write WAV header")?;
        Ok(Self::from_writer(writer))
    }

    fn from_writer(writer: WavWriter<W>) -> Self {
        let float = writer.spec().sample_format == SampleFormat::Float;
        Self {
            writer: Some(writer),
            float,
        }
    }
}

fn mono_spec(sample_rate: u32, float: bool) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: if float { 32 } else { 16 },
        sample_format: if float {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    }
}

impl<W: Write + Seek + Send> PlaybackSink for WavPlayback<W> {
    fn write(&mut self, block: &[f32]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .context("WAV playback already finalized")?;
        for &x in block {
            if self.float {
                writer.write_sample(x)?;
            } else {
                let v = (x.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                writer.write_sample(v)?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("failed to finalize WAV")?;
        }
        Ok(())
    }
}
