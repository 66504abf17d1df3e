//! RIFF/WAVE file endpoint built on `hound`

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use super::{AudioEndpoint, Capabilities, EndpointBase, EndpointError, EndpointResult, IoMode};
use crate::buffer::{AudioFormat, SampleBuffer, SampleFormat};
use crate::types::{Sample, SamplePos};

/// A WAV file opened for reading or for writing
///
/// Reading picks the format up from the file header. Writing uses the
/// format given at construction; a writer can only seek forward, which pads
/// the gap with silence.
pub struct WavFileEndpoint {
    base: EndpointBase,
    path: PathBuf,
    reader: Option<hound::WavReader<BufReader<File>>>,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    interleaved: Vec<Sample>,
    convert: SampleBuffer,
}

impl WavFileEndpoint {
    /// Open `path` for reading; the format is taken from the file on open
    pub fn reader(path: impl AsRef<Path>) -> Self {
        Self::new(path, IoMode::Read, AudioFormat::default())
    }

    /// Create `path` for writing in `format`
    pub fn writer(path: impl AsRef<Path>, format: AudioFormat) -> Self {
        Self::new(path, IoMode::Write, format)
    }

    pub fn new(path: impl AsRef<Path>, io_mode: IoMode, format: AudioFormat) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            base: EndpointBase::new(path.display().to_string(), io_mode, format),
            path,
            reader: None,
            writer: None,
            interleaved: Vec::new(),
            convert: SampleBuffer::new(0, format.channels, format.sample_rate),
        }
    }

    fn spec_for(format: &AudioFormat) -> hound::WavSpec {
        let (bits_per_sample, sample_format) = match format.sample_format {
            SampleFormat::U8 => (8, hound::SampleFormat::Int),
            SampleFormat::S16Le | SampleFormat::S16Be => (16, hound::SampleFormat::Int),
            SampleFormat::S24Le | SampleFormat::S24Be => (24, hound::SampleFormat::Int),
            SampleFormat::S32Le | SampleFormat::S32Be => (32, hound::SampleFormat::Int),
            SampleFormat::F32Le | SampleFormat::F32Be => (32, hound::SampleFormat::Float),
        };
        hound::WavSpec {
            channels: format.channels as u16,
            sample_rate: format.sample_rate,
            bits_per_sample,
            sample_format,
        }
    }

    fn format_for(label: &str, spec: &hound::WavSpec) -> EndpointResult<AudioFormat> {
        let float = spec.sample_format == hound::SampleFormat::Float;
        let signed = spec.bits_per_sample > 8;
        let sample_format = SampleFormat::from_parts(spec.bits_per_sample, signed, float, true)
            .map_err(|e| EndpointError::format(label, e))?;
        Ok(AudioFormat::new(
            sample_format,
            spec.channels as usize,
            spec.sample_rate,
        ))
    }

    fn open_reader(&mut self) -> EndpointResult<()> {
        let label = self.base.label().to_string();
        let reader = hound::WavReader::open(&self.path).map_err(|e| EndpointError::wav(&label, e))?;
        let spec = reader.spec();
        let format = Self::format_for(&label, &spec)?;
        *self.base.format_mut() = format;
        let frames = reader.duration() as SamplePos;
        self.base.set_length(Some(self.base.native_to_engine(frames)));
        self.base.set_finished(frames == 0);
        self.reader = Some(reader);
        Ok(())
    }

    fn open_writer(&mut self) -> EndpointResult<()> {
        let label = self.base.label().to_string();
        let spec = Self::spec_for(&self.base.format());
        let writer =
            hound::WavWriter::create(&self.path, spec).map_err(|e| EndpointError::wav(&label, e))?;
        self.base.set_length(Some(0));
        self.writer = Some(writer);
        Ok(())
    }

    /// Write interleaved samples from `self.interleaved`
    fn write_interleaved(&mut self) -> EndpointResult<()> {
        let label = self.base.label().to_string();
        let spec = Self::spec_for(&self.base.format());
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| EndpointError::NotOpen(label.clone()))?;

        for &sample in &self.interleaved {
            let x = sample.clamp(-1.0, 1.0);
            let result = match (spec.sample_format, spec.bits_per_sample) {
                (hound::SampleFormat::Float, _) => writer.write_sample(x),
                (_, 8) => writer.write_sample((x * 128.0).round().clamp(-128.0, 127.0) as i8),
                (_, 16) => writer.write_sample((x * 32768.0).round().clamp(-32768.0, 32767.0) as i16),
                (_, 24) => writer.write_sample(
                    (x * 8_388_608.0).round().clamp(-8_388_608.0, 8_388_607.0) as i32,
                ),
                _ => writer.write_sample(
                    (x as f64 * 2_147_483_648.0)
                        .round()
                        .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32,
                ),
            };
            result.map_err(|e| EndpointError::wav(&label, e))?;
        }
        Ok(())
    }
}

impl AudioEndpoint for WavFileEndpoint {
    fn label(&self) -> &str {
        self.base.label()
    }

    fn io_mode(&self) -> IoMode {
        self.base.io_mode()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            readable: true,
            writable: true,
            realtime: false,
            seekable: true,
        }
    }

    fn format(&self) -> AudioFormat {
        self.base.format()
    }

    fn set_buffersize(&mut self, frames: usize, sample_rate: u32) {
        self.base.set_buffersize(frames, sample_rate);
    }

    fn buffersize(&self) -> usize {
        self.base.buffersize()
    }

    fn open(&mut self) -> EndpointResult<()> {
        match self.base.io_mode() {
            IoMode::Read => self.open_reader()?,
            IoMode::Write => self.open_writer()?,
            IoMode::ReadWrite => {
                return Err(EndpointError::UnsupportedIoMode {
                    label: self.base.label().to_string(),
                    mode: IoMode::ReadWrite,
                })
            }
        }
        let format = self.base.format();
        self.convert = SampleBuffer::new(0, format.channels, format.sample_rate);
        self.base.set_position(0);
        self.base.set_open(true);
        log::debug!(
            "wav: opened '{}' for {} ({} ch, {} Hz)",
            self.base.label(),
            self.base.io_mode(),
            format.channels,
            format.sample_rate
        );
        Ok(())
    }

    fn close(&mut self) {
        self.reader = None;
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                log::warn!("wav: finalize failed on '{}': {}", self.base.label(), e);
            }
        }
        self.base.set_open(false);
    }

    fn is_open(&self) -> bool {
        self.base.is_open()
    }

    fn read_buffer(&mut self, buffer: &mut SampleBuffer) -> EndpointResult<()> {
        self.base.ensure_open()?;
        self.base.ensure_readable()?;
        let label = self.base.label().to_string();
        let format = self.base.format();
        let engine_rate = self.base.engine_rate();
        let wanted_frames =
            self.base.engine_to_native(self.base.buffersize() as SamplePos).max(1) as usize;
        let wanted = wanted_frames * format.channels;

        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| EndpointError::NotOpen(label.clone()))?;
        let spec = reader.spec();
        self.interleaved.clear();
        match spec.sample_format {
            hound::SampleFormat::Float => {
                for sample in reader.samples::<f32>().take(wanted) {
                    self.interleaved
                        .push(sample.map_err(|e| EndpointError::wav(&label, e))?);
                }
            }
            hound::SampleFormat::Int => {
                let scale = (1u64 << (spec.bits_per_sample - 1)) as f64;
                for sample in reader.samples::<i32>().take(wanted) {
                    let v = sample.map_err(|e| EndpointError::wav(&label, e))?;
                    self.interleaved.push((v as f64 / scale) as Sample);
                }
            }
        }

        let frames = self.interleaved.len() / format.channels.max(1);
        if format.sample_rate == engine_rate {
            buffer.read_interleaved(&self.interleaved, format.channels);
            buffer.set_sample_rate(engine_rate);
        } else {
            self.convert.read_interleaved(&self.interleaved, format.channels);
            self.convert.set_sample_rate(format.sample_rate);
            self.convert.resample_with_memory(format.sample_rate, engine_rate);
            buffer.set_channel_count(self.convert.channel_count());
            buffer.copy(&self.convert);
            buffer.set_sample_rate(engine_rate);
        }

        self.base.advance(buffer.len());
        let at_end = self
            .base
            .length()
            .map_or(false, |len| self.base.position() >= len);
        if frames < wanted_frames || at_end {
            self.base.set_finished(true);
        }
        Ok(())
    }

    fn write_buffer(&mut self, buffer: &mut SampleBuffer) -> EndpointResult<()> {
        self.base.ensure_open()?;
        self.base.ensure_writable()?;
        let format = self.base.format();
        let frames = buffer.len();

        let source: &SampleBuffer = if buffer.sample_rate() == format.sample_rate {
            buffer
        } else {
            self.convert.set_channel_count(buffer.channel_count());
            self.convert.copy(buffer);
            self.convert.set_sample_rate(buffer.sample_rate());
            self.convert
                .resample_with_memory(buffer.sample_rate(), format.sample_rate);
            &self.convert
        };

        self.interleaved.clear();
        for frame in 0..source.len() {
            for ch in 0..format.channels {
                let sample = if ch < source.channel_count() {
                    source.channel(ch)[frame]
                } else {
                    0.0
                };
                self.interleaved.push(sample);
            }
        }
        self.write_interleaved()?;

        self.base.advance(frames);
        self.base.extend_length();
        Ok(())
    }

    fn position(&self) -> SamplePos {
        self.base.position()
    }

    fn seek(&mut self, position: SamplePos) -> EndpointResult<()> {
        self.base.ensure_open()?;
        let label = self.base.label().to_string();
        let position = position.max(0);

        if let Some(reader) = self.reader.as_mut() {
            let native = self.base.engine_to_native(position).max(0) as u32;
            let native = native.min(reader.duration());
            reader.seek(native).map_err(|e| EndpointError::io(&label, e))?;
            self.base.set_position(position);
            let at_end = self.base.length().map_or(false, |len| position >= len);
            self.base.set_finished(at_end);
            self.convert.reset_resample_memory();
            return Ok(());
        }

        let current = self.base.position();
        if position < current {
            return Err(EndpointError::NotSeekable(label));
        }
        let gap = (position - current) as usize;
        if gap > 0 {
            let channels = self.base.format().channels;
            self.interleaved.clear();
            self.interleaved.resize(self.base.engine_to_native(gap as SamplePos) as usize * channels, 0.0);
            self.write_interleaved()?;
            self.base.set_position(position);
            self.base.extend_length();
        }
        Ok(())
    }

    fn length(&self) -> Option<SamplePos> {
        self.base.length()
    }

    fn finished(&self) -> bool {
        self.base.finished()
    }
}

impl Drop for WavFileEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}
