//! Headerless PCM file endpoint

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{AudioEndpoint, Capabilities, EndpointBase, EndpointError, EndpointResult, IoMode};
use crate::buffer::{AudioFormat, SampleBuffer};
use crate::types::SamplePos;

/// A raw sample file in any supported [`AudioFormat`]
///
/// The format can't be detected from the file, so it has to be given up
/// front. Files at a different rate than the engine are resampled on the
/// fly; the conversion state lives in the endpoint, not in the engine's
/// buffers.
pub struct RawFileEndpoint {
    base: EndpointBase,
    path: PathBuf,
    file: Option<File>,
    bytes: Vec<u8>,
    convert: SampleBuffer,
}

impl RawFileEndpoint {
    pub fn new(path: impl AsRef<Path>, io_mode: IoMode, format: AudioFormat) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            base: EndpointBase::new(path.display().to_string(), io_mode, format),
            path,
            file: None,
            bytes: Vec::new(),
            convert: SampleBuffer::new(0, format.channels, format.sample_rate),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> EndpointResult<&mut File> {
        let label = self.base.label().to_string();
        self.file.as_mut().ok_or(EndpointError::NotOpen(label))
    }

    /// Read as many bytes as possible into `self.bytes`, stopping at end of file
    fn fill_bytes(&mut self, wanted: usize) -> EndpointResult<usize> {
        self.bytes.resize(wanted, 0);
        let label = self.base.label().to_string();
        let file = self.file.as_mut().ok_or_else(|| EndpointError::NotOpen(label.clone()))?;
        let mut filled = 0;
        while filled < wanted {
            match file.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EndpointError::io(&label, e)),
            }
        }
        Ok(filled)
    }

    fn update_finished(&mut self) {
        if let Some(length) = self.base.length() {
            if self.base.io_mode() == IoMode::Read && self.base.position() >= length {
                self.base.set_finished(true);
            }
        }
    }
}

impl AudioEndpoint for RawFileEndpoint {
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
        let label = self.base.label().to_string();
        let format = self.base.format();
        if format.channels == 0 || format.sample_rate == 0 {
            return Err(EndpointError::setup(&label, "zero channels or sample rate"));
        }

        let file = match self.base.io_mode() {
            IoMode::Read => File::open(&self.path),
            IoMode::Write => File::create(&self.path),
            IoMode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path),
        }
        .map_err(|e| EndpointError::io(&label, e))?;

        let bytes = file
            .metadata()
            .map_err(|e| EndpointError::io(&label, e))?
            .len();
        let native_frames = (bytes / format.frame_size() as u64) as SamplePos;
        self.base.set_length(Some(self.base.native_to_engine(native_frames)));

        self.file = Some(file);
        self.base.set_position(0);
        self.base.set_finished(false);
        self.convert = SampleBuffer::new(0, format.channels, self.base.engine_rate());
        self.base.set_open(true);
        self.update_finished();
        log::debug!(
            "raw: opened '{}' ({}, {} ch, {} Hz, {} frames)",
            label,
            format.sample_format,
            format.channels,
            format.sample_rate,
            native_frames
        );
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                log::warn!("raw: flush failed on '{}': {}", self.base.label(), e);
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
        let format = self.base.format();
        let engine_rate = self.base.engine_rate();

        let wanted = self.base.engine_to_native(self.base.buffersize() as SamplePos).max(1) as usize;
        let got = self.fill_bytes(wanted * format.frame_size())?;
        let frames = got / format.frame_size();

        let label = self.base.label().to_string();
        if format.sample_rate == engine_rate {
            buffer.set_sample_rate(engine_rate);
            buffer
                .import_from_raw(&self.bytes, frames, &format)
                .map_err(|e| EndpointError::format(&label, e))?;
        } else {
            self.convert.set_sample_rate(engine_rate);
            self.convert
                .import_from_raw(&self.bytes, frames, &format)
                .map_err(|e| EndpointError::format(&label, e))?;
            buffer.set_channel_count(self.convert.channel_count());
            buffer.copy(&self.convert);
            buffer.set_sample_rate(engine_rate);
        }

        self.base.advance(buffer.len());
        if frames < wanted {
            self.base.set_finished(true);
        }
        self.update_finished();
        Ok(())
    }

    fn write_buffer(&mut self, buffer: &mut SampleBuffer) -> EndpointResult<()> {
        self.base.ensure_open()?;
        self.base.ensure_writable()?;
        let format = self.base.format();
        let label = self.base.label().to_string();
        let frames = buffer.len();

        if buffer.sample_rate() == format.sample_rate {
            buffer
                .export_to_raw(&mut self.bytes, &format)
                .map_err(|e| EndpointError::format(&label, e))?;
        } else {
            self.convert.set_channel_count(buffer.channel_count());
            self.convert.copy(buffer);
            self.convert.set_sample_rate(buffer.sample_rate());
            self.convert
                .export_to_raw(&mut self.bytes, &format)
                .map_err(|e| EndpointError::format(&label, e))?;
        }

        let bytes = std::mem::take(&mut self.bytes);
        let result = self.file().and_then(|file| {
            file.write_all(&bytes)
                .map_err(|e| EndpointError::io(&label, e))
        });
        self.bytes = bytes;
        result?;

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
        let byte_offset =
            self.base.engine_to_native(position) as u64 * self.base.format().frame_size() as u64;
        self.file()?
            .seek(SeekFrom::Start(byte_offset))
            .map_err(|e| EndpointError::io(&label, e))?;
        self.base.set_position(position);
        self.base.set_finished(false);
        self.convert.reset_resample_memory();
        self.update_finished();
        Ok(())
    }

    fn length(&self) -> Option<SamplePos> {
        self.base.length()
    }

    fn finished(&self) -> bool {
        self.base.finished()
    }
}

impl Drop for RawFileEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SampleFormat;

    fn stereo(frames: usize, value: f32) -> SampleBuffer {
        let mut buf = SampleBuffer::new(frames, 2, 44100);
        for ch in buf.channels_mut() {
            ch.fill(value);
        }
        buf
    }

    #[test]
    fn test_write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.raw");
        let format = AudioFormat::new(SampleFormat::S16Le, 2, 44100);

        let mut out = RawFileEndpoint::new(&path, IoMode::Write, format);
        out.set_buffersize(64, 44100);
        out.open().unwrap();
        out.write_buffer(&mut stereo(64, 0.5)).unwrap();
        out.write_buffer(&mut stereo(64, -0.25)).unwrap();
        assert_eq!(out.position(), 128);
        out.close();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 128 * 4);

        let mut input = RawFileEndpoint::new(&path, IoMode::Read, format);
        input.set_buffersize(64, 44100);
        input.open().unwrap();
        assert_eq!(input.length(), Some(128));

        let mut buf = SampleBuffer::default();
        input.read_buffer(&mut buf).unwrap();
        assert_eq!(buf.len(), 64);
        assert!(!input.finished());
        assert!(buf.channel(1).iter().all(|&s| s == 0.5));

        input.read_buffer(&mut buf).unwrap();
        assert!(buf.channel(0).iter().all(|&s| s == -0.25));
        assert!(input.finished());
    }

    #[test]
    fn test_short_final_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.raw");
        std::fs::write(&path, vec![0u8; 100 * 4]).unwrap();

        let mut input = RawFileEndpoint::new(&path, IoMode::Read, AudioFormat::default());
        input.set_buffersize(64, 44100);
        input.open().unwrap();

        let mut buf = SampleBuffer::default();
        input.read_buffer(&mut buf).unwrap();
        input.read_buffer(&mut buf).unwrap();
        assert_eq!(buf.len(), 36);
        assert!(input.finished());
    }

    #[test]
    fn test_seek_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seek.raw");
        let samples: Vec<u8> = (0..256i16).flat_map(|v| (v * 100).to_le_bytes()).collect();
        std::fs::write(&path, samples).unwrap();

        let format = AudioFormat::new(SampleFormat::S16Le, 1, 44100);
        let mut input = RawFileEndpoint::new(&path, IoMode::Read, format);
        input.set_buffersize(128, 44100);
        input.open().unwrap();

        let mut buf = SampleBuffer::default();
        input.read_buffer(&mut buf).unwrap();
        input.read_buffer(&mut buf).unwrap();
        assert!(input.finished());

        input.seek(128).unwrap();
        assert!(!input.finished());
        input.read_buffer(&mut buf).unwrap();
        assert!((buf.channel(0)[0] - 12800.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_read_on_write_endpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = RawFileEndpoint::new(dir.path().join("w.raw"), IoMode::Write, AudioFormat::default());
        out.open().unwrap();
        let mut buf = SampleBuffer::default();
        assert!(matches!(
            out.read_buffer(&mut buf),
            Err(EndpointError::UnsupportedIoMode { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let mut input = RawFileEndpoint::new("/nonexistent/in.raw", IoMode::Read, AudioFormat::default());
        assert!(matches!(input.open(), Err(EndpointError::Io { .. })));
        assert!(!input.is_open());
    }
}
