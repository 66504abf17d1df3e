//! Endpoint adapter that reads and writes through a proxy ring

use std::sync::Arc;
use std::time::Duration;

use super::server::{ClientSlot, ProxyServer, ServerState};
use crate::buffer::{AudioFormat, SampleBuffer};
use crate::endpoint::{AudioEndpoint, Capabilities, EndpointError, EndpointResult, IoMode, SharedEndpoint};
use crate::types::SamplePos;

/// Longest the engine waits for the I/O thread on an empty or full ring
const RING_WAIT: Duration = Duration::from_secs(1);

/// A non-realtime endpoint serviced by the proxy I/O thread
///
/// Reads copy the next filled slot out of the ring and writes copy into the
/// next free one; the wrapped endpoint itself is only touched by the I/O
/// thread while the server runs. Format, label and length are cached at
/// construction so the engine never waits on the endpoint's lock.
pub struct ProxiedEndpoint {
    inner: SharedEndpoint,
    client: Arc<ClientSlot>,
    server: Arc<ServerState>,
    label: String,
    io_mode: IoMode,
    capabilities: Capabilities,
    format: AudioFormat,
    buffersize: usize,
    engine_rate: u32,
    /// Position of the engine side, behind the wrapped endpoint by the ring contents
    position: SamplePos,
    length: Option<SamplePos>,
    open: bool,
    finished: bool,
    xruns: u64,
}

impl ProxiedEndpoint {
    /// Register `inner` with `server` and wrap it
    pub fn new(inner: SharedEndpoint, server: &ProxyServer) -> Self {
        let client = server.register_client(Arc::clone(&inner));
        let ep = inner.lock();
        let io_mode = client.ring().io_mode();
        let adapter = Self {
            label: ep.label().to_string(),
            io_mode,
            capabilities: ep.capabilities(),
            format: ep.format(),
            buffersize: ep.buffersize(),
            engine_rate: server.sample_rate(),
            position: ep.position(),
            length: ep.length(),
            open: ep.is_open(),
            finished: false,
            xruns: 0,
            server: Arc::clone(server.state()),
            client,
            inner: Arc::clone(&inner),
        };
        drop(ep);
        adapter
    }

    /// The wrapped endpoint
    pub fn inner(&self) -> &SharedEndpoint {
        &self.inner
    }

    /// Underruns (reads) or overruns (writes) on the ring
    pub fn xruns(&self) -> u64 {
        self.xruns
    }

    fn ring_wait<F>(&self, blocked: F) -> bool
    where
        F: FnMut() -> bool,
    {
        self.server.request_round();
        self.server.progress().wait_while(blocked, RING_WAIT)
    }

    /// The error the I/O thread hit on the wrapped endpoint
    fn slot_error(&self) -> EndpointError {
        let message = self
            .client
            .failure()
            .unwrap_or_else(|| "failed on the proxy I/O thread".to_string());
        EndpointError::io(&self.label, std::io::Error::other(message))
    }

    fn count_xrun(&mut self, what: &str) {
        self.xruns += 1;
        self.server.count_xrun();
        log::info!("proxy '{}': {} (total {})", self.label, what, self.xruns);
    }
}

impl AudioEndpoint for ProxiedEndpoint {
    fn label(&self) -> &str {
        &self.label
    }

    fn io_mode(&self) -> IoMode {
        self.io_mode
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn set_buffersize(&mut self, frames: usize, sample_rate: u32) {
        self.buffersize = frames;
        self.engine_rate = sample_rate;
    }

    fn buffersize(&self) -> usize {
        self.buffersize
    }

    fn open(&mut self) -> EndpointResult<()> {
        let mut inner = self.inner.lock();
        if !inner.is_open() {
            inner.open()?;
        }
        self.client.clear_failure();
        self.format = inner.format();
        self.length = inner.length();
        self.position = inner.position();
        self.open = true;
        Ok(())
    }

    /// Marks the adapter closed; the wrapped endpoint belongs to the setup
    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read_buffer(&mut self, buffer: &mut SampleBuffer) -> EndpointResult<()> {
        if !self.open {
            return Err(EndpointError::NotOpen(self.label.clone()));
        }
        let client = Arc::clone(&self.client);
        let ring = client.ring();
        let starved = || ring.used_space() == 0 && !ring.is_drained() && !client.is_failed();
        if starved() {
            self.ring_wait(starved);
        }

        if ring.used_space() == 0 {
            if client.is_failed() {
                return Err(self.slot_error());
            }
            if ring.is_drained() {
                self.finished = true;
                buffer.resize(0);
            } else {
                self.count_xrun("underrun");
                buffer.set_channel_count(self.format.channels);
                buffer.set_sample_rate(self.engine_rate);
                buffer.silence_frames(self.buffersize);
                self.position += self.buffersize as SamplePos;
            }
            return Ok(());
        }

        // SAFETY: the engine thread is the only consumer of read rings and used_space > 0
        buffer.assign(unsafe { ring.consumer_slot() });
        ring.advance_read();
        self.position += buffer.len() as SamplePos;

        if ring.free_space() == ring.capacity() / 2 {
            self.server.request_round();
        }
        if ring.is_drained() {
            self.finished = true;
        }
        Ok(())
    }

    fn write_buffer(&mut self, buffer: &mut SampleBuffer) -> EndpointResult<()> {
        if !self.open {
            return Err(EndpointError::NotOpen(self.label.clone()));
        }
        let client = Arc::clone(&self.client);
        if client.is_failed() {
            return Err(self.slot_error());
        }
        let ring = client.ring();
        if ring.free_space() == 0 {
            self.ring_wait(|| ring.free_space() == 0 && !client.is_failed());
        }
        if client.is_failed() {
            return Err(self.slot_error());
        }

        if ring.free_space() == 0 {
            self.count_xrun("overrun, buffer dropped");
            return Ok(());
        }

        // SAFETY: the engine thread is the only producer of write rings and free_space > 0
        unsafe { ring.producer_slot() }.assign(buffer);
        ring.advance_write();
        self.position += buffer.len() as SamplePos;
        if let Some(length) = self.length {
            if self.position > length {
                self.length = Some(self.position);
            }
        } else {
            self.length = Some(self.position);
        }

        if ring.used_space() == ring.capacity() / 2 {
            self.server.request_round();
        }
        Ok(())
    }

    fn position(&self) -> SamplePos {
        self.position
    }

    /// Seek the wrapped endpoint and drop the ring contents
    ///
    /// Only valid while the proxy server is parked.
    fn seek(&mut self, position: SamplePos) -> EndpointResult<()> {
        if self.server.is_servicing() {
            return Err(EndpointError::Setup {
                label: self.label.clone(),
                reason: "seek while the proxy server is running".to_string(),
            });
        }
        let mut inner = self.inner.lock();
        inner.seek(position)?;
        self.client.ring().reset();
        self.position = inner.position();
        self.length = inner.length();
        self.finished = false;
        Ok(())
    }

    fn length(&self) -> Option<SamplePos> {
        self.length
    }

    fn finished(&self) -> bool {
        match self.io_mode {
            IoMode::Write => self.client.ring().is_finished(),
            _ => self.finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{shared, MemoryEndpoint};

    const FRAMES: usize = 16;

    fn ramp_source(buffers: usize) -> SharedEndpoint {
        let ramp: Vec<f32> = (0..FRAMES * buffers).map(|i| i as f32).collect();
        let mut ep = MemoryEndpoint::source("ramp", vec![ramp.clone(), ramp]);
        ep.set_buffersize(FRAMES, 44100);
        ep.open().unwrap();
        shared(ep)
    }

    #[test]
    fn test_reads_arrive_in_order_until_finished() {
        let server = ProxyServer::new(4, FRAMES, 44100);
        let mut proxied = ProxiedEndpoint::new(ramp_source(10), &server);
        server.start();

        let mut buffer = SampleBuffer::default();
        let mut expected = 0.0f32;
        let mut reads = 0;
        while !proxied.finished() {
            proxied.read_buffer(&mut buffer).unwrap();
            for &s in buffer.channel(0) {
                assert_eq!(s, expected);
                expected += 1.0;
            }
            reads += 1;
            assert!(reads <= 10, "read past the end of the source");
        }
        assert_eq!(reads, 10);
        assert_eq!(proxied.position(), (FRAMES * 10) as SamplePos);
        assert_eq!(proxied.xruns(), 0);
        server.flush();
    }

    #[test]
    fn test_writes_reach_the_sink_after_stop() {
        let server = ProxyServer::new(4, FRAMES, 44100);
        let mut sink = MemoryEndpoint::sink("sink", 2);
        sink.set_buffersize(FRAMES, 44100);
        sink.open().unwrap();
        let capture = sink.capture().unwrap();
        let mut proxied = ProxiedEndpoint::new(shared(sink), &server);
        server.start();

        let mut buffer = SampleBuffer::new(FRAMES, 2, 44100);
        for i in 0..12 {
            for ch in buffer.channels_mut() {
                ch.fill(i as f32);
            }
            proxied.write_buffer(&mut buffer).unwrap();
        }
        server.stop();
        server.wait_for_stop();

        assert_eq!(capture.frames(), FRAMES * 12);
        assert_eq!(capture.snapshot()[1][FRAMES * 11], 11.0);
        assert_eq!(proxied.length(), Some((FRAMES * 12) as SamplePos));
        server.flush();
    }

    #[test]
    fn test_seek_needs_parked_server() {
        let server = ProxyServer::new(4, FRAMES, 44100);
        let mut proxied = ProxiedEndpoint::new(ramp_source(10), &server);
        server.start();
        server.wait_for_full();
        assert!(proxied.seek(0).is_err());

        server.stop();
        server.wait_for_stop();
        proxied.seek((FRAMES * 5) as SamplePos).unwrap();
        assert_eq!(proxied.position(), (FRAMES * 5) as SamplePos);

        server.start();
        let mut buffer = SampleBuffer::default();
        proxied.read_buffer(&mut buffer).unwrap();
        assert_eq!(buffer.channel(0)[0], (FRAMES * 5) as f32);
        server.flush();
    }

    #[test]
    fn test_write_error_surfaces_on_the_next_write() {
        let server = ProxyServer::new(4, FRAMES, 44100);
        let mut sink = MemoryEndpoint::sink("sink", 1);
        sink.set_buffersize(FRAMES, 44100);
        sink.open().unwrap();
        let mut proxied = ProxiedEndpoint::new(shared(sink), &server);
        proxied.inner().lock().close();
        server.start();

        let mut buffer = SampleBuffer::new(FRAMES, 1, 44100);
        proxied.write_buffer(&mut buffer).unwrap();
        server.stop();
        server.wait_for_stop();

        let err = proxied.write_buffer(&mut buffer).unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("sink"));
        assert_eq!(proxied.xruns(), 0);

        // reopening puts the slot back into service
        proxied.close();
        proxied.open().unwrap();
        server.start();
        proxied.write_buffer(&mut buffer).unwrap();
        server.flush();
    }

    #[test]
    fn test_read_error_is_reported_not_end_of_stream() {
        let server = ProxyServer::new(4, FRAMES, 44100);
        let source = ramp_source(10);
        let mut proxied = ProxiedEndpoint::new(Arc::clone(&source), &server);
        source.lock().close();
        server.start();

        let mut buffer = SampleBuffer::default();
        assert!(proxied.read_buffer(&mut buffer).is_err());
        assert!(!proxied.finished());
        server.flush();
    }

    #[test]
    fn test_underrun_without_thread_gives_silence() {
        let server = ProxyServer::new(4, FRAMES, 44100);
        let mut proxied = ProxiedEndpoint::new(ramp_source(10), &server);
        proxied.set_buffersize(FRAMES, 44100);

        let mut buffer = SampleBuffer::default();
        proxied.read_buffer(&mut buffer).unwrap();
        assert_eq!(buffer.len(), FRAMES);
        assert!(buffer.channel(0).iter().all(|&s| s == 0.0));
        assert_eq!(proxied.xruns(), 1);
        assert_eq!(server.xruns(), 1);
    }
}
