//! The proxy I/O thread and its client list

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::ring::ProxyRing;
use crate::endpoint::{IoMode, SharedEndpoint};
use crate::engine::DEFAULT_PROXY_BUFFER_COUNT;
use crate::sched;
use crate::sync::{Notifier, Signal};
use crate::types::{DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE};

/// Upper bound for every `wait_for_*` call
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a parked I/O thread sleeps between flag checks
const PARK_POLL: Duration = Duration::from_millis(100);

/// Rounds without progress before the rings count as full
const IDLE_ROUNDS_FULL: u32 = 2;

/// One registered endpoint and its ring
pub struct ClientSlot {
    endpoint: SharedEndpoint,
    label: String,
    ring: ProxyRing,
    /// Cleared on unregister; the slot stays in the list as a tombstone
    active: AtomicBool,
    /// Set when the endpoint's read or write fails; the slot is no longer serviced
    failed: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl ClientSlot {
    pub fn endpoint(&self) -> &SharedEndpoint {
        &self.endpoint
    }

    pub fn ring(&self) -> &ProxyRing {
        &self.ring
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The endpoint failed on the I/O thread
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Message of the error that failed the slot
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    fn fail(&self, message: String) {
        *self.failure.lock() = Some(message);
        self.failed.store(true, Ordering::Release);
    }

    /// Put a failed slot back into service, keeping its ring
    pub(crate) fn clear_failure(&self) {
        self.failed.store(false, Ordering::Release);
        *self.failure.lock() = None;
    }

    fn is_serviced(&self) -> bool {
        self.is_active() && !self.is_failed()
    }
}

/// State shared between the server handle, its I/O thread and the proxied adapters
pub(crate) struct ServerState {
    clients: RwLock<Vec<Arc<ClientSlot>>>,
    buffer_count: usize,
    buffersize: usize,
    sample_rate: u32,

    /// The I/O thread is servicing rings (not parked)
    servicing: AtomicBool,
    stop_requested: AtomicBool,
    /// Bumped by every stop request; the I/O thread drains once per value
    stop_seq: AtomicU64,
    exit_requested: AtomicBool,
    /// SCHED_FIFO priority for the I/O thread, 0 for none
    sched_priority: AtomicI32,
    /// Ring underruns and overruns seen by the adapters
    xruns: AtomicU64,

    full: Signal,
    stopped: Signal,
    flushed: Signal,
    /// Start/stop/exit requests and consumer demand
    wake: Signal,
    /// Ring pointers moved on the I/O side
    progress: Notifier,
}

impl ServerState {
    pub(crate) fn is_servicing(&self) -> bool {
        self.servicing.load(Ordering::Acquire)
    }

    /// Ask a sleeping I/O thread for another round
    pub(crate) fn request_round(&self) {
        self.wake.raise();
    }

    pub(crate) fn progress(&self) -> &Notifier {
        &self.progress
    }

    pub(crate) fn count_xrun(&self) {
        self.xruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Idle sleep: a tenth of the buffered duration, at least 1 ms
    fn idle_interval(&self) -> Duration {
        let buffered = (self.buffer_count * self.buffersize) as f64 / self.sample_rate.max(1) as f64;
        Duration::from_secs_f64(buffered * 0.1).max(Duration::from_millis(1))
    }
}

/// Double-buffering server for non-realtime endpoints
///
/// Every registered endpoint gets a ring of `buffer_count` sample buffers.
/// A background thread ("proxy-io") keeps read rings filled and write rings
/// drained using ordinary blocking I/O, so the engine thread only ever
/// copies from and to memory that is already there.
///
/// Lifecycle: [`start`](Self::start) spawns (or unparks) the thread,
/// [`stop`](Self::stop) parks it after draining pending writes and
/// [`flush`](Self::flush) drains, resets every ring and ends the thread.
pub struct ProxyServer {
    state: Arc<ServerState>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyServer {
    pub fn new(buffer_count: usize, buffersize: usize, sample_rate: u32) -> Self {
        let state = ServerState {
            clients: RwLock::new(Vec::new()),
            buffer_count: buffer_count.max(2),
            buffersize: buffersize.max(1),
            sample_rate,
            servicing: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop_seq: AtomicU64::new(0),
            exit_requested: AtomicBool::new(false),
            sched_priority: AtomicI32::new(0),
            xruns: AtomicU64::new(0),
            full: Signal::new(),
            stopped: Signal::new(),
            flushed: Signal::new(),
            wake: Signal::new(),
            progress: Notifier::new(),
        };
        Self {
            state: Arc::new(state),
            thread: Mutex::new(None),
        }
    }

    pub fn buffer_count(&self) -> usize {
        self.state.buffer_count
    }

    pub fn buffersize(&self) -> usize {
        self.state.buffersize
    }

    pub fn sample_rate(&self) -> u32 {
        self.state.sample_rate
    }

    /// Priority used for the I/O thread when the caller itself runs SCHED_FIFO
    pub fn set_sched_priority(&self, priority: Option<i32>) {
        self.state
            .sched_priority
            .store(priority.unwrap_or(0).max(0), Ordering::Relaxed);
    }

    pub(crate) fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    // ─────────────────────────────────────────────────────────────
    // Clients
    // ─────────────────────────────────────────────────────────────

    /// Allocate a ring for `endpoint`
    ///
    /// Write-only endpoints get a write ring, everything else a read ring.
    /// Registering the same endpoint twice returns the existing slot.
    pub fn register_client(&self, endpoint: SharedEndpoint) -> Arc<ClientSlot> {
        if let Some(existing) = self.get_client_buffer(&endpoint) {
            return existing;
        }
        let (io_mode, channels, label) = {
            let ep = endpoint.lock();
            let mode = if ep.io_mode() == IoMode::Write {
                IoMode::Write
            } else {
                IoMode::Read
            };
            (mode, ep.channels(), ep.label().to_string())
        };
        let ring = ProxyRing::new(
            self.state.buffer_count,
            self.state.buffersize,
            channels,
            self.state.sample_rate,
            io_mode,
        );
        let slot = Arc::new(ClientSlot {
            endpoint,
            label: label.clone(),
            ring,
            active: AtomicBool::new(true),
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
        });
        self.state.clients.write().push(Arc::clone(&slot));
        log::debug!(
            "proxy: registered '{}' ({} ring, {} x {} frames)",
            label,
            io_mode,
            self.state.buffer_count,
            self.state.buffersize
        );
        slot
    }

    /// Retire the slot of `endpoint`
    ///
    /// The slot stays in the client list as an inactive tombstone until the
    /// server is dropped, so the I/O thread never sees the list shrink.
    pub fn unregister_client(&self, endpoint: &SharedEndpoint) {
        let clients = self.state.clients.read();
        for slot in clients.iter().filter(|s| Arc::ptr_eq(&s.endpoint, endpoint)) {
            slot.active.store(false, Ordering::Release);
        }
    }

    /// Ring slot for a registered, still active endpoint
    pub fn get_client_buffer(&self, endpoint: &SharedEndpoint) -> Option<Arc<ClientSlot>> {
        self.state
            .clients
            .read()
            .iter()
            .find(|s| s.is_active() && Arc::ptr_eq(&s.endpoint, endpoint))
            .cloned()
    }

    /// Labels of active write clients whose endpoint failed
    pub fn failed_outputs(&self) -> Vec<String> {
        self.state
            .clients
            .read()
            .iter()
            .filter(|s| s.is_active() && s.is_failed() && s.ring.io_mode() == IoMode::Write)
            .map(|s| s.label.clone())
            .collect()
    }

    /// Active client count
    pub fn client_count(&self) -> usize {
        self.state.clients.read().iter().filter(|s| s.is_active()).count()
    }

    // ─────────────────────────────────────────────────────────────
    // Thread control
    // ─────────────────────────────────────────────────────────────

    /// Spawn the I/O thread, or unpark it if it already exists
    pub fn start(&self) {
        let state = &self.state;
        state.stop_requested.store(false, Ordering::Release);
        state.exit_requested.store(false, Ordering::Release);
        state.stopped.clear();
        state.flushed.clear();
        state.full.clear();

        let mut thread = self.thread.lock();
        let alive = thread.as_ref().is_some_and(|h| !h.is_finished());
        if !alive {
            if let Some(old) = thread.take() {
                let _ = old.join();
            }
            let want_realtime = sched::caller_is_realtime();
            let remote = Arc::clone(state);
            match thread::Builder::new()
                .name("proxy-io".to_string())
                .spawn(move || io_thread(remote, want_realtime))
            {
                Ok(handle) => {
                    *thread = Some(handle);
                    log::debug!("proxy: I/O thread spawned");
                }
                Err(e) => {
                    log::error!("proxy: failed to spawn I/O thread: {}", e);
                    state.stopped.raise();
                    state.flushed.raise();
                    return;
                }
            }
        }
        state.wake.raise();
    }

    /// Ask the I/O thread to drain pending writes and park
    pub fn stop(&self) {
        if !self.thread_alive() {
            self.state.stopped.raise();
            return;
        }
        self.state.stopped.clear();
        self.state.stop_seq.fetch_add(1, Ordering::AcqRel);
        self.state.stop_requested.store(true, Ordering::Release);
        self.state.wake.raise();
    }

    /// Drain writes, reset every ring and end the I/O thread
    pub fn flush(&self) {
        let handle = self.thread.lock().take();
        let Some(handle) = handle else {
            self.reset_rings();
            return;
        };
        self.state.flushed.clear();
        self.state.exit_requested.store(true, Ordering::Release);
        self.state.wake.raise();
        self.wait_for_flush();
        if handle.join().is_err() {
            log::error!("proxy: I/O thread panicked");
        }
    }

    /// The I/O thread is servicing rings
    pub fn is_running(&self) -> bool {
        self.state.is_servicing()
    }

    /// Every ring was as full as it could get at the last check
    pub fn is_full(&self) -> bool {
        self.state.full.is_raised()
    }

    /// Ring underruns and overruns seen so far
    pub fn xruns(&self) -> u64 {
        self.state.xruns.load(Ordering::Relaxed)
    }

    pub fn wait_for_full(&self) {
        if !self.thread_alive() {
            log::warn!("proxy: wait_for_full without a running I/O thread");
            return;
        }
        Self::wait_for(&self.state.full, "full");
    }

    pub fn wait_for_stop(&self) {
        if !self.thread_alive() {
            return;
        }
        Self::wait_for(&self.state.stopped, "stop");
    }

    pub fn wait_for_flush(&self) {
        Self::wait_for(&self.state.flushed, "flush");
    }

    /// Empty every ring; only while the I/O thread is parked or gone
    pub(crate) fn reset_rings(&self) {
        reset_rings(&self.state);
    }

    fn thread_alive(&self) -> bool {
        self.thread.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    fn wait_for(signal: &Signal, what: &str) {
        if !signal.wait(WAIT_TIMEOUT) {
            log::warn!("proxy: timed out after {:?} waiting for {}", WAIT_TIMEOUT, what);
        }
    }
}

impl Default for ProxyServer {
    fn default() -> Self {
        Self::new(DEFAULT_PROXY_BUFFER_COUNT, DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE)
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        self.flush();
    }
}

// ─────────────────────────────────────────────────────────────
// I/O thread
// ─────────────────────────────────────────────────────────────

fn io_thread(state: Arc<ServerState>, want_realtime: bool) {
    let mut idle_rounds = 0u32;
    let mut realtime = false;
    let mut handled_stop = 0u64;

    loop {
        if state.exit_requested.load(Ordering::Acquire) {
            state.servicing.store(false, Ordering::Release);
            drain_writes(&state);
            reset_rings(&state);
            state.stopped.raise();
            state.flushed.raise();
            state.progress.notify();
            log::debug!("proxy-io: flushed, exiting");
            break;
        }

        if state.stop_requested.load(Ordering::Acquire) {
            // Drain on every stop request, even one that arrives before the first round
            let seq = state.stop_seq.load(Ordering::Acquire);
            if seq != handled_stop {
                state.servicing.store(false, Ordering::Release);
                drain_writes(&state);
                if realtime {
                    sched::set_normal_priority();
                    realtime = false;
                }
                handled_stop = seq;
                log::debug!("proxy-io: parked");
                state.stopped.raise();
                state.progress.notify();
            }
            state.wake.wait(PARK_POLL);
            state.wake.clear();
            continue;
        }

        if !state.servicing.swap(true, Ordering::AcqRel) {
            idle_rounds = 0;
            let priority = state.sched_priority.load(Ordering::Relaxed);
            if want_realtime && priority > 0 && !realtime {
                realtime = sched::set_realtime_priority(priority);
                if !realtime {
                    log::warn!("proxy-io: could not switch to SCHED_FIFO priority {}", priority);
                }
            }
        }

        let (processed, min_free) = service_round(&state);
        if processed > 0 {
            idle_rounds = 0;
            state.progress.notify();
            if min_free >= state.buffer_count / 2 {
                state.full.clear();
            }
        } else {
            idle_rounds = idle_rounds.saturating_add(1);
        }

        if idle_rounds >= IDLE_ROUNDS_FULL {
            state.full.raise();
            state.progress.notify();
            state.wake.wait(state.idle_interval());
            state.wake.clear();
        }
    }

    if realtime {
        sched::set_normal_priority();
    }
}

/// One pass over every client; returns (slots processed, minimum free space)
fn service_round(state: &ServerState) -> (usize, usize) {
    let clients = state.clients.read();
    let mut processed = 0;
    let mut min_free = state.buffer_count;

    for slot in clients.iter().filter(|s| s.is_serviced()) {
        let ring = &slot.ring;
        if ring.is_finished() {
            continue;
        }
        match ring.io_mode() {
            IoMode::Write => {
                if ring.used_space() > 0 {
                    drain_one(slot);
                    processed += 1;
                }
            }
            _ => {
                if ring.free_space() > 0 {
                    fill_one(slot);
                    processed += 1;
                }
            }
        }
        min_free = min_free.min(ring.free_space());
    }
    (processed, min_free)
}

fn fill_one(slot: &ClientSlot) {
    let ring = &slot.ring;
    let mut endpoint = slot.endpoint.lock();
    // SAFETY: the I/O thread is the only producer of read rings and free_space > 0
    let buffer = unsafe { ring.producer_slot() };
    if let Err(e) = endpoint.read_buffer(buffer) {
        log::warn!("proxy-io: read from '{}' failed: {}", slot.label, e);
        drop(endpoint);
        slot.fail(e.to_string());
        return;
    }
    let finished = endpoint.finished();
    drop(endpoint);
    if finished {
        ring.advance_write_last();
    } else {
        ring.advance_write();
    }
}

fn drain_one(slot: &ClientSlot) {
    let ring = &slot.ring;
    let mut endpoint = slot.endpoint.lock();
    // SAFETY: the I/O thread is the only consumer of write rings and used_space > 0
    let buffer = unsafe { ring.consumer_slot() };
    if let Err(e) = endpoint.write_buffer(buffer) {
        log::warn!("proxy-io: write to '{}' failed: {}", slot.label, e);
        drop(endpoint);
        slot.fail(e.to_string());
        return;
    }
    let finished = endpoint.finished();
    drop(endpoint);
    ring.advance_read();
    if finished {
        ring.finish();
    }
}

/// Write out everything pending on write rings
fn drain_writes(state: &ServerState) {
    let clients = state.clients.read();
    for slot in clients
        .iter()
        .filter(|s| s.is_serviced() && s.ring.io_mode() == IoMode::Write)
    {
        while slot.ring.used_space() > 0 && !slot.is_failed() {
            drain_one(slot);
        }
    }
}

fn reset_rings(state: &ServerState) {
    for slot in state.clients.read().iter() {
        slot.ring.reset();
    }
    state.full.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SampleBuffer;
    use crate::endpoint::{shared, AudioEndpoint, MemoryEndpoint};
    use std::time::Instant;

    fn source(frames: usize) -> SharedEndpoint {
        let data = vec![(0..frames).map(|i| i as f32).collect::<Vec<_>>(); 2];
        let mut ep = MemoryEndpoint::source("src", data);
        ep.set_buffersize(16, 44100);
        ep.open().unwrap();
        shared(ep)
    }

    fn sink() -> (SharedEndpoint, crate::endpoint::Capture) {
        let mut ep = MemoryEndpoint::sink("sink", 2);
        ep.set_buffersize(16, 44100);
        ep.open().unwrap();
        let capture = ep.capture().unwrap();
        (shared(ep), capture)
    }

    #[test]
    fn test_register_and_unregister_leaves_tombstone() {
        let server = ProxyServer::new(4, 16, 44100);
        let ep = source(64);
        let slot = server.register_client(Arc::clone(&ep));
        assert_eq!(slot.ring().io_mode(), IoMode::Read);
        assert_eq!(slot.ring().capacity(), 4);
        assert!(server.get_client_buffer(&ep).is_some());

        server.unregister_client(&ep);
        assert!(server.get_client_buffer(&ep).is_none());
        assert_eq!(server.client_count(), 0);
        assert_eq!(server.state.clients.read().len(), 1);
    }

    #[test]
    fn test_register_twice_returns_same_slot() {
        let server = ProxyServer::new(4, 16, 44100);
        let ep = source(64);
        let a = server.register_client(Arc::clone(&ep));
        let b = server.register_client(ep);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_read_ring_never_overfills() {
        let server = ProxyServer::new(4, 16, 44100);
        let ep = source(16 * 100);
        let slot = server.register_client(ep);

        for _ in 0..20 {
            service_round(&server.state);
            assert!(slot.ring().used_space() <= slot.ring().capacity());
        }
        assert_eq!(slot.ring().free_space(), 0);
        assert!(!slot.ring().is_finished());
    }

    #[test]
    fn test_fill_marks_finished_after_last_buffer() {
        let server = ProxyServer::new(8, 16, 44100);
        let slot = server.register_client(source(40));
        for _ in 0..8 {
            service_round(&server.state);
        }
        // 16 + 16 + 8 frames, then end of stream
        assert!(slot.ring().is_finished());
        assert_eq!(slot.ring().used_space(), 3);
    }

    #[test]
    fn test_wait_for_full_on_idle_write_client() {
        let server = ProxyServer::new(4, 16, 44100);
        let (ep, _capture) = sink();
        server.register_client(ep);

        let started = Instant::now();
        server.start();
        server.wait_for_full();
        assert!(started.elapsed() < WAIT_TIMEOUT);
        assert!(server.is_full());
        server.flush();
    }

    #[test]
    fn test_wait_for_full_prefills_read_ring() {
        let server = ProxyServer::new(4, 16, 44100);
        let slot = server.register_client(source(16 * 10));
        server.start();
        server.wait_for_full();
        assert!(server.is_full());
        assert_eq!(slot.ring().free_space(), 0);
        server.flush();
    }

    #[test]
    fn test_stop_drains_write_ring() {
        let server = ProxyServer::new(4, 16, 44100);
        let (ep, capture) = sink();
        let slot = server.register_client(ep);

        for value in [0.25f32, 0.5] {
            let buffer = unsafe { slot.ring().producer_slot() };
            buffer.set_channel_count(2);
            buffer.resize(16);
            for ch in buffer.channels_mut() {
                ch.fill(value);
            }
            slot.ring().advance_write();
        }

        server.start();
        server.stop();
        server.wait_for_stop();
        assert!(!server.is_running());
        assert_eq!(slot.ring().used_space(), 0);
        assert_eq!(capture.frames(), 32);
        let data = capture.snapshot();
        assert_eq!(data[0][0], 0.25);
        assert_eq!(data[1][31], 0.5);
        server.flush();
    }

    #[test]
    fn test_stop_drains_after_a_single_write() {
        let server = ProxyServer::new(4, 16, 44100);
        let (ep, capture) = sink();
        let slot = server.register_client(ep);
        server.start();
        server.wait_for_full();

        for _ in 0..3 {
            let buffer = unsafe { slot.ring().producer_slot() };
            buffer.set_channel_count(2);
            buffer.resize(16);
            slot.ring().advance_write();
            server.stop();
            server.wait_for_stop();
            assert_eq!(slot.ring().used_space(), 0);
            server.start();
        }
        assert_eq!(capture.frames(), 48);
        server.flush();
    }

    #[test]
    fn test_failed_write_stops_servicing_the_slot() {
        let server = ProxyServer::new(4, 16, 44100);
        let (ep, capture) = sink();
        let slot = server.register_client(Arc::clone(&ep));
        ep.lock().close();

        for _ in 0..2 {
            let buffer = unsafe { slot.ring().producer_slot() };
            buffer.set_channel_count(2);
            buffer.resize(16);
            slot.ring().advance_write();
        }
        server.start();
        server.stop();
        server.wait_for_stop();

        assert!(slot.is_failed());
        assert!(slot.failure().is_some());
        assert_eq!(server.failed_outputs(), vec!["sink".to_string()]);
        // the failed buffer and the one behind it stay in the ring
        assert_eq!(slot.ring().used_space(), 2);
        assert_eq!(capture.frames(), 0);
        server.flush();
    }

    #[test]
    fn test_failed_read_is_not_end_of_stream() {
        let server = ProxyServer::new(4, 16, 44100);
        let ep = source(16 * 10);
        let slot = server.register_client(Arc::clone(&ep));
        ep.lock().close();

        service_round(&server.state);
        assert!(slot.is_failed());
        assert!(!slot.ring().is_finished());
        assert_eq!(slot.ring().used_space(), 0);
        // failed read clients are not outputs
        assert!(server.failed_outputs().is_empty());
    }

    #[test]
    fn test_flush_resets_rings_and_allows_restart() {
        let server = ProxyServer::new(4, 16, 44100);
        let slot = server.register_client(source(16 * 10));
        server.start();
        server.wait_for_full();
        server.flush();
        assert_eq!(slot.ring().used_space(), 0);

        server.start();
        server.wait_for_full();
        assert_eq!(slot.ring().used_space(), 4);
        let mut out = SampleBuffer::default();
        out.assign(unsafe { slot.ring().consumer_slot() });
        assert_eq!(out.len(), 16);
    }

    #[test]
    fn test_stop_without_thread_is_immediate() {
        let server = ProxyServer::default();
        let started = Instant::now();
        server.stop();
        server.wait_for_stop();
        server.flush();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
