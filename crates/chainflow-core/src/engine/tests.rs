//! End-to-end engine runs over in-memory, file and null endpoints

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::*;
use crate::buffer::{AudioFormat, SampleBuffer, SampleFormat};
use crate::chain::Chain;
use crate::endpoint::{
    shared, AudioEndpoint, Capabilities, Capture, EndpointError, EndpointResult, IoMode, LoopDevice,
    MemoryEndpoint, RawFileEndpoint, RtNullDevice, ToneGenerator,
};
use crate::operator::Amplify;
use crate::setup::ChainSetup;
use crate::types::{Sample, SamplePos};

const FRAMES: usize = 64;

fn ramp(frames: usize, offset: f32) -> Vec<Sample> {
    (0..frames).map(|i| offset + i as Sample).collect()
}

fn sink(label: &str, channels: usize) -> (MemoryEndpoint, Capture) {
    let ep = MemoryEndpoint::sink(label, channels);
    let capture = ep.capture().unwrap();
    (ep, capture)
}

fn settings() -> EngineSettings {
    EngineSettings::default().with_buffersize(FRAMES)
}

/// One source, one chain, one sink
fn single_chain(buffers: usize, settings: EngineSettings) -> (ChainSetup, Capture) {
    let mut setup = ChainSetup::new("single").with_settings(settings);
    let input = setup.add_input(shared(MemoryEndpoint::source(
        "src",
        vec![ramp(FRAMES * buffers, 0.0), ramp(FRAMES * buffers, 1000.0)],
    )));
    let (out, capture) = sink("out", 2);
    let output = setup.add_output(shared(out));
    let chain = setup.add_chain(Chain::new("c1"));
    setup.connect(chain, input, output).unwrap();
    (setup, capture)
}

#[test]
fn test_file_copy_in_simple_mode() {
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("in.raw");
    let out_path = dir.path().join("out.raw");
    let format = AudioFormat::new(SampleFormat::F32Le, 2, 44100);

    let frames = 512 * 10;
    let mut bytes = Vec::with_capacity(frames * format.frame_size());
    for i in 0..frames * 2 {
        let value = ((i as f32) * 0.001).sin() * 0.8;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    std::fs::write(&in_path, &bytes).unwrap();

    let mut setup = ChainSetup::new("copy").with_settings(
        EngineSettings::default()
            .with_buffersize(512)
            .with_sample_rate(44100)
            .with_mix_mode(MixModeSetting::Simple),
    );
    let input = setup.add_input(shared(RawFileEndpoint::new(&in_path, IoMode::Read, format)));
    let output = setup.add_output(shared(RawFileEndpoint::new(&out_path, IoMode::Write, format)));
    let chain = setup.add_chain(Chain::new("copy"));
    setup.connect(chain, input, output).unwrap();

    let (mut engine, controller) = Engine::new(setup).unwrap();
    assert_eq!(engine.mix_mode(), MixMode::Simple);
    assert_eq!(controller.status(), EngineStatus::NotReady);

    assert_eq!(engine.exec().unwrap(), EngineStatus::Finished);
    assert_eq!(controller.iterations(), 10);
    assert_eq!(controller.position(), frames as SamplePos);
    drop(engine);

    assert_eq!(std::fs::read(&out_path).unwrap(), bytes);
}

#[test]
fn test_finishes_after_exactly_the_last_read() {
    for double_buffering in [true, false] {
        let (setup, capture) = single_chain(7, settings().with_double_buffering(double_buffering));
        let (mut engine, controller) = Engine::new(setup).unwrap();
        assert_eq!(engine.is_double_buffered(), double_buffering);

        assert_eq!(engine.exec().unwrap(), EngineStatus::Finished);
        assert_eq!(controller.iterations(), 7);
        assert_eq!(capture.frames(), FRAMES * 7);
        assert_eq!(controller.xruns(), 0);
    }
}

#[test]
fn test_shared_input_feeds_separate_outputs() {
    let mut setup = ChainSetup::new("split").with_settings(settings());
    let data = vec![ramp(FRAMES * 4, 0.0), ramp(FRAMES * 4, 500.0)];
    let input = setup.add_input(shared(MemoryEndpoint::source("src", data.clone())));
    let (a, capture_a) = sink("a", 2);
    let (b, capture_b) = sink("b", 2);
    let out_a = setup.add_output(shared(a));
    let out_b = setup.add_output(shared(b));
    let c1 = setup.add_chain(Chain::new("c1"));
    let c2 = setup.add_chain(Chain::new("c2"));
    setup.connect(c1, input, out_a).unwrap();
    setup.connect(c2, input, out_b).unwrap();

    let (mut engine, _controller) = Engine::new(setup).unwrap();
    assert_eq!(engine.mix_mode(), MixMode::Normal);
    assert_eq!(engine.exec().unwrap(), EngineStatus::Finished);

    assert_eq!(capture_a.snapshot(), data);
    assert_eq!(capture_b.snapshot(), data);
}

#[test]
fn test_two_chains_mixed_into_one_output() {
    let mut setup = ChainSetup::new("mix").with_settings(settings());
    let length = (FRAMES * 5) as SamplePos;
    let t1 = setup.add_input(shared(ToneGenerator::constant("t1", 0.5, 1).with_duration(length)));
    let t2 = setup.add_input(shared(ToneGenerator::constant("t2", 0.5, 1).with_duration(length)));
    let (out, capture) = sink("out", 1);
    let output = setup.add_output(shared(out));
    let c1 = setup.add_chain(Chain::new("c1"));
    let c2 = setup.add_chain(Chain::new("c2"));
    setup.connect(c1, t1, output).unwrap();
    setup.connect(c2, t2, output).unwrap();

    let (mut engine, _controller) = Engine::new(setup).unwrap();
    assert_eq!(engine.exec().unwrap(), EngineStatus::Finished);

    let data = capture.snapshot();
    assert_eq!(data[0].len(), FRAMES * 5);
    assert!(data[0].iter().all(|&s| (s - 0.5).abs() < 1e-6));
}

#[test]
fn test_loop_mixes_every_output_slot_feeding_it() {
    let mut setup = ChainSetup::new("bus").with_settings(settings());
    let length = (FRAMES * 5) as SamplePos;
    let t1 = setup.add_input(shared(ToneGenerator::constant("t1", 0.5, 1).with_duration(length)));
    let t2 = setup.add_input(shared(ToneGenerator::constant("t2", 0.5, 1).with_duration(length)));
    let bus = shared(LoopDevice::new("bus", 1));
    let bus_in = setup.add_input(Arc::clone(&bus));
    let bus_out1 = setup.add_output(Arc::clone(&bus));
    let bus_out2 = setup.add_output(bus);
    let (out, capture) = sink("out", 1);
    let output = setup.add_output(shared(out));
    let c1 = setup.add_chain(Chain::new("c1"));
    let c2 = setup.add_chain(Chain::new("c2"));
    let c3 = setup.add_chain(Chain::new("c3"));
    setup.connect(c1, t1, bus_out1).unwrap();
    setup.connect(c2, t2, bus_out2).unwrap();
    setup.connect(c3, bus_in, output).unwrap();

    let (mut engine, _controller) = Engine::new(setup).unwrap();
    assert_eq!(engine.exec().unwrap(), EngineStatus::Finished);

    // one iteration behind, then the two tones mixed at their own level
    let data = capture.snapshot();
    assert_eq!(data[0].len(), FRAMES * 5);
    assert!(data[0][..FRAMES].iter().all(|&s| s == 0.0));
    assert!(data[0][FRAMES..].iter().all(|&s| (s - 0.5).abs() < 1e-6));
}

#[test]
fn test_processing_length_truncates_last_buffer() {
    let length_frames = FRAMES * 2 + FRAMES / 2;
    let seconds = length_frames as f64 / 44100.0;
    let (setup, capture) = single_chain(10, settings().with_processing_length(Some(seconds)));
    let (mut engine, controller) = Engine::new(setup).unwrap();

    assert_eq!(engine.exec().unwrap(), EngineStatus::Finished);
    assert_eq!(controller.iterations(), 3);
    assert_eq!(capture.frames(), length_frames);
    assert_eq!(controller.position(), length_frames as SamplePos);
}

#[test]
fn test_looping_restarts_from_the_beginning() {
    let mut setup = ChainSetup::new("loop").with_settings(settings().with_looping(true).with_double_buffering(false));
    let input = setup.add_input(shared(MemoryEndpoint::source("src", vec![ramp(FRAMES * 2, 0.0)])));
    let output = setup.add_output(shared(RtNullDevice::new("rt", IoMode::Write, 1)));
    let chain = setup.add_chain(Chain::new("c"));
    setup.connect(chain, input, output).unwrap();

    let (mut engine, mut controller) = Engine::new(setup).unwrap();
    let atomics = engine.atomics();
    let handle = thread::spawn(move || engine.exec());

    // two buffers per lap; well past the first lap the engine still runs
    while atomics.iterations() < 6 {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(controller.position() <= (FRAMES * 2) as SamplePos);

    controller.send(EngineCommand::Exit);
    assert_eq!(handle.join().unwrap().unwrap(), EngineStatus::Stopped);
}

#[test]
fn test_mute_and_parameter_commands() {
    let mut setup = ChainSetup::new("cmds").with_settings(settings());
    let input = setup.add_input(shared(MemoryEndpoint::source("src", vec![vec![1.0; FRAMES * 3]])));
    let (out, capture) = sink("out", 1);
    let output = setup.add_output(shared(out));
    let mut chain = Chain::new("c");
    chain.add_operator(Box::new(Amplify::new(100.0)));
    let chain = setup.add_chain(chain);
    setup.connect(chain, input, output).unwrap();

    let (mut engine, mut controller) = Engine::new(setup).unwrap();
    controller.send(EngineCommand::SelectChain(1));
    controller.send(EngineCommand::SelectOperator(1));
    controller.send(EngineCommand::SelectParameter(1));
    controller.send(EngineCommand::SetParameter(50.0));

    assert_eq!(engine.exec().unwrap(), EngineStatus::Finished);
    assert!(capture.snapshot()[0].iter().all(|&s| (s - 0.5).abs() < 1e-6));

    engine.reset();
    assert_eq!(engine.status(), EngineStatus::NotReady);
    capture.clear();
    controller.send(EngineCommand::ChainMute);
    assert_eq!(engine.exec().unwrap(), EngineStatus::Finished);
    assert_eq!(capture.frames(), FRAMES * 3);
    assert!(capture.snapshot()[0].iter().all(|&s| s == 0.0));
}

#[test]
fn test_set_position_before_start() {
    let (setup, capture) = single_chain(6, settings());
    let (mut engine, mut controller) = Engine::new(setup).unwrap();
    let seconds = (FRAMES * 2) as f64 / 44100.0;
    controller.send(EngineCommand::SetPosition(seconds));

    assert_eq!(engine.exec().unwrap(), EngineStatus::Finished);
    assert_eq!(controller.iterations(), 4);
    let data = capture.snapshot();
    assert_eq!(data[0].len(), FRAMES * 6);
    assert_eq!(data[0][FRAMES * 2], (FRAMES * 2) as Sample);
    assert_eq!(data[0][FRAMES * 6 - 1], (FRAMES * 6 - 1) as Sample);
}

#[test]
fn test_interactive_run_waits_for_start_and_exit() {
    let (setup, capture) = single_chain(4, settings());
    let (mut engine, mut controller) = Engine::new(setup).unwrap();
    let handle = thread::spawn(move || engine.exec_interactive());

    thread::sleep(Duration::from_millis(20));
    assert_eq!(controller.status(), EngineStatus::NotReady);
    assert_eq!(capture.frames(), 0);

    controller.send(EngineCommand::Start);
    let mut waited = 0;
    while controller.status() != EngineStatus::Finished && waited < 500 {
        thread::sleep(Duration::from_millis(10));
        waited += 1;
    }
    assert_eq!(controller.status(), EngineStatus::Finished);

    controller.send(EngineCommand::Exit);
    assert_eq!(handle.join().unwrap().unwrap(), EngineStatus::Finished);
    assert_eq!(capture.frames(), FRAMES * 4);
}

#[test]
fn test_configuration_errors_refuse_to_start() {
    let setup = ChainSetup::new("empty");
    assert!(matches!(Engine::new(setup), Err(EngineError::NoChains)));

    let mut setup = ChainSetup::new("dangling");
    setup.add_input(shared(MemoryEndpoint::source("src", vec![vec![0.0; 8]])));
    setup.add_output(shared(MemoryEndpoint::sink("out", 1)));
    setup.add_chain(Chain::new("unbound"));
    assert!(matches!(Engine::new(setup), Err(EngineError::InvalidChain(_))));
}

/// Writable endpoint whose writes fail after `good` buffers
///
/// Only seekable sinks get proxied when double buffering is on.
struct FailingSink {
    good: usize,
    written: usize,
    open: bool,
    frames: usize,
    seekable: bool,
}

impl FailingSink {
    fn new(good: usize, seekable: bool) -> Self {
        Self {
            good,
            written: 0,
            open: false,
            frames: 0,
            seekable,
        }
    }
}

impl AudioEndpoint for FailingSink {
    fn label(&self) -> &str {
        "failing"
    }

    fn io_mode(&self) -> IoMode {
        IoMode::Write
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            readable: false,
            writable: true,
            realtime: false,
            seekable: self.seekable,
        }
    }

    fn format(&self) -> AudioFormat {
        AudioFormat::new(SampleFormat::F32Le, 1, 44100)
    }

    fn set_buffersize(&mut self, frames: usize, _sample_rate: u32) {
        self.frames = frames;
    }

    fn buffersize(&self) -> usize {
        self.frames
    }

    fn open(&mut self) -> EndpointResult<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read_buffer(&mut self, _buffer: &mut SampleBuffer) -> EndpointResult<()> {
        Err(EndpointError::NotOpen("failing".to_string()))
    }

    fn write_buffer(&mut self, _buffer: &mut SampleBuffer) -> EndpointResult<()> {
        if self.written == self.good {
            return Err(EndpointError::io("failing", std::io::Error::other("disk full")));
        }
        self.written += 1;
        Ok(())
    }

    fn position(&self) -> SamplePos {
        (self.written * self.frames) as SamplePos
    }

    fn seek(&mut self, position: SamplePos) -> EndpointResult<()> {
        if !self.seekable {
            return Err(EndpointError::NotSeekable("failing".to_string()));
        }
        self.written = position.max(0) as usize / self.frames.max(1);
        Ok(())
    }

    fn finished(&self) -> bool {
        false
    }
}

/// One source feeding a failing sink and a healthy one on separate chains
fn run_with_failing_sink(seekable: bool, double_buffering: bool) {
    let mut setup =
        ChainSetup::new("failing").with_settings(settings().with_double_buffering(double_buffering));
    let input = setup.add_input(shared(MemoryEndpoint::source("src", vec![vec![0.25; FRAMES * 5]])));
    let failing = setup.add_output(shared(FailingSink::new(2, seekable)));
    let (good, capture) = sink("good", 1);
    let good = setup.add_output(shared(good));
    let c1 = setup.add_chain(Chain::new("c1"));
    let c2 = setup.add_chain(Chain::new("c2"));
    setup.connect(c1, input, failing).unwrap();
    setup.connect(c2, input, good).unwrap();

    let (mut engine, controller) = Engine::new(setup).unwrap();
    match engine.exec() {
        Err(EngineError::OutputsFailed(labels)) => assert_eq!(labels, vec!["failing".to_string()]),
        other => panic!("expected OutputsFailed, got {:?}", other.map_err(|e| e.to_string())),
    }
    assert_eq!(controller.status(), EngineStatus::Error);
    // the healthy output kept running to the end of the input
    assert_eq!(capture.frames(), FRAMES * 5);
    assert_eq!(engine.failed_outputs(), ["failing".to_string()]);
}

#[test]
fn test_failed_output_is_closed_and_reported() {
    run_with_failing_sink(false, true);
}

#[test]
fn test_failed_proxied_output_is_reported() {
    run_with_failing_sink(true, true);
}

#[test]
fn test_failed_seekable_output_without_double_buffering() {
    run_with_failing_sink(true, false);
}

#[test]
fn test_realtime_outputs_start_after_two_iterations() {
    let mut setup = ChainSetup::new("rt").with_settings(settings().with_double_buffering(false));
    let input = setup.add_input(shared(MemoryEndpoint::source("src", vec![vec![0.0; FRAMES * 4]])));
    let device = RtNullDevice::new("rt-out", IoMode::Write, 1);
    let stats = device.stats();
    let output = setup.add_output(shared(device));
    let chain = setup.add_chain(Chain::new("c"));
    setup.connect(chain, input, output).unwrap();

    let (mut engine, _controller) = Engine::new(setup).unwrap();
    assert_eq!(engine.exec().unwrap(), EngineStatus::Finished);
    assert_eq!(stats.writes_before_start.load(Ordering::Relaxed), 2);
    assert_eq!(stats.stops.load(Ordering::Relaxed), 1);
}

#[test]
fn test_multitrack_detected_and_run() {
    let mut setup = ChainSetup::new("multitrack").with_settings(
        settings()
            .with_double_buffering(false)
            .with_processing_length(Some((FRAMES * 6) as f64 / 44100.0)),
    );
    let rt_in = setup.add_input(shared(RtNullDevice::new("rt-in", IoMode::Read, 1)));
    let file_in = setup.add_input(shared(MemoryEndpoint::source("track", vec![vec![0.5; FRAMES * 20]])));
    let rt_out_device = RtNullDevice::new("rt-out", IoMode::Write, 1);
    let rt_stats = rt_out_device.stats();
    let rt_out = setup.add_output(shared(rt_out_device));
    let (record, capture) = sink("record", 1);
    let record = setup.add_output(shared(record));
    let play = setup.add_chain(Chain::new("play"));
    let rec = setup.add_chain(Chain::new("rec"));
    setup.connect(play, file_in, rt_out).unwrap();
    setup.connect(rec, rt_in, record).unwrap();

    let (mut engine, controller) = Engine::new(setup).unwrap();
    assert!(engine.is_multitrack());
    assert_eq!(engine.exec().unwrap(), EngineStatus::Finished);
    assert_eq!(controller.iterations(), 6);

    // sync passes fed the device before it was started; the recording is a slave
    assert_eq!(rt_stats.writes_before_start.load(Ordering::Relaxed), 2);
    assert!(capture.frames() >= FRAMES * 6);
}

#[test]
fn test_forced_multitrack_without_devices_is_ignored() {
    let (setup, _capture) = single_chain(2, settings().with_multitrack(Some(true)));
    let (engine, _controller) = Engine::new(setup).unwrap();
    assert!(!engine.is_multitrack());
}

#[test]
fn test_file_endpoints_are_proxied() {
    let (setup, _capture) = single_chain(2, settings());
    let (engine, _controller) = Engine::new(setup).unwrap();
    let server = engine.proxy_server().unwrap();
    assert_eq!(server.client_count(), 2);
    assert_eq!(server.buffersize(), FRAMES);
}
