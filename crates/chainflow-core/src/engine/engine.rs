//! The engine - iteration loop, mixing, transport and multitrack start

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::buffer::SampleBuffer;
use crate::chain::Chain;
use crate::endpoint::{shared, AudioEndpoint, EndpointError, IoMode, SharedEndpoint};
use crate::proxy::{ProxiedEndpoint, ProxyServer};
use crate::sched;
use crate::setup::ChainSetup;
use crate::types::{seconds_to_frames, Sample, SamplePos};

use super::{
    command_channel, EngineAtomics, EngineCommand, EngineController, EngineError, EngineResult,
    EngineSettings, EngineStatus, MixModeSetting,
};

/// Sleep between command polls while not running interactively
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Iterations after start before realtime outputs are started
const OUTPUT_TRIGGER_ITERATIONS: u32 = 2;

/// Mixing strategy in effect for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixMode {
    /// One chain, one input, one output; no mixing
    Simple,
    /// General N inputs to M outputs
    Normal,
}

impl fmt::Display for MixMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixMode::Simple => f.write_str("simple"),
            MixMode::Normal => f.write_str("normal"),
        }
    }
}

/// The processing engine
///
/// Owns a [`ChainSetup`] for the duration of a run. Every iteration it
/// drains the command queue, reads one buffer from each input into the
/// chains attached to it, runs the chains and mixes their buffers into the
/// outputs. Non-realtime seekable endpoints are served through a
/// [`ProxyServer`] when double buffering is enabled, so the loop only
/// touches memory for them.
///
/// The engine runs on whatever thread calls [`exec`](Self::exec) or
/// [`exec_interactive`](Self::exec_interactive); other threads talk to it
/// through the [`EngineController`] returned by [`new`](Self::new).
pub struct Engine {
    setup: ChainSetup,
    settings: EngineSettings,
    atomics: Arc<EngineAtomics>,
    commands: rtrb::Consumer<EngineCommand>,
    pserver: Option<ProxyServer>,

    /// Inputs and outputs as the loop sees them (proxied or direct)
    inputs: Vec<SharedEndpoint>,
    outputs: Vec<SharedEndpoint>,
    realtime_inputs: Vec<usize>,
    realtime_outputs: Vec<usize>,
    nonrealtime_inputs: Vec<usize>,
    nonrealtime_outputs: Vec<usize>,
    input_chain_count: Vec<usize>,
    output_chain_count: Vec<usize>,
    input_start: Vec<SamplePos>,
    output_start: Vec<SamplePos>,
    /// Non-realtime outputs fed only from realtime inputs
    slave_outputs: Vec<bool>,

    chain_buffers: Vec<SampleBuffer>,
    mix_buffer: SampleBuffer,
    max_channels: usize,
    mix_mode: MixMode,
    multitrack: bool,

    selected_chain: usize,
    position: SamplePos,
    processing_length: Option<SamplePos>,
    input_not_finished: bool,
    trigger_outputs: bool,
    trigger_counter: u32,
    rt_running: bool,
    needs_prefill: bool,
    exit_requested: bool,
    raised_priority: bool,
    failed_outputs: Vec<String>,
    proxy_xruns_seen: u64,
}

impl Engine {
    /// Enable `setup` and prepare a run
    ///
    /// Fails with the configuration error if the setup can't run (no
    /// chains, inputs or outputs, unbound chains, endpoints that fail to open).
    pub fn new(mut setup: ChainSetup) -> EngineResult<(Self, EngineController)> {
        setup.enable()?;
        let settings = setup.settings().clone();
        let atomics = Arc::new(EngineAtomics::new());
        let (producer, consumer) = command_channel();

        let mut engine = Self {
            setup,
            settings,
            atomics: Arc::clone(&atomics),
            commands: consumer,
            pserver: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            realtime_inputs: Vec::new(),
            realtime_outputs: Vec::new(),
            nonrealtime_inputs: Vec::new(),
            nonrealtime_outputs: Vec::new(),
            input_chain_count: Vec::new(),
            output_chain_count: Vec::new(),
            input_start: Vec::new(),
            output_start: Vec::new(),
            slave_outputs: Vec::new(),
            chain_buffers: Vec::new(),
            mix_buffer: SampleBuffer::default(),
            max_channels: 0,
            mix_mode: MixMode::Normal,
            multitrack: false,
            selected_chain: 0,
            position: 0,
            processing_length: None,
            input_not_finished: true,
            trigger_outputs: false,
            trigger_counter: 0,
            rt_running: false,
            needs_prefill: true,
            exit_requested: false,
            raised_priority: false,
            failed_outputs: Vec::new(),
            proxy_xruns_seen: 0,
        };
        engine.init();

        let controller = EngineController::new(producer, atomics, engine.settings.sample_rate);
        Ok((engine, controller))
    }

    // ─────────────────────────────────────────────────────────────
    // Initialization
    // ─────────────────────────────────────────────────────────────

    fn init(&mut self) {
        self.init_sorted_endpoints();
        self.init_servers();
        self.init_inputs();
        self.init_outputs();
        self.init_buffers();
        self.init_multitrack_mode();
        self.init_mix_mode();
        self.init_chains();
        self.atomics.set_status(EngineStatus::NotReady);

        log::info!(
            "engine: setup '{}' ready ({} chains, {} inputs, {} outputs, mix mode {}, {}double buffered{})",
            self.setup.name(),
            self.setup.chains().len(),
            self.inputs.len(),
            self.outputs.len(),
            self.mix_mode,
            if self.pserver.is_some() { "" } else { "not " },
            if self.multitrack { ", multitrack" } else { "" }
        );
    }

    fn init_sorted_endpoints(&mut self) {
        for (i, ep) in self.setup.inputs().iter().enumerate() {
            if ep.lock().is_realtime() {
                self.realtime_inputs.push(i);
            } else {
                self.nonrealtime_inputs.push(i);
            }
        }
        for (o, ep) in self.setup.outputs().iter().enumerate() {
            if ep.lock().is_realtime() {
                self.realtime_outputs.push(o);
            } else {
                self.nonrealtime_outputs.push(o);
            }
        }
    }

    /// Wrap proxyable endpoints when double buffering is on
    fn init_servers(&mut self) {
        let wants_proxy = self.settings.double_buffering
            && self
                .setup
                .inputs()
                .iter()
                .chain(self.setup.outputs().iter())
                .any(is_proxyable);
        if wants_proxy {
            let server = ProxyServer::new(
                self.settings.proxy_buffer_count,
                self.settings.buffersize,
                self.settings.sample_rate,
            );
            server.set_sched_priority(self.settings.sched_priority.map(|p| (p - 1).max(1)));
            self.pserver = Some(server);
        }

        let server = self.pserver.as_ref();
        let wrap = |ep: &SharedEndpoint| -> SharedEndpoint {
            match server {
                Some(server) if is_proxyable(ep) => shared(ProxiedEndpoint::new(Arc::clone(ep), server)),
                _ => Arc::clone(ep),
            }
        };
        self.inputs = self.setup.inputs().iter().map(&wrap).collect();
        self.outputs = self.setup.outputs().iter().map(&wrap).collect();
    }

    fn init_inputs(&mut self) {
        let (frames, rate) = (self.settings.buffersize, self.settings.sample_rate);
        let mut max_length: SamplePos = 0;
        for (i, ep) in self.inputs.iter().enumerate() {
            let mut ep = ep.lock();
            ep.set_buffersize(frames, rate);
            self.max_channels = self.max_channels.max(ep.channels());
            self.input_start.push(ep.position());
            self.input_chain_count.push(self.setup.chains_on_input(i));
            max_length = max_length.max(ep.length().unwrap_or(0));
            log::debug!(
                "engine: input '{}' starts at {}, {} chain(s) attached",
                ep.label(),
                ep.position(),
                self.input_chain_count[i]
            );
        }

        self.processing_length = match self.settings.processing_length {
            Some(seconds) if seconds > 0.0 => Some(seconds_to_frames(seconds, rate)),
            _ if self.settings.looping && max_length > 0 => Some(max_length),
            _ => None,
        };
    }

    fn init_outputs(&mut self) {
        let (frames, rate) = (self.settings.buffersize, self.settings.sample_rate);
        for (o, ep) in self.outputs.iter().enumerate() {
            let mut ep = ep.lock();
            ep.set_buffersize(frames, rate);
            self.max_channels = self.max_channels.max(ep.channels());
            self.output_start.push(ep.position());
            self.output_chain_count.push(self.setup.chains_on_output(o));
            log::debug!(
                "engine: output '{}' starts at {}, {} chain(s) attached",
                ep.label(),
                ep.position(),
                self.output_chain_count[o]
            );
        }

        let chains = self.setup.chains();
        self.slave_outputs = (0..self.outputs.len())
            .map(|o| {
                let feeders: Vec<&Chain> = chains.iter().filter(|c| c.output() == Some(o)).collect();
                self.nonrealtime_outputs.contains(&o)
                    && !feeders.is_empty()
                    && feeders.iter().all(|c| {
                        c.input()
                            .is_some_and(|i| self.realtime_inputs.contains(&i))
                    })
            })
            .collect();
    }

    fn init_buffers(&mut self) {
        let (frames, rate) = (self.settings.buffersize, self.settings.sample_rate);
        self.max_channels = self.max_channels.max(1);
        self.chain_buffers = (0..self.setup.chains().len())
            .map(|_| SampleBuffer::new(frames, self.max_channels, rate))
            .collect();
        self.mix_buffer = SampleBuffer::new(frames, self.max_channels, rate);
    }

    fn init_multitrack_mode(&mut self) {
        let detected = !self.realtime_inputs.is_empty()
            && !self.realtime_outputs.is_empty()
            && !self.nonrealtime_inputs.is_empty()
            && !self.nonrealtime_outputs.is_empty()
            && self.setup.chains().len() > 1;
        self.multitrack = match self.settings.multitrack {
            Some(true) if self.realtime_inputs.is_empty() || self.realtime_outputs.is_empty() => {
                log::warn!("engine: multitrack mode needs realtime inputs and outputs, disabled");
                false
            }
            Some(forced) => forced,
            None => detected,
        };
    }

    fn init_mix_mode(&mut self) {
        let qualifies = self.setup.chains().len() == 1 && self.inputs.len() == 1 && self.outputs.len() == 1;
        self.mix_mode = match self.settings.mix_mode {
            _ if self.multitrack => MixMode::Normal,
            MixModeSetting::Auto if qualifies => MixMode::Simple,
            MixModeSetting::Auto => MixMode::Normal,
            MixModeSetting::Simple if !qualifies => {
                log::warn!("engine: setup too complex for simple mix mode, using normal");
                MixMode::Normal
            }
            MixModeSetting::Simple => MixMode::Simple,
            MixModeSetting::Normal => MixMode::Normal,
        };
    }

    fn init_chains(&mut self) {
        let chains = self.setup.chains_mut();
        for (c, chain) in chains.iter_mut().enumerate() {
            let in_channels = chain
                .input()
                .and_then(|i| self.inputs.get(i))
                .map_or(0, |ep| ep.lock().channels());
            let out_channels = chain
                .output()
                .and_then(|o| self.outputs.get(o))
                .map_or(0, |ep| ep.lock().channels());
            chain.init(&mut self.chain_buffers[c], in_channels, out_channels);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────

    pub fn status(&self) -> EngineStatus {
        self.atomics.status()
    }

    pub fn atomics(&self) -> Arc<EngineAtomics> {
        Arc::clone(&self.atomics)
    }

    pub fn setup(&self) -> &ChainSetup {
        &self.setup
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn mix_mode(&self) -> MixMode {
        self.mix_mode
    }

    pub fn is_multitrack(&self) -> bool {
        self.multitrack
    }

    pub fn is_double_buffered(&self) -> bool {
        self.pserver.is_some()
    }

    pub fn proxy_server(&self) -> Option<&ProxyServer> {
        self.pserver.as_ref()
    }

    /// Global position in frames
    pub fn position(&self) -> SamplePos {
        self.position
    }

    /// Selected chain (0-based)
    pub fn selected_chain(&self) -> usize {
        self.selected_chain
    }

    /// Labels of outputs closed after errors during the run
    pub fn failed_outputs(&self) -> &[String] {
        &self.failed_outputs
    }

    // ─────────────────────────────────────────────────────────────
    // Run modes
    // ─────────────────────────────────────────────────────────────

    /// Batch run: start, iterate until the engine leaves `Running`
    pub fn exec(&mut self) -> EngineResult<EngineStatus> {
        self.exit_requested = false;
        if let Err(e) = self.start() {
            return Err(self.fail(e));
        }
        loop {
            if let Err(e) = self.interpret_queue() {
                return Err(self.fail(e));
            }
            if self.exit_requested || self.status() != EngineStatus::Running {
                break;
            }
            self.iteration();
        }
        self.finish_run()
    }

    /// Interactive run: wait for commands, iterate while running, until `Exit`
    pub fn exec_interactive(&mut self) -> EngineResult<EngineStatus> {
        self.exit_requested = false;
        loop {
            if let Err(e) = self.interpret_queue() {
                return Err(self.fail(e));
            }
            if self.exit_requested {
                break;
            }
            if self.status() == EngineStatus::Running {
                self.iteration();
            } else {
                thread::sleep(IDLE_POLL);
            }
        }
        self.finish_run()
    }

    /// Rewind everything to the start positions so the engine can run again
    pub fn reset(&mut self) {
        self.stop();
        for (i, ep) in self.inputs.iter().enumerate() {
            reopen_and_seek(ep, self.input_start[i]);
        }
        for (o, ep) in self.outputs.iter().enumerate() {
            reopen_and_seek(ep, self.output_start[o]);
        }
        for chain in self.setup.chains_mut() {
            chain.reset_controllers();
        }
        self.init_chains();

        self.position = 0;
        self.input_not_finished = true;
        self.trigger_outputs = false;
        self.trigger_counter = 0;
        self.needs_prefill = true;
        self.exit_requested = false;
        self.failed_outputs.clear();
        self.atomics.reset();
        log::info!("engine: reset");
    }

    fn finish_run(&mut self) -> EngineResult<EngineStatus> {
        self.stop();
        if !self.failed_outputs.is_empty() {
            self.atomics.set_status(EngineStatus::Error);
            log::warn!("engine: outputs failed during the run: {}", self.failed_outputs.join(", "));
            return Err(EngineError::OutputsFailed(self.failed_outputs.clone()));
        }
        let status = self.status();
        log::info!(
            "engine: run ended, status {}, {} iterations, {} xruns",
            status,
            self.atomics.iterations(),
            self.atomics.xruns()
        );
        Ok(status)
    }

    fn fail(&mut self, err: EngineError) -> EngineError {
        log::error!("engine: {}", err);
        self.stop();
        self.atomics.set_status(EngineStatus::Error);
        err
    }

    // ─────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────

    fn interpret_queue(&mut self) -> EngineResult<()> {
        while let Ok(command) = self.commands.pop() {
            log::debug!("engine: command {:?}", command);
            match command {
                EngineCommand::Exit => {
                    while self.commands.pop().is_ok() {}
                    self.stop();
                    self.exit_requested = true;
                    return Ok(());
                }
                EngineCommand::Start => self.start()?,
                EngineCommand::Stop => self.stop(),

                EngineCommand::SelectChain(n) => {
                    if n >= 1 && n <= self.setup.chains().len() {
                        self.selected_chain = n - 1;
                    } else {
                        log::warn!("engine: no chain {}", n);
                    }
                }
                EngineCommand::ChainMute => {
                    if let Some(chain) = self.selected_chain_mut() {
                        chain.toggle_muting();
                    }
                }
                EngineCommand::ChainBypass => {
                    if let Some(chain) = self.selected_chain_mut() {
                        chain.toggle_processing();
                    }
                }
                EngineCommand::ChainRewind(s) => self.change_position_chain(-s),
                EngineCommand::ChainForward(s) => self.change_position_chain(s),
                EngineCommand::ChainSetPosition(s) => self.set_position_chain(s),

                EngineCommand::SelectOperator(n) => {
                    let selected = self.selected_chain_mut().is_some_and(|c| c.select_operator(n));
                    if !selected {
                        log::warn!("engine: no operator {} on the selected chain", n);
                    }
                }
                EngineCommand::SelectParameter(n) => {
                    let selected = self.selected_chain_mut().is_some_and(|c| c.select_parameter(n));
                    if !selected {
                        log::warn!("engine: no parameter {} on the selected operator", n);
                    }
                }
                EngineCommand::SetParameter(value) => {
                    let set = self.selected_chain_mut().is_some_and(|c| c.set_parameter(value));
                    if !set {
                        log::warn!("engine: no operator parameter selected");
                    }
                }

                EngineCommand::Rewind(s) => self.change_position(-s),
                EngineCommand::Forward(s) => self.change_position(s),
                EngineCommand::SetPosition(s) => self.set_position(s),
            }
        }
        Ok(())
    }

    fn selected_chain_mut(&mut self) -> Option<&mut Chain> {
        self.setup.chains_mut().get_mut(self.selected_chain)
    }

    // ─────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────

    fn start(&mut self) -> EngineResult<()> {
        match self.status() {
            EngineStatus::Running => return Ok(()),
            status if status.is_terminal() => {
                log::info!("engine: start ignored while {}, reset first", status);
                return Ok(());
            }
            _ => {}
        }
        log::debug!("engine: start");

        if let Some(priority) = self.settings.sched_priority {
            self.raised_priority = sched::set_realtime_priority(priority);
            if !self.raised_priority {
                log::warn!("engine: could not switch to SCHED_FIFO priority {}", priority);
            }
        }

        self.start_servers();

        let ignore_xruns = self.settings.ignore_xruns;
        for &i in &self.realtime_inputs {
            device_call(&self.inputs[i], ignore_xruns, &self.atomics, |ep| ep.prepare());
        }
        for &o in &self.realtime_outputs {
            device_call(&self.outputs[o], ignore_xruns, &self.atomics, |ep| ep.prepare());
        }

        if self.multitrack {
            self.multitrack_start()?;
        } else {
            for &i in &self.realtime_inputs {
                device_call(&self.inputs[i], ignore_xruns, &self.atomics, |ep| ep.start());
            }
            self.trigger_outputs = !self.realtime_outputs.is_empty();
            self.trigger_counter = 0;
        }

        self.rt_running = true;
        self.atomics.set_status(EngineStatus::Running);
        Ok(())
    }

    fn stop(&mut self) {
        if self.status() != EngineStatus::Running && !self.rt_running {
            return;
        }
        log::debug!("engine: stop");

        if self.rt_running {
            for &i in &self.realtime_inputs {
                stop_device(&self.inputs[i]);
            }
            for &o in &self.realtime_outputs {
                stop_device(&self.outputs[o]);
            }
        }
        self.stop_servers();
        self.rt_running = false;
        self.trigger_outputs = false;

        if self.raised_priority {
            sched::set_normal_priority();
            self.raised_priority = false;
        }
        self.atomics.set_status(EngineStatus::Stopped);
    }

    fn start_servers(&mut self) {
        if let Some(server) = &self.pserver {
            server.start();
            if self.needs_prefill {
                log::info!("engine: prefilling i/o buffers");
                server.wait_for_full();
                self.needs_prefill = false;
            }
        }
    }

    fn stop_servers(&mut self) {
        let Some(server) = &self.pserver else {
            return;
        };
        server.stop();
        server.wait_for_stop();

        // Writes that failed while draining never reached the engine thread
        for label in server.failed_outputs() {
            if self.failed_outputs.contains(&label) {
                continue;
            }
            for output in &self.outputs {
                let mut ep = output.lock();
                if ep.is_open() && ep.label() == label {
                    log::warn!("engine: '{}' failed on the proxy I/O thread, closing", label);
                    ep.close();
                }
            }
            self.failed_outputs.push(label);
        }
    }

    /// Start realtime inputs, sync, start realtime outputs, then align file outputs
    fn multitrack_start(&mut self) -> EngineResult<()> {
        let ignore_xruns = self.settings.ignore_xruns;
        for &i in &self.realtime_inputs {
            device_call(&self.inputs[i], ignore_xruns, &self.atomics, |ep| ep.start());
        }

        log::debug!("engine: multitrack sync");
        let mut stamp = None;
        self.multitrack_sync(&mut stamp);
        self.multitrack_sync(&mut stamp);

        for &o in &self.realtime_outputs {
            device_call(&self.outputs[o], ignore_xruns, &self.atomics, |ep| ep.start());
        }

        let stamp = stamp.unwrap_or_else(Instant::now);
        let elapsed = Instant::now()
            .checked_duration_since(stamp)
            .ok_or(EngineError::NegativeSyncOffset)?;
        let offset = seconds_to_frames(elapsed.as_secs_f64(), self.settings.sample_rate);

        if self.pserver.is_some() {
            log::debug!("engine: sync offset {} frames not applied to proxied outputs", offset);
        } else {
            log::debug!("engine: sync offset {} frames", offset);
            for &o in &self.nonrealtime_outputs {
                let mut ep = self.outputs[o].lock();
                if ep.capabilities().seekable {
                    if let Err(e) = ep.seek_advance(offset) {
                        log::warn!("engine: sync seek on '{}' failed: {}", ep.label(), e);
                    }
                }
            }
        }
        Ok(())
    }

    /// One pass of inputs, chains and outputs that skips slave outputs
    fn multitrack_sync(&mut self, stamp: &mut Option<Instant>) {
        self.inputs_to_chains(None);
        if stamp.is_none() {
            *stamp = Some(Instant::now());
        }
        self.process_chains();
        self.mix_to_outputs(true);
    }

    fn trigger_outputs(&mut self) {
        if !self.trigger_outputs {
            return;
        }
        self.trigger_counter += 1;
        if self.trigger_counter == OUTPUT_TRIGGER_ITERATIONS {
            self.trigger_outputs = false;
            self.trigger_counter = 0;
            let ignore_xruns = self.settings.ignore_xruns;
            for &o in &self.realtime_outputs {
                device_call(&self.outputs[o], ignore_xruns, &self.atomics, |ep| ep.start());
            }
            log::debug!("engine: realtime outputs started");
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Positioning
    // ─────────────────────────────────────────────────────────────

    /// Stop if running; returns whether to start again afterwards
    fn conditional_stop(&mut self) -> bool {
        let was_running = self.status() == EngineStatus::Running;
        if was_running {
            self.stop();
        }
        was_running
    }

    fn conditional_start(&mut self, was_running: bool) {
        if was_running {
            if let Err(e) = self.start() {
                self.fail(e);
            }
        }
    }

    /// Move every endpoint to its start position plus `position`
    fn seek_all(&mut self, position: SamplePos) {
        self.position = position.max(0);
        for (i, ep) in self.inputs.iter().enumerate() {
            seek_endpoint(ep, self.input_start[i] + self.position);
        }
        for (o, ep) in self.outputs.iter().enumerate() {
            seek_endpoint(ep, self.output_start[o] + self.position);
        }
        self.input_not_finished = true;
        self.needs_prefill = self.pserver.is_some();
        self.atomics.set_position(self.position);
    }

    fn set_position(&mut self, seconds: f64) {
        let was_running = self.conditional_stop();
        self.seek_all(seconds_to_frames(seconds, self.settings.sample_rate));
        self.conditional_start(was_running);
    }

    fn change_position(&mut self, seconds: f64) {
        let was_running = self.conditional_stop();
        let delta = seconds_to_frames(seconds, self.settings.sample_rate);
        self.seek_all(self.position + delta);
        self.conditional_start(was_running);
    }

    fn set_position_chain(&mut self, seconds: f64) {
        let target = seconds_to_frames(seconds, self.settings.sample_rate);
        self.seek_chain(|_| target);
    }

    fn change_position_chain(&mut self, seconds: f64) {
        let delta = seconds_to_frames(seconds, self.settings.sample_rate);
        self.seek_chain(|current| current + delta);
    }

    /// Seek the selected chain's input and output; the global position stays
    fn seek_chain<F>(&mut self, target: F)
    where
        F: Fn(SamplePos) -> SamplePos,
    {
        let Some(chain) = self.setup.chains().get(self.selected_chain) else {
            return;
        };
        let (input, output) = (chain.input(), chain.output());
        let was_running = self.conditional_stop();
        if let Some(ep) = input.and_then(|i| self.inputs.get(i)) {
            let current = ep.lock().position();
            seek_endpoint(ep, target(current));
        }
        if let Some(ep) = output.and_then(|o| self.outputs.get(o)) {
            let current = ep.lock().position();
            seek_endpoint(ep, target(current));
        }
        self.input_not_finished = true;
        self.needs_prefill = self.pserver.is_some();
        self.conditional_start(was_running);
    }

    // ─────────────────────────────────────────────────────────────
    // Iteration
    // ─────────────────────────────────────────────────────────────

    /// One engine iteration; only called while running
    fn iteration(&mut self) {
        self.input_not_finished = false;
        let remain = self.prehandle_position();

        match self.mix_mode {
            MixMode::Simple => self.process_simple(remain),
            MixMode::Normal => {
                self.inputs_to_chains(remain);
                self.process_chains();
                self.mix_to_outputs(false);
            }
        }
        self.trigger_outputs();
        self.posthandle_position();
        self.update_engine_state();

        self.atomics.set_position(self.position);
        self.atomics.count_iteration();
        if let Some(server) = &self.pserver {
            let total = server.xruns();
            if total > self.proxy_xruns_seen {
                self.atomics.add_xruns(total - self.proxy_xruns_seen);
                self.proxy_xruns_seen = total;
            }
        }
    }

    /// Advance the position; frames to keep when this buffer crosses the length limit
    fn prehandle_position(&mut self) -> Option<usize> {
        let frames = self.settings.buffersize as SamplePos;
        let before = self.position;
        self.position += frames;
        match self.processing_length {
            Some(length) if self.position > length => Some((length - before).clamp(0, frames) as usize),
            _ => None,
        }
    }

    fn posthandle_position(&mut self) {
        let Some(length) = self.processing_length else {
            return;
        };
        if self.position < length {
            return;
        }
        if self.settings.looping {
            log::debug!("engine: processing length reached, looping");
            let was_running = self.conditional_stop();
            self.seek_all(0);
            self.input_not_finished = true;
            self.conditional_start(was_running);
        } else {
            log::info!("engine: processing length reached");
            self.position = length;
            self.stop();
            self.atomics.set_status(EngineStatus::Finished);
        }
    }

    fn update_engine_state(&mut self) {
        if self.input_not_finished || self.status() != EngineStatus::Running {
            return;
        }
        self.stop();
        if self.failed_outputs.is_empty() {
            log::info!("engine: all inputs finished");
            self.atomics.set_status(EngineStatus::Finished);
        } else {
            self.atomics.set_status(EngineStatus::Error);
        }
    }

    fn process_simple(&mut self, remain: Option<usize>) {
        let ignore_xruns = self.settings.ignore_xruns;
        let (frames, rate) = (self.settings.buffersize, self.settings.sample_rate);
        let buffer = &mut self.chain_buffers[0];
        {
            let mut input = self.inputs[0].lock();
            if read_endpoint(&mut *input, buffer, ignore_xruns, &self.atomics, frames, rate) && !input.finished() {
                self.input_not_finished = true;
            }
        }
        truncate(buffer, remain);
        if let Some(chain) = self.setup.chains_mut().first_mut() {
            chain.process(buffer);
        }
        let mut output = self.outputs[0].lock();
        if output.is_open() && !write_endpoint(&mut *output, buffer, ignore_xruns, &self.atomics) {
            self.failed_outputs.push(output.label().to_string());
        }
    }

    /// Read every input once into the chains attached to it
    fn inputs_to_chains(&mut self, remain: Option<usize>) {
        let ignore_xruns = self.settings.ignore_xruns;
        let (frames, rate) = (self.settings.buffersize, self.settings.sample_rate);
        let chains = self.setup.chains();

        for (i, input) in self.inputs.iter().enumerate() {
            let attached = self.input_chain_count[i];
            if attached == 0 {
                continue;
            }
            let mut ep = input.lock();
            if attached > 1 {
                if read_endpoint(&mut *ep, &mut self.mix_buffer, ignore_xruns, &self.atomics, frames, rate)
                    && !ep.finished()
                {
                    self.input_not_finished = true;
                }
                truncate(&mut self.mix_buffer, remain);
                for (c, chain) in chains.iter().enumerate() {
                    if chain.input() == Some(i) {
                        self.chain_buffers[c].assign(&self.mix_buffer);
                    }
                }
            } else if let Some(c) = chains.iter().position(|chain| chain.input() == Some(i)) {
                let buffer = &mut self.chain_buffers[c];
                if read_endpoint(&mut *ep, buffer, ignore_xruns, &self.atomics, frames, rate) && !ep.finished() {
                    self.input_not_finished = true;
                }
                truncate(buffer, remain);
            }
        }
    }

    fn process_chains(&mut self) {
        for (c, chain) in self.setup.chains_mut().iter_mut().enumerate() {
            chain.process(&mut self.chain_buffers[c]);
        }
    }

    /// Write every chain buffer to its output, mixing where outputs are shared
    fn mix_to_outputs(&mut self, skip_slaves: bool) {
        let ignore_xruns = self.settings.ignore_xruns;
        let rate = self.settings.sample_rate;
        let chains = self.setup.chains();

        for (o, output) in self.outputs.iter().enumerate() {
            let attached = self.output_chain_count[o];
            if attached == 0 || (skip_slaves && self.slave_outputs[o]) {
                continue;
            }
            let mut ep = output.lock();
            if !ep.is_open() {
                continue;
            }

            let written = if attached == 1 {
                match chains.iter().position(|chain| chain.output() == Some(o)) {
                    Some(c) => write_endpoint(&mut *ep, &mut self.chain_buffers[c], ignore_xruns, &self.atomics),
                    None => true,
                }
            } else {
                let feeders: Vec<usize> = chains
                    .iter()
                    .enumerate()
                    .filter(|(_, chain)| chain.output() == Some(o))
                    .map(|(c, _)| c)
                    .collect();
                let longest = feeders.iter().map(|&c| self.chain_buffers[c].len()).max().unwrap_or(0);

                let mix = &mut self.mix_buffer;
                mix.set_channel_count(ep.channels());
                mix.set_sample_rate(rate);
                mix.silence_frames(longest);
                for (n, &c) in feeders.iter().enumerate() {
                    let buffer = &self.chain_buffers[c];
                    if n == 0 {
                        mix.copy(buffer);
                        mix.resize(longest);
                        mix.divide_by(attached as Sample);
                    } else {
                        mix.add_with_weight(buffer, attached);
                    }
                }
                write_endpoint(&mut *ep, mix, ignore_xruns, &self.atomics)
            };

            if !written {
                self.failed_outputs.push(ep.label().to_string());
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
        if let Some(server) = &self.pserver {
            server.flush();
        }
        self.setup.disable();
    }
}

// ─────────────────────────────────────────────────────────────
// Endpoint helpers
// ─────────────────────────────────────────────────────────────

/// Non-realtime seekable endpoints with a single direction go through the proxy
fn is_proxyable(ep: &SharedEndpoint) -> bool {
    let ep = ep.lock();
    !ep.is_realtime() && ep.capabilities().seekable && ep.io_mode() != IoMode::ReadWrite
}

fn truncate(buffer: &mut SampleBuffer, remain: Option<usize>) {
    if let Some(frames) = remain {
        if buffer.len() > frames {
            buffer.resize(frames);
        }
    }
}

fn silence(buffer: &mut SampleBuffer, channels: usize, frames: usize, rate: u32) {
    buffer.set_channel_count(channels.max(1));
    buffer.set_sample_rate(rate);
    buffer.silence_frames(frames);
}

/// Read one buffer; `false` when the endpoint is (now) closed
fn read_endpoint(
    ep: &mut dyn AudioEndpoint,
    buffer: &mut SampleBuffer,
    ignore_xruns: bool,
    atomics: &EngineAtomics,
    frames: usize,
    rate: u32,
) -> bool {
    if !ep.is_open() {
        silence(buffer, ep.channels(), frames, rate);
        return false;
    }
    match ep.read_buffer(buffer) {
        Ok(()) => true,
        Err(e) => {
            let alive = recover(ep, e, ignore_xruns, atomics);
            silence(buffer, ep.channels(), frames, rate);
            alive
        }
    }
}

/// Write one buffer; `false` when the endpoint had to be closed
fn write_endpoint(
    ep: &mut dyn AudioEndpoint,
    buffer: &mut SampleBuffer,
    ignore_xruns: bool,
    atomics: &EngineAtomics,
) -> bool {
    match ep.write_buffer(buffer) {
        Ok(()) => true,
        Err(e) => recover(ep, e, ignore_xruns, atomics),
    }
}

/// Handle an endpoint error during processing; `true` if the endpoint stays usable
///
/// Xruns on realtime devices restart the device when xruns are ignored;
/// anything else closes the endpoint.
fn recover(ep: &mut dyn AudioEndpoint, err: EndpointError, ignore_xruns: bool, atomics: &EngineAtomics) -> bool {
    match err {
        EndpointError::Xrun(_) => {
            atomics.add_xruns(1);
            if ignore_xruns {
                log::info!("engine: xrun on '{}', restarting device", ep.label());
                match ep.stop().and_then(|_| ep.prepare()).and_then(|_| ep.start()) {
                    Ok(()) => return true,
                    Err(e) => log::warn!("engine: restarting '{}' failed: {}", ep.label(), e),
                }
            } else {
                log::warn!("engine: xrun on '{}'", ep.label());
            }
        }
        err => log::warn!("engine: '{}' failed: {}", ep.label(), err),
    }
    log::warn!("engine: closing '{}'", ep.label());
    ep.close();
    false
}

/// prepare/start on a realtime device, closing it when that fails
fn device_call<F>(endpoint: &SharedEndpoint, ignore_xruns: bool, atomics: &EngineAtomics, call: F)
where
    F: FnOnce(&mut dyn AudioEndpoint) -> Result<(), EndpointError>,
{
    let mut ep = endpoint.lock();
    if !ep.is_open() {
        return;
    }
    if let Err(e) = call(&mut *ep) {
        recover(&mut *ep, e, ignore_xruns, atomics);
    }
}

fn stop_device(endpoint: &SharedEndpoint) {
    let mut ep = endpoint.lock();
    if ep.is_open() {
        if let Err(e) = ep.stop() {
            log::warn!("engine: stopping '{}' failed: {}", ep.label(), e);
        }
    }
}

fn seek_endpoint(endpoint: &SharedEndpoint, position: SamplePos) {
    let mut ep = endpoint.lock();
    if !ep.is_open() || !ep.capabilities().seekable {
        return;
    }
    if let Err(e) = ep.seek(position.max(0)) {
        log::warn!("engine: seek on '{}' failed: {}", ep.label(), e);
    }
}

fn reopen_and_seek(endpoint: &SharedEndpoint, position: SamplePos) {
    {
        let mut ep = endpoint.lock();
        if !ep.is_open() {
            if let Err(e) = ep.open() {
                log::warn!("engine: reopening '{}' failed: {}", ep.label(), e);
                return;
            }
        }
    }
    seek_endpoint(endpoint, position);
}
