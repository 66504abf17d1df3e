//! Chain setups - the topology an engine runs
//!
//! A [`ChainSetup`] owns the chains, the input and output endpoint lists
//! and the engine settings. Chains refer to endpoints by their index in
//! those lists. The same endpoint handle may appear as both an input and
//! an output (loop devices do).

use std::sync::Arc;

use crate::chain::Chain;
use crate::endpoint::SharedEndpoint;
use crate::engine::{EngineError, EngineResult, EngineSettings};

pub struct ChainSetup {
    name: String,
    chains: Vec<Chain>,
    inputs: Vec<SharedEndpoint>,
    outputs: Vec<SharedEndpoint>,
    settings: EngineSettings,
    enabled: bool,
}

impl ChainSetup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chains: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            settings: EngineSettings::default(),
            enabled: false,
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut EngineSettings {
        &mut self.settings
    }

    // ─────────────────────────────────────────────────────────────
    // Building
    // ─────────────────────────────────────────────────────────────

    /// Add an input; returns its index
    pub fn add_input(&mut self, endpoint: SharedEndpoint) -> usize {
        self.inputs.push(endpoint);
        self.inputs.len() - 1
    }

    /// Add an output; returns its index
    pub fn add_output(&mut self, endpoint: SharedEndpoint) -> usize {
        self.outputs.push(endpoint);
        self.outputs.len() - 1
    }

    /// Add a chain; returns its index
    pub fn add_chain(&mut self, chain: Chain) -> usize {
        self.chains.push(chain);
        self.chains.len() - 1
    }

    /// Bind chain `chain` to input `input` and output `output`
    pub fn connect(&mut self, chain: usize, input: usize, output: usize) -> EngineResult<()> {
        if input >= self.inputs.len() || output >= self.outputs.len() {
            let name = self
                .chains
                .get(chain)
                .map_or_else(|| chain.to_string(), |c| c.name().to_string());
            return Err(EngineError::InvalidChain(name));
        }
        let c = self
            .chains
            .get_mut(chain)
            .ok_or_else(|| EngineError::InvalidChain(chain.to_string()))?;
        c.connect_input(input);
        c.connect_output(output);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Access
    // ─────────────────────────────────────────────────────────────

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn chains_mut(&mut self) -> &mut [Chain] {
        &mut self.chains
    }

    pub fn chain_index(&self, name: &str) -> Option<usize> {
        self.chains.iter().position(|c| c.name() == name)
    }

    pub fn inputs(&self) -> &[SharedEndpoint] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[SharedEndpoint] {
        &self.outputs
    }

    pub fn input_index(&self, label: &str) -> Option<usize> {
        self.inputs.iter().position(|e| e.lock().label() == label)
    }

    pub fn output_index(&self, label: &str) -> Option<usize> {
        self.outputs.iter().position(|e| e.lock().label() == label)
    }

    /// Number of chains reading from input `input`
    pub fn chains_on_input(&self, input: usize) -> usize {
        self.chains.iter().filter(|c| c.input() == Some(input)).count()
    }

    /// Number of chains writing to output `output`
    pub fn chains_on_output(&self, output: usize) -> usize {
        self.chains.iter().filter(|c| c.output() == Some(output)).count()
    }

    // ─────────────────────────────────────────────────────────────
    // Validation and lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Check the topology is runnable
    ///
    /// Needs at least one chain, input and output; every chain bound to an
    /// existing input and output; inputs readable and outputs writable.
    pub fn validate(&self) -> EngineResult<()> {
        if self.chains.is_empty() {
            return Err(EngineError::NoChains);
        }
        if self.inputs.is_empty() {
            return Err(EngineError::NoInputs);
        }
        if self.outputs.is_empty() {
            return Err(EngineError::NoOutputs);
        }
        for chain in &self.chains {
            let bound = match (chain.input(), chain.output()) {
                (Some(i), Some(o)) => i < self.inputs.len() && o < self.outputs.len(),
                _ => false,
            };
            if !bound {
                return Err(EngineError::InvalidChain(chain.name().to_string()));
            }
        }
        for input in &self.inputs {
            let ep = input.lock();
            if !ep.io_mode().can_read() {
                return Err(EngineError::endpoint(
                    ep.label(),
                    crate::endpoint::EndpointError::UnsupportedIoMode {
                        label: ep.label().to_string(),
                        mode: ep.io_mode(),
                    },
                ));
            }
        }
        for output in &self.outputs {
            let ep = output.lock();
            if !ep.io_mode().can_write() {
                return Err(EngineError::endpoint(
                    ep.label(),
                    crate::endpoint::EndpointError::UnsupportedIoMode {
                        label: ep.label().to_string(),
                        mode: ep.io_mode(),
                    },
                ));
            }
        }
        Ok(())
    }

    /// Validate, negotiate buffer size and rate, and open every endpoint
    ///
    /// Endpoints already open are left alone. On failure everything
    /// opened so far stays open until [`disable`](Self::disable).
    pub fn enable(&mut self) -> EngineResult<()> {
        if self.enabled {
            return Ok(());
        }
        self.settings = self.settings.clone().sanitized();
        self.validate()?;
        let (frames, rate) = (self.settings.buffersize, self.settings.sample_rate);
        for endpoint in self.all_endpoints() {
            let mut ep = endpoint.lock();
            ep.set_buffersize(frames, rate);
            if !ep.is_open() {
                ep.open()
                    .map_err(|e| EngineError::endpoint(ep.label(), e))?;
            }
        }
        for output in &self.outputs {
            let writers = self.outputs.iter().filter(|o| Arc::ptr_eq(o, output)).count();
            output.lock().set_writer_count(writers);
        }
        self.enabled = true;
        log::info!(
            "setup '{}': enabled ({} chains, {} inputs, {} outputs)",
            self.name,
            self.chains.len(),
            self.inputs.len(),
            self.outputs.len()
        );
        Ok(())
    }

    /// Close every endpoint and release the chains
    pub fn disable(&mut self) {
        for endpoint in self.all_endpoints() {
            let mut ep = endpoint.lock();
            if ep.is_open() {
                ep.close();
            }
        }
        for chain in &mut self.chains {
            chain.release();
        }
        if self.enabled {
            log::info!("setup '{}': disabled", self.name);
        }
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Inputs then outputs, each distinct handle once
    fn all_endpoints(&self) -> Vec<SharedEndpoint> {
        let mut seen: Vec<SharedEndpoint> = Vec::new();
        for ep in self.inputs.iter().chain(self.outputs.iter()) {
            if !seen.iter().any(|s| Arc::ptr_eq(s, ep)) {
                seen.push(Arc::clone(ep));
            }
        }
        seen
    }
}

impl Drop for ChainSetup {
    fn drop(&mut self) {
        if self.enabled {
            self.disable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{shared, IoMode, LoopDevice, MemoryEndpoint, NullEndpoint};

    fn simple_setup() -> ChainSetup {
        let mut setup = ChainSetup::new("test");
        let input = setup.add_input(shared(MemoryEndpoint::source("in", vec![vec![0.0; 8]; 2])));
        let output = setup.add_output(shared(MemoryEndpoint::sink("out", 2)));
        let chain = setup.add_chain(Chain::new("c1"));
        setup.connect(chain, input, output).unwrap();
        setup
    }

    #[test]
    fn test_missing_parts() {
        let setup = ChainSetup::new("empty");
        assert!(matches!(setup.validate(), Err(EngineError::NoChains)));

        let mut setup = ChainSetup::new("no inputs");
        setup.add_chain(Chain::new("c"));
        assert!(matches!(setup.validate(), Err(EngineError::NoInputs)));

        setup.add_input(shared(NullEndpoint::new("null", IoMode::Read, 2)));
        assert!(matches!(setup.validate(), Err(EngineError::NoOutputs)));

        setup.add_output(shared(NullEndpoint::new("null", IoMode::Write, 2)));
        assert!(matches!(setup.validate(), Err(EngineError::InvalidChain(_))));
    }

    #[test]
    fn test_connect_checks_indices() {
        let mut setup = simple_setup();
        assert!(setup.connect(0, 5, 0).is_err());
        assert!(setup.connect(3, 0, 0).is_err());
        assert!(setup.validate().is_ok());
    }

    #[test]
    fn test_io_modes_checked() {
        let mut setup = ChainSetup::new("modes");
        let i = setup.add_input(shared(MemoryEndpoint::sink("not readable", 2)));
        let o = setup.add_output(shared(MemoryEndpoint::sink("out", 2)));
        let c = setup.add_chain(Chain::new("c"));
        setup.connect(c, i, o).unwrap();
        assert!(matches!(setup.validate(), Err(EngineError::EndpointSetup { .. })));
    }

    #[test]
    fn test_enable_opens_and_disable_closes() {
        let mut setup = simple_setup().with_settings(EngineSettings::default().with_buffersize(4));
        setup.enable().unwrap();
        assert!(setup.is_enabled());
        assert!(setup.inputs()[0].lock().is_open());
        assert_eq!(setup.outputs()[0].lock().buffersize(), 4);

        setup.disable();
        assert!(!setup.inputs()[0].lock().is_open());
        assert!(!setup.outputs()[0].lock().is_open());
    }

    #[test]
    fn test_shared_loop_endpoint_counted_once() {
        let mut setup = ChainSetup::new("loop");
        let lp = shared(LoopDevice::new("loop,1", 2));
        let input = setup.add_input(Arc::clone(&lp));
        let output = setup.add_output(lp);
        let c = setup.add_chain(Chain::new("c"));
        setup.connect(c, input, output).unwrap();
        assert_eq!(setup.all_endpoints().len(), 1);
        assert_eq!(setup.chains_on_input(input), 1);
        assert_eq!(setup.input_index("loop,1"), Some(0));
    }
}
