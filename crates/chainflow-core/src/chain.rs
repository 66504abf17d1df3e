//! Processing chains
//!
//! A [`Chain`] is an ordered list of operators plus the controllers that
//! drive their parameters, bound to one input and one output of a
//! [`ChainSetup`](crate::setup::ChainSetup) by index. The engine owns one
//! working buffer per chain and hands it to [`Chain::process`] every
//! iteration.

use thiserror::Error;

use crate::buffer::SampleBuffer;
use crate::controller::{Controller, ControllerSource};
use crate::operator::{ChainOperator, ParamValue};

/// Errors from editing a chain
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain '{chain}' has no operator {index}")]
    NoSuchOperator { chain: String, index: usize },

    #[error("operator {operator} of chain '{chain}' has no parameter {param}")]
    NoSuchParameter {
        chain: String,
        operator: usize,
        param: usize,
    },
}

pub type ChainResult<T> = Result<T, ChainError>;

pub struct Chain {
    name: String,
    operators: Vec<Box<dyn ChainOperator>>,
    controllers: Vec<Controller>,
    muted: bool,
    processing: bool,
    input: Option<usize>,
    output: Option<usize>,
    selected_operator: Option<usize>,
    selected_parameter: Option<usize>,
    in_channels: usize,
    out_channels: usize,
    initialized: bool,
}

impl Chain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operators: Vec::new(),
            controllers: Vec::new(),
            muted: false,
            processing: true,
            input: None,
            output: None,
            selected_operator: None,
            selected_parameter: None,
            in_channels: 0,
            out_channels: 0,
            initialized: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ─────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────

    pub fn connect_input(&mut self, input: usize) {
        self.input = Some(input);
    }

    pub fn connect_output(&mut self, output: usize) {
        self.output = Some(output);
    }

    pub fn disconnect_input(&mut self) {
        self.input = None;
    }

    pub fn disconnect_output(&mut self) {
        self.output = None;
    }

    pub fn input(&self) -> Option<usize> {
        self.input
    }

    pub fn output(&self) -> Option<usize> {
        self.output
    }

    /// Both endpoints are bound
    pub fn is_valid(&self) -> bool {
        self.input.is_some() && self.output.is_some()
    }

    // ─────────────────────────────────────────────────────────────
    // Operators and controllers
    // ─────────────────────────────────────────────────────────────

    /// Append an operator and select it
    pub fn add_operator(&mut self, op: Box<dyn ChainOperator>) {
        self.operators.push(op);
        self.selected_operator = Some(self.operators.len() - 1);
        self.selected_parameter = None;
        self.initialized = false;
    }

    /// Remove the selected operator and every controller targeting it
    pub fn remove_selected_operator(&mut self) -> Option<Box<dyn ChainOperator>> {
        let index = self.selected_operator.take()?;
        if index >= self.operators.len() {
            return None;
        }
        let mut op = self.operators.remove(index);
        op.release();
        self.controllers.retain_mut(|c| c.operator_removed(index));
        self.selected_parameter = None;
        self.initialized = false;
        Some(op)
    }

    /// Drive parameter `param` of operator `operator` (0-based) from `source`
    pub fn add_controller(
        &mut self,
        source: Box<dyn ControllerSource>,
        operator: usize,
        param: usize,
        low: ParamValue,
        high: ParamValue,
    ) -> ChainResult<()> {
        let op = self.operators.get(operator).ok_or_else(|| ChainError::NoSuchOperator {
            chain: self.name.clone(),
            index: operator,
        })?;
        if param >= op.parameters().len() {
            return Err(ChainError::NoSuchParameter {
                chain: self.name.clone(),
                operator,
                param,
            });
        }
        self.controllers
            .push(Controller::new(source, operator, param, low, high));
        Ok(())
    }

    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    pub fn operator(&self, index: usize) -> Option<&dyn ChainOperator> {
        self.operators.get(index).map(|op| op.as_ref())
    }

    pub fn operator_names(&self) -> Vec<&str> {
        self.operators.iter().map(|op| op.name()).collect()
    }

    // ─────────────────────────────────────────────────────────────
    // Selection (1-based, as used by the command interface)
    // ─────────────────────────────────────────────────────────────

    /// Select operator `n` (1-based); returns false if there is none
    pub fn select_operator(&mut self, n: usize) -> bool {
        if n == 0 || n > self.operators.len() {
            return false;
        }
        self.selected_operator = Some(n - 1);
        self.selected_parameter = None;
        true
    }

    /// Selected operator, 1-based
    pub fn selected_operator(&self) -> Option<usize> {
        self.selected_operator.map(|i| i + 1)
    }

    /// Select parameter `n` (1-based) of the selected operator
    pub fn select_parameter(&mut self, n: usize) -> bool {
        let count = match self.selected_op() {
            Some(op) => op.parameters().len(),
            None => return false,
        };
        if n == 0 || n > count {
            return false;
        }
        self.selected_parameter = Some(n - 1);
        true
    }

    /// Selected parameter, 1-based
    pub fn selected_parameter(&self) -> Option<usize> {
        self.selected_parameter.map(|i| i + 1)
    }

    /// Set the selected parameter; returns false if nothing is selected
    pub fn set_parameter(&mut self, value: ParamValue) -> bool {
        let (Some(op), Some(param)) = (self.selected_operator, self.selected_parameter) else {
            return false;
        };
        match self.operators.get_mut(op) {
            Some(op) => {
                op.set_parameter(param, value);
                true
            }
            None => false,
        }
    }

    pub fn get_parameter(&self) -> Option<ParamValue> {
        let param = self.selected_parameter?;
        self.selected_op().map(|op| op.get_parameter(param))
    }

    fn selected_op(&self) -> Option<&dyn ChainOperator> {
        self.selected_operator
            .and_then(|i| self.operators.get(i))
            .map(|op| op.as_ref())
    }

    // ─────────────────────────────────────────────────────────────
    // Mute / bypass
    // ─────────────────────────────────────────────────────────────

    pub fn toggle_muting(&mut self) {
        self.muted = !self.muted;
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Toggle operator processing (bypass)
    pub fn toggle_processing(&mut self) {
        self.processing = !self.processing;
    }

    pub fn set_processing(&mut self, processing: bool) {
        self.processing = processing;
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    // ─────────────────────────────────────────────────────────────
    // Processing
    // ─────────────────────────────────────────────────────────────

    /// Prepare the chain for `buffer`
    ///
    /// `buffer` takes `in_channels` channels; each operator is initialized
    /// in turn and the channel count follows its `output_channels`. Must be
    /// called again after the operator list changed.
    pub fn init(&mut self, buffer: &mut SampleBuffer, in_channels: usize, out_channels: usize) {
        self.in_channels = in_channels;
        self.out_channels = out_channels;

        let mut channels = in_channels;
        buffer.set_channel_count(channels);
        for op in &mut self.operators {
            op.init(buffer);
            channels = op.output_channels(channels);
            buffer.set_channel_count(channels);
        }
        self.initialized = true;
        log::debug!(
            "chain '{}': initialized ({} -> {} channels, {} operators)",
            self.name,
            in_channels,
            channels,
            self.operators.len()
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Run controllers, then operators (or silence when muted)
    pub fn process(&mut self, buffer: &mut SampleBuffer) {
        let rate = buffer.sample_rate().max(1) as f64;
        let seconds = buffer.len() as f64 / rate;
        for ctrl in &mut self.controllers {
            ctrl.process(&mut self.operators, seconds);
        }

        if self.muted {
            buffer.make_silent();
            return;
        }
        if !self.processing {
            return;
        }
        for op in &mut self.operators {
            let channels = op.output_channels(buffer.channel_count());
            buffer.set_channel_count(channels);
            op.process(buffer);
        }
    }

    /// Restart every controller from time zero
    pub fn reset_controllers(&mut self) {
        for ctrl in &mut self.controllers {
            ctrl.reset();
        }
    }

    /// Detach from the engine run
    pub fn release(&mut self) {
        for op in &mut self.operators {
            op.release();
        }
        self.initialized = false;
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.name)
            .field("operators", &self.operator_names())
            .field("controllers", &self.controllers.len())
            .field("muted", &self.muted)
            .field("processing", &self.processing)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::LinearEnvelope;
    use crate::operator::{Amplify, ChannelCopy};

    fn constant(len: usize, channels: usize, value: f32) -> SampleBuffer {
        let mut buf = SampleBuffer::new(len, channels, 100);
        for ch in buf.channels_mut() {
            ch.fill(value);
        }
        buf
    }

    #[test]
    fn test_validity_needs_both_ends() {
        let mut chain = Chain::new("c");
        assert!(!chain.is_valid());
        chain.connect_input(0);
        assert!(!chain.is_valid());
        chain.connect_output(1);
        assert!(chain.is_valid());
    }

    #[test]
    fn test_init_follows_operator_channels() {
        let mut chain = Chain::new("c");
        chain.add_operator(Box::new(ChannelCopy::new(1, 2)));
        let mut buf = SampleBuffer::new(16, 1, 44100);
        chain.init(&mut buf, 1, 2);
        assert!(chain.is_initialized());
        assert_eq!(buf.channel_count(), 2);

        chain.add_operator(Box::new(Amplify::default()));
        assert!(!chain.is_initialized());
    }

    #[test]
    fn test_empty_chain_passes_through() {
        let mut chain = Chain::new("c");
        let mut buf = constant(8, 2, 0.5);
        chain.init(&mut buf, 2, 2);
        chain.process(&mut buf);
        assert!(buf.channels().all(|c| c.iter().all(|&s| s == 0.5)));
    }

    #[test]
    fn test_mute_and_bypass() {
        let mut chain = Chain::new("c");
        chain.add_operator(Box::new(Amplify::new(200.0)));
        let mut buf = constant(8, 1, 0.25);
        chain.init(&mut buf, 1, 1);

        chain.toggle_processing();
        chain.process(&mut buf);
        assert_eq!(buf.channel(0)[0], 0.25);

        chain.toggle_processing();
        chain.process(&mut buf);
        assert_eq!(buf.channel(0)[0], 0.5);

        chain.toggle_muting();
        chain.process(&mut buf);
        assert_eq!(buf.peak(), 0.0);
    }

    #[test]
    fn test_selection_and_parameter_poke() {
        let mut chain = Chain::new("c");
        chain.add_operator(Box::new(Amplify::default()));
        chain.add_operator(Box::new(ChannelCopy::default()));

        assert!(!chain.select_operator(0));
        assert!(!chain.select_operator(3));
        assert!(chain.select_operator(1));
        assert!(!chain.select_parameter(3));
        assert!(chain.select_parameter(1));
        assert!(chain.set_parameter(50.0));
        assert_eq!(chain.get_parameter(), Some(50.0));

        let mut buf = constant(4, 1, 0.8);
        chain.init(&mut buf, 1, 2);
        chain.process(&mut buf);
        assert!((buf.channel(1)[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_controllers_run_before_operators() {
        let mut chain = Chain::new("c");
        chain.add_operator(Box::new(Amplify::default()));
        chain
            .add_controller(Box::new(LinearEnvelope::new(1.0)), 0, 0, 0.0, 100.0)
            .unwrap();

        // 100 Hz buffers of 50 frames: half a second each
        let mut buf = constant(50, 1, 1.0);
        chain.init(&mut buf, 1, 1);
        chain.process(&mut buf);
        assert_eq!(buf.peak(), 0.0);

        let mut buf = constant(50, 1, 1.0);
        chain.process(&mut buf);
        assert!((buf.peak() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_controller_target_checked() {
        let mut chain = Chain::new("c");
        let err = chain
            .add_controller(Box::new(LinearEnvelope::new(1.0)), 0, 0, 0.0, 1.0)
            .unwrap_err();
        assert!(matches!(err, ChainError::NoSuchOperator { index: 0, .. }));

        chain.add_operator(Box::new(Amplify::default()));
        assert!(chain
            .add_controller(Box::new(LinearEnvelope::new(1.0)), 0, 5, 0.0, 1.0)
            .is_err());
    }

    #[test]
    fn test_remove_selected_drops_its_controllers() {
        let mut chain = Chain::new("c");
        chain.add_operator(Box::new(Amplify::default()));
        chain.add_operator(Box::new(Amplify::default()));
        chain
            .add_controller(Box::new(LinearEnvelope::new(1.0)), 0, 0, 0.0, 1.0)
            .unwrap();
        chain
            .add_controller(Box::new(LinearEnvelope::new(1.0)), 1, 0, 0.0, 1.0)
            .unwrap();

        chain.select_operator(1);
        assert!(chain.remove_selected_operator().is_some());
        assert_eq!(chain.operator_count(), 1);
        assert_eq!(chain.controller_count(), 1);
        assert!(chain.remove_selected_operator().is_none());
    }
}
