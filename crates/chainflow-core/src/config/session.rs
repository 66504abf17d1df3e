//! Session files - a complete chain setup as YAML
//!
//! ```yaml
//! name: demo
//! settings:
//!   buffersize: 1024
//!   sample_rate: 44100
//! endpoints:
//!   - label: tone
//!     kind: tone
//!     params: { frequency: 440.0, duration: 5.0, channels: 2 }
//!   - label: out
//!     kind: raw
//!     mode: write
//!     path: /tmp/out.raw
//! chains:
//!   - name: main
//!     input: tone
//!     output: out
//!     operators:
//!       - { key: ea, values: [80.0] }
//!     controllers:
//!       - { kind: kl, param: 1, low: 0.0, high: 100.0, values: [5.0] }
//! ```
//!
//! Endpoints opened for reading become setup inputs, those opened for
//! writing become outputs. `read_write` endpoints (loop devices) are one
//! input plus one output slot for every chain writing into them.
//! Operator and parameter numbers are 1-based, as in engine commands.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::{AudioFormat, SampleFormat};
use crate::chain::{Chain, ChainError};
use crate::controller::{ControllerSource, LinearEnvelope, SineOscillator};
use crate::endpoint::{EndpointError, EndpointParams, EndpointRegistry, IoMode, SharedEndpoint};
use crate::engine::{EngineError, EngineSettings};
use crate::operator::{OperatorRegistry, ParamValue};
use crate::setup::ChainSetup;

/// Errors turning a session description into a [`ChainSetup`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("endpoint label '{0}' is used more than once")]
    DuplicateEndpoint(String),

    #[error("chain '{chain}' reads from unknown input '{label}'")]
    UnknownInput { chain: String, label: String },

    #[error("chain '{chain}' writes to unknown output '{label}'")]
    UnknownOutput { chain: String, label: String },

    #[error("unknown operator '{key}' in chain '{chain}'")]
    UnknownOperator { chain: String, key: String },

    #[error("unknown controller '{key}' in chain '{chain}'")]
    UnknownController { chain: String, key: String },

    #[error("chain '{chain}': {what} numbers start at 1")]
    ZeroIndex { chain: String, what: &'static str },

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// One chain operator: registry key plus parameter values in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<ParamValue>,
}

/// A controller driving one operator parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// `kl` (linear envelope) or `kos` (sine oscillator)
    pub kind: String,
    /// Target operator (1-based); the chain's last operator when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<usize>,
    /// Target parameter (1-based)
    pub param: usize,
    pub low: ParamValue,
    pub high: ParamValue,
    /// Source parameters: `[length-sec]` for `kl`, `[freq-Hz, phase]` for `kos`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<ParamValue>,
}

impl ControllerConfig {
    fn source(&self) -> Option<Box<dyn ControllerSource>> {
        let value = |index: usize, default: ParamValue| self.values.get(index).copied().unwrap_or(default);
        match self.kind.as_str() {
            "kl" => Some(Box::new(LinearEnvelope::new(value(0, 1.0)))),
            "kos" => Some(Box::new(SineOscillator::new(value(0, 1.0), value(1, 0.0)))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    /// Label of the input endpoint
    pub input: String,
    /// Label of the output endpoint
    pub output: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operators: Vec<OperatorConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controllers: Vec<ControllerConfig>,
    #[serde(default)]
    pub muted: bool,
    /// Start with operator processing bypassed
    #[serde(default)]
    pub bypassed: bool,
}

/// A complete session: engine settings, endpoints and chains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub name: String,
    pub settings: EngineSettings,
    pub endpoints: Vec<EndpointParams>,
    pub chains: Vec<ChainConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "session".to_string(),
            settings: EngineSettings::default(),
            endpoints: Vec::new(),
            chains: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Load a session file, failing on a missing or invalid file
    pub fn load_strict(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read session file {:?}", path))?;
        let session: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("invalid session file {:?}", path))?;
        log::info!(
            "session: loaded '{}' from {:?} ({} endpoints, {} chains)",
            session.name,
            path,
            session.endpoints.len(),
            session.chains.len()
        );
        Ok(session)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        super::save_config(self, path)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Build the setup with the built-in endpoint and operator registries
    pub fn build_setup(&self) -> ConfigResult<ChainSetup> {
        self.build_setup_with(&EndpointRegistry::with_builtins(), &OperatorRegistry::with_builtins())
    }

    pub fn build_setup_with(
        &self,
        endpoints: &EndpointRegistry,
        operators: &OperatorRegistry,
    ) -> ConfigResult<ChainSetup> {
        let mut setup = ChainSetup::new(&self.name).with_settings(self.settings.clone());
        let mut inputs: HashMap<&str, usize> = HashMap::new();
        let mut outputs: HashMap<&str, usize> = HashMap::new();
        // read_write endpoints get one output slot per chain writing into them
        let mut routed: HashMap<&str, SharedEndpoint> = HashMap::new();

        for params in &self.endpoints {
            let label = params.label.as_str();
            if inputs.contains_key(label) || outputs.contains_key(label) || routed.contains_key(label) {
                return Err(ConfigError::DuplicateEndpoint(params.label.clone()));
            }
            let endpoint = endpoints.create(params)?;
            if params.mode.can_read() {
                inputs.insert(label, setup.add_input(Arc::clone(&endpoint)));
            }
            if params.mode == IoMode::ReadWrite {
                routed.insert(label, endpoint);
            } else if params.mode.can_write() {
                outputs.insert(label, setup.add_output(endpoint));
            }
        }

        for config in &self.chains {
            let chain = build_chain(config, operators)?;
            let input = *inputs.get(config.input.as_str()).ok_or_else(|| ConfigError::UnknownInput {
                chain: config.name.clone(),
                label: config.input.clone(),
            })?;
            let output = match (outputs.get(config.output.as_str()), routed.get(config.output.as_str())) {
                (Some(&output), _) => output,
                (None, Some(endpoint)) => setup.add_output(Arc::clone(endpoint)),
                (None, None) => {
                    return Err(ConfigError::UnknownOutput {
                        chain: config.name.clone(),
                        label: config.output.clone(),
                    })
                }
            };
            let index = setup.add_chain(chain);
            setup.connect(index, input, output)?;
        }

        log::debug!(
            "session: built setup '{}' ({} inputs, {} outputs, {} chains)",
            self.name,
            setup.inputs().len(),
            setup.outputs().len(),
            setup.chains().len()
        );
        Ok(setup)
    }

    /// A small working session: a sine tone, faded in, written to a raw file
    pub fn example() -> Self {
        let output = std::env::temp_dir().join("chainflow-example.raw");
        Self {
            name: "example".to_string(),
            settings: EngineSettings::default().with_processing_length(Some(5.0)),
            endpoints: vec![
                EndpointParams::new("tone", "tone", IoMode::Read)
                    .with_param("frequency", 440.0)
                    .with_param("channels", 2.0),
                EndpointParams::new("out", "raw", IoMode::Write)
                    .with_path(output)
                    .with_format(AudioFormat::new(SampleFormat::S16Le, 2, 44100)),
            ],
            chains: vec![ChainConfig {
                name: "main".to_string(),
                input: "tone".to_string(),
                output: "out".to_string(),
                operators: vec![
                    OperatorConfig {
                        key: "ea".to_string(),
                        values: vec![80.0],
                    },
                    OperatorConfig {
                        key: "epp".to_string(),
                        values: vec![50.0],
                    },
                ],
                controllers: vec![ControllerConfig {
                    kind: "kl".to_string(),
                    operator: Some(1),
                    param: 1,
                    low: 0.0,
                    high: 80.0,
                    values: vec![2.0],
                }],
                muted: false,
                bypassed: false,
            }],
        }
    }
}

fn build_chain(config: &ChainConfig, operators: &OperatorRegistry) -> ConfigResult<Chain> {
    let mut chain = Chain::new(&config.name);
    for op in &config.operators {
        let operator = operators
            .create(&op.key, &op.values)
            .ok_or_else(|| ConfigError::UnknownOperator {
                chain: config.name.clone(),
                key: op.key.clone(),
            })?;
        chain.add_operator(operator);
    }

    for ctrl in &config.controllers {
        let source = ctrl.source().ok_or_else(|| ConfigError::UnknownController {
            chain: config.name.clone(),
            key: ctrl.kind.clone(),
        })?;
        let zero = |what| ConfigError::ZeroIndex {
            chain: config.name.clone(),
            what,
        };
        let operator = match ctrl.operator {
            Some(n) => n.checked_sub(1).ok_or_else(|| zero("operator"))?,
            None => chain.operator_count().saturating_sub(1),
        };
        let param = ctrl.param.checked_sub(1).ok_or_else(|| zero("parameter"))?;
        chain.add_controller(source, operator, param, ctrl.low, ctrl.high)?;
    }

    chain.set_muted(config.muted);
    chain.set_processing(!config.bypassed);
    Ok(chain)
}
