//! Endpoint registry - string keys to constructors

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{
    shared, EndpointError, EndpointResult, IoMode, LoopDevice, MemoryEndpoint, NullEndpoint,
    RawFileEndpoint, RtNullDevice, SharedEndpoint, ToneGenerator, WavFileEndpoint,
};
use crate::buffer::AudioFormat;
use crate::types::{seconds_to_frames, Sample, DEFAULT_CHANNELS};

/// Constructor stored in an [`EndpointRegistry`]
pub type EndpointConstructor = fn(&EndpointParams) -> EndpointResult<SharedEndpoint>;

/// Description of one endpoint, as found in a session file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointParams {
    /// Name chains use to refer to the endpoint
    pub label: String,
    /// Registry key (`raw`, `wav`, `tone`, ...)
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default = "default_mode")]
    pub mode: IoMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<AudioFormat>,
    /// Numeric options specific to the kind
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, f64>,
}

fn default_mode() -> IoMode {
    IoMode::Read
}

impl EndpointParams {
    pub fn new(label: impl Into<String>, kind: impl Into<String>, mode: IoMode) -> Self {
        Self {
            label: label.into(),
            kind: kind.into(),
            path: None,
            mode,
            format: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn param(&self, name: &str, default: f64) -> f64 {
        self.params.get(name).copied().unwrap_or(default)
    }

    /// Channel count from the `channels` option, falling back to the format
    pub fn channels(&self) -> usize {
        match self.params.get("channels") {
            Some(&c) if c >= 1.0 => c as usize,
            _ => self.format.map_or(DEFAULT_CHANNELS, |f| f.channels),
        }
    }

    fn required_path(&self) -> EndpointResult<&PathBuf> {
        self.path
            .as_ref()
            .ok_or_else(|| EndpointError::setup(&self.label, format!("'{}' endpoint needs a path", self.kind)))
    }
}

/// Maps registry keys to endpoint constructors
pub struct EndpointRegistry {
    constructors: HashMap<String, EndpointConstructor>,
}

impl EndpointRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with every built-in endpoint kind
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("raw", build_raw);
        registry.register("wav", build_wav);
        registry.register("tone", build_tone);
        registry.register("null", build_null);
        registry.register("rtnull", build_rtnull);
        registry.register("loop", build_loop);
        registry.register("memory", build_memory);
        registry
    }

    pub fn register(&mut self, key: impl Into<String>, constructor: EndpointConstructor) {
        self.constructors.insert(key.into(), constructor);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.constructors.contains_key(key)
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn create(&self, params: &EndpointParams) -> EndpointResult<SharedEndpoint> {
        let constructor = self.constructors.get(&params.kind).ok_or_else(|| {
            EndpointError::setup(&params.label, format!("unknown endpoint kind '{}'", params.kind))
        })?;
        let endpoint = constructor(params)?;
        {
            let ep = endpoint.lock();
            if !ep.capabilities().supports(params.mode) {
                return Err(EndpointError::UnsupportedIoMode {
                    label: params.label.clone(),
                    mode: params.mode,
                });
            }
        }
        log::debug!("registry: created '{}' endpoint '{}'", params.kind, params.label);
        Ok(endpoint)
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn build_raw(params: &EndpointParams) -> EndpointResult<SharedEndpoint> {
    let path = params.required_path()?;
    let format = params.format.unwrap_or_default();
    Ok(shared(RawFileEndpoint::new(path, params.mode, format)))
}

fn build_wav(params: &EndpointParams) -> EndpointResult<SharedEndpoint> {
    let path = params.required_path()?;
    let format = params.format.unwrap_or_default();
    Ok(shared(WavFileEndpoint::new(path, params.mode, format)))
}

/// Options: `frequency` (Hz, sine) or `level` (constant), `amplitude`,
/// `duration` (seconds at the format's rate), `channels`
fn build_tone(params: &EndpointParams) -> EndpointResult<SharedEndpoint> {
    let channels = params.channels();
    let mut tone = match params.params.get("level") {
        Some(&level) => ToneGenerator::constant(&params.label, level as Sample, channels),
        None => ToneGenerator::sine(&params.label, params.param("frequency", 440.0), channels),
    };
    tone = tone.with_amplitude(params.param("amplitude", 1.0) as Sample);
    if let Some(&seconds) = params.params.get("duration") {
        let rate = params.format.unwrap_or_default().sample_rate;
        tone = tone.with_duration(seconds_to_frames(seconds, rate));
    }
    Ok(shared(tone))
}

fn build_null(params: &EndpointParams) -> EndpointResult<SharedEndpoint> {
    Ok(shared(NullEndpoint::new(&params.label, params.mode, params.channels())))
}

fn build_rtnull(params: &EndpointParams) -> EndpointResult<SharedEndpoint> {
    Ok(shared(RtNullDevice::new(&params.label, params.mode, params.channels())))
}

/// Options: `channels`
fn build_loop(params: &EndpointParams) -> EndpointResult<SharedEndpoint> {
    Ok(shared(LoopDevice::new(&params.label, params.channels())))
}

/// A memory sink for writing, a silent source of `frames` frames for reading
fn build_memory(params: &EndpointParams) -> EndpointResult<SharedEndpoint> {
    let channels = params.channels();
    let endpoint = match params.mode {
        IoMode::Write => MemoryEndpoint::sink(&params.label, channels),
        IoMode::Read => {
            let frames = params.param("frames", 0.0).max(0.0) as usize;
            MemoryEndpoint::source(&params.label, vec![vec![0.0; frames]; channels])
        }
        IoMode::ReadWrite => {
            return Err(EndpointError::UnsupportedIoMode {
                label: params.label.clone(),
                mode: IoMode::ReadWrite,
            })
        }
    };
    Ok(shared(endpoint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_keys() {
        let registry = EndpointRegistry::with_builtins();
        assert_eq!(
            registry.keys(),
            vec!["loop", "memory", "null", "raw", "rtnull", "tone", "wav"]
        );
    }

    #[test]
    fn test_create_tone() {
        let registry = EndpointRegistry::default();
        let params = EndpointParams::new("dc", "tone", IoMode::Read)
            .with_param("level", 0.5)
            .with_param("channels", 1.0)
            .with_param("duration", 1.0);
        let tone = registry.create(&params).unwrap();
        let tone = tone.lock();
        assert_eq!(tone.channels(), 1);
        assert_eq!(tone.length(), Some(44100));
    }

    #[test]
    fn test_unknown_kind() {
        let registry = EndpointRegistry::default();
        let params = EndpointParams::new("x", "jack", IoMode::Write);
        assert!(matches!(registry.create(&params), Err(EndpointError::Setup { .. })));
    }

    #[test]
    fn test_mode_checked_against_capabilities() {
        let registry = EndpointRegistry::default();
        let params = EndpointParams::new("gen", "tone", IoMode::Write);
        assert!(matches!(
            registry.create(&params),
            Err(EndpointError::UnsupportedIoMode { .. })
        ));
    }

    #[test]
    fn test_file_kinds_need_a_path() {
        let registry = EndpointRegistry::default();
        let params = EndpointParams::new("in", "raw", IoMode::Read);
        assert!(registry.create(&params).is_err());
    }

    #[test]
    fn test_params_deserialize() {
        let yaml = "label: out\nkind: raw\npath: /tmp/out.raw\nmode: write\nformat:\n  sample_format: s16_le\n  channels: 2\n  sample_rate: 44100\n";
        let params: EndpointParams = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(params.mode, IoMode::Write);
        assert_eq!(params.channels(), 2);
        assert!(params.params.is_empty());
    }
}
