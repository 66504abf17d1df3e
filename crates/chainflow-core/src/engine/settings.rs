//! Engine settings

use serde::{Deserialize, Serialize};

use crate::types::{DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE};

/// Default ring length per proxied endpoint, in buffers
pub const DEFAULT_PROXY_BUFFER_COUNT: usize = 32;

/// Requested mixing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixModeSetting {
    /// `simple` when the topology allows it, `normal` otherwise
    #[default]
    Auto,
    Simple,
    Normal,
}

/// Settings for one engine run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Frames per iteration
    pub buffersize: usize,
    pub sample_rate: u32,
    pub mix_mode: MixModeSetting,
    /// Service non-realtime endpoints from the proxy I/O thread
    pub double_buffering: bool,
    /// Ring length per proxied endpoint
    pub proxy_buffer_count: usize,
    /// SCHED_FIFO priority for the engine and proxy threads, `None` to stay normal
    pub sched_priority: Option<i32>,
    /// Restart realtime devices after an xrun instead of closing them
    pub ignore_xruns: bool,
    /// Stop (or loop) after this many seconds; unset runs until inputs finish
    pub processing_length: Option<f64>,
    pub looping: bool,
    /// Force multitrack start on or off; `None` detects it from the topology
    pub multitrack: Option<bool>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            buffersize: DEFAULT_BUFFER_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            mix_mode: MixModeSetting::Auto,
            double_buffering: true,
            proxy_buffer_count: DEFAULT_PROXY_BUFFER_COUNT,
            sched_priority: None,
            ignore_xruns: true,
            processing_length: None,
            looping: false,
            multitrack: None,
        }
    }
}

impl EngineSettings {
    pub fn with_buffersize(mut self, frames: usize) -> Self {
        self.buffersize = frames;
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_mix_mode(mut self, mode: MixModeSetting) -> Self {
        self.mix_mode = mode;
        self
    }

    pub fn with_double_buffering(mut self, enabled: bool) -> Self {
        self.double_buffering = enabled;
        self
    }

    pub fn with_proxy_buffer_count(mut self, count: usize) -> Self {
        self.proxy_buffer_count = count;
        self
    }

    pub fn with_sched_priority(mut self, priority: Option<i32>) -> Self {
        self.sched_priority = priority;
        self
    }

    pub fn with_ignore_xruns(mut self, ignore: bool) -> Self {
        self.ignore_xruns = ignore;
        self
    }

    pub fn with_processing_length(mut self, seconds: Option<f64>) -> Self {
        self.processing_length = seconds;
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_multitrack(mut self, multitrack: Option<bool>) -> Self {
        self.multitrack = multitrack;
        self
    }

    /// Replace zero sizes and rates with defaults
    pub fn sanitized(mut self) -> Self {
        if self.buffersize == 0 {
            log::warn!("settings: buffersize 0, using {}", DEFAULT_BUFFER_SIZE);
            self.buffersize = DEFAULT_BUFFER_SIZE;
        }
        if self.sample_rate == 0 {
            log::warn!("settings: sample rate 0, using {}", DEFAULT_SAMPLE_RATE);
            self.sample_rate = DEFAULT_SAMPLE_RATE;
        }
        if self.proxy_buffer_count < 2 {
            self.proxy_buffer_count = 2;
        }
        self
    }
}
