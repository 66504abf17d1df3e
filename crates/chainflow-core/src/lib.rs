//! Chainflow Core - multi-chain audio processing engine
//!
//! Audio flows from input endpoints through chains of operators into
//! output endpoints. The [`engine::Engine`] drives the iteration loop;
//! file endpoints are kept away from its thread by the double-buffering
//! [`proxy::ProxyServer`].

pub mod types;
pub mod buffer;
pub mod endpoint;
pub mod operator;
pub mod controller;
pub mod chain;
pub mod setup;
pub mod proxy;
pub mod engine;
pub mod config;
pub mod sync;
pub mod sched;

pub use types::*;
