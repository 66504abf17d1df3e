//! The processing engine and its control surface
//!
//! - [`Engine`]: runs a [`ChainSetup`](crate::setup::ChainSetup), owning the
//!   iteration loop, mixing and transport
//! - [`EngineController`]: command sender and status reader for other threads
//! - [`EngineCommand`]: the lock-free command set
//! - [`EngineSettings`]: per-run configuration

mod command;
mod engine;
mod error;
mod handle;
mod settings;
mod status;

#[cfg(test)]
mod tests;

pub use command::*;
pub use engine::*;
pub use error::*;
pub use handle::*;
pub use settings::*;
pub use status::*;
