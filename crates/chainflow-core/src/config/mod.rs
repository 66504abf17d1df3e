//! Session configuration
//!
//! - Generic YAML config loading/saving
//! - Standard config locations
//! - [`SessionConfig`]: a whole chain setup (endpoints, chains, engine
//!   settings) as one YAML document
//!
//! # Usage
//!
//! ```ignore
//! use chainflow_core::config::{SessionConfig, default_session_path};
//!
//! let session = SessionConfig::load_strict(&default_session_path())?;
//! let setup = session.build_setup()?;
//! ```

mod io;
mod paths;
mod session;

pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_session_path, default_settings_path};
pub use session::{
    ChainConfig, ConfigError, ConfigResult, ControllerConfig, OperatorConfig, SessionConfig,
};
