//! YAML load/save for any serde configuration type

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load a YAML file, falling back to `T::default()`
///
/// A missing file is not an error; an unreadable or invalid one is logged
/// as a warning. Use [`SessionConfig::load_strict`](super::SessionConfig::load_strict)
/// where a broken file must stop the program.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    log::debug!("load_config: loading {:?}", path);

    if !path.exists() {
        log::info!("load_config: {:?} doesn't exist, using defaults", path);
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => {
                log::info!("load_config: loaded {:?}", path);
                config
            }
            Err(e) => {
                log::warn!("load_config: invalid YAML in {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: can't read {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Write `config` as YAML, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("failed to serialize config to YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("failed to write {:?}", path))?;

    log::info!("save_config: wrote {:?}", path);
    Ok(())
}
