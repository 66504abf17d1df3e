//! Standard locations for chainflow configuration files

use std::path::PathBuf;

/// Per-user configuration directory
///
/// Returns: `~/.config/chainflow` (or the platform equivalent), falling
/// back to `./chainflow` when no config directory is known.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chainflow")
}

/// Session file used when none is given on the command line
///
/// Returns: `<config dir>/session.yaml`
pub fn default_session_path() -> PathBuf {
    default_config_dir().join("session.yaml")
}

/// Per-user engine defaults, seeded into new sessions
///
/// Returns: `<config dir>/settings.yaml`
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_path_lives_in_config_dir() {
        let path = default_session_path();
        assert!(path.starts_with(default_config_dir()));
        assert_eq!(path.file_name().unwrap(), "session.yaml");
        assert_eq!(default_settings_path().parent(), path.parent());
    }
}
