//! Centralized application paths.

use std::path::PathBuf;

const CONFIG_DIR_NAME: &str = ".quill";

/// The quill config directory (~/.quill).
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Saved sessions (~/.quill/sessions).
pub fn sessions_dir() -> PathBuf {
    config_dir().join("sessions")
}

/// Log files (~/.quill/logs).
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}
