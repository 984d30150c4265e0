// ABOUTME: XDG Base Directory paths for the fallback env file location
// ABOUTME: Used when no env file is named explicitly and none exists in the working directory

use directories::ProjectDirs;
use std::path::PathBuf;

/// Application identifier for XDG directories
const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "voicekeeper";
const APPLICATION: &str = "voicekeeper";

/// Name of the env file looked up in the working and config directories
pub const ENV_FILE_NAME: &str = ".env";

/// Default log file, relative to the working directory
pub const DEFAULT_LOG_FILE: &str = "bot_logs.txt";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// Get the config directory path (e.g., ~/.config/voicekeeper/)
/// Falls back to current directory if XDG directories unavailable
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// e.g., ~/.config/voicekeeper/.env
pub fn config_env_file() -> PathBuf {
    config_dir().join(ENV_FILE_NAME)
}
