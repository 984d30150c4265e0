// ABOUTME: Locates and parses the dotenv file that configures every account
// ABOUTME: Parsing never touches the process environment and degrades to an empty map on failure

use crate::paths;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use voicekeeper_core::ConfigParseError;

/// Environment variables that may name the env file, checked in order
pub const PATH_VARIABLES: [&str; 3] = ["ENV_FILE", "CONFIG_FILE", "CONFIG"];

/// Result of loading the env file
#[derive(Debug)]
pub struct LoadedEnv {
    pub path: PathBuf,
    pub vars: HashMap<String, String>,
    /// Set when the file could not be read or parsed; `vars` is then empty
    pub error: Option<ConfigParseError>,
}

/// Pick the env file path.
///
/// Order: the CLI flag, then the first non-empty of [`PATH_VARIABLES`], then
/// `.env` in `cwd`, then `.env` in the user config directory when only that
/// one exists. Relative paths resolve against `cwd`.
pub fn resolve_env_path(
    cli_path: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
    cwd: &Path,
) -> PathBuf {
    let named = cli_path.map(Path::to_path_buf).or_else(|| {
        PATH_VARIABLES
            .into_iter()
            .filter_map(|key| lookup(key))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .map(PathBuf::from)
    });

    if let Some(path) = named {
        return cwd.join(path);
    }

    let local = cwd.join(paths::ENV_FILE_NAME);
    if local.exists() {
        return local;
    }

    let user = paths::config_env_file();
    if user.exists() {
        return user;
    }
    local
}

/// Same as [`resolve_env_path`], reading the process environment and cwd.
pub fn resolve_env_path_from_process(cli_path: Option<&Path>) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_env_path(cli_path, |key| std::env::var(key).ok(), &cwd)
}

/// Parse the dotenv file at `path` into a map.
pub fn load_env(path: &Path) -> LoadedEnv {
    match parse_env_file(path) {
        Ok(vars) => {
            tracing::info!(path = %path.display(), keys = vars.len(), "Loaded env file");
            LoadedEnv {
                path: path.to_path_buf(),
                vars,
                error: None,
            }
        }
        Err(error) => {
            tracing::warn!(error = %error, "Continuing with empty configuration");
            LoadedEnv {
                path: path.to_path_buf(),
                vars: HashMap::new(),
                error: Some(error),
            }
        }
    }
}

fn parse_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigParseError> {
    let to_error = |e: dotenvy::Error| ConfigParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    dotenvy::from_path_iter(path)
        .map_err(to_error)?
        .map(|item| item.map_err(to_error))
        .collect()
}
