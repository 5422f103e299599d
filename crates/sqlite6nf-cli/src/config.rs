//! Configuration loading and resolution.

use sqlite6nf::ConnectOptions;

/// Environment variable naming the database file.
pub const ENV_DATABASE: &str = "SQLITE6NF_DATABASE";

/// Database used when nothing else is configured.
pub const DEFAULT_DATABASE: &str = "sqlite6nf.db";

/// Resolve the database path.
pub fn resolve_database_path(explicit: Option<&str>) -> String {
    if let Some(path) = explicit {
        return path.to_string();
    }

    if let Ok(env_path) = std::env::var(ENV_DATABASE) {
        if !env_path.trim().is_empty() {
            return env_path;
        }
    }

    DEFAULT_DATABASE.to_string()
}

/// Connection options from the environment, with command-line overrides.
pub fn resolve_options(timeout_ms: Option<u64>) -> ConnectOptions {
    let mut options = ConnectOptions::from_env();
    if let Some(ms) = timeout_ms {
        options.timeout_ms = ms;
    }
    options
}
