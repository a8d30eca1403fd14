//! Config loader: reads `~/.toolloop/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.toolloop/config.json` (or an explicit path)
//! 3. Environment variables `TOOLLOOP_<SECTION>__<FIELD>` (override JSON)
//! 4. `ANTHROPIC_API_KEY`, only when no key was configured above

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::Config;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from `path` (or the default path) + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    let config = apply_env_overrides(load_config_from_path(&config_path));
    sanitize(config)
}

/// Load config from a specific file path, without env overrides.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return Config::default();
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return Config::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config {}: {}", path.display(), e);
            Config::default()
        }
    }
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `TOOLLOOP_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `TOOLLOOP_AGENT__MODEL` → `agent.model`
/// - `TOOLLOOP_AGENT__MAX_TOKENS` → `agent.max_tokens`
/// - `TOOLLOOP_AGENT__MAX_STEPS` → `agent.max_steps`
/// - `TOOLLOOP_PROVIDER__API_KEY` → `provider.api_key`
/// - `TOOLLOOP_PROVIDER__API_BASE` → `provider.api_base`
/// - `TOOLLOOP_EVAL__RUNS` → `eval.runs`
/// - `TOOLLOOP_EVAL__MAX_STEPS` → `eval.max_steps`
fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(val) = std::env::var("TOOLLOOP_AGENT__MODEL") {
        config.agent.model = val;
    }
    if let Some(n) = env_parse::<u32>("TOOLLOOP_AGENT__MAX_TOKENS") {
        config.agent.max_tokens = n;
    }
    if let Some(n) = env_parse::<u32>("TOOLLOOP_AGENT__MAX_STEPS") {
        config.agent.max_steps = n;
    }

    if let Ok(val) = std::env::var("TOOLLOOP_PROVIDER__API_KEY") {
        config.provider.api_key = val;
    }
    if let Ok(val) = std::env::var("TOOLLOOP_PROVIDER__API_BASE") {
        config.provider.api_base = val;
    }
    if !config.provider.is_configured() {
        if let Ok(val) = std::env::var("ANTHROPIC_API_KEY") {
            config.provider.api_key = val;
        }
    }

    if let Some(n) = env_parse::<u32>("TOOLLOOP_EVAL__RUNS") {
        config.eval.runs = n;
    }
    if let Some(n) = env_parse::<u32>("TOOLLOOP_EVAL__MAX_STEPS") {
        config.eval.max_steps = n;
    }

    config
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = key, value = %raw, "ignoring unparsable env override");
            None
        }
    }
}

/// Clamp values the loop cannot run with.
fn sanitize(mut config: Config) -> Config {
    if config.agent.max_steps == 0 {
        warn!("agent.maxSteps must be at least 1, using 1");
        config.agent.max_steps = 1;
    }
    if config.eval.max_steps == 0 {
        warn!("eval.maxSteps must be at least 1, using 1");
        config.eval.max_steps = 1;
    }
    config
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp_json(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_missing_file() {
        let config = load_config_from_path(Path::new("/nonexistent/path/config.json"));
        assert_eq!(config.agent.max_tokens, 1000);
        assert_eq!(config.eval.runs, 30);
    }

    #[test]
    fn test_load_valid_json() {
        let file = write_temp_json(
            r#"{
            "agent": {
                "model": "claude-sonnet-4-20250514",
                "maxSteps": 3
            },
            "eval": { "runs": 10 }
        }"#,
        );

        let config = load_config_from_path(file.path());
        assert_eq!(config.agent.model, "claude-sonnet-4-20250514");
        assert_eq!(config.agent.max_steps, 3);
        assert_eq!(config.eval.runs, 10);
        // Default preserved
        assert_eq!(config.eval.max_steps, 7);
    }

    #[test]
    fn test_load_invalid_json_returns_defaults() {
        let file = write_temp_json("not valid json {{{");
        let config = load_config_from_path(file.path());
        assert_eq!(config.agent.max_steps, 5);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.agent.model = "claude-test".to_string();
        config.provider.api_key = "sk-ant-test".to_string();

        save_config(&config, Some(&path)).unwrap();

        let reloaded = load_config_from_path(&path);
        assert_eq!(reloaded.agent.model, "claude-test");
        assert_eq!(reloaded.provider.api_key, "sk-ant-test");

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["provider"].get("apiKey").is_some());
    }

    #[test]
    fn test_sanitize_zero_steps() {
        let mut config = Config::default();
        config.agent.max_steps = 0;
        config.eval.max_steps = 0;
        let config = sanitize(config);
        assert_eq!(config.agent.max_steps, 1);
        assert_eq!(config.eval.max_steps, 1);
    }

    // Env-var tests share one test so they never race each other.
    #[test]
    fn test_env_overrides() {
        std::env::set_var("TOOLLOOP_AGENT__MODEL", "env-model");
        std::env::set_var("TOOLLOOP_AGENT__MAX_STEPS", "not-a-number");
        std::env::set_var("TOOLLOOP_EVAL__RUNS", "4");
        std::env::set_var("TOOLLOOP_PROVIDER__API_KEY", "sk-env");

        let config = apply_env_overrides(Config::default());
        assert_eq!(config.agent.model, "env-model");
        assert_eq!(config.agent.max_steps, 5);
        assert_eq!(config.eval.runs, 4);
        assert_eq!(config.provider.api_key, "sk-env");

        std::env::remove_var("TOOLLOOP_AGENT__MODEL");
        std::env::remove_var("TOOLLOOP_AGENT__MAX_STEPS");
        std::env::remove_var("TOOLLOOP_EVAL__RUNS");
        std::env::remove_var("TOOLLOOP_PROVIDER__API_KEY");
    }
}
