// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{validate_config, ConfigError, ConfigResult, HpyConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "hpy_ble.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "HPY_CONFIG_PATH";

/// Find the configuration file
///
/// Search order:
/// 1. `HPY_CONFIG_PATH` environment variable
/// 2. Current working directory: `./hpy_ble.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by {} not found: {}",
            CONFIG_PATH_ENV,
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.clone();
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join(CONFIG_FILE_NAME));
                    current = parent.to_path_buf();
                }
                None => break,
            }
        }
    }

    if let Some(found) = search_paths.iter().find(|p| p.exists()) {
        return Ok(found.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}\n\nSet {} to specify a custom location.",
        CONFIG_FILE_NAME, search_list, CONFIG_PATH_ENV
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if config file is not found, contains invalid TOML, or fails validation
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<HpyConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: HpyConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    validate_config(&config)?;
    Ok(config)
}

/// Load configuration if a file can be found, otherwise start from defaults.
///
/// Overrides and validation still apply in the fallback case.
pub fn load_config_or_default(
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<HpyConfig> {
    match find_config_file() {
        Ok(path) => load_config(Some(&path), cli_args),
        Err(ConfigError::FileNotFound(_)) => {
            let mut config = HpyConfig::default();
            apply_environment_overrides(&mut config);
            if let Some(cli) = cli_args {
                apply_cli_overrides(&mut config, cli);
            }
            validate_config(&config)?;
            Ok(config)
        }
        Err(e) => Err(e),
    }
}

fn parse_bool(value: &str) -> bool {
    let lower = value.to_lowercase();
    lower == "true" || lower == "1" || lower == "yes"
}

fn set_parsed<T: FromStr>(target: &mut T, value: &str) {
    if let Ok(parsed) = value.parse::<T>() {
        *target = parsed;
    }
}

/// Apply one named override. Keys are the lower-case CLI names.
fn apply_override(config: &mut HpyConfig, key: &str, value: &str) {
    match key {
        "command_timeout_ms" => set_parsed(&mut config.connection.command_timeout_ms, value),
        "skip_finger_detection" => config.connection.skip_finger_detection = parse_bool(value),
        "requested_mtu" => set_parsed(&mut config.connection.requested_mtu, value),
        "download_batch_size" => set_parsed(&mut config.download.batch_size, value),
        "download_max_retries" => set_parsed(&mut config.download.max_retries, value),
        "prefer_l2cap" => config.download.prefer_l2cap = parse_bool(value),
        "reconnect_max_attempts" => set_parsed(&mut config.reconnect.max_attempts, value),
        "fw_reboot_wait_ms" => set_parsed(&mut config.reconnect.fw_reboot_wait_ms, value),
        "memfault_enabled" => config.memfault.enabled = parse_bool(value),
        "log_level" => config.logging.level = value.to_string(),
        _ => {}
    }
}

const OVERRIDE_KEYS: &[&str] = &[
    "command_timeout_ms",
    "skip_finger_detection",
    "requested_mtu",
    "download_batch_size",
    "download_max_retries",
    "prefer_l2cap",
    "reconnect_max_attempts",
    "fw_reboot_wait_ms",
    "memfault_enabled",
    "log_level",
];

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `HPY_COMMAND_TIMEOUT_MS` -> `connection.command_timeout_ms`
/// - `HPY_SKIP_FINGER_DETECTION` -> `connection.skip_finger_detection`
/// - `HPY_REQUESTED_MTU` -> `connection.requested_mtu`
/// - `HPY_DOWNLOAD_BATCH_SIZE` -> `download.batch_size`
/// - `HPY_DOWNLOAD_MAX_RETRIES` -> `download.max_retries`
/// - `HPY_PREFER_L2CAP` -> `download.prefer_l2cap`
/// - `HPY_RECONNECT_MAX_ATTEMPTS` -> `reconnect.max_attempts`
/// - `HPY_FW_REBOOT_WAIT_MS` -> `reconnect.fw_reboot_wait_ms`
/// - `HPY_MEMFAULT_ENABLED` -> `memfault.enabled`
/// - `HPY_LOG_LEVEL` -> `logging.level`
pub fn apply_environment_overrides(config: &mut HpyConfig) {
    for key in OVERRIDE_KEYS {
        let var = format!("HPY_{}", key.to_uppercase());
        if let Ok(value) = env::var(&var) {
            apply_override(config, key, &value);
        }
    }
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"requested_mtu": "185"}`)
pub fn apply_cli_overrides(config: &mut HpyConfig, cli_args: &HashMap<String, String>) {
    for key in OVERRIDE_KEYS {
        if let Some(value) = cli_args.get(*key) {
            apply_override(config, key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom_config.toml");
        File::create(&config_path).unwrap();

        env::set_var(CONFIG_PATH_ENV, config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var(CONFIG_PATH_ENV);

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_find_config_file_env_var_missing_file() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::set_var(CONFIG_PATH_ENV, "/definitely/not/here/hpy_ble.toml");
        let result = find_config_file();
        env::remove_var(CONFIG_PATH_ENV);

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::remove_var("HPY_DOWNLOAD_BATCH_SIZE");
        env::remove_var("HPY_REQUESTED_MTU");
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[download]").unwrap();
        writeln!(file, "batch_size = 32").unwrap();
        writeln!(file, "[connection]").unwrap();
        writeln!(file, "requested_mtu = 185").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.download.batch_size, 32);
        assert_eq!(config.connection.requested_mtu, 185);
        assert_eq!(config.connection.command_timeout_ms, 5000);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[download").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_runs_validation() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::remove_var("HPY_DOWNLOAD_BATCH_SIZE");
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[download]").unwrap();
        writeln!(file, "batch_size = 0").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = HpyConfig::default();

        env::set_var("HPY_COMMAND_TIMEOUT_MS", "2500");
        env::set_var("HPY_PREFER_L2CAP", "false");
        env::set_var("HPY_REQUESTED_MTU", "not-a-number");

        apply_environment_overrides(&mut config);

        env::remove_var("HPY_COMMAND_TIMEOUT_MS");
        env::remove_var("HPY_PREFER_L2CAP");
        env::remove_var("HPY_REQUESTED_MTU");

        assert_eq!(config.connection.command_timeout_ms, 2500);
        assert!(!config.download.prefer_l2cap);
        assert_eq!(config.connection.requested_mtu, 247);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = HpyConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("skip_finger_detection".to_string(), "yes".to_string());
        cli_args.insert("reconnect_max_attempts".to_string(), "3".to_string());

        apply_cli_overrides(&mut config, &cli_args);

        assert!(config.connection.skip_finger_detection);
        assert_eq!(config.reconnect.max_attempts, 3);
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[download]").unwrap();
        writeln!(file, "batch_size = 8").unwrap();
        writeln!(file, "max_retries = 2").unwrap();

        env::set_var("HPY_DOWNLOAD_BATCH_SIZE", "16");
        env::set_var("HPY_DOWNLOAD_MAX_RETRIES", "3");

        let mut cli_args = HashMap::new();
        cli_args.insert("download_batch_size".to_string(), "32".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args)).unwrap();

        env::remove_var("HPY_DOWNLOAD_BATCH_SIZE");
        env::remove_var("HPY_DOWNLOAD_MAX_RETRIES");

        // CLI wins for batch size, env wins for retries (no CLI override)
        assert_eq!(config.download.batch_size, 32);
        assert_eq!(config.download.max_retries, 3);
    }
}
