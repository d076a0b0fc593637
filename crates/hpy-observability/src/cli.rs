//! CLI argument parsing for per-crate debug flags
//!
//! Supports flags like `--debug-hpy-connection`, `--debug-hpy-protocol`, etc.
//! to raise individual crates to debug level.

use std::collections::HashMap;
use std::env;

use crate::KNOWN_CRATES;

/// Environment variable carrying comma-separated crate names (or `all`)
pub const DEBUG_ENV: &str = "HPY_DEBUG";

/// Parse debug flags from command-line arguments
///
/// # Example
/// ```rust
/// use hpy_observability::CrateDebugFlags;
///
/// let flags = CrateDebugFlags::from_args(vec!["--debug-hpy-connection".to_string()]);
/// assert!(flags.is_enabled("hpy-connection"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CrateDebugFlags {
    pub enabled_crates: HashMap<String, bool>,
}

impl CrateDebugFlags {
    /// Looks for arguments matching `--debug-{crate-name}`.
    /// Also supports `--debug-all` to enable all crates.
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut flags = CrateDebugFlags::default();

        for arg in args {
            if arg == "--debug-all" {
                flags.enable_all();
                continue;
            }
            if let Some(crate_name) = arg.strip_prefix("--debug-") {
                flags.enabled_crates.insert(crate_name.to_string(), true);
            }
        }

        flags
    }

    fn enable_all(&mut self) {
        for crate_name in KNOWN_CRATES {
            self.enabled_crates.insert(crate_name.to_string(), true);
        }
    }

    /// Check if debug is enabled for a specific crate
    pub fn is_enabled(&self, crate_name: &str) -> bool {
        self.enabled_crates.contains_key(crate_name)
    }

    /// Check if debug is enabled for any crate
    pub fn any_enabled(&self) -> bool {
        !self.enabled_crates.is_empty()
    }

    /// Returns `tracing::Level::DEBUG` if enabled, `tracing::Level::INFO` otherwise.
    pub fn log_level(&self, crate_name: &str) -> tracing::Level {
        if self.is_enabled(crate_name) {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Create an `EnvFilter` directive string from the flags.
    ///
    /// Tracing targets use the crate's module path, so `hpy-connection`
    /// becomes `hpy_connection=debug`. `base_level` applies to everything else.
    pub fn to_filter_string(&self, base_level: &str) -> String {
        let mut crates: Vec<&String> = self.enabled_crates.keys().collect();
        crates.sort();

        let mut filters: Vec<String> = crates
            .into_iter()
            .map(|name| format!("{}=debug", name.replace('-', "_")))
            .collect();
        filters.push(base_level.to_lowercase());
        filters.join(",")
    }
}

/// Parse debug flags from the process arguments and `HPY_DEBUG`.
///
/// Environment variable format: comma-separated crate names, e.g.
/// `hpy-connection,hpy-protocol`, or `all`.
pub fn parse_debug_flags() -> CrateDebugFlags {
    let mut flags = CrateDebugFlags::from_args(env::args());

    if let Ok(env_var) = env::var(DEBUG_ENV) {
        if env_var == "all" {
            flags.enable_all();
        } else {
            for crate_name in env_var.split(',') {
                let crate_name = crate_name.trim();
                if !crate_name.is_empty() {
                    flags.enabled_crates.insert(crate_name.to_string(), true);
                }
            }
        }
    }

    flags
}

/// Generate help text for debug flags
pub fn debug_flags_help() -> String {
    format!(
        r#"Debug Flags:
  --debug-all                    Enable debug logging for all crates
  --debug-{{crate-name}}          Enable debug logging for specific crate

Available crates:
  {}

Environment Variable:
  HPY_DEBUG={{crate-name}}[,{{crate-name}}]  Enable debug for crates (comma-separated)
  HPY_DEBUG=all                             Enable debug for all crates
"#,
        KNOWN_CRATES.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_crate_flag() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-hpy-connection".to_string()]);
        assert!(flags.is_enabled("hpy-connection"));
        assert!(!flags.is_enabled("hpy-protocol"));
    }

    #[test]
    fn test_debug_all() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-all".to_string()]);
        for crate_name in KNOWN_CRATES {
            assert!(flags.is_enabled(crate_name), "{} should be enabled", crate_name);
        }
    }

    #[test]
    fn test_unrelated_args_ignored() {
        let flags = CrateDebugFlags::from_args(vec![
            "ring-cli".to_string(),
            "--verbose".to_string(),
        ]);
        assert!(!flags.any_enabled());
    }

    #[test]
    fn test_filter_string_uses_module_targets() {
        let flags = CrateDebugFlags::from_args(vec![
            "--debug-hpy-protocol".to_string(),
            "--debug-hpy-connection".to_string(),
        ]);
        assert_eq!(
            flags.to_filter_string("WARN"),
            "hpy_connection=debug,hpy_protocol=debug,warn"
        );
    }

    #[test]
    fn test_filter_string_without_flags() {
        assert_eq!(CrateDebugFlags::default().to_filter_string("info"), "info");
    }

    #[test]
    fn test_log_level() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-hpy-connection".to_string()]);
        assert_eq!(flags.log_level("hpy-connection"), tracing::Level::DEBUG);
        assert_eq!(flags.log_level("hpy-config"), tracing::Level::INFO);
    }

    #[test]
    fn test_help_lists_crates() {
        let help = debug_flags_help();
        for crate_name in KNOWN_CRATES {
            assert!(help.contains(crate_name));
        }
    }
}
