//! Environment variable overrides.
//!
//! Process configuration is loaded from a file once and then selectively
//! overridden from the environment. These helpers keep that override step
//! free of the usual `std::env::var(..).ok().and_then(..)` boilerplate.
//!
//! ```
//! use difftest_types::env_utils::{env_flag, env_var_or};
//!
//! let interval: u64 = env_var_or("DIFFTEST_DOC_INTERVAL_MS", 2000);
//! assert_eq!(interval, 2000);
//! assert_eq!(env_flag("DIFFTEST_DOC_UNSET_FLAG"), None);
//! ```

use std::path::PathBuf;
use std::str::FromStr;

/// Parse an environment variable into a type that implements `FromStr`.
///
/// Returns `None` if the variable is not set or cannot be parsed.
pub fn env_var<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse an environment variable with a default value.
pub fn env_var_or<T: FromStr>(key: &str, default: T) -> T {
    env_var(key).unwrap_or(default)
}

/// Tri-state boolean: `Some(true)` for "1"/"true"/"yes"/"on", `Some(false)`
/// for "0"/"false"/"no"/"off", `None` when unset or unrecognized.
///
/// Unlike a plain truthiness check this lets an explicit `false` override a
/// `true` from the config file.
pub fn env_flag(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Non-empty string value of an environment variable.
pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Non-empty path value of an environment variable.
pub fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

/// Comma-separated list; empty when unset.
pub fn env_list(key: &str) -> Vec<String> {
    env_string(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_parsing() {
        std::env::set_var("DIFFTEST_TEST_U64", " 42 ");
        let val: Option<u64> = env_var("DIFFTEST_TEST_U64");
        assert_eq!(val, Some(42));

        let missing: Option<u64> = env_var("DIFFTEST_NONEXISTENT_1");
        assert_eq!(missing, None);
        assert_eq!(env_var_or("DIFFTEST_NONEXISTENT_1", 7u64), 7);

        std::env::remove_var("DIFFTEST_TEST_U64");
    }

    #[test]
    fn test_env_flag() {
        std::env::set_var("DIFFTEST_TEST_FLAG_ON", "YES");
        std::env::set_var("DIFFTEST_TEST_FLAG_OFF", "0");
        std::env::set_var("DIFFTEST_TEST_FLAG_BAD", "maybe");

        assert_eq!(env_flag("DIFFTEST_TEST_FLAG_ON"), Some(true));
        assert_eq!(env_flag("DIFFTEST_TEST_FLAG_OFF"), Some(false));
        assert_eq!(env_flag("DIFFTEST_TEST_FLAG_BAD"), None);
        assert_eq!(env_flag("DIFFTEST_NONEXISTENT_2"), None);

        std::env::remove_var("DIFFTEST_TEST_FLAG_ON");
        std::env::remove_var("DIFFTEST_TEST_FLAG_OFF");
        std::env::remove_var("DIFFTEST_TEST_FLAG_BAD");
    }

    #[test]
    fn test_env_string_and_list() {
        std::env::set_var("DIFFTEST_TEST_EMPTY", "  ");
        std::env::set_var("DIFFTEST_TEST_LIST", "default, random,,max");

        assert_eq!(env_string("DIFFTEST_TEST_EMPTY"), None);
        assert_eq!(
            env_list("DIFFTEST_TEST_LIST"),
            vec!["default", "random", "max"]
        );
        assert!(env_list("DIFFTEST_NONEXISTENT_3").is_empty());

        std::env::remove_var("DIFFTEST_TEST_EMPTY");
        std::env::remove_var("DIFFTEST_TEST_LIST");
    }
}
