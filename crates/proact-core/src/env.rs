//! Environment variable utilities.
//!
//! Generic `env_get<T>` for parsing configuration overrides with
//! defaults. Used by the runtime's config layer.

use std::str::FromStr;

/// Get an environment variable parsed as `T`, or the default.
///
/// Unset and unparseable values both fall back to the default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get an environment variable as a boolean.
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true;
/// any other set value is false. Unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__PROACT_TEST_UNSET__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_parses() {
        std::env::set_var("__PROACT_TEST_NUM__", "123");
        let val: usize = env_get("__PROACT_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__PROACT_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__PROACT_TEST_BAD__", "not_a_number");
        let val: u64 = env_get("__PROACT_TEST_BAD__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__PROACT_TEST_BAD__");
    }

    #[test]
    fn test_env_get_bool() {
        assert!(env_get_bool("__PROACT_TEST_UNSET__", true));
        assert!(!env_get_bool("__PROACT_TEST_UNSET__", false));
        std::env::set_var("__PROACT_TEST_FLAG__", "yes");
        assert!(env_get_bool("__PROACT_TEST_FLAG__", false));
        std::env::set_var("__PROACT_TEST_FLAG__", "garbage");
        assert!(!env_get_bool("__PROACT_TEST_FLAG__", true));
        std::env::remove_var("__PROACT_TEST_FLAG__");
    }
}
