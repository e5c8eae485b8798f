//! Environment variable helpers used for configuration overrides.

/// Get environment variable as Option
///
/// Empty values are treated as unset.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get environment variable parsed into `T`
///
/// Returns `None` if unset or unparseable.
pub fn env_parse<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env_opt(key)?.trim().parse().ok()
}

/// Get environment variable as boolean
///
/// Returns `true` for "true", "1", "yes", "on" (case-insensitive).
pub fn env_bool(key: &str) -> bool {
    env_opt(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_and_bool() {
        std::env::set_var("MODHOST_TEST_ENV_PORT", " 8080 ");
        std::env::set_var("MODHOST_TEST_ENV_FLAG", "Yes");
        std::env::set_var("MODHOST_TEST_ENV_EMPTY", "  ");

        assert_eq!(env_parse::<u16>("MODHOST_TEST_ENV_PORT"), Some(8080));
        assert!(env_bool("MODHOST_TEST_ENV_FLAG"));
        assert_eq!(env_opt("MODHOST_TEST_ENV_EMPTY"), None);
        assert_eq!(env_parse::<u16>("MODHOST_TEST_ENV_MISSING"), None);
    }
}
