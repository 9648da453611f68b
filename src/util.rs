use std::{env::VarError, str::FromStr, fmt::Display};
use anyhow::{Result, bail, anyhow};

/// Get an env var, None if not present, error if not unicode.
pub fn getenv(name: &str) -> Result<Option<String>> {
    match std::env::var(name) {
        Ok(s) => Ok(Some(s)),
        Err(e) => match e {
            VarError::NotPresent => Ok(None),
            VarError::NotUnicode(_) => bail!("{name:?} env var is not unicode"),
        }
    }
}

/// Like getenv but also parses the value, reporting an error
/// mentioning the variable name if that fails.
pub fn getenv_parsed<T>(name: &str) -> Result<Option<T>>
where T: FromStr, T::Err: Display
{
    match getenv(name)? {
        Some(s) => s.trim().parse().map(Some).map_err(
            |e| anyhow!("invalid value in env var {name:?}: {e}")),
        None => Ok(None)
    }
}

/// The current unix time in seconds.
pub fn unixtime() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_getenv() {
        std::env::set_var("HN_UTIL_TEST_NUM", " 42 ");
        std::env::set_var("HN_UTIL_TEST_BAD", "x");
        assert_eq!(getenv_parsed::<u32>("HN_UTIL_TEST_NUM").unwrap(), Some(42));
        assert!(getenv_parsed::<u32>("HN_UTIL_TEST_BAD").is_err());
        assert_eq!(getenv("HN_UTIL_TEST_MISSING").unwrap(), None);
    }
}
