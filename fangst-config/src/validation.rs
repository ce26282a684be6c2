// fangst-config/src/validation.rs
//! Custom validation functions for configuration.
//!
//! Provides shared validation logic used across multiple configuration modules.

use validator::ValidationError;

/// Validate that an interface name follows Linux naming conventions.
pub fn validate_interface(name: &str) -> Result<(), ValidationError> {
    let valid = !name.is_empty()
        && name.len() <= 15
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    let re =
        regex::Regex::new("^[a-zA-Z0-9_]+$").map_err(|_| ValidationError::new("invalid_regex"))?;

    if valid && re.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_interface"))
    }
}

/// Validate an exporter overflow policy name.
pub fn validate_overflow_policy(policy: &str) -> Result<(), ValidationError> {
    let re = regex::Regex::new("^(retain|drop_oldest)$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;
    if re.is_match(policy) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_overflow_policy"))
    }
}

/// Validate a tracing filter directive (e.g. `info`, `fangst_capture=debug`).
pub fn validate_log_filter(filter: &str) -> Result<(), ValidationError> {
    let re = regex::Regex::new("^[a-zA-Z0-9_,=:-]+$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;
    if !filter.is_empty() && re.is_match(filter) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_filter"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_names() {
        assert!(validate_interface("eth0").is_ok());
        assert!(validate_interface("wlan0mon").is_ok());
        assert!(validate_interface("").is_err());
        assert!(validate_interface("eth0; rm -rf /").is_err());
        assert!(validate_interface("averylonginterfacename").is_err());
    }

    #[test]
    fn overflow_policies() {
        assert!(validate_overflow_policy("retain").is_ok());
        assert!(validate_overflow_policy("drop_oldest").is_ok());
        assert!(validate_overflow_policy("drop-newest").is_err());
    }
}
