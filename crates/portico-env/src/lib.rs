//! Environment plumbing for gateway configuration.
//!
//! The gateway's YAML config carries connection details for Redis, upstream
//! HTTP servers and the notifier; the secret-bearing parts of those fields
//! (passwords, bearer tokens) are written as `${VAR}` references and
//! resolved here at deserialization time, so no credential ever lands in
//! the file itself. The plain getters (`flag`, `positive_u64`) back the
//! `PORTICO_GATEWAY_*` override knobs.

/// Read a boolean switch from the environment.
///
/// Anything other than `1`, `true`, `yes`, `y` or `on` (case-insensitive,
/// surrounding whitespace ignored) — including an unset variable — is
/// `false`.
#[must_use]
pub fn flag(name: &str) -> bool {
    let Ok(raw) = std::env::var(name) else {
        return false;
    };
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Read a strictly positive integer from the environment.
///
/// Unset, unparsable and zero values all yield `None`, so callers can fall
/// back to their config-file default with a plain `unwrap_or`.
#[must_use]
pub fn positive_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Some(n),
        _ => None,
    }
}

/// Substitute every `${VAR}` reference in a config string.
///
/// Substituted values are taken literally — a value containing `${` is not
/// expanded again. An opening `${` with no closing brace is kept as-is.
///
/// # Errors
///
/// Fails when a referenced variable is not set, naming the variable so the
/// operator knows which export is missing.
pub fn expand_env_string(raw: &str) -> Result<String, String> {
    let mut expanded = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(open) = rest.find("${") {
        expanded.push_str(&rest[..open]);
        let reference = &rest[open + 2..];
        let Some(close) = reference.find('}') else {
            // Unterminated reference: keep the tail verbatim.
            expanded.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let name = &reference[..close];
        let value = std::env::var(name).map_err(|_| {
            format!("config references ${{{name}}}, but it is not set in the environment")
        })?;
        expanded.push_str(&value);
        rest = &reference[close + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

pub mod serde_helpers {
    use super::expand_env_string;
    use serde::{Deserialize, Deserializer};

    /// Deserialize a `String` field, expanding `${VAR}` references.
    ///
    /// # Errors
    ///
    /// Fails when a referenced variable is missing.
    pub fn deserialize_string_env<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as DeError;
        let raw = String::deserialize(deserializer)?;
        expand_env_string(&raw).map_err(D::Error::custom)
    }

    /// Deserialize an `Option<String>` field, expanding `${VAR}` references
    /// when present.
    ///
    /// # Errors
    ///
    /// Fails when a referenced variable is missing.
    pub fn deserialize_option_string_env<'de, D>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as DeError;
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => expand_env_string(&raw).map(Some).map_err(D::Error::custom),
        }
    }

    /// Deserialize an `Option<u64>` field that accepts a bare number or a
    /// string (possibly a `${VAR}` reference that expands to one), so
    /// timeouts and TTLs can be deferred to the deployment environment.
    ///
    /// # Errors
    ///
    /// Fails on non-numeric/non-string input, on a missing referenced
    /// variable, or when the expanded text is not an unsigned integer.
    pub fn deserialize_option_u64_env<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as DeError;

        match Option::<serde_json::Value>::deserialize(deserializer)? {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Number(n)) => match n.as_u64() {
                Some(n) => Ok(Some(n)),
                None => Err(D::Error::custom(format!(
                    "expected an unsigned integer, got {n}"
                ))),
            },
            Some(serde_json::Value::String(raw)) => {
                let expanded = expand_env_string(&raw).map_err(D::Error::custom)?;
                expanded.trim().parse::<u64>().map(Some).map_err(|e| {
                    D::Error::custom(format!(
                        "expected an unsigned integer, got '{}': {e}",
                        expanded.trim()
                    ))
                })
            }
            Some(other) => Err(D::Error::custom(format!(
                "expected an unsigned integer or string, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{expand_env_string, positive_u64};

    #[test]
    fn expand_passes_through_plain_strings() {
        assert_eq!(
            expand_env_string("redis://localhost").as_deref(),
            Ok("redis://localhost")
        );
    }

    #[test]
    fn expand_replaces_known_vars() {
        const VAR: &str = "PORTICO_ENV_TEST_EXPAND";
        // SAFETY: unique var name, removed before the test returns.
        unsafe {
            std::env::set_var(VAR, "s3cr3t");
        }
        let out = expand_env_string(&format!("redis://:${{{VAR}}}@host")).expect("expansion");
        assert_eq!(out, "redis://:s3cr3t@host");
        // SAFETY: clean up the process environment after the test.
        unsafe {
            std::env::remove_var(VAR);
        }
    }

    #[test]
    fn expand_errors_on_missing_var() {
        let err = expand_env_string("${PORTICO_ENV_TEST_DEFINITELY_MISSING}")
            .expect_err("must fail");
        assert!(err.contains("PORTICO_ENV_TEST_DEFINITELY_MISSING"), "{err}");
    }

    #[test]
    fn unterminated_reference_is_kept_verbatim() {
        assert_eq!(expand_env_string("tail ${oops").as_deref(), Ok("tail ${oops"));
    }

    #[test]
    fn positive_u64_rejects_zero() {
        const VAR: &str = "PORTICO_ENV_TEST_ZERO";
        // SAFETY: unique var name, removed before the test returns.
        unsafe {
            std::env::set_var(VAR, "0");
        }
        assert_eq!(positive_u64(VAR), None);
        // SAFETY: clean up the process environment after the test.
        unsafe {
            std::env::remove_var(VAR);
        }
    }
}
