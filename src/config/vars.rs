//! Environment variable interpolation for job files.
//!
//! - `$VAR` / `${VAR}`: value of VAR, error when unset
//! - `${VAR:-default}`: default when VAR is unset or empty
//! - `${VAR-default}`: default only when VAR is unset
//! - `$$`: a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

use crate::error::{ConfigError, EnvInterpolationSnafu};

static VAR_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        | \$\{ (?P<braced>[A-Za-z_][A-Za-z0-9_]*) (?: (?P<op>:?-) (?P<default>[^}]*) )? \}
        | \$ (?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("variable reference pattern is valid")
});

/// Substitute every variable reference in `input`.
///
/// All unresolved references are reported together in one error.
pub fn interpolate(input: &str) -> Result<String, ConfigError> {
    let mut problems = Vec::new();

    let output = VAR_REFERENCE.replace_all(input, |caps: &Captures| {
        let whole = &caps[0];
        if whole == "$$" {
            return "$".to_string();
        }
        match substitute(caps) {
            Ok(value) => value,
            Err(problem) => {
                problems.push(problem);
                whole.to_string()
            }
        }
    });

    if problems.is_empty() {
        Ok(output.into_owned())
    } else {
        EnvInterpolationSnafu {
            message: problems.join("\n"),
        }
        .fail()
    }
}

fn substitute(caps: &Captures) -> Result<String, String> {
    let name = caps
        .name("braced")
        .or_else(|| caps.name("bare"))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let op = caps.name("op").map(|m| m.as_str());
    let default = caps.name("default").map(|m| m.as_str());

    match (env::var(name), default) {
        (Ok(value), _) if value.contains(['\n', '\r']) => Err(format!(
            "environment variable '{name}' contains newlines, which is not allowed"
        )),
        (Ok(value), Some(default)) if value.is_empty() && op == Some(":-") => {
            Ok(default.to_string())
        }
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_string()),
        (Err(_), None) => Err(format!("environment variable '{name}' is not set")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_env<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let saved: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();
        // SAFETY: each test uses distinct variable names and restores them afterwards
        for (key, value) in vars {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }
        let result = f();
        for (key, value) in saved {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }
        result
    }

    #[test]
    fn test_bare_and_braced() {
        with_env(&[("GLACIER_T_HOST", Some("es0"))], || {
            assert_eq!(
                interpolate("a: $GLACIER_T_HOST b: ${GLACIER_T_HOST}").unwrap(),
                "a: es0 b: es0"
            );
        });
    }

    #[test]
    fn test_defaults() {
        with_env(
            &[("GLACIER_T_UNSET", None), ("GLACIER_T_EMPTY", Some(""))],
            || {
                assert_eq!(interpolate("${GLACIER_T_UNSET:-9200}").unwrap(), "9200");
                assert_eq!(interpolate("${GLACIER_T_UNSET-9200}").unwrap(), "9200");
                assert_eq!(interpolate("${GLACIER_T_EMPTY:-9200}").unwrap(), "9200");
                assert_eq!(interpolate("[${GLACIER_T_EMPTY-9200}]").unwrap(), "[]");
            },
        );
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        with_env(
            &[("GLACIER_T_MISS_A", None), ("GLACIER_T_MISS_B", None)],
            || {
                let err = interpolate("$GLACIER_T_MISS_A / ${GLACIER_T_MISS_B}").unwrap_err();
                let message = err.to_string();
                assert!(message.contains("GLACIER_T_MISS_A"));
                assert!(message.contains("GLACIER_T_MISS_B"));
            },
        );
    }

    #[test]
    fn test_escape() {
        assert_eq!(interpolate("cost: $$5").unwrap(), "cost: $5");
    }

    #[test]
    fn test_newlines_rejected() {
        with_env(&[("GLACIER_T_NL", Some("a\nb"))], || {
            let err = interpolate("x: $GLACIER_T_NL").unwrap_err();
            assert!(err.to_string().contains("newlines"));
        });
    }
}
