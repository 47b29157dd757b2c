//! Pre-configuration: frozen environment/locale/allocator snapshot
//!
//! Parsing environment variables into a [`PreConfig`] is the one boundary
//! this crate shares with the (out-of-scope) encoding/locale decisions a
//! full interpreter would make. `initialize` reads the process environment
//! exactly once and freezes the result; every other component that cares
//! about these values reads the frozen [`PreConfig`] rather than consulting
//! the environment again. Grounded in `Python/preconfig.c`.

use crate::error::RuntimeError;
use std::collections::HashMap;

/// How `COERCECLOCALE` should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoerceCLocale {
    Disabled,
    Enabled,
    Warn,
}

/// Allocator family selected by `MALLOC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorKind {
    Default,
    Malloc,
    Debug,
}

/// Frozen snapshot of the environment/locale/allocator configuration.
///
/// Every field here is set once during [`PreConfig::from_env`] and never
/// mutated again; the struct carries no interior mutability on purpose.
#[derive(Debug, Clone, PartialEq)]
pub struct PreConfig {
    pub hashseed_raw: Option<String>,
    pub dev_mode: bool,
    pub allocator: AllocatorKind,
    pub utf8_mode: bool,
    pub coerce_c_locale: CoerceCLocale,
    pub ignore_environment: bool,
    pub isolated: bool,
    #[cfg(target_os = "windows")]
    pub legacy_windows_fs_encoding: bool,
}

impl Default for PreConfig {
    fn default() -> Self {
        Self {
            hashseed_raw: None,
            dev_mode: false,
            allocator: AllocatorKind::Default,
            utf8_mode: false,
            coerce_c_locale: CoerceCLocale::Disabled,
            ignore_environment: false,
            isolated: false,
            #[cfg(target_os = "windows")]
            legacy_windows_fs_encoding: false,
        }
    }
}

impl PreConfig {
    /// Build a [`PreConfig`] from the real process environment.
    pub fn from_env() -> Result<Self, RuntimeError> {
        Self::from_map(&std::env::vars().collect())
    }

    /// Build a [`PreConfig`] from an explicit variable map — used by tests
    /// and by embedders that don't want to touch the real environment.
    ///
    /// `ISOLATED` and `IGNOREENV` are consulted first because, per the
    /// spec, they "affect environment-variable consultation recursively":
    /// when either is set, every other variable below is treated as unset.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, RuntimeError> {
        let isolated = is_truthy(vars.get("ISOLATED"));
        let ignore_environment = isolated || is_truthy(vars.get("IGNOREENV"));

        let get = |key: &str| -> Option<&String> {
            if ignore_environment {
                None
            } else {
                vars.get(key)
            }
        };

        let hashseed_raw = get("HASHSEED").cloned();
        let dev_mode = is_truthy(get("DEVMODE"));
        let allocator = match get("MALLOC").map(String::as_str) {
            None => AllocatorKind::Default,
            Some("malloc") => AllocatorKind::Malloc,
            Some("debug") => AllocatorKind::Debug,
            Some(other) => {
                return Err(RuntimeError::user(format!(
                    "unknown MALLOC allocator {other:?}"
                )))
            }
        };
        let utf8_mode = is_truthy(get("UTF8"));
        let coerce_c_locale = match get("COERCECLOCALE").map(String::as_str) {
            None | Some("0") => CoerceCLocale::Disabled,
            Some("1") => CoerceCLocale::Enabled,
            Some("warn") => CoerceCLocale::Warn,
            Some(other) => {
                return Err(RuntimeError::user(format!(
                    "COERCECLOCALE must be '0', '1', or 'warn', got {other:?}"
                )))
            }
        };

        #[cfg(target_os = "windows")]
        let legacy_windows_fs_encoding = is_truthy(get("LEGACYWINDOWSFSENCODING"));

        Ok(Self {
            hashseed_raw,
            dev_mode,
            allocator,
            utf8_mode,
            coerce_c_locale,
            ignore_environment,
            isolated,
            #[cfg(target_os = "windows")]
            legacy_windows_fs_encoding,
        })
    }
}

fn is_truthy(value: Option<&String>) -> bool {
    matches!(value.map(String::as_str), Some("1") | Some("true") | Some("yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_conservative() {
        let cfg = PreConfig::from_map(&HashMap::new()).unwrap();
        assert_eq!(cfg, PreConfig::default());
    }

    #[test]
    fn isolated_suppresses_every_other_variable() {
        let cfg = PreConfig::from_map(&map(&[
            ("ISOLATED", "1"),
            ("DEVMODE", "1"),
            ("HASHSEED", "42"),
        ]))
        .unwrap();
        assert!(cfg.isolated);
        assert!(cfg.ignore_environment);
        assert!(!cfg.dev_mode);
        assert_eq!(cfg.hashseed_raw, None);
    }

    #[test]
    fn ignoreenv_suppresses_other_variables_but_not_itself() {
        let cfg = PreConfig::from_map(&map(&[("IGNOREENV", "1"), ("UTF8", "1")])).unwrap();
        assert!(cfg.ignore_environment);
        assert!(!cfg.utf8_mode);
    }

    #[test]
    fn coerce_c_locale_accepts_documented_values() {
        for (raw, expected) in [
            ("0", CoerceCLocale::Disabled),
            ("1", CoerceCLocale::Enabled),
            ("warn", CoerceCLocale::Warn),
        ] {
            let cfg = PreConfig::from_map(&map(&[("COERCECLOCALE", raw)])).unwrap();
            assert_eq!(cfg.coerce_c_locale, expected);
        }
    }

    #[test]
    fn coerce_c_locale_rejects_garbage() {
        let err = PreConfig::from_map(&map(&[("COERCECLOCALE", "maybe")])).unwrap_err();
        assert!(matches!(err, RuntimeError::User(_)));
    }

    #[test]
    fn malloc_rejects_unknown_allocator() {
        let err = PreConfig::from_map(&map(&[("MALLOC", "jemalloc")])).unwrap_err();
        assert!(matches!(err, RuntimeError::User(_)));
    }

    #[test]
    fn hashseed_passes_through_unvalidated() {
        // Validation/expansion happens in `crate::random`; preconfig only
        // captures the raw string.
        let cfg = PreConfig::from_map(&map(&[("HASHSEED", "not-a-number")])).unwrap();
        assert_eq!(cfg.hashseed_raw.as_deref(), Some("not-a-number"));
    }
}
