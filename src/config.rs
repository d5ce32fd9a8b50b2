//! Runtime configuration of a [`Communicator`](crate::Communicator).
//!
//! Settings can be overridden from the environment with [`Config::from_env`]:
//!
//! | Field | Variable | Default |
//! |-------|----------|---------|
//! | `checks` | `FERROPAR_CHECKS` | on in debug builds or with the `checks` feature |
//! | `verify_collectives` | `FERROPAR_VERIFY_COLLECTIVES` | off |
//! | `perf_log` | `FERROPAR_PERF_LOG` | off |
//!
//! Accepted values are `1`, `true`, `on`, `yes` and `0`, `false`, `off`, `no`
//! (case-insensitive). Anything else leaves the field unchanged.

use std::env;

/// Environment variable controlling [`Config::checks`].
pub const CHECKS_VAR: &str = "FERROPAR_CHECKS";
/// Environment variable controlling [`Config::verify_collectives`].
pub const VERIFY_COLLECTIVES_VAR: &str = "FERROPAR_VERIFY_COLLECTIVES";
/// Environment variable controlling [`Config::perf_log`].
pub const PERF_LOG_VAR: &str = "FERROPAR_PERF_LOG";

/// Communicator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Validate ranks and alltoall divisibility before each operation.
    ///
    /// With checks off, `alltoall` silently operates on the largest prefix
    /// whose length divides evenly by the group size.
    pub checks: bool,
    /// Before every collective, check that all ranks are entering the same
    /// operation. Costs one extra reduction per collective.
    pub verify_collectives: bool,
    /// Accumulate per-operation call counts and elapsed time, reported by
    /// [`Communicator::op_stats`](crate::Communicator::op_stats).
    pub perf_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            checks: cfg!(any(debug_assertions, feature = "checks")),
            verify_collectives: false,
            perf_log: false,
        }
    }
}

impl Config {
    /// Default configuration overlaid with any `FERROPAR_*` variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|name| env::var(name).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for (name, field) in [
            (CHECKS_VAR, &mut self.checks),
            (VERIFY_COLLECTIVES_VAR, &mut self.verify_collectives),
            (PERF_LOG_VAR, &mut self.perf_log),
        ] {
            let Some(value) = lookup(name) else { continue };
            match parse_flag(&value) {
                Some(flag) => *field = flag,
                None => log::warn!("ignoring {name}={value:?}: expected a boolean flag"),
            }
        }
        self
    }

    /// Enable or disable precondition checks.
    pub fn with_checks(mut self, checks: bool) -> Self {
        self.checks = checks;
        self
    }

    /// Enable or disable collective identity verification.
    pub fn with_verify_collectives(mut self, verify: bool) -> Self {
        self.verify_collectives = verify;
        self
    }

    /// Enable or disable the aggregated performance log.
    pub fn with_perf_log(mut self, perf_log: bool) -> Self {
        self.perf_log = perf_log;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overlay(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::default().overlay(|name| vars.get(name).cloned())
    }

    #[test]
    fn parses_flags() {
        assert_eq!(parse_flag("ON"), Some(true));
        assert_eq!(parse_flag(" yes "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("False"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = overlay(&[(VERIFY_COLLECTIVES_VAR, "1"), (CHECKS_VAR, "off")]);
        assert!(config.verify_collectives);
        assert!(!config.checks);
        assert!(!config.perf_log);
    }

    #[test]
    fn unparsable_values_are_ignored() {
        let config = overlay(&[(PERF_LOG_VAR, "sometimes")]);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn builders_set_fields() {
        let config = Config::default()
            .with_checks(true)
            .with_verify_collectives(true)
            .with_perf_log(true);
        assert!(config.checks && config.verify_collectives && config.perf_log);
    }
}
