//! Coverage server configuration, loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct CoverageConfig {
    /// Maximum pooled database connections.
    pub max_connections: usize,
    /// Attempts at the project recomputation after a coverage change.
    pub cascade_attempts: u32,
    /// Delay before the first cascade retry; doubles on each further retry.
    pub cascade_backoff: Duration,
    /// Default page size for build listings.
    pub list_limit: i64,
    /// Upper bound on a requested page size.
    pub max_list_limit: i64,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            cascade_attempts: 3,
            cascade_backoff: Duration::from_millis(100),
            list_limit: 20,
            max_list_limit: 200,
        }
    }
}

impl CoverageConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let max_connections =
            parse_env(lookup("COV_DB_MAX_CONNECTIONS")).unwrap_or(defaults.max_connections);
        let mut cascade_attempts =
            parse_env(lookup("COV_CASCADE_ATTEMPTS")).unwrap_or(defaults.cascade_attempts);
        let cascade_backoff = parse_env(lookup("COV_CASCADE_BACKOFF_MS"))
            .map(Duration::from_millis)
            .unwrap_or(defaults.cascade_backoff);
        let mut list_limit = parse_env(lookup("COV_LIST_LIMIT")).unwrap_or(defaults.list_limit);
        let max_list_limit =
            parse_env(lookup("COV_MAX_LIST_LIMIT")).unwrap_or(defaults.max_list_limit);

        if cascade_attempts == 0 {
            tracing::warn!("COV_CASCADE_ATTEMPTS is 0 -- project cascade needs at least one attempt");
            cascade_attempts = 1;
        }
        if list_limit <= 0 || list_limit > max_list_limit {
            tracing::warn!(
                list_limit,
                max_list_limit,
                "COV_LIST_LIMIT out of range -- clamping"
            );
            list_limit = list_limit.clamp(1, max_list_limit.max(1));
        }

        Self {
            max_connections,
            cascade_attempts,
            cascade_backoff,
            list_limit,
            max_list_limit,
        }
    }

    /// Page size for a listing request.
    pub fn page_size(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.list_limit)
            .clamp(1, self.max_list_limit.max(1))
    }
}

fn parse_env<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> CoverageConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CoverageConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]);
        assert_eq!(cfg.max_connections, 10);
        assert_eq!(cfg.cascade_attempts, 3);
        assert_eq!(cfg.cascade_backoff, Duration::from_millis(100));
        assert_eq!(cfg.list_limit, 20);
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let cfg = config(&[
            ("COV_CASCADE_ATTEMPTS", " 5 "),
            ("COV_CASCADE_BACKOFF_MS", "250"),
            ("COV_DB_MAX_CONNECTIONS", "many"),
        ]);
        assert_eq!(cfg.cascade_attempts, 5);
        assert_eq!(cfg.cascade_backoff, Duration::from_millis(250));
        assert_eq!(cfg.max_connections, 10);
    }

    #[test]
    fn clamps_degenerate_values() {
        let cfg = config(&[("COV_CASCADE_ATTEMPTS", "0"), ("COV_LIST_LIMIT", "5000")]);
        assert_eq!(cfg.cascade_attempts, 1);
        assert_eq!(cfg.list_limit, 200);
    }

    #[test]
    fn page_size_respects_bounds() {
        let cfg = CoverageConfig::default();
        assert_eq!(cfg.page_size(None), 20);
        assert_eq!(cfg.page_size(Some(0)), 1);
        assert_eq!(cfg.page_size(Some(10_000)), 200);
    }
}
