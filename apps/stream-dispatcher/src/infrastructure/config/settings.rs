//! Dispatcher Configuration Settings
//!
//! Configuration types for the dispatch engine, loaded from environment
//! variables. Unparseable numeric values fall back to their defaults; an
//! unknown category or ordering scope name is an error.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::domain::plan::OrderingScope;
use crate::domain::streaming::Category;

/// Dispatch loop settings.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Upper bound on draining in-flight handlers of a wait-close category.
    pub shutdown_grace: Duration,
    /// Upper bound on waiting for normal handlers before after handlers run.
    pub after_barrier_timeout: Duration,
    /// Categories that drain on shutdown regardless of their registrations.
    pub wait_close_categories: BTreeSet<Category>,
    /// Events before and after handlers are ordered against.
    pub ordering_scope: OrderingScope,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(30),
            after_barrier_timeout: Duration::from_millis(30_000),
            wait_close_categories: BTreeSet::new(),
            ordering_scope: OrderingScope::Identity,
        }
    }
}

/// Resubscription backoff settings.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Initial resubscription delay.
    pub delay_initial: Duration,
    /// Maximum resubscription delay.
    pub delay_max: Duration,
    /// Delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Attempts before a category is marked degraded (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            max_attempts: 10,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Synthetic feed settings for the demo binary.
#[derive(Debug, Clone)]
pub struct DemoSettings {
    /// Pause between synthetic events.
    pub event_interval: Duration,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            event_interval: Duration::from_millis(1000),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Dispatch loop settings.
    pub dispatch: DispatchSettings,
    /// Resubscription backoff.
    pub reconnect: ReconnectSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Demo feed settings.
    pub demo: DemoSettings,
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `DISPATCH_WAIT_CLOSE_CATEGORIES` names an unknown
    /// category or `DISPATCH_ORDERING_SCOPE` an unknown scope.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if `DISPATCH_WAIT_CLOSE_CATEGORIES` names an unknown
    /// category or `DISPATCH_ORDERING_SCOPE` an unknown scope.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let dispatch = DispatchSettings {
            shutdown_grace: env.duration_secs(
                "DISPATCH_SHUTDOWN_GRACE_SECS",
                DispatchSettings::default().shutdown_grace,
            ),
            after_barrier_timeout: env.duration_millis(
                "DISPATCH_AFTER_BARRIER_TIMEOUT_MS",
                DispatchSettings::default().after_barrier_timeout,
            ),
            wait_close_categories: env.categories("DISPATCH_WAIT_CLOSE_CATEGORIES")?,
            ordering_scope: env.ordering_scope("DISPATCH_ORDERING_SCOPE")?,
        };

        let reconnect = ReconnectSettings {
            delay_initial: env.duration_millis(
                "DISPATCH_RECONNECT_DELAY_INITIAL_MS",
                ReconnectSettings::default().delay_initial,
            ),
            delay_max: env.duration_secs(
                "DISPATCH_RECONNECT_DELAY_MAX_SECS",
                ReconnectSettings::default().delay_max,
            ),
            delay_multiplier: env.parse(
                "DISPATCH_RECONNECT_DELAY_MULTIPLIER",
                ReconnectSettings::default().delay_multiplier,
            ),
            max_attempts: env.parse(
                "DISPATCH_MAX_RECONNECT_ATTEMPTS",
                ReconnectSettings::default().max_attempts,
            ),
        };

        let server = ServerSettings {
            health_port: env.parse("DISPATCH_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let demo = DemoSettings {
            event_interval: env.duration_millis(
                "DISPATCH_DEMO_EVENT_INTERVAL_MS",
                DemoSettings::default().event_interval,
            ),
        };

        Ok(Self {
            dispatch,
            reconnect,
            server,
            demo,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable holds a value that cannot be interpreted.
    #[error("invalid value '{value}' for {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn categories(&self, key: &str) -> Result<BTreeSet<Category>, ConfigError> {
        let Some(raw) = (self.lookup)(key) else {
            return Ok(BTreeSet::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| {
                Category::from_str_case_insensitive(name).ok_or_else(|| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: name.to_string(),
                })
            })
            .collect()
    }

    fn ordering_scope(&self, key: &str) -> Result<OrderingScope, ConfigError> {
        let Some(raw) = (self.lookup)(key) else {
            return Ok(OrderingScope::default());
        };
        OrderingScope::from_str_case_insensitive(&raw).ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.dispatch.shutdown_grace, Duration::from_secs(30));
        assert_eq!(config.dispatch.after_barrier_timeout, Duration::from_secs(30));
        assert!(config.dispatch.wait_close_categories.is_empty());
        assert_eq!(config.dispatch.ordering_scope, OrderingScope::Identity);
        assert_eq!(config.reconnect.delay_initial, Duration::from_millis(500));
        assert_eq!(config.reconnect.max_attempts, 10);
        assert!((config.reconnect.delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.demo.event_interval, Duration::from_secs(1));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("DISPATCH_SHUTDOWN_GRACE_SECS", "5"),
            ("DISPATCH_AFTER_BARRIER_TIMEOUT_MS", "250"),
            ("DISPATCH_MAX_RECONNECT_ATTEMPTS", "0"),
            ("DISPATCH_HEALTH_PORT", "9000"),
            ("DISPATCH_WAIT_CLOSE_CATEGORIES", "candles, Trades"),
            ("DISPATCH_ORDERING_SCOPE", "Category"),
        ])
        .unwrap();
        assert_eq!(config.dispatch.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.dispatch.after_barrier_timeout, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_attempts, 0);
        assert_eq!(config.server.health_port, 9000);
        assert_eq!(
            config.dispatch.wait_close_categories,
            BTreeSet::from([Category::Candles, Category::Trades])
        );
        assert_eq!(config.dispatch.ordering_scope, OrderingScope::Category);
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let config = config_from(&[("DISPATCH_HEALTH_PORT", "eighty")]).unwrap();
        assert_eq!(config.server.health_port, 8083);
    }

    #[test]
    fn unknown_wait_close_category_is_rejected() {
        let err = config_from(&[("DISPATCH_WAIT_CLOSE_CATEGORIES", "trades,quotes")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "DISPATCH_WAIT_CLOSE_CATEGORIES".to_string(),
                value: "quotes".to_string(),
            }
        );
    }

    #[test]
    fn unknown_ordering_scope_is_rejected() {
        let err = config_from(&[("DISPATCH_ORDERING_SCOPE", "global")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "DISPATCH_ORDERING_SCOPE".to_string(),
                value: "global".to_string(),
            }
        );
    }
}
