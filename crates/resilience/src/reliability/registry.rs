//! Named circuit breaker registry

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};

/// Process-wide set of circuit breakers keyed by upstream endpoint name
///
/// Built once at startup and shared by reference. Every caller asking for
/// the same name receives the same [`CircuitBreaker`] instance, so state
/// transitions are visible to all of them.
///
/// # Example
///
/// ```
/// use phonebill_resilience::{CircuitBreakerConfig, CircuitBreakerRegistry};
///
/// let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
/// let a = registry.breaker("kos-bill-inquiry");
/// let b = registry.breaker("kos-bill-inquiry");
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
/// ```
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry using `default_config` for new breakers
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: DashMap::new(),
        }
    }

    /// Register a breaker with its own configuration
    ///
    /// Replaces any existing breaker with the same name.
    pub fn with_breaker(self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        self.breakers
            .insert(name.clone(), Arc::new(CircuitBreaker::new(name, config)));
        self
    }

    /// Get the breaker for `name`, creating it with the default config
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = %name, "creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, self.default_config.clone()))
            })
            .clone()
    }

    /// Get an existing breaker without creating one
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    /// Names of all registered breakers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Metrics for every registered breaker, sorted by name
    pub fn metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let mut metrics: Vec<_> = self.breakers.iter().map(|e| e.value().metrics()).collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    /// Number of registered breakers
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker has been registered yet
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::reliability::CircuitState;

    #[test]
    fn test_same_name_shares_state() {
        let registry = CircuitBreakerRegistry::default();
        let first = registry.breaker("kos-product-list");
        for _ in 0..5 {
            first.allow().unwrap().failure(Duration::from_millis(1));
        }
        assert_eq!(
            registry.breaker("kos-product-list").state(),
            CircuitState::Open
        );
        assert_eq!(
            registry.breaker("kos-product-change").state(),
            CircuitState::Closed
        );
    }

    #[test]
    fn test_with_breaker_overrides_config() {
        let registry = CircuitBreakerRegistry::default().with_breaker(
            "kos-status-check",
            CircuitBreakerConfig::default().with_permitted_calls_in_half_open_state(1),
        );
        let breaker = registry.get("kos-status-check").expect("registered");
        assert_eq!(breaker.config().permitted_calls_in_half_open_state, 1);
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_names_and_metrics_sorted() {
        let registry = CircuitBreakerRegistry::default();
        registry.breaker("b");
        registry.breaker("a");
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.metrics()[0].name, "a");
        assert_eq!(registry.len(), 2);
    }
}
