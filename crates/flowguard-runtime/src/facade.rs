//! Cache-first fetch through a circuit breaker.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use flowguard_core::{CallContext, PutOptions};

use crate::breaker::{CircuitBreaker, ExecuteError};
use crate::cache::ExpiringCache;

/// A cache paired with the breaker protecting its origin.
///
/// Cloning shares both.
pub struct GuardedCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache: Arc<ExpiringCache<K, V>>,
    breaker: Arc<CircuitBreaker>,
}

impl<K, V> GuardedCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cache: Arc<ExpiringCache<K, V>>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { cache, breaker }
    }

    /// Return the cached value for `key`, or load it through the breaker.
    ///
    /// A loaded value is stored with `options` before it is returned. A
    /// failed or rejected load caches nothing.
    pub async fn fetch<E, F, Fut>(
        &self,
        key: K,
        context: &CallContext,
        options: PutOptions,
        operation: F,
    ) -> Result<V, ExecuteError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let value = self.breaker.execute(context, operation).await?;
        self.cache.put(key, value.clone(), options);
        Ok(value)
    }

    pub fn cache(&self) -> &ExpiringCache<K, V> {
        &self.cache
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl<K, V> Clone for GuardedCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            breaker: Arc::clone(&self.breaker),
        }
    }
}
