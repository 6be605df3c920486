//! The application's resilience components built from one config.

use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;

use flowguard_core::{CacheProfile, ResilienceConfig};

use crate::breaker::CircuitBreaker;
use crate::cache::ExpiringCache;
use crate::facade::GuardedCache;
use crate::timer::{SharedTimer, TokioTimer};
use crate::RuntimeError;

/// Video cache, image cache and the API breaker, sharing one timer source.
pub struct ResilienceSuite<V>
where
    V: Clone + Send + Sync + 'static,
{
    config: ResilienceConfig,
    video_cache: Arc<ExpiringCache<String, V>>,
    image_cache: Arc<ExpiringCache<String, V>>,
    api_breaker: Arc<CircuitBreaker>,
}

impl<V> ResilienceSuite<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn builder() -> ResilienceSuiteBuilder<V> {
        ResilienceSuiteBuilder::new()
    }

    /// Video cache guarded by the API breaker.
    pub fn videos(&self) -> GuardedCache<String, V> {
        GuardedCache::new(Arc::clone(&self.video_cache), Arc::clone(&self.api_breaker))
    }

    /// Image cache guarded by the API breaker.
    pub fn images(&self) -> GuardedCache<String, V> {
        GuardedCache::new(Arc::clone(&self.image_cache), Arc::clone(&self.api_breaker))
    }

    /// Store a video under its profile key.
    pub fn cache_video(&self, id: impl Display, data: V) {
        let profile = CacheProfile::Video;
        self.video_cache
            .put(profile.key_for(id), data, profile.put_options());
    }

    pub fn get_video(&self, id: impl Display) -> Option<V> {
        self.video_cache.get(&CacheProfile::Video.key_for(id))
    }

    /// Store an image under its profile key.
    pub fn cache_image(&self, id: impl Display, data: V) {
        let profile = CacheProfile::Image;
        self.image_cache
            .put(profile.key_for(id), data, profile.put_options());
    }

    pub fn get_image(&self, id: impl Display) -> Option<V> {
        self.image_cache.get(&CacheProfile::Image.key_for(id))
    }

    pub fn video_cache(&self) -> &ExpiringCache<String, V> {
        &self.video_cache
    }

    pub fn image_cache(&self) -> &ExpiringCache<String, V> {
        &self.image_cache
    }

    pub fn api_breaker(&self) -> &CircuitBreaker {
        &self.api_breaker
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Destroy both caches. Safe to call more than once.
    pub fn shutdown(&self) {
        self.video_cache.destroy();
        self.image_cache.destroy();
        tracing::info!("Resilience suite shut down");
    }
}

/// Builder for ResilienceSuite.
pub struct ResilienceSuiteBuilder<V> {
    config: ResilienceConfig,
    timer: Option<SharedTimer>,
    _values: PhantomData<fn() -> V>,
}

impl<V> ResilienceSuiteBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
            timer: None,
            _values: PhantomData,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the timer source. Defaults to the current Tokio runtime.
    pub fn timer(mut self, timer: SharedTimer) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Build the suite.
    pub fn build(self) -> Result<ResilienceSuite<V>, RuntimeError> {
        let timer: SharedTimer = match self.timer {
            Some(timer) => timer,
            None => Arc::new(TokioTimer::new()?),
        };

        let config = self.config;
        let video_cache = ExpiringCache::named(
            CacheProfile::Video.to_string(),
            config.video_cache.clone(),
            Arc::clone(&timer),
        )?;
        let image_cache = ExpiringCache::named(
            CacheProfile::Image.to_string(),
            config.image_cache.clone(),
            Arc::clone(&timer),
        )?;
        let api_breaker = CircuitBreaker::named("api", config.api_breaker.clone(), timer)?;

        tracing::debug!(
            video_max_size = config.video_cache.max_size,
            image_max_size = config.image_cache.max_size,
            failure_threshold = config.api_breaker.failure_threshold,
            "Resilience suite built"
        );

        Ok(ResilienceSuite {
            config,
            video_cache: Arc::new(video_cache),
            image_cache: Arc::new(image_cache),
            api_breaker: Arc::new(api_breaker),
        })
    }
}

impl<V> Default for ResilienceSuiteBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
