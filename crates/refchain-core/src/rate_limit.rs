//! Per-source rate limiting with adaptive governor instances and 429 retry.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};

use crate::{AdapterError, Source};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Longest single backoff between 429 retries.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Quiet period after which a slowed limiter returns to its base rate.
const DECAY_AFTER: Duration = Duration::from_secs(60);

/// Proactive per-source throttling.
///
/// Disabled by default: adapters normally enforce their own quotas. When
/// enabled, each call waits for its source's limiter before reaching the
/// adapter.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub crossref_per_second: u32,
    /// arXiv asks for one request every few seconds.
    pub arxiv_interval_secs: u64,
    pub openalex_per_second: u32,
    pub semantic_scholar_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            crossref_per_second: 1,
            arxiv_interval_secs: 3,
            openalex_per_second: 10,
            semantic_scholar_per_second: 1,
        }
    }
}

fn quota_for(period: Duration) -> Quota {
    Quota::with_period(period).unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
}

/// Per-source limiter whose rate slows down on 429 and recovers after
/// [`DECAY_AFTER`] without one.
pub struct AdaptiveLimiter {
    limiter: ArcSwap<DirectLimiter>,
    base_period: Duration,
    /// 1 = base rate, 2 = half rate, capped at 16.
    factor: AtomicU32,
    last_429: std::sync::Mutex<Option<Instant>>,
}

impl AdaptiveLimiter {
    pub fn new(period: Duration) -> Self {
        let limiter = Arc::new(DirectLimiter::direct(quota_for(period)));
        Self {
            limiter: ArcSwap::from(limiter),
            base_period: period,
            factor: AtomicU32::new(1),
            last_429: std::sync::Mutex::new(None),
        }
    }

    pub fn per_second(n: u32) -> Self {
        let ms = 1000 / n.max(1) as u64;
        Self::new(Duration::from_millis(ms.max(1)))
    }

    /// Wait until the limiter admits a request.
    pub async fn acquire(&self) {
        self.try_decay();
        let limiter = self.limiter.load_full();
        limiter.until_ready().await;
    }

    /// Current slowdown factor.
    pub fn factor(&self) -> u32 {
        self.factor.load(Ordering::SeqCst)
    }

    /// Record a 429: double the slowdown and swap in a slower governor.
    pub fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }

        let _ = self
            .factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| Some((f * 2).min(16)));

        let factor = self.factor.load(Ordering::SeqCst);
        if let Some(scaled) = self.base_period.checked_mul(factor) {
            self.limiter
                .store(Arc::new(DirectLimiter::direct(quota_for(scaled))));
        }
    }

    fn try_decay(&self) {
        let quiet = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed() >= DECAY_AFTER))
            .unwrap_or(false);

        if quiet && self.factor.load(Ordering::SeqCst) > 1 {
            self.factor.store(1, Ordering::SeqCst);
            self.limiter
                .store(Arc::new(DirectLimiter::direct(quota_for(self.base_period))));
        }
    }
}

/// The limiters for every throttled source. Empty when throttling is off.
#[derive(Default)]
pub struct RateLimiters {
    limiters: HashMap<Source, AdaptiveLimiter>,
}

impl RateLimiters {
    pub fn new(config: &RateLimitConfig) -> Self {
        let mut limiters = HashMap::new();
        if config.enabled {
            limiters.insert(
                Source::Crossref,
                AdaptiveLimiter::per_second(config.crossref_per_second),
            );
            limiters.insert(
                Source::Arxiv,
                AdaptiveLimiter::new(Duration::from_secs(config.arxiv_interval_secs.max(1))),
            );
            limiters.insert(
                Source::OpenAlex,
                AdaptiveLimiter::per_second(config.openalex_per_second),
            );
            limiters.insert(
                Source::SemanticScholar,
                AdaptiveLimiter::per_second(config.semantic_scholar_per_second),
            );
        }
        Self { limiters }
    }

    pub fn get(&self, source: Source) -> Option<&AdaptiveLimiter> {
        self.limiters.get(&source)
    }
}

impl std::fmt::Debug for RateLimiters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiters")
            .field("sources", &self.limiters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Backoff before retry number `attempt` (0-based): the server's
/// Retry-After if given, else 1s, 2s, 4s, 8s, 16s plus jitter; capped at 30s.
fn backoff(attempt: u32, retry_after: Option<Duration>) -> Duration {
    retry_after
        .unwrap_or_else(|| {
            let base_ms = 1000u64 * (1 << attempt.min(4));
            Duration::from_millis(base_ms + fastrand::u64(0..500))
        })
        .min(MAX_BACKOFF)
}

/// Run an adapter call with proactive throttling and reactive 429 retry.
///
/// 1. Acquires the source's limiter, if any
/// 2. Runs `call`
/// 3. On [`AdapterError::RateLimited`]: slows the limiter, backs off, retries
/// 4. On success or any other error: returns immediately
pub async fn call_with_retry<T, F, Fut>(
    source: Source,
    limiters: &RateLimiters,
    max_retries: u32,
    mut call: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let limiter = limiters.get(source);
    let mut attempt = 0;

    loop {
        if let Some(lim) = limiter {
            lim.acquire().await;
        }

        match call().await {
            Err(AdapterError::RateLimited { retry_after }) if attempt < max_retries => {
                if let Some(lim) = limiter {
                    lim.on_rate_limited();
                }
                let wait = backoff(attempt, retry_after);
                log::info!(
                    "{}: 429 rate limited, retry {}/{} after {:.1}s",
                    source,
                    attempt + 1,
                    max_retries,
                    wait.as_secs_f64()
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn disabled_config_has_no_limiters() {
        let limiters = RateLimiters::new(&RateLimitConfig::default());
        for source in Source::ALL {
            assert!(limiters.get(source).is_none());
        }
    }

    #[test]
    fn enabled_config_covers_every_source() {
        let config = RateLimitConfig {
            enabled: true,
            ..Default::default()
        };
        let limiters = RateLimiters::new(&config);
        for source in Source::ALL {
            assert!(limiters.get(source).is_some(), "{source} has no limiter");
        }
    }

    #[test]
    fn rate_limited_factor_doubles_and_caps() {
        let lim = AdaptiveLimiter::per_second(10);
        assert_eq!(lim.factor(), 1);
        lim.on_rate_limited();
        assert_eq!(lim.factor(), 2);
        for _ in 0..10 {
            lim.on_rate_limited();
        }
        assert_eq!(lim.factor(), 16);
    }

    #[test]
    fn backoff_honours_retry_after_and_cap() {
        assert_eq!(backoff(0, Some(Duration::from_secs(2))), Duration::from_secs(2));
        assert_eq!(backoff(0, Some(Duration::from_secs(300))), MAX_BACKOFF);
        let b = backoff(2, None);
        assert!(b >= Duration::from_secs(4) && b < Duration::from_millis(4500));
        assert!(backoff(10, None) <= MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicUsize::new(0);
        let result = call_with_retry(Source::Crossref, &RateLimiters::default(), 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AdapterError::RateLimited {
                        retry_after: Some(Duration::from_secs(1)),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> =
            call_with_retry(Source::Arxiv, &RateLimiters::default(), 2, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AdapterError::RateLimited { retry_after: None }) }
            })
            .await;
        assert!(matches!(result, Err(AdapterError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> =
            call_with_retry(Source::OpenAlex, &RateLimiters::default(), 3, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AdapterError::Transport("connection reset".into())) }
            })
            .await;
        assert_eq!(result, Err(AdapterError::Transport("connection reset".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
