//! A single-slot token cache with at most one refresh in flight

use std::{error, future::Future, sync::Arc, time::Duration};

use arc_swap::ArcSwapOption;
use conjur_clock::{Clock, System};
use tokio::sync::Mutex;

use crate::{AccessToken, RefreshTimer};

/// The observable state of a [`TokenCache`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    /// No usable token is cached
    Empty,
    /// A token is cached and its timer has not fired
    Valid,
    /// A caller holds the gate and may be fetching a new token
    Acquiring,
}

#[derive(Debug)]
struct Slot {
    token: AccessToken,
    timer: RefreshTimer,
}

/// A cache holding at most one token
///
/// Readers take a lock-free fast path while the cached token's timer has not
/// fired. When it has, callers serialize on a gate: the first one through
/// fetches a new token and publishes it, and everyone queued behind it picks
/// up that same token instead of fetching again.
///
/// The blocking and asynchronous entry points share the same gate.
#[derive(Debug)]
pub struct TokenCache<C = System> {
    slot: ArcSwapOption<Slot>,
    gate: Mutex<()>,
    validity: Duration,
    clock: C,
}

impl TokenCache<System> {
    /// Constructs an empty cache whose tokens are valid for `validity`
    pub fn new(validity: Duration) -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            gate: Mutex::new(()),
            validity,
            clock: System,
        }
    }
}

impl<C> TokenCache<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenCache<D> {
        TokenCache {
            slot: self.slot,
            gate: self.gate,
            validity: self.validity,
            clock,
        }
    }

    /// How long a freshly fetched token stays valid
    #[inline]
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Clears the cached token
    ///
    /// The next caller will fetch a new token.
    pub fn invalidate(&self) {
        tracing::debug!("cached token invalidated");
        self.slot.store(None);
    }
}

impl<C: Clock> TokenCache<C> {
    /// The cached token, if it is still valid
    pub fn cached(&self) -> Option<AccessToken> {
        let slot = self.slot.load();
        match &*slot {
            Some(slot) if !slot.timer.has_fired_at(self.clock.now()) => Some(slot.token.clone()),
            _ => None,
        }
    }

    /// The current state of the cache
    pub fn state(&self) -> CacheState {
        if self.gate.try_lock().is_err() {
            CacheState::Acquiring
        } else if self.cached().is_some() {
            CacheState::Valid
        } else {
            CacheState::Empty
        }
    }

    /// How long the cached token stays valid
    ///
    /// `None` when nothing is cached or the token never expires.
    pub fn remaining(&self) -> Option<Duration> {
        let slot = self.slot.load();
        (*slot).as_ref()?.timer.remaining_at(self.clock.now())
    }

    /// Re-arms the refresh timer of the cached token to fire after `timeout`
    ///
    /// Does nothing when no token is cached.
    pub fn start_timer(&self, timeout: Duration) {
        let now = self.clock.now();
        let timer = RefreshTimer::start(now, timeout);
        let previous = self.slot.rcu(|current| {
            current.as_ref().map(|slot| {
                Arc::new(Slot {
                    token: slot.token.clone(),
                    timer,
                })
            })
        });

        if let Some(previous) = previous {
            tracing::trace!(
                timeout_ms = timeout.as_millis() as u64,
                was_remaining_ms = previous
                    .timer
                    .remaining_at(now)
                    .map(|left| left.as_millis() as u64),
                "refresh timer re-armed"
            );
        }
    }

    fn publish(&self, token: &AccessToken) {
        self.slot.store(Some(Arc::new(Slot {
            token: token.clone(),
            timer: RefreshTimer::start(self.clock.now(), self.validity),
        })));

        tracing::info!(
            validity_ms = self.validity.as_millis() as u64,
            "cached new access token"
        );
    }

    fn fetched<E>(&self, result: Result<AccessToken, E>) -> Result<AccessToken, E>
    where
        E: error::Error + 'static,
    {
        match result {
            Ok(token) => {
                self.publish(&token);
                Ok(token)
            }
            Err(error) => {
                self.slot.store(None);
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "unable to fetch access token, cache left empty"
                );
                Err(error)
            }
        }
    }

    /// Returns the cached token, or fetches one with `fetch` if none is valid
    ///
    /// At most one `fetch` runs at a time. Dropping the returned future
    /// releases the gate.
    pub async fn get_or_fetch<F, Fut, E>(&self, fetch: F) -> Result<AccessToken, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, E>>,
        E: error::Error + 'static,
    {
        if let Some(token) = self.cached() {
            tracing::trace!("using cached access token");
            return Ok(token);
        }

        let _gate = self.gate.lock().await;

        if let Some(token) = self.cached() {
            tracing::debug!("access token was refreshed while waiting");
            return Ok(token);
        }

        tracing::debug!("no valid access token cached, fetching");
        self.fetched(fetch().await)
    }

    /// Blocking variant of [`get_or_fetch()`][Self::get_or_fetch()]
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn get_or_fetch_blocking<F, E>(&self, fetch: F) -> Result<AccessToken, E>
    where
        F: FnOnce() -> Result<AccessToken, E>,
        E: error::Error + 'static,
    {
        if let Some(token) = self.cached() {
            tracing::trace!("using cached access token");
            return Ok(token);
        }

        let _gate = self.gate.blocking_lock();

        if let Some(token) = self.cached() {
            tracing::debug!("access token was refreshed while waiting");
            return Ok(token);
        }

        tracing::debug!("no valid access token cached, fetching");
        self.fetched(fetch())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Barrier,
        },
        thread,
    };

    use conjur_clock::TestClock;

    use super::*;

    const VALIDITY: Duration = Duration::from_secs(450);

    fn test_cache() -> (Arc<TokenCache<TestClock>>, TestClock) {
        let clock = TestClock::default();
        let cache = TokenCache::new(VALIDITY).with_clock(clock.clone());
        (Arc::new(cache), clock)
    }

    fn ok(token: &'static str) -> Result<AccessToken, io::Error> {
        Ok(AccessToken::from_static(token))
    }

    #[test]
    fn empty_cache_fetches() {
        let (cache, _) = test_cache();
        assert_eq!(cache.state(), CacheState::Empty);

        let token = cache.get_or_fetch_blocking(|| ok("token1")).unwrap();

        assert_eq!(token.as_str(), "token1");
        assert_eq!(cache.state(), CacheState::Valid);
    }

    #[test]
    fn valid_token_never_calls_fetch() {
        let (cache, clock) = test_cache();
        cache.get_or_fetch_blocking(|| ok("token1")).unwrap();

        clock.advance(VALIDITY - Duration::from_secs(1));
        let token = cache
            .get_or_fetch_blocking::<_, io::Error>(|| panic!("fetch must not be called"))
            .unwrap();

        assert_eq!(token.as_str(), "token1");
    }

    #[test]
    fn token_expires_with_validity() {
        let (cache, clock) = test_cache();
        cache.get_or_fetch_blocking(|| ok("token1")).unwrap();

        clock.advance(VALIDITY);
        assert_eq!(cache.state(), CacheState::Empty);

        let token = cache.get_or_fetch_blocking(|| ok("token2")).unwrap();
        assert_eq!(token.as_str(), "token2");
    }

    #[test]
    fn restarting_timer_extends_or_shortens_validity() {
        let (cache, clock) = test_cache();
        cache.get_or_fetch_blocking(|| ok("token1")).unwrap();

        cache.start_timer(Duration::from_secs(1000));
        clock.advance(VALIDITY);
        assert_eq!(cache.cached().unwrap().as_str(), "token1");

        cache.start_timer(Duration::ZERO);
        assert_eq!(cache.cached(), None);
    }

    #[test]
    fn remaining_counts_down_with_the_clock() {
        let (cache, clock) = test_cache();
        assert_eq!(cache.remaining(), None);

        cache.get_or_fetch_blocking(|| ok("token1")).unwrap();
        assert_eq!(cache.remaining(), Some(VALIDITY));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.remaining(), Some(VALIDITY - Duration::from_secs(1)));

        clock.advance(VALIDITY);
        assert_eq!(cache.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn starting_timer_on_empty_cache_does_nothing() {
        let (cache, _) = test_cache();
        cache.start_timer(Duration::from_secs(10));
        assert_eq!(cache.state(), CacheState::Empty);
    }

    #[test]
    fn invalidate_clears_token() {
        let (cache, _) = test_cache();
        cache.get_or_fetch_blocking(|| ok("token1")).unwrap();

        cache.invalidate();

        assert_eq!(cache.cached(), None);
        let token = cache.get_or_fetch_blocking(|| ok("token2")).unwrap();
        assert_eq!(token.as_str(), "token2");
    }

    #[test]
    fn failed_fetch_is_not_cached() {
        let (cache, _) = test_cache();
        let attempts = AtomicUsize::new(0);

        let err = cache
            .get_or_fetch_blocking(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "down"))
            })
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert_eq!(cache.state(), CacheState::Empty);

        let token = cache
            .get_or_fetch_blocking(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                ok("token1")
            })
            .unwrap();

        assert_eq!(token.as_str(), "token1");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_blocking_callers_fetch_once_per_expiry() {
        const CALLERS: usize = 8;

        let (cache, clock) = test_cache();
        let fetches = Arc::new(AtomicUsize::new(0));

        let run = |expected: &'static str| {
            let barrier = Arc::new(Barrier::new(CALLERS));
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    let cache = Arc::clone(&cache);
                    let fetches = Arc::clone(&fetches);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        cache
                            .get_or_fetch_blocking(|| {
                                fetches.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(10));
                                ok(expected)
                            })
                            .unwrap()
                    })
                })
                .collect();

            for handle in handles {
                assert_eq!(handle.join().unwrap().as_str(), expected);
            }
        };

        run("token1");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        run("token1");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        clock.advance(VALIDITY);
        run("token2");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn mixed_async_and_blocking_callers_fetch_once() {
        let (cache, clock) = test_cache();
        let fetches = Arc::new(AtomicUsize::new(0));

        for (round, expected) in ["token1", "token2"].into_iter().enumerate() {
            let mut tasks = Vec::new();
            for _ in 0..20 {
                let cache = Arc::clone(&cache);
                let fetches = Arc::clone(&fetches);
                tasks.push(tokio::spawn(async move {
                    cache
                        .get_or_fetch(|| async {
                            fetches.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            ok(expected)
                        })
                        .await
                        .unwrap()
                }));
            }

            let blocking_cache = Arc::clone(&cache);
            let blocking_fetches = Arc::clone(&fetches);
            let blocking = tokio::task::spawn_blocking(move || {
                blocking_cache
                    .get_or_fetch_blocking(|| {
                        blocking_fetches.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        ok(expected)
                    })
                    .unwrap()
            });

            for task in tasks {
                assert_eq!(task.await.unwrap().as_str(), expected);
            }
            assert_eq!(blocking.await.unwrap().as_str(), expected);
            assert_eq!(fetches.load(Ordering::SeqCst), round + 1);

            clock.advance(VALIDITY);
        }
    }

    #[tokio::test]
    async fn cancelled_fetch_releases_gate() {
        let (cache, _) = test_cache();

        let slow = cache.get_or_fetch(|| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ok("never")
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), slow).await;
        assert!(timed_out.is_err());

        assert_eq!(cache.state(), CacheState::Empty);
        let token = cache.get_or_fetch(|| async { ok("token1") }).await.unwrap();
        assert_eq!(token.as_str(), "token1");
    }
}
