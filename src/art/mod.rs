//! Album art resolution.
//!
//! `resolve(artist, title)` answers from the session cache when it can;
//! otherwise the request goes to a small pool of worker threads that walk the
//! provider chain, download the image, re-encode it and register it with the
//! presentation layer. Concurrent requests for the same key share one fetch.
//! Failed lookups are not cached, so a later request tries the network again.

use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

mod cache;
pub mod http;
pub mod providers;
mod registry;
mod transcode;

pub use cache::{ArtCache, ArtKey};
pub use http::{HttpClient, UreqClient};
pub use providers::{default_providers, ArtProvider, DeezerProvider, ItunesProvider};
pub use registry::{
    handoff, ArtHandle, EncodedImage, HandoffRegistrar, ImageRegistrar, MemoryRegistry, RegistrationInbox,
    RegistrationRequest,
};
pub use transcode::transcode_to_png;

/// Everything that can go wrong while resolving art. None of it is fatal:
/// the resolver turns every error into a `None` delivery.
#[derive(Debug, thiserror::Error)]
pub enum ArtError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("no results")]
    NoResults,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("all providers failed")]
    Exhausted,
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("image registration failed: {0}")]
    Registration(String),
    #[error("image registration timed out after {0:?}")]
    RegistrationTimeout(Duration),
    #[error("art worker pool is shut down")]
    PoolClosed,
}

/// Called exactly once per `resolve()` with the handle or `None`.
pub type ArtCallback = Box<dyn FnOnce(Option<ArtHandle>) + Send + 'static>;

#[derive(Clone, Debug)]
pub struct ResolverSettings {
    pub workers: usize,
    pub provider_timeout: Duration,
    pub image_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            provider_timeout: Duration::from_secs(5),
            image_timeout: Duration::from_secs(10),
        }
    }
}

struct Job {
    key: ArtKey,
    artist: String,
    title: String,
}

struct Shared {
    cache: ArtCache,
    /// Keys with a fetch underway, and everyone waiting on it
    in_flight: Mutex<HashMap<ArtKey, Vec<ArtCallback>>>,
    http: Arc<dyn HttpClient>,
    providers: Vec<Box<dyn ArtProvider>>,
    registrar: Arc<dyn ImageRegistrar>,
    settings: ResolverSettings,
    closed: AtomicBool,
}

pub struct ArtResolver {
    shared: Arc<Shared>,
    jobs: Mutex<Option<Sender<Job>>>,
}

impl ArtResolver {
    pub fn new(
        settings: ResolverSettings,
        http: Arc<dyn HttpClient>,
        providers: Vec<Box<dyn ArtProvider>>,
        registrar: Arc<dyn ImageRegistrar>,
    ) -> io::Result<Self> {
        let workers = settings.workers.max(1);
        let shared = Arc::new(Shared {
            cache: ArtCache::new(),
            in_flight: Mutex::new(HashMap::new()),
            http,
            providers,
            registrar,
            settings,
            closed: AtomicBool::new(false),
        });

        let (tx, rx) = unbounded::<Job>();
        for i in 0..workers {
            let rx = rx.clone();
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("art-fetch-{}", i))
                .spawn(move || worker_loop(shared, rx))?;
        }
        tracing::debug!("[Art] Started {} fetch worker(s)", workers);

        Ok(Self {
            shared,
            jobs: Mutex::new(Some(tx)),
        })
    }

    /// Production wiring: ureq transport, iTunes then Deezer.
    pub fn with_defaults(settings: ResolverSettings, registrar: Arc<dyn ImageRegistrar>) -> io::Result<Self> {
        let http = Arc::new(UreqClient::new(settings.provider_timeout));
        Self::new(settings, http, default_providers(), registrar)
    }

    /// Resolves art for `(artist, title)` and calls `on_done` exactly once.
    ///
    /// A cache hit calls back synchronously on the caller's thread. A key that
    /// is already being fetched joins that fetch instead of starting another.
    /// A panicking callback is logged and swallowed wherever it runs.
    pub fn resolve<F>(&self, artist: &str, title: &str, on_done: F)
    where
        F: FnOnce(Option<ArtHandle>) + Send + 'static,
    {
        let callback: ArtCallback = Box::new(on_done);
        if artist.trim().is_empty() || title.trim().is_empty() {
            deliver(callback, None);
            return;
        }

        let key = ArtKey::new(artist, title);
        if let Some(handle) = self.shared.cache.get(&key) {
            deliver(callback, Some(handle));
            return;
        }

        {
            let mut in_flight = self.shared.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

            // A worker may have finished between the fast path and taking the lock
            if let Some(handle) = self.shared.cache.get(&key) {
                drop(in_flight);
                deliver(callback, Some(handle));
                return;
            }

            if let Some(waiters) = in_flight.get_mut(&key) {
                tracing::debug!("[Art] Joining in-flight fetch for '{}'", key);
                waiters.push(callback);
                return;
            }

            in_flight.insert(key.clone(), vec![callback]);
        }

        let job = Job {
            key: key.clone(),
            artist: artist.to_string(),
            title: title.to_string(),
        };

        let sent = {
            let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
            match jobs.as_ref() {
                Some(tx) => tx.send(job).is_ok(),
                None => false,
            }
        };

        if !sent {
            tracing::debug!("[Art] {} ('{}')", ArtError::PoolClosed, key);
            self.shared.finish(&key, None);
        }
    }

    /// Channel flavoured [`ArtResolver::resolve`].
    pub fn resolve_channel(&self, artist: &str, title: &str) -> Receiver<Option<ArtHandle>> {
        let (tx, rx) = bounded(1);
        self.resolve(artist, title, move |handle| {
            let _ = tx.send(handle);
        });
        rx
    }

    pub fn cached(&self, artist: &str, title: &str) -> Option<ArtHandle> {
        self.shared.cache.get(&ArtKey::new(artist, title))
    }

    pub fn cache_len(&self) -> usize {
        self.shared.cache.len()
    }

    /// Forgets every resolved handle. In-flight fetches still complete and
    /// repopulate their own key.
    pub fn clear_cache(&self) {
        let dropped = self.shared.cache.len();
        self.shared.cache.clear();
        tracing::info!("[Art] Cache cleared ({} entries)", dropped);
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Stops accepting work. Workers exit after their current job; jobs still
    /// queued are answered with `None` without touching the network.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if self.jobs.lock().unwrap_or_else(PoisonError::into_inner).take().is_some() {
            tracing::debug!("[Art] Worker pool shutting down");
        }
    }
}

impl Drop for ArtResolver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>, rx: Receiver<Job>) {
    for job in rx.iter() {
        if shared.closed.load(Ordering::SeqCst) {
            shared.finish(&job.key, None);
            continue;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| shared.fetch(&job)))
            .unwrap_or_else(|_| Err(ArtError::Decode("panic while fetching art".into())));

        let handle = match outcome {
            Ok(handle) => {
                tracing::debug!("[Art] Resolved '{}' -> #{}", job.key, handle.id());
                Some(handle)
            }
            Err(e) => {
                tracing::debug!("[Art] No art for '{}': {}", job.key, e);
                None
            }
        };
        shared.finish(&job.key, handle);
    }
}

impl Shared {
    fn fetch(&self, job: &Job) -> Result<ArtHandle, ArtError> {
        let url = self
            .providers
            .iter()
            .find_map(|provider| {
                match provider.lookup(self.http.as_ref(), &job.artist, &job.title, self.settings.provider_timeout) {
                    Ok(url) => Some(url),
                    Err(e) => {
                        tracing::debug!("[Art] {} failed for '{}': {}", provider.name(), job.key, e);
                        None
                    }
                }
            })
            .ok_or(ArtError::Exhausted)?;

        let bytes = self.http.get(&url, self.settings.image_timeout)?;
        let image = transcode_to_png(&bytes)?;
        self.registrar.register(image)
    }

    /// Publishes the outcome: the cache is written before the in-flight entry
    /// is removed (both under the in-flight lock), then every waiter is called.
    fn finish(&self, key: &ArtKey, handle: Option<ArtHandle>) {
        let waiters = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(handle) = handle {
                self.cache.insert(key.clone(), handle);
            }
            in_flight.remove(key).unwrap_or_default()
        };

        for waiter in waiters {
            deliver(waiter, handle);
        }
    }
}

/// Runs one callback, keeping a panic inside it away from the caller (and
/// from the other waiters of the same key).
fn deliver(callback: ArtCallback, handle: Option<ArtHandle>) {
    if panic::catch_unwind(AssertUnwindSafe(move || callback(handle))).is_err() {
        tracing::warn!("[Art] Result callback panicked; ignoring");
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    struct FailingRegistrar;

    impl ImageRegistrar for FailingRegistrar {
        fn register(&self, _image: EncodedImage) -> Result<ArtHandle, ArtError> {
            Err(ArtError::Registration("no texture slots".into()))
        }
    }

    #[test]
    fn test_resolves_and_caches() {
        let http = Arc::new(MockHttp::happy());
        let registry = Arc::new(MemoryRegistry::new());
        let resolver = resolver_with(http.clone(), registry.clone());

        let handle = resolver.resolve_channel("Artist", "Title").recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(resolver.cached("Artist", "Title"), Some(handle));
        assert_eq!(http.count(UPGRADED_URL), 1);
        assert_eq!(registry.get(handle).unwrap().width, 4);

        // Second call is served from the cache without touching the network
        let calls_before = http.calls.lock().unwrap().len();
        let again = resolver.resolve_channel("Artist", "Title").recv_timeout(WAIT).unwrap();
        assert_eq!(again, Some(handle));
        assert_eq!(http.calls.lock().unwrap().len(), calls_before);
    }

    #[test]
    fn test_lookups_and_download_use_their_own_timeouts() {
        let http = Arc::new(MockHttp::happy());
        let resolver = resolver_with(http.clone(), Arc::new(MemoryRegistry::new()));
        assert!(resolver.resolve_channel("A", "T").recv_timeout(WAIT).unwrap().is_some());

        assert_eq!(http.timeouts("https://itunes.apple.com"), vec![Duration::from_secs(5)]);
        assert_eq!(http.timeouts(UPGRADED_URL), vec![Duration::from_secs(10)]);

        // Fallback lookups get the provider timeout too
        let http = Arc::new(
            MockHttp::new()
                .route("https://itunes.apple.com", Reply::Status(500))
                .route(
                    "https://api.deezer.com",
                    Reply::Body(br#"{"data":[{"album":{"cover_medium":"https://art.test/d.jpg"}}]}"#.to_vec()),
                )
                .route("https://art.test/", Reply::Body(super::transcode::sample_jpeg(2, 2))),
        );
        let settings = ResolverSettings {
            provider_timeout: Duration::from_millis(1500),
            image_timeout: Duration::from_millis(2500),
            ..ResolverSettings::default()
        };
        let resolver = resolver_with_settings(settings, http.clone(), Arc::new(MemoryRegistry::new()));
        assert!(resolver.resolve_channel("A", "T").recv_timeout(WAIT).unwrap().is_some());

        assert_eq!(http.timeouts("https://itunes.apple.com"), vec![Duration::from_millis(1500)]);
        assert_eq!(http.timeouts("https://api.deezer.com"), vec![Duration::from_millis(1500)]);
        assert_eq!(http.timeouts("https://art.test/d.jpg"), vec![Duration::from_millis(2500)]);
    }

    #[test]
    fn test_panicking_callback_does_not_break_waiters_or_pool() {
        let settings = ResolverSettings {
            workers: 1,
            ..ResolverSettings::default()
        };
        let http = Arc::new(MockHttp::happy().delay(Duration::from_millis(100)));
        let resolver = resolver_with_settings(settings, http.clone(), Arc::new(MemoryRegistry::new()));

        resolver.resolve("A", "T", |_| panic!("consumer blew up"));
        let joined = resolver.resolve_channel("A", "T");

        // The other waiter on the same key still gets its answer
        let handle = joined.recv_timeout(WAIT).unwrap();
        assert!(handle.is_some());

        // The single worker is still alive for new keys
        assert!(resolver.resolve_channel("B", "U").recv_timeout(WAIT).unwrap().is_some());

        // Cache-hit callbacks run on the calling thread and are guarded too
        resolver.resolve("A", "T", |_| panic!("consumer blew up again"));
        assert_eq!(resolver.resolve_channel("A", "T").recv_timeout(WAIT).unwrap(), handle);
        assert_eq!(http.count("https://itunes.apple.com"), 2);
    }

    #[test]
    fn test_concurrent_requests_share_one_fetch() {
        let http = Arc::new(MockHttp::happy().delay(Duration::from_millis(100)));
        let resolver = resolver_with(http.clone(), Arc::new(MemoryRegistry::new()));

        let first = resolver.resolve_channel("Artist", "Title");
        let second = resolver.resolve_channel("Artist", "Title");

        let a = first.recv_timeout(WAIT).unwrap();
        let b = second.recv_timeout(WAIT).unwrap();
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(http.count("https://itunes.apple.com"), 1);
        assert_eq!(http.count("https://art.test/"), 1);
        assert_eq!(resolver.in_flight(), 0);
    }

    #[test]
    fn test_falls_back_to_second_provider() {
        let http = Arc::new(
            MockHttp::new()
                .route("https://itunes.apple.com", Reply::Body(br#"{"resultCount":0,"results":[]}"#.to_vec()))
                .route(
                    "https://api.deezer.com",
                    Reply::Body(br#"{"data":[{"album":{"cover_medium":"https://art.test/deezer.jpg"}}]}"#.to_vec()),
                )
                .route("https://art.test/", Reply::Body(super::transcode::sample_jpeg(2, 2))),
        );
        let resolver = resolver_with(http.clone(), Arc::new(MemoryRegistry::new()));

        let handle = resolver.resolve_channel("A", "T").recv_timeout(WAIT).unwrap();
        assert!(handle.is_some());
        assert_eq!(http.count("https://itunes.apple.com"), 1);
        assert_eq!(http.count("https://api.deezer.com"), 1);
        assert_eq!(http.count("https://art.test/deezer.jpg"), 1);
    }

    #[test]
    fn test_total_failure_is_not_cached() {
        let http = Arc::new(
            MockHttp::new()
                .route("https://itunes.apple.com", Reply::Status(503))
                .route("https://api.deezer.com", Reply::Body(br#"{"data":[]}"#.to_vec())),
        );
        let resolver = resolver_with(http.clone(), Arc::new(MemoryRegistry::new()));

        assert_eq!(resolver.resolve_channel("A", "T").recv_timeout(WAIT).unwrap(), None);
        assert_eq!(resolver.cache_len(), 0);
        assert_eq!(http.count("https://api.deezer.com"), 1);

        // Retrying goes back to the network
        assert_eq!(resolver.resolve_channel("A", "T").recv_timeout(WAIT).unwrap(), None);
        assert_eq!(http.count("https://itunes.apple.com"), 2);
        assert_eq!(http.count("https://api.deezer.com"), 2);
    }

    #[test]
    fn test_bad_image_and_failed_registration_yield_none() {
        let http = Arc::new(
            MockHttp::new()
                .route("https://itunes.apple.com", Reply::Body(itunes_body(ARTWORK_URL)))
                .route("https://art.test/", Reply::Body(b"<html>not found</html>".to_vec())),
        );
        let resolver = resolver_with(http, Arc::new(MemoryRegistry::new()));
        assert_eq!(resolver.resolve_channel("A", "T").recv_timeout(WAIT).unwrap(), None);

        let resolver = resolver_with(Arc::new(MockHttp::happy()), Arc::new(FailingRegistrar));
        assert_eq!(resolver.resolve_channel("A", "T").recv_timeout(WAIT).unwrap(), None);
        assert_eq!(resolver.cache_len(), 0);
    }

    #[test]
    fn test_blank_input_short_circuits() {
        let http = Arc::new(MockHttp::happy());
        let resolver = resolver_with(http.clone(), Arc::new(MemoryRegistry::new()));
        assert_eq!(resolver.resolve_channel("", "T").recv_timeout(WAIT).unwrap(), None);
        assert_eq!(resolver.resolve_channel("A", "  ").recv_timeout(WAIT).unwrap(), None);
        assert!(http.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_pool_caps_parallel_fetches() {
        let http = Arc::new(MockHttp::happy().delay(Duration::from_millis(50)));
        let resolver = resolver_with(http.clone(), Arc::new(MemoryRegistry::new()));

        let receivers: Vec<_> = (0..6)
            .map(|i| resolver.resolve_channel("Artist", &format!("Title {}", i)))
            .collect();
        for rx in receivers {
            assert!(rx.recv_timeout(WAIT).unwrap().is_some());
        }
        assert!(http.max_parallel.load(std::sync::atomic::Ordering::SeqCst) <= 2);
        assert_eq!(resolver.cache_len(), 6);
    }

    #[test]
    fn test_clear_cache_forces_refetch() {
        let http = Arc::new(MockHttp::happy());
        let resolver = resolver_with(http.clone(), Arc::new(MemoryRegistry::new()));
        resolver.resolve_channel("A", "T").recv_timeout(WAIT).unwrap();
        resolver.clear_cache();
        assert_eq!(resolver.cached("A", "T"), None);
        resolver.resolve_channel("A", "T").recv_timeout(WAIT).unwrap();
        assert_eq!(http.count("https://itunes.apple.com"), 2);
    }

    #[test]
    fn test_after_shutdown_delivers_none() {
        let resolver = resolver_with(Arc::new(MockHttp::happy()), Arc::new(MemoryRegistry::new()));
        resolver.shutdown();
        assert_eq!(resolver.resolve_channel("A", "T").recv_timeout(WAIT).unwrap(), None);
        assert_eq!(resolver.in_flight(), 0);
    }
}
