//! Wires config, detector, resolver and poller into one running session.

use std::io;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver};

use crate::art::{default_providers, ArtResolver, HttpClient, ImageRegistrar, UreqClient};
use crate::config::Config;
use crate::media::{MediaDetector, MediaInfo, PlatformDetector};
use crate::poller::{MediaEvent, NowPlaying, Poller, PollerHandle};

pub struct AppContext {
    pub config: Config,
    pub now_playing: NowPlaying,
    pub detector_name: &'static str,
    resolver: Option<Arc<ArtResolver>>,
    poller: PollerHandle,
}

impl AppContext {
    /// Starts polling with the host's detector and the real art providers.
    pub fn start(config: Config, registrar: Arc<dyn ImageRegistrar>) -> io::Result<(Self, Receiver<MediaEvent>)> {
        let detector = PlatformDetector::for_host(config.detect_timeout());
        let http: Arc<dyn HttpClient> = Arc::new(UreqClient::new(config.resolver_settings().provider_timeout));
        Self::start_with(config, detector, http, registrar)
    }

    pub fn start_with<D: MediaDetector + 'static>(
        config: Config,
        detector: D,
        http: Arc<dyn HttpClient>,
        registrar: Arc<dyn ImageRegistrar>,
    ) -> io::Result<(Self, Receiver<MediaEvent>)> {
        let resolver = if config.show_album_art {
            Some(Arc::new(ArtResolver::new(
                config.resolver_settings(),
                http,
                default_providers(),
                registrar,
            )?))
        } else {
            tracing::info!("[Context] Album art disabled");
            None
        };

        let (tx, rx) = unbounded();
        let now_playing = NowPlaying::new();
        let detector_name = detector.name();
        let poller = Poller::new(detector, now_playing.clone(), resolver.clone(), tx).spawn(config.polling_interval())?;

        Ok((
            Self {
                config,
                now_playing,
                detector_name,
                resolver,
                poller,
            },
            rx,
        ))
    }

    pub fn current(&self) -> Option<MediaInfo> {
        self.now_playing.current()
    }

    pub fn resolver(&self) -> Option<&Arc<ArtResolver>> {
        self.resolver.as_ref()
    }

    pub fn reset_art_cache(&self) {
        match &self.resolver {
            Some(resolver) => resolver.clear_cache(),
            None => tracing::debug!("[Context] No art cache to reset"),
        }
    }

    /// Stops the poller first so nothing new reaches the resolver, then the
    /// art pool.
    pub fn shutdown(mut self) {
        self.poller.stop();
        if let Some(resolver) = self.resolver.take() {
            resolver.shutdown();
        }
        tracing::info!("[Context] Shut down");
    }
}
