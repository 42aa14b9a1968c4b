//! The periodic detection loop and the "current snapshot" it owns.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{select, tick, Receiver, Sender};

use crate::art::{ArtHandle, ArtKey, ArtResolver};
use crate::media::{MediaDetector, MediaInfo};

/// Notifications for the display layer.
#[derive(Clone, Debug)]
pub enum MediaEvent {
    /// New current snapshot, or `None` for "nothing playing"
    Changed(Option<MediaInfo>),
    /// Art lookup finished for `key`. Delivered even when the track has moved
    /// on; compare `key` with the current snapshot before using it.
    ArtResolved { key: ArtKey, handle: Option<ArtHandle> },
}

#[derive(Default)]
struct Slot {
    /// Bumped every time the current snapshot is replaced
    generation: u64,
    media: Option<MediaInfo>,
}

/// Shared view of the current snapshot. The poller is the only writer of the
/// snapshot itself; art can only be attached to the generation it was
/// requested for.
#[derive(Clone, Default)]
pub struct NowPlaying {
    slot: Arc<Mutex<Slot>>,
}

impl NowPlaying {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<MediaInfo> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).media.clone()
    }

    pub fn generation(&self) -> u64 {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).generation
    }

    fn replace(&self, media: Option<MediaInfo>) -> u64 {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.generation += 1;
        slot.media = media;
        slot.generation
    }

    /// Attaches `handle` only if `generation` is still current. Returns
    /// whether it was applied; a late result for an older track is dropped.
    pub fn attach_art(&self, generation: u64, handle: ArtHandle) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.generation != generation {
            return false;
        }
        match slot.media.as_mut() {
            Some(media) => {
                media.art = Some(handle);
                true
            }
            None => false,
        }
    }
}

/// Outcome of comparing a fresh detection with the held snapshot.
#[derive(Debug, PartialEq)]
pub enum Transition {
    Changed(Option<MediaInfo>),
    Unchanged,
}

/// Only `(title, artist)` matters; see `MediaInfo`'s `PartialEq`.
pub fn transition(previous: Option<&MediaInfo>, detected: Option<MediaInfo>) -> Transition {
    match (previous, detected) {
        (prev, Some(new)) if prev != Some(&new) => Transition::Changed(Some(new)),
        (Some(_), None) => Transition::Changed(None),
        _ => Transition::Unchanged,
    }
}

pub struct Poller<D: MediaDetector> {
    detector: D,
    now_playing: NowPlaying,
    resolver: Option<Arc<ArtResolver>>,
    events: Sender<MediaEvent>,
}

impl<D: MediaDetector + 'static> Poller<D> {
    /// `resolver: None` disables art lookups entirely.
    pub fn new(
        detector: D,
        now_playing: NowPlaying,
        resolver: Option<Arc<ArtResolver>>,
        events: Sender<MediaEvent>,
    ) -> Self {
        Self {
            detector,
            now_playing,
            resolver,
            events,
        }
    }

    /// One detection cycle: detect, diff, publish.
    pub fn tick(&mut self) {
        let detected = match panic::catch_unwind(AssertUnwindSafe(|| self.detector.detect())) {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("[Poller] {} detector panicked; treating as nothing playing", self.detector.name());
                None
            }
        };

        let previous = self.now_playing.current();
        let media = match transition(previous.as_ref(), detected) {
            Transition::Unchanged => return,
            Transition::Changed(media) => media,
        };

        let generation = self.now_playing.replace(media.clone());
        match &media {
            Some(info) => tracing::info!("[Poller] Now playing: {}", info),
            None => tracing::info!("[Poller] Nothing playing"),
        }

        // Textual update goes out first; a cache hit may answer synchronously
        let _ = self.events.send(MediaEvent::Changed(media.clone()));

        if let Some(info) = media.filter(MediaInfo::has_valid_info) {
            self.request_art(generation, &info);
        }
    }

    fn request_art(&self, generation: u64, info: &MediaInfo) {
        let (Some(resolver), Some(key)) = (self.resolver.as_ref(), info.art_key()) else {
            return;
        };
        let (Some(artist), Some(title)) = (info.artist.as_deref(), info.title.as_deref()) else {
            return;
        };

        let now_playing = self.now_playing.clone();
        let events = self.events.clone();
        resolver.resolve(artist, title, move |handle| {
            if let Some(h) = handle {
                if !now_playing.attach_art(generation, h) {
                    tracing::debug!("[Poller] Discarding late art for '{}'", key);
                }
            }
            let _ = events.send(MediaEvent::ArtResolved { key, handle });
        });
    }

    /// Runs `tick` on a dedicated thread every `interval` until the handle is
    /// stopped. Ticks never overlap; a slow tick just delays the next one.
    pub fn spawn(mut self, interval: Duration) -> io::Result<PollerHandle> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let name = self.detector.name();

        let thread = thread::Builder::new().name("media-poller".into()).spawn(move || {
            tracing::info!("[Poller] Started ({} detector, every {:?})", name, interval);
            let ticker = tick(interval);
            loop {
                self.tick();
                select! {
                    recv(ticker) -> _ => {}
                    recv(stop_rx) -> _ => break,
                }
            }
            tracing::info!("[Poller] Stopped");
        })?;

        Ok(PollerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Owns the poll thread. Dropping it stops polling.
pub struct PollerHandle {
    stop: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PollerHandle {
    /// Stops the loop and waits for the current tick to finish.
    pub fn stop(&mut self) {
        // Dropping the sender wakes the select! with a disconnect
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drains everything currently queued without blocking.
pub fn drain(events: &Receiver<MediaEvent>) -> Vec<MediaEvent> {
    events.try_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::art::testing::{resolver_with, MockHttp};
    use crate::art::MemoryRegistry;
    use crossbeam_channel::unbounded;
    use std::collections::{HashMap, VecDeque};

    const WAIT: Duration = Duration::from_secs(5);

    /// Plays back a fixed list of detection results, then reports nothing.
    struct Scripted {
        script: VecDeque<Option<MediaInfo>>,
    }

    impl Scripted {
        fn new(script: Vec<Option<MediaInfo>>) -> Self {
            Self { script: script.into() }
        }
    }

    impl MediaDetector for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn detect(&mut self) -> Option<MediaInfo> {
            self.script.pop_front().flatten()
        }
    }

    struct Panicking;

    impl MediaDetector for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn detect(&mut self) -> Option<MediaInfo> {
            panic!("window enumeration exploded");
        }
    }

    fn track(artist: &str, title: &str) -> Option<MediaInfo> {
        Some(MediaInfo::new(Some(title.into()), Some(artist.into()), "Test"))
    }

    fn changed_keys(events: &[MediaEvent]) -> Vec<Option<String>> {
        events
            .iter()
            .filter_map(|e| match e {
                MediaEvent::Changed(m) => Some(m.as_ref().map(|m| m.to_string())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_transition_table() {
        let a = track("A", "1");
        let b = track("B", "2");
        assert_eq!(transition(None, a.clone()), Transition::Changed(a.clone()));
        assert_eq!(transition(a.as_ref(), a.clone()), Transition::Unchanged);
        assert_eq!(transition(a.as_ref(), b.clone()), Transition::Changed(b.clone()));
        assert_eq!(transition(b.as_ref(), None), Transition::Changed(None));
        assert_eq!(transition(None, None), Transition::Unchanged);
    }

    #[test]
    fn test_events_only_on_change() {
        let (tx, rx) = unbounded();
        let mut source_changed = track("A", "1").unwrap();
        source_changed.source = "Other player".into();

        let detector = Scripted::new(vec![
            None,
            track("A", "1"),
            Some(source_changed),
            track("B", "2"),
            None,
            None,
        ]);
        let mut poller = Poller::new(detector, NowPlaying::new(), None, tx);
        for _ in 0..6 {
            poller.tick();
        }

        let events = drain(&rx);
        assert_eq!(
            changed_keys(&events),
            vec![
                Some("A - 1 [Test]".to_string()),
                Some("B - 2 [Test]".to_string()),
                None
            ]
        );
    }

    #[test]
    fn test_invalid_snapshot_is_published_without_art_request() {
        let (tx, rx) = unbounded();
        let http = Arc::new(MockHttp::happy());
        let resolver = Arc::new(resolver_with(http.clone(), Arc::new(MemoryRegistry::new())));
        let detector = Scripted::new(vec![Some(MediaInfo::new(Some("Lo-fi stream".into()), None, "YouTube"))]);

        let mut poller = Poller::new(detector, NowPlaying::new(), Some(resolver), tx);
        poller.tick();

        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], MediaEvent::Changed(Some(_))));
        assert!(http.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_art_is_attached_to_current_snapshot() {
        let (tx, rx) = unbounded();
        let resolver = Arc::new(resolver_with(Arc::new(MockHttp::happy()), Arc::new(MemoryRegistry::new())));
        let now_playing = NowPlaying::new();

        let mut poller = Poller::new(Scripted::new(vec![track("Artist", "Title")]), now_playing.clone(), Some(resolver), tx);
        poller.tick();

        let mut resolved = None;
        while let Ok(event) = rx.recv_timeout(WAIT) {
            if let MediaEvent::ArtResolved { key, handle } = event {
                assert_eq!(key.as_str(), "Artist|Title");
                resolved = handle;
                break;
            }
        }
        assert!(resolved.is_some());
        assert_eq!(now_playing.current().unwrap().art, resolved);
    }

    #[test]
    fn test_late_art_never_lands_on_newer_snapshot() {
        let (tx, rx) = unbounded();
        // Slow network so track A's fetch is still running when B shows up
        let http = Arc::new(MockHttp::happy().delay(Duration::from_millis(150)));
        let resolver = Arc::new(resolver_with(http, Arc::new(MemoryRegistry::new())));
        let now_playing = NowPlaying::new();

        let detector = Scripted::new(vec![track("A", "Old"), track("B", "New")]);
        let mut poller = Poller::new(detector, now_playing.clone(), Some(resolver), tx);
        poller.tick(); // A becomes current, fetch starts
        poller.tick(); // B replaces A before the fetch completes

        let mut art_for = HashMap::new();
        while art_for.len() < 2 {
            match rx.recv_timeout(WAIT).expect("art events") {
                MediaEvent::ArtResolved { key, handle } => {
                    art_for.insert(key.as_str().to_string(), handle.expect("art for every track"));
                }
                MediaEvent::Changed(_) => {}
            }
        }

        let current = now_playing.current().unwrap();
        assert_eq!(current.artist.as_deref(), Some("B"));
        assert_ne!(art_for["A|Old"], art_for["B|New"]);
        // B carries B's art, never A's
        assert_eq!(current.art, Some(art_for["B|New"]));
    }

    #[test]
    fn test_attach_art_rejects_stale_generation() {
        let now_playing = NowPlaying::new();
        let gen_a = now_playing.replace(track("A", "1"));
        let gen_b = now_playing.replace(track("B", "2"));

        assert!(!now_playing.attach_art(gen_a, ArtHandle::new(1)));
        assert_eq!(now_playing.current().unwrap().art, None);

        assert!(now_playing.attach_art(gen_b, ArtHandle::new(2)));
        assert_eq!(now_playing.current().unwrap().art, Some(ArtHandle::new(2)));

        // Same track detected again after a gap is a new generation
        let gen_none = now_playing.replace(None);
        assert!(!now_playing.attach_art(gen_none, ArtHandle::new(3)));
        assert!(!now_playing.attach_art(gen_b, ArtHandle::new(2)));
    }

    #[test]
    fn test_panicking_detector_does_not_stop_polling() {
        let (tx, rx) = unbounded();
        let mut poller = Poller::new(Panicking, NowPlaying::new(), None, tx);
        poller.tick();
        poller.tick();
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_spawned_loop_polls_until_stopped() {
        let (tx, rx) = unbounded();
        let detector = Scripted::new(vec![track("A", "1"), track("A", "1"), track("B", "2")]);
        let mut handle = Poller::new(detector, NowPlaying::new(), None, tx)
            .spawn(Duration::from_millis(10))
            .unwrap();

        let mut seen = Vec::new();
        while seen.len() < 3 {
            match rx.recv_timeout(WAIT).expect("poll events") {
                MediaEvent::Changed(m) => seen.push(m.map(|m| m.to_string())),
                MediaEvent::ArtResolved { .. } => {}
            }
        }
        handle.stop();

        assert_eq!(
            seen,
            vec![Some("A - 1 [Test]".to_string()), Some("B - 2 [Test]".to_string()), None]
        );
    }
}
