use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime};

use crate::art::{ArtHandle, ArtKey};

mod command;
pub mod linux;
pub mod macos;
pub mod windows;

/// One observed playback state.
///
/// Equality and hashing only look at `(title, artist)`: that pair is the
/// change-detection key used by the poller. Source, album, timestamp and
/// art are carried along but never make two snapshots "different".
#[derive(Clone, Debug)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Player / app name ("Spotify", "VLC", ...)
    pub source: String,
    pub is_playing: bool,
    pub detected_at: SystemTime,
    /// Attached asynchronously once the art resolver delivers
    pub art: Option<ArtHandle>,
}

impl MediaInfo {
    pub fn new(title: Option<String>, artist: Option<String>, source: impl Into<String>) -> Self {
        Self {
            title,
            artist,
            album: None,
            source: source.into(),
            is_playing: true,
            detected_at: SystemTime::now(),
            art: None,
        }
    }

    pub fn with_album(mut self, album: Option<String>) -> Self {
        self.album = album;
        self
    }

    /// True when both title and artist carry something other than whitespace.
    pub fn has_valid_info(&self) -> bool {
        fn filled(value: &Option<String>) -> bool {
            value.as_deref().is_some_and(|v| !v.trim().is_empty())
        }
        filled(&self.title) && filled(&self.artist)
    }

    /// Cache key for art lookups, only available for valid snapshots.
    pub fn art_key(&self) -> Option<ArtKey> {
        if !self.has_valid_info() {
            return None;
        }
        match (self.artist.as_deref(), self.title.as_deref()) {
            (Some(artist), Some(title)) => Some(ArtKey::new(artist, title)),
            _ => None,
        }
    }

    /// Title shortened for a compact overlay (30 chars max).
    pub fn display_title(&self) -> Option<String> {
        self.title.as_deref().map(|t| truncate_chars(t, 30, 27))
    }

    /// Artist shortened for a compact overlay (25 chars max).
    pub fn display_artist(&self) -> Option<String> {
        self.artist.as_deref().map(|a| truncate_chars(a, 25, 22))
    }
}

fn truncate_chars(text: &str, max: usize, keep: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut short: String = text.chars().take(keep).collect();
    short.push_str("...");
    short
}

impl PartialEq for MediaInfo {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title && self.artist == other.artist
    }
}

impl Eq for MediaInfo {}

impl Hash for MediaInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.title.hash(state);
        self.artist.hash(state);
    }
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} [{}]",
            self.artist.as_deref().unwrap_or("?"),
            self.title.as_deref().unwrap_or("?"),
            self.source
        )
    }
}

/// Maps empty / whitespace-only strings to `None` so detectors never hand out
/// fabricated empty values.
pub(crate) fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Internal failures of a detection strategy. Never leaves the strategy:
/// `detect()` logs it at debug level and reports "nothing playing".
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{0}` did not finish within {1:?}")]
    Timeout(String, Duration),
    #[error("`{0}` exited with {1}")]
    ExitStatus(String, std::process::ExitStatus),
    #[error("output of `{0}` was not valid UTF-8")]
    Utf8(String),
    #[error("malformed output: {0}")]
    Malformed(String),
    #[error("OS call failed: {0}")]
    Os(String),
}

/// The single capability every detection strategy offers.
pub trait MediaDetector: Send {
    /// Short name used in logs ("windows", "macos", "linux")
    fn name(&self) -> &'static str;

    /// Current playback state, or `None` when nothing is playing or the
    /// underlying OS facility failed. Must not panic and must return within
    /// a bounded time.
    fn detect(&mut self) -> Option<MediaInfo>;
}

// ==============================================================
// OS SELECTION FACTORY
// ==============================================================

/// Closed set of detection strategies. One is picked at startup and kept
/// for the lifetime of the process.
pub enum PlatformDetector {
    Windows(windows::WindowsDetector),
    MacOs(macos::MacDetector),
    Linux(linux::LinuxDetector),
}

impl PlatformDetector {
    /// Picks the strategy matching the host OS. Anything that is neither
    /// Windows nor macOS gets the Linux (playerctl) strategy.
    pub fn for_host(command_timeout: Duration) -> Self {
        #[cfg(target_os = "windows")]
        let detector = {
            let _ = command_timeout;
            PlatformDetector::Windows(windows::WindowsDetector::new())
        };

        #[cfg(target_os = "macos")]
        let detector = PlatformDetector::MacOs(macos::MacDetector::new(command_timeout));

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        let detector = PlatformDetector::Linux(linux::LinuxDetector::new(command_timeout));

        tracing::info!("[Media] Using {} media detector", detector.name());
        detector
    }
}

impl MediaDetector for PlatformDetector {
    fn name(&self) -> &'static str {
        match self {
            PlatformDetector::Windows(d) => d.name(),
            PlatformDetector::MacOs(d) => d.name(),
            PlatformDetector::Linux(d) => d.name(),
        }
    }

    fn detect(&mut self) -> Option<MediaInfo> {
        match self {
            PlatformDetector::Windows(d) => d.detect(),
            PlatformDetector::MacOs(d) => d.detect(),
            PlatformDetector::Linux(d) => d.detect(),
        }
    }
}
