//! Now-playing detection for desktop overlays.
//!
//! A platform detector reports what the system media player is doing, the
//! poller turns that into change events, and the art resolver fetches cover
//! images in the background.

pub mod art;
pub mod config;
pub mod context;
pub mod logging;
pub mod media;
pub mod poller;

pub use art::{ArtHandle, ArtKey, ArtResolver};
pub use config::Config;
pub use context::AppContext;
pub use media::{MediaDetector, MediaInfo, PlatformDetector};
pub use poller::{MediaEvent, NowPlaying};
