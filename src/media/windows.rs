//! Window-title heuristics for Windows.
//!
//! There is no structured "now playing" API used here, so the detector reads
//! every top-level window (title, class, owning process) and runs three
//! passes over that snapshot, in order of trust:
//!
//! 1. the primary streaming client, identified by window class *and* process image,
//! 2. secondary sources recognisable from a title marker (VLC, YouTube in a browser),
//! 3. a generic pass over known desktop players with `"<artist> - <title>"` titles.
//!
//! Each pass stops at the first acceptable window.

use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

use super::{non_empty, DetectError, MediaDetector, MediaInfo};

/// One top-level window as seen by the enumeration.
#[derive(Clone, Debug, Default)]
pub struct WindowInfo {
    pub title: String,
    pub class_name: String,
    pub pid: u32,
    pub visible: bool,
}

/// Where window snapshots come from. The Win32 implementation is the real
/// one; anything else is a stand-in for tests.
pub trait WindowSource: Send {
    fn top_level_windows(&self) -> Result<Vec<WindowInfo>, DetectError>;

    /// Full image path of the process, if it can be queried.
    fn process_image(&self, pid: u32) -> Option<String>;
}

const PRIMARY_SOURCE: &str = "Spotify";
const PRIMARY_PROCESS: &str = "spotify";
const PRIMARY_CLASSES: &[&str] = &["Chrome_WidgetWin", "SpotifyMainWindow"];
/// Titles the client shows while idle
const PRIMARY_IDLE_TITLES: &[&str] = &["Spotify", "Spotify Free", "Spotify Premium"];

const VLC_MARKER: &str = "VLC media player";
const YOUTUBE_MARKER: &str = "YouTube";

const GENERIC_PLAYERS: &[&str] = &["AIMP", "Winamp", "foobar2000", "MusicBee", "iTunes"];

fn primary_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s+[-–—]\s+(.+)$").expect("valid primary pattern"))
}

fn vlc_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s*[-–—]\s*VLC media player$").expect("valid VLC pattern"))
}

fn youtube_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Leading "(3) " is the browser's unread-notification counter
    RE.get_or_init(|| {
        Regex::new(r"^(?:\(\d+\)\s*)?(.+?)\s+[-–—]\s+YouTube.*$").expect("valid YouTube pattern")
    })
}

fn player_token_patterns() -> &'static [(&'static str, Regex)] {
    static RES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    RES.get_or_init(|| {
        GENERIC_PLAYERS
            .iter()
            .map(|player| {
                let re = RegexBuilder::new(&regex::escape(player))
                    .case_insensitive(true)
                    .build()
                    .expect("escaped player name is a valid pattern");
                (*player, re)
            })
            .collect()
    })
}

pub struct WindowsDetector {
    source: Box<dyn WindowSource>,
}

impl WindowsDetector {
    #[cfg(target_os = "windows")]
    pub fn new() -> Self {
        Self::with_source(Box::new(win32::Win32Windows))
    }

    pub fn with_source(source: Box<dyn WindowSource>) -> Self {
        Self { source }
    }

    fn scan(&self) -> Result<Option<MediaInfo>, DetectError> {
        let windows = self.source.top_level_windows()?;

        if let Some(info) = self.primary_pass(&windows) {
            return Ok(Some(info));
        }
        if let Some(info) = secondary_pass(&windows) {
            return Ok(Some(info));
        }
        Ok(generic_pass(&windows))
    }

    fn primary_pass(&self, windows: &[WindowInfo]) -> Option<MediaInfo> {
        windows
            .iter()
            .filter(|w| is_primary_candidate_title(w.title.trim()))
            .filter(|w| PRIMARY_CLASSES.iter().any(|c| w.class_name.starts_with(c)))
            // Chrome_WidgetWin is shared by every Electron/Chromium app
            .filter(|w| {
                self.source
                    .process_image(w.pid)
                    .is_some_and(|path| path.to_lowercase().contains(PRIMARY_PROCESS))
            })
            .find_map(|w| parse_primary_title(w.title.trim()))
    }
}

impl MediaDetector for WindowsDetector {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn detect(&mut self) -> Option<MediaInfo> {
        match self.scan() {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!("[Media/Windows] Detection failed: {}", e);
                None
            }
        }
    }
}

fn is_primary_candidate_title(title: &str) -> bool {
    !title.is_empty() && title.contains(" - ") && !PRIMARY_IDLE_TITLES.contains(&title)
}

/// `"<artist> - <title>"` as shown by the primary client.
pub(crate) fn parse_primary_title(title: &str) -> Option<MediaInfo> {
    let caps = primary_pattern().captures(title)?;
    Some(MediaInfo::new(
        non_empty(&caps[2]),
        non_empty(&caps[1]),
        PRIMARY_SOURCE,
    ))
}

fn secondary_pass(windows: &[WindowInfo]) -> Option<MediaInfo> {
    windows
        .iter()
        .filter(|w| w.visible)
        .find_map(|w| parse_secondary_title(w.title.trim()))
}

/// VLC and YouTube titles. VLC only exposes a title; YouTube video names
/// are split into artist/title when they look like `"<artist> - <title>"`.
pub(crate) fn parse_secondary_title(text: &str) -> Option<MediaInfo> {
    if text.is_empty() {
        return None;
    }

    if text.contains(VLC_MARKER) && text != VLC_MARKER {
        if let Some(caps) = vlc_pattern().captures(text) {
            return Some(MediaInfo::new(non_empty(&caps[1]), None, "VLC"));
        }
    }

    if text.contains(YOUTUBE_MARKER) && text != YOUTUBE_MARKER {
        if let Some(caps) = youtube_pattern().captures(text) {
            let video = caps[1].trim();
            let info = match video.split_once(" - ") {
                Some((artist, title)) => MediaInfo::new(non_empty(title), non_empty(artist), "YouTube"),
                None => MediaInfo::new(non_empty(video), None, "YouTube"),
            };
            return Some(info);
        }
    }

    None
}

fn generic_pass(windows: &[WindowInfo]) -> Option<MediaInfo> {
    windows
        .iter()
        .filter(|w| w.visible)
        .find_map(|w| parse_generic_title(w.title.trim()))
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | '–' | '—')
}

/// Strips a known player name from the title, trims dangling separators and
/// splits what is left on the first `" - "` into artist and title.
pub(crate) fn parse_generic_title(text: &str) -> Option<MediaInfo> {
    if !text.contains(" - ") {
        return None;
    }
    let lowered = text.to_lowercase();

    for (player, token) in player_token_patterns() {
        if !lowered.contains(&player.to_lowercase()) {
            continue;
        }
        let stripped = token.replace_all(text, "");
        let clean = stripped.trim_matches(is_separator);

        if let Some((artist, title)) = clean.split_once(" - ") {
            return Some(MediaInfo::new(non_empty(title), non_empty(artist), *player));
        }
    }
    None
}

#[cfg(target_os = "windows")]
mod win32 {
    use windows::core::PWSTR;
    use windows::Win32::Foundation::{CloseHandle, BOOL, HWND, LPARAM};
    use windows::Win32::System::Threading::{
        OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetClassNameW, GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible,
    };

    use super::{DetectError, WindowInfo, WindowSource};

    pub struct Win32Windows;

    unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
        // SAFETY: lparam is the &mut Vec passed by top_level_windows below,
        // alive for the whole EnumWindows call.
        let out = &mut *(lparam.0 as *mut Vec<WindowInfo>);

        let mut text = [0u16; 512];
        let len = GetWindowTextW(hwnd, &mut text);
        if len <= 0 {
            return BOOL(1);
        }

        let mut class = [0u16; 256];
        let class_len = GetClassNameW(hwnd, &mut class).max(0) as usize;

        let mut pid = 0u32;
        GetWindowThreadProcessId(hwnd, Some(&mut pid as *mut u32));

        out.push(WindowInfo {
            title: String::from_utf16_lossy(&text[..len as usize]),
            class_name: String::from_utf16_lossy(&class[..class_len]),
            pid,
            visible: IsWindowVisible(hwnd).as_bool(),
        });
        BOOL(1)
    }

    impl WindowSource for Win32Windows {
        fn top_level_windows(&self) -> Result<Vec<WindowInfo>, DetectError> {
            let mut windows: Vec<WindowInfo> = Vec::new();
            unsafe { EnumWindows(Some(collect_window), LPARAM(&mut windows as *mut _ as isize)) }
                .map_err(|e| DetectError::Os(e.to_string()))?;
            Ok(windows)
        }

        fn process_image(&self, pid: u32) -> Option<String> {
            unsafe {
                let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
                let mut path = [0u16; 1024];
                let mut size = path.len() as u32;
                let result =
                    QueryFullProcessImageNameW(handle, PROCESS_NAME_WIN32, PWSTR(path.as_mut_ptr()), &mut size);
                let _ = CloseHandle(handle);
                result.ok()?;
                Some(String::from_utf16_lossy(&path[..size as usize]))
            }
        }
    }
}
