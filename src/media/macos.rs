use std::time::Duration;

use super::command::run_captured;
use super::{non_empty, DetectError, MediaDetector, MediaInfo};

/// The single player queried over the scripting bridge.
const PRIMARY_APP: &str = "Spotify";

/// Joins artist and title in the script output; not expected in metadata.
const FIELD_DELIMITER: &str = "|#|";

/// Queries the primary player through `osascript`.
pub struct MacDetector {
    timeout: Duration,
}

impl MacDetector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn query(&self) -> Result<Option<MediaInfo>, DetectError> {
        let script = build_script(PRIMARY_APP);
        let output = run_captured("osascript", &["-e", &script], self.timeout)?;
        Ok(parse_script_output(&output, PRIMARY_APP))
    }
}

impl MediaDetector for MacDetector {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn detect(&mut self) -> Option<MediaInfo> {
        match self.query() {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!("[Media/MacOS] Detection failed: {}", e);
                None
            }
        }
    }
}

// The `is running` guard keeps osascript from launching the player itself.
fn build_script(app: &str) -> String {
    format!(
        r#"if application "{app}" is running then
    tell application "{app}"
        if player state is playing then
            return (get artist of current track) & "{delim}" & (get name of current track)
        end if
    end tell
end if
return """#,
        app = app,
        delim = FIELD_DELIMITER,
    )
}

/// Splits `artist<delim>title` once. Empty or delimiter-less output means
/// nothing is playing.
pub(crate) fn parse_script_output(output: &str, source: &str) -> Option<MediaInfo> {
    let line = output.trim();
    if line.is_empty() {
        return None;
    }
    let (artist, title) = line.split_once(FIELD_DELIMITER)?;
    Some(MediaInfo::new(non_empty(title), non_empty(artist), source))
}
