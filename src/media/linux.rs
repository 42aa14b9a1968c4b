use std::time::Duration;

use super::command::run_captured;
use super::{non_empty, DetectError, MediaDetector, MediaInfo};

const PLAYERCTL: &str = "playerctl";
const FIELD_DELIMITER: char = '|';
const FORMAT: &str = "{{artist}}|{{title}}|{{playerName}}";

/// Asks `playerctl` (MPRIS front-end) for the active player's metadata.
pub struct LinuxDetector {
    program: &'static str,
    timeout: Duration,
}

impl LinuxDetector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PLAYERCTL,
            timeout,
        }
    }

    fn query(&self) -> Result<Option<MediaInfo>, DetectError> {
        let output = run_captured(self.program, &["metadata", "--format", FORMAT], self.timeout)?;
        Ok(parse_playerctl_line(&output))
    }
}

impl MediaDetector for LinuxDetector {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn detect(&mut self) -> Option<MediaInfo> {
        match self.query() {
            Ok(info) => info,
            Err(e) => {
                // "No players found" also ends up here as a non-zero exit
                tracing::debug!("[Media/Linux] Detection failed: {}", e);
                None
            }
        }
    }
}

/// Parses `artist|title|player`. Artist and title must both be present as
/// fields (they may still be empty, which the validity check handles);
/// the player name falls back to "Unknown".
pub(crate) fn parse_playerctl_line(output: &str) -> Option<MediaInfo> {
    let line = output.lines().next()?.trim();
    if line.is_empty() || !line.contains(FIELD_DELIMITER) {
        return None;
    }

    let parts: Vec<&str> = line.splitn(3, FIELD_DELIMITER).collect();
    if parts.len() < 2 {
        return None;
    }

    let source = parts
        .get(2)
        .and_then(|p| non_empty(p))
        .unwrap_or_else(|| "Unknown".to_string());

    Some(MediaInfo::new(non_empty(parts[1]), non_empty(parts[0]), source))
}
