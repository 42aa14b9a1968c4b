use std::io::Read;
use std::time::Duration;

use super::ArtError;

/// Cap on any single response body (JSON or image).
const MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

const USER_AGENT: &str = concat!("nowplaying/", env!("CARGO_PKG_VERSION"));

/// Minimal blocking GET used by providers and the image download.
/// Every call carries its own timeout; exceeding it is a plain failure.
pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, ArtError>;
}

pub struct UreqClient {
    agent: ureq::Agent,
}

impl UreqClient {
    pub fn new(connect_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .user_agent(USER_AGENT)
            .build();
        Self { agent }
    }
}

impl HttpClient for UreqClient {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, ArtError> {
        let response = match self.agent.get(url).timeout(timeout).call() {
            Ok(r) => r,
            Err(ureq::Error::Status(code, _)) => return Err(ArtError::Status(code)),
            Err(e) => return Err(ArtError::Network(e.to_string())),
        };

        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_BODY_BYTES)
            .read_to_end(&mut body)
            .map_err(|e| ArtError::Network(e.to_string()))?;
        Ok(body)
    }
}
