//! Artwork lookup services, queried in a fixed order.

use std::time::Duration;

use serde::Deserialize;

use super::http::HttpClient;
use super::ArtError;

const ITUNES_API: &str = "https://itunes.apple.com/search";
const DEEZER_API: &str = "https://api.deezer.com/search";

/// One artwork lookup service: free-text search in, artwork URL out.
pub trait ArtProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn lookup(
        &self,
        http: &dyn HttpClient,
        artist: &str,
        title: &str,
        timeout: Duration,
    ) -> Result<String, ArtError>;
}

/// iTunes first, Deezer as fallback.
pub fn default_providers() -> Vec<Box<dyn ArtProvider>> {
    vec![Box::new(ItunesProvider), Box::new(DeezerProvider)]
}

fn search_term(artist: &str, title: &str) -> String {
    urlencoding::encode(&format!("{} {}", artist, title)).into_owned()
}

fn parse_json<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, ArtError> {
    serde_json::from_slice(body).map_err(|e| ArtError::Parse(e.to_string()))
}

// ==============================================================
// iTunes Search API
// ==============================================================

#[derive(Deserialize)]
struct ItunesResponse {
    #[serde(default)]
    results: Vec<ItunesResult>,
}

#[derive(Deserialize)]
struct ItunesResult {
    #[serde(rename = "artworkUrl100")]
    artwork_url_100: Option<String>,
}

pub struct ItunesProvider;

impl ItunesProvider {
    pub fn search_url(artist: &str, title: &str) -> String {
        format!("{}?term={}&media=music&limit=1", ITUNES_API, search_term(artist, title))
    }

    pub(crate) fn artwork_from(body: &[u8]) -> Result<String, ArtError> {
        let response: ItunesResponse = parse_json(body)?;
        let first = response.results.into_iter().next().ok_or(ArtError::NoResults)?;
        let url = first
            .artwork_url_100
            .filter(|u| !u.is_empty())
            .ok_or(ArtError::MissingField("artworkUrl100"))?;
        // The 100px thumbnail has bigger siblings on the same CDN path
        Ok(url.replace("100x100", "300x300"))
    }
}

impl ArtProvider for ItunesProvider {
    fn name(&self) -> &'static str {
        "itunes"
    }

    fn lookup(&self, http: &dyn HttpClient, artist: &str, title: &str, timeout: Duration) -> Result<String, ArtError> {
        let body = http.get(&Self::search_url(artist, title), timeout)?;
        Self::artwork_from(&body)
    }
}

// ==============================================================
// Deezer Search API
// ==============================================================

#[derive(Deserialize)]
struct DeezerResponse {
    #[serde(default)]
    data: Vec<DeezerTrack>,
}

#[derive(Deserialize)]
struct DeezerTrack {
    album: Option<DeezerAlbum>,
}

#[derive(Deserialize)]
struct DeezerAlbum {
    cover_medium: Option<String>,
}

pub struct DeezerProvider;

impl DeezerProvider {
    pub fn search_url(artist: &str, title: &str) -> String {
        format!("{}?q={}&limit=1", DEEZER_API, search_term(artist, title))
    }

    pub(crate) fn artwork_from(body: &[u8]) -> Result<String, ArtError> {
        let response: DeezerResponse = parse_json(body)?;
        let first = response.data.into_iter().next().ok_or(ArtError::NoResults)?;
        first
            .album
            .and_then(|a| a.cover_medium)
            .filter(|u| !u.is_empty())
            .ok_or(ArtError::MissingField("album.cover_medium"))
    }
}

impl ArtProvider for DeezerProvider {
    fn name(&self) -> &'static str {
        "deezer"
    }

    fn lookup(&self, http: &dyn HttpClient, artist: &str, title: &str, timeout: Duration) -> Result<String, ArtError> {
        let body = http.get(&Self::search_url(artist, title), timeout)?;
        Self::artwork_from(&body)
    }
}
