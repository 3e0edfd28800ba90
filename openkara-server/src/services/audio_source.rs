//! Audio source client
//!
//! Search, track metadata and media download against the external audio
//! catalog. The media blob returned with track info is opaque: it is stored
//! in `metadata.json` verbatim and posted back for the download, which keeps
//! the catalog's key-derivation scheme out of this service entirely.

use crate::models::SearchResult;
use crate::store::{ArtifactStore, TrackFile};
use openkara_common::{Error, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const INFO_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const SEARCH_CACHE_TTL: Duration = Duration::from_secs(300);

/// Track metadata as returned by the catalog, plus the opaque media blob.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub img_url: String,
    /// Opaque payload required by the media download endpoint.
    #[serde(default)]
    pub media: Value,
}

/// Replace the catalog's thumbnail cover (56x56) with the 200x200 variant.
pub fn upgrade_cover_url(url: &str) -> String {
    url.replacen("/56x56", "/200x200", 1)
}

/// Drop repeated hits for the same (title, artist), keeping first occurrence.
fn dedup_by_title_artist(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen: HashSet<String> = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(format!("{}{}", r.title, r.artist)))
        .collect()
}

/// Client for the audio catalog with an in-process search cache.
pub struct AudioSourceClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    search_cache: Mutex<HashMap<String, (Instant, Vec<SearchResult>)>>,
}

impl AudioSourceClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            search_cache: Mutex::new(HashMap::new()),
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Search the catalog. Results are deduplicated by (title, artist) and
    /// cached for five minutes keyed by the lowercased query.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let cache_key = query.trim().to_lowercase();

        {
            let mut cache = self.search_cache.lock();
            // Evict stale entries on read so the map stays bounded.
            cache.retain(|_, (at, _)| at.elapsed() < SEARCH_CACHE_TTL);
            if let Some((_, results)) = cache.get(&cache_key) {
                return Ok(results.clone());
            }
        }

        let url = format!("{}/search", self.base_url);
        let response = self
            .authorize(self.http.get(&url).query(&[("q", query)]).timeout(SEARCH_TIMEOUT))
            .send()
            .await
            .map_err(|e| Error::Source(format!("search failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Source(format!("search returned HTTP {}", response.status())));
        }

        let raw: Vec<SearchResult> = response
            .json()
            .await
            .map_err(|e| Error::Source(format!("search response invalid: {}", e)))?;

        let results = dedup_by_title_artist(raw);

        self.search_cache
            .lock()
            .insert(cache_key, (Instant::now(), results.clone()));
        Ok(results)
    }

    /// Fetch track metadata including the opaque media blob.
    pub async fn get_info(&self, track_id: &str) -> Result<TrackInfo> {
        let url = format!("{}/tracks/{}", self.base_url, track_id);
        let response = self
            .authorize(self.http.get(&url).timeout(INFO_TIMEOUT))
            .send()
            .await
            .map_err(|e| Error::Source(format!("track info failed: {}", e)))?;

        if response.status().as_u16() == 404 {
            return Err(Error::Source(format!("track {} not found", track_id)));
        }
        if !response.status().is_success() {
            return Err(Error::Source(format!(
                "track info returned HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Source(format!("track info response invalid: {}", e)))
    }

    /// Download the full audio file for a track into the artifact store.
    ///
    /// Posts the opaque media blob back to the catalog's media endpoint and
    /// streams the MP3 body to `song.mp3`. On success the artifact is a
    /// non-empty playable file.
    pub async fn download(
        &self,
        media: &Value,
        store: &ArtifactStore,
        track_id: &str,
    ) -> Result<u64> {
        if media.is_null() {
            return Err(Error::Source(format!(
                "track {} has no media payload; re-run the metadata stage",
                track_id
            )));
        }

        let url = format!("{}/media", self.base_url);
        let response = self
            .authorize(self.http.post(&url).json(media).timeout(DOWNLOAD_TIMEOUT))
            .send()
            .await
            .map_err(|e| Error::Source(format!("media download failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Source(format!(
                "media download returned HTTP {}",
                response.status()
            )));
        }

        store
            .save_binary(track_id, TrackFile::Song, response.bytes_stream())
            .await
    }

    /// Lightweight reachability probe for the health view.
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .authorize(self.http.get(&url).query(&[("q", "test")]).timeout(SEARCH_TIMEOUT))
            .send()
            .await
            .map_err(|e| Error::Source(format!("unreachable: {}", e)))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Source(format!("HTTP {}", response.status())))
        }
    }

    /// Test hook: number of live cache entries.
    #[cfg(test)]
    pub(crate) fn cached_queries(&self) -> usize {
        self.search_cache.lock().len()
    }

    /// Test hook: seed the cache directly.
    #[cfg(test)]
    pub(crate) fn seed_cache(&self, query: &str, at: Instant, results: Vec<SearchResult>) {
        self.search_cache
            .lock()
            .insert(query.to_lowercase(), (at, results));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, title: &str, artist: &str) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            img_url: String::new(),
        }
    }

    #[test]
    fn test_dedup_by_title_artist() {
        let results = vec![
            result("1", "One More Time", "Daft Punk"),
            result("2", "One More Time", "Daft Punk"),
            result("3", "Aerodynamic", "Daft Punk"),
        ];
        let deduped = dedup_by_title_artist(results);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].id, "1");
        assert_eq!(deduped[1].id, "3");
    }

    #[test]
    fn test_upgrade_cover_url() {
        assert_eq!(
            upgrade_cover_url("https://img.example/56x56/abc.jpg"),
            "https://img.example/200x200/abc.jpg"
        );
        // Only the first occurrence is replaced; other URLs pass through.
        assert_eq!(upgrade_cover_url("https://img.example/cover.jpg"), "https://img.example/cover.jpg");
    }

    #[tokio::test]
    async fn test_search_cache_hit_skips_network() {
        // Unresolvable endpoint: any actual request would error.
        let client = AudioSourceClient::new("http://127.0.0.1:1", None);
        client.seed_cache(
            "daft punk",
            Instant::now(),
            vec![result("1", "One More Time", "Daft Punk")],
        );

        let results = client.search("Daft Punk").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "1");
    }

    #[tokio::test]
    async fn test_search_cache_expires() {
        let client = AudioSourceClient::new("http://127.0.0.1:1", None);
        client.seed_cache(
            "old query",
            Instant::now() - Duration::from_secs(600),
            vec![result("1", "A", "B")],
        );

        // The stale entry is evicted, the live request fails, and the map
        // no longer holds the expired entry.
        assert!(client.search("old query").await.is_err());
        assert_eq!(client.cached_queries(), 0);
    }

    #[tokio::test]
    async fn test_download_rejects_missing_media_blob() {
        let client = AudioSourceClient::new("http://127.0.0.1:1", None);
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf());

        let err = client
            .download(&Value::Null, &store, "5")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no media payload"));
    }
}
