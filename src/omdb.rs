use crate::error::{FetchError, RetryPolicy};
use crate::fetch::Fetcher;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tokio::sync::Mutex;

const OMDB_BASE: &str = "https://www.omdbapi.com/";
const RT_SOURCE: &str = "Rotten Tomatoes";
const RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_millis(300));

/// Secondary ratings provider, keyed by the imdb cross-reference id.
#[async_trait]
pub trait OmdbApi: Send + Sync {
    async fn ratings(&self, imdb_id: &str) -> Result<RatingPair, FetchError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RatingPair {
    pub imdb: Option<f32>,
    pub rt: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct OmdbResponse {
    #[serde(rename = "Response")]
    response: Option<String>,
    #[serde(rename = "imdbRating")]
    imdb_rating: Option<String>,
    #[serde(rename = "Ratings", default)]
    ratings: Vec<OmdbSource>,
}

#[derive(Debug, Deserialize)]
struct OmdbSource {
    #[serde(rename = "Source")]
    source: String,
    #[serde(rename = "Value")]
    value: String,
}

pub struct OmdbClient {
    fetcher: Fetcher,
    api_key: String,
    // Unbounded for the process lifetime; the universe of referenced ids is
    // small relative to memory.
    cache: Mutex<HashMap<String, RatingPair>>,
}

impl OmdbClient {
    pub fn from_env(fetcher: Fetcher) -> Result<Self, FetchError> {
        let api_key =
            env::var("OMDB_API_KEY").map_err(|_| FetchError::Fatal("OMDB_API_KEY not set".into()))?;
        Ok(Self {
            fetcher,
            api_key,
            cache: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl OmdbApi for OmdbClient {
    async fn ratings(&self, imdb_id: &str) -> Result<RatingPair, FetchError> {
        if let Some(hit) = self.cache.lock().await.get(imdb_id).copied() {
            return Ok(hit);
        }
        let params = [
            ("i", imdb_id.to_string()),
            ("apikey", self.api_key.clone()),
        ];
        let raw: OmdbResponse = RETRY
            .run(|| self.fetcher.get_json(OMDB_BASE, &params))
            .await?;
        let pair = parse_ratings(&raw);
        self.cache.lock().await.insert(imdb_id.to_string(), pair);
        Ok(pair)
    }
}

fn parse_ratings(raw: &OmdbResponse) -> RatingPair {
    // A well-formed "not found" answer is terminal: both scores stay null
    // and the result is cached like any other.
    if raw.response.as_deref() == Some("False") {
        return RatingPair::default();
    }
    let imdb = raw
        .imdb_rating
        .as_deref()
        .and_then(|s| s.parse::<f32>().ok());
    let rt = raw
        .ratings
        .iter()
        .find(|r| r.source == RT_SOURCE)
        .and_then(|r| r.value.trim_end_matches('%').parse::<i32>().ok());
    RatingPair { imdb, rt }
}
