use crate::error::FetchError;
use crate::fetch::Fetcher;
use crate::model::MediaType;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

pub const TMDB_BASE: &str = "https://api.themoviedb.org/3";
pub const POSTER_BASE: &str = "https://image.tmdb.org/t/p/w500";
pub const PROFILE_BASE: &str = "https://image.tmdb.org/t/p/w200";

/// Primary catalog/discovery provider.
#[async_trait]
pub trait TmdbApi: Send + Sync {
    /// One page of a listing endpoint (trending, top_rated, now_playing).
    async fn listing(&self, endpoint: &str, page: u32) -> Result<Vec<ListingItem>, FetchError>;
    /// One page of the discover endpoint, optionally narrowed upstream.
    async fn discover(
        &self,
        media: MediaType,
        page: u32,
        query: &DiscoverQuery,
    ) -> Result<Vec<ListingItem>, FetchError>;
    /// Per-title detail. `with_credits` additionally appends the cast.
    async fn detail(
        &self,
        media: MediaType,
        tmdb_id: &str,
        with_credits: bool,
    ) -> Result<Detail, FetchError>;
    /// Deduplicated provider names available in the configured region.
    async fn watch_providers(
        &self,
        media: MediaType,
        tmdb_id: &str,
    ) -> Result<Vec<String>, FetchError>;
    async fn genre_list(&self) -> Result<Vec<(i64, String)>, FetchError>;
    async fn search_multi(&self, query: &str) -> Result<Vec<ListingItem>, FetchError>;
}

/// Upstream narrowing for discover pages. Local filter evaluation still
/// applies in full; this only trims the candidate set upstream.
#[derive(Debug, Clone, Default)]
pub struct DiscoverQuery {
    pub genre_ids: Vec<i64>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingItem {
    pub id: i64,
    pub title: Option<String>,
    pub name: Option<String>,
    pub release_date: Option<String>,
    pub first_air_date: Option<String>,
    pub poster_path: Option<String>,
    #[serde(default)]
    pub genre_ids: Vec<i64>,
    #[serde(default)]
    pub overview: String,
    pub original_language: Option<String>,
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Detail {
    pub id: i64,
    pub title: Option<String>,
    pub name: Option<String>,
    pub release_date: Option<String>,
    pub first_air_date: Option<String>,
    pub poster_path: Option<String>,
    #[serde(default)]
    pub genres: Vec<GenreEntry>,
    #[serde(default)]
    pub overview: String,
    pub original_language: Option<String>,
    pub imdb_id: Option<String>,
    pub external_ids: Option<ExternalIds>,
    pub credits: Option<Credits>,
    pub aggregate_credits: Option<Credits>,
}

impl Detail {
    /// Cross-reference id for the secondary ratings provider. Movies carry
    /// it inline; series expose it via appended external ids.
    pub fn imdb_ref(&self) -> Option<&str> {
        self.imdb_id
            .as_deref()
            .or_else(|| self.external_ids.as_ref().and_then(|e| e.imdb_id.as_deref()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenreEntry {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalIds {
    pub imdb_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credits {
    #[serde(default)]
    pub cast: Vec<RawCastMember>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCastMember {
    pub id: i64,
    pub name: String,
    pub character: Option<String>,
    pub roles: Option<Vec<Role>>,
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Role {
    pub character: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PagedResponse {
    #[serde(default)]
    results: Vec<ListingItem>,
}

#[derive(Debug, Deserialize)]
struct GenreListResponse {
    #[serde(default)]
    genres: Vec<GenreEntry>,
}

#[derive(Debug, Deserialize)]
struct WatchProvidersResponse {
    #[serde(default)]
    results: HashMap<String, RegionOffers>,
}

#[derive(Debug, Default, Deserialize)]
struct RegionOffers {
    flatrate: Option<Vec<ProviderEntry>>,
    rent: Option<Vec<ProviderEntry>>,
    buy: Option<Vec<ProviderEntry>>,
}

#[derive(Debug, Deserialize)]
struct ProviderEntry {
    provider_name: String,
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    fetcher: Fetcher,
    api_key: String,
    region: String,
}

impl TmdbClient {
    pub fn from_env(fetcher: Fetcher) -> Result<Self, FetchError> {
        let api_key =
            env::var("TMDB_API_KEY").map_err(|_| FetchError::Fatal("TMDB_API_KEY not set".into()))?;
        let region = env::var("CINESCOPE_REGION").unwrap_or_else(|_| "AT".to_string());
        Ok(Self {
            fetcher,
            api_key,
            region,
        })
    }

    fn key(&self) -> (&'static str, String) {
        ("api_key", self.api_key.clone())
    }
}

#[async_trait]
impl TmdbApi for TmdbClient {
    async fn listing(&self, endpoint: &str, page: u32) -> Result<Vec<ListingItem>, FetchError> {
        let url = format!("{TMDB_BASE}/{endpoint}");
        let params = [self.key(), ("page", page.to_string())];
        let data: PagedResponse = self.fetcher.get_json(&url, &params).await?;
        Ok(data.results)
    }

    async fn discover(
        &self,
        media: MediaType,
        page: u32,
        query: &DiscoverQuery,
    ) -> Result<Vec<ListingItem>, FetchError> {
        let url = format!("{TMDB_BASE}/discover/{}", media.as_path());
        let mut params = vec![self.key(), ("page", page.to_string())];
        if !query.genre_ids.is_empty() {
            let ids = query
                .genre_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            params.push(("with_genres", ids));
        }
        let (gte, lte) = match media {
            MediaType::Movie => ("primary_release_date.gte", "primary_release_date.lte"),
            MediaType::Tv => ("first_air_date.gte", "first_air_date.lte"),
        };
        if let Some(min) = query.year_min {
            params.push((gte, format!("{min}-01-01")));
        }
        if let Some(max) = query.year_max {
            params.push((lte, format!("{max}-12-31")));
        }
        let data: PagedResponse = self.fetcher.get_json(&url, &params).await?;
        Ok(data.results)
    }

    async fn detail(
        &self,
        media: MediaType,
        tmdb_id: &str,
        with_credits: bool,
    ) -> Result<Detail, FetchError> {
        let url = format!("{TMDB_BASE}/{}/{tmdb_id}", media.as_path());
        let append = match (media, with_credits) {
            (MediaType::Movie, false) => None,
            (MediaType::Movie, true) => Some("credits"),
            (MediaType::Tv, false) => Some("external_ids"),
            (MediaType::Tv, true) => Some("aggregate_credits,external_ids"),
        };
        let mut params = vec![self.key()];
        if let Some(append) = append {
            params.push(("append_to_response", append.to_string()));
        }
        self.fetcher.get_json(&url, &params).await
    }

    async fn watch_providers(
        &self,
        media: MediaType,
        tmdb_id: &str,
    ) -> Result<Vec<String>, FetchError> {
        let url = format!("{TMDB_BASE}/{}/{tmdb_id}/watch/providers", media.as_path());
        let params = [self.key()];
        let data: WatchProvidersResponse = self.fetcher.get_json(&url, &params).await?;
        let mut providers = Vec::new();
        if let Some(region) = data.results.get(&self.region) {
            for offers in [&region.flatrate, &region.rent, &region.buy] {
                for entry in offers.iter().flatten() {
                    if !providers.contains(&entry.provider_name) {
                        providers.push(entry.provider_name.clone());
                    }
                }
            }
        }
        Ok(providers)
    }

    async fn genre_list(&self) -> Result<Vec<(i64, String)>, FetchError> {
        let url = format!("{TMDB_BASE}/genre/movie/list");
        let params = [self.key()];
        let data: GenreListResponse = self.fetcher.get_json(&url, &params).await?;
        Ok(data.genres.into_iter().map(|g| (g.id, g.name)).collect())
    }

    async fn search_multi(&self, query: &str) -> Result<Vec<ListingItem>, FetchError> {
        let url = format!("{TMDB_BASE}/search/multi");
        let params = [self.key(), ("query", query.to_string())];
        let data: PagedResponse = self.fetcher.get_json(&url, &params).await?;
        Ok(data
            .results
            .into_iter()
            .filter(|r| matches!(r.media_type.as_deref(), Some("movie") | Some("tv")))
            .collect())
    }
}
