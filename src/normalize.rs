//! Pure mapping from upstream payload shapes to the canonical `Content`
//! record, plus the lazily populated genre id to name map.

use crate::model::{
    CastMember, Content, MediaType, POSTER_PLACEHOLDER, PROFILE_PLACEHOLDER,
};
use crate::tmdb::{Detail, ListingItem, TmdbApi, POSTER_BASE, PROFILE_BASE};
use std::sync::RwLock;
use tokio::sync::Mutex;
use tracing::warn;

pub const TOP_CAST: usize = 10;

/// First four characters of the date string parsed as a year; 0 means
/// unknown and must not be confused with an actual year in filters.
pub fn parse_release_year(date: Option<&str>) -> i32 {
    date.and_then(|d| d.get(..4))
        .and_then(|y| y.parse::<i32>().ok())
        .unwrap_or(0)
}

pub fn poster_url(path: Option<&str>) -> String {
    match path {
        Some(p) if !p.is_empty() => format!("{POSTER_BASE}{p}"),
        _ => POSTER_PLACEHOLDER.to_string(),
    }
}

fn profile_url(path: Option<&str>) -> String {
    match path {
        Some(p) if !p.is_empty() => format!("{PROFILE_BASE}{p}"),
        _ => PROFILE_PLACEHOLDER.to_string(),
    }
}

/// Maps one listing/discovery result. Genre names are resolved by the
/// caller (the map lookup may need I/O, this function stays pure).
pub fn from_listing(item: &ListingItem, media: MediaType, genres: Vec<String>) -> Content {
    let (title, date) = match media {
        MediaType::Movie => (item.title.as_deref(), item.release_date.as_deref()),
        MediaType::Tv => (item.name.as_deref(), item.first_air_date.as_deref()),
    };
    Content {
        tmdb_id: item.id.to_string(),
        media_type: media,
        title: title.unwrap_or_default().to_string(),
        release_year: parse_release_year(date),
        poster: poster_url(item.poster_path.as_deref()),
        overview: item.overview.clone(),
        language: item
            .original_language
            .clone()
            .unwrap_or_else(|| "en".to_string()),
        genres,
        providers: None,
        imdb_rating: None,
        rt_rating: None,
        cast: vec![],
        last_synced_at: None,
    }
}

/// Maps a full detail payload, including the top of the cast list.
pub fn from_detail(detail: &Detail, media: MediaType) -> Content {
    let (title, date) = match media {
        MediaType::Movie => (detail.title.as_deref(), detail.release_date.as_deref()),
        MediaType::Tv => (detail.name.as_deref(), detail.first_air_date.as_deref()),
    };
    Content {
        tmdb_id: detail.id.to_string(),
        media_type: media,
        title: title.unwrap_or_default().to_string(),
        release_year: parse_release_year(date),
        poster: poster_url(detail.poster_path.as_deref()),
        overview: detail.overview.clone(),
        language: detail
            .original_language
            .clone()
            .unwrap_or_else(|| "en".to_string()),
        genres: detail.genres.iter().map(|g| g.name.clone()).collect(),
        providers: None,
        imdb_rating: None,
        rt_rating: None,
        cast: cast_from_detail(detail, media),
        last_synced_at: None,
    }
}

fn cast_from_detail(detail: &Detail, media: MediaType) -> Vec<CastMember> {
    let credits = match media {
        MediaType::Movie => detail.credits.as_ref(),
        // Series cast arrives via aggregate credits, with per-role characters.
        MediaType::Tv => detail.aggregate_credits.as_ref().or(detail.credits.as_ref()),
    };
    credits
        .map(|c| c.cast.as_slice())
        .unwrap_or_default()
        .iter()
        .take(TOP_CAST)
        .map(|raw| {
            let character = raw
                .character
                .clone()
                .or_else(|| {
                    raw.roles
                        .as_ref()
                        .and_then(|roles| roles.first())
                        .and_then(|role| role.character.clone())
                })
                .unwrap_or_default();
            CastMember {
                tmdb_id: raw.id,
                name: raw.name.clone(),
                character,
                profile_path_url: profile_url(raw.profile_path.as_deref()),
            }
        })
        .collect()
}

/// Genre id to name map, populated lazily from the catalog provider. The
/// populate call is guarded so concurrent misses issue at most one upstream
/// request; a failed populate leaves the map empty and is retried on the
/// next miss.
#[derive(Debug, Default)]
pub struct GenreMap {
    entries: RwLock<Vec<(i64, String)>>,
    populate: Mutex<()>,
}

impl GenreMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve(&self, ids: &[i64], tmdb: &dyn TmdbApi) -> Vec<String> {
        if ids.is_empty() {
            return vec![];
        }
        self.ensure_loaded(tmdb).await;
        let entries = self.entries.read().expect("genre map lock poisoned");
        ids.iter()
            .filter_map(|id| {
                entries
                    .iter()
                    .find(|(known, _)| known == id)
                    .map(|(_, name)| name.clone())
            })
            .collect()
    }

    pub async fn ids_for_names(&self, names: &[String], tmdb: &dyn TmdbApi) -> Vec<i64> {
        if names.is_empty() {
            return vec![];
        }
        self.ensure_loaded(tmdb).await;
        let entries = self.entries.read().expect("genre map lock poisoned");
        names
            .iter()
            .filter_map(|name| {
                entries
                    .iter()
                    .find(|(_, known)| known == name)
                    .map(|(id, _)| *id)
            })
            .collect()
    }

    pub async fn names(&self, tmdb: &dyn TmdbApi) -> Vec<String> {
        self.ensure_loaded(tmdb).await;
        let entries = self.entries.read().expect("genre map lock poisoned");
        entries.iter().map(|(_, name)| name.clone()).collect()
    }

    async fn ensure_loaded(&self, tmdb: &dyn TmdbApi) {
        if !self.entries.read().expect("genre map lock poisoned").is_empty() {
            return;
        }
        let _gate = self.populate.lock().await;
        // Another caller may have populated while we waited on the gate.
        if !self.entries.read().expect("genre map lock poisoned").is_empty() {
            return;
        }
        match tmdb.genre_list().await {
            Ok(list) => {
                *self.entries.write().expect("genre map lock poisoned") = list;
            }
            Err(e) => warn!("genre list fetch failed, ids will resolve to nothing: {e}"),
        }
    }
}
