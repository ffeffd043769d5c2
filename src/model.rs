use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

pub const CACHE_TTL_HOURS: i64 = 24;
/// Contract value other components rely on for "no image" detection.
pub const POSTER_PLACEHOLDER: &str = "https://placehold.co/200x300";
pub const PROFILE_PLACEHOLDER: &str = "https://placehold.co/80x120";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_path(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "tv" => Ok(MediaType::Tv),
            other => Err(format!("unknown media type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastMember {
    pub tmdb_id: i64,
    pub name: String,
    pub character: String,
    pub profile_path_url: String,
}

/// Canonical cached representation of one movie/series title.
///
/// `providers: None` means provider data was never fetched, `Some(vec![])`
/// means it was fetched and the title has no offers in the configured region.
/// Null ratings mean enrichment failed or was unavailable, never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub tmdb_id: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub title: String,
    /// 0 means the release year is unknown.
    pub release_year: i32,
    pub poster: String,
    pub overview: String,
    pub language: String,
    pub genres: Vec<String>,
    pub providers: Option<Vec<String>>,
    pub imdb_rating: Option<f32>,
    pub rt_rating: Option<i32>,
    pub cast: Vec<CastMember>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

pub type ContentKey = (String, MediaType);

impl Content {
    pub fn key(&self) -> ContentKey {
        (self.tmdb_id.clone(), self.media_type)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.last_synced_at {
            Some(synced) => now - synced < Duration::hours(CACHE_TTL_HOURS),
            None => false,
        }
    }
}

/// The five named rolling home lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    TrendingMovies,
    TopRatedMovies,
    NewReleases,
    TrendingSeries,
    TopRatedSeries,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::TrendingMovies,
        Category::TopRatedMovies,
        Category::NewReleases,
        Category::TrendingSeries,
        Category::TopRatedSeries,
    ];

    pub fn endpoint(&self) -> &'static str {
        match self {
            Category::TrendingMovies => "trending/movie/week",
            Category::TopRatedMovies => "movie/top_rated",
            Category::NewReleases => "movie/now_playing",
            Category::TrendingSeries => "trending/tv/week",
            Category::TopRatedSeries => "tv/top_rated",
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            Category::TrendingMovies | Category::TopRatedMovies | Category::NewReleases => {
                MediaType::Movie
            }
            Category::TrendingSeries | Category::TopRatedSeries => MediaType::Tv,
        }
    }
}

/// Discovery page filters. All active filters must hold (AND).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Filters {
    /// Candidate must carry every requested genre, not any.
    pub genres: Vec<String>,
    pub release_year_min: Option<i32>,
    pub release_year_max: Option<i32>,
    pub imdb_rating_min: Option<f32>,
    pub rt_rating_min: Option<i32>,
    /// Candidate must have every requested provider available.
    pub providers: Vec<String>,
    pub user_rating_min: Option<f32>,
}

impl Filters {
    pub fn wants_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Evaluates filters 1-4 (genres, year range, rating thresholds,
    /// providers). The per-user rating filter is evaluated separately since
    /// it depends on an externally supplied map.
    pub fn matches_content(&self, c: &Content) -> bool {
        if !self
            .genres
            .iter()
            .all(|g| c.genres.iter().any(|have| have == g))
        {
            return false;
        }
        // An unknown year (0) fails any explicitly narrowed range.
        if self.release_year_min.is_some() || self.release_year_max.is_some() {
            if c.release_year == 0 {
                return false;
            }
            if let Some(min) = self.release_year_min {
                if c.release_year < min {
                    return false;
                }
            }
            if let Some(max) = self.release_year_max {
                if c.release_year > max {
                    return false;
                }
            }
        }
        // A null rating never passes a positive threshold.
        if let Some(min) = self.imdb_rating_min {
            if min > 0.0 && !c.imdb_rating.is_some_and(|r| r >= min) {
                return false;
            }
        }
        if let Some(min) = self.rt_rating_min {
            if min > 0 && !c.rt_rating.is_some_and(|r| r >= min) {
                return false;
            }
        }
        if !self.providers.is_empty() {
            match &c.providers {
                Some(have) => {
                    if !self.providers.iter().all(|p| have.iter().any(|h| h == p)) {
                        return false;
                    }
                }
                // Absence of provider data never satisfies a provider filter.
                None => return false,
            }
        }
        true
    }

    pub fn matches_user_rating(
        &self,
        c: &Content,
        user_ratings: Option<&HashMap<String, f32>>,
    ) -> bool {
        match self.user_rating_min {
            Some(min) if min > 0.0 => user_ratings
                .and_then(|m| m.get(&c.tmdb_id))
                .is_some_and(|score| *score >= min),
            _ => true,
        }
    }

    /// Stable key for the per-process discovery page memo.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
