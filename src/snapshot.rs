use crate::model::{Category, Content};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Durable copy of the five rolling home lists, written wholesale after
/// every refresh cycle and read wholesale at process start so the service
/// is never empty after a restart. A missing file is a normal cold start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HomeSnapshot {
    pub trending: Vec<Content>,
    pub top_rated: Vec<Content>,
    pub new_releases: Vec<Content>,
    pub trending_series: Vec<Content>,
    pub top_rated_series: Vec<Content>,
}

impl HomeSnapshot {
    pub fn slot(&self, category: Category) -> &[Content] {
        match category {
            Category::TrendingMovies => &self.trending,
            Category::TopRatedMovies => &self.top_rated,
            Category::NewReleases => &self.new_releases,
            Category::TrendingSeries => &self.trending_series,
            Category::TopRatedSeries => &self.top_rated_series,
        }
    }

    pub fn slot_mut(&mut self, category: Category) -> &mut Vec<Content> {
        match category {
            Category::TrendingMovies => &mut self.trending,
            Category::TopRatedMovies => &mut self.top_rated,
            Category::NewReleases => &mut self.new_releases,
            Category::TrendingSeries => &mut self.trending_series,
            Category::TopRatedSeries => &mut self.top_rated_series,
        }
    }

    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<HomeSnapshot>(&bytes) {
                Ok(snapshot) => {
                    info!("restored home snapshot from {}", path.display());
                    snapshot
                }
                Err(e) => {
                    warn!("home snapshot {} is corrupt, starting empty: {e}", path.display());
                    HomeSnapshot::default()
                }
            },
            Err(_) => HomeSnapshot::default(),
        }
    }

    pub async fn save(&self, path: &Path) {
        match serde_json::to_vec(self) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(path, bytes).await {
                    warn!("failed to write home snapshot to {}: {e}", path.display());
                }
            }
            Err(e) => warn!("failed to serialize home snapshot: {e}"),
        }
    }
}
