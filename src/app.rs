use crate::engine::{Engine, EngineConfig};
use crate::error::FetchError;
use crate::fetch::{Fetcher, DEFAULT_MAX_IN_FLIGHT};
use crate::model::{Category, Content, Filters, MediaType};
use crate::omdb::{OmdbApi, OmdbClient};
use crate::store::CacheStore;
use crate::tmdb::{TmdbApi, TmdbClient};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

const DEFAULT_PORT: u16 = 3150;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub async fn run_server() -> Result<()> {
    let fetcher = Fetcher::new(DEFAULT_MAX_IN_FLIGHT)?;
    let tmdb: Arc<dyn TmdbApi> = Arc::new(TmdbClient::from_env(fetcher.clone())?);
    let omdb: Arc<dyn OmdbApi> = Arc::new(OmdbClient::from_env(fetcher)?);

    let store_path = env::var("CINESCOPE_STORE_PATH")
        .unwrap_or_else(|_| "content_store.json".to_string());
    let snapshot_path = env::var("CINESCOPE_SNAPSHOT_PATH")
        .unwrap_or_else(|_| "home_cache.json".to_string());
    let store = CacheStore::open(PathBuf::from(store_path)).await;

    let engine = Arc::new(Engine::new(
        tmdb,
        omdb,
        store,
        EngineConfig {
            snapshot_path: Some(PathBuf::from(snapshot_path)),
            ..EngineConfig::default()
        },
    ));
    Arc::clone(&engine).start().await;

    let app = build_router(AppState { engine });

    let port = env::var("CINESCOPE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/content/trending", get(trending))
        .route("/content/top-rated", get(top_rated))
        .route("/content/new-releases", get(new_releases))
        .route("/content/trending-series", get(trending_series))
        .route("/content/top-rated-series", get(top_rated_series))
        .route("/content/genres", get(genres))
        .route("/content/movies-page", get(movies_page))
        .route("/content/series-page", get(series_page))
        .route("/content/search", post(search))
        .route("/content/ensure", post(ensure))
        .route("/movies/:tmdb_id", get(movie_details))
        .route("/series/:tmdb_id", get(series_details))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn trending(State(state): State<AppState>) -> Json<Vec<Content>> {
    Json(state.engine.get_category(Category::TrendingMovies).await)
}

async fn top_rated(State(state): State<AppState>) -> Json<Vec<Content>> {
    Json(state.engine.get_category(Category::TopRatedMovies).await)
}

async fn new_releases(State(state): State<AppState>) -> Json<Vec<Content>> {
    Json(state.engine.get_category(Category::NewReleases).await)
}

async fn trending_series(State(state): State<AppState>) -> Json<Vec<Content>> {
    Json(state.engine.get_category(Category::TrendingSeries).await)
}

async fn top_rated_series(State(state): State<AppState>) -> Json<Vec<Content>> {
    Json(state.engine.get_category(Category::TopRatedSeries).await)
}

async fn genres(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.engine.get_genre_names().await)
}

/// Query parameters for the discovery pages. List-valued filters arrive
/// comma-separated.
#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PageQuery {
    page: u32,
    genres: Option<String>,
    release_year_min: Option<i32>,
    release_year_max: Option<i32>,
    imdb_rating_min: Option<f32>,
    rt_rating_min: Option<i32>,
    providers: Option<String>,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            genres: None,
            release_year_min: None,
            release_year_max: None,
            imdb_rating_min: None,
            rt_rating_min: None,
            providers: None,
        }
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

impl PageQuery {
    fn into_filters(self) -> (u32, Filters) {
        let page = self.page.max(1);
        let filters = Filters {
            genres: split_list(self.genres),
            release_year_min: self.release_year_min,
            release_year_max: self.release_year_max,
            imdb_rating_min: self.imdb_rating_min,
            rt_rating_min: self.rt_rating_min,
            providers: split_list(self.providers),
            // Per-user rating filtering needs the collaborator-supplied
            // ratings map and is not exposed on this anonymous surface.
            user_rating_min: None,
        };
        (page, filters)
    }
}

async fn movies_page(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Json<Vec<Content>> {
    let (page, filters) = query.into_filters();
    Json(
        state
            .engine
            .list_page(MediaType::Movie, page, &filters, None)
            .await,
    )
}

async fn series_page(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Json<Vec<Content>> {
    let (page, filters) = query.into_filters();
    Json(
        state
            .engine
            .list_page(MediaType::Tv, page, &filters, None)
            .await,
    )
}

async fn movie_details(
    State(state): State<AppState>,
    Path(tmdb_id): Path<String>,
) -> Result<Json<Content>, StatusCode> {
    state
        .engine
        .get_details(&tmdb_id, MediaType::Movie)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn series_details(
    State(state): State<AppState>,
    Path(tmdb_id): Path<String>,
) -> Result<Json<Content>, StatusCode> {
    state
        .engine
        .get_details(&tmdb_id, MediaType::Tv)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
}

async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Json<Vec<Content>> {
    Json(state.engine.search(&req.query).await)
}

#[derive(Debug, Deserialize)]
struct EnsureRequest {
    #[serde(rename = "tmdbId")]
    tmdb_id: String,
    #[serde(rename = "type")]
    media_type: Option<MediaType>,
}

async fn ensure(
    State(state): State<AppState>,
    Json(req): Json<EnsureRequest>,
) -> Result<Json<Content>, StatusCode> {
    state
        .engine
        .ensure_content_exists(&req.tmdb_id, req.media_type)
        .await
        .map(Json)
        .map_err(|e| match e {
            FetchError::Terminal(_) => StatusCode::NOT_FOUND,
            FetchError::Retryable(_) => StatusCode::BAD_GATEWAY,
            FetchError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
