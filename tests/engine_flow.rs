use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use cinescope::app::{build_router, AppState};
use cinescope::engine::{Engine, EngineConfig};
use cinescope::error::FetchError;
use cinescope::model::{Category, Content, Filters, MediaType, POSTER_PLACEHOLDER};
use cinescope::omdb::{OmdbApi, RatingPair};
use cinescope::snapshot::HomeSnapshot;
use cinescope::store::CacheStore;
use cinescope::tmdb::{Detail, DiscoverQuery, ListingItem, TmdbApi};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

#[derive(Default)]
struct FakeTmdb {
    listings: HashMap<&'static str, Vec<ListingItem>>,
    discover_pages: HashMap<(MediaType, u32), Vec<ListingItem>>,
    terminal_details: HashSet<(MediaType, String)>,
    providers: HashMap<String, Vec<String>>,
    listing_down: AtomicBool,
    listing_delay_ms: u64,
    listing_calls: AtomicUsize,
    detail_calls: AtomicUsize,
    discover_calls: AtomicUsize,
    provider_calls: AtomicUsize,
}

fn listing_item(id: i64, media: MediaType) -> ListingItem {
    let value = match media {
        MediaType::Movie => json!({
            "id": id,
            "title": format!("Movie {id}"),
            "release_date": "2020-05-01",
            "poster_path": "/p.jpg",
            "genre_ids": [28],
            "overview": "",
            "original_language": "en"
        }),
        MediaType::Tv => json!({
            "id": id,
            "name": format!("Series {id}"),
            "first_air_date": "2011-04-17",
            "poster_path": "/p.jpg",
            "genre_ids": [28],
            "overview": "",
            "original_language": "en"
        }),
    };
    serde_json::from_value(value).expect("listing item fixture")
}

fn detail_fixture(id: &str, media: MediaType) -> Detail {
    let value = match media {
        MediaType::Movie => json!({
            "id": id.parse::<i64>().unwrap_or(0),
            "title": format!("Movie {id}"),
            "release_date": "2020-05-01",
            "poster_path": "/p.jpg",
            "overview": "A film.",
            "original_language": "en",
            "genres": [{ "id": 28, "name": "Action" }],
            "imdb_id": format!("tt{id}"),
            "credits": {
                "cast": [{ "id": 1, "name": "Actor", "character": "Lead", "profile_path": "/a.jpg" }]
            }
        }),
        MediaType::Tv => json!({
            "id": id.parse::<i64>().unwrap_or(0),
            "name": format!("Series {id}"),
            "first_air_date": "2011-04-17",
            "poster_path": "/p.jpg",
            "overview": "A show.",
            "original_language": "en",
            "genres": [{ "id": 28, "name": "Action" }],
            "external_ids": { "imdb_id": format!("tt{id}") },
            "aggregate_credits": {
                "cast": [{ "id": 2, "name": "Actor", "roles": [{ "character": "Lead" }] }]
            }
        }),
    };
    serde_json::from_value(value).expect("detail fixture")
}

#[async_trait]
impl TmdbApi for FakeTmdb {
    async fn listing(&self, endpoint: &str, _page: u32) -> Result<Vec<ListingItem>, FetchError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        if self.listing_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.listing_delay_ms)).await;
        }
        if self.listing_down.load(Ordering::SeqCst) {
            return Err(FetchError::Retryable("tmdb unreachable".into()));
        }
        Ok(self.listings.get(endpoint).cloned().unwrap_or_default())
    }

    async fn discover(
        &self,
        media: MediaType,
        page: u32,
        _query: &DiscoverQuery,
    ) -> Result<Vec<ListingItem>, FetchError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .discover_pages
            .get(&(media, page))
            .cloned()
            .unwrap_or_default())
    }

    async fn detail(
        &self,
        media: MediaType,
        tmdb_id: &str,
        _with_credits: bool,
    ) -> Result<Detail, FetchError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.terminal_details.contains(&(media, tmdb_id.to_string())) {
            return Err(FetchError::Terminal(format!("{tmdb_id} not found")));
        }
        Ok(detail_fixture(tmdb_id, media))
    }

    async fn watch_providers(
        &self,
        _media: MediaType,
        tmdb_id: &str,
    ) -> Result<Vec<String>, FetchError> {
        self.provider_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.providers.get(tmdb_id).cloned().unwrap_or_default())
    }

    async fn genre_list(&self) -> Result<Vec<(i64, String)>, FetchError> {
        Ok(vec![(28, "Action".to_string()), (35, "Comedy".to_string())])
    }

    async fn search_multi(&self, _query: &str) -> Result<Vec<ListingItem>, FetchError> {
        Ok(vec![listing_item(603, MediaType::Movie)])
    }
}

#[derive(Default)]
struct FakeOmdb {
    pairs: HashMap<String, RatingPair>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

#[async_trait]
impl OmdbApi for FakeOmdb {
    async fn ratings(&self, imdb_id: &str) -> Result<RatingPair, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(imdb_id) {
            return Err(FetchError::Retryable("omdb down".into()));
        }
        Ok(self.pairs.get(imdb_id).copied().unwrap_or_default())
    }
}

fn engine_with(
    tmdb: Arc<FakeTmdb>,
    omdb: Arc<FakeOmdb>,
    store: CacheStore,
    config: EngineConfig,
) -> Arc<Engine> {
    let tmdb_dyn: Arc<dyn TmdbApi> = tmdb;
    let omdb_dyn: Arc<dyn OmdbApi> = omdb;
    Arc::new(Engine::new(tmdb_dyn, omdb_dyn, store, config))
}

fn trending_movies(count: i64) -> (&'static str, Vec<ListingItem>) {
    (
        Category::TrendingMovies.endpoint(),
        (1..=count)
            .map(|id| listing_item(id, MediaType::Movie))
            .collect(),
    )
}

#[tokio::test]
async fn failed_item_is_dropped_without_aborting_the_category() {
    let (endpoint, items) = trending_movies(20);
    let tmdb = Arc::new(FakeTmdb {
        listings: HashMap::from([(endpoint, items)]),
        terminal_details: HashSet::from([(MediaType::Movie, "7".to_string())]),
        ..FakeTmdb::default()
    });
    let engine = engine_with(
        tmdb,
        Arc::new(FakeOmdb::default()),
        CacheStore::in_memory(),
        EngineConfig::default(),
    );

    engine.refresh_home().await;
    let list = engine.get_category(Category::TrendingMovies).await;

    assert_eq!(list.len(), 19);
    let ids: Vec<&str> = list.iter().map(|c| c.tmdb_id.as_str()).collect();
    assert!(!ids.contains(&"7"));
    // Upstream order is preserved minus the dropped item.
    let expected: Vec<String> = (1..=20)
        .filter(|id| *id != 7)
        .map(|id: i64| id.to_string())
        .collect();
    assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
}

#[tokio::test]
async fn concurrent_refresh_triggers_run_one_cycle() {
    let (endpoint, items) = trending_movies(3);
    let tmdb = Arc::new(FakeTmdb {
        listings: HashMap::from([(endpoint, items)]),
        listing_delay_ms: 20,
        ..FakeTmdb::default()
    });
    let engine = engine_with(
        tmdb.clone(),
        Arc::new(FakeOmdb::default()),
        CacheStore::in_memory(),
        EngineConfig::default(),
    );

    tokio::join!(engine.refresh_home(), engine.refresh_home());

    // One listing fetch per category; the second trigger was a no-op.
    assert_eq!(tmdb.listing_calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn cold_start_with_unreachable_upstream_serves_empty_lists() {
    let tmdb = Arc::new(FakeTmdb {
        listing_down: AtomicBool::new(true),
        ..FakeTmdb::default()
    });
    let engine = engine_with(
        tmdb.clone(),
        Arc::new(FakeOmdb::default()),
        CacheStore::in_memory(),
        EngineConfig::default(),
    );

    let list = engine.get_category(Category::TrendingMovies).await;

    // The reader gets an immediate empty answer and never waits on upstream.
    assert!(list.is_empty());
    // The empty read still kicked off a refresh in the background.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(tmdb.listing_calls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn enrichment_failure_keeps_the_item_with_null_ratings() {
    let (endpoint, items) = trending_movies(2);
    let tmdb = Arc::new(FakeTmdb {
        listings: HashMap::from([(endpoint, items)]),
        ..FakeTmdb::default()
    });
    let omdb = Arc::new(FakeOmdb {
        pairs: HashMap::from([(
            "tt2".to_string(),
            RatingPair {
                imdb: Some(7.5),
                rt: Some(80),
            },
        )]),
        failing: HashSet::from(["tt1".to_string()]),
        ..FakeOmdb::default()
    });
    let engine = engine_with(tmdb, omdb, CacheStore::in_memory(), EngineConfig::default());

    engine.refresh_home().await;
    let list = engine.get_category(Category::TrendingMovies).await;

    assert_eq!(list.len(), 2);
    assert_eq!(list[0].imdb_rating, None);
    assert_eq!(list[0].rt_rating, None);
    assert_eq!(list[1].imdb_rating, Some(7.5));
    assert_eq!(list[1].rt_rating, Some(80));
}

#[tokio::test]
async fn category_failure_keeps_the_previous_list() {
    let (endpoint, items) = trending_movies(4);
    let tmdb = Arc::new(FakeTmdb {
        listings: HashMap::from([(endpoint, items)]),
        ..FakeTmdb::default()
    });
    let engine = engine_with(
        tmdb.clone(),
        Arc::new(FakeOmdb::default()),
        CacheStore::in_memory(),
        EngineConfig::default(),
    );

    engine.refresh_home().await;
    assert_eq!(
        engine.clone().get_category(Category::TrendingMovies).await.len(),
        4
    );

    tmdb.listing_down.store(true, Ordering::SeqCst);
    engine.refresh_home().await;

    // Stale-but-present beats empty.
    assert_eq!(engine.get_category(Category::TrendingMovies).await.len(), 4);
}

#[tokio::test]
async fn ensure_content_falls_back_from_movie_to_tv() {
    let tmdb = Arc::new(FakeTmdb {
        terminal_details: HashSet::from([
            (MediaType::Movie, "1399".to_string()),
            (MediaType::Movie, "404".to_string()),
            (MediaType::Tv, "404".to_string()),
        ]),
        ..FakeTmdb::default()
    });
    let engine = engine_with(
        tmdb,
        Arc::new(FakeOmdb::default()),
        CacheStore::in_memory(),
        EngineConfig::default(),
    );

    // A movie id succeeds on the first attempt.
    let movie = engine.ensure_content_exists("603", None).await.unwrap();
    assert_eq!(movie.media_type, MediaType::Movie);
    assert_eq!(movie.title, "Movie 603");
    assert!(movie.last_synced_at.is_some());

    // A series-only id fails the movie lookup and succeeds via tv.
    let series = engine.ensure_content_exists("1399", None).await.unwrap();
    assert_eq!(series.media_type, MediaType::Tv);
    assert_eq!(series.title, "Series 1399");

    // Only when both lookups fail does the operation fail.
    let err = engine.ensure_content_exists("404", None).await.unwrap_err();
    assert!(err.is_terminal());
}

#[tokio::test]
async fn home_refresh_does_not_erase_cast_and_providers_from_a_full_record() {
    let (endpoint, items) = trending_movies(3); // includes id 1
    let tmdb = Arc::new(FakeTmdb {
        listings: HashMap::from([(endpoint, items)]),
        providers: HashMap::from([("1".to_string(), vec!["Netflix".to_string()])]),
        ..FakeTmdb::default()
    });
    let engine = engine_with(
        tmdb,
        Arc::new(FakeOmdb::default()),
        CacheStore::in_memory(),
        EngineConfig::default(),
    );

    // Full fetch caches cast and providers for title 1.
    let full = engine
        .ensure_content_exists("1", Some(MediaType::Movie))
        .await
        .unwrap();
    assert_eq!(full.cast.len(), 1);
    assert_eq!(
        full.providers.as_deref(),
        Some(["Netflix".to_string()].as_slice())
    );

    // The home refresh writes a listing-derived record for the same title.
    engine.refresh_home().await;

    let details = engine
        .get_details("1", MediaType::Movie)
        .await
        .expect("cached record");
    assert_eq!(details.cast.len(), 1);
    assert_eq!(
        details.providers.as_deref(),
        Some(["Netflix".to_string()].as_slice())
    );
}

#[tokio::test]
async fn ensure_content_with_known_type_is_served_from_fresh_cache() {
    let tmdb = Arc::new(FakeTmdb::default());
    let engine = engine_with(
        tmdb.clone(),
        Arc::new(FakeOmdb::default()),
        CacheStore::in_memory(),
        EngineConfig::default(),
    );

    engine
        .ensure_content_exists("603", Some(MediaType::Movie))
        .await
        .unwrap();
    let calls_after_first = tmdb.detail_calls.load(Ordering::SeqCst);

    engine
        .ensure_content_exists("603", Some(MediaType::Movie))
        .await
        .unwrap();
    assert_eq!(tmdb.detail_calls.load(Ordering::SeqCst), calls_after_first);
}

#[tokio::test]
async fn snapshot_restores_home_lists_across_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let snapshot_path = dir.path().join("home_cache.json");
    let config = EngineConfig {
        snapshot_path: Some(snapshot_path.clone()),
        ..EngineConfig::default()
    };

    let (endpoint, items) = trending_movies(5);
    let tmdb = Arc::new(FakeTmdb {
        listings: HashMap::from([(endpoint, items)]),
        ..FakeTmdb::default()
    });
    let engine = engine_with(
        tmdb,
        Arc::new(FakeOmdb::default()),
        CacheStore::in_memory(),
        config.clone(),
    );
    engine.refresh_home().await;
    drop(engine);

    // Second process: upstream is down, but the snapshot carries the lists.
    let restored = HomeSnapshot::load(&snapshot_path).await;
    assert_eq!(restored.slot(Category::TrendingMovies).len(), 5);

    let down = Arc::new(FakeTmdb {
        listing_down: AtomicBool::new(true),
        ..FakeTmdb::default()
    });
    let engine = engine_with(
        down,
        Arc::new(FakeOmdb::default()),
        CacheStore::in_memory(),
        config,
    );
    engine.clone().start().await;
    let list = engine.get_category(Category::TrendingMovies).await;
    assert_eq!(list.len(), 5);
    assert_eq!(list[0].title, "Movie 1");
}

#[tokio::test]
async fn providers_are_fetched_only_when_a_provider_filter_is_active() {
    let tmdb = Arc::new(FakeTmdb {
        discover_pages: HashMap::from([(
            (MediaType::Movie, 1),
            vec![
                listing_item(1, MediaType::Movie),
                listing_item(2, MediaType::Movie),
            ],
        )]),
        providers: HashMap::from([("1".to_string(), vec!["Netflix".to_string()])]),
        ..FakeTmdb::default()
    });
    let engine = engine_with(
        tmdb.clone(),
        Arc::new(FakeOmdb::default()),
        CacheStore::in_memory(),
        EngineConfig::default(),
    );

    let unfiltered = engine
        .list_page(MediaType::Movie, 1, &Filters::default(), None)
        .await;
    assert_eq!(unfiltered.len(), 2);
    assert_eq!(tmdb.provider_calls.load(Ordering::SeqCst), 0);
    assert!(unfiltered.iter().all(|c| c.providers.is_none()));

    let filters = Filters {
        providers: vec!["Netflix".to_string()],
        ..Filters::default()
    };
    let filtered = engine
        .list_page(MediaType::Movie, 1, &filters, None)
        .await;
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].tmdb_id, "1");
    assert_eq!(
        filtered[0].providers.as_deref(),
        Some(["Netflix".to_string()].as_slice())
    );
    assert_eq!(tmdb.provider_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn discovery_page_memo_avoids_refetching_the_same_page() {
    let tmdb = Arc::new(FakeTmdb {
        discover_pages: HashMap::from([(
            (MediaType::Movie, 1),
            vec![listing_item(1, MediaType::Movie)],
        )]),
        ..FakeTmdb::default()
    });
    let engine = engine_with(
        tmdb.clone(),
        Arc::new(FakeOmdb::default()),
        CacheStore::in_memory(),
        EngineConfig::default(),
    );

    let first = engine
        .list_page(MediaType::Movie, 1, &Filters::default(), None)
        .await;
    let second = engine
        .list_page(MediaType::Movie, 1, &Filters::default(), None)
        .await;

    assert_eq!(first, second);
    assert_eq!(tmdb.discover_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn user_rating_filter_applies_after_the_memo() {
    let tmdb = Arc::new(FakeTmdb {
        discover_pages: HashMap::from([(
            (MediaType::Movie, 1),
            vec![
                listing_item(1, MediaType::Movie),
                listing_item(2, MediaType::Movie),
            ],
        )]),
        ..FakeTmdb::default()
    });
    let engine = engine_with(
        tmdb,
        Arc::new(FakeOmdb::default()),
        CacheStore::in_memory(),
        EngineConfig::default(),
    );

    let filters = Filters {
        user_rating_min: Some(7.0),
        ..Filters::default()
    };
    let ratings = HashMap::from([("1".to_string(), 9.0f32)]);

    let for_user = engine
        .list_page(MediaType::Movie, 1, &filters, Some(&ratings))
        .await;
    assert_eq!(for_user.len(), 1);
    assert_eq!(for_user[0].tmdb_id, "1");

    // Same page and filters, no ratings supplied: nothing passes.
    let anonymous = engine
        .list_page(MediaType::Movie, 1, &filters, None)
        .await;
    assert!(anonymous.is_empty());
}

#[tokio::test]
async fn details_degrade_to_the_stale_record_when_upstream_is_down() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store_path = dir.path().join("content_store.json");

    let stale = Content {
        tmdb_id: "603".to_string(),
        media_type: MediaType::Movie,
        title: "Old Movie 603".to_string(),
        release_year: 1999,
        poster: POSTER_PLACEHOLDER.to_string(),
        overview: String::new(),
        language: "en".to_string(),
        genres: vec!["Action".to_string()],
        providers: None,
        imdb_rating: Some(8.7),
        rt_rating: None,
        cast: vec![],
        last_synced_at: Some(Utc::now() - ChronoDuration::hours(48)),
    };
    tokio::fs::write(&store_path, serde_json::to_vec(&vec![stale]).unwrap())
        .await
        .unwrap();

    let tmdb = Arc::new(FakeTmdb {
        terminal_details: HashSet::from([(MediaType::Movie, "603".to_string())]),
        ..FakeTmdb::default()
    });
    let engine = engine_with(
        tmdb,
        Arc::new(FakeOmdb::default()),
        CacheStore::open(store_path).await,
        EngineConfig::default(),
    );

    let content = engine
        .get_details("603", MediaType::Movie)
        .await
        .expect("stale record served");
    assert_eq!(content.title, "Old Movie 603");
    assert_eq!(content.imdb_rating, Some(8.7));
}

#[tokio::test]
async fn router_serves_health_and_content_routes() {
    let (endpoint, items) = trending_movies(2);
    let tmdb = Arc::new(FakeTmdb {
        listings: HashMap::from([(endpoint, items)]),
        ..FakeTmdb::default()
    });
    let engine = engine_with(
        tmdb,
        Arc::new(FakeOmdb::default()),
        CacheStore::in_memory(),
        EngineConfig::default(),
    );
    engine.refresh_home().await;
    let app = build_router(AppState { engine });

    let res = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(
            Request::get("/content/trending")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let list: Vec<Content> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(list.len(), 2);

    let res = app
        .oneshot(Request::get("/movies/603").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let movie: Content = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(movie.title, "Movie 603");
    assert_eq!(movie.cast.len(), 1);
}
