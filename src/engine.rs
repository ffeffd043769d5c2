//! Content aggregation engine: home-category refresh orchestration, the
//! discovery/filter pipeline, and the cache-first read surface.

use crate::error::FetchError;
use crate::model::{Category, Content, ContentKey, Filters, MediaType};
use crate::normalize::{self, GenreMap};
use crate::omdb::OmdbApi;
use crate::snapshot::HomeSnapshot;
use crate::store::CacheStore;
use crate::tmdb::{DiscoverQuery, ListingItem, TmdbApi};
use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

type PageKey = (MediaType, u32, String);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub snapshot_path: Option<PathBuf>,
    /// How many listing results each rolling list keeps, at most.
    pub home_list_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            home_list_size: 20,
        }
    }
}

/// Long-lived aggregation engine. All formerly ambient caches (genre map,
/// ratings memo, page memo, rolling lists) are instance-owned; one engine
/// is constructed at process start and torn down at shutdown.
pub struct Engine {
    tmdb: Arc<dyn TmdbApi>,
    omdb: Arc<dyn OmdbApi>,
    store: CacheStore,
    genres: GenreMap,
    lists: RwLock<HomeSnapshot>,
    refreshing: AtomicBool,
    page_memo: Mutex<HashMap<PageKey, Vec<Content>>>,
    snapshot_path: Option<PathBuf>,
    home_list_size: usize,
}

/// Clears the refresh guard even if a cycle unwinds early, so a failed
/// cycle cannot wedge the orchestrator into "always busy".
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Engine {
    pub fn new(
        tmdb: Arc<dyn TmdbApi>,
        omdb: Arc<dyn OmdbApi>,
        store: CacheStore,
        config: EngineConfig,
    ) -> Self {
        Self {
            tmdb,
            omdb,
            store,
            genres: GenreMap::new(),
            lists: RwLock::new(HomeSnapshot::default()),
            refreshing: AtomicBool::new(false),
            page_memo: Mutex::new(HashMap::new()),
            snapshot_path: config.snapshot_path,
            home_list_size: config.home_list_size,
        }
    }

    /// Restores the last home snapshot, then kicks off the initial refresh
    /// and the daily schedule in the background. Readers are served from
    /// the restored snapshot while the first cycle runs.
    pub async fn start(self: Arc<Self>) {
        if let Some(path) = &self.snapshot_path {
            *self.lists.write().await = HomeSnapshot::load(path).await;
        }
        let engine = self;
        tokio::spawn(async move {
            engine.refresh_home().await;
            let mut tick = tokio::time::interval(REFRESH_INTERVAL);
            tick.tick().await; // the immediate tick; startup refresh already ran
            loop {
                tick.tick().await;
                engine.refresh_home().await;
            }
        });
    }

    /// Refreshes all five rolling lists. At most one cycle runs process-wide;
    /// a concurrent trigger is a no-op.
    pub async fn refresh_home(&self) {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            debug!("home refresh already in flight, skipping trigger");
            return;
        }
        let _guard = RefreshGuard(&self.refreshing);
        info!("refreshing home categories");

        join_all(Category::ALL.map(|category| self.refresh_category(category))).await;

        // Persist whatever we have, success or partial failure.
        if let Some(path) = &self.snapshot_path {
            let snapshot = self.lists.read().await.clone();
            snapshot.save(path).await;
        }
        info!("home refresh done, {} titles cached", self.store.len().await);
    }

    async fn refresh_category(&self, category: Category) {
        let page = match self.tmdb.listing(category.endpoint(), 1).await {
            Ok(items) => items,
            Err(e) => {
                // Stale-but-present beats empty: the previous list stays.
                warn!("listing fetch for {:?} failed, keeping previous list: {e}", category);
                return;
            }
        };

        let media = category.media_type();
        let results = join_all(
            page.into_iter()
                .take(self.home_list_size)
                .map(|item| self.fetch_home_item(item, media)),
        )
        .await;
        let fresh: Vec<Content> = results.into_iter().flatten().collect();

        let count = fresh.len();
        {
            let mut lists = self.lists.write().await;
            *lists.slot_mut(category) = fresh;
        }
        info!("committed {count} items for {:?}", category);
    }

    /// Detail + ratings for one home list entry. A failed detail fetch
    /// drops the item; a failed enrichment keeps it with null ratings.
    async fn fetch_home_item(&self, item: ListingItem, media: MediaType) -> Option<Content> {
        let genres = self.genres.resolve(&item.genre_ids, self.tmdb.as_ref()).await;
        let mut content = normalize::from_listing(&item, media, genres);

        let detail = match self.tmdb.detail(media, &content.tmdb_id, false).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!("dropping {} {} from home list: {e}", media.as_path(), content.tmdb_id);
                return None;
            }
        };
        self.enrich_ratings(&mut content, detail.imdb_ref()).await;
        Some(self.store.upsert(content).await)
    }

    async fn enrich_ratings(&self, content: &mut Content, imdb_ref: Option<&str>) {
        let Some(imdb_id) = imdb_ref else { return };
        match self.omdb.ratings(imdb_id).await {
            Ok(pair) => {
                content.imdb_rating = pair.imdb;
                content.rt_rating = pair.rt;
            }
            // Best effort: core content never blocks on the ratings provider.
            Err(e) => warn!("ratings enrichment failed for {imdb_id}: {e}"),
        }
    }

    /// Serves one rolling list. An empty slot triggers a background refresh
    /// and is returned as-is; the reader never waits on upstream. A
    /// stale-but-non-empty list is also served as-is.
    pub async fn get_category(self: Arc<Self>, category: Category) -> Vec<Content> {
        {
            let lists = self.lists.read().await;
            let slot = lists.slot(category);
            if !slot.is_empty() {
                return slot.to_vec();
            }
        }
        info!("{:?} is empty, triggering background refresh", category);
        tokio::spawn(async move { self.refresh_home().await });
        Vec::new()
    }

    /// Cache-first detail lookup. Falls back to a live fetch on miss or
    /// stale, and degrades to the stale record when upstream is down.
    pub async fn get_details(&self, tmdb_id: &str, media: MediaType) -> Option<Content> {
        let key: ContentKey = (tmdb_id.to_string(), media);
        if let Some(content) = self.store.get_fresh(&key).await {
            return Some(content);
        }
        match self.fetch_full(tmdb_id, media).await {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(
                    "live fetch for {} {tmdb_id} failed ({e}), serving stale if present",
                    media.as_path()
                );
                self.store.get(&key).await.map(|(content, _fresh)| content)
            }
        }
    }

    /// Fetches-and-upserts so a rating or watchlist record can always
    /// reference a materialized row. With no type given, the movie lookup
    /// runs first and tv is attempted only after a terminal movie failure.
    pub async fn ensure_content_exists(
        &self,
        tmdb_id: &str,
        media: Option<MediaType>,
    ) -> Result<Content, FetchError> {
        if let Some(media) = media {
            let key: ContentKey = (tmdb_id.to_string(), media);
            if let Some(content) = self.store.get_fresh(&key).await {
                return Ok(content);
            }
            return self.fetch_full(tmdb_id, media).await;
        }
        match self.fetch_full(tmdb_id, MediaType::Movie).await {
            Ok(content) => Ok(content),
            Err(movie_err) if movie_err.is_terminal() => {
                debug!("movie lookup for {tmdb_id} failed terminally, trying tv");
                self.fetch_full(tmdb_id, MediaType::Tv).await
            }
            Err(e) => Err(e),
        }
    }

    /// Full canonical record: detail with credits, providers, ratings.
    async fn fetch_full(&self, tmdb_id: &str, media: MediaType) -> Result<Content, FetchError> {
        let detail = self.tmdb.detail(media, tmdb_id, true).await?;
        let mut content = normalize::from_detail(&detail, media);
        self.enrich_ratings(&mut content, detail.imdb_ref()).await;
        match self.tmdb.watch_providers(media, tmdb_id).await {
            Ok(providers) => content.providers = Some(providers),
            // Leave providers as None: absence of data, not an empty set.
            Err(e) => warn!("provider fetch failed for {} {tmdb_id}: {e}", media.as_path()),
        }
        Ok(self.store.upsert(content).await)
    }

    /// Paginated, filtered discovery. One upstream page per call with a
    /// process-lifetime memo per (type, page, filters); the per-user rating
    /// filter is evaluated on every call since the map is caller-supplied.
    pub async fn list_page(
        &self,
        media: MediaType,
        page: u32,
        filters: &Filters,
        user_ratings: Option<&HashMap<String, f32>>,
    ) -> Vec<Content> {
        let memo_key: PageKey = (media, page, filters.fingerprint());
        if let Some(hit) = self.page_memo.lock().await.get(&memo_key).cloned() {
            return hit
                .into_iter()
                .filter(|c| filters.matches_user_rating(c, user_ratings))
                .collect();
        }

        let query = DiscoverQuery {
            genre_ids: self.genres.ids_for_names(&filters.genres, self.tmdb.as_ref()).await,
            year_min: filters.release_year_min,
            year_max: filters.release_year_max,
        };
        let items = match self.tmdb.discover(media, page, &query).await {
            Ok(items) => items,
            Err(e) => {
                warn!("discover page {page} for {} failed: {e}", media.as_path());
                return Vec::new();
            }
        };

        let results = join_all(
            items
                .into_iter()
                .map(|item| self.evaluate_candidate(item, media, filters)),
        )
        .await;
        let passed: Vec<Content> = results.into_iter().flatten().collect();

        self.page_memo
            .lock()
            .await
            .insert(memo_key, passed.clone());
        passed
            .into_iter()
            .filter(|c| filters.matches_user_rating(c, user_ratings))
            .collect()
    }

    /// Enriches one discovery candidate and applies filters 1-4. Provider
    /// data is only fetched when a provider filter is active.
    async fn evaluate_candidate(
        &self,
        item: ListingItem,
        media: MediaType,
        filters: &Filters,
    ) -> Option<Content> {
        let genres = self.genres.resolve(&item.genre_ids, self.tmdb.as_ref()).await;
        let mut content = normalize::from_listing(&item, media, genres);

        let detail = match self.tmdb.detail(media, &content.tmdb_id, false).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!("dropping candidate {} {}: {e}", media.as_path(), content.tmdb_id);
                return None;
            }
        };
        self.enrich_ratings(&mut content, detail.imdb_ref()).await;

        if filters.wants_providers() {
            match self.tmdb.watch_providers(media, &content.tmdb_id).await {
                Ok(providers) => content.providers = Some(providers),
                Err(e) => warn!("provider fetch failed for {}: {e}", content.tmdb_id),
            }
        }

        // Opportunistic write; racing upserts are last-write-wins by key.
        let content = self.store.upsert(content).await;
        filters.matches_content(&content).then_some(content)
    }

    pub async fn get_genre_names(&self) -> Vec<String> {
        self.genres.names(self.tmdb.as_ref()).await
    }

    /// Multi-search across movies and series; normalized, no enrichment.
    pub async fn search(&self, query: &str) -> Vec<Content> {
        let items = match self.tmdb.search_multi(query).await {
            Ok(items) => items,
            Err(e) => {
                warn!("search for '{query}' failed: {e}");
                return Vec::new();
            }
        };
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let media = match item.media_type.as_deref() {
                Some("tv") => MediaType::Tv,
                _ => MediaType::Movie,
            };
            let genres = self.genres.resolve(&item.genre_ids, self.tmdb.as_ref()).await;
            results.push(normalize::from_listing(&item, media, genres));
        }
        results
    }
}
