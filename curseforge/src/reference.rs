use crate::client::CurseForge;
use crate::error::UpstreamError;
use crate::metrics_defs::{REFERENCE_GAMES, REFERENCE_REFRESH_DURATION};
use crate::models::{Category, Game};
use parking_lot::RwLock;
use shared::{gauge, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;

// Guards the parent walk against cyclic taxonomies.
const MAX_CATEGORY_DEPTH: usize = 32;

#[derive(Debug, Default)]
struct ReferenceData {
    games: HashMap<u64, Game>,
    categories: HashMap<u64, Arc<Vec<Category>>>,
}

/// Process-wide games and category taxonomies.
///
/// Readers always see a complete snapshot. A refresh builds the next snapshot
/// off to the side and swaps it in whole; a failed refresh leaves the
/// previous snapshot in place.
pub struct ReferenceCache {
    client: CurseForge,
    data: RwLock<Arc<ReferenceData>>,
    // Only one refresh runs at a time.
    update_lock: Semaphore,
    // Set once any snapshot of games has been loaded.
    ready: AtomicBool,
}

impl ReferenceCache {
    pub fn new(client: CurseForge) -> Self {
        ReferenceCache {
            client,
            data: RwLock::new(Arc::new(ReferenceData::default())),
            update_lock: Semaphore::new(1),
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Reloads games, plus the categories of every game whose taxonomy was
    /// already cached.
    pub async fn refresh(&self) -> Result<(), UpstreamError> {
        let _permit = self.update_lock.acquire().await;
        let start = Instant::now();

        let games = self.client.games().await?;
        let cached_game_ids: Vec<u64> = self.data.read().categories.keys().copied().collect();

        let mut categories = HashMap::with_capacity(cached_game_ids.len());
        for game_id in cached_game_ids {
            let listing = self.client.categories(game_id).await?;
            categories.insert(game_id, Arc::new(listing));
        }

        let next = ReferenceData {
            games: games.into_iter().map(|game| (game.id, game)).collect(),
            categories,
        };
        let game_count = next.games.len();
        *self.data.write() = Arc::new(next);
        self.ready.store(true, Ordering::Relaxed);

        histogram!(REFERENCE_REFRESH_DURATION).record(start.elapsed().as_secs_f64());
        gauge!(REFERENCE_GAMES).set(game_count as f64);
        tracing::info!(games = game_count, "reference data refreshed");
        Ok(())
    }

    /// Loads the games list if no snapshot exists yet.
    pub async fn ensure_loaded(&self) -> Result<(), UpstreamError> {
        if self.is_ready() {
            return Ok(());
        }
        self.refresh().await
    }

    pub fn game(&self, id: u64) -> Option<Game> {
        self.data.read().games.get(&id).cloned()
    }

    pub fn game_by_slug(&self, slug: &str) -> Option<Game> {
        self.data
            .read()
            .games
            .values()
            .find(|game| game.slug == slug)
            .cloned()
    }

    /// Category taxonomy of a game, fetched on first use.
    pub async fn categories(&self, game_id: u64) -> Result<Arc<Vec<Category>>, UpstreamError> {
        if game_id == 0 {
            return Ok(Arc::new(Vec::new()));
        }
        let cached = self.data.read().categories.get(&game_id).cloned();
        if let Some(categories) = cached {
            return Ok(categories);
        }

        let listing = Arc::new(self.client.categories(game_id).await?);

        let mut data = self.data.write();
        let mut next = ReferenceData {
            games: data.games.clone(),
            categories: data.categories.clone(),
        };
        next.categories.insert(game_id, listing.clone());
        *data = Arc::new(next);

        Ok(listing)
    }
}

/// Walks up from `category_id` to the topmost ancestor present in
/// `categories`. Returns `None` when `category_id` itself is unknown.
pub fn primary_category(categories: &[Category], category_id: u64) -> Option<&Category> {
    let by_id: HashMap<u64, &Category> = categories.iter().map(|c| (c.id, c)).collect();

    let mut current = *by_id.get(&category_id)?;
    for _ in 0..MAX_CATEGORY_DEPTH {
        match current.parent().and_then(|parent| by_id.get(&parent)) {
            Some(parent) => current = parent,
            None => return Some(current),
        }
    }

    tracing::warn!(category_id, "category parent chain too deep");
    Some(current)
}
