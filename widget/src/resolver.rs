//! Maps request paths to CurseForge project ids.

use crate::errors::{ResolveError, StoreError};
use crate::metrics_defs::RESOLUTIONS;
use crate::models::{Project, ProjectStatus};
use crate::store::{Store, find_or_create_project};
use chrono::Utc;
use curseforge::{CurseForge, PAGE_SIZE, ReferenceCache, SearchQuery};
use shared::counter;
use std::sync::Arc;
use std::time::Duration;

// Search results past this index are never scanned.
const MAX_SEARCH_INDEX: u32 = 10_000;

/// Strips leading and trailing slashes and a `.json`/`.png` suffix, and
/// rewrites the legacy `mc-mods/minecraft/<slug>` ordering.
pub fn normalize_path(raw: &str) -> String {
    let path = raw.trim_matches('/');
    let path = path.strip_suffix(".json").unwrap_or(path);
    let path = path.strip_suffix(".png").unwrap_or(path);

    match path.strip_prefix("mc-mods/minecraft/") {
        Some(slug) => format!("minecraft/mc-mods/{slug}"),
        None => path.to_string(),
    }
}

#[derive(Debug, PartialEq)]
pub enum PathKind<'a> {
    Numeric(u64),
    Structured {
        game: &'a str,
        category: &'a str,
        slug: &'a str,
    },
    Opaque(&'a str),
}

pub fn classify(path: &str) -> PathKind<'_> {
    if let Ok(id) = path.parse::<u64>() {
        return PathKind::Numeric(id);
    }

    let segments: Vec<&str> = path.split('/').collect();
    match segments[..] {
        [game, category, slug] if !game.is_empty() && !category.is_empty() && !slug.is_empty() => {
            PathKind::Structured {
                game,
                category,
                slug,
            }
        }
        _ => PathKind::Opaque(path.rsplit('/').next().unwrap_or(path)),
    }
}

/// Result of processing one path on the resolution queue.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Resolved(u64),
    /// The path does not name a project.
    NotFound(String),
    /// Transient failure. The record stays unresolved.
    Failed(String),
}

pub struct Resolver {
    client: CurseForge,
    reference: Arc<ReferenceCache>,
    store: Arc<dyn Store>,
    // Age after which a failed resolution may be attempted again.
    retry_after: Duration,
}

impl Resolver {
    pub fn new(
        client: CurseForge,
        reference: Arc<ReferenceCache>,
        store: Arc<dyn Store>,
        retry_after: Duration,
    ) -> Self {
        Resolver {
            client,
            reference,
            store,
            retry_after,
        }
    }

    /// Whether `project` still has to go through [`Resolver::process`].
    pub fn needs_resolution(&self, project: &Project) -> bool {
        if project.external_id.is_some() {
            return false;
        }
        match project.status {
            ProjectStatus::Pending => true,
            ProjectStatus::NotFound => project.is_stale(self.retry_after, Utc::now()),
            _ => false,
        }
    }

    /// Maps a normalized path to an external id. Numeric paths never reach
    /// the network.
    pub async fn resolve(&self, path: &str) -> Result<u64, ResolveError> {
        match classify(path) {
            PathKind::Numeric(id) => Ok(id),
            PathKind::Structured {
                game,
                category,
                slug,
            } => {
                self.reference.ensure_loaded().await?;
                let game = self
                    .reference
                    .game_by_slug(game)
                    .ok_or_else(|| ResolveError::UnknownGame(game.to_string()))?;

                let categories = self.reference.categories(game.id).await?;
                let class_id = categories
                    .iter()
                    .find(|c| c.slug == category)
                    .map(|c| c.search_class_id())
                    .ok_or_else(|| ResolveError::UnknownCategory {
                        game: game.slug.clone(),
                        category: category.to_string(),
                    })?;

                self.search(&SearchQuery::scoped(game.id, class_id, slug))
                    .await
            }
            PathKind::Opaque(slug) => self.search(&SearchQuery::slug(slug)).await,
        }
    }

    /// Scans every result page for an exact slug match.
    async fn search(&self, query: &SearchQuery) -> Result<u64, ResolveError> {
        // An empty slug filter would list every project upstream.
        if query.slug.is_empty() {
            return Err(ResolveError::SlugNotFound(String::new()));
        }

        let mut index = 0;
        loop {
            let page = self.client.search_page(query, index).await?;
            let result_count = page.result_count();
            if let Some(found) = page.data.iter().find(|m| m.slug == query.slug) {
                return Ok(found.id);
            }

            index += PAGE_SIZE;
            if result_count < PAGE_SIZE as usize || index + PAGE_SIZE > MAX_SEARCH_INDEX {
                return Err(ResolveError::SlugNotFound(query.slug.clone()));
            }
        }
    }

    /// Resolves the record for `path` and stores the outcome. Runs on the
    /// single resolution worker, so claims for one external id never race.
    pub async fn process(&self, path: &str) -> Resolution {
        let resolution = match self.process_inner(path).await {
            Ok(resolution) => resolution,
            Err(err) => {
                tracing::error!(path, error = %err, "failed to store resolution");
                Resolution::Failed(err.to_string())
            }
        };

        let outcome = match &resolution {
            Resolution::Resolved(_) => "resolved",
            Resolution::NotFound(_) => "not_found",
            Resolution::Failed(_) => "failed",
        };
        counter!(RESOLUTIONS, "outcome" => outcome).increment(1);
        resolution
    }

    async fn process_inner(&self, path: &str) -> Result<Resolution, StoreError> {
        let mut record = find_or_create_project(self.store.as_ref(), path).await?;

        if let Some(external_id) = record.external_id {
            return Ok(Resolution::Resolved(external_id));
        }
        if !self.needs_resolution(&record) {
            return Ok(Resolution::NotFound(path.to_string()));
        }

        match self.resolve(path).await {
            Ok(external_id) => {
                self.claim(record, external_id).await?;
                tracing::debug!(path, external_id, "path resolved");
                Ok(Resolution::Resolved(external_id))
            }
            Err(err) if err.is_definitive() => {
                tracing::info!(path, error = %err, "path does not resolve");
                record.status = ProjectStatus::NotFound;
                record.properties = None;
                self.store.update_project(&record).await?;
                Ok(Resolution::NotFound(err.to_string()))
            }
            Err(err) => {
                tracing::warn!(path, error = %err, "resolution failed");
                Ok(Resolution::Failed(err.to_string()))
            }
        }
    }

    /// Attaches `external_id` to `record`. The record becomes canonical
    /// unless another record already is, in which case it redirects there.
    async fn claim(&self, mut record: Project, external_id: u64) -> Result<Project, StoreError> {
        let canonical = self.store.canonical_project(external_id).await?;

        record.external_id = Some(external_id);
        record.properties = None;
        record.status = match canonical {
            Some(canonical) if canonical.local_id != record.local_id => ProjectStatus::Redirect,
            _ => ProjectStatus::Pending,
        };
        self.store.update_project(&record).await
    }
}
