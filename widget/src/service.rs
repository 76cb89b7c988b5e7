use crate::authors::AuthorIndex;
use crate::config::Config;
use crate::errors::{StoreError, WidgetError};
use crate::flight::SingleFlight;
use crate::metrics_defs::QUEUE_DROPPED;
use crate::models::{AuthorResponse, ProjectProperties, ProjectStatus};
use crate::resolver::{Resolution, Resolver, normalize_path};
use crate::response_cache::ResponseCache;
use crate::store::{Store, find_or_create_project};
use crate::sync::ProjectSyncer;
use crate::workers::{self, Queues};
use chrono::Utc;
use curseforge::{CurseForge, ReferenceCache};
use parking_lot::Mutex;
use shared::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

const AUTHOR_PREFIX: &str = "author/";
const AUTHOR_SEARCH_PREFIX: &str = "search/";

/// What a request path resolved to.
#[derive(Debug)]
pub enum Lookup {
    Project(Box<ProjectProperties>),
    Author(AuthorResponse),
}

/// State shared by the request handlers and every background task.
pub(crate) struct Core {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub reference: Arc<ReferenceCache>,
    pub resolver: Resolver,
    pub syncer: ProjectSyncer,
    pub authors: AuthorIndex,
    pub cache: ResponseCache,
    pub resolutions: SingleFlight<String, Resolution>,
    pub syncs: SingleFlight<u64, Result<(), String>>,
    pub queues: Queues,
}

impl Core {
    fn staleness(&self) -> Duration {
        Duration::from_secs(self.config.sync.staleness_secs)
    }

    /// True when the canonical record of `external_id` is missing, pending,
    /// undecodable or stale.
    pub async fn needs_sync(&self, external_id: u64) -> Result<bool, StoreError> {
        let Some(record) = self.store.canonical_project(external_id).await? else {
            return Ok(true);
        };

        let stale = record.is_stale(self.staleness(), Utc::now());
        Ok(match record.status {
            ProjectStatus::Pending => true,
            ProjectStatus::Ok => stale || record.parsed_properties().is_none(),
            ProjectStatus::Forbidden | ProjectStatus::NotFound => stale,
            ProjectStatus::Redirect => false,
        })
    }

    /// Waits for the resolution worker to process `path`. Concurrent callers
    /// for the same path share one queue entry.
    async fn resolve_path(&self, path: &str) -> Result<u64, WidgetError> {
        let flight = self.resolutions.join(path.to_string());

        if flight.leader {
            let rejected = match self.queues.resolve.try_send(path.to_string()) {
                Ok(()) => None,
                Err(TrySendError::Full(_)) => {
                    counter!(QUEUE_DROPPED, "queue" => "resolve").increment(1);
                    Some(WidgetError::QueueFull("resolve"))
                }
                Err(TrySendError::Closed(_)) => Some(WidgetError::Unavailable("resolve")),
            };
            if let Some(err) = rejected {
                self.resolutions
                    .complete(&path.to_string(), Resolution::Failed(err.to_string()));
                return Err(err);
            }
        }

        match flight.wait().await {
            Some(Resolution::Resolved(external_id)) => Ok(external_id),
            Some(Resolution::NotFound(reason)) => Err(WidgetError::Resolution(reason)),
            Some(Resolution::Failed(reason)) => Err(WidgetError::UpstreamTransient(reason)),
            None => Err(WidgetError::Unavailable("resolve")),
        }
    }

    /// Runs one sync of `external_id` on a detached task, shared with any
    /// concurrent caller. Unless `force` is set, a fresh record is left alone.
    async fn sync_shared(self: &Arc<Self>, external_id: u64, force: bool) -> Result<(), WidgetError> {
        let flight = self.syncs.join(external_id);

        if flight.leader {
            let core = self.clone();
            tokio::spawn(async move {
                let result = if force {
                    Ok(true)
                } else {
                    core.needs_sync(external_id).await
                };
                let result = match result {
                    Ok(true) => core.syncer.sync(external_id).await.map(|_| ()),
                    Ok(false) => Ok(()),
                    Err(err) => Err(err.into()),
                };
                core.syncs
                    .complete(&external_id, result.map_err(|err| err.to_string()));
            });
        }

        match flight.wait().await {
            Some(Ok(())) => Ok(()),
            Some(Err(reason)) => Err(WidgetError::UpstreamTransient(reason)),
            None => Err(WidgetError::Unavailable("sync")),
        }
    }

    async fn lookup_project(self: &Arc<Self>, path: &str) -> Result<ProjectProperties, WidgetError> {
        if path.is_empty() {
            return Err(WidgetError::UpstreamNotFound);
        }

        let record = find_or_create_project(self.store.as_ref(), path).await?;
        let external_id = match record.external_id {
            Some(external_id) => external_id,
            None if self.resolver.needs_resolution(&record) => self.resolve_path(path).await?,
            None => {
                return Err(WidgetError::Resolution(format!(
                    "{path} does not name a project"
                )));
            }
        };

        if self.needs_sync(external_id).await? {
            if let Err(err) = self.sync_shared(external_id, false).await {
                // A previously synced record is still worth serving.
                let usable = self
                    .store
                    .canonical_project(external_id)
                    .await?
                    .is_some_and(|p| p.status != ProjectStatus::Pending);
                if !usable {
                    return Err(err);
                }
                tracing::warn!(external_id, error = %err, "serving stale project");
            }
        }

        let canonical = self
            .store
            .canonical_project(external_id)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("project {external_id}")))?;

        match canonical.status {
            ProjectStatus::Ok => canonical
                .parsed_properties()
                .ok_or_else(|| WidgetError::UpstreamTransient("project has no data".into())),
            ProjectStatus::Forbidden => Err(WidgetError::UpstreamForbidden),
            ProjectStatus::NotFound => Err(WidgetError::UpstreamNotFound),
            ProjectStatus::Pending | ProjectStatus::Redirect => Err(WidgetError::UpstreamTransient(
                format!("project {external_id} is not synchronized"),
            )),
        }
    }

    async fn lookup_author(&self, key: &str) -> Result<AuthorResponse, WidgetError> {
        let author = match key.strip_prefix(AUTHOR_SEARCH_PREFIX) {
            Some(username) => self.store.author_by_username(username).await?,
            None => match key.parse::<u64>() {
                Ok(member_id) => self.store.author_by_member_id(member_id).await?,
                Err(_) => None,
            },
        };
        let author = author.ok_or(WidgetError::UpstreamNotFound)?;

        let window = Duration::from_secs(self.config.authors.staleness_secs);
        if !author.is_stale(window, Utc::now()) {
            return Ok(author.to_response());
        }

        match self.authors.resync(author.member_id).await {
            Ok(fresh) => Ok(fresh.to_response()),
            Err(err) => {
                tracing::warn!(member_id = author.member_id, error = %err, "serving stale author");
                Ok(author.to_response())
            }
        }
    }
}

/// Entry point of the widget core. Cloning is cheap; all clones share the
/// same state and background tasks.
#[derive(Clone)]
pub struct Widget {
    core: Arc<Core>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Widget {
    /// Builds the service and spawns its workers and periodic tasks. Must be
    /// called from within a tokio runtime.
    pub fn new(config: Config, client: CurseForge, store: Arc<dyn Store>) -> Self {
        let reference = Arc::new(ReferenceCache::new(client.clone()));
        let authors = AuthorIndex::new(store.clone());
        let (queues, receivers) = workers::queues(
            config.resolver.queue_capacity,
            config.sync.queue_capacity,
            config.authors.queue_capacity,
        );

        let core = Arc::new(Core {
            resolver: Resolver::new(
                client.clone(),
                reference.clone(),
                store.clone(),
                Duration::from_secs(config.sync.staleness_secs),
            ),
            syncer: ProjectSyncer::new(client, reference.clone(), store.clone(), authors.clone()),
            cache: ResponseCache::new(config.cache.ttl(), config.cache.max_entries),
            resolutions: SingleFlight::new(),
            syncs: SingleFlight::new(),
            config,
            store,
            reference,
            authors,
            queues,
        });

        let mut tasks = vec![
            tokio::spawn(workers::resolve_worker(core.clone(), receivers.resolve)),
            tokio::spawn(workers::author_worker(core.clone(), receivers.authors)),
            tokio::spawn(workers::scan_projects(core.clone())),
            tokio::spawn(workers::scan_authors(core.clone())),
            tokio::spawn(workers::refresh_reference(core.clone())),
            tokio::spawn(workers::sweep_cache(core.clone())),
        ];
        let sync_rx = Arc::new(tokio::sync::Mutex::new(receivers.sync));
        for _ in 0..core.config.sync.workers {
            tasks.push(tokio::spawn(workers::sync_worker(core.clone(), sync_rx.clone())));
        }

        tracing::info!(sync_workers = core.config.sync.workers, "widget started");

        Widget {
            core,
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }

    /// Resolves a raw request path to a project or an author.
    pub async fn lookup(&self, raw_path: &str) -> Result<Lookup, WidgetError> {
        let path = normalize_path(raw_path);
        match path.strip_prefix(AUTHOR_PREFIX) {
            Some(key) => self.core.lookup_author(key).await.map(Lookup::Author),
            None => self
                .core
                .lookup_project(&path)
                .await
                .map(|properties| Lookup::Project(Box::new(properties))),
        }
    }

    pub async fn lookup_project(&self, raw_path: &str) -> Result<ProjectProperties, WidgetError> {
        self.core.lookup_project(&normalize_path(raw_path)).await
    }

    pub async fn lookup_author(&self, key: &str) -> Result<AuthorResponse, WidgetError> {
        self.core.lookup_author(key).await
    }

    /// Synchronizes `external_id` now, regardless of freshness.
    pub async fn sync_now(&self, external_id: u64) -> Result<(), WidgetError> {
        let path = external_id.to_string();
        let record = find_or_create_project(self.core.store.as_ref(), &path).await?;
        if self.core.resolver.needs_resolution(&record) {
            self.core.resolve_path(&path).await?;
        }
        self.core.sync_shared(external_id, true).await
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.core.cache
    }

    /// Ready once reference data has been loaded.
    pub fn is_ready(&self) -> bool {
        self.core.reference.is_ready()
    }

    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in &tasks {
            task.abort();
        }
        tracing::info!(tasks = tasks.len(), "widget stopped");
    }
}
