//! Persisted-record store for projects and authors.
//!
//! Records are read and written whole; concurrent writers of the same record
//! resolve as last write wins.

use crate::errors::StoreError;
use crate::models::{Author, Project, ProjectStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[async_trait]
pub trait Store: Send + Sync {
    async fn project_by_path(&self, path: &str) -> Result<Option<Project>, StoreError>;

    /// The record holding the canonical copy for an external id: an `Ok`
    /// record when one exists, otherwise the oldest non-redirect record.
    async fn canonical_project(&self, external_id: u64) -> Result<Option<Project>, StoreError>;

    /// Inserts a `Pending` record for `path`. Fails with `Conflict` when the
    /// path is already taken.
    async fn create_project(&self, path: &str) -> Result<Project, StoreError>;

    /// Replaces the record with the same local id and stamps `updated_at`.
    async fn update_project(&self, project: &Project) -> Result<Project, StoreError>;

    /// Records with one of `statuses` last updated before `older_than`,
    /// oldest first.
    async fn stale_projects(
        &self,
        statuses: &[ProjectStatus],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Project>, StoreError>;

    async fn author_by_member_id(&self, member_id: u64) -> Result<Option<Author>, StoreError>;

    async fn author_by_username(&self, username: &str) -> Result<Option<Author>, StoreError>;

    /// Inserts an author with an empty project set. Fails with `Conflict`
    /// when the member id is already known.
    async fn create_author(&self, member_id: u64, username: &str) -> Result<Author, StoreError>;

    async fn update_author(&self, author: &Author) -> Result<Author, StoreError>;

    async fn stale_authors(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Author>, StoreError>;
}

/// Reads the record for `path`, creating it when missing. A concurrent
/// creator winning the insert is read back.
pub async fn find_or_create_project(store: &dyn Store, path: &str) -> Result<Project, StoreError> {
    if let Some(project) = store.project_by_path(path).await? {
        return Ok(project);
    }
    match store.create_project(path).await {
        Ok(project) => Ok(project),
        Err(StoreError::Conflict(_)) => store
            .project_by_path(path)
            .await?
            .ok_or_else(|| StoreError::Missing(path.to_string())),
        Err(err) => Err(err),
    }
}

#[derive(Default)]
struct Tables {
    projects: HashMap<u64, Project>,
    project_paths: HashMap<String, u64>,
    authors: HashMap<u64, Author>,
    author_members: HashMap<u64, u64>,
}

/// In-process store backed by hash maps.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Backdates a project. Lets callers exercise staleness without waiting.
    pub fn set_project_updated_at(&self, local_id: u64, updated_at: DateTime<Utc>) {
        if let Some(project) = self.tables.write().projects.get_mut(&local_id) {
            project.updated_at = updated_at;
        }
    }

    pub fn set_author_updated_at(&self, local_id: u64, updated_at: DateTime<Utc>) {
        if let Some(author) = self.tables.write().authors.get_mut(&local_id) {
            author.updated_at = updated_at;
        }
    }

    pub fn projects(&self) -> Vec<Project> {
        let mut projects: Vec<Project> = self.tables.read().projects.values().cloned().collect();
        projects.sort_by_key(|p| p.local_id);
        projects
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn project_by_path(&self, path: &str) -> Result<Option<Project>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .project_paths
            .get(path)
            .and_then(|id| tables.projects.get(id))
            .cloned())
    }

    async fn canonical_project(&self, external_id: u64) -> Result<Option<Project>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .projects
            .values()
            .filter(|p| p.external_id == Some(external_id) && p.status != ProjectStatus::Redirect)
            .min_by_key(|p| (p.status != ProjectStatus::Ok, p.local_id))
            .cloned())
    }

    async fn create_project(&self, path: &str) -> Result<Project, StoreError> {
        let mut tables = self.tables.write();
        if tables.project_paths.contains_key(path) {
            return Err(StoreError::Conflict(path.to_string()));
        }

        let project = Project::new(self.next_id(), path, Utc::now());
        tables.project_paths.insert(path.to_string(), project.local_id);
        tables.projects.insert(project.local_id, project.clone());
        Ok(project)
    }

    async fn update_project(&self, project: &Project) -> Result<Project, StoreError> {
        let mut tables = self.tables.write();
        let stored = tables
            .projects
            .get_mut(&project.local_id)
            .ok_or_else(|| StoreError::Missing(format!("project {}", project.local_id)))?;

        *stored = Project {
            path: stored.path.clone(),
            created_at: stored.created_at,
            updated_at: Utc::now(),
            ..project.clone()
        };
        Ok(stored.clone())
    }

    async fn stale_projects(
        &self,
        statuses: &[ProjectStatus],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Project>, StoreError> {
        let tables = self.tables.read();
        let mut stale: Vec<Project> = tables
            .projects
            .values()
            .filter(|p| statuses.contains(&p.status) && p.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|p| (p.updated_at, p.local_id));
        stale.truncate(limit);
        Ok(stale)
    }

    async fn author_by_member_id(&self, member_id: u64) -> Result<Option<Author>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .author_members
            .get(&member_id)
            .and_then(|id| tables.authors.get(id))
            .cloned())
    }

    async fn author_by_username(&self, username: &str) -> Result<Option<Author>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .authors
            .values()
            .filter(|a| a.username.eq_ignore_ascii_case(username))
            .min_by_key(|a| a.local_id)
            .cloned())
    }

    async fn create_author(&self, member_id: u64, username: &str) -> Result<Author, StoreError> {
        let mut tables = self.tables.write();
        if tables.author_members.contains_key(&member_id) {
            return Err(StoreError::Conflict(format!("member {member_id}")));
        }

        let author = Author::new(self.next_id(), member_id, username, Utc::now());
        tables.author_members.insert(member_id, author.local_id);
        tables.authors.insert(author.local_id, author.clone());
        Ok(author)
    }

    async fn update_author(&self, author: &Author) -> Result<Author, StoreError> {
        let mut tables = self.tables.write();
        let stored = tables
            .authors
            .get_mut(&author.local_id)
            .ok_or_else(|| StoreError::Missing(format!("author {}", author.local_id)))?;

        *stored = Author {
            member_id: stored.member_id,
            created_at: stored.created_at,
            updated_at: Utc::now(),
            ..author.clone()
        };
        Ok(stored.clone())
    }

    async fn stale_authors(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Author>, StoreError> {
        let tables = self.tables.read();
        let mut stale: Vec<Author> = tables
            .authors
            .values()
            .filter(|a| a.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|a| (a.updated_at, a.local_id));
        stale.truncate(limit);
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[tokio::test]
    async fn test_create_and_lookup_project() {
        let store = MemoryStore::new();
        let created = store.create_project("minecraft/mc-mods/jei").await.unwrap();
        assert_eq!(created.status, ProjectStatus::Pending);
        assert_eq!(created.external_id, None);

        let found = store.project_by_path("minecraft/mc-mods/jei").await.unwrap();
        assert_eq!(found, Some(created));

        assert_eq!(
            store.create_project("minecraft/mc-mods/jei").await,
            Err(StoreError::Conflict("minecraft/mc-mods/jei".into()))
        );
        assert_eq!(store.project_by_path("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_canonical_project_prefers_ok() {
        let store = MemoryStore::new();

        let mut first = store.create_project("a").await.unwrap();
        first.external_id = Some(7);
        store.update_project(&first).await.unwrap();

        let mut second = store.create_project("b").await.unwrap();
        second.external_id = Some(7);
        second.status = ProjectStatus::Ok;
        store.update_project(&second).await.unwrap();

        let canonical = store.canonical_project(7).await.unwrap().unwrap();
        assert_eq!(canonical.local_id, second.local_id);

        second.status = ProjectStatus::Redirect;
        store.update_project(&second).await.unwrap();
        let canonical = store.canonical_project(7).await.unwrap().unwrap();
        assert_eq!(canonical.local_id, first.local_id);

        assert_eq!(store.canonical_project(8).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = MemoryStore::new();
        let project = Project::new(99, "ghost", Utc::now());
        assert!(matches!(
            store.update_project(&project).await,
            Err(StoreError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_projects_oldest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();

        for (path, age) in [("a", 30), ("b", 90), ("c", 60), ("d", 5)] {
            let mut project = store.create_project(path).await.unwrap();
            project.status = ProjectStatus::Ok;
            store.update_project(&project).await.unwrap();
            store.set_project_updated_at(project.local_id, now - TimeDelta::minutes(age));
        }

        let stale = store
            .stale_projects(&[ProjectStatus::Ok], now - TimeDelta::minutes(10), 2)
            .await
            .unwrap();
        let paths: Vec<_> = stale.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["b", "c"]);

        let none = store
            .stale_projects(&[ProjectStatus::Forbidden], now, 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_authors() {
        let store = MemoryStore::new();
        let author = store.create_author(100, "TechBrew").await.unwrap();
        assert!(store.create_author(100, "TechBrew").await.is_err());

        assert_eq!(
            store.author_by_member_id(100).await.unwrap(),
            Some(author.clone())
        );
        assert_eq!(
            store.author_by_username("techbrew").await.unwrap(),
            Some(author.clone())
        );

        store.set_author_updated_at(author.local_id, Utc::now() - TimeDelta::hours(2));
        let stale = store
            .stale_authors(Utc::now() - TimeDelta::hours(1), 10)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
    }
}
