//! Project membership per author, kept in step with project syncs.

use crate::errors::StoreError;
use crate::metrics_defs::AUTHOR_RESYNCS;
use crate::models::{Author, AuthorProjects, ProjectStatus};
use crate::store::Store;
use shared::counter;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthorIndex {
    store: Arc<dyn Store>,
}

impl AuthorIndex {
    pub fn new(store: Arc<dyn Store>) -> Self {
        AuthorIndex { store }
    }

    async fn find_or_create(&self, member_id: u64, username: &str) -> Result<Author, StoreError> {
        if let Some(author) = self.store.author_by_member_id(member_id).await? {
            return Ok(author);
        }
        match self.store.create_author(member_id, username).await {
            Ok(author) => Ok(author),
            Err(StoreError::Conflict(_)) => self
                .store
                .author_by_member_id(member_id)
                .await?
                .ok_or_else(|| StoreError::Missing(format!("member {member_id}"))),
            Err(err) => Err(err),
        }
    }

    /// Records that `member_id` works on `project_id`. Never removes entries.
    pub async fn reconcile(
        &self,
        member_id: u64,
        username: &str,
        project_id: u64,
        project_title: &str,
    ) -> Result<Author, StoreError> {
        let mut author = self.find_or_create(member_id, username).await?;

        let mut projects = author.parsed_projects();
        let added = projects.add(project_id, project_title);
        let renamed = !username.is_empty() && author.username != username;
        if !added && !renamed {
            return Ok(author);
        }

        if renamed {
            author.username = username.to_string();
        }
        author.set_projects(&projects);
        self.store.update_author(&author).await
    }

    /// Rebuilds the project set of an author from the current project
    /// records.
    ///
    /// An entry is dropped when its project is gone, resolved to not found,
    /// or synced without this author among its members. Projects in any
    /// other state, forbidden included, keep their entry.
    pub async fn resync(&self, member_id: u64) -> Result<Author, StoreError> {
        let mut author = self
            .store
            .author_by_member_id(member_id)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("member {member_id}")))?;

        let mut kept = AuthorProjects::default();
        for entry in author.parsed_projects().projects {
            let keep = match self.store.canonical_project(entry.id).await? {
                None => false,
                Some(project) => match project.status {
                    ProjectStatus::NotFound => false,
                    ProjectStatus::Ok => project.parsed_properties().is_none_or(|properties| {
                        properties.members.iter().any(|m| m.id == member_id)
                    }),
                    _ => true,
                },
            };

            if keep {
                kept.add(entry.id, &entry.name);
            } else {
                tracing::debug!(member_id, project_id = entry.id, "dropping author project");
            }
        }

        author.set_projects(&kept);
        counter!(AUTHOR_RESYNCS).increment(1);
        self.store.update_author(&author).await
    }
}
