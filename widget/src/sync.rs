//! Project synchronization: upstream detail, description and files merged into
//! the persisted projection.

use crate::authors::AuthorIndex;
use crate::errors::{StoreError, WidgetError};
use crate::metrics_defs::{PROJECT_SYNC_DURATION, PROJECT_SYNCS};
use crate::models::{
    Downloads, Project, ProjectFile, ProjectMember, ProjectProperties, ProjectStatus, Urls,
};
use crate::store::{Store, find_or_create_project};
use curseforge::models::{File, Mod};
use curseforge::reference::primary_category;
use curseforge::release::{ReleaseType, is_publishable};
use curseforge::{CurseForge, ReferenceCache, UpstreamError};
use percent_encoding::percent_decode_str;
use regex::{Captures, Regex};
use shared::{counter, histogram};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

/// Loader markers. Never used as a file's version or as a `versions` key.
pub const LOADER_TAGS: &[&str] = &["Forge", "Fabric", "Quilt", "Rift", "NeoForge"];

const DEFAULT_MEMBER_TITLE: &str = "Owner";

static LINKOUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""/linkout\?remoteUrl=(\S*)""#).expect("linkout pattern is valid")
});

fn is_loader_tag(tag: &str) -> bool {
    LOADER_TAGS.contains(&tag)
}

fn query_unescape(value: &str) -> String {
    percent_decode_str(&value.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// Replaces tracked outbound links with their (doubly encoded) targets.
pub fn rewrite_links(description: &str) -> String {
    LINKOUT
        .replace_all(description, |caps: &Captures| {
            format!("\"{}\"", query_unescape(&query_unescape(&caps[1])))
        })
        .into_owned()
}

fn project_file(website_url: &str, file: &File) -> ProjectFile {
    let version = file
        .game_versions
        .iter()
        .find(|tag| !is_loader_tag(tag))
        .or(file.game_versions.first())
        .cloned()
        .unwrap_or_default();

    ProjectFile {
        id: file.id,
        url: format!("{website_url}/files/{}", file.id),
        display: file.display_name.clone(),
        name: file.file_name.clone(),
        release_type: ReleaseType::from_code(file.release_type).as_str().to_string(),
        version,
        filesize: file.file_length,
        versions: file.game_versions.clone(),
        downloads: file.download_count,
        uploaded_at: file.file_date,
    }
}

/// Publishable files only, in upstream order.
pub fn project_files(website_url: &str, files: &[File]) -> Vec<ProjectFile> {
    files
        .iter()
        .filter(|file| is_publishable(file.file_status))
        .map(|file| project_file(website_url, file))
        .collect()
}

/// Every file listed under each non-loader tag it declares.
pub fn build_versions(files: &[ProjectFile]) -> BTreeMap<String, Vec<ProjectFile>> {
    let mut versions: BTreeMap<String, Vec<ProjectFile>> = BTreeMap::new();
    for file in files {
        for tag in file.versions.iter().filter(|tag| !is_loader_tag(tag)) {
            versions.entry(tag.clone()).or_default().push(file.clone());
        }
    }
    versions
}

#[derive(Clone)]
pub struct ProjectSyncer {
    client: CurseForge,
    reference: Arc<ReferenceCache>,
    store: Arc<dyn Store>,
    authors: AuthorIndex,
}

impl ProjectSyncer {
    pub fn new(
        client: CurseForge,
        reference: Arc<ReferenceCache>,
        store: Arc<dyn Store>,
        authors: AuthorIndex,
    ) -> Self {
        ProjectSyncer {
            client,
            reference,
            store,
            authors,
        }
    }

    /// Synchronizes the canonical record of `external_id`.
    ///
    /// Not found and forbidden answers are persisted and returned as `Ok`.
    /// On any other failure the stored record is left as it was.
    pub async fn sync(&self, external_id: u64) -> Result<Project, WidgetError> {
        let start = Instant::now();
        let result = self.sync_inner(external_id).await;
        histogram!(PROJECT_SYNC_DURATION).record(start.elapsed().as_secs_f64());

        let outcome = match &result {
            Ok(project) => project.status.as_str(),
            Err(_) => "failed",
        };
        counter!(PROJECT_SYNCS, "outcome" => outcome).increment(1);

        if let Err(err) = &result {
            tracing::warn!(external_id, error = %err, "project sync failed");
        }
        result
    }

    async fn canonical_record(&self, external_id: u64) -> Result<Project, StoreError> {
        if let Some(record) = self.store.canonical_project(external_id).await? {
            return Ok(record);
        }
        let mut record =
            find_or_create_project(self.store.as_ref(), &external_id.to_string()).await?;
        record.external_id = Some(external_id);
        Ok(record)
    }

    async fn sync_inner(&self, external_id: u64) -> Result<Project, WidgetError> {
        let mut record = self.canonical_record(external_id).await?;
        tracing::debug!(external_id, local_id = record.local_id, "syncing project");

        let detail = match self.client.project(external_id).await {
            Ok(detail) => detail,
            Err(err) if err.is_definitive() => {
                record.status = match err {
                    UpstreamError::NotFound => ProjectStatus::NotFound,
                    _ => ProjectStatus::Forbidden,
                };
                record.properties = None;
                return Ok(self.store.update_project(&record).await?);
            }
            Err(err) => return Err(err.into()),
        };

        let previous = record.parsed_properties();

        let description = match self.client.description(external_id).await {
            Ok(html) => rewrite_links(&html),
            Err(err) if err.is_definitive() => String::new(),
            Err(err) => {
                tracing::warn!(external_id, error = %err, "description unavailable, keeping previous");
                previous
                    .as_ref()
                    .map(|p| p.description.clone())
                    .unwrap_or_default()
            }
        };

        let files = match self.client.files(external_id).await {
            Ok(files) => project_files(&detail.links.website_url, &files),
            Err(err) if err.is_definitive() => Vec::new(),
            Err(err) => {
                tracing::warn!(external_id, error = %err, "files unavailable, keeping previous");
                previous.map(|p| p.files).unwrap_or_default()
            }
        };

        let properties = ProjectProperties {
            description,
            versions: build_versions(&files),
            files,
            game: self.game_slug(&detail).await,
            project_type: self.project_type(&detail).await,
            ..base_properties(&detail)
        };

        record.status = ProjectStatus::Ok;
        record.properties = Some(
            serde_json::to_string(&properties).map_err(|e| StoreError::Backend(e.to_string()))?,
        );
        let record = self.store.update_project(&record).await?;

        for member in &properties.members {
            if let Err(err) = self
                .authors
                .reconcile(member.id, &member.username, external_id, &properties.title)
                .await
            {
                tracing::error!(external_id, member_id = member.id, error = %err, "failed to update author");
            }
        }

        Ok(record)
    }

    async fn game_slug(&self, detail: &Mod) -> String {
        if let Err(err) = self.reference.ensure_loaded().await {
            tracing::warn!(error = %err, "reference data unavailable");
        }
        self.reference
            .game(detail.game_id)
            .map(|game| game.slug)
            .unwrap_or_default()
    }

    /// Name of the root of the primary category.
    async fn project_type(&self, detail: &Mod) -> String {
        match self.reference.categories(detail.game_id).await {
            Ok(categories) => primary_category(&categories, detail.primary_category_id)
                .map(|category| category.name.clone())
                .unwrap_or_default(),
            Err(err) => {
                tracing::warn!(game_id = detail.game_id, error = %err, "categories unavailable");
                String::new()
            }
        }
    }
}

fn base_properties(detail: &Mod) -> ProjectProperties {
    ProjectProperties {
        id: detail.id,
        title: detail.name.clone(),
        summary: detail.summary.clone(),
        urls: Urls {
            curseforge: detail.links.website_url.clone(),
            project: detail.links.website_url.clone(),
        },
        thumbnail: detail
            .logo
            .as_ref()
            .map(|logo| logo.thumbnail_url.clone())
            .unwrap_or_default(),
        created_at: detail.date_created,
        downloads: Downloads {
            monthly: 0,
            total: detail.download_count as u64,
        },
        categories: detail.categories.iter().map(|c| c.name.clone()).collect(),
        members: detail
            .authors
            .iter()
            .map(|author| ProjectMember {
                title: DEFAULT_MEMBER_TITLE.to_string(),
                username: author.name.clone(),
                id: author.id,
            })
            .collect(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testutils;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn syncer(server: &MockServer, store: Arc<MemoryStore>) -> ProjectSyncer {
        let client = testutils::client(server);
        let reference = Arc::new(ReferenceCache::new(client.clone()));
        ProjectSyncer::new(client, reference, store.clone(), AuthorIndex::new(store))
    }

    fn upstream_file(id: u64, status: i32, versions: &[&str]) -> File {
        File {
            id,
            file_status: status,
            release_type: 1,
            game_versions: versions.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_rewrite_links() {
        let html = r#"<a href="/linkout?remoteUrl=https%253a%252f%252fgithub.com%252fexample%253fa%253d1%2526b%253dtwo%2bwords" rel="nofollow">x</a>"#;
        assert_eq!(
            rewrite_links(html),
            r#"<a href="https://github.com/example?a=1&b=two words" rel="nofollow">x</a>"#
        );
        assert_eq!(rewrite_links("<p>plain</p>"), "<p>plain</p>");
    }

    #[test]
    fn test_versions_index() {
        let files = project_files(
            "https://www.curseforge.com/minecraft/mc-mods/example",
            &[
                upstream_file(1, 4, &["1.20.1", "Forge"]),
                upstream_file(2, 10, &["Fabric", "1.20.1", "1.20.2"]),
                upstream_file(3, 1, &["1.20.1"]),
                upstream_file(4, 4, &["NeoForge"]),
            ],
        );

        let ids: Vec<u64> = files.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2, 4]);
        assert_eq!(files[0].version, "1.20.1");
        assert_eq!(files[1].version, "1.20.1");
        assert_eq!(files[2].version, "NeoForge");
        assert_eq!(
            files[0].url,
            "https://www.curseforge.com/minecraft/mc-mods/example/files/1"
        );
        assert_eq!(files[0].release_type, "release");

        let versions = build_versions(&files);
        let index: Vec<(&str, Vec<u64>)> = versions
            .iter()
            .map(|(tag, files)| (tag.as_str(), files.iter().map(|f| f.id).collect()))
            .collect();
        assert_eq!(
            index,
            vec![("1.20.1", vec![1, 2]), ("1.20.2", vec![2])]
        );
    }

    #[tokio::test]
    async fn test_sync_builds_properties() {
        let server = MockServer::start().await;
        testutils::mount_reference(&server).await;
        testutils::mount_project(
            &server,
            testutils::mod_json(32274, "journeymap", "JourneyMap", &[(100, "techbrew")]),
            "<p>Maps</p>",
            vec![
                testutils::file_json(1, 4, 1, &["1.20.1", "Forge"], "2024-01-01T00:00:00Z"),
                testutils::file_json(2, 1, 1, &["1.20.1"], "2024-01-02T00:00:00Z"),
            ],
        )
        .await;

        let store = Arc::new(MemoryStore::new());
        let project = syncer(&server, store.clone()).sync(32274).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Ok);
        assert_eq!(project.external_id, Some(32274));
        assert_eq!(project.path, "32274");

        let properties = project.parsed_properties().unwrap();
        assert_eq!(properties.title, "JourneyMap");
        assert_eq!(properties.game, "minecraft");
        assert_eq!(properties.project_type, "Mods");
        assert_eq!(properties.description, "<p>Maps</p>");
        assert_eq!(properties.members[0].title, "Owner");
        assert_eq!(properties.files.len(), 1);
        assert_eq!(properties.versions["1.20.1"].len(), 1);
        assert!(!properties.versions.contains_key("Forge"));

        let author = store.author_by_member_id(100).await.unwrap().unwrap();
        assert_eq!(author.parsed_projects().projects[0].id, 32274);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let server = MockServer::start().await;
        testutils::mount_reference(&server).await;
        testutils::mount_project(
            &server,
            testutils::mod_json(5, "five", "Five", &[(1, "a"), (2, "b")]),
            "",
            vec![testutils::file_json(
                9,
                4,
                2,
                &["1.19.2", "1.20.1", "Fabric"],
                "2024-03-01T00:00:00Z",
            )],
        )
        .await;

        let store = Arc::new(MemoryStore::new());
        let syncer = syncer(&server, store.clone());
        let first = syncer.sync(5).await.unwrap();
        let second = syncer.sync(5).await.unwrap();
        assert_eq!(first.local_id, second.local_id);
        assert_eq!(first.properties, second.properties);
        assert_eq!(store.projects().len(), 1);
    }

    #[tokio::test]
    async fn test_forbidden_detail_skips_everything_else() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/mods/77"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/mods/77/description"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/mods/77/files"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let project = syncer(&server, store).sync(77).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Forbidden);
        assert_eq!(project.properties, None);
    }

    #[tokio::test]
    async fn test_transient_files_failure_keeps_previous_files() {
        let server = MockServer::start().await;
        testutils::mount_reference(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/mods/8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": testutils::mod_json(8, "eight", "Eight", &[])
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/mods/8/description"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": "hi"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/mods/8/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(testutils::page(vec![
                testutils::file_json(80, 4, 1, &["1.20.1"], "2024-01-01T00:00:00Z"),
            ])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/mods/8/files"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let syncer = syncer(&server, store);
        let first = syncer.sync(8).await.unwrap();
        let second = syncer.sync(8).await.unwrap();

        let properties = second.parsed_properties().unwrap();
        assert_eq!(properties.files.len(), 1);
        assert_eq!(properties.versions["1.20.1"][0].id, 80);
        assert_eq!(first.properties, second.properties);
    }

    #[tokio::test]
    async fn test_transient_detail_failure_leaves_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/mods/9"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let result = syncer(&server, store.clone()).sync(9).await;
        assert!(matches!(result, Err(WidgetError::UpstreamTransient(_))));

        let record = store.project_by_path("9").await.unwrap().unwrap();
        assert_eq!(record.status, ProjectStatus::Pending);
    }
}
