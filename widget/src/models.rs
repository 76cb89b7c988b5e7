//! Persisted records and the JSON projections served for them.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProjectStatus {
    /// Created from a path, not yet resolved or synchronized.
    Pending,
    Ok,
    NotFound,
    Forbidden,
    /// Another record holds the canonical copy for the same external id.
    Redirect,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Pending => "pending",
            ProjectStatus::Ok => "ok",
            ProjectStatus::NotFound => "not_found",
            ProjectStatus::Forbidden => "forbidden",
            ProjectStatus::Redirect => "redirect",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The instant `window` ago. Windows too large to represent reach back to the
/// earliest representable time.
pub fn cutoff(window: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn older_than(updated_at: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(updated_at)
        .to_std()
        .is_ok_and(|age| age > window)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Project {
    pub local_id: u64,
    /// Set once when the path is resolved, never changed afterwards.
    pub external_id: Option<u64>,
    pub path: String,
    pub status: ProjectStatus,
    /// Serialized [`ProjectProperties`]. Only present on `Ok` records.
    pub properties: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(local_id: u64, path: &str, now: DateTime<Utc>) -> Self {
        Project {
            local_id,
            external_id: None,
            path: path.to_string(),
            status: ProjectStatus::Pending,
            properties: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Decoded properties. Undecodable or empty payloads count as absent so
    /// the record gets synchronized again.
    pub fn parsed_properties(&self) -> Option<ProjectProperties> {
        let raw = self.properties.as_deref()?;
        match serde_json::from_str::<ProjectProperties>(raw) {
            Ok(properties) if properties.id != 0 => Some(properties),
            Ok(_) => None,
            Err(err) => {
                tracing::debug!(local_id = self.local_id, error = %err, "undecodable properties");
                None
            }
        }
    }

    pub fn is_stale(&self, window: Duration, now: DateTime<Utc>) -> bool {
        older_than(self.updated_at, window, now)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Urls {
    pub curseforge: String,
    pub project: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Downloads {
    pub monthly: u64,
    pub total: u64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ProjectMember {
    pub title: String,
    pub username: String,
    pub id: u64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ProjectFile {
    pub id: u64,
    pub url: String,
    pub display: String,
    pub name: String,
    #[serde(rename = "type")]
    pub release_type: String,
    pub version: String,
    pub filesize: u64,
    pub versions: Vec<String>,
    pub downloads: u64,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl ProjectFile {
    fn matches_loader(&self, loader: Option<&str>) -> bool {
        match loader {
            None | Some("") => true,
            Some(loader) => self.versions.iter().any(|v| v == loader),
        }
    }

    /// A version request names a file id, a release type, a version tag, or
    /// `<tag>/<type>`.
    fn matches_version(&self, request: Option<&str>) -> bool {
        let request = match request {
            None | Some("") => return true,
            Some(request) => request,
        };

        if request == self.id.to_string() || request == self.release_type {
            return true;
        }
        self.versions.iter().any(|tag| {
            tag == request
                || request
                    .strip_prefix(tag.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
                    .is_some_and(|kind| kind == self.release_type)
        })
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProjectProperties {
    pub id: u64,
    pub title: String,
    pub summary: String,
    pub description: String,
    pub game: String,
    #[serde(rename = "type")]
    pub project_type: String,
    pub urls: Urls,
    pub thumbnail: String,
    pub created_at: Option<DateTime<Utc>>,
    pub downloads: Downloads,
    pub license: String,
    pub donate: String,
    pub categories: Vec<String>,
    pub members: Vec<ProjectMember>,
    pub links: Vec<String>,
    pub files: Vec<ProjectFile>,
    pub versions: BTreeMap<String, Vec<ProjectFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<ProjectFile>,
}

impl ProjectProperties {
    /// Newest file matching both the optional version request and loader tag.
    pub fn select_download(&self, version: Option<&str>, loader: Option<&str>) -> Option<&ProjectFile> {
        let mut newest: Option<&ProjectFile> = None;
        for file in &self.files {
            if file.uploaded_at.is_none()
                || !file.matches_loader(loader)
                || !file.matches_version(version)
            {
                continue;
            }
            if newest.is_none_or(|current| file.uploaded_at > current.uploaded_at) {
                newest = Some(file);
            }
        }
        newest
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Author {
    pub local_id: u64,
    pub username: String,
    pub member_id: u64,
    /// Serialized [`AuthorProjects`].
    pub projects: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Author {
    pub fn new(local_id: u64, member_id: u64, username: &str, now: DateTime<Utc>) -> Self {
        Author {
            local_id,
            username: username.to_string(),
            member_id,
            projects: Some(AuthorProjects::default().to_json()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Undecodable payloads read as an empty set.
    pub fn parsed_projects(&self) -> AuthorProjects {
        self.projects
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    pub fn set_projects(&mut self, projects: &AuthorProjects) {
        self.projects = Some(projects.to_json());
    }

    pub fn is_stale(&self, window: Duration, now: DateTime<Utc>) -> bool {
        older_than(self.updated_at, window, now)
    }

    pub fn to_response(&self) -> AuthorResponse {
        AuthorResponse {
            id: self.member_id,
            username: self.username.clone(),
            projects: self.parsed_projects().projects,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AuthorProjects {
    pub projects: Vec<AuthorProject>,
}

impl AuthorProjects {
    /// Adds the project unless an entry with the same id exists. Returns
    /// whether the set changed.
    pub fn add(&mut self, id: u64, name: &str) -> bool {
        if self.projects.iter().any(|p| p.id == id) {
            return false;
        }
        self.projects.push(AuthorProject {
            id,
            name: name.to_string(),
        });
        true
    }

    fn to_json(&self) -> String {
        // Plain structs of strings and integers always serialize.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct AuthorProject {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AuthorResponse {
    pub id: u64,
    pub username: String,
    pub projects: Vec<AuthorProject>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn file(id: u64, kind: &str, versions: &[&str], day: u32) -> ProjectFile {
        ProjectFile {
            id,
            release_type: kind.to_string(),
            versions: versions.iter().map(|v| v.to_string()).collect(),
            uploaded_at: Some(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn test_select_download() {
        let properties = ProjectProperties {
            id: 1,
            files: vec![
                file(10, "release", &["1.20.1", "Forge"], 1),
                file(11, "beta", &["1.20.1", "Fabric"], 3),
                file(12, "release", &["1.19.2", "Forge"], 2),
            ],
            ..Default::default()
        };

        let pick = |version, loader| properties.select_download(version, loader).map(|f| f.id);
        assert_eq!(pick(None, None), Some(11));
        assert_eq!(pick(Some("release"), None), Some(12));
        assert_eq!(pick(Some("1.20.1"), Some("Forge")), Some(10));
        assert_eq!(pick(Some("1.20.1/release"), None), Some(10));
        assert_eq!(pick(Some("10"), None), Some(10));
        assert_eq!(pick(None, Some("Quilt")), None);
        assert_eq!(pick(Some("1.18"), None), None);
    }

    #[test]
    fn test_parsed_properties() {
        let now = Utc::now();
        let mut project = Project::new(1, "12345", now);
        assert_eq!(project.parsed_properties(), None);

        project.properties = Some("[]".into());
        assert_eq!(project.parsed_properties(), None);

        project.properties = Some(r#"{"id": 0}"#.into());
        assert_eq!(project.parsed_properties(), None);

        project.properties = Some(r#"{"id": 12345, "title": "Example"}"#.into());
        assert_eq!(project.parsed_properties().unwrap().title, "Example");
    }

    #[test]
    fn test_properties_key_order_is_stable() {
        let mut properties = ProjectProperties {
            id: 1,
            ..Default::default()
        };
        properties.versions.insert("1.20.1".into(), vec![]);
        properties.versions.insert("1.12.2".into(), vec![]);

        let json = serde_json::to_string(&properties).unwrap();
        assert!(json.find("1.12.2").unwrap() < json.find("1.20.1").unwrap());
        assert!(!json.contains("\"download\""));
    }

    #[test]
    fn test_author_projects() {
        let now = Utc::now();
        let mut author = Author::new(1, 100, "someone", now);
        assert!(author.parsed_projects().projects.is_empty());

        let mut projects = author.parsed_projects();
        assert!(projects.add(5, "Five"));
        assert!(!projects.add(5, "Five again"));
        author.set_projects(&projects);

        let response = author.to_response();
        assert_eq!(response.id, 100);
        assert_eq!(response.projects.len(), 1);

        author.projects = Some("not json".into());
        assert!(author.parsed_projects().projects.is_empty());
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let mut project = Project::new(1, "x", now);
        assert!(!project.is_stale(Duration::from_secs(60), now));

        project.updated_at = now - chrono::TimeDelta::seconds(120);
        assert!(project.is_stale(Duration::from_secs(60), now));
    }
}
