//! Wire types of the CurseForge core API. Only the fields the widget consumes
//! are decoded; everything is defaulted so sparse payloads still decode.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Pagination {
    pub index: u32,
    pub page_size: u32,
    pub result_count: u32,
    pub total_count: u64,
}

/// One page of a paginated listing.
#[derive(Clone, Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

impl<T> Page<T> {
    /// Number of results the upstream reports for this page, falling back to
    /// the decoded length when the pagination block is missing.
    pub fn result_count(&self) -> usize {
        match &self.pagination {
            Some(pagination) => pagination.result_count as usize,
            None => self.data.len(),
        }
    }
}

/// Envelope for endpoints returning a single object.
#[derive(Clone, Debug, Deserialize)]
pub struct Single<T> {
    pub data: T,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Game {
    pub id: u64,
    pub name: String,
    pub slug: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Category {
    pub id: u64,
    pub game_id: u64,
    pub name: String,
    pub slug: String,
    pub parent_category_id: Option<u64>,
    pub class_id: Option<u64>,
    pub is_class: Option<bool>,
}

impl Category {
    /// Class a search should be scoped to when this category is named in a
    /// path. Classes are their own class.
    pub fn search_class_id(&self) -> u64 {
        match (self.is_class, self.class_id) {
            (Some(true), _) | (_, None) => self.id,
            (_, Some(class_id)) => class_id,
        }
    }

    pub fn parent(&self) -> Option<u64> {
        self.parent_category_id.filter(|id| *id != 0)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Links {
    pub website_url: String,
    pub wiki_url: Option<String>,
    pub issues_url: Option<String>,
    pub source_url: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ModAuthor {
    pub id: u64,
    pub name: String,
    pub url: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Attachment {
    pub id: u64,
    pub title: String,
    pub thumbnail_url: String,
    pub url: String,
}

/// A project as returned by the detail and search endpoints.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Mod {
    pub id: u64,
    pub game_id: u64,
    pub name: String,
    pub slug: String,
    pub links: Links,
    pub summary: String,
    pub download_count: f64,
    pub primary_category_id: u64,
    pub class_id: Option<u64>,
    pub categories: Vec<Category>,
    pub authors: Vec<ModAuthor>,
    pub logo: Option<Attachment>,
    pub date_created: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct File {
    pub id: u64,
    pub is_available: bool,
    pub display_name: String,
    pub file_name: String,
    pub release_type: i32,
    pub file_status: i32,
    pub file_date: Option<DateTime<Utc>>,
    pub file_length: u64,
    pub download_count: u64,
    pub download_url: Option<String>,
    pub game_versions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_mod() {
        let payload = serde_json::json!({
            "data": {
                "id": 32274,
                "gameId": 432,
                "name": "JourneyMap",
                "slug": "journeymap",
                "links": {"websiteUrl": "https://www.curseforge.com/minecraft/mc-mods/journeymap"},
                "summary": "Real-time mapping",
                "downloadCount": 123456789.0,
                "primaryCategoryId": 423,
                "categories": [{"id": 423, "name": "Map and Information", "slug": "map-information"}],
                "authors": [{"id": 100, "name": "techbrew", "url": "https://example.invalid"}],
                "logo": null,
                "dateCreated": "2014-05-12T18:13:24.107Z",
                "unknownField": true
            }
        });

        let decoded: Single<Mod> = serde_json::from_value(payload).unwrap();
        let project = decoded.data;
        assert_eq!(project.id, 32274);
        assert_eq!(project.slug, "journeymap");
        assert_eq!(project.authors[0].name, "techbrew");
        assert_eq!(project.logo, None);
        assert!(project.date_created.is_some());
        assert_eq!(project.date_modified, None);
    }

    #[test]
    fn test_page_result_count() {
        let page: Page<Game> = serde_json::from_value(serde_json::json!({
            "data": [{"id": 432, "name": "Minecraft", "slug": "minecraft"}],
            "pagination": {"index": 0, "pageSize": 50, "resultCount": 1, "totalCount": 1}
        }))
        .unwrap();
        assert_eq!(page.result_count(), 1);

        let page: Page<Game> = serde_json::from_value(serde_json::json!({"data": []})).unwrap();
        assert_eq!(page.result_count(), 0);
    }

    #[test]
    fn test_category_class() {
        let class = Category {
            id: 6,
            slug: "mc-mods".into(),
            is_class: Some(true),
            ..Default::default()
        };
        assert_eq!(class.search_class_id(), 6);

        let sub = Category {
            id: 423,
            class_id: Some(6),
            parent_category_id: Some(6),
            ..Default::default()
        };
        assert_eq!(sub.search_class_id(), 6);
        assert_eq!(sub.parent(), Some(6));

        let root = Category {
            id: 6,
            parent_category_id: Some(0),
            ..Default::default()
        };
        assert_eq!(root.parent(), None);
    }
}
