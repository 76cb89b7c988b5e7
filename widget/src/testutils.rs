use crate::config::Config;
use crate::service::Widget;
use crate::store::MemoryStore;
use curseforge::{CurseForge, PAGE_SIZE};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const MINECRAFT: u64 = 432;

pub fn client(server: &MockServer) -> CurseForge {
    CurseForge::new(&server.uri(), "test-key", Duration::from_secs(5)).unwrap()
}

pub fn start_widget(server: &MockServer, store: Arc<MemoryStore>) -> Widget {
    start_widget_with(server, store, Config::default())
}

pub fn start_widget_with(server: &MockServer, store: Arc<MemoryStore>, config: Config) -> Widget {
    Widget::new(config, client(server), store)
}

/// Number of requests the mock server received for `url_path`.
pub async fn requests_to(server: &MockServer, url_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == url_path)
        .count()
}

/// Polls `condition` for up to five seconds.
pub async fn wait_for<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Single page listing. Fewer than a full page of items ends pagination.
pub fn page(data: Vec<Value>) -> Value {
    paged(data, 0)
}

fn paged(data: Vec<Value>, index: usize) -> Value {
    let count = data.len();
    json!({
        "data": data,
        "pagination": {"index": index, "pageSize": PAGE_SIZE, "resultCount": count, "totalCount": count}
    })
}

pub fn mod_json(id: u64, slug: &str, name: &str, authors: &[(u64, &str)]) -> Value {
    let authors: Vec<Value> = authors
        .iter()
        .map(|(id, name)| json!({"id": id, "name": name, "url": ""}))
        .collect();
    json!({
        "id": id,
        "gameId": MINECRAFT,
        "name": name,
        "slug": slug,
        "summary": format!("{name} summary"),
        "downloadCount": 1234.0,
        "primaryCategoryId": 423,
        "classId": 6,
        "links": {"websiteUrl": format!("https://www.curseforge.com/minecraft/mc-mods/{slug}")},
        "categories": [{"id": 423, "gameId": MINECRAFT, "name": "Map and Information", "slug": "map-information"}],
        "authors": authors,
        "logo": {"id": 1, "title": "", "thumbnailUrl": "https://media.example/thumb.png", "url": ""},
        "dateCreated": "2015-01-01T00:00:00Z"
    })
}

pub fn file_json(id: u64, status: i32, release_type: i32, versions: &[&str], date: &str) -> Value {
    json!({
        "id": id,
        "isAvailable": true,
        "displayName": format!("file-{id}"),
        "fileName": format!("file-{id}.jar"),
        "releaseType": release_type,
        "fileStatus": status,
        "fileDate": date,
        "fileLength": 1024,
        "downloadCount": 10,
        "gameVersions": versions,
    })
}

/// Games and the Minecraft category taxonomy.
pub async fn mount_reference(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/games"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![
            json!({"id": MINECRAFT, "name": "Minecraft", "slug": "minecraft"}),
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/categories"))
        .and(query_param("gameId", MINECRAFT.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![
            json!({"id": 6, "gameId": MINECRAFT, "name": "Mods", "slug": "mc-mods", "isClass": true}),
            json!({"id": 423, "gameId": MINECRAFT, "name": "Map and Information", "slug": "map-information", "parentCategoryId": 6, "classId": 6}),
        ])))
        .mount(server)
        .await;
}

/// Detail, description and files of one project, files split into pages.
pub async fn mount_project(server: &MockServer, project: Value, description: &str, files: Vec<Value>) {
    mount(server, project, description, files, None).await;
}

/// Like [`mount_project`], expecting exactly `times` detail and description
/// requests.
pub async fn mount_project_expecting(
    server: &MockServer,
    project: Value,
    description: &str,
    files: Vec<Value>,
    times: u64,
) {
    mount(server, project, description, files, Some(times)).await;
}

async fn mount(server: &MockServer, project: Value, description: &str, files: Vec<Value>, times: Option<u64>) {
    let id = project["id"].as_u64().unwrap();

    let detail = Mock::given(method("GET"))
        .and(path(format!("/v1/mods/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": project})));
    let description = Mock::given(method("GET"))
        .and(path(format!("/v1/mods/{id}/description")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": description})));
    match times {
        Some(times) => {
            detail.expect(times).mount(server).await;
            description.expect(times).mount(server).await;
        }
        None => {
            detail.mount(server).await;
            description.mount(server).await;
        }
    }

    let page_size = PAGE_SIZE as usize;
    let mut chunks: Vec<Vec<Value>> = files.chunks(page_size).map(|c| c.to_vec()).collect();
    if files.len() % page_size == 0 {
        chunks.push(Vec::new());
    }
    for (i, chunk) in chunks.into_iter().enumerate() {
        let index = i * page_size;
        Mock::given(method("GET"))
            .and(path(format!("/v1/mods/{id}/files")))
            .and(query_param("index", index.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(paged(chunk, index)))
            .mount(server)
            .await;
    }
}
