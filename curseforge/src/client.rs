use crate::error::UpstreamError;
use crate::metrics_defs::{UPSTREAM_REQUEST_DURATION, UPSTREAM_REQUESTS};
use crate::models::{Category, File, Game, Mod, Page, Single};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use shared::{counter, histogram};
use std::time::{Duration, Instant};

pub const DEFAULT_BASE_URL: &str = "https://api.curseforge.com";

/// Page size used for every paginated listing. A page with fewer results than
/// this is the last one.
pub const PAGE_SIZE: u32 = 50;

// The API refuses `index + pageSize` beyond this.
const MAX_INDEX: u32 = 10_000;

const API_KEY_HEADER: &str = "x-api-key";

/// Filters for the project search endpoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchQuery {
    pub game_id: Option<u64>,
    pub class_id: Option<u64>,
    pub slug: String,
}

impl SearchQuery {
    pub fn slug(slug: &str) -> Self {
        SearchQuery {
            slug: slug.to_string(),
            ..Default::default()
        }
    }

    pub fn scoped(game_id: u64, class_id: u64, slug: &str) -> Self {
        SearchQuery {
            game_id: Some(game_id),
            class_id: Some(class_id),
            slug: slug.to_string(),
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(3);
        if let Some(game_id) = self.game_id {
            params.push(("gameId", game_id.to_string()));
        }
        if let Some(class_id) = self.class_id {
            params.push(("classId", class_id.to_string()));
        }
        params.push(("slug", self.slug.clone()));
        params
    }
}

#[derive(Clone)]
pub struct CurseForge {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CurseForge {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        // Fail early on a malformed base URL rather than on the first request.
        Url::parse(base_url)?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(CurseForge {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub async fn games(&self) -> Result<Vec<Game>, UpstreamError> {
        self.get_all("v1/games", &[]).await
    }

    pub async fn categories(&self, game_id: u64) -> Result<Vec<Category>, UpstreamError> {
        self.get_all("v1/categories", &[("gameId", game_id.to_string())])
            .await
    }

    /// One page of search results starting at `index`.
    pub async fn search_page(
        &self,
        query: &SearchQuery,
        index: u32,
    ) -> Result<Page<Mod>, UpstreamError> {
        self.get_page("v1/mods/search", &query.params(), index)
            .await
    }

    pub async fn project(&self, id: u64) -> Result<Mod, UpstreamError> {
        let response: Single<Mod> = self.get(&format!("v1/mods/{id}"), &[]).await?;
        Ok(response.data)
    }

    /// Raw description HTML.
    pub async fn description(&self, id: u64) -> Result<String, UpstreamError> {
        let response: Single<String> = self
            .get(&format!("v1/mods/{id}/description"), &[])
            .await?;
        Ok(response.data)
    }

    /// Every file of a project, across all pages.
    pub async fn files(&self, id: u64) -> Result<Vec<File>, UpstreamError> {
        self.get_all(&format!("v1/mods/{id}/files"), &[]).await
    }

    /// Requests consecutive pages until one comes back short.
    async fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>, UpstreamError> {
        let mut items = Vec::new();
        let mut index = 0;
        let mut page_fetches = 0;

        loop {
            let page: Page<T> = self.get_page(path, params, index).await?;
            let result_count = page.result_count();
            items.extend(page.data);
            page_fetches += 1;

            if result_count < PAGE_SIZE as usize {
                break;
            }

            index += PAGE_SIZE;
            if index + PAGE_SIZE > MAX_INDEX {
                tracing::warn!(path, "pagination limit reached, listing truncated");
                break;
            }
        }

        tracing::debug!(path, page_fetches, items = items.len(), "fetched all pages");
        Ok(items)
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        index: u32,
    ) -> Result<Page<T>, UpstreamError> {
        let mut params = params.to_vec();
        params.push(("index", index.to_string()));
        params.push(("pageSize", PAGE_SIZE.to_string()));
        self.get(path, &params).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, path))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }

        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let status = response.status();

        histogram!(UPSTREAM_REQUEST_DURATION).record(start.elapsed().as_secs_f64());
        counter!(UPSTREAM_REQUESTS, "status" => status.as_u16().to_string()).increment(1);

        match status {
            StatusCode::NOT_FOUND => Err(UpstreamError::NotFound),
            StatusCode::FORBIDDEN => Err(UpstreamError::Forbidden),
            status if !status.is_success() => {
                tracing::debug!(path, %status, "upstream request failed");
                Err(UpstreamError::Status(status))
            }
            _ => Ok(response.json::<T>().await?),
        }
    }
}
