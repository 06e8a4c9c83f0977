//! xkcd archive integration
//!
//! Picks a uniformly random comic from the archive and downloads its image.

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;

use crate::error::AppError;

/// Default archive base URL
pub const XKCD_BASE: &str = "https://xkcd.com";

/// Latest comic number assumed when the archive omits it
const FALLBACK_LATEST: u32 = 2500;

/// Comic metadata (`info.0.json`)
#[derive(Debug, Deserialize)]
struct ComicInfo {
    num: Option<u32>,
    img: Option<String>,
    #[serde(default)]
    title: String,
}

/// A downloaded comic
#[derive(Debug, Clone)]
pub struct Comic {
    pub id: u32,
    pub title: String,
    pub image: Vec<u8>,
}

/// A source of comics
#[async_trait]
pub trait ComicSource: Send + Sync {
    /// Highest comic number currently published
    async fn latest_id(&self) -> Result<u32, AppError>;

    /// Fetch metadata and image bytes for one comic
    async fn fetch_comic(&self, id: u32) -> Result<Comic, AppError>;
}

/// Fetch a comic chosen uniformly from `[1, latest]`
pub async fn fetch_random(source: &dyn ComicSource) -> Result<Comic, AppError> {
    let latest = source.latest_id().await?.max(1);
    let id = rand::rng().random_range(1..=latest);
    source.fetch_comic(id).await
}

/// xkcd JSON API client
pub struct XkcdClient {
    client: Client,
    base_url: String,
}

impl XkcdClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_info(&self, url: &str) -> Result<ComicInfo, AppError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApi(format!(
                "xkcd API returned status: {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ComicSource for XkcdClient {
    async fn latest_id(&self) -> Result<u32, AppError> {
        let info = self.get_info(&format!("{}/info.0.json", self.base_url)).await?;
        Ok(info.num.unwrap_or(FALLBACK_LATEST))
    }

    async fn fetch_comic(&self, id: u32) -> Result<Comic, AppError> {
        let info = self
            .get_info(&format!("{}/{}/info.0.json", self.base_url, id))
            .await?;

        let img_url = info
            .img
            .filter(|url| !url.is_empty())
            .ok_or_else(|| AppError::ExternalApi(format!("No image URL for xkcd comic {}", id)))?;

        tracing::info!("xkcd comic {} ({}), URL: {}", id, info.title, img_url);

        let response = self
            .client
            .get(&img_url)
            .header("Accept", "image/*")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::ExternalApi(format!(
                "Failed to fetch comic image: {}",
                response.status()
            )));
        }

        let image = response.bytes().await?.to_vec();

        Ok(Comic {
            id,
            title: info.title,
            image,
        })
    }
}
