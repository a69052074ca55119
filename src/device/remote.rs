use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::device::{Device, DeviceCapabilities, MouseButton};
use crate::errors::{DeskZoomError, DeskZoomResult};
use crate::perception::screenshot::from_base64;

/// Desktop reached through an agent daemon's JSON API (`/v1/...`).
pub struct RemoteDesktop {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    screen_size: Option<ScreenSize>,
}

#[derive(Debug, Deserialize)]
struct ScreenSize {
    x: u32,
    y: u32,
}

#[derive(Debug, Deserialize)]
struct ScreenshotResponse {
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Coordinates {
    x: i32,
    y: i32,
}

impl RemoteDesktop {
    pub fn new(base_url: &str, timeout: Duration) -> DeskZoomResult<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(DeskZoomError::Config(format!("device url must be http(s): {base_url}")));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: format!("remote:{base_url}"),
            base_url,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> DeskZoomResult<reqwest::Response> {
        tracing::debug!(device = %self.name, path, "device call");
        let resp = self.client.post(self.url(path)).json(&body).send().await?;
        check_status(path, resp).await
    }

    async fn get(&self, path: &str) -> DeskZoomResult<reqwest::Response> {
        tracing::debug!(device = %self.name, path, "device call");
        let resp = self.client.get(self.url(path)).send().await?;
        check_status(path, resp).await
    }
}

async fn check_status(path: &str, resp: reqwest::Response) -> DeskZoomResult<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(DeskZoomError::Device(format!("{path} -> {status}: {body}")))
}

fn first_image(resp: ScreenshotResponse) -> DeskZoomResult<DynamicImage> {
    let Some(b64) = resp.images.first() else {
        return Err(DeskZoomError::Device("screenshot response carried no image".into()));
    };
    from_base64(b64)
}

#[async_trait]
impl Device for RemoteDesktop {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::ALL
    }

    async fn screen_size(&self) -> DeskZoomResult<Option<(u32, u32)>> {
        let info: InfoResponse = self.get("info").await?.json().await?;
        Ok(info.screen_size.map(|s| (s.x, s.y)))
    }

    async fn capture_screenshot(&self) -> DeskZoomResult<DynamicImage> {
        let resp: ScreenshotResponse = self.post("screenshot", serde_json::json!({})).await?.json().await?;
        first_image(resp)
    }

    async fn move_pointer(&self, x: i32, y: i32) -> DeskZoomResult<()> {
        self.post("move_mouse", serde_json::json!({ "x": x, "y": y })).await?;
        Ok(())
    }

    async fn click(&self, button: MouseButton) -> DeskZoomResult<()> {
        self.post("click", serde_json::json!({ "button": button })).await?;
        Ok(())
    }

    async fn double_click(&self, button: MouseButton) -> DeskZoomResult<()> {
        self.post("double_click", serde_json::json!({ "button": button })).await?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> DeskZoomResult<()> {
        self.post("open_url", serde_json::json!({ "url": url })).await?;
        Ok(())
    }

    async fn pointer_position(&self) -> DeskZoomResult<(i32, i32)> {
        let c: Coordinates = self.get("mouse_coordinates").await?.json().await?;
        Ok((c.x, c.y))
    }

    async fn type_text(&self, text: &str) -> DeskZoomResult<()> {
        self.post("type_text", serde_json::json!({ "text": text })).await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> DeskZoomResult<()> {
        self.post("press_key", serde_json::json!({ "key": key })).await?;
        Ok(())
    }

    async fn hot_key(&self, keys: &[String]) -> DeskZoomResult<()> {
        self.post("hot_key", serde_json::json!({ "keys": keys })).await?;
        Ok(())
    }

    async fn scroll(&self, clicks: i32) -> DeskZoomResult<()> {
        self.post("scroll", serde_json::json!({ "clicks": clicks })).await?;
        Ok(())
    }

    async fn drag_to(&self, x: i32, y: i32) -> DeskZoomResult<()> {
        self.post("drag_mouse", serde_json::json!({ "x": x, "y": y })).await?;
        Ok(())
    }
}
