//! Test doubles shared by unit tests across the crate.
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::device::{Device, DeviceCapabilities, MouseButton};
use crate::errors::{DeskZoomError, DeskZoomResult};
use crate::llm::provider::{
    extract_json, sanitize_messages, GatewayRole, ModelGateway, ModelReply, PromptRecord,
    ResponseSchema,
};
use crate::llm::types::{ChatMessage, Conversation};
use crate::perception::geometry::BoundingBox;
use crate::perception::screenshot::from_base64;

pub const ICON_COLOR: Rgba<u8> = Rgba([0, 200, 0, 255]);
const BACKGROUND: Rgba<u8> = Rgba([40, 40, 60, 255]);

/// A flat desktop with a single green icon filling `icon`.
pub fn desktop_fixture(width: u32, height: u32, icon: BoundingBox) -> DynamicImage {
    let mut img = RgbaImage::from_pixel(width, height, BACKGROUND);
    for y in icon.top..icon.bottom.min(height) {
        for x in icon.left..icon.right.min(width) {
            img.put_pixel(x, y, ICON_COLOR);
        }
    }
    DynamicImage::ImageRgba8(img)
}

/// Mean position of the icon's pixels, if any are visible.
pub fn icon_centroid(img: &RgbaImage) -> Option<(f64, f64)> {
    let (mut sx, mut sy, mut count) = (0.0, 0.0, 0u64);
    for (x, y, px) in img.enumerate_pixels() {
        if *px == ICON_COLOR {
            sx += x as f64;
            sy += y as f64;
            count += 1;
        }
    }
    (count > 0).then(|| (sx / count as f64, sy / count as f64))
}

/// Model gateway that replays scripted replies per role and, when vision is
/// enabled, answers zoom prompts by finding the icon in the attached region.
pub struct FakeGateway {
    scripts: Mutex<HashMap<GatewayRole, VecDeque<String>>>,
    vision_grid: Option<u32>,
    /// Requests per role that never resolve.
    stalls: Mutex<HashMap<GatewayRole, u32>>,
    /// Role and attached image count of every request.
    calls: Mutex<Vec<(GatewayRole, usize)>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            vision_grid: None,
            stalls: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script<I, S>(self, role: GatewayRole, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripts
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .extend(replies.into_iter().map(Into::into));
        self
    }

    pub fn with_vision(mut self, grid_size: u32) -> Self {
        self.vision_grid = Some(grid_size);
        self
    }

    /// The next `n` requests for `role` hang until the caller gives up.
    pub fn stall(self, role: GatewayRole, n: u32) -> Self {
        *self.stalls.lock().unwrap().entry(role).or_default() += n;
        self
    }

    fn take_stall(&self, role: GatewayRole) -> bool {
        let mut stalls = self.stalls.lock().unwrap();
        match stalls.get_mut(&role) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn calls(&self, role: GatewayRole) -> usize {
        self.calls.lock().unwrap().iter().filter(|(r, _)| *r == role).count()
    }

    /// Images attached to each request made for `role`, in order.
    pub fn image_counts(&self, role: GatewayRole) -> Vec<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, n)| *n)
            .collect()
    }

    fn next_scripted(&self, role: GatewayRole) -> DeskZoomResult<String> {
        let popped = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&role)
            .and_then(|q| q.pop_front());
        match (popped, role) {
            (Some(reply), _) => Ok(reply),
            (None, GatewayRole::System) => Ok("Understood.".into()),
            (None, _) => Err(DeskZoomError::LlmProvider(format!(
                "no scripted reply left for {}",
                role.as_str()
            ))),
        }
    }
}

fn vision_reply(conversation: &Conversation, n: u32, markers: bool) -> String {
    let region = conversation
        .messages()
        .last()
        .and_then(|m| m.images().first().map(|s| s.to_string()))
        .and_then(|uri| from_base64(&uri).ok())
        .map(|img| img.to_rgba8());
    let Some(region) = region else {
        return "No image attached.".into();
    };
    let Some((cx, cy)) = icon_centroid(&region) else {
        return "I cannot see it.".into();
    };
    let cw = (region.width() / n).max(1) as f64;
    let ch = (region.height() / n).max(1) as f64;

    if markers {
        let col = ((cx / cw).round() as i64 - 1).clamp(0, n as i64 - 2) as u32;
        let row = ((cy / ch).round() as i64 - 1).clamp(0, n as i64 - 2) as u32;
        let mx = (col + 1) * cw as u32;
        let my = (row + 1) * ch as u32;
        let exact = mx < region.width()
            && my < region.height()
            && *region.get_pixel(mx, my) == ICON_COLOR;
        format!(r#"{{"number": {}, "exact": {exact}}}"#, row * (n - 1) + col + 1)
    } else {
        let col = ((cx / cw) as u32).min(n - 1);
        let row = ((cy / ch) as u32).min(n - 1);
        format!(r#"{{"number": {}}}"#, row * n + col + 1)
    }
}

#[async_trait]
impl ModelGateway for FakeGateway {
    async fn request(
        &self,
        role: GatewayRole,
        conversation: &Conversation,
        expect: Option<&ResponseSchema>,
    ) -> DeskZoomResult<ModelReply> {
        self.calls
            .lock()
            .unwrap()
            .push((role, conversation.image_count()));
        if self.take_stall(role) {
            std::future::pending::<()>().await;
        }
        let text = match (role, self.vision_grid) {
            (GatewayRole::Zoom, Some(n)) => {
                let markers = expect.is_some_and(|s| s.name == "MarkerSelection");
                vision_reply(conversation, n, markers)
            }
            _ => self.next_scripted(role)?,
        };
        Ok(ModelReply {
            parsed: expect.and_then(|_| extract_json(&text)),
            prompt: PromptRecord {
                id: uuid::Uuid::new_v4().to_string(),
                role,
                model: "fake".into(),
                messages: sanitize_messages(conversation.messages()),
                response: text.clone(),
                timestamp: chrono::Utc::now(),
            },
            message: ChatMessage::text("assistant", text),
            model: "fake".into(),
        })
    }
}

/// Device that serves a fixed screenshot and records every input call.
pub struct FakeDevice {
    screen: DynamicImage,
    screen_size: Option<(u32, u32)>,
    capabilities: DeviceCapabilities,
    failing_clicks: Mutex<u32>,
    events: Mutex<Vec<String>>,
}

impl FakeDevice {
    pub fn new(screen: DynamicImage) -> Self {
        Self {
            screen,
            screen_size: None,
            capabilities: DeviceCapabilities::ALL,
            failing_clicks: Mutex::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn with_screen_size(mut self, width: u32, height: u32) -> Self {
        self.screen_size = Some((width, height));
        self
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// The next `n` clicks fail with a device error and are not logged.
    pub fn fail_clicks(self, n: u32) -> Self {
        *self.failing_clicks.lock().unwrap() = n;
        self
    }

    fn click_fails(&self) -> bool {
        let mut left = self.failing_clicks.lock().unwrap();
        if *left == 0 {
            return false;
        }
        *left -= 1;
        true
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Events other than screenshots.
    pub fn inputs(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e != "screenshot")
            .collect()
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Device for FakeDevice {
    fn name(&self) -> &str {
        "fake"
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    async fn screen_size(&self) -> DeskZoomResult<Option<(u32, u32)>> {
        Ok(self.screen_size)
    }

    async fn capture_screenshot(&self) -> DeskZoomResult<DynamicImage> {
        self.log("screenshot".into());
        Ok(self.screen.clone())
    }

    async fn move_pointer(&self, x: i32, y: i32) -> DeskZoomResult<()> {
        self.log(format!("move {x},{y}"));
        Ok(())
    }

    async fn click(&self, button: MouseButton) -> DeskZoomResult<()> {
        if self.click_fails() {
            return Err(DeskZoomError::Device("click: 502 Bad Gateway".into()));
        }
        self.log(format!("click {}", button.as_str()));
        Ok(())
    }

    async fn double_click(&self, button: MouseButton) -> DeskZoomResult<()> {
        self.log(format!("double_click {}", button.as_str()));
        Ok(())
    }

    async fn navigate(&self, url: &str) -> DeskZoomResult<()> {
        self.log(format!("navigate {url}"));
        Ok(())
    }

    async fn pointer_position(&self) -> DeskZoomResult<(i32, i32)> {
        Ok((0, 0))
    }

    async fn type_text(&self, text: &str) -> DeskZoomResult<()> {
        self.log(format!("type {text}"));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> DeskZoomResult<()> {
        self.log(format!("key {key}"));
        Ok(())
    }

    async fn hot_key(&self, keys: &[String]) -> DeskZoomResult<()> {
        self.log(format!("hot_key {}", keys.join("+")));
        Ok(())
    }

    async fn scroll(&self, clicks: i32) -> DeskZoomResult<()> {
        self.log(format!("scroll {clicks}"));
        Ok(())
    }

    async fn drag_to(&self, x: i32, y: i32) -> DeskZoomResult<()> {
        self.log(format!("drag {x},{y}"));
        Ok(())
    }
}
