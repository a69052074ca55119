//! Desktop devices the agent can observe and drive.
//!
//! The control loop only talks to the [`Device`] trait. `RemoteDesktop`
//! speaks to an agent daemon over HTTP; `LocalDesktop` (feature
//! `local-desktop`) drives the host machine directly.

#[cfg(feature = "local-desktop")]
pub mod local;
pub mod remote;

use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::errors::DeskZoomResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

/// What a device is able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub screenshot: bool,
    pub pointer: bool,
    pub navigation: bool,
    pub keyboard: bool,
    pub scroll: bool,
}

impl DeviceCapabilities {
    /// The minimum set the task solver needs.
    pub const REQUIRED: DeviceCapabilities = DeviceCapabilities {
        screenshot: true,
        pointer: true,
        navigation: true,
        keyboard: false,
        scroll: false,
    };

    pub const ALL: DeviceCapabilities = DeviceCapabilities {
        screenshot: true,
        pointer: true,
        navigation: true,
        keyboard: true,
        scroll: true,
    };

    /// Names of capabilities in `required` that this set lacks.
    pub fn missing(&self, required: &DeviceCapabilities) -> Vec<&'static str> {
        [
            ("screenshot", required.screenshot, self.screenshot),
            ("pointer", required.pointer, self.pointer),
            ("navigation", required.navigation, self.navigation),
            ("keyboard", required.keyboard, self.keyboard),
            ("scroll", required.scroll, self.scroll),
        ]
        .into_iter()
        .filter(|(_, needed, have)| *needed && !*have)
        .map(|(name, _, _)| name)
        .collect()
    }
}

/// A desktop the agent observes and drives. Every call may fail; failures
/// surface as errors, never as silent no-ops.
#[async_trait]
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> DeviceCapabilities;

    /// Logical screen size, when the device reports one.
    async fn screen_size(&self) -> DeskZoomResult<Option<(u32, u32)>>;

    async fn capture_screenshot(&self) -> DeskZoomResult<DynamicImage>;

    async fn move_pointer(&self, x: i32, y: i32) -> DeskZoomResult<()>;

    async fn click(&self, button: MouseButton) -> DeskZoomResult<()>;

    async fn double_click(&self, button: MouseButton) -> DeskZoomResult<()>;

    async fn navigate(&self, url: &str) -> DeskZoomResult<()>;

    async fn pointer_position(&self) -> DeskZoomResult<(i32, i32)>;

    async fn type_text(&self, text: &str) -> DeskZoomResult<()>;

    async fn press_key(&self, key: &str) -> DeskZoomResult<()>;

    async fn hot_key(&self, keys: &[String]) -> DeskZoomResult<()>;

    /// Positive scrolls up, negative scrolls down.
    async fn scroll(&self, clicks: i32) -> DeskZoomResult<()>;

    /// Press the left button at the current position and release it at (x, y).
    async fn drag_to(&self, x: i32, y: i32) -> DeskZoomResult<()>;
}
