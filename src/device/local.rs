//! Host desktop driven in-process: `xcap` for capture, `enigo` for input.
//!
//! Input backends are not `Send` on every platform, so each call opens a
//! fresh connection on a blocking thread.
use async_trait::async_trait;
use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use image::DynamicImage;

use crate::device::{Device, DeviceCapabilities, MouseButton};
use crate::errors::{DeskZoomError, DeskZoomResult};

pub struct LocalDesktop {
    name: String,
}

impl LocalDesktop {
    pub fn new() -> Self {
        Self {
            name: "local".into(),
        }
    }
}

impl Default for LocalDesktop {
    fn default() -> Self {
        Self::new()
    }
}

async fn with_enigo<T, F>(f: F) -> DeskZoomResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Enigo) -> Result<T, enigo::InputError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut enigo = Enigo::new(&Settings::default())
            .map_err(|e| DeskZoomError::Device(format!("input backend: {e}")))?;
        f(&mut enigo).map_err(|e| DeskZoomError::Device(format!("input: {e}")))
    })
    .await
    .map_err(|e| DeskZoomError::Device(format!("join: {e}")))?
}

fn to_button(button: MouseButton) -> Button {
    match button {
        MouseButton::Left => Button::Left,
        MouseButton::Right => Button::Right,
        MouseButton::Middle => Button::Middle,
    }
}

/// Map a key name ("enter", "ctrl", "a") to an enigo key.
fn to_key(name: &str) -> Option<Key> {
    let key = match name.trim().to_ascii_lowercase().as_str() {
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "space" => Key::Space,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "ctrl" | "control" => Key::Control,
        "shift" => Key::Shift,
        "alt" => Key::Alt,
        "meta" | "super" | "win" | "cmd" => Key::Meta,
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Unicode(c),
                _ => return None,
            }
        }
    };
    Some(key)
}

fn unknown_key(name: &str) -> DeskZoomError {
    DeskZoomError::InvalidParameters {
        action: "press_key".into(),
        reason: format!("unknown key '{name}'"),
    }
}

fn opener() -> (&'static str, Vec<&'static str>) {
    if cfg!(target_os = "windows") {
        ("cmd", vec!["/C", "start", ""])
    } else if cfg!(target_os = "macos") {
        ("open", vec![])
    } else {
        ("xdg-open", vec![])
    }
}

#[async_trait]
impl Device for LocalDesktop {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::ALL
    }

    async fn screen_size(&self) -> DeskZoomResult<Option<(u32, u32)>> {
        let (w, h) = with_enigo(|e| e.main_display()).await?;
        Ok(Some((w.max(0) as u32, h.max(0) as u32)))
    }

    async fn capture_screenshot(&self) -> DeskZoomResult<DynamicImage> {
        tokio::task::spawn_blocking(|| {
            let monitors = xcap::Monitor::all()
                .map_err(|e| DeskZoomError::Device(format!("list monitors: {e}")))?;
            let monitor = monitors
                .iter()
                .find(|m| m.is_primary())
                .or_else(|| monitors.first())
                .ok_or_else(|| DeskZoomError::Device("no monitor found".into()))?;
            let img = monitor
                .capture_image()
                .map_err(|e| DeskZoomError::Device(format!("capture: {e}")))?;
            Ok(DynamicImage::ImageRgba8(img))
        })
        .await
        .map_err(|e| DeskZoomError::Device(format!("join: {e}")))?
    }

    async fn move_pointer(&self, x: i32, y: i32) -> DeskZoomResult<()> {
        with_enigo(move |e| e.move_mouse(x, y, Coordinate::Abs)).await
    }

    async fn click(&self, button: MouseButton) -> DeskZoomResult<()> {
        with_enigo(move |e| e.button(to_button(button), Direction::Click)).await
    }

    async fn double_click(&self, button: MouseButton) -> DeskZoomResult<()> {
        with_enigo(move |e| {
            e.button(to_button(button), Direction::Click)?;
            e.button(to_button(button), Direction::Click)
        })
        .await
    }

    async fn navigate(&self, url: &str) -> DeskZoomResult<()> {
        let (program, mut args) = opener();
        args.push(url);
        let status = tokio::process::Command::new(program).args(&args).status().await?;
        if !status.success() {
            return Err(DeskZoomError::Device(format!("{program} exited with {status}")));
        }
        Ok(())
    }

    async fn pointer_position(&self) -> DeskZoomResult<(i32, i32)> {
        with_enigo(|e| e.location()).await
    }

    async fn type_text(&self, text: &str) -> DeskZoomResult<()> {
        let text = text.to_string();
        with_enigo(move |e| e.text(&text)).await
    }

    async fn press_key(&self, key: &str) -> DeskZoomResult<()> {
        let k = to_key(key).ok_or_else(|| unknown_key(key))?;
        with_enigo(move |e| e.key(k, Direction::Click)).await
    }

    async fn hot_key(&self, keys: &[String]) -> DeskZoomResult<()> {
        let mapped = keys
            .iter()
            .map(|k| to_key(k).ok_or_else(|| unknown_key(k)))
            .collect::<DeskZoomResult<Vec<_>>>()?;
        with_enigo(move |e| {
            for k in &mapped {
                e.key(*k, Direction::Press)?;
            }
            for k in mapped.iter().rev() {
                e.key(*k, Direction::Release)?;
            }
            Ok(())
        })
        .await
    }

    async fn scroll(&self, clicks: i32) -> DeskZoomResult<()> {
        // enigo scrolls down for positive lengths.
        with_enigo(move |e| e.scroll(-clicks, Axis::Vertical)).await
    }

    async fn drag_to(&self, x: i32, y: i32) -> DeskZoomResult<()> {
        with_enigo(move |e| {
            e.button(Button::Left, Direction::Press)?;
            e.move_mouse(x, y, Coordinate::Abs)?;
            e.button(Button::Left, Direction::Release)
        })
        .await
    }
}
