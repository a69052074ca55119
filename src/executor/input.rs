// Pointer sequences built from device primitives.
use std::time::Duration;

use crate::device::{Device, MouseButton};
use crate::errors::DeskZoomResult;
use crate::executor::action::ClickKind;

/// Move to (x, y), let the device settle, then click.
pub async fn click_at(
    device: &dyn Device,
    x: i32,
    y: i32,
    kind: ClickKind,
    button: MouseButton,
    settle: Duration,
) -> DeskZoomResult<()> {
    device.move_pointer(x, y).await?;
    tokio::time::sleep(settle).await;
    match kind {
        ClickKind::Single => device.click(button).await,
        ClickKind::Double => device.double_click(button).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::geometry::BoundingBox;
    use crate::testing::{desktop_fixture, FakeDevice};

    #[tokio::test]
    async fn test_move_then_double_click() {
        let device = FakeDevice::new(desktop_fixture(10, 10, BoundingBox::new(0, 0, 1, 1)));
        click_at(&device, 4, 7, ClickKind::Double, MouseButton::Right, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(device.inputs(), vec!["move 4,7", "double_click right"]);
    }
}
