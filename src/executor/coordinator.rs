// Screenshot-to-screen coordinate mapping.
use crate::perception::geometry::Point;

/// Converts a point on a `shot`-sized screenshot to device screen pixels.
/// Handles HiDPI captures whose pixel size differs from the logical screen.
pub fn to_screen(point: Point, shot: (u32, u32), screen: Option<(u32, u32)>) -> (i32, i32) {
    let Some((screen_w, screen_h)) = screen else {
        return (point.x as i32, point.y as i32);
    };
    if shot.0 == 0 || shot.1 == 0 || (screen_w, screen_h) == shot {
        return (point.x as i32, point.y as i32);
    }
    let x = point.x as f64 * screen_w as f64 / shot.0 as f64;
    let y = point.y as f64 * screen_h as f64 / shot.1 as f64;
    (x.round() as i32, y.round() as i32)
}
