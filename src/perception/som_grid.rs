/// SoM (Set-of-Mark) grid rendering.
///
/// Two annotation styles are supported, one per grounding strategy:
///   - cell grid: every cell gets a border and its number printed in a badge
///     at its top-left corner;
///   - marker overlay: a transparent layer with numbered filled circles at the
///     interior grid intersections, blended onto the screenshot by `compose`.
///
/// Nothing here mutates its input image.
use image::{DynamicImage, Rgba, RgbaImage};

use crate::errors::{DeskZoomError, DeskZoomResult};
use crate::perception::geometry::{marker_count, marker_point, BoundingBox, GridCell, Point};

// ── Minimal 5×5 bitmap font (digits only) ─────────────────────────────────────
// Each glyph: 5 rows, each row is a u8 where bit4=leftmost pixel, bit0=rightmost.
const DIGITS_5X5: [[u8; 5]; 10] = [
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // 0
    [0b00100, 0b01100, 0b00100, 0b00100, 0b01110], // 1
    [0b01110, 0b10001, 0b00110, 0b01000, 0b11111], // 2
    [0b11110, 0b00001, 0b00110, 0b00001, 0b11110], // 3
    [0b00110, 0b01010, 0b10010, 0b11111, 0b00010], // 4
    [0b11111, 0b10000, 0b11110, 0b00001, 0b11110], // 5
    [0b01110, 0b10000, 0b11110, 0b10001, 0b01110], // 6
    [0b11111, 0b00001, 0b00010, 0b00100, 0b00100], // 7
    [0b01110, 0b10001, 0b01110, 0b10001, 0b01110], // 8
    [0b01110, 0b10001, 0b01111, 0b00001, 0b01110], // 9
];

/// Colours used for grid lines, badges and marker circles, and for label text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridColors {
    pub circle: Rgba<u8>,
    pub text: Rgba<u8>,
}

impl GridColors {
    pub fn parse(circle: &str, text: &str) -> DeskZoomResult<Self> {
        Ok(Self {
            circle: parse_color(circle)?,
            text: parse_color(text)?,
        })
    }
}

impl Default for GridColors {
    fn default() -> Self {
        Self {
            circle: Rgba([255, 0, 0, 255]),
            text: Rgba([255, 255, 0, 255]),
        }
    }
}

/// Parse a colour name ("red") or hex triplet ("#ff8800").
pub fn parse_color(value: &str) -> DeskZoomResult<Rgba<u8>> {
    let s = value.trim().to_ascii_lowercase();
    let rgb = match s.as_str() {
        "red" => [255, 0, 0],
        "yellow" => [255, 255, 0],
        "green" => [0, 200, 0],
        "blue" => [0, 80, 255],
        "cyan" => [0, 200, 255],
        "magenta" => [255, 0, 255],
        "orange" => [255, 165, 0],
        "white" => [255, 255, 255],
        "black" => [0, 0, 0],
        hex if hex.len() == 7 && hex.starts_with('#') => {
            let channel = |i: usize| {
                u8::from_str_radix(&hex[i..i + 2], 16)
                    .map_err(|_| DeskZoomError::Config(format!("invalid colour '{value}'")))
            };
            [channel(1)?, channel(3)?, channel(5)?]
        }
        _ => return Err(DeskZoomError::Config(format!("unknown colour '{value}'"))),
    };
    Ok(Rgba([rgb[0], rgb[1], rgb[2], 255]))
}

// ── Text ─────────────────────────────────────────────────────────────────────

/// Glyph pixel scale for a grid whose cells are `cell_w × cell_h`:
/// glyphs come out roughly a fifth of the cell height.
pub fn label_scale(cell_w: u32, cell_h: u32) -> u32 {
    (cell_w.min(cell_h) / 25).clamp(1, 8)
}

/// Pixel size of `text` rendered at `scale` (1px gap between chars).
fn text_size(text: &str, scale: u32) -> (u32, u32) {
    let n = text.chars().count() as u32;
    (n * 5 * scale + n.saturating_sub(1), 5 * scale)
}

/// Draw a digit string with its top-left corner at (px, py), clipped to the canvas.
fn draw_digits(canvas: &mut RgbaImage, text: &str, px: i64, py: i64, scale: u32, col: Rgba<u8>) {
    let step = (5 * scale + 1) as i64;
    for (i, c) in text.chars().enumerate() {
        let Some(glyph) = c.to_digit(10).map(|d| &DIGITS_5X5[d as usize]) else {
            continue;
        };
        let gx = px + i as i64 * step;
        for (row, &bits) in glyph.iter().enumerate() {
            for bit in 0..5u32 {
                if (bits >> (4 - bit)) & 1 == 0 {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        let x = gx + (bit * scale + sx) as i64;
                        let y = py + (row as u32 * scale + sy) as i64;
                        put_pixel(canvas, x, y, col);
                    }
                }
            }
        }
    }
}

// ── Drawing primitives ───────────────────────────────────────────────────────

fn put_pixel(canvas: &mut RgbaImage, x: i64, y: i64, col: Rgba<u8>) {
    let (w, h) = canvas.dimensions();
    if x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h {
        canvas.put_pixel(x as u32, y as u32, col);
    }
}

fn blend_pixel(pixel: &mut Rgba<u8>, col: Rgba<u8>, alpha: f32) {
    pixel[0] = (pixel[0] as f32 * (1.0 - alpha) + col[0] as f32 * alpha).round() as u8;
    pixel[1] = (pixel[1] as f32 * (1.0 - alpha) + col[1] as f32 * alpha).round() as u8;
    pixel[2] = (pixel[2] as f32 * (1.0 - alpha) + col[2] as f32 * alpha).round() as u8;
    pixel[3] = 255;
}

fn fill_rect(canvas: &mut RgbaImage, x: i64, y: i64, w: u32, h: u32, col: Rgba<u8>) {
    for dy in 0..h as i64 {
        for dx in 0..w as i64 {
            put_pixel(canvas, x + dx, y + dy, col);
        }
    }
}

fn draw_rect(canvas: &mut RgbaImage, bbox: &BoundingBox, col: Rgba<u8>, thickness: u32) {
    if bbox.width() == 0 || bbox.height() == 0 {
        return;
    }
    let (x1, y1) = (bbox.left as i64, bbox.top as i64);
    let (x2, y2) = (bbox.right as i64 - 1, bbox.bottom as i64 - 1);
    for t in 0..thickness as i64 {
        for x in x1..=x2 {
            put_pixel(canvas, x, y1 + t, col);
            put_pixel(canvas, x, y2 - t, col);
        }
        for y in y1..=y2 {
            put_pixel(canvas, x1 + t, y, col);
            put_pixel(canvas, x2 - t, y, col);
        }
    }
}

fn fill_circle(canvas: &mut RgbaImage, cx: i64, cy: i64, r: i64, col: Rgba<u8>) {
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                put_pixel(canvas, cx + dx, cy + dy, col);
            }
        }
    }
}

// ── Annotations ──────────────────────────────────────────────────────────────

/// Copy `img` and outline every cell, printing its label in a badge at the
/// cell's top-left corner. `cells` are in the image's own pixel frame.
pub fn draw_cell_grid(img: &DynamicImage, cells: &[GridCell], colors: &GridColors) -> RgbaImage {
    let mut canvas = img.to_rgba8();
    let Some(first) = cells.first() else {
        return canvas;
    };
    let scale = label_scale(first.bbox.width(), first.bbox.height());
    let thickness = scale.min(3);
    let pad = scale;

    for cell in cells {
        draw_rect(&mut canvas, &cell.bbox, colors.circle, thickness);
    }
    for cell in cells {
        let label = cell.label.to_string();
        let (tw, th) = text_size(&label, scale);
        let bx = (cell.bbox.left + thickness) as i64;
        let by = (cell.bbox.top + thickness) as i64;
        fill_rect(&mut canvas, bx, by, tw + pad * 2, th + pad * 2, colors.circle);
        draw_digits(&mut canvas, &label, bx + pad as i64, by + pad as i64, scale, colors.text);
    }
    canvas
}

/// Transparent `width × height` layer with numbered filled circles at the
/// `(n-1)²` interior intersections of an `n × n` grid.
pub fn overlay_grid(width: u32, height: u32, n: u32, colors: &GridColors) -> RgbaImage {
    let mut layer = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    if n < 2 {
        return layer;
    }
    let frame = BoundingBox::of_size(width, height);
    let scale = label_scale(width / n, height / n);

    for number in 1..=marker_count(n) {
        let Point { x, y } = marker_point(&frame, n, number);
        let label = number.to_string();
        let (tw, th) = text_size(&label, scale);
        let radius = (tw.max(th) / 2 + 2 * scale) as i64;
        fill_circle(&mut layer, x as i64, y as i64, radius, colors.circle);
        draw_digits(
            &mut layer,
            &label,
            x as i64 - (tw / 2) as i64,
            y as i64 - (th / 2) as i64,
            scale,
            colors.text,
        );
    }
    layer
}

/// Alpha-blend `overlay` onto `base`, optionally desaturating the base first.
///
/// The overlay's own alpha is multiplied by `opacity` (clamped to 0..=1).
pub fn compose(
    base: &DynamicImage,
    overlay: &RgbaImage,
    opacity: f32,
    grayscale: bool,
) -> DeskZoomResult<RgbaImage> {
    let base_dims = (base.width(), base.height());
    if base_dims != overlay.dimensions() {
        return Err(DeskZoomError::DimensionMismatch {
            base: base_dims,
            overlay: overlay.dimensions(),
        });
    }
    let mut merged = if grayscale {
        base.grayscale().to_rgba8()
    } else {
        base.to_rgba8()
    };
    let opacity = opacity.clamp(0.0, 1.0);
    for (x, y, px) in overlay.enumerate_pixels() {
        let alpha = px[3] as f32 / 255.0 * opacity;
        if alpha > 0.0 {
            blend_pixel(merged.get_pixel_mut(x, y), *px, alpha);
        }
    }
    Ok(merged)
}

/// Copy `img`, outline every box of a zoom chain and mark the final point.
pub fn draw_debug_trace(img: &DynamicImage, boxes: &[BoundingBox], point: Option<Point>) -> RgbaImage {
    let mut canvas = img.to_rgba8();
    let outline = Rgba([0, 200, 255, 255]);
    let thickness = if canvas.width() > 1600 { 3 } else { 2 };
    for bbox in boxes {
        draw_rect(&mut canvas, bbox, outline, thickness);
    }
    if let Some(p) = point {
        fill_circle(&mut canvas, p.x as i64, p.y as i64, 5, Rgba([255, 0, 0, 255]));
    }
    canvas
}
