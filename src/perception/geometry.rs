/// Grid geometry shared by both grounding strategies.
///
/// All boxes are half-open pixel rectangles: `left..right` × `top..bottom`.
/// Cell and marker numbers are 1-based and run row-major (left → right,
/// then top → bottom).
use serde::{Deserialize, Serialize};

use crate::errors::{DeskZoomError, DeskZoomResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// One labeled region of a partitioned box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridCell {
    pub label: u32,
    pub bbox: BoundingBox,
}

impl BoundingBox {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Box covering a whole `width × height` image.
    pub fn of_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn center(&self) -> Point {
        Point {
            x: (self.left + self.right) / 2,
            y: (self.top + self.bottom) / 2,
        }
    }

    /// Box of cell `cell_index` (1-based, row-major) in an `n × n` grid over this box.
    pub fn zoom_in(&self, cell_index: u32, n: u32) -> Self {
        let cell_w = self.width() / n;
        let cell_h = self.height() / n;
        let col = (cell_index - 1) % n;
        let row = (cell_index - 1) / n;
        Self::new(
            self.left + col * cell_w,
            self.top + row * cell_h,
            self.left + (col + 1) * cell_w,
            self.top + (row + 1) * cell_h,
        )
    }

    /// Re-express a box measured inside `parent` in `parent`'s own frame.
    pub fn to_absolute(&self, parent: &BoundingBox) -> Self {
        Self::new(
            parent.left + self.left,
            parent.top + self.top,
            parent.left + self.right,
            parent.top + self.bottom,
        )
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.left && p.x < self.right && p.y >= self.top && p.y < self.bottom
    }

    /// Copy the pixels under this box out of `img` into a fresh image.
    pub fn crop(&self, img: &image::DynamicImage) -> image::DynamicImage {
        img.crop_imm(self.left, self.top, self.width(), self.height())
    }
}

/// Split `bbox` into `n × n` cells, labeled `1..=n²` row-major.
///
/// Cell sizes use integer division; remainder pixels along the right and
/// bottom edges belong to no cell.
pub fn partition(bbox: &BoundingBox, n: u32) -> DeskZoomResult<Vec<GridCell>> {
    if n == 0 {
        return Err(DeskZoomError::Perception("grid size must be positive".into()));
    }
    Ok((1..=n * n)
        .map(|label| GridCell {
            label,
            bbox: bbox.zoom_in(label, n),
        })
        .collect())
}

/// Number of intersection markers an `n × n` grid carries.
pub fn marker_count(n: u32) -> u32 {
    n.saturating_sub(1).pow(2)
}

/// Pixel position of marker `number` (1-based, row-major) relative to `bbox`'s frame.
pub fn marker_point(bbox: &BoundingBox, n: u32, number: u32) -> Point {
    let (col, row) = marker_col_row(n, number);
    let cell_w = bbox.width() / n;
    let cell_h = bbox.height() / n;
    Point {
        x: bbox.left + (col + 1) * cell_w,
        y: bbox.top + (row + 1) * cell_h,
    }
}

/// The 2 × 2-cell box centred on marker `number`.
///
/// For `n ≥ 3` this is strictly smaller than `bbox` in both dimensions and
/// its centre is the marker itself.
pub fn marker_zoom_box(bbox: &BoundingBox, n: u32, number: u32) -> BoundingBox {
    let (col, row) = marker_col_row(n, number);
    let cell_w = bbox.width() / n;
    let cell_h = bbox.height() / n;
    BoundingBox::new(
        bbox.left + col * cell_w,
        bbox.top + row * cell_h,
        bbox.left + (col + 2) * cell_w,
        bbox.top + (row + 2) * cell_h,
    )
}

fn marker_col_row(n: u32, number: u32) -> (u32, u32) {
    let per_row = n.saturating_sub(1).max(1);
    ((number - 1) % per_row, (number - 1) / per_row)
}
