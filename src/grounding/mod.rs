//! Visual grounding: turn "the Home icon" into a pixel on the screenshot.
//!
//! The [`Grounder`] zooms into the screenshot one grid level at a time,
//! asking the zoom model which numbered region holds the target. Every
//! level's annotated image and reply are kept in a [`GroundingTrace`] so a
//! failed or surprising click can be audited afterwards.

pub mod zoom;

pub use zoom::Grounder;

use std::path::Path;

use image::{DynamicImage, RgbaImage};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::DeskZoomResult;
use crate::llm::provider::PromptRecord;
use crate::perception::geometry::{BoundingBox, Point};
use crate::perception::som_grid::draw_debug_trace;

#[derive(Debug, Clone)]
pub struct GroundingRequest {
    pub description: String,
    pub max_depth: u32,
    pub grid_size: u32,
}

/// Reply to a cell-grid zoom prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ZoomSelection {
    /// Number of the cell that contains the target.
    pub number: u32,
}

/// Reply to a marker zoom prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MarkerSelection {
    /// Number of the marker closest to the target.
    pub number: u32,
    /// True when that marker sits on the target itself.
    #[serde(default)]
    pub exact: bool,
}

/// One zoom level as the model saw it.
#[derive(Debug, Clone)]
pub struct GroundingIteration {
    pub depth: u32,
    /// Absolute box that was shown at this level.
    pub bbox: BoundingBox,
    pub annotated: RgbaImage,
    pub reply: String,
    pub parsed: Option<serde_json::Value>,
    pub prompt: PromptRecord,
}

/// Audit trail of one `locate` call.
#[derive(Debug, Clone, Default)]
pub struct GroundingTrace {
    pub description: String,
    /// Absolute boxes from the whole screenshot down to the last zoom.
    pub boxes: Vec<BoundingBox>,
    pub iterations: Vec<GroundingIteration>,
    pub point: Option<Point>,
}

impl GroundingTrace {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    /// The screenshot with every box of the chain outlined and the final point marked.
    pub fn debug_image(&self, screenshot: &DynamicImage) -> RgbaImage {
        draw_debug_trace(screenshot, &self.boxes, self.point)
    }

    /// Write each level's annotated image plus the debug trace into `dir`.
    pub fn save_images(&self, screenshot: &DynamicImage, dir: &Path) -> DeskZoomResult<()> {
        std::fs::create_dir_all(dir)?;
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        for it in &self.iterations {
            it.annotated
                .save(dir.join(format!("{stamp}_zoom_{}.png", it.depth)))?;
        }
        self.debug_image(screenshot)
            .save(dir.join(format!("{stamp}_trace.png")))?;
        tracing::debug!(dir = %dir.display(), levels = self.iterations.len(), "grounding images saved");
        Ok(())
    }
}
