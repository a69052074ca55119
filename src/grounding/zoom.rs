use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, RgbaImage};

use crate::config::{GroundingConfig, GroundingStrategy};
use crate::errors::{DeskZoomError, DeskZoomResult};
use crate::grounding::{
    GroundingIteration, GroundingRequest, GroundingTrace, MarkerSelection, ZoomSelection,
};
use crate::llm::provider::{GatewayRole, ModelGateway, ModelReply, ResponseSchema};
use crate::llm::types::Conversation;
use crate::perception::geometry::{marker_count, marker_zoom_box, partition, BoundingBox, Point};
use crate::perception::screenshot::to_data_uri;
use crate::perception::som_grid::{compose, draw_cell_grid, overlay_grid, GridColors};

const CELLS_PROMPT: &str = "\
You are looking for: {target}.
The first image is the current region of the screen. The second image is the \
same region divided into numbered cells. Reply with the number of the cell \
that contains the centre of the target, as JSON matching this schema:
{schema}";

const MARKERS_PROMPT: &str = "\
You are looking for: {target}.
The first image is the current region of the screen. The second image carries \
numbered circles at the grid intersections. Reply with the number of the circle \
nearest the target and set `exact` to true only if that circle sits on the \
target, as JSON matching this schema:
{schema}";

/// Recursive grid-zoom grounder.
pub struct Grounder {
    gateway: Arc<dyn ModelGateway>,
    strategy: GroundingStrategy,
    colors: GridColors,
    opacity: f32,
    grayscale: bool,
    min_cell_px: u32,
    request_timeout: Duration,
}

impl Grounder {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        config: &GroundingConfig,
        request_timeout: Duration,
    ) -> DeskZoomResult<Self> {
        Ok(Self {
            gateway,
            strategy: config.strategy,
            colors: GridColors::parse(&config.color_circle, &config.color_text)?,
            opacity: config.opacity,
            grayscale: config.grayscale,
            min_cell_px: config.min_cell_px.max(1),
            request_timeout,
        })
    }

    /// Absolute pixel position of `request.description` on `screenshot`.
    ///
    /// `trace` receives the box chain and every level's exchange, including
    /// the one that failed when an error is returned.
    pub async fn locate(
        &self,
        request: &GroundingRequest,
        screenshot: &DynamicImage,
        trace: &mut GroundingTrace,
    ) -> DeskZoomResult<Point> {
        let min_grid = match self.strategy {
            GroundingStrategy::Cells => 2,
            GroundingStrategy::Markers => 3,
        };
        if request.grid_size < min_grid {
            return Err(DeskZoomError::Config(format!(
                "grid size {} too small for {:?} grounding",
                request.grid_size, self.strategy
            )));
        }

        let root = BoundingBox::of_size(screenshot.width(), screenshot.height());
        trace.description = request.description.clone();
        trace.boxes = vec![root];
        trace.iterations.clear();
        trace.point = None;

        tracing::info!(
            target_desc = %request.description,
            strategy = ?self.strategy,
            max_depth = request.max_depth,
            grid = request.grid_size,
            "grounding started"
        );

        let point = match self.strategy {
            GroundingStrategy::Cells => self.zoom_cells(request, screenshot, trace).await?,
            GroundingStrategy::Markers => self.zoom_markers(request, screenshot, trace).await?,
        };
        trace.point = Some(point);
        tracing::info!(x = point.x, y = point.y, levels = trace.iterations.len(), "grounding resolved");
        Ok(point)
    }

    async fn zoom_cells(
        &self,
        request: &GroundingRequest,
        screenshot: &DynamicImage,
        trace: &mut GroundingTrace,
    ) -> DeskZoomResult<Point> {
        let n = request.grid_size;
        let schema = ResponseSchema::of::<ZoomSelection>();
        let mut current = BoundingBox::of_size(screenshot.width(), screenshot.height());
        let mut region = screenshot.clone();

        for depth in 1..=request.max_depth {
            if self.at_resolution_bound(&current, n) {
                tracing::debug!(depth, "cell below resolution bound, stopping zoom");
                break;
            }
            let local = BoundingBox::of_size(region.width(), region.height());
            let cells = partition(&local, n)?;
            let annotated = draw_cell_grid(&region, &cells, &self.colors);

            let reply = self
                .ask(CELLS_PROMPT, request, &schema, &region, &annotated)
                .await?;
            let selection: Option<ZoomSelection> = reply.parse();
            record(trace, depth, current, annotated, &reply);

            let number = match selection {
                Some(s) if (1..=n * n).contains(&s.number) => s.number,
                _ => return Err(malformed(depth, &reply)),
            };
            let chosen = local.zoom_in(number, n);
            region = chosen.crop(&region);
            current = chosen.to_absolute(&current);
            trace.boxes.push(current);
            tracing::debug!(depth, number, ?current, "zoomed into cell");
        }
        Ok(current.center())
    }

    async fn zoom_markers(
        &self,
        request: &GroundingRequest,
        screenshot: &DynamicImage,
        trace: &mut GroundingTrace,
    ) -> DeskZoomResult<Point> {
        let n = request.grid_size;
        let schema = ResponseSchema::of::<MarkerSelection>();
        let mut current = BoundingBox::of_size(screenshot.width(), screenshot.height());
        let mut region = screenshot.clone();

        for depth in 1..=request.max_depth {
            if self.at_resolution_bound(&current, n) {
                tracing::debug!(depth, "cell below resolution bound, taking current centre");
                return Ok(current.center());
            }
            let overlay = overlay_grid(region.width(), region.height(), n, &self.colors);
            let annotated = compose(&region, &overlay, self.opacity, self.grayscale)?;

            let reply = self
                .ask(MARKERS_PROMPT, request, &schema, &region, &annotated)
                .await?;
            let selection: Option<MarkerSelection> = reply.parse();
            record(trace, depth, current, annotated, &reply);

            let selection = match selection {
                Some(s) if (1..=marker_count(n)).contains(&s.number) => s,
                _ => return Err(malformed(depth, &reply)),
            };
            let local = BoundingBox::of_size(region.width(), region.height());
            let chosen = marker_zoom_box(&local, n, selection.number);
            let absolute = chosen.to_absolute(&current);
            trace.boxes.push(absolute);

            if selection.exact {
                tracing::debug!(depth, number = selection.number, "marker reported exact");
                return Ok(absolute.center());
            }
            region = chosen.crop(&region);
            current = absolute;
            tracing::debug!(depth, number = selection.number, ?current, "zoomed around marker");
        }

        Err(DeskZoomError::GroundingNotFound {
            description: request.description.clone(),
            depth: request.max_depth,
        })
    }

    fn at_resolution_bound(&self, current: &BoundingBox, n: u32) -> bool {
        current.width() / n < self.min_cell_px || current.height() / n < self.min_cell_px
    }

    async fn ask(
        &self,
        template: &str,
        request: &GroundingRequest,
        schema: &ResponseSchema,
        region: &DynamicImage,
        annotated: &RgbaImage,
    ) -> DeskZoomResult<ModelReply> {
        let text = template
            .replace("{target}", &request.description)
            .replace("{schema}", &schema.to_prompt_string());
        let images = vec![
            to_data_uri(region)?,
            to_data_uri(&DynamicImage::ImageRgba8(annotated.clone()))?,
        ];
        let mut conversation = Conversation::new();
        conversation.post("user", text, images);

        tokio::time::timeout(
            self.request_timeout,
            self.gateway.request(GatewayRole::Zoom, &conversation, Some(schema)),
        )
        .await
        .map_err(|_| DeskZoomError::Timeout(format!("zoom request after {:?}", self.request_timeout)))?
    }
}

fn record(trace: &mut GroundingTrace, depth: u32, bbox: BoundingBox, annotated: RgbaImage, reply: &ModelReply) {
    trace.iterations.push(GroundingIteration {
        depth,
        bbox,
        annotated,
        reply: reply.text(),
        parsed: reply.parsed.clone(),
        prompt: reply.prompt.clone(),
    });
}

fn malformed(depth: u32, reply: &ModelReply) -> DeskZoomError {
    DeskZoomError::MalformedReply(format!("zoom level {depth}: {}", reply.text()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{desktop_fixture, FakeGateway};

    fn grounder(gateway: FakeGateway, strategy: GroundingStrategy) -> Grounder {
        let cfg = GroundingConfig {
            strategy,
            ..Default::default()
        };
        Grounder::new(Arc::new(gateway), &cfg, Duration::from_secs(5)).unwrap()
    }

    fn request(max_depth: u32, grid_size: u32) -> GroundingRequest {
        GroundingRequest {
            description: "Home icon".into(),
            max_depth,
            grid_size,
        }
    }

    #[tokio::test]
    async fn test_home_icon_on_six_by_six_grid() {
        let icon = BoundingBox::new(130, 250, 150, 270);
        let shot = desktop_fixture(600, 600, icon);
        let gateway = FakeGateway::new().with_vision(6);
        let g = grounder(gateway, GroundingStrategy::Cells);

        let mut trace = GroundingTrace::default();
        let p = g.locate(&request(2, 6), &shot, &mut trace).await.unwrap();

        assert_eq!(trace.iterations.len(), 2);
        // Within one final cell of the icon.
        let tolerance = trace.boxes[2].width();
        assert!(p.x + tolerance >= icon.left && p.x <= icon.right + tolerance);
        assert!(p.y + tolerance >= icon.top && p.y <= icon.bottom + tolerance);
        assert!(icon.contains_point(p));
    }

    #[tokio::test]
    async fn test_boxes_shrink_and_nest() {
        let icon = BoundingBox::new(500, 40, 520, 60);
        let shot = desktop_fixture(640, 480, icon);
        let g = grounder(FakeGateway::new().with_vision(3), GroundingStrategy::Cells);

        let mut trace = GroundingTrace::default();
        let p = g.locate(&request(3, 3), &shot, &mut trace).await.unwrap();

        assert_eq!(trace.boxes.len(), 4);
        for pair in trace.boxes.windows(2) {
            assert!(pair[0].contains(&pair[1]));
            assert!(pair[1].width() <= pair[0].width());
            assert!(pair[1].height() <= pair[0].height());
        }
        assert!(trace.boxes[0].contains_point(p));
        assert_eq!(trace.point, Some(p));
    }

    #[tokio::test]
    async fn test_resolution_bound_stops_early() {
        let icon = BoundingBox::new(10, 10, 14, 14);
        let shot = desktop_fixture(36, 36, icon);
        let g = grounder(FakeGateway::new().with_vision(3), GroundingStrategy::Cells);

        let mut trace = GroundingTrace::default();
        // 36 → 12 → 4 px; the next cell would be 1 px, under the 4 px bound.
        g.locate(&request(5, 3), &shot, &mut trace).await.unwrap();
        assert_eq!(trace.iterations.len(), 2);
    }

    #[tokio::test]
    async fn test_unparsable_zoom_reply_is_fatal() {
        let shot = desktop_fixture(300, 300, BoundingBox::new(0, 0, 10, 10));
        let gateway = FakeGateway::new().script(GatewayRole::Zoom, ["I think it is near the top"]);
        let g = grounder(gateway, GroundingStrategy::Cells);

        let mut trace = GroundingTrace::default();
        let err = g.locate(&request(3, 3), &shot, &mut trace).await.unwrap_err();
        assert!(matches!(err, DeskZoomError::MalformedReply(_)));
        // The failed exchange is still on record.
        assert_eq!(trace.iterations.len(), 1);
        assert!(trace.iterations[0].parsed.is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_cell_is_malformed() {
        let shot = desktop_fixture(300, 300, BoundingBox::new(0, 0, 10, 10));
        let gateway = FakeGateway::new().script(GatewayRole::Zoom, [r#"{"number": 10}"#]);
        let g = grounder(gateway, GroundingStrategy::Cells);

        let mut trace = GroundingTrace::default();
        let err = g.locate(&request(3, 3), &shot, &mut trace).await.unwrap_err();
        assert!(matches!(err, DeskZoomError::MalformedReply(_)));
    }

    #[tokio::test]
    async fn test_markers_stop_on_exact() {
        // Icon centred on marker 4 of a 3x3 grid over 300x300: (200, 200).
        let icon = BoundingBox::new(196, 196, 205, 205);
        let shot = desktop_fixture(300, 300, icon);
        let g = grounder(FakeGateway::new().with_vision(3), GroundingStrategy::Markers);

        let mut trace = GroundingTrace::default();
        let p = g.locate(&request(3, 3), &shot, &mut trace).await.unwrap();
        assert_eq!(trace.iterations.len(), 1);
        assert_eq!(p, Point { x: 200, y: 200 });
    }

    #[tokio::test]
    async fn test_markers_zoom_until_exact() {
        // Misses marker 1 at (100, 100); after zooming to (0,0)-(200,200) the
        // centre marker sits at (132, 132), on the icon.
        let icon = BoundingBox::new(128, 128, 140, 140);
        let shot = desktop_fixture(300, 300, icon);
        let g = grounder(FakeGateway::new().with_vision(3), GroundingStrategy::Markers);

        let mut trace = GroundingTrace::default();
        let p = g.locate(&request(3, 3), &shot, &mut trace).await.unwrap();
        assert_eq!(trace.iterations.len(), 2);
        assert_eq!(p, Point { x: 132, y: 132 });
        assert!(icon.contains_point(p));
        for pair in trace.boxes.windows(2) {
            assert!(pair[0].contains(&pair[1]));
        }
    }

    #[tokio::test]
    async fn test_markers_exhaust_depth() {
        let shot = desktop_fixture(300, 300, BoundingBox::new(0, 0, 10, 10));
        let gateway = FakeGateway::new().script(
            GatewayRole::Zoom,
            [r#"{"number": 1, "exact": false}"#, r#"{"number": 1, "exact": false}"#],
        );
        let g = grounder(gateway, GroundingStrategy::Markers);

        let mut trace = GroundingTrace::default();
        let err = g.locate(&request(2, 3), &shot, &mut trace).await.unwrap_err();
        assert!(matches!(err, DeskZoomError::GroundingNotFound { depth: 2, .. }));
        assert_eq!(trace.iterations.len(), 2);
    }

    #[tokio::test]
    async fn test_markers_reject_small_grid() {
        let shot = desktop_fixture(100, 100, BoundingBox::new(0, 0, 10, 10));
        let g = grounder(FakeGateway::new(), GroundingStrategy::Markers);
        let mut trace = GroundingTrace::default();
        assert!(matches!(
            g.locate(&request(3, 2), &shot, &mut trace).await,
            Err(DeskZoomError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_stalled_zoom_request_times_out() {
        let gateway = FakeGateway::new().with_vision(3).stall(GatewayRole::Zoom, 1);
        let g = Grounder::new(Arc::new(gateway), &GroundingConfig::default(), Duration::from_millis(20)).unwrap();
        let shot = desktop_fixture(300, 300, BoundingBox::new(10, 10, 20, 20));
        let mut trace = GroundingTrace::new("Home icon");

        let err = g.locate(&request(3, 3), &shot, &mut trace).await.unwrap_err();
        assert!(matches!(err, DeskZoomError::Timeout(_)));
        assert!(err.is_retryable());
        assert!(trace.iterations.is_empty());
    }
}
