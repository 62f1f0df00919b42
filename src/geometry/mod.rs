// Module: Geometry
// Maps element bounding boxes from screenshot pixels to on-screen pixels.

use serde::Serialize;
use tracing::debug;

use crate::protocol::DetectedElement;

/// Measured sizes of the displayed screenshot: the image's natural pixel
/// size and the size of the container it is rendered into. Recomputed by the
/// hosting layer whenever either changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RenderGeometry {
    pub rendered_width: f64,
    pub rendered_height: f64,
    pub natural_width: f64,
    pub natural_height: f64,
}

/// Highlight rectangle in the rendered container's pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaledBox {
    pub top: i32,
    pub left: i32,
    pub width: i32,
    pub height: i32,
}

/// Computes where an element's highlight box lands inside the rendered
/// container. Returns `None` when the element has no bounding box or any
/// required dimension is zero (nothing sensible can be drawn).
///
/// The screenshot is displayed aspect-preserving, so when the aspect ratios
/// differ the image is letterboxed (relatively wider than the container) or
/// pillarboxed (relatively taller), and only the visible extent participates
/// in the scale factor.
///
/// TODO: apply `offset_x`/`offset_y` to the returned box once the expected
/// overlay alignment is confirmed against the hosting UI; today the box is
/// scale-correct but sits at the container origin when the image does not
/// exactly fill its container.
pub fn scaled_box(geometry: &RenderGeometry, element: &DetectedElement) -> Option<ScaledBox> {
    let rect = element.bounding_box?;

    if geometry.rendered_width <= 0.0
        || geometry.rendered_height <= 0.0
        || geometry.natural_width <= 0.0
        || geometry.natural_height <= 0.0
    {
        return None;
    }

    let img_aspect = geometry.natural_width / geometry.natural_height;
    let container_aspect = geometry.rendered_width / geometry.rendered_height;

    let (visible_width, visible_height) = if img_aspect > container_aspect {
        // Letterboxed: the image fills the container's width.
        (geometry.rendered_width, geometry.rendered_width / img_aspect)
    } else {
        // Pillarboxed: the image fills the container's height.
        (geometry.rendered_height * img_aspect, geometry.rendered_height)
    };

    let scale = visible_width / geometry.natural_width;

    let offset_x = (geometry.rendered_width - visible_width) / 2.0;
    let offset_y = (geometry.rendered_height - visible_height) / 2.0;
    debug!(
        scale,
        offset_x,
        offset_y,
        selector = %element.selector,
        "scaled highlight box"
    );

    Some(ScaledBox {
        top: (rect.y * scale).round() as i32,
        left: (rect.x * scale).round() as i32,
        width: (rect.width * scale).round() as i32,
        height: (rect.height * scale).round() as i32,
    })
}
