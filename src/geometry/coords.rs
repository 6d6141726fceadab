//! Frame-space to render-space conversion.
//!
//! Frame space has its origin at the top-left with y pointing down. Render
//! space is centred on the frame with y pointing up:
//!
//! ```text
//! x' = x - width / 2
//! y' = height / 2 - y
//! ```

use crate::detection::{Corner, Marker};
use crate::tracking::state::RenderSize;

#[inline]
pub fn frame_to_render(corner: Corner, size: &RenderSize) -> Corner {
    Corner {
        x: corner.x - size.width as f64 / 2.0,
        y: size.height / 2.0 - corner.y,
    }
}

/// Convert all four corners of a marker, keeping the detector's winding order.
pub fn marker_to_render(marker: &Marker, size: &RenderSize) -> [Corner; 4] {
    marker.corners.map(|c| frame_to_render(c, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_centre_maps_to_origin() {
        let size = RenderSize::from_width(640, 4.0 / 3.0);
        let c = frame_to_render(Corner::new(320.0, 240.0), &size);
        assert_relative_eq!(c.x, 0.0);
        assert_relative_eq!(c.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_axes_flip() {
        let size = RenderSize::from_width(640, 4.0 / 3.0);

        let top_left = frame_to_render(Corner::new(0.0, 0.0), &size);
        assert_relative_eq!(top_left.x, -320.0);
        assert_relative_eq!(top_left.y, 240.0, epsilon = 1e-12);

        let bottom_right = frame_to_render(Corner::new(640.0, 480.0), &size);
        assert_relative_eq!(bottom_right.x, 320.0);
        assert_relative_eq!(bottom_right.y, -240.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fractional_height() {
        // 100 / 3 leaves a fractional render height.
        let size = RenderSize::from_width(100, 3.0);
        let c = frame_to_render(Corner::new(50.0, 0.0), &size);
        assert_relative_eq!(c.x, 0.0);
        assert_relative_eq!(c.y, 100.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_marker_keeps_winding() {
        let size = RenderSize::from_width(200, 2.0);
        let marker = Marker {
            id: 1,
            corners: [
                Corner::new(90.0, 40.0),
                Corner::new(110.0, 40.0),
                Corner::new(110.0, 60.0),
                Corner::new(90.0, 60.0),
            ],
        };
        let render = marker_to_render(&marker, &size);
        assert_eq!(render[0], Corner::new(-10.0, 10.0));
        assert_eq!(render[1], Corner::new(10.0, 10.0));
        assert_eq!(render[2], Corner::new(10.0, -10.0));
        assert_eq!(render[3], Corner::new(-10.0, -10.0));
    }
}
