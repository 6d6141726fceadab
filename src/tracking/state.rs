//! Session geometry and current pose.

use std::sync::Arc;

use crate::capture::SourceGeometry;
use crate::error::SetupError;
use crate::geometry::SolverParams;
use crate::tracking::pose::Pose;

/// Render-space dimensions. `height` is kept fractional so that
/// `height == width / aspect_ratio` holds exactly; the capture buffer uses the
/// rounded pixel height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSize {
    pub width: u32,
    pub height: f64,
}

impl RenderSize {
    pub fn from_width(width: u32, aspect_ratio: f64) -> Self {
        Self {
            width,
            height: width as f64 / aspect_ratio,
        }
    }

    pub fn pixel_width(&self) -> u32 {
        self.width
    }

    pub fn pixel_height(&self) -> u32 {
        (self.height.round() as u32).max(1)
    }
}

/// State owned by the tracking loop.
///
/// The aspect ratio is fixed at setup; the render size only changes through
/// `resize`, never mid-cycle.
#[derive(Debug, Clone)]
pub struct TrackingState {
    size: RenderSize,
    aspect_ratio: f64,
    marker_size: f64,
    current_pose: Option<Arc<Pose>>,
}

impl TrackingState {
    /// Derive the session geometry from the source and the desired render width.
    pub fn new(
        source: SourceGeometry,
        render_width: u32,
        marker_size: f64,
    ) -> Result<Self, SetupError> {
        let aspect_ratio = source.ratio();
        if !(aspect_ratio.is_finite() && aspect_ratio > 0.0) {
            return Err(SetupError::InvalidAspectRatio(aspect_ratio));
        }

        let mut state = Self {
            size: RenderSize::from_width(1, aspect_ratio),
            aspect_ratio,
            marker_size,
            current_pose: None,
        };
        state.size = state.size_for_width(render_width)?;
        Ok(state)
    }

    /// The render size a resize to `width` would produce.
    pub fn size_for_width(&self, width: u32) -> Result<RenderSize, SetupError> {
        if width == 0 {
            return Err(SetupError::InvalidRenderWidth(width));
        }
        Ok(RenderSize::from_width(width, self.aspect_ratio))
    }

    /// Apply a new render width; the height follows from the fixed aspect ratio.
    pub fn resize(&mut self, width: u32) -> Result<RenderSize, SetupError> {
        self.size = self.size_for_width(width)?;
        Ok(self.size)
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.aspect_ratio
    }

    pub fn marker_size(&self) -> f64 {
        self.marker_size
    }

    /// Solver parameters for the current geometry: the render width is the focal scale.
    pub fn solver_params(&self) -> SolverParams {
        self.solver_params_for(self.size)
    }

    pub fn solver_params_for(&self, size: RenderSize) -> SolverParams {
        SolverParams {
            marker_size: self.marker_size,
            focal_length: size.width as f64,
        }
    }

    pub fn current_pose(&self) -> Option<&Arc<Pose>> {
        self.current_pose.as_ref()
    }

    pub fn set_current_pose(&mut self, pose: Arc<Pose>) {
        self.current_pose = Some(pose);
    }
}
