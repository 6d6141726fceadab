//! Rerun-based visualization of published marker poses.
//!
//! Entity hierarchy:
//!     world/
//!         marker           - Marker transform (renderer frame, camera at origin)
//!         trajectory       - Recent marker positions (gray line)
//!     frame/
//!         outline          - Detected corner outline in frame space (debug only)
//!         outline/first    - First corner, highlighted
//!     plots/
//!         position_x/y/z   - Temporal plots of the renderer position
//!         solver_error     - Mean corner-angle error of the pose fit

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use nalgebra::UnitQuaternion;
use rerun::{RecordingStream, external::glam};

use crate::system::publisher::PoseSink;
use crate::tracking::pose::Pose;

/// Positions kept in the trajectory strip.
const TRAJECTORY_LEN: usize = 300;

pub struct RerunPoseSink {
    rec: RecordingStream,
    start: Option<Instant>,
    trajectory: Vec<[f32; 3]>,
}

impl RerunPoseSink {
    /// Spawn a viewer process and stream to it.
    pub fn spawn(app_name: &str) -> Result<Self> {
        let rec = rerun::RecordingStreamBuilder::new(app_name)
            .spawn()
            .context("Failed to spawn rerun viewer")?;
        Ok(Self::new(rec))
    }

    pub fn new(rec: RecordingStream) -> Self {
        // Renderer convention: X right, Y up, camera looking down -Z.
        rec.log_static("world", &rerun::ViewCoordinates::RUB()).ok();

        Self {
            rec,
            start: None,
            trajectory: Vec::new(),
        }
    }

    fn set_time(&mut self) {
        let start = *self.start.get_or_insert_with(Instant::now);
        self.rec
            .set_duration_secs("time", start.elapsed().as_secs_f64());
    }

    fn log_marker(&mut self, pose: &Pose) {
        let p = pose.position;
        let translation = glam::Vec3::new(p.x as f32, p.y as f32, p.z as f32);
        let q = UnitQuaternion::from_rotation_matrix(&pose.renderer_rotation());
        let rotation = glam::Quat::from_xyzw(q.i as f32, q.j as f32, q.k as f32, q.w as f32);

        self.rec
            .log(
                "world/marker",
                &rerun::Transform3D::from_translation_rotation(translation, rotation),
            )
            .ok();

        self.trajectory.push([p.x as f32, p.y as f32, p.z as f32]);
        if self.trajectory.len() > TRAJECTORY_LEN {
            self.trajectory.remove(0);
        }
        if self.trajectory.len() >= 2 {
            self.rec
                .log(
                    "world/trajectory",
                    &rerun::LineStrips3D::new([self.trajectory.clone()])
                        .with_colors([[128u8, 128, 128]])
                        .with_radii([0.5f32]),
                )
                .ok();
        }
    }

    fn log_outline(&self, pose: &Pose) {
        let Some(corners) = pose.outline else {
            return;
        };

        let mut strip: Vec<[f32; 2]> = corners.iter().map(|c| [c.x as f32, c.y as f32]).collect();
        strip.push(strip[0]);
        self.rec
            .log(
                "frame/outline",
                &rerun::LineStrips2D::new([strip])
                    .with_colors([[0u8, 255, 0]])
                    .with_radii([1.0f32]),
            )
            .ok();

        let first = corners[0];
        self.rec
            .log(
                "frame/outline/first",
                &rerun::Points2D::new([[first.x as f32, first.y as f32]])
                    .with_colors([[255u8, 0, 0]])
                    .with_radii([3.0f32]),
            )
            .ok();
    }

    fn log_plots(&self, pose: &Pose) {
        let p = pose.position;
        for (path, value) in [
            ("plots/position_x", p.x),
            ("plots/position_y", p.y),
            ("plots/position_z", p.z),
            ("plots/solver_error", pose.error),
        ] {
            self.rec.log(path, &rerun::Scalars::new([value])).ok();
        }
    }
}

impl PoseSink for RerunPoseSink {
    fn on_pose(&mut self, pose: &Arc<Pose>) {
        self.set_time();
        self.log_marker(pose);
        self.log_outline(pose);
        self.log_plots(pose);
    }
}
