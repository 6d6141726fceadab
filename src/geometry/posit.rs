//! Coplanar POSIT: pose of a square marker from its four projected corners.
//!
//! The model is a square of side `marker_size` centred at the origin in the
//! z = 0 plane:
//!
//! ```text
//! 0 (-s/2,  s/2)    1 ( s/2,  s/2)
//! 3 (-s/2, -s/2)    2 ( s/2, -s/2)
//! ```
//!
//! Image points are in render space (origin at the image centre, y up) and the
//! camera looks down +z with focal length `focal_length`, so a camera-space point
//! `(X, Y, Z)` projects to `(f X / Z, f Y / Z)`.
//!
//! A planar target has two poses that project almost identically. Both branches
//! are refined by re-weighting the scaled-orthographic image points with the
//! current depth estimate, and returned best first.

use nalgebra::{Matrix3, Vector3};
use tracing::debug;

use crate::detection::Corner;
use crate::error::SolveError;

const MAX_ITERATIONS: usize = 100;

/// Mean corner-angle error (degrees) at which refinement stops.
const CONVERGED_ERROR_DEG: f64 = 2.0;

const PSEUDO_INVERSE_EPS: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverParams {
    /// Physical side length of the marker, in millimetres.
    pub marker_size: f64,
    /// Focal scale in render pixels.
    pub focal_length: f64,
}

/// One candidate pose. `translation` locates the marker centre in camera space.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    /// Mean absolute difference, in degrees, between the corner angles of the
    /// detected quad and of the model reprojected with this pose.
    pub error: f64,
}

impl Solution {
    fn is_finite(&self) -> bool {
        self.error.is_finite()
            && self.rotation.iter().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    pub best: Solution,
    pub alternative: Solution,
}

/// Pose from four render-space corners, in model corner order.
pub trait PoseSolver: Send {
    fn pose(&self, corners: &[Corner; 4]) -> Result<PoseEstimate, SolveError>;
}

/// Builds a solver for the given geometry. Called at setup and on every resize.
pub type SolverFactory =
    Box<dyn Fn(SolverParams) -> Result<Box<dyn PoseSolver>, SolveError> + Send>;

pub fn posit_factory() -> SolverFactory {
    Box::new(
        |params: SolverParams| -> Result<Box<dyn PoseSolver>, SolveError> {
            Ok(Box::new(PositSolver::new(params)?))
        },
    )
}

pub struct PositSolver {
    params: SolverParams,
    model: [Vector3<f64>; 4],
    /// `model[i] - model[0]` for i = 1..=3.
    model_vectors: [Vector3<f64>; 3],
    /// Pseudo-inverse of the matrix whose rows are `model_vectors`.
    model_inverse: Matrix3<f64>,
    /// Unit normal of the model plane.
    normal: Vector3<f64>,
}

impl PositSolver {
    pub fn new(params: SolverParams) -> Result<Self, SolveError> {
        if !(params.marker_size.is_finite() && params.marker_size > 0.0) {
            return Err(SolveError::InvalidModel(format!(
                "marker size must be positive, got {}",
                params.marker_size
            )));
        }
        if !(params.focal_length.is_finite() && params.focal_length > 0.0) {
            return Err(SolveError::InvalidModel(format!(
                "focal length must be positive, got {}",
                params.focal_length
            )));
        }

        let half = params.marker_size / 2.0;
        let model = [
            Vector3::new(-half, half, 0.0),
            Vector3::new(half, half, 0.0),
            Vector3::new(half, -half, 0.0),
            Vector3::new(-half, -half, 0.0),
        ];
        let model_vectors = [model[1] - model[0], model[2] - model[0], model[3] - model[0]];

        let vectors = Matrix3::from_rows(&[
            model_vectors[0].transpose(),
            model_vectors[1].transpose(),
            model_vectors[2].transpose(),
        ]);
        let model_inverse = vectors
            .pseudo_inverse(PSEUDO_INVERSE_EPS)
            .map_err(|e| SolveError::InvalidModel(e.to_string()))?;
        let normal = model_vectors[0].cross(&model_vectors[2]).normalize();

        Ok(Self {
            params,
            model,
            model_vectors,
            model_inverse,
            normal,
        })
    }

    pub fn params(&self) -> SolverParams {
        self.params
    }

    /// One scaled-orthographic step. `eps[i - 1]` is the perspective correction
    /// for corner `i`; all ones on the first step.
    fn pos(&self, corners: &[Corner; 4], eps: &[f64; 3]) -> [Solution; 2] {
        let p0 = corners[0];
        let xs = Vector3::new(
            corners[1].x * eps[0] - p0.x,
            corners[2].x * eps[1] - p0.x,
            corners[3].x * eps[2] - p0.x,
        );
        let ys = Vector3::new(
            corners[1].y * eps[0] - p0.y,
            corners[2].y * eps[1] - p0.y,
            corners[3].y * eps[2] - p0.y,
        );

        let i0 = self.model_inverse * xs;
        let j0 = self.model_inverse * ys;

        // I = I0 + λn, J = J0 + μn with I·J = 0 and |I| = |J|:
        // (λ + iμ)² = (|J0|² - |I0|²) - 2i (I0·J0)
        let s = j0.norm_squared() - i0.norm_squared();
        let ij = i0.dot(&j0);
        let r = (s * s + 4.0 * ij * ij).sqrt().sqrt();
        let theta = (-2.0 * ij).atan2(s) / 2.0;
        let lambda = r * theta.cos();
        let mu = r * theta.sin();

        [
            self.solution(corners, i0 + self.normal * lambda, j0 + self.normal * mu),
            self.solution(corners, i0 - self.normal * lambda, j0 - self.normal * mu),
        ]
    }

    fn solution(&self, corners: &[Corner; 4], big_i: Vector3<f64>, big_j: Vector3<f64>) -> Solution {
        let norm_i = big_i.norm();
        let norm_j = big_j.norm();
        let scale = (norm_i + norm_j) / 2.0;

        let i = big_i / norm_i;
        let j = big_j / norm_j;
        let k = i.cross(&j);
        let rotation = Matrix3::from_rows(&[i.transpose(), j.transpose(), k.transpose()]);

        // Corner 0 sits at (x0 / scale, y0 / scale, f / scale) in camera space.
        let depth = self.params.focal_length / scale;
        let offset = rotation * self.model[0];
        let translation = Vector3::new(
            corners[0].x / scale - offset.x,
            corners[0].y / scale - offset.y,
            depth - offset.z,
        );

        let error = self.angle_error(corners, &rotation, &translation);
        Solution {
            rotation,
            translation,
            error,
        }
    }

    /// Perspective corrections for the next step, or `None` if the reference
    /// corner is not in front of the camera.
    fn epsilons(&self, solution: &Solution) -> Option<[f64; 3]> {
        let reference_depth = (solution.rotation * self.model[0] + solution.translation).z;
        if !(reference_depth.is_finite() && reference_depth > 0.0) {
            return None;
        }
        Some(
            self.model_vectors
                .map(|v| 1.0 + (solution.rotation * v).z / reference_depth),
        )
    }

    fn refine(&self, corners: &[Corner; 4], mut current: Solution) -> Solution {
        for _ in 0..MAX_ITERATIONS {
            if current.error <= CONVERGED_ERROR_DEG {
                break;
            }
            let Some(eps) = self.epsilons(&current) else {
                break;
            };
            let [a, b] = self.pos(corners, &eps);
            let next = if a.error <= b.error { a } else { b };
            // Keep the previous solution once the error stops improving.
            if !(next.error < current.error) {
                break;
            }
            current = next;
        }
        current
    }

    fn angle_error(
        &self,
        corners: &[Corner; 4],
        rotation: &Matrix3<f64>,
        translation: &Vector3<f64>,
    ) -> f64 {
        let f = self.params.focal_length;
        let mut projected = [Corner::new(0.0, 0.0); 4];
        for (p, m) in projected.iter_mut().zip(&self.model) {
            let c = rotation * m + translation;
            if !(c.z > 0.0) {
                return f64::INFINITY;
            }
            *p = Corner::new(f * c.x / c.z, f * c.y / c.z);
        }

        let mut total = 0.0;
        for a in 0..4 {
            let (b, c) = ((a + 1) % 4, (a + 3) % 4);
            let detected = corner_angle(corners[a], corners[b], corners[c]);
            let model = corner_angle(projected[a], projected[b], projected[c]);
            total += (detected - model).abs();
        }

        let error = total / 4.0;
        if error.is_nan() { f64::INFINITY } else { error }
    }
}

impl PoseSolver for PositSolver {
    fn pose(&self, corners: &[Corner; 4]) -> Result<PoseEstimate, SolveError> {
        let [first, second] = self.pos(corners, &[1.0; 3]);
        let first = self.refine(corners, first);
        let second = self.refine(corners, second);

        let (best, alternative) = if first.error <= second.error {
            (first, second)
        } else {
            (second, first)
        };

        if !best.is_finite() {
            debug!(?corners, "POSIT produced no finite solution");
            return Err(SolveError::Degenerate);
        }

        Ok(PoseEstimate { best, alternative })
    }
}

/// Interior angle at `a` between the edges to `b` and `c`, in degrees.
fn corner_angle(a: Corner, b: Corner, c: Corner) -> f64 {
    let (ux, uy) = (b.x - a.x, b.y - a.y);
    let (vx, vy) = (c.x - a.x, c.y - a.y);
    let cos = (ux * vx + uy * vy) / ((ux * ux + uy * uy).sqrt() * (vx * vx + vy * vy).sqrt());
    cos.clamp(-1.0, 1.0).acos().to_degrees()
}
