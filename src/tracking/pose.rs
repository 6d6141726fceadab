//! Pose assembly: solver output to the renderer's convention.
//!
//! The solver's camera looks down +z; the renderer's camera looks down -z. The
//! position keeps x and y and negates z. Rotation is also exposed as XYZ Euler
//! angles for consumers that want separable angles:
//!
//! ```text
//! x = -asin(-r[1][2])
//! y = -atan2(r[0][2], r[2][2])
//! z =  atan2(r[1][0], r[1][1])
//! ```
//!
//! Known limitation: the decomposition is not guarded against gimbal lock.
//! With `r[1][2]` near ±1 the `y` and `z` angles become numerically unstable;
//! the values are reported as computed.

use nalgebra::{Matrix3, Matrix4, Rotation3, Vector3};

use crate::detection::Corner;
use crate::geometry::Solution;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerAngles {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Immutable pose snapshot handed to sinks.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    /// Solver rotation, row-major, camera looking down +z.
    pub rotation: Matrix3<f64>,
    /// Solver translation of the marker centre (millimetres).
    pub translation: Vector3<f64>,
    /// Renderer position: `(tx, ty, -tz)`.
    pub position: Vector3<f64>,
    pub euler: EulerAngles,
    /// Solver fit error in degrees.
    pub error: f64,
    pub marker_id: i32,
    /// Detection request this pose was derived from.
    pub seq: u64,
    /// Frame-space corners, present when debug outlines are enabled.
    pub outline: Option<[Corner; 4]>,
}

impl Pose {
    pub fn assemble(
        solution: &Solution,
        marker_id: i32,
        seq: u64,
        outline: Option<[Corner; 4]>,
    ) -> Self {
        let t = solution.translation;
        Self {
            rotation: solution.rotation,
            translation: t,
            position: Vector3::new(t.x, t.y, -t.z),
            euler: euler_from_rotation(&solution.rotation),
            error: solution.error,
            marker_id,
            seq,
            outline,
        }
    }

    /// Rotation in the renderer's frame, composed from the Euler angles in XYZ order.
    pub fn renderer_rotation(&self) -> Rotation3<f64> {
        Rotation3::from_axis_angle(&Vector3::x_axis(), self.euler.x)
            * Rotation3::from_axis_angle(&Vector3::y_axis(), self.euler.y)
            * Rotation3::from_axis_angle(&Vector3::z_axis(), self.euler.z)
    }

    /// Homogeneous object-to-camera transform in the renderer's frame.
    pub fn model_matrix(&self) -> Matrix4<f64> {
        let mut m = self.renderer_rotation().to_homogeneous();
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.position);
        m
    }
}

pub fn euler_from_rotation(r: &Matrix3<f64>) -> EulerAngles {
    EulerAngles {
        x: -(-r[(1, 2)]).asin(),
        y: -r[(0, 2)].atan2(r[(2, 2)]),
        z: r[(1, 0)].atan2(r[(1, 1)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn solution(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Solution {
        Solution {
            rotation,
            translation,
            error: 0.5,
        }
    }

    #[test]
    fn test_position_negates_z() {
        let pose = Pose::assemble(
            &solution(Matrix3::identity(), Vector3::new(1.0, -2.0, 300.0)),
            4,
            9,
            None,
        );
        assert_eq!(pose.position, Vector3::new(1.0, -2.0, -300.0));
        assert_eq!(pose.translation, Vector3::new(1.0, -2.0, 300.0));
        assert_eq!(pose.marker_id, 4);
        assert_eq!(pose.seq, 9);
        assert_eq!(pose.error, 0.5);
    }

    #[test]
    fn test_identity_has_zero_angles() {
        let e = euler_from_rotation(&Matrix3::identity());
        assert_relative_eq!(e.x, 0.0);
        assert_relative_eq!(e.y, 0.0);
        assert_relative_eq!(e.z, 0.0);
    }

    #[test]
    fn test_single_axis_rotations() {
        let a = 0.4;

        // About solver x: flips sign in the renderer frame.
        let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), a).into_inner();
        let e = euler_from_rotation(&rx);
        assert_relative_eq!(e.x, -a, epsilon = 1e-12);
        assert_relative_eq!(e.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(e.z, 0.0, epsilon = 1e-12);

        let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), a).into_inner();
        let e = euler_from_rotation(&ry);
        assert_relative_eq!(e.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(e.y, -a, epsilon = 1e-12);
        assert_relative_eq!(e.z, 0.0, epsilon = 1e-12);

        let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), a).into_inner();
        let e = euler_from_rotation(&rz);
        assert_relative_eq!(e.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(e.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(e.z, a, epsilon = 1e-12);
    }

    #[test]
    fn test_model_matrix_layout() {
        let pose = Pose::assemble(
            &solution(Matrix3::identity(), Vector3::new(5.0, 6.0, 7.0)),
            0,
            0,
            None,
        );
        let m = pose.model_matrix();
        assert_relative_eq!(m.fixed_view::<3, 3>(0, 0).into_owned(), Matrix3::identity());
        assert_eq!(m[(0, 3)], 5.0);
        assert_eq!(m[(1, 3)], 6.0);
        assert_eq!(m[(2, 3)], -7.0);
        assert_eq!(m[(3, 3)], 1.0);
    }

    #[test]
    fn test_gimbal_lock_reports_values() {
        // r[1][2] = -1: rotation of -90° about x. Still finite, just unstable.
        let r = Rotation3::from_axis_angle(&Vector3::x_axis(), -std::f64::consts::FRAC_PI_2)
            .into_inner();
        let e = euler_from_rotation(&r);
        assert!(e.x.is_finite() && e.y.is_finite() && e.z.is_finite());
        assert_relative_eq!(e.x.abs(), std::f64::consts::FRAC_PI_2, epsilon = 1e-6);
    }
}
