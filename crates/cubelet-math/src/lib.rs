// SPDX-License-Identifier: CEPL-1.0
//! Small math layer over `glam` for a Vulkan-style clip space
//! (Y down, depth 0..1).

pub use glam;
pub use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};

mod camera;

pub use camera::Camera;

/// Width over height, falling back to 1.0 for a degenerate size.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if width == 0 || height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

/// Inverse-transpose of a world matrix, used to carry normals.
pub fn normal_matrix(world: Mat4) -> Mat4 {
    world.inverse().transpose()
}

/// Rotation about Y then X, followed by a translation.
pub fn spin(translation: Vec3, yaw: f32, pitch: f32) -> Mat4 {
    Mat4::from_translation(translation) * Mat4::from_rotation_y(yaw) * Mat4::from_rotation_x(pitch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_ratio_handles_zero_height() {
        assert_eq!(aspect_ratio(800, 600), 800.0 / 600.0);
        assert_eq!(aspect_ratio(800, 0), 1.0);
    }

    #[test]
    fn test_normal_matrix_of_rotation_is_rotation() {
        let rot = Mat4::from_rotation_z(0.7);
        assert!(normal_matrix(rot).abs_diff_eq(rot, 1e-5));
    }

    #[test]
    fn test_normal_matrix_undoes_non_uniform_scale() {
        let world = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let n = normal_matrix(world);
        assert!((n.x_axis.x - 0.5).abs() < 1e-6);
        assert!((n.y_axis.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_spin_keeps_translation() {
        let m = spin(Vec3::new(1.0, 2.0, 3.0), 1.2, 0.4);
        assert!(m.w_axis.truncate().abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-6));
    }
}
