// SPDX-License-Identifier: CEPL-1.0
//! CPU mirrors of the shader interface blocks. Layouts follow std140 for the
//! uniform blocks and the push-constant block rules for `PushConstants`.
use bytemuck::{Pod, Zeroable};
use cubelet_math::{normal_matrix, Mat4, Vec3};

use crate::Material;

pub const MAX_LIGHTS: usize = 3;

/// Set 0, binding 0. Read by both shader stages.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SceneUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub world: [[f32; 4]; 4],
    pub world_inverse_transpose: [[f32; 4]; 4],
    pub viewer_position: [f32; 4],
}

impl SceneUniforms {
    pub fn new(view_proj: Mat4, world: Mat4, viewer: Vec3) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            world: world.to_cols_array_2d(),
            world_inverse_transpose: normal_matrix(world).to_cols_array_2d(),
            viewer_position: viewer.extend(1.0).to_array(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LightSource {
    /// Omni light, or a spot light when `cutoff` is non-zero.
    Point { position: Vec3, direction: Vec3 },
    Directional { direction: Vec3 },
}

/// Set 0, binding 1. Fragment stage only.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LightUniforms {
    pub positions: [[f32; 4]; MAX_LIGHTS],
    pub directions: [[f32; 4]; MAX_LIGHTS],
    pub colors: [[f32; 4]; MAX_LIGHTS],
    pub is_on: [u32; 4],
    pub is_directional: [u32; 4],
    pub shininess: f32,
    /// Cosine of the spot cone half-angle; 0 disables the cone.
    pub cutoff: f32,
    pub _pad: [f32; 2],
    pub ambient: [f32; 4],
    pub specular_color: [f32; 4],
}

impl LightUniforms {
    pub fn new(ambient: Vec3, specular_color: Vec3, shininess: f32) -> Self {
        Self {
            ambient: ambient.extend(1.0).to_array(),
            specular_color: specular_color.extend(1.0).to_array(),
            shininess,
            ..Zeroable::zeroed()
        }
    }

    /// Turns on light `slot`. Slots at or past `MAX_LIGHTS` are ignored.
    pub fn with_light(mut self, slot: usize, source: LightSource, color: Vec3) -> Self {
        if slot >= MAX_LIGHTS {
            return self;
        }
        let (position, direction, directional) = match source {
            LightSource::Point {
                position,
                direction,
            } => (position, direction, 0),
            LightSource::Directional { direction } => (Vec3::ZERO, direction, 1),
        };
        self.positions[slot] = position.extend(1.0).to_array();
        self.directions[slot] = direction.normalize_or_zero().extend(0.0).to_array();
        self.colors[slot] = color.extend(1.0).to_array();
        self.is_on[slot] = 1;
        self.is_directional[slot] = directional;
        self
    }

    pub fn with_cutoff(mut self, cos_half_angle: f32) -> Self {
        self.cutoff = cos_half_angle;
        self
    }
}

/// Per-draw data pushed to both stages.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PushConstants {
    pub model: [[f32; 4]; 4],
    pub use_texture: u32,
    pub _pad: [u32; 3],
    pub color: [f32; 4],
}

impl PushConstants {
    pub fn new(model: Mat4, material: &Material) -> Self {
        let (use_texture, color) = match material {
            Material::Untextured { color } => (0, *color),
            Material::Textured { .. } => (1, [1.0; 4]),
        };
        Self {
            model: model.to_cols_array_2d(),
            use_texture,
            _pad: [0; 3],
            color,
        }
    }
}

const _: () = assert!(std::mem::size_of::<SceneUniforms>() == 208);
const _: () = assert!(std::mem::size_of::<LightUniforms>() == 224);
const _: () = assert!(std::mem::size_of::<PushConstants>() == 96);

#[cfg(test)]
mod tests {
    use std::mem::offset_of;

    use super::*;
    use crate::TextureId;

    #[test]
    fn test_light_block_matches_std140_offsets() {
        assert_eq!(offset_of!(LightUniforms, directions), 48);
        assert_eq!(offset_of!(LightUniforms, colors), 96);
        assert_eq!(offset_of!(LightUniforms, is_on), 144);
        assert_eq!(offset_of!(LightUniforms, is_directional), 160);
        assert_eq!(offset_of!(LightUniforms, shininess), 176);
        assert_eq!(offset_of!(LightUniforms, cutoff), 180);
        assert_eq!(offset_of!(LightUniforms, ambient), 192);
        assert_eq!(offset_of!(LightUniforms, specular_color), 208);
    }

    #[test]
    fn test_push_constant_color_is_vec4_aligned() {
        assert_eq!(offset_of!(PushConstants, use_texture), 64);
        assert_eq!(offset_of!(PushConstants, color), 80);
    }

    #[test]
    fn test_push_constants_follow_material() {
        let flat = PushConstants::new(
            Mat4::IDENTITY,
            &Material::Untextured {
                color: [0.2, 0.4, 0.6, 1.0],
            },
        );
        assert_eq!(flat.use_texture, 0);
        assert_eq!(flat.color, [0.2, 0.4, 0.6, 1.0]);

        let tex = PushConstants::new(
            Mat4::IDENTITY,
            &Material::Textured {
                texture: TextureId(0),
            },
        );
        assert_eq!(tex.use_texture, 1);
        assert_eq!(tex.color, [1.0; 4]);
    }

    #[test]
    fn test_with_light_sets_only_its_slot() {
        let light = LightUniforms::new(Vec3::splat(0.1), Vec3::ONE, 32.0).with_light(
            1,
            LightSource::Directional {
                direction: Vec3::new(0.0, -2.0, 0.0),
            },
            Vec3::ONE,
        );
        assert_eq!(light.is_on, [0, 1, 0, 0]);
        assert_eq!(light.is_directional, [0, 1, 0, 0]);
        assert_eq!(light.directions[1], [0.0, -1.0, 0.0, 0.0]);
        assert_eq!(light.shininess, 32.0);
    }

    #[test]
    fn test_with_light_ignores_out_of_range_slot() {
        let base = LightUniforms::new(Vec3::ZERO, Vec3::ZERO, 1.0);
        let light = base.with_light(
            MAX_LIGHTS,
            LightSource::Directional {
                direction: Vec3::Y,
            },
            Vec3::ONE,
        );
        assert_eq!(light.is_on, [0; 4]);
    }

    #[test]
    fn test_scene_uniforms_carry_normal_matrix() {
        let world = Mat4::from_scale(Vec3::new(2.0, 2.0, 2.0));
        let scene = SceneUniforms::new(Mat4::IDENTITY, world, Vec3::new(0.0, 0.0, 3.0));
        assert!((scene.world_inverse_transpose[0][0] - 0.5).abs() < 1e-6);
        assert_eq!(scene.viewer_position, [0.0, 0.0, 3.0, 1.0]);
    }
}
