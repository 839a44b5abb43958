// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic rendering surface: the `Renderer` trait, the data the
//! scene hands to a backend, and engine configuration.
use anyhow::Result;
use cubelet_math::Mat4;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod config;
mod mesh;
mod uniforms;

pub use config::{ConfigError, EngineConfig};
pub use mesh::{MeshData, Vertex};
pub use uniforms::{LightSource, LightUniforms, PushConstants, SceneUniforms, MAX_LIGHTS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

/// What a backend needs from the windowing layer: raw handles for surface
/// creation and the framebuffer size in pixels.
pub trait SurfaceProvider: HasWindowHandle + HasDisplayHandle {
    fn framebuffer_size(&self) -> RenderSize;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// How a model is shaded. A textured model always carries its texture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Material {
    Untextured { color: [f32; 4] },
    Textured { texture: TextureId },
}

impl Material {
    pub fn texture(&self) -> Option<TextureId> {
        match self {
            Material::Untextured { .. } => None,
            Material::Textured { texture } => Some(*texture),
        }
    }
}

pub trait Renderer {
    fn new(surface: &dyn SurfaceProvider, config: &EngineConfig) -> Result<Self>
    where
        Self: Sized;

    /// Creates an RGBA8 sampled texture usable by `Material::Textured`.
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId>;
    fn create_model(&mut self, mesh: &MeshData, material: Material) -> Result<ModelId>;
    fn set_model_transform(&mut self, id: ModelId, transform: Mat4) -> Result<()>;
    fn set_model_color(&mut self, id: ModelId, rgba: [f32; 4]) -> Result<()>;
    fn update_scene(&mut self, scene: &SceneUniforms, light: &LightUniforms) -> Result<()>;
    fn render(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
