// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use ash::vk;
use cubelet_math::Mat4;
use cubelet_render::{
    EngineConfig, LightUniforms, Material, MeshData, ModelId, Renderer, SceneUniforms,
    SurfaceProvider, TextureId,
};
use tracing::{debug, error, info, warn};

pub mod command;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod model;
pub mod pipeline;
pub mod selection;
pub mod shader;
pub mod swapchain;
pub mod texture;

pub use error::{VkError, VkResult};

use device::DeviceContext;
use error::vulkan;
use frame::{draw_frame, submit_slot, FrameCursor, FrameSubmitter, FrameSyncManager};
use instance::InstanceContext;
use model::GpuModel;
use pipeline::GraphicsPipeline;
use shader::ShaderSet;
use swapchain::SwapchainManager;
use texture::Texture;

// Fields drop top to bottom: everything allocated from the device comes
// before it, and the instance (with its surface) goes last. Drop itself
// only waits for the device to go idle.
pub struct VkRenderer {
    models: BTreeMap<ModelId, GpuModel>,
    textures: BTreeMap<TextureId, Texture>,
    placeholder: Texture,
    sync: FrameSyncManager,
    pipeline: GraphicsPipeline,
    swapchain: SwapchainManager,
    device: DeviceContext,
    instance: InstanceContext,

    cursor: FrameCursor,
    clear: vk::ClearValue,
    texture_slot: TextureSlot,
    next_model: u32,
    next_texture: u32,
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("vk: wait idle before teardown failed: {e}");
        }
        let reported = self.instance.validation_errors();
        if reported > 0 {
            warn!("vk: validation reported {reported} errors during the run");
        }
        info!("vk: renderer torn down");
    }
}

impl Renderer for VkRenderer {
    fn new(surface: &dyn SurfaceProvider, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let instance = InstanceContext::new(config, surface).context("creating Vulkan instance")?;
        let device = DeviceContext::new(&instance).context("creating Vulkan device")?;
        let swapchain = SwapchainManager::new(&instance, &device, surface.framebuffer_size())
            .context("creating swapchain")?;
        let shaders =
            ShaderSet::load(config.shader_dir.as_deref()).context("loading shaders")?;
        let pipeline =
            GraphicsPipeline::new(&device, &swapchain, &shaders).context("creating pipeline")?;
        let sync = FrameSyncManager::new(&device, config.max_frames_in_flight)
            .context("creating frame sync objects")?;

        // The fragment shader always declares the sampler, so the slot must
        // hold something before the first draw.
        let placeholder = Texture::new(&device, 1, 1).context("creating placeholder texture")?;
        pipeline.update_texture_descriptor_set(placeholder.view(), placeholder.sampler());

        info!(
            "vk: ready on {} ({} frames in flight, {} swapchain images, {:?} {:?})",
            device.name(),
            sync.len(),
            swapchain.image_count(),
            swapchain.format().format,
            swapchain.present_mode()
        );

        Ok(Self {
            models: BTreeMap::new(),
            textures: BTreeMap::new(),
            placeholder,
            sync,
            pipeline,
            swapchain,
            device,
            instance,
            cursor: FrameCursor::new(config.max_frames_in_flight as usize),
            clear: clear_value(config.clear_color),
            texture_slot: TextureSlot::default(),
            next_model: 0,
            next_texture: 0,
        })
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId> {
        let texture = Texture::new(&self.device, width, height)
            .with_context(|| format!("creating {width}x{height} texture"))?;
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn create_model(&mut self, mesh: &MeshData, material: Material) -> Result<ModelId> {
        if let Some(texture) = material.texture() {
            if !self.textures.contains_key(&texture) {
                bail!("model references unknown texture {texture:?}");
            }
        }
        let model = match GpuModel::new(&self.device, mesh, material) {
            Ok(model) => model,
            Err(e) => {
                if e.is_out_of_memory() {
                    error!(
                        "vk: out of memory uploading {} vertices / {} indices",
                        mesh.vertices.len(),
                        mesh.indices.len()
                    );
                }
                return Err(e).context("uploading model");
            }
        };
        let id = ModelId(self.next_model);
        self.next_model += 1;
        debug!("model {id:?}: {} indices", model.index_count());
        self.models.insert(id, model);
        Ok(id)
    }

    fn set_model_transform(&mut self, id: ModelId, transform: Mat4) -> Result<()> {
        let model = self
            .models
            .get_mut(&id)
            .ok_or_else(|| anyhow!("unknown model {id:?}"))?;
        model.transform = transform;
        Ok(())
    }

    fn set_model_color(&mut self, id: ModelId, rgba: [f32; 4]) -> Result<()> {
        let model = self
            .models
            .get_mut(&id)
            .ok_or_else(|| anyhow!("unknown model {id:?}"))?;
        match &mut model.material {
            Material::Untextured { color } => {
                *color = rgba;
                Ok(())
            }
            Material::Textured { .. } => bail!("model {id:?} is textured and has no flat color"),
        }
    }

    fn update_scene(&mut self, scene: &SceneUniforms, light: &LightUniforms) -> Result<()> {
        self.pipeline.write_scene(scene)?;
        self.pipeline.write_light(light)?;
        Ok(())
    }

    // Per frame:
    // 1) wait + reset the slot fence
    // 2) acquire (signals the slot's image-available)
    // 3) re-record the slot's command buffer for the acquired image
    // 4) submit (waits image-available, signals render-finished + fence)
    // 5) present (waits render-finished)
    // 6) next slot
    fn render(&mut self) -> Result<()> {
        let mut frame = VkFrame {
            device: &self.device,
            swapchain: &self.swapchain,
            pipeline: &self.pipeline,
            sync: &self.sync,
            models: &self.models,
            textures: &self.textures,
            placeholder: &self.placeholder,
            texture_slot: &mut self.texture_slot,
            clear: self.clear,
        };
        draw_frame(&mut frame, &mut self.cursor).context("drawing frame")?;
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = clear_value(rgba);
    }
}

fn clear_value(rgba: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: rgba },
    }
}

/// Textures used by textured draws, in draw order, without repeats.
fn distinct_textures(materials: impl IntoIterator<Item = Material>) -> Vec<TextureId> {
    let mut seen = Vec::new();
    for tex in materials.into_iter().filter_map(|m| m.texture()) {
        if !seen.contains(&tex) {
            seen.push(tex);
        }
    }
    seen
}

/// Bookkeeping for the single texture descriptor slot.
///
/// The slot is shared by every textured draw. It is rewritten only when a
/// draw needs a texture other than the one last written. A frame that
/// needs more than one texture depends on recording order and may race
/// with an earlier frame still reading the set; that is reported once and
/// otherwise left alone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct TextureSlot {
    // None is the placeholder written at startup
    bound: Option<TextureId>,
    warned: bool,
}

impl TextureSlot {
    /// Whether the slot must be rewritten before drawing with `texture`.
    fn select(&mut self, texture: TextureId) -> bool {
        if self.bound == Some(texture) {
            return false;
        }
        self.bound = Some(texture);
        true
    }

    /// True the first time a frame needs `used_count` > 1 textures.
    fn needs_warning(&mut self, used_count: usize) -> bool {
        if used_count > 1 && !self.warned {
            self.warned = true;
            return true;
        }
        false
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DrawStep {
    WriteTexture(TextureId),
    Draw(ModelId),
}

/// Recording order for one frame: every textured draw is preceded by the
/// slot write it needs, if any.
fn plan_draws(
    slot: &mut TextureSlot,
    models: impl IntoIterator<Item = (ModelId, Material)>,
) -> Vec<DrawStep> {
    let mut steps = Vec::new();
    for (id, material) in models {
        if let Some(texture) = material.texture() {
            if slot.select(texture) {
                steps.push(DrawStep::WriteTexture(texture));
            }
        }
        steps.push(DrawStep::Draw(id));
    }
    steps
}

/// Borrowed view of the renderer for one pass of the frame protocol.
struct VkFrame<'a> {
    device: &'a DeviceContext,
    swapchain: &'a SwapchainManager,
    pipeline: &'a GraphicsPipeline,
    sync: &'a FrameSyncManager,
    models: &'a BTreeMap<ModelId, GpuModel>,
    textures: &'a BTreeMap<TextureId, Texture>,
    placeholder: &'a Texture,
    texture_slot: &'a mut TextureSlot,
    clear: vk::ClearValue,
}

impl FrameSubmitter for VkFrame<'_> {
    fn wait_for_slot(&mut self, slot: usize) -> VkResult<()> {
        self.sync.wait(slot)
    }

    fn reset_slot(&mut self, slot: usize) -> VkResult<()> {
        self.sync.reset(slot)
    }

    fn acquire_image(&mut self, slot: usize) -> VkResult<u32> {
        self.swapchain
            .acquire_next_image(self.sync.get(slot).image_available)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> VkResult<()> {
        let used = distinct_textures(self.models.values().map(|m| m.material));
        if self.texture_slot.needs_warning(used.len()) {
            warn!(
                "vk: {} textures share one descriptor slot in a single frame; \
                 draws depend on recording order",
                used.len()
            );
        }

        let (device, swapchain, pipeline) = (self.device, self.swapchain, self.pipeline);
        let d = device.raw();
        let cmd = self.sync.get(slot).command_buffer;
        unsafe { d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty()) }
            .map_err(vulkan("vkResetCommandBuffer"))?;
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        unsafe { d.begin_command_buffer(cmd, &begin) }.map_err(vulkan("vkBeginCommandBuffer"))?;

        let clear = [self.clear];
        let pass = swapchain.render_pass_begin(image_index, &clear);
        let extent = swapchain.extent();
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            d.cmd_begin_render_pass(cmd, &pass, vk::SubpassContents::INLINE);
            d.cmd_set_viewport(cmd, 0, &[viewport]);
            d.cmd_set_scissor(cmd, 0, &[scissor]);
        }
        pipeline.bind(cmd);
        pipeline.bind_descriptors(cmd);

        let steps = plan_draws(
            self.texture_slot,
            self.models.iter().map(|(&id, m)| (id, m.material)),
        );
        for step in steps {
            match step {
                DrawStep::WriteTexture(id) => {
                    let texture = self.textures.get(&id).unwrap_or(self.placeholder);
                    pipeline.update_texture_descriptor_set(texture.view(), texture.sampler());
                }
                DrawStep::Draw(id) => {
                    if let Some(model) = self.models.get(&id) {
                        pipeline.push_constants(cmd, &model.push_constants());
                        model.draw(d, cmd);
                    }
                }
            }
        }

        unsafe {
            d.cmd_end_render_pass(cmd);
            d.end_command_buffer(cmd)
        }
        .map_err(vulkan("vkEndCommandBuffer"))
    }

    fn submit(&mut self, slot: usize) -> VkResult<()> {
        submit_slot(
            self.device.raw(),
            self.device.graphics_queue(),
            self.sync.get(slot),
        )
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VkResult<()> {
        self.swapchain.present(
            self.device.present_queue(),
            self.sync.get(slot).render_finished,
            image_index,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLAT: Material = Material::Untextured {
        color: [1.0, 1.0, 1.0, 1.0],
    };

    fn textured(id: u32) -> Material {
        Material::Textured {
            texture: TextureId(id),
        }
    }

    fn scene(materials: &[Material]) -> Vec<(ModelId, Material)> {
        materials
            .iter()
            .enumerate()
            .map(|(i, &m)| (ModelId(i as u32), m))
            .collect()
    }

    #[test]
    fn test_clear_value_carries_rgba() {
        let v = clear_value([0.1, 0.2, 0.3, 1.0]);
        assert_eq!(unsafe { v.color.float32 }, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn test_distinct_textures_keep_draw_order() {
        let used = distinct_textures([FLAT, textured(2), textured(0), FLAT, textured(2)]);
        assert_eq!(used, vec![TextureId(2), TextureId(0)]);
        assert!(distinct_textures([FLAT, FLAT]).is_empty());
    }

    #[test]
    fn test_single_texture_is_written_once_across_frames() {
        let mut slot = TextureSlot::default();
        let models = scene(&[FLAT, textured(0), textured(0)]);
        let first = plan_draws(&mut slot, models.clone());
        assert_eq!(
            first,
            vec![
                DrawStep::Draw(ModelId(0)),
                DrawStep::WriteTexture(TextureId(0)),
                DrawStep::Draw(ModelId(1)),
                DrawStep::Draw(ModelId(2)),
            ]
        );
        let second = plan_draws(&mut slot, models);
        assert!(second
            .iter()
            .all(|s| !matches!(s, DrawStep::WriteTexture(_))));
    }

    #[test]
    fn test_each_texture_change_writes_before_its_draw() {
        let mut slot = TextureSlot::default();
        let models = scene(&[textured(0), textured(1)]);
        for _ in 0..3 {
            let steps = plan_draws(&mut slot, models.clone());
            assert_eq!(
                steps,
                vec![
                    DrawStep::WriteTexture(TextureId(0)),
                    DrawStep::Draw(ModelId(0)),
                    DrawStep::WriteTexture(TextureId(1)),
                    DrawStep::Draw(ModelId(1)),
                ]
            );
        }
        assert_eq!(slot.bound, Some(TextureId(1)));
    }

    #[test]
    fn test_shared_slot_warning_fires_once() {
        let mut slot = TextureSlot::default();
        assert!(!slot.needs_warning(1));
        assert!(slot.needs_warning(2));
        assert!(!slot.needs_warning(3));
    }
}
