// SPDX-License-Identifier: CEPL-1.0
//! The single graphics pipeline, its descriptor sets and the scene/light
//! uniform buffers behind set 0.
//!
//! Set 0 is written once and never retargeted; only the mapped buffer
//! contents change. Set 1 holds the one texture slot and is rewritten by the
//! renderer whenever a draw needs a different texture.

use std::mem::{offset_of, size_of};

use ash::vk;
use bytemuck::Zeroable;
use cubelet_render::{LightUniforms, PushConstants, SceneUniforms, Vertex};
use tracing::info;

use crate::device::{BufferUsage, DeviceContext, GpuBuffer};
use crate::error::{pipeline, VkError, VkResult};
use crate::shader::{ShaderModule, ShaderSet};
use crate::swapchain::SwapchainManager;

pub const STATIC_SET: u32 = 0;
pub const DYNAMIC_SET: u32 = 1;
pub const MAX_DESCRIPTOR_SETS: u32 = 2;

pub const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

/// Exactly what the two sets need: scene + light buffers and one sampler.
pub fn descriptor_pool_sizes() -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 2,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
        },
    ]
}

pub fn static_set_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: PUSH_CONSTANT_STAGES,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        },
    ]
}

pub fn dynamic_set_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 1] {
    [vk::DescriptorSetLayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::FRAGMENT,
        ..Default::default()
    }]
}

pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, position) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, normal) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(Vertex, tex_coord) as u32,
        },
    ]
}

pub fn push_constant_range() -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: PUSH_CONSTANT_STAGES,
        offset: 0,
        size: size_of::<PushConstants>() as u32,
    }
}

/// Pool, layouts and the two sets. The pool goes first, taking its sets.
struct DescriptorResources {
    device: ash::Device,
    pool: vk::DescriptorPool,
    static_layout: vk::DescriptorSetLayout,
    dynamic_layout: vk::DescriptorSetLayout,
    static_set: vk::DescriptorSet,
    dynamic_set: vk::DescriptorSet,
}

impl DescriptorResources {
    fn new(device: &ash::Device) -> VkResult<Self> {
        let mut out = Self {
            device: device.clone(),
            pool: vk::DescriptorPool::null(),
            static_layout: vk::DescriptorSetLayout::null(),
            dynamic_layout: vk::DescriptorSetLayout::null(),
            static_set: vk::DescriptorSet::null(),
            dynamic_set: vk::DescriptorSet::null(),
        };
        out.static_layout = create_set_layout(device, &static_set_bindings())?;
        out.dynamic_layout = create_set_layout(device, &dynamic_set_bindings())?;

        let sizes = descriptor_pool_sizes();
        let pool_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: MAX_DESCRIPTOR_SETS,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        out.pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(pipeline("vkCreateDescriptorPool"))?;

        let layouts = [out.static_layout, out.dynamic_layout];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: out.pool,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets = unsafe { device.allocate_descriptor_sets(&alloc) }
            .map_err(pipeline("vkAllocateDescriptorSets"))?;
        out.static_set = sets[0];
        out.dynamic_set = sets[1];
        Ok(out)
    }
}

impl Drop for DescriptorResources {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device
                .destroy_descriptor_set_layout(self.dynamic_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.static_layout, None);
        }
    }
}

fn create_set_layout(
    device: &ash::Device,
    bindings: &[vk::DescriptorSetLayoutBinding<'_>],
) -> VkResult<vk::DescriptorSetLayout> {
    let info = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    unsafe { device.create_descriptor_set_layout(&info, None) }
        .map_err(pipeline("vkCreateDescriptorSetLayout"))
}

// Teardown: pipeline and layout in Drop, then the fields in declaration
// order: uniform buffers (unmapped first), then descriptor pool and layouts.
pub struct GraphicsPipeline {
    device: ash::Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    scene_buffer: GpuBuffer,
    light_buffer: GpuBuffer,
    descriptors: DescriptorResources,
}

impl GraphicsPipeline {
    pub fn new(
        device: &DeviceContext,
        swapchain: &SwapchainManager,
        shaders: &ShaderSet,
    ) -> VkResult<Self> {
        let d = device.raw();
        let descriptors = DescriptorResources::new(d)?;

        let mut scene_buffer =
            device.create_buffer(size_of::<SceneUniforms>() as u64, BufferUsage::Uniform)?;
        scene_buffer.map_persistent()?;
        scene_buffer.write(&SceneUniforms::zeroed())?;
        let mut light_buffer =
            device.create_buffer(size_of::<LightUniforms>() as u64, BufferUsage::Uniform)?;
        light_buffer.map_persistent()?;
        light_buffer.write(&LightUniforms::zeroed())?;

        write_static_set(d, descriptors.static_set, &scene_buffer, &light_buffer);

        let set_layouts = [descriptors.static_layout, descriptors.dynamic_layout];
        let push_range = push_constant_range();
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: set_layouts.len() as u32,
            p_set_layouts: set_layouts.as_ptr(),
            push_constant_range_count: 1,
            p_push_constant_ranges: &push_range,
            ..Default::default()
        };
        let layout = unsafe { d.create_pipeline_layout(&layout_info, None) }
            .map_err(pipeline("vkCreatePipelineLayout"))?;

        let pipeline = match create_pipeline(d, layout, swapchain.render_pass(), shaders) {
            Ok(p) => p,
            Err(e) => {
                unsafe { d.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };
        info!("graphics pipeline created");

        Ok(Self {
            device: d.clone(),
            pipeline,
            layout,
            scene_buffer,
            light_buffer,
            descriptors,
        })
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline)
        };
    }

    /// Static set at index 0, dynamic set at index 1.
    pub fn bind_descriptors(&self, cmd: vk::CommandBuffer) {
        let sets = [self.descriptors.static_set, self.descriptors.dynamic_set];
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                STATIC_SET,
                &sets,
                &[],
            )
        };
    }

    /// Points the texture slot at `view`/`sampler`. This is a host-side
    /// write: it affects bind commands recorded after it, never ones already
    /// recorded, and must not happen while a submitted frame still reads the
    /// set.
    pub fn update_texture_descriptor_set(&self, view: vk::ImageView, sampler: vk::Sampler) {
        let image_info = vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: self.descriptors.dynamic_set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: &image_info,
            ..Default::default()
        };
        unsafe {
            self.device
                .update_descriptor_sets(std::slice::from_ref(&write), &[])
        };
    }

    pub fn write_scene(&mut self, scene: &SceneUniforms) -> VkResult<()> {
        self.scene_buffer.write(scene)
    }

    pub fn write_light(&mut self, light: &LightUniforms) -> VkResult<()> {
        self.light_buffer.write(light)
    }

    pub fn push_constants(&self, cmd: vk::CommandBuffer, constants: &PushConstants) {
        unsafe {
            self.device.cmd_push_constants(
                cmd,
                self.layout,
                PUSH_CONSTANT_STAGES,
                0,
                bytemuck::bytes_of(constants),
            )
        };
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

fn write_static_set(
    device: &ash::Device,
    set: vk::DescriptorSet,
    scene: &GpuBuffer,
    light: &GpuBuffer,
) {
    let infos = [
        vk::DescriptorBufferInfo {
            buffer: scene.handle(),
            offset: 0,
            range: scene.size(),
        },
        vk::DescriptorBufferInfo {
            buffer: light.handle(),
            offset: 0,
            range: light.size(),
        },
    ];
    let writes: Vec<vk::WriteDescriptorSet> = infos
        .iter()
        .enumerate()
        .map(|(binding, info)| vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: binding as u32,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            p_buffer_info: info,
            ..Default::default()
        })
        .collect();
    unsafe { device.update_descriptor_sets(&writes, &[]) };
}

fn create_pipeline(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    shaders: &ShaderSet,
) -> VkResult<vk::Pipeline> {
    // Modules are only needed until the pipeline exists.
    let vs = ShaderModule::new(device, &shaders.vertex)?;
    let fs = ShaderModule::new(device, &shaders.fragment)?;
    let entry = c"main";

    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs.handle,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs.handle,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    let binding = vertex_binding();
    let attributes = vertex_attributes();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &binding,
        vertex_attribute_description_count: attributes.len() as u32,
        p_vertex_attribute_descriptions: attributes.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    // Viewport and scissor are set per frame.
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let blend_attachment = alpha_blend_attachment();
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &blend_attachment,
        ..Default::default()
    };

    // No depth attachment: p_depth_stencil_state stays null.
    let info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    let pipelines = unsafe {
        device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&info),
            None,
        )
    }
    .map_err(|(_, result)| VkError::PipelineCreation {
        op: "vkCreateGraphicsPipelines",
        result,
    })?;
    Ok(pipelines[0])
}

/// Source-alpha over one-minus-source-alpha on color; alpha passes through.
pub fn alpha_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::RGBA,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_holds_exactly_two_buffers_and_one_sampler() {
        let sizes = descriptor_pool_sizes();
        let count = |ty| {
            sizes
                .iter()
                .filter(|s| s.ty == ty)
                .map(|s| s.descriptor_count)
                .sum::<u32>()
        };
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), 2);
        assert_eq!(count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), 1);
        assert_eq!(MAX_DESCRIPTOR_SETS, 2);
    }

    #[test]
    fn test_binding_visibility() {
        let [scene, light] = static_set_bindings();
        assert_eq!(
            scene.stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(light.binding, 1);
        assert_eq!(light.stage_flags, vk::ShaderStageFlags::FRAGMENT);

        let [texture] = dynamic_set_bindings();
        assert_eq!(
            texture.descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(texture.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_vertex_input_matches_vertex_struct() {
        assert_eq!(vertex_binding().stride, 32);
        let offsets: Vec<_> = vertex_attributes()
            .iter()
            .map(|a| (a.location, a.offset))
            .collect();
        assert_eq!(offsets, vec![(0, 0), (1, 12), (2, 24)]);
        assert_eq!(vertex_attributes()[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn test_push_range_covers_model_flag_and_color() {
        let range = push_constant_range();
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 96);
        assert!(range.size <= 128);
    }

    #[test]
    fn test_blending_is_standard_alpha() {
        let blend = alpha_blend_attachment();
        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            blend.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
    }
}
