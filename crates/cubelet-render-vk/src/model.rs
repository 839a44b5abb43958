// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use cubelet_math::Mat4;
use cubelet_render::{Material, MeshData, PushConstants};

use crate::device::{BufferUsage, DeviceContext, GpuBuffer};
use crate::error::{VkError, VkResult};

/// Immutable geometry in device-local memory plus the per-draw state that
/// may change between frames.
pub struct GpuModel {
    vertices: GpuBuffer,
    indices: GpuBuffer,
    index_count: u32,
    pub transform: Mat4,
    pub material: Material,
}

impl GpuModel {
    pub fn new(device: &DeviceContext, mesh: &MeshData, material: Material) -> VkResult<Self> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(VkError::EmptyResource("mesh"));
        }
        let vertices = device
            .create_buffer_with_data(BufferUsage::Vertex, bytemuck::cast_slice(&mesh.vertices))?;
        let indices = device
            .create_buffer_with_data(BufferUsage::Index, bytemuck::cast_slice(&mesh.indices))?;
        Ok(Self {
            vertices,
            indices,
            index_count: mesh.index_count(),
            transform: Mat4::IDENTITY,
            material,
        })
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn push_constants(&self) -> PushConstants {
        PushConstants::new(self.transform, &self.material)
    }

    /// Binds geometry and issues the indexed draw.
    pub fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertices.handle()], &[0]);
            device.cmd_bind_index_buffer(cmd, self.indices.handle(), 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
        }
    }
}
