// SPDX-License-Identifier: CEPL-1.0
//! Frames in flight: per-slot synchronization objects and the per-frame
//! protocol that uses them.
//!
//! Each slot owns an image-available semaphore, a render-finished semaphore,
//! an in-flight fence and a command buffer. The fence is the only thing the
//! CPU waits on while rendering; semaphores order acquire, render and
//! present on the GPU side.

use ash::vk;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{sync, vulkan, VkResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub command_buffer: vk::CommandBuffer,
}

pub struct FrameSyncManager {
    device: ash::Device,
    pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
}

impl FrameSyncManager {
    /// `frames` slots. Fences start signaled so the first wait on each slot
    /// returns immediately; command buffers come from the device's resettable
    /// pool and are reused for the life of the manager.
    pub fn new(device: &DeviceContext, frames: u32) -> VkResult<Self> {
        if frames == 0 {
            return Err(cubelet_render::ConfigError::NoFramesInFlight.into());
        }
        let d = device.raw();
        let command_buffers = device.command_pool().allocate(frames)?;
        let mut out = Self {
            device: d.clone(),
            pool: device.command_pool().handle(),
            slots: command_buffers
                .into_iter()
                .map(|command_buffer| FrameSlot {
                    command_buffer,
                    ..Default::default()
                })
                .collect(),
        };

        let sem_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        // Filled in place so Drop releases whatever exists if a call fails.
        for slot in &mut out.slots {
            slot.image_available = unsafe { d.create_semaphore(&sem_info, None) }
                .map_err(sync("vkCreateSemaphore"))?;
            slot.render_finished = unsafe { d.create_semaphore(&sem_info, None) }
                .map_err(sync("vkCreateSemaphore"))?;
            slot.in_flight =
                unsafe { d.create_fence(&fence_info, None) }.map_err(sync("vkCreateFence"))?;
        }
        debug!("{frames} frame slots created");
        Ok(out)
    }

    pub fn get(&self, slot: usize) -> &FrameSlot {
        &self.slots[slot]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether the slot's fence is currently signaled. Does not block.
    pub fn is_signaled(&self, slot: usize) -> VkResult<bool> {
        unsafe { self.device.get_fence_status(self.slots[slot].in_flight) }
            .map_err(vulkan("vkGetFenceStatus"))
    }

    pub fn wait(&self, slot: usize) -> VkResult<()> {
        let fence = self.slots[slot].in_flight;
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(vulkan("vkWaitForFences"))
    }

    pub fn reset(&self, slot: usize) -> VkResult<()> {
        let fence = self.slots[slot].in_flight;
        unsafe { self.device.reset_fences(&[fence]) }.map_err(vulkan("vkResetFences"))
    }
}

impl Drop for FrameSyncManager {
    fn drop(&mut self) {
        unsafe {
            for slot in &self.slots {
                self.device.destroy_fence(slot.in_flight, None);
                self.device.destroy_semaphore(slot.render_finished, None);
                self.device.destroy_semaphore(slot.image_available, None);
            }
            let buffers: Vec<_> = self.slots.iter().map(|s| s.command_buffer).collect();
            if !buffers.is_empty() {
                self.device.free_command_buffers(self.pool, &buffers);
            }
        }
    }
}

/// Cyclic frame-slot index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCursor {
    current: usize,
    frames_in_flight: usize,
}

impl FrameCursor {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            current: 0,
            frames_in_flight: frames_in_flight.max(1),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames_in_flight;
    }
}

/// The GPU-facing steps of one frame, addressed by slot index.
pub trait FrameSubmitter {
    /// Blocks until the slot's previous submission has retired.
    fn wait_for_slot(&mut self, slot: usize) -> VkResult<()>;
    fn reset_slot(&mut self, slot: usize) -> VkResult<()>;
    /// Acquires a presentable image, signaling the slot's image-available
    /// semaphore. The returned image index is unrelated to `slot`.
    fn acquire_image(&mut self, slot: usize) -> VkResult<u32>;
    /// Resets and re-records the slot's command buffer for `image_index`.
    fn record(&mut self, slot: usize, image_index: u32) -> VkResult<()>;
    /// Waits on image-available at color output; signals render-finished
    /// and the slot's fence.
    fn submit(&mut self, slot: usize) -> VkResult<()>;
    /// Presents `image_index` once render-finished is signaled.
    fn present(&mut self, slot: usize, image_index: u32) -> VkResult<()>;
}

/// Runs one frame and advances the cursor. Any error, including a stale
/// surface, leaves the cursor where it was.
pub fn draw_frame<S>(gpu: &mut S, cursor: &mut FrameCursor) -> VkResult<u32>
where
    S: FrameSubmitter + ?Sized,
{
    let slot = cursor.current();
    gpu.wait_for_slot(slot)?;
    gpu.reset_slot(slot)?;
    let image_index = gpu.acquire_image(slot)?;
    gpu.record(slot, image_index)?;
    gpu.submit(slot)?;
    gpu.present(slot, image_index)?;
    cursor.advance();
    Ok(image_index)
}

pub(crate) fn submit_slot(device: &ash::Device, queue: vk::Queue, slot: &FrameSlot) -> VkResult<()> {
    let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
    let submit = vk::SubmitInfo {
        s_type: vk::StructureType::SUBMIT_INFO,
        wait_semaphore_count: 1,
        p_wait_semaphores: &slot.image_available,
        p_wait_dst_stage_mask: wait_stages.as_ptr(),
        command_buffer_count: 1,
        p_command_buffers: &slot.command_buffer,
        signal_semaphore_count: 1,
        p_signal_semaphores: &slot.render_finished,
        ..Default::default()
    };
    unsafe { device.queue_submit(queue, std::slice::from_ref(&submit), slot.in_flight) }
        .map_err(vulkan("vkQueueSubmit"))
}
