// SPDX-License-Identifier: CEPL-1.0
//! Command pools and the scoped one-shot command buffer used for setup-time
//! GPU work.

use ash::vk;
use tracing::{debug, error};

use crate::error::{vulkan, VkResult};

pub struct CommandPool {
    device: ash::Device,
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    pub fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<Self> {
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags,
            ..Default::default()
        };
        let pool = unsafe { device.create_command_pool(&info, None) }
            .map_err(vulkan("vkCreateCommandPool"))?;
        debug!("command pool created (family {queue_family}, {flags:?})");
        Ok(Self {
            device: device.clone(),
            pool,
            queue_family,
        })
    }

    /// Primary buffers owned by the pool. They are released with the pool.
    pub fn allocate(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&info) }
            .map_err(vulkan("vkAllocateCommandBuffers"))
    }

    /// Returns every buffer of the pool to the initial state.
    pub fn reset(&self) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(vulkan("vkResetCommandPool"))
    }

    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(self.pool, buffers) };
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub(crate) fn device(&self) -> &ash::Device {
        &self.device
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

/// Release only submits work that was recorded to completion and not
/// already handed over through `finish`.
fn should_submit(finished: bool, ended: bool, abandoned: bool, unwinding: bool) -> bool {
    !finished && ended && !abandoned && !unwinding
}

fn submit_and_wait(device: &ash::Device, queue: vk::Queue, cmd: vk::CommandBuffer) -> VkResult<()> {
    let submit = vk::SubmitInfo {
        s_type: vk::StructureType::SUBMIT_INFO,
        command_buffer_count: 1,
        p_command_buffers: &cmd,
        ..Default::default()
    };
    unsafe { device.queue_submit(queue, std::slice::from_ref(&submit), vk::Fence::null()) }
        .map_err(vulkan("vkQueueSubmit"))?;
    unsafe { device.queue_wait_idle(queue) }.map_err(vulkan("vkQueueWaitIdle"))
}

/// One primary buffer from a transient pool, recording with ONE_TIME_SUBMIT.
///
/// `finish` ends recording, submits to `queue` and blocks until the queue is
/// idle, returning any failure. A guard dropped without `finish` does the
/// same on release and logs failures instead; submission is skipped when the
/// guard was abandoned or the thread is panicking. The buffer is freed
/// either way.
pub(crate) struct ScopedCommandBuffer<'a> {
    pool: &'a CommandPool,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    abandoned: bool,
    finished: bool,
}

impl<'a> ScopedCommandBuffer<'a> {
    pub fn begin(pool: &'a CommandPool, queue: vk::Queue) -> VkResult<Self> {
        let cmd = pool.allocate(1)?[0];
        let info = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        if let Err(e) = unsafe { pool.device().begin_command_buffer(cmd, &info) } {
            pool.free(&[cmd]);
            return Err(vulkan("vkBeginCommandBuffer")(e));
        }
        Ok(Self {
            pool,
            queue,
            cmd,
            abandoned: false,
            finished: false,
        })
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// Skip submission on release.
    pub fn abandon(&mut self) {
        self.abandoned = true;
    }

    /// End, submit and wait now. Release then only frees the buffer.
    pub fn finish(mut self) -> VkResult<()> {
        self.finished = true;
        let device = self.pool.device();
        unsafe { device.end_command_buffer(self.cmd) }.map_err(vulkan("vkEndCommandBuffer"))?;
        submit_and_wait(device, self.queue, self.cmd)
    }
}

impl Drop for ScopedCommandBuffer<'_> {
    fn drop(&mut self) {
        let device = self.pool.device();
        let ended = !self.finished
            && match unsafe { device.end_command_buffer(self.cmd) } {
                Ok(()) => true,
                Err(e) => {
                    error!("one-shot command buffer: vkEndCommandBuffer failed: {e}");
                    false
                }
            };
        if should_submit(self.finished, ended, self.abandoned, std::thread::panicking()) {
            if let Err(e) = submit_and_wait(device, self.queue, self.cmd) {
                error!("one-shot command buffer: {e}");
            }
        }

        self.pool.free(std::slice::from_ref(&self.cmd));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_only_after_clean_recording() {
        assert!(should_submit(false, true, false, false));
        assert!(!should_submit(false, false, false, false));
        assert!(!should_submit(false, true, true, false));
        assert!(!should_submit(false, true, false, true));
    }

    #[test]
    fn test_finished_buffer_is_never_resubmitted() {
        for ended in [true, false] {
            assert!(!should_submit(true, ended, false, false));
        }
    }
}
