// SPDX-License-Identifier: CEPL-1.0
//! Backend error taxonomy.

use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VkError {
    /// A requested instance layer is not installed.
    #[error("validation layer {0} requested but not available")]
    MissingValidationLayer(String),

    /// No physical device offers graphics + present queues, the required
    /// extensions, and at least one surface format and present mode.
    #[error("no suitable physical device")]
    NoSuitableDevice,

    #[error("vkCreateDevice failed: {0}")]
    DeviceCreation(vk::Result),

    /// Buffer, image or memory allocation failed.
    #[error("{op} failed: {result}")]
    ResourceAllocation { op: &'static str, result: vk::Result },

    #[error("no memory type matches filter {type_bits:#b} with {flags:?}")]
    UnsupportedMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("write of {len} bytes at offset {offset} overflows {size}-byte buffer")]
    BufferOverflow {
        offset: u64,
        len: u64,
        size: u64,
    },

    #[error("{0} has zero size")]
    EmptyResource(&'static str),

    #[error("swapchain: {op} failed: {result}")]
    SwapchainCreation { op: &'static str, result: vk::Result },

    #[error("pipeline: {op} failed: {result}")]
    PipelineCreation { op: &'static str, result: vk::Result },

    #[error("sync objects: {op} failed: {result}")]
    SyncObjectCreation { op: &'static str, result: vk::Result },

    #[error("unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// The surface no longer matches the swapchain. Live recreation is not
    /// supported, so this ends the frame loop.
    #[error("{op}: surface is out of date or suboptimal")]
    SurfaceStale { op: &'static str },

    #[error("reading shader {path}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] cubelet_render::ConfigError),

    /// Any other driver call.
    #[error("{op} failed: {result}")]
    Vulkan { op: &'static str, result: vk::Result },
}

pub type VkResult<T> = std::result::Result<T, VkError>;

impl VkError {
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            VkError::ResourceAllocation {
                result: vk::Result::ERROR_OUT_OF_HOST_MEMORY
                    | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                ..
            }
        )
    }
}

pub(crate) fn vulkan(op: &'static str) -> impl FnOnce(vk::Result) -> VkError {
    move |result| VkError::Vulkan { op, result }
}

pub(crate) fn alloc(op: &'static str) -> impl FnOnce(vk::Result) -> VkError {
    move |result| VkError::ResourceAllocation { op, result }
}

pub(crate) fn swapchain(op: &'static str) -> impl FnOnce(vk::Result) -> VkError {
    move |result| VkError::SwapchainCreation { op, result }
}

pub(crate) fn pipeline(op: &'static str) -> impl FnOnce(vk::Result) -> VkError {
    move |result| VkError::PipelineCreation { op, result }
}

pub(crate) fn sync(op: &'static str) -> impl FnOnce(vk::Result) -> VkError {
    move |result| VkError::SyncObjectCreation { op, result }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_is_flagged() {
        let oom = alloc("vkAllocateMemory")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(oom.is_out_of_memory());
        let other = alloc("vkCreateBuffer")(vk::Result::ERROR_INITIALIZATION_FAILED);
        assert!(!other.is_out_of_memory());
    }

    #[test]
    fn test_messages_name_the_operation() {
        let e = vulkan("vkQueueSubmit")(vk::Result::ERROR_DEVICE_LOST);
        assert!(e.to_string().starts_with("vkQueueSubmit failed"));
        let stale = VkError::SurfaceStale {
            op: "vkAcquireNextImageKHR",
        };
        assert!(stale.to_string().contains("vkAcquireNextImageKHR"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VkError>();
    }
}
