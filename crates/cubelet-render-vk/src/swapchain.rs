// SPDX-License-Identifier: CEPL-1.0
//! Swapchain, its image views, the render pass and one framebuffer per
//! image. Created once; a stale surface is reported, never rebuilt.

use ash::khr::swapchain;
use ash::vk;
use cubelet_render::RenderSize;
use tracing::info;

use crate::device::DeviceContext;
use crate::error::{self, vulkan, VkError, VkResult};
use crate::instance::InstanceContext;
use crate::selection::QueueFamilies;

pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// The preferred sRGB pairing if offered, else the first entry.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// `current_extent`, unless the surface leaves it to the swapchain (the
/// `u32::MAX` sentinel); then the framebuffer size within the allowed bounds.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: framebuffer
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum; a zero maximum means unbounded.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

/// Concurrent sharing across both families when they differ.
pub fn choose_sharing(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

pub struct SwapchainManager {
    device: ash::Device,
    loader: swapchain::Device,
    swapchain: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

impl SwapchainManager {
    pub fn new(
        instance: &InstanceContext,
        device: &DeviceContext,
        framebuffer: RenderSize,
    ) -> VkResult<Self> {
        let surface = instance.surface().ok_or(VkError::SwapchainCreation {
            op: "surface lookup",
            result: vk::Result::ERROR_SURFACE_LOST_KHR,
        })?;
        let phys = device.physical();
        let caps = surface.capabilities(phys)?;
        let format = choose_surface_format(&surface.formats(phys)?).ok_or(
            VkError::SwapchainCreation {
                op: "surface format selection",
                result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            },
        )?;
        let present_mode = choose_present_mode(&surface.present_modes(phys)?);
        let extent = choose_extent(&caps, framebuffer);
        let (sharing_mode, family_indices) = choose_sharing(device.families());

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.surface,
            min_image_count: choose_image_count(&caps),
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_indices.len() as u32,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };

        let d = device.raw();
        let loader = swapchain::Device::new(instance.instance(), d);
        let handle = unsafe { loader.create_swapchain(&info, None) }
            .map_err(error::swapchain("vkCreateSwapchainKHR"))?;

        // From here on Drop releases whatever has been created.
        let mut out = Self {
            device: d.clone(),
            loader,
            swapchain: handle,
            format,
            present_mode,
            extent,
            images: Vec::new(),
            views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
        };
        out.images = unsafe { out.loader.get_swapchain_images(handle) }
            .map_err(error::swapchain("vkGetSwapchainImagesKHR"))?;
        for &image in &out.images {
            out.views.push(device.create_image_view(image, format.format)?);
        }
        out.render_pass = create_render_pass(d, format.format)?;
        for &view in &out.views {
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: out.render_pass,
                attachment_count: 1,
                p_attachments: &view,
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = unsafe { d.create_framebuffer(&fb_info, None) }
                .map_err(error::swapchain("vkCreateFramebuffer"))?;
            out.framebuffers.push(fb);
        }

        info!(
            "swapchain {}x{} {:?}/{:?} {:?}, {} images, {:?}",
            extent.width,
            extent.height,
            format.format,
            format.color_space,
            present_mode,
            out.images.len(),
            sharing_mode
        );
        Ok(out)
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Begin parameters for rendering into swapchain image `image_index`.
    pub fn render_pass_begin<'a>(
        &self,
        image_index: u32,
        clear: &'a [vk::ClearValue],
    ) -> vk::RenderPassBeginInfo<'a> {
        vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.render_pass,
            framebuffer: self.framebuffers[image_index as usize],
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            },
            clear_value_count: clear.len() as u32,
            p_clear_values: clear.as_ptr(),
            ..Default::default()
        }
    }

    /// Index of the next presentable image; `signal` fires once it is usable.
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> VkResult<u32> {
        const OP: &str = "vkAcquireNextImageKHR";
        let acquired = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, signal, vk::Fence::null())
        };
        match acquired {
            Ok((index, false)) => Ok(index),
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                Err(VkError::SurfaceStale { op: OP })
            }
            Err(e) => Err(vulkan(OP)(e)),
        }
    }

    pub fn present(&self, queue: vk::Queue, wait: vk::Semaphore, image_index: u32) -> VkResult<()> {
        const OP: &str = "vkQueuePresentKHR";
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.loader.queue_present(queue, &info) } {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                Err(VkError::SurfaceStale { op: OP })
            }
            Err(e) => Err(vulkan(OP)(e)),
        }
    }
}

fn create_render_pass(device: &ash::Device, format: vk::Format) -> VkResult<vk::RenderPass> {
    let color = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        ..Default::default()
    };
    // Holds color output until the acquired image is released by the
    // presentation engine.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { device.create_render_pass(&info, None) }
        .map_err(error::swapchain("vkCreateRenderPass"))
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        unsafe {
            for &fb in &self.framebuffers {
                self.device.destroy_framebuffer(fb, None);
            }
            self.device.destroy_render_pass(self.render_pass, None);
            for &view in &self.views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    fn fb(width: u32, height: u32) -> RenderSize {
        RenderSize { width, height }
    }

    #[test]
    fn test_undefined_extent_uses_framebuffer() {
        let c = caps((u32::MAX, u32::MAX), (1, 1), (4096, 4096));
        let e = choose_extent(&c, fb(1024, 768));
        assert_eq!((e.width, e.height), (1024, 768));
    }

    #[test]
    fn test_undefined_extent_is_clamped() {
        let c = caps((u32::MAX, u32::MAX), (64, 64), (1920, 1080));
        let e = choose_extent(&c, fb(4000, 10));
        assert_eq!((e.width, e.height), (1920, 64));
    }

    #[test]
    fn test_defined_extent_ignores_framebuffer() {
        let c = caps((800, 600), (1, 1), (4096, 4096));
        let e = choose_extent(&c, fb(1024, 768));
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn test_preferred_format_found_anywhere() {
        let other = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let list = [other, other, PREFERRED_FORMAT];
        assert_eq!(choose_surface_format(&list), Some(PREFERRED_FORMAT));
    }

    #[test]
    fn test_format_falls_back_to_first() {
        let first = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let wrong_space = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        };
        assert_eq!(choose_surface_format(&[first, wrong_space]), Some(first));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn test_present_mode_prefers_mailbox() {
        use vk::PresentModeKHR as M;
        assert_eq!(choose_present_mode(&[M::FIFO, M::MAILBOX]), M::MAILBOX);
        assert_eq!(choose_present_mode(&[M::IMMEDIATE, M::FIFO]), M::FIFO);
        assert_eq!(choose_present_mode(&[]), M::FIFO);
    }

    #[test]
    fn test_image_count_clamped_to_nonzero_max() {
        let mut c = caps((800, 600), (1, 1), (800, 600));
        c.min_image_count = 1;
        c.max_image_count = 3;
        assert_eq!(choose_image_count(&c), 2);
        c.min_image_count = 3;
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 0;
        assert_eq!(choose_image_count(&c), 4);
    }

    #[test]
    fn test_sharing_follows_family_split() {
        let split = QueueFamilies {
            graphics: 0,
            present: 1,
        };
        assert_eq!(
            choose_sharing(split),
            (vk::SharingMode::CONCURRENT, vec![0, 1])
        );
        let shared = QueueFamilies {
            graphics: 2,
            present: 2,
        };
        assert_eq!(choose_sharing(shared), (vk::SharingMode::EXCLUSIVE, vec![]));
    }
}
