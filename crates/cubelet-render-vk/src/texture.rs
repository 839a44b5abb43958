// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::device::{DeviceContext, GpuImage};
use crate::error::{vulkan, VkResult};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Sampled RGBA8 image, already in SHADER_READ_ONLY_OPTIMAL, with its view
/// and a nearest/repeat sampler.
///
/// Texel contents are left as allocated: only UNDEFINED to
/// SHADER_READ_ONLY_OPTIMAL transitions exist, so there is no upload path.
// TODO: stage texel data once UNDEFINED -> TRANSFER_DST_OPTIMAL ->
// SHADER_READ_ONLY_OPTIMAL transitions are supported.
pub struct Texture {
    device: ash::Device,
    sampler: vk::Sampler,
    view: vk::ImageView,
    image: GpuImage,
}

impl Texture {
    pub fn new(device: &DeviceContext, width: u32, height: u32) -> VkResult<Self> {
        let image = device.allocate_image(
            width,
            height,
            TEXTURE_FORMAT,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        )?;
        let mut out = Self {
            device: device.raw().clone(),
            sampler: vk::Sampler::null(),
            view: vk::ImageView::null(),
            image,
        };
        out.view = device.create_image_view(out.image.handle(), TEXTURE_FORMAT)?;
        out.sampler = create_sampler(device.raw())?;
        debug!("texture {width}x{height} ready");
        Ok(out)
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn image(&self) -> &GpuImage {
        &self.image
    }
}

fn create_sampler(device: &ash::Device) -> VkResult<vk::Sampler> {
    let info = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::NEAREST,
        min_filter: vk::Filter::NEAREST,
        mipmap_mode: vk::SamplerMipmapMode::NEAREST,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable: vk::FALSE,
        max_anisotropy: 1.0,
        compare_enable: vk::FALSE,
        compare_op: vk::CompareOp::ALWAYS,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        unnormalized_coordinates: vk::FALSE,
        ..Default::default()
    };
    unsafe { device.create_sampler(&info, None) }.map_err(vulkan("vkCreateSampler"))
}

// Sampler and view go before the image they refer to.
impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_image_view(self.view, None);
        }
    }
}
