// SPDX-License-Identifier: CEPL-1.0
//! Physical/logical device, queues, command pools and memory-backed
//! resources.
//!
//! `DeviceContext` must outlive everything allocated through it. Resources
//! keep a clone of the `ash::Device` function table, not ownership of the
//! device; owners declare the context after their resources so it drops
//! last.

use std::ffi::CStr;
use std::ptr::NonNull;

use ash::khr::swapchain;
use ash::vk;
use bytemuck::Pod;
use tracing::{debug, info};

use crate::command::{CommandPool, ScopedCommandBuffer};
use crate::error::{alloc, vulkan, VkError, VkResult};
use crate::instance::InstanceContext;
use crate::selection::{
    find_memory_type, select_device, transition_masks, DeviceCandidate, QueueFamilies,
    QueueFamilyInfo, SurfaceSupport,
};

/// What a buffer is for; decides usage flags and memory placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    Staging,
}

impl BufferUsage {
    pub fn flags(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// CPU-written buffers live in host-coherent memory, GPU-read-only ones
    /// in device-local memory.
    pub fn memory_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            BufferUsage::Uniform | BufferUsage::Staging => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
            BufferUsage::Vertex | BufferUsage::Index => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        }
    }

    pub fn is_host_visible(self) -> bool {
        self.memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }
}

/// A buffer and the memory bound to it, released together.
pub struct GpuBuffer {
    device: ash::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    allocation_size: vk::DeviceSize,
    memory_flags: vk::MemoryPropertyFlags,
    mapped: Option<NonNull<u8>>,
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("buffer", &self.buffer)
            .field("memory", &self.memory)
            .field("size", &self.size)
            .field("allocation_size", &self.allocation_size)
            .field("memory_flags", &self.memory_flags)
            .field("mapped", &self.mapped)
            .finish_non_exhaustive()
    }
}

impl GpuBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Requested size in bytes.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Size of the backing allocation; never smaller than `size`.
    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.allocation_size
    }

    /// Property flags of the memory type that backs the buffer.
    pub fn memory_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_flags
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Maps the whole buffer until it is dropped.
    pub fn map_persistent(&mut self) -> VkResult<()> {
        if self.mapped.is_none() {
            self.mapped = Some(self.map()?);
        }
        Ok(())
    }

    fn map(&self) -> VkResult<NonNull<u8>> {
        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
        }
        .map_err(vulkan("vkMapMemory"))?;
        NonNull::new(ptr.cast::<u8>()).ok_or(VkError::Vulkan {
            op: "vkMapMemory",
            result: vk::Result::ERROR_MEMORY_MAP_FAILED,
        })
    }

    /// Copies `bytes` to `offset`. Uses the persistent mapping when there is
    /// one, otherwise maps for the duration of the copy. Host-coherent memory
    /// needs no flush.
    pub fn write_bytes(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> VkResult<()> {
        let len = bytes.len() as vk::DeviceSize;
        if offset.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(VkError::BufferOverflow {
                offset,
                len,
                size: self.size,
            });
        }
        let (base, transient) = match self.mapped {
            Some(p) => (p, false),
            None => (self.map()?, true),
        };
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                base.as_ptr().add(offset as usize),
                bytes.len(),
            );
            if transient {
                self.device.unmap_memory(self.memory);
            }
        }
        Ok(())
    }

    pub fn write<T: Pod>(&mut self, value: &T) -> VkResult<()> {
        self.write_bytes(0, bytemuck::bytes_of(value))
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.take().is_some() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// A 2D image and its memory, released together.
pub struct GpuImage {
    device: ash::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    format: vk::Format,
    extent: vk::Extent2D,
    layout: vk::ImageLayout,
}

impl GpuImage {
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

struct OwnedDevice(ash::Device);

impl Drop for OwnedDevice {
    fn drop(&mut self) {
        unsafe { self.0.destroy_device(None) };
    }
}

pub struct DeviceContext {
    command_pool: CommandPool,
    transient_pool: CommandPool,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    families: QueueFamilies,
    memory: vk::PhysicalDeviceMemoryProperties,
    phys: vk::PhysicalDevice,
    name: String,
    // last: pools above are destroyed through it
    device: OwnedDevice,
}

impl DeviceContext {
    /// Picks the first suitable physical device and creates the logical
    /// device with one queue per distinct family. With a surface the
    /// swapchain extension is required; without one the graphics queue also
    /// serves as the present queue.
    pub fn new(instance: &InstanceContext) -> VkResult<Self> {
        let raw = instance.instance();
        let has_surface = instance.surface().is_some();
        let required: Vec<&str> = if has_surface {
            swapchain::NAME.to_str().into_iter().collect()
        } else {
            Vec::new()
        };

        let phys_devices = unsafe { raw.enumerate_physical_devices() }
            .map_err(vulkan("vkEnumeratePhysicalDevices"))?;
        let candidates = phys_devices
            .into_iter()
            .map(|phys| describe_device(instance, phys))
            .collect::<VkResult<Vec<_>>>()?;
        let (chosen, families) = select_device(&candidates, &required)?;
        let phys = chosen.handle;
        info!(
            "vk device: {} (graphics family {}, present family {})",
            chosen.name, families.graphics, families.present
        );

        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();
        let extensions: Vec<*const std::ffi::c_char> = if has_surface {
            vec![swapchain::NAME.as_ptr()]
        } else {
            Vec::new()
        };
        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };
        let device = unsafe { raw.create_device(phys, &create_info, None) }
            .map_err(VkError::DeviceCreation)?;
        let device = OwnedDevice(device);

        let graphics_queue = unsafe { device.0.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.0.get_device_queue(families.present, 0) };
        let memory = unsafe { raw.get_physical_device_memory_properties(phys) };

        let command_pool = CommandPool::new(
            &device.0,
            families.graphics,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let transient_pool = CommandPool::new(
            &device.0,
            families.graphics,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;

        Ok(Self {
            command_pool,
            transient_pool,
            graphics_queue,
            present_queue,
            families,
            memory,
            phys,
            name: chosen.name.clone(),
            device,
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device.0
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn families(&self) -> QueueFamilies {
        self.families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory
    }

    /// Resettable pool for per-frame command buffers.
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    pub fn transient_pool(&self) -> &CommandPool {
        &self.transient_pool
    }

    fn allocate_memory(
        &self,
        req: vk::MemoryRequirements,
        props: vk::MemoryPropertyFlags,
    ) -> VkResult<(vk::DeviceMemory, vk::MemoryPropertyFlags)> {
        let type_index = find_memory_type(&self.memory, req.memory_type_bits, props)?;
        let info = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: type_index,
            ..Default::default()
        };
        let memory = unsafe { self.raw().allocate_memory(&info, None) }
            .map_err(alloc("vkAllocateMemory"))?;
        Ok((
            memory,
            self.memory.memory_types[type_index as usize].property_flags,
        ))
    }

    /// Creates a buffer backed by the first memory type that satisfies both
    /// the buffer's requirements and `props`. On failure nothing is leaked.
    pub fn allocate_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> VkResult<GpuBuffer> {
        if size == 0 {
            return Err(VkError::EmptyResource("buffer"));
        }
        let d = self.raw();
        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer =
            unsafe { d.create_buffer(&info, None) }.map_err(alloc("vkCreateBuffer"))?;
        // Drop destroys the buffer if anything below fails.
        let mut out = GpuBuffer {
            device: d.clone(),
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
            allocation_size: 0,
            memory_flags: vk::MemoryPropertyFlags::empty(),
            mapped: None,
        };
        let req = unsafe { d.get_buffer_memory_requirements(buffer) };
        let (memory, flags) = self.allocate_memory(req, props)?;
        out.memory = memory;
        out.allocation_size = req.size;
        out.memory_flags = flags;
        unsafe { d.bind_buffer_memory(buffer, memory, 0) }
            .map_err(alloc("vkBindBufferMemory"))?;
        debug!("buffer {size}B {usage:?} in {flags:?}");
        Ok(out)
    }

    pub fn create_buffer(&self, size: vk::DeviceSize, usage: BufferUsage) -> VkResult<GpuBuffer> {
        self.allocate_buffer(size, usage.flags(), usage.memory_properties())
    }

    /// Buffer initialised with `bytes`. Device-local buffers are filled
    /// through a staging buffer and a blocking one-shot copy.
    pub fn create_buffer_with_data(&self, usage: BufferUsage, bytes: &[u8]) -> VkResult<GpuBuffer> {
        let size = bytes.len() as vk::DeviceSize;
        if usage.is_host_visible() {
            let mut buffer = self.create_buffer(size, usage)?;
            buffer.write_bytes(0, bytes)?;
            return Ok(buffer);
        }

        let mut staging = self.create_buffer(size, BufferUsage::Staging)?;
        staging.write_bytes(0, bytes)?;
        let dst = self.create_buffer(size, usage)?;
        self.one_shot(|d, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe {
                d.cmd_copy_buffer(
                    cmd,
                    staging.handle(),
                    dst.handle(),
                    std::slice::from_ref(&region),
                )
            };
            Ok(())
        })?;
        Ok(dst)
    }

    /// 2D single-mip image. When `final_layout` is given the image is
    /// transitioned to it before returning, blocking until the GPU is done.
    #[allow(clippy::too_many_arguments)]
    pub fn allocate_image(
        &self,
        width: u32,
        height: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        props: vk::MemoryPropertyFlags,
        final_layout: Option<vk::ImageLayout>,
    ) -> VkResult<GpuImage> {
        if width == 0 || height == 0 {
            return Err(VkError::EmptyResource("image"));
        }
        let d = self.raw();
        let extent = vk::Extent2D { width, height };
        let info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: extent.into(),
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = unsafe { d.create_image(&info, None) }.map_err(alloc("vkCreateImage"))?;
        let mut out = GpuImage {
            device: d.clone(),
            image,
            memory: vk::DeviceMemory::null(),
            format,
            extent,
            layout: vk::ImageLayout::UNDEFINED,
        };
        let req = unsafe { d.get_image_memory_requirements(image) };
        let (memory, _) = self.allocate_memory(req, props)?;
        out.memory = memory;
        unsafe { d.bind_image_memory(image, memory, 0) }.map_err(alloc("vkBindImageMemory"))?;

        if let Some(layout) = final_layout.filter(|&l| l != vk::ImageLayout::UNDEFINED) {
            self.transition_image_layout(image, vk::ImageLayout::UNDEFINED, layout)?;
            out.layout = layout;
        }
        debug!("image {width}x{height} {format:?} -> {:?}", out.layout);
        Ok(out)
    }

    pub fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: color_subresource_range(),
            ..Default::default()
        };
        unsafe { self.raw().create_image_view(&info, None) }.map_err(vulkan("vkCreateImageView"))
    }

    /// Records a pipeline barrier for the transition and waits for it.
    /// Unsupported pairs fail before anything is recorded.
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> VkResult<()> {
        let masks = transition_masks(old, new)?;
        self.one_shot(|d, cmd| {
            let barrier = vk::ImageMemoryBarrier {
                s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
                src_access_mask: masks.src_access,
                dst_access_mask: masks.dst_access,
                old_layout: old,
                new_layout: new,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                image,
                subresource_range: color_subresource_range(),
                ..Default::default()
            };
            unsafe {
                d.cmd_pipeline_barrier(
                    cmd,
                    masks.src_stage,
                    masks.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    std::slice::from_ref(&barrier),
                )
            };
            Ok(())
        })
    }

    /// Runs `record` inside a scoped one-shot command buffer. The buffer is
    /// submitted and waited on exactly once if `record` succeeds, and a
    /// failed end, submit or wait is returned; if `record` fails the buffer
    /// is freed without being submitted.
    pub fn one_shot<F>(&self, record: F) -> VkResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> VkResult<()>,
    {
        let mut scope = ScopedCommandBuffer::begin(&self.transient_pool, self.graphics_queue)?;
        if let Err(e) = record(self.raw(), scope.handle()) {
            scope.abandon();
            return Err(e);
        }
        scope.finish()
    }

    pub fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.raw().device_wait_idle() }.map_err(vulkan("vkDeviceWaitIdle"))
    }
}

pub(crate) fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn c_name(raw: Result<&CStr, std::ffi::FromBytesUntilNulError>) -> String {
    raw.map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn describe_device(
    instance: &InstanceContext,
    phys: vk::PhysicalDevice,
) -> VkResult<DeviceCandidate<vk::PhysicalDevice>> {
    let raw = instance.instance();
    let props = unsafe { raw.get_physical_device_properties(phys) };
    let name = c_name(props.device_name_as_c_str());

    let surface = instance.surface();
    let queue_families = unsafe { raw.get_physical_device_queue_family_properties(phys) }
        .iter()
        .enumerate()
        .map(|(i, q)| QueueFamilyInfo {
            flags: q.queue_flags,
            supports_present: match surface {
                Some(s) => s.supports_present(phys, i as u32),
                None => q.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            },
        })
        .collect();

    let extensions = unsafe { raw.enumerate_device_extension_properties(phys) }
        .map_err(vulkan("vkEnumerateDeviceExtensionProperties"))?
        .iter()
        .map(|e| c_name(e.extension_name_as_c_str()))
        .collect();

    let surface = match surface {
        Some(s) => Some(SurfaceSupport {
            format_count: s.formats(phys).map_or(0, |f| f.len()),
            present_mode_count: s.present_modes(phys).map_or(0, |m| m.len()),
        }),
        None => None,
    };

    debug!("candidate device: {name}");
    Ok(DeviceCandidate {
        handle: phys,
        name,
        queue_families,
        extensions,
        surface,
    })
}
