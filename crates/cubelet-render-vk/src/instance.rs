// SPDX-License-Identifier: CEPL-1.0
//! Vulkan instance, optional validation messenger and optional surface.

use std::ffi::{c_char, c_void, CStr};
use std::sync::atomic::{AtomicU32, Ordering};

use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use cubelet_render::{EngineConfig, SurfaceProvider};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, warn};

use crate::error::{vulkan, VkError, VkResult};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"cubelet";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user: *mut c_void,
) -> vk::Bool32 {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) && !user.is_null() {
        // SAFETY: `user` is the boxed counter owned by the InstanceContext,
        // which destroys the messenger before the counter.
        unsafe { (*user.cast::<AtomicU32>()).fetch_add(1, Ordering::Relaxed) };
    }
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader passes a valid callback struct for the call's duration.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else {
        warn!("[vulkan] {msg}");
    }
    vk::FALSE
}

/// Surface handle plus the loader needed to query and destroy it.
pub struct SurfaceContext {
    pub loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl SurfaceContext {
    pub fn capabilities(&self, phys: vk::PhysicalDevice) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(phys, self.surface)
        }
        .map_err(vulkan("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))
    }

    pub fn formats(&self, phys: vk::PhysicalDevice) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe { self.loader.get_physical_device_surface_formats(phys, self.surface) }
            .map_err(vulkan("vkGetPhysicalDeviceSurfaceFormatsKHR"))
    }

    pub fn present_modes(&self, phys: vk::PhysicalDevice) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(phys, self.surface)
        }
        .map_err(vulkan("vkGetPhysicalDeviceSurfacePresentModesKHR"))
    }

    pub fn supports_present(&self, phys: vk::PhysicalDevice, family: u32) -> bool {
        unsafe {
            self.loader
                .get_physical_device_surface_support(phys, family, self.surface)
        }
        .unwrap_or(false)
    }
}

pub struct InstanceContext {
    entry: Entry,
    instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface: Option<SurfaceContext>,
    // ERROR-severity validation messages seen so far; bumped by the callback
    // through `p_user_data`, so it must stay boxed.
    validation_errors: Box<AtomicU32>,
}

impl InstanceContext {
    /// Instance with the extensions the provider's display needs, plus a
    /// surface for its window.
    pub fn new(config: &EngineConfig, provider: &dyn SurfaceProvider) -> VkResult<Self> {
        let display = provider.display_handle()?.as_raw();
        let window = provider.window_handle()?.as_raw();

        let mut ctx = Self::create(config, Some(display))?;
        let surface = unsafe {
            ash_window::create_surface(&ctx.entry, &ctx.instance, display, window, None)
        }
        .map_err(vulkan("vkCreateSurfaceKHR"))?;
        ctx.surface = Some(SurfaceContext {
            loader: surface::Instance::new(&ctx.entry, &ctx.instance),
            surface,
        });
        Ok(ctx)
    }

    /// Instance without any window system integration.
    pub fn new_headless(config: &EngineConfig) -> VkResult<Self> {
        Self::create(config, None)
    }

    fn create(config: &EngineConfig, display: Option<RawDisplayHandle>) -> VkResult<Self> {
        let entry = Entry::linked();

        let mut extensions: Vec<*const c_char> = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)
                .map_err(vulkan("enumerate_required_extensions"))?
                .to_vec(),
            None => Vec::new(),
        };
        let mut layers: Vec<*const c_char> = Vec::new();
        if config.enable_validation {
            check_layer_available(&entry, VALIDATION_LAYER)?;
            layers.push(VALIDATION_LAYER.as_ptr());
            extensions.push(debug_utils::NAME.as_ptr());
        }

        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: APP_NAME.as_ptr(),
            application_version: 0,
            p_engine_name: APP_NAME.as_ptr(),
            engine_version: 0,
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };
        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            ..Default::default()
        };
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(vulkan("vkCreateInstance"))?;
        info!(
            "vulkan instance created (validation={})",
            config.enable_validation
        );

        let mut ctx = Self {
            entry,
            instance,
            debug: None,
            surface: None,
            validation_errors: Box::new(AtomicU32::new(0)),
        };
        if config.enable_validation {
            let loader = debug_utils::Instance::new(&ctx.entry, &ctx.instance);
            let ci = vk::DebugUtilsMessengerCreateInfoEXT {
                s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_callback),
                p_user_data: (&*ctx.validation_errors as *const AtomicU32)
                    .cast_mut()
                    .cast(),
                ..Default::default()
            };
            let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
                .map_err(vulkan("vkCreateDebugUtilsMessengerEXT"))?;
            ctx.debug = Some((loader, messenger));
            debug!("debug messenger installed");
        }
        Ok(ctx)
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn surface(&self) -> Option<&SurfaceContext> {
        self.surface.as_ref()
    }

    /// Number of ERROR-severity messages the validation layer has reported.
    /// Always 0 when validation is off.
    pub fn validation_errors(&self) -> u32 {
        self.validation_errors.load(Ordering::Relaxed)
    }

    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

/// Whether the Khronos validation layer is installed.
pub fn validation_layer_available() -> bool {
    check_layer_available(&Entry::linked(), VALIDATION_LAYER).is_ok()
}

fn check_layer_available(entry: &Entry, layer: &CStr) -> VkResult<()> {
    let available = unsafe { entry.enumerate_instance_layer_properties() }
        .map_err(vulkan("vkEnumerateInstanceLayerProperties"))?;
    let found = available
        .iter()
        .any(|p| p.layer_name_as_c_str().is_ok_and(|name| name == layer));
    if found {
        Ok(())
    } else {
        Err(VkError::MissingValidationLayer(
            layer.to_string_lossy().into_owned(),
        ))
    }
}

// Surface and messenger go before the instance that created them.
impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if let Some(s) = self.surface.take() {
                s.loader.destroy_surface(s.surface, None);
            }
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
