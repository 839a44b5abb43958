// SPDX-License-Identifier: CEPL-1.0
//! Driver-independent decisions: device and queue family choice, memory type
//! choice and the supported layout transitions. Kept free of live handles so
//! it can be tested without a GPU.

use std::collections::BTreeSet;

use ash::vk;

use crate::error::{VkError, VkResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    /// Whether the family can present to the target surface. Without a
    /// surface this mirrors graphics support.
    pub supports_present: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn resolve(self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// One entry per distinct family, ascending.
    pub fn unique(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics, self.present])
            .into_iter()
            .collect()
    }
}

/// Walks families in order and stops as soon as both roles are covered.
pub fn find_queue_families(families: &[QueueFamilyInfo]) -> QueueFamilyIndices {
    let mut found = QueueFamilyIndices::default();
    for (i, family) in families.iter().enumerate() {
        if family.flags.contains(vk::QueueFlags::GRAPHICS) {
            found.graphics = Some(i as u32);
        }
        if family.supports_present {
            found.present = Some(i as u32);
        }
        if found.resolve().is_some() {
            break;
        }
    }
    found
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceSupport {
    pub format_count: usize,
    pub present_mode_count: usize,
}

/// Everything selection needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct DeviceCandidate<H> {
    pub handle: H,
    pub name: String,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub extensions: Vec<String>,
    /// `None` when selecting without a surface.
    pub surface: Option<SurfaceSupport>,
}

impl<H> DeviceCandidate<H> {
    pub fn suitable_families(&self, required_extensions: &[&str]) -> Option<QueueFamilies> {
        let families = find_queue_families(&self.queue_families).resolve()?;
        let has_extensions = required_extensions
            .iter()
            .all(|req| self.extensions.iter().any(|e| e == req));
        let surface_ok = self
            .surface
            .map_or(true, |s| s.format_count > 0 && s.present_mode_count > 0);
        (has_extensions && surface_ok).then_some(families)
    }
}

/// First suitable device in enumeration order. Discrete GPUs get no
/// preference so integrated-only and virtualized hosts behave the same.
pub fn select_device<'a, H>(
    candidates: &'a [DeviceCandidate<H>],
    required_extensions: &[&str],
) -> VkResult<(&'a DeviceCandidate<H>, QueueFamilies)> {
    candidates
        .iter()
        .find_map(|c| c.suitable_families(required_extensions).map(|f| (c, f)))
        .ok_or(VkError::NoSuitableDevice)
}

/// Lowest memory type index allowed by `type_bits` whose flags include all of
/// `flags`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> VkResult<u32> {
    let count = (props.memory_type_count as usize).min(props.memory_types.len());
    props.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(flags))
        .map(|(i, _)| i as u32)
        .ok_or(VkError::UnsupportedMemoryType { type_bits, flags })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier masks for the layout transitions the engine knows how to do.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> VkResult<TransitionMasks> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        _ => Err(VkError::UnsupportedLayoutTransition { old, new }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWAPCHAIN: &str = "VK_KHR_swapchain";

    fn family(flags: vk::QueueFlags, present: bool) -> QueueFamilyInfo {
        QueueFamilyInfo {
            flags,
            supports_present: present,
        }
    }

    fn candidate(handle: u32, families: Vec<QueueFamilyInfo>) -> DeviceCandidate<u32> {
        DeviceCandidate {
            handle,
            name: format!("gpu{handle}"),
            queue_families: families,
            extensions: vec![SWAPCHAIN.to_owned()],
            surface: Some(SurfaceSupport {
                format_count: 1,
                present_mode_count: 1,
            }),
        }
    }

    fn memory_props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    #[test]
    fn test_single_family_covers_both_roles() {
        let found = find_queue_families(&[family(vk::QueueFlags::GRAPHICS, true)]);
        let families = found.resolve().unwrap();
        assert!(families.is_shared());
        assert_eq!(families.unique(), vec![0]);
    }

    #[test]
    fn test_distinct_families_are_both_created() {
        let found = find_queue_families(&[
            family(vk::QueueFlags::GRAPHICS, false),
            family(vk::QueueFlags::TRANSFER, true),
            family(vk::QueueFlags::GRAPHICS, true),
        ]);
        assert_eq!(
            found,
            QueueFamilyIndices {
                graphics: Some(0),
                present: Some(1)
            }
        );
        assert_eq!(found.resolve().unwrap().unique(), vec![0, 1]);
    }

    #[test]
    fn test_missing_present_is_incomplete() {
        let found = find_queue_families(&[family(vk::QueueFlags::GRAPHICS, false)]);
        assert_eq!(found.resolve(), None);
    }

    #[test]
    fn test_first_suitable_device_wins() {
        let mut no_ext = candidate(0, vec![family(vk::QueueFlags::GRAPHICS, true)]);
        no_ext.extensions.clear();
        let mut no_formats = candidate(1, vec![family(vk::QueueFlags::GRAPHICS, true)]);
        no_formats.surface = Some(SurfaceSupport {
            format_count: 0,
            present_mode_count: 2,
        });
        let good = candidate(2, vec![family(vk::QueueFlags::GRAPHICS, true)]);
        let also_good = candidate(3, vec![family(vk::QueueFlags::GRAPHICS, true)]);

        let all = [no_ext, no_formats, good, also_good];
        let (chosen, _) = select_device(&all, &[SWAPCHAIN]).unwrap();
        assert_eq!(chosen.handle, 2);
    }

    #[test]
    fn test_no_suitable_device() {
        let all = [candidate(0, vec![family(vk::QueueFlags::COMPUTE, true)])];
        assert!(matches!(
            select_device(&all, &[SWAPCHAIN]),
            Err(VkError::NoSuitableDevice)
        ));
        let empty: [DeviceCandidate<u32>; 0] = [];
        assert!(select_device(&empty, &[]).is_err());
    }

    #[test]
    fn test_headless_candidate_skips_surface_checks() {
        let mut c = candidate(7, vec![family(vk::QueueFlags::GRAPHICS, true)]);
        c.surface = None;
        c.extensions.clear();
        assert!(c.suitable_families(&[]).is_some());
    }

    #[test]
    fn test_memory_type_respects_filter_and_flags() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = memory_props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            host,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        assert_eq!(find_memory_type(&props, 0b1111, host).unwrap(), 2);
        assert_eq!(find_memory_type(&props, 0b1000, host).unwrap(), 3);
        assert_eq!(
            find_memory_type(&props, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
        assert!(matches!(
            find_memory_type(&props, 0b0011, host),
            Err(VkError::UnsupportedMemoryType { type_bits: 0b0011, .. })
        ));
    }

    #[test]
    fn test_memory_type_ignores_entries_past_count() {
        let mut props = memory_props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert!(find_memory_type(&props, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }

    #[test]
    fn test_only_undefined_to_shader_read_is_supported() {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::empty());
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        let err = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap_err();
        assert!(matches!(err, VkError::UnsupportedLayoutTransition { .. }));
    }
}
