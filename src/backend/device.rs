// Vulkan Device - physical device selection and the logical device
//
// Responsibilities:
// - Enumerate physical devices and their queue families
// - Pick the first device with a queue family for the required operations and
//   a family that can present to the surface (preferring one family for both)
// - Create the logical device with one queue per distinct family

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::error::RendererError;
use super::instance::Instance;
use super::lifetime::ResourceKind;
use super::surface::Surface;

/// One queue family as seen from a particular surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyCandidate {
    pub index: u32,
    pub flags: vk::QueueFlags,
    pub supports_present: bool,
}

/// A physical device snapshot, discarded once selection is done
#[derive(Debug, Clone)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub supports_swapchain: bool,
    pub families: Vec<QueueFamilyCandidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families, one queue is created for each
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Queue families of one device that cover `required` and presentation
pub fn find_queue_families(
    families: &[QueueFamilyCandidate],
    required: vk::QueueFlags,
) -> Option<QueueFamilyIndices> {
    // Same family for both roles means no cross-queue synchronization
    if let Some(shared) = families
        .iter()
        .find(|f| f.flags.contains(required) && f.supports_present)
    {
        return Some(QueueFamilyIndices {
            graphics: shared.index,
            present: shared.index,
        });
    }

    let graphics = families.iter().find(|f| f.flags.contains(required))?;
    let present = families.iter().find(|f| f.supports_present)?;

    Some(QueueFamilyIndices {
        graphics: graphics.index,
        present: present.index,
    })
}

/// First device (in enumeration order) able to draw and present
pub fn choose_device(
    candidates: &[PhysicalDeviceCandidate],
    required: vk::QueueFlags,
) -> Result<(&PhysicalDeviceCandidate, QueueFamilyIndices), RendererError> {
    candidates
        .iter()
        .filter(|candidate| {
            if !candidate.supports_swapchain {
                log::debug!("Skipping {}: no VK_KHR_swapchain", candidate.name);
            }
            candidate.supports_swapchain
        })
        .find_map(|candidate| {
            find_queue_families(&candidate.families, required).map(|indices| (candidate, indices))
        })
        .ok_or(RendererError::NoSuitableDevice { required })
}

/// Snapshot every physical device as seen from `surface`
pub fn enumerate_candidates(
    instance: &Instance,
    surface: &Surface,
) -> Result<Vec<PhysicalDeviceCandidate>> {
    let raw = instance.raw();
    let devices = unsafe { raw.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    let candidates = devices
        .into_iter()
        .map(|handle| {
            let props = unsafe { raw.get_physical_device_properties(handle) };
            let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned();

            let extensions =
                unsafe { raw.enumerate_device_extension_properties(handle) }.unwrap_or_default();
            let supports_swapchain = extensions.iter().any(|ext| {
                (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }) == ash::khr::swapchain::NAME
            });

            let families = unsafe { raw.get_physical_device_queue_family_properties(handle) }
                .iter()
                .enumerate()
                .map(|(index, props)| QueueFamilyCandidate {
                    index: index as u32,
                    flags: props.queue_flags,
                    supports_present: surface.supports_present(handle, index as u32),
                })
                .collect();

            PhysicalDeviceCandidate {
                handle,
                name,
                device_type: props.device_type,
                supports_swapchain,
                families,
            }
        })
        .collect::<Vec<_>>();

    for candidate in &candidates {
        log::debug!(
            "GPU candidate: {} ({:?}), {} queue families",
            candidate.name,
            candidate.device_type,
            candidate.families.len()
        );
    }

    Ok(candidates)
}

/// Logical device plus the queues the renderer uses
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    swapchain_loader: ash::khr::swapchain::Device,
    name: String,
    instance: Arc<Instance>,
}

impl Device {
    /// Enumerate, choose and create. No suitable device is fatal.
    pub fn select(
        instance: Arc<Instance>,
        surface: &Surface,
        required: vk::QueueFlags,
    ) -> Result<Arc<Self>> {
        let candidates = enumerate_candidates(&instance, surface)?;
        if candidates.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let (chosen, indices) = choose_device(&candidates, required)?;
        log::info!("Selected GPU: {} ({:?})", chosen.name, chosen.device_type);
        log::info!(
            "Queue families: graphics={}, present={}{}",
            indices.graphics,
            indices.present,
            if indices.is_shared() { " (shared)" } else { "" }
        );

        Self::create(instance, chosen.handle, chosen.name.clone(), indices)
    }

    fn create(
        instance: Arc<Instance>,
        physical_device: vk::PhysicalDevice,
        name: String,
        queue_families: QueueFamilyIndices,
    ) -> Result<Arc<Self>> {
        // Claim the device slot first; a second live device is rejected here
        instance.track_created(ResourceKind::Device, &[ResourceKind::Instance])?;

        let device = match Self::create_logical_device(&instance, physical_device, queue_families) {
            Ok(device) => device,
            Err(e) => {
                instance.track_destroyed(ResourceKind::Device);
                return Err(e);
            }
        };

        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(queue_families.graphics, 0),
                device.get_device_queue(queue_families.present, 0),
            )
        };

        let swapchain_loader = ash::khr::swapchain::Device::new(instance.raw(), &device);

        Ok(Arc::new(Self {
            device,
            physical_device,
            queue_families,
            graphics_queue,
            present_queue,
            swapchain_loader,
            name,
            instance,
        }))
    }

    fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilyIndices,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions = [ash::khr::swapchain::NAME.as_ptr()];

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions);

        let device = unsafe { instance.raw().create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn track_created(
        &self,
        kind: ResourceKind,
        depends_on: &[ResourceKind],
    ) -> Result<(), RendererError> {
        self.instance.track_created(kind, depends_on)
    }

    pub fn track_destroyed(&self, kind: ResourceKind) {
        self.instance.track_destroyed(kind)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("vkDeviceWaitIdle failed")?;
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::info!("Destroying logical device ({})...", self.name);

        if let Err(e) = self.wait_idle() {
            log::warn!("{:#}", e);
        }

        unsafe { self.device.destroy_device(None) };
        self.instance.track_destroyed(ResourceKind::Device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    const GRAPHICS: vk::QueueFlags = vk::QueueFlags::GRAPHICS;

    fn family(index: u32, flags: vk::QueueFlags, supports_present: bool) -> QueueFamilyCandidate {
        QueueFamilyCandidate {
            index,
            flags,
            supports_present,
        }
    }

    fn candidate(raw: u64, families: Vec<QueueFamilyCandidate>) -> PhysicalDeviceCandidate {
        PhysicalDeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu-{}", raw),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            supports_swapchain: true,
            families,
        }
    }

    #[test]
    fn shared_family_is_preferred() {
        let families = [
            family(0, GRAPHICS | vk::QueueFlags::COMPUTE, false),
            family(1, vk::QueueFlags::TRANSFER, true),
            family(2, GRAPHICS, true),
        ];

        let indices = find_queue_families(&families, GRAPHICS).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 2, present: 2 });
        assert!(indices.is_shared());
        assert_eq!(indices.unique(), vec![2]);
    }

    #[test]
    fn split_families_are_accepted() {
        let families = [
            family(0, vk::QueueFlags::empty(), false),
            family(1, GRAPHICS, false),
            family(2, vk::QueueFlags::TRANSFER, true),
        ];

        let indices = find_queue_families(&families, GRAPHICS).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 2 });
        assert_eq!(indices.unique(), vec![1, 2]);
    }

    #[test]
    fn families_with_neither_capability_are_skipped() {
        let families = [
            family(0, vk::QueueFlags::TRANSFER, false),
            family(1, vk::QueueFlags::COMPUTE, false),
        ];
        assert_eq!(find_queue_families(&families, GRAPHICS), None);
    }

    #[test]
    fn presentation_alone_is_not_enough() {
        let families = [family(0, vk::QueueFlags::COMPUTE, true)];
        assert_eq!(find_queue_families(&families, GRAPHICS), None);
    }

    #[test]
    fn chosen_family_covers_requested_flags() {
        let required = GRAPHICS | vk::QueueFlags::COMPUTE;
        let devices = [
            candidate(1, vec![family(0, GRAPHICS, true)]),
            candidate(
                2,
                vec![
                    family(0, vk::QueueFlags::TRANSFER, true),
                    family(1, GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, true),
                ],
            ),
        ];

        let (chosen, indices) = choose_device(&devices, required).unwrap();
        assert_eq!(chosen.handle, vk::PhysicalDevice::from_raw(2));

        let graphics = &chosen.families[indices.graphics as usize];
        assert!(graphics.flags.contains(required));
        assert!(chosen.families[indices.present as usize].supports_present);
    }

    #[test]
    fn first_suitable_device_wins() {
        let devices = [
            candidate(1, vec![family(0, vk::QueueFlags::COMPUTE, true)]),
            candidate(2, vec![family(0, GRAPHICS, false), family(1, vk::QueueFlags::TRANSFER, true)]),
            candidate(3, vec![family(0, GRAPHICS, true)]),
        ];

        let (chosen, indices) = choose_device(&devices, GRAPHICS).unwrap();
        assert_eq!(chosen.handle, vk::PhysicalDevice::from_raw(2));
        assert_eq!(indices, QueueFamilyIndices { graphics: 0, present: 1 });
    }

    #[test]
    fn devices_without_swapchain_extension_are_skipped() {
        let mut headless = candidate(1, vec![family(0, GRAPHICS, true)]);
        headless.supports_swapchain = false;
        let devices = [headless, candidate(2, vec![family(0, GRAPHICS, true)])];

        let (chosen, _) = choose_device(&devices, GRAPHICS).unwrap();
        assert_eq!(chosen.handle, vk::PhysicalDevice::from_raw(2));
    }

    #[test]
    fn no_match_is_no_suitable_device() {
        let devices = [
            candidate(1, vec![family(0, vk::QueueFlags::TRANSFER, true)]),
            candidate(2, vec![family(0, GRAPHICS, false)]),
        ];

        assert!(matches!(
            choose_device(&devices, GRAPHICS),
            Err(RendererError::NoSuitableDevice { .. })
        ));
        assert!(matches!(
            choose_device(&[], GRAPHICS),
            Err(RendererError::NoSuitableDevice { .. })
        ));
    }
}
