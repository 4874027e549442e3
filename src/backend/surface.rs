// Presentation surface bound to the native window
//
// The window itself belongs to the caller; only the VkSurfaceKHR is owned here.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::error::{RendererError, VkResultExt};
use super::instance::Instance;
use super::lifetime::ResourceKind;

/// Everything the surface reports for one physical device
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub struct Surface {
    surface: vk::SurfaceKHR,
    instance: Arc<Instance>,
}

impl Surface {
    pub fn new(
        instance: Arc<Instance>,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self> {
        let surface = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.raw(),
                display_handle,
                window_handle,
                None,
            )
        }
        .context("Failed to create window surface")?;

        if let Err(e) = instance.track_created(ResourceKind::Surface, &[ResourceKind::Instance]) {
            unsafe { instance.surface_loader().destroy_surface(surface, None) };
            return Err(e.into());
        }

        Ok(Self { surface, instance })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// A failed query counts as "no support"
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> bool {
        let result = unsafe {
            self.instance.surface_loader().get_physical_device_surface_support(
                physical_device,
                family,
                self.surface,
            )
        };

        result.unwrap_or_else(|e| {
            log::warn!("Present support query failed for family {}: {}", family, e);
            false
        })
    }

    pub fn query_support(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<SurfaceSupport, RendererError> {
        let loader = self.instance.surface_loader();

        unsafe {
            Ok(SurfaceSupport {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)
                    .or_vk("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                formats: loader
                    .get_physical_device_surface_formats(physical_device, self.surface)
                    .or_vk("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)
                    .or_vk("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.instance.surface_loader().destroy_surface(self.surface, None);
        }
        self.instance.track_destroyed(ResourceKind::Surface);
    }
}
