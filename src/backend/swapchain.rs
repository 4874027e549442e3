// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// One swapchain per run: resizing is not handled, so an out-of-date swapchain
// is reported to the caller instead of being rebuilt.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::error::{RendererError, VkResultExt};
use super::lifetime::ResourceKind;
use super::surface::{Surface, SurfaceSupport};

/// Formats tried first, each with the standard non-linear color space
const PREFERRED_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

/// Preferred 8-bit format, else whatever the surface lists first
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, RendererError> {
    formats
        .iter()
        .find(|f| {
            PREFERRED_FORMATS.contains(&f.format)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .ok_or(RendererError::NoCompatibleFormat)
}

/// FIFO (strict vsync queueing), else whatever the surface lists first
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
) -> Result<vk::PresentModeKHR, RendererError> {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::FIFO)
        .or_else(|| modes.first().copied())
        .ok_or(RendererError::NoPresentMode)
}

/// Surface minimum, clamped to the maximum when there is one (0 = unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count > 0 {
        caps.min_image_count.min(caps.max_image_count)
    } else {
        caps.min_image_count
    }
}

/// Current extent as reported; the window size only when the surface leaves
/// the choice to the swapchain.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Chosen swapchain configuration, recomputed for every swapchain
#[derive(Debug, Clone, Copy)]
pub struct SurfaceConfig {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
    pub extent: vk::Extent2D,
}

impl SurfaceConfig {
    pub fn choose(
        support: &SurfaceSupport,
        window_extent: vk::Extent2D,
    ) -> Result<Self, RendererError> {
        Ok(Self {
            capabilities: support.capabilities,
            format: choose_surface_format(&support.formats)?,
            present_mode: choose_present_mode(&support.present_modes)?,
            image_count: choose_image_count(&support.capabilities),
            extent: choose_extent(&support.capabilities, window_extent),
        })
    }
}

/// One 2D color view per image, identical subresource range for all
pub fn image_view_infos(
    images: &[vk::Image],
    format: vk::Format,
) -> Vec<vk::ImageViewCreateInfo<'static>> {
    images
        .iter()
        .map(|&image| {
            vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
        })
        .collect()
}

/// What a set of recorded commands was built against. Two swapchains with the
/// same handle value but different geometry never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainTarget {
    pub handle: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub image_count: usize,
}

pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    config: SurfaceConfig,
    device: Arc<Device>,
}

impl Swapchain {
    pub fn new(device: Arc<Device>, surface: &Surface, window_extent: vk::Extent2D) -> Result<Self> {
        let support = surface.query_support(device.physical_device())?;
        let config = SurfaceConfig::choose(&support, window_extent)?;

        log::info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, min {} images",
            config.extent.width,
            config.extent.height,
            config.format.format,
            config.format.color_space,
            config.present_mode,
            config.image_count
        );

        let families = device.queue_families();
        let family_list = [families.graphics, families.present];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(config.image_count)
            .image_format(config.format.format)
            .image_color_space(config.format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(config.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true);

        create_info = if families.is_shared() {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_list)
        };

        let loader = device.swapchain_loader();
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .or_vk("vkCreateSwapchainKHR")?;

        if let Err(e) =
            device.track_created(ResourceKind::Swapchain, &[ResourceKind::Device, ResourceKind::Surface])
        {
            unsafe { loader.destroy_swapchain(swapchain, None) };
            return Err(e.into());
        }

        // The driver decides the real count
        let mut this = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            config,
            device,
        };

        this.images = unsafe { this.device.swapchain_loader().get_swapchain_images(swapchain) }
            .or_vk("vkGetSwapchainImagesKHR")?;
        log::info!("Created swapchain with {} images", this.images.len());

        for (i, info) in image_view_infos(&this.images, config.format.format)
            .iter()
            .enumerate()
        {
            let view = unsafe { this.device.raw().create_image_view(info, None) }
                .context("Failed to create image view")?;
            this.image_views.push(view);
            this.device.track_created(
                ResourceKind::ImageView(i),
                &[ResourceKind::Device, ResourceKind::Swapchain],
            )?;
        }

        Ok(this)
    }

    /// Blocks until an image is free; no timeout
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), RendererError> {
        unsafe {
            self.device.swapchain_loader().acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .or_vk("vkAcquireNextImageKHR")
    }

    /// Returns true when the swapchain is suboptimal
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, RendererError> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.device.swapchain_loader().queue_present(queue, &present_info) }
            .or_vk("vkQueuePresentKHR")
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn format(&self) -> vk::Format {
        self.config.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }

    pub fn target(&self) -> SwapchainTarget {
        SwapchainTarget {
            handle: self.swapchain,
            extent: self.config.extent,
            image_count: self.images.len(),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for (i, &view) in self.image_views.iter().enumerate().rev() {
                self.device.raw().destroy_image_view(view, None);
                self.device.track_destroyed(ResourceKind::ImageView(i));
            }
            // Images belong to the swapchain and go with it
            self.device.swapchain_loader().destroy_swapchain(self.swapchain, None);
        }
        self.device.track_destroyed(ResourceKind::Swapchain);
    }
}
