// Synchronization primitives
//
// One frame slot: the two semaphores the frame protocol needs plus the fence
// that keeps the CPU from reusing them before the GPU is done.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::lifetime::ResourceKind;

/// Plain handles, copied into the frame loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSyncHandles {
    /// Signalled by the presentation engine, waited on by the submit
    pub image_available: vk::Semaphore,
    /// Signalled by the submit, waited on by present
    pub render_finished: vk::Semaphore,
    /// Signalled by the submit, waited on by the CPU before the next frame
    pub in_flight: vk::Fence,
}

/// Owns the objects behind `FrameSyncHandles`
pub struct FrameSync {
    handles: FrameSyncHandles,
    device: Arc<Device>,
}

impl FrameSync {
    pub fn new(device: Arc<Device>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the first frame does not wait forever
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let mut this = Self {
            handles: FrameSyncHandles {
                image_available: vk::Semaphore::null(),
                render_finished: vk::Semaphore::null(),
                in_flight: vk::Fence::null(),
            },
            device,
        };

        let raw = this.device.raw();
        this.handles.image_available = unsafe { raw.create_semaphore(&semaphore_info, None) }
            .context("Failed to create image-available semaphore")?;
        this.device
            .track_created(ResourceKind::ImageAvailableSemaphore, &[ResourceKind::Device])?;

        let raw = this.device.raw();
        this.handles.render_finished = unsafe { raw.create_semaphore(&semaphore_info, None) }
            .context("Failed to create render-finished semaphore")?;
        this.device
            .track_created(ResourceKind::RenderFinishedSemaphore, &[ResourceKind::Device])?;

        let raw = this.device.raw();
        this.handles.in_flight = unsafe { raw.create_fence(&fence_info, None) }
            .context("Failed to create in-flight fence")?;
        this.device
            .track_created(ResourceKind::InFlightFence, &[ResourceKind::Device])?;

        Ok(this)
    }

    pub fn handles(&self) -> FrameSyncHandles {
        self.handles
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        let device = self.device.raw();
        let FrameSyncHandles {
            image_available,
            render_finished,
            in_flight,
        } = self.handles;

        unsafe {
            if in_flight != vk::Fence::null() {
                device.destroy_fence(in_flight, None);
                self.device.track_destroyed(ResourceKind::InFlightFence);
            }
            if render_finished != vk::Semaphore::null() {
                device.destroy_semaphore(render_finished, None);
                self.device.track_destroyed(ResourceKind::RenderFinishedSemaphore);
            }
            if image_available != vk::Semaphore::null() {
                device.destroy_semaphore(image_available, None);
                self.device.track_destroyed(ResourceKind::ImageAvailableSemaphore);
            }
        }
    }
}
