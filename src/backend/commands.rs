// Command pool and the pre-recorded draw commands
//
// Each swapchain image gets one primary command buffer, recorded once:
// begin render pass (framebuffer[i]) -> bind pipeline -> draw 3 -> end.
// Nothing is ever rerecorded or reset; the buffers die with the pool.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::error::RendererError;
use super::lifetime::ResourceKind;
use super::pipeline::{Framebuffers, GraphicsPipeline, RenderPass};
use super::swapchain::{Swapchain, SwapchainTarget};

/// A command buffer and what it was recorded against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedFrame {
    pub command_buffer: vk::CommandBuffer,
    pub framebuffer: vk::Framebuffer,
    pub target: SwapchainTarget,
}

/// Recorded frames indexed by swapchain image
#[derive(Debug, Default)]
pub struct RecordedFrames {
    frames: Vec<RecordedFrame>,
}

impl RecordedFrames {
    #[cfg(test)]
    pub fn new(frames: Vec<RecordedFrame>) -> Self {
        Self { frames }
    }

    /// The recording for `index`, provided it belongs to `target`
    pub fn for_image(
        &self,
        index: u32,
        target: &SwapchainTarget,
    ) -> Result<&RecordedFrame, RendererError> {
        let frame = self
            .frames
            .get(index as usize)
            .ok_or(RendererError::ImageIndexOutOfRange {
                index,
                count: self.frames.len(),
            })?;

        if frame.target != *target || self.frames.len() != target.image_count {
            return Err(RendererError::StaleRecording { index });
        }
        Ok(frame)
    }

    fn push(&mut self, frame: RecordedFrame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

pub struct CommandRecordings {
    pool: vk::CommandPool,
    frames: RecordedFrames,
    device: Arc<Device>,
}

impl CommandRecordings {
    /// Allocate one buffer per framebuffer from a pool on the graphics family
    /// and record the draw into each.
    pub fn record(
        device: Arc<Device>,
        render_pass: &RenderPass,
        pipeline: &GraphicsPipeline,
        framebuffers: &Framebuffers,
        swapchain: &Swapchain,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families().graphics);

        let pool = unsafe { device.raw().create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;
        if let Err(e) = device.track_created(ResourceKind::CommandPool, &[ResourceKind::Device]) {
            unsafe { device.raw().destroy_command_pool(pool, None) };
            return Err(e.into());
        }

        let mut this = Self {
            pool,
            frames: RecordedFrames::default(),
            device,
        };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(framebuffers.len() as u32);

        let command_buffers = unsafe { this.device.raw().allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        let target = swapchain.target();

        for (i, (&cmd, &framebuffer)) in command_buffers.iter().zip(framebuffers.handles()).enumerate() {
            record_draw(
                this.device.raw(),
                cmd,
                render_pass.handle(),
                framebuffer,
                pipeline.handle(),
                target.extent,
                clear_color,
            )
            .with_context(|| format!("Failed to record command buffer {}", i))?;

            this.device.track_created(
                ResourceKind::RecordedCommands(i),
                &[ResourceKind::CommandPool, ResourceKind::Pipeline, ResourceKind::Framebuffer(i)],
            )?;
            this.frames.push(RecordedFrame {
                command_buffer: cmd,
                framebuffer,
                target,
            });
        }

        log::info!("Recorded {} command buffers", this.frames.len());

        Ok(this)
    }

    pub fn frames(&self) -> &RecordedFrames {
        &self.frames
    }
}

impl Drop for CommandRecordings {
    fn drop(&mut self) {
        for i in (0..self.frames.len()).rev() {
            self.device.track_destroyed(ResourceKind::RecordedCommands(i));
        }
        // Also frees the command buffers
        unsafe { self.device.raw().destroy_command_pool(self.pool, None) };
        self.device.track_destroyed(ResourceKind::CommandPool);
    }
}

/// Record the static triangle draw into `cmd`
fn record_draw(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    pipeline: vk::Pipeline,
    extent: vk::Extent2D,
    clear_color: [f32; 4],
) -> Result<()> {
    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: clear_color,
        },
    }];

    let render_pass_begin = vk::RenderPassBeginInfo::default()
        .render_pass(render_pass)
        .framebuffer(framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        })
        .clear_values(&clear_values);

    // Resubmitted every frame without re-recording
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

    unsafe {
        device.begin_command_buffer(cmd, &begin_info)?;
        device.cmd_begin_render_pass(cmd, &render_pass_begin, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        device.cmd_draw(cmd, 3, 1, 0, 0);
        device.cmd_end_render_pass(cmd);
        device.end_command_buffer(cmd)?;
    }

    Ok(())
}
