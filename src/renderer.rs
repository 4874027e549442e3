// Renderer: builds the whole Vulkan object graph for one window and draws
// the triangle into it.
//
// Construction order is instance -> surface -> device -> swapchain ->
// render pass -> pipeline -> framebuffers -> commands -> sync.
// Fields are declared in the opposite order so Drop tears down in reverse.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

use crate::backend::{
    CommandRecordings, Device, FrameLoop, FrameSync, Framebuffers, GraphicsPipeline, Instance,
    RenderPass, ShaderBlobs, Surface, Swapchain, SwapchainFrameBackend,
};
use crate::config::Config;

pub struct Renderer {
    frame_loop: FrameLoop,
    sync: FrameSync,
    commands: CommandRecordings,
    framebuffers: Framebuffers,
    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    swapchain: Swapchain,
    device: Arc<Device>,
    surface: Surface,
    instance: Arc<Instance>,

    /// Set after the first frame failure; nothing is drawn afterwards
    halted: bool,
}

impl Renderer {
    pub fn new<W>(
        window: &W,
        window_extent: vk::Extent2D,
        config: &Config,
        shaders: &ShaderBlobs,
    ) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let instance = Instance::new(
            &config.window.title,
            display_handle,
            config.validation_enabled(),
        )?;

        let surface = Surface::new(instance.clone(), display_handle, window_handle)
            .context("Failed to create window surface")?;

        let device = Device::select(instance.clone(), &surface, vk::QueueFlags::GRAPHICS)?;

        let swapchain = Swapchain::new(device.clone(), &surface, window_extent)
            .context("Failed to create swapchain")?;

        let render_pass = RenderPass::new(device.clone(), swapchain.format())?;
        let pipeline =
            GraphicsPipeline::new(device.clone(), &render_pass, swapchain.extent(), shaders)?;
        let framebuffers = Framebuffers::new(device.clone(), &render_pass, &swapchain)?;

        let commands = CommandRecordings::record(
            device.clone(),
            &render_pass,
            &pipeline,
            &framebuffers,
            &swapchain,
            config.graphics.clear_color,
        )?;

        let sync = FrameSync::new(device.clone())?;
        let frame_loop = FrameLoop::new(sync.handles());

        log::info!(
            "Renderer ready on {}: {} images, {}x{}",
            device.name(),
            swapchain.images().len(),
            swapchain.extent().width,
            swapchain.extent().height
        );

        Ok(Self {
            frame_loop,
            sync,
            commands,
            framebuffers,
            pipeline,
            render_pass,
            swapchain,
            device,
            surface,
            instance,
            halted: false,
        })
    }

    /// Draw one frame. Failures are logged once and stop all later drawing.
    pub fn draw_frame(&mut self) {
        if self.halted {
            return;
        }

        let mut backend = SwapchainFrameBackend {
            device: &self.device,
            swapchain: &self.swapchain,
            frames: self.commands.frames(),
        };

        if let Err(e) = self.frame_loop.render_frame(&mut backend) {
            log::error!(
                "Frame {} failed, no further frames will be drawn: {}",
                self.frame_loop.frames_presented() + 1,
                e
            );
            self.halted = true;
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn frames_presented(&self) -> u64 {
        self.frame_loop.frames_presented()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!(
            "Shutting down renderer after {} frames",
            self.frame_loop.frames_presented()
        );
        // The last submit may still be using sync objects and command buffers
        if let Err(e) = self.device.wait_idle() {
            log::warn!("{:#}", e);
        }
        log::debug!(
            "Live Vulkan objects before teardown: {}",
            self.instance.live_objects().len()
        );
    }
}
