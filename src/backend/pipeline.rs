// Render pass, graphics pipeline and framebuffers
//
// Creation order matters: the render pass and pipeline exist before the
// framebuffers, and all three exist before any command buffer is recorded.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::error::RendererError;
use super::lifetime::ResourceKind;
use super::shader::{create_shader_module, ShaderBlobs};
use super::swapchain::Swapchain;

/// Attachment layout of the single color target
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

pub struct RenderPass {
    render_pass: vk::RenderPass,
    device: Arc<Device>,
}

impl RenderPass {
    /// One color attachment, one subpass
    pub fn new(device: Arc<Device>, format: vk::Format) -> Result<Self> {
        let attachments = [color_attachment(format)];

        let color_attachment_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachment_refs)];

        // Writes wait for the stage the acquire semaphore is gated on
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.raw().create_render_pass(&render_pass_info, None) }
            .context("Failed to create render pass")?;

        let this = Self {
            render_pass,
            device,
        };
        this.device
            .track_created(ResourceKind::RenderPass, &[ResourceKind::Device])?;
        Ok(this)
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_render_pass(self.render_pass, None) };
        self.device.track_destroyed(ResourceKind::RenderPass);
    }
}

/// Pipeline plus its (empty) layout
pub struct GraphicsPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    device: Arc<Device>,
}

impl GraphicsPipeline {
    /// Hardcoded triangle: no vertex input, no descriptor sets, static viewport
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
        shaders: &ShaderBlobs,
    ) -> Result<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo::default();
        let layout = unsafe { device.raw().create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;
        if let Err(e) = device.track_created(ResourceKind::PipelineLayout, &[ResourceKind::Device]) {
            unsafe { device.raw().destroy_pipeline_layout(layout, None) };
            return Err(e.into());
        }

        // From here on Drop cleans up the layout (and pipeline once it exists)
        let mut this = Self {
            pipeline: vk::Pipeline::null(),
            layout,
            device,
        };

        let vert = create_shader_module(this.device.raw(), &shaders.vertex)?;
        let frag = match create_shader_module(this.device.raw(), &shaders.fragment) {
            Ok(frag) => frag,
            Err(e) => {
                unsafe { this.device.raw().destroy_shader_module(vert, None) };
                return Err(e);
            }
        };

        let result = Self::create_pipeline(this.device.raw(), render_pass.handle(), layout, extent, vert, frag);

        // Modules are only needed while the pipeline is built
        unsafe {
            this.device.raw().destroy_shader_module(frag, None);
            this.device.raw().destroy_shader_module(vert, None);
        }

        this.pipeline = result?;
        this.device.track_created(
            ResourceKind::Pipeline,
            &[ResourceKind::Device, ResourceKind::RenderPass, ResourceKind::PipelineLayout],
        )?;

        Ok(this)
    }

    fn create_pipeline(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        extent: vk::Extent2D,
        vert_shader: vk::ShaderModule,
        frag_shader: vk::ShaderModule,
    ) -> Result<vk::Pipeline> {
        let entry_point = c"main";

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_shader)
                .name(entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_shader)
                .name(entry_point),
        ];

        // Positions come from gl_VertexIndex
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        // Opaque
        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| e)
                .context("Failed to create graphics pipeline")?
        };

        Ok(pipelines[0])
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.device.raw().destroy_pipeline(self.pipeline, None);
                self.device.track_destroyed(ResourceKind::Pipeline);
            }
            self.device.raw().destroy_pipeline_layout(self.layout, None);
        }
        self.device.track_destroyed(ResourceKind::PipelineLayout);
    }
}

/// |images| = |views| = |framebuffers|, or the swapchain set is unusable
pub fn check_image_counts(
    images: usize,
    views: usize,
    framebuffers: usize,
) -> Result<usize, RendererError> {
    if images == views && views == framebuffers {
        Ok(images)
    } else {
        Err(RendererError::ImageCountMismatch {
            images,
            views,
            framebuffers,
        })
    }
}

/// One framebuffer per swapchain image view
pub struct Framebuffers {
    framebuffers: Vec<vk::Framebuffer>,
    device: Arc<Device>,
}

impl Framebuffers {
    pub fn new(device: Arc<Device>, render_pass: &RenderPass, swapchain: &Swapchain) -> Result<Self> {
        let extent = swapchain.extent();
        let mut this = Self {
            framebuffers: Vec::with_capacity(swapchain.image_views().len()),
            device,
        };

        for (i, &image_view) in swapchain.image_views().iter().enumerate() {
            let attachments = [image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.handle())
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe { this.device.raw().create_framebuffer(&framebuffer_info, None) }
                .context("Failed to create framebuffer")?;
            this.framebuffers.push(framebuffer);
            this.device.track_created(
                ResourceKind::Framebuffer(i),
                &[ResourceKind::Device, ResourceKind::RenderPass, ResourceKind::ImageView(i)],
            )?;
        }

        check_image_counts(
            swapchain.images().len(),
            swapchain.image_views().len(),
            this.framebuffers.len(),
        )?;

        Ok(this)
    }

    pub fn handles(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        for (i, &framebuffer) in self.framebuffers.iter().enumerate().rev() {
            unsafe { self.device.raw().destroy_framebuffer(framebuffer, None) };
            self.device.track_destroyed(ResourceKind::Framebuffer(i));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_attachment_clears_stores_and_ends_presentable() {
        let attachment = color_attachment(vk::Format::B8G8R8A8_UNORM);
        assert_eq!(attachment.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(attachment.samples, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn matching_counts_pass() {
        assert_eq!(check_image_counts(3, 3, 3).unwrap(), 3);
    }

    #[test]
    fn mismatched_counts_are_reported() {
        assert!(matches!(
            check_image_counts(3, 3, 2),
            Err(RendererError::ImageCountMismatch {
                images: 3,
                views: 3,
                framebuffers: 2
            })
        ));
        assert!(check_image_counts(2, 3, 3).is_err());
    }
}
