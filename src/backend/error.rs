// Renderer error taxonomy
//
// Construction-phase failures are fatal and travel up to main as
// anyhow::Error; these variants let callers (and tests) tell them apart.

use ash::vk;
use thiserror::Error;

use super::lifetime::LifetimeError;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("no physical device offers a {required:?} queue family and presentation to the surface")]
    NoSuitableDevice { required: vk::QueueFlags },

    #[error("presentation surface was lost")]
    SurfaceLost,

    #[error("surface reports no formats")]
    NoCompatibleFormat,

    #[error("surface reports no present modes")]
    NoPresentMode,

    #[error("swapchain has {images} images but {views} views and {framebuffers} framebuffers")]
    ImageCountMismatch {
        images: usize,
        views: usize,
        framebuffers: usize,
    },

    #[error("image index {index} is outside the {count}-image swapchain")]
    ImageIndexOutOfRange { index: u32, count: usize },

    #[error("command buffer for image {index} was recorded against a different swapchain")]
    StaleRecording { index: u32 },

    #[error("previous frame stopped in state {state:?}")]
    FrameInterrupted { state: super::frame::FrameState },

    #[error("swapchain is out of date")]
    SwapchainOutOfDate,

    #[error(transparent)]
    Lifetime(#[from] LifetimeError),

    #[error("{call} failed: {result}")]
    Vulkan { call: &'static str, result: vk::Result },
}

impl RendererError {
    /// Classify a raw result, keeping surface loss distinguishable
    pub fn vulkan(call: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SwapchainOutOfDate,
            result => Self::Vulkan { call, result },
        }
    }
}

/// Shorthand for `map_err(|e| RendererError::vulkan(call, e))`
pub trait VkResultExt<T> {
    fn or_vk(self, call: &'static str) -> Result<T, RendererError>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn or_vk(self, call: &'static str) -> Result<T, RendererError> {
        self.map_err(|result| RendererError::vulkan(call, result))
    }
}
