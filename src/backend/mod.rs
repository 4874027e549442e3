// Backend module - Vulkan abstraction layer
//
// Each Vulkan object has one owner type that destroys it on drop and holds
// an Arc to whatever it was created from.

pub mod commands;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod lifetime;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use commands::CommandRecordings;
pub use device::Device;
pub use frame::{FrameLoop, SwapchainFrameBackend};
pub use instance::Instance;
pub use pipeline::{Framebuffers, GraphicsPipeline, RenderPass};
pub use shader::ShaderBlobs;
pub use surface::Surface;
pub use swapchain::Swapchain;
pub use sync::FrameSync;
