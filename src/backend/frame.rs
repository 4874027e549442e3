// Per-frame protocol
//
//   wait in_flight -> acquire (signal image_available) -> reset in_flight
//   -> submit (wait image_available, signal render_finished + in_flight)
//   -> present (wait render_finished)
//
// The Vulkan calls sit behind `FrameBackend` so the ordering can be checked
// without a GPU.

use ash::vk;

use super::commands::RecordedFrames;
use super::device::Device;
use super::error::{RendererError, VkResultExt};
use super::swapchain::Swapchain;
use super::sync::FrameSyncHandles;

/// Where the single frame slot is in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquired { image_index: u32 },
    Submitted { image_index: u32 },
}

/// The GPU side of one frame
pub trait FrameBackend {
    fn wait_for_frame_slot(&mut self, fence: vk::Fence) -> Result<(), RendererError>;

    /// Returns the image index and whether the swapchain is suboptimal
    fn acquire_image(&mut self, signal: vk::Semaphore) -> Result<(u32, bool), RendererError>;

    fn reset_frame_slot(&mut self, fence: vk::Fence) -> Result<(), RendererError>;

    fn submit(
        &mut self,
        image_index: u32,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(), RendererError>;

    /// Returns whether the swapchain is suboptimal
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool, RendererError>;
}

pub struct FrameLoop {
    sync: FrameSyncHandles,
    state: FrameState,
    interrupted: bool,
    suboptimal_reported: bool,
    frames_presented: u64,
}

impl FrameLoop {
    pub fn new(sync: FrameSyncHandles) -> Self {
        Self {
            sync,
            state: FrameState::Idle,
            interrupted: false,
            suboptimal_reported: false,
            frames_presented: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Run one full frame. On failure the loop keeps the state it reached and
    /// every later call returns `FrameInterrupted`.
    pub fn render_frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<u32, RendererError> {
        if self.interrupted || self.state != FrameState::Idle {
            return Err(RendererError::FrameInterrupted { state: self.state });
        }

        let result = self.advance(backend);
        if result.is_err() {
            self.interrupted = true;
        }
        result
    }

    fn advance<B: FrameBackend>(&mut self, backend: &mut B) -> Result<u32, RendererError> {
        let FrameSyncHandles {
            image_available,
            render_finished,
            in_flight,
        } = self.sync;

        // The previous submit must be done with the semaphores and buffers
        backend.wait_for_frame_slot(in_flight)?;

        let (image_index, suboptimal) = backend.acquire_image(image_available)?;
        self.state = FrameState::Acquired { image_index };
        self.note_suboptimal(suboptimal);

        // Reset only once a submit that signals it is certain to follow
        backend.reset_frame_slot(in_flight)?;
        backend.submit(image_index, image_available, render_finished, in_flight)?;
        self.state = FrameState::Submitted { image_index };

        let suboptimal = backend.present(image_index, render_finished)?;
        self.note_suboptimal(suboptimal);
        self.state = FrameState::Idle;
        self.frames_presented += 1;

        Ok(image_index)
    }

    fn note_suboptimal(&mut self, suboptimal: bool) {
        if suboptimal && !self.suboptimal_reported {
            log::warn!("Swapchain is suboptimal for the surface; continuing without recreation");
            self.suboptimal_reported = true;
        }
    }
}

/// `FrameBackend` over the live device, swapchain and recorded commands
pub struct SwapchainFrameBackend<'a> {
    pub device: &'a Device,
    pub swapchain: &'a Swapchain,
    pub frames: &'a RecordedFrames,
}

impl FrameBackend for SwapchainFrameBackend<'_> {
    fn wait_for_frame_slot(&mut self, fence: vk::Fence) -> Result<(), RendererError> {
        unsafe { self.device.raw().wait_for_fences(&[fence], true, u64::MAX) }
            .or_vk("vkWaitForFences")
    }

    fn acquire_image(&mut self, signal: vk::Semaphore) -> Result<(u32, bool), RendererError> {
        self.swapchain.acquire_next_image(signal)
    }

    fn reset_frame_slot(&mut self, fence: vk::Fence) -> Result<(), RendererError> {
        unsafe { self.device.raw().reset_fences(&[fence]) }.or_vk("vkResetFences")
    }

    fn submit(
        &mut self,
        image_index: u32,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(), RendererError> {
        let frame = self.frames.for_image(image_index, &self.swapchain.target())?;

        let wait_semaphores = [wait];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [signal];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .raw()
                .queue_submit(self.device.graphics_queue(), &[submit_info], fence)
        }
        .or_vk("vkQueueSubmit")
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool, RendererError> {
        self.swapchain
            .present(self.device.present_queue(), image_index, &[wait])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(vk::Fence),
        Acquire(vk::Semaphore),
        Reset(vk::Fence),
        Submit {
            image_index: u32,
            wait: vk::Semaphore,
            signal: vk::Semaphore,
            fence: vk::Fence,
        },
        Present {
            image_index: u32,
            wait: vk::Semaphore,
        },
    }

    #[derive(Default)]
    struct MockBackend {
        calls: Vec<Call>,
        next_image: u32,
        suboptimal: bool,
        fail_acquire: Option<vk::Result>,
        fail_present: Option<vk::Result>,
    }

    impl FrameBackend for MockBackend {
        fn wait_for_frame_slot(&mut self, fence: vk::Fence) -> Result<(), RendererError> {
            self.calls.push(Call::Wait(fence));
            Ok(())
        }

        fn acquire_image(&mut self, signal: vk::Semaphore) -> Result<(u32, bool), RendererError> {
            self.calls.push(Call::Acquire(signal));
            match self.fail_acquire {
                Some(result) => Err(RendererError::vulkan("vkAcquireNextImageKHR", result)),
                None => Ok((self.next_image, self.suboptimal)),
            }
        }

        fn reset_frame_slot(&mut self, fence: vk::Fence) -> Result<(), RendererError> {
            self.calls.push(Call::Reset(fence));
            Ok(())
        }

        fn submit(
            &mut self,
            image_index: u32,
            wait: vk::Semaphore,
            signal: vk::Semaphore,
            fence: vk::Fence,
        ) -> Result<(), RendererError> {
            self.calls.push(Call::Submit {
                image_index,
                wait,
                signal,
                fence,
            });
            Ok(())
        }

        fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool, RendererError> {
            self.calls.push(Call::Present { image_index, wait });
            match self.fail_present {
                Some(result) => Err(RendererError::vulkan("vkQueuePresentKHR", result)),
                None => Ok(self.suboptimal),
            }
        }
    }

    fn sync() -> FrameSyncHandles {
        FrameSyncHandles {
            image_available: vk::Semaphore::from_raw(1),
            render_finished: vk::Semaphore::from_raw(2),
            in_flight: vk::Fence::from_raw(3),
        }
    }

    #[test]
    fn frame_follows_the_protocol_order() {
        let s = sync();
        let mut frame_loop = FrameLoop::new(s);
        let mut backend = MockBackend {
            next_image: 2,
            ..Default::default()
        };

        assert_eq!(frame_loop.render_frame(&mut backend).unwrap(), 2);
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(s.in_flight),
                Call::Acquire(s.image_available),
                Call::Reset(s.in_flight),
                Call::Submit {
                    image_index: 2,
                    wait: s.image_available,
                    signal: s.render_finished,
                    fence: s.in_flight,
                },
                Call::Present {
                    image_index: 2,
                    wait: s.render_finished,
                },
            ]
        );
        assert_eq!(frame_loop.state(), FrameState::Idle);
        assert_eq!(frame_loop.frames_presented(), 1);
    }

    #[test]
    fn consecutive_frames_wait_on_the_fence_first() {
        let mut frame_loop = FrameLoop::new(sync());
        let mut backend = MockBackend::default();

        frame_loop.render_frame(&mut backend).unwrap();
        backend.calls.clear();
        backend.next_image = 1;
        frame_loop.render_frame(&mut backend).unwrap();

        assert_eq!(backend.calls[0], Call::Wait(sync().in_flight));
        assert_eq!(frame_loop.frames_presented(), 2);
    }

    #[test]
    fn failed_acquire_leaves_the_fence_signalled() {
        let mut frame_loop = FrameLoop::new(sync());
        let mut backend = MockBackend {
            fail_acquire: Some(vk::Result::ERROR_OUT_OF_DATE_KHR),
            ..Default::default()
        };

        assert!(matches!(
            frame_loop.render_frame(&mut backend),
            Err(RendererError::SwapchainOutOfDate)
        ));
        assert!(!backend.calls.iter().any(|c| matches!(c, Call::Reset(_))));
    }

    #[test]
    fn interrupted_frame_rejects_further_calls() {
        let mut frame_loop = FrameLoop::new(sync());
        let mut backend = MockBackend {
            next_image: 1,
            fail_present: Some(vk::Result::ERROR_SURFACE_LOST_KHR),
            ..Default::default()
        };

        assert!(matches!(
            frame_loop.render_frame(&mut backend),
            Err(RendererError::SurfaceLost)
        ));
        assert_eq!(frame_loop.state(), FrameState::Submitted { image_index: 1 });

        backend.calls.clear();
        backend.fail_present = None;
        assert!(matches!(
            frame_loop.render_frame(&mut backend),
            Err(RendererError::FrameInterrupted {
                state: FrameState::Submitted { image_index: 1 }
            })
        ));
        assert!(backend.calls.is_empty());
        assert_eq!(frame_loop.frames_presented(), 0);
    }

    #[test]
    fn suboptimal_frames_still_present() {
        let mut frame_loop = FrameLoop::new(sync());
        let mut backend = MockBackend {
            suboptimal: true,
            ..Default::default()
        };

        frame_loop.render_frame(&mut backend).unwrap();
        frame_loop.render_frame(&mut backend).unwrap();
        assert_eq!(frame_loop.frames_presented(), 2);
    }
}
