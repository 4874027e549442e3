// =============================================================================
// VULKAN TRIANGLE
// =============================================================================
//
// Opens one window and draws a static triangle into it with Vulkan until the
// window is closed or Escape is pressed.
//
// STARTUP:
// 1. Load config.toml (optional) and initialize logging
// 2. Load the SPIR-V shaders (before any window exists)
// 3. Create a hidden window, build the renderer, then show the window
//
// Any startup failure is logged and returned from main, so the process exits
// non-zero without ever showing a window.
//
// =============================================================================

mod backend;
mod config;
mod renderer;

use anyhow::{Context, Result};
use ash::vk;
use backend::ShaderBlobs;
use config::Config;
use renderer::Renderer;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};

fn main() -> Result<()> {
    let (config, config_error) = Config::load();

    init_logging(&config);
    if let Some(e) = config_error {
        log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
    }
    log::info!(
        "Window: {}x{} \"{}\"",
        config.window.width,
        config.window.height,
        config.window.title
    );

    let shaders = ShaderBlobs::load(&config.shaders)?;

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config, shaders);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// RUST_LOG wins over the configured level
fn init_logging(config: &Config) {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.debug.log_level.as_str()),
    )
    .init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters: the renderer owns the surface, which must go before
/// the window it was created for.
struct App {
    config: Config,
    shaders: ShaderBlobs,
    renderer: Option<Renderer>,
    window: Option<Window>,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config, shaders: ShaderBlobs) -> Self {
        Self {
            config,
            shaders,
            renderer: None,
            window: None,
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false)
            .with_visible(false);

        let window = event_loop
            .create_window(attributes)
            .context("Failed to create window")?;

        let size = window.inner_size();
        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };

        let renderer = Renderer::new(&window, extent, &self.config, &self.shaders)
            .context("Failed to initialize Vulkan")?;

        // Nothing is shown until there is something to draw
        window.set_visible(true);

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.fatal.is_some() {
            return;
        }

        if let Err(e) = self.init(event_loop) {
            log::error!("{:#}", e);
            self.fatal = Some(e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            WindowEvent::Resized(size) => {
                log::warn!(
                    "Window resized to {}x{}; resizing is not supported, the swapchain keeps its initial size",
                    size.width,
                    size.height
                );
            }

            WindowEvent::RedrawRequested => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.draw_frame();
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        let drawing = self.renderer.as_ref().is_some_and(|r| !r.is_halted());
        if let (true, Some(window)) = (drawing, self.window.as_ref()) {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Tear down Vulkan while the window still exists
        if let Some(renderer) = self.renderer.take() {
            log::info!("Presented {} frames", renderer.frames_presented());
        }
        log::info!("Cleanup complete");
    }
}
