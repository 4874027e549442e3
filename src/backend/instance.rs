// Vulkan Instance - explicit owner of the API entry point
//
// Responsibilities:
// - Instance creation with the window system's surface extensions
// - Optional validation layer + debug messenger
// - The lifetime ledger every other owner reports to
//
// Everything created later holds an Arc<Instance>, so the instance is the
// last object to go.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use parking_lot::Mutex;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use super::error::RendererError;
use super::lifetime::{LifetimeLedger, ResourceKind};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    surface_loader: ash::khr::surface::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    ledger: Mutex<LifetimeLedger>,
}

impl Instance {
    /// Create the Vulkan instance
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `display_handle` - Decides which surface extensions are enabled
    /// * `enable_validation` - Request validation layer and debug messenger
    pub fn new(
        app_name: &str,
        display_handle: RawDisplayHandle,
        enable_validation: bool,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let validation = enable_validation && Self::validation_available(&entry);
        if enable_validation && !validation {
            log::warn!("Validation requested but layer or debug utils extension is missing");
        }

        let instance = Self::create_instance(&entry, app_name, display_handle, validation)?;

        let mut ledger = LifetimeLedger::new();
        ledger.created(ResourceKind::Instance, &[])?;

        let debug_utils = if validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(debug_utils) => {
                    ledger.created(ResourceKind::DebugMessenger, &[ResourceKind::Instance])?;
                    Some(debug_utils)
                }
                // Diagnostics only, never worth aborting over
                Err(e) => {
                    log::warn!("Debug messenger unavailable: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        Ok(Arc::new(Self {
            entry,
            instance,
            surface_loader,
            debug_utils,
            ledger: Mutex::new(ledger),
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        display_handle: RawDisplayHandle,
        validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"triangle-renderer";

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display_handle)
                .context("Window system has no Vulkan surface support")?
                .to_vec();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layer_names = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn validation_available(entry: &Entry) -> bool {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
        let has_layer = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

        let extensions =
            unsafe { entry.enumerate_instance_extension_properties(None) }.unwrap_or_default();
        let has_debug_utils = extensions.iter().any(|ext| {
            (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }) == ash::ext::debug_utils::NAME
        });

        has_layer && has_debug_utils
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    /// Register a freshly created object. Fails if a dependency is gone or a
    /// singular object (e.g. the logical device) already exists.
    pub fn track_created(
        &self,
        kind: ResourceKind,
        depends_on: &[ResourceKind],
    ) -> Result<(), RendererError> {
        self.ledger.lock().created(kind, depends_on)?;
        log::trace!("Created {}", kind);
        Ok(())
    }

    /// Called from Drop impls, so violations are logged rather than returned
    pub fn track_destroyed(&self, kind: ResourceKind) {
        if let Err(e) = self.ledger.lock().destroyed(kind) {
            log::error!("Teardown order violated: {}", e);
        }
        log::trace!("Destroyed {}", kind);
    }

    /// Objects that are still alive, narrowest lifetime first
    pub fn live_objects(&self) -> Vec<ResourceKind> {
        self.ledger.lock().teardown_order()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");

        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
                self.track_destroyed(ResourceKind::DebugMessenger);
            }
        }

        let leaked: Vec<_> = self
            .live_objects()
            .into_iter()
            .filter(|&kind| kind != ResourceKind::Instance)
            .collect();
        if !leaked.is_empty() {
            log::error!("Instance destroyed while objects are alive: {:?}", leaked);
        }
        self.track_destroyed(ResourceKind::Instance);

        unsafe { self.instance.destroy_instance(None) };
    }
}

// Debug callback for validation layers. Logs and never alters control flow.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
