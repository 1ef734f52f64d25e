//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::command::{begin_command_buffer, end_command_buffer};
use crate::error::{GpuError, Result};
use crate::instance::{
    create_debug_messenger, create_instance, required_device_extensions, select_physical_device,
    DebugMessenger,
};
use crate::memory::GpuAllocator;
use crate::wsi::Wsi;
use ash::vk;
use parking_lot::Mutex;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
///
/// Shared as `Arc<GpuContext>`. Every GPU object created by the engine keeps
/// a clone, so the device is torn down only after everything built on it.
/// The window behind the surface is held here too and released after the
/// surface is destroyed.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) debug: Option<DebugMessenger>,
    pub(crate) surface_loader: ash::khr::surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,
    pub(crate) queue_family: u32,
    /// The single graphics+present queue. All submissions go through this lock.
    pub(crate) queue: Mutex<vk::Queue>,
    /// Transient pool for one-shot command buffers, guarded with the queue.
    pub(crate) transient_pool: Mutex<vk::CommandPool>,
    // Must stay the last field: dropped after `Drop::drop` destroys the surface.
    pub(crate) wsi: Arc<dyn Wsi>,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// The presentation surface.
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Surface extension loader.
    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    /// Swapchain extension loader.
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// The window system the surface was created from.
    pub fn wsi(&self) -> &Arc<dyn Wsi> {
        &self.wsi
    }

    /// Index of the graphics+present queue family.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Submit work to the queue.
    ///
    /// # Safety
    /// All handles referenced by `submits` must be valid and `fence` must be
    /// unsignaled (or null).
    pub unsafe fn submit(&self, submits: &[vk::SubmitInfo<'_>], fence: vk::Fence) -> Result<()> {
        let queue = self.queue.lock();
        self.device.queue_submit(*queue, submits, fence)?;
        Ok(())
    }

    /// Present a swapchain image.
    ///
    /// Returns `true` when the swapchain is out of date or suboptimal.
    ///
    /// # Safety
    /// All handles referenced by `present_info` must be valid.
    pub unsafe fn present(&self, present_info: &vk::PresentInfoKHR<'_>) -> Result<bool> {
        let queue = self.queue.lock();
        match self.swapchain_loader.queue_present(*queue, present_info) {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Record and synchronously execute a one-shot command buffer.
    ///
    /// Used for uploads outside the per-frame submission path. Blocks until
    /// the queue is idle.
    pub fn one_shot<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let pool = self.transient_pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        unsafe {
            let cmd = self.device.allocate_command_buffers(&alloc_info)?[0];

            let result = (|| -> Result<()> {
                begin_command_buffer(
                    &self.device,
                    cmd,
                    vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                )?;
                record(&self.device, cmd);
                end_command_buffer(&self.device, cmd)?;

                let cmd_buffers = [cmd];
                let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
                let queue = self.queue.lock();
                self.device
                    .queue_submit(*queue, &[submit_info], vk::Fence::null())?;
                self.device.queue_wait_idle(*queue)?;
                Ok(())
            })();

            self.device.free_command_buffers(*pool, &[cmd]);
            result
        }
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        // Holding the queue lock keeps other submitters out while we drain.
        let _queue = self.queue.lock();
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            self.device
                .destroy_command_pool(*self.transient_pool.get_mut(), None);

            // Shutdown allocator BEFORE destroying device
            // This frees all VkDeviceMemory allocations
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        tracing::info!("GPU context destroyed");
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Ember".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context on `wsi`'s surface.
    ///
    /// Every failure here is fatal; there is no retry. Objects created
    /// before the failing step are destroyed again, newest first.
    pub fn build(self, wsi: Arc<dyn Wsi>) -> Result<Arc<GpuContext>> {
        let entry =
            unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let (instance, validation) =
            unsafe { create_instance(&entry, &self.app_name, self.enable_validation, wsi.as_ref()) }?;
        let instance_guard = Rollback::new({
            let instance = instance.clone();
            move || unsafe { instance.destroy_instance(None) }
        });

        let debug = if validation {
            match unsafe { create_debug_messenger(&entry, &instance) } {
                Ok(debug) => Some(debug),
                Err(e) => {
                    tracing::warn!("Debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };
        let debug_guard = Rollback::new({
            let messenger = debug.as_ref().map(|debug| debug.messenger);
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            move || {
                if let Some(messenger) = messenger {
                    unsafe { loader.destroy_debug_utils_messenger(messenger, None) };
                }
            }
        });

        let surface = unsafe { wsi.create_surface(&entry, &instance) }?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let surface_guard = Rollback::new({
            let loader = ash::khr::surface::Instance::new(&entry, &instance);
            move || unsafe { loader.destroy_surface(surface, None) }
        });

        let selected =
            unsafe { select_physical_device(&instance, &surface_loader, surface, wsi.as_ref()) }?;

        tracing::info!("Selected GPU: {}", selected.capabilities.summary());

        let device = unsafe {
            create_device(
                &instance,
                selected.physical_device,
                selected.queue_family,
                &selected.capabilities,
            )?
        };
        let device_guard = Rollback::new({
            let device = device.clone();
            move || unsafe { device.destroy_device(None) }
        });
        let queue = unsafe { device.get_device_queue(selected.queue_family, 0) };

        // Declared after the device guard, so an early return frees it
        // before the device is destroyed.
        let allocator =
            unsafe { GpuAllocator::new(&instance, &device, selected.physical_device) }?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(selected.queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let transient_pool = unsafe { device.create_command_pool(&pool_info, None)? };

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        device_guard.disarm();
        surface_guard.disarm();
        debug_guard.disarm();
        instance_guard.disarm();

        Ok(Arc::new(GpuContext {
            entry,
            instance,
            debug,
            surface_loader,
            surface,
            physical_device: selected.physical_device,
            device,
            swapchain_loader,
            capabilities: selected.capabilities,
            allocator: Mutex::new(allocator),
            queue_family: selected.queue_family,
            queue: Mutex::new(queue),
            transient_pool: Mutex::new(transient_pool),
            wsi,
        }))
    }
}

/// Runs an undo action on drop unless disarmed.
///
/// Guards created in order unwind in reverse, so a failed bootstrap tears
/// down newest objects first.
struct Rollback<F: FnOnce()> {
    undo: Option<F>,
}

impl<F: FnOnce()> Rollback<F> {
    fn new(undo: F) -> Self {
        Self { undo: Some(undo) }
    }

    /// Keep the object; the undo action never runs.
    fn disarm(mut self) {
        self.undo = None;
    }
}

impl<F: FnOnce()> Drop for Rollback<F> {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo();
        }
    }
}

/// Create the logical device.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    capabilities: &GpuCapabilities,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority))];

    let mut extensions: Vec<&CStr> = required_device_extensions();
    for ext in &extensions {
        if !capabilities.has_extension(ext) {
            return Err(GpuError::ExtensionNotSupported(
                ext.to_string_lossy().into_owned(),
            ));
        }
    }
    // Devices advertising the portability subset must have it enabled
    if capabilities.has_extension(ash::khr::portability_subset::NAME)
        && !extensions.contains(&ash::khr::portability_subset::NAME)
    {
        extensions.push(ash::khr::portability_subset::NAME);
    }
    let extension_names: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let features = vk::PhysicalDeviceFeatures::default()
        .wide_lines(capabilities.wide_lines)
        .fill_mode_non_solid(capabilities.fill_mode_non_solid)
        .sampler_anisotropy(capabilities.max_anisotropy.is_some());

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_3_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_shareable<T: Send + Sync>() {}

    #[test]
    fn rollback_unwinds_newest_first() {
        let log = std::cell::RefCell::new(Vec::new());
        {
            let _instance = Rollback::new(|| log.borrow_mut().push("instance"));
            let _surface = Rollback::new(|| log.borrow_mut().push("surface"));
            let _device = Rollback::new(|| log.borrow_mut().push("device"));
        }
        assert_eq!(*log.borrow(), ["device", "surface", "instance"]);
    }

    #[test]
    fn disarmed_rollback_keeps_the_object() {
        let log = std::cell::RefCell::new(Vec::new());
        let result: std::result::Result<(), &str> = (|| {
            let instance = Rollback::new(|| log.borrow_mut().push("instance"));
            let surface = Rollback::new(|| log.borrow_mut().push("surface"));
            surface.disarm();
            instance.disarm();
            Ok(())
        })();
        assert!(result.is_ok());
        assert!(log.borrow().is_empty());

        // A failure after some steps only undoes those steps.
        let failed: std::result::Result<(), &str> = (|| {
            let _instance = Rollback::new(|| log.borrow_mut().push("instance"));
            let _surface = Rollback::new(|| log.borrow_mut().push("surface"));
            Err("no suitable device")
        })();
        assert!(failed.is_err());
        assert_eq!(*log.borrow(), ["surface", "instance"]);
    }

    #[test]
    fn context_holding_the_window_is_shareable() {
        assert_shareable::<Arc<dyn Wsi>>();
        assert_shareable::<GpuContext>();
        assert_shareable::<crate::resource::Owned<vk::Semaphore>>();
    }
}
