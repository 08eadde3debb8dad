// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, physical device and logical device. Everything the frame
//! core borrows and never destroys lives here.
use std::ffi::{c_void, CStr};

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"vesper";
const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// One family does both; swapchain images need no sharing.
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

pub struct VkContext {
    pub entry: Entry,
    pub instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub phys: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else {
        debug!("[vulkan] {msg}");
    }
    vk::FALSE
}

impl VkContext {
    /// # Safety
    /// `window` and `display` must outlive the returned context.
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        validation: bool,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let entry = Entry::linked();
        let validation = validation && has_validation_layer(&entry);
        let instance = create_instance(&entry, dh, validation).context("create_instance")?;

        let debug = if validation {
            match create_debug_messenger(&entry, &instance) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match ash_window::create_surface(&entry, &instance, dh, wh, None) {
            Ok(s) => s,
            Err(e) => {
                destroy_instance(&instance, debug);
                return Err(e).context("ash_window::create_surface");
            }
        };

        let picked = pick_device(&instance, &surface_loader, surface)
            .and_then(|(phys, families)| {
                create_device(&instance, phys, families).map(|d| (phys, families, d))
            });
        let (phys, families, device) = match picked {
            Ok(p) => p,
            Err(e) => {
                surface_loader.destroy_surface(surface, None);
                destroy_instance(&instance, debug);
                return Err(e);
            }
        };

        let graphics_queue = device.get_device_queue(families.graphics, 0);
        let present_queue = device.get_device_queue(families.present, 0);

        let props = instance.get_physical_device_properties(phys);
        let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
        info!(
            "device: {} ({:?}) graphics_family={} present_family={} validation={}",
            name, props.device_type, families.graphics, families.present, validation
        );

        Ok(VkContext {
            entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys,
            families,
            device,
            graphics_queue,
            present_queue,
        })
    }

    /// The depth format the render pass and every chain's depth image use.
    pub fn depth_format(&self) -> Result<vk::Format> {
        let format = first_depth_format(|f| unsafe {
            self.instance
                .get_physical_device_format_properties(self.phys, f)
                .optimal_tiling_features
        })
        .ok_or_else(|| anyhow!("no depth attachment format with optimal tiling"))?;
        debug!("depth format {:?}", format);
        Ok(format)
    }
}

fn first_depth_format(
    features: impl Fn(vk::Format) -> vk::FormatFeatureFlags,
) -> Option<vk::Format> {
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&f| features(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
}

impl Drop for VkContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            destroy_instance(&self.instance, self.debug.take());
        }
    }
}

unsafe fn destroy_instance(
    instance: &Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
) {
    if let Some((loader, messenger)) = debug {
        loader.destroy_debug_utils_messenger(messenger, None);
    }
    instance.destroy_instance(None);
}

fn has_validation_layer(entry: &Entry) -> bool {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    let found = layers
        .iter()
        .any(|l| l.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
    if !found {
        warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
    }
    found
}

unsafe fn create_instance(
    entry: &Entry,
    display: RawDisplayHandle,
    validation: bool,
) -> Result<Instance> {
    let app_info = vk::ApplicationInfo::default()
        .application_name(APP_NAME)
        .engine_name(APP_NAME)
        .api_version(vk::API_VERSION_1_1);

    let mut extensions = ash_window::enumerate_required_extensions(display)
        .context("enumerate_required_extensions")?
        .to_vec();
    let mut layers = Vec::new();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);
    Ok(entry.create_instance(&create_info, None)?)
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));
    let messenger = loader.create_debug_utils_messenger(&info, None)?;
    Ok((loader, messenger))
}

/// First device with graphics, present and `VK_KHR_swapchain`; discrete GPUs win ties.
unsafe fn pick_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let mut best: Option<(vk::PhysicalDevice, QueueFamilies, bool)> = None;
    for phys in instance.enumerate_physical_devices()? {
        if !supports_swapchain(instance, phys) {
            continue;
        }
        let Some(families) = find_families(instance, surface_loader, surface, phys) else {
            continue;
        };
        let discrete = instance.get_physical_device_properties(phys).device_type
            == vk::PhysicalDeviceType::DISCRETE_GPU;
        if best.map_or(true, |(_, _, d)| discrete && !d) {
            best = Some((phys, families, discrete));
        }
    }
    best.map(|(phys, families, _)| (phys, families))
        .ok_or_else(|| anyhow!("no physical device can present to this surface"))
}

unsafe fn supports_swapchain(instance: &Instance, phys: vk::PhysicalDevice) -> bool {
    instance
        .enumerate_device_extension_properties(phys)
        .unwrap_or_default()
        .iter()
        .any(|e| e.extension_name_as_c_str() == Ok(swapchain::NAME))
}

/// Prefers a single family that does both.
unsafe fn find_families(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Option<QueueFamilies> {
    let props = instance.get_physical_device_queue_family_properties(phys);
    let mut graphics = None;
    let mut present = None;
    for (i, q) in props.iter().enumerate() {
        let i = i as u32;
        let gfx = q.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let pres = surface_loader
            .get_physical_device_surface_support(phys, i, surface)
            .unwrap_or(false);
        if gfx && pres {
            return Some(QueueFamilies {
                graphics: i,
                present: i,
            });
        }
        if gfx && graphics.is_none() {
            graphics = Some(i);
        }
        if pres && present.is_none() {
            present = Some(i);
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&priorities)
        })
        .collect();
    let extensions = [swapchain::NAME.as_ptr()];
    let info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions);
    instance
        .create_device(phys, &info, None)
        .context("create_device")
}
