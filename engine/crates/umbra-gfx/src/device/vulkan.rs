//! 基于 ash 的设备实现
//!
//! 描述符堆映射到 `VK_EXT_descriptor_buffer`：
//! - 每个堆是一块 host visible 的 descriptor buffer，CPU handle 是映射后的地址，GPU handle 是 buffer device address
//! - 描述符通过 `vkGetDescriptorEXT` 直接写进映射的内存
//! - 每个描述符占一个 stride，stride 按 `descriptorBufferOffsetAlignment` 对齐，
//!   因此任意一个描述符的地址都可以作为 descriptor set 的 offset
//!
//! root signature 中的每个描述符都是一个单独的 descriptor set（只有 binding 0），
//! 规则见 [`GfxRootSignatureDesc::descriptor_sets`]，shader 需要按这个规则声明绑定。
//! null UAV 依赖 `VK_EXT_robustness2` 的 `nullDescriptor`。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::mem::ManuallyDrop;

use ash::prelude::VkResult;
use ash::vk;
use itertools::Itertools;
use vk_mem::Alloc;

use crate::commands::barrier::GfxImageBarrier;
use crate::commands::vk_command_list::VkCommandList;
use crate::descriptors::heap::{
    GfxDescriptorHeapBase, GfxDescriptorHeapDesc, GfxDescriptorHeapType, MAX_DESCRIPTOR_HEAP_CAPACITY,
};
use crate::descriptors::view::{GfxCpuDescriptorHandle, GfxDescriptorView, GfxGpuDescriptorHandle};
use crate::device::GfxDevice;
use crate::error::{GfxError, GfxResult};
use crate::pipelines::compute_pipeline::GfxComputePipelineDesc;
use crate::resources::resource::GfxTextureDesc;
use crate::resources::state::GfxResourceState;

/// descriptor buffer 相关的设备属性
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxDescriptorBufferProps {
    pub sampled_image_descriptor_size: usize,
    pub storage_image_descriptor_size: usize,
    pub sampler_descriptor_size: usize,
    pub offset_alignment: vk::DeviceSize,
    pub max_resource_range: vk::DeviceSize,
    pub max_sampler_range: vk::DeviceSize,
}
impl GfxDescriptorBufferProps {
    fn from_vk(props: &vk::PhysicalDeviceDescriptorBufferPropertiesEXT) -> Self {
        Self {
            sampled_image_descriptor_size: props.sampled_image_descriptor_size,
            storage_image_descriptor_size: props.storage_image_descriptor_size,
            sampler_descriptor_size: props.sampler_descriptor_size,
            offset_alignment: props.descriptor_buffer_offset_alignment,
            max_resource_range: props.max_resource_descriptor_buffer_range,
            max_sampler_range: props.max_sampler_descriptor_buffer_range,
        }
    }

    /// SRV 和 UAV 共用一个 stride，取两者中较大的一个
    pub fn stride(&self, heap_type: GfxDescriptorHeapType) -> u32 {
        let size = match heap_type {
            GfxDescriptorHeapType::CbvSrvUav => self.sampled_image_descriptor_size.max(self.storage_image_descriptor_size),
            GfxDescriptorHeapType::Sampler => self.sampler_descriptor_size,
        };
        (size as u64).next_multiple_of(self.offset_alignment.max(1)) as u32
    }

    pub fn max_capacity(&self, heap_type: GfxDescriptorHeapType) -> u32 {
        let range = match heap_type {
            GfxDescriptorHeapType::CbvSrvUav => self.max_resource_range,
            GfxDescriptorHeapType::Sampler => self.max_sampler_range,
        };
        (range / self.stride(heap_type).max(1) as u64).min(MAX_DESCRIPTOR_HEAP_CAPACITY as u64) as u32
    }
}

struct GfxVulkanHeap {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct GfxViewKey {
    format: vk::Format,
    base_mip: u32,
    level_count: u32,
}

struct GfxVulkanTexture {
    allocation: vk_mem::Allocation,
    usage: vk::ImageUsageFlags,
    /// 按需创建的 image view，和纹理一起销毁
    views: HashMap<GfxViewKey, vk::ImageView>,
}

/// 一个 compute pipeline 拥有的所有 Vulkan 对象，销毁 null handle 是合法的
#[derive(Default)]
struct GfxVulkanPipelineObjects {
    set_layouts: Vec<vk::DescriptorSetLayout>,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}
impl GfxVulkanPipelineObjects {
    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            for set_layout in &self.set_layouts {
                device.destroy_descriptor_set_layout(*set_layout, None);
            }
        }
    }
}

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源，调用前 GPU 需要空闲。
pub struct GfxVulkanDevice {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    descriptor_buffer: ash::ext::descriptor_buffer::Device,
    /// instance 不支持 `VK_EXT_debug_utils` 时为 `None`
    debug_utils: Option<ash::ext::debug_utils::Device>,
    /// 需要在 device 之前销毁
    allocator: ManuallyDrop<vk_mem::Allocator>,

    queue: vk::Queue,
    queue_family_index: u32,
    command_pool: vk::CommandPool,

    props: GfxDescriptorBufferProps,
    max_push_constants_size: u32,

    /// key 是堆的 CPU 基地址
    heaps: RefCell<HashMap<u64, GfxVulkanHeap>>,
    textures: RefCell<HashMap<vk::Image, GfxVulkanTexture>>,
    pipelines: RefCell<HashMap<vk::Pipeline, GfxVulkanPipelineObjects>>,

    device_lost: Cell<bool>,
    destroyed: bool,

    /// drop 之后会卸载 dll，因此需要放在最后
    _entry: ash::Entry,
}
// new & init
impl GfxVulkanDevice {
    /// 选择支持 `VK_EXT_descriptor_buffer` 的 GPU（优先独立显卡）并创建设备
    pub fn new(app_name: &str) -> GfxResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|err| {
            log::error!("failed to load vulkan: {}", err);
            GfxError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)
        })?;
        let (instance, debug_utils_enabled) = Self::create_instance(&entry, app_name)?;

        let (physical_device, queue_family_index) = match Self::pick_physical_device(&instance) {
            Ok(picked) => picked,
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err);
            }
        };
        let (props, max_push_constants_size) = Self::query_props(&instance, physical_device);
        log::info!("descriptor buffer props: {:#?}", props);

        let device = match Self::create_device(&instance, physical_device, queue_family_index) {
            Ok(device) => device,
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err);
            }
        };

        let mut allocator_ci = vk_mem::AllocatorCreateInfo::new(&instance, &device, physical_device);
        allocator_ci.vulkan_api_version = vk::API_VERSION_1_3;
        allocator_ci.flags = vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;
        let allocator = match unsafe { vk_mem::Allocator::new(allocator_ci) } {
            Ok(allocator) => allocator,
            Err(err) => {
                unsafe {
                    device.destroy_device(None);
                    instance.destroy_instance(None);
                }
                return Err(err.into());
            }
        };

        let command_pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = match unsafe { device.create_command_pool(&command_pool_ci, None) } {
            Ok(command_pool) => command_pool,
            Err(err) => {
                drop(allocator);
                unsafe {
                    device.destroy_device(None);
                    instance.destroy_instance(None);
                }
                return Err(err.into());
            }
        };

        let descriptor_buffer = ash::ext::descriptor_buffer::Device::new(&instance, &device);
        let debug_utils = debug_utils_enabled.then(|| ash::ext::debug_utils::Device::new(&instance, &device));
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        Ok(Self {
            instance,
            physical_device,
            device,
            descriptor_buffer,
            debug_utils,
            allocator: ManuallyDrop::new(allocator),
            queue,
            queue_family_index,
            command_pool,
            props,
            max_push_constants_size,
            heaps: RefCell::new(HashMap::new()),
            textures: RefCell::new(HashMap::new()),
            pipelines: RefCell::new(HashMap::new()),
            device_lost: Cell::new(false),
            destroyed: false,
            _entry: entry,
        })
    }

    fn create_instance(entry: &ash::Entry, app_name: &str) -> GfxResult<(ash::Instance, bool)> {
        let app_name = CString::new(app_name).map_err(|_| GfxError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED))?;
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3)
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"Umbra")
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        // debug utils 只用于命令列表上的 label，不是必需的
        let debug_utils_enabled = unsafe { entry.enumerate_instance_extension_properties(None)? }
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == ash::ext::debug_utils::NAME));
        let extensions = if debug_utils_enabled { vec![ash::ext::debug_utils::NAME.as_ptr()] } else { vec![] };
        log::info!("instance debug utils enabled: {}", debug_utils_enabled);

        let instance_ci =
            vk::InstanceCreateInfo::default().application_info(&app_info).enabled_extension_names(&extensions);
        let instance = unsafe { entry.create_instance(&instance_ci, None)? };
        Ok((instance, debug_utils_enabled))
    }

    /// 返回物理设备以及支持 compute 的 queue family
    fn pick_physical_device(instance: &ash::Instance) -> GfxResult<(vk::PhysicalDevice, u32)> {
        unsafe { instance.enumerate_physical_devices()? }
            .into_iter()
            .filter(|pdevice| Self::supports_required_extensions(instance, *pdevice))
            .filter_map(|pdevice| {
                let queue_family_index = unsafe { instance.get_physical_device_queue_family_properties(pdevice) }
                    .iter()
                    .position(|props| props.queue_flags.contains(vk::QueueFlags::COMPUTE))?;
                Some((pdevice, queue_family_index as u32))
            })
            // 优先使用独立显卡
            .find_or_first(|(pdevice, _)| {
                let props = unsafe { instance.get_physical_device_properties(*pdevice) };
                props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
            })
            .inspect(|(pdevice, _)| {
                let props = unsafe { instance.get_physical_device_properties(*pdevice) };
                log::info!("found gpu: {:?}", props.device_name_as_c_str().unwrap_or(c"unknown"));
            })
            .ok_or_else(|| {
                log::error!("no gpu supports {:?}", Self::required_device_exts());
                GfxError::Vulkan(vk::Result::ERROR_FEATURE_NOT_PRESENT)
            })
    }

    fn required_device_exts() -> [&'static CStr; 2] {
        [ash::ext::descriptor_buffer::NAME, ash::ext::robustness2::NAME]
    }

    fn supports_required_extensions(instance: &ash::Instance, pdevice: vk::PhysicalDevice) -> bool {
        let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(pdevice) }) else {
            return false;
        };
        Self::required_device_exts().iter().all(|required| {
            extensions.iter().any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == *required))
        })
    }

    fn query_props(instance: &ash::Instance, pdevice: vk::PhysicalDevice) -> (GfxDescriptorBufferProps, u32) {
        let mut descriptor_buffer_props = vk::PhysicalDeviceDescriptorBufferPropertiesEXT::default();
        let mut props2 = vk::PhysicalDeviceProperties2::default().push_next(&mut descriptor_buffer_props);
        unsafe { instance.get_physical_device_properties2(pdevice, &mut props2) };
        let max_push_constants_size = props2.properties.limits.max_push_constants_size;

        (GfxDescriptorBufferProps::from_vk(&descriptor_buffer_props), max_push_constants_size)
    }

    fn create_device(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> GfxResult<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)];
        let device_exts = Self::required_device_exts().iter().map(|ext| ext.as_ptr()).collect_vec();

        let mut vk12_features = vk::PhysicalDeviceVulkan12Features::default().buffer_device_address(true);
        let mut vk13_features = vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);
        let mut descriptor_buffer_features =
            vk::PhysicalDeviceDescriptorBufferFeaturesEXT::default().descriptor_buffer(true);
        // null UAV 描述符
        let mut robustness2_features = vk::PhysicalDeviceRobustness2FeaturesEXT::default().null_descriptor(true);

        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_exts)
            .push_next(&mut vk12_features)
            .push_next(&mut vk13_features)
            .push_next(&mut descriptor_buffer_features)
            .push_next(&mut robustness2_features);

        Ok(unsafe { instance.create_device(pdevice, &device_ci, None)? })
    }
}
// destroy
impl GfxVulkanDevice {
    /// 释放设备以及所有还没有被释放的对象
    pub fn destroy(mut self) {
        log::info!("destroying vulkan device");
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::error!("device_wait_idle failed before destroy: {:?}", err);
            }

            for (image, mut texture) in self.textures.take() {
                log::warn!("texture {:?} still alive at device destroy", image);
                Self::destroy_texture_objects(&self.device, &self.allocator, image, &mut texture);
            }
            for (_, mut heap) in self.heaps.take() {
                log::warn!("descriptor heap {:?} still alive at device destroy", heap.buffer);
                Self::destroy_heap_objects(&self.allocator, &mut heap);
            }
            for (_, objects) in self.pipelines.take() {
                log::warn!("compute pipeline {:?} still alive at device destroy", objects.pipeline);
                objects.destroy(&self.device);
            }

            self.device.destroy_command_pool(self.command_pool, None);
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        self.destroyed = true;
    }

    fn destroy_texture_objects(
        device: &ash::Device,
        allocator: &vk_mem::Allocator,
        image: vk::Image,
        texture: &mut GfxVulkanTexture,
    ) {
        unsafe {
            for view in texture.views.values() {
                device.destroy_image_view(*view, None);
            }
            allocator.destroy_image(image, &mut texture.allocation);
        }
    }

    fn destroy_heap_objects(allocator: &vk_mem::Allocator, heap: &mut GfxVulkanHeap) {
        unsafe {
            allocator.unmap_memory(&mut heap.allocation);
            allocator.destroy_buffer(heap.buffer, &mut heap.allocation);
        }
    }
}
impl Drop for GfxVulkanDevice {
    fn drop(&mut self) {
        if !self.destroyed {
            log::warn!("GfxVulkanDevice dropped without destroy, vulkan objects leaked");
        }
    }
}
// getters
impl GfxVulkanDevice {
    #[inline]
    pub fn ash_device(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn descriptor_buffer(&self) -> &ash::ext::descriptor_buffer::Device {
        &self.descriptor_buffer
    }

    #[inline]
    pub fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.debug_utils.as_ref()
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    #[inline]
    pub fn props(&self) -> &GfxDescriptorBufferProps {
        &self.props
    }
}
// tools
impl GfxVulkanDevice {
    /// 所有 Vulkan 调用的结果都经过这里，出现设备丢失之后 `status` 会一直返回 `DeviceLost`
    fn check<T>(&self, result: VkResult<T>) -> GfxResult<T> {
        result.map_err(|err| {
            if err == vk::Result::ERROR_DEVICE_LOST {
                log::error!("vulkan device lost");
                self.device_lost.set(true);
            }
            GfxError::from(err)
        })
    }

    fn set_debug_name<T: vk::Handle + Copy>(&self, handle: T, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default().object_name(&name).object_handle(handle);
        if let Err(err) = unsafe { debug_utils.set_debug_utils_object_name(&name_info) } {
            log::warn!("failed to set debug name {:?}: {:?}", name, err);
        }
    }

    /// 录制一个一次性的命令列表，提交并等待执行完成
    pub fn one_time_exec<R>(&self, name: &str, func: impl FnOnce(&mut VkCommandList) -> R) -> GfxResult<R> {
        self.status()?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffers = self.check(unsafe { self.device.allocate_command_buffers(&alloc_info) })?;

        let result = match command_buffers.first() {
            Some(command_buffer) => self.record_and_submit(*command_buffer, name, func),
            None => Err(GfxError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)),
        };
        unsafe { self.device.free_command_buffers(self.command_pool, &command_buffers) };
        result
    }

    fn record_and_submit<R>(
        &self,
        command_buffer: vk::CommandBuffer,
        name: &str,
        func: impl FnOnce(&mut VkCommandList) -> R,
    ) -> GfxResult<R> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.check(unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) })?;
        self.set_debug_name(command_buffer, name);

        let output = {
            let mut cmd = VkCommandList::new(self, command_buffer);
            func(&mut cmd)
        };
        self.check(unsafe { self.device.end_command_buffer(command_buffer) })?;

        let command_buffer_info = vk::CommandBufferSubmitInfo::default().command_buffer(command_buffer);
        let submit_info =
            vk::SubmitInfo2::default().command_buffer_infos(std::slice::from_ref(&command_buffer_info));
        self.check(unsafe {
            self.device.queue_submit2(self.queue, std::slice::from_ref(&submit_info), vk::Fence::null())
        })?;
        self.check(unsafe { self.device.queue_wait_idle(self.queue) })?;

        Ok(output)
    }

    fn image_view(&self, image: vk::Image, key: GfxViewKey) -> GfxResult<vk::ImageView> {
        let mut textures = self.textures.borrow_mut();
        let Some(texture) = textures.get_mut(&image) else {
            log::error!("descriptor refers to unknown image {:?}", image);
            return Err(GfxError::InvalidResourceState {
                resource: format!("{image:?}"),
            });
        };
        if let Some(view) = texture.views.get(&key) {
            return Ok(*view);
        }

        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(key.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: key.base_mip,
                level_count: key.level_count,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = self.check(unsafe { self.device.create_image_view(&view_ci, None) })?;
        texture.views.insert(key, view);
        Ok(view)
    }

    fn is_storage_capable(&self, image: vk::Image) -> bool {
        self.textures.borrow().get(&image).is_some_and(|texture| texture.usage.contains(vk::ImageUsageFlags::STORAGE))
    }

    fn create_descriptor_set_layout(&self, descriptor_type: vk::DescriptorType) -> GfxResult<vk::DescriptorSetLayout> {
        let binding = vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(descriptor_type)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::COMPUTE);
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::DESCRIPTOR_BUFFER_EXT)
            .bindings(std::slice::from_ref(&binding));
        let layout = self.check(unsafe { self.device.create_descriptor_set_layout(&layout_ci, None) })?;

        // set 的 offset 直接指向描述符本身
        let binding_offset = unsafe { self.descriptor_buffer.get_descriptor_set_layout_binding_offset(layout, 0) };
        if binding_offset != 0 {
            unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
            return Err(GfxError::Shader(format!(
                "{descriptor_type:?} binding 0 is placed at offset {binding_offset} inside its set"
            )));
        }
        Ok(layout)
    }

    fn build_compute_pipeline(
        &self,
        desc: &GfxComputePipelineDesc,
        objects: &mut GfxVulkanPipelineObjects,
    ) -> GfxResult<()> {
        let root_signature = &desc.root_signature;

        let srv_layout = self.create_descriptor_set_layout(vk::DescriptorType::SAMPLED_IMAGE)?;
        objects.set_layouts.push(srv_layout);
        let uav_layout = self.create_descriptor_set_layout(vk::DescriptorType::STORAGE_IMAGE)?;
        objects.set_layouts.push(uav_layout);

        let set_layouts = std::iter::repeat(srv_layout)
            .take(root_signature.srv_table_width as usize)
            .chain(std::iter::repeat(uav_layout).take(root_signature.uav_table_width as usize))
            .collect_vec();
        let push_constant_ranges = (root_signature.constants_size > 0)
            .then(|| {
                vk::PushConstantRange::default()
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
                    .offset(0)
                    .size(root_signature.constants_size)
            })
            .into_iter()
            .collect_vec();
        let layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        objects.layout = self.check(unsafe { self.device.create_pipeline_layout(&layout_ci, None) })?;

        let mut file = std::fs::File::open(&desc.shader_path)
            .map_err(|err| GfxError::Shader(format!("{}: {}", desc.shader_path, err)))?;
        let code =
            ash::util::read_spv(&mut file).map_err(|err| GfxError::Shader(format!("{}: {}", desc.shader_path, err)))?;
        let shader_module_ci = vk::ShaderModuleCreateInfo::default().code(&code);
        let shader_module = self.check(unsafe { self.device.create_shader_module(&shader_module_ci, None) })?;

        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module)
            .name(desc.entry_point);
        let pipeline_ci = vk::ComputePipelineCreateInfo::default()
            .flags(vk::PipelineCreateFlags::DESCRIPTOR_BUFFER_EXT)
            .stage(stage_info)
            .layout(objects.layout);
        let pipelines = unsafe {
            self.device.create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_ci), None)
        };
        unsafe { self.device.destroy_shader_module(shader_module, None) };

        let pipelines = self.check(pipelines.map_err(|(_, err)| err))?;
        objects.pipeline = pipelines.first().copied().unwrap_or_default();
        self.set_debug_name(objects.pipeline, &desc.shader_path);
        Ok(())
    }
}
impl GfxDevice for GfxVulkanDevice {
    fn descriptor_increment_size(&self, heap_type: GfxDescriptorHeapType) -> u32 {
        self.props.stride(heap_type)
    }

    fn max_descriptor_heap_capacity(&self, heap_type: GfxDescriptorHeapType) -> u32 {
        self.props.max_capacity(heap_type)
    }

    fn create_descriptor_heap(&self, desc: &GfxDescriptorHeapDesc) -> GfxResult<GfxDescriptorHeapBase> {
        self.status()?;

        // 容量为 0 的堆也需要一个合法的 buffer
        let size = desc.capacity.max(1) as u64 * self.props.stride(desc.heap_type) as u64;
        let usage = if desc.shader_visible {
            let descriptor_usage = match desc.heap_type {
                GfxDescriptorHeapType::CbvSrvUav => vk::BufferUsageFlags::RESOURCE_DESCRIPTOR_BUFFER_EXT,
                GfxDescriptorHeapType::Sampler => vk::BufferUsageFlags::SAMPLER_DESCRIPTOR_BUFFER_EXT,
            };
            descriptor_usage | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
        } else {
            vk::BufferUsageFlags::TRANSFER_SRC
        };
        let buffer_ci = vk::BufferCreateInfo::default().size(size).usage(usage);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            ..Default::default()
        };
        let (buffer, mut allocation) = self.check(unsafe {
            self.allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, self.props.offset_alignment)
        })?;

        let mapped = match self.check(unsafe { self.allocator.map_memory(&mut allocation) }) {
            Ok(mapped) => mapped,
            Err(err) => {
                unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
                return Err(err);
            }
        };
        let gpu = desc.shader_visible.then(|| unsafe {
            self.device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
        });
        self.set_debug_name(buffer, &format!("DescriptorHeap::{:?}", desc.heap_type));

        let cpu = mapped as usize as u64;
        self.heaps.borrow_mut().insert(
            cpu,
            GfxVulkanHeap {
                buffer,
                allocation,
                size,
            },
        );

        Ok(GfxDescriptorHeapBase {
            cpu: GfxCpuDescriptorHandle(cpu),
            gpu: gpu.map(GfxGpuDescriptorHandle),
        })
    }

    fn destroy_descriptor_heap(&self, base: GfxDescriptorHeapBase) {
        match self.heaps.borrow_mut().remove(&base.cpu.0) {
            Some(mut heap) => Self::destroy_heap_objects(&self.allocator, &mut heap),
            None => log::warn!("destroy unknown descriptor heap at {:#x}", base.cpu.0),
        }
    }

    fn write_descriptor(&self, dst: GfxCpuDescriptorHandle, view: &GfxDescriptorView) -> GfxResult<()> {
        let (descriptor_type, descriptor_size, image_info) = match *view {
            GfxDescriptorView::ShaderResource { resource, desc } => {
                let image_view = self.image_view(
                    resource,
                    GfxViewKey {
                        format: desc.format,
                        base_mip: desc.most_detailed_mip,
                        level_count: desc.mip_levels,
                    },
                )?;
                // 和 GfxResourceState::to_image_state 中 shader read 的 layout 一致
                let layout = if self.is_storage_capable(resource) {
                    vk::ImageLayout::GENERAL
                } else {
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                };
                (
                    vk::DescriptorType::SAMPLED_IMAGE,
                    self.props.sampled_image_descriptor_size,
                    vk::DescriptorImageInfo::default().image_view(image_view).image_layout(layout),
                )
            }
            GfxDescriptorView::UnorderedAccess { resource, desc } => {
                let image_view = match resource {
                    Some(resource) => self.image_view(
                        resource,
                        GfxViewKey {
                            format: desc.format,
                            base_mip: desc.mip_slice,
                            level_count: 1,
                        },
                    )?,
                    // nullDescriptor
                    None => vk::ImageView::null(),
                };
                (
                    vk::DescriptorType::STORAGE_IMAGE,
                    self.props.storage_image_descriptor_size,
                    vk::DescriptorImageInfo::default().image_view(image_view).image_layout(vk::ImageLayout::GENERAL),
                )
            }
        };

        let heaps = self.heaps.borrow();
        let Some((heap_cpu, heap)) = heaps
            .iter()
            .find(|(heap_cpu, heap)| dst.0 >= **heap_cpu && dst.0 + descriptor_size as u64 <= **heap_cpu + heap.size)
        else {
            log::error!("descriptor handle {:#x} is outside every descriptor heap", dst.0);
            return Err(GfxError::Vulkan(vk::Result::ERROR_UNKNOWN));
        };

        let data = match descriptor_type {
            vk::DescriptorType::SAMPLED_IMAGE => vk::DescriptorDataEXT {
                p_sampled_image: &image_info,
            },
            _ => vk::DescriptorDataEXT {
                p_storage_image: &image_info,
            },
        };
        let get_info = vk::DescriptorGetInfoEXT::default().ty(descriptor_type).data(data);
        unsafe {
            let descriptor = std::slice::from_raw_parts_mut(dst.0 as usize as *mut u8, descriptor_size);
            self.descriptor_buffer.get_descriptor(&get_info, descriptor);
        }

        let offset = dst.0 - heap_cpu;
        self.check(self.allocator.flush_allocation(&heap.allocation, offset, descriptor_size as u64))
    }

    fn create_texture(
        &self,
        desc: &GfxTextureDesc,
        initial_state: GfxResourceState,
        name: &str,
    ) -> GfxResult<vk::Image> {
        self.status()?;

        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, allocation) = self.check(unsafe { self.allocator.create_image(&image_ci, &alloc_ci) })?;
        self.set_debug_name(image, &format!("Image::{name}"));
        self.textures.borrow_mut().insert(
            image,
            GfxVulkanTexture {
                allocation,
                usage: desc.usage,
                views: HashMap::new(),
            },
        );

        // 从 UNDEFINED 转换到登记的初始状态，之后的 barrier 都以它为起点
        let storage_capable = desc.usage.contains(vk::ImageUsageFlags::STORAGE);
        let dst = initial_state.to_image_state(storage_capable);
        let barrier = GfxImageBarrier::new()
            .image(image)
            .layout_transfer(vk::ImageLayout::UNDEFINED, dst.layout)
            .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE)
            .dst_mask(dst.stage, dst.access)
            .image_aspect_flag(vk::ImageAspectFlags::COLOR)
            .mip_range(0, desc.mip_levels);
        let initialized = self.one_time_exec(&format!("init-{name}"), |cmd| {
            let dependency_info =
                vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(barrier.inner()));
            unsafe { self.device.cmd_pipeline_barrier2(cmd.vk_handle(), &dependency_info) };
        });
        if let Err(err) = initialized {
            self.destroy_texture(image);
            return Err(err);
        }

        Ok(image)
    }

    fn destroy_texture(&self, image: vk::Image) {
        match self.textures.borrow_mut().remove(&image) {
            Some(mut texture) => Self::destroy_texture_objects(&self.device, &self.allocator, image, &mut texture),
            None => log::warn!("destroy unknown texture {:?}", image),
        }
    }

    fn create_compute_pipeline(
        &self,
        desc: &GfxComputePipelineDesc,
    ) -> GfxResult<(vk::Pipeline, vk::PipelineLayout)> {
        self.status()?;

        if desc.root_signature.constants_size > self.max_push_constants_size {
            return Err(GfxError::Shader(format!(
                "{}: {} bytes of inline constants exceed the {} byte limit",
                desc.shader_path, desc.root_signature.constants_size, self.max_push_constants_size
            )));
        }

        let mut objects = GfxVulkanPipelineObjects::default();
        if let Err(err) = self.build_compute_pipeline(desc, &mut objects) {
            objects.destroy(&self.device);
            return Err(err);
        }

        let handles = (objects.pipeline, objects.layout);
        self.pipelines.borrow_mut().insert(objects.pipeline, objects);
        Ok(handles)
    }

    fn destroy_compute_pipeline(&self, pipeline: vk::Pipeline, _layout: vk::PipelineLayout) {
        match self.pipelines.borrow_mut().remove(&pipeline) {
            Some(objects) => objects.destroy(&self.device),
            None => log::warn!("destroy unknown compute pipeline {:?}", pipeline),
        }
    }

    fn status(&self) -> GfxResult<()> {
        if self.device_lost.get() { Err(GfxError::DeviceLost) } else { Ok(()) }
    }
}
