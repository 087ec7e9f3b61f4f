//! 基于 ash 的命令列表实现
//!
//! 描述符堆对应 `VK_EXT_descriptor_buffer` 的 resource descriptor buffer：
//! - 堆的 GPU 基地址就是 descriptor buffer 的 device address
//! - table 中的每个描述符是一个 descriptor set，通过 `cmd_set_descriptor_buffer_offsets` 一次绑定整张 table
//! - root constants 对应 push constants
//!
//! table 对应哪些 descriptor set 由 [`GfxRootSignatureDesc::descriptor_sets`] 决定。

use ash::vk;

use crate::commands::barrier::{GfxBarrier, GfxVkBarrierBatch};
use crate::commands::command_list::GfxCommandList;
use crate::descriptors::heap::GfxDescriptorHeapType;
use crate::descriptors::view::GfxGpuDescriptorHandle;
use crate::device::GfxDevice;
use crate::device::vulkan::GfxVulkanDevice;
use crate::pipelines::compute_pipeline::{GfxComputePipeline, GfxRootSignatureDesc};

/// table 中每个描述符相对于堆基地址的 offset
pub fn descriptor_buffer_offsets(
    heap_base: GfxGpuDescriptorHandle,
    table_base: GfxGpuDescriptorHandle,
    width: u32,
    stride: u32,
) -> Vec<vk::DeviceSize> {
    debug_assert!(table_base.0 >= heap_base.0);
    let first = table_base.0 - heap_base.0;
    (0..width as u64).map(|i| first + i * stride as u64).collect()
}

pub struct VkCommandList<'a> {
    device: &'a ash::Device,
    descriptor_buffer: &'a ash::ext::descriptor_buffer::Device,
    debug_utils: Option<&'a ash::ext::debug_utils::Device>,
    command_buffer: vk::CommandBuffer,
    /// 堆中相邻描述符的距离
    stride: u32,

    /// 当前绑定的 pipeline
    layout: vk::PipelineLayout,
    root_signature: Option<GfxRootSignatureDesc>,
    /// 当前绑定的描述符堆
    heap_base: Option<GfxGpuDescriptorHandle>,
}
// new & init
impl<'a> VkCommandList<'a> {
    /// `command_buffer` 需要已经处于录制状态
    pub fn new(device: &'a GfxVulkanDevice, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            device: device.ash_device(),
            descriptor_buffer: device.descriptor_buffer(),
            debug_utils: device.debug_utils(),
            command_buffer,
            stride: device.descriptor_increment_size(GfxDescriptorHeapType::CbvSrvUav),
            layout: vk::PipelineLayout::null(),
            root_signature: None,
            heap_base: None,
        }
    }

    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}
impl GfxCommandList for VkCommandList<'_> {
    fn resource_barrier(&mut self, barriers: &[GfxBarrier]) {
        let batch = GfxVkBarrierBatch::new(barriers);
        if batch.is_empty() {
            return;
        }
        unsafe {
            self.device.cmd_pipeline_barrier2(self.command_buffer, &batch.dependency_info());
        }
    }

    fn set_compute_pipeline(&mut self, pipeline: &GfxComputePipeline) {
        self.layout = pipeline.layout();
        self.root_signature = Some(*pipeline.root_signature());
        unsafe {
            self.device.cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline.handle());
        }
    }

    fn set_descriptor_heap(&mut self, gpu_base: GfxGpuDescriptorHandle) {
        self.heap_base = Some(gpu_base);
        let binding_info = vk::DescriptorBufferBindingInfoEXT::default()
            .address(gpu_base.0)
            .usage(vk::BufferUsageFlags::RESOURCE_DESCRIPTOR_BUFFER_EXT);
        unsafe {
            self.descriptor_buffer.cmd_bind_descriptor_buffers(self.command_buffer, std::slice::from_ref(&binding_info));
        }
    }

    fn set_compute_root_constants(&mut self, slot: u32, data: &[u8]) {
        debug_assert_eq!(slot, GfxRootSignatureDesc::CONSTANTS_SLOT);
        unsafe {
            self.device.cmd_push_constants(self.command_buffer, self.layout, vk::ShaderStageFlags::COMPUTE, 0, data);
        }
    }

    fn set_compute_root_descriptor_table(&mut self, slot: u32, base: GfxGpuDescriptorHandle) {
        debug_assert!(self.heap_base.is_some(), "descriptor table bound before any descriptor heap");
        debug_assert!(self.root_signature.is_some(), "descriptor table bound before any compute pipeline");
        let (Some(heap_base), Some(root_signature)) = (self.heap_base, self.root_signature) else {
            return;
        };
        let Some(sets) = root_signature.descriptor_sets(slot) else {
            debug_assert!(false, "slot {slot} is not a descriptor table");
            return;
        };

        let offsets = descriptor_buffer_offsets(heap_base, base, sets.len() as u32, self.stride);
        let buffer_indices = vec![0; offsets.len()];
        unsafe {
            self.descriptor_buffer.cmd_set_descriptor_buffer_offsets(
                self.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                self.layout,
                sets.start,
                &buffer_indices,
                &offsets,
            );
        }
    }

    fn dispatch(&mut self, group_count: glam::UVec3) {
        unsafe {
            self.device.cmd_dispatch(self.command_buffer, group_count.x, group_count.y, group_count.z);
        }
    }

    fn begin_label(&mut self, label: &str) {
        let Some(debug_utils) = self.debug_utils else {
            return;
        };
        let Ok(name) = std::ffi::CString::new(label) else {
            return;
        };
        let label_info = vk::DebugUtilsLabelEXT::default().label_name(&name);
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(self.command_buffer, &label_info);
        }
    }

    fn end_label(&mut self) {
        if let Some(debug_utils) = self.debug_utils {
            unsafe {
                debug_utils.cmd_end_debug_utils_label(self.command_buffer);
            }
        }
    }
}
