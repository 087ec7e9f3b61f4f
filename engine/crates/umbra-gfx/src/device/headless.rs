//! 不依赖 GPU 的设备实现
//!
//! 所有 handle 都是确定性的递增值，描述符写入保存在内存里，可以用来检查 pass 的行为。
//! 用于测试以及 headless 的 demo。

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use ash::vk;
use ash::vk::Handle;

use crate::descriptors::heap::{
    GfxDescriptorHeapBase, GfxDescriptorHeapDesc, GfxDescriptorHeapType, MAX_DESCRIPTOR_HEAP_CAPACITY,
};
use crate::descriptors::view::{GfxCpuDescriptorHandle, GfxDescriptorView, GfxGpuDescriptorHandle};
use crate::device::GfxDevice;
use crate::error::{GfxError, GfxResult};
use crate::pipelines::compute_pipeline::GfxComputePipelineDesc;
use crate::resources::resource::GfxTextureDesc;
use crate::resources::state::GfxResourceState;

/// push constants 的最小保证大小
const MAX_PUSH_CONSTANTS_SIZE: u32 = 128;

/// CPU 地址空间起点
const CPU_HEAP_ADDRESS_BASE: u64 = 0x0001_0000_0000;
/// GPU 地址空间相对 CPU 地址空间的偏移
const GPU_HEAP_ADDRESS_OFFSET: u64 = 0x8000_0000_0000;

pub struct GfxHeadlessDevice {
    max_heap_capacity: u32,

    next_handle: Cell<u64>,
    next_heap_address: Cell<u64>,

    descriptors: RefCell<HashMap<GfxCpuDescriptorHandle, GfxDescriptorView>>,
    descriptor_write_count: Cell<u64>,
    live_heaps: Cell<u32>,
    live_textures: RefCell<HashSet<vk::Image>>,
    live_pipelines: RefCell<HashSet<vk::Pipeline>>,
    compiled_pipelines: Cell<u32>,

    device_lost: Cell<bool>,
}
impl Default for GfxHeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl GfxHeadlessDevice {
    pub fn new() -> Self {
        Self {
            max_heap_capacity: MAX_DESCRIPTOR_HEAP_CAPACITY,
            next_handle: Cell::new(1),
            next_heap_address: Cell::new(CPU_HEAP_ADDRESS_BASE),
            descriptors: RefCell::new(HashMap::new()),
            descriptor_write_count: Cell::new(0),
            live_heaps: Cell::new(0),
            live_textures: RefCell::new(HashSet::new()),
            live_pipelines: RefCell::new(HashSet::new()),
            compiled_pipelines: Cell::new(0),
            device_lost: Cell::new(false),
        }
    }

    /// builder
    pub fn with_max_heap_capacity(mut self, capacity: u32) -> Self {
        self.max_heap_capacity = capacity;
        self
    }

    fn alloc_handle(&self) -> u64 {
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        handle
    }
}
// 测试辅助
impl GfxHeadlessDevice {
    /// 模拟驱动层的设备丢失
    pub fn simulate_device_lost(&self) {
        log::error!("headless device: simulated device lost");
        self.device_lost.set(true);
    }

    /// 已经编译的 pipeline 数量（包括已销毁的）
    #[inline]
    pub fn compiled_pipeline_count(&self) -> u32 {
        self.compiled_pipelines.get()
    }

    #[inline]
    pub fn live_pipeline_count(&self) -> usize {
        self.live_pipelines.borrow().len()
    }

    #[inline]
    pub fn live_texture_count(&self) -> usize {
        self.live_textures.borrow().len()
    }

    #[inline]
    pub fn live_heap_count(&self) -> u32 {
        self.live_heaps.get()
    }

    #[inline]
    pub fn descriptor_write_count(&self) -> u64 {
        self.descriptor_write_count.get()
    }

    /// 某个 CPU 地址上当前的描述符
    pub fn descriptor_at(&self, handle: GfxCpuDescriptorHandle) -> Option<GfxDescriptorView> {
        self.descriptors.borrow().get(&handle).copied()
    }
}
impl GfxDevice for GfxHeadlessDevice {
    fn descriptor_increment_size(&self, heap_type: GfxDescriptorHeapType) -> u32 {
        match heap_type {
            GfxDescriptorHeapType::CbvSrvUav => 32,
            GfxDescriptorHeapType::Sampler => 16,
        }
    }

    fn max_descriptor_heap_capacity(&self, _heap_type: GfxDescriptorHeapType) -> u32 {
        self.max_heap_capacity
    }

    fn create_descriptor_heap(&self, desc: &GfxDescriptorHeapDesc) -> GfxResult<GfxDescriptorHeapBase> {
        self.status()?;

        let size = desc.capacity as u64 * self.descriptor_increment_size(desc.heap_type) as u64;
        let cpu = self.next_heap_address.get();
        // 每个堆之间留出 64KB 对齐的间隔，避免地址相邻
        self.next_heap_address.set(cpu + size.next_multiple_of(0x1_0000) + 0x1_0000);
        self.live_heaps.set(self.live_heaps.get() + 1);

        Ok(GfxDescriptorHeapBase {
            cpu: GfxCpuDescriptorHandle(cpu),
            gpu: desc.shader_visible.then_some(GfxGpuDescriptorHandle(cpu + GPU_HEAP_ADDRESS_OFFSET)),
        })
    }

    fn destroy_descriptor_heap(&self, _base: GfxDescriptorHeapBase) {
        self.live_heaps.set(self.live_heaps.get().saturating_sub(1));
    }

    fn write_descriptor(&self, dst: GfxCpuDescriptorHandle, view: &GfxDescriptorView) -> GfxResult<()> {
        self.descriptors.borrow_mut().insert(dst, *view);
        self.descriptor_write_count.set(self.descriptor_write_count.get() + 1);
        Ok(())
    }

    fn create_texture(
        &self,
        desc: &GfxTextureDesc,
        initial_state: GfxResourceState,
        name: &str,
    ) -> GfxResult<vk::Image> {
        self.status()?;

        let image = vk::Image::from_raw(self.alloc_handle());
        self.live_textures.borrow_mut().insert(image);
        log::debug!(
            "headless device: create texture `{}` {}x{} mips {} in {:?}",
            name,
            desc.extent.width,
            desc.extent.height,
            desc.mip_levels,
            initial_state
        );
        Ok(image)
    }

    fn destroy_texture(&self, image: vk::Image) {
        self.live_textures.borrow_mut().remove(&image);
    }

    fn create_compute_pipeline(
        &self,
        desc: &GfxComputePipelineDesc,
    ) -> GfxResult<(vk::Pipeline, vk::PipelineLayout)> {
        self.status()?;

        if desc.root_signature.constants_size > MAX_PUSH_CONSTANTS_SIZE {
            return Err(GfxError::Shader(format!(
                "{}: {} bytes of inline constants exceed the {} byte limit",
                desc.shader_path, desc.root_signature.constants_size, MAX_PUSH_CONSTANTS_SIZE
            )));
        }

        let pipeline = vk::Pipeline::from_raw(self.alloc_handle());
        let layout = vk::PipelineLayout::from_raw(self.alloc_handle());
        self.live_pipelines.borrow_mut().insert(pipeline);
        self.compiled_pipelines.set(self.compiled_pipelines.get() + 1);
        Ok((pipeline, layout))
    }

    fn destroy_compute_pipeline(&self, pipeline: vk::Pipeline, _layout: vk::PipelineLayout) {
        self.live_pipelines.borrow_mut().remove(&pipeline);
    }

    fn status(&self) -> GfxResult<()> {
        if self.device_lost.get() { Err(GfxError::DeviceLost) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heaps_do_not_alias() {
        let device = GfxHeadlessDevice::new();
        let desc = GfxDescriptorHeapDesc {
            heap_type: GfxDescriptorHeapType::CbvSrvUav,
            capacity: 100,
            shader_visible: true,
        };
        let a = device.create_descriptor_heap(&desc).unwrap();
        let b = device.create_descriptor_heap(&desc).unwrap();
        assert!(b.cpu.0 >= a.cpu.0 + 100 * 32);
        assert!(a.gpu.is_some());
        assert_eq!(device.live_heap_count(), 2);
    }

    #[test]
    fn test_device_lost() {
        let device = GfxHeadlessDevice::new();
        assert!(device.status().is_ok());

        device.simulate_device_lost();
        assert_eq!(device.status(), Err(GfxError::DeviceLost));
        let desc = GfxTextureDesc::new_2d_with_mips(4, 4, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(
            device.create_texture(&desc, GfxResourceState::COPY_DEST, "lost"),
            Err(GfxError::DeviceLost)
        );
    }
}
