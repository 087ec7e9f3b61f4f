//! 设备抽象
//!
//! pass 框架只通过 [`GfxDevice`] 访问设备：查询描述符大小、创建描述符堆、写入描述符、
//! 创建资源和 pipeline。设备的生命周期由应用层管理，框架从不持有它。
//!
//! - [`headless::GfxHeadlessDevice`]：不访问 GPU，记录所有调用，用于测试和无 GPU 的环境
//! - [`vulkan::GfxVulkanDevice`]：基于 ash 和 `VK_EXT_descriptor_buffer`

pub mod headless;
pub mod vulkan;

use ash::vk;

use crate::descriptors::heap::{GfxDescriptorHeapBase, GfxDescriptorHeapDesc, GfxDescriptorHeapType};
use crate::descriptors::view::{GfxCpuDescriptorHandle, GfxDescriptorView};
use crate::error::GfxResult;
use crate::pipelines::compute_pipeline::GfxComputePipelineDesc;
use crate::resources::resource::GfxTextureDesc;
use crate::resources::state::GfxResourceState;

pub trait GfxDevice {
    /// 同一类型的相邻描述符之间的字节距离
    fn descriptor_increment_size(&self, heap_type: GfxDescriptorHeapType) -> u32;

    /// 单个描述符堆允许的最大容量
    fn max_descriptor_heap_capacity(&self, heap_type: GfxDescriptorHeapType) -> u32;

    fn create_descriptor_heap(&self, desc: &GfxDescriptorHeapDesc) -> GfxResult<GfxDescriptorHeapBase>;

    fn destroy_descriptor_heap(&self, base: GfxDescriptorHeapBase);

    /// 将描述符写入 `dst` 处，覆盖之前的内容
    fn write_descriptor(&self, dst: GfxCpuDescriptorHandle, view: &GfxDescriptorView) -> GfxResult<()>;

    /// 创建纹理，返回时纹理已经处于 `initial_state`
    fn create_texture(
        &self,
        desc: &GfxTextureDesc,
        initial_state: GfxResourceState,
        name: &str,
    ) -> GfxResult<vk::Image>;

    fn destroy_texture(&self, image: vk::Image);

    fn create_compute_pipeline(&self, desc: &GfxComputePipelineDesc)
    -> GfxResult<(vk::Pipeline, vk::PipelineLayout)>;

    fn destroy_compute_pipeline(&self, pipeline: vk::Pipeline, layout: vk::PipelineLayout);

    /// 设备是否还可用，设备丢失时返回 `DeviceLost`
    fn status(&self) -> GfxResult<()>;
}
