use crate::commands::barrier::GfxBarrier;
use crate::descriptors::view::GfxGpuDescriptorHandle;
use crate::pipelines::compute_pipeline::GfxComputePipeline;

/// 命令列表
///
/// pass 只通过这个 trait 录制命令。录制是单线程的，命令按录制顺序提交到同一个 queue 上执行，
/// 资源状态跟踪依赖这个顺序。
///
/// # 使用示例
/// ```ignore
/// cmd.resource_barrier(&barriers);
/// cmd.set_compute_pipeline(&pipeline);
/// cmd.set_descriptor_heap(heap.gpu_base()?);
/// cmd.set_compute_root_constants(GfxRootSignatureDesc::CONSTANTS_SLOT, bytemuck::bytes_of(&params));
/// cmd.set_compute_root_descriptor_table(GfxRootSignatureDesc::UAV_TABLE_SLOT, heap.gpu_handle(index)?);
/// cmd.dispatch(glam::uvec3(x, y, 1));
/// ```
pub trait GfxCommandList {
    fn resource_barrier(&mut self, barriers: &[GfxBarrier]);

    fn set_compute_pipeline(&mut self, pipeline: &GfxComputePipeline);

    /// 绑定 shader visible 的描述符堆，之后的 descriptor table 都相对于这个堆
    fn set_descriptor_heap(&mut self, gpu_base: GfxGpuDescriptorHandle);

    /// inline constants，不经过额外的 buffer
    fn set_compute_root_constants(&mut self, slot: u32, data: &[u8]);

    fn set_compute_root_descriptor_table(&mut self, slot: u32, base: GfxGpuDescriptorHandle);

    fn dispatch(&mut self, group_count: glam::UVec3);

    fn begin_label(&mut self, _label: &str) {}

    fn end_label(&mut self) {}
}
