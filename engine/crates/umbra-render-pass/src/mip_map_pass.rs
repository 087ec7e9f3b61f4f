//! Mip map 生成
//!
//! 从 `source_level` 开始，用 compute shader 逐级降采样生成后面所有的 mip。
//! 每次 dispatch 最多生成 [`MIPS_PER_ITERATION`] 层，UAV descriptor table 的宽度固定，
//! 不满一批时用 null UAV 补齐。
//!
//! 整个 pass 中纹理保持在 `ALL_SHADER_READ` 状态：storage 纹理的 shader read 状态使用 GENERAL layout，
//! 整张图的 SRV 读取和逐个 mip 的 UAV 写入可以共存。前一批写入的 mip 被下一批读取之前需要 UAV barrier。

use std::rc::Rc;

use ash::vk;
use itertools::Itertools;
use umbra_crate_tools::profile_span;
use umbra_crate_tools::resource::UmbraPath;
use umbra_gfx::descriptors::heap::{GfxDescriptorHeap, GfxDescriptorHeapDesc, GfxDescriptorHeapType, GfxDescriptorRange};
use umbra_gfx::descriptors::view::{GfxDescriptorView, GfxSrvDesc, GfxUavDesc};
use umbra_gfx::device::GfxDevice;
use umbra_gfx::error::GfxResult;
use umbra_gfx::pipelines::compute_pipeline::GfxRootSignatureDesc;
use umbra_gfx::resources::resource::{GfxResource, GfxTextureDesc};
use umbra_gfx::resources::state::GfxResourceState;

use crate::render_pass::{RenderCamera, RenderPass, RenderPassBase, RenderPassContext, RenderScene};
use crate::shader_library::{GfxComputeShader, ShaderLibrary};

/// 每次 dispatch 最多生成的 mip 层数，同时也是 UAV table 的宽度
pub const MIPS_PER_ITERATION: u32 = 4;

/// compute shader 声明的 thread group 大小（8x8x1）
pub const MIP_THREAD_GROUP_SIZE: u32 = 8;

/// 每一批使用的描述符：1 个 SRV + `MIPS_PER_ITERATION` 个 UAV
const DESCRIPTORS_PER_BATCH: u32 = 1 + MIPS_PER_ITERATION;

const ROOT_SIGNATURE: GfxRootSignatureDesc = GfxRootSignatureDesc {
    constants_size: size_of::<MipMapPassData>() as u32,
    srv_table_width: 1,
    uav_table_width: MIPS_PER_ITERATION,
};

/// 以 inline constants 上传的参数块，和 shader 中的布局一致
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MipMapPassData {
    pub source_level: u32,
    /// 这一批生成的层数
    pub levels: u32,
    pub _padding_: [u32; 2],
    /// (源宽, 源高, 1 / 目标宽, 1 / 目标高)
    pub texel_size: glam::Vec4,
}
impl MipMapPassData {
    pub fn from_batch(batch: &MipBatch) -> Self {
        Self {
            source_level: batch.source_level,
            levels: batch.levels,
            _padding_: [0; 2],
            texel_size: glam::vec4(
                batch.src_extent.width as f32,
                batch.src_extent.height as f32,
                1.0 / batch.dst_extent.width as f32,
                1.0 / batch.dst_extent.height as f32,
            ),
        }
    }
}

/// 一次 dispatch 的参数
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MipBatch {
    pub source_level: u32,
    /// 生成 `source_level + 1 ..= source_level + levels`
    pub levels: u32,
    pub src_extent: vk::Extent2D,
    /// 第一个目标 mip 的尺寸
    pub dst_extent: vk::Extent2D,
    pub group_count: glam::UVec3,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MipMapPassDesc {
    /// 从哪一层开始降采样，`None` 表示从 0 层开始
    pub source_level: Option<u32>,
    pub shader_path: String,
}
impl Default for MipMapPassDesc {
    fn default() -> Self {
        Self {
            source_level: None,
            shader_path: UmbraPath::shader_build_path_str("pp/mipmap.slang"),
        }
    }
}

pub struct MipMapPass {
    base: RenderPassBase<1, 0, MipMapPassData>,
    source_level: Option<u32>,

    /// pass 独占的描述符堆，每一批使用其中不重叠的一段
    heap: GfxDescriptorHeap,
    window: GfxDescriptorRange,
}
// new & init
impl MipMapPass {
    /// 同一个 shader path 的 pipeline 在 `shader_library` 中只会编译一次
    pub fn new(
        device: &dyn GfxDevice,
        shader_library: &mut ShaderLibrary,
        texture: Rc<GfxResource>,
        desc: MipMapPassDesc,
    ) -> GfxResult<Self> {
        let shader = shader_library.get_or_create(&desc.shader_path, || {
            GfxComputeShader::new(device, desc.shader_path.as_str(), c"main", ROOT_SIGNATURE)
        })?;

        let name = format!("mip-map-{}", texture.name());
        let (heap, window) = Self::create_heap(device, &name, texture.desc(), desc.source_level)?;
        let base = RenderPassBase::new(name, [texture], [], shader, MipMapPassData::default());

        Ok(Self {
            base,
            source_level: desc.source_level,
            heap,
            window,
        })
    }

    /// 描述符堆的大小按照纹理最多需要的批数分配，至少容纳一批
    fn create_heap(
        device: &dyn GfxDevice,
        name: &str,
        texture_desc: &GfxTextureDesc,
        source_level: Option<u32>,
    ) -> GfxResult<(GfxDescriptorHeap, GfxDescriptorRange)> {
        let max_batches = Self::plan(texture_desc, source_level).len().max(1) as u32;
        let mut heap = GfxDescriptorHeap::new(
            device,
            GfxDescriptorHeapDesc {
                heap_type: GfxDescriptorHeapType::CbvSrvUav,
                capacity: DESCRIPTORS_PER_BATCH * max_batches,
                shader_visible: true,
            },
            name,
        )?;
        match heap.allocate_range(DESCRIPTORS_PER_BATCH * max_batches) {
            Ok(window) => Ok((heap, window)),
            Err(err) => {
                heap.destroy(device);
                Err(err)
            }
        }
    }
}
// destroy
impl MipMapPass {
    pub fn destroy(self, device: &dyn GfxDevice) {
        self.heap.destroy(device);
    }
}
// getters
impl MipMapPass {
    #[inline]
    pub fn texture(&self) -> &Rc<GfxResource> {
        let [texture] = self.base.inputs();
        texture
    }

    #[inline]
    pub fn source_level(&self) -> Option<u32> {
        self.source_level
    }

    #[inline]
    pub fn heap(&self) -> &GfxDescriptorHeap {
        &self.heap
    }

    #[inline]
    pub fn shader(&self) -> &Rc<GfxComputeShader> {
        self.base.shader()
    }

    /// 第 `batch` 批的 SRV 所在的堆索引，UAV 紧跟在后面
    #[inline]
    pub fn batch_base_index(&self, batch: u32) -> GfxResult<u32> {
        self.window.index(batch * DESCRIPTORS_PER_BATCH)
    }
}
// 绑定
impl MipMapPass {
    /// 换成另一张纹理，描述符堆不够大时会重新创建
    pub fn bind_texture(&mut self, device: &dyn GfxDevice, texture: Rc<GfxResource>) -> GfxResult<()> {
        let required = Self::plan(texture.desc(), self.source_level).len() as u32 * DESCRIPTORS_PER_BATCH;
        if required > self.window.count() {
            let (heap, window) = Self::create_heap(device, self.base.name(), texture.desc(), self.source_level)?;
            std::mem::replace(&mut self.heap, heap).destroy(device);
            self.window = window;
        }

        log::debug!("mip map pass `{}` rebound to `{}`", self.base.name(), texture.name());
        self.base.bind_inputs([texture]);
        Ok(())
    }
}
// 算法
impl MipMapPass {
    /// 将需要生成的 mip 划分为若干批
    ///
    /// 剩余层数：`source_level` 大于 0 时为 `total - source_level - 1`，否则为 `total - 1`。
    /// 每一批最多 `MIPS_PER_ITERATION` 层，并且 `source_level + levels <= total - 1`。
    pub fn plan(texture_desc: &GfxTextureDesc, source_level: Option<u32>) -> Vec<MipBatch> {
        let total_mips = texture_desc.mip_levels;
        let last_mip = total_mips.saturating_sub(1);

        let (mut src_mip, mut remaining) = match source_level {
            Some(level) if level > 0 => (level, total_mips.saturating_sub(level).saturating_sub(1)),
            _ => (0, last_mip),
        };

        let mut batches = Vec::new();
        while src_mip < last_mip && remaining > 0 {
            let src_extent = texture_desc.mip_extent(src_mip);
            let dst_extent = vk::Extent2D {
                width: (src_extent.width >> 1).max(1),
                height: (src_extent.height >> 1).max(1),
            };
            let levels = MIPS_PER_ITERATION.min(remaining).min(last_mip - src_mip);

            batches.push(MipBatch {
                source_level: src_mip,
                levels,
                src_extent,
                dst_extent,
                group_count: glam::uvec3(
                    dst_extent.width.div_ceil(MIP_THREAD_GROUP_SIZE),
                    dst_extent.height.div_ceil(MIP_THREAD_GROUP_SIZE),
                    1,
                ),
            });

            src_mip += levels;
            remaining -= levels;
        }
        batches
    }

    /// 写入一批的描述符：SRV 覆盖整张图，UAV 依次指向目标 mip，剩余的槽位填 null UAV
    fn write_batch_descriptors(
        &mut self,
        device: &dyn GfxDevice,
        texture: &GfxResource,
        batch_index: u32,
        batch: &MipBatch,
    ) -> GfxResult<u32> {
        let srv_index = self.batch_base_index(batch_index)?;
        self.heap.write(
            device,
            srv_index,
            GfxDescriptorView::ShaderResource {
                resource: texture.committed_resource(),
                desc: GfxSrvDesc {
                    format: texture.format(),
                    most_detailed_mip: 0,
                    mip_levels: texture.mip_levels(),
                },
            },
        )?;

        for mip in 0..MIPS_PER_ITERATION {
            let view = if mip < batch.levels {
                GfxDescriptorView::UnorderedAccess {
                    resource: Some(texture.committed_resource()),
                    desc: GfxUavDesc {
                        format: texture.format(),
                        mip_slice: batch.source_level + mip + 1,
                    },
                }
            } else {
                GfxDescriptorView::null_uav()
            };
            self.heap.write(device, srv_index + 1 + mip, view)?;
        }

        Ok(srv_index)
    }
}
impl RenderPass for MipMapPass {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn process(
        &mut self,
        ctx: &mut RenderPassContext,
        _scene: &dyn RenderScene,
        _camera: &RenderCamera,
    ) -> GfxResult<()> {
        let _span = profile_span!("MipMapPass::process");

        let texture = self.texture().clone();
        let batches = Self::plan(texture.desc(), self.source_level);
        if batches.is_empty() {
            return Ok(());
        }
        debug_assert!(batches.len() as u32 * DESCRIPTORS_PER_BATCH <= self.window.count());

        self.base.transition_inputs(ctx.tracker, GfxResourceState::ALL_SHADER_READ)?;
        ctx.flush_barriers();

        self.base.bind_pipeline(ctx.cmd);
        ctx.cmd.set_descriptor_heap(self.heap.gpu_base()?);

        for (batch_index, batch) in batches.iter().enumerate() {
            // 上一批写入的 mip 是这一批的源
            ctx.tracker.resolve_hazard(&texture);
            ctx.flush_barriers();

            *self.base.pass_data_mut() = MipMapPassData::from_batch(batch);
            self.base.upload_pass_data(ctx.cmd);

            let srv_index = self.write_batch_descriptors(ctx.device, &texture, batch_index as u32, batch)?;
            ctx.cmd.set_compute_root_descriptor_table(
                GfxRootSignatureDesc::SRV_TABLE_SLOT,
                self.heap.gpu_handle(srv_index)?,
            );
            ctx.cmd.set_compute_root_descriptor_table(
                GfxRootSignatureDesc::UAV_TABLE_SLOT,
                self.heap.gpu_handle(srv_index + 1)?,
            );
            ctx.cmd.dispatch(batch.group_count);
            ctx.tracker.record_write(&texture);

            log::trace!(
                "`{}` batch {}: mip {} -> {}..={}, groups {}",
                self.base.name(),
                batch_index,
                batch.source_level,
                batch.source_level + 1,
                batch.source_level + batch.levels,
                batch.group_count
            );
        }

        // 后续的 pass 读取最后一批写入的 mip
        ctx.tracker.resolve_hazard(&texture);
        ctx.flush_barriers();

        log::debug!(
            "`{}` generated {} mips in {} dispatches: [{}]",
            self.base.name(),
            batches.iter().map(|batch| batch.levels).sum::<u32>(),
            batches.len(),
            batches.iter().map(|batch| batch.levels).join(", ")
        );
        Ok(())
    }

    fn destroy(self: Box<Self>, device: &dyn GfxDevice) {
        MipMapPass::destroy(*self, device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_tracker::ResourceStateTracker;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use umbra_gfx::commands::barrier::GfxBarrier;
    use umbra_gfx::commands::recording::{GfxCommand, GfxRecordingCommandList};
    use umbra_gfx::descriptors::view::GfxGpuDescriptorHandle;
    use umbra_gfx::device::headless::GfxHeadlessDevice;
    use umbra_gfx::error::GfxError;
    use umbra_gfx::resources::texture_library::GfxTextureLibrary;

    const SHADER_PATH: &str = "mipmap.slang.spv";

    fn pass_desc(source_level: Option<u32>) -> MipMapPassDesc {
        MipMapPassDesc {
            source_level,
            shader_path: SHADER_PATH.to_string(),
        }
    }

    fn desc_with_mips(width: u32, height: u32, mip_levels: u32) -> GfxTextureDesc {
        GfxTextureDesc {
            mip_levels,
            ..GfxTextureDesc::new_2d_with_mips(width, height, vk::Format::R8G8B8A8_UNORM)
        }
    }

    struct Fixture {
        device: GfxHeadlessDevice,
        shaders: ShaderLibrary,
        textures: GfxTextureLibrary,
    }
    impl Fixture {
        fn new() -> Self {
            umbra_crate_tools::init_log::init_log_for_test();
            Self {
                device: GfxHeadlessDevice::new(),
                shaders: ShaderLibrary::new(),
                textures: GfxTextureLibrary::new(),
            }
        }

        fn texture(&mut self, width: u32, height: u32, state: GfxResourceState) -> Rc<GfxResource> {
            let desc = GfxTextureDesc::new_2d_with_mips(width, height, vk::Format::R8G8B8A8_UNORM);
            let handle = self.textures.create_texture(&self.device, desc, state, format!("tex-{width}x{height}")).unwrap();
            self.textures.get(handle).unwrap()
        }

        fn pass(&mut self, texture: Rc<GfxResource>, source_level: Option<u32>) -> MipMapPass {
            MipMapPass::new(&self.device, &mut self.shaders, texture, pass_desc(source_level)).unwrap()
        }

        fn run(&self, pass: &mut MipMapPass) -> (GfxRecordingCommandList, ResourceStateTracker) {
            let mut cmd = GfxRecordingCommandList::new("mip");
            let mut tracker = ResourceStateTracker::new();
            let mut ctx = RenderPassContext {
                device: &self.device,
                cmd: &mut cmd,
                tracker: &mut tracker,
                frame_id: 0,
            };
            pass.process(&mut ctx, &(), &RenderCamera::default()).unwrap();
            (cmd, tracker)
        }

        /// 释放所有对象，返回 device 用于检查泄漏
        fn finish(self, passes: Vec<MipMapPass>) -> GfxHeadlessDevice {
            for pass in passes {
                pass.destroy(&self.device);
            }
            self.shaders.destroy(&self.device);
            self.textures.destroy(&self.device);
            self.device
        }
    }

    fn table_bases(cmd: &GfxRecordingCommandList, slot: u32) -> Vec<GfxGpuDescriptorHandle> {
        cmd.commands()
            .iter()
            .filter_map(|command| match command {
                GfxCommand::SetComputeRootDescriptorTable { slot: s, base } if *s == slot => Some(*base),
                _ => None,
            })
            .collect()
    }

    fn pass_data(cmd: &GfxRecordingCommandList) -> Vec<MipMapPassData> {
        cmd.dispatch_constants().iter().map(|bytes| bytemuck::pod_read_unaligned::<MipMapPassData>(bytes)).collect()
    }

    #[test]
    fn test_plan_single_mip() {
        assert!(MipMapPass::plan(&desc_with_mips(1, 1, 1), None).is_empty());
        assert!(MipMapPass::plan(&desc_with_mips(64, 64, 1), None).is_empty());
    }

    #[test]
    fn test_plan_five_mips() {
        let batches = MipMapPass::plan(&desc_with_mips(16, 16, 5), None);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].source_level, 0);
        assert_eq!(batches[0].levels, 4);
        assert_eq!(batches[0].dst_extent, vk::Extent2D { width: 8, height: 8 });
        assert_eq!(batches[0].group_count, glam::uvec3(1, 1, 1));
    }

    #[test]
    fn test_plan_nine_mips() {
        let batches = MipMapPass::plan(&desc_with_mips(256, 256, 9), None);
        assert_eq!(batches.len(), 2);
        assert_eq!((batches[0].source_level, batches[0].levels), (0, 4));
        assert_eq!((batches[1].source_level, batches[1].levels), (4, 4));
        assert_eq!(batches[0].group_count, glam::uvec3(16, 16, 1));
        assert_eq!(batches[1].src_extent, vk::Extent2D { width: 16, height: 16 });
        assert_eq!(batches[1].group_count, glam::uvec3(1, 1, 1));
    }

    #[test]
    fn test_plan_source_level() {
        // 两种剩余层数的计算方式
        let desc = desc_with_mips(256, 256, 9);
        assert_eq!(MipMapPass::plan(&desc, Some(0)), MipMapPass::plan(&desc, None));

        let batches = MipMapPass::plan(&desc, Some(2));
        assert_eq!(batches.iter().map(|b| (b.source_level, b.levels)).collect_vec(), vec![(2, 4), (6, 2)]);
        assert_eq!(batches[0].src_extent, vk::Extent2D { width: 64, height: 64 });

        assert!(MipMapPass::plan(&desc, Some(8)).is_empty());
        assert!(MipMapPass::plan(&desc, Some(100)).is_empty());
    }

    #[test]
    fn test_plan_non_square() {
        let batches = MipMapPass::plan(&desc_with_mips(1024, 4, 11), None);
        assert_eq!(batches.len(), 3);
        let last = batches.last().unwrap();
        assert_eq!((last.source_level, last.levels), (8, 2));
        assert_eq!(last.src_extent, vk::Extent2D { width: 4, height: 1 });
        assert_eq!(last.dst_extent, vk::Extent2D { width: 2, height: 1 });
    }

    proptest! {
        #[test]
        fn prop_plan_covers_every_mip(width in 1u32..=4096, height in 1u32..=4096, cut in 0u32..13) {
            let full = GfxTextureDesc::full_mip_count(width, height);
            let total = full.saturating_sub(cut).max(1);
            let desc = desc_with_mips(width, height, total);
            let batches = MipMapPass::plan(&desc, None);

            prop_assert_eq!(batches.iter().map(|b| b.levels).sum::<u32>(), total - 1);
            prop_assert_eq!(batches.len() as u32, (total - 1).div_ceil(MIPS_PER_ITERATION));

            let mut expected_src = 0;
            for batch in &batches {
                prop_assert_eq!(batch.source_level, expected_src);
                prop_assert!(batch.levels >= 1 && batch.levels <= MIPS_PER_ITERATION);
                prop_assert!(batch.source_level + batch.levels <= total - 1);

                let src = desc.mip_extent(batch.source_level);
                prop_assert_eq!(batch.src_extent, src);
                prop_assert_eq!(batch.dst_extent.width, (src.width >> 1).max(1));
                prop_assert_eq!(batch.dst_extent.height, (src.height >> 1).max(1));
                prop_assert!(batch.group_count.x >= 1 && batch.group_count.y >= 1);
                expected_src += batch.levels;
            }
        }

        #[test]
        fn prop_plan_with_source_level_stays_in_range(mips in 1u32..=13, source in 0u32..16) {
            let desc = desc_with_mips(4096, 4096, mips);
            let batches = MipMapPass::plan(&desc, Some(source));

            let expected = mips.saturating_sub(source).saturating_sub(1);
            prop_assert_eq!(batches.iter().map(|b| b.levels).sum::<u32>(), expected);
            for batch in &batches {
                prop_assert!(batch.source_level >= source);
                prop_assert!(batch.source_level + batch.levels <= mips - 1);
            }
        }
    }

    #[test]
    fn test_single_mip_texture_returns_immediately() {
        let mut fixture = Fixture::new();
        let texture = fixture.texture(1, 1, GfxResourceState::COPY_DEST);
        let mut pass = fixture.pass(texture.clone(), None);

        let (cmd, tracker) = fixture.run(&mut pass);
        assert!(cmd.commands().is_empty());
        assert_eq!(tracker.transition_count(), 0);
        assert_eq!(texture.current_state(), Ok(GfxResourceState::COPY_DEST));
        assert_eq!(pass.heap().capacity(), DESCRIPTORS_PER_BATCH);

        drop(texture);
        fixture.finish(vec![pass]);
    }

    #[test]
    fn test_nine_mips_records_two_batches() {
        let mut fixture = Fixture::new();
        let texture = fixture.texture(256, 256, GfxResourceState::COPY_DEST);
        let mut pass = fixture.pass(texture.clone(), None);

        let (cmd, tracker) = fixture.run(&mut pass);
        assert_eq!(cmd.dispatches().collect_vec(), vec![glam::uvec3(16, 16, 1), glam::uvec3(1, 1, 1)]);

        let data = pass_data(&cmd);
        assert_eq!(data.len(), 2);
        assert_eq!((data[0].source_level, data[0].levels), (0, 4));
        assert_eq!((data[1].source_level, data[1].levels), (4, 4));
        assert_eq!(data[0].texel_size, glam::vec4(256.0, 256.0, 1.0 / 128.0, 1.0 / 128.0));
        assert_eq!(data[1].texel_size, glam::vec4(16.0, 16.0, 1.0 / 8.0, 1.0 / 8.0));

        // 一次状态转换，批与批之间以及结束时各一次 UAV barrier
        assert_eq!(tracker.transition_count(), 1);
        assert_eq!(tracker.uav_barrier_count(), 2);
        assert_eq!(texture.current_state(), Ok(GfxResourceState::ALL_SHADER_READ));

        let barriers = cmd.barriers().copied().collect_vec();
        assert!(matches!(
            barriers[0],
            GfxBarrier::Transition {
                before: GfxResourceState::COPY_DEST,
                after: GfxResourceState::ALL_SHADER_READ,
                ..
            }
        ));
        assert!(matches!(barriers[1], GfxBarrier::UnorderedAccess { resource: Some(_) }));

        // barrier 出现在第二次 dispatch 之前
        let commands = cmd.commands();
        let dispatch_positions = commands
            .iter()
            .positions(|command| matches!(command, GfxCommand::Dispatch(_)))
            .collect_vec();
        let barrier_positions = commands
            .iter()
            .positions(|command| matches!(command, GfxCommand::Barrier(_)))
            .collect_vec();
        assert!(barrier_positions.iter().any(|&p| p > dispatch_positions[0] && p < dispatch_positions[1]));
        assert!(barrier_positions.last().unwrap() > dispatch_positions.last().unwrap());

        drop(texture);
        fixture.finish(vec![pass]);
    }

    #[test]
    fn test_five_mips_single_full_batch() {
        let mut fixture = Fixture::new();
        let texture = fixture.texture(16, 16, GfxResourceState::ALL_SHADER_READ);
        let mut pass = fixture.pass(texture.clone(), None);

        let (cmd, tracker) = fixture.run(&mut pass);
        assert_eq!(cmd.dispatch_count(), 1);
        // 已经处于目标状态，不需要转换
        assert_eq!(tracker.transition_count(), 0);

        let base = pass.batch_base_index(0).unwrap();
        for mip in 0..MIPS_PER_ITERATION {
            let view = pass.heap().view(base + 1 + mip).unwrap();
            assert_eq!(
                *view,
                GfxDescriptorView::UnorderedAccess {
                    resource: Some(texture.committed_resource()),
                    desc: GfxUavDesc {
                        format: vk::Format::R8G8B8A8_UNORM,
                        mip_slice: mip + 1,
                    },
                }
            );
        }

        drop(texture);
        fixture.finish(vec![pass]);
    }

    #[test]
    fn test_partial_batch_is_padded_with_null_uavs() {
        let mut fixture = Fixture::new();
        // 64x64: 7 层，批次为 4 + 2
        let texture = fixture.texture(64, 64, GfxResourceState::COMMON);
        let mut pass = fixture.pass(texture.clone(), None);
        fixture.run(&mut pass);

        let base = pass.batch_base_index(1).unwrap();
        let uavs = (0..MIPS_PER_ITERATION).map(|mip| *pass.heap().view(base + 1 + mip).unwrap()).collect_vec();
        let nulls = uavs.iter().filter(|view| view.is_null()).count() as u32;
        assert_eq!(nulls, MIPS_PER_ITERATION - 2);
        assert!(uavs[2..].iter().all(|view| *view == GfxDescriptorView::null_uav()));
        assert!(matches!(
            uavs[1],
            GfxDescriptorView::UnorderedAccess {
                desc: GfxUavDesc { mip_slice: 6, .. },
                ..
            }
        ));
        // 写入的都是 device 上真实的描述符
        let cpu = pass.heap().cpu_handle(base + 4).unwrap();
        assert_eq!(fixture.device.descriptor_at(cpu), Some(GfxDescriptorView::null_uav()));

        drop(texture);
        fixture.finish(vec![pass]);
    }

    #[test]
    fn test_process_from_source_level() {
        let mut fixture = Fixture::new();
        // 256x256: 9 层，从 mip 2 开始，批次为 2 -> 3..=6 和 6 -> 7..=8
        let texture = fixture.texture(256, 256, GfxResourceState::COPY_DEST);
        let mut pass = fixture.pass(texture.clone(), Some(2));

        let (cmd, _) = fixture.run(&mut pass);
        assert_eq!(cmd.dispatches().collect_vec(), vec![glam::uvec3(4, 4, 1), glam::uvec3(1, 1, 1)]);

        let data = pass_data(&cmd);
        assert_eq!(data.iter().map(|d| (d.source_level, d.levels)).collect_vec(), vec![(2, 4), (6, 2)]);
        assert_eq!(data[0].texel_size, glam::vec4(64.0, 64.0, 1.0 / 32.0, 1.0 / 32.0));

        let mip_slices = |batch: u32| {
            let base = pass.batch_base_index(batch).unwrap();
            (0..MIPS_PER_ITERATION)
                .map(|mip| match *pass.heap().view(base + 1 + mip).unwrap() {
                    GfxDescriptorView::UnorderedAccess { resource: Some(_), desc } => Some(desc.mip_slice),
                    _ => None,
                })
                .collect_vec()
        };
        assert_eq!(mip_slices(0), vec![Some(3), Some(4), Some(5), Some(6)]);
        assert_eq!(mip_slices(1), vec![Some(7), Some(8), None, None]);

        // SRV 覆盖整张图，shader 通过 source_level 选择源 mip
        for batch in 0..2 {
            let srv = *pass.heap().view(pass.batch_base_index(batch).unwrap()).unwrap();
            assert!(matches!(
                srv,
                GfxDescriptorView::ShaderResource {
                    desc: GfxSrvDesc {
                        most_detailed_mip: 0,
                        mip_levels: 9,
                        ..
                    },
                    ..
                }
            ));
        }

        drop(texture);
        fixture.finish(vec![pass]);
    }

    #[test]
    fn test_descriptor_indices_are_injective() {
        let mut fixture = Fixture::new();
        let texture = fixture.texture(2048, 2048, GfxResourceState::COMMON);
        let mut pass = fixture.pass(texture.clone(), None);
        let (cmd, _) = fixture.run(&mut pass);

        let srv_bases = table_bases(&cmd, GfxRootSignatureDesc::SRV_TABLE_SLOT);
        let uav_bases = table_bases(&cmd, GfxRootSignatureDesc::UAV_TABLE_SLOT);
        assert_eq!(srv_bases.len(), 3);
        assert_eq!(uav_bases.len(), 3);

        let heap_base = pass.heap().gpu_base().unwrap().0;
        let stride = pass.heap().stride() as u64;
        let mut bound = HashSet::new();
        for (srv, uav) in srv_bases.iter().zip(&uav_bases) {
            let srv_index = (srv.0 - heap_base) / stride;
            let uav_index = (uav.0 - heap_base) / stride;
            assert!(bound.insert(srv_index));
            for mip in 0..MIPS_PER_ITERATION as u64 {
                assert!(bound.insert(uav_index + mip), "index {} bound twice", uav_index + mip);
            }
        }
        assert_eq!(bound.len() as u32, 3 * DESCRIPTORS_PER_BATCH);

        drop(texture);
        fixture.finish(vec![pass]);
    }

    #[test]
    fn test_two_textures_share_one_pipeline() {
        let mut fixture = Fixture::new();
        let albedo = fixture.texture(512, 512, GfxResourceState::COPY_DEST);
        let normal = fixture.texture(128, 64, GfxResourceState::COPY_DEST);

        let albedo_pass = fixture.pass(albedo.clone(), None);
        let normal_pass = fixture.pass(normal.clone(), None);
        assert_eq!(fixture.device.compiled_pipeline_count(), 1);
        assert!(Rc::ptr_eq(albedo_pass.shader(), normal_pass.shader()));
        assert_ne!(albedo_pass.heap().gpu_base(), normal_pass.heap().gpu_base());

        drop((albedo, normal));
        let device = fixture.finish(vec![albedo_pass, normal_pass]);
        assert_eq!(device.live_pipeline_count(), 0);
        assert_eq!(device.live_heap_count(), 0);
        assert_eq!(device.live_texture_count(), 0);
    }

    #[test]
    fn test_rebind_grows_heap() {
        let mut fixture = Fixture::new();
        let small = fixture.texture(16, 16, GfxResourceState::COMMON);
        let large = fixture.texture(4096, 4096, GfxResourceState::COMMON);

        let mut pass = fixture.pass(small.clone(), None);
        assert_eq!(pass.heap().capacity(), DESCRIPTORS_PER_BATCH);

        pass.bind_texture(&fixture.device, large.clone()).unwrap();
        assert_eq!(pass.heap().capacity(), 3 * DESCRIPTORS_PER_BATCH);
        assert_eq!(fixture.device.live_heap_count(), 1);

        let (cmd, _) = fixture.run(&mut pass);
        assert_eq!(cmd.dispatch_count(), 3);
        assert!(Rc::ptr_eq(pass.texture(), &large));

        drop((small, large));
        fixture.finish(vec![pass]);
    }

    #[test]
    fn test_device_lost_surfaces_from_construction() {
        let mut fixture = Fixture::new();
        let texture = fixture.texture(32, 32, GfxResourceState::COMMON);
        fixture.device.simulate_device_lost();

        let result = MipMapPass::new(&fixture.device, &mut fixture.shaders, texture.clone(), pass_desc(None));
        assert!(matches!(result, Err(GfxError::DeviceLost)));
        assert!(!fixture.shaders.exists(SHADER_PATH));

        drop(texture);
        fixture.finish(Vec::new());
    }
}
