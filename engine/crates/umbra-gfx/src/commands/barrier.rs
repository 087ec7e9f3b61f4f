use ash::vk;

use crate::resources::state::{GfxImageState, GfxResourceState};

/// 录制到命令列表中的一条 barrier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxBarrier {
    /// 资源状态转换，覆盖整个资源的所有 mip
    Transition {
        resource: vk::Image,
        before: GfxResourceState,
        after: GfxResourceState,
        mip_levels: u32,
        storage_capable: bool,
    },
    /// 同一资源上 UAV 写入之后的读/写之间的 barrier
    ///
    /// 之后的访问可能是下一次 UAV 写入，也可能是通过整张图的 SRV 采样（包括后续的 pixel shader），
    /// 目标覆盖所有着色器阶段上的采样和存储读写。`resource` 为 `None` 时作用于所有 UAV 访问
    UnorderedAccess { resource: Option<vk::Image> },
}

impl GfxBarrier {
    #[inline]
    pub fn is_transition(&self) -> bool {
        matches!(self, Self::Transition { .. })
    }

    #[inline]
    pub fn resource(&self) -> Option<vk::Image> {
        match self {
            Self::Transition { resource, .. } => Some(*resource),
            Self::UnorderedAccess { resource } => *resource,
        }
    }

    /// 转换为 Vulkan 的 image barrier，全局的 UAV barrier 返回 `None`
    pub fn to_image_barrier(&self) -> Option<GfxImageBarrier> {
        match *self {
            Self::Transition {
                resource,
                before,
                after,
                mip_levels,
                storage_capable,
            } => {
                let src = before.to_image_state(storage_capable);
                let dst = after.to_image_state(storage_capable);
                Some(
                    GfxImageBarrier::new()
                        .image(resource)
                        .layout_transfer(src.layout, dst.layout)
                        .src_mask(src.stage, src.src_access())
                        .dst_mask(dst.stage, dst.access)
                        .image_aspect_flag(vk::ImageAspectFlags::COLOR)
                        .mip_range(0, mip_levels),
                )
            }
            Self::UnorderedAccess { resource: Some(resource) } => {
                let state = GfxImageState::SHADER_READ_WRITE_ALL;
                Some(
                    GfxImageBarrier::new()
                        .image(resource)
                        .layout_transfer(vk::ImageLayout::GENERAL, vk::ImageLayout::GENERAL)
                        .src_mask(state.stage, state.src_access())
                        .dst_mask(state.stage, state.access)
                        .image_aspect_flag(vk::ImageAspectFlags::COLOR)
                        .mip_range(0, vk::REMAINING_MIP_LEVELS),
                )
            }
            Self::UnorderedAccess { resource: None } => None,
        }
    }

    /// 全局 UAV barrier 对应的 memory barrier
    pub fn global_uav_memory_barrier() -> vk::MemoryBarrier2<'static> {
        let state = GfxImageState::SHADER_READ_WRITE_ALL;
        vk::MemoryBarrier2::default()
            .src_stage_mask(state.stage)
            .src_access_mask(state.src_access())
            .dst_stage_mask(state.stage)
            .dst_access_mask(state.access)
    }
}

/// 一批 barrier 翻译成 Vulkan 之后的结果，对应一次 `vkCmdPipelineBarrier2`
#[derive(Default)]
pub struct GfxVkBarrierBatch {
    pub image_barriers: Vec<vk::ImageMemoryBarrier2<'static>>,
    pub memory_barriers: Vec<vk::MemoryBarrier2<'static>>,
}
impl GfxVkBarrierBatch {
    pub fn new(barriers: &[GfxBarrier]) -> Self {
        let mut batch = Self::default();
        for barrier in barriers {
            match barrier.to_image_barrier() {
                Some(image_barrier) => batch.image_barriers.push(*image_barrier.inner()),
                None => batch.memory_barriers.push(GfxBarrier::global_uav_memory_barrier()),
            }
        }
        batch
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.image_barriers.is_empty() && self.memory_barriers.is_empty()
    }

    #[inline]
    pub fn dependency_info(&self) -> vk::DependencyInfo<'_> {
        vk::DependencyInfo::default().image_memory_barriers(&self.image_barriers).memory_barriers(&self.memory_barriers)
    }
}

/// 便捷创建 image memory barrier 的结构体
#[derive(Clone, Copy)]
pub struct GfxImageBarrier {
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::empty(),
                    base_array_layer: 0,
                    layer_count: 1,
                    base_mip_level: 0,
                    level_count: 1,
                },
                ..Default::default()
            },
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::ImageMemoryBarrier2<'static> {
        &self.inner
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.inner.subresource_range.aspect_mask = aspect_mask;
        self
    }

    /// builder
    #[inline]
    pub fn mip_range(mut self, base_mip_level: u32, level_count: u32) -> Self {
        self.inner.subresource_range.base_mip_level = base_mip_level;
        self.inner.subresource_range.level_count = level_count;
        self
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.inner.image = image;
        self
    }
}
