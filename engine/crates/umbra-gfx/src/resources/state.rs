//! 资源状态定义
//!
//! `GfxResourceState` 是 pass 框架使用的逻辑状态（按用途划分的 bit 集合），
//! `GfxImageState` 封装 Vulkan 的 pipeline stage、access mask 和 image layout，
//! 两者之间的映射用于生成真正的 barrier。

use ash::vk;

bitflags::bitflags! {
    /// 资源的逻辑状态
    ///
    /// 只读的 bit 可以任意组合；写入 bit（UAV、COPY_DEST、RENDER_TARGET）必须单独出现。
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct GfxResourceState: u32 {
        /// 片段着色器采样
        const PIXEL_SHADER_READ = 1 << 0;
        /// 非片段着色器（compute、vertex）采样
        const NON_PIXEL_SHADER_READ = 1 << 1;
        /// UAV 读写
        const UNORDERED_ACCESS = 1 << 2;
        /// 传输源
        const COPY_SOURCE = 1 << 3;
        /// 传输目标
        const COPY_DEST = 1 << 4;
        /// 颜色附件
        const RENDER_TARGET = 1 << 5;

        /// 所有着色器阶段都可以读取
        const ALL_SHADER_READ = Self::PIXEL_SHADER_READ.bits() | Self::NON_PIXEL_SHADER_READ.bits();
    }
}

impl GfxResourceState {
    /// 初始状态，不属于任何用途
    pub const COMMON: Self = Self::empty();

    const WRITE_STATES: Self = Self::from_bits_truncate(
        Self::UNORDERED_ACCESS.bits() | Self::COPY_DEST.bits() | Self::RENDER_TARGET.bits(),
    );

    /// 检查是否包含写入
    #[inline]
    pub fn is_write(&self) -> bool {
        self.intersects(Self::WRITE_STATES)
    }

    /// 写入状态不能和其他任何状态组合
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.is_write() || self.bits().count_ones() == 1
    }

    /// 映射到 Vulkan 的 stage/access/layout
    ///
    /// `storage_capable` 为 true 时（image 带有 STORAGE usage），着色器读取状态使用 GENERAL layout，
    /// 这样整张图的 SRV 读取和逐个 mip 的 UAV 写入可以共存。此时 access 同时包含 storage 读写，
    /// 进入和离开这个状态的 barrier 都会覆盖 UAV 写入。
    pub fn to_image_state(self, storage_capable: bool) -> GfxImageState {
        debug_assert!(self.is_valid(), "invalid resource state: {self:?}");

        if self.is_empty() {
            return GfxImageState::GENERAL;
        }
        if self.contains(Self::UNORDERED_ACCESS) {
            return GfxImageState::STORAGE_READ_WRITE_COMPUTE;
        }
        if self.contains(Self::COPY_DEST) {
            return GfxImageState::TRANSFER_DST;
        }
        if self.contains(Self::RENDER_TARGET) {
            return GfxImageState::COLOR_ATTACHMENT_WRITE;
        }

        let mut stage = vk::PipelineStageFlags2::NONE;
        let mut access = vk::AccessFlags2::NONE;
        if self.contains(Self::PIXEL_SHADER_READ) {
            stage |= vk::PipelineStageFlags2::FRAGMENT_SHADER;
            access |= vk::AccessFlags2::SHADER_SAMPLED_READ;
        }
        if self.contains(Self::NON_PIXEL_SHADER_READ) {
            stage |= vk::PipelineStageFlags2::COMPUTE_SHADER | vk::PipelineStageFlags2::VERTEX_SHADER;
            access |= vk::AccessFlags2::SHADER_SAMPLED_READ;
        }
        if storage_capable && self.intersects(Self::ALL_SHADER_READ) {
            access |= vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE;
        }
        if self.contains(Self::COPY_SOURCE) {
            stage |= vk::PipelineStageFlags2::TRANSFER;
            access |= vk::AccessFlags2::TRANSFER_READ;
        }

        let layout = if self == Self::COPY_SOURCE {
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL
        } else if storage_capable || self.contains(Self::COPY_SOURCE) {
            vk::ImageLayout::GENERAL
        } else {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        };

        GfxImageState::new(stage, access, layout)
    }
}

/// 图像在 Vulkan 层面的状态
///
/// 描述图像在某个阶段的使用方式，用于生成 barrier。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxImageState {
    /// Pipeline stage
    pub stage: vk::PipelineStageFlags2,
    /// Access mask
    pub access: vk::AccessFlags2,
    /// Image layout
    pub layout: vk::ImageLayout,
}

impl Default for GfxImageState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl GfxImageState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    /// 未定义状态（初始状态或不关心内容）
    pub const UNDEFINED: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED);

    /// 通用布局
    pub const GENERAL: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::from_raw(vk::AccessFlags2::MEMORY_READ.as_raw() | vk::AccessFlags2::MEMORY_WRITE.as_raw()),
        vk::ImageLayout::GENERAL,
    );

    /// 颜色附件输出
    pub const COLOR_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    /// 存储图像读写（计算着色器）
    pub const STORAGE_READ_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    /// 所有着色器阶段上的采样和存储图像读写，UAV barrier 的目标
    pub const SHADER_READ_WRITE_ALL: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw()
                | vk::PipelineStageFlags2::FRAGMENT_SHADER.as_raw()
                | vk::PipelineStageFlags2::VERTEX_SHADER.as_raw(),
        ),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_SAMPLED_READ.as_raw()
                | vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
                | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    /// 传输目标
    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
            | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
            | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
    );

    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(Self::WRITE_ACCESS)
    }

    /// 用于 barrier src 的 access（去掉读操作）
    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access
            & !(vk::AccessFlags2::SHADER_SAMPLED_READ
                | vk::AccessFlags2::SHADER_STORAGE_READ
                | vk::AccessFlags2::TRANSFER_READ
                | vk::AccessFlags2::MEMORY_READ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_validity() {
        assert!(GfxResourceState::COMMON.is_valid());
        assert!(GfxResourceState::ALL_SHADER_READ.is_valid());
        assert!((GfxResourceState::ALL_SHADER_READ | GfxResourceState::COPY_SOURCE).is_valid());
        assert!(GfxResourceState::UNORDERED_ACCESS.is_valid());
        assert!(!(GfxResourceState::UNORDERED_ACCESS | GfxResourceState::PIXEL_SHADER_READ).is_valid());
        assert!(!(GfxResourceState::COPY_DEST | GfxResourceState::RENDER_TARGET).is_valid());
    }

    #[test]
    fn test_shader_read_layout() {
        let sampled = GfxResourceState::ALL_SHADER_READ.to_image_state(false);
        assert_eq!(sampled.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(sampled.stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
        assert!(sampled.stage.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
        assert!(!sampled.is_write());

        let storage = GfxResourceState::ALL_SHADER_READ.to_image_state(true);
        assert_eq!(storage.layout, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn test_storage_shader_read_covers_uav_access() {
        let storage = GfxResourceState::ALL_SHADER_READ.to_image_state(true);
        assert!(storage.access.contains(vk::AccessFlags2::SHADER_SAMPLED_READ));
        assert!(storage.access.contains(vk::AccessFlags2::SHADER_STORAGE_READ));
        assert!(storage.access.contains(vk::AccessFlags2::SHADER_STORAGE_WRITE));
        // 离开这个状态时需要等待 UAV 写入
        assert_eq!(storage.src_access(), vk::AccessFlags2::SHADER_STORAGE_WRITE);

        let sampled = GfxResourceState::ALL_SHADER_READ.to_image_state(false);
        assert!(!sampled.access.contains(vk::AccessFlags2::SHADER_STORAGE_WRITE));
        assert_eq!(sampled.src_access(), vk::AccessFlags2::NONE);
    }

    #[test]
    fn test_write_states() {
        let uav = GfxResourceState::UNORDERED_ACCESS.to_image_state(true);
        assert_eq!(uav, GfxImageState::STORAGE_READ_WRITE_COMPUTE);
        assert!(uav.is_write());
        assert_eq!(uav.src_access(), vk::AccessFlags2::SHADER_STORAGE_WRITE);

        assert_eq!(
            GfxResourceState::COPY_SOURCE.to_image_state(false).layout,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL
        );
    }
}
