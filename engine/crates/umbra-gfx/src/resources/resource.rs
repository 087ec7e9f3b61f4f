use std::cell::Cell;

use ash::vk;

use crate::error::{GfxError, GfxResult};
use crate::resources::state::GfxResourceState;

/// 纹理的创建参数
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxTextureDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub usage: vk::ImageUsageFlags,
}

impl GfxTextureDesc {
    /// 带有完整 mip 链的 2D 纹理，可以被 compute shader 读写
    pub fn new_2d_with_mips(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
            format,
            mip_levels: Self::full_mip_count(width, height),
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_DST,
        }
    }

    /// 完整 mip 链的层数：`floor(log2(max(w, h))) + 1`
    #[inline]
    pub fn full_mip_count(width: u32, height: u32) -> u32 {
        u32::BITS - width.max(height).max(1).leading_zeros()
    }

    /// 第 `level` 层 mip 的尺寸，每一维最小为 1
    #[inline]
    pub fn mip_extent(&self, level: u32) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width.checked_shr(level).unwrap_or(0).max(1),
            height: self.extent.height.checked_shr(level).unwrap_or(0).max(1),
        }
    }
}

/// 一块 GPU 分配以及它当前的状态
///
/// 记录的状态是对命令列表提交执行后 GPU 状态的 CPU 侧预测。
/// 这个预测成立的前提：单线程录制，并且所有访问该资源的命令都在同一个 queue 上按提交顺序执行。
///
/// 通过 `Rc` 在纹理库和引用它的 pass 之间共享。
#[derive(Debug)]
pub struct GfxResource {
    handle: vk::Image,
    desc: GfxTextureDesc,

    /// `None` 表示还没有登记当前状态
    state: Cell<Option<GfxResourceState>>,

    name: String,
}
// new & init
impl GfxResource {
    pub fn new(
        handle: vk::Image,
        desc: GfxTextureDesc,
        initial_state: Option<GfxResourceState>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            desc,
            state: Cell::new(initial_state),
            name: name.into(),
        }
    }
}
// getters
impl GfxResource {
    /// 用于 barrier 调用的底层资源
    #[inline]
    pub fn committed_resource(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> &GfxTextureDesc {
        &self.desc
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.desc.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.desc.extent.height
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    #[inline]
    pub fn is_storage_capable(&self) -> bool {
        self.desc.usage.contains(vk::ImageUsageFlags::STORAGE)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
// state
impl GfxResource {
    /// 当前记录的状态，没有登记时返回 `InvalidResourceState`
    #[inline]
    pub fn current_state(&self) -> GfxResult<GfxResourceState> {
        self.state.get().ok_or_else(|| GfxError::InvalidResourceState {
            resource: self.name.clone(),
        })
    }

    #[inline]
    pub fn has_state(&self) -> bool {
        self.state.get().is_some()
    }

    /// 只应由状态跟踪器在录制 barrier 时调用
    #[inline]
    pub fn commit_state(&self, state: GfxResourceState) {
        self.state.set(Some(state));
    }
}
