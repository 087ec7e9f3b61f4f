use std::ffi::CStr;
use std::ops::Range;

use ash::vk;

use crate::device::GfxDevice;
use crate::error::GfxResult;

/// compute shader 的 root signature
///
/// 参数布局固定：
/// - slot 0: inline constants（push constants）
/// - slot 1: SRV descriptor table
/// - slot 2: UAV descriptor table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxRootSignatureDesc {
    /// inline constants 的字节数
    pub constants_size: u32,
    pub srv_table_width: u32,
    pub uav_table_width: u32,
}
impl GfxRootSignatureDesc {
    pub const CONSTANTS_SLOT: u32 = 0;
    pub const SRV_TABLE_SLOT: u32 = 1;
    pub const UAV_TABLE_SLOT: u32 = 2;

    /// 一次 dispatch 绑定的描述符总数
    #[inline]
    pub fn descriptors_per_dispatch(&self) -> u32 {
        self.srv_table_width + self.uav_table_width
    }

    /// descriptor table 在 Vulkan 上占用的 descriptor set
    ///
    /// table 中的每个描述符是一个单独的 set（只有 binding 0），SRV table 在前，UAV table 紧随其后。
    /// constants slot 没有对应的 set，返回 `None`。
    pub fn descriptor_sets(&self, slot: u32) -> Option<Range<u32>> {
        match slot {
            Self::SRV_TABLE_SLOT => Some(0..self.srv_table_width),
            Self::UAV_TABLE_SLOT => Some(self.srv_table_width..self.descriptors_per_dispatch()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxComputePipelineDesc {
    /// spv 文件路径，同时也是 shader cache 的 key
    pub shader_path: String,
    pub entry_point: &'static CStr,
    pub root_signature: GfxRootSignatureDesc,
}

/// 编译好的 compute pipeline 以及它的 layout
///
/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxComputePipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    desc: GfxComputePipelineDesc,

    destroyed: bool,
}
// new & init
impl GfxComputePipeline {
    pub fn new(device: &dyn GfxDevice, desc: GfxComputePipelineDesc) -> GfxResult<Self> {
        let (pipeline, layout) = device.create_compute_pipeline(&desc)?;
        log::info!("compile compute pipeline: {}", desc.shader_path);

        Ok(Self {
            pipeline,
            layout,
            desc,
            destroyed: false,
        })
    }
}
// destroy
impl GfxComputePipeline {
    pub fn destroy(&mut self, device: &dyn GfxDevice) {
        if self.destroyed {
            return;
        }
        device.destroy_compute_pipeline(self.pipeline, self.layout);
        self.destroyed = true;
    }
}
impl Drop for GfxComputePipeline {
    fn drop(&mut self) {
        if !self.destroyed {
            log::warn!("compute pipeline `{}` dropped without destroy", self.desc.shader_path);
        }
    }
}
// getters
impl GfxComputePipeline {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    #[inline]
    pub fn desc(&self) -> &GfxComputePipelineDesc {
        &self.desc
    }

    #[inline]
    pub fn root_signature(&self) -> &GfxRootSignatureDesc {
        &self.desc.root_signature
    }
}
