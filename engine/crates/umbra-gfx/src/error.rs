//! GFX 层的错误类型
//!
//! GPU 资源错误在这个模型中都不是暂时性的：没有本地重试，
//! 所有错误都向上传播到 frame driver，由应用层记录日志后终止。

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GfxError {
    /// 描述符堆容量不足（构造时或分配 range 时）
    #[error("out of descriptor space: requested {requested}, available {available}")]
    OutOfDescriptorSpace { requested: u32, available: u32 },

    /// 描述符索引越界，属于编程错误
    #[error("descriptor index {index} out of range (capacity {capacity})")]
    IndexOutOfRange { index: u32, capacity: u32 },

    /// 设备丢失，由外部驱动导致，无法在 pass 内恢复
    #[error("device lost")]
    DeviceLost,

    /// 对没有登记当前状态的资源请求状态转换，或者请求了非法的状态组合
    #[error("invalid resource state on `{resource}`")]
    InvalidResourceState { resource: String },

    /// 在非 shader visible 的堆上请求 GPU handle
    #[error("descriptor heap is not shader visible")]
    NotShaderVisible,

    #[error("vulkan error: {0}")]
    Vulkan(ash::vk::Result),

    #[error("shader error: {0}")]
    Shader(String),
}

impl From<ash::vk::Result> for GfxError {
    fn from(result: ash::vk::Result) -> Self {
        match result {
            ash::vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Vulkan(other),
        }
    }
}

impl GfxError {
    /// 这个模型中没有可恢复的 GPU 错误
    #[inline]
    pub fn is_fatal(&self) -> bool {
        true
    }
}

pub type GfxResult<T> = Result<T, GfxError>;
