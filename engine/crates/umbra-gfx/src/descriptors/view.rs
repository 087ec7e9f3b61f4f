use ash::vk;

/// CPU 侧的描述符地址
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GfxCpuDescriptorHandle(pub u64);

/// GPU 侧的描述符地址，用于绑定 descriptor table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GfxGpuDescriptorHandle(pub u64);

/// Shader resource view 的描述
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxSrvDesc {
    pub format: vk::Format,
    pub most_detailed_mip: u32,
    pub mip_levels: u32,
}

/// Unordered access view 的描述
///
/// `Default` 为全零的描述，用于填充 dummy 描述符
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GfxUavDesc {
    pub format: vk::Format,
    pub mip_slice: u32,
}

/// 写入描述符堆的一条描述符
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxDescriptorView {
    ShaderResource { resource: vk::Image, desc: GfxSrvDesc },
    /// `resource` 为 `None` 时是 null 描述符
    UnorderedAccess { resource: Option<vk::Image>, desc: GfxUavDesc },
}

impl GfxDescriptorView {
    /// null resource + 全零的 view，用于填充 batch 中未使用的槽位
    #[inline]
    pub fn null_uav() -> Self {
        Self::UnorderedAccess {
            resource: None,
            desc: GfxUavDesc::default(),
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::UnorderedAccess { resource: None, .. })
    }

    #[inline]
    pub fn resource(&self) -> Option<vk::Image> {
        match self {
            Self::ShaderResource { resource, .. } => Some(*resource),
            Self::UnorderedAccess { resource, .. } => *resource,
        }
    }
}
