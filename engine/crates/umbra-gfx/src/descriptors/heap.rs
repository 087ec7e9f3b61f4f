//! 描述符堆
//!
//! 固定容量、按索引访问的描述符表。索引 `i` 在 CPU 和 GPU 两个地址空间上都确定性地映射到
//! `base + i * stride`，所有的地址计算都在这里完成，调用方只接触索引和不透明的 handle。

use crate::descriptors::view::{GfxCpuDescriptorHandle, GfxDescriptorView, GfxGpuDescriptorHandle};
use crate::device::GfxDevice;
use crate::error::{GfxError, GfxResult};

/// 默认的描述符堆容量上限，设备可以报告更低的上限
pub const MAX_DESCRIPTOR_HEAP_CAPACITY: u32 = 1_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxDescriptorHeapType {
    /// SRV、UAV、CBV
    CbvSrvUav,
    Sampler,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxDescriptorHeapDesc {
    pub heap_type: GfxDescriptorHeapType,
    /// 描述符数量
    pub capacity: u32,
    /// 是否可以被 shader 访问（绑定到命令列表上）
    pub shader_visible: bool,
}

/// 设备创建堆之后返回的基地址
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxDescriptorHeapBase {
    pub cpu: GfxCpuDescriptorHandle,
    /// 非 shader visible 的堆没有 GPU 地址
    pub gpu: Option<GfxGpuDescriptorHandle>,
}

/// 堆中分配给某个使用者的一段连续索引，不同 range 之间互不重叠
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxDescriptorRange {
    offset: u32,
    count: u32,
}
impl GfxDescriptorRange {
    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// range 内的局部索引转换为堆索引
    #[inline]
    pub fn index(&self, local: u32) -> GfxResult<u32> {
        if local >= self.count {
            return Err(GfxError::IndexOutOfRange {
                index: local,
                capacity: self.count,
            });
        }
        Ok(self.offset + local)
    }

    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.offset < other.offset + other.count && other.offset < self.offset + self.count
    }
}

pub struct GfxDescriptorHeap {
    desc: GfxDescriptorHeapDesc,
    stride: u32,
    base: GfxDescriptorHeapBase,

    /// 下一个可分配的索引
    cursor: u32,

    /// 每个槽位当前写入的描述符（CPU 侧镜像）
    slots: Vec<Option<GfxDescriptorView>>,

    name: String,
    destroyed: bool,
}
// new & init
impl GfxDescriptorHeap {
    /// # Errors
    /// 容量超过设备上限时返回 `OutOfDescriptorSpace`
    pub fn new(device: &dyn GfxDevice, desc: GfxDescriptorHeapDesc, name: impl Into<String>) -> GfxResult<Self> {
        let name = name.into();
        let ceiling = device.max_descriptor_heap_capacity(desc.heap_type);
        if desc.capacity > ceiling {
            log::error!("descriptor heap `{}` requests {} descriptors, ceiling is {}", name, desc.capacity, ceiling);
            return Err(GfxError::OutOfDescriptorSpace {
                requested: desc.capacity,
                available: ceiling,
            });
        }

        let stride = device.descriptor_increment_size(desc.heap_type);
        let base = device.create_descriptor_heap(&desc)?;
        log::info!(
            "create descriptor heap `{}`: {:?} x {}, stride {}, shader visible: {}",
            name,
            desc.heap_type,
            desc.capacity,
            stride,
            desc.shader_visible
        );

        Ok(Self {
            desc,
            stride,
            base,
            cursor: 0,
            slots: vec![None; desc.capacity as usize],
            name,
            destroyed: false,
        })
    }
}
// destroy
impl GfxDescriptorHeap {
    pub fn destroy(mut self, device: &dyn GfxDevice) {
        device.destroy_descriptor_heap(self.base);
        self.destroyed = true;
    }
}
impl Drop for GfxDescriptorHeap {
    fn drop(&mut self) {
        if !self.destroyed {
            log::warn!("descriptor heap `{}` dropped without destroy", self.name);
        }
    }
}
// getters
impl GfxDescriptorHeap {
    #[inline]
    pub fn desc(&self) -> &GfxDescriptorHeapDesc {
        &self.desc
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.desc.capacity
    }

    #[inline]
    pub fn stride(&self) -> u32 {
        self.stride
    }

    #[inline]
    pub fn is_shader_visible(&self) -> bool {
        self.desc.shader_visible
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 剩余可分配的描述符数量
    #[inline]
    pub fn available(&self) -> u32 {
        self.desc.capacity - self.cursor
    }

    /// 绑定到命令列表时使用的 GPU 基地址
    #[inline]
    pub fn gpu_base(&self) -> GfxResult<GfxGpuDescriptorHandle> {
        self.base.gpu.ok_or(GfxError::NotShaderVisible)
    }

    /// 槽位当前的描述符
    #[inline]
    pub fn view(&self, index: u32) -> Option<&GfxDescriptorView> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }
}
// 分配
impl GfxDescriptorHeap {
    /// 从堆中切出 `count` 个连续的描述符
    ///
    /// # Errors
    /// 剩余空间不足时返回 `OutOfDescriptorSpace`，容量为 0 的堆在第一次分配时就会失败
    pub fn allocate_range(&mut self, count: u32) -> GfxResult<GfxDescriptorRange> {
        let available = self.available();
        if self.desc.capacity == 0 || count > available {
            log::error!("descriptor heap `{}` exhausted: requested {}, available {}", self.name, count, available);
            return Err(GfxError::OutOfDescriptorSpace {
                requested: count,
                available,
            });
        }

        let range = GfxDescriptorRange {
            offset: self.cursor,
            count,
        };
        self.cursor += count;
        Ok(range)
    }
}
// 索引
impl GfxDescriptorHeap {
    #[inline]
    fn check_index(&self, index: u32) -> GfxResult<()> {
        if index >= self.desc.capacity {
            return Err(GfxError::IndexOutOfRange {
                index,
                capacity: self.desc.capacity,
            });
        }
        Ok(())
    }

    pub fn cpu_handle(&self, index: u32) -> GfxResult<GfxCpuDescriptorHandle> {
        self.check_index(index)?;
        Ok(GfxCpuDescriptorHandle(self.base.cpu.0 + index as u64 * self.stride as u64))
    }

    pub fn gpu_handle(&self, index: u32) -> GfxResult<GfxGpuDescriptorHandle> {
        self.check_index(index)?;
        let base = self.gpu_base()?;
        Ok(GfxGpuDescriptorHandle(base.0 + index as u64 * self.stride as u64))
    }

    /// 在 `index` 处写入描述符，覆盖之前的内容
    pub fn write(&mut self, device: &dyn GfxDevice, index: u32, view: GfxDescriptorView) -> GfxResult<()> {
        let dst = self.cpu_handle(index)?;
        device.write_descriptor(dst, &view)?;
        self.slots[index as usize] = Some(view);
        Ok(())
    }
}
